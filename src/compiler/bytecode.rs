use std::collections::HashMap;
use std::fmt;

use lazy_static::lazy_static;

/// Size of one encoded operand.
pub const OPERAND_SIZE: usize = 2;

/// Largest string index or address an operand can hold.
pub const MAX_OPERAND: usize = i16::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    String,
    Address,
    Int,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Opcode {
    LoadStr = 1,
    LoadAttr,
    LoadLocal,
    LoadProp,
    LoadPropInd,
    StoreOption,
    StoreArg,
    New,
    NewInd,
    NewBoxArgs,
    SuperNew,
    SuperNewBoxArgs,
    Write,
    WriteOpt,
    Map,
    RotMap,
    ZipMap,
    Br,
    Brf,
    Options,
    Args,
    Passthru,
    List,
    Add,
    ToStr,
    First,
    Last,
    Rest,
    Trunc,
    Strip,
    Trim,
    Length,
    Strlen,
    Reverse,
    Not,
    Or,
    And,
    Indent,
    Dedent,
    Newline,
    Noop,
    Pop,
    Null,
    True,
    False,
    WriteStr,
    WriteLocal,
}

use OperandType::{Address as A, Int as I, String as S};

impl Opcode {
    pub const ALL: [Opcode; 47] = [
        Opcode::LoadStr,
        Opcode::LoadAttr,
        Opcode::LoadLocal,
        Opcode::LoadProp,
        Opcode::LoadPropInd,
        Opcode::StoreOption,
        Opcode::StoreArg,
        Opcode::New,
        Opcode::NewInd,
        Opcode::NewBoxArgs,
        Opcode::SuperNew,
        Opcode::SuperNewBoxArgs,
        Opcode::Write,
        Opcode::WriteOpt,
        Opcode::Map,
        Opcode::RotMap,
        Opcode::ZipMap,
        Opcode::Br,
        Opcode::Brf,
        Opcode::Options,
        Opcode::Args,
        Opcode::Passthru,
        Opcode::List,
        Opcode::Add,
        Opcode::ToStr,
        Opcode::First,
        Opcode::Last,
        Opcode::Rest,
        Opcode::Trunc,
        Opcode::Strip,
        Opcode::Trim,
        Opcode::Length,
        Opcode::Strlen,
        Opcode::Reverse,
        Opcode::Not,
        Opcode::Or,
        Opcode::And,
        Opcode::Indent,
        Opcode::Dedent,
        Opcode::Newline,
        Opcode::Noop,
        Opcode::Pop,
        Opcode::Null,
        Opcode::True,
        Opcode::False,
        Opcode::WriteStr,
        Opcode::WriteLocal,
    ];

    pub fn from_byte(b: u8) -> Option<Opcode> {
        Opcode::ALL.get((b as usize).checked_sub(1)?).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::LoadStr => "load_str",
            Opcode::LoadAttr => "load_attr",
            Opcode::LoadLocal => "load_local",
            Opcode::LoadProp => "load_prop",
            Opcode::LoadPropInd => "load_prop_ind",
            Opcode::StoreOption => "store_option",
            Opcode::StoreArg => "store_arg",
            Opcode::New => "new",
            Opcode::NewInd => "new_ind",
            Opcode::NewBoxArgs => "new_box_args",
            Opcode::SuperNew => "super_new",
            Opcode::SuperNewBoxArgs => "super_new_box_args",
            Opcode::Write => "write",
            Opcode::WriteOpt => "write_opt",
            Opcode::Map => "map",
            Opcode::RotMap => "rot_map",
            Opcode::ZipMap => "zip_map",
            Opcode::Br => "br",
            Opcode::Brf => "brf",
            Opcode::Options => "options",
            Opcode::Args => "args",
            Opcode::Passthru => "passthru",
            Opcode::List => "list",
            Opcode::Add => "add",
            Opcode::ToStr => "tostr",
            Opcode::First => "first",
            Opcode::Last => "last",
            Opcode::Rest => "rest",
            Opcode::Trunc => "trunc",
            Opcode::Strip => "strip",
            Opcode::Trim => "trim",
            Opcode::Length => "length",
            Opcode::Strlen => "strlen",
            Opcode::Reverse => "reverse",
            Opcode::Not => "not",
            Opcode::Or => "or",
            Opcode::And => "and",
            Opcode::Indent => "indent",
            Opcode::Dedent => "dedent",
            Opcode::Newline => "newline",
            Opcode::Noop => "noop",
            Opcode::Pop => "pop",
            Opcode::Null => "null",
            Opcode::True => "true",
            Opcode::False => "false",
            Opcode::WriteStr => "write_str",
            Opcode::WriteLocal => "write_local",
        }
    }

    pub fn operands(self) -> &'static [OperandType] {
        match self {
            Opcode::LoadStr | Opcode::LoadAttr | Opcode::LoadProp | Opcode::StoreArg => &[S],
            Opcode::NewBoxArgs | Opcode::SuperNewBoxArgs | Opcode::Passthru => &[S],
            Opcode::Indent | Opcode::WriteStr => &[S],
            Opcode::LoadLocal | Opcode::StoreOption | Opcode::NewInd | Opcode::WriteLocal => &[I],
            Opcode::RotMap | Opcode::ZipMap => &[I],
            Opcode::New | Opcode::SuperNew => &[S, I],
            Opcode::Br | Opcode::Brf | Opcode::Or | Opcode::And => &[A],
            _ => &[],
        }
    }

    /// Encoded width in bytes.
    pub fn size(self) -> usize {
        1 + self.operands().len() * OPERAND_SIZE
    }

    pub fn is_branch(self) -> bool {
        self.operands().first() == Some(&OperandType::Address)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One instruction. Address operands hold instruction indexes; they become
/// byte offsets only when the template is encoded or listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instr {
    pub op: Opcode,
    pub a: u16,
    pub b: u16,
}

impl Instr {
    pub fn new(op: Opcode) -> Self {
        Self { op, a: 0, b: 0 }
    }

    pub fn with1(op: Opcode, a: usize) -> Self {
        Self { op, a: a as u16, b: 0 }
    }

    pub fn with2(op: Opcode, a: usize, b: usize) -> Self {
        Self {
            op,
            a: a as u16,
            b: b as u16,
        }
    }

    pub fn operand(&self, i: usize) -> usize {
        if i == 0 {
            self.a as usize
        } else {
            self.b as usize
        }
    }
}

/// Options an expression can carry after `;`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderOption {
    Anchor = 0,
    Format,
    Null,
    Separator,
    Wrap,
}

impl RenderOption {
    pub const COUNT: usize = 5;

    pub fn from_name(name: &str) -> Option<RenderOption> {
        match name {
            "anchor" => Some(RenderOption::Anchor),
            "format" => Some(RenderOption::Format),
            "null" => Some(RenderOption::Null),
            "separator" => Some(RenderOption::Separator),
            "wrap" => Some(RenderOption::Wrap),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RenderOption::Anchor => "anchor",
            RenderOption::Format => "format",
            RenderOption::Null => "null",
            RenderOption::Separator => "separator",
            RenderOption::Wrap => "wrap",
        }
    }

    /// Value used when the option is named without `=value`.
    pub fn default_value(self) -> Option<&'static str> {
        match self {
            RenderOption::Anchor => Some("true"),
            RenderOption::Wrap => Some("\n"),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

lazy_static! {
    /// Built-in single-argument functions.
    pub static ref FUNCS: HashMap<&'static str, Opcode> = {
        let mut m = HashMap::new();
        m.insert("first", Opcode::First);
        m.insert("last", Opcode::Last);
        m.insert("rest", Opcode::Rest);
        m.insert("trunc", Opcode::Trunc);
        m.insert("strip", Opcode::Strip);
        m.insert("trim", Opcode::Trim);
        m.insert("length", Opcode::Length);
        m.insert("strlen", Opcode::Strlen);
        m.insert("reverse", Opcode::Reverse);
        m
    };
}
