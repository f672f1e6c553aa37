use std::sync::{Arc, Weak};

use indexmap::IndexMap;

use super::bytecode::{Instr, OperandType};
use super::disassembler::Disassembler;
use super::formal_argument::FormalArgument;
use super::TemplateOrigin;
use crate::group::{GroupInner, TemplateGroup};
use crate::misc::{line_char_position, Coordinate, Interval};

/// How a region came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionType {
    /// Referenced with `<@r()>` but never given a body.
    Implicit,
    /// `<@r>...<@end>` inside the template.
    Embedded,
    /// `@t.r() ::= ...` in a group.
    Explicit,
}

/// Immutable result of compiling one template body.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    pub name: String,
    /// Directory part of `name`, used to qualify relative template references.
    pub prefix: String,
    /// Source text; subtemplates share the text of their enclosing template.
    pub template: String,
    pub origin: TemplateOrigin,
    pub code: Vec<Instr>,
    pub string_table: Vec<String>,
    /// Source interval of each instruction, parallel to `code`.
    pub source_intervals: Vec<Option<Interval>>,
    /// `None` for ad hoc templates whose attributes are whatever callers add.
    pub formal_arguments: Option<IndexMap<String, FormalArgument>>,
    pub has_formal_args: bool,
    /// Subtemplates and regions found while compiling, already named.
    pub implicit_templates: Vec<Arc<CompiledTemplate>>,
    pub is_anon_subtemplate: bool,
    pub is_region: bool,
    pub region_def_type: Option<RegionType>,
    pub(crate) native_group: Weak<GroupInner>,
}

impl CompiledTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            prefix: crate::misc::get_prefix(&name),
            name,
            template: String::new(),
            origin: TemplateOrigin::default(),
            code: Vec::new(),
            string_table: Vec::new(),
            source_intervals: Vec::new(),
            formal_arguments: None,
            has_formal_args: false,
            implicit_templates: Vec::new(),
            is_anon_subtemplate: false,
            is_region: false,
            region_def_type: None,
            native_group: Weak::new(),
        }
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.prefix = crate::misc::get_prefix(&self.name);
    }

    /// Installs `args`, numbering their slots in declaration order.
    pub fn define_formal_arguments(&mut self, args: Option<Vec<FormalArgument>>) {
        self.has_formal_args = args.is_some();
        self.formal_arguments = args.map(|args| {
            args.into_iter()
                .enumerate()
                .map(|(index, mut arg)| {
                    arg.index = index;
                    (arg.name.clone(), arg)
                })
                .collect()
        });
    }

    pub fn add_formal_argument(&mut self, mut arg: FormalArgument) {
        let args = self.formal_arguments.get_or_insert_with(IndexMap::new);
        arg.index = args.len();
        args.insert(arg.name.clone(), arg);
    }

    pub fn formal_argument(&self, name: &str) -> Option<&FormalArgument> {
        self.formal_arguments.as_ref()?.get(name)
    }

    pub fn num_formal_arguments(&self) -> usize {
        self.formal_arguments.as_ref().map_or(0, IndexMap::len)
    }

    pub fn number_of_args_with_default_values(&self) -> usize {
        self.formal_arguments
            .as_ref()
            .map_or(0, |args| args.values().filter(|a| a.has_default()).count())
    }

    pub fn native_group(&self) -> Option<TemplateGroup> {
        self.native_group.upgrade().map(TemplateGroup::from_inner)
    }

    /// Position in `template` of the instruction at `ip`.
    pub fn location_of(&self, ip: usize) -> Option<Coordinate> {
        let interval = self.source_intervals.get(ip).copied().flatten()?;
        Some(line_char_position(&self.template, interval.start))
    }

    /// Byte offset of each instruction, plus the end of the code.
    pub fn byte_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.code.len() + 1);
        let mut at = 0;
        for instr in &self.code {
            offsets.push(at);
            at += instr.op.size();
        }
        offsets.push(at);
        offsets
    }

    pub fn code_size(&self) -> usize {
        self.code.iter().map(|i| i.op.size()).sum()
    }

    /// Flat byte form: opcode byte followed by big-endian 16-bit operands,
    /// with branch targets as byte offsets.
    pub fn encode(&self) -> Vec<u8> {
        let offsets = self.byte_offsets();
        let mut bytes = Vec::with_capacity(self.code_size());
        for instr in &self.code {
            bytes.push(instr.op as u8);
            for (i, kind) in instr.op.operands().iter().enumerate() {
                let value = match kind {
                    OperandType::Address => offsets.get(instr.operand(i)).copied().unwrap_or(0),
                    _ => instr.operand(i),
                };
                bytes.extend_from_slice(&(value as u16).to_be_bytes());
            }
        }
        bytes
    }

    /// One-line listing such as `write_str 0, load_attr 1, write`.
    pub fn instrs(&self) -> String {
        Disassembler::new(self).instructions()
    }

    pub fn disasm(&self) -> String {
        Disassembler::new(self).disassemble()
    }

    pub fn strings(&self) -> String {
        Disassembler::new(self).strings()
    }

    pub fn source_map(&self) -> String {
        Disassembler::new(self).source_map()
    }

    pub fn dump(&self) -> String {
        let mut out = format!("{}:\n", self.name);
        out.push_str(&self.disasm());
        out.push_str("Strings:\n");
        out.push_str(&self.strings());
        out.push_str("Bytecode to template map:\n");
        out.push_str(&self.source_map());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::bytecode::Opcode;

    fn sample() -> CompiledTemplate {
        let mut t = CompiledTemplate::new("/t");
        t.template = "<if(a)>x<endif>".to_string();
        t.string_table = vec!["a".into(), "x".into()];
        t.code = vec![
            Instr::with1(Opcode::LoadAttr, 0),
            Instr::with1(Opcode::Brf, 3),
            Instr::with1(Opcode::WriteStr, 1),
        ];
        t.source_intervals = vec![Some(Interval::new(4, 5)), Some(Interval::new(1, 3)), Some(Interval::new(7, 8))];
        t
    }

    #[test]
    fn test_encode_uses_byte_offsets() {
        let t = sample();
        assert_eq!(t.byte_offsets(), vec![0, 3, 6, 9]);
        assert_eq!(t.encode(), vec![2, 0, 0, 19, 0, 9, 46, 0, 1]);
    }

    #[test]
    fn test_location_of() {
        let t = sample();
        assert_eq!(t.location_of(0), Some(Coordinate::new(1, 4)));
        assert_eq!(t.location_of(5), None);
    }

    #[test]
    fn test_formal_argument_slots() {
        let mut t = CompiledTemplate::new("/t");
        t.define_formal_arguments(Some(vec![FormalArgument::new("a"), FormalArgument::new("b")]));
        t.add_formal_argument(FormalArgument::new("i"));
        assert_eq!(t.formal_argument("b").map(|a| a.index), Some(1));
        assert_eq!(t.formal_argument("i").map(|a| a.index), Some(2));
        assert!(t.has_formal_args);
        assert_eq!(t.prefix, "/");
    }
}
