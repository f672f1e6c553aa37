use crate::compiler::bytecode::RenderOption;
use crate::misc::Interval;

/// Parsed template body.
pub type Chunk = Vec<Element>;

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Text { text: String, interval: Interval },
    Newline { interval: Interval },
    Expr(ExprTag),
    /// An element preceded by leading whitespace on its line.
    Indented { indent: String, interval: Interval, element: Box<Element> },
    If(IfStat),
    Region(Region),
}

impl Element {
    pub fn is_compound(&self) -> bool {
        matches!(self, Element::If(_) | Element::Region(_))
    }
}

/// `<expr; opt=value, ...>`
#[derive(Debug, Clone, PartialEq)]
pub struct ExprTag {
    pub expr: Expr,
    pub options: Option<Vec<OptionAssign>>,
    pub interval: Interval,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionAssign {
    /// `None` when the name is not a known option; the value is still compiled.
    pub option: Option<RenderOption>,
    pub value: Expr,
    pub interval: Interval,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStat {
    pub branches: Vec<Branch>,
    pub else_branch: Option<Chunk>,
    pub else_interval: Option<Interval>,
    pub interval: Interval,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub condition: Expr,
    pub body: Chunk,
    pub keyword: Interval,
}

/// Embedded region `<@r>...<@end>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: String,
    pub name_line: usize,
    pub name_char_position: usize,
    pub body: Chunk,
    pub interval: Interval,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subtemplate {
    pub args: Vec<String>,
    pub body: Chunk,
    pub interval: Interval,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Args {
    None,
    Positional(Vec<Expr>),
    Named { args: Vec<(String, Interval, Expr)>, pass_through: bool },
    PassThrough,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub interval: Interval,
}

impl Expr {
    pub fn new(kind: ExprKind, interval: Interval) -> Self {
        Self { kind, interval }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Attr(String),
    Str(String),
    Bool(bool),
    /// `None` slots are the empty elements of `[a,,b]`.
    List(Vec<Option<Expr>>),
    Subtemplate(Subtemplate),
    Prop { target: Box<Expr>, name: String },
    PropInd { target: Box<Expr>, property: Box<Expr> },
    Include { name: String, args: Args },
    IncludeSuper { name: String, args: Args },
    IncludeRegion(String),
    IncludeSuperRegion(String),
    /// `(expr)(args)`
    IncludeInd { name: Box<Expr>, args: Vec<Expr> },
    Func { name: String, arg: Option<Box<Expr>> },
    /// `(expr)` outside a condition: evaluated to a string up front.
    ToStr(Box<Expr>),
    Map { target: Box<Expr>, templates: Vec<TemplateRef> },
    Zip { exprs: Vec<Expr>, template: TemplateRef },
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

/// Right-hand side of `:` in map expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateRef {
    Include { name: String, args: Args, interval: Interval },
    Subtemplate(Subtemplate),
    Indirect { name: Box<Expr>, args: Vec<Expr>, interval: Interval },
}

impl TemplateRef {
    pub fn interval(&self) -> Interval {
        match self {
            TemplateRef::Include { interval, .. } | TemplateRef::Indirect { interval, .. } => *interval,
            TemplateRef::Subtemplate(s) => s.interval,
        }
    }
}
