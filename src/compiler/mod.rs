//! Template compilation: lexing, parsing and bytecode generation.

pub mod bytecode;
pub mod code_generator;
pub mod compiled_template;
pub mod disassembler;
pub mod formal_argument;
pub mod string_table;

use tracing::debug;

pub use self::compiled_template::{CompiledTemplate, RegionType};
pub use self::formal_argument::{DefaultValue, FormalArgument};

use self::code_generator::CodeGenerator;
use crate::group::TemplateGroup;
use crate::lexer::Lexer;
use crate::misc::Coordinate;
use crate::parser::Parser;

/// Name given to templates created straight from source text.
pub const ANONYMOUS_NAME: &str = "anonymous";

/// Where a template body came from, for positioning diagnostics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateOrigin {
    pub source_name: Option<String>,
    /// Position of the body's opening delimiter in its group source and the
    /// delimiter's width (1 for `"` or `{`, 2 for `<<` and `<%`).
    pub anchor: Option<(Coordinate, usize)>,
    /// `<%...%>` bodies: newlines and indentation are dropped while lexing.
    pub no_newlines: bool,
}

impl TemplateOrigin {
    pub fn named(source_name: impl Into<String>) -> Self {
        Self {
            source_name: Some(source_name.into()),
            ..Self::default()
        }
    }

    /// Maps a position inside the body to a position in the enclosing source.
    pub fn locate(&self, line: usize, char_position: usize) -> Coordinate {
        match self.anchor {
            Some((at, width)) => Coordinate::new(at.line + line - 1, at.char_position + width + char_position),
            None => Coordinate::new(line, char_position),
        }
    }
}

/// Turns template source into [`CompiledTemplate`]s for one group.
pub struct TemplateCompiler<'g> {
    group: &'g TemplateGroup,
}

impl<'g> TemplateCompiler<'g> {
    pub fn new(group: &'g TemplateGroup) -> Self {
        Self { group }
    }

    pub fn group(&self) -> &TemplateGroup {
        self.group
    }

    /// Compiles a body with no declared arguments.
    pub fn compile_ad_hoc(&self, name: &str, template: &str) -> CompiledTemplate {
        self.compile(name, None, template, TemplateOrigin::default())
    }

    /// Compiles `template` against `args`. Syntax errors are reported to the
    /// group's listener and yield an empty body that keeps the arguments.
    pub fn compile(
        &self,
        name: &str,
        args: Option<Vec<FormalArgument>>,
        template: &str,
        origin: TemplateOrigin,
    ) -> CompiledTemplate {
        let errors = self.group.error_manager();
        let tokens = Lexer::new(template, self.group.delimiters(), &errors, &origin).tokenize();
        let parsed = Parser::new(tokens, template, &errors, &origin).parse();

        let generated = parsed.and_then(|chunk| {
            CodeGenerator::new(self, name, template, &origin).generate(&chunk, args.clone())
        });
        let mut code = match generated {
            Some(code) => code,
            None => {
                let mut blank = CompiledTemplate::new(name);
                blank.define_formal_arguments(args);
                blank
            }
        };
        code.template = template.to_string();
        code.origin = origin;
        code.native_group = self.group.downgrade();
        debug!(target: "stemplate", name, instructions = code.code.len(), "compiled template");
        code
    }

    pub(crate) fn next_subtemplate_name(&self) -> String {
        self.group.next_subtemplate_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_with_anchor() {
        let plain = TemplateOrigin::default();
        assert_eq!(plain.locate(1, 3), Coordinate::new(1, 3));

        let origin = TemplateOrigin {
            source_name: Some("t.stg".into()),
            anchor: Some((Coordinate::new(2, 9), 1)),
            no_newlines: false,
        };
        assert_eq!(origin.locate(1, 1), Coordinate::new(2, 11));
        assert_eq!(origin.locate(3, 0), Coordinate::new(4, 10));
    }
}
