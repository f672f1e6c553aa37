use std::sync::{Arc, OnceLock};

use super::CompiledTemplate;

/// Default value declared with `name=value` in a template header.
#[derive(Debug, Clone)]
pub enum DefaultValue {
    Str(String),
    Bool(bool),
    EmptyList,
    /// `{...}` body. Compiled once, on first render that needs it.
    Template {
        text: String,
        compiled: OnceLock<Arc<CompiledTemplate>>,
    },
}

impl DefaultValue {
    pub fn template(text: impl Into<String>) -> Self {
        DefaultValue::Template {
            text: text.into(),
            compiled: OnceLock::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FormalArgument {
    pub name: String,
    /// Slot in the template's locals, assigned when the argument list is built.
    pub index: usize,
    pub default: Option<DefaultValue>,
}

impl FormalArgument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: 0,
            default: None,
        }
    }

    pub fn with_default(name: impl Into<String>, default: DefaultValue) -> Self {
        Self {
            name: name.into(),
            index: 0,
            default: Some(default),
        }
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Compiled form of a `{...}` default; `compile` runs at most once per argument,
    /// even when several renders race for it.
    pub fn compiled_default<F>(&self, compile: F) -> Option<Arc<CompiledTemplate>>
    where
        F: FnOnce(&str) -> Arc<CompiledTemplate>,
    {
        match &self.default {
            Some(DefaultValue::Template { text, compiled }) => Some(Arc::clone(compiled.get_or_init(|| compile(text)))),
            _ => None,
        }
    }

    /// `{<(expr)>}` defaults are rendered to a string before the template runs.
    pub fn is_eager_default(&self, delimiters: (char, char)) -> bool {
        match &self.default {
            Some(DefaultValue::Template { text, .. }) => {
                let open = format!("{{{}(", delimiters.0);
                let close = format!("){}}}", delimiters.1);
                text.starts_with(&open) && text.ends_with(&close)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_default_compiled_once() {
        let arg = FormalArgument::with_default("x", DefaultValue::template("{hi}"));
        let calls = AtomicUsize::new(0);
        let compile = |text: &str| {
            calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(text, "{hi}");
            Arc::new(CompiledTemplate::new("x_default_value"))
        };
        let first = arg.compiled_default(compile).unwrap();
        let second = arg.compiled_default(|_| unreachable!()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_eager_default() {
        let eager = FormalArgument::with_default("x", DefaultValue::template("{<(t())>}"));
        let lazy = FormalArgument::with_default("y", DefaultValue::template("{<t()>}"));
        assert!(eager.is_eager_default(('<', '>')));
        assert!(!lazy.is_eager_default(('<', '>')));
        assert!(!FormalArgument::new("z").is_eager_default(('<', '>')));
    }
}
