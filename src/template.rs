use std::sync::Arc;

use indexmap::IndexMap;

use crate::compiler::CompiledTemplate;
use crate::error::{ConsoleErrorListener, ErrorBuffer, TemplateError};
use crate::group::TemplateGroup;
use crate::interpreter::Interpreter;
use crate::value::{Aggregate, Value};
use crate::writer::{AutoIndentWriter, TemplateWriter};

/// A compiled template plus the attribute values bound for one render.
///
/// Instances are cheap to clone: the compiled code is shared and only the
/// attribute table is copied.
#[derive(Clone, Debug)]
pub struct Template {
    compiled: Arc<CompiledTemplate>,
    locals: IndexMap<String, Option<Value>>,
    group: TemplateGroup,
}

impl Template {
    /// Compiles `source` into a standalone template with its own group.
    pub fn new(source: &str) -> Self {
        TemplateGroup::new().create_string_template(source)
    }

    /// Like [`Template::new`] but fails when `source` has syntax errors
    /// instead of rendering an empty placeholder.
    pub fn try_new(source: &str) -> Result<Self, TemplateError> {
        let group = TemplateGroup::new();
        let errors = Arc::new(ErrorBuffer::new());
        group.set_listener(errors.clone());
        let template = group.create_string_template(source);
        if !errors.is_empty() {
            return Err(TemplateError::Compile(errors.to_string().trim_end().to_string()));
        }
        group.set_listener(Arc::new(ConsoleErrorListener));
        Ok(template)
    }

    pub fn from_compiled(compiled: Arc<CompiledTemplate>, group: TemplateGroup) -> Self {
        let locals = compiled
            .formal_arguments
            .iter()
            .flat_map(|args| args.keys())
            .map(|name| (name.clone(), None))
            .collect();
        Self {
            compiled,
            locals,
            group,
        }
    }

    /// Empty stand-in for a template that could not be found.
    pub(crate) fn blank(name: &str, group: TemplateGroup) -> Self {
        Self::from_compiled(Arc::new(CompiledTemplate::new(name)), group)
    }

    pub fn name(&self) -> &str {
        &self.compiled.name
    }

    pub fn compiled(&self) -> &Arc<CompiledTemplate> {
        &self.compiled
    }

    /// The group this instance was created through; template references
    /// made while rendering it resolve here.
    pub fn group(&self) -> &TemplateGroup {
        &self.group
    }

    pub(crate) fn locals(&self) -> &IndexMap<String, Option<Value>> {
        &self.locals
    }

    pub fn is_anonymous_subtemplate(&self) -> bool {
        self.compiled.is_anon_subtemplate
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.locals.get(name).and_then(Option::as_ref)
    }

    /// Bound attributes in declaration (or insertion) order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.locals
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.as_str(), v)))
    }

    /// Binds `value` to `name`. Adding to an attribute that is already set
    /// turns it into a list; lists being added are spliced in.
    pub fn add(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self, TemplateError> {
        if name.contains('.') {
            return Err(TemplateError::InvalidAttributeName(name.to_string()));
        }
        if self.compiled.has_formal_args && self.compiled.formal_argument(name).is_none() {
            return Err(TemplateError::NoSuchAttribute {
                template: self.name().to_string(),
                name: name.to_string(),
            });
        }
        let value = value.into();
        let slot = self.locals.entry(name.to_string()).or_insert(None);
        *slot = Some(match slot.take() {
            None => value,
            Some(current) => {
                let mut items = match current {
                    Value::List(items) => items,
                    other => vec![other],
                };
                match value {
                    Value::List(more) => items.extend(more),
                    v => items.push(v),
                }
                Value::List(items)
            }
        });
        Ok(self)
    }

    /// `add_many("items.{first,last}", values)` binds one aggregate with a
    /// property per listed name.
    pub fn add_many(&mut self, spec: &str, values: Vec<Value>) -> Result<&mut Self, TemplateError> {
        let spec: String = spec.chars().filter(|c| *c != ' ').collect();
        let invalid = || TemplateError::InvalidAggregate(spec.clone());
        let (name, props) = spec.split_once('.').ok_or_else(invalid)?;
        let props = props
            .strip_prefix('{')
            .and_then(|p| p.strip_suffix('}'))
            .ok_or_else(invalid)?;
        let props: Vec<&str> = props.split(',').collect();
        if name.is_empty() || props.len() != values.len() {
            return Err(invalid());
        }
        let mut aggregate = Aggregate::new();
        for (prop, value) in props.into_iter().zip(values) {
            aggregate.insert(prop, value);
        }
        let name = name.to_string();
        self.add(&name, aggregate)
    }

    pub fn remove(&mut self, name: &str) {
        if self.compiled.has_formal_args {
            if let Some(slot) = self.locals.get_mut(name) {
                *slot = None;
            }
        } else {
            self.locals.shift_remove(name);
        }
    }

    /// Sets an attribute without list accumulation. Names a template with
    /// declared formals doesn't have are ignored.
    pub(crate) fn raw_set(&mut self, name: &str, value: Value) {
        if self.compiled.has_formal_args {
            if let Some(slot) = self.locals.get_mut(name) {
                *slot = Some(value);
            }
        } else {
            self.locals.insert(name.to_string(), Some(value));
        }
    }

    pub fn render(&self) -> String {
        self.render_to_string(self.group.config().line_width)
    }

    pub fn render_with_width(&self, line_width: usize) -> String {
        self.render_to_string(Some(line_width))
    }

    fn render_to_string(&self, line_width: Option<usize>) -> String {
        let newline = self.group.config().newline;
        let mut out = AutoIndentWriter::with_newline(String::new(), &newline);
        out.set_line_width(line_width);
        self.write(&mut out);
        out.into_inner()
    }

    /// Renders into `out`; returns the number of chars written.
    pub fn write(&self, out: &mut dyn TemplateWriter) -> usize {
        Interpreter::new(&self.group)
            .with_line_width(out.line_width())
            .render(out, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_accumulates_lists() {
        let mut t = Template::new("<names>");
        t.add("names", "Ter").unwrap().add("names", "Tom").unwrap();
        t.add("names", vec!["Sri", "Sam"]).unwrap();
        assert_eq!(t.render(), "TerTomSriSam");
        assert!(matches!(t.attribute("names"), Some(Value::List(items)) if items.len() == 4));
    }

    #[test]
    fn test_add_null_then_value() {
        let mut t = Template::new("<x; null=\"-\", separator=\",\">");
        t.add("x", Value::Null).unwrap().add("x", "a").unwrap();
        assert_eq!(t.render(), "-,a");
    }

    #[test]
    fn test_try_new_rejects_syntax_errors() {
        assert_eq!(Template::try_new("<x>!").map(|t| t.render()).ok(), Some("!".to_string()));
        match Template::try_new("<x") {
            Err(TemplateError::Compile(msg)) => assert!(msg.starts_with("1:"), "{}", msg),
            other => panic!("{:?}", other.map(|t| t.render())),
        }
    }

    #[test]
    fn test_add_rejects_bad_names() {
        let mut t = Template::new("<a>");
        assert!(matches!(t.add("a.b", "x"), Err(TemplateError::InvalidAttributeName(_))));

        let group = TemplateGroup::new();
        group.define_template_with_args("t", "<x>", &["x"]);
        let mut t = group.get_instance_of("t").unwrap();
        assert!(matches!(
            t.add("y", "1"),
            Err(TemplateError::NoSuchAttribute { name, .. }) if name == "y"
        ));
    }

    #[test]
    fn test_add_many_builds_aggregate() {
        let mut t = Template::new("<items:{it | <it.first> <it.last>}; separator=\", \">");
        t.add_many("items.{ first, last }", vec!["John".into(), "Smith".into()])
            .unwrap();
        t.add_many("items.{first,last}", vec!["Baron".into(), "Munchhausen".into()])
            .unwrap();
        assert_eq!(t.render(), "John Smith, Baron Munchhausen");
        assert!(matches!(
            t.add_many("items.{first}", vec![]),
            Err(TemplateError::InvalidAggregate(_))
        ));
        assert!(t.add_many("items", vec![]).is_err());
    }

    #[test]
    fn test_remove() {
        let mut t = Template::new("<x>");
        t.add("x", "1").unwrap();
        t.remove("x");
        assert!(t.attribute("x").is_none());
        assert_eq!(t.render(), "");
    }

    #[test]
    fn test_render_with_width_wraps() {
        let mut t = Template::new("<xs; wrap, separator=\",\">");
        t.add("xs", vec!["aaa", "bbb", "ccc"]).unwrap();
        assert_eq!(t.render_with_width(7), "aaa,bbb,\nccc");
    }
}
