use std::cell::{Cell, RefCell};

use indexmap::IndexMap;

use crate::template::Template;
use crate::value::Value;

/// Attributes bound implicitly by iteration; a nested template never sees
/// its caller's copies.
pub const IMPLICIT_ATTRIBUTES: [&str; 3] = ["it", "i", "i0"];

/// One active template during a render. Frames chain to their caller, which
/// is how unresolved attribute names are looked up dynamically.
#[derive(Debug)]
pub struct Frame<'a> {
    template: &'a Template,
    parent: Option<&'a Frame<'a>>,
    locals: RefCell<IndexMap<String, Option<Value>>>,
    ip: Cell<usize>,
    depth: usize,
}

impl<'a> Frame<'a> {
    pub fn root(template: &'a Template) -> Self {
        Self::with_parent(template, None)
    }

    pub fn child(template: &'a Template, parent: &'a Frame<'a>) -> Self {
        Self::with_parent(template, Some(parent))
    }

    fn with_parent(template: &'a Template, parent: Option<&'a Frame<'a>>) -> Self {
        Self {
            template,
            parent,
            locals: RefCell::new(template.locals().clone()),
            ip: Cell::new(0),
            depth: parent.map_or(1, |p| p.depth + 1),
        }
    }

    pub fn template(&self) -> &'a Template {
        self.template
    }

    pub fn parent(&self) -> Option<&'a Frame<'a>> {
        self.parent
    }

    /// Nesting level, 1 for the template being rendered.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn ip(&self) -> usize {
        self.ip.get()
    }

    pub(crate) fn set_ip(&self, ip: usize) {
        self.ip.set(ip);
    }

    /// `None` when this frame has no slot called `name`; `Some(None)` when the
    /// slot exists but was never set.
    pub fn local(&self, name: &str) -> Option<Option<Value>> {
        self.locals.borrow().get(name).cloned()
    }

    pub fn local_at(&self, index: usize) -> Option<Value> {
        self.locals.borrow().get_index(index).and_then(|(_, v)| v.clone())
    }

    pub fn is_set(&self, name: &str) -> bool {
        matches!(self.locals.borrow().get(name), Some(Some(_)))
    }

    pub fn set_local(&self, name: &str, value: Value) {
        if let Some(slot) = self.locals.borrow_mut().get_mut(name) {
            *slot = Some(value);
        }
    }

    /// Walks outward from this frame to the root.
    pub fn ancestors(&self) -> impl Iterator<Item = &Frame<'a>> {
        std::iter::successors(Some(self), |f| f.parent)
    }

    /// Names of the active templates, outermost first.
    pub fn enclosing_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ancestors().map(|f| f.template.name().to_string()).collect();
        names.reverse();
        names
    }

    /// Dynamic scope lookup: this frame, then each caller. Implicit
    /// iteration attributes only resolve in the frame that owns them.
    pub fn lookup(&self, name: &str) -> Option<Option<Value>> {
        let implicit = IMPLICIT_ATTRIBUTES.contains(&name);
        self.ancestors()
            .enumerate()
            .filter(|(n, _)| *n == 0 || !implicit)
            .find_map(|(_, f)| f.local(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::TemplateGroup;

    #[test]
    fn test_lookup_walks_callers() {
        let group = TemplateGroup::new();
        group.define_template_with_args("outer", "<inner()>", &["name"]);
        group.define_template("inner", "<name>");
        let mut outer = group.get_instance_of("outer").unwrap();
        outer.add("name", "parrt").unwrap();
        let mut inner = group.get_instance_of("inner").unwrap();
        inner.add("it", "x").unwrap();

        let root = Frame::root(&outer);
        let nested = Frame::child(&inner, &root);
        assert_eq!(nested.depth(), 2);
        assert_eq!(nested.lookup("name").flatten().unwrap().to_string(), "parrt");
        assert!(nested.lookup("missing").is_none());
        assert_eq!(nested.enclosing_names(), vec!["/outer", "/inner"]);
    }

    #[test]
    fn test_implicit_attributes_are_not_inherited() {
        let group = TemplateGroup::new();
        group.define_template("outer", "<inner()>");
        group.define_template("inner", "<it>");
        let mut outer = group.get_instance_of("outer").unwrap();
        outer.add("it", "x").unwrap();
        let inner = group.get_instance_of("inner").unwrap();

        let root = Frame::root(&outer);
        let nested = Frame::child(&inner, &root);
        assert!(root.lookup("it").is_some());
        assert!(nested.lookup("it").is_none());
    }

    #[test]
    fn test_unset_formal_shadows_caller() {
        let group = TemplateGroup::new();
        group.define_template_with_args("outer", "<inner()>", &["x"]);
        group.define_template_with_args("inner", "<x>", &["x"]);
        let mut outer = group.get_instance_of("outer").unwrap();
        outer.add("x", "1").unwrap();
        let inner = group.get_instance_of("inner").unwrap();

        let root = Frame::root(&outer);
        let nested = Frame::child(&inner, &root);
        assert!(matches!(nested.lookup("x"), Some(None)));
        nested.set_local("x", Value::from("2"));
        assert_eq!(nested.local_at(0).unwrap().to_string(), "2");
    }
}
