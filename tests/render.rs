use std::any::Any;
use std::fmt;
use std::sync::Arc;

use similar_asserts::assert_eq;
use stemplate::interpreter::{Frame, Interpreter};
use stemplate::{
    Dictionary, EngineConfig, ErrorBuffer, HostObject, ModelAdaptor, NoSuchProperty, NumberRenderer, StringRenderer,
    Template, TemplateGroup, Value,
};

fn group_with_errors() -> (TemplateGroup, Arc<ErrorBuffer>) {
    let group = TemplateGroup::new();
    let errors = Arc::new(ErrorBuffer::new());
    group.set_listener(errors.clone());
    (group, errors)
}

#[test]
fn null_values_take_the_null_option_between_separators() {
    let mut t = Template::new("<names; null=\"X\", separator=\", \">");
    t.add("names", Value::List(vec!["A".into(), Value::Null, "B".into()]))
        .unwrap();
    assert_eq!(t.render(), "A, X, B");
}

#[test]
fn nulls_without_null_option_leave_no_stray_separator() {
    let mut t = Template::new("<names; separator=\", \">");
    t.add("names", Value::List(vec![Value::Null, "A".into(), Value::Null, "B".into(), Value::Null]))
        .unwrap();
    assert_eq!(t.render(), "A, B");
}

#[test]
fn nested_empty_lists_collapse() {
    let t = Template::new("<[[],[]]:{x|<x>!}; separator=\", \">");
    assert_eq!(t.render(), "");
}

#[test]
fn empty_expression_line_is_suppressed() {
    let t = Template::new("begin\n<items>\nend\n");
    assert_eq!(t.render(), "begin\nend\n");

    let mut t = Template::new("begin\n<items>\nend\n");
    t.add("items", Value::List(vec![])).unwrap();
    assert_eq!(t.render(), "begin\nend\n");
}

#[test]
fn blank_lines_in_text_survive() {
    let t = Template::new("a\n\nb\n");
    assert_eq!(t.render(), "a\n\nb\n");
}

#[test]
fn missing_argument_is_reported_not_fatal() {
    let (group, errors) = group_with_errors();
    group.load_group_string("t.stg", "t(x,y) ::= \"<u()>\"\nu(z) ::= \"\"\n");
    let mut t = group.get_instance_of("t").unwrap();
    t.add("x", "1").unwrap().add("y", "2").unwrap();
    assert_eq!(t.render(), "");
    let msgs = errors.errors();
    assert_eq!(msgs.len(), 1);
    assert!(
        msgs[0]
            .to_string()
            .ends_with("passed 0 arg(s) to template /u with 1 declared arg(s)"),
        "{}",
        msgs[0]
    );
}

#[test]
fn indirect_template_name() {
    let group = TemplateGroup::new();
    group.define_template("foo", "bar");
    group.define_template_with_args("test", "<(name)()>", &["name"]);
    let mut t = group.get_instance_of("test").unwrap();
    t.add("name", "foo").unwrap();
    assert_eq!(t.render(), "bar");
}

#[test]
fn dictionary_default_key_and_default_string() {
    let group = TemplateGroup::from_group_string(
        "typeInit ::= [\"int\":\"0\", default:key]\n\
         nullInit ::= [\"int\":\"0\", default:\"null\"]\n\
         var(type) ::= \"<typeInit.(type)>/<nullInit.(type)>\"\n",
    );
    let mut t = group.get_instance_of("var").unwrap();
    t.add("type", "UserRecord").unwrap();
    assert_eq!(t.render(), "UserRecord/null");

    let mut t = group.get_instance_of("var").unwrap();
    t.add("type", "int").unwrap();
    assert_eq!(t.render(), "0/0");
}

#[test]
fn dictionary_templates_see_the_caller() {
    let group = TemplateGroup::from_group_string(
        "wrap ::= [\"b\":{[<x>]}, default:{<x>}]\n\
         t(x, kind) ::= \"<wrap.(kind)>\"\n",
    );
    let mut t = group.get_instance_of("t").unwrap();
    t.add("x", "hi").unwrap().add("kind", "b").unwrap();
    assert_eq!(t.render(), "[hi]");

    let mut t = group.get_instance_of("t").unwrap();
    t.add("x", "hi").unwrap().add("kind", "other").unwrap();
    assert_eq!(t.render(), "hi");
}

#[derive(Debug)]
struct Manager;

impl fmt::Display for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("manager")
    }
}

impl HostObject for Manager {
    fn type_name(&self) -> &'static str {
        "Manager"
    }

    fn supertypes(&self) -> &'static [&'static str] {
        &["Employee"]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Tagged(&'static str);

impl ModelAdaptor for Tagged {
    fn get_property(
        &self,
        _interp: &Interpreter,
        _frame: &Frame<'_>,
        _model: &Value,
        _property: &Value,
        name: &str,
    ) -> Result<Value, NoSuchProperty> {
        Ok(Value::Str(format!("{}.{}", self.0, name)))
    }
}

#[test]
fn registering_a_subtype_adaptor_overrides_cached_supertype() {
    let group = TemplateGroup::new();
    group.define_template_with_args("t", "<m.name>", &["m"]);
    let mut t = group.get_instance_of("t").unwrap();
    t.add("m", Value::Object(Arc::new(Manager))).unwrap();

    group.register_model_adaptor("Employee", Arc::new(Tagged("employee")));
    assert_eq!(t.render(), "employee.name");
    assert!(group.adaptors().cached_types() > 0);

    group.register_model_adaptor("Manager", Arc::new(Tagged("manager")));
    assert_eq!(t.render(), "manager.name");
}

#[test]
fn missing_property_is_null_and_silent_by_default() {
    let (group, errors) = group_with_errors();
    group.define_template_with_args("t", "[<u.nope>]", &["u"]);
    let mut d = Dictionary::new();
    d.insert("name", "parrt");
    let mut t = group.get_instance_of("t").unwrap();
    t.add("u", d).unwrap();
    assert_eq!(t.render(), "[]");
    assert!(errors.is_empty());
}

#[test]
fn renderer_formats_strings() {
    let group = TemplateGroup::new();
    group.register_renderer("string", Arc::new(StringRenderer));
    group.define_template_with_args("t", "<x; format=\"upper\">|<x; format=\"cap\">", &["x"]);
    let mut t = group.get_instance_of("t").unwrap();
    t.add("x", "hello").unwrap();
    assert_eq!(t.render(), "HELLO|Hello");
}

#[test]
fn conditionals_and_iteration() {
    let group = TemplateGroup::from_group_string(
        "list(users) ::= <<\n\
         <users:{u | <i>. <u.name><if(u.admin)> (admin)<endif>}; separator=\"\\n\">\n\
         >>\n",
    );
    let mut admin = Dictionary::new();
    admin.insert("name", "ter").insert("admin", true);
    let mut plain = Dictionary::new();
    plain.insert("name", "tom").insert("admin", false);
    let mut t = group.get_instance_of("list").unwrap();
    t.add("users", Value::List(vec![admin.into(), plain.into()])).unwrap();
    assert_eq!(t.render(), "1. ter (admin)\n2. tom");
}

#[test]
fn indentation_applies_to_nested_lines() {
    let group = TemplateGroup::from_group_string(
        "method(body) ::= <<\n\
         void f() {\n    <body; separator=\"\\n\">\n}\n\
         >>\n",
    );
    let mut t = group.get_instance_of("method").unwrap();
    t.add("body", vec!["a();", "b();"]).unwrap();
    assert_eq!(t.render(), "void f() {\n    a();\n    b();\n}");
}

fn single_error(errors: &ErrorBuffer) -> String {
    let msgs = errors.errors();
    assert_eq!(msgs.len(), 1, "{}", errors);
    msgs[0].to_string()
}

#[test]
fn zip_map_with_too_many_lists_reports_and_uses_declared_args() {
    let (group, errors) = group_with_errors();
    group.load_group_string("t.stg", "t(a,b,c) ::= \"<a,b,c:{x,y | <x><y>}; separator=\\\",\\\">\"\n");
    let mut t = group.get_instance_of("t").unwrap();
    t.add("a", vec!["1", "2"]).unwrap();
    t.add("b", vec!["3", "4"]).unwrap();
    t.add("c", vec!["5", "6"]).unwrap();
    assert_eq!(t.render(), "13,24");
    let msg = single_error(&errors);
    assert!(
        msg.ends_with("iterating through 3 values in zip map but template has 2 declared arguments"),
        "{}",
        msg
    );
}

#[test]
fn zip_map_runs_to_the_longest_list() {
    let mut t = Template::new("<a,b:{x,y | <x>:<y>}; separator=\",\">");
    t.add("a", vec!["a", "b", "c"]).unwrap();
    t.add("b", vec!["1", "2"]).unwrap();
    assert_eq!(t.render(), "a:1,b:2,c:");
}

#[test]
fn string_function_on_a_number_is_reported() {
    let (group, errors) = group_with_errors();
    group.define_template_with_args("t", "[<strlen(x)>]", &["x"]);
    let mut t = group.get_instance_of("t").unwrap();
    t.add("x", 3).unwrap();
    assert_eq!(t.render(), "[]");
    let msg = single_error(&errors);
    assert!(msg.ends_with("function strlen expects a string not int"), "{}", msg);
}

#[test]
fn early_evaluation_in_condition_renders_to_a_string() {
    let group = TemplateGroup::new();
    group.define_template("empty", "");
    group.define_template("full", "hi");
    group.define_template_with_args("t", "<if((y))>yes<else>no<endif>", &["y"]);

    let mut t = group.get_instance_of("t").unwrap();
    t.add("y", group.get_instance_of("empty").unwrap()).unwrap();
    assert_eq!(t.render(), "no");

    let mut t = group.get_instance_of("t").unwrap();
    t.add("y", group.get_instance_of("full").unwrap()).unwrap();
    assert_eq!(t.render(), "yes");

    let mut t = group.get_instance_of("t").unwrap();
    t.add("y", false).unwrap();
    assert_eq!(t.render(), "no");
}

#[test]
fn grouping_parens_in_condition_keep_boolean_logic() {
    let mut t = Template::new("<if((a||b)&&!c)>yes<else>no<endif>");
    t.add("a", false).unwrap().add("b", true).unwrap();
    assert_eq!(t.render(), "yes");
    t.add("c", true).unwrap();
    assert_eq!(t.render(), "no");
}

#[test]
fn anchor_aligns_continuation_lines() {
    let mut t = Template::new("foo: <xs; anchor, separator=\"\\n\">");
    t.add("xs", vec!["a", "b", "c"]).unwrap();
    assert_eq!(t.render(), "foo: a\n     b\n     c");

    let mut t = Template::new("foo: <xs; separator=\"\\n\">");
    t.add("xs", vec!["a", "b"]).unwrap();
    assert_eq!(t.render(), "foo: a\nb");
}

#[test]
fn configured_newline_replaces_every_line_break() {
    let config = EngineConfig::from_toml_str("newline = \"\\r\\n\"\n").unwrap();
    let group = TemplateGroup::with_config(config);
    group.define_template_with_args("t", "x\r\ny <v>\n", &["v"]);
    let mut t = group.get_instance_of("t").unwrap();
    t.add("v", "1\n2").unwrap();
    assert_eq!(t.render(), "x\r\ny 1\r\n2\r\n");
}

#[test]
fn line_continuation_joins_lines() {
    let t = Template::new("a<\\\\>\n   b <\\\\>   \nc");
    assert_eq!(t.render(), "ab c");
}

#[test]
fn unknown_culture_is_reported_when_rendering() {
    let config = EngineConfig::from_toml_str("culture = \"xx-YY\"\n").unwrap();
    let group = TemplateGroup::with_config(config);
    let errors = Arc::new(ErrorBuffer::new());
    group.set_listener(errors.clone());
    group.register_renderer("float", Arc::new(NumberRenderer));
    group.define_template_with_args("t", "<x; format=\"%.2f\">", &["x"]);
    let mut t = group.get_instance_of("t").unwrap();
    t.add("x", 2.5).unwrap();
    assert_eq!(t.render(), "2.50");
    let msg = single_error(&errors);
    assert!(msg.ends_with("no such culture: xx-YY"), "{}", msg);
}

#[test]
fn culture_shapes_number_output() {
    let config = EngineConfig::from_toml_str("culture = \"de-DE\"\n").unwrap();
    let group = TemplateGroup::with_config(config);
    group.register_renderer("float", Arc::new(NumberRenderer));
    group.register_renderer("int", Arc::new(NumberRenderer));
    group.define_template_with_args("t", "<x; format=\"%.2f\"> <n; format=\"%,d\">", &["x", "n"]);
    let mut t = group.get_instance_of("t").unwrap();
    t.add("x", 2.5).unwrap().add("n", 1234567).unwrap();
    assert_eq!(t.render(), "2,50 1.234.567");
}
