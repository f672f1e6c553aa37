use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use indexmap::IndexMap;

use crate::compiler::CompiledTemplate;
use crate::template::Template;

/// Host data exposed to templates. Stands in for reflection: a type names
/// itself and its ancestors, and answers property lookups explicitly.
pub trait HostObject: Any + Send + Sync + fmt::Debug + fmt::Display {
    fn type_name(&self) -> &'static str;

    /// Ancestor types, most specific first.
    fn supertypes(&self) -> &'static [&'static str] {
        &[]
    }

    fn property(&self, _name: &str) -> Option<Value> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// Root of every type chain; adaptors registered here apply to all values.
pub const OBJECT_TYPE: &str = "object";

#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDateTime),
    List(Vec<Value>),
    Map(Arc<Dictionary>),
    Template(Arc<Template>),
    Aggregate(Arc<Aggregate>),
    Object(Arc<dyn HostObject>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Key used for renderer lookup and as the most specific adaptor type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Date(_) => "date",
            Value::List(_) => "list",
            Value::Map(_) => "dictionary",
            Value::Template(_) => "template",
            Value::Aggregate(_) => "aggregate",
            Value::Object(o) => o.type_name(),
        }
    }

    /// This value's type followed by its ancestors, ending with [`OBJECT_TYPE`].
    pub fn type_chain(&self) -> Vec<&'static str> {
        let mut chain = vec![self.type_name()];
        if let Value::Object(o) = self {
            chain.extend_from_slice(o.supertypes());
        }
        if chain.last() != Some(&OBJECT_TYPE) {
            chain.push(OBJECT_TYPE);
        }
        chain
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_template(&self) -> Option<&Arc<Template>> {
        match self {
            Value::Template(t) => Some(t),
            _ => None,
        }
    }

    /// Elements when the value is iterable: lists yield their items and
    /// dictionaries their keys. Scalars and null are not iterable.
    pub fn iter_values(&self) -> Option<Vec<Value>> {
        match self {
            Value::List(items) => Some(items.clone()),
            Value::Map(d) => Some(d.keys().map(MapKey::to_value).collect()),
            _ => None,
        }
    }

    pub fn to_map_key(&self) -> Option<MapKey> {
        match self {
            Value::Str(s) => Some(MapKey::Str(s.clone())),
            Value::Int(i) => Some(MapKey::Int(*i)),
            Value::Bool(b) => Some(MapKey::Bool(*b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%m/%d/%Y %H:%M")),
            Value::List(items) => items.iter().try_for_each(|v| write!(f, "{}", v)),
            Value::Map(d) => write!(f, "{}", d),
            Value::Template(t) => write!(f, "{}", t.name()),
            Value::Aggregate(a) => write!(f, "{}", a),
            Value::Object(o) => write!(f, "{}", o),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(d: NaiveDateTime) -> Self {
        Value::Date(d)
    }
}

impl From<Template> for Value {
    fn from(t: Template) -> Self {
        Value::Template(Arc::new(t))
    }
}

impl From<Dictionary> for Value {
    fn from(d: Dictionary) -> Self {
        Value::Map(Arc::new(d))
    }
}

impl From<Aggregate> for Value {
    fn from(a: Aggregate) -> Self {
        Value::Aggregate(Arc::new(a))
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(fields) => {
                let mut dict = Dictionary::new();
                for (k, v) in fields {
                    dict.insert(k, Value::from(v));
                }
                Value::Map(Arc::new(dict))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MapKey {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl MapKey {
    pub fn to_value(&self) -> Value {
        match self {
            MapKey::Str(s) => Value::Str(s.clone()),
            MapKey::Int(i) => Value::Int(*i),
            MapKey::Bool(b) => Value::Bool(*b),
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Str(s) => f.write_str(s),
            MapKey::Int(i) => write!(f, "{}", i),
            MapKey::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for MapKey {
    fn from(s: &str) -> Self {
        MapKey::Str(s.to_string())
    }
}

impl From<String> for MapKey {
    fn from(s: String) -> Self {
        MapKey::Str(s)
    }
}

impl From<i64> for MapKey {
    fn from(i: i64) -> Self {
        MapKey::Int(i)
    }
}

impl From<i32> for MapKey {
    fn from(i: i32) -> Self {
        MapKey::Int(i as i64)
    }
}

impl From<bool> for MapKey {
    fn from(b: bool) -> Self {
        MapKey::Bool(b)
    }
}

/// What a dictionary slot holds.
#[derive(Clone, Debug)]
pub enum DictEntry {
    Value(Value),
    /// Template body, instantiated in the reading group on lookup.
    Template(Arc<CompiledTemplate>),
    /// The `key` sentinel: the lookup yields the key itself.
    Key,
}

/// Ordered map with an optional default entry.
#[derive(Clone, Debug, Default)]
pub struct Dictionary {
    entries: IndexMap<MapKey, DictEntry>,
    default: Option<DictEntry>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<MapKey>, value: impl Into<Value>) -> &mut Self {
        self.entries.insert(key.into(), DictEntry::Value(value.into()));
        self
    }

    pub fn insert_entry(&mut self, key: impl Into<MapKey>, entry: DictEntry) -> &mut Self {
        self.entries.insert(key.into(), entry);
        self
    }

    pub fn set_default(&mut self, entry: DictEntry) -> &mut Self {
        self.default = Some(entry);
        self
    }

    pub fn get(&self, key: &MapKey) -> Option<&DictEntry> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &MapKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn default_entry(&self) -> Option<&DictEntry> {
        self.default.as_ref()
    }

    pub fn keys(&self) -> impl Iterator<Item = &MapKey> {
        self.entries.keys()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&MapKey, &DictEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match v {
                DictEntry::Value(v) => write!(f, "{}={}", k, v)?,
                DictEntry::Template(t) => write!(f, "{}={}", k, t.name)?,
                DictEntry::Key => write!(f, "{}={}", k, k)?,
            }
        }
        f.write_str("}")
    }
}

/// Ad hoc record built by `Template::add_many("items.{a,b}", ...)`.
#[derive(Clone, Debug, Default)]
pub struct Aggregate {
    properties: IndexMap<String, Value>,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.properties.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct User;

    impl fmt::Display for User {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("user")
        }
    }

    impl HostObject for User {
        fn type_name(&self) -> &'static str {
            "SuperUser"
        }

        fn supertypes(&self) -> &'static [&'static str] {
            &["User"]
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_type_chain() {
        assert_eq!(Value::from("x").type_chain(), vec!["string", "object"]);
        let user = Value::Object(Arc::new(User));
        assert_eq!(user.type_chain(), vec!["SuperUser", "User", "object"]);
        assert_eq!(user.to_string(), "user");
    }

    #[test]
    fn test_dictionary_iterates_keys() {
        let mut d = Dictionary::new();
        d.insert("a", 1).insert(2, "two");
        let keys = Value::from(d).iter_values().unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].to_string(), "a");
        assert_eq!(keys[1].to_string(), "2");
    }

    #[test]
    fn test_json_conversion() {
        let json: serde_json::Value = serde_json::json!({"names": ["Ter", "Tom"], "n": 3});
        match Value::from(json) {
            Value::Map(d) => {
                assert_eq!(d.len(), 2);
                match d.get(&MapKey::from("n")) {
                    Some(DictEntry::Value(Value::Int(3))) => {}
                    other => panic!("unexpected entry {:?}", other),
                }
            }
            other => panic!("expected map, got {:?}", other),
        }
    }
}
