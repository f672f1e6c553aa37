//! Property lookup on attribute values (`<user.name>`).
//!
//! Each value type resolves properties through a [`ModelAdaptor`]. Adaptors
//! are registered per type name; a value uses the adaptor of the most
//! specific type in its [`Value::type_chain`], and the result is cached per
//! exact type until the next registration.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;

use crate::interpreter::{Frame, Interpreter};
use crate::template::Template;
use crate::value::{DictEntry, Dictionary, MapKey, Value, OBJECT_TYPE};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no such property: {0}")]
pub struct NoSuchProperty(pub String);

pub trait ModelAdaptor: Send + Sync {
    fn get_property(
        &self,
        interp: &Interpreter,
        frame: &Frame<'_>,
        model: &Value,
        property: &Value,
        name: &str,
    ) -> Result<Value, NoSuchProperty>;
}

/// Dictionaries: exact key, then the key's string form, then `keys`/`values`,
/// then the default entry. A miss with no default is null, not an error.
#[derive(Debug, Default)]
pub struct DictionaryAdaptor;

impl DictionaryAdaptor {
    fn entry_value(frame: &Frame<'_>, entry: &DictEntry, property: &Value, name: &str) -> Value {
        match entry {
            DictEntry::Value(v) => v.clone(),
            DictEntry::Key if property.is_null() => Value::Str(name.to_string()),
            DictEntry::Key => property.clone(),
            DictEntry::Template(code) => {
                Template::from_compiled(Arc::clone(code), frame.template().group().clone()).into()
            }
        }
    }

    fn lookup(frame: &Frame<'_>, dict: &Dictionary, property: &Value, name: &str) -> Value {
        let by_key = property.to_map_key().and_then(|k| dict.get(&k));
        let entry = by_key.or_else(|| dict.get(&MapKey::Str(name.to_string())));
        if let Some(entry) = entry {
            return Self::entry_value(frame, entry, property, name);
        }
        match name {
            "keys" => return Value::List(dict.keys().map(MapKey::to_value).collect()),
            "values" => {
                return Value::List(
                    dict.entries()
                        .map(|(k, e)| Self::entry_value(frame, e, &k.to_value(), &k.to_string()))
                        .collect(),
                )
            }
            _ => {}
        }
        match dict.default_entry() {
            Some(entry) => Self::entry_value(frame, entry, property, name),
            None => Value::Null,
        }
    }
}

impl ModelAdaptor for DictionaryAdaptor {
    fn get_property(
        &self,
        _interp: &Interpreter,
        frame: &Frame<'_>,
        model: &Value,
        property: &Value,
        name: &str,
    ) -> Result<Value, NoSuchProperty> {
        match model {
            Value::Map(dict) => Ok(Self::lookup(frame, dict, property, name)),
            _ => Err(NoSuchProperty(format!("{}.{}", model.type_name(), name))),
        }
    }
}

#[derive(Debug, Default)]
pub struct AggregateAdaptor;

impl ModelAdaptor for AggregateAdaptor {
    fn get_property(
        &self,
        _interp: &Interpreter,
        _frame: &Frame<'_>,
        model: &Value,
        _property: &Value,
        name: &str,
    ) -> Result<Value, NoSuchProperty> {
        match model {
            Value::Aggregate(a) => a
                .get(name)
                .cloned()
                .ok_or_else(|| NoSuchProperty(format!("aggregate.{}", name))),
            _ => Err(NoSuchProperty(format!("{}.{}", model.type_name(), name))),
        }
    }
}

/// A template's properties are its attributes.
#[derive(Debug, Default)]
pub struct TemplateAdaptor;

impl ModelAdaptor for TemplateAdaptor {
    fn get_property(
        &self,
        _interp: &Interpreter,
        _frame: &Frame<'_>,
        model: &Value,
        _property: &Value,
        name: &str,
    ) -> Result<Value, NoSuchProperty> {
        match model {
            Value::Template(t) => Ok(t.attribute(name).cloned().unwrap_or_default()),
            _ => Err(NoSuchProperty(format!("{}.{}", model.type_name(), name))),
        }
    }
}

/// Fallback for every type: asks [`HostObject::property`](crate::value::HostObject::property).
#[derive(Debug, Default)]
pub struct ObjectAdaptor;

impl ModelAdaptor for ObjectAdaptor {
    fn get_property(
        &self,
        _interp: &Interpreter,
        _frame: &Frame<'_>,
        model: &Value,
        _property: &Value,
        name: &str,
    ) -> Result<Value, NoSuchProperty> {
        let found = match model {
            Value::Object(o) => o.property(name),
            _ => None,
        };
        found.ok_or_else(|| NoSuchProperty(format!("{}.{}", model.type_name(), name)))
    }
}

/// Adaptors keyed by type name, plus the resolved adaptor for each exact type
/// seen so far. Both locks are always taken adaptors first.
pub struct AdaptorRegistry {
    adaptors: RwLock<IndexMap<String, Arc<dyn ModelAdaptor>>>,
    cache: RwLock<HashMap<String, Option<Arc<dyn ModelAdaptor>>>>,
}

impl Default for AdaptorRegistry {
    fn default() -> Self {
        let mut adaptors: IndexMap<String, Arc<dyn ModelAdaptor>> = IndexMap::new();
        adaptors.insert("dictionary".to_string(), Arc::new(DictionaryAdaptor));
        adaptors.insert("aggregate".to_string(), Arc::new(AggregateAdaptor));
        adaptors.insert("template".to_string(), Arc::new(TemplateAdaptor));
        adaptors.insert(OBJECT_TYPE.to_string(), Arc::new(ObjectAdaptor));
        Self {
            adaptors: RwLock::new(adaptors),
            cache: RwLock::new(HashMap::new()),
        }
    }
}

impl std::fmt::Debug for AdaptorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let adaptors = self.adaptors.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("AdaptorRegistry")
            .field("types", &adaptors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AdaptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, type_name: &str, adaptor: Arc<dyn ModelAdaptor>) {
        let mut adaptors = self.adaptors.write().unwrap_or_else(PoisonError::into_inner);
        adaptors.insert(type_name.to_string(), adaptor);
        self.cache.write().unwrap_or_else(PoisonError::into_inner).clear();
        debug!(target: "stemplate", type_name, "registered model adaptor, cleared adaptor cache");
    }

    /// Adaptor for the most specific registered type in the value's chain.
    pub fn lookup(&self, value: &Value) -> Option<Arc<dyn ModelAdaptor>> {
        let key = value.type_name();
        if let Some(hit) = self.cache.read().unwrap_or_else(PoisonError::into_inner).get(key) {
            return hit.clone();
        }
        let adaptors = self.adaptors.read().unwrap_or_else(PoisonError::into_inner);
        let found = value
            .type_chain()
            .into_iter()
            .find_map(|t| adaptors.get(t).cloned());
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), found.clone());
        found
    }

    pub fn cached_types(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::fmt;

    use crate::group::TemplateGroup;

    #[derive(Debug)]
    struct Employee;

    impl fmt::Display for Employee {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("employee")
        }
    }

    impl crate::value::HostObject for Employee {
        fn type_name(&self) -> &'static str {
            "Employee"
        }

        fn supertypes(&self) -> &'static [&'static str] {
            &["Person"]
        }

        fn property(&self, name: &str) -> Option<Value> {
            (name == "id").then(|| Value::Int(7))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Fixed(&'static str);

    impl ModelAdaptor for Fixed {
        fn get_property(
            &self,
            _interp: &Interpreter,
            _frame: &Frame<'_>,
            _model: &Value,
            _property: &Value,
            name: &str,
        ) -> Result<Value, NoSuchProperty> {
            Ok(Value::Str(format!("{}:{}", self.0, name)))
        }
    }

    fn resolve(registry: &AdaptorRegistry, value: &Value, name: &str) -> Result<Value, NoSuchProperty> {
        let group = TemplateGroup::new();
        let template = group.create_string_template("");
        let interp = Interpreter::new(&group);
        let frame = Frame::root(&template);
        let adaptor = registry.lookup(value).ok_or_else(|| NoSuchProperty(name.to_string()))?;
        adaptor.get_property(&interp, &frame, value, &Value::from(name), name)
    }

    #[test]
    fn test_object_adaptor_uses_host_properties() {
        let registry = AdaptorRegistry::new();
        let employee = Value::Object(Arc::new(Employee));
        assert_eq!(resolve(&registry, &employee, "id").unwrap().to_string(), "7");
        assert_eq!(
            resolve(&registry, &employee, "salary").unwrap_err(),
            NoSuchProperty("Employee.salary".to_string())
        );
    }

    #[test]
    fn test_registration_invalidates_cache() {
        let registry = AdaptorRegistry::new();
        let employee = Value::Object(Arc::new(Employee));
        registry.register("Person", Arc::new(Fixed("person")));
        assert_eq!(resolve(&registry, &employee, "x").unwrap().to_string(), "person:x");
        assert_eq!(registry.cached_types(), 1);

        registry.register("Employee", Arc::new(Fixed("employee")));
        assert_eq!(registry.cached_types(), 0);
        assert_eq!(resolve(&registry, &employee, "x").unwrap().to_string(), "employee:x");
    }

    #[test]
    fn test_dictionary_lookup_order() {
        let registry = AdaptorRegistry::new();
        let mut dict = Dictionary::new();
        dict.insert("int", "0").insert(1, "one").set_default(DictEntry::Key);
        let dict = Value::from(dict);
        assert_eq!(resolve(&registry, &dict, "int").unwrap().to_string(), "0");
        assert_eq!(resolve(&registry, &dict, "UserRecord").unwrap().to_string(), "UserRecord");
        assert_eq!(resolve(&registry, &dict, "keys").unwrap().to_string(), "int1");

        let mut plain = Dictionary::new();
        plain.insert("a", "x");
        let plain = Value::from(plain);
        assert!(resolve(&registry, &plain, "missing").unwrap().is_null());
    }
}
