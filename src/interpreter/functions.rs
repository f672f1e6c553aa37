//! Built-in single-argument functions (`first(x)`, `strlen(x)`, ...).
//!
//! List functions treat a scalar as a one-element list and pass null through.
//! Dictionaries iterate over their keys like they do when written.

use thiserror::Error;

use crate::compiler::bytecode::Opcode;
use crate::value::Value;

/// A string function was handed something else.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("function {function} expects a string not {found}")]
pub struct ExpectingString {
    pub function: &'static str,
    pub found: &'static str,
}

pub fn apply(op: Opcode, value: Value) -> Result<Value, ExpectingString> {
    Ok(match op {
        Opcode::First => first(value),
        Opcode::Last => last(value),
        Opcode::Rest => rest(value),
        Opcode::Trunc => trunc(value),
        Opcode::Strip => strip(value),
        Opcode::Reverse => reverse(value),
        Opcode::Length => length(&value),
        Opcode::Strlen => return strlen(&value),
        Opcode::Trim => return trim(value),
        _ => value,
    })
}

pub fn first(value: Value) -> Value {
    match value.iter_values() {
        Some(items) => items.into_iter().next().unwrap_or_default(),
        None => value,
    }
}

pub fn last(value: Value) -> Value {
    match value.iter_values() {
        Some(items) => items.into_iter().last().unwrap_or_default(),
        None => value,
    }
}

/// Everything but the first element; null when nothing is left.
pub fn rest(value: Value) -> Value {
    match value.iter_values() {
        Some(items) if items.len() > 1 => Value::List(items.into_iter().skip(1).collect()),
        _ => Value::Null,
    }
}

/// Everything but the last element; null when nothing is left.
pub fn trunc(value: Value) -> Value {
    match value.iter_values() {
        Some(mut items) if items.len() > 1 => {
            items.pop();
            Value::List(items)
        }
        _ => Value::Null,
    }
}

pub fn strip(value: Value) -> Value {
    match value.iter_values() {
        Some(items) => Value::List(items.into_iter().filter(|v| !v.is_null()).collect()),
        None => value,
    }
}

pub fn reverse(value: Value) -> Value {
    match value.iter_values() {
        Some(mut items) => {
            items.reverse();
            Value::List(items)
        }
        None => value,
    }
}

pub fn length(value: &Value) -> Value {
    let n = match value {
        Value::Null => 0,
        v => v.iter_values().map_or(1, |items| items.len()),
    };
    Value::from(n)
}

pub fn strlen(value: &Value) -> Result<Value, ExpectingString> {
    match value {
        Value::Null => Ok(Value::Int(0)),
        Value::Str(s) => Ok(Value::from(s.chars().count())),
        v => Err(ExpectingString {
            function: "strlen",
            found: v.type_name(),
        }),
    }
}

pub fn trim(value: Value) -> Result<Value, ExpectingString> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Str(s) => Ok(Value::Str(s.trim().to_string())),
        v => Err(ExpectingString {
            function: "trim",
            found: v.type_name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Value {
        Value::from(items.to_vec())
    }

    #[test]
    fn test_list_functions() {
        let names = list(&["Ter", "Tom", "Sri"]);
        assert_eq!(first(names.clone()).to_string(), "Ter");
        assert_eq!(last(names.clone()).to_string(), "Sri");
        assert_eq!(rest(names.clone()).to_string(), "TomSri");
        assert_eq!(trunc(names.clone()).to_string(), "TerTom");
        assert_eq!(reverse(names.clone()).to_string(), "SriTomTer");
        assert_eq!(length(&names).to_string(), "3");
    }

    #[test]
    fn test_scalars_act_like_single_element_lists() {
        let one = Value::from("x");
        assert_eq!(first(one.clone()).to_string(), "x");
        assert!(rest(one.clone()).is_null());
        assert!(trunc(one.clone()).is_null());
        assert_eq!(length(&one).to_string(), "1");
        assert_eq!(length(&Value::Null).to_string(), "0");
        assert!(first(Value::List(vec![])).is_null());
    }

    #[test]
    fn test_strip_drops_nulls() {
        let v = Value::List(vec![Value::Null, Value::from("a"), Value::Null, Value::from("b")]);
        assert_eq!(strip(v.clone()).to_string(), "ab");
        assert_eq!(length(&v).to_string(), "4");
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(trim(Value::from("  hi \n")).unwrap().to_string(), "hi");
        assert_eq!(strlen(&Value::from("héllo")).unwrap().to_string(), "5");
        assert_eq!(
            strlen(&Value::Int(3)),
            Err(ExpectingString {
                function: "strlen",
                found: "int"
            })
        );
        assert_eq!(trim(Value::Bool(true)).unwrap_err().function, "trim");
        assert_eq!(
            strlen(&Value::Int(3)).unwrap_err().to_string(),
            "function strlen expects a string not int"
        );
    }
}
