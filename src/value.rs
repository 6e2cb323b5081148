//! Árbol de valores mixtos y su normalización a primitivos JSON.
//!
//! Los extractores producen valores heterogéneos (racionales EXIF, números,
//! texto con codificación dudosa). `normalize` los convierte de forma total
//! en primitivos serializables; se aplica una sola vez, en la frontera de
//! salida del registro.

use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Fracción sin resolver, típica de campos EXIF.
    Rational { num: i64, den: i64 },
    Text(String),
    List(Vec<MetaValue>),
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    pub fn rational(num: i64, den: i64) -> Self {
        Self::Rational { num, den }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for MetaValue {
    fn from(value: u32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<u64> for MetaValue {
    fn from(value: u64) -> Self {
        i64::try_from(value).map_or(Self::Float(value as f64), Self::Int)
    }
}

impl From<usize> for MetaValue {
    fn from(value: usize) -> Self {
        Self::from(value as u64)
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<MetaValue>> for MetaValue {
    fn from(value: Vec<MetaValue>) -> Self {
        Self::List(value)
    }
}

impl From<BTreeMap<String, MetaValue>> for MetaValue {
    fn from(value: BTreeMap<String, MetaValue>) -> Self {
        Self::Map(value)
    }
}

impl<T: Into<MetaValue>> From<Option<T>> for MetaValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Convierte el árbol mixto en un árbol JSON de primitivos, sin fallar nunca.
///
/// Racionales con denominador distinto de cero pasan a flotante; con
/// denominador cero pasan a `0`. Un flotante sin representación JSON segura
/// (NaN, infinitos) se degrada a su forma textual.
pub fn normalize(value: &MetaValue) -> Value {
    match value {
        MetaValue::Null => Value::Null,
        MetaValue::Bool(flag) => Value::Bool(*flag),
        MetaValue::Int(number) => Value::Number(Number::from(*number)),
        MetaValue::Float(number) => normalize_float(*number),
        MetaValue::Rational { num, den } => {
            if *den == 0 {
                Value::Number(Number::from(0))
            } else {
                normalize_float(*num as f64 / *den as f64)
            }
        }
        MetaValue::Text(text) => Value::String(text.clone()),
        MetaValue::List(items) => Value::Array(items.iter().map(normalize).collect()),
        MetaValue::Map(entries) => {
            let mut object = Map::new();
            for (key, entry) in entries {
                object.insert(key.clone(), normalize(entry));
            }
            Value::Object(object)
        }
    }
}

fn normalize_float(number: f64) -> Value {
    match Number::from_f64(number) {
        Some(safe) => Value::Number(safe),
        None => Value::String(number.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rational_becomes_float() {
        let value = MetaValue::rational(1, 2);
        assert_eq!(normalize(&value), Value::from(0.5));
    }

    #[test]
    fn zero_denominator_becomes_zero() {
        let value = MetaValue::rational(1, 0);
        assert_eq!(normalize(&value), Value::from(0));
    }

    #[test]
    fn non_finite_float_degrades_to_text() {
        assert_eq!(normalize(&MetaValue::Float(f64::NAN)), Value::from("NaN"));
        assert_eq!(normalize(&MetaValue::Float(f64::INFINITY)), Value::from("inf"));
    }

    #[test]
    fn nested_tree_contains_only_primitives() {
        let mut inner = BTreeMap::new();
        inner.insert("exposure".to_string(), MetaValue::rational(1, 200));
        inner.insert("iso".to_string(), MetaValue::Int(400));
        let tree = MetaValue::Map(BTreeMap::from([
            ("camera".to_string(), MetaValue::Map(inner)),
            (
                "versions".to_string(),
                MetaValue::List(vec![MetaValue::rational(7, 0), MetaValue::Text("x".into())]),
            ),
        ]));

        let json = normalize(&tree);
        assert_primitive(&json);
        assert_eq!(json["camera"]["exposure"], Value::from(0.005));
        assert_eq!(json["versions"][0], Value::from(0));
    }

    fn assert_primitive(value: &Value) {
        match value {
            Value::Null | Value::Bool(_) | Value::String(_) => {}
            Value::Number(number) => {
                assert!(number.is_i64() || number.is_u64() || number.is_f64())
            }
            Value::Array(items) => items.iter().for_each(assert_primitive),
            Value::Object(entries) => entries.values().for_each(assert_primitive),
        }
    }
}
