//! Identity-key values.
//!
//! A [`RowKey`] is the tuple of a row's key-column values. Keys are compared
//! across two different databases, so every component is normalized into a
//! [`KeyValue`]: all integer widths collapse to `Int`, UUIDs compare by
//! their hyphenated text form (MySQL stores them as `char(36)`), and other
//! scalars compare by canonical text.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::value::SqlValue;

/// One normalized component of an identity key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    /// NULL key component (legal in some association tables).
    Null,
    /// Boolean key component.
    Bool(bool),
    /// Integer key (covers tinyint through bigint).
    Int(i64),
    /// String key (varchar, char, uuid and anything else with a text form).
    Text(String),
    /// Binary key.
    Bytes(Vec<u8>),
}

impl KeyValue {
    /// Text form used when binding the key as a query parameter.
    pub fn to_param_text(&self) -> Option<String> {
        match self {
            KeyValue::Null => None,
            KeyValue::Bool(b) => Some(if *b { "t" } else { "f" }.to_string()),
            KeyValue::Int(v) => Some(v.to_string()),
            KeyValue::Text(s) => Some(s.clone()),
            KeyValue::Bytes(b) => Some(format!("\\x{}", hex::encode(b))),
        }
    }
}

impl From<&SqlValue> for KeyValue {
    fn from(value: &SqlValue) -> Self {
        if let Some(v) = value.as_i64() {
            return KeyValue::Int(v);
        }
        match value {
            SqlValue::Null => KeyValue::Null,
            SqlValue::Bool(b) => KeyValue::Bool(*b),
            SqlValue::Text(s) => KeyValue::Text(s.clone()),
            SqlValue::Bytes(b) => KeyValue::Bytes(b.clone()),
            SqlValue::Uuid(u) => KeyValue::Text(u.hyphenated().to_string()),
            SqlValue::Decimal(d) => KeyValue::Text(d.normalize().to_string()),
            other => KeyValue::Text(other.to_pg_text().unwrap_or_default()),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Int(v)
    }
}

impl From<i32> for KeyValue {
    fn from(v: i32) -> Self {
        KeyValue::Int(i64::from(v))
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        KeyValue::Text(v.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(v: String) -> Self {
        KeyValue::Text(v)
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Null => f.write_str("NULL"),
            KeyValue::Bool(b) => write!(f, "{}", b),
            KeyValue::Int(v) => write!(f, "{}", v),
            KeyValue::Text(s) => write!(f, "'{}'", s),
            KeyValue::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
        }
    }
}

/// Identity key of a row: one value per key column, in key-column order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowKey(pub Vec<KeyValue>);

impl RowKey {
    /// Key of a simple (single-column) table.
    pub fn single(value: impl Into<KeyValue>) -> Self {
        RowKey(vec![value.into()])
    }

    /// Key values in key-column order.
    pub fn values(&self) -> &[KeyValue] {
        &self.0
    }

    /// Whether this is a composite (multi-column) key.
    pub fn is_composite(&self) -> bool {
        self.0.len() > 1
    }
}

impl From<Vec<KeyValue>> for RowKey {
    fn from(values: Vec<KeyValue>) -> Self {
        RowKey(values)
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [only] = self.0.as_slice() {
            return write!(f, "{}", only);
        }
        f.write_str("(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", v)?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_integer_widths_normalize() {
        let a = KeyValue::from(&SqlValue::I16(5));
        let b = KeyValue::from(&SqlValue::I64(5));
        let c = KeyValue::from(&SqlValue::U64(5));
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn test_uuid_matches_char36_text() {
        let id = Uuid::parse_str("6f1c3e1a-0b7d-4f6e-9b7a-2c1d3e4f5a6b").unwrap();
        let from_pg = KeyValue::from(&SqlValue::Uuid(id));
        let from_mysql = KeyValue::from(&SqlValue::Text(
            "6f1c3e1a-0b7d-4f6e-9b7a-2c1d3e4f5a6b".to_string(),
        ));
        assert_eq!(from_pg, from_mysql);
    }

    #[test]
    fn test_row_key_display() {
        assert_eq!(RowKey::single(42i64).to_string(), "42");
        let key = RowKey(vec![KeyValue::Int(1), KeyValue::Text("a".into())]);
        assert_eq!(key.to_string(), "(1, 'a')");
        assert!(key.is_composite());
    }

    #[test]
    fn test_param_text() {
        assert_eq!(KeyValue::Int(9).to_param_text().as_deref(), Some("9"));
        assert_eq!(KeyValue::Null.to_param_text(), None);
    }
}
