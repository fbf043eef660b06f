use super::error::BencodeError;
use bytes::Bytes;
use std::collections::BTreeMap;

/// A decoded bencode value.
///
/// Decoded network input is untrusted, so lookups come in two flavours:
/// the `as_*` accessors return `Option` for optional fields, and the
/// `*_field` accessors return a named [`BencodeError`] for required ones.
///
/// ```
/// use dhtharvest::bencode::{decode, Value};
///
/// let value = decode(b"d6:lengthi100e4:name5:a.txte").unwrap();
/// assert_eq!(value.int_field("length").unwrap(), 100);
/// assert!(value.list_field("files").is_err());
/// assert_eq!(value.get(b"name").and_then(Value::as_str), Some("a.txt"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A signed 64-bit integer.
    Integer(i64),
    /// A byte string (may or may not be valid UTF-8).
    Bytes(Bytes),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A dictionary with byte string keys, kept sorted.
    Dict(BTreeMap<Bytes, Value>),
}

impl Value {
    /// Creates a byte string value from a UTF-8 string.
    pub fn string(s: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }

    /// Creates a byte string value from raw bytes.
    pub fn bytes(b: impl AsRef<[u8]>) -> Self {
        Value::Bytes(Bytes::copy_from_slice(b.as_ref()))
    }

    /// Builds a dictionary from `(key, value)` pairs.
    pub fn dict<'a>(entries: impl IntoIterator<Item = (&'a str, Value)>) -> Self {
        Value::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (Bytes::copy_from_slice(k.as_bytes()), v))
                .collect(),
        )
    }

    /// Name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Integer(_) => "an integer",
            Value::Bytes(_) => "a byte string",
            Value::List(_) => "a list",
            Value::Dict(_) => "a dictionary",
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the value as a UTF-8 string, if it is a valid UTF-8 byte string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Bytes, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Consumes the value and returns the dictionary, if it is one.
    pub fn into_dict(self) -> Option<BTreeMap<Bytes, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Looks up a key in this value if it is a dictionary.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict()?.get(key)
    }

    /// Looks up a required key.
    ///
    /// Fails with [`BencodeError::WrongType`] if `self` is not a dictionary
    /// and [`BencodeError::MissingKey`] if the key is absent.
    pub fn field(&self, key: &str) -> Result<&Value, BencodeError> {
        let dict = self.as_dict().ok_or_else(|| BencodeError::WrongType {
            key: "<root>".into(),
            expected: "a dictionary",
        })?;
        dict.get(key.as_bytes())
            .ok_or_else(|| BencodeError::MissingKey(key.into()))
    }

    pub fn int_field(&self, key: &str) -> Result<i64, BencodeError> {
        self.field(key)?
            .as_integer()
            .ok_or_else(|| wrong_type(key, "an integer"))
    }

    pub fn bytes_field(&self, key: &str) -> Result<&Bytes, BencodeError> {
        self.field(key)?
            .as_bytes()
            .ok_or_else(|| wrong_type(key, "a byte string"))
    }

    pub fn list_field(&self, key: &str) -> Result<&Vec<Value>, BencodeError> {
        self.field(key)?
            .as_list()
            .ok_or_else(|| wrong_type(key, "a list"))
    }

    pub fn dict_field(&self, key: &str) -> Result<&Value, BencodeError> {
        let value = self.field(key)?;
        match value {
            Value::Dict(_) => Ok(value),
            _ => Err(wrong_type(key, "a dictionary")),
        }
    }
}

fn wrong_type(key: &str, expected: &'static str) -> BencodeError {
    BencodeError::WrongType {
        key: key.into(),
        expected,
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<BTreeMap<Bytes, Value>> for Value {
    fn from(d: BTreeMap<Bytes, Value>) -> Self {
        Value::Dict(d)
    }
}
