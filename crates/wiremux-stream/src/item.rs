use bytes::Bytes;

/// A value carried by a source stream.
///
/// Structured values travel as UTF-8 JSON text on the wire and round-trip
/// exactly for JSON-representable types. Raw byte sequences pass through
/// byte-for-byte without a text-encoding pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// A JSON-representable value.
    Value(serde_json::Value),
    /// An opaque byte sequence.
    Raw(Bytes),
}

impl Item {
    /// True if this item is a raw byte sequence.
    pub fn is_raw(&self) -> bool {
        matches!(self, Item::Raw(_))
    }

    /// Borrow the structured value, if this item is one.
    pub fn as_value(&self) -> Option<&serde_json::Value> {
        match self {
            Item::Value(value) => Some(value),
            Item::Raw(_) => None,
        }
    }

    /// Borrow the raw bytes, if this item is a raw byte sequence.
    pub fn as_raw(&self) -> Option<&Bytes> {
        match self {
            Item::Raw(bytes) => Some(bytes),
            Item::Value(_) => None,
        }
    }
}

impl From<serde_json::Value> for Item {
    fn from(value: serde_json::Value) -> Self {
        Item::Value(value)
    }
}

impl From<Bytes> for Item {
    fn from(bytes: Bytes) -> Self {
        Item::Raw(bytes)
    }
}

impl From<Vec<u8>> for Item {
    fn from(bytes: Vec<u8>) -> Self {
        Item::Raw(Bytes::from(bytes))
    }
}

impl From<&str> for Item {
    fn from(text: &str) -> Self {
        Item::Value(serde_json::Value::String(text.to_owned()))
    }
}

impl From<String> for Item {
    fn from(text: String) -> Self {
        Item::Value(serde_json::Value::String(text))
    }
}

impl From<bool> for Item {
    fn from(flag: bool) -> Self {
        Item::Value(serde_json::Value::Bool(flag))
    }
}

impl From<i64> for Item {
    fn from(number: i64) -> Self {
        Item::Value(serde_json::Value::from(number))
    }
}
