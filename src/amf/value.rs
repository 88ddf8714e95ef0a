//! AMF value types
//!
//! Only the AMF0 subset that RTMP command and metadata messages actually use.
//! Object properties keep their wire order so re-encoded metadata is
//! byte-identical to what the publisher sent.

/// AMF0 value
#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    /// Null (0x05)
    Null,

    /// Undefined (0x06), also used for unsupported markers
    Undefined,

    /// Boolean (0x01)
    Boolean(bool),

    /// IEEE 754 double (0x00)
    Number(f64),

    /// UTF-8 string (0x02 short, 0x0C long)
    String(String),

    /// Anonymous object (0x03)
    Object(Vec<(String, AmfValue)>),

    /// Associative array (0x08), used by onMetaData
    EcmaArray(Vec<(String, AmfValue)>),

    /// Dense array (0x0A)
    StrictArray(Vec<AmfValue>),
}

impl AmfValue {
    /// Build an object from `(key, value)` pairs
    pub fn object<K, I>(props: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, AmfValue)>,
    {
        AmfValue::Object(props.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Shorthand for a string value
    pub fn string(s: impl Into<String>) -> Self {
        AmfValue::String(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Properties of an object or ECMA array
    pub fn as_properties(&self) -> Option<&[(String, AmfValue)]> {
        match self {
            AmfValue::Object(props) | AmfValue::EcmaArray(props) => Some(props),
            _ => None,
        }
    }

    /// Look up a property by key (objects and ECMA arrays only)
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.as_properties()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_lookup() {
        let obj = AmfValue::object([
            ("app", AmfValue::string("live")),
            ("objectEncoding", AmfValue::Number(0.0)),
        ]);

        assert_eq!(obj.get("app").and_then(|v| v.as_str()), Some("live"));
        assert_eq!(obj.get("objectEncoding").and_then(|v| v.as_number()), Some(0.0));
        assert!(obj.get("missing").is_none());
        assert!(AmfValue::Null.get("app").is_none());
    }

    #[test]
    fn test_accessors_reject_other_types() {
        assert_eq!(AmfValue::Number(1.0).as_str(), None);
        assert_eq!(AmfValue::string("x").as_number(), None);
        assert_eq!(AmfValue::Boolean(true).as_bool(), Some(true));
        assert!(AmfValue::StrictArray(vec![]).as_properties().is_none());
    }
}
