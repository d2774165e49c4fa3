//! Typed object headers.
//!
//! Headers are a small map of typed properties.  The filesystem backend
//! persists them next to each object as a `<object>.meta` sidecar, one
//! property per line in the form `type|key|value`, where `type` is one of
//! `bool`, `string`, `int`, `long` or `ulong`.

use std::collections::BTreeMap;
use std::fmt;

/// A single typed header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Bool(bool),
    String(String),
    Int(i32),
    Long(i64),
    ULong(u64),
}

impl PropertyValue {
    /// The type token used in the sidecar format.
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Bool(_) => "bool",
            PropertyValue::String(_) => "string",
            PropertyValue::Int(_) => "int",
            PropertyValue::Long(_) => "long",
            PropertyValue::ULong(_) => "ulong",
        }
    }

    /// Parse a value from its type token and textual form.
    pub fn parse(type_name: &str, value: &str) -> anyhow::Result<Self> {
        let parsed = match type_name {
            "bool" => match value {
                "true" => PropertyValue::Bool(true),
                "false" => PropertyValue::Bool(false),
                other => anyhow::bail!("invalid bool property value '{other}'"),
            },
            "string" => PropertyValue::String(value.to_string()),
            "int" => PropertyValue::Int(value.parse()?),
            "long" => PropertyValue::Long(value.parse()?),
            "ulong" => PropertyValue::ULong(value.parse()?),
            other => anyhow::bail!("unknown property type '{other}'"),
        };
        Ok(parsed)
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            PropertyValue::String(s) => write!(f, "{s}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Long(v) => write!(f, "{v}"),
            PropertyValue::ULong(v) => write!(f, "{v}"),
        }
    }
}

/// Ordered set of object headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertySet {
    properties: BTreeMap<String, PropertyValue>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: impl Into<String>, value: PropertyValue) {
        self.properties.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.properties.get(key) {
            Some(PropertyValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_ulong(&self, key: &str) -> Option<u64> {
        match self.properties.get(key) {
            Some(PropertyValue::ULong(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.properties.get(key) {
            Some(PropertyValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.properties.iter()
    }

    /// Render the sidecar file contents.
    pub fn to_sidecar(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.properties {
            out.push_str(&format!("{}|{}|{}\n", value.type_name(), key, value));
        }
        out
    }

    /// Parse sidecar file contents. Blank lines are ignored; a value may
    /// itself contain `|`.
    pub fn from_sidecar(contents: &str) -> anyhow::Result<Self> {
        let mut set = PropertySet::new();
        for line in contents.lines() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let mut fields = line.splitn(3, '|');
            let (Some(type_name), Some(key), Some(value)) =
                (fields.next(), fields.next(), fields.next())
            else {
                anyhow::bail!("malformed metadata line '{line}'");
            };
            set.add(key, PropertyValue::parse(type_name, value)?);
        }
        Ok(set)
    }

    /// Encode each property as `type|value` for stores that only carry
    /// string headers.
    pub fn to_string_map(&self) -> std::collections::HashMap<String, String> {
        self.properties
            .iter()
            .map(|(k, v)| (k.clone(), format!("{}|{}", v.type_name(), v)))
            .collect()
    }

    /// Inverse of [`PropertySet::to_string_map`]. Untyped values are kept
    /// as strings.
    pub fn from_string_map<'a>(map: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        let mut set = PropertySet::new();
        for (key, raw) in map {
            let value = raw
                .split_once('|')
                .and_then(|(t, v)| PropertyValue::parse(t, v).ok())
                .unwrap_or_else(|| PropertyValue::String(raw.clone()));
            set.add(key.clone(), value);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_roundtrip_keeps_types() {
        let mut set = PropertySet::new();
        set.add("artist", PropertyValue::String("The Who".into()));
        set.add("encrypted", PropertyValue::Bool(false));
        set.add("size", PropertyValue::ULong(1234));
        set.add("pad", PropertyValue::Int(-1));
        set.add("offset", PropertyValue::Long(9_000_000_000));

        let text = set.to_sidecar();
        assert!(text.contains("bool|encrypted|false\n"));
        assert!(text.contains("string|artist|The Who\n"));
        assert!(text.contains("ulong|size|1234\n"));

        let parsed = PropertySet::from_sidecar(&text).unwrap();
        assert_eq!(parsed, set);
    }

    #[test]
    fn test_sidecar_value_may_contain_separator() {
        let parsed = PropertySet::from_sidecar("string|title|a|b\n\n").unwrap();
        assert_eq!(parsed.get_string("title"), Some("a|b"));
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn test_sidecar_rejects_bad_bool_and_type() {
        assert!(PropertySet::from_sidecar("bool|flag|yes\n").is_err());
        assert!(PropertySet::from_sidecar("float|x|1.0\n").is_err());
        assert!(PropertySet::from_sidecar("string-only-line\n").is_err());
    }

    #[test]
    fn test_string_map_roundtrip() {
        let mut set = PropertySet::new();
        set.add("hash", PropertyValue::String("abc".into()));
        set.add("compressed", PropertyValue::Bool(true));
        let map = set.to_string_map();
        assert_eq!(map.get("compressed").map(String::as_str), Some("bool|true"));
        let back = PropertySet::from_string_map(map.iter());
        assert_eq!(back, set);
    }
}
