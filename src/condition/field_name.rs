//! Field names and dotted field paths.

use heck::ToSnakeCase;
use std::fmt;

/// A field identifier carrying both its code name and its json name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldName {
    name: String,
    json: String,
}

impl FieldName {
    pub fn new(name: impl Into<String>, json: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            json: json.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn json(&self) -> &str {
        &self.json
    }
}

/// `"BirthDate"` becomes name `BirthDate`, json `birth_date`.
impl From<&str> for FieldName {
    fn from(s: &str) -> Self {
        FieldName::new(s, s.to_snake_case())
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.json)
    }
}

/// A sequence of field names, each traversing a relation except the last.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldPath(Vec<FieldName>);

impl FieldPath {
    pub fn new(segments: Vec<FieldName>) -> Self {
        Self(segments)
    }

    /// Split a dotted path (`Manager.Name`) into segments.
    pub fn parse(path: &str) -> Self {
        Self(
            path.split('.')
                .filter(|s| !s.is_empty())
                .map(FieldName::from)
                .collect(),
        )
    }

    pub fn segments(&self) -> &[FieldName] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn last(&self) -> Option<&FieldName> {
        self.0.last()
    }

    /// Dotted json names, the key used by domains (`manager_id.name`).
    pub fn json_path(&self) -> String {
        self.join(".", FieldName::json)
    }

    /// Dotted code names (`Manager.Name`).
    pub fn name_path(&self) -> String {
        self.join(".", FieldName::name)
    }

    /// Column alias in select lists (`manager_id__name`).
    pub fn alias(&self) -> String {
        self.join("__", FieldName::json)
    }

    fn join(&self, sep: &str, part: fn(&FieldName) -> &str) -> String {
        self.0.iter().map(part).collect::<Vec<_>>().join(sep)
    }
}

impl From<&str> for FieldPath {
    fn from(s: &str) -> Self {
        FieldPath::parse(s)
    }
}

impl From<String> for FieldPath {
    fn from(s: String) -> Self {
        FieldPath::parse(&s)
    }
}

impl From<FieldName> for FieldPath {
    fn from(name: FieldName) -> Self {
        FieldPath(vec![name])
    }
}

impl From<&FieldPath> for FieldPath {
    fn from(path: &FieldPath) -> Self {
        path.clone()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.json_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_name_from_str_snake_cases() {
        let name = FieldName::from("BirthDate");
        assert_eq!(name.name(), "BirthDate");
        assert_eq!(name.json(), "birth_date");
        assert_eq!(FieldName::from("age").json(), "age");
    }

    #[test]
    fn test_parse_dotted_path() {
        let path = FieldPath::parse("Manager.Name");
        assert_eq!(path.len(), 2);
        assert_eq!(path.json_path(), "manager.name");
        assert_eq!(path.name_path(), "Manager.Name");
        assert_eq!(path.alias(), "manager__name");
    }

    #[test]
    fn test_parse_ignores_empty_segments() {
        assert!(FieldPath::parse("").is_empty());
        assert_eq!(FieldPath::parse("a..b").len(), 2);
    }
}
