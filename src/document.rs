use anyhow::Result;
use serde_json::{Map, Value};

/// A dynamically-keyed record value with JSON object semantics. Field values
/// are strings, numbers, booleans, arrays, or nested objects. Setting a field
/// to null or to an empty collection removes the field entirely, so a document
/// never stores "present but empty" markers and two documents that differ only
/// in absent-vs-empty fields compare equal under diffing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    fields: Map<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a document from an already-parsed JSON value. Fails fast on
    /// anything that is not a JSON object. Null and empty-collection fields
    /// in the input are dropped, matching the mutation invariant.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => {
                let mut doc = Document::new();
                for (key, value) in map {
                    doc.set(&key, value)?;
                }
                Ok(doc)
            }
            other => Err(anyhow::anyhow!(
                "expected a JSON object, got: {}",
                type_name(&other)
            )),
        }
    }

    /// Parses a JSON source string into a document. Malformed payloads fail
    /// here, at the boundary, and never reach the diff engine.
    pub fn from_json(source: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(source)?;
        Self::from_value(value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Sets a field. Null, empty arrays, and empty objects remove the field
    /// instead of storing an empty value. Keys must be non-empty.
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        if key.is_empty() {
            return Err(anyhow::anyhow!("field names must be non-empty"));
        }
        if is_removal(&value) {
            self.fields.remove(key);
        } else {
            self.fields.insert(key.to_string(), value);
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Field names currently present. Removed and never-set fields are absent.
    pub fn keys(&self) -> Vec<&str> {
        self.fields.keys().map(|k| k.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The stringified form of a field value, as used for diff equality and
    /// audit entries: strings contribute their text, everything else its
    /// compact JSON encoding.
    pub fn stringified(&self, key: &str) -> Option<String> {
        self.fields.get(key).map(stringify)
    }

    /// Per-field equality after stringification: every shared key has an equal
    /// stringified value, and neither document has a key the other lacks with
    /// a non-empty stringified value.
    pub fn diff_equal(&self, other: &Document) -> bool {
        let agrees = |a: &Document, b: &Document| {
            a.keys().iter().all(|key| match b.stringified(key) {
                Some(theirs) => a.stringified(key).as_deref() == Some(theirs.as_str()),
                None => a.stringified(key).as_deref() == Some(""),
            })
        };
        agrees(self, other) && agrees(other, self)
    }

    /// Removes a single element from an array field. The field itself is
    /// removed when the last element goes, same as setting an empty array.
    pub fn remove_from_array(&mut self, key: &str, value: &Value) -> Result<()> {
        let emptied = match self.fields.get_mut(key) {
            Some(Value::Array(items)) => {
                items.retain(|item| item != value);
                items.is_empty()
            }
            _ => false,
        };
        if emptied {
            self.fields.remove(key);
        }
        Ok(())
    }

    /// Appends an element to an array field, creating the array if absent.
    pub fn push_to_array(&mut self, key: &str, value: Value) -> Result<()> {
        if key.is_empty() {
            return Err(anyhow::anyhow!("field names must be non-empty"));
        }
        match self.fields.entry(key.to_string()) {
            serde_json::map::Entry::Vacant(entry) => {
                entry.insert(Value::Array(vec![value]));
                Ok(())
            }
            serde_json::map::Entry::Occupied(mut entry) => match entry.get_mut() {
                Value::Array(items) => {
                    items.push(value);
                    Ok(())
                }
                other => Err(anyhow::anyhow!(
                    "field '{}' holds a {}, not an array",
                    key,
                    type_name(other)
                )),
            },
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn to_json(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }
}

pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_removal(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_fields_from_json() -> anyhow::Result<()> {
        let doc = Document::from_json(r#"{ "test1": "value1", "test2": 17 }"#)?;
        assert_eq!(doc.get("test1"), Some(&json!("value1")));
        assert_eq!(doc.get("test2"), Some(&json!(17)));
        Ok(())
    }

    #[test]
    fn decodes_array_of_strings() -> anyhow::Result<()> {
        let doc = Document::from_json(r#"{ "test1": ["value1", "value2", "value3"] }"#)?;
        assert_eq!(doc.get("test1"), Some(&json!(["value1", "value2", "value3"])));
        Ok(())
    }

    #[test]
    fn rejects_non_object_payloads() {
        assert!(Document::from_json("[1, 2, 3]").is_err());
        assert!(Document::from_json("\"just a string\"").is_err());
        assert!(Document::from_json("{ not json").is_err());
    }

    #[test]
    fn setting_null_removes_field() -> anyhow::Result<()> {
        let mut doc = Document::new();
        doc.set("name", json!("test"))?;
        assert_eq!(doc.get("name"), Some(&json!("test")));

        doc.set("name", Value::Null)?;
        assert_eq!(doc.get("name"), None);
        assert!(doc.keys().is_empty());
        Ok(())
    }

    #[test]
    fn setting_empty_array_removes_field() -> anyhow::Result<()> {
        let mut doc = Document::new();
        doc.set("name", json!(["one"]))?;
        assert_eq!(doc.keys().len(), 1);

        doc.set("name", json!([]))?;
        assert!(doc.keys().is_empty());
        Ok(())
    }

    #[test]
    fn nulls_are_dropped_on_parse() -> anyhow::Result<()> {
        let doc = Document::from_json(r#"{ "a": "1", "b": null, "c": [] }"#)?;
        assert_eq!(doc.keys(), vec!["a"]);
        Ok(())
    }

    #[test]
    fn rejects_empty_field_names() {
        let mut doc = Document::new();
        assert!(doc.set("", json!("value")).is_err());
    }

    #[test]
    fn removes_element_from_array_field() -> anyhow::Result<()> {
        let mut doc = Document::from_json(r#"{ "test1": ["value1", "value2", "value3"] }"#)?;
        doc.remove_from_array("test1", &json!("value1"))?;
        assert_eq!(doc.get("test1"), Some(&json!(["value2", "value3"])));
        Ok(())
    }

    #[test]
    fn removing_last_array_element_removes_field() -> anyhow::Result<()> {
        let mut doc = Document::from_json(r#"{ "name": ["one"] }"#)?;
        doc.remove_from_array("name", &json!("one"))?;
        assert!(!doc.contains("name"));
        Ok(())
    }

    #[test]
    fn stringifies_values_for_diffing() -> anyhow::Result<()> {
        let doc = Document::from_json(r#"{ "s": "plain", "n": 17, "b": true, "a": [1, 2] }"#)?;
        assert_eq!(doc.stringified("s").as_deref(), Some("plain"));
        assert_eq!(doc.stringified("n").as_deref(), Some("17"));
        assert_eq!(doc.stringified("b").as_deref(), Some("true"));
        assert_eq!(doc.stringified("a").as_deref(), Some("[1,2]"));
        Ok(())
    }

    #[test]
    fn diff_equality_ignores_absent_vs_empty() -> anyhow::Result<()> {
        let a = Document::from_json(r#"{ "name": "Foo", "notes": "" }"#)?;
        let b = Document::from_json(r#"{ "name": "Foo" }"#)?;
        assert!(a.diff_equal(&b));
        assert!(b.diff_equal(&a));

        let c = Document::from_json(r#"{ "name": "Bar" }"#)?;
        assert!(!a.diff_equal(&c));
        Ok(())
    }
}
