//! Ordered argument mapping.

use indexmap::IndexMap;

use crate::value::Value;

/// The named arguments of one invocation.
///
/// Names are unique. Inserting an existing name replaces its value but keeps
/// its original position, so encoding order is first-insertion order.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    entries: IndexMap<String, Value>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an argument, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(name.into(), value.into())
    }

    /// Builder-style `insert`.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.entries.shift_remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn has_attachments(&self) -> bool {
        self.entries.values().any(Value::contains_attachment)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut arguments = Arguments::new();
        for (name, value) in iter {
            arguments.insert(name, value);
        }
        arguments
    }
}

impl<K: Into<String>, V: Into<Value>> Extend<(K, V)> for Arguments {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::Attachment;

    #[test]
    fn last_write_wins_in_first_position() {
        let mut arguments = Arguments::new().with("a", 1).with("b", 2);
        let previous = arguments.insert("a", 3);

        assert!(matches!(previous, Some(Value::Int(1))));
        let names: Vec<_> = arguments.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(matches!(arguments.get("a"), Some(Value::Int(3))));
        assert_eq!(arguments.len(), 2);
    }

    #[test]
    fn collects_from_pairs() {
        let arguments: Arguments = vec![("x", "1"), ("y", "2"), ("x", "3")].into_iter().collect();
        assert_eq!(arguments.len(), 2);
        assert_eq!(arguments.get("x").and_then(Value::marshal).as_deref(), Some("3"));
    }

    #[test]
    fn remove_preserves_order_of_the_rest() {
        let mut arguments = Arguments::new().with("a", 1).with("b", 2).with("c", 3);
        arguments.remove("b");
        let names: Vec<_> = arguments.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn detects_attachments() {
        let plain = Arguments::new().with("a", 1);
        assert!(!plain.has_attachments());

        let with_file = plain.with("file", Attachment::from_bytes("f.txt", b"x".to_vec()));
        assert!(with_file.has_attachments());
    }
}
