//! Insertion-order-preserving catalogue of a device's published values.
//!
//! Order matters here: clients expect `info`/metadata dumps in declaration
//! order, not hash order, mirroring how the original device registers its
//! values during `init()`.
use super::Value;

#[derive(Debug, Default)]
pub struct Catalogue {
    order: Vec<String>,
    values: std::collections::HashMap<String, Value>,
}

impl Catalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new value. Returns the previous entry if `value.name()`
    /// was already present (its position in the order is kept).
    pub fn insert(&mut self, value: Value) -> Option<Value> {
        let name = value.name().to_string();
        if !self.values.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.values.insert(name, value)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.values.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Iterates values in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.order.iter().filter_map(move |name| self.values.get(name))
    }

    /// Values with NEED_SEND set, in declaration order.
    pub fn pending_updates(&self) -> impl Iterator<Item = &Value> {
        self.iter().filter(|v| v.need_send())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn preserves_insertion_order() {
        let mut cat = Catalogue::new();
        cat.insert(Value::new_integer("b", "", Some(1)));
        cat.insert(Value::new_integer("a", "", Some(2)));
        cat.insert(Value::new_integer("c", "", Some(3)));
        let names: Vec<&str> = cat.iter().map(|v| v.name()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn reinserting_same_name_keeps_original_position() {
        let mut cat = Catalogue::new();
        cat.insert(Value::new_integer("b", "", Some(1)));
        cat.insert(Value::new_integer("a", "", Some(2)));
        cat.insert(Value::new_integer("b", "", Some(99)));
        let names: Vec<&str> = cat.iter().map(|v| v.name()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(cat.get("b").unwrap().render(), "99");
    }

    #[test]
    fn pending_updates_filters_need_send() {
        let mut cat = Catalogue::new();
        let mut v1 = Value::new_integer("a", "", Some(1));
        v1.reset_need_send();
        cat.insert(v1);
        cat.insert(Value::new_integer("b", "", Some(2)));
        let pending: Vec<&str> = cat.pending_updates().map(|v| v.name()).collect();
        assert_eq!(pending, vec!["b"]);
    }
}
