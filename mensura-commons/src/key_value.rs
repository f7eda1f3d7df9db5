use std::borrow::Cow;
use std::fmt;

/// A key/value pair of strings.
///
/// Used as a meter tag and as an observation key-value. Equality, ordering and
/// hashing are structural.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyValue {
    key: Cow<'static, str>,
    value: Cow<'static, str>,
}

impl KeyValue {
    /// Create a new `KeyValue` pair.
    ///
    /// # Examples
    ///
    /// ```
    /// use mensura_commons::KeyValue;
    ///
    /// let kv = KeyValue::new("method", String::from("GET"));
    /// assert_eq!(kv.key(), "method");
    /// assert_eq!(kv.value(), "GET");
    /// ```
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<Cow<'static, str>>,
        V: Into<Cow<'static, str>>,
    {
        KeyValue {
            key: key.into(),
            value: value.into(),
        }
    }

    /// The key of this pair.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The value of this pair.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns a copy of this pair with the value replaced.
    pub fn with_value(&self, value: impl Into<Cow<'static, str>>) -> Self {
        KeyValue {
            key: self.key.clone(),
            value: value.into(),
        }
    }
}

impl<K, V> From<(K, V)> for KeyValue
where
    K: Into<Cow<'static, str>>,
    V: Into<Cow<'static, str>>,
{
    fn from((key, value): (K, V)) -> Self {
        KeyValue::new(key, value)
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}='{}'", self.key, self.value)
    }
}

/// An immutable, sorted set of [`KeyValue`]s, unique by key.
///
/// Iteration order is sorted by key and therefore stable; when two pairs share
/// a key the one added last wins.
///
/// # Examples
///
/// ```
/// use mensura_commons::{KeyValue, KeyValues};
///
/// let kvs = KeyValues::of([("b", "2"), ("a", "1")]).and(KeyValue::new("b", "3"));
/// let keys: Vec<_> = kvs.iter().map(|kv| kv.key()).collect();
/// assert_eq!(keys, vec!["a", "b"]);
/// assert_eq!(kvs.get("b"), Some("3"));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct KeyValues {
    sorted: Vec<KeyValue>,
}

impl KeyValues {
    /// An empty set.
    pub const fn empty() -> Self {
        KeyValues { sorted: Vec::new() }
    }

    /// Builds a set from anything that converts into [`KeyValue`]s.
    pub fn of<I, T>(key_values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<KeyValue>,
    {
        KeyValues::empty().and_all(key_values)
    }

    /// Returns a new set with `key_value` added, replacing any pair with the
    /// same key.
    pub fn and(&self, key_value: impl Into<KeyValue>) -> Self {
        let mut next = self.clone();
        next.insert(key_value.into());
        next
    }

    /// Returns a new set with every pair of `key_values` added in order.
    pub fn and_all<I, T>(&self, key_values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<KeyValue>,
    {
        let mut next = self.clone();
        for kv in key_values {
            next.insert(kv.into());
        }
        next
    }

    /// Merges two sets; pairs of `other` win on key collisions.
    pub fn concat(&self, other: &KeyValues) -> Self {
        self.and_all(other.iter().cloned())
    }

    /// Returns the value stored for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key).ok().map(|pos| self.sorted[pos].value())
    }

    /// Whether a pair with `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_ok()
    }

    /// Iterates over the pairs in key order.
    pub fn iter(&self) -> std::slice::Iter<'_, KeyValue> {
        self.sorted.iter()
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    pub(crate) fn insert(&mut self, key_value: KeyValue) {
        match self.position(key_value.key()) {
            Ok(pos) => self.sorted[pos] = key_value,
            Err(pos) => self.sorted.insert(pos, key_value),
        }
    }

    fn position(&self, key: &str) -> Result<usize, usize> {
        self.sorted.binary_search_by(|kv| kv.key().cmp(key))
    }
}

impl<'a> IntoIterator for &'a KeyValues {
    type Item = &'a KeyValue;
    type IntoIter = std::slice::Iter<'a, KeyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.sorted.iter()
    }
}

impl IntoIterator for KeyValues {
    type Item = KeyValue;
    type IntoIter = std::vec::IntoIter<KeyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.sorted.into_iter()
    }
}

impl<T: Into<KeyValue>> FromIterator<T> for KeyValues {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        KeyValues::of(iter)
    }
}

impl<T: Into<KeyValue>> Extend<T> for KeyValues {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for kv in iter {
            self.insert(kv.into());
        }
    }
}

impl fmt::Display for KeyValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, kv) in self.sorted.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", kv)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins_and_order_is_sorted() {
        let kvs = KeyValues::of([("zone", "a"), ("app", "x"), ("zone", "b")]);
        assert_eq!(kvs.len(), 2);
        assert_eq!(kvs.get("zone"), Some("b"));
        let keys: Vec<_> = kvs.iter().map(KeyValue::key).collect();
        assert_eq!(keys, vec!["app", "zone"]);
    }

    #[test]
    fn insertion_order_does_not_change_equality() {
        let a = KeyValues::of([("a", "1"), ("b", "2")]);
        let b = KeyValues::of([("b", "2"), ("a", "1")]);
        assert_eq!(a, b);
    }

    #[test]
    fn concat_prefers_other() {
        let base = KeyValues::of([("a", "1"), ("b", "2")]);
        let merged = base.concat(&KeyValues::of([("b", "3"), ("c", "4")]));
        assert_eq!(merged.get("a"), Some("1"));
        assert_eq!(merged.get("b"), Some("3"));
        assert_eq!(merged.get("c"), Some("4"));
        // the receiver is untouched
        assert_eq!(base.get("b"), Some("2"));
    }

    #[test]
    fn display() {
        let kvs = KeyValues::of([("b", "2"), ("a", "1")]);
        assert_eq!(kvs.to_string(), "[a='1', b='2']");
        assert!(!kvs.contains_key("c"));
        assert_eq!(KeyValues::empty().to_string(), "[]");
    }
}
