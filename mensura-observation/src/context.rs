use std::any::{type_name, Any, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasherDefault, Hasher};

use mensura_commons::{KeyValue, KeyValues};

use crate::error::{ContextError, ContextResult, ObservationError};
use crate::Observation;

/// Mutable state shared by a single observation and its handlers.
///
/// Besides the well known attributes (name, contextual name, error, parent and
/// key-values) a context is a typed map: every Rust type can be stored at most
/// once and is looked up by its [`TypeId`]. Handlers use it to stash their own
/// per-observation state (a running timer sample, for instance) between
/// `on_start` and `on_stop`.
///
/// # Examples
///
/// ```
/// use mensura_observation::ObservationContext;
///
/// #[derive(Debug, PartialEq)]
/// struct RequestId(u64);
///
/// let mut ctx = ObservationContext::new();
/// ctx.put(RequestId(7));
/// assert_eq!(ctx.get::<RequestId>(), Some(&RequestId(7)));
/// assert!(ctx.get_required::<String>().is_err());
/// ```
#[derive(Default)]
pub struct ObservationContext {
    name: Cow<'static, str>,
    contextual_name: Option<Cow<'static, str>>,
    error: Option<ObservationError>,
    low_cardinality: KeyValues,
    high_cardinality: KeyValues,
    parent: Option<Observation>,
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>, BuildHasherDefault<IdHasher>>,
}

impl ObservationContext {
    /// An empty context.
    pub fn new() -> Self {
        ObservationContext::default()
    }

    /// The technical name of the observation, empty until assigned.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the technical name.
    pub fn set_name(&mut self, name: impl Into<Cow<'static, str>>) -> &mut Self {
        self.name = name.into();
        self
    }

    /// A more descriptive name, e.g. `GET /orders/{id}`.
    pub fn contextual_name(&self) -> Option<&str> {
        self.contextual_name.as_deref()
    }

    /// Sets or clears the contextual name.
    pub fn set_contextual_name<N>(&mut self, contextual_name: Option<N>) -> &mut Self
    where
        N: Into<Cow<'static, str>>,
    {
        self.contextual_name = contextual_name.map(Into::into);
        self
    }

    /// The error recorded on the observation, if any.
    pub fn error(&self) -> Option<&ObservationError> {
        self.error.as_ref()
    }

    /// Records an error, replacing any previous one.
    pub fn set_error(&mut self, error: ObservationError) -> &mut Self {
        self.error = Some(error);
        self
    }

    /// The enclosing observation, if any.
    pub fn parent_observation(&self) -> Option<&Observation> {
        self.parent.as_ref()
    }

    /// Sets or clears the enclosing observation.
    pub fn set_parent_observation(&mut self, parent: Option<Observation>) -> &mut Self {
        self.parent = parent.filter(|p| !p.is_noop());
        self
    }

    /// Adds a low cardinality key-value, replacing one with the same key.
    pub fn add_low_cardinality_key_value(&mut self, key_value: KeyValue) -> &mut Self {
        self.low_cardinality = self.low_cardinality.and(key_value);
        self
    }

    /// Adds every low cardinality key-value of `key_values`.
    pub fn add_low_cardinality_key_values(&mut self, key_values: KeyValues) -> &mut Self {
        if !key_values.is_empty() {
            self.low_cardinality.extend(key_values);
        }
        self
    }

    /// Adds a high cardinality key-value, replacing one with the same key.
    pub fn add_high_cardinality_key_value(&mut self, key_value: KeyValue) -> &mut Self {
        self.high_cardinality = self.high_cardinality.and(key_value);
        self
    }

    /// Adds every high cardinality key-value of `key_values`.
    pub fn add_high_cardinality_key_values(&mut self, key_values: KeyValues) -> &mut Self {
        if !key_values.is_empty() {
            self.high_cardinality.extend(key_values);
        }
        self
    }

    /// Low cardinality key-values, suitable for meter tags.
    pub fn low_cardinality_key_values(&self) -> &KeyValues {
        &self.low_cardinality
    }

    /// High cardinality key-values, suitable for span attributes.
    pub fn high_cardinality_key_values(&self) -> &KeyValues {
        &self.high_cardinality
    }

    /// Low and high cardinality key-values merged; high cardinality wins on
    /// key collisions.
    pub fn all_key_values(&self) -> KeyValues {
        self.low_cardinality.concat(&self.high_cardinality)
    }

    /// Stores `value`, replacing any entry of the same type.
    pub fn put<T: Any + Send + Sync>(&mut self, value: T) -> &mut Self {
        self.entries.insert(TypeId::of::<T>(), Box::new(value));
        self
    }

    /// Returns the entry of type `T`.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref())
    }

    /// Returns the entry of type `T` mutably.
    pub fn get_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.entries
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_mut())
    }

    /// Returns the entry of type `T` or an error naming the missing type.
    pub fn get_required<T: Any + Send + Sync>(&self) -> ContextResult<&T> {
        self.get::<T>().ok_or(ContextError::MissingRequired {
            key: type_name::<T>(),
        })
    }

    /// Returns the entry of type `T`, or `default` when absent.
    pub fn get_or_default<'a, T: Any + Send + Sync>(&'a self, default: &'a T) -> &'a T {
        self.get::<T>().unwrap_or(default)
    }

    /// Returns the entry of type `T`, inserting the result of `init` first when
    /// absent.
    pub fn compute_if_absent<T, F>(&mut self, init: F) -> &mut T
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let boxed = self
            .entries
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(init()));
        match boxed.downcast_mut::<T>() {
            Some(value) => value,
            // entries are keyed by their own TypeId
            None => unreachable!("context entry does not match its TypeId"),
        }
    }

    /// Removes and returns the entry of type `T`.
    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.entries
            .remove(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast().ok())
            .map(|boxed| *boxed)
    }

    /// Whether an entry of type `T` is present.
    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    /// Removes every typed entry. Attributes and key-values are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Debug for ObservationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationContext")
            .field("name", &self.name)
            .field("contextual_name", &self.contextual_name)
            .field("error", &self.error)
            .field("low_cardinality", &self.low_cardinality)
            .field("high_cardinality", &self.high_cardinality)
            .field("parent", &self.parent)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl fmt::Display for ObservationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "name='{}'", self.name)?;
        if let Some(contextual_name) = &self.contextual_name {
            write!(f, ", contextualName='{}'", contextual_name)?;
        }
        if let Some(error) = &self.error {
            write!(f, ", error='{}'", error)?;
        }
        write!(
            f,
            ", lowCardinalityKeyValues={}, highCardinalityKeyValues={}, entries={}",
            self.low_cardinality,
            self.high_cardinality,
            self.entries.len()
        )?;
        if let Some(parent) = &self.parent {
            write!(f, ", parentObservation={}", parent)?;
        }
        Ok(())
    }
}

/// A named occurrence within an observation's lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Event {
    name: Cow<'static, str>,
    contextual_name: Cow<'static, str>,
}

impl Event {
    /// An event whose contextual name equals its name.
    pub fn of(name: impl Into<Cow<'static, str>>) -> Self {
        let name = name.into();
        Event {
            contextual_name: name.clone(),
            name,
        }
    }

    /// An event with a separate, more descriptive name.
    pub fn with_contextual_name(
        name: impl Into<Cow<'static, str>>,
        contextual_name: impl Into<Cow<'static, str>>,
    ) -> Self {
        Event {
            name: name.into(),
            contextual_name: contextual_name.into(),
        }
    }

    /// The technical name, used as a meter name suffix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The descriptive name.
    pub fn contextual_name(&self) -> &str {
        &self.contextual_name
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event.name='{}'", self.name)?;
        if self.contextual_name != self.name {
            write!(f, ", event.contextualName='{}'", self.contextual_name)?;
        }
        Ok(())
    }
}

/// Pass-through hasher for `TypeId` keys, which are compiler-generated hashes
/// already.
#[derive(Clone, Default, Debug)]
struct IdHasher(u64);

impl Hasher for IdHasher {
    fn write(&mut self, _: &[u8]) {
        unreachable!("TypeId calls write_u64");
    }

    #[inline]
    fn write_u64(&mut self, id: u64) {
        self.0 = id;
    }

    #[inline]
    fn finish(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Sample(u32);

    #[test]
    fn typed_entries() {
        let mut ctx = ObservationContext::new();
        assert!(!ctx.contains::<Sample>());
        ctx.put(Sample(1));
        assert_eq!(ctx.get::<Sample>(), Some(&Sample(1)));

        ctx.get_mut::<Sample>().unwrap().0 = 2;
        assert_eq!(ctx.get_or_default(&Sample(9)), &Sample(2));

        assert_eq!(ctx.remove::<Sample>(), Some(Sample(2)));
        assert_eq!(ctx.get_or_default(&Sample(9)), &Sample(9));
    }

    #[test]
    fn compute_if_absent_keeps_existing_entry() {
        let mut ctx = ObservationContext::new();
        ctx.compute_if_absent(|| Sample(1)).0 += 10;
        let value = ctx.compute_if_absent(|| Sample(100));
        assert_eq!(value, &Sample(11));
    }

    #[test]
    fn missing_required_entry_names_the_type() {
        let ctx = ObservationContext::new();
        let err = ctx.get_required::<Sample>().unwrap_err();
        assert!(matches!(err, ContextError::MissingRequired { key } if key.ends_with("Sample")));
    }

    #[test]
    fn key_values_are_unique_by_key() {
        let mut ctx = ObservationContext::new();
        ctx.add_low_cardinality_key_value(KeyValue::new("status", "200"))
            .add_low_cardinality_key_value(KeyValue::new("status", "500"))
            .add_high_cardinality_key_values(KeyValues::of([("status", "hi"), ("uri", "/a")]));

        assert_eq!(ctx.low_cardinality_key_values().len(), 1);
        assert_eq!(ctx.low_cardinality_key_values().get("status"), Some("500"));
        let all = ctx.all_key_values();
        assert_eq!(all.get("status"), Some("hi"));
        assert_eq!(all.get("uri"), Some("/a"));
    }

    #[test]
    fn display_lists_attributes() {
        let mut ctx = ObservationContext::new();
        ctx.set_name("http.request")
            .set_contextual_name(Some("GET /"))
            .add_low_cardinality_key_value(KeyValue::new("method", "GET"));
        assert_eq!(
            ctx.to_string(),
            "name='http.request', contextualName='GET /', lowCardinalityKeyValues=[method='GET'], highCardinalityKeyValues=[], entries=0"
        );
    }
}
