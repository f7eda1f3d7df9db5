use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use mensura_commons::{KeyValue, KeyValues};

/// A dimension of a meter.
pub type Tag = KeyValue;

/// A sorted set of [`Tag`]s, unique by key.
pub type Tags = KeyValues;

/// The kind of a meter, checked when an identity is looked up again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MeterKind {
    /// A monotonically increasing count.
    Counter,
    /// A sampled instantaneous value.
    Gauge,
    /// Latency of short-running events.
    Timer,
    /// Distribution of recorded amounts.
    DistributionSummary,
    /// Duration of tasks still in flight.
    LongTaskTimer,
    /// Anything else.
    Other,
}

impl fmt::Display for MeterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MeterKind::Counter => "Counter",
            MeterKind::Gauge => "Gauge",
            MeterKind::Timer => "Timer",
            MeterKind::DistributionSummary => "DistributionSummary",
            MeterKind::LongTaskTimer => "LongTaskTimer",
            MeterKind::Other => "Other",
        };
        f.write_str(name)
    }
}

/// The identity of a meter.
///
/// Two ids are equal when their name and tags are equal; base unit,
/// description, kind and synthetic association are carried along but do not
/// take part in equality or hashing. Registering a counter and a timer under
/// the same name and tags therefore collides.
///
/// Ids are immutable; the `with_*` methods return modified copies.
#[derive(Clone, Debug)]
pub struct Id {
    name: Cow<'static, str>,
    tags: Tags,
    base_unit: Option<Cow<'static, str>>,
    description: Option<Cow<'static, str>>,
    kind: MeterKind,
    synthetic_association: Option<Arc<Id>>,
}

impl Id {
    /// Create a new id.
    pub fn new(name: impl Into<Cow<'static, str>>, tags: Tags, kind: MeterKind) -> Self {
        Id {
            name: name.into(),
            tags,
            base_unit: None,
            description: None,
            kind,
            synthetic_association: None,
        }
    }

    /// A copy with a different name.
    pub fn with_name(&self, name: impl Into<Cow<'static, str>>) -> Self {
        Id {
            name: name.into(),
            ..self.clone()
        }
    }

    /// A copy with `tag` added, replacing a tag with the same key.
    pub fn with_tag(&self, tag: impl Into<Tag>) -> Self {
        Id {
            tags: self.tags.and(tag),
            ..self.clone()
        }
    }

    /// A copy with `tags` merged in; `tags` win on key collisions.
    pub fn with_tags(&self, tags: &Tags) -> Self {
        Id {
            tags: self.tags.concat(tags),
            ..self.clone()
        }
    }

    /// A copy whose tags are exactly `tags`.
    pub fn replace_tags(&self, tags: Tags) -> Self {
        Id {
            tags,
            ..self.clone()
        }
    }

    /// A copy with a base unit.
    pub fn with_base_unit(&self, base_unit: impl Into<Cow<'static, str>>) -> Self {
        Id {
            base_unit: Some(base_unit.into()),
            ..self.clone()
        }
    }

    /// A copy with a description.
    pub fn with_description(&self, description: impl Into<Cow<'static, str>>) -> Self {
        Id {
            description: Some(description.into()),
            ..self.clone()
        }
    }

    /// A copy marked as derived from `parent`.
    ///
    /// Synthetic ids skip the filters' `map` step and are removed together
    /// with their parent.
    pub fn with_synthetic_association(&self, parent: &Id) -> Self {
        Id {
            synthetic_association: Some(Arc::new(parent.clone())),
            ..self.clone()
        }
    }

    /// The name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tags.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// The value of the tag `key`, if present.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key)
    }

    /// The base unit.
    pub fn base_unit(&self) -> Option<&str> {
        self.base_unit.as_deref()
    }

    /// The description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The kind of meter this id was created for.
    pub fn kind(&self) -> MeterKind {
        self.kind
    }

    /// The id this one was derived from, if synthetic.
    pub fn synthetic_association(&self) -> Option<&Id> {
        self.synthetic_association.as_deref()
    }
}

impl PartialEq for Id {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.tags == other.tags
    }
}

impl Eq for Id {}

impl Hash for Id {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.tags.hash(state);
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MeterId{{name='{}', tags={}}}", self.name, self.tags)
    }
}
