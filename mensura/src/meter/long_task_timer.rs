use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use super::{same_core, LongTaskTimerCore};
use crate::{DistributionStatisticConfig, Id, MeterKind, MeterRegistry, MeterResult, Tag, Tags};

/// Tracks tasks while they are still running, e.g. a batch job.
///
/// # Examples
///
/// ```
/// use mensura::{LongTaskTimer, MeterRegistry};
///
/// let registry = MeterRegistry::simple();
/// let timer = LongTaskTimer::builder("reindex").register(&registry).unwrap();
/// let task = timer.start();
/// assert_eq!(timer.active_tasks(), 1);
/// task.stop();
/// assert_eq!(timer.active_tasks(), 0);
/// ```
#[derive(Clone, Debug)]
pub struct LongTaskTimer {
    id: Arc<Id>,
    core: Arc<dyn LongTaskTimerCore>,
}

impl LongTaskTimer {
    /// Starts building a long task timer named `name`.
    pub fn builder(name: impl Into<Cow<'static, str>>) -> LongTaskTimerBuilder {
        LongTaskTimerBuilder {
            name: name.into(),
            tags: Tags::empty(),
            description: None,
        }
    }

    pub(crate) fn new(id: Id, core: Arc<dyn LongTaskTimerCore>) -> Self {
        LongTaskTimer {
            id: Arc::new(id),
            core,
        }
    }

    /// The id the timer was registered under.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Begins tracking a task.
    pub fn start(&self) -> LongTaskSample {
        LongTaskSample {
            task: self.core.start_task(),
            core: self.core.clone(),
        }
    }

    /// Number of tasks in flight.
    pub fn active_tasks(&self) -> usize {
        self.core.active_tasks()
    }

    /// Combined duration of the tasks in flight.
    pub fn duration(&self) -> Duration {
        self.core.duration()
    }

    /// Duration of the longest task in flight.
    pub fn max(&self) -> Duration {
        self.core.max()
    }

    /// Whether this timer discards tasks.
    pub fn is_noop(&self) -> bool {
        self.core.is_noop()
    }

    pub(crate) fn close(&self) {
        self.core.close();
    }
}

impl PartialEq for LongTaskTimer {
    fn eq(&self, other: &Self) -> bool {
        same_core(&self.core, &other.core)
    }
}

/// A task tracked by a [`LongTaskTimer`] until stopped.
#[derive(Debug)]
#[must_use = "the task stays active until stopped"]
pub struct LongTaskSample {
    task: u64,
    core: Arc<dyn LongTaskTimerCore>,
}

impl LongTaskSample {
    /// Stops tracking the task and returns how long it ran.
    pub fn stop(self) -> Duration {
        self.core.stop_task(self.task).unwrap_or_default()
    }
}

/// Builder of a [`LongTaskTimer`].
#[derive(Clone, Debug)]
pub struct LongTaskTimerBuilder {
    name: Cow<'static, str>,
    tags: Tags,
    description: Option<Cow<'static, str>>,
}

impl LongTaskTimerBuilder {
    /// Adds a tag.
    pub fn tag(mut self, key: impl Into<Cow<'static, str>>, value: impl Into<Cow<'static, str>>) -> Self {
        self.tags = self.tags.and(Tag::new(key, value));
        self
    }

    /// Adds tags.
    pub fn tags(mut self, tags: Tags) -> Self {
        self.tags = self.tags.concat(&tags);
        self
    }

    /// Sets the description.
    pub fn description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Registers the timer, or returns the one already registered under the
    /// same id.
    pub fn register(self, registry: &MeterRegistry) -> MeterResult<LongTaskTimer> {
        let mut id = Id::new(self.name, self.tags, MeterKind::LongTaskTimer).with_base_unit("seconds");
        if let Some(description) = self.description {
            id = id.with_description(description);
        }
        registry.register(
            id,
            Some(DistributionStatisticConfig::none()),
            |factory, id, config| LongTaskTimer::new(id.clone(), factory.new_long_task_timer(id, config)),
        )
    }
}
