use tokio::task::JoinHandle;
use waymark_events::{Event, Value};

use crate::bundler::Bundler;
use crate::option::LoggingOption;

/// A value that logs an event every time it is set.
///
/// The event is named after the value and carries `updated_value` and
/// `updated_count`. Sending happens on a spawned task; `set` never waits for it.
pub struct Tracked<T: 'static> {
    value: T,
    name: String,
    bundler: Bundler,
    option: LoggingOption,
    updated_count: i64,
    project: Box<dyn Fn(&T) -> Value + Send + Sync>,
}

impl<T> Tracked<T>
where
    T: Clone + Into<Value> + 'static,
{
    pub fn new(name: impl Into<String>, value: T, bundler: Bundler) -> Self {
        Self::with_projection(name, value, bundler, |v: &T| v.clone().into())
    }
}

impl<T: 'static> Tracked<T> {
    /// For values that are not themselves a `Value`: `project` picks what gets logged.
    pub fn with_projection(
        name: impl Into<String>,
        value: T,
        bundler: Bundler,
        project: impl Fn(&T) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            value,
            name: name.into(),
            bundler,
            option: LoggingOption::default(),
            updated_count: 0,
            project: Box::new(project),
        }
    }

    pub fn with_option(mut self, option: LoggingOption) -> Self {
        self.option = option;
        self
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn updated_count(&self) -> i64 {
        self.updated_count
    }

    /// Replace the value and fire the update event. Must run inside a tokio runtime.
    pub fn set(&mut self, value: T) -> JoinHandle<()> {
        self.value = value;
        self.updated_count += 1;

        let event = Event::new(self.name.as_str())
            .with_param("updated_value", (self.project)(&self.value))
            .with_param("updated_count", self.updated_count);

        self.bundler.spawn_send(event, self.option.clone())
    }
}

impl<T: std::fmt::Debug + 'static> std::fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracked")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("updated_count", &self.updated_count)
            .finish()
    }
}
