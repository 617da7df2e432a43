use typed_builder::TypedBuilder;
use waymark_events::DestinationId;

/// How a `send` hands records to a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggingPolicy {
    /// Try the destination now; buffer on failure.
    #[default]
    Immediate,
    /// Always buffer; never attempt an immediate send.
    BufferFirst,
}

/// Restricts which registered destinations a `send` reaches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggerScope {
    Only(Vec<DestinationId>),
    Exclude(Vec<DestinationId>),
}

impl LoggerScope {
    pub fn only<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<DestinationId>,
    {
        Self::Only(ids.into_iter().map(Into::into).collect())
    }

    pub fn exclude<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<DestinationId>,
    {
        Self::Exclude(ids.into_iter().map(Into::into).collect())
    }

    pub fn includes(&self, id: &DestinationId) -> bool {
        match self {
            LoggerScope::Only(ids) => ids.contains(id),
            LoggerScope::Exclude(ids) => !ids.contains(id),
        }
    }
}

/// Per-call dispatch options. `LoggingOption::default()` is immediate, all destinations.
#[derive(Debug, Clone, Default, PartialEq, Eq, TypedBuilder)]
pub struct LoggingOption {
    #[builder(default)]
    pub policy: LoggingPolicy,
    #[builder(default, setter(strip_option))]
    pub scope: Option<LoggerScope>,
}

impl LoggingOption {
    pub fn immediate() -> Self {
        Self::default()
    }

    pub fn buffer_first() -> Self {
        Self {
            policy: LoggingPolicy::BufferFirst,
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: LoggerScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Whether a destination is targeted by this option. No scope = everything.
    pub fn targets(&self, id: &DestinationId) -> bool {
        self.scope.as_ref().map_or(true, |scope| scope.includes(id))
    }
}

/// Per-destination policy. A destination without an entry allows buffering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestinationConfig {
    pub allow_buffering: bool,
}

impl DestinationConfig {
    pub fn new(allow_buffering: bool) -> Self {
        Self { allow_buffering }
    }
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            allow_buffering: true,
        }
    }
}
