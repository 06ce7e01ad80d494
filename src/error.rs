use std::fmt::{self, Display};
use std::time::Duration;

/// Represents an error raised by the rule engine or while constructing its context.
///
/// Only two things in the pipeline are allowed to fail: building an
/// [`EvaluationContext`](crate::engine::EvaluationContext) and running it.
/// Post-processing passes never produce one of these.
#[derive(Debug)]
pub enum EngineError {
    /// A rule module failed to compile. Fatal; surfaced at boot.
    Load {
        module: String,
        source: minijinja::Error,
    },
    /// A script rule raised while it was running.
    Script {
        rule: String,
        source: minijinja::Error,
    },
    /// A free-standing script passed to `execute` raised.
    Execution(minijinja::Error),
    /// The execution budget (wall clock or fuel) ran out.
    Timeout { budget: Duration },
    /// I/O error while discovering plugin rule modules.
    Io(std::io::Error),
    /// Error from walking a plugin rule directory.
    Walk(walkdir::Error),
}

impl EngineError {
    /// Whether the caller may retry or degrade instead of failing the process.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Load { .. } | Self::Io(_) | Self::Walk(_))
    }

    /// Classifies an error coming out of the sandbox, mapping fuel exhaustion onto [`EngineError::Timeout`].
    pub(crate) fn from_script(rule: &str, source: minijinja::Error, budget: Duration) -> Self {
        match source.kind() {
            minijinja::ErrorKind::OutOfFuel => Self::Timeout { budget },
            _ => Self::Script {
                rule: rule.to_owned(),
                source,
            },
        }
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load { module, source } => {
                write!(f, "rule module \"{module}\" failed to load: {source}")
            }
            Self::Script { rule, source } => write!(f, "rule \"{rule}\" raised: {source}"),
            Self::Execution(source) => write!(f, "script raised: {source}"),
            Self::Timeout { budget } => {
                write!(f, "rule engine exceeded its budget of {}ms", budget.as_millis())
            }
            Self::Io(source) => write!(f, "I/O error while loading rules: {source}"),
            Self::Walk(source) => write!(f, "could not walk rule directory: {source}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Load { source, .. } | Self::Script { source, .. } => Some(source),
            Self::Execution(source) => Some(source),
            Self::Io(source) => Some(source),
            Self::Walk(source) => Some(source),
            Self::Timeout { .. } => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(item: std::io::Error) -> Self {
        EngineError::Io(item)
    }
}

impl From<walkdir::Error> for EngineError {
    fn from(item: walkdir::Error) -> Self {
        EngineError::Walk(item)
    }
}
