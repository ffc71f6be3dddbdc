use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("Initializer already registered: {phase}/{name}")]
    DuplicateUnit { phase: String, name: String },

    #[error("Initializer {phase}/{unit} depends on unknown initializer {missing}")]
    UnknownDependency {
        phase: String,
        unit: String,
        missing: String,
    },

    #[error("Dependency cycle detected in phase {phase}: {}", cycle.join(" -> "))]
    CycleDetected { phase: String, cycle: Vec<String> },

    #[error("Phase {0} has already started")]
    PhaseStarted(String),

    #[error(transparent)]
    Failed(#[from] InitializationFailure),
}

impl InitError {
    pub fn duplicate(phase: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DuplicateUnit {
            phase: phase.into(),
            name: name.into(),
        }
    }

    pub fn unknown_dependency(
        phase: impl Into<String>,
        unit: impl Into<String>,
        missing: impl Into<String>,
    ) -> Self {
        Self::UnknownDependency {
            phase: phase.into(),
            unit: unit.into(),
            missing: missing.into(),
        }
    }

    /// Structural errors come from registrations and are never worth retrying.
    pub fn is_structural(&self) -> bool {
        !matches!(self, InitError::Failed(_))
    }

    /// The execution failure, if this error came from a unit's work.
    pub fn failure(&self) -> Option<&InitializationFailure> {
        match self {
            InitError::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// A unit's work failed or did not complete in time.
///
/// The cause is only reachable through [`std::error::Error::source`]; use
/// [`InitializationFailure::report`] or `{:#}` on an `anyhow::Error` to render
/// the whole chain.
#[derive(Debug, Error)]
#[error("Initializer {phase}/{name} failed")]
pub struct InitializationFailure {
    pub phase: String,
    pub name: String,
    #[source]
    pub kind: FailureKind,
}

impl InitializationFailure {
    pub fn new(phase: impl Into<String>, name: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            phase: phase.into(),
            name: name.into(),
            kind,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, FailureKind::TimedOut(_))
    }

    /// The failure and its causes on one line, separated by `": "`.
    pub fn report(&self) -> String {
        let mut report = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            report.push_str(": ");
            report.push_str(&cause.to_string());
            source = cause.source();
        }
        report
    }
}

#[derive(Debug, Error)]
pub enum FailureKind {
    #[error(transparent)]
    Error(anyhow::Error),

    #[error("timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),
}

pub type Result<T> = std::result::Result<T, InitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_joins_path() {
        let error = InitError::CycleDetected {
            phase: "startup".to_string(),
            cycle: vec!["x".to_string(), "y".to_string(), "x".to_string()],
        };
        assert_eq!(
            error.to_string(),
            "Dependency cycle detected in phase startup: x -> y -> x"
        );
        assert!(error.is_structural());
    }

    #[test]
    fn test_failure_preserves_cause() {
        let failure = InitializationFailure::new(
            "startup",
            "db",
            FailureKind::Error(anyhow::anyhow!("connection refused")),
        );
        let error = InitError::from(failure);

        assert!(!error.is_structural());
        assert_eq!(error.to_string(), "Initializer startup/db failed");
        let failure = error.failure().unwrap();
        assert_eq!(failure.name, "db");
        assert!(!failure.is_timeout());
        assert_eq!(
            failure.report(),
            "Initializer startup/db failed: connection refused"
        );
    }

    #[test]
    fn test_chain_renders_each_cause_once() {
        let cause = anyhow::anyhow!("refused").context("opening pool");
        let error = InitError::from(InitializationFailure::new(
            "startup",
            "db",
            FailureKind::Error(cause),
        ));

        assert_eq!(
            format!("{:#}", anyhow::Error::new(error).context("bootstrap failed")),
            "bootstrap failed: Initializer startup/db failed: opening pool: refused"
        );
    }

    #[test]
    fn test_timeout_display() {
        let failure = InitializationFailure::new(
            "startup",
            "slow",
            FailureKind::TimedOut(Duration::from_millis(250)),
        );
        assert!(failure.is_timeout());
        assert_eq!(
            failure.report(),
            "Initializer startup/slow failed: timed out after 250ms"
        );
    }
}
