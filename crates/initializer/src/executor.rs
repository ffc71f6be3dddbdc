//! Phase execution.
//!
//! [`Initializer`] is the front door applications hold on to: units are
//! registered through it and each phase is run through it exactly once.
//! Units run strictly one after another in resolved order; a pending unit
//! suspends the phase until it completes, and the first failure stops it.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::context::Context;
use crate::error::{FailureKind, InitError, InitializationFailure, Result};
use crate::registry::{Completion, Initialize, Registry, Unit, UnitDef, Work};
use crate::resolver::{resolve, resolve_indices};

#[derive(Debug, Clone, Default)]
pub struct InitializerConfig {
    /// Applied to pending units that declare no timeout of their own.
    pub default_timeout: Option<Duration>,
}

/// Summary of a successfully completed phase.
#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub phase: String,
    /// Unit names in the order they ran.
    pub completed: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

pub struct Initializer {
    registry: Registry,
    config: InitializerConfig,
    started: HashSet<String>,
}

impl Initializer {
    pub fn new() -> Self {
        Self::with_config(InitializerConfig::default())
    }

    pub fn with_config(config: InitializerConfig) -> Self {
        Self {
            registry: Registry::new(),
            config,
            started: HashSet::new(),
        }
    }

    pub fn config(&self) -> &InitializerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register a closure-based unit. See [`Registry::add`].
    pub fn add<I, S, F>(
        &mut self,
        phase: impl Into<String>,
        name: impl Into<String>,
        dependencies: I,
        work: F,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: for<'a> Fn(&'a mut Context) -> Completion<'a> + Send + Sync + 'static,
    {
        self.register(UnitDef::new(phase, name).depends_on(dependencies), work)
    }

    pub fn register<F>(&mut self, def: UnitDef, work: F) -> Result<()>
    where
        F: for<'a> Fn(&'a mut Context) -> Completion<'a> + Send + Sync + 'static,
    {
        self.ensure_open(def.phase())?;
        self.registry.register(def, work)
    }

    pub fn register_work<W: Work + 'static>(&mut self, def: UnitDef, work: W) -> Result<()> {
        self.ensure_open(def.phase())?;
        self.registry.register_work(def, work)
    }

    pub fn install<I: Initialize>(&mut self, initializer: I) -> Result<()> {
        self.ensure_open(initializer.phase())?;
        self.registry.install(initializer)
    }

    pub fn units_for(&self, phase: &str) -> &[Unit] {
        self.registry.units_for(phase)
    }

    /// Resolved order of `phase` without running anything.
    pub fn resolve(&self, phase: &str) -> Result<Vec<String>> {
        resolve(phase, self.registry.units_for(phase))
    }

    pub fn has_started(&self, phase: &str) -> bool {
        self.started.contains(phase)
    }

    fn ensure_open(&self, phase: &str) -> Result<()> {
        if self.has_started(phase) {
            return Err(InitError::PhaseStarted(phase.to_string()));
        }
        Ok(())
    }

    /// Run every unit of `phase` against `ctx`.
    ///
    /// Structural problems (unknown dependencies, cycles) are reported before
    /// any unit runs. On a unit failure the units that already ran keep their
    /// effects on `ctx`; nothing after the failing unit runs.
    pub async fn run(&mut self, phase: &str, ctx: &mut Context) -> Result<PhaseReport> {
        self.ensure_open(phase)?;
        let units = self.registry.units_for(phase);
        let order = resolve_indices(phase, units)?;
        self.started.insert(phase.to_string());

        let started_at = Utc::now();
        let clock = Instant::now();
        info!(phase = %phase, units = order.len(), "Running phase");

        let mut completed = Vec::with_capacity(order.len());
        for unit in order.into_iter().map(|i| &units[i]) {
            let name = unit.name();
            let timeout = unit.timeout().or(self.config.default_timeout);

            debug!(phase = %phase, initializer = %name, "Running initializer");
            let unit_clock = Instant::now();

            let outcome = {
                let mut scope = ctx.enter(name);
                execute(unit, &mut scope, timeout).await
            };

            if let Err(kind) = outcome {
                let failure = InitializationFailure::new(phase, name, kind);
                error!(
                    phase = %phase,
                    initializer = %name,
                    error = %failure.report(),
                    "Initializer failed"
                );
                return Err(failure.into());
            }

            debug!(
                phase = %phase,
                initializer = %name,
                elapsed_ms = unit_clock.elapsed().as_millis() as u64,
                "Initializer completed"
            );
            completed.push(name.to_string());
        }

        let elapsed = clock.elapsed();
        info!(
            phase = %phase,
            elapsed_ms = elapsed.as_millis() as u64,
            "Phase completed"
        );

        Ok(PhaseReport {
            phase: phase.to_string(),
            completed,
            started_at,
            elapsed,
        })
    }

    /// Run `phases` in the given order, stopping at the first failure.
    pub async fn run_phases<I, S>(&mut self, phases: I, ctx: &mut Context) -> Result<Vec<PhaseReport>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut reports = Vec::new();
        for phase in phases {
            reports.push(self.run(phase.as_ref(), ctx).await?);
        }
        Ok(reports)
    }
}

impl Default for Initializer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Initializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Initializer")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("started", &self.started)
            .finish()
    }
}

/// Start a unit and wait for it. Ready results cannot be bounded by a timeout.
async fn execute(
    unit: &Unit,
    ctx: &mut Context,
    timeout: Option<Duration>,
) -> std::result::Result<(), FailureKind> {
    match unit.work().start(ctx) {
        Completion::Ready(result) => result.map_err(FailureKind::Error),
        Completion::Pending(future) => match timeout {
            Some(limit) => match tokio::time::timeout(limit, future).await {
                Ok(result) => result.map_err(FailureKind::Error),
                Err(_) => Err(FailureKind::TimedOut(limit)),
            },
            None => future.await.map_err(FailureKind::Error),
        },
    }
}
