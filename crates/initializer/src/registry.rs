//! Unit definitions and the per-phase registry.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::context::Context;
use crate::error::{InitError, Result};

/// Outcome of a unit's work.
pub type UnitResult = anyhow::Result<()>;

/// What a unit hands back when it is started.
pub enum Completion<'a> {
    /// The work already finished.
    Ready(UnitResult),
    /// The work finishes when the future resolves.
    Pending(BoxFuture<'a, UnitResult>),
}

impl<'a> Completion<'a> {
    pub fn ready(result: UnitResult) -> Self {
        Completion::Ready(result)
    }

    pub fn done() -> Self {
        Completion::Ready(Ok(()))
    }

    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = UnitResult> + Send + 'a,
    {
        Completion::Pending(Box::pin(future))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Completion::Pending(_))
    }
}

impl fmt::Debug for Completion<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Completion::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// The work a unit performs against the shared context.
pub trait Work: Send + Sync {
    fn start<'a>(&'a self, ctx: &'a mut Context) -> Completion<'a>;
}

struct FnWork<F>(F);

impl<F> Work for FnWork<F>
where
    F: for<'a> Fn(&'a mut Context) -> Completion<'a> + Send + Sync,
{
    fn start<'a>(&'a self, ctx: &'a mut Context) -> Completion<'a> {
        (self.0)(ctx)
    }
}

/// Struct-based initializer.
///
/// Implementors describe where they belong and what they need, and do their
/// work asynchronously in [`Initialize::run`].
#[async_trait]
pub trait Initialize: Send + Sync + 'static {
    fn phase(&self) -> &str;

    fn name(&self) -> &str;

    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Upper bound for [`Initialize::run`]; `None` waits indefinitely.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn run(&self, ctx: &mut Context) -> UnitResult;
}

struct InitializeWork<I>(I);

impl<I: Initialize> Work for InitializeWork<I> {
    fn start<'a>(&'a self, ctx: &'a mut Context) -> Completion<'a> {
        Completion::Pending(self.0.run(ctx))
    }
}

/// Registration-time description of a unit.
#[derive(Debug, Clone)]
pub struct UnitDef {
    phase: String,
    name: String,
    dependencies: Vec<String>,
    timeout: Option<Duration>,
}

impl UnitDef {
    pub fn new(phase: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            name: name.into(),
            dependencies: Vec::new(),
            timeout: None,
        }
    }

    /// Add prerequisites; repeated names are kept once, first occurrence wins.
    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for dependency in dependencies {
            let dependency = dependency.into();
            if !self.dependencies.contains(&dependency) {
                self.dependencies.push(dependency);
            }
        }
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A registered unit of startup work.
#[derive(Clone)]
pub struct Unit {
    def: UnitDef,
    work: Arc<dyn Work>,
}

impl Unit {
    pub fn phase(&self) -> &str {
        &self.def.phase
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.def.dependencies
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.def.timeout
    }

    pub(crate) fn work(&self) -> &dyn Work {
        self.work.as_ref()
    }
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("phase", &self.def.phase)
            .field("name", &self.def.name)
            .field("dependencies", &self.def.dependencies)
            .field("timeout", &self.def.timeout)
            .finish()
    }
}

/// Unit definitions keyed by phase, in registration order.
#[derive(Default)]
pub struct Registry {
    phases: Vec<String>,
    units: HashMap<String, Vec<Unit>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a closure-based unit.
    ///
    /// Dependencies are not checked here; they may name units registered later.
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
        let def = UnitDef::new(phase, name).depends_on(dependencies);
        self.register(def, work)
    }

    /// Record a closure-based unit from a full definition.
    pub fn register<F>(&mut self, def: UnitDef, work: F) -> Result<()>
    where
        F: for<'a> Fn(&'a mut Context) -> Completion<'a> + Send + Sync + 'static,
    {
        self.push(def, Arc::new(FnWork(work)))
    }

    /// Record a struct-based initializer.
    pub fn install<I: Initialize>(&mut self, initializer: I) -> Result<()> {
        let mut def = UnitDef::new(initializer.phase(), initializer.name())
            .depends_on(initializer.dependencies());
        def.timeout = initializer.timeout();
        self.push(def, Arc::new(InitializeWork(initializer)))
    }

    /// Record a unit backed by a custom [`Work`] implementation.
    pub fn register_work<W: Work + 'static>(&mut self, def: UnitDef, work: W) -> Result<()> {
        self.push(def, Arc::new(work))
    }

    fn push(&mut self, def: UnitDef, work: Arc<dyn Work>) -> Result<()> {
        if self.contains(&def.phase, &def.name) {
            return Err(InitError::duplicate(def.phase, def.name));
        }

        tracing::debug!(
            phase = %def.phase,
            initializer = %def.name,
            dependencies = ?def.dependencies,
            "Initializer registered"
        );

        if !self.units.contains_key(&def.phase) {
            self.phases.push(def.phase.clone());
        }
        self.units
            .entry(def.phase.clone())
            .or_default()
            .push(Unit { def, work });
        Ok(())
    }

    pub fn contains(&self, phase: &str, name: &str) -> bool {
        self.units_for(phase).iter().any(|unit| unit.name() == name)
    }

    /// Units of `phase` in registration order; empty for an unknown phase.
    pub fn units_for(&self, phase: &str) -> &[Unit] {
        self.units.get(phase).map(Vec::as_slice).unwrap_or_default()
    }

    /// Phases in order of their first registration.
    pub fn phases(&self) -> &[String] {
        &self.phases
    }

    pub fn len(&self) -> usize {
        self.units.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for phase in &self.phases {
            let names: Vec<&str> = self.units_for(phase).iter().map(Unit::name).collect();
            map.entry(phase, &names);
        }
        map.finish()
    }
}
