//! Phased, dependency-ordered application bootstrap.
//!
//! Units of startup work are registered against a phase with the names of
//! the units they depend on. Running a phase resolves a total order that
//! honours every dependency and executes each unit exactly once, threading a
//! single [`Context`] through all of them.
//!
//! - [`Registry`] - stores unit definitions per phase in registration order
//! - [`resolve`] - stable topological ordering of one phase
//! - [`Initializer`] - registers units and runs phases against a context
//! - [`Context`] - named capabilities installed by units as they complete

pub mod context;
pub mod error;
pub mod executor;
pub mod registry;
pub mod resolver;

pub use context::{CapabilityError, Context};
pub use error::{FailureKind, InitError, InitializationFailure, Result};
pub use executor::{Initializer, InitializerConfig, PhaseReport};
pub use registry::{Completion, Initialize, Registry, Unit, UnitDef, UnitResult, Work};
pub use resolver::resolve;
