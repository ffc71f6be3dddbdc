//! Shared bootstrap context.
//!
//! Units expose what they build to later units by installing named
//! capabilities. A capability may only be read by a unit that declared a
//! dependency on its installer; reading one too early is reported as
//! [`CapabilityError::NotFound`] rather than silently misbehaving.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};

use thiserror::Error;

/// Owner recorded for capabilities installed outside any unit.
const APPLICATION_OWNER: &str = "<application>";

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Capability not found: {0}")]
    NotFound(String),

    #[error("Capability {name} is not a {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("Capability {name} is already installed by {owner}")]
    AlreadyInstalled { name: String, owner: String },
}

struct Capability {
    owner: String,
    value: Box<dyn Any + Send + Sync>,
}

/// Progressively populated state handed to every unit.
#[derive(Default)]
pub struct Context {
    capabilities: HashMap<String, Capability>,
    installed: Vec<String>,
    current: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a capability under `name`, owned by the running unit.
    pub fn insert<T: Any + Send + Sync>(
        &mut self,
        name: impl Into<String>,
        value: T,
    ) -> Result<(), CapabilityError> {
        let name = name.into();
        if let Some(existing) = self.capabilities.get(&name) {
            return Err(CapabilityError::AlreadyInstalled {
                name,
                owner: existing.owner.clone(),
            });
        }

        let owner = self
            .current
            .clone()
            .unwrap_or_else(|| APPLICATION_OWNER.to_string());
        tracing::debug!(capability = %name, owner = %owner, "Capability installed");

        self.installed.push(name.clone());
        self.capabilities.insert(
            name,
            Capability {
                owner,
                value: Box::new(value),
            },
        );
        Ok(())
    }

    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<&T, CapabilityError> {
        self.capabilities
            .get(name)
            .ok_or_else(|| CapabilityError::NotFound(name.to_string()))?
            .value
            .downcast_ref()
            .ok_or_else(|| CapabilityError::TypeMismatch {
                name: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    pub fn get_mut<T: Any + Send + Sync>(&mut self, name: &str) -> Result<&mut T, CapabilityError> {
        self.capabilities
            .get_mut(name)
            .ok_or_else(|| CapabilityError::NotFound(name.to_string()))?
            .value
            .downcast_mut()
            .ok_or_else(|| CapabilityError::TypeMismatch {
                name: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Name of the unit that installed `name`.
    pub fn owner(&self, name: &str) -> Option<&str> {
        self.capabilities.get(name).map(|c| c.owner.as_str())
    }

    /// Capability names in installation order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.installed.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.installed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }

    /// Mark `unit` as running until the returned scope is dropped.
    ///
    /// The scope also ends when a caller drops a `run` future mid-unit, so
    /// later installs fall back to the application owner.
    pub(crate) fn enter(&mut self, unit: &str) -> UnitScope<'_> {
        self.current = Some(unit.to_string());
        UnitScope { ctx: self }
    }
}

/// The context as seen by one running unit.
pub(crate) struct UnitScope<'a> {
    ctx: &'a mut Context,
}

impl Deref for UnitScope<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.ctx
    }
}

impl DerefMut for UnitScope<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx
    }
}

impl Drop for UnitScope<'_> {
    fn drop(&mut self) {
        self.ctx.current = None;
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("capabilities", &self.installed)
            .field("current", &self.current)
            .finish()
    }
}
