//! The dependency context threaded through every derivation.
//!
//! An [`Environment`] is an open map from capability tag to capability value.
//! The tag is the capability's Rust type, so an interpreter reads exactly the
//! capabilities it declares by type and ignores everything else:
//!
//! ```rust
//! use morphic::Environment;
//!
//! #[derive(Debug, Clone, Default)]
//! struct Locale(String);
//!
//! let env = Environment::new().with(Locale("fr".to_string()));
//! assert_eq!(env.get::<Locale>().map(|l| l.0.as_str()), Some("fr"));
//! assert!(!env.contains::<u32>());
//! ```

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
struct Capability {
    name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

/// Read-only capability map owned by the caller.
#[derive(Clone, Default)]
pub struct Environment {
    capabilities: HashMap<TypeId, Capability>,
}

impl Environment {
    /// Create an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a capability, replacing any previous value of the same type.
    pub fn with<T: Any + Send + Sync>(mut self, capability: T) -> Self {
        self.insert(capability);
        self
    }

    /// Insert a capability. Returns true if one of the same type was replaced.
    pub fn insert<T: Any + Send + Sync>(&mut self, capability: T) -> bool {
        self.capabilities
            .insert(
                TypeId::of::<T>(),
                Capability {
                    name: type_name::<T>(),
                    value: Arc::new(capability),
                },
            )
            .is_some()
    }

    /// Get a capability by type.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.capabilities
            .get(&TypeId::of::<T>())
            .and_then(|c| c.value.downcast_ref::<T>())
    }

    /// Get a capability, falling back to its default.
    pub fn get_or_default<T: Any + Send + Sync + Clone + Default>(&self) -> T {
        self.get::<T>().cloned().unwrap_or_default()
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.capabilities.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.capabilities.values().map(|c| c.name).collect();
        names.sort_unstable();
        f.debug_struct("Environment")
            .field("capabilities", &names)
            .finish()
    }
}
