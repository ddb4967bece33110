//! Violation handler registry.
//!
//! Resolving a violation walks a fixed fallback chain:
//!
//! 1. a handler registered for the violation's exact [`ViolationKind`];
//! 2. for crate errors, the [`HandlerKey::AnyError`] category handler;
//! 3. for any error (crate or foreign), the [`HandlerKey::AnyFailure`]
//!    category handler.
//!
//! Plain messages only match step 1. When nothing matches, the registry's
//! [`UnresolvedPolicy`] decides between failing and reporting.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::{log_error, read_ignore_poison, write_ignore_poison, Error, Result};

use super::{Violation, ViolationKind};

/// Registry slot a handler is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKey {
    /// Exactly this kind.
    Kind(ViolationKind),
    /// Any crate [`Error`].
    AnyError,
    /// Any error, including foreign ones.
    AnyFailure,
}

/// Function resolving one violation. Returning `Err` raises it.
pub type ViolationHandler = Arc<dyn Fn(&Violation) -> Result<()> + Send + Sync>;

/// What to do with a violation no handler matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnresolvedPolicy {
    /// Fail with [`Error::UnresolvedViolation`].
    #[default]
    Fail,
    /// Log the violation and carry on.
    Report,
}

/// Explicit registry of violation handlers.
///
/// [`ViolationRegistry::new`] seeds the defaults: messages are reported
/// through the error log, crate errors and foreign errors are raised.
pub struct ViolationRegistry {
    handlers: RwLock<HashMap<HandlerKey, ViolationHandler>>,
    unresolved: UnresolvedPolicy,
}

impl ViolationRegistry {
    /// Registry seeded with the default handlers.
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.add_handler(HandlerKey::Kind(ViolationKind::Message), report);
        registry.add_handler(HandlerKey::AnyError, raise);
        registry.add_handler(HandlerKey::AnyFailure, raise);
        registry
    }

    /// Registry without any handlers.
    pub fn empty() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            unresolved: UnresolvedPolicy::default(),
        }
    }

    pub fn with_unresolved_policy(mut self, policy: UnresolvedPolicy) -> Self {
        self.unresolved = policy;
        self
    }

    /// Add a handler unless one is already registered under `key`.
    ///
    /// Returns `false` and keeps the existing handler when the slot is taken.
    pub fn add_handler<F>(&self, key: HandlerKey, handler: F) -> bool
    where
        F: Fn(&Violation) -> Result<()> + Send + Sync + 'static,
    {
        let mut handlers = write_ignore_poison(&self.handlers);
        if handlers.contains_key(&key) {
            return false;
        }
        handlers.insert(key, Arc::new(handler));
        true
    }

    /// Remove the handler under `key`. Returns whether one was present.
    pub fn remove_handler(&self, key: HandlerKey) -> bool {
        write_ignore_poison(&self.handlers).remove(&key).is_some()
    }

    /// Find the handler for `violation` along the fallback chain.
    pub fn lookup(&self, violation: &Violation) -> Option<ViolationHandler> {
        let handlers = read_ignore_poison(&self.handlers);

        if let Some(h) = handlers.get(&HandlerKey::Kind(violation.kind())) {
            return Some(h.clone());
        }
        if violation.as_error().is_some() {
            if let Some(h) = handlers.get(&HandlerKey::AnyError) {
                return Some(h.clone());
            }
        }
        if violation.is_failure() {
            if let Some(h) = handlers.get(&HandlerKey::AnyFailure) {
                return Some(h.clone());
            }
        }
        None
    }

    /// Run the matching handler for `violation`.
    pub fn resolve(&self, violation: &Violation) -> Result<()> {
        match self.lookup(violation) {
            Some(handler) => handler(violation),
            None => match self.unresolved {
                UnresolvedPolicy::Fail => Err(Error::UnresolvedViolation(violation.kind())),
                UnresolvedPolicy::Report => {
                    log_error!("unresolved {:?} violation: {violation}", violation.kind());
                    Ok(())
                }
            },
        }
    }
}

impl Default for ViolationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn report(violation: &Violation) -> Result<()> {
    log_error!("Error: {violation}");
    Ok(())
}

fn raise(violation: &Violation) -> Result<()> {
    Err(Error::Violation {
        kind: violation.kind(),
        message: violation.to_string(),
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_defaults_report_messages_and_raise_errors() {
        // ---
        let registry = ViolationRegistry::new();

        assert!(registry.resolve(&Violation::from("just a note")).is_ok());

        let err = registry.resolve(&Violation::from(Error::Timeout)).unwrap_err();
        assert!(matches!(
            err,
            Error::Violation {
                kind: ViolationKind::Timeout,
                ..
            }
        ));

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        let err = registry.resolve(&Violation::foreign(io)).unwrap_err();
        assert!(matches!(
            err,
            Error::Violation {
                kind: ViolationKind::Foreign,
                ..
            }
        ));
    }

    #[test]
    fn test_exact_kind_beats_category() {
        // ---
        let registry = ViolationRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        assert!(registry.add_handler(HandlerKey::Kind(ViolationKind::Timeout), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        assert!(registry.resolve(&Violation::from(Error::Timeout)).is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // other crate errors still fall back to the category handler
        assert!(registry.resolve(&Violation::from(Error::Closed)).is_err());
    }

    #[test]
    fn test_error_falls_back_to_failure_category() {
        // ---
        let registry = ViolationRegistry::new();
        assert!(registry.remove_handler(HandlerKey::AnyError));
        assert!(!registry.add_handler(HandlerKey::AnyFailure, |_| Ok(())));

        // AnyFailure default still raises
        assert!(registry.resolve(&Violation::from(Error::Closed)).is_err());

        registry.remove_handler(HandlerKey::AnyFailure);
        registry.add_handler(HandlerKey::AnyFailure, |_| Ok(()));
        assert!(registry.resolve(&Violation::from(Error::Closed)).is_ok());
    }

    #[test]
    fn test_add_handler_keeps_first() {
        // ---
        let registry = ViolationRegistry::empty();
        assert!(registry.add_handler(HandlerKey::Kind(ViolationKind::Message), |_| Ok(())));
        assert!(!registry.add_handler(HandlerKey::Kind(ViolationKind::Message), |_| {
            Err(Error::Closed)
        }));
        assert!(registry.resolve(&Violation::from("kept")).is_ok());
    }

    #[test]
    fn test_unresolved_policy() {
        // ---
        let failing = ViolationRegistry::empty();
        let err = failing.resolve(&Violation::from("orphan")).unwrap_err();
        assert!(matches!(
            err,
            Error::UnresolvedViolation(ViolationKind::Message)
        ));

        let reporting = ViolationRegistry::empty().with_unresolved_policy(UnresolvedPolicy::Report);
        assert!(reporting.resolve(&Violation::from("orphan")).is_ok());
    }

    #[test]
    fn test_messages_skip_error_categories() {
        // ---
        let registry = ViolationRegistry::new();
        registry.remove_handler(HandlerKey::Kind(ViolationKind::Message));
        assert!(matches!(
            registry.resolve(&Violation::from("text")),
            Err(Error::UnresolvedViolation(ViolationKind::Message))
        ));
    }
}
