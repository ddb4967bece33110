//! Success-or-violations container.
//!
//! An [`Outcome`] holds either exactly one success value or a non-empty,
//! ordered list of [`Violation`]s; never both, never neither. Connection
//! operations report through it, and [`Outcome::resolve`] routes violations
//! through a [`ViolationRegistry`].

mod registry;
mod violation;

pub use registry::{HandlerKey, UnresolvedPolicy, ViolationHandler, ViolationRegistry};
pub use violation::{Violation, ViolationKind};

use crate::{Error, Result};

/// Result of an operation: a value, or the violations that prevented it.
#[derive(Debug)]
#[must_use]
pub struct Outcome<T> {
    state: State<T>,
}

#[derive(Debug)]
enum State<T> {
    Success(T),
    Violated(Vec<Violation>),
}

impl<T> Outcome<T> {
    /// Successful outcome holding `value`.
    pub fn success(value: T) -> Self {
        Self {
            state: State::Success(value),
        }
    }

    /// Failed outcome holding one violation.
    pub fn violation(violation: impl Into<Violation>) -> Self {
        Self {
            state: State::Violated(vec![violation.into()]),
        }
    }

    /// Failed outcome holding `violations` in order.
    ///
    /// Returns `None` for an empty list.
    pub fn violations<I>(violations: I) -> Option<Self>
    where
        I: IntoIterator<Item = Violation>,
    {
        let violations: Vec<Violation> = violations.into_iter().collect();
        if violations.is_empty() {
            return None;
        }
        Some(Self {
            state: State::Violated(violations),
        })
    }

    pub fn builder() -> OutcomeBuilder<T> {
        OutcomeBuilder::new()
    }

    pub fn is_success(&self) -> bool {
        matches!(self.state, State::Success(_))
    }

    pub fn has_violations(&self) -> bool {
        !self.is_success()
    }

    /// Whether any violation is of `kind`.
    pub fn contains_violation(&self, kind: ViolationKind) -> bool {
        self.violation_list().iter().any(|v| v.kind() == kind)
    }

    /// The success value, if any.
    pub fn value(&self) -> Option<&T> {
        match &self.state {
            State::Success(value) => Some(value),
            State::Violated(_) => None,
        }
    }

    /// The violations, empty on success.
    pub fn violation_list(&self) -> &[Violation] {
        match &self.state {
            State::Success(_) => &[],
            State::Violated(violations) => violations,
        }
    }

    /// Run `action` with the value when successful.
    pub fn if_success(&self, action: impl FnOnce(&T)) {
        if let State::Success(value) = &self.state {
            action(value);
        }
    }

    /// Run `action` with the violations when failed.
    pub fn if_violated(&self, action: impl FnOnce(&[Violation])) {
        if let State::Violated(violations) = &self.state {
            action(violations);
        }
    }

    /// The value, or `otherwise` when failed.
    pub fn or_else(self, otherwise: T) -> T {
        match self.state {
            State::Success(value) => value,
            State::Violated(_) => otherwise,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self.state {
            State::Success(value) => Outcome::success(f(value)),
            State::Violated(violations) => Outcome {
                state: State::Violated(violations),
            },
        }
    }

    /// Convert into a `Result`, keeping only the first violation.
    pub fn into_result(self) -> Result<T> {
        match self.state {
            State::Success(value) => Ok(value),
            State::Violated(violations) => Err(violations
                .into_iter()
                .next()
                .map(Violation::into_error)
                .unwrap_or_else(|| Error::InvalidOutcome("no violations".into()))),
        }
    }

    /// Resolve the outcome against `registry`.
    ///
    /// Success yields `Some(value)`. Otherwise every violation is passed to
    /// its handler in order; the first handler that raises stops resolution
    /// with its error, and `Ok(None)` is returned when all of them were
    /// handled.
    pub fn resolve(self, registry: &ViolationRegistry) -> Result<Option<T>> {
        match self.state {
            State::Success(value) => Ok(Some(value)),
            State::Violated(violations) => {
                for violation in &violations {
                    registry.resolve(violation)?;
                }
                Ok(None)
            }
        }
    }
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Outcome::success(value),
            Err(err) => Outcome::violation(err),
        }
    }
}

impl<T> From<Error> for Outcome<T> {
    fn from(err: Error) -> Self {
        Outcome::violation(err)
    }
}

/// Incremental construction of an [`Outcome`].
///
/// A builder accepts either one value or any number of distinct violations.
pub struct OutcomeBuilder<T> {
    value: Option<T>,
    violations: Vec<Violation>,
}

impl<T> OutcomeBuilder<T> {
    pub fn new() -> Self {
        Self {
            value: None,
            violations: Vec::new(),
        }
    }

    /// Set the success value.
    ///
    /// Fails if a value or a violation was already recorded.
    pub fn value(&mut self, value: T) -> Result<()> {
        if self.value.is_some() {
            return Err(Error::InvalidOutcome("value already set".into()));
        }
        if !self.violations.is_empty() {
            return Err(Error::InvalidOutcome(
                "cannot set a value after a violation".into(),
            ));
        }
        self.value = Some(value);
        Ok(())
    }

    pub fn value_if(&mut self, condition: bool, value: T) -> Result<()> {
        if condition {
            self.value(value)?;
        }
        Ok(())
    }

    /// Record a violation. Violations equal to one already recorded are
    /// ignored.
    ///
    /// Fails if a value was already set.
    pub fn violate(&mut self, violation: impl Into<Violation>) -> Result<()> {
        let violation = violation.into();
        if self.violations.iter().any(|v| v.same_as(&violation)) {
            return Ok(());
        }
        if self.value.is_some() {
            return Err(Error::InvalidOutcome(
                "cannot violate an outcome that already has a value".into(),
            ));
        }
        self.violations.push(violation);
        Ok(())
    }

    pub fn violate_if(&mut self, condition: bool, violation: impl Into<Violation>) -> Result<()> {
        if condition {
            self.violate(violation)?;
        }
        Ok(())
    }

    /// Finish the outcome. Fails when neither a value nor a violation was given.
    pub fn build(self) -> Result<Outcome<T>> {
        match self.value {
            Some(value) => Ok(Outcome::success(value)),
            None => Outcome::violations(self.violations)
                .ok_or_else(|| Error::InvalidOutcome("neither value nor violation".into())),
        }
    }
}

impl<T> Default for OutcomeBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}
