//! Policy outcomes and how they are reported to callers.

use thiserror::Error;

/// Kind of a policy violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViolationKind {
    /// Policy forbade an otherwise well-formed request.
    Denied,
    /// A required argument was missing or could not be classified.
    Undefined,
}

/// A policy violation with a human-readable reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// What kind of violation this is
    pub kind: ViolationKind,
    /// Why the request was refused
    pub reason: String,
    /// The requested path or module identifier, when one was involved
    pub path: Option<String>,
}

impl Violation {
    /// A denial.
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            kind: ViolationKind::Denied,
            reason: reason.into(),
            path: None,
        }
    }

    /// An undefined-input violation.
    pub fn undefined(reason: impl Into<String>) -> Self {
        Self {
            kind: ViolationKind::Undefined,
            reason: reason.into(),
            path: None,
        }
    }

    /// Attach the requested path, keeping one already attached.
    pub fn at(mut self, path: impl Into<String>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }
}

/// The result of evaluating policy for a single call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyOutcome<T> {
    /// The request passed policy.
    Allowed(T),
    /// The request was refused.
    Denied(String),
    /// The request was missing input.
    Undefined(String),
}

impl<T> PolicyOutcome<T> {
    /// Returns true if the request passed policy.
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyOutcome::Allowed(_))
    }

    /// Returns the reason if the request was refused.
    pub fn reason(&self) -> Option<&str> {
        match self {
            PolicyOutcome::Allowed(_) => None,
            PolicyOutcome::Denied(reason) | PolicyOutcome::Undefined(reason) => Some(reason),
        }
    }

    /// Map the allowed value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> PolicyOutcome<U> {
        match self {
            PolicyOutcome::Allowed(v) => PolicyOutcome::Allowed(f(v)),
            PolicyOutcome::Denied(r) => PolicyOutcome::Denied(r),
            PolicyOutcome::Undefined(r) => PolicyOutcome::Undefined(r),
        }
    }

    /// Convert into a `Result` so checks can be chained with `?`.
    pub fn into_result(self) -> Result<T, Violation> {
        match self {
            PolicyOutcome::Allowed(v) => Ok(v),
            PolicyOutcome::Denied(r) => Err(Violation::denied(r)),
            PolicyOutcome::Undefined(r) => Err(Violation::undefined(r)),
        }
    }
}

impl<T> From<Result<T, Violation>> for PolicyOutcome<T> {
    fn from(result: Result<T, Violation>) -> Self {
        match result {
            Ok(v) => PolicyOutcome::Allowed(v),
            Err(Violation {
                kind: ViolationKind::Denied,
                reason,
                ..
            }) => PolicyOutcome::Denied(reason),
            Err(Violation {
                kind: ViolationKind::Undefined,
                reason,
                ..
            }) => PolicyOutcome::Undefined(reason),
        }
    }
}

/// Errors surfaced by guarded calls.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Policy forbade the request
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Required input was missing
    #[error("undefined: {0}")]
    Undefined(String),
    /// The operation is not part of the capability table
    #[error("operation not available: {0}")]
    Unavailable(&'static str),
    /// The underlying filesystem primitive failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The underlying loader or evaluator failed
    #[error(transparent)]
    Delegate(Box<dyn std::error::Error + Send + Sync>),
}

impl SandboxError {
    /// Status code for this kind of error.
    pub fn status(&self) -> u16 {
        match self {
            SandboxError::PermissionDenied(_) => 403,
            SandboxError::Undefined(_) => 400,
            SandboxError::Unavailable(_) => 501,
            SandboxError::Io(_) | SandboxError::Delegate(_) => 500,
        }
    }

    /// Returns true if this error is a policy violation rather than a
    /// failure of the delegated primitive.
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            SandboxError::PermissionDenied(_) | SandboxError::Undefined(_)
        )
    }
}

impl From<Violation> for SandboxError {
    fn from(violation: Violation) -> Self {
        match violation.kind {
            ViolationKind::Denied => SandboxError::PermissionDenied(violation.reason),
            ViolationKind::Undefined => SandboxError::Undefined(violation.reason),
        }
    }
}

/// Caller-visible value of a guarded call.
///
/// In lenient mode, violations are returned as [`Reported::Null`] (denied)
/// or [`Reported::Undefined`] (missing input) instead of being raised.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reported<T> {
    /// The delegated primitive's result.
    Value(T),
    /// Denied in lenient mode.
    Null,
    /// Missing input in lenient mode.
    Undefined,
}

impl<T> Reported<T> {
    /// Returns the value, discarding sentinels.
    pub fn into_option(self) -> Option<T> {
        match self {
            Reported::Value(v) => Some(v),
            Reported::Null | Reported::Undefined => None,
        }
    }

    /// Returns true if this holds a value.
    pub fn is_value(&self) -> bool {
        matches!(self, Reported::Value(_))
    }

    /// Returns true if this is a sentinel.
    pub fn is_sentinel(&self) -> bool {
        !self.is_value()
    }
}

/// Result type of every guarded call.
pub type GuardResult<T> = Result<Reported<T>, SandboxError>;

/// Turns policy outcomes into caller-visible results.
#[derive(Clone, Copy, Debug)]
pub struct OutcomeReporter {
    strict: bool,
}

impl OutcomeReporter {
    /// Strict reporters raise violations, lenient ones return sentinels.
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    /// Whether violations are raised.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Report a violation for `operation`.
    pub fn violation<T>(&self, operation: &str, violation: Violation) -> GuardResult<T> {
        tracing::debug!(
            operation = %operation,
            path = violation.path.as_deref(),
            kind = ?violation.kind,
            reason = %violation.reason,
            "sandbox policy violation"
        );
        if self.strict {
            return Err(violation.into());
        }
        Ok(match violation.kind {
            ViolationKind::Denied => Reported::Null,
            ViolationKind::Undefined => Reported::Undefined,
        })
    }

    /// Report an outcome whose allowed value is already the final result.
    pub fn report<T>(&self, operation: &str, outcome: PolicyOutcome<T>) -> GuardResult<T> {
        match outcome.into_result() {
            Ok(v) => Ok(Reported::Value(v)),
            Err(violation) => self.violation(operation, violation),
        }
    }

    /// Report a boolean query: any violation reads as `false`, never raised.
    pub fn report_bool(&self, operation: &str, outcome: PolicyOutcome<bool>) -> bool {
        match outcome {
            PolicyOutcome::Allowed(v) => v,
            PolicyOutcome::Denied(reason) | PolicyOutcome::Undefined(reason) => {
                tracing::trace!(operation = %operation, reason = %reason, "query suppressed");
                false
            }
        }
    }
}
