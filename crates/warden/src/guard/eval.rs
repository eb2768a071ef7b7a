//! Dynamic evaluation guard.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::config::EvalPolicy;
use crate::policy::{GuardResult, OutcomeReporter, Reported, SandboxError, Violation};

/// The host's dynamic code evaluator.
pub trait Evaluator: Send + Sync {
    /// Evaluation result.
    type Output;
    /// Evaluation failure, surfaced to the caller unchanged.
    type Error: Into<Box<dyn Error + Send + Sync>>;

    /// Evaluate `source`.
    fn evaluate(&self, source: &str) -> Result<Self::Output, Self::Error>;
}

/// Where an evaluation request comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvalScope {
    /// The evaluator entry point handed to sandboxed code.
    Sandboxed,
    /// The host's own ambient evaluator.
    Host,
}

/// Gates dynamic evaluation according to the sandbox's [`EvalPolicy`].
pub struct EvalGuard<E> {
    evaluator: Arc<E>,
    policy: EvalPolicy,
    reporter: OutcomeReporter,
}

impl<E> Clone for EvalGuard<E> {
    fn clone(&self) -> Self {
        Self {
            evaluator: Arc::clone(&self.evaluator),
            policy: self.policy,
            reporter: self.reporter,
        }
    }
}

impl<E> fmt::Debug for EvalGuard<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalGuard")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<E: Evaluator> EvalGuard<E> {
    pub(crate) fn new(evaluator: Arc<E>, policy: EvalPolicy, reporter: OutcomeReporter) -> Self {
        Self {
            evaluator,
            policy,
            reporter,
        }
    }

    /// Whether requests from `scope` reach the evaluator.
    pub fn permits(&self, scope: EvalScope) -> bool {
        match self.policy {
            EvalPolicy::Disabled => false,
            EvalPolicy::EnabledLocalOnly => scope == EvalScope::Host,
            EvalPolicy::Enabled => true,
        }
    }

    /// Evaluate `source` on behalf of `scope` if policy allows it.
    pub fn evaluate(&self, scope: EvalScope, source: &str) -> GuardResult<E::Output> {
        if !self.permits(scope) {
            return self.reporter.violation(
                "eval",
                Violation::denied("dynamic evaluation is not allowed"),
            );
        }

        self.evaluator
            .evaluate(source)
            .map(Reported::Value)
            .map_err(|err| SandboxError::Delegate(err.into()))
    }

    /// Evaluate on behalf of sandboxed code.
    pub fn eval(&self, source: &str) -> GuardResult<E::Output> {
        self.evaluate(EvalScope::Sandboxed, source)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Echo;

    impl Evaluator for Echo {
        type Output = String;
        type Error = std::io::Error;

        fn evaluate(&self, source: &str) -> Result<String, std::io::Error> {
            if source.is_empty() {
                return Err(std::io::Error::other("empty source"));
            }
            Ok(source.to_uppercase())
        }
    }

    fn guard(policy: EvalPolicy, strict: bool) -> EvalGuard<Echo> {
        EvalGuard::new(Arc::new(Echo), policy, OutcomeReporter::new(strict))
    }

    #[test]
    fn test_disabled_denies_both_scopes() {
        let guard = guard(EvalPolicy::Disabled, true);
        for scope in [EvalScope::Sandboxed, EvalScope::Host] {
            let err = guard.evaluate(scope, "1 + 1").unwrap_err();
            assert!(matches!(err, SandboxError::PermissionDenied(_)));
        }
    }

    #[test]
    fn test_local_only_allows_host() {
        let guard = guard(EvalPolicy::EnabledLocalOnly, true);
        assert!(guard.eval("x").is_err());
        assert_eq!(
            guard.evaluate(EvalScope::Host, "x").unwrap(),
            Reported::Value("X".to_string())
        );
    }

    #[test]
    fn test_enabled_allows_both() {
        let guard = guard(EvalPolicy::Enabled, true);
        assert!(guard.permits(EvalScope::Sandboxed));
        assert!(guard.permits(EvalScope::Host));
        assert_eq!(guard.eval("ok").unwrap().into_option().as_deref(), Some("OK"));
    }

    #[test]
    fn test_lenient_denial_is_null() {
        let guard = guard(EvalPolicy::Disabled, false);
        assert_eq!(guard.eval("x").unwrap(), Reported::Null);
    }

    #[test]
    fn test_evaluator_errors_pass_through() {
        let guard = guard(EvalPolicy::Enabled, false);
        let err = guard.eval("").unwrap_err();
        assert!(!err.is_violation());
        assert_eq!(err.to_string(), "empty source");
    }
}
