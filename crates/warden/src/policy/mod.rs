//! Policy decisions for the sandbox.
//!
//! Everything here is pure: no I/O, no shared mutable state. Guards in
//! [`crate::capability`] and [`crate::guard`] compose these pieces and hand
//! the final [`PolicyOutcome`] to an [`OutcomeReporter`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use warden::policy::{PathResolver, PolicyOutcome};
//!
//! let resolver = PathResolver::new("/app");
//! let outcome = resolver.resolve("../../etc/passwd", Some("/app/src/index".as_ref()), false);
//! assert!(matches!(outcome, PolicyOutcome::Denied(_)));
//! ```

mod extension;
mod module;
mod outcome;
mod resolver;

pub use extension::{Access, CONFIG_EXTENSIONS, ExtensionPolicy, SCRIPT_EXTENSIONS};
pub use module::ModulePolicy;
pub use outcome::{
    GuardResult, OutcomeReporter, PolicyOutcome, Reported, SandboxError, Violation,
    ViolationKind,
};
pub use resolver::{PathClassification, PathResolver};
