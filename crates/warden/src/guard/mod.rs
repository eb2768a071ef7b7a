//! Guards around the host's module loader and evaluator.
//!
//! Both guards are capability objects: sandboxed code only ever receives the
//! guard, never the collaborator it wraps. A request that passes policy is
//! delegated unchanged, and the collaborator's result or error comes back
//! as is.

mod eval;
mod module;

pub use eval::{EvalGuard, EvalScope, Evaluator};
pub use module::{ModuleGuard, ModuleLoader};
