//! The guarded filesystem capability.
//!
//! A [`CapabilityTable`] is built once per sandbox from the granted actions:
//! each exposed [`Operation`] gets a [`Guard`] holding the checks that apply
//! to it. [`GuardedFs`] runs those guards in front of a
//! [`FileSystem`](crate::primitives::FileSystem).

mod fs;
mod table;

pub use fs::GuardedFs;
pub use table::{CapabilityTable, CreationRule, Guard, Operation, is_directory_like};
