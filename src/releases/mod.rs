//! Release index construction and release attribution.

mod attribution;
mod bugfix;
mod index;

pub use attribution::{Attribution, AttributionEngine, AttributionResult, BugfixAttribution};
pub use bugfix::{BugfixEvent, BugfixLog};
pub use index::{Release, ReleaseIndex, TagPattern};
