//! Local repository mirror and commit graph walks.

mod commit;
mod mirror;

pub use commit::Commit;
pub use mirror::{CommitWalk, MirrorOptions, RepositoryMirror, WalkOrder};
