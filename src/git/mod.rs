//! Git integration module.
//!
//! Provides:
//! - the bare-store adapter (objects, refs, remotes, recursive object copy)
//! - read-only views of the user's working repositories
//! - filesystem-to-tree synthesis with byte-exact git encoding

pub mod error;
pub mod store;
pub mod tree;
pub mod workdir;

pub use error::StoreError;
pub use store::{BareStore, HEAD_TRACKER, WORKDIR_REMOTE, meta_branch, meta_branch_ref};
pub use workdir::WorkdirRepo;
