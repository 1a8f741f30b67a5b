use thiserror::Error;

use crate::git::StoreError;
use crate::meta::MetaError;
use crate::sync::SyncError;
use crate::workdir::WorkdirError;

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over the capability errors. Every
/// error aborts the whole invocation; there is no partial success and no
/// retry.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Meta(#[from] MetaError),

    #[error(transparent)]
    Workdir(#[from] WorkdirError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub type Result<T> = std::result::Result<T, Error>;
