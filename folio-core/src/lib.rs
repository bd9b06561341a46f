//! folio core library: identifiers, the file-operation model, named locks,
//! settings and work-directory layout.
//!
//! Public API surface:
//! - [`id`]: [`UniqueId`], the time-ordered commit / release identifier
//! - [`types`]: [`FileItem`], [`FileCollection`], [`FileCollectionGroup`]
//! - [`lock`]: [`NamedLock`], filesystem leases shared between processes
//! - [`config`]: [`Settings`] and key/value overrides
//! - [`paths`]: control-file layout under the work directory
//! - [`error`]: [`CoreError`], [`LockError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod id;
pub mod lock;
pub mod paths;
pub mod types;

pub use config::{ConfigLookup, EnvLookup, Settings};
pub use error::{ConfigError, CoreError, LockError};
pub use id::UniqueId;
pub use lock::{LeaseHandle, LeaseInfo, NamedLock};
pub use types::{
    Audience, FileCollection, FileCollectionGroup, FileItem, Operation, PublishStatus,
};
