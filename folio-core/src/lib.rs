//! Folio Core - Identity, Permission and Error Types
//!
//! Pure data structures shared by the storage and API crates. Nothing here
//! performs I/O.

pub mod error;
pub mod identity;
pub mod permission;

pub use error::{
    CacheError, ConfigError, FolioError, FolioResult, PermissionError, StorageError,
};
pub use identity::{Role, UserId};
pub use permission::{ActionKind, Permission, PermissionSet, ResourceKind};
