//! Cloud storage access.
//!
//! [`CloudProvider`] is the raw seam to a storage backend (the rclone CLI in production, an
//! in-memory fake in tests). Providers report [`NativeError`]s. The [`CloudGateway`] wraps a
//! provider with per-remote concurrency limits, bounded retries and cancellation, and is the
//! only place those native errors get classified.

mod gateway;
pub mod in_memory;
mod limiter;
pub mod rclone;

#[cfg(test)]
mod in_memory_test;

pub use gateway::CloudGateway;
pub use in_memory::{InMemoryProvider, InjectedFailure, ProviderOp};
pub use limiter::{CallKind, ConcurrencyLimiter, RetryPolicy};
pub use rclone::RcloneCli;

use crate::entry::RawEntry;
use crate::errors::NativeError;
use crate::path_ref::PathRef;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub type ProviderResult<T> = Result<T, NativeError>;

/// A configured remote, as listed by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteInfo {
    pub name: String,
    /// Backend type, like `drive`, `onedrive` or `s3`.
    pub kind: String,
}

/// Raw storage backend. Object-safe so the engine can hold an `Arc<dyn CloudProvider>`.
///
/// `copy` and `move_item` take full [`PathRef`]s because one side may be local (upload and
/// download) and the two sides may live on different remotes.
pub trait CloudProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    fn list<'a>(&'a self, remote: &'a str, rel_path: &'a str) -> BoxFuture<'a, ProviderResult<Vec<RawEntry>>>;

    fn stat<'a>(&'a self, remote: &'a str, rel_path: &'a str) -> BoxFuture<'a, ProviderResult<RawEntry>>;

    fn mkdir<'a>(&'a self, remote: &'a str, rel_path: &'a str) -> BoxFuture<'a, ProviderResult<()>>;

    /// Deletes a file, or a folder with everything in it.
    fn delete<'a>(&'a self, remote: &'a str, rel_path: &'a str, is_dir: bool) -> BoxFuture<'a, ProviderResult<()>>;

    /// Removes an empty folder. Fails if the folder has any entries.
    fn rmdir<'a>(&'a self, remote: &'a str, rel_path: &'a str) -> BoxFuture<'a, ProviderResult<()>>;

    fn copy<'a>(&'a self, src: &'a PathRef, dst: &'a PathRef, is_dir: bool) -> BoxFuture<'a, ProviderResult<()>>;

    fn move_item<'a>(&'a self, src: &'a PathRef, dst: &'a PathRef, is_dir: bool) -> BoxFuture<'a, ProviderResult<()>>;

    fn list_remotes(&self) -> BoxFuture<'_, ProviderResult<Vec<RemoteInfo>>>;

    /// Whether a whole folder can be copied or moved in one call. When false, the transfer
    /// engine walks the folder and moves entries one by one.
    fn supports_folder_transfer(&self) -> bool {
        true
    }
}
