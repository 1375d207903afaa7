//! The engine's single entry point to cloud storage.

use super::limiter::{CallKind, ConcurrencyLimiter, RetryPolicy};
use super::{CloudProvider, RemoteInfo};
use crate::entry::RawEntry;
use crate::errors::{EngineError, ErrorCode};
use crate::path_ref::PathRef;
use log::debug;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Limiter key for calls that aren't about one remote (remote discovery).
const DISCOVERY_GATE: &str = "*discovery*";

/// Wraps a [`CloudProvider`] with per-remote limits and retries, and classifies every native
/// error it returns. Read calls honor the caller's token. Write calls, once started, always
/// report their real outcome so a committed change is never reported as cancelled.
pub struct CloudGateway {
    provider: Arc<dyn CloudProvider>,
    limiter: ConcurrencyLimiter,
}

/// The remote a copy or move is limited under: the destination's, or the source's for downloads.
fn transfer_scope<'a>(src: &'a PathRef, dst: &'a PathRef) -> Result<&'a str, EngineError> {
    dst.remote()
        .or_else(|| src.remote())
        .ok_or_else(|| EngineError::new(ErrorCode::Unsupported, "Local-to-local transfers don't go through the cloud gateway"))
}

fn cloud_parts(path: &PathRef) -> Result<(&str, &str), EngineError> {
    match path {
        PathRef::Cloud { remote, rel_path } => Ok((remote, rel_path)),
        PathRef::Local(_) => Err(EngineError::new(ErrorCode::Unsupported, "Not a cloud path").with_path(path)),
    }
}

impl CloudGateway {
    pub fn new(provider: Arc<dyn CloudProvider>, per_remote: usize, retry: RetryPolicy) -> Self {
        Self {
            provider,
            limiter: ConcurrencyLimiter::new(per_remote, retry),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn supports_folder_transfer(&self) -> bool {
        self.provider.supports_folder_transfer()
    }

    /// Calls currently in flight against `remote`.
    pub fn in_flight(&self, remote: &str) -> usize {
        self.limiter.in_flight(remote)
    }

    pub async fn list(&self, folder: &PathRef, token: &CancellationToken) -> Result<Vec<RawEntry>, EngineError> {
        let (remote, rel) = cloud_parts(folder)?;
        let provider = Arc::clone(&self.provider);
        let start = Instant::now();
        let result = self
            .limiter
            .run(remote, "list", CallKind::Idempotent, token, || {
                let provider = Arc::clone(&provider);
                async move { provider.list(remote, rel).await.map_err(|e| e.into_engine_error(folder)) }
            })
            .await;
        debug!(
            "CloudGateway list [{}]: {} in {}ms",
            folder,
            match &result {
                Ok(entries) => format!("{} entries", entries.len()),
                Err(e) => e.code.to_string(),
            },
            start.elapsed().as_millis()
        );
        result
    }

    pub async fn stat(&self, path: &PathRef, token: &CancellationToken) -> Result<RawEntry, EngineError> {
        let (remote, rel) = cloud_parts(path)?;
        let provider = Arc::clone(&self.provider);
        self.limiter
            .run(remote, "stat", CallKind::Idempotent, token, || {
                let provider = Arc::clone(&provider);
                async move { provider.stat(remote, rel).await.map_err(|e| e.into_engine_error(path)) }
            })
            .await
    }

    pub async fn mkdir(&self, path: &PathRef) -> Result<(), EngineError> {
        let (remote, rel) = cloud_parts(path)?;
        let provider = Arc::clone(&self.provider);
        debug!("CloudGateway mkdir [{path}]");
        self.limiter
            .run(remote, "mkdir", CallKind::Idempotent, &CancellationToken::new(), || {
                let provider = Arc::clone(&provider);
                async move { provider.mkdir(remote, rel).await.map_err(|e| e.into_engine_error(path)) }
            })
            .await
    }

    pub async fn delete(&self, path: &PathRef, is_dir: bool) -> Result<(), EngineError> {
        let (remote, rel) = cloud_parts(path)?;
        let provider = Arc::clone(&self.provider);
        debug!("CloudGateway delete [{path}]: is_dir={is_dir}");
        self.limiter
            .run(remote, "delete", CallKind::Mutating, &CancellationToken::new(), || {
                let provider = Arc::clone(&provider);
                async move {
                    provider
                        .delete(remote, rel, is_dir)
                        .await
                        .map_err(|e| e.into_engine_error(path))
                }
            })
            .await
    }

    /// Removes `path` only if it is an empty folder.
    pub async fn rmdir(&self, path: &PathRef) -> Result<(), EngineError> {
        let (remote, rel) = cloud_parts(path)?;
        let provider = Arc::clone(&self.provider);
        debug!("CloudGateway rmdir [{path}]");
        self.limiter
            .run(remote, "rmdir", CallKind::Mutating, &CancellationToken::new(), || {
                let provider = Arc::clone(&provider);
                async move { provider.rmdir(remote, rel).await.map_err(|e| e.into_engine_error(path)) }
            })
            .await
    }

    pub async fn copy(&self, src: &PathRef, dst: &PathRef, is_dir: bool) -> Result<(), EngineError> {
        let scope = transfer_scope(src, dst)?;
        let provider = Arc::clone(&self.provider);
        let start = Instant::now();
        let result = self
            .limiter
            .run(scope, "copy", CallKind::Mutating, &CancellationToken::new(), || {
                let provider = Arc::clone(&provider);
                async move { provider.copy(src, dst, is_dir).await.map_err(|e| e.into_engine_error(src)) }
            })
            .await;
        debug!(
            "CloudGateway copy [{} -> {}]: ok={} in {}ms",
            src,
            dst,
            result.is_ok(),
            start.elapsed().as_millis()
        );
        result
    }

    pub async fn move_item(&self, src: &PathRef, dst: &PathRef, is_dir: bool) -> Result<(), EngineError> {
        let scope = transfer_scope(src, dst)?;
        let provider = Arc::clone(&self.provider);
        let start = Instant::now();
        let result = self
            .limiter
            .run(scope, "move", CallKind::Mutating, &CancellationToken::new(), || {
                let provider = Arc::clone(&provider);
                async move {
                    provider
                        .move_item(src, dst, is_dir)
                        .await
                        .map_err(|e| e.into_engine_error(src))
                }
            })
            .await;
        debug!(
            "CloudGateway move [{} -> {}]: ok={} in {}ms",
            src,
            dst,
            result.is_ok(),
            start.elapsed().as_millis()
        );
        result
    }

    pub async fn list_remotes(&self, token: &CancellationToken) -> Result<Vec<RemoteInfo>, EngineError> {
        let provider = Arc::clone(&self.provider);
        self.limiter
            .run(DISCOVERY_GATE, "list_remotes", CallKind::Idempotent, token, || {
                let provider = Arc::clone(&provider);
                async move {
                    provider
                        .list_remotes()
                        .await
                        .map_err(|e| e.into_engine_error("remotes"))
                }
            })
            .await
    }
}
