//! Resource-type handlers: the user-supplied implementations the reconciler
//! drives.

pub mod registry;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::storage::SourceRef;

// ─── Auth ───────────────────────────────────────────────────────────────────

/// Opaque credential handle; the engine never looks inside, it only rides
/// along in handler requests.
pub trait AuthProvider: Send + Sync + fmt::Debug {}

/// The no-credentials provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

impl AuthProvider for NoAuth {}

// ─── Errors ─────────────────────────────────────────────────────────────────

/// An error returned by a handler. Transient errors are retried with
/// backoff; permanent ones abort immediately.
#[derive(Debug)]
pub struct HandlerError {
    pub permanent: bool,
    pub error: anyhow::Error,
}

impl HandlerError {
    pub fn transient(error: impl Into<anyhow::Error>) -> Self {
        Self {
            permanent: false,
            error: error.into(),
        }
    }

    /// Wraps an error so the retry loop gives up on it immediately.
    pub fn permanent(error: impl Into<anyhow::Error>) -> Self {
        Self {
            permanent: true,
            error: error.into(),
        }
    }

    pub fn msg(message: impl fmt::Display) -> Self {
        Self::transient(anyhow::anyhow!("{}", message))
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.permanent {
            write!(f, "permanent: {}", self.error)
        } else {
            write!(f, "{}", self.error)
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(error: anyhow::Error) -> Self {
        Self::transient(error)
    }
}

// ─── Requests ───────────────────────────────────────────────────────────────

/// Request to create a resource that has no persisted prior state.
pub struct CreateRequest {
    pub project: String,
    pub name: String,
    /// Native input record, keyed by native field names.
    pub input: serde_json::Value,
    /// Lazily-opened source artifacts.
    pub sources: Vec<SourceRef>,
    pub auth: Arc<dyn AuthProvider>,
}

/// Request to update a resource whose configuration or sources changed.
pub struct UpdateRequest {
    pub project: String,
    pub name: String,
    pub input: serde_json::Value,
    /// The previous definition: one native record merging the prior input
    /// and prior output fields.
    pub previous: serde_json::Value,
    pub config_changed: bool,
    pub source_changed: bool,
    pub sources: Vec<SourceRef>,
    pub auth: Arc<dyn AuthProvider>,
}

/// Request to delete a resource no longer in the desired graph.
pub struct DeleteRequest {
    pub project: String,
    pub name: String,
    /// The previous definition, as in [`UpdateRequest`].
    pub previous: serde_json::Value,
    pub auth: Arc<dyn AuthProvider>,
}

/// A resource type's operations. Create and update return the full native
/// record with output fields populated; the engine extracts outputs through
/// the schema bridge.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn create(
        &self,
        ctx: CancellationToken,
        req: CreateRequest,
    ) -> Result<serde_json::Value, HandlerError>;

    async fn update(
        &self,
        ctx: CancellationToken,
        req: UpdateRequest,
    ) -> Result<serde_json::Value, HandlerError>;

    async fn delete(
        &self,
        ctx: CancellationToken,
        req: DeleteRequest,
    ) -> Result<(), HandlerError>;
}
