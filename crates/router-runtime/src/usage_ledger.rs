//! The usage ledger contract the router consumes (spec.md §3.1 `UsageEvent`,
//! §6 "From collaborators").
//!
//! The ledger is an external collaborator: the router never depends on a
//! concrete storage backend, only on this trait, and treats every call as
//! fire-and-forget (spec.md §9 "Best-effort usage recording").

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Extra context folded into a [`UsageEvent`] beyond its top-level fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMetadata {
    /// The task's original `taskType`, e.g. `"agency.scope"`.
    pub task: String,
    /// Set when this event represents a cache hit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    /// Set when this event represents a failed generation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<bool>,
    /// Sanitised error string, present only when `failed` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One append-only record of a router call (spec.md §3.1 `UsageEvent`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    /// `"<module>:<task>:generate"`.
    pub action: String,
    /// Tenant the call was made on behalf of.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
    /// Acting user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Free-form tag carried through from the task unchanged.
    pub module_id: String,
    /// Prompt tokens consumed.
    pub tokens_input: u32,
    /// Completion tokens produced.
    pub tokens_output: u32,
    /// Brain Units charged.
    pub units: u64,
    /// Wall-clock duration of the call, in milliseconds.
    pub duration_ms: u64,
    /// Extra context.
    pub metadata: UsageMetadata,
}

/// External contract for recording [`UsageEvent`]s.
///
/// Implementations MUST be idempotent-safe to call repeatedly and MUST NOT
/// be allowed to fail the router: `router::handle`/`stream::handle_stream`
/// log a ledger error and continue rather than surfacing it (spec.md §7,
/// error taxonomy item 6).
#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Record one event. Returning `Err` only causes a log line; the
    /// generated data the event describes is never discarded on a ledger
    /// failure.
    async fn record_usage(&self, event: UsageEvent) -> Result<(), String>;
}

/// A ledger that only logs events through `tracing`, for use when no
/// external ledger is configured (tests, local/personal use).
#[derive(Debug, Clone, Default)]
pub struct LoggingUsageLedger;

#[async_trait]
impl UsageLedger for LoggingUsageLedger {
    async fn record_usage(&self, event: UsageEvent) -> Result<(), String> {
        tracing::info!(
            action = %event.action,
            principal_id = ?event.principal_id,
            module_id = %event.module_id,
            units = event.units,
            duration_ms = event.duration_ms,
            cached = ?event.metadata.cached,
            failed = ?event.metadata.failed,
            "usage event"
        );
        Ok(())
    }
}
