//! Audit write helper shared by the engine components.
//!
//! Audit entries are best-effort: a failure to record one is reported on
//! the tracing side and never fails the operation being audited.

use tracing::error;
use turnstile_core::AuditOp;
use turnstile_db::Database;

pub(crate) async fn audit(db: &Database, machine_id: Option<i64>, op: AuditOp, message: &str) {
    if let Err(e) = db.audit().append(machine_id, op, message).await {
        error!(operation = %op, error = %e, "failed to write audit entry");
    }
}
