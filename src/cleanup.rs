//! Scheduled cleanup of expired registration state and idle rate-limit entries.

use crate::db::Database;
use crate::rate_limit::AdmissionPolicy;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// Run all store cleanup tasks once.
pub async fn run_cleanup(db: &Database) {
    // Pending users first, so their invitations still tell us which are live
    match db.users().cleanup_pending().await {
        Ok(count) if count > 0 => info!("Cleaned up {} pending users", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up pending users: {}", e),
    }

    match db.users().delete_expired_invitations().await {
        Ok(count) if count > 0 => info!("Cleaned up {} expired invitations", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up expired invitations: {}", e),
    }
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(
    db: Database,
    admission: Option<Arc<dyn AdmissionPolicy>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            run_cleanup(&db).await;
            if let Some(policy) = &admission {
                policy.sweep();
            }
        }
    })
}
