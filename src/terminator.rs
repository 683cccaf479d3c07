//! Terminator (§4.6): a recurring sweep that fails out pending requests
//! older than the deadline.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use serde_json::json;

use crate::shared::Shared;

pub struct Terminator {
    shared: Arc<Shared>,
    deadline_ms: i64,
    sweep_interval: Duration,
}

impl Terminator {
    pub fn new(shared: Arc<Shared>, deadline_ms: i64, sweep_interval_ms: u64) -> Self {
        Self {
            shared,
            deadline_ms,
            sweep_interval: Duration::from_millis(sweep_interval_ms),
        }
    }

    /// Runs one sweep, failing out every expired record with a 504 and the
    /// `SERVICE_TIMEOUT` envelope (§6).
    pub fn sweep_once(&self) {
        let expired = self.shared.sweep(self.deadline_ms);
        for record in expired {
            tracing::info!(msg_id = %record.uid, "request timed out, responding 504");
            let body = json!({
                "status": "FAIL",
                "error": { "message": "request timed out waiting for a reply", "code": "SERVICE_TIMEOUT" }
            });
            let response = (axum::http::StatusCode::GATEWAY_TIMEOUT, Json(body));
            let _ = record
                .responder
                .send(axum::response::IntoResponse::into_response(response));
        }
    }

    /// Runs the periodic sweep loop until `shutdown` resolves, then performs
    /// one final sweep before returning (§5 shutdown note).
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.sweep_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep_once(),
                _ = shutdown.changed() => {
                    self.sweep_once();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request_table::PendingRequest;
    use chrono::{Duration as ChronoDuration, Utc};
    use tokio::sync::oneshot;

    #[test]
    fn sweep_once_responds_504_to_expired_requests() {
        let shared = Arc::new(Shared::new());
        let id = shared.allocate();
        let (tx, rx) = oneshot::channel();

        shared
            .insert_pending(PendingRequest {
                uid: id,
                responder: tx,
                completion: Box::new(|_, _, _| {}),
                timestamp: Utc::now() - ChronoDuration::milliseconds(20_000),
                validator: None,
            })
            .unwrap();

        let terminator = Terminator::new(shared.clone(), 15_000, 2_000);
        terminator.sweep_once();

        let response = rx.try_recv().unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(shared.pending_count(), 0);
    }

    #[test]
    fn sweep_once_leaves_fresh_requests_alone() {
        let shared = Arc::new(Shared::new());
        let id = shared.allocate();
        let (tx, _rx) = oneshot::channel();

        shared
            .insert_pending(PendingRequest {
                uid: id,
                responder: tx,
                completion: Box::new(|_, _, _| {}),
                timestamp: Utc::now(),
                validator: None,
            })
            .unwrap();

        let terminator = Terminator::new(shared.clone(), 15_000, 2_000);
        terminator.sweep_once();
        assert_eq!(shared.pending_count(), 1);
    }
}
