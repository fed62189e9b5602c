//! Event types for the carvet event system
//!
//! Provides shared event definitions and EventBus for carvet services.
//! Events are broadcast via EventBus and can be serialized for SSE
//! transmission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Verification lifecycle status of a vehicle listing
///
/// Shared vocabulary between the listing backend (which displays it) and the
/// verification service (which owns the transitions). Stored in the database
/// as the snake_case string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// No verification attempt has run yet (or a stale attempt was reset)
    Pending,
    /// An attempt is currently running
    InProgress,
    /// Listing claims confirmed against the photos
    Verified,
    /// Rejected: non-vehicle content, low confidence, or attempt error
    Failed,
    /// Mid-band confidence; requires human adjudication
    ManualReview,
}

impl VerificationStatus {
    /// Database / wire string form
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::InProgress => "in_progress",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Failed => "failed",
            VerificationStatus::ManualReview => "manual_review",
        }
    }

    /// Parse the database string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(VerificationStatus::Pending),
            "in_progress" => Some(VerificationStatus::InProgress),
            "verified" => Some(VerificationStatus::Verified),
            "failed" => Some(VerificationStatus::Failed),
            "manual_review" => Some(VerificationStatus::ManualReview),
            _ => None,
        }
    }

    /// Terminal states are the outcome of a completed attempt
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VerificationStatus::Verified
                | VerificationStatus::Failed
                | VerificationStatus::ManualReview
        )
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Carvet event types
///
/// Shared across carvet services; each variant carries its own timestamp so
/// SSE consumers can order events without relying on delivery order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CarvetEvent {
    /// A verification attempt started for a listing
    VerificationStarted {
        /// Listing UUID under verification
        vehicle_guid: Uuid,
        /// Attempt number this run will become if it completes with a score
        attempt_number: u32,
        /// When the attempt started
        timestamp: DateTime<Utc>,
    },

    /// A verification attempt completed with a scored outcome
    VerificationCompleted {
        /// Listing UUID
        vehicle_guid: Uuid,
        /// Decided status (verified / failed / manual_review)
        status: VerificationStatus,
        /// Overall confidence score (0-100)
        score: f64,
        /// When the attempt completed
        timestamp: DateTime<Utc>,
    },

    /// A verification attempt failed before producing a score
    VerificationFailed {
        /// Listing UUID
        vehicle_guid: Uuid,
        /// Error recorded on the attempt
        error: String,
        /// When the failure was recorded
        timestamp: DateTime<Utc>,
    },
}

impl CarvetEvent {
    /// SSE event name for this variant
    pub fn event_type(&self) -> &'static str {
        match self {
            CarvetEvent::VerificationStarted { .. } => "VerificationStarted",
            CarvetEvent::VerificationCompleted { .. } => "VerificationCompleted",
            CarvetEvent::VerificationFailed { .. } => "VerificationFailed",
        }
    }
}

/// Broadcast event bus
///
/// Thin wrapper over `tokio::sync::broadcast`; slow subscribers drop old
/// events rather than blocking emitters.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CarvetEvent>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<CarvetEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns the subscriber count, or an error if nobody is listening.
    pub fn emit(&self, event: CarvetEvent) -> std::result::Result<usize, String> {
        self.tx
            .send(event)
            .map_err(|e| format!("No subscribers: {}", e))
    }

    /// Emit an event, ignoring the no-subscribers case
    ///
    /// Verification must proceed whether or not an SSE client is connected.
    pub fn emit_lossy(&self, event: CarvetEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::trace!("Event dropped (no subscribers): {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_round_trip() {
        for status in [
            VerificationStatus::Pending,
            VerificationStatus::InProgress,
            VerificationStatus::Verified,
            VerificationStatus::Failed,
            VerificationStatus::ManualReview,
        ] {
            assert_eq!(VerificationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(VerificationStatus::parse("bogus"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(!VerificationStatus::Pending.is_terminal());
        assert!(!VerificationStatus::InProgress.is_terminal());
        assert!(VerificationStatus::Verified.is_terminal());
        assert!(VerificationStatus::Failed.is_terminal());
        assert!(VerificationStatus::ManualReview.is_terminal());
    }

    #[tokio::test]
    async fn event_bus_delivers_to_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit_lossy(CarvetEvent::VerificationFailed {
            vehicle_guid: Uuid::new_v4(),
            error: "timeout".to_string(),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.expect("event delivered");
        assert_eq!(event.event_type(), "VerificationFailed");
    }

    #[test]
    fn emit_without_subscribers_is_err_but_lossy_is_silent() {
        let bus = EventBus::new(16);
        let result = bus.emit(CarvetEvent::VerificationStarted {
            vehicle_guid: Uuid::new_v4(),
            attempt_number: 1,
            timestamp: Utc::now(),
        });
        assert!(result.is_err());

        // Must not panic
        bus.emit_lossy(CarvetEvent::VerificationStarted {
            vehicle_guid: Uuid::new_v4(),
            attempt_number: 1,
            timestamp: Utc::now(),
        });
    }
}
