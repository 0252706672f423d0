use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Consumed,
    Released,
}

/// A run has at most one active reservation at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditReservation {
    pub id: String,
    pub run_id: String,
    pub amount: u64,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
}

impl CreditReservation {
    pub fn new(run_id: &str, amount: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            amount,
            status: ReservationStatus::Active,
            created_at: Utc::now(),
        }
    }
}
