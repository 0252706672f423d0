use std::collections::HashMap;
use std::sync::Arc;

use conduit_types::{CreditReservation, ErrorCode, OrchestratorError, ReservationStatus, Run};
use tokio::sync::RwLock;

/// Tracks the single active `CreditReservation` per run and enforces
/// `credits_consumed <= credits_reserved` (§4.7, §8 invariant). A run has at most one
/// active reservation; `reserve` on a run that already has one is an error rather than
/// silently replacing it, since a second reservation would double-count budget.
#[derive(Clone, Default)]
pub struct CreditManager {
    reservations: Arc<RwLock<HashMap<String, CreditReservation>>>,
}

impl CreditManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reserve(&self, run: &mut Run, amount: u64) -> Result<(), OrchestratorError> {
        let mut guard = self.reservations.write().await;
        if let Some(existing) = guard.get(&run.id) {
            if existing.status == ReservationStatus::Active {
                return Err(OrchestratorError::new(
                    ErrorCode::InsufficientCredits,
                    format!("run {} already holds an active reservation", run.id),
                ));
            }
        }
        let reservation = CreditReservation::new(&run.id, amount);
        guard.insert(run.id.clone(), reservation);
        run.credits_reserved = amount;
        Ok(())
    }

    /// Debits `amount` against the run's reservation. Fails with `InsufficientCredits`
    /// rather than let `credits_consumed` exceed `credits_reserved`.
    pub async fn consume(&self, run: &mut Run, amount: u64) -> Result<(), OrchestratorError> {
        if run.credits_consumed.saturating_add(amount) > run.credits_reserved {
            return Err(OrchestratorError::new(
                ErrorCode::InsufficientCredits,
                format!(
                    "consuming {} would exceed reservation of {} ({} already consumed)",
                    amount, run.credits_reserved, run.credits_consumed
                ),
            ));
        }
        run.credits_consumed += amount;
        Ok(())
    }

    /// Marks the reservation spent on run completion. Any unconsumed remainder is
    /// simply not refunded — finalize is for the success path, `release` is for
    /// the early-exit path.
    pub async fn finalize(&self, run_id: &str) {
        if let Some(reservation) = self.reservations.write().await.get_mut(run_id) {
            reservation.status = ReservationStatus::Consumed;
        }
    }

    /// Releases the reservation on cancellation, failure, or timeout (terminal
    /// non-completion), freeing the credits the run never spent.
    pub async fn release(&self, run_id: &str) {
        if let Some(reservation) = self.reservations.write().await.get_mut(run_id) {
            reservation.status = ReservationStatus::Released;
        }
    }

    pub async fn reservation_for(&self, run_id: &str) -> Option<CreditReservation> {
        self.reservations.read().await.get(run_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_types::RunConfig;

    fn new_run() -> Run {
        Run::new("run-1".to_string(), "tenant-1".to_string(), "user-1".to_string(), "do x".to_string(), RunConfig::default())
    }

    #[tokio::test]
    async fn reserve_then_consume_within_budget_succeeds() {
        let manager = CreditManager::new();
        let mut run = new_run();
        manager.reserve(&mut run, 100).await.unwrap();
        manager.consume(&mut run, 40).await.unwrap();
        assert_eq!(run.credits_consumed, 40);
        assert_eq!(run.remaining_credits(), 60);
    }

    #[tokio::test]
    async fn consume_beyond_reservation_fails() {
        let manager = CreditManager::new();
        let mut run = new_run();
        manager.reserve(&mut run, 50).await.unwrap();
        manager.consume(&mut run, 30).await.unwrap();
        let err = manager.consume(&mut run, 30).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InsufficientCredits);
        assert_eq!(run.credits_consumed, 30);
    }

    #[tokio::test]
    async fn double_reserve_without_releasing_first_fails() {
        let manager = CreditManager::new();
        let mut run = new_run();
        manager.reserve(&mut run, 50).await.unwrap();
        let err = manager.reserve(&mut run, 50).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InsufficientCredits);
    }

    #[tokio::test]
    async fn release_allows_a_fresh_reservation() {
        let manager = CreditManager::new();
        let mut run = new_run();
        manager.reserve(&mut run, 50).await.unwrap();
        manager.release(&run.id).await;
        manager.reserve(&mut run, 20).await.unwrap();
        assert_eq!(run.credits_reserved, 20);
    }
}
