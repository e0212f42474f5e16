use super::{Document, DocumentStore, Entry};
use crate::error::{FlowError, FlowResult};
use crate::storage::Storage;
use crate::utils::tail_chars;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Calling,
    Completed,
    Failed,
}

impl ReservationStatus {
    /// Status only moves forward: pending -> calling -> completed | failed.
    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (ReservationStatus::Pending, ReservationStatus::Calling)
                | (ReservationStatus::Calling, ReservationStatus::Completed)
                | (ReservationStatus::Calling, ReservationStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Completed | ReservationStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Calling => "calling",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    /// Id of the call that made the reservation.
    pub id: String,
    pub original_caller: String,
    pub callback_number: String,
    pub requested_at: DateTime<Utc>,
    pub status: ReservationStatus,
    pub estimated_callback_time: DateTime<Utc>,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_sid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_started_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn new(
        call_id: &str,
        original_caller: &str,
        callback_number: &str,
        now: DateTime<Utc>,
        eta_minutes: i64,
    ) -> Self {
        Self {
            id: call_id.to_string(),
            original_caller: original_caller.to_string(),
            callback_number: callback_number.to_string(),
            requested_at: now,
            status: ReservationStatus::Pending,
            estimated_callback_time: now + Duration::minutes(eta_minutes),
            priority: Priority::Normal,
            call_sid: None,
            callback_started_at: None,
        }
    }

    /// Short code read back to the caller.
    pub fn code(&self) -> String {
        tail_chars(&self.id, 4)
    }
}

impl Document for Reservation {
    const NAMESPACE: &'static str = "reservations";

    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReservationSummary {
    pub total: usize,
    pub pending: usize,
    pub calling: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct ReservationStore {
    docs: DocumentStore<Reservation>,
}

impl ReservationStore {
    pub async fn open(storage: Storage) -> Result<Self> {
        Ok(Self {
            docs: DocumentStore::open(storage).await?,
        })
    }

    /// Persists `reservation` unless one already exists under its id.
    /// Returns the stored reservation and whether it was created now.
    pub async fn create_if_absent(&self, reservation: Reservation) -> FlowResult<(Reservation, bool)> {
        let mut entry = self.docs.lock(&reservation.id).await;
        if let Some(existing) = entry.get() {
            return Ok((existing.clone(), false));
        }
        entry.put(reservation.clone()).await?;
        info!(
            reservation = %reservation.id,
            callback_number = %reservation.callback_number,
            "reservation created"
        );
        Ok((reservation, true))
    }

    pub async fn get(&self, id: &str) -> Option<Reservation> {
        self.docs.get(id).await
    }

    /// Exclusive section for a reservation that must already exist.
    pub async fn lock_existing(&self, id: &str) -> FlowResult<Entry<Reservation>> {
        if self.docs.get(id).await.is_none() {
            return Err(FlowError::not_found("reservation", id));
        }
        Ok(self.docs.lock(id).await)
    }

    /// Applies a carrier-reported outcome. Returns the updated reservation,
    /// or `None` when the transition is not allowed from the current status.
    pub async fn advance(
        &self,
        id: &str,
        next: ReservationStatus,
    ) -> FlowResult<Option<Reservation>> {
        let mut entry = self.lock_existing(id).await?;
        let Some(current) = entry.get().cloned() else {
            return Err(FlowError::not_found("reservation", id));
        };
        if current.status.is_terminal() {
            // carriers repeat final statuses; the first one wins
            debug!(reservation = %id, status = %current.status, "reservation already finished");
            return Ok(None);
        }
        if !current.status.can_transition_to(next) {
            warn!(
                reservation = %id,
                from = %current.status,
                to = %next,
                "ignoring reservation transition"
            );
            return Ok(None);
        }
        let updated = Reservation {
            status: next,
            ..current
        };
        entry.put(updated.clone()).await?;
        info!(reservation = %id, status = %next, "reservation advanced");
        Ok(Some(updated))
    }

    /// All reservations, newest first.
    pub async fn list(&self) -> Vec<Reservation> {
        let mut all = self.docs.values().await;
        all.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        all
    }

    pub async fn summary(&self) -> ReservationSummary {
        summarize(&self.docs.values().await)
    }
}

pub fn summarize(reservations: &[Reservation]) -> ReservationSummary {
    let mut summary = ReservationSummary {
        total: reservations.len(),
        ..Default::default()
    };
    for r in reservations {
        match r.status {
            ReservationStatus::Pending => summary.pending += 1,
            ReservationStatus::Calling => summary.calling += 1,
            ReservationStatus::Completed => summary.completed += 1,
            ReservationStatus::Failed => summary.failed += 1,
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, minutes_ago: i64) -> Reservation {
        Reservation::new(
            id,
            "+819011112222",
            "+819012345678",
            Utc::now() - Duration::minutes(minutes_ago),
            30,
        )
    }

    #[test]
    fn test_status_transitions() {
        use ReservationStatus::*;
        assert!(Pending.can_transition_to(Calling));
        assert!(Calling.can_transition_to(Completed));
        assert!(Calling.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Calling.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Calling));
        assert!(Completed.is_terminal());
        assert!(!Calling.is_terminal());
    }

    #[test]
    fn test_reservation_json_shape() {
        let r = sample("CAabcd1234", 0);
        let value = serde_json::to_value(&r).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["priority"], "normal");
        assert_eq!(value["callbackNumber"], "+819012345678");
        assert!(value.get("callSid").is_none());
        assert_eq!(r.code(), "1234");
        assert_eq!(
            (r.estimated_callback_time - r.requested_at).num_minutes(),
            30
        );
    }

    #[tokio::test]
    async fn test_create_is_one_shot() -> Result<()> {
        let store = ReservationStore::open(Storage::memory()).await?;
        let (first, created) = store.create_if_absent(sample("CA1", 0)).await?;
        assert!(created);

        let mut second = sample("CA1", 0);
        second.callback_number = "+819099998888".to_string();
        let (stored, created) = store.create_if_absent(second).await?;
        assert!(!created);
        assert_eq!(stored, first);
        assert_eq!(store.list().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_newest_first_and_summary() -> Result<()> {
        let store = ReservationStore::open(Storage::memory()).await?;
        store.create_if_absent(sample("CAold", 20)).await?;
        store.create_if_absent(sample("CAnew", 1)).await?;
        store.create_if_absent(sample("CAmid", 10)).await?;

        let ids: Vec<String> = store.list().await.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["CAnew", "CAmid", "CAold"]);

        let mut entry = store.lock_existing("CAmid").await?;
        let mut calling = entry.get().cloned().unwrap();
        calling.status = ReservationStatus::Calling;
        entry.put(calling).await?;
        drop(entry);

        let summary = store.summary().await;
        assert_eq!(summary.total, 3);
        assert_eq!(summary.pending, 2);
        assert_eq!(summary.calling, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_advance_only_moves_forward() -> Result<()> {
        let store = ReservationStore::open(Storage::memory()).await?;
        store.create_if_absent(sample("CA9", 0)).await?;

        assert!(store
            .advance("CA9", ReservationStatus::Completed)
            .await?
            .is_none());
        assert!(store
            .advance("CA9", ReservationStatus::Calling)
            .await?
            .is_some());
        let done = store.advance("CA9", ReservationStatus::Failed).await?;
        assert_eq!(done.map(|r| r.status), Some(ReservationStatus::Failed));
        assert!(store
            .advance("CA9", ReservationStatus::Completed)
            .await?
            .is_none());
        assert_eq!(
            store.get("CA9").await.map(|r| r.status),
            Some(ReservationStatus::Failed)
        );

        let missing = store.advance("CAnone", ReservationStatus::Calling).await;
        assert!(matches!(missing, Err(FlowError::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_reservations_survive_reopen() -> Result<()> {
        let storage = Storage::memory();
        {
            let store = ReservationStore::open(storage.clone()).await?;
            store.create_if_absent(sample("CApersist", 0)).await?;
        }
        let store = ReservationStore::open(storage).await?;
        assert!(store.get("CApersist").await.is_some());
        Ok(())
    }
}
