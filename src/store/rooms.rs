use super::{Document, DocumentStore};
use crate::error::{FlowError, FlowResult};
use crate::storage::Storage;
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum RoomAccess {
    Open,
    Pin { pin: String },
}

/// A bookable room, fixed at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomDefinition {
    pub code: String,
    pub name: String,
    pub max_participants: usize,
    pub access: RoomAccess,
}

impl RoomDefinition {
    pub fn requires_pin(&self) -> bool {
        matches!(self.access, RoomAccess::Pin { .. })
    }

    pub fn check_pin(&self, entered: &str) -> bool {
        match &self.access {
            RoomAccess::Open => true,
            RoomAccess::Pin { pin } => pin == entered,
        }
    }

    /// Conference name used on the carrier side.
    pub fn conference_name(&self) -> String {
        format!("room-{}", self.code)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub call_id: String,
    pub phone_number: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomAction {
    Join,
    Leave,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub action: RoomAction,
    pub call_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: String,
    pub url: String,
    pub duration_seconds: u32,
    pub created_at: DateTime<Utc>,
}

/// Live and historical state of one room code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomState {
    pub code: String,
    pub participants: Vec<Participant>,
    pub history: Vec<HistoryEntry>,
    pub recordings: Vec<Recording>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl RoomState {
    fn new(code: &str, now: DateTime<Utc>) -> Self {
        Self {
            code: code.to_string(),
            participants: Vec::new(),
            history: Vec::new(),
            recordings: Vec::new(),
            created_at: now,
            ended_at: None,
        }
    }

    pub fn has_participant(&self, call_id: &str) -> bool {
        self.participants.iter().any(|p| p.call_id == call_id)
    }
}

impl Document for RoomState {
    const NAMESPACE: &'static str = "rooms";

    fn key(&self) -> &str {
        &self.code
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Participants in the room after the join.
    pub participants: usize,
    /// The call was already in the room; nothing changed.
    pub rejoined: bool,
}

pub struct RoomStore {
    docs: DocumentStore<RoomState>,
}

impl RoomStore {
    pub async fn open(storage: Storage) -> Result<Self> {
        Ok(Self {
            docs: DocumentStore::open(storage).await?,
        })
    }

    pub async fn get(&self, code: &str) -> Option<RoomState> {
        self.docs.get(code).await
    }

    pub async fn occupancy(&self, code: &str) -> usize {
        self.docs
            .get(code)
            .await
            .map(|s| s.participants.len())
            .unwrap_or(0)
    }

    /// Check capacity and take a seat in one exclusive section.
    pub async fn try_join(
        &self,
        room: &RoomDefinition,
        call_id: &str,
        phone_number: &str,
    ) -> FlowResult<JoinOutcome> {
        let mut entry = self.docs.lock(&room.code).await;
        let now = Utc::now();
        let mut state = entry
            .get()
            .cloned()
            .unwrap_or_else(|| RoomState::new(&room.code, now));

        if state.has_participant(call_id) {
            debug!(room = %room.code, call_id, "participant already in room");
            return Ok(JoinOutcome {
                participants: state.participants.len(),
                rejoined: true,
            });
        }
        if state.participants.len() >= room.max_participants {
            return Err(FlowError::CapacityExceeded {
                room: room.code.clone(),
                max: room.max_participants,
            });
        }

        state.participants.push(Participant {
            call_id: call_id.to_string(),
            phone_number: phone_number.to_string(),
            joined_at: now,
        });
        state.history.push(HistoryEntry {
            action: RoomAction::Join,
            call_id: call_id.to_string(),
            timestamp: now,
        });
        let participants = state.participants.len();
        entry.put(state).await?;
        info!(room = %room.code, call_id, participants, "participant joined");
        Ok(JoinOutcome {
            participants,
            rejoined: false,
        })
    }

    /// Returns whether the call was in the room.
    pub async fn leave(&self, code: &str, call_id: &str) -> FlowResult<bool> {
        let mut entry = self.docs.lock(code).await;
        let Some(mut state) = entry.get().cloned() else {
            return Ok(false);
        };
        let before = state.participants.len();
        state.participants.retain(|p| p.call_id != call_id);
        if state.participants.len() == before {
            return Ok(false);
        }
        state.history.push(HistoryEntry {
            action: RoomAction::Leave,
            call_id: call_id.to_string(),
            timestamp: Utc::now(),
        });
        let remaining = state.participants.len();
        entry.put(state).await?;
        info!(room = %code, call_id, remaining, "participant left");
        Ok(true)
    }

    /// Clears participants and stamps the end time. History and recordings stay.
    pub async fn end_conference(&self, code: &str) -> FlowResult<bool> {
        let mut entry = self.docs.lock(code).await;
        let Some(mut state) = entry.get().cloned() else {
            return Ok(false);
        };
        state.participants.clear();
        state.ended_at = Some(Utc::now());
        entry.put(state).await?;
        info!(room = %code, "conference ended");
        Ok(true)
    }

    /// Returns false when the recording was already stored or the room has no state.
    pub async fn add_recording(&self, code: &str, recording: Recording) -> FlowResult<bool> {
        let mut entry = self.docs.lock(code).await;
        let Some(mut state) = entry.get().cloned() else {
            warn!(room = %code, recording = %recording.id, "recording for unknown room state");
            return Ok(false);
        };
        if state.recordings.iter().any(|r| r.id == recording.id) {
            debug!(room = %code, recording = %recording.id, "duplicate recording callback");
            return Ok(false);
        }
        info!(
            room = %code,
            recording = %recording.id,
            duration = recording.duration_seconds,
            "recording stored"
        );
        state.recordings.push(recording);
        entry.put(state).await?;
        Ok(true)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomOverview {
    pub code: String,
    pub name: String,
    pub max_participants: usize,
    pub requires_pin: bool,
    pub participants: usize,
    pub recordings: usize,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDetail {
    pub code: String,
    pub name: String,
    pub max_participants: usize,
    pub requires_pin: bool,
    pub state: Option<RoomState>,
}

/// Static room definitions joined with their durable state.
pub struct RoomRegistry {
    definitions: Vec<RoomDefinition>,
    index: HashMap<String, usize>,
    store: RoomStore,
}

impl RoomRegistry {
    /// Fails when two definitions share a code.
    pub fn new(definitions: Vec<RoomDefinition>, store: RoomStore) -> Result<Self> {
        let mut index = HashMap::with_capacity(definitions.len());
        for (i, def) in definitions.iter().enumerate() {
            if index.insert(def.code.clone(), i).is_some() {
                bail!("room code {} is defined more than once", def.code);
            }
        }
        Ok(Self {
            definitions,
            index,
            store,
        })
    }

    pub fn definition(&self, code: &str) -> Option<&RoomDefinition> {
        self.index.get(code).map(|&i| &self.definitions[i])
    }

    pub fn lookup(&self, code: &str) -> FlowResult<&RoomDefinition> {
        self.definition(code)
            .ok_or_else(|| FlowError::not_found("room", code))
    }

    pub fn definitions(&self) -> &[RoomDefinition] {
        &self.definitions
    }

    pub fn store(&self) -> &RoomStore {
        &self.store
    }

    pub async fn occupancy(&self, code: &str) -> usize {
        self.store.occupancy(code).await
    }

    pub async fn join(
        &self,
        code: &str,
        call_id: &str,
        phone_number: &str,
    ) -> FlowResult<JoinOutcome> {
        let room = self.lookup(code)?;
        self.store.try_join(room, call_id, phone_number).await
    }

    pub async fn overview(&self) -> Vec<RoomOverview> {
        let mut rooms = Vec::with_capacity(self.definitions.len());
        for def in &self.definitions {
            let state = self.store.get(&def.code).await;
            rooms.push(RoomOverview {
                code: def.code.clone(),
                name: def.name.clone(),
                max_participants: def.max_participants,
                requires_pin: def.requires_pin(),
                participants: state.as_ref().map(|s| s.participants.len()).unwrap_or(0),
                recordings: state.as_ref().map(|s| s.recordings.len()).unwrap_or(0),
                ended_at: state.and_then(|s| s.ended_at),
            });
        }
        rooms
    }

    pub async fn detail(&self, code: &str) -> FlowResult<RoomDetail> {
        let def = self.lookup(code)?;
        Ok(RoomDetail {
            code: def.code.clone(),
            name: def.name.clone(),
            max_participants: def.max_participants,
            requires_pin: def.requires_pin(),
            state: self.store.get(code).await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_rooms;
    use std::sync::Arc;

    async fn registry() -> RoomRegistry {
        let store = RoomStore::open(Storage::memory()).await.unwrap();
        RoomRegistry::new(default_rooms(), store).unwrap()
    }

    #[tokio::test]
    async fn test_registry_rejects_duplicate_codes() {
        let mut rooms = default_rooms();
        let mut copy = rooms[0].clone();
        copy.name = "Shadow".to_string();
        rooms.push(copy);
        let store = RoomStore::open(Storage::memory()).await.unwrap();
        let err = RoomRegistry::new(rooms, store).err().unwrap();
        assert!(err.to_string().contains("1000"));
    }

    fn recording(id: &str) -> Recording {
        Recording {
            id: id.to_string(),
            url: format!("https://recordings.example.com/{}", id),
            duration_seconds: 42,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_room_access() {
        let rooms = default_rooms();
        let open = &rooms[0];
        assert!(!open.requires_pin());
        assert!(open.check_pin("anything"));
        let private = rooms.iter().find(|r| r.code == "2000").unwrap();
        assert!(private.requires_pin());
        assert!(private.check_pin("1234"));
        assert!(!private.check_pin("0000"));
        assert_eq!(private.conference_name(), "room-2000");
    }

    #[tokio::test]
    async fn test_join_is_idempotent_per_call() {
        let registry = registry().await;
        let first = registry.join("1000", "CA1", "+819011112222").await.unwrap();
        assert_eq!(first.participants, 1);
        assert!(!first.rejoined);

        let again = registry.join("1000", "CA1", "+819011112222").await.unwrap();
        assert_eq!(again.participants, 1);
        assert!(again.rejoined);

        let state = registry.store().get("1000").await.unwrap();
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history[0].action, RoomAction::Join);
    }

    #[tokio::test]
    async fn test_unknown_room() {
        let registry = registry().await;
        let err = registry.join("9999", "CA1", "+81").await.unwrap_err();
        assert!(matches!(err, FlowError::NotFound { .. }));
        assert!(registry.detail("9999").await.is_err());
    }

    #[tokio::test]
    async fn test_capacity_is_never_exceeded_under_concurrent_joins() {
        let registry = Arc::new(registry().await);
        // 2002 seats four.
        let mut tasks = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .join("2002", &format!("CA{}", i), "+819000000000")
                    .await
            }));
        }
        let mut joined = 0;
        let mut rejected = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => joined += 1,
                Err(FlowError::CapacityExceeded { max, .. }) => {
                    assert_eq!(max, 4);
                    rejected += 1;
                }
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(joined, 4);
        assert_eq!(rejected, 12);
        assert_eq!(registry.occupancy("2002").await, 4);
    }

    #[tokio::test]
    async fn test_leave_and_conference_end_keep_history() {
        let registry = registry().await;
        registry.join("1001", "CA1", "+819011111111").await.unwrap();
        registry.join("1001", "CA2", "+819022222222").await.unwrap();

        let store = registry.store();
        assert!(store.leave("1001", "CA1").await.unwrap());
        assert!(!store.leave("1001", "CA1").await.unwrap());
        assert!(store.add_recording("1001", recording("RE1")).await.unwrap());

        assert!(store.end_conference("1001").await.unwrap());
        let state = store.get("1001").await.unwrap();
        assert!(state.participants.is_empty());
        assert!(state.ended_at.is_some());
        assert_eq!(state.history.len(), 3);
        assert_eq!(state.history[2].action, RoomAction::Leave);
        assert_eq!(state.recordings.len(), 1);

        assert!(!store.end_conference("1002").await.unwrap());
        assert!(store.get("1002").await.is_none());
    }

    #[tokio::test]
    async fn test_recording_dedupe() {
        let registry = registry().await;
        let store = registry.store();
        assert!(!store.add_recording("1000", recording("RE0")).await.unwrap());

        registry.join("1000", "CA1", "+819011111111").await.unwrap();
        assert!(store.add_recording("1000", recording("RE1")).await.unwrap());
        assert!(!store.add_recording("1000", recording("RE1")).await.unwrap());
        assert!(store.add_recording("1000", recording("RE2")).await.unwrap());
        assert_eq!(store.get("1000").await.unwrap().recordings.len(), 2);
    }

    #[tokio::test]
    async fn test_overview_hides_pins() {
        let registry = registry().await;
        registry.join("2000", "CA1", "+819011111111").await.unwrap();
        let overview = registry.overview().await;
        assert_eq!(overview.len(), 6);
        let exec = overview.iter().find(|r| r.code == "2000").unwrap();
        assert!(exec.requires_pin);
        assert_eq!(exec.participants, 1);
        let json = serde_json::to_string(&overview).unwrap();
        assert!(!json.contains("1234\""));

        let detail = registry.detail("2000").await.unwrap();
        assert_eq!(detail.state.unwrap().participants.len(), 1);
    }
}
