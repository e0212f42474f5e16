use super::{Document, DocumentStore};
use crate::error::FlowResult;
use crate::storage::Storage;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A message left on the voicemail line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voicemail {
    /// The carrier's recording id, or the call id when it sent none.
    pub id: String,
    pub call_id: String,
    pub caller: String,
    pub recording_url: String,
    pub duration_seconds: u32,
    pub created_at: DateTime<Utc>,
}

impl Document for Voicemail {
    const NAMESPACE: &'static str = "voicemails";

    fn key(&self) -> &str {
        &self.id
    }
}

pub struct VoicemailStore {
    docs: DocumentStore<Voicemail>,
}

impl VoicemailStore {
    pub async fn open(storage: Storage) -> Result<Self> {
        Ok(Self {
            docs: DocumentStore::open(storage).await?,
        })
    }

    /// Stores `voicemail` unless its id is already known. A repeated
    /// completion callback returns the first copy and `false`.
    pub async fn save(&self, voicemail: Voicemail) -> FlowResult<(Voicemail, bool)> {
        let mut entry = self.docs.lock(&voicemail.id).await;
        if let Some(existing) = entry.get() {
            debug!(voicemail = %voicemail.id, "voicemail already stored");
            return Ok((existing.clone(), false));
        }
        entry.put(voicemail.clone()).await?;
        info!(
            voicemail = %voicemail.id,
            caller = %voicemail.caller,
            duration = voicemail.duration_seconds,
            "voicemail stored"
        );
        Ok((voicemail, true))
    }

    /// Newest first.
    pub async fn list(&self) -> Vec<Voicemail> {
        let mut all = self.docs.values().await;
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn voicemail(id: &str, minutes_ago: i64) -> Voicemail {
        Voicemail {
            id: id.to_string(),
            call_id: format!("CA{}", id),
            caller: "+819011112222".to_string(),
            recording_url: format!("https://recordings.example.com/{}", id),
            duration_seconds: 12,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn test_save_once_and_list_newest_first() -> Result<()> {
        let storage = Storage::memory();
        let store = VoicemailStore::open(storage.clone()).await?;
        assert!(store.save(voicemail("RE1", 5)).await?.1);
        assert!(store.save(voicemail("RE2", 1)).await?.1);

        let mut repeat = voicemail("RE1", 0);
        repeat.duration_seconds = 99;
        let (kept, created) = store.save(repeat).await?;
        assert!(!created);
        assert_eq!(kept.duration_seconds, 12);

        let reopened = VoicemailStore::open(storage).await?;
        let ids: Vec<String> = reopened.list().await.into_iter().map(|v| v.id).collect();
        assert_eq!(ids, vec!["RE2", "RE1"]);
        Ok(())
    }
}
