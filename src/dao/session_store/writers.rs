//! Owner-scoped write handles. The host handle cannot touch player entries and
//! a participant handle cannot touch anything but its own entry.

use std::sync::Arc;

use crate::dao::{
    models::{HostPatch, PlayerPatch, RoundId, SessionPin, SessionRecord},
    session_store::{SessionStore, SnapshotStream},
    storage::StorageResult,
};

/// Write access granted to the host of one session.
#[derive(Clone)]
pub struct HostWriter {
    store: Arc<dyn SessionStore>,
    pin: SessionPin,
}

impl HostWriter {
    pub fn new(store: Arc<dyn SessionStore>, pin: SessionPin) -> Self {
        Self { store, pin }
    }

    pub fn pin(&self) -> &SessionPin {
        &self.pin
    }

    pub async fn create(&self, record: SessionRecord) -> StorageResult<()> {
        self.store.create(&self.pin, record).await
    }

    pub async fn read(&self) -> StorageResult<Option<SessionRecord>> {
        self.store.read(&self.pin).await
    }

    /// Merge host-owned fields into the document.
    pub async fn write(&self, patch: HostPatch) -> StorageResult<()> {
        self.store.write_host(&self.pin, patch).await
    }

    /// Tear the session down for every observer.
    pub async fn delete(&self) -> StorageResult<()> {
        self.store.delete(&self.pin).await
    }

    pub fn subscribe(&self) -> SnapshotStream {
        self.store.subscribe(&self.pin)
    }
}

/// Write access granted to one participant of one session.
#[derive(Clone)]
pub struct ParticipantWriter {
    store: Arc<dyn SessionStore>,
    pin: SessionPin,
    participant: String,
}

impl ParticipantWriter {
    pub fn new(
        store: Arc<dyn SessionStore>,
        pin: SessionPin,
        participant: impl Into<String>,
    ) -> Self {
        Self {
            store,
            pin,
            participant: participant.into(),
        }
    }

    pub fn participant(&self) -> &str {
        &self.participant
    }

    /// Register the participant's entry with a display name.
    pub async fn join(&self, nickname: impl Into<String>) -> StorageResult<()> {
        let patch = PlayerPatch {
            uid: Some(self.participant.clone()),
            nickname: Some(nickname.into()),
            score: Some(0),
            ..PlayerPatch::default()
        };
        self.store
            .write_player(&self.pin, &self.participant, patch)
            .await
    }

    /// Record an answer for `round`.
    pub async fn answer(&self, round: RoundId, answer_idx: usize) -> StorageResult<()> {
        let patch = PlayerPatch {
            last_answer_idx: Some(answer_idx),
            last_answered_round_id: Some(round),
            ..PlayerPatch::default()
        };
        self.store
            .write_player(&self.pin, &self.participant, patch)
            .await
    }

    /// Publish the participant's running score.
    pub async fn set_score(&self, score: u32) -> StorageResult<()> {
        let patch = PlayerPatch {
            score: Some(score),
            ..PlayerPatch::default()
        };
        self.store
            .write_player(&self.pin, &self.participant, patch)
            .await
    }
}
