//! In-process replicated store: every session is a watch channel, so each
//! subscriber sees the latest document first and then every later value it
//! manages to observe (intermediate values may be coalesced, as with any
//! eventually-consistent feed).

use std::{
    future::ready,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use dashmap::DashMap;
use futures::{StreamExt, future::BoxFuture};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::dao::{
    models::{HostPatch, PlayerPatch, SessionPin, SessionRecord},
    session_store::{SessionStore, SnapshotStream, store_timestamp},
    storage::{StorageError, StorageResult},
};

type Slot = watch::Sender<Option<SessionRecord>>;

/// Session store kept in process memory; clones share the same sessions.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<Inner>,
}

struct Inner {
    sessions: DashMap<SessionPin, Slot>,
    online: AtomicBool,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            sessions: DashMap::new(),
            online: AtomicBool::new(true),
        }
    }
}

impl MemorySessionStore {
    /// Empty, online store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while offline every write and health check fails.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
    }

    fn ensure_online(&self, operation: &str) -> StorageResult<()> {
        if self.inner.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::unavailable(
                format!("memory store offline during {operation}"),
                io::Error::other("memory store offline"),
            ))
        }
    }

    fn slot(&self, pin: &SessionPin) -> Slot {
        self.inner
            .sessions
            .entry(pin.clone())
            .or_insert_with(|| watch::channel(None).0)
            .clone()
    }

    fn create_now(&self, pin: &SessionPin, mut record: SessionRecord) -> StorageResult<()> {
        self.ensure_online("create")?;
        self.prune();
        record.last_updated = Some(store_timestamp());
        let slot = self.slot(pin);
        let created = slot.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(record);
            true
        });
        if created {
            Ok(())
        } else {
            Err(StorageError::conflict(pin.as_str()))
        }
    }

    fn modify_now<F>(&self, pin: &SessionPin, operation: &str, mutate: F) -> StorageResult<()>
    where
        F: FnOnce(&mut SessionRecord),
    {
        self.ensure_online(operation)?;
        let Some(slot) = self.inner.sessions.get(pin).map(|entry| entry.clone()) else {
            return Err(StorageError::not_found(pin.as_str()));
        };
        let modified = slot.send_if_modified(|current| match current {
            Some(record) => {
                mutate(record);
                record.last_updated = Some(store_timestamp());
                true
            }
            None => false,
        });
        if modified {
            Ok(())
        } else {
            Err(StorageError::not_found(pin.as_str()))
        }
    }

    fn delete_now(&self, pin: &SessionPin) -> StorageResult<()> {
        self.ensure_online("delete")?;
        if let Some(slot) = self.inner.sessions.get(pin) {
            slot.send_if_modified(|current| current.take().is_some());
        }
        self.inner.sessions.remove_if(pin, |_, slot| is_abandoned(slot));
        Ok(())
    }

    /// Drop slots holding no document that nobody watches any more.
    fn prune(&self) {
        self.inner.sessions.retain(|_, slot| !is_abandoned(slot));
    }
}

fn is_abandoned(slot: &Slot) -> bool {
    slot.receiver_count() == 0 && slot.borrow().is_none()
}

impl SessionStore for MemorySessionStore {
    fn create(
        &self,
        pin: &SessionPin,
        record: SessionRecord,
    ) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(self.create_now(pin, record)))
    }

    fn read(&self, pin: &SessionPin) -> BoxFuture<'static, StorageResult<Option<SessionRecord>>> {
        let current = self
            .inner
            .sessions
            .get(pin)
            .and_then(|slot| slot.borrow().clone());
        Box::pin(ready(Ok(current)))
    }

    fn write_host(
        &self,
        pin: &SessionPin,
        patch: HostPatch,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.modify_now(pin, "host write", |record| patch.apply_to(record));
        Box::pin(ready(result))
    }

    fn write_player(
        &self,
        pin: &SessionPin,
        participant: &str,
        patch: PlayerPatch,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.modify_now(pin, "player write", |record| {
            patch.apply_to(&mut record.players, participant)
        });
        Box::pin(ready(result))
    }

    fn delete(&self, pin: &SessionPin) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(self.delete_now(pin)))
    }

    fn subscribe(&self, pin: &SessionPin) -> SnapshotStream {
        let receiver = self.slot(pin).subscribe();
        WatchStream::new(receiver).map(Ok).boxed()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(self.ensure_online("health check")))
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(self.ensure_online("reconnect")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{QuizSnapshot, RoundId, SessionStatus};

    fn pin() -> SessionPin {
        "424242".parse().unwrap()
    }

    fn lobby() -> SessionRecord {
        SessionRecord::new_lobby(
            "host-1",
            "quiz-1",
            QuizSnapshot {
                title: "Capitals".into(),
                questions: vec![],
            },
        )
    }

    #[tokio::test]
    async fn create_rejects_live_pin() {
        let store = MemorySessionStore::new();
        store.create(&pin(), lobby()).await.unwrap();
        let err = store.create(&pin(), lobby()).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));
    }

    #[tokio::test]
    async fn pin_can_be_reused_after_delete() {
        let store = MemorySessionStore::new();
        store.create(&pin(), lobby()).await.unwrap();
        store.delete(&pin()).await.unwrap();
        store.delete(&pin()).await.unwrap();
        store.create(&pin(), lobby()).await.unwrap();
    }

    #[tokio::test]
    async fn host_and_player_writes_merge_independently() {
        let store = MemorySessionStore::new();
        store.create(&pin(), lobby()).await.unwrap();

        store
            .write_player(
                &pin(),
                "p1",
                PlayerPatch {
                    nickname: Some("Ada".into()),
                    ..PlayerPatch::default()
                },
            )
            .await
            .unwrap();
        store
            .write_host(&pin(), HostPatch::status(SessionStatus::Question))
            .await
            .unwrap();
        store
            .write_player(
                &pin(),
                "p1",
                PlayerPatch {
                    last_answered_round_id: Some(RoundId(5)),
                    ..PlayerPatch::default()
                },
            )
            .await
            .unwrap();

        let record = store.read(&pin()).await.unwrap().unwrap();
        assert_eq!(record.status, SessionStatus::Question);
        assert_eq!(record.players["p1"].nickname, "Ada");
        assert_eq!(record.players["p1"].last_answered_round_id, Some(RoundId(5)));
        assert!(record.last_updated.is_some());
    }

    #[tokio::test]
    async fn writes_to_missing_session_fail() {
        let store = MemorySessionStore::new();
        let err = store
            .write_host(&pin(), HostPatch::status(SessionStatus::Question))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn subscription_starts_with_current_value_and_sees_deletion() {
        let store = MemorySessionStore::new();
        store.create(&pin(), lobby()).await.unwrap();

        let mut stream = store.subscribe(&pin());
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.map(|r| r.status), Some(SessionStatus::Lobby));

        store.delete(&pin()).await.unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn deleted_and_abandoned_slots_are_dropped() {
        let store = MemorySessionStore::new();
        store.create(&pin(), lobby()).await.unwrap();
        store.delete(&pin()).await.unwrap();
        assert!(store.inner.sessions.is_empty());

        // A watcher keeps the slot until it goes away.
        let stream = store.subscribe(&"111111".parse().unwrap());
        store.create(&pin(), lobby()).await.unwrap();
        assert_eq!(store.inner.sessions.len(), 2);

        drop(stream);
        store.delete(&pin()).await.unwrap();
        store.create(&pin(), lobby()).await.unwrap();
        assert_eq!(store.inner.sessions.len(), 1);
    }

    #[tokio::test]
    async fn offline_store_rejects_writes() {
        let store = MemorySessionStore::new();
        store.create(&pin(), lobby()).await.unwrap();
        store.set_online(false);

        let err = store
            .write_host(&pin(), HostPatch::status(SessionStatus::Question))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Unavailable { .. }));
        assert!(store.health_check().await.is_err());

        store.set_online(true);
        assert!(store.health_check().await.is_ok());
    }
}
