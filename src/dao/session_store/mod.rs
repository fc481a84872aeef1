#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
mod writers;

use std::time::{SystemTime, UNIX_EPOCH};

use futures::{future::BoxFuture, stream::BoxStream};

use crate::dao::{
    models::{EpochMillis, HostPatch, PlayerPatch, SessionPin, SessionRecord},
    storage::StorageResult,
};

pub use self::writers::{HostWriter, ParticipantWriter};

/// Push-based sequence of session snapshots; `None` means the document is gone.
pub type SnapshotStream = BoxStream<'static, StorageResult<Option<SessionRecord>>>;

/// Abstraction over the replicated document store holding live sessions.
///
/// Writes are split by owner: the host only ever sends [`HostPatch`]es and
/// each participant only ever sends a [`PlayerPatch`] for its own entry.
/// Both are merged field by field so concurrent writers never clobber each other.
pub trait SessionStore: Send + Sync {
    /// Create the document; fails with `Conflict` when the PIN is live.
    fn create(
        &self,
        pin: &SessionPin,
        record: SessionRecord,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn read(&self, pin: &SessionPin) -> BoxFuture<'static, StorageResult<Option<SessionRecord>>>;
    fn write_host(
        &self,
        pin: &SessionPin,
        patch: HostPatch,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn write_player(
        &self,
        pin: &SessionPin,
        participant: &str,
        patch: PlayerPatch,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Delete the document. Deleting a missing document succeeds.
    fn delete(&self, pin: &SessionPin) -> BoxFuture<'static, StorageResult<()>>;
    /// Subscribe to the document; the first element is its current value.
    fn subscribe(&self, pin: &SessionPin) -> SnapshotStream;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Timestamp written into `lastUpdated` by the store backends.
pub(crate) fn store_timestamp() -> EpochMillis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as EpochMillis)
        .unwrap_or_default()
}
