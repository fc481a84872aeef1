use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, warn};

use crate::dao::{
    models::{HostPatch, PlayerPatch, SessionPin, SessionRecord},
    session_store::{SessionStore, SnapshotStream, store_timestamp},
    storage::{StorageError, StorageResult},
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        ChangesResponse, CouchSessionDocument, RevisionOnly, seq_param, session_doc_id,
    },
};

const CHANGES: &str = "_changes";
/// Server-side wait of a longpoll request before it returns empty.
const LONGPOLL_TIMEOUT_MS: u64 = 25_000;
const FEED_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_UPDATE_ATTEMPTS: usize = 8;

#[derive(Clone)]
pub struct CouchSessionStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchSessionStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth {
            Some((ref user, ref pass)) => builder.basic_auth(user.as_ref(), Some(pass.as_ref())),
            None => builder,
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        self.authorize(self.client.request(method, url))
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = format!("{}/{}", self.base_url, self.database);

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorize(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                // 412 means a concurrent instance created it first.
                if create.status().is_success() || create.status() == StatusCode::PRECONDITION_FAILED
                {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<()>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: response.status(),
            })
        }
    }

    /// Read-merge-write loop retried while CouchDB reports revision conflicts.
    async fn update_session<F>(&self, pin: &SessionPin, mutate: F) -> StorageResult<()>
    where
        F: Fn(&mut SessionRecord),
    {
        let doc_id = session_doc_id(pin);
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let Some(mut doc) = self.get_document::<CouchSessionDocument>(&doc_id).await? else {
                return Err(StorageError::not_found(pin.as_str()));
            };
            mutate(&mut doc.session);
            doc.session.last_updated = Some(store_timestamp());

            match self.put_document(&doc_id, &doc).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_conflict() => {
                    debug!(doc_id = %doc_id, attempt, "revision conflict, retrying update");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(CouchDaoError::UpdateContention {
            path: doc_id,
            attempts: MAX_UPDATE_ATTEMPTS,
        }
        .into())
    }

    async fn delete_session(&self, pin: &SessionPin) -> StorageResult<()> {
        let doc_id = session_doc_id(pin);
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let Some(current) = self.get_document::<RevisionOnly>(&doc_id).await? else {
                return Ok(());
            };
            let response = self
                .request(Method::DELETE, &doc_id)
                .query(&[("rev", current.rev.as_str())])
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: doc_id.clone(),
                    source,
                })?;

            match response.status() {
                status if status.is_success() => return Ok(()),
                StatusCode::NOT_FOUND => return Ok(()),
                StatusCode::CONFLICT => {
                    debug!(doc_id = %doc_id, attempt, "revision conflict, retrying delete");
                }
                status => {
                    return Err(CouchDaoError::RequestStatus {
                        path: doc_id,
                        status,
                    }
                    .into());
                }
            }
        }
        Err(CouchDaoError::UpdateContention {
            path: doc_id,
            attempts: MAX_UPDATE_ATTEMPTS,
        }
        .into())
    }

    /// One request against the `_changes` feed filtered to a single document.
    /// Without `since` the call returns immediately with the current revision.
    async fn poll_changes(&self, doc_id: &str, since: Option<&Value>) -> CouchResult<ChangesResponse> {
        let mut query = vec![
            ("filter", "_doc_ids".to_string()),
            ("doc_ids", format!("[\"{doc_id}\"]")),
            ("include_docs", "true".to_string()),
        ];
        if let Some(since) = since {
            query.push(("feed", "longpoll".to_string()));
            query.push(("since", seq_param(since)));
            query.push(("timeout", LONGPOLL_TIMEOUT_MS.to_string()));
        }

        let response = self
            .request(Method::GET, CHANGES)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: CHANGES.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: CHANGES.to_string(),
                status: response.status(),
            });
        }

        response
            .json::<ChangesResponse>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: CHANGES.to_string(),
                source,
            })
    }
}

impl SessionStore for CouchSessionStore {
    fn create(
        &self,
        pin: &SessionPin,
        mut record: SessionRecord,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let pin = pin.clone();
        Box::pin(async move {
            record.last_updated = Some(store_timestamp());
            let doc = CouchSessionDocument::new(&pin, record);
            match store.put_document(&doc.id, &doc).await {
                Ok(()) => Ok(()),
                Err(err) if err.is_conflict() => Err(StorageError::conflict(pin.as_str())),
                Err(err) => Err(err.into()),
            }
        })
    }

    fn read(&self, pin: &SessionPin) -> BoxFuture<'static, StorageResult<Option<SessionRecord>>> {
        let store = self.clone();
        let doc_id = session_doc_id(pin);
        Box::pin(async move {
            let doc = store.get_document::<CouchSessionDocument>(&doc_id).await?;
            Ok(doc.map(|doc| doc.session))
        })
    }

    fn write_host(
        &self,
        pin: &SessionPin,
        patch: HostPatch,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let pin = pin.clone();
        Box::pin(async move {
            store
                .update_session(&pin, |session| patch.apply_to(session))
                .await
        })
    }

    fn write_player(
        &self,
        pin: &SessionPin,
        participant: &str,
        patch: PlayerPatch,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let pin = pin.clone();
        let participant = participant.to_string();
        Box::pin(async move {
            store
                .update_session(&pin, |session| {
                    patch.apply_to(&mut session.players, &participant)
                })
                .await
        })
    }

    fn delete(&self, pin: &SessionPin) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let pin = pin.clone();
        Box::pin(async move { store.delete_session(&pin).await })
    }

    fn subscribe(&self, pin: &SessionPin) -> SnapshotStream {
        let store = self.clone();
        let doc_id = session_doc_id(pin);
        Box::pin(async_stream::stream! {
            let mut since: Option<Value> = None;
            loop {
                let page = match store.poll_changes(&doc_id, since.as_ref()).await {
                    Ok(page) => page,
                    Err(err) => {
                        warn!(doc_id = %doc_id, error = %err, "session changes feed failed");
                        yield Err(err.into());
                        tokio::time::sleep(FEED_RETRY_DELAY).await;
                        continue;
                    }
                };

                if since.is_none() {
                    // Initial page: the feed keeps one row per document, at its latest revision.
                    let current = match page.results.into_iter().last() {
                        Some(row) => row.into_session().map_err(StorageError::from),
                        None => Ok(None),
                    };
                    yield current;
                } else {
                    for row in page.results {
                        yield row.into_session().map_err(StorageError::from);
                    }
                }
                since = Some(page.last_seq);
            }
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = format!("{}/{}", store.base_url, store.database);
            let response = store
                .authorize(store.client.get(&url))
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
