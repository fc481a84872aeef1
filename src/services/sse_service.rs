use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::{
    dao::models::SessionPin,
    dto::sse::ServerEvent,
    error::ServiceError,
    services::sse_events,
    state::SharedState,
};

/// Subscription to one session's event hub plus the handshake for the new client.
pub struct SessionSubscription {
    pub pin: SessionPin,
    pub receiver: broadcast::Receiver<ServerEvent>,
    pub handshake: Option<ServerEvent>,
}

/// Subscribe to the events of a live session.
pub fn subscribe_session(state: &SharedState, pin: &str) -> Result<SessionSubscription, ServiceError> {
    let pin: SessionPin = pin.parse()?;
    let handle = state
        .session(&pin)
        .ok_or_else(|| ServiceError::NotFound(format!("no live session `{pin}`")))?;

    let receiver = handle.hub().subscribe();
    let status = handle.view().record.map(|record| record.status);
    debug!(%pin, subscribers = handle.hub().subscriber_count(), "session SSE subscriber added");

    Ok(SessionSubscription {
        handshake: sse_events::handshake_event(pin.as_str(), state.is_degraded(), status),
        pin,
        receiver,
    })
}

fn to_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

/// Convert a session subscription into an SSE response, forwarding events
/// until the client disconnects or the session hub goes away.
pub fn to_sse_stream(
    subscription: SessionSubscription,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let SessionSubscription {
        pin,
        mut receiver,
        handshake,
    } = subscription;
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        if let Some(handshake) = handshake {
            if tx.send(Ok(to_event(handshake))).await.is_err() {
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            // Skip lagged messages but keep the stream alive.
                            debug!(%pin, skipped, "session SSE subscriber lagged");
                            continue;
                        }
                    }
                }
            }
        }

        info!(%pin, "session SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
