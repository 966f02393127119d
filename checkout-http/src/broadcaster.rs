//! Realtime fan-out: per-payment websocket channels forwarding bus events
//! to connected subscribers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde::Serialize;
use tokio::sync::mpsc;

use checkout::{EventName, EventPayload, Listener};

/// One event as pushed to websocket subscribers.
#[derive(Debug, Serialize)]
struct ChannelEvent<'a> {
    channel: String,
    name: &'a str,
    data: &'a EventPayload,
}

type Subscriber = mpsc::UnboundedSender<String>;

/// Hub of per-payment subscriber lists.
#[derive(Default)]
pub struct Broadcaster {
    channels: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels = self.channels.read().map(|map| map.len()).unwrap_or(0);
        f.debug_struct("Broadcaster")
            .field("channels", &channels)
            .finish()
    }
}

impl Broadcaster {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The bus listener feeding this hub. Register it for every event;
    /// payloads without a payment id are skipped.
    pub fn listener(self: &Arc<Self>) -> Listener {
        let hub = Arc::clone(self);
        Arc::new(move |name, payload| {
            let hub = Arc::clone(&hub);
            Box::pin(async move {
                if let Some(payment_id) = payload.payment_id() {
                    hub.publish(&payment_id.to_string(), name, &payload);
                }
                Ok(())
            })
        })
    }

    /// Serializes the event and pushes it to every subscriber of the
    /// channel; dead subscribers are evicted on send failure.
    fn publish(&self, channel: &str, name: EventName, payload: &EventPayload) {
        let event = ChannelEvent {
            channel: channel.to_owned(),
            name: name.as_str(),
            data: payload,
        };
        let Ok(message) = serde_json::to_string(&event) else {
            return;
        };
        let mut channels = self.channels.write().expect("channel hub poisoned");
        let Some(subscribers) = channels.get_mut(channel) else {
            return;
        };
        subscribers.retain(|subscriber| subscriber.send(message.clone()).is_ok());
        if subscribers.is_empty() {
            channels.remove(channel);
        }
    }

    fn subscribe(&self, channel: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels
            .write()
            .expect("channel hub poisoned")
            .entry(channel.to_owned())
            .or_default()
            .push(tx);
        rx
    }

    /// Subscribers currently attached to a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .expect("channel hub poisoned")
            .get(channel)
            .map_or(0, Vec::len)
    }
}

/// `GET /ws/channel/{payment_id}` — upgrades and streams the payment's
/// events until the client goes away.
pub async fn ws_handler(
    State(hub): State<Arc<Broadcaster>>,
    Path(payment_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_subscriber(hub, payment_id, socket))
}

async fn serve_subscriber(hub: Arc<Broadcaster>, channel: String, mut socket: WebSocket) {
    let mut events = hub.subscribe(&channel);
    tracing::debug!(channel, "websocket subscriber attached");
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if socket.send(Message::Text(event.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                // read-only channel: any close or error ends the session
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    tracing::debug!(channel, "websocket subscriber detached");
    // the sender side is evicted on its next failed publish
}
