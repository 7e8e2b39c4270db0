//! Remote command channel
//!
//! One persistent WebSocket to the master. A reader task decodes inbound
//! frames into `ChannelEvent`s in arrival order; a writer task owns the sink
//! so `send` never waits on the network. The channel never reconnects: the
//! first transport failure is reported once and the event stream ends.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use saltdock_protocol::{CommandRequest, ServerEvent, REMOTE_COMMANDS_PATH, SUBPROTOCOL};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{COOKIE, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::ChannelError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_BUFFER: usize = 256;
const LOG_PREVIEW_CHARS: usize = 240;

/// Where and how to open the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub server_url: String,
    pub path: String,
    pub subprotocol: String,
    pub cookie: Option<String>,
}

impl ChannelConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            path: REMOTE_COMMANDS_PATH.to_string(),
            subprotocol: SUBPROTOCOL.to_string(),
            cookie: None,
        }
    }

    pub fn endpoint(&self) -> String {
        let base = self.server_url.trim_end_matches('/');
        if self.path.starts_with('/') {
            format!("{base}{}", self.path)
        } else {
            format!("{base}/{}", self.path)
        }
    }
}

/// Inbound traffic and lifecycle notifications, delivered in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Message(ServerEvent),
    Malformed { payload: String, error: String },
    /// Transport failure. Always the last event.
    Error(String),
    /// Close frame or end of stream. Always the last event.
    Closed { reason: Option<String> },
}

/// Frames queued for the writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

pub struct Channel {
    endpoint: String,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    tasks: Vec<JoinHandle<()>>,
}

/// A channel with no network behind it. Requests written by the session
/// show up on `outbound`; tests inject server traffic through `events_tx`.
pub struct InMemoryChannel {
    pub channel: Channel,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    pub events_tx: mpsc::Sender<ChannelEvent>,
    pub events: mpsc::Receiver<ChannelEvent>,
}

impl Channel {
    /// Connect and spawn the reader/writer tasks.
    pub async fn open(
        config: &ChannelConfig,
    ) -> Result<(Channel, mpsc::Receiver<ChannelEvent>), ChannelError> {
        let endpoint = config.endpoint();
        let invalid = |reason: String| ChannelError::InvalidEndpoint {
            url: endpoint.clone(),
            reason,
        };

        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| invalid(e.to_string()))?;
        let headers = request.headers_mut();
        headers.insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_str(&config.subprotocol).map_err(|e| invalid(e.to_string()))?,
        );
        if let Some(cookie) = &config.cookie {
            headers.insert(
                COOKIE,
                HeaderValue::from_str(cookie).map_err(|e| invalid(e.to_string()))?,
            );
        }

        info!(
            component = "channel",
            event = "channel.connecting",
            endpoint = %endpoint,
            "Connecting to master"
        );
        let (ws_stream, _response) =
            connect_async(request)
                .await
                .map_err(|e| ChannelError::Connect {
                    url: endpoint.clone(),
                    reason: e.to_string(),
                })?;
        info!(
            component = "channel",
            event = "channel.opened",
            endpoint = %endpoint,
            "Channel opened"
        );

        let (writer, reader) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        let write_task = tokio::spawn(write_loop(writer, outbound_rx));
        let read_task = tokio::spawn(read_loop(reader, events_tx));

        Ok((
            Channel {
                endpoint,
                outbound_tx,
                tasks: vec![write_task, read_task],
            },
            events_rx,
        ))
    }

    pub fn in_memory() -> InMemoryChannel {
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::channel(EVENT_BUFFER);
        InMemoryChannel {
            channel: Channel {
                endpoint: "memory".to_string(),
                outbound_tx,
                tasks: Vec::new(),
            },
            outbound,
            events_tx,
            events,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Queue a request for the writer task.
    pub fn send(&self, request: &CommandRequest) -> Result<(), ChannelError> {
        let json = serde_json::to_string(request)?;
        debug!(
            component = "channel",
            event = "channel.send",
            session_id = ?request.session_id,
            preview = request.preview,
            target = %request.target,
            "Sending command request"
        );
        self.outbound_tx
            .send(Outbound::Text(json))
            .map_err(|_| ChannelError::Closed)
    }

    /// Ask the writer to send a close frame. The reader reports the
    /// resulting `Closed` event.
    pub fn close(&self) {
        let _ = self.outbound_tx.send(Outbound::Close);
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn write_loop(
    mut writer: SplitSink<WsStream, Message>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(frame) = outbound_rx.recv().await {
        let result = match frame {
            Outbound::Text(json) => writer.send(Message::Text(json.into())).await,
            Outbound::Close => {
                if let Err(e) = writer.close().await {
                    debug!(
                        component = "channel",
                        event = "channel.close_failed",
                        error = %e,
                        "Close frame not sent"
                    );
                }
                return;
            }
        };
        if let Err(e) = result {
            warn!(
                component = "channel",
                event = "channel.write_failed",
                error = %e,
                "Failed to write frame"
            );
            return;
        }
    }
}

async fn read_loop(mut reader: SplitStream<WsStream>, events_tx: mpsc::Sender<ChannelEvent>) {
    let terminal = loop {
        let Some(frame) = reader.next().await else {
            break ChannelEvent::Closed { reason: None };
        };
        let event = match frame {
            Ok(Message::Text(text)) => decode(text.as_str()),
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.as_str().to_string())
                    .filter(|r| !r.is_empty());
                break ChannelEvent::Closed { reason };
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    component = "channel",
                    event = "channel.read_failed",
                    error = %e,
                    "Channel transport error"
                );
                break ChannelEvent::Error(e.to_string());
            }
        };
        if events_tx.send(event).await.is_err() {
            return;
        }
    };

    info!(
        component = "channel",
        event = "channel.closed",
        terminal = ?terminal,
        "Channel closed"
    );
    let _ = events_tx.send(terminal).await;
}

/// Decode one text frame. Undecodable payloads are surfaced rather than
/// dropped so the session can record them.
pub fn decode(text: &str) -> ChannelEvent {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => ChannelEvent::Message(event),
        Err(e) => {
            warn!(
                component = "channel",
                event = "channel.decode_failed",
                error = %e,
                payload_bytes = text.len(),
                payload_preview = %truncate_for_log(text, LOG_PREVIEW_CHARS),
                "Failed to decode server event"
            );
            ChannelEvent::Malformed {
                payload: text.to_string(),
                error: e.to_string(),
            }
        }
    }
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_base_and_path() {
        let config = ChannelConfig::new("wss://master.example.com/");
        assert_eq!(
            config.endpoint(),
            "wss://master.example.com/rhn/websocket/minion/remote-commands"
        );

        let config = ChannelConfig {
            path: "ws".into(),
            ..ChannelConfig::new("ws://127.0.0.1:9000")
        };
        assert_eq!(config.endpoint(), "ws://127.0.0.1:9000/ws");
    }

    #[test]
    fn decode_known_and_malformed_frames() {
        assert_eq!(
            decode(r#"{"type":"match","minion":"m1"}"#),
            ChannelEvent::Message(ServerEvent::Match {
                minion: "m1".into(),
                session_id: None,
            })
        );
        assert!(matches!(
            decode("not json"),
            ChannelEvent::Malformed { ref payload, .. } if payload == "not json"
        ));
    }

    #[tokio::test]
    async fn send_queues_serialized_request() {
        let mut mem = Channel::in_memory();
        mem.channel
            .send(&CommandRequest::preview("*", 1))
            .unwrap();
        mem.channel.close();

        let Some(Outbound::Text(json)) = mem.outbound.recv().await else {
            panic!("expected text frame");
        };
        let sent: CommandRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(sent, CommandRequest::preview("*", 1));
        assert_eq!(mem.outbound.recv().await, Some(Outbound::Close));
    }

    #[tokio::test]
    async fn send_after_writer_gone_fails() {
        let mem = Channel::in_memory();
        drop(mem.outbound);
        assert!(matches!(
            mem.channel.send(&CommandRequest::preview("*", 1)),
            Err(ChannelError::Closed)
        ));
    }

    #[tokio::test]
    async fn open_failure_is_a_connect_error() {
        let config = ChannelConfig::new("ws://127.0.0.1:1");
        match Channel::open(&config).await {
            Err(ChannelError::Connect { url, .. }) => {
                assert_eq!(url, config.endpoint());
            }
            Err(other) => panic!("expected connect error, got {other}"),
            Ok(_) => panic!("expected connect error"),
        }
    }
}
