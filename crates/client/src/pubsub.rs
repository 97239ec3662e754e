//! Websocket client for the broker's pub/sub relay.
//!
//! A single background task owns the socket. Callers talk to it through a
//! command channel; inbound events are delivered on an mpsc receiver handed
//! out by [`PubSubClient::connect`].

use crate::api_client::base_url;
use crate::error::{ClientError, ClientResult};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tessera_core::Frame;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Ack = oneshot::Sender<ClientResult<()>>;

/// A message relayed by the broker.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub topic: String,
    pub data: Value,
}

enum Command {
    Send { frame: Frame, ack: Ack },
    /// Round trip a ping; the pong proves every earlier frame was processed.
    Sync { ack: Ack },
    Close,
}

/// Connection to the broker's `/pubsub` endpoint.
pub struct PubSubClient {
    commands: mpsc::UnboundedSender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
    send_timeout: Duration,
}

impl PubSubClient {
    /// Connect to the broker at `addr` (`host:port`).
    ///
    /// Returns once the websocket handshake has completed, together with the
    /// receiver of inbound events.
    pub async fn connect(
        addr: &str,
        send_timeout: Duration,
    ) -> ClientResult<(Self, mpsc::UnboundedReceiver<Event>)> {
        let mut url = base_url(addr)?.join("pubsub")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Url(format!("cannot use {scheme} for {addr}")))?;

        let (socket, _) = tokio::time::timeout(send_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| ClientError::Timeout(send_timeout))?
            .map_err(|e| ClientError::Unavailable(format!("pub/sub connect to {url}: {e}")))?;
        tracing::debug!(%url, "Pub/sub connected");

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(socket, command_rx, event_tx));

        Ok((
            Self {
                commands,
                task: Mutex::new(Some(task)),
                send_timeout,
            },
            event_rx,
        ))
    }

    async fn request(&self, make: impl FnOnce(Ack) -> Command) -> ClientResult<()> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(make(ack))
            .map_err(|_| ClientError::PubSub("connection closed".to_string()))?;
        tokio::time::timeout(self.send_timeout, done)
            .await
            .map_err(|_| ClientError::Timeout(self.send_timeout))?
            .map_err(|_| ClientError::PubSub("connection closed".to_string()))?
    }

    async fn send(&self, frame: Frame) -> ClientResult<()> {
        self.request(|ack| Command::Send { frame, ack }).await
    }

    /// Wait until the broker has processed every frame sent so far.
    pub async fn sync(&self) -> ClientResult<()> {
        self.request(|ack| Command::Sync { ack }).await
    }

    /// Follow `topics`; returns once the broker has applied the change.
    pub async fn subscribe(&self, topics: Vec<String>) -> ClientResult<()> {
        self.send(Frame::Subscribe { topics }).await?;
        self.sync().await
    }

    /// Stop following `topics`.
    pub async fn unsubscribe(&self, topics: Vec<String>) -> ClientResult<()> {
        self.send(Frame::Unsubscribe { topics }).await?;
        self.sync().await
    }

    /// Publish `data` on `topic`, bounded by the send timeout.
    pub async fn publish(&self, topic: &str, data: Value) -> ClientResult<()> {
        self.send(Frame::Publish {
            topic: topic.to_string(),
            data,
        })
        .await
    }

    /// Close the connection, giving up after `timeout`.
    pub async fn disconnect(&self, timeout: Duration) {
        let _ = self.commands.send(Command::Close);
        let Some(mut task) = self.task.lock().await.take() else {
            return;
        };
        if tokio::time::timeout(timeout, &mut task).await.is_err() {
            tracing::warn!(?timeout, "Pub/sub disconnect timed out, aborting");
            task.abort();
        }
    }
}

async fn run(
    mut socket: Socket,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<Event>,
) {
    let mut pending_syncs: VecDeque<Ack> = VecDeque::new();
    let mut nonce: u64 = 0;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send { frame, ack }) => {
                    let result = match frame.to_json() {
                        Ok(text) => socket
                            .send(Message::Text(text))
                            .await
                            .map_err(|e| ClientError::PubSub(e.to_string())),
                        Err(e) => Err(ClientError::Decode(e.to_string())),
                    };
                    let _ = ack.send(result);
                }
                Some(Command::Sync { ack }) => {
                    nonce += 1;
                    match socket.send(Message::Ping(nonce.to_be_bytes().to_vec())).await {
                        Ok(()) => pending_syncs.push_back(ack),
                        Err(e) => {
                            let _ = ack.send(Err(ClientError::PubSub(e.to_string())));
                        }
                    }
                }
                Some(Command::Close) | None => {
                    let _ = socket.close(None).await;
                    break;
                }
            },
            message = socket.next() => match message {
                Some(Ok(Message::Text(text))) => match Frame::from_json(&text) {
                    Ok(Frame::Event { topic, data }) => {
                        let _ = events.send(Event { topic, data });
                    }
                    Ok(other) => tracing::warn!(?other, "Unexpected frame from broker"),
                    Err(e) => tracing::warn!(error = %e, "Malformed frame from broker"),
                },
                Some(Ok(Message::Pong(_))) => {
                    if let Some(ack) = pending_syncs.pop_front() {
                        let _ = ack.send(Ok(()));
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!("Pub/sub connection closed by broker");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Pub/sub connection failed");
                    break;
                }
            },
        }
    }
}
