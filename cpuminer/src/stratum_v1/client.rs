//! Stratum v1 client implementation.
//!
//! This module contains the main client that manages the connection lifecycle,
//! protocol state, and event emission.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::connection::{Connection, Transport};
use super::error::{StratumError, StratumResult};
use super::messages::{parse_notify, ClientCommand, ClientEvent, JsonRpcMessage, SubmitParams};
use crate::tracing::prelude::*;
use crate::types::PoolDifficulty;

/// Submits with no response after this long are forgotten.
const SUBMIT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(120);

/// Pool connection configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Pool URL (stratum+tcp://host:port or host:port)
    pub url: String,

    pub username: String,
    pub password: String,

    /// Sent as the `mining.subscribe` parameter
    pub user_agent: String,

    /// Bound on TCP connect and on each handshake response
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            user_agent: concat!("cpuminer/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Subscribed,
    Authorized,
    Mining,
}

/// Protocol state after successful subscription.
#[derive(Debug, Clone)]
struct Subscription {
    extranonce1: Vec<u8>,
    extranonce2_size: u8,
}

/// A `mining.submit` waiting for its response.
#[derive(Debug)]
struct PendingSubmit {
    job_id: String,
    nonce: u32,
    sent_at: Instant,
}

/// Stratum v1 client.
///
/// Manages connection to a mining pool, handles the protocol lifecycle
/// (subscribe, authorize), and emits events for jobs and shares.
///
/// Notifications can arrive between a request and its response. During the
/// handshake they are handled inline while waiting. Share submissions don't
/// wait at all: the response is matched by id in the main loop.
pub struct StratumV1Client {
    config: PoolConfig,

    /// Where to send events
    event_tx: mpsc::Sender<ClientEvent>,

    /// Where to receive commands (optional)
    command_rx: Option<mpsc::Receiver<ClientCommand>>,

    shutdown: CancellationToken,

    /// Auto-incrementing message ID
    next_id: u64,

    /// Current lifecycle state, observable through [`state_watch`](Self::state_watch)
    state_tx: watch::Sender<ClientState>,

    subscription: Option<Subscription>,

    pending_submits: HashMap<u64, PendingSubmit>,
}

impl StratumV1Client {
    pub fn new(
        config: PoolConfig,
        event_tx: mpsc::Sender<ClientEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            event_tx,
            command_rx: None,
            shutdown,
            next_id: 1,
            state_tx: watch::channel(ClientState::Disconnected).0,
            subscription: None,
            pending_submits: HashMap::new(),
        }
    }

    /// Create a new Stratum v1 client with command channel.
    pub fn with_commands(
        config: PoolConfig,
        event_tx: mpsc::Sender<ClientEvent>,
        command_rx: mpsc::Receiver<ClientCommand>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            command_rx: Some(command_rx),
            ..Self::new(config, event_tx, shutdown)
        }
    }

    /// Follow the client's lifecycle state.
    pub fn state_watch(&self) -> watch::Receiver<ClientState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ClientState) {
        let from = self.state_tx.send_replace(state);
        if from != state {
            debug!(from = ?from, to = ?state, "Client state");
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn emit(&self, event: ClientEvent) -> StratumResult<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| StratumError::Disconnected)
    }

    /// Send a request and wait for its response.
    ///
    /// Notifications arriving in the meantime are handled as usual. Gives up
    /// after the configured connect timeout, or immediately on shutdown.
    async fn send_request(
        &mut self,
        conn: &mut impl Transport,
        method: &str,
        params: Value,
    ) -> StratumResult<JsonRpcMessage> {
        let id = self.next_id();
        conn.write_message(&JsonRpcMessage::request(id, method, params))
            .await?;

        let wait = self.config.connect_timeout;
        tokio::time::timeout(wait, async {
            loop {
                tokio::select! {
                    result = conn.read_message() => {
                        let msg = match result {
                            Ok(Some(msg)) => msg,
                            Ok(None) => return Err(StratumError::Disconnected),
                            Err(StratumError::InvalidMessage(e)) => {
                                warn!(error = %e, "Ignoring malformed message from pool");
                                continue;
                            }
                            Err(e) => return Err(e),
                        };

                        match msg {
                            JsonRpcMessage::Response { id: resp_id, .. } if resp_id == id => {
                                return Ok(msg);
                            }
                            JsonRpcMessage::Response { id: other_id, .. } => {
                                warn!(msg_id = other_id, "Received response for different request");
                            }
                            JsonRpcMessage::Notification { method, params } => {
                                if let Err(e) = self.handle_notification(&method, &params).await {
                                    if is_fatal(&e) {
                                        return Err(e);
                                    }
                                    warn!(error = %e, "Error handling notification during setup");
                                }
                            }
                            JsonRpcMessage::Request { method, .. } => {
                                warn!(method = %method, "Server sent request during setup");
                            }
                        }
                    }

                    _ = self.shutdown.cancelled() => {
                        return Err(StratumError::Disconnected);
                    }
                }
            }
        })
        .await
        .map_err(|_| StratumError::Timeout)?
    }

    /// Send `mining.subscribe` and record extranonce1/extranonce2_size.
    async fn subscribe(&mut self, conn: &mut impl Transport) -> StratumResult<()> {
        let user_agent = self.config.user_agent.clone();
        let response = self
            .send_request(conn, "mining.subscribe", json!([user_agent]))
            .await?;

        match response {
            JsonRpcMessage::Response {
                result: Some(result),
                error: None,
                ..
            } => {
                // [[subscriptions...], extranonce1, extranonce2_size]
                let arr = result.as_array().ok_or_else(|| {
                    StratumError::SubscriptionFailed("result not an array".to_string())
                })?;
                if arr.len() < 3 {
                    return Err(StratumError::SubscriptionFailed(
                        "result too short".to_string(),
                    ));
                }

                let (extranonce1, extranonce2_size) = parse_extranonce(&arr[1], &arr[2])
                    .map_err(StratumError::SubscriptionFailed)?;
                self.subscription = Some(Subscription {
                    extranonce1,
                    extranonce2_size,
                });
                Ok(())
            }
            JsonRpcMessage::Response {
                error: Some(error), ..
            } => Err(StratumError::SubscriptionFailed(error_reason(&error))),
            _ => Err(StratumError::UnexpectedResponse(
                "Invalid subscribe response".to_string(),
            )),
        }
    }

    /// Send `mining.authorize` with the configured credentials.
    async fn authorize(&mut self, conn: &mut impl Transport) -> StratumResult<()> {
        let params = json!([&self.config.username, &self.config.password]);
        let response = self.send_request(conn, "mining.authorize", params).await?;

        match response {
            JsonRpcMessage::Response {
                result: Some(Value::Bool(true)),
                error: None,
                ..
            } => Ok(()),
            JsonRpcMessage::Response {
                error: Some(error), ..
            } => Err(StratumError::AuthorizationFailed(error_reason(&error))),
            JsonRpcMessage::Response { .. } => Err(StratumError::AuthorizationFailed(
                "Pool returned false".to_string(),
            )),
            _ => Err(StratumError::UnexpectedResponse(
                "Invalid authorize response".to_string(),
            )),
        }
    }

    /// Write `mining.submit` and return without waiting for the response.
    async fn submit(&mut self, conn: &mut impl Transport, params: SubmitParams) -> StratumResult<()> {
        let id = self.next_id();
        let request = JsonRpcMessage::request(id, "mining.submit", Value::Array(params.to_stratum_json()));
        conn.write_message(&request).await?;

        self.pending_submits.insert(
            id,
            PendingSubmit {
                job_id: params.job_id,
                nonce: params.nonce,
                sent_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Match a response against pending submits.
    async fn handle_response(
        &mut self,
        id: u64,
        result: Option<Value>,
        error: Option<Value>,
    ) -> StratumResult<()> {
        let Some(pending) = self.pending_submits.remove(&id) else {
            warn!(msg_id = id, "Response for unknown request");
            return Ok(());
        };

        let latency = pending.sent_at.elapsed();
        let event = match (result, error) {
            (Some(Value::Bool(true)), None) => ClientEvent::ShareAccepted {
                job_id: pending.job_id,
                nonce: pending.nonce,
                latency,
            },
            (_, Some(error)) => ClientEvent::ShareRejected {
                job_id: pending.job_id,
                nonce: pending.nonce,
                reason: error_reason(&error),
                latency,
            },
            (_, None) => ClientEvent::ShareRejected {
                job_id: pending.job_id,
                nonce: pending.nonce,
                reason: "rejected".to_string(),
                latency,
            },
        };
        self.emit(event).await
    }

    /// Drop submits the pool never answered.
    fn prune_pending(&mut self) {
        self.pending_submits.retain(|id, pending| {
            let keep = pending.sent_at.elapsed() < SUBMIT_RESPONSE_TIMEOUT;
            if !keep {
                warn!(
                    msg_id = id,
                    job_id = %pending.job_id,
                    "No response to share submission"
                );
            }
            keep
        });
    }

    /// Handle a notification from the pool.
    async fn handle_notification(&mut self, method: &str, params: &Value) -> StratumResult<()> {
        match method {
            "mining.notify" => self.handle_mining_notify(params).await,
            "mining.set_difficulty" => self.handle_set_difficulty(params).await,
            "mining.set_extranonce" => self.handle_set_extranonce(params).await,
            "client.reconnect" => Err(StratumError::ReconnectRequested),
            "client.show_message" => {
                info!(text = %params, "Message from pool");
                Ok(())
            }
            _ => {
                warn!(method = %method, "Unknown notification method");
                Ok(())
            }
        }
    }

    async fn handle_mining_notify(&mut self, params: &Value) -> StratumResult<()> {
        let arr = params.as_array().ok_or_else(|| {
            StratumError::InvalidMessage("mining.notify params not an array".to_string())
        })?;

        let job = parse_notify(arr)
            .map_err(|e| StratumError::InvalidMessage(format!("Failed to parse job: {}", e)))?;

        debug!(job_id = %job.id, clean_jobs = job.clean_jobs, "Received job from pool");
        self.emit(ClientEvent::NewJob(job)).await
    }

    async fn handle_set_difficulty(&mut self, params: &Value) -> StratumResult<()> {
        let value = params
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                StratumError::InvalidMessage(format!("bad set_difficulty params: {}", params))
            })?;

        let difficulty = PoolDifficulty::new(value).ok_or_else(|| {
            StratumError::InvalidMessage(format!("unusable difficulty {}", value))
        })?;
        debug!(difficulty = %difficulty, "Pool difficulty changed");
        self.emit(ClientEvent::DifficultyChanged(difficulty)).await
    }

    async fn handle_set_extranonce(&mut self, params: &Value) -> StratumResult<()> {
        let arr = params.as_array().filter(|arr| arr.len() >= 2).ok_or_else(|| {
            StratumError::InvalidMessage(format!("bad set_extranonce params: {}", params))
        })?;

        let (extranonce1, extranonce2_size) =
            parse_extranonce(&arr[0], &arr[1]).map_err(StratumError::InvalidMessage)?;

        debug!(
            extranonce1 = %hex::encode(&extranonce1),
            extranonce2_size,
            "Extranonce changed"
        );
        self.subscription = Some(Subscription {
            extranonce1: extranonce1.clone(),
            extranonce2_size,
        });
        self.emit(ClientEvent::ExtranonceChanged {
            extranonce1,
            extranonce2_size,
        })
        .await
    }

    /// Run the client: connect, handshake, then the main event loop.
    pub async fn run(mut self) -> StratumResult<()> {
        self.set_state(ClientState::Connecting);
        let connected = tokio::select! {
            result = Connection::connect(&self.config.url, self.config.connect_timeout) => result,
            _ = self.shutdown.cancelled() => return Ok(()),
        };
        match connected {
            Ok(conn) => self.run_with_transport(conn).await,
            Err(e) => {
                self.set_state(ClientState::Disconnected);
                Err(e)
            }
        }
    }

    /// Run the client over a pre-established transport.
    pub(crate) async fn run_with_transport(mut self, mut conn: impl Transport) -> StratumResult<()> {
        self.set_state(ClientState::Connecting);
        let result = self.session(&mut conn).await;
        self.set_state(ClientState::Disconnected);
        self.event_tx.send(ClientEvent::Disconnected).await.ok();
        result
    }

    async fn session(&mut self, conn: &mut impl Transport) -> StratumResult<()> {
        self.subscribe(conn).await?;
        self.set_state(ClientState::Subscribed);

        let subscription = self
            .subscription
            .clone()
            .ok_or_else(|| StratumError::SubscriptionFailed("no subscription".to_string()))?;
        info!(
            pool = %self.config.url,
            extranonce1 = %hex::encode(&subscription.extranonce1),
            extranonce2_size = subscription.extranonce2_size,
            "Subscribed"
        );
        self.emit(ClientEvent::Subscribed {
            extranonce1: subscription.extranonce1,
            extranonce2_size: subscription.extranonce2_size,
        })
        .await?;

        self.authorize(conn).await?;
        self.set_state(ClientState::Authorized);
        info!(user = %self.config.username, "Authorized");
        self.emit(ClientEvent::Authorized).await?;

        self.set_state(ClientState::Mining);
        self.main_loop(conn).await
    }

    async fn main_loop(&mut self, conn: &mut impl Transport) -> StratumResult<()> {
        let mut prune = tokio::time::interval(Duration::from_secs(30));
        prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut command_rx = self.command_rx.take();
        let shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                msg = conn.read_message() => {
                    match msg {
                        Ok(Some(JsonRpcMessage::Notification { method, params })) => {
                            if let Err(e) = self.handle_notification(&method, &params).await {
                                if is_fatal(&e) {
                                    return Err(e);
                                }
                                warn!(method = %method, error = %e, "Error handling notification");
                            }
                        }
                        Ok(Some(JsonRpcMessage::Response { id, result, error })) => {
                            self.handle_response(id, result, error).await?;
                        }
                        Ok(Some(JsonRpcMessage::Request { method, .. })) => {
                            warn!(method = %method, "Server sent request (not notification)");
                        }
                        Ok(None) => {
                            info!(pool = %self.config.url, "Connection closed by pool");
                            return Err(StratumError::Disconnected);
                        }
                        Err(StratumError::InvalidMessage(e)) => {
                            warn!(error = %e, "Received malformed message from pool, ignoring");
                        }
                        Err(e) => return Err(e),
                    }
                }

                Some(cmd) = async {
                    match &mut command_rx {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    match cmd {
                        ClientCommand::SubmitShare(params) => {
                            debug!(
                                job_id = %params.job_id,
                                nonce = %format_args!("{:#010x}", params.nonce),
                                "Submitting share"
                            );
                            self.submit(conn, params).await?;
                        }
                    }
                }

                _ = prune.tick() => self.prune_pending(),

                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    return Ok(());
                }
            }
        }
    }
}

/// Errors that end the session.
fn is_fatal(e: &StratumError) -> bool {
    matches!(
        e,
        StratumError::Disconnected | StratumError::ReconnectRequested | StratumError::Io(_)
    )
}

fn parse_extranonce(extranonce1: &Value, size: &Value) -> Result<(Vec<u8>, u8), String> {
    let extranonce1 = extranonce1
        .as_str()
        .ok_or("extranonce1 not a string")
        .and_then(|s| hex::decode(s).map_err(|_| "extranonce1 not hex"))?;
    let size = size
        .as_u64()
        .filter(|size| (1..=8).contains(size))
        .ok_or_else(|| format!("extranonce2_size {} not in 1..=8", size))?;
    Ok((extranonce1, size as u8))
}

/// Human-readable reason from a pool error value.
///
/// Pools send `[code, "message", traceback]`, an object with a `message`
/// field, or occasionally a bare string.
fn error_reason(error: &Value) -> String {
    match error {
        Value::Array(arr) => arr
            .get(1)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
