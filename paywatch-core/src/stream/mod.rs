//! EventStreamSubscriber processor.
//!
//! The EventStreamSubscriber is responsible for:
//! - Holding a websocket connection to the chain node
//! - Subscribing to transfer logs of the token contract
//! - Publishing every matching transfer as `TransferObserved`
//! - Sending an `eth_blockNumber` keepalive probe on a fixed interval
//! - Reconnecting after a fixed delay and re-subscribing from scratch
//!
//! Subscription bookkeeping lives in [`StreamSession`], which does no I/O.

pub mod session;

pub use session::{ConnectionState, FrameOutcome, LogFilter, StreamSession, TRANSFER_SUBSCRIPTION};

use crate::config::{ChainConfig, StreamConfig};
use crate::events::TransferEventSender;
use futures_util::{Sink, SinkExt, StreamExt};
use paywatch_sdk::objects::JsonRpcRequest;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// The node rejected a subscribe request.
    #[error("subscription failed: {0}")]
    SubscriptionFailure(String),

    /// A notification arrived for a subscription id this connection never
    /// confirmed.
    #[error("notification for unknown subscription {0}")]
    UnknownSubscription(String),

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("no frame received for {0:?}")]
    Stalled(Duration),

    #[error("websocket handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("connection closed by peer")]
    Closed,
}

/// How a connection ended without an error.
enum ConnectionEnd {
    Shutdown,
    /// The event receiver is gone, nobody is listening any more.
    Abandoned,
}

pub struct EventStreamSubscriber {
    ws_url: Url,
    config: StreamConfig,
    session: StreamSession,
    event_tx: TransferEventSender,
    shutdown_rx: watch::Receiver<bool>,
}

impl EventStreamSubscriber {
    pub fn new(
        ws_url: Url,
        config: StreamConfig,
        session: StreamSession,
        event_tx: TransferEventSender,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ws_url,
            config,
            session,
            event_tx,
            shutdown_rx,
        }
    }

    /// Subscriber for the token transfer logs of `chain`.
    pub fn from_config(
        chain: &ChainConfig,
        config: StreamConfig,
        event_tx: TransferEventSender,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let filter = LogFilter::new(&chain.contract_address, &chain.transfer_topic);
        Self::new(
            chain.ws_url.clone(),
            config,
            StreamSession::new(filter, chain.token_decimals),
            event_tx,
            shutdown_rx,
        )
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Run the EventStreamSubscriber.
    pub async fn run(mut self) {
        info!(url = %self.ws_url, "EventStreamSubscriber started");

        loop {
            if self.shutdown_requested() {
                break;
            }

            match self.run_connection().await {
                Ok(ConnectionEnd::Shutdown) => {
                    info!("EventStreamSubscriber received shutdown signal");
                    break;
                }
                Ok(ConnectionEnd::Abandoned) => {
                    info!("TransferObserved channel closed");
                    break;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        delay = ?self.config.reconnect_delay,
                        "Event stream disconnected, reconnecting"
                    );
                }
            }
            self.session.disconnect();

            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || self.shutdown_requested() {
                        info!("EventStreamSubscriber received shutdown signal");
                        break;
                    }
                }

                _ = sleep(self.config.reconnect_delay) => {}
            }
        }

        self.session.disconnect();
        info!("EventStreamSubscriber shutdown complete");
    }

    /// Drive one connection from handshake to disconnect.
    async fn run_connection(&mut self) -> Result<ConnectionEnd, StreamError> {
        let idle_timeout = self.config.idle_timeout;
        let ws_url = self.ws_url.clone();
        let handshake = timeout(idle_timeout, connect_async(ws_url.as_str()));
        tokio::pin!(handshake);
        let ws = loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || self.shutdown_requested() {
                        return Ok(ConnectionEnd::Shutdown);
                    }
                }

                connected = &mut handshake => {
                    let (ws, _) = connected
                        .map_err(|_| StreamError::HandshakeTimeout(idle_timeout))??;
                    break ws;
                }
            }
        };
        let (mut sink, mut frames) = ws.split();
        info!(url = %self.ws_url, "Event stream connected");

        for request in self.session.connect() {
            send_request(&mut sink, &request).await?;
        }

        let keepalive_period = self.config.keepalive_interval;
        let mut keepalive = interval_at(Instant::now() + keepalive_period, keepalive_period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let idle = sleep(idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || self.shutdown_requested() {
                        let _ = sink.close().await;
                        return Ok(ConnectionEnd::Shutdown);
                    }
                }

                _ = &mut idle => {
                    return Err(StreamError::Stalled(idle_timeout));
                }

                _ = keepalive.tick() => {
                    let probe = self.session.keepalive_probe();
                    debug!(id = probe.id, "Sending keepalive probe");
                    send_request(&mut sink, &probe).await?;
                }

                frame = frames.next() => {
                    let Some(frame) = frame else {
                        return Err(StreamError::Closed);
                    };
                    idle.as_mut().reset(Instant::now() + idle_timeout);

                    match frame? {
                        Message::Text(text) => {
                            if !self.handle_text(&text).await? {
                                return Ok(ConnectionEnd::Abandoned);
                            }
                        }
                        Message::Ping(payload) => sink.send(Message::Pong(payload)).await?,
                        Message::Close(frame) => {
                            debug!(frame = ?frame, "Close frame received");
                            return Err(StreamError::Closed);
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Feed a text frame to the session and publish what it yields.
    ///
    /// Returns `false` once the event receiver has been dropped.
    async fn handle_text(&mut self, text: &str) -> Result<bool, StreamError> {
        match self.session.handle_frame(text) {
            Ok(FrameOutcome::Confirmed {
                name,
                provider_id,
                all_confirmed,
            }) => {
                info!(subscription = %name, provider_id = %provider_id, "Subscription confirmed");
                if all_confirmed {
                    info!("Event stream subscribed");
                }
            }
            Ok(FrameOutcome::Transfer(observed)) => {
                debug!(
                    subscription = %observed.subscription,
                    tx_hash = %observed.transfer.tx_hash,
                    to = %observed.transfer.to,
                    tokens = %observed.transfer.tokens,
                    "Transfer observed"
                );
                if self.event_tx.send(observed).await.is_err() {
                    return Ok(false);
                }
            }
            Ok(FrameOutcome::Dropped) | Ok(FrameOutcome::Reply) => {}
            Err(StreamError::Malformed(e)) => {
                warn!(error = %e, "Ignoring malformed frame");
            }
            Err(e) => {
                error!(error = %e, "Event stream protocol error");
                return Err(e);
            }
        }
        Ok(true)
    }
}

async fn send_request<S>(sink: &mut S, request: &JsonRpcRequest) -> Result<(), StreamError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(request)?;
    sink.send(Message::Text(text)).await?;
    Ok(())
}
