//! Subscription state machine of the event stream.
//!
//! The session owns everything that must be rebuilt on reconnect: the
//! request id counter, the pending subscribe requests and the confirmed
//! provider subscription ids. It performs no I/O; the connection driver
//! feeds it inbound frames and sends the requests it produces.

use super::StreamError;
use crate::chain::{Log, TransferEvent};
use crate::events::TransferObserved;
use paywatch_sdk::objects::jsonrpc::SUBSCRIPTION_METHOD;
use paywatch_sdk::objects::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, SubscriptionNotification};
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Logical name of the token transfer subscription.
pub const TRANSFER_SUBSCRIPTION: &str = "token_transfers";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Connected, waiting for subscribe confirmations.
    Connecting,
    /// Every subscribe request has been confirmed.
    Subscribed,
}

/// Contract and topic the log subscription is filtered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: String,
    pub topic: String,
}

impl LogFilter {
    pub fn new(address: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            topic: topic.into(),
        }
    }

    fn matches(&self, log: &Log) -> bool {
        let topic_matches = log
            .topics
            .first()
            .is_some_and(|t| t.eq_ignore_ascii_case(&self.topic));
        let address_matches = log
            .address
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case(&self.address));
        topic_matches && address_matches
    }
}

/// What an inbound frame meant to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A subscribe request was confirmed.
    Confirmed {
        name: String,
        provider_id: String,
        all_confirmed: bool,
    },
    /// A matching transfer arrived on a live subscription.
    Transfer(TransferObserved),
    /// A notification that failed the filter or could not be decoded.
    Dropped,
    /// A reply to some other request, such as the keepalive probe.
    Reply,
}

#[derive(Debug)]
pub struct StreamSession {
    filter: LogFilter,
    decimals: u32,
    state: ConnectionState,
    next_id: u64,
    /// Outstanding subscribe request id -> logical name.
    pending: HashMap<u64, String>,
    /// Provider subscription id -> logical name.
    confirmed: HashMap<String, String>,
}

impl StreamSession {
    pub fn new(filter: LogFilter, decimals: u32) -> Self {
        Self {
            filter,
            decimals,
            state: ConnectionState::Disconnected,
            next_id: 0,
            pending: HashMap::new(),
            confirmed: HashMap::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Provider id confirmed for a logical subscription name.
    pub fn provider_id(&self, name: &str) -> Option<&str> {
        self.confirmed
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(id, _)| id.as_str())
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Start a fresh handshake on a new connection.
    ///
    /// Any state from a previous connection is discarded. Returns the
    /// subscribe requests to send.
    pub fn connect(&mut self) -> Vec<JsonRpcRequest> {
        self.pending.clear();
        self.confirmed.clear();
        self.next_id = 0;
        self.state = ConnectionState::Connecting;

        let id = self.next_id();
        self.pending.insert(id, TRANSFER_SUBSCRIPTION.to_string());
        vec![JsonRpcRequest::new(
            id,
            "eth_subscribe",
            vec![
                json!("logs"),
                json!({
                    "address": self.filter.address,
                    "topics": [self.filter.topic],
                }),
            ],
        )]
    }

    /// Drop every subscription; provider ids die with the connection.
    pub fn disconnect(&mut self) {
        self.pending.clear();
        self.confirmed.clear();
        self.state = ConnectionState::Disconnected;
    }

    /// Lightweight read-only request used as keepalive.
    pub fn keepalive_probe(&mut self) -> JsonRpcRequest {
        JsonRpcRequest::new(self.next_id(), "eth_blockNumber", vec![])
    }

    /// Interpret one inbound text frame.
    ///
    /// Errors other than [`StreamError::Malformed`] mean the connection can
    /// no longer be trusted and must be re-established.
    pub fn handle_frame(&mut self, text: &str) -> Result<FrameOutcome, StreamError> {
        match serde_json::from_str::<JsonRpcMessage>(text)? {
            JsonRpcMessage::Response(response) => self.on_response(response),
            JsonRpcMessage::Notification(notification) => self.on_notification(notification),
        }
    }

    fn on_response(&mut self, response: JsonRpcResponse) -> Result<FrameOutcome, StreamError> {
        let Some(name) = response.id.and_then(|id| self.pending.remove(&id)) else {
            return Ok(FrameOutcome::Reply);
        };
        let provider_id = match response.into_result() {
            Ok(Value::String(provider_id)) => provider_id,
            Ok(other) => {
                return Err(StreamError::SubscriptionFailure(format!(
                    "{name}: unexpected result {other}"
                )));
            }
            Err(error) => {
                return Err(StreamError::SubscriptionFailure(format!("{name}: {error}")));
            }
        };

        self.confirmed.insert(provider_id.clone(), name.clone());
        let all_confirmed = self.pending.is_empty();
        if all_confirmed {
            self.state = ConnectionState::Subscribed;
        }
        Ok(FrameOutcome::Confirmed {
            name,
            provider_id,
            all_confirmed,
        })
    }

    fn on_notification(
        &mut self,
        notification: SubscriptionNotification,
    ) -> Result<FrameOutcome, StreamError> {
        if notification.method != SUBSCRIPTION_METHOD {
            debug!(method = %notification.method, "Ignoring unexpected notification");
            return Ok(FrameOutcome::Dropped);
        }
        let provider_id = notification.params.subscription;
        let Some(name) = self.confirmed.get(&provider_id) else {
            return Err(StreamError::UnknownSubscription(provider_id));
        };

        let log: Log = match serde_json::from_value(notification.params.result) {
            Ok(log) => log,
            Err(e) => {
                warn!(subscription = %name, error = %e, "Undecodable log notification");
                return Ok(FrameOutcome::Dropped);
            }
        };
        if !self.filter.matches(&log) {
            debug!(subscription = %name, address = ?log.address, "Log does not match filter");
            return Ok(FrameOutcome::Dropped);
        }

        match TransferEvent::from_log(&log, self.decimals) {
            Ok(transfer) => Ok(FrameOutcome::Transfer(TransferObserved {
                subscription: name.clone(),
                transfer,
            })),
            Err(e) => {
                warn!(subscription = %name, error = %e, "Undecodable transfer log");
                Ok(FrameOutcome::Dropped)
            }
        }
    }
}
