//! Shared wire and payload types for paywatch.
//!
//! Merchants depend on this crate to parse postback bodies and payment
//! status responses; the core crate uses it for the JSON-RPC envelope
//! spoken with the chain node.

#![forbid(unsafe_code)]

pub mod objects;
