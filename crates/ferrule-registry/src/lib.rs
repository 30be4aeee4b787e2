//! Ferrule registry contract.
//!
//! Providers publish [`RegisterMeta`] records, consumers subscribe to
//! directories and receive publish / cancel / offline pushes. Every message
//! is acknowledged by its receiver; the sender re-sends anything un-acked
//! after a grace period (10 s by default). Pushes carry a per-directory
//! version and receivers drop any push not newer than the last one applied.
//!
//! The registry server itself is an external collaborator; this crate holds
//! the message types and the client side.

pub mod ack;
pub mod client;
pub mod message;
pub mod version;

pub use ack::{AckTracker, DEFAULT_ACK_GRACE};
pub use client::{NotifyListener, RegistryClient, RegistryClientConfig, RegistryEvent};
pub use message::{Payload, RegisterMeta, RegistryMessage};
pub use version::VersionGuard;
