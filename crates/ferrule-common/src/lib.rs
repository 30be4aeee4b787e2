//! Ferrule Common Types and Transport
//!
//! This crate provides the pieces shared by consumers, providers and the
//! registry client of the Ferrule RPC framework:
//!
//! - [`queue`] - lock-free bounded multi-producer/single-consumer queue
//! - [`protocol`] - wire envelope, status codes, request/response bodies and
//!   the error taxonomy
//! - [`future`] - single-assignment invocation future with blocking,
//!   listener and `async` access
//! - [`transport`] - frame codec and TCP channels
//!
//! # Example
//!
//! ```
//! use ferrule_common::{Directory, Request, Response, Status};
//! use serde_json::json;
//!
//! let request = Request::new(Directory::of("Calculator"), "add", vec![json!(1), json!(2)])
//!     .with_timeout(500);
//!
//! let response = Response::success(request.id, json!(3));
//! assert_eq!(response.status, Status::Ok);
//! ```

pub mod future;
pub mod protocol;
pub mod queue;
pub mod transport;

pub use future::{FnListener, InvokeFuture, Listener};
pub use protocol::*;
