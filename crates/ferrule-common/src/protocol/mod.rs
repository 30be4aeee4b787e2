pub mod directory;
pub mod error;
pub mod message;
pub mod requests;
pub mod responses;
pub mod status;


pub use directory::{Address, Directory};
pub use error::{FerruleError, Result, TimeoutKind};
pub use message::{MessageCode, SerializerType, WireMessage, HEADER_SIZE, MAGIC};
pub use requests::{next_request_id, MethodName, Request, RequestId, RpcArgs};
pub use responses::{Response, RpcResult};
pub use status::Status;
