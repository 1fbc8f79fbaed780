pub mod buffer;
pub mod client;
pub mod error;
pub mod media;
pub mod packet;
pub mod protocol;
pub mod receiver;
pub mod search;
pub mod sender;
pub mod server;
pub mod session;

pub use buffer::ReorderBuffer;
pub use client::{PlayerConfig, StreamOrchestrator};
pub use error::{Result, StreamError};
pub use media::{MediaDescriptor, MediaLibrary, Quality, Speed};
pub use receiver::MediaReceiver;
pub use sender::MediaSender;
pub use server::{Server, ServerConfig};
pub use session::{RequestKind, SessionState, SessionStateMachine};
