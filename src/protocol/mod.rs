pub mod codec;
pub mod messages;

pub use codec::{decode, encode, CodecError};
pub use messages::{ImageKind, MessageEnvelope, WireMessage};
