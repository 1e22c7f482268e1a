pub mod channel;
pub mod speaker;

pub use channel::{OutputDevice, OutputHandle, PlaybackChannel, PlaybackStats};
pub use speaker::CpalSpeaker;
