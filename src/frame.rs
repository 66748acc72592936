mod frame_command;
mod frame_error;
mod frame_header;
mod frame_message;

pub use frame_command::FrameCommand;
pub use frame_error::{FrameDecodeError, FrameEncodeError};
pub use frame_header::FrameHeader;
pub use frame_message::Message;
