use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The command byte carried at offset 12 of every frame header.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
pub enum FrameCommand {
    /// A call that expects a `Response` or `Error` carrying the same sequence.
    Request = 1,

    /// Successful reply to a `Request`; the body is the encoded result.
    Response = 2,

    /// Failed reply to a `Request`; the body is human-readable error text.
    Error = 3,

    /// One-way push. Dispatched like a request but never answered.
    Notify = 4,
}

impl FrameCommand {
    /// Whether a frame with this command is routed to a method handler
    /// (as opposed to being matched against a pending call).
    #[inline]
    pub fn is_inbound_call(self) -> bool {
        matches!(self, FrameCommand::Request | FrameCommand::Notify)
    }
}
