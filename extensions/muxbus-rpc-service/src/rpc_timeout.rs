use crate::constants::{TIME_FOREVER, TIME_ZERO};
use std::time::Duration;

/// How long an operation may wait for queue space (and, for calls, for the
/// response).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcTimeout {
    /// Fail immediately instead of waiting.
    NonBlocking,
    /// Wait up to the given duration.
    Within(Duration),
    /// Wait as long as it takes.
    Forever,
}

impl RpcTimeout {
    /// The bounded duration, if any.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            RpcTimeout::Within(duration) => Some(*duration),
            _ => None,
        }
    }
}

impl From<Duration> for RpcTimeout {
    fn from(duration: Duration) -> Self {
        if duration == TIME_ZERO {
            RpcTimeout::NonBlocking
        } else if duration == TIME_FOREVER {
            RpcTimeout::Forever
        } else {
            RpcTimeout::Within(duration)
        }
    }
}
