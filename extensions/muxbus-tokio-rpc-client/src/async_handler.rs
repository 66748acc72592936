use crate::rpc_response::RpcResponseCallback;
use muxbus::pool::Recycle;
use tokio::task::AbortHandle;

/// Pending state of one asynchronous call that asked for a callback.
#[derive(Default)]
pub(crate) struct AsyncHandler {
    callback: Option<RpcResponseCallback>,
    expiry: Option<AbortHandle>,
}

impl AsyncHandler {
    pub(crate) fn arm(&mut self, callback: RpcResponseCallback) {
        self.callback = Some(callback);
    }

    pub(crate) fn set_expiry(&mut self, expiry: AbortHandle) {
        self.expiry = Some(expiry);
    }

    pub(crate) fn take_callback(&mut self) -> Option<RpcResponseCallback> {
        self.callback.take()
    }

    /// Forgets the expiry timer without cancelling it. Used from the timer
    /// task itself.
    pub(crate) fn disarm_expiry(&mut self) {
        self.expiry = None;
    }
}

impl Recycle for AsyncHandler {
    fn recycle(&mut self) {
        self.callback = None;
        if let Some(expiry) = self.expiry.take() {
            expiry.abort();
        }
    }
}
