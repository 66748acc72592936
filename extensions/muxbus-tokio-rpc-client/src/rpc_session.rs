use muxbus::frame::Message;
use muxbus::pool::Recycle;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

/// Single-slot hand-off between the receive loop and one waiting caller.
#[derive(Default)]
pub(crate) struct DeliverySlot {
    message: Mutex<Option<Message>>,
    ready: Notify,
}

impl DeliverySlot {
    pub(crate) fn deliver(&self, message: Message) {
        let replaced = self
            .message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(message);
        if replaced.is_some() {
            tracing::warn!("duplicate response delivered to session; keeping the latest");
        }
        self.ready.notify_one();
    }

    pub(crate) fn take(&self) -> Option<Message> {
        self.message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub(crate) async fn wait(&self) -> Message {
        loop {
            let notified = self.ready.notified();
            if let Some(message) = self.take() {
                return message;
            }
            notified.await;
        }
    }
}

/// Pending state of one synchronous call.
#[derive(Default)]
pub(crate) struct RpcSession {
    slot: Arc<DeliverySlot>,
}

impl RpcSession {
    pub(crate) fn slot(&self) -> Arc<DeliverySlot> {
        self.slot.clone()
    }

    pub(crate) fn deliver(&self, message: Message) {
        self.slot.deliver(message);
    }

    pub(crate) fn take_delivered(&self) -> Option<Message> {
        self.slot.take()
    }
}

impl Recycle for RpcSession {
    fn recycle(&mut self) {
        match Arc::get_mut(&mut self.slot) {
            // Sole owner: reset in place, which also drops any stored wake-up.
            Some(slot) => *slot = DeliverySlot::default(),
            None => self.slot = Arc::default(),
        }
    }
}
