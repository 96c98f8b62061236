use async_trait::async_trait;
use parking_lot::Mutex;

use super::message::MessageContext;
use crate::error::DispatchError;

/// Delivers messages an actor emits for other entities
#[async_trait]
pub trait MessageRouter: Send + Sync {
    async fn route(&self, ctx: MessageContext) -> Result<(), DispatchError>;

    /// Messages accepted but not yet delivered
    fn pending(&self) -> usize {
        0
    }
}

/// Router that records messages instead of sending them
#[derive(Debug, Default)]
pub struct CollectingRouter {
    routed: Mutex<Vec<MessageContext>>,
}

impl CollectingRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything routed so far
    pub fn take(&self) -> Vec<MessageContext> {
        std::mem::take(&mut *self.routed.lock())
    }

    pub fn len(&self) -> usize {
        self.routed.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MessageRouter for CollectingRouter {
    async fn route(&self, ctx: MessageContext) -> Result<(), DispatchError> {
        self.routed.lock().push(ctx);
        Ok(())
    }
}

/// Router that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRouter;

#[async_trait]
impl MessageRouter for NoopRouter {
    async fn route(&self, _ctx: MessageContext) -> Result<(), DispatchError> {
        Ok(())
    }
}
