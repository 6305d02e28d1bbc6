//! Delivery collaborators invoked once a notification passes every filter

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::chain::NotifyError;
use super::context::NotifyContext;

/// Sends an approved notification to its audience
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, ctx: &NotifyContext) -> Result<(), NotifyError>;
}

/// Writes approved notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDelivery;

#[async_trait]
impl Delivery for LogDelivery {
    async fn deliver(&self, ctx: &NotifyContext) -> Result<(), NotifyError> {
        let (active, max, queued) = ctx
            .snapshot
            .as_ref()
            .map(|s| (s.active_count, s.maximum_pool_size, s.queue_size))
            .unwrap_or((-1, -1, -1));

        if ctx.item.kind.has_threshold() {
            warn!(
                id = %ctx.id,
                pool = %ctx.pool_name,
                kind = %ctx.item.kind,
                value = ctx.value,
                threshold = ctx.item.threshold,
                active,
                max,
                queued,
                "Pool alert"
            );
        } else {
            info!(
                id = %ctx.id,
                pool = %ctx.pool_name,
                kind = %ctx.item.kind,
                detail = ctx.detail.as_deref().unwrap_or(""),
                "Pool notification"
            );
        }
        Ok(())
    }
}

/// Forwards approved notifications to an in-process receiver
#[derive(Debug, Clone)]
pub struct ChannelDelivery {
    tx: mpsc::UnboundedSender<NotifyContext>,
}

impl ChannelDelivery {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NotifyContext>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Delivery for ChannelDelivery {
    async fn deliver(&self, ctx: &NotifyContext) -> Result<(), NotifyError> {
        self.tx
            .send(ctx.clone())
            .map_err(|_| NotifyError::Delivery("notification receiver dropped".to_string()))
    }
}
