//! Ordered notification filter chain
//!
//! Each filter receives the context and a [`Next`] handle. Calling
//! [`Next::invoke`] passes the context on; returning without calling it
//! vetoes the notification. `Next` is consumed by value, so a filter can
//! continue the chain at most once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::context::NotifyContext;
use super::delivery::Delivery;

/// Errors raised inside the chain
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    /// The delivery collaborator failed
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// A filter failed and aborted the chain
    #[error("filter {filter} failed: {message}")]
    Filter { filter: String, message: String },
}

/// One gate in the chain
#[async_trait]
pub trait NotifyFilter: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Position in the chain; lower runs first
    fn order(&self) -> i32;

    /// Call `next.invoke(ctx)` to continue, or return to veto
    async fn do_filter(&self, ctx: &NotifyContext, next: Next<'_>) -> Result<(), NotifyError>;
}

/// Remainder of the chain after the current filter
pub struct Next<'a> {
    filters: &'a [Arc<dyn NotifyFilter>],
    delivery: &'a dyn Delivery,
    delivered: &'a AtomicBool,
}

impl<'a> Next<'a> {
    /// Run the remaining filters, then delivery if none of them vetoes
    pub async fn invoke(self, ctx: &NotifyContext) -> Result<(), NotifyError> {
        match self.filters.split_first() {
            Some((filter, rest)) => {
                let next = Next {
                    filters: rest,
                    delivery: self.delivery,
                    delivered: self.delivered,
                };
                filter.do_filter(ctx, next).await
            }
            None => {
                self.delivery.deliver(ctx).await?;
                self.delivered.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    /// Filters still ahead, delivery excluded
    pub fn remaining(&self) -> usize {
        self.filters.len()
    }
}

/// Result of firing one context through the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    Delivered,
    Vetoed,
}

/// Filters sorted by order, ending in a delivery
pub struct NotifyChain {
    filters: Vec<Arc<dyn NotifyFilter>>,
    delivery: Arc<dyn Delivery>,
}

impl NotifyChain {
    /// Build a chain; filters are sorted once by order, keeping insertion
    /// order among equal orders
    pub fn new(mut filters: Vec<Arc<dyn NotifyFilter>>, delivery: Arc<dyn Delivery>) -> Self {
        filters.sort_by_key(|filter| filter.order());
        Self { filters, delivery }
    }

    /// Filter names in execution order
    pub fn filter_names(&self) -> Vec<&str> {
        self.filters.iter().map(|filter| filter.name()).collect()
    }

    /// Pass `ctx` through every filter and deliver it if none vetoes.
    ///
    /// A filter or delivery error aborts the chain and is returned; callers
    /// treat it as a veto.
    #[instrument(skip(self, ctx), fields(id = %ctx.id, pool = %ctx.pool_name, kind = %ctx.item.kind))]
    pub async fn fire(&self, ctx: &NotifyContext) -> Result<ChainOutcome, NotifyError> {
        let delivered = AtomicBool::new(false);
        let head = Next {
            filters: &self.filters,
            delivery: self.delivery.as_ref(),
            delivered: &delivered,
        };

        if let Err(e) = head.invoke(ctx).await {
            warn!(error = %e, "Notification chain aborted");
            return Err(e);
        }

        if delivered.load(Ordering::SeqCst) {
            debug!("Notification delivered");
            Ok(ChainOutcome::Delivered)
        } else {
            debug!("Notification vetoed");
            Ok(ChainOutcome::Vetoed)
        }
    }
}

impl std::fmt::Debug for NotifyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyChain")
            .field("filters", &self.filter_names())
            .finish_non_exhaustive()
    }
}
