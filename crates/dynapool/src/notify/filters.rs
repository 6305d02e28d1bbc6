//! Stock notification filters

use async_trait::async_trait;
use tracing::debug;

use super::chain::{Next, NotifyError, NotifyFilter};
use super::context::NotifyContext;
use crate::limiter::RateLimiter;

/// Order of [`ThresholdFilter`]
pub const THRESHOLD_FILTER_ORDER: i32 = 0;

/// Order of [`RateLimitFilter`]
pub const RATE_LIMIT_FILTER_ORDER: i32 = 10;

/// Vetoes disabled items and metric values below the item's threshold
#[derive(Debug, Default, Clone, Copy)]
pub struct ThresholdFilter;

#[async_trait]
impl NotifyFilter for ThresholdFilter {
    fn name(&self) -> &str {
        "threshold"
    }

    fn order(&self) -> i32 {
        THRESHOLD_FILTER_ORDER
    }

    async fn do_filter(&self, ctx: &NotifyContext, next: Next<'_>) -> Result<(), NotifyError> {
        if !ctx.item.enabled {
            debug!(pool = %ctx.pool_name, kind = %ctx.item.kind, "Notify item disabled");
            return Ok(());
        }

        if ctx.item.kind.has_threshold() && ctx.value < ctx.item.threshold {
            debug!(
                pool = %ctx.pool_name,
                kind = %ctx.item.kind,
                value = ctx.value,
                threshold = ctx.item.threshold,
                "Below threshold"
            );
            return Ok(());
        }

        next.invoke(ctx).await
    }
}

/// Vetoes a notification once its `pool:kind` key has spent the
/// cluster-wide budget for the current window
#[derive(Debug, Clone)]
pub struct RateLimitFilter {
    limiter: RateLimiter,
}

impl RateLimitFilter {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

#[async_trait]
impl NotifyFilter for RateLimitFilter {
    fn name(&self) -> &str {
        "rate-limit"
    }

    fn order(&self) -> i32 {
        RATE_LIMIT_FILTER_ORDER
    }

    async fn do_filter(&self, ctx: &NotifyContext, next: Next<'_>) -> Result<(), NotifyError> {
        let limit_key = ctx.limit_key();
        let decision = self
            .limiter
            .check(&limit_key, ctx.item.interval, ctx.item.cluster_limit)
            .await;

        if !decision.is_allowed() {
            debug!(limit_key = %limit_key, "Rate limit reached, notification suppressed");
            return Ok(());
        }

        next.invoke(ctx).await
    }
}
