//! Notification pipeline
//!
//! This module provides:
//! - [`NotifyContext`] - One candidate alert with its item and pool statistics
//! - [`NotifyChain`] - Ordered, short-circuiting filter chain ending in delivery
//! - [`ThresholdFilter`], [`RateLimitFilter`] - Stock filters
//! - [`LogDelivery`], [`ChannelDelivery`] - Delivery collaborators
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dynapool::notify::*;
//!
//! let chain = NotifyChain::new(
//!     vec![Arc::new(ThresholdFilter), Arc::new(RateLimitFilter::new(limiter))],
//!     Arc::new(LogDelivery),
//! );
//!
//! let ctx = NotifyContext::new("io-pool", NotifyItem::new(NotifyKind::QueueFull), 92.5);
//! chain.fire(&ctx).await?;
//! ```

mod chain;
mod context;
mod delivery;
mod filters;

pub use chain::{ChainOutcome, Next, NotifyChain, NotifyError, NotifyFilter};
pub use context::{NotifyContext, NotifyItem, NotifyKind};
pub use delivery::{ChannelDelivery, Delivery, LogDelivery};
pub use filters::{
    RateLimitFilter, ThresholdFilter, RATE_LIMIT_FILTER_ORDER, THRESHOLD_FILTER_ORDER,
};
