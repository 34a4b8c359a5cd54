//! # Huddle Unread
//!
//! Real-time unread counts for every group a user belongs to.
//!
//! [`UnreadTracker::start`] subscribes to the user's group memberships and
//! runs one group tracker task per group. Each tracker
//! watches the user's read watermark for its group and the group's message
//! feed, and reports a single count. The aggregator folds those counts into
//! a [`Summary`] and republishes it after every change.
//!
//! ```ignore
//! let tracker = UnreadTracker::new(directory, watermarks, feed, clock, UnreadConfig::default())?;
//! let (mut summaries, handle) = tracker.start(&me);
//!
//! while let Some(summary) = summaries.next().await {
//!     let summary = summary?;
//!     println!("{} unread in {} groups", summary.total_unread(), summary.groups_with_unread());
//! }
//!
//! // User opens a group
//! tracker.mark_group_read(&group, &me);
//!
//! handle.cancel();
//! ```

mod aggregator;
pub mod config;
pub mod error;
mod mark_read;
pub mod reconcile;
pub mod retry;
pub mod service;
pub mod summary;
mod tracker;

pub use config::{RetryPolicy, UnreadConfig};
pub use error::{Result, UnreadError};
pub use reconcile::ReconcilePlan;
pub use retry::Backoff;
pub use service::{SummaryStream, UnreadHandle, UnreadTracker};
pub use summary::Summary;
