//! # Huddle Core
//!
//! Core types, collaborator traits, and errors for the Huddle unread engine.
//!
//! The unread engine never talks to a database directly. It consumes three
//! collaborators through the traits in this crate, so the same tracker and
//! aggregator logic runs against the hosted document store in production and
//! against the in-memory stores in `huddle-storage` for tests and simulation.
//!
//! ## Key Traits
//!
//! - [`MembershipDirectory`]: live set of groups a user belongs to
//! - [`WatermarkStore`]: per `(group, user)` last-read timestamps
//! - [`MessageFeed`]: timestamp-ordered messages per group
//! - [`Clock`]: Time abstraction for testability
//!
//! ## Key Types
//!
//! - [`GroupId`], [`UserId`], [`MessageId`]: document identifiers
//! - [`Timestamp`]: milliseconds since the Unix epoch
//! - [`Subscription`]: a live stream paired with its cancellation handle

pub mod error;
pub mod identity;
pub mod message;
pub mod subscription;
pub mod traits;

// Re-export main types
pub use error::*;
pub use identity::*;
pub use message::*;
pub use subscription::*;
pub use traits::*;
