//! # Huddle Storage
//!
//! In-memory implementations of the collaborators consumed by the unread
//! engine. They follow the same contracts as the hosted document store
//! (initial value on subscribe, full result sets on change, conditional
//! watermark writes) and add listener accounting and fault injection so
//! tests can observe teardown and drive failure paths.
//!
//! - [`InMemoryMembershipDirectory`]: user → group set
//! - [`InMemoryWatermarkStore`]: `(group, user)` → last-read timestamp
//! - [`InMemoryMessageFeed`]: group → timestamp-ordered messages

mod listeners;
pub mod memory;

pub use memory::{InMemoryMembershipDirectory, InMemoryMessageFeed, InMemoryWatermarkStore};
