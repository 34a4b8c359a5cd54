//! Document identifiers
//!
//! Groups, users, and messages are documents in the hosted store and are
//! addressed by opaque string ids. Each kind gets its own newtype so a group
//! id can never be passed where a user id is expected.

use std::str::FromStr;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

fn validate(kind: &'static str, value: &str) -> Result<(), IdentityError> {
    if value.is_empty() {
        return Err(IdentityError::Empty { kind });
    }
    if value.contains('/') {
        return Err(IdentityError::Invalid {
            kind,
            value: value.to_string(),
            reason: "contains '/'",
        });
    }
    Ok(())
}

macro_rules! document_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an id, rejecting empty values and path separators.
            pub fn new(value: impl Into<String>) -> Result<Self, IdentityError> {
                let value = value.into();
                validate($kind, &value)?;
                Ok(Self(value))
            }

            /// Get the id as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdentityError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

document_id!(
    /// Identifier of a group (the unit that owns a chat and a member list)
    GroupId,
    "group"
);

document_id!(
    /// Identifier of a user
    UserId,
    "user"
);

document_id!(
    /// Identifier of a chat message
    MessageId,
    "message"
);
