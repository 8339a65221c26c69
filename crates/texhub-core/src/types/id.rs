//! Entity identifiers.
//!
//! Each id is a distinct newtype over [`Uuid`]. The hyphenated form is
//! what the primary datastore and tokens carry; the 32-character hex form
//! names Redis channels and lock keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of [`ProjectId::to_hex`] and friends.
pub const HEX_ID_LEN: usize = 32;

macro_rules! uuid_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Random (v4) id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Dash-free lowercase hex.
            pub fn to_hex(&self) -> String {
                self.0.simple().to_string()
            }

            /// Inverse of [`Self::to_hex`]; any other length is rejected.
            pub fn from_hex(hex: &str) -> Option<Self> {
                (hex.len() == HEX_ID_LEN)
                    .then(|| Uuid::try_parse(hex).ok())
                    .flatten()
                    .map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }
    };
}

uuid_newtype!(
    /// A user account.
    UserId
);
uuid_newtype!(
    /// A project; also the unit of collaboration (one room per project).
    ProjectId
);
uuid_newtype!(
    /// A document inside a project.
    DocId
);
uuid_newtype!(
    /// A connected client as other room members see it.
    PublicId
);
