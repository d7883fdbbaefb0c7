//! User identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A stable numeric user identifier.
///
/// The wire carries it as a JSON number; REST paths and conversation keys
/// use its decimal string form, which is what [`fmt::Display`] and
/// [`FromStr`] convert between.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Wraps a raw numeric id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw numeric id.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error for ids that are not well-formed decimal integers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid user id: {0:?}")]
pub struct InvalidUserId(pub String);

impl FromStr for UserId {
    type Err = InvalidUserId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(InvalidUserId(s.to_owned()));
        }
        trimmed
            .parse::<i64>()
            .map(Self)
            .map_err(|_| InvalidUserId(s.to_owned()))
    }
}
