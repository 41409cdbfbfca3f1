use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a packet on its stream.
///
/// Valid timestamps are a signed integer range; the extremes of `i64` are
/// reserved for sentinels that never appear on a packet in a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Timestamp of a packet that was never stamped.
    pub const UNSET: Timestamp = Timestamp(i64::MIN);
    /// Input timestamp seen by source calculators and during `open`.
    pub const UNSTARTED: Timestamp = Timestamp(i64::MIN + 1);
    /// Smallest timestamp a packet may carry.
    pub const MIN: Timestamp = Timestamp(i64::MIN + 2);
    /// Largest timestamp a packet may carry.
    pub const MAX: Timestamp = Timestamp(i64::MAX - 1);
    /// Bound of a closed stream.
    pub const DONE: Timestamp = Timestamp(i64::MAX);

    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> i64 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        *self >= Self::MIN && *self <= Self::MAX
    }

    /// Smallest timestamp strictly after this one. Saturates at `DONE`.
    pub fn next(&self) -> Timestamp {
        if *self >= Self::MAX {
            Self::DONE
        } else {
            Timestamp(self.0 + 1)
        }
    }

    /// Largest timestamp strictly before this one. `DONE` steps back to
    /// `MAX`; nothing steps below `UNSTARTED`.
    pub fn prev(&self) -> Timestamp {
        if *self <= Self::MIN {
            Self::UNSTARTED
        } else {
            Timestamp(self.0 - 1)
        }
    }
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<i32> for Timestamp {
    fn from(value: i32) -> Self {
        Self(value as i64)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UNSET => write!(f, "Timestamp::Unset"),
            Self::UNSTARTED => write!(f, "Timestamp::Unstarted"),
            Self::DONE => write!(f, "Timestamp::Done"),
            Timestamp(v) => write!(f, "{}", v),
        }
    }
}
