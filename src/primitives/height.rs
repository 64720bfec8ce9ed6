// Copyright 2022 ComposableFi
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::core::error::Error;
use ibc_proto::ibc::core::client::v1::Height as RawHeight;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// A block position on a chain that may go through revision (hard fork) epochs.
///
/// Ordering is lexicographic over `(revision_number, revision_height)`. The all-zero
/// height is used on the wire to mean "no height timeout"; comparisons that must honour
/// that sentinel go through [`crate::primitives::funcs::height_greater`].
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Height {
    pub revision_number: u64,
    pub revision_height: u64,
}

impl Height {
    pub const fn new(revision_number: u64, revision_height: u64) -> Self {
        Self {
            revision_number,
            revision_height,
        }
    }

    pub const fn zero() -> Self {
        Self::new(0, 0)
    }

    pub fn is_zero(&self) -> bool {
        self.revision_number == 0 && self.revision_height == 0
    }

    pub fn increment(&self) -> Self {
        self.add(1)
    }

    pub fn add(&self, delta: u64) -> Self {
        Self::new(
            self.revision_number,
            self.revision_height.saturating_add(delta),
        )
    }

    /// Returns `None` when the revision height would drop to zero.
    pub fn decrement(&self) -> Option<Self> {
        match self.revision_height {
            0 | 1 => None,
            h => Some(Self::new(self.revision_number, h - 1)),
        }
    }
}

impl fmt::Display for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.revision_number, self.revision_height)
    }
}

impl FromStr for Height {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (number, height) = s
            .split_once('-')
            .ok_or_else(|| Error::Parse(format!("height `{}` is not of the form N-H", s)))?;
        let revision_number = number
            .parse::<u64>()
            .map_err(|e| Error::Parse(format!("invalid revision number in `{}`: {}", s, e)))?;
        let revision_height = height
            .parse::<u64>()
            .map_err(|e| Error::Parse(format!("invalid revision height in `{}`: {}", s, e)))?;
        Ok(Self::new(revision_number, revision_height))
    }
}

impl From<Height> for RawHeight {
    fn from(height: Height) -> Self {
        RawHeight {
            revision_number: height.revision_number,
            revision_height: height.revision_height,
        }
    }
}

impl From<RawHeight> for Height {
    fn from(raw: RawHeight) -> Self {
        Height::new(raw.revision_number, raw.revision_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_revision_number_first() {
        let low_revision = Height::new(1, 900);
        let high_revision = Height::new(2, 1);
        assert!(high_revision > low_revision);
        assert!(Height::new(2, 5) > Height::new(2, 4));
    }

    #[test]
    fn parses_and_displays_dash_form() {
        let height: Height = "4-1234".parse().unwrap();
        assert_eq!(height, Height::new(4, 1234));
        assert_eq!(height.to_string(), "4-1234");
        assert!("1234".parse::<Height>().is_err());
        assert!("a-1".parse::<Height>().is_err());
    }

    #[test]
    fn decrement_stops_above_zero() {
        assert_eq!(Height::new(0, 5).decrement(), Some(Height::new(0, 4)));
        assert_eq!(Height::new(3, 1).decrement(), None);
    }
}
