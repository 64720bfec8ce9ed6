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

use super::height::Height;
use ibc_proto::google::protobuf::Timestamp;
use tendermint::Time;

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Returns true if a packet with timeout height `a` is still valid at height `b`.
///
/// An unset or all-zero `a` means no height based timeout was configured, so it is always
/// greater.
pub fn height_greater(a: Option<&Height>, b: &Height) -> bool {
    match a {
        None => true,
        Some(a) if a.is_zero() => true,
        Some(a) => a > b,
    }
}

/// Returns true if a packet with timeout timestamp `a` (nanoseconds) is still valid at time
/// `b` (seconds). Unset or zero `a` means no timestamp based timeout.
pub fn time_greater(a: Option<u64>, b: u64) -> bool {
    match a {
        None | Some(0) => true,
        Some(a) => u128::from(a) > u128::from(b) * u128::from(NANOS_PER_SECOND),
    }
}

/// Splits a header time into whole seconds and the nanosecond remainder.
pub fn timestamp_from_time(time: Time) -> Timestamp {
    let nanos = time.unix_timestamp_nanos();
    let per_second = i128::from(NANOS_PER_SECOND);
    Timestamp {
        seconds: nanos.div_euclid(per_second) as i64,
        nanos: nanos.rem_euclid(per_second) as i32,
    }
}

/// Unix time of `time` in nanoseconds, clamped to zero for pre-epoch times.
pub fn time_to_nanos(time: Time) -> u64 {
    u64::try_from(time.unix_timestamp_nanos()).unwrap_or(0)
}

/// Unix time of `time` in whole seconds.
pub fn time_to_seconds(time: Time) -> u64 {
    time_to_nanos(time) / NANOS_PER_SECOND
}

/// Extracts the revision number from an epoch formatted chain id such as `osmosis-1`.
/// Chain ids without a numeric `-N` suffix are revision 0.
pub fn parse_revision_number(chain_id: &str) -> u64 {
    match chain_id.rsplit_once('-') {
        Some((name, revision))
            if !name.is_empty()
                && !name.ends_with('-')
                && !revision.starts_with('0')
                && !revision.is_empty()
                && revision.bytes().all(|b| b.is_ascii_digit()) =>
        {
            revision.parse().unwrap_or(0)
        }
        _ => 0,
    }
}

/// Prepends the store prefix to an ICS-24 path, giving the key proofs are queried for.
pub fn apply_prefix(mut commitment_prefix: Vec<u8>, path: String) -> Vec<u8> {
    let path = path.as_bytes().to_vec();
    commitment_prefix.extend_from_slice(&path);
    commitment_prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_height_is_always_greater() {
        for b in [Height::zero(), Height::new(0, 1), Height::new(u64::MAX, u64::MAX)] {
            assert!(height_greater(None, &b));
            assert!(height_greater(Some(&Height::zero()), &b));
        }
    }

    #[test]
    fn same_revision_compares_heights() {
        for (a, b) in [(5, 4), (4, 4), (4, 5), (100, 1)] {
            assert_eq!(
                height_greater(Some(&Height::new(1, a)), &Height::new(1, b)),
                a > b
            );
        }
    }

    #[test]
    fn revision_number_dominates() {
        assert!(height_greater(Some(&Height::new(2, 1)), &Height::new(1, 1000)));
        assert!(!height_greater(Some(&Height::new(1, 1000)), &Height::new(2, 1)));
    }

    #[test]
    fn time_greater_compares_nanos_to_seconds() {
        assert!(time_greater(None, 1_000));
        assert!(time_greater(Some(0), 1_000));
        assert!(time_greater(Some(1_000 * NANOS_PER_SECOND + 1), 1_000));
        assert!(!time_greater(Some(1_000 * NANOS_PER_SECOND), 1_000));
        assert!(!time_greater(Some(1), u64::MAX));
    }

    #[test]
    fn timestamp_keeps_sub_second_precision() {
        let time = Time::from_unix_timestamp(1_600_000_000, 123_456_789).unwrap();
        let ts = timestamp_from_time(time);
        assert_eq!(ts.seconds, 1_600_000_000);
        assert_eq!(ts.nanos, 123_456_789);
        assert_eq!(time_to_seconds(time), 1_600_000_000);
        assert_eq!(time_to_nanos(time), 1_600_000_000_123_456_789);
    }

    #[test]
    fn revision_number_from_chain_id() {
        assert_eq!(parse_revision_number("osmosis-1"), 1);
        assert_eq!(parse_revision_number("ibc-12"), 12);
        assert_eq!(parse_revision_number("testing"), 0);
        assert_eq!(parse_revision_number("simd-0"), 0);
        assert_eq!(parse_revision_number("-4"), 0);
        assert_eq!(parse_revision_number("chain-v2"), 0);
    }
}
