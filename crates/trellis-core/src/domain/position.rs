//! Ordering keys: fractional, lexicographically sortable positions.
//!
//! A key is a base-62 fraction `0.d1 d2 d3 ...` written with the digits
//! `0-9A-Za-z` (ASCII order == numeric order). Keys never end with `0`, so
//! comparing two keys as plain strings gives the same answer as comparing the
//! fractions, and there is always room below any key.
//!
//! `generate_between` never touches siblings: every insert only needs its two
//! neighbors. Keys grow by roughly one digit per six inserts into the same
//! gap; once a key would exceed [`MAX_POSITION_LEN`] the generator reports
//! [`PositionError::Exhausted`] and the caller rebalances the list with
//! [`evenly_spaced`].

use std::fmt;

use serde::{Deserialize, Serialize};

const DIGITS: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE: u8 = 62;

/// Longest key the store column accepts.
pub const MAX_POSITION_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PositionError {
    #[error("invalid position key {0:?}")]
    Malformed(String),

    /// `low` must sort strictly before `high`.
    #[error("invalid range: {low} is not before {high}")]
    InvalidRange { low: Position, high: Position },

    /// No key short enough fits in the gap; rebalance the list.
    #[error("no key of at most {max_len} digits fits between {low:?} and {high:?}")]
    Exhausted {
        low: Option<Position>,
        high: Option<Position>,
        max_len: usize,
    },
}

/// Opaque sortable key of a task within its list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Position(String);

impl Position {
    pub fn parse(raw: impl Into<String>) -> Result<Self, PositionError> {
        let raw = raw.into();
        let valid = !raw.is_empty()
            && raw.len() <= MAX_POSITION_LEN
            && raw.bytes().all(|b| digit_value(b).is_some())
            && !raw.ends_with('0');
        if valid {
            Ok(Self(raw))
        } else {
            Err(PositionError::Malformed(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn digits(&self) -> Vec<u8> {
        self.0.bytes().filter_map(digit_value).collect()
    }

    fn from_digits(digits: &[u8]) -> Self {
        Self(digits.iter().map(|&d| DIGITS[d as usize] as char).collect())
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Position {
    type Error = PositionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Position> for String {
    fn from(position: Position) -> Self {
        position.0
    }
}

fn digit_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'A'..=b'Z' => Some(byte - b'A' + 10),
        b'a'..=b'z' => Some(byte - b'a' + 36),
        _ => None,
    }
}

/// Returns a key sorting strictly between `low` and `high`.
///
/// - `low == None`: sorts before `high`
/// - `high == None`: sorts after `low`
/// - both `None`: the middle of the key space
pub fn generate_between(
    low: Option<&Position>,
    high: Option<&Position>,
) -> Result<Position, PositionError> {
    if let (Some(low), Some(high)) = (low, high)
        && low >= high
    {
        return Err(PositionError::InvalidRange {
            low: low.clone(),
            high: high.clone(),
        });
    }

    let low_digits = low.map(Position::digits).unwrap_or_default();
    let high_digits = high.map(Position::digits);
    let key = midpoint(&low_digits, high_digits.as_deref());

    if key.len() > MAX_POSITION_LEN {
        return Err(PositionError::Exhausted {
            low: low.cloned(),
            high: high.cloned(),
            max_len: MAX_POSITION_LEN,
        });
    }
    Ok(Position::from_digits(&key))
}

/// Invariant: `low < high` as fractions, neither has trailing zeros.
fn midpoint(low: &[u8], high: Option<&[u8]>) -> Vec<u8> {
    if let Some(high) = high {
        let shared = high
            .iter()
            .enumerate()
            .take_while(|&(i, &d)| low.get(i).copied().unwrap_or(0) == d)
            .count();
        if shared > 0 {
            let mut key = high[..shared].to_vec();
            key.extend(midpoint(low.get(shared..).unwrap_or(&[]), Some(&high[shared..])));
            return key;
        }
    }

    let digit_low = low.first().copied().unwrap_or(0);
    let digit_high = high.and_then(|h| h.first().copied()).unwrap_or(BASE);

    if digit_high - digit_low > 1 {
        return vec![(digit_low + digit_high) / 2];
    }

    // Adjacent leading digits.
    match high {
        Some(high) if high.len() > 1 => vec![high[0]],
        _ => {
            let mut key = vec![digit_low];
            key.extend(midpoint(low.get(1..).unwrap_or(&[]), None));
            key
        }
    }
}

/// `count` keys spread evenly over the key space, in ascending order.
///
/// Used to rebalance a list whose gaps have become too deep.
pub fn evenly_spaced(count: usize) -> Vec<Position> {
    if count == 0 {
        return Vec::new();
    }

    let slots = count as u128 + 1;
    let mut width = 1u32;
    while (BASE as u128).pow(width) <= slots {
        width += 1;
    }
    let space = (BASE as u128).pow(width);
    let step = space / slots;

    (1..=count as u128)
        .map(|i| {
            let mut value = i * step;
            let mut digits = vec![0u8; width as usize];
            for slot in digits.iter_mut().rev() {
                *slot = (value % BASE as u128) as u8;
                value /= BASE as u128;
            }
            while digits.last() == Some(&0) {
                digits.pop();
            }
            Position::from_digits(&digits)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn pos(raw: &str) -> Position {
        Position::parse(raw).unwrap()
    }

    #[test]
    fn empty_list_gets_the_middle_key() {
        assert_eq!(generate_between(None, None).unwrap(), pos("V"));
    }

    #[rstest]
    #[case::wide_gap(Some("g"), Some("q"))]
    #[case::adjacent_digits(Some("g"), Some("h"))]
    #[case::prefix_of_high(Some("A"), Some("A1"))]
    #[case::high_has_more_digits(Some("A"), Some("B5"))]
    #[case::low_longer(Some("Az"), Some("B"))]
    #[case::open_start(None, Some("1"))]
    #[case::open_end(Some("z"), None)]
    #[case::deep_gap(Some("V0001"), Some("V0002"))]
    fn key_sorts_strictly_between(#[case] low: Option<&str>, #[case] high: Option<&str>) {
        let low = low.map(pos);
        let high = high.map(pos);
        let key = generate_between(low.as_ref(), high.as_ref()).unwrap();

        if let Some(low) = &low {
            assert!(low < &key, "{low} < {key}");
        }
        if let Some(high) = &high {
            assert!(&key < high, "{key} < {high}");
        }
        assert!(!key.as_str().ends_with('0'));
    }

    #[rstest]
    #[case::equal("m", "m")]
    #[case::reversed("q", "g")]
    fn rejects_empty_or_reversed_range(#[case] low: &str, #[case] high: &str) {
        let err = generate_between(Some(&pos(low)), Some(&pos(high))).unwrap_err();
        assert!(matches!(err, PositionError::InvalidRange { .. }));
    }

    #[rstest]
    #[case::empty("")]
    #[case::trailing_zero("a0")]
    #[case::bad_char("a-b")]
    fn rejects_malformed_keys(#[case] raw: &str) {
        assert!(matches!(
            Position::parse(raw),
            Err(PositionError::Malformed(_))
        ));
    }

    #[test]
    fn repeated_inserts_into_the_same_gap_stay_ordered() {
        let low = pos("g");
        let mut high = pos("h");
        for _ in 0..500 {
            let key = generate_between(Some(&low), Some(&high)).unwrap();
            assert!(low < key && key < high);
            high = key;
        }
    }

    #[test]
    fn exhaustion_is_reported_instead_of_a_bad_key() {
        let low = pos("g");
        let mut high = pos("h");
        let outcome = loop {
            match generate_between(Some(&low), Some(&high)) {
                Ok(key) => high = key,
                Err(err) => break err,
            }
        };
        assert!(matches!(
            outcome,
            PositionError::Exhausted { max_len: MAX_POSITION_LEN, .. }
        ));
        assert!(high.as_str().len() <= MAX_POSITION_LEN);
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(61)]
    #[case(62)]
    #[case(5_000)]
    fn evenly_spaced_keys_are_sorted_and_distinct(#[case] count: usize) {
        let keys = evenly_spaced(count);
        assert_eq!(keys.len(), count);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert!(keys.iter().all(|k| Position::parse(k.as_str()).is_ok()));
    }

    #[test]
    fn evenly_spaced_leaves_room_at_both_ends() {
        let keys = evenly_spaced(10);
        assert!(generate_between(None, keys.first()).is_ok());
        assert!(generate_between(keys.last(), None).is_ok());
    }

    #[test]
    fn position_serializes_as_plain_string() {
        let s = serde_json::to_string(&pos("m")).unwrap();
        assert_eq!(s, "\"m\"");
        assert!(serde_json::from_str::<Position>("\"m0\"").is_err());
    }

    fn key_strategy() -> impl Strategy<Value = Position> {
        "[0-9A-Za-z]{0,7}[1-9A-Za-z]".prop_map(|raw| Position::parse(raw).unwrap())
    }

    proptest! {
        #[test]
        fn between_any_two_distinct_keys(a in key_strategy(), b in key_strategy()) {
            prop_assume!(a != b);
            let (low, high) = if a < b { (a, b) } else { (b, a) };
            let key = generate_between(Some(&low), Some(&high)).unwrap();
            prop_assert!(low < key);
            prop_assert!(key < high);
        }

        #[test]
        fn before_and_after_any_key(a in key_strategy()) {
            let before = generate_between(None, Some(&a)).unwrap();
            let after = generate_between(Some(&a), None).unwrap();
            prop_assert!(before < a);
            prop_assert!(a < after);
        }
    }
}
