//! Overflow-safe size and index arithmetic.
//!
//! Composed operators shift indices and sizes around (appending adds one, dropping subtracts
//! `n`, concatenation adds two sizes). None of these may wrap: results saturate at the ends of
//! the representable range instead.

use crate::Error;

/// Clamps a wide intermediate result into the `usize` range.
pub fn safe_cast(value: i128) -> usize {
    if value <= 0 {
        0
    } else {
        usize::try_from(value).unwrap_or(usize::MAX)
    }
}

#[inline]
pub fn add(a: usize, b: usize) -> usize {
    a.saturating_add(b)
}

/// `a - b`, never below zero.
#[inline]
pub fn sub(a: usize, b: usize) -> usize {
    a.saturating_sub(b)
}

/// Adds a constant to a size hint, keeping unknown sizes unknown.
#[inline]
pub fn hint_add(hint: Option<usize>, n: usize) -> Option<usize> {
    hint.map(|size| add(size, n))
}

/// Sums two size hints; the sum is unknown if either side is.
#[inline]
pub fn hint_sum(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    Some(add(a?, b?))
}

#[inline]
pub fn hint_sub(hint: Option<usize>, n: usize) -> Option<usize> {
    hint.map(|size| sub(size, n))
}

/// Validates a caller-supplied index.
///
/// Negative indices are a usage error reported to the caller; they are never translated or
/// forwarded to an upstream node.
#[inline]
pub fn checked_index(index: isize) -> Result<usize, Error> {
    usize::try_from(index).map_err(|_| Error::NegativeIndex(index))
}

/// Converts an internal index back to the signed form used by requests.
#[inline]
pub fn to_request(index: usize) -> isize {
    isize::try_from(index).unwrap_or(isize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturates_instead_of_wrapping() {
        assert_eq!(add(usize::MAX, 1), usize::MAX);
        assert_eq!(sub(3, 5), 0);
        assert_eq!(hint_add(Some(usize::MAX - 1), 4), Some(usize::MAX));
        assert_eq!(hint_sum(Some(usize::MAX), Some(usize::MAX)), Some(usize::MAX));
        assert_eq!(hint_sum(Some(1), None), None);
        assert_eq!(hint_sub(Some(2), 7), Some(0));
    }

    #[test]
    fn safe_cast_clamps() {
        assert_eq!(safe_cast(-5), 0);
        assert_eq!(safe_cast(42), 42);
        assert_eq!(safe_cast(i128::MAX), usize::MAX);
    }

    #[test]
    fn negative_index_is_rejected() {
        assert!(matches!(checked_index(-1), Err(Error::NegativeIndex(-1))));
        assert_eq!(checked_index(7).unwrap(), 7);
        assert_eq!(to_request(usize::MAX), isize::MAX);
    }
}
