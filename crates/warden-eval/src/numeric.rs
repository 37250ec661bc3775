//! Checked decimal arithmetic and comparison, used by `value.rs`'s operator
//! implementations. `Number` is backed by `rust_decimal::Decimal`; every operation
//! here returns an `Option`/`Ordering` rather than panicking on overflow, mirroring
//! `tenor-eval/src/numeric.rs`'s checked-arithmetic discipline (never use a bare
//! `+`/`*` on a `Decimal` that came from untrusted policy input).

use std::cmp::Ordering;

use rust_decimal::Decimal;

pub fn add(a: Decimal, b: Decimal) -> Option<Decimal> {
    a.checked_add(b)
}

pub fn sub(a: Decimal, b: Decimal) -> Option<Decimal> {
    a.checked_sub(b)
}

pub fn mul(a: Decimal, b: Decimal) -> Option<Decimal> {
    a.checked_mul(b)
}

/// Division by zero is reported by the caller as `Error`, not `None` here --
/// `rust_decimal` itself panics on `/` by zero, so we guard before calling.
pub fn div(a: Decimal, b: Decimal) -> Option<Decimal> {
    if b.is_zero() {
        return None;
    }
    a.checked_div(b)
}

pub fn rem(a: Decimal, b: Decimal) -> Option<Decimal> {
    if b.is_zero() {
        return None;
    }
    a.checked_rem(b)
}

pub fn neg(a: Decimal) -> Option<Decimal> {
    a.checked_neg()
}

/// Numbers compare by mathematical value (spec.md §3: "numbers compare by
/// mathematical value"); `Decimal`'s `Ord` already normalizes scale for this.
pub fn compare(a: Decimal, b: Decimal) -> Ordering {
    a.cmp(&b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn division_by_zero_is_none_not_panic() {
        assert_eq!(div(d("1"), d("0")), None);
    }

    #[test]
    fn modulo_by_zero_is_none_not_panic() {
        assert_eq!(rem(d("1"), d("0")), None);
    }

    #[test]
    fn equal_values_with_different_scale_compare_equal() {
        assert_eq!(compare(d("1.0"), d("1.00")), Ordering::Equal);
    }

    #[test]
    fn overflow_on_multiply_is_none() {
        assert_eq!(mul(Decimal::MAX, Decimal::MAX), None);
    }
}
