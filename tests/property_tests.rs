//! Property-based tests for smax-postgres's pure computational primitives:
//! the type encoder's widening order and the rule engine's sampling math.
//!
//! # Prerequisites
//!
//! - No database or network access required; these always run.
//!
//! ```bash
//! cargo test --test property_tests
//! PROPTEST_CASES=10000 cargo test --test property_tests
//! ```

use proptest::prelude::*;
use smax_postgres::descriptor::digit_width;
use smax_postgres::encoding::{cmp_width, is_wider, string_column_type, SqlType};
use smax_postgres::rules::sample_count;
use std::cmp::Ordering;

proptest! {
    /// `cmp_width` is antisymmetric: if `a` is wider than `b`, `b` is never
    /// wider than `a`, and never equal.
    #[test]
    fn prop_cmp_width_antisymmetric(na in 1usize..10000, nb in 1usize..10000) {
        let a = SqlType::Varchar(na);
        let b = SqlType::Varchar(nb);
        match cmp_width(&a, &b) {
            Ordering::Greater => prop_assert_eq!(cmp_width(&b, &a), Ordering::Less),
            Ordering::Less => prop_assert_eq!(cmp_width(&b, &a), Ordering::Greater),
            Ordering::Equal => prop_assert_eq!(cmp_width(&b, &a), Ordering::Equal),
        }
    }

    /// Varchar widening tracks the requested length directly: a varchar sized
    /// for `n` bytes is never narrower than one sized for any `m <= n`.
    #[test]
    fn prop_string_column_type_monotonic(n in 0usize..1_000_000, delta in 0usize..1_000_000) {
        let small = string_column_type(n);
        let large = string_column_type(n + delta);
        prop_assert!(!is_wider(&small, &large));
    }

    /// `string_column_type` always returns a column wide enough to hold
    /// `max_len` bytes (or `Text`, which has no declared limit).
    #[test]
    fn prop_string_column_type_fits(max_len in 0usize..100_000) {
        match string_column_type(max_len) {
            SqlType::Varchar(n) => prop_assert!(n >= max_len),
            SqlType::Text => {}
            other => prop_assert!(false, "unexpected column type {other:?}"),
        }
    }

    /// `sample_count` never exceeds the raw field count and is never zero
    /// unless the field count itself is zero.
    #[test]
    fn prop_sample_count_bounded(field_count in 0usize..100_000, sampling in 0u32..1000) {
        let n = sample_count(field_count, sampling);
        prop_assert!(n <= field_count);
        if field_count > 0 {
            prop_assert!(n > 0);
        }
    }

    /// `sample_count` with `sampling <= 1` is the identity: every field is kept.
    #[test]
    fn prop_sample_count_identity_at_stride_one(field_count in 0usize..100_000) {
        prop_assert_eq!(sample_count(field_count, 1), field_count);
        prop_assert_eq!(sample_count(field_count, 0), field_count);
    }

    /// The canonical column digit width never decreases as the column count
    /// grows, and is always at least 1.
    #[test]
    fn prop_digit_width_monotonic_and_positive(cols in 1usize..1_000_000, delta in 0usize..1_000_000) {
        let w1 = digit_width(cols);
        let w2 = digit_width(cols + delta);
        prop_assert!(w1 >= 1);
        prop_assert!(w2 >= w1);
    }
}
