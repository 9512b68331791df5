//
// Copyright (c) The bfdd Contributors
//
// SPDX-License-Identifier: MIT
//

use bfdd_core::align::{align_up, is_common};

#[test]
fn exact_common_values_are_unchanged() {
    for &v in &[3_300, 10_000, 20_000, 50_000, 100_000, 1_000_000] {
        assert_eq!(align_up(v), v);
        assert!(is_common(v));
    }
}

#[test]
fn values_below_the_smallest_round_up_to_it() {
    assert_eq!(align_up(1), 3_300);
    assert_eq!(align_up(3_299), 3_300);
}

#[test]
fn values_between_common_entries_round_up_to_the_next_one() {
    assert_eq!(align_up(3_301), 10_000);
    assert_eq!(align_up(20_001), 50_000);
    assert_eq!(align_up(99_999), 100_000);
}

#[test]
fn values_above_the_largest_are_left_unchanged() {
    assert_eq!(align_up(1_000_001), 1_000_001);
    assert_eq!(align_up(5_000_000), 5_000_000);
}

#[test]
fn non_common_values_are_reported_as_such() {
    assert!(!is_common(3_301));
    assert!(!is_common(0));
}
