//
// Copyright (c) The bfdd Contributors
//
// SPDX-License-Identifier: MIT
//

// RFC 7419 "Common Interval Support in Bidirectional Forwarding Detection
// (BFD)" common interval set, in microseconds. New module: the teacher has
// no RFC 7419 support, so this follows the pack's convention of small, pure,
// independently testable helper modules (the same shape as the validation
// helpers in `holo-bfd::packet`).
const COMMON_SET_US: [u32; 6] = [3_300, 10_000, 20_000, 50_000, 100_000, 1_000_000];

// Rounds `interval_us` up to the nearest value in the RFC 7419 common set
// that is greater than or equal to it. Intervals above the largest common
// value are left unchanged, since a node offering a slower rate than any
// value in the set cannot be made to align further.
pub fn align_up(interval_us: u32) -> u32 {
    COMMON_SET_US
        .iter()
        .copied()
        .find(|&v| v >= interval_us)
        .unwrap_or(interval_us)
}

// Whether `interval_us` is already one of the RFC 7419 common values.
pub fn is_common(interval_us: u32) -> bool {
    COMMON_SET_US.contains(&interval_us)
}
