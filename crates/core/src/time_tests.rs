// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn system_clock_is_past_the_epoch_and_monotonic_enough() {
    let clock = SystemClock;
    let a = clock.epoch_ms();
    let b = clock.epoch_ms();
    assert!(a > 0);
    assert!(b >= a);
}

#[test]
fn manual_clock_only_moves_when_told() {
    let clock = ManualClock::at(5_000);
    assert_eq!(clock.epoch_ms(), 5_000);
    assert_eq!(clock.epoch_ms(), 5_000);

    clock.advance(Duration::from_millis(250));
    assert_eq!(clock.epoch_ms(), 5_250);

    clock.jump_to(100);
    assert_eq!(clock.epoch_ms(), 100);
}

#[test]
fn manual_clock_clones_share_time() {
    let clock = ManualClock::default();
    let stamper = clock.clone();
    clock.advance(Duration::from_secs(2));
    assert_eq!(stamper.epoch_ms(), 2_000);
}
