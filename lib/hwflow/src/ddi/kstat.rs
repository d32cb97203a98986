// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Named statistic counters.
//!
//! Individual counter updates are atomic, but a group of counters read
//! together may present the results of a process that is only
//! partially completed. That trade-off is deliberate; these exist for
//! observability, not coordination.
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;

/// A 64-bit unsigned statistic.
#[derive(Default)]
pub struct KStatU64 {
    value: AtomicU64,
}

impl KStatU64 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, val: u64) {
        self.value.store(val, Ordering::Relaxed)
    }

    pub fn val(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn incr(&self, val: u64) {
        self.value.fetch_add(val, Ordering::Relaxed);
    }
}

impl core::ops::AddAssign<u64> for KStatU64 {
    #[inline]
    fn add_assign(&mut self, other: u64) {
        self.incr(other);
    }
}
