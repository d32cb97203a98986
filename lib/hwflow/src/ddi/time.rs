// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Moments in time.
use core::ops::Add;
use core::time::Duration;
use std::sync::OnceLock;
use std::time::Instant;

/// The number of milliseconds in a second.
pub const MILLIS: u64 = 1_000;

static FIRST_TS: OnceLock<Instant> = OnceLock::new();

/// A moment in time.
///
/// This is a duration masquerading as an instant -- measuring from
/// the first moment taken by the process allows conversion to and
/// from raw counts when needed.
#[derive(Clone, Copy, Debug)]
pub struct Moment {
    inner: Duration,
}

impl Add<Duration> for Moment {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Moment { inner: self.inner + rhs }
    }
}

impl Moment {
    /// Compute the delta between `self - earlier` and return as
    /// milliseconds.
    ///
    /// Saturates to zero if `earlier` is later than `self`.
    pub fn delta_as_millis(&self, earlier: Moment) -> u64 {
        let delta = self.inner.saturating_sub(earlier.inner);
        delta.as_secs() * MILLIS + delta.subsec_millis() as u64
    }

    pub fn now() -> Self {
        let first_ts = *FIRST_TS.get_or_init(Instant::now);
        Self { inner: Instant::now().saturating_duration_since(first_ts) }
    }

    /// Return the underlying timestamp for atomic storage or
    /// debugging, converted to milliseconds.
    pub fn raw_millis(&self) -> u64 {
        self.inner.as_millis() as u64
    }
}

impl Default for Moment {
    fn default() -> Self {
        Self::now()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn moment_delta() {
        let a = Moment::now();
        let b = a + Duration::from_millis(1_500);
        assert_eq!(b.delta_as_millis(a), 1_500);
        assert_eq!(a.delta_as_millis(b), 0);
    }
}
