//! Time base arithmetic.

use serde::{Deserialize, Serialize};

/// Rational time base of a stream (seconds per tick = `num / den`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    /// Millisecond time base, used for values already expressed in ms.
    pub const MILLIS: Self = Self::new(1, 1000);

    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Whether both terms are positive.
    pub const fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    /// Convert a timestamp in this time base to milliseconds.
    ///
    /// Invalid time bases yield 0 rather than dividing by zero.
    pub fn ts_to_ms(&self, ts: i64) -> i64 {
        if !self.is_valid() {
            return 0;
        }
        let scaled = i128::from(ts) * i128::from(self.num) * 1000 / i128::from(self.den);
        i64::try_from(scaled).unwrap_or(if scaled < 0 { i64::MIN } else { i64::MAX })
    }

    /// Convert milliseconds to a timestamp in this time base (rounded down).
    pub fn ms_to_ts(&self, ms: i64) -> i64 {
        if !self.is_valid() {
            return 0;
        }
        let scaled = i128::from(ms) * i128::from(self.den) / (i128::from(self.num) * 1000);
        i64::try_from(scaled).unwrap_or(if scaled < 0 { i64::MIN } else { i64::MAX })
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        f64::from(self.num) / f64::from(self.den)
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::MILLIS
    }
}

impl std::fmt::Display for Rational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}
