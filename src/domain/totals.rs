use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub};

use serde::{Deserialize, Serialize};

use super::{Cents, format_cents};

/// The four money columns a class aggregate carries: the full-year fee and
/// the three term amounts. Also used as a signed delta when a component's
/// contribution changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeeTotals {
    pub fee: Cents,
    pub t1: Cents,
    pub t2: Cents,
    pub t3: Cents,
}

impl FeeTotals {
    pub const ZERO: FeeTotals = FeeTotals {
        fee: 0,
        t1: 0,
        t2: 0,
        t3: 0,
    };

    pub fn new(fee: Cents, t1: Cents, t2: Cents, t3: Cents) -> Self {
        Self { fee, t1, t2, t3 }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Column-wise addition, `None` if any column overflows.
    pub fn checked_add(self, rhs: FeeTotals) -> Option<FeeTotals> {
        Some(FeeTotals {
            fee: self.fee.checked_add(rhs.fee)?,
            t1: self.t1.checked_add(rhs.t1)?,
            t2: self.t2.checked_add(rhs.t2)?,
            t3: self.t3.checked_add(rhs.t3)?,
        })
    }

    /// Sum that stops at the first overflowing column.
    pub fn checked_sum<I: IntoIterator<Item = FeeTotals>>(iter: I) -> Option<FeeTotals> {
        iter.into_iter()
            .try_fold(FeeTotals::ZERO, |acc, t| acc.checked_add(t))
    }
}

impl Add for FeeTotals {
    type Output = FeeTotals;

    fn add(self, rhs: FeeTotals) -> FeeTotals {
        FeeTotals {
            fee: self.fee + rhs.fee,
            t1: self.t1 + rhs.t1,
            t2: self.t2 + rhs.t2,
            t3: self.t3 + rhs.t3,
        }
    }
}

impl AddAssign for FeeTotals {
    fn add_assign(&mut self, rhs: FeeTotals) {
        *self = *self + rhs;
    }
}

impl Neg for FeeTotals {
    type Output = FeeTotals;

    fn neg(self) -> FeeTotals {
        FeeTotals {
            fee: -self.fee,
            t1: -self.t1,
            t2: -self.t2,
            t3: -self.t3,
        }
    }
}

impl Sub for FeeTotals {
    type Output = FeeTotals;

    fn sub(self, rhs: FeeTotals) -> FeeTotals {
        self + (-rhs)
    }
}

impl Sum for FeeTotals {
    fn sum<I: Iterator<Item = FeeTotals>>(iter: I) -> FeeTotals {
        iter.fold(FeeTotals::ZERO, |acc, t| acc + t)
    }
}

impl std::fmt::Display for FeeTotals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "fee={} t1={} t2={} t3={}",
            format_cents(self.fee),
            format_cents(self.t1),
            format_cents(self.t2),
            format_cents(self.t3)
        )
    }
}
