use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::FeeTotals;

/// Per-class fee totals. Derived data: always the sum of the live
/// components bound to the class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassAggregate {
    pub class_name: String,
    pub totals: FeeTotals,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClassAggregate {
    /// A fresh class starts with every total at zero.
    pub fn new(class_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            class_name: class_name.into(),
            totals: FeeTotals::ZERO,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Point-in-time copy of a class's fees, taken when a student enrolls.
/// Later component edits do not change it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSnapshot {
    pub class_name: String,
    pub totals: FeeTotals,
    pub taken_at: DateTime<Utc>,
}

impl From<ClassAggregate> for FeeSnapshot {
    fn from(aggregate: ClassAggregate) -> Self {
        Self {
            class_name: aggregate.class_name,
            totals: aggregate.totals,
            taken_at: Utc::now(),
        }
    }
}
