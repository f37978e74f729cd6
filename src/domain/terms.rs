use serde::{Deserialize, Serialize};

use super::{Cents, FeeTotals, ParseCentsError, parse_cents};

/// Term amounts exactly as they arrive from an admin form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTerms {
    pub term1: String,
    pub term2: String,
    pub term3: String,
}

impl RawTerms {
    pub fn new(term1: impl Into<String>, term2: impl Into<String>, term3: impl Into<String>) -> Self {
        Self {
            term1: term1.into(),
            term2: term2.into(),
            term3: term3.into(),
        }
    }

    /// Parse and check every term. The first offending field is reported.
    pub fn validate(&self) -> Result<Terms, TermError> {
        let term1 = parse_term("term1", &self.term1)?;
        let term2 = parse_term("term2", &self.term2)?;
        let term3 = parse_term("term3", &self.term3)?;
        Terms::new(term1, term2, term3)
    }
}

fn parse_term(field: &'static str, raw: &str) -> Result<Cents, TermError> {
    let cents = parse_cents(raw).map_err(|source| TermError::NotNumeric {
        field,
        value: raw.to_string(),
        source,
    })?;
    if cents < 0 {
        return Err(TermError::Negative {
            field,
            value: raw.to_string(),
        });
    }
    Ok(cents)
}

/// Validated, non-negative term amounts of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Terms {
    pub term1: Cents,
    pub term2: Cents,
    pub term3: Cents,
}

impl Terms {
    pub fn new(term1: Cents, term2: Cents, term3: Cents) -> Result<Self, TermError> {
        for (field, value) in [("term1", term1), ("term2", term2), ("term3", term3)] {
            if value < 0 {
                return Err(TermError::Negative {
                    field,
                    value: value.to_string(),
                });
            }
        }
        term1
            .checked_add(term2)
            .and_then(|s| s.checked_add(term3))
            .ok_or(TermError::Overflow)?;
        Ok(Self {
            term1,
            term2,
            term3,
        })
    }

    /// Total amount of the component. Never overflows: checked at construction.
    pub fn amount(&self) -> Cents {
        self.term1 + self.term2 + self.term3
    }

    /// What this component adds to its class aggregate.
    pub fn contribution(&self) -> FeeTotals {
        FeeTotals::new(self.amount(), self.term1, self.term2, self.term3)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TermError {
    #[error("{field} must be a numeric amount, got '{value}': {source}")]
    NotNumeric {
        field: &'static str,
        value: String,
        source: ParseCentsError,
    },

    #[error("{field} must not be negative, got '{value}'")]
    Negative { field: &'static str, value: String },

    #[error("sum of terms is too large")]
    Overflow,
}
