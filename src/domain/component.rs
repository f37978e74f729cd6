use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{FeeTotals, Terms};

pub type ComponentId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// A fee schedule every student of the class pays (tuition, boarding, ...)
    Compulsory,
    /// An ad-hoc charge identified by a type label, optionally tied to a class
    Other,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Compulsory => "compulsory",
            ComponentKind::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "compulsory" => Some(ComponentKind::Compulsory),
            "other" => Some(ComponentKind::Other),
            _ => None,
        }
    }

    /// Whether a component of this kind may exist without an owning class.
    pub fn allows_unbound(&self) -> bool {
        matches!(self, ComponentKind::Other)
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A payment component: one row whose terms feed a class aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeComponent {
    pub id: ComponentId,
    pub kind: ComponentKind,
    /// Schedule name for compulsory payments, type label for other charges
    pub name: String,
    /// Owning class; `None` only for global other charges
    pub class_name: Option<String>,
    pub terms: Terms,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeeComponent {
    pub fn new(
        kind: ComponentKind,
        name: impl Into<String>,
        class_name: Option<String>,
        terms: Terms,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            name: name.into(),
            class_name,
            terms,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn amount(&self) -> i64 {
        self.terms.amount()
    }

    /// The class this component counts towards, with its contribution.
    /// Unbound components count towards nothing.
    pub fn binding(&self) -> Option<(&str, FeeTotals)> {
        self.class_name
            .as_deref()
            .map(|class| (class, self.terms.contribution()))
    }
}
