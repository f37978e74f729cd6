use std::collections::BTreeMap;

use super::{FeeComponent, FeeTotals};

/// Sum the contributions of every component bound to `class_name`.
/// `None` if the sum does not fit in a cents column.
pub fn compute_class_totals(class_name: &str, components: &[FeeComponent]) -> Option<FeeTotals> {
    FeeTotals::checked_sum(
        components
            .iter()
            .filter_map(FeeComponent::binding)
            .filter(|(class, _)| *class == class_name)
            .map(|(_, contribution)| contribution),
    )
}

/// Sum contributions for all classes at once.
/// Classes with no bound component are absent from the map; a class whose
/// sum overflows is returned in `Err`.
pub fn compute_all_class_totals(
    components: &[FeeComponent],
) -> Result<BTreeMap<String, FeeTotals>, String> {
    let mut totals: BTreeMap<String, FeeTotals> = BTreeMap::new();

    for (class, contribution) in components.iter().filter_map(FeeComponent::binding) {
        let entry = totals.entry(class.to_string()).or_default();
        *entry = entry
            .checked_add(contribution)
            .ok_or_else(|| class.to_string())?;
    }

    Ok(totals)
}

/// A signed change to apply to one class aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateAdjustment {
    pub class_name: String,
    pub delta: FeeTotals,
}

/// Work out which aggregates change when a component goes from `current` to
/// `next` (each a class binding and its contribution, `None` when unbound).
///
/// A component staying in the same class yields a single net delta, so the
/// aggregate never passes through an intermediate value. Otherwise the
/// subtraction from the old class comes first. Zero deltas are dropped.
pub fn plan_adjustments(
    current: Option<(&str, FeeTotals)>,
    next: Option<(&str, FeeTotals)>,
) -> Vec<AggregateAdjustment> {
    let mut plan = Vec::with_capacity(2);

    match (current, next) {
        (Some((old_class, old)), Some((new_class, new))) if old_class == new_class => {
            plan.push(AggregateAdjustment {
                class_name: old_class.to_string(),
                delta: new - old,
            });
        }
        (current, next) => {
            if let Some((class, old)) = current {
                plan.push(AggregateAdjustment {
                    class_name: class.to_string(),
                    delta: -old,
                });
            }
            if let Some((class, new)) = next {
                plan.push(AggregateAdjustment {
                    class_name: class.to_string(),
                    delta: new,
                });
            }
        }
    }

    plan.retain(|adj| !adj.delta.is_zero());
    plan
}
