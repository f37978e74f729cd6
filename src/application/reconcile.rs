use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{FeeTotals, compute_all_class_totals, compute_class_totals};
use crate::storage::{
    ClassAggregateStore, OTHER_COMPONENTS, PAYMENT_COMPONENTS, list_class_components,
};

use super::service::normalize_class;
use super::{AppError, LedgerService};

/// Result of checking one class aggregate against its components.
#[derive(Debug, Clone, Serialize)]
pub struct Reconciliation {
    pub class_name: String,
    /// Totals found in the aggregate row before any repair
    pub stored: FeeTotals,
    /// Sum over the live components bound to the class
    pub computed: FeeTotals,
    pub components: usize,
    pub drift: bool,
}

impl Reconciliation {
    /// The drift as an error value, for callers that treat it as one.
    pub fn violation(&self) -> Option<AppError> {
        self.drift.then(|| AppError::ConsistencyViolation {
            class_name: self.class_name.clone(),
            stored: self.stored,
            computed: self.computed,
        })
    }
}

/// Out-of-band audit and repair of class aggregates.
///
/// Takes the same class locks as the ledger service, so it never overlaps a
/// mutation on the class it is checking.
pub struct ReconciliationJob<'a> {
    service: &'a LedgerService,
}

impl<'a> ReconciliationJob<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Recompute one aggregate from its components and overwrite it if it
    /// drifted. A class that only exists as a component reference gets its
    /// aggregate row created.
    pub async fn reconcile(&self, class_name: &str) -> Result<Reconciliation, AppError> {
        let class_name = normalize_class(class_name)?;
        let class_name = class_name.as_str();
        let _guard = self
            .service
            .locks()
            .acquire([class_name], self.service.config().lock_timeout)
            .await?;

        let mut tx = self.service.begin().await?;
        let outcome = async {
            let created = ClassAggregateStore::ensure(&mut tx, class_name)
                .await
                .map_err(AppError::TransactionFailure)?;
            let aggregate = ClassAggregateStore::get(&mut tx, class_name)
                .await
                .map_err(AppError::TransactionFailure)?
                .ok_or_else(|| AppError::ClassNotFound(class_name.to_string()))?;
            let components = list_class_components(&mut tx, class_name)
                .await
                .map_err(AppError::TransactionFailure)?;

            if created && components.is_empty() {
                // Neither an aggregate nor a reference: nothing to reconcile
                return Err(AppError::ClassNotFound(class_name.to_string()));
            }

            let computed = class_totals(class_name, &components)?;
            let report = Reconciliation {
                class_name: class_name.to_string(),
                stored: aggregate.totals,
                computed,
                components: components.len(),
                drift: aggregate.totals != computed,
            };

            if report.drift {
                ClassAggregateStore::overwrite(&mut tx, class_name, computed)
                    .await
                    .map_err(AppError::TransactionFailure)?;
            }
            Ok::<_, AppError>(report)
        }
        .await;
        let report = self.service.finish(tx, outcome, "reconcile").await?;

        match report.violation() {
            Some(violation) => warn!(class = %class_name, %violation, "aggregate repaired"),
            None => info!(class = %class_name, "aggregate consistent"),
        }
        Ok(report)
    }

    /// Reconcile every class that has an aggregate or is referenced by a
    /// component. Each class is its own unit of work.
    pub async fn reconcile_all(&self) -> Result<Vec<Reconciliation>, AppError> {
        let mut classes = BTreeSet::new();
        {
            let mut conn = self.service.repo().acquire().await?;
            for aggregate in ClassAggregateStore::list(&mut conn).await? {
                classes.insert(aggregate.class_name);
            }
            for store in [&PAYMENT_COMPONENTS, &OTHER_COMPONENTS] {
                classes.extend(store.bound_classes(&mut conn).await?);
            }
        }

        let mut reports = Vec::with_capacity(classes.len());
        for class_name in &classes {
            reports.push(self.reconcile(class_name).await?);
        }
        Ok(reports)
    }

    /// Read-only check of one class. Drift is returned as
    /// [`AppError::ConsistencyViolation`] and left unrepaired. A class that
    /// components reference but that has no aggregate row counts as stored
    /// zeros.
    pub async fn audit(&self, class_name: &str) -> Result<Reconciliation, AppError> {
        let class_name = normalize_class(class_name)?;
        let class_name = class_name.as_str();
        let mut tx = self.service.repo().begin().await?;
        let aggregate = ClassAggregateStore::get(&mut tx, class_name).await?;
        let components = list_class_components(&mut tx, class_name).await?;
        tx.rollback().await.map_err(anyhow::Error::from)?;

        if aggregate.is_none() && components.is_empty() {
            return Err(AppError::ClassNotFound(class_name.to_string()));
        }
        let stored = aggregate.map(|a| a.totals).unwrap_or_default();

        let computed = class_totals(class_name, &components)?;
        let report = Reconciliation {
            class_name: class_name.to_string(),
            stored,
            computed,
            components: components.len(),
            drift: stored != computed,
        };

        match report.violation() {
            Some(violation) => Err(violation),
            None => Ok(report),
        }
    }

    /// Read-only check of every class from one consistent snapshot.
    /// Classes referenced by components but lacking an aggregate are
    /// reported with zero stored totals.
    pub async fn audit_all(&self) -> Result<Vec<Reconciliation>, AppError> {
        let mut tx = self.service.repo().begin().await?;
        let aggregates = ClassAggregateStore::list(&mut tx).await?;
        let mut components = PAYMENT_COMPONENTS.list(&mut tx, None).await?;
        components.extend(OTHER_COMPONENTS.list(&mut tx, None).await?);
        tx.rollback().await.map_err(anyhow::Error::from)?;

        let mut computed = compute_all_class_totals(&components).map_err(overflow)?;
        let mut reports = Vec::new();

        for aggregate in aggregates {
            let totals = computed.remove(&aggregate.class_name).unwrap_or_default();
            reports.push(Reconciliation {
                components: count_bound(&components, &aggregate.class_name),
                drift: aggregate.totals != totals,
                class_name: aggregate.class_name,
                stored: aggregate.totals,
                computed: totals,
            });
        }
        for (class_name, totals) in computed {
            reports.push(Reconciliation {
                components: count_bound(&components, &class_name),
                drift: !totals.is_zero(),
                class_name,
                stored: FeeTotals::ZERO,
                computed: totals,
            });
        }

        reports.sort_by(|a, b| a.class_name.cmp(&b.class_name));
        Ok(reports)
    }
}

fn class_totals(
    class_name: &str,
    components: &[crate::domain::FeeComponent],
) -> Result<FeeTotals, AppError> {
    compute_class_totals(class_name, components).ok_or_else(|| overflow(class_name.to_string()))
}

fn overflow(class_name: String) -> AppError {
    AppError::Validation(format!(
        "components of class {} sum past the largest storable amount",
        class_name
    ))
}

fn count_bound(components: &[crate::domain::FeeComponent], class_name: &str) -> usize {
    components
        .iter()
        .filter(|c| c.class_name.as_deref() == Some(class_name))
        .count()
}
