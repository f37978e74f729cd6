use anyhow::anyhow;
use chrono::Utc;
use sqlx::{Sqlite, SqliteConnection, Transaction};
use tracing::{info, warn};

use crate::config::LedgerConfig;
use crate::domain::{
    ClassAggregate, ComponentId, ComponentKind, FeeComponent, FeeSnapshot, RawTerms,
    plan_adjustments,
};
use crate::storage::{
    ClassAggregateStore, ComponentStore, OTHER_COMPONENTS, PAYMENT_COMPONENTS, Repository,
    find_component,
};

use super::{AppError, ClassGuard, ClassLocks};

/// Keeps class fee aggregates equal to the sum of their components.
///
/// Every mutation runs as one SQLite transaction while holding the locks of
/// every class it touches. Aggregates only ever change by deltas computed
/// from a component's old and new contribution.
pub struct LedgerService {
    repo: Repository,
    locks: ClassLocks,
    config: LedgerConfig,
}

/// A change requested for an existing component.
#[derive(Debug, Clone)]
pub struct ComponentChange {
    /// Owning class after the change; `None` unbinds an other charge
    pub class_name: Option<String>,
    pub terms: RawTerms,
    /// New schedule name or type label; `None` keeps the current one
    pub name: Option<String>,
}

/// Listing of the fee structure of one class.
pub struct ClassInfo {
    pub aggregate: ClassAggregate,
    pub components: Vec<FeeComponent>,
}

enum Attempt<T> {
    Done(T),
    /// The component changed class between the unlocked peek and the locked
    /// re-read; the locks held are the wrong ones.
    ClassMoved,
}

impl LedgerService {
    /// Create a new ledger service with the given repository.
    pub fn new(repo: Repository, config: LedgerConfig) -> Self {
        Self {
            repo,
            locks: ClassLocks::new(),
            config,
        }
    }

    /// Initialize a new database at the configured path.
    pub async fn init(config: LedgerConfig) -> Result<Self, AppError> {
        let repo = Repository::init(&config.database_url(), &config.connect_options()).await?;
        Ok(Self::new(repo, config))
    }

    /// Connect to an existing database.
    pub async fn connect(config: LedgerConfig) -> Result<Self, AppError> {
        let repo = Repository::connect(&config.database_url(), &config.connect_options()).await?;
        Ok(Self::new(repo, config))
    }

    pub(crate) fn repo(&self) -> &Repository {
        &self.repo
    }

    pub(crate) fn locks(&self) -> &ClassLocks {
        &self.locks
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    async fn lock_classes<'a, I>(&self, classes: I) -> Result<ClassGuard, AppError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.locks.acquire(classes, self.config.lock_timeout).await
    }

    pub(crate) async fn begin(&self) -> Result<Transaction<'static, Sqlite>, AppError> {
        self.repo.begin().await.map_err(AppError::TransactionFailure)
    }

    /// Commit on success, roll back on any error.
    pub(crate) async fn finish<T>(
        &self,
        tx: Transaction<'static, Sqlite>,
        outcome: Result<T, AppError>,
        operation: &str,
    ) -> Result<T, AppError> {
        match outcome {
            Ok(value) => {
                tx.commit()
                    .await
                    .map_err(|e| AppError::TransactionFailure(e.into()))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(operation, error = %rollback_err, "rollback failed");
                }
                warn!(operation, error = %err, "unit of work rolled back");
                Err(err)
            }
        }
    }

    // ========================
    // Class operations
    // ========================

    /// Register a class with all totals at zero.
    pub async fn create_class(&self, class_name: &str) -> Result<ClassAggregate, AppError> {
        let class_name = normalize_class(class_name)?;
        let _guard = self.lock_classes([class_name.as_str()]).await?;

        let mut tx = self.begin().await?;
        let outcome = async {
            let aggregate = ClassAggregate::new(class_name.clone());
            // INSERT OR IGNORE both takes the write lock and detects duplicates
            if !ClassAggregateStore::ensure(&mut tx, &class_name)
                .await
                .map_err(AppError::TransactionFailure)?
            {
                return Err(AppError::ClassAlreadyExists(class_name.clone()));
            }
            Ok::<_, AppError>(aggregate)
        }
        .await;
        let aggregate = self.finish(tx, outcome, "create_class").await?;

        info!(class = %class_name, "class created");
        Ok(aggregate)
    }

    /// Remove a class. Refused while any component is bound to it.
    pub async fn delete_class(&self, class_name: &str) -> Result<(), AppError> {
        let class_name = normalize_class(class_name)?;
        let _guard = self.lock_classes([class_name.as_str()]).await?;

        let mut tx = self.begin().await?;
        let outcome = async {
            if !ClassAggregateStore::delete(&mut tx, &class_name)
                .await
                .map_err(AppError::TransactionFailure)?
            {
                return Err(AppError::ClassNotFound(class_name.clone()));
            }

            let mut components = 0;
            for store in [&PAYMENT_COMPONENTS, &OTHER_COMPONENTS] {
                components += store
                    .count_for_class(&mut tx, &class_name)
                    .await
                    .map_err(AppError::TransactionFailure)?;
            }
            if components > 0 {
                return Err(AppError::ClassInUse {
                    class_name: class_name.clone(),
                    components,
                });
            }
            Ok::<_, AppError>(())
        }
        .await;
        self.finish(tx, outcome, "delete_class").await?;

        info!(class = %class_name, "class deleted");
        Ok(())
    }

    /// Point read of a class aggregate.
    pub async fn get_aggregate(&self, class_name: &str) -> Result<ClassAggregate, AppError> {
        let class_name = normalize_class(class_name)?;
        let mut conn = self.repo.acquire().await?;
        ClassAggregateStore::get(&mut conn, &class_name)
            .await?
            .ok_or(AppError::ClassNotFound(class_name))
    }

    /// Copy of a class's current fees for a new student record.
    pub async fn enrollment_snapshot(&self, class_name: &str) -> Result<FeeSnapshot, AppError> {
        Ok(self.get_aggregate(class_name).await?.into())
    }

    pub async fn list_classes(&self) -> Result<Vec<ClassAggregate>, AppError> {
        let mut conn = self.repo.acquire().await?;
        Ok(ClassAggregateStore::list(&mut conn).await?)
    }

    /// Aggregate and components of one class, read in a single transaction.
    pub async fn get_class_info(&self, class_name: &str) -> Result<ClassInfo, AppError> {
        let class_name = normalize_class(class_name)?;
        let mut tx = self.repo.begin().await?;
        let aggregate = ClassAggregateStore::get(&mut tx, &class_name)
            .await?
            .ok_or_else(|| AppError::ClassNotFound(class_name.clone()))?;
        let components = crate::storage::list_class_components(&mut tx, &class_name).await?;
        tx.rollback().await.map_err(anyhow::Error::from)?;

        Ok(ClassInfo {
            aggregate,
            components,
        })
    }

    // ========================
    // Component operations
    // ========================

    pub async fn get_component(&self, id: ComponentId) -> Result<FeeComponent, AppError> {
        let mut conn = self.repo.acquire().await?;
        find_component(&mut conn, id)
            .await?
            .ok_or_else(|| AppError::ComponentNotFound(id.to_string()))
    }

    /// List components, optionally filtered by kind and owning class.
    pub async fn list_components(
        &self,
        kind: Option<ComponentKind>,
        class_name: Option<&str>,
    ) -> Result<Vec<FeeComponent>, AppError> {
        let class_name = class_name.map(normalize_class).transpose()?;
        let stores: Vec<&ComponentStore> = match kind {
            Some(kind) => vec![ComponentStore::for_kind(kind)],
            None => vec![&PAYMENT_COMPONENTS, &OTHER_COMPONENTS],
        };

        let mut conn = self.repo.acquire().await?;
        let mut components = Vec::new();
        for store in stores {
            components.extend(store.list(&mut conn, class_name.as_deref()).await?);
        }
        Ok(components)
    }

    /// Add a component and its contribution to the class aggregate,
    /// creating the aggregate first if the class has none.
    pub async fn create_component(
        &self,
        kind: ComponentKind,
        name: &str,
        class_name: Option<&str>,
        terms: &RawTerms,
    ) -> Result<FeeComponent, AppError> {
        let name = normalize_name(name)?;
        let class_name = class_name.map(normalize_class).transpose()?;
        check_binding(kind, class_name.as_deref())?;
        let terms = terms.validate()?;

        let component = FeeComponent::new(kind, name, class_name, terms);
        let store = ComponentStore::for_kind(kind);
        let _guard = self.lock_classes(component.class_name.as_deref()).await?;

        let mut tx = self.begin().await?;
        let outcome = async {
            store
                .insert(&mut tx, &component)
                .await
                .map_err(AppError::TransactionFailure)?;

            for adjustment in plan_adjustments(None, component.binding()) {
                apply(&mut tx, &adjustment.class_name, adjustment.delta).await?;
            }
            Ok::<_, AppError>(())
        }
        .await;
        self.finish(tx, outcome, "create_component").await?;

        info!(
            id = %component.id,
            kind = %component.kind,
            class = component.class_name.as_deref().unwrap_or("-"),
            amount = component.amount(),
            "component created"
        );
        Ok(component)
    }

    /// Rewrite a component's terms, class and name, moving its contribution
    /// between aggregates as needed. Subtract, row update and add commit
    /// together or not at all.
    pub async fn update_component(
        &self,
        id: ComponentId,
        change: ComponentChange,
    ) -> Result<FeeComponent, AppError> {
        let name = change.name.as_deref().map(normalize_name).transpose()?;
        let class_name = change.class_name.as_deref().map(normalize_class).transpose()?;
        let terms = change.terms.validate()?;

        for attempt in 0..=self.config.max_lock_retries {
            let peeked = self.get_component(id).await?;
            check_binding(peeked.kind, class_name.as_deref())?;

            let guard = self
                .lock_classes(
                    peeked
                        .class_name
                        .as_deref()
                        .into_iter()
                        .chain(class_name.as_deref()),
                )
                .await?;
            let store = ComponentStore::for_kind(peeked.kind);

            let mut tx = self.begin().await?;
            let outcome = async {
                // Write first: SQLite takes its write lock before anything is read
                if !store
                    .touch(&mut tx, id)
                    .await
                    .map_err(AppError::TransactionFailure)?
                {
                    return Err(AppError::ComponentNotFound(id.to_string()));
                }

                let current = store
                    .get(&mut tx, id)
                    .await
                    .map_err(AppError::TransactionFailure)?
                    .ok_or_else(|| AppError::ComponentNotFound(id.to_string()))?;
                if let Some(class) = current.class_name.as_deref() {
                    if !guard.covers(class) {
                        return Ok(Attempt::ClassMoved);
                    }
                }

                let mut updated = current.clone();
                if let Some(name) = &name {
                    updated.name = name.clone();
                }
                updated.class_name = class_name.clone();
                updated.terms = terms;
                updated.updated_at = Utc::now();

                let plan = plan_adjustments(current.binding(), updated.binding());
                let moved = current.class_name != updated.class_name;
                let (subtract, add): (Vec<_>, Vec<_>) = plan.into_iter().partition(|adj| {
                    moved && Some(adj.class_name.as_str()) == current.class_name.as_deref()
                });

                for adjustment in &subtract {
                    apply(&mut tx, &adjustment.class_name, adjustment.delta).await?;
                }
                if !store
                    .update(&mut tx, &updated)
                    .await
                    .map_err(AppError::TransactionFailure)?
                {
                    return Err(AppError::ComponentNotFound(id.to_string()));
                }
                for adjustment in &add {
                    apply(&mut tx, &adjustment.class_name, adjustment.delta).await?;
                }

                Ok::<_, AppError>(Attempt::Done((current, updated)))
            }
            .await;

            match self.finish(tx, outcome, "update_component").await? {
                Attempt::Done((before, after)) => {
                    info!(
                        id = %id,
                        from_class = before.class_name.as_deref().unwrap_or("-"),
                        to_class = after.class_name.as_deref().unwrap_or("-"),
                        old_amount = before.amount(),
                        new_amount = after.amount(),
                        "component updated"
                    );
                    return Ok(after);
                }
                Attempt::ClassMoved => {
                    warn!(id = %id, attempt, "component moved while waiting for locks, retrying");
                }
            }
        }

        Err(AppError::TransactionFailure(anyhow!(
            "component {} kept changing class while acquiring locks",
            id
        )))
    }

    /// Remove a component and subtract its contribution.
    pub async fn delete_component(&self, id: ComponentId) -> Result<FeeComponent, AppError> {
        for attempt in 0..=self.config.max_lock_retries {
            let peeked = self.get_component(id).await?;
            let guard = self.lock_classes(peeked.class_name.as_deref()).await?;
            let store = ComponentStore::for_kind(peeked.kind);

            let mut tx = self.begin().await?;
            let outcome = async {
                if !store
                    .touch(&mut tx, id)
                    .await
                    .map_err(AppError::TransactionFailure)?
                {
                    return Err(AppError::ComponentNotFound(id.to_string()));
                }

                let current = store
                    .get(&mut tx, id)
                    .await
                    .map_err(AppError::TransactionFailure)?
                    .ok_or_else(|| AppError::ComponentNotFound(id.to_string()))?;
                if let Some(class) = current.class_name.as_deref() {
                    if !guard.covers(class) {
                        return Ok(Attempt::ClassMoved);
                    }
                }

                for adjustment in plan_adjustments(current.binding(), None) {
                    apply(&mut tx, &adjustment.class_name, adjustment.delta).await?;
                }
                store
                    .delete(&mut tx, id)
                    .await
                    .map_err(AppError::TransactionFailure)?;

                Ok::<_, AppError>(Attempt::Done(current))
            }
            .await;

            match self.finish(tx, outcome, "delete_component").await? {
                Attempt::Done(removed) => {
                    info!(
                        id = %id,
                        class = removed.class_name.as_deref().unwrap_or("-"),
                        amount = removed.amount(),
                        "component deleted"
                    );
                    return Ok(removed);
                }
                Attempt::ClassMoved => {
                    warn!(id = %id, attempt, "component moved while waiting for locks, retrying");
                }
            }
        }

        Err(AppError::TransactionFailure(anyhow!(
            "component {} kept changing class while acquiring locks",
            id
        )))
    }
}

/// Apply one aggregate delta, creating the row first if the class has none.
/// A delta that would overflow a cents column is refused before the write.
async fn apply(
    conn: &mut SqliteConnection,
    class_name: &str,
    delta: crate::domain::FeeTotals,
) -> Result<(), AppError> {
    ClassAggregateStore::ensure(conn, class_name)
        .await
        .map_err(AppError::TransactionFailure)?;
    let current = ClassAggregateStore::get(conn, class_name)
        .await
        .map_err(AppError::TransactionFailure)?
        .ok_or_else(|| AppError::ClassNotFound(class_name.to_string()))?;
    if current.totals.checked_add(delta).is_none() {
        return Err(AppError::Validation(format!(
            "fee totals for class {} would overflow",
            class_name
        )));
    }
    ClassAggregateStore::apply_delta(conn, class_name, delta)
        .await
        .map_err(AppError::TransactionFailure)
}

pub(super) fn normalize_class(class_name: &str) -> Result<String, AppError> {
    let trimmed = class_name.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("class name must not be empty".into()));
    }
    Ok(trimmed.to_string())
}

fn normalize_name(name: &str) -> Result<String, AppError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(
            "component name must not be empty".into(),
        ));
    }
    Ok(trimmed.to_string())
}

fn check_binding(kind: ComponentKind, class_name: Option<&str>) -> Result<(), AppError> {
    if class_name.is_none() && !kind.allows_unbound() {
        return Err(AppError::Validation(format!(
            "{} payments must belong to a class",
            kind
        )));
    }
    Ok(())
}
