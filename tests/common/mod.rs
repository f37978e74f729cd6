// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use feeledger::application::LedgerService;
use feeledger::domain::{ComponentKind, FeeComponent, FeeTotals, RawTerms};
use feeledger::storage::{ConnectOptions, Repository};
use feeledger::LedgerConfig;
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let service = LedgerService::init(test_config(&temp_dir)).await?;
    Ok((service, temp_dir))
}

pub fn test_config(temp_dir: &TempDir) -> LedgerConfig {
    let db_path = temp_dir.path().join("test.db");
    LedgerConfig::new(db_path.to_str().unwrap())
}

/// Second handle on the same database file, bypassing the ledger service.
/// Used to tamper with rows and install failure triggers.
pub async fn raw_repo(temp_dir: &TempDir) -> Result<Repository> {
    let config = test_config(temp_dir);
    Ok(Repository::connect(&config.database_url(), &ConnectOptions::default()).await?)
}

/// Terms in whole currency units, e.g. `terms(100, 50, 50)`.
pub fn terms(t1: i64, t2: i64, t3: i64) -> RawTerms {
    RawTerms::new(t1.to_string(), t2.to_string(), t3.to_string())
}

/// Aggregate totals in whole currency units.
pub fn totals(t1: i64, t2: i64, t3: i64) -> FeeTotals {
    FeeTotals::new((t1 + t2 + t3) * 100, t1 * 100, t2 * 100, t3 * 100)
}

pub async fn add_payment(
    service: &LedgerService,
    class_name: &str,
    name: &str,
    raw: RawTerms,
) -> Result<FeeComponent> {
    Ok(service
        .create_component(ComponentKind::Compulsory, name, Some(class_name), &raw)
        .await?)
}

pub async fn add_charge(
    service: &LedgerService,
    class_name: Option<&str>,
    charge_type: &str,
    raw: RawTerms,
) -> Result<FeeComponent> {
    Ok(service
        .create_component(ComponentKind::Other, charge_type, class_name, &raw)
        .await?)
}

/// Stored totals of a class, zero if it has no aggregate row.
pub async fn stored_totals(service: &LedgerService, class_name: &str) -> Result<FeeTotals> {
    match service.get_aggregate(class_name).await {
        Ok(aggregate) => Ok(aggregate.totals),
        Err(feeledger::application::AppError::ClassNotFound(_)) => Ok(FeeTotals::ZERO),
        Err(e) => Err(e.into()),
    }
}

/// Totals recomputed from the live components of a class.
pub async fn live_totals(service: &LedgerService, class_name: &str) -> Result<FeeTotals> {
    let components = service.list_components(None, Some(class_name)).await?;
    Ok(components
        .iter()
        .filter_map(|c| c.binding().map(|(_, contribution)| contribution))
        .sum())
}

/// Assert the stored aggregate equals the sum of its live components.
pub async fn assert_consistent(service: &LedgerService, class_name: &str) -> Result<()> {
    let stored = stored_totals(service, class_name).await?;
    let live = live_totals(service, class_name).await?;
    assert_eq!(stored, live, "aggregate for {} drifted", class_name);
    Ok(())
}
