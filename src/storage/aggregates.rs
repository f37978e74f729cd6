use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};

use crate::domain::{ClassAggregate, FeeTotals};

/// Persisted per-class totals, addressed by class name.
///
/// Only the ledger service writes here, and only through [`apply_delta`]
/// and [`overwrite`]; both expect the caller to hold the class lock and an
/// open transaction.
///
/// [`apply_delta`]: ClassAggregateStore::apply_delta
/// [`overwrite`]: ClassAggregateStore::overwrite
pub struct ClassAggregateStore;

impl ClassAggregateStore {
    /// Create a zeroed aggregate unless one exists. Returns true if created.
    pub async fn ensure(conn: &mut SqliteConnection, class_name: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO class_aggregates (class_name, fee_cents, t1_cents, t2_cents, t3_cents, created_at, updated_at)
            VALUES (?, 0, 0, 0, 0, ?, ?)
            "#,
        )
        .bind(class_name)
        .bind(&now)
        .bind(&now)
        .execute(&mut *conn)
        .await
        .context("Failed to ensure class aggregate")?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn get(
        conn: &mut SqliteConnection,
        class_name: &str,
    ) -> Result<Option<ClassAggregate>> {
        let row = sqlx::query(
            r#"
            SELECT class_name, fee_cents, t1_cents, t2_cents, t3_cents, created_at, updated_at
            FROM class_aggregates
            WHERE class_name = ?
            "#,
        )
        .bind(class_name)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch class aggregate")?;

        row.as_ref().map(Self::row_to_aggregate).transpose()
    }

    /// List all aggregates ordered by class name.
    pub async fn list(conn: &mut SqliteConnection) -> Result<Vec<ClassAggregate>> {
        let rows = sqlx::query(
            r#"
            SELECT class_name, fee_cents, t1_cents, t2_cents, t3_cents, created_at, updated_at
            FROM class_aggregates
            ORDER BY class_name
            "#,
        )
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list class aggregates")?;

        rows.iter().map(Self::row_to_aggregate).collect()
    }

    /// Add a signed delta to every column of one aggregate row in place.
    pub async fn apply_delta(
        conn: &mut SqliteConnection,
        class_name: &str,
        delta: FeeTotals,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE class_aggregates
            SET fee_cents = fee_cents + ?,
                t1_cents = t1_cents + ?,
                t2_cents = t2_cents + ?,
                t3_cents = t3_cents + ?,
                updated_at = ?
            WHERE class_name = ?
            "#,
        )
        .bind(delta.fee)
        .bind(delta.t1)
        .bind(delta.t2)
        .bind(delta.t3)
        .bind(Utc::now().to_rfc3339())
        .bind(class_name)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to adjust aggregate for class {}", class_name))?;

        if result.rows_affected() != 1 {
            bail!("No aggregate row for class {}", class_name);
        }
        Ok(())
    }

    /// Replace the stored totals. Reserved for reconciliation.
    pub async fn overwrite(
        conn: &mut SqliteConnection,
        class_name: &str,
        totals: FeeTotals,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE class_aggregates
            SET fee_cents = ?, t1_cents = ?, t2_cents = ?, t3_cents = ?, updated_at = ?
            WHERE class_name = ?
            "#,
        )
        .bind(totals.fee)
        .bind(totals.t1)
        .bind(totals.t2)
        .bind(totals.t3)
        .bind(Utc::now().to_rfc3339())
        .bind(class_name)
        .execute(&mut *conn)
        .await
        .context("Failed to overwrite class aggregate")?;

        if result.rows_affected() != 1 {
            bail!("No aggregate row for class {}", class_name);
        }
        Ok(())
    }

    /// Delete an aggregate row. Returns false if there was none.
    pub async fn delete(conn: &mut SqliteConnection, class_name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM class_aggregates WHERE class_name = ?")
            .bind(class_name)
            .execute(&mut *conn)
            .await
            .context("Failed to delete class aggregate")?;
        Ok(result.rows_affected() == 1)
    }

    fn row_to_aggregate(row: &sqlx::sqlite::SqliteRow) -> Result<ClassAggregate> {
        let created_at_str: String = row.get("created_at");
        let updated_at_str: String = row.get("updated_at");

        Ok(ClassAggregate {
            class_name: row.get("class_name"),
            totals: FeeTotals::new(
                row.get("fee_cents"),
                row.get("t1_cents"),
                row.get("t2_cents"),
                row.get("t3_cents"),
            ),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .context("Invalid created_at timestamp")?
                .with_timezone(&Utc),
            updated_at: DateTime::parse_from_rfc3339(&updated_at_str)
                .context("Invalid updated_at timestamp")?
                .with_timezone(&Utc),
        })
    }
}
