use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use crate::domain::{ComponentId, ComponentKind, FeeComponent, Terms};

/// Storage for one kind of payment component.
///
/// Both component tables share a shape and differ in table name, the column
/// holding the component's name, and whether the class may be NULL. The
/// payment store is [`PAYMENT_COMPONENTS`], the other-charges store is
/// [`OTHER_COMPONENTS`].
pub struct ComponentStore {
    kind: ComponentKind,
    table: &'static str,
    name_column: &'static str,
}

/// Compulsory fee schedules (`fee_payments`).
pub const PAYMENT_COMPONENTS: ComponentStore = ComponentStore {
    kind: ComponentKind::Compulsory,
    table: "fee_payments",
    name_column: "payment_name",
};

/// Ad-hoc charges (`other_charges`).
pub const OTHER_COMPONENTS: ComponentStore = ComponentStore {
    kind: ComponentKind::Other,
    table: "other_charges",
    name_column: "charge_type",
};

impl ComponentStore {
    pub fn for_kind(kind: ComponentKind) -> &'static ComponentStore {
        match kind {
            ComponentKind::Compulsory => &PAYMENT_COMPONENTS,
            ComponentKind::Other => &OTHER_COMPONENTS,
        }
    }

    fn select_columns(&self) -> String {
        format!(
            "SELECT id, {} AS name, class_name, term1_cents, term2_cents, term3_cents, created_at, updated_at FROM {}",
            self.name_column, self.table
        )
    }

    pub async fn insert(&self, conn: &mut SqliteConnection, component: &FeeComponent) -> Result<()> {
        let query = format!(
            r#"
            INSERT INTO {} (id, {}, class_name, term1_cents, term2_cents, term3_cents, amount_cents, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            self.table, self.name_column
        );

        sqlx::query(&query)
            .bind(component.id.to_string())
            .bind(&component.name)
            .bind(&component.class_name)
            .bind(component.terms.term1)
            .bind(component.terms.term2)
            .bind(component.terms.term3)
            .bind(component.amount())
            .bind(component.created_at.to_rfc3339())
            .bind(component.updated_at.to_rfc3339())
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to insert into {}", self.table))?;
        Ok(())
    }

    pub async fn get(
        &self,
        conn: &mut SqliteConnection,
        id: ComponentId,
    ) -> Result<Option<FeeComponent>> {
        let query = format!("{} WHERE id = ?", self.select_columns());

        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await
            .with_context(|| format!("Failed to fetch from {}", self.table))?;

        row.as_ref().map(|r| self.row_to_component(r)).transpose()
    }

    /// Rewrite name, class, terms and amount of an existing row.
    /// Returns false if the row does not exist.
    pub async fn update(&self, conn: &mut SqliteConnection, component: &FeeComponent) -> Result<bool> {
        let query = format!(
            r#"
            UPDATE {}
            SET {} = ?, class_name = ?, term1_cents = ?, term2_cents = ?, term3_cents = ?, amount_cents = ?, updated_at = ?
            WHERE id = ?
            "#,
            self.table, self.name_column
        );

        let result = sqlx::query(&query)
            .bind(&component.name)
            .bind(&component.class_name)
            .bind(component.terms.term1)
            .bind(component.terms.term2)
            .bind(component.terms.term3)
            .bind(component.amount())
            .bind(component.updated_at.to_rfc3339())
            .bind(component.id.to_string())
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to update {}", self.table))?;

        Ok(result.rows_affected() == 1)
    }

    /// No-op write on one row. Opening a unit of work with it makes SQLite
    /// take the write lock before the row is read. Returns false if absent.
    pub async fn touch(&self, conn: &mut SqliteConnection, id: ComponentId) -> Result<bool> {
        let query = format!("UPDATE {} SET updated_at = updated_at WHERE id = ?", self.table);

        let result = sqlx::query(&query)
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to lock row in {}", self.table))?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn delete(&self, conn: &mut SqliteConnection, id: ComponentId) -> Result<bool> {
        let query = format!("DELETE FROM {} WHERE id = ?", self.table);

        let result = sqlx::query(&query)
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to delete from {}", self.table))?;

        Ok(result.rows_affected() == 1)
    }

    /// List components, optionally only those bound to one class.
    pub async fn list(
        &self,
        conn: &mut SqliteConnection,
        class_name: Option<&str>,
    ) -> Result<Vec<FeeComponent>> {
        let mut query = self.select_columns();
        if class_name.is_some() {
            query.push_str(" WHERE class_name = ?");
        }
        query.push_str(" ORDER BY created_at, id");

        let mut sql_query = sqlx::query(&query);
        if let Some(class) = class_name {
            sql_query = sql_query.bind(class);
        }

        let rows = sql_query
            .fetch_all(&mut *conn)
            .await
            .with_context(|| format!("Failed to list {}", self.table))?;

        rows.iter().map(|r| self.row_to_component(r)).collect()
    }

    pub async fn count_for_class(&self, conn: &mut SqliteConnection, class_name: &str) -> Result<i64> {
        let query = format!(
            "SELECT COUNT(*) AS count FROM {} WHERE class_name = ?",
            self.table
        );

        let row = sqlx::query(&query)
            .bind(class_name)
            .fetch_one(&mut *conn)
            .await
            .with_context(|| format!("Failed to count {}", self.table))?;

        Ok(row.get("count"))
    }

    /// Distinct classes referenced by at least one row.
    pub async fn bound_classes(&self, conn: &mut SqliteConnection) -> Result<Vec<String>> {
        let query = format!(
            "SELECT DISTINCT class_name FROM {} WHERE class_name IS NOT NULL ORDER BY class_name",
            self.table
        );

        let rows = sqlx::query(&query)
            .fetch_all(&mut *conn)
            .await
            .with_context(|| format!("Failed to list classes in {}", self.table))?;

        Ok(rows.iter().map(|r| r.get("class_name")).collect())
    }

    fn row_to_component(&self, row: &sqlx::sqlite::SqliteRow) -> Result<FeeComponent> {
        let id_str: String = row.get("id");
        let created_at_str: String = row.get("created_at");
        let updated_at_str: String = row.get("updated_at");

        let terms = Terms::new(
            row.get("term1_cents"),
            row.get("term2_cents"),
            row.get("term3_cents"),
        )
        .with_context(|| format!("Invalid stored terms for component {}", id_str))?;

        Ok(FeeComponent {
            id: Uuid::parse_str(&id_str).context("Invalid component ID")?,
            kind: self.kind,
            name: row.get("name"),
            class_name: row.get("class_name"),
            terms,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .context("Invalid created_at timestamp")?
                .with_timezone(&Utc),
            updated_at: DateTime::parse_from_rfc3339(&updated_at_str)
                .context("Invalid updated_at timestamp")?
                .with_timezone(&Utc),
        })
    }
}

/// Look a component up by id in both stores.
pub async fn find_component(
    conn: &mut SqliteConnection,
    id: ComponentId,
) -> Result<Option<FeeComponent>> {
    for store in [&PAYMENT_COMPONENTS, &OTHER_COMPONENTS] {
        if let Some(component) = store.get(conn, id).await? {
            return Ok(Some(component));
        }
    }
    Ok(None)
}

/// Every live component bound to a class, from both stores.
pub async fn list_class_components(
    conn: &mut SqliteConnection,
    class_name: &str,
) -> Result<Vec<FeeComponent>> {
    let mut components = PAYMENT_COMPONENTS.list(conn, Some(class_name)).await?;
    components.extend(OTHER_COMPONENTS.list(conn, Some(class_name)).await?);
    Ok(components)
}
