use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

use crate::application::LedgerService;
use crate::domain::{ClassAggregate, FeeComponent, format_cents};

/// Full fee structure: every class aggregate and every component.
#[derive(Debug, Clone, Serialize)]
pub struct FeeStructureSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub classes: Vec<ClassAggregate>,
    pub components: Vec<FeeComponent>,
}

/// Exporter for writing the fee structure out as CSV or JSON
pub struct Exporter<'a> {
    service: &'a LedgerService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Export class aggregates to CSV format
    pub async fn export_classes_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let classes = self.service.list_classes().await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record(["class", "fee", "term1", "term2", "term3"])?;

        for class in &classes {
            csv_writer.write_record([
                class.class_name.clone(),
                format_cents(class.totals.fee),
                format_cents(class.totals.t1),
                format_cents(class.totals.t2),
                format_cents(class.totals.t3),
            ])?;
        }

        csv_writer.flush()?;
        Ok(classes.len())
    }

    /// Export components of both kinds to CSV format
    pub async fn export_components_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let components = self.service.list_components(None, None).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id", "kind", "name", "class", "term1", "term2", "term3", "amount",
        ])?;

        for component in &components {
            csv_writer.write_record([
                component.id.to_string(),
                component.kind.as_str().to_string(),
                component.name.clone(),
                component.class_name.clone().unwrap_or_default(),
                format_cents(component.terms.term1),
                format_cents(component.terms.term2),
                format_cents(component.terms.term3),
                format_cents(component.amount()),
            ])?;
        }

        csv_writer.flush()?;
        Ok(components.len())
    }

    /// Export class aggregates as a JSON array
    pub async fn export_classes_json<W: Write>(&self, mut writer: W) -> Result<usize> {
        let classes = self.service.list_classes().await?;
        serde_json::to_writer_pretty(&mut writer, &classes)?;
        writer.flush()?;
        Ok(classes.len())
    }

    /// Export components as a JSON array
    pub async fn export_components_json<W: Write>(&self, mut writer: W) -> Result<usize> {
        let components = self.service.list_components(None, None).await?;
        serde_json::to_writer_pretty(&mut writer, &components)?;
        writer.flush()?;
        Ok(components.len())
    }

    /// Export the whole fee structure as one JSON snapshot
    pub async fn export_full_json<W: Write>(&self, mut writer: W) -> Result<FeeStructureSnapshot> {
        let classes = self.service.list_classes().await?;
        let components = self.service.list_components(None, None).await?;

        let snapshot = FeeStructureSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            classes,
            components,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}
