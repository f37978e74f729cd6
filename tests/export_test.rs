mod common;

use anyhow::Result;
use common::{add_charge, add_payment, terms, test_service};
use feeledger::io::Exporter;

#[tokio::test]
async fn test_export_classes_csv() -> Result<()> {
    let (service, _temp) = test_service().await?;

    add_payment(&service, "Grade5", "Tuition", terms(100, 50, 50)).await?;
    service.create_class("Grade6").await?;

    let mut buffer = Vec::new();
    let count = Exporter::new(&service)
        .export_classes_csv(&mut buffer)
        .await?;
    assert_eq!(count, 2);

    let csv = String::from_utf8(buffer)?;
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "class,fee,term1,term2,term3");
    assert_eq!(lines[1], "Grade5,200.00,100.00,50.00,50.00");
    assert_eq!(lines[2], "Grade6,0.00,0.00,0.00,0.00");

    Ok(())
}

#[tokio::test]
async fn test_export_full_json() -> Result<()> {
    let (service, _temp) = test_service().await?;

    add_payment(&service, "Grade5", "Tuition", terms(100, 50, 50)).await?;
    add_charge(&service, None, "Uniform", terms(15, 0, 0)).await?;

    let mut buffer = Vec::new();
    let snapshot = Exporter::new(&service).export_full_json(&mut buffer).await?;
    assert_eq!(snapshot.classes.len(), 1);
    assert_eq!(snapshot.components.len(), 2);

    let value: serde_json::Value = serde_json::from_slice(&buffer)?;
    assert_eq!(value["classes"][0]["class_name"], "Grade5");
    assert_eq!(value["classes"][0]["totals"]["fee"], 20000);
    assert_eq!(value["components"].as_array().map(Vec::len), Some(2));

    Ok(())
}
