mod common;

use anyhow::Result;
use common::{
    add_charge, add_payment, assert_consistent, stored_totals, terms, test_service, totals,
};
use feeledger::application::{AppError, ComponentChange};
use feeledger::domain::{ComponentKind, FeeTotals, RawTerms};
use uuid::Uuid;

fn change(class_name: Option<&str>, raw: RawTerms) -> ComponentChange {
    ComponentChange {
        class_name: class_name.map(str::to_string),
        terms: raw,
        name: None,
    }
}

#[tokio::test]
async fn test_create_update_delete_scenario() -> Result<()> {
    let (service, _temp) = test_service().await?;

    service.create_class("Grade5").await?;
    assert_eq!(stored_totals(&service, "Grade5").await?, FeeTotals::ZERO);

    let tuition = add_payment(&service, "Grade5", "Tuition", terms(100, 50, 50)).await?;
    assert_eq!(tuition.amount(), 20000);
    assert_eq!(stored_totals(&service, "Grade5").await?, totals(100, 50, 50));

    let updated = service
        .update_component(tuition.id, change(Some("Grade5"), terms(120, 50, 50)))
        .await?;
    assert_eq!(updated.amount(), 22000);
    assert_eq!(stored_totals(&service, "Grade5").await?, totals(120, 50, 50));

    let removed = service.delete_component(tuition.id).await?;
    assert_eq!(removed.amount(), 22000);
    assert_eq!(stored_totals(&service, "Grade5").await?, FeeTotals::ZERO);

    assert!(matches!(
        service.get_component(tuition.id).await,
        Err(AppError::ComponentNotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_create_component_creates_missing_aggregate() -> Result<()> {
    let (service, _temp) = test_service().await?;

    add_payment(&service, "Grade1", "Tuition", terms(300, 200, 100)).await?;

    let aggregate = service.get_aggregate("Grade1").await?;
    assert_eq!(aggregate.totals, totals(300, 200, 100));
    assert_eq!(aggregate.totals.fee, 60000);

    Ok(())
}

#[tokio::test]
async fn test_decimal_terms_are_exact() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let raw = RawTerms::new("1500.50", "0.25", " 99.9 ");
    let component = add_payment(&service, "Grade2", "Boarding", raw).await?;

    assert_eq!(component.terms.term1, 150050);
    assert_eq!(component.terms.term2, 25);
    assert_eq!(component.terms.term3, 9990);
    assert_eq!(component.amount(), 160065);
    assert_eq!(
        stored_totals(&service, "Grade2").await?,
        FeeTotals::new(160065, 150050, 25, 9990)
    );

    Ok(())
}

#[tokio::test]
async fn test_invariant_holds_across_mixed_operations() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let tuition = add_payment(&service, "Grade3", "Tuition", terms(400, 300, 300)).await?;
    let lunch = add_payment(&service, "Grade3", "Lunch", terms(50, 50, 50)).await?;
    let trip = add_charge(&service, Some("Grade3"), "Trip", terms(0, 80, 0)).await?;
    let books = add_payment(&service, "Grade4", "Books", terms(60, 0, 0)).await?;
    assert_consistent(&service, "Grade3").await?;
    assert_consistent(&service, "Grade4").await?;

    service
        .update_component(lunch.id, change(Some("Grade3"), terms(55, 55, 55)))
        .await?;
    service
        .update_component(trip.id, change(Some("Grade4"), terms(0, 90, 0)))
        .await?;
    service.delete_component(tuition.id).await?;
    service
        .update_component(books.id, change(Some("Grade3"), terms(60, 10, 0)))
        .await?;
    add_charge(&service, None, "Uniform", terms(20, 0, 0)).await?;

    assert_consistent(&service, "Grade3").await?;
    assert_consistent(&service, "Grade4").await?;
    assert_eq!(
        stored_totals(&service, "Grade3").await?,
        totals(55 + 60, 55 + 10, 55)
    );
    assert_eq!(stored_totals(&service, "Grade4").await?, totals(0, 90, 0));

    Ok(())
}

#[tokio::test]
async fn test_idempotent_update_leaves_aggregate_unchanged() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let tuition = add_payment(&service, "Grade5", "Tuition", terms(100, 50, 50)).await?;
    let before = service.get_aggregate("Grade5").await?;

    for _ in 0..3 {
        service
            .update_component(tuition.id, change(Some("Grade5"), terms(100, 50, 50)))
            .await?;
    }

    let after = service.get_aggregate("Grade5").await?;
    assert_eq!(after.totals, before.totals);

    Ok(())
}

#[tokio::test]
async fn test_move_between_classes() -> Result<()> {
    let (service, _temp) = test_service().await?;

    service.create_class("Grade5").await?;
    service.create_class("Grade6").await?;
    add_payment(&service, "Grade6", "Tuition", terms(10, 10, 10)).await?;
    let fees = add_payment(&service, "Grade5", "Activity", terms(100, 50, 50)).await?;

    let moved = service
        .update_component(fees.id, change(Some("Grade6"), terms(120, 60, 60)))
        .await?;
    assert_eq!(moved.class_name.as_deref(), Some("Grade6"));

    // Old class loses the old contribution, new class gains the new one
    assert_eq!(stored_totals(&service, "Grade5").await?, FeeTotals::ZERO);
    assert_eq!(
        stored_totals(&service, "Grade6").await?,
        totals(10 + 120, 10 + 60, 10 + 60)
    );

    // Moving to a class with no aggregate row creates it
    service
        .update_component(fees.id, change(Some("Grade7"), terms(120, 60, 60)))
        .await?;
    assert_eq!(stored_totals(&service, "Grade7").await?, totals(120, 60, 60));
    assert_eq!(stored_totals(&service, "Grade6").await?, totals(10, 10, 10));

    Ok(())
}

#[tokio::test]
async fn test_validation_errors_change_nothing() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let tuition = add_payment(&service, "Grade5", "Tuition", terms(100, 50, 50)).await?;
    let before = service.get_aggregate("Grade5").await?;

    let bad_terms = [
        RawTerms::new("abc", "50", "50"),
        RawTerms::new("100", "-5", "50"),
        RawTerms::new("100", "50", ""),
        RawTerms::new("100", "1e3", "50"),
    ];

    for raw in bad_terms {
        let update = service
            .update_component(tuition.id, change(Some("Grade5"), raw.clone()))
            .await;
        assert!(matches!(update, Err(AppError::Validation(_))), "{:?}", raw);

        let create = service
            .create_component(ComponentKind::Compulsory, "Extra", Some("Grade5"), &raw)
            .await;
        assert!(matches!(create, Err(AppError::Validation(_))), "{:?}", raw);
    }

    // Compulsory payments cannot be unbound
    let unbind = service
        .update_component(tuition.id, change(None, terms(100, 50, 50)))
        .await;
    assert!(matches!(unbind, Err(AppError::Validation(_))));

    let blank_class = service
        .create_component(ComponentKind::Compulsory, "Extra", Some("  "), &terms(1, 1, 1))
        .await;
    assert!(matches!(blank_class, Err(AppError::Validation(_))));

    let after = service.get_aggregate("Grade5").await?;
    assert_eq!(after.totals, before.totals);
    assert_eq!(service.get_component(tuition.id).await?.terms, tuition.terms);
    assert_eq!(service.list_components(None, Some("Grade5")).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_unknown_component_is_not_found() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let missing = Uuid::new_v4();

    assert!(matches!(
        service.get_component(missing).await,
        Err(AppError::ComponentNotFound(_))
    ));
    assert!(matches!(
        service
            .update_component(missing, change(Some("Grade5"), terms(1, 1, 1)))
            .await,
        Err(AppError::ComponentNotFound(_))
    ));
    assert!(matches!(
        service.delete_component(missing).await,
        Err(AppError::ComponentNotFound(_))
    ));
    assert!(service.list_classes().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_other_charges_bind_and_unbind() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let global = add_charge(&service, None, "Registration", terms(25, 0, 0)).await?;
    assert!(global.class_name.is_none());
    assert!(service.list_classes().await?.is_empty());

    // Binding a global charge adds it to the class
    let bound = service
        .update_component(global.id, change(Some("Grade8"), terms(25, 0, 0)))
        .await?;
    assert_eq!(bound.kind, ComponentKind::Other);
    assert_eq!(stored_totals(&service, "Grade8").await?, totals(25, 0, 0));

    // Unbinding subtracts it again
    service
        .update_component(global.id, change(None, terms(30, 0, 0)))
        .await?;
    assert_eq!(stored_totals(&service, "Grade8").await?, FeeTotals::ZERO);
    assert_eq!(service.get_component(global.id).await?.amount(), 3000);

    // Deleting an unbound charge touches no aggregate
    service.delete_component(global.id).await?;
    assert_eq!(stored_totals(&service, "Grade8").await?, FeeTotals::ZERO);

    Ok(())
}

#[tokio::test]
async fn test_rename_component_keeps_totals() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let tuition = add_payment(&service, "Grade5", "Tuition", terms(100, 50, 50)).await?;
    let renamed = service
        .update_component(
            tuition.id,
            ComponentChange {
                class_name: Some("Grade5".into()),
                terms: terms(100, 50, 50),
                name: Some("Tuition 2026".into()),
            },
        )
        .await?;

    assert_eq!(renamed.name, "Tuition 2026");
    assert_eq!(service.get_component(tuition.id).await?.name, "Tuition 2026");
    assert_eq!(stored_totals(&service, "Grade5").await?, totals(100, 50, 50));

    Ok(())
}

#[tokio::test]
async fn test_list_components_filters() -> Result<()> {
    let (service, _temp) = test_service().await?;

    add_payment(&service, "Grade5", "Tuition", terms(1, 1, 1)).await?;
    add_payment(&service, "Grade6", "Tuition", terms(2, 2, 2)).await?;
    add_charge(&service, Some("Grade5"), "Trip", terms(3, 0, 0)).await?;
    add_charge(&service, None, "Uniform", terms(4, 0, 0)).await?;

    assert_eq!(service.list_components(None, None).await?.len(), 4);
    assert_eq!(service.list_components(None, Some("Grade5")).await?.len(), 2);
    assert_eq!(
        service
            .list_components(Some(ComponentKind::Other), None)
            .await?
            .len(),
        2
    );
    assert_eq!(
        service
            .list_components(Some(ComponentKind::Compulsory), Some("Grade6"))
            .await?
            .len(),
        1
    );

    let info = service.get_class_info("Grade5").await?;
    assert_eq!(info.components.len(), 2);
    assert_eq!(info.aggregate.totals, totals(4, 1, 1));

    Ok(())
}

#[tokio::test]
async fn test_class_lifecycle() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let created = service.create_class("Grade9").await?;
    assert!(created.totals.is_zero());
    assert!(matches!(
        service.create_class("Grade9").await,
        Err(AppError::ClassAlreadyExists(_))
    ));

    let tuition = add_payment(&service, "Grade9", "Tuition", terms(10, 10, 10)).await?;
    match service.delete_class("Grade9").await {
        Err(AppError::ClassInUse { components, .. }) => assert_eq!(components, 1),
        other => panic!("expected ClassInUse, got {:?}", other),
    }
    // Refused delete left the aggregate in place
    assert_eq!(stored_totals(&service, "Grade9").await?, totals(10, 10, 10));

    service.delete_component(tuition.id).await?;
    service.delete_class("Grade9").await?;
    assert!(matches!(
        service.get_aggregate("Grade9").await,
        Err(AppError::ClassNotFound(_))
    ));
    assert!(matches!(
        service.delete_class("Grade9").await,
        Err(AppError::ClassNotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_enrollment_snapshot_is_a_copy() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let tuition = add_payment(&service, "Grade5", "Tuition", terms(100, 50, 50)).await?;
    let snapshot = service.enrollment_snapshot("Grade5").await?;
    assert_eq!(snapshot.class_name, "Grade5");
    assert_eq!(snapshot.totals, totals(100, 50, 50));

    // Later fee changes do not reach an existing snapshot
    service
        .update_component(tuition.id, change(Some("Grade5"), terms(200, 50, 50)))
        .await?;
    assert_eq!(snapshot.totals, totals(100, 50, 50));
    assert_eq!(
        service.enrollment_snapshot("Grade5").await?.totals,
        totals(200, 50, 50)
    );

    assert!(matches!(
        service.enrollment_snapshot("Nursery").await,
        Err(AppError::ClassNotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_totals_overflow_is_refused() -> Result<()> {
    let (service, _temp) = test_service().await?;

    // Each term alone fits in cents; two of them in one class do not
    let huge = RawTerms::new("50000000000000000", "0", "0");
    let first = add_payment(&service, "Grade5", "Endowment", huge.clone()).await?;
    let before = service.get_aggregate("Grade5").await?;
    assert_eq!(before.totals.fee, 5_000_000_000_000_000_000);

    let second = service
        .create_component(ComponentKind::Compulsory, "Endowment 2", Some("Grade5"), &huge)
        .await;
    assert!(matches!(second, Err(AppError::Validation(_))), "{:?}", second);

    let small = add_payment(&service, "Grade5", "Lunch", terms(1, 0, 0)).await?;
    let grown = service
        .update_component(small.id, change(Some("Grade5"), huge.clone()))
        .await;
    assert!(matches!(grown, Err(AppError::Validation(_))), "{:?}", grown);

    // Nothing of the refused changes was kept
    assert_eq!(
        stored_totals(&service, "Grade5").await?,
        before.totals + totals(1, 0, 0)
    );
    assert_eq!(service.get_component(small.id).await?.amount(), 100);
    assert_eq!(service.list_components(None, Some("Grade5")).await?.len(), 2);
    assert_consistent(&service, "Grade5").await?;

    // The same amount is fine in a class of its own
    service
        .update_component(first.id, change(Some("Grade6"), huge))
        .await?;
    assert_eq!(stored_totals(&service, "Grade6").await?.fee, 5_000_000_000_000_000_000);

    Ok(())
}

#[tokio::test]
async fn test_class_names_are_trimmed_everywhere() -> Result<()> {
    let (service, _temp) = test_service().await?;

    add_payment(&service, " Grade5 ", "Tuition", terms(100, 50, 50)).await?;

    assert_eq!(service.get_aggregate("Grade5").await?.class_name, "Grade5");
    assert_eq!(
        service.get_aggregate("  Grade5\t").await?.totals,
        totals(100, 50, 50)
    );
    assert_eq!(service.enrollment_snapshot(" Grade5").await?.class_name, "Grade5");
    assert_eq!(service.get_class_info("Grade5 ").await?.components.len(), 1);
    assert_eq!(
        service.list_components(None, Some(" Grade5 ")).await?.len(),
        1
    );
    assert!(matches!(
        service.get_aggregate("   ").await,
        Err(AppError::Validation(_))
    ));

    Ok(())
}
