use std::sync::Arc;

use dimse::{AttributeValue, DimseStatus, Identifier};
use qrscp::adapters::dimse::QrScpProvider;
use qrscp::mpps::{ProcedureStepError, ProcedureStepRegistry, ProcedureStepStatus};
use qrscp::storage::MemoryRepository;
use qrscp::worklist::{WorklistFinder, SCHEDULED_STEP_SEQUENCE};

fn scheduled_step(date: &str) -> Identifier {
    Identifier::new()
        .with("ScheduledProcedureStepStartDate", date)
        .with("ScheduledStationAETitle", "CT01")
        .with("ScheduledProcedureStepID", "SPS1")
}

fn in_progress(date: &str) -> Identifier {
    Identifier::new()
        .with("PerformedProcedureStepStatus", "IN PROGRESS")
        .with("PatientID", "P1")
        .with("PatientName", "DOE^JANE")
        .with(
            SCHEDULED_STEP_SEQUENCE,
            AttributeValue::Sequence(vec![scheduled_step(date)]),
        )
}

fn provider() -> QrScpProvider {
    QrScpProvider::new(
        Arc::new(MemoryRepository::new()),
        Arc::new(ProcedureStepRegistry::new()),
        "QRSCP",
    )
}

#[test]
fn create_then_complete_then_read_back() {
    let provider = provider();

    let (status, created) = provider.handle_create(Some("1.2.3"), &in_progress("20240101"));
    assert_eq!(status, DimseStatus::Success);
    let created = created.expect("created record");
    assert_eq!(created.get_str("SOPInstanceUID"), Some("1.2.3"));
    assert_eq!(created.get_str("PerformedProcedureStepStatus"), Some("IN PROGRESS"));

    let completion = Identifier::new()
        .with("PerformedProcedureStepStatus", "COMPLETED")
        .with("PerformedProcedureStepEndDate", "20240101");
    let (status, updated) = provider.handle_set(Some("1.2.3"), &completion);
    assert_eq!(status, DimseStatus::Success);
    let updated = updated.expect("updated record");
    assert_eq!(updated.get_str("PerformedProcedureStepStatus"), Some("COMPLETED"));
    assert_eq!(updated.get_str("PatientName"), Some("DOE^JANE"));

    let step = provider.registry().get("1.2.3").expect("registered step");
    assert_eq!(step.status(), Some(ProcedureStepStatus::Completed));
    assert_eq!(step.attributes(), &updated);
}

#[test]
fn duplicate_create_is_rejected_and_state_unchanged() {
    let provider = provider();
    assert_eq!(
        provider.handle_create(Some("1.2.3"), &in_progress("20240101")).0,
        DimseStatus::Success
    );
    let before = provider.registry().get("1.2.3").unwrap();

    let (status, dataset) = provider.handle_create(Some("1.2.3"), &in_progress("20991231"));
    assert_eq!(status, DimseStatus::Failure(0x0111));
    assert!(dataset.is_none());

    let after = provider.registry().get("1.2.3").unwrap();
    assert_eq!(before.attributes(), after.attributes());
    assert_eq!(provider.registry().len(), 1);
}

#[test]
fn create_failures_leave_registry_untouched() {
    let provider = provider();

    let (status, _) = provider.handle_create(None, &in_progress("20240101"));
    assert_eq!(status, DimseStatus::Failure(0x0106));

    let (status, _) = provider.handle_create(Some("1.2.4"), &Identifier::new().with("PatientID", "P1"));
    assert_eq!(status, DimseStatus::Failure(0x0120));

    let discontinued = Identifier::new().with("PerformedProcedureStepStatus", "DISCONTINUED");
    let (status, _) = provider.handle_create(Some("1.2.5"), &discontinued);
    assert_eq!(status, DimseStatus::Failure(0x0106));

    assert!(provider.registry().is_empty());
}

#[test]
fn set_on_unknown_step_fails() {
    let provider = provider();
    let modification = Identifier::new().with("PerformedProcedureStepStatus", "COMPLETED");

    let (status, dataset) = provider.handle_set(Some("9.9.9"), &modification);
    assert_eq!(status, DimseStatus::Failure(0x0112));
    assert!(dataset.is_none());

    let (status, _) = provider.handle_set(None, &modification);
    assert_eq!(status, DimseStatus::Failure(0x0112));

    // No record was left behind by the failed modification
    assert!(provider.registry().is_empty());
    let (status, _) = provider.handle_create(Some("9.9.9"), &in_progress("20240101"));
    assert_eq!(status, DimseStatus::Success);
}

#[test]
fn create_with_status_only_then_duplicate() {
    let provider = provider();
    let attributes = Identifier::new().with("PerformedProcedureStepStatus", "IN PROGRESS");

    let (status, record) = provider.handle_create(Some("SOP-1"), &attributes);
    assert_eq!(status, DimseStatus::Success);
    let record = record.unwrap();
    assert_eq!(
        record.get_str("SOPClassUID"),
        Some(dimse::types::MODALITY_PERFORMED_PROCEDURE_STEP)
    );
    assert_eq!(
        provider.registry().get("SOP-1").unwrap().status(),
        Some(ProcedureStepStatus::InProgress)
    );

    let (status, _) = provider.handle_create(Some("SOP-1"), &attributes);
    assert_eq!(status, DimseStatus::Failure(0x0111));
}

#[test]
fn repeated_set_is_idempotent() {
    let registry = ProcedureStepRegistry::new();
    registry.create(Some("1.2.3"), &in_progress("20240101")).unwrap();

    let modification = Identifier::new()
        .with("PerformedProcedureStepStatus", "DISCONTINUED")
        .with("PerformedProcedureStepDiscontinuationReasonCodeSequence", AttributeValue::Sequence(vec![]));
    let first = registry.modify(Some("1.2.3"), &modification).unwrap();
    let second = registry.modify(Some("1.2.3"), &modification).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        registry.get("1.2.3").unwrap().status(),
        Some(ProcedureStepStatus::Discontinued)
    );
}

#[test]
fn registry_errors_carry_the_key() {
    let registry = ProcedureStepRegistry::new();
    registry.create(Some("1.2.3"), &in_progress("20240101")).unwrap();

    assert_eq!(
        registry.create(Some("1.2.3"), &in_progress("20240101")),
        Err(ProcedureStepError::DuplicateKey("1.2.3".to_string()))
    );
    assert_eq!(
        registry.modify(Some("4.5.6"), &Identifier::new()),
        Err(ProcedureStepError::UnknownKey("4.5.6".to_string()))
    );
}

#[test]
fn created_steps_appear_on_the_worklist() {
    let registry = Arc::new(ProcedureStepRegistry::new());
    registry.create(Some("1.2.3"), &in_progress("20240101")).unwrap();
    registry.create(Some("1.2.4"), &in_progress("20240102")).unwrap();

    let finder = WorklistFinder::new(Arc::clone(&registry));
    let query = Identifier::new().with("PatientName", "").with(
        SCHEDULED_STEP_SEQUENCE,
        AttributeValue::Sequence(vec![Identifier::new()
            .with("ScheduledProcedureStepStartDate", "20240102")
            .with("ScheduledStationAETitle", "")]),
    );

    let responses: Vec<Identifier> = finder
        .find(&query, || false)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(responses.len(), 1);

    let response = &responses[0];
    assert_eq!(response.get_str("PatientName"), Some("DOE^JANE"));
    assert!(!response.contains("PatientID"));

    let items = response.sequence(SCHEDULED_STEP_SEQUENCE).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get_str("ScheduledProcedureStepStartDate"), Some("20240102"));
    assert_eq!(items[0].get_str("ScheduledStationAETitle"), Some("CT01"));
    assert!(!items[0].contains("ScheduledProcedureStepID"));
}

#[test]
fn worklist_without_sequence_fails() {
    let provider = provider();
    let statuses: Vec<DimseStatus> = provider
        .handle_find(
            dimse::types::MODALITY_WORKLIST_FIND,
            &Identifier::new().with("PatientName", ""),
            || false,
        )
        .map(|item| item.status)
        .collect();
    assert_eq!(statuses, vec![DimseStatus::Failure(0xC000)]);
}
