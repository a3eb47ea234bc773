//! DIMSE Status Code Mapping
//!
//! Converts core errors into DICOM DIMSE status codes as defined in PS3.4 and
//! PS3.7 Annex C.
//!
//! # Status Code Mapping
//!
//! - `0x0000`: Success
//! - `0xFF00`: Pending (C-FIND match follows)
//! - `0xFE00`: Cancel
//! - `0xA900`: Identifier does not match SOP Class
//! - `0x0110`: Processing failure
//! - `0xC000`: Unable to process
//! - `0x0106`: Invalid attribute value
//! - `0x0111`: Duplicate SOP instance
//! - `0x0112`: No such object instance
//! - `0x0120`: Missing attribute

use dimse::types::DimseStatus;
use dimse::{FindItem, Identifier};

use crate::mpps::ProcedureStepError;
use crate::qr::QueryError;

/// Maps a find stream error to its DIMSE status
pub fn query_error_to_dimse(error: &QueryError) -> DimseStatus {
    match error {
        QueryError::InvalidIdentifier(_) => DimseStatus::Failure(0xA900), // Identifier does not match SOP Class
        QueryError::QueryExecution(_) => DimseStatus::Failure(0x0110), // Processing failure
        QueryError::Cancelled => DimseStatus::Cancel,
        QueryError::ResponseBuild(_) => DimseStatus::Failure(0xC000), // Unable to process
        QueryError::MissingSequence(_) => DimseStatus::Failure(0xC000), // Unable to process
    }
}

/// Maps a registry error to its DIMSE status
pub fn procedure_step_error_to_dimse(error: &ProcedureStepError) -> DimseStatus {
    match error {
        ProcedureStepError::MissingKey => DimseStatus::Failure(0x0106), // Invalid attribute value
        ProcedureStepError::InvalidStatus(_) => DimseStatus::Failure(0x0106), // Invalid attribute value
        ProcedureStepError::MissingAttribute(_) => DimseStatus::Failure(0x0120), // Missing attribute
        ProcedureStepError::DuplicateKey(_) => DimseStatus::Failure(0x0111), // Duplicate SOP instance
        ProcedureStepError::UnknownKey(_) => DimseStatus::Failure(0x0112), // No such object instance
    }
}

/// Turns one find stream item into a C-FIND response.
///
/// Only terminal errors end the operation; a row-scoped failure is reported
/// and the stream carries on.
pub fn find_response(item: Result<Identifier, QueryError>) -> FindItem {
    match item {
        Ok(identifier) => FindItem::pending(identifier),
        Err(e) if e.is_terminal() => FindItem::terminal(query_error_to_dimse(&e)),
        Err(e) => FindItem::row_failure(query_error_to_dimse(&e)),
    }
}

/// Turns a registry result into an N-CREATE / N-SET response
pub fn procedure_step_response(
    result: Result<Identifier, ProcedureStepError>,
) -> (DimseStatus, Option<Identifier>) {
    match result {
        Ok(record) => (DimseStatus::Success, Some(record)),
        Err(e) => (procedure_step_error_to_dimse(&e), None),
    }
}
