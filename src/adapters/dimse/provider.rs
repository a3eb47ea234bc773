use std::sync::Arc;

use chrono::{DateTime, Utc};
use dimse::scp::FindResponseIter;
use dimse::types::MODALITY_WORKLIST_FIND;
use dimse::{DimseStatus, Identifier, Requestor, ServiceProvider};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::status_mapper;
use crate::mpps::ProcedureStepRegistry;
use crate::qr::QueryMatcher;
use crate::storage::InstanceRepository;
use crate::worklist::WorklistFinder;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Query/Retrieve, Worklist and MPPS service handlers
pub struct QrScpProvider {
    matcher: QueryMatcher,
    worklist: WorklistFinder,
    registry: Arc<ProcedureStepRegistry>,
}

impl QrScpProvider {
    pub fn new(
        repository: Arc<dyn InstanceRepository>,
        registry: Arc<ProcedureStepRegistry>,
        retrieve_ae_title: impl Into<String>,
    ) -> Self {
        Self {
            matcher: QueryMatcher::new(repository, retrieve_ae_title),
            worklist: WorklistFinder::new(Arc::clone(&registry)),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<ProcedureStepRegistry> {
        &self.registry
    }

    /// Verification: always succeeds
    pub fn handle_echo(&self, requestor: &Requestor, timestamp: DateTime<Utc>) -> DimseStatus {
        log_request("C-ECHO", requestor, timestamp);
        DimseStatus::Success
    }

    /// C-FIND under the Patient-Root, Study-Root or Modality Worklist model
    pub fn handle_find<F>(&self, model_uid: &str, identifier: &Identifier, cancelled: F) -> FindResponseIter
    where
        F: Fn() -> bool + Send + 'static,
    {
        if model_uid.trim_end_matches('\0') == MODALITY_WORKLIST_FIND {
            Box::new(
                self.worklist
                    .find(identifier, cancelled)
                    .map(status_mapper::find_response),
            )
        } else {
            Box::new(
                self.matcher
                    .find(model_uid, identifier, cancelled)
                    .map(status_mapper::find_response),
            )
        }
    }

    /// MPPS N-CREATE
    pub fn handle_create(
        &self,
        affected_sop_instance_uid: Option<&str>,
        attribute_list: &Identifier,
    ) -> (DimseStatus, Option<Identifier>) {
        let result = self.registry.create(affected_sop_instance_uid, attribute_list);
        if let Err(ref e) = result {
            warn!("N-CREATE rejected: {}", e);
        }
        status_mapper::procedure_step_response(result)
    }

    /// MPPS N-SET
    pub fn handle_set(
        &self,
        requested_sop_instance_uid: Option<&str>,
        modification_list: &Identifier,
    ) -> (DimseStatus, Option<Identifier>) {
        let result = self.registry.modify(requested_sop_instance_uid, modification_list);
        if let Err(ref e) = result {
            warn!("N-SET rejected: {}", e);
        }
        status_mapper::procedure_step_response(result)
    }
}

fn log_request(kind: &str, requestor: &Requestor, timestamp: DateTime<Utc>) {
    info!(
        "Received {} request from {}:{} ({}) at {}",
        kind,
        requestor.address,
        requestor.port,
        requestor.ae_title,
        timestamp.format(TIMESTAMP_FORMAT)
    );
}

impl ServiceProvider for QrScpProvider {
    fn echo(&self, requestor: &Requestor, timestamp: DateTime<Utc>) -> DimseStatus {
        self.handle_echo(requestor, timestamp)
    }

    fn find(
        &self,
        requestor: &Requestor,
        timestamp: DateTime<Utc>,
        model_uid: &str,
        identifier: Identifier,
        cancel: CancellationToken,
    ) -> FindResponseIter {
        log_request("C-FIND", requestor, timestamp);
        self.handle_find(model_uid, &identifier, move || cancel.is_cancelled())
    }

    fn create(
        &self,
        requestor: &Requestor,
        timestamp: DateTime<Utc>,
        affected_sop_instance_uid: Option<String>,
        attribute_list: Identifier,
    ) -> (DimseStatus, Option<Identifier>) {
        log_request("N-CREATE", requestor, timestamp);
        self.handle_create(affected_sop_instance_uid.as_deref(), &attribute_list)
    }

    fn set(
        &self,
        requestor: &Requestor,
        timestamp: DateTime<Utc>,
        requested_sop_instance_uid: Option<String>,
        modification_list: Identifier,
    ) -> (DimseStatus, Option<Identifier>) {
        log_request("N-SET", requestor, timestamp);
        self.handle_set(requested_sop_instance_uid.as_deref(), &modification_list)
    }
}
