use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use dimse::types::MODALITY_PERFORMED_PROCEDURE_STEP;
use dimse::Identifier;
use tracing::{debug, info, warn};

const STATUS_KEYWORD: &str = "PerformedProcedureStepStatus";

/// Performed Procedure Step Status (0040,0252)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureStepStatus {
    InProgress,
    Completed,
    Discontinued,
}

impl ProcedureStepStatus {
    /// Parse a status value, ignoring case and padding
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "IN PROGRESS" => Some(ProcedureStepStatus::InProgress),
            "COMPLETED" => Some(ProcedureStepStatus::Completed),
            "DISCONTINUED" => Some(ProcedureStepStatus::Discontinued),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcedureStepStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcedureStepStatus::InProgress => "IN PROGRESS",
            ProcedureStepStatus::Completed => "COMPLETED",
            ProcedureStepStatus::Discontinued => "DISCONTINUED",
        }
    }
}

impl std::fmt::Display for ProcedureStepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProcedureStepError {
    #[error("Affected SOP Instance UID is missing")]
    MissingKey,

    #[error("Procedure step {0} already exists")]
    DuplicateKey(String),

    #[error("Attribute {0} is missing")]
    MissingAttribute(&'static str),

    #[error("Procedure step must be created IN PROGRESS, got '{0}'")]
    InvalidStatus(String),

    #[error("No procedure step {0}")]
    UnknownKey(String),
}

/// A managed MPPS SOP instance
#[derive(Debug, Clone)]
pub struct ProcedureStep {
    sop_instance_uid: String,
    attributes: Identifier,
}

impl ProcedureStep {
    pub fn sop_instance_uid(&self) -> &str {
        &self.sop_instance_uid
    }

    pub fn attributes(&self) -> &Identifier {
        &self.attributes
    }

    /// Current status, if the record carries a recognised value
    pub fn status(&self) -> Option<ProcedureStepStatus> {
        self.attributes
            .get_str(STATUS_KEYWORD)
            .and_then(ProcedureStepStatus::parse)
    }
}

/// In-memory store of procedure steps keyed by SOP Instance UID.
///
/// Insertion takes the map write lock; updates lock only the affected step.
/// Records are never removed.
#[derive(Debug, Default)]
pub struct ProcedureStepRegistry {
    steps: RwLock<HashMap<String, Arc<Mutex<ProcedureStep>>>>,
}

impl ProcedureStepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new procedure step (N-CREATE)
    pub fn create(
        &self,
        key: Option<&str>,
        attributes: &Identifier,
    ) -> Result<Identifier, ProcedureStepError> {
        let key = key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ProcedureStepError::MissingKey)?;

        let mut steps = self.steps.write().unwrap_or_else(|e| e.into_inner());
        if steps.contains_key(key) {
            return Err(ProcedureStepError::DuplicateKey(key.to_string()));
        }

        let status = attributes
            .get(STATUS_KEYWORD)
            .ok_or(ProcedureStepError::MissingAttribute(STATUS_KEYWORD))?;
        match status.as_str().and_then(ProcedureStepStatus::parse) {
            Some(ProcedureStepStatus::InProgress) => {}
            _ => {
                return Err(ProcedureStepError::InvalidStatus(
                    status.as_str().unwrap_or_default().to_string(),
                ))
            }
        }

        let mut record = Identifier::new()
            .with("SOPClassUID", MODALITY_PERFORMED_PROCEDURE_STEP)
            .with("SOPInstanceUID", key);
        record.update(attributes);

        steps.insert(
            key.to_string(),
            Arc::new(Mutex::new(ProcedureStep {
                sop_instance_uid: key.to_string(),
                attributes: record.clone(),
            })),
        );

        info!("Created procedure step {}", key);
        Ok(record)
    }

    /// Merge a modification list into an existing procedure step (N-SET).
    ///
    /// Values overwrite existing ones. Status transitions are not enforced.
    pub fn modify(
        &self,
        key: Option<&str>,
        modifications: &Identifier,
    ) -> Result<Identifier, ProcedureStepError> {
        let key = key.map(str::trim).unwrap_or_default();
        let step = {
            let steps = self.steps.read().unwrap_or_else(|e| e.into_inner());
            steps
                .get(key)
                .cloned()
                .ok_or_else(|| ProcedureStepError::UnknownKey(key.to_string()))?
        };

        let mut step = step.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = step.status().filter(ProcedureStepStatus::is_terminal) {
            let requested = modifications
                .get_str(STATUS_KEYWORD)
                .and_then(ProcedureStepStatus::parse);
            if requested.is_some_and(|next| next != current) {
                warn!(
                    "Procedure step {} moved out of terminal status {}",
                    key, current
                );
            }
        }

        step.attributes.update(modifications);
        debug!("Updated procedure step {}", key);
        Ok(step.attributes.clone())
    }

    /// Snapshot of a single procedure step
    pub fn get(&self, key: &str) -> Option<ProcedureStep> {
        let steps = self.steps.read().unwrap_or_else(|e| e.into_inner());
        let step = steps.get(key)?;
        let step = step.lock().unwrap_or_else(|e| e.into_inner());
        Some(step.clone())
    }

    /// Snapshot of every procedure step, in no particular order
    pub fn snapshot(&self) -> Vec<ProcedureStep> {
        let steps = self.steps.read().unwrap_or_else(|e| e.into_inner());
        steps
            .values()
            .map(|step| step.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.steps.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
