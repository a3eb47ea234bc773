use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use dimse::{Identifier, QueryLevel};

pub mod database_manager;
pub mod ingest;
pub mod memory;
pub mod redb_repository;

pub use memory::MemoryRepository;
pub use redb_repository::RedbRepository;

use crate::qr::translator::InformationModel;

/// Error type for repository operations
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Row serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid instance: {0}")]
    InvalidInstance(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RepositoryError {
    pub fn database(msg: impl std::fmt::Display) -> Self {
        RepositoryError::Database(msg.to_string())
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// One stored SOP Instance, denormalised with its Patient, Study and Series
/// attributes so any query level can be projected from a single row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRow {
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,

    pub study_instance_uid: Option<String>,
    pub study_date: Option<String>,
    pub study_time: Option<String>,
    pub accession_number: Option<String>,
    pub study_id: Option<String>,

    pub series_instance_uid: Option<String>,
    pub modality: Option<String>,
    pub series_number: Option<String>,

    pub sop_instance_uid: Option<String>,
    pub instance_number: Option<String>,

    /// Path of the stored Part 10 file
    pub storage_location: Option<String>,
    pub transfer_syntax_uid: Option<String>,
    pub sop_class_uid: Option<String>,
}

impl InstanceRow {
    /// Look up a repository field by name
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "patient_id" => &self.patient_id,
            "patient_name" => &self.patient_name,
            "study_instance_uid" => &self.study_instance_uid,
            "study_date" => &self.study_date,
            "study_time" => &self.study_time,
            "accession_number" => &self.accession_number,
            "study_id" => &self.study_id,
            "series_instance_uid" => &self.series_instance_uid,
            "modality" => &self.modality,
            "series_number" => &self.series_number,
            "sop_instance_uid" => &self.sop_instance_uid,
            "instance_number" => &self.instance_number,
            "storage_location" => &self.storage_location,
            "transfer_syntax_uid" => &self.transfer_syntax_uid,
            "sop_class_uid" => &self.sop_class_uid,
            _ => return None,
        };
        value.as_deref()
    }

    /// Build a row from a dataset identifier. Empty values are stored as absent.
    pub fn from_identifier(
        identifier: &Identifier,
        storage_location: Option<String>,
        transfer_syntax_uid: Option<String>,
    ) -> RepositoryResult<Self> {
        let text = |keyword: &str| {
            identifier
                .get_str(keyword)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let row = Self {
            patient_id: text("PatientID"),
            patient_name: text("PatientName"),
            study_instance_uid: text("StudyInstanceUID"),
            study_date: text("StudyDate"),
            study_time: text("StudyTime"),
            accession_number: text("AccessionNumber"),
            study_id: text("StudyID"),
            series_instance_uid: text("SeriesInstanceUID"),
            modality: text("Modality"),
            series_number: text("SeriesNumber"),
            sop_instance_uid: text("SOPInstanceUID"),
            instance_number: text("InstanceNumber"),
            storage_location,
            transfer_syntax_uid,
            sop_class_uid: text("SOPClassUID"),
        };
        row.validate()?;
        Ok(row)
    }

    /// A row is only valid when all four hierarchy keys are populated
    pub fn validate(&self) -> RepositoryResult<()> {
        let keys = [
            ("PatientID", &self.patient_id),
            ("StudyInstanceUID", &self.study_instance_uid),
            ("SeriesInstanceUID", &self.series_instance_uid),
            ("SOPInstanceUID", &self.sop_instance_uid),
        ];
        let missing: Vec<&str> = keys
            .iter()
            .filter(|(_, v)| v.as_deref().map_or(true, str::is_empty))
            .map(|(k, _)| *k)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(RepositoryError::InvalidInstance(format!(
                "missing hierarchy key(s): {}",
                missing.join(", ")
            )))
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.sop_instance_uid.as_deref()
    }
}

/// How a predicate value is compared against a stored field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueMatch {
    /// Single value matching
    Exact(String),
    /// Wildcard matching: `*` matches any run of characters, `?` exactly one
    Wildcard(String),
}

impl ValueMatch {
    /// Classify a request value. Universal values (`*`, empty, `?`) yield `None`.
    pub fn from_request(value: &str) -> Option<Self> {
        let value = value.trim();
        match value {
            "" | "*" | "?" => None,
            v if v.contains('*') || v.contains('?') => Some(ValueMatch::Wildcard(v.to_string())),
            v => Some(ValueMatch::Exact(v.to_string())),
        }
    }

    pub fn matches(&self, candidate: Option<&str>) -> bool {
        let Some(candidate) = candidate else {
            return false;
        };
        match self {
            ValueMatch::Exact(expected) => candidate.trim() == expected,
            ValueMatch::Wildcard(pattern) => wildcard_match(pattern, candidate.trim()),
        }
    }
}

/// DICOM wildcard matching (PS3.4 C.2.2.2.4)
pub fn wildcard_match(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();

    let (mut p, mut c) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while c < candidate.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == candidate[c]) {
            p += 1;
            c += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, c));
            p += 1;
        } else if let Some((sp, sc)) = star {
            // Let the last `*` absorb one more character
            p = sp + 1;
            c = sc + 1;
            star = Some((sp, sc + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&ch| ch == '*')
}

/// A constraint on one repository field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub field: &'static str,
    pub value: ValueMatch,
}

impl Predicate {
    pub fn new(field: &'static str, value: ValueMatch) -> Self {
        Self { field, value }
    }

    pub fn matches(&self, row: &InstanceRow) -> bool {
        self.value.matches(row.field(self.field))
    }
}

/// Read/write contract of the instance store.
///
/// Implementations acquire a fresh read scope per `find_candidates` call and
/// release it before returning.
pub trait InstanceRepository: Send + Sync {
    /// Create tables if they do not exist yet
    fn create_schema(&self) -> RepositoryResult<()>;

    /// Insert or replace an instance row, keyed by SOP Instance UID
    fn store_instance(&self, row: &InstanceRow) -> RepositoryResult<()>;

    /// Rows matching every predicate, flattened to the instance level
    fn find_candidates(
        &self,
        model: InformationModel,
        level: QueryLevel,
        predicates: &[Predicate],
    ) -> RepositoryResult<std::vec::IntoIter<InstanceRow>>;

    /// Number of stored instances
    fn count(&self) -> RepositoryResult<usize>;
}

/// Configuration for the instance repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `redb` (persistent) or `memory`
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_database_location")]
    pub database_location: PathBuf,

    /// Directory holding the stored Part 10 files
    #[serde(default = "default_instance_location")]
    pub instance_location: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            database_location: default_database_location(),
            instance_location: default_instance_location(),
        }
    }
}

fn default_backend() -> String {
    "redb".to_string()
}

fn default_database_location() -> PathBuf {
    PathBuf::from("instances.redb")
}

fn default_instance_location() -> PathBuf {
    PathBuf::from("data/")
}

/// Open the repository named by the configuration and make sure its schema exists
pub fn create_repository(config: &StorageConfig) -> RepositoryResult<Arc<dyn InstanceRepository>> {
    let repository: Arc<dyn InstanceRepository> = match config.backend.as_str() {
        "redb" => Arc::new(RedbRepository::open(&config.database_location)?),
        "memory" => Arc::new(MemoryRepository::new()),
        other => {
            return Err(RepositoryError::Config(format!(
                "Unknown storage backend: {}",
                other
            )))
        }
    };

    repository.create_schema()?;
    Ok(repository)
}
