//! Attribute tables for the Patient-Root and Study-Root information models
//!
//! Each level lists its unique (U) and required (R) keys. The same tables drive
//! request validation, predicate construction and response projection.

use dicom_core::{Tag, VR};
use dicom_dictionary_std::tags;
use dimse::types::{PATIENT_ROOT_FIND, STUDY_ROOT_FIND};
use dimse::QueryLevel;

/// Query/Retrieve information model a C-FIND runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InformationModel {
    PatientRoot,
    StudyRoot,
}

impl InformationModel {
    /// Resolve the model from the request's Affected SOP Class UID
    pub fn from_sop_class(uid: &str) -> Option<Self> {
        match uid.trim_end_matches('\0').trim() {
            PATIENT_ROOT_FIND => Some(InformationModel::PatientRoot),
            STUDY_ROOT_FIND => Some(InformationModel::StudyRoot),
            _ => None,
        }
    }

    pub fn sop_class_uid(&self) -> &'static str {
        match self {
            InformationModel::PatientRoot => PATIENT_ROOT_FIND,
            InformationModel::StudyRoot => STUDY_ROOT_FIND,
        }
    }

    fn table(&self) -> &'static [LevelAttributes] {
        match self {
            InformationModel::PatientRoot => PATIENT_ROOT,
            InformationModel::StudyRoot => STUDY_ROOT,
        }
    }

    /// Whether `level` exists in this model's hierarchy
    pub fn supports(&self, level: QueryLevel) -> bool {
        self.table().iter().any(|entry| entry.level == level)
    }
}

impl std::fmt::Display for InformationModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InformationModel::PatientRoot => write!(f, "Patient Root"),
            InformationModel::StudyRoot => write!(f, "Study Root"),
        }
    }
}

/// Matching key type within a level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Unique,
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSpec {
    pub keyword: &'static str,
    pub tag: Tag,
    pub vr: VR,
    pub key_type: KeyType,
    /// Repository field holding the value
    pub field: &'static str,
}

impl AttributeSpec {
    const fn new(
        keyword: &'static str,
        tag: Tag,
        vr: VR,
        key_type: KeyType,
        field: &'static str,
    ) -> Self {
        Self {
            keyword,
            tag,
            vr,
            key_type,
            field,
        }
    }

    pub fn is_unique(&self) -> bool {
        self.key_type == KeyType::Unique
    }
}

#[derive(Debug)]
pub struct LevelAttributes {
    pub level: QueryLevel,
    pub attributes: &'static [AttributeSpec],
}

const PATIENT_ID: AttributeSpec =
    AttributeSpec::new("PatientID", tags::PATIENT_ID, VR::LO, KeyType::Unique, "patient_id");
const PATIENT_NAME: AttributeSpec = AttributeSpec::new(
    "PatientName",
    tags::PATIENT_NAME,
    VR::PN,
    KeyType::Required,
    "patient_name",
);
const STUDY_INSTANCE_UID: AttributeSpec = AttributeSpec::new(
    "StudyInstanceUID",
    tags::STUDY_INSTANCE_UID,
    VR::UI,
    KeyType::Unique,
    "study_instance_uid",
);
const STUDY_DATE: AttributeSpec =
    AttributeSpec::new("StudyDate", tags::STUDY_DATE, VR::DA, KeyType::Required, "study_date");
const STUDY_TIME: AttributeSpec =
    AttributeSpec::new("StudyTime", tags::STUDY_TIME, VR::TM, KeyType::Required, "study_time");
const ACCESSION_NUMBER: AttributeSpec = AttributeSpec::new(
    "AccessionNumber",
    tags::ACCESSION_NUMBER,
    VR::SH,
    KeyType::Required,
    "accession_number",
);
const STUDY_ID: AttributeSpec =
    AttributeSpec::new("StudyID", tags::STUDY_ID, VR::SH, KeyType::Required, "study_id");
const SERIES_INSTANCE_UID: AttributeSpec = AttributeSpec::new(
    "SeriesInstanceUID",
    tags::SERIES_INSTANCE_UID,
    VR::UI,
    KeyType::Unique,
    "series_instance_uid",
);
const MODALITY: AttributeSpec =
    AttributeSpec::new("Modality", tags::MODALITY, VR::CS, KeyType::Required, "modality");
const SERIES_NUMBER: AttributeSpec = AttributeSpec::new(
    "SeriesNumber",
    tags::SERIES_NUMBER,
    VR::IS,
    KeyType::Required,
    "series_number",
);
const SOP_INSTANCE_UID: AttributeSpec = AttributeSpec::new(
    "SOPInstanceUID",
    tags::SOP_INSTANCE_UID,
    VR::UI,
    KeyType::Unique,
    "sop_instance_uid",
);
const INSTANCE_NUMBER: AttributeSpec = AttributeSpec::new(
    "InstanceNumber",
    tags::INSTANCE_NUMBER,
    VR::IS,
    KeyType::Required,
    "instance_number",
);

/// Stored with every instance but not a matching key of any level
pub const SOP_CLASS: AttributeSpec = AttributeSpec::new(
    "SOPClassUID",
    tags::SOP_CLASS_UID,
    VR::UI,
    KeyType::Required,
    "sop_class_uid",
);

// Under Study Root the patient attributes are plain study-level keys
const STUDY_ROOT_PATIENT_ID: AttributeSpec = AttributeSpec {
    key_type: KeyType::Required,
    ..PATIENT_ID
};

const SERIES_ATTRIBUTES: &[AttributeSpec] = &[SERIES_INSTANCE_UID, MODALITY, SERIES_NUMBER];
const IMAGE_ATTRIBUTES: &[AttributeSpec] = &[SOP_INSTANCE_UID, INSTANCE_NUMBER];

pub const PATIENT_ROOT: &[LevelAttributes] = &[
    LevelAttributes {
        level: QueryLevel::Patient,
        attributes: &[PATIENT_ID, PATIENT_NAME],
    },
    LevelAttributes {
        level: QueryLevel::Study,
        attributes: &[
            STUDY_INSTANCE_UID,
            STUDY_DATE,
            STUDY_TIME,
            ACCESSION_NUMBER,
            STUDY_ID,
        ],
    },
    LevelAttributes {
        level: QueryLevel::Series,
        attributes: SERIES_ATTRIBUTES,
    },
    LevelAttributes {
        level: QueryLevel::Image,
        attributes: IMAGE_ATTRIBUTES,
    },
];

pub const STUDY_ROOT: &[LevelAttributes] = &[
    LevelAttributes {
        level: QueryLevel::Study,
        attributes: &[
            STUDY_INSTANCE_UID,
            STUDY_DATE,
            STUDY_TIME,
            ACCESSION_NUMBER,
            STUDY_ID,
            STUDY_ROOT_PATIENT_ID,
            PATIENT_NAME,
        ],
    },
    LevelAttributes {
        level: QueryLevel::Series,
        attributes: SERIES_ATTRIBUTES,
    },
    LevelAttributes {
        level: QueryLevel::Image,
        attributes: IMAGE_ATTRIBUTES,
    },
];

/// Repository field for a keyword, if the keyword is stored
pub fn translate(keyword: &str) -> Option<&'static str> {
    attribute(keyword).map(|spec| spec.field)
}

/// Table entry for a keyword
pub fn attribute(keyword: &str) -> Option<&'static AttributeSpec> {
    PATIENT_ROOT
        .iter()
        .flat_map(|entry| entry.attributes.iter())
        .find(|spec| spec.keyword == keyword)
}

/// Every stored attribute, in hierarchy order
pub fn indexed_attributes() -> impl Iterator<Item = &'static AttributeSpec> {
    PATIENT_ROOT.iter().flat_map(|entry| entry.attributes.iter())
}

/// Attributes of every level from the root down to and including `level`.
///
/// Returns `None` when the model has no such level.
pub fn attributes_for_level(
    model: InformationModel,
    level: QueryLevel,
) -> Option<Vec<&'static AttributeSpec>> {
    if !model.supports(level) {
        return None;
    }

    let mut attributes = Vec::new();
    for entry in model.table() {
        attributes.extend(entry.attributes.iter());
        if entry.level == level {
            break;
        }
    }
    Some(attributes)
}
