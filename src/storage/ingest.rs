//! Indexing of DICOM Part 10 files into the instance repository

use std::path::Path;

use dicom_core::Tag;
use dicom_dictionary_std::tags;
use dicom_object::{OpenFileOptions, ReadError};
use dimse::Identifier;

use crate::qr::translator::{indexed_attributes, SOP_CLASS};
use crate::storage::{InstanceRepository, InstanceRow, RepositoryError, RepositoryResult};

impl From<ReadError> for RepositoryError {
    fn from(err: ReadError) -> Self {
        RepositoryError::InvalidInstance(format!("Failed to read DICOM file: {}", err))
    }
}

/// Read the indexed attributes of a Part 10 file into a repository row.
///
/// Parsing stops before the pixel data.
pub fn read_instance(path: &Path) -> RepositoryResult<InstanceRow> {
    let obj = OpenFileOptions::new()
        .read_until(tags::PIXEL_DATA)
        .open_file(path)?;

    let text = |tag: Tag| {
        obj.element(tag)
            .ok()
            .and_then(|elem| elem.to_str().ok())
            .map(|value| value.trim_end_matches(['\0', ' ']).to_string())
    };

    let mut identifier = Identifier::new();
    for spec in indexed_attributes().chain(std::iter::once(&SOP_CLASS)) {
        if let Some(value) = text(spec.tag) {
            identifier.insert(spec.keyword, value);
        }
    }

    let transfer_syntax = obj
        .meta()
        .transfer_syntax()
        .trim_end_matches('\0')
        .to_string();
    let location = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string();

    InstanceRow::from_identifier(&identifier, Some(location), Some(transfer_syntax))
}

/// Index one file into the repository and return the stored row
pub fn index_file(repository: &dyn InstanceRepository, path: &Path) -> RepositoryResult<InstanceRow> {
    let row = read_instance(path)?;
    repository.store_instance(&row)?;
    tracing::info!(
        "Indexed {} as {}",
        path.display(),
        row.key().unwrap_or_default()
    );
    Ok(row)
}

/// Index every file, logging and skipping the ones that fail. Returns the
/// number of files indexed.
pub fn index_files<P: AsRef<Path>>(repository: &dyn InstanceRepository, paths: &[P]) -> usize {
    let mut indexed = 0;
    for path in paths {
        let path: &Path = path.as_ref();
        match index_file(repository, path) {
            Ok(_) => indexed += 1,
            Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
        }
    }
    indexed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryRepository;
    use dicom_core::{DataElement, PrimitiveValue, VR};
    use dicom_object::{FileMetaTableBuilder, InMemDicomObject};

    const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
    const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";

    fn write_instance(dir: &Path, name: &str, with_series: bool) -> std::path::PathBuf {
        let mut obj = InMemDicomObject::new_empty();
        let mut put = |tag, vr, value: &str| {
            obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
        };
        put(tags::SOP_CLASS_UID, VR::UI, CT_IMAGE_STORAGE);
        put(tags::SOP_INSTANCE_UID, VR::UI, "1.2.3.4.5");
        put(tags::PATIENT_ID, VR::LO, "1CT1");
        put(tags::PATIENT_NAME, VR::PN, "CompressedSamples^CT1");
        put(tags::STUDY_INSTANCE_UID, VR::UI, "1.2.3");
        put(tags::STUDY_DATE, VR::DA, "20040119");
        put(tags::MODALITY, VR::CS, "CT");
        put(tags::INSTANCE_NUMBER, VR::IS, "1");
        if with_series {
            put(tags::SERIES_INSTANCE_UID, VR::UI, "1.2.3.4");
        }

        let file_obj = obj
            .with_meta(
                FileMetaTableBuilder::new()
                    .media_storage_sop_class_uid(CT_IMAGE_STORAGE)
                    .media_storage_sop_instance_uid("1.2.3.4.5")
                    .transfer_syntax(EXPLICIT_VR_LE),
            )
            .unwrap();

        let path = dir.join(name);
        file_obj.write_to_file(&path).unwrap();
        path
    }

    #[test]
    fn test_index_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_instance(dir.path(), "ct.dcm", true);
        let repository = MemoryRepository::new();

        let row = index_file(&repository, &path).unwrap();
        assert_eq!(row.patient_id.as_deref(), Some("1CT1"));
        assert_eq!(row.patient_name.as_deref(), Some("CompressedSamples^CT1"));
        assert_eq!(row.study_date.as_deref(), Some("20040119"));
        assert_eq!(row.accession_number, None);
        assert_eq!(row.sop_class_uid.as_deref(), Some(CT_IMAGE_STORAGE));
        assert_eq!(row.transfer_syntax_uid.as_deref(), Some(EXPLICIT_VR_LE));
        assert!(row.storage_location.unwrap().ends_with("ct.dcm"));
        assert_eq!(repository.count().unwrap(), 1);
    }

    #[test]
    fn test_incomplete_hierarchy_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_instance(dir.path(), "good.dcm", true);
        let bad = write_instance(dir.path(), "bad.dcm", false);
        let missing = dir.path().join("missing.dcm");
        let repository = MemoryRepository::new();

        assert!(matches!(
            index_file(&repository, &bad),
            Err(RepositoryError::InvalidInstance(_))
        ));
        assert_eq!(index_files(&repository, &[good, bad, missing]), 1);
        assert_eq!(repository.count().unwrap(), 1);
    }
}
