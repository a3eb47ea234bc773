//! Conversion between [`Identifier`] and `dicom-object` datasets
//!
//! The transport collaborator decodes datasets off the wire into
//! `InMemDicomObject`s; these helpers translate them to and from the
//! keyword-addressed [`Identifier`] used by the service layer. Keywords are
//! resolved through the standard data dictionary.

use dicom_core::dictionary::{DataDictionary, TagRange, VirtualVr};
use dicom_core::value::DataSetSequence;
use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::StandardDataDictionary;
use dicom_object::InMemDicomObject;
use tracing::debug;

use crate::identifier::{AttributeValue, Identifier};
use crate::{DimseError, Result};

/// Resolve a keyword to its tag and VR
fn lookup(keyword: &str) -> Result<(Tag, VR)> {
    let dict = StandardDataDictionary;
    let entry = dict
        .by_name(keyword)
        .ok_or_else(|| DimseError::UnknownKeyword(keyword.to_string()))?;

    let tag = match entry.tag {
        TagRange::Single(tag) => tag,
        _ => {
            return Err(DimseError::codec(format!(
                "Attribute '{}' does not map to a single tag",
                keyword
            )))
        }
    };
    let vr = match entry.vr {
        VirtualVr::Exact(vr) => vr,
        _ => VR::UN,
    };
    Ok((tag, vr))
}

/// Build an in-memory DICOM dataset from an identifier
pub fn to_dicom(identifier: &Identifier) -> Result<InMemDicomObject> {
    let mut obj = InMemDicomObject::new_empty();

    for (keyword, value) in identifier.iter() {
        let (tag, vr) = lookup(keyword)?;
        match value {
            AttributeValue::Text(text) if text.is_empty() => {
                obj.put(DataElement::new(tag, vr, PrimitiveValue::Empty));
            }
            AttributeValue::Text(text) => {
                obj.put(DataElement::new(tag, vr, PrimitiveValue::from(text.as_str())));
            }
            AttributeValue::Sequence(items) => {
                let items = items.iter().map(to_dicom).collect::<Result<Vec<_>>>()?;
                obj.put(DataElement::new(tag, VR::SQ, DataSetSequence::from(items)));
            }
        }
    }

    Ok(obj)
}

/// Read an in-memory DICOM dataset into an identifier
///
/// Elements whose tag has no standard keyword (private tags) are skipped.
pub fn from_dicom(obj: &InMemDicomObject) -> Result<Identifier> {
    let dict = StandardDataDictionary;
    let mut identifier = Identifier::new();

    for elem in obj.iter() {
        let tag = elem.header().tag;
        let Some(entry) = dict.by_tag(tag) else {
            debug!("Skipping element {} without a standard keyword", tag);
            continue;
        };

        if elem.vr() == VR::SQ {
            let items = elem
                .items()
                .unwrap_or_default()
                .iter()
                .map(from_dicom)
                .collect::<Result<Vec<_>>>()?;
            identifier.insert(entry.alias, items);
        } else {
            let text = elem.to_str().map_err(|e| {
                DimseError::codec(format!("Cannot read {} as text: {}", entry.alias, e))
            })?;
            identifier.insert(entry.alias, text.trim_end_matches(['\0', ' ']).to_string());
        }
    }

    Ok(identifier)
}
