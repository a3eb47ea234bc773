//! Common types for DIMSE operations

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Verification SOP Class
pub const VERIFICATION_SOP_CLASS: &str = "1.2.840.10008.1.1";
/// Patient Root Query/Retrieve Information Model - FIND
pub const PATIENT_ROOT_FIND: &str = "1.2.840.10008.5.1.4.1.2.1.1";
/// Study Root Query/Retrieve Information Model - FIND
pub const STUDY_ROOT_FIND: &str = "1.2.840.10008.5.1.4.1.2.2.1";
/// Modality Worklist Information Model - FIND
pub const MODALITY_WORKLIST_FIND: &str = "1.2.840.10008.5.1.4.31";
/// Modality Performed Procedure Step SOP Class
pub const MODALITY_PERFORMED_PROCEDURE_STEP: &str = "1.2.840.10008.3.1.2.3.3";

/// DIMSE command types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DimseCommand {
    /// C-ECHO command
    Echo,
    /// C-FIND command
    Find,
    /// N-CREATE command
    NCreate,
    /// N-SET command
    NSet,
}

/// DICOM query/retrieve levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QueryLevel {
    /// Patient level
    Patient,
    /// Study level
    Study,
    /// Series level
    Series,
    /// Image level
    Image,
}

/// DIMSE operation status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimseStatus {
    /// Operation completed successfully
    Success,
    /// Operation is pending (more responses to follow)
    Pending,
    /// Operation cancelled by user
    Cancel,
    /// Operation failed with error
    Failure(u16), // DICOM status code
    /// Warning occurred during operation
    Warning(u16), // DICOM status code
}

/// The peer that issued a request, as reported by the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requestor {
    /// Calling AE title
    pub ae_title: String,
    /// Peer address
    pub address: String,
    /// Peer port
    pub port: u16,
}

impl DimseStatus {
    /// The 16-bit status code carried in the response command set
    pub fn code(&self) -> u16 {
        match self {
            DimseStatus::Success => 0x0000,
            DimseStatus::Pending => 0xFF00,
            DimseStatus::Cancel => 0xFE00,
            DimseStatus::Failure(code) | DimseStatus::Warning(code) => *code,
        }
    }

    /// Classify a raw status code (PS3.7 Annex C)
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0000 => DimseStatus::Success,
            0xFF00 | 0xFF01 => DimseStatus::Pending,
            0xFE00 => DimseStatus::Cancel,
            0x0001 | 0x0107 | 0x0116 | 0xB000..=0xBFFF => DimseStatus::Warning(code),
            _ => DimseStatus::Failure(code),
        }
    }

    /// Whether more responses follow this one
    pub fn is_pending(&self) -> bool {
        matches!(self, DimseStatus::Pending)
    }
}

impl Requestor {
    pub fn new(ae_title: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            ae_title: ae_title.into(),
            address: address.into(),
            port,
        }
    }

    /// Build a requestor from a peer socket address
    pub fn from_socket(ae_title: impl Into<String>, addr: SocketAddr) -> Self {
        Self::new(ae_title, addr.ip().to_string(), addr.port())
    }
}

impl std::fmt::Display for Requestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.ae_title, self.address, self.port)
    }
}

impl std::fmt::Display for QueryLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryLevel::Patient => write!(f, "PATIENT"),
            QueryLevel::Study => write!(f, "STUDY"),
            QueryLevel::Series => write!(f, "SERIES"),
            QueryLevel::Image => write!(f, "IMAGE"),
        }
    }
}

impl std::str::FromStr for QueryLevel {
    type Err = crate::error::DimseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PATIENT" => Ok(QueryLevel::Patient),
            "STUDY" => Ok(QueryLevel::Study),
            "SERIES" => Ok(QueryLevel::Series),
            "IMAGE" => Ok(QueryLevel::Image),
            _ => Err(crate::error::DimseError::operation_failed(format!(
                "Invalid query level: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for DimseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DimseStatus::Success => write!(f, "Success (0x0000)"),
            DimseStatus::Pending => write!(f, "Pending (0xFF00)"),
            DimseStatus::Cancel => write!(f, "Cancel (0xFE00)"),
            DimseStatus::Failure(code) => write!(f, "Failure (0x{:04X})", code),
            DimseStatus::Warning(code) => write!(f, "Warning (0x{:04X})", code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_level_parsing() {
        assert_eq!("PATIENT".parse::<QueryLevel>().unwrap(), QueryLevel::Patient);
        assert_eq!("study".parse::<QueryLevel>().unwrap(), QueryLevel::Study);
        assert_eq!(" IMAGE ".parse::<QueryLevel>().unwrap(), QueryLevel::Image);
        assert!("INVALID".parse::<QueryLevel>().is_err());
    }

    #[test]
    fn test_query_level_ordering_follows_hierarchy() {
        assert!(QueryLevel::Patient < QueryLevel::Study);
        assert!(QueryLevel::Study < QueryLevel::Series);
        assert!(QueryLevel::Series < QueryLevel::Image);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(DimseStatus::Success.code(), 0x0000);
        assert_eq!(DimseStatus::Pending.code(), 0xFF00);
        assert_eq!(DimseStatus::Cancel.code(), 0xFE00);
        assert_eq!(DimseStatus::Failure(0xA900).code(), 0xA900);
    }

    #[test]
    fn test_status_from_code() {
        assert_eq!(DimseStatus::from_code(0x0000), DimseStatus::Success);
        assert_eq!(DimseStatus::from_code(0xFF01), DimseStatus::Pending);
        assert_eq!(DimseStatus::from_code(0xFE00), DimseStatus::Cancel);
        assert_eq!(DimseStatus::from_code(0xB000), DimseStatus::Warning(0xB000));
        assert_eq!(DimseStatus::from_code(0x0112), DimseStatus::Failure(0x0112));
    }

    #[test]
    fn test_requestor_display() {
        let requestor = Requestor::new("MODALITY", "10.0.0.5", 104);
        assert_eq!(requestor.to_string(), "MODALITY@10.0.0.5:104");
    }
}
