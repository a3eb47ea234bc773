//! DIMSE (DICOM Message Service Element) service layer
//!
//! This crate holds the transport-independent half of a DICOM Service Class
//! Provider: the decoded message model, DIMSE status codes, and an in-memory
//! router through which a transport collaborator submits already-decoded
//! requests and receives typed responses.
//!
//! # Features
//! - Verification (C-ECHO), Query (C-FIND) and MPPS (N-CREATE / N-SET) requests
//! - Streaming C-FIND responses with cooperative cancellation (C-CANCEL)
//! - Conversion between [`Identifier`] and `dicom-object` datasets

pub mod codec;
pub mod config;
pub mod error;
pub mod identifier;
pub mod router;
pub mod scp;
pub mod types;

// Re-export commonly used types
pub use config::DimseConfig;
pub use error::{DimseError, Result};
pub use identifier::{AttributeValue, Identifier};
pub use router::{
    DimseRequest, DimseRequestPayload, DimseResponse, InMemoryRouter, Router, RouterReceiver,
    RouterSender,
};
pub use scp::{DimseScp, FindItem, FindResponseIter, ServiceProvider};
pub use types::{DimseCommand, DimseStatus, QueryLevel, Requestor};

/// Default DICOM port (non-TLS)
pub const DEFAULT_DIMSE_PORT: u16 = 11112;
