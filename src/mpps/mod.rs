//! Modality Performed Procedure Step tracking (N-CREATE / N-SET)

pub mod registry;

pub use registry::{ProcedureStep, ProcedureStepError, ProcedureStepRegistry, ProcedureStepStatus};
