//! Hierarchical Query/Retrieve matching (C-FIND)

pub mod matcher;
pub mod translator;

pub use matcher::{FindResponses, QueryError, QueryMatcher};
pub use translator::{attributes_for_level, translate, InformationModel};
