use std::collections::BTreeMap;
use std::sync::RwLock;

use dimse::QueryLevel;

use crate::qr::translator::InformationModel;
use crate::storage::{
    InstanceRepository, InstanceRow, Predicate, RepositoryError, RepositoryResult,
};

/// Process-local instance store, used by tests and ephemeral deployments
#[derive(Debug, Default)]
pub struct MemoryRepository {
    rows: RwLock<BTreeMap<String, InstanceRow>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a repository pre-populated with `rows`
    pub fn with_rows(rows: impl IntoIterator<Item = InstanceRow>) -> RepositoryResult<Self> {
        let repository = Self::new();
        for row in rows {
            repository.store_instance(&row)?;
        }
        Ok(repository)
    }
}

impl InstanceRepository for MemoryRepository {
    fn create_schema(&self) -> RepositoryResult<()> {
        Ok(())
    }

    fn store_instance(&self, row: &InstanceRow) -> RepositoryResult<()> {
        row.validate()?;
        let key = row
            .key()
            .ok_or_else(|| RepositoryError::InvalidInstance("missing SOPInstanceUID".into()))?
            .to_string();

        let mut rows = self
            .rows
            .write()
            .map_err(|e| RepositoryError::database(format!("Failed to lock rows: {}", e)))?;
        rows.insert(key, row.clone());
        Ok(())
    }

    fn find_candidates(
        &self,
        _model: InformationModel,
        _level: QueryLevel,
        predicates: &[Predicate],
    ) -> RepositoryResult<std::vec::IntoIter<InstanceRow>> {
        let rows = self
            .rows
            .read()
            .map_err(|e| RepositoryError::database(format!("Failed to lock rows: {}", e)))?;

        let matched: Vec<InstanceRow> = rows
            .values()
            .filter(|row| predicates.iter().all(|p| p.matches(row)))
            .cloned()
            .collect();

        Ok(matched.into_iter())
    }

    fn count(&self) -> RepositoryResult<usize> {
        let rows = self
            .rows
            .read()
            .map_err(|e| RepositoryError::database(format!("Failed to lock rows: {}", e)))?;
        Ok(rows.len())
    }
}
