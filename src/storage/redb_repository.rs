use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dimse::QueryLevel;

use crate::qr::translator::InformationModel;
use crate::storage::database_manager::{DatabaseManager, DatabaseOperation};
use crate::storage::{
    InstanceRepository, InstanceRow, Predicate, RepositoryError, RepositoryResult,
};

/// Instance rows as JSON, keyed by SOP Instance UID
const INSTANCES: TableDefinition<&str, &str> = TableDefinition::new("instances");

/// Persistent instance store backed by redb
pub struct RedbRepository {
    path: PathBuf,
    db: Arc<Database>,
}

impl RedbRepository {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> RepositoryResult<Self> {
        let db = DatabaseManager::global().get_or_create_database(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            db,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl InstanceRepository for RedbRepository {
    fn create_schema(&self) -> RepositoryResult<()> {
        DatabaseOperation::write(&self.db, |txn| {
            txn.open_table(INSTANCES).map_err(|e| {
                RepositoryError::database(format!("Failed to open instances table: {}", e))
            })?;
            Ok(())
        })?;
        tracing::debug!("Instance schema ready in {}", self.path.display());
        Ok(())
    }

    fn store_instance(&self, row: &InstanceRow) -> RepositoryResult<()> {
        row.validate()?;
        let key = row
            .key()
            .ok_or_else(|| RepositoryError::InvalidInstance("missing SOPInstanceUID".into()))?;
        let json = serde_json::to_string(row)?;

        DatabaseOperation::write(&self.db, |txn| {
            let mut table = txn.open_table(INSTANCES).map_err(|e| {
                RepositoryError::database(format!("Failed to open instances table: {}", e))
            })?;
            table
                .insert(key, json.as_str())
                .map_err(|e| RepositoryError::database(format!("Failed to insert instance: {}", e)))?;
            Ok(())
        })?;

        tracing::debug!("📇 Indexed instance: sop_instance_uid={}", key);
        Ok(())
    }

    fn find_candidates(
        &self,
        _model: InformationModel,
        _level: QueryLevel,
        predicates: &[Predicate],
    ) -> RepositoryResult<std::vec::IntoIter<InstanceRow>> {
        let rows = DatabaseOperation::read(&self.db, |txn| {
            let table = txn.open_table(INSTANCES).map_err(|e| {
                RepositoryError::database(format!("Failed to open instances table: {}", e))
            })?;

            let iter = table
                .iter()
                .map_err(|e| RepositoryError::database(format!("Failed to iterate instances: {}", e)))?;

            let mut matched = Vec::new();
            for entry in iter {
                let (_key, value) = entry
                    .map_err(|e| RepositoryError::database(format!("Failed to read entry: {}", e)))?;
                let row: InstanceRow = serde_json::from_str(value.value())?;
                if predicates.iter().all(|p| p.matches(&row)) {
                    matched.push(row);
                }
            }
            Ok(matched)
        })?;

        Ok(rows.into_iter())
    }

    fn count(&self) -> RepositoryResult<usize> {
        DatabaseOperation::read(&self.db, |txn| {
            let table = txn.open_table(INSTANCES).map_err(|e| {
                RepositoryError::database(format!("Failed to open instances table: {}", e))
            })?;
            let len = table
                .len()
                .map_err(|e| RepositoryError::database(format!("Failed to count instances: {}", e)))?;
            Ok(len as usize)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ValueMatch;
    use tempfile::TempDir;

    fn row(patient: &str, name: &str, sop: &str) -> InstanceRow {
        InstanceRow {
            patient_id: Some(patient.into()),
            patient_name: Some(name.into()),
            study_instance_uid: Some(format!("{}.1", patient)),
            series_instance_uid: Some(format!("{}.1.1", patient)),
            sop_instance_uid: Some(sop.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_store_and_query() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("instances.redb");

        let repo = RedbRepository::open(&db_path).unwrap();
        repo.create_schema().unwrap();
        repo.store_instance(&row("P1", "Doe^Jane", "1.1")).unwrap();
        repo.store_instance(&row("P2", "Roe^Rick", "2.1")).unwrap();
        assert_eq!(repo.count().unwrap(), 2);

        let predicates = [Predicate::new(
            "patient_name",
            ValueMatch::Wildcard("Doe*".into()),
        )];
        let found: Vec<_> = repo
            .find_candidates(InformationModel::PatientRoot, QueryLevel::Patient, &predicates)
            .unwrap()
            .collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].patient_id.as_deref(), Some("P1"));

        DatabaseManager::global().close_database(&db_path).unwrap();
    }

    #[test]
    fn test_rows_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("instances.redb");

        {
            let repo = RedbRepository::open(&db_path).unwrap();
            repo.create_schema().unwrap();
            repo.store_instance(&row("P1", "Doe^Jane", "1.1")).unwrap();
        }
        DatabaseManager::global().close_database(&db_path).unwrap();

        let repo = RedbRepository::open(&db_path).unwrap();
        repo.create_schema().unwrap();
        assert_eq!(repo.count().unwrap(), 1);

        DatabaseManager::global().close_database(&db_path).unwrap();
    }
}
