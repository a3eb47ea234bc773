use std::str::FromStr;
use std::sync::Arc;

use dimse::{Identifier, QueryLevel};
use tracing::{debug, error, warn};

use crate::qr::translator::{attributes_for_level, AttributeSpec, InformationModel};
use crate::storage::{InstanceRepository, InstanceRow, Predicate, RepositoryError, ValueMatch};

/// Errors surfaced by a find stream
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The identifier does not describe a valid query for the SOP class
    #[error("Identifier does not match SOP Class: {0}")]
    InvalidIdentifier(String),

    #[error("Query execution failed: {0}")]
    QueryExecution(#[from] RepositoryError),

    #[error("Query cancelled")]
    Cancelled,

    /// One row could not be turned into a response; the stream continues
    #[error("Unable to build response: {0}")]
    ResponseBuild(String),

    /// A mandatory sequence is absent from the identifier
    #[error("Identifier is missing {0}")]
    MissingSequence(&'static str),
}

impl QueryError {
    /// Whether the stream ends after this error
    pub fn is_terminal(&self) -> bool {
        !matches!(self, QueryError::ResponseBuild(_))
    }
}

/// Cancellation predicate polled before the repository call and after each row is taken
pub type CancelCheck = Box<dyn Fn() -> bool + Send>;

/// Validated query ready to run against the repository
#[derive(Debug)]
struct QueryPlan {
    model: InformationModel,
    level: QueryLevel,
    predicates: Vec<Predicate>,
    /// Attributes copied into each response
    projection: Vec<&'static AttributeSpec>,
    /// Unique keys at or above the query level; a row missing one is unusable
    level_keys: Vec<&'static AttributeSpec>,
    retrieve_ae_title: String,
}

impl QueryPlan {
    fn build(
        model_uid: &str,
        identifier: &Identifier,
        retrieve_ae_title: &str,
    ) -> Result<Self, QueryError> {
        let model = InformationModel::from_sop_class(model_uid).ok_or_else(|| {
            QueryError::InvalidIdentifier(format!(
                "'{}' is not a supported Query/Retrieve information model",
                model_uid
            ))
        })?;

        let raw_level = identifier.get_str("QueryRetrieveLevel").ok_or_else(|| {
            QueryError::InvalidIdentifier("QueryRetrieveLevel is missing".to_string())
        })?;
        let level = QueryLevel::from_str(raw_level).map_err(|_| {
            QueryError::InvalidIdentifier(format!("Invalid QueryRetrieveLevel '{}'", raw_level))
        })?;

        let attributes = attributes_for_level(model, level).ok_or_else(|| {
            QueryError::InvalidIdentifier(format!(
                "QueryRetrieveLevel {} is not valid for the {} model",
                level, model
            ))
        })?;

        let mut predicates = Vec::new();
        let mut projection = Vec::new();
        for spec in &attributes {
            let Some(value) = identifier.get(spec.keyword) else {
                continue;
            };
            projection.push(*spec);
            if let Some(matcher) = value.as_str().and_then(ValueMatch::from_request) {
                predicates.push(Predicate::new(spec.field, matcher));
            }
        }

        let level_keys = attributes.into_iter().filter(|spec| spec.is_unique()).collect();

        Ok(Self {
            model,
            level,
            predicates,
            projection,
            level_keys,
            retrieve_ae_title: retrieve_ae_title.to_string(),
        })
    }

    fn project(&self, row: &InstanceRow) -> Result<Identifier, QueryError> {
        if let Some(missing) = self
            .level_keys
            .iter()
            .find(|spec| row.field(spec.field).map_or(true, str::is_empty))
        {
            return Err(QueryError::ResponseBuild(format!(
                "instance {} has no {}",
                row.key().unwrap_or("<unknown>"),
                missing.keyword
            )));
        }

        let mut response = Identifier::new()
            .with("QueryRetrieveLevel", self.level.to_string())
            .with("RetrieveAETitle", self.retrieve_ae_title.as_str());
        for spec in &self.projection {
            response.insert(spec.keyword, row.field(spec.field).unwrap_or_default());
        }
        Ok(response)
    }
}

enum State {
    /// Nothing pulled yet; the repository has not been touched
    Ready(Result<QueryPlan, QueryError>),
    Streaming {
        plan: QueryPlan,
        rows: std::vec::IntoIter<InstanceRow>,
    },
    Done,
}

/// Lazily evaluated C-FIND result stream.
///
/// Yields `Ok(identifier)` for each pending match. Terminal errors
/// (`InvalidIdentifier`, `QueryExecution`, `Cancelled`) are yielded once and
/// end the stream; `ResponseBuild` errors are tagged to a single row.
/// Exhausting the candidates simply ends the iteration.
pub struct FindResponses {
    repository: Arc<dyn InstanceRepository>,
    cancelled: CancelCheck,
    state: State,
}

impl FindResponses {
    fn finish(&mut self, err: QueryError) -> Option<Result<Identifier, QueryError>> {
        self.state = State::Done;
        Some(Err(err))
    }
}

impl Iterator for FindResponses {
    type Item = Result<Identifier, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match std::mem::replace(&mut self.state, State::Done) {
                State::Done => return None,

                State::Ready(Err(err)) => return self.finish(err),

                State::Ready(Ok(plan)) => {
                    if (self.cancelled)() {
                        return self.finish(QueryError::Cancelled);
                    }
                    debug!(
                        "Running {} C-FIND at {} level with {} predicate(s): {:?}",
                        plan.model,
                        plan.level,
                        plan.predicates.len(),
                        plan.predicates
                    );
                    match self
                        .repository
                        .find_candidates(plan.model, plan.level, &plan.predicates)
                    {
                        Ok(rows) => self.state = State::Streaming { plan, rows },
                        Err(e) => {
                            error!("Repository query failed: {}", e);
                            return self.finish(QueryError::QueryExecution(e));
                        }
                    }
                }

                State::Streaming { plan, mut rows } => {
                    // Rows are already materialised; exhaustion wins over a late cancel
                    let row = rows.next()?;
                    if (self.cancelled)() {
                        debug!("C-FIND cancelled by requestor");
                        return self.finish(QueryError::Cancelled);
                    }
                    let response = plan.project(&row);
                    if let Err(ref e) = response {
                        warn!("Skipping C-FIND match: {}", e);
                    }
                    self.state = State::Streaming { plan, rows };
                    return Some(response);
                }
            }
        }
    }
}

/// Matches C-FIND identifiers against the instance repository
#[derive(Clone)]
pub struct QueryMatcher {
    repository: Arc<dyn InstanceRepository>,
    retrieve_ae_title: String,
}

impl QueryMatcher {
    pub fn new(repository: Arc<dyn InstanceRepository>, retrieve_ae_title: impl Into<String>) -> Self {
        Self {
            repository,
            retrieve_ae_title: retrieve_ae_title.into(),
        }
    }

    /// Validate `identifier` and return the response stream.
    ///
    /// Validation happens here; the repository is only queried once the
    /// first response is pulled.
    pub fn find<F>(&self, model_uid: &str, identifier: &Identifier, cancelled: F) -> FindResponses
    where
        F: Fn() -> bool + Send + 'static,
    {
        FindResponses {
            repository: Arc::clone(&self.repository),
            cancelled: Box::new(cancelled),
            state: State::Ready(QueryPlan::build(model_uid, identifier, &self.retrieve_ae_title)),
        }
    }
}
