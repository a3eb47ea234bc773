//! Modality Worklist C-FIND over managed procedure steps
//!
//! A worklist query matches the `ScheduledStepAttributesSequence` items of
//! every registered procedure step on `ScheduledProcedureStepStartDate`.

use std::sync::Arc;

use dimse::{AttributeValue, Identifier};
use tracing::debug;

use crate::mpps::ProcedureStepRegistry;
use crate::qr::matcher::CancelCheck;
use crate::qr::QueryError;
use crate::storage::ValueMatch;

pub const SCHEDULED_STEP_SEQUENCE: &str = "ScheduledStepAttributesSequence";
const START_DATE: &str = "ScheduledProcedureStepStartDate";

#[derive(Debug)]
struct WorklistQuery {
    start_date: Option<ValueMatch>,
    /// Keywords requested inside the sequence item
    item_keys: Vec<String>,
    /// Top-level keywords requested alongside the sequence
    record_keys: Vec<String>,
}

impl WorklistQuery {
    fn build(identifier: &Identifier) -> Result<Self, QueryError> {
        let items = identifier
            .sequence(SCHEDULED_STEP_SEQUENCE)
            .ok_or(QueryError::MissingSequence(SCHEDULED_STEP_SEQUENCE))?;

        let first = items.first();
        let start_date = first
            .and_then(|item| item.get_str(START_DATE))
            .and_then(ValueMatch::from_request);

        let mut item_keys: Vec<String> = first
            .map(|item| item.keywords().map(str::to_string).collect())
            .unwrap_or_default();
        if !item_keys.iter().any(|k| k == START_DATE) {
            item_keys.push(START_DATE.to_string());
        }

        let record_keys = identifier
            .keywords()
            .filter(|k| *k != SCHEDULED_STEP_SEQUENCE)
            .map(str::to_string)
            .collect();

        Ok(Self {
            start_date,
            item_keys,
            record_keys,
        })
    }

    fn matches(&self, item: &Identifier) -> bool {
        self.start_date
            .as_ref()
            .map_or(true, |m| m.matches(item.get_str(START_DATE)))
    }

    fn respond(&self, record: &Identifier, item: &Identifier) -> Identifier {
        let mut response = Identifier::new();
        for keyword in &self.record_keys {
            let value = record.get(keyword).cloned().unwrap_or_else(|| "".into());
            response.insert(keyword.as_str(), value);
        }

        let mut scheduled = Identifier::new();
        for keyword in &self.item_keys {
            let value = item.get(keyword).cloned().unwrap_or_else(|| "".into());
            scheduled.insert(keyword.as_str(), value);
        }
        response.insert(SCHEDULED_STEP_SEQUENCE, AttributeValue::Sequence(vec![scheduled]));
        response
    }
}

enum State {
    Ready(Result<WorklistQuery, QueryError>),
    Streaming(std::vec::IntoIter<Identifier>),
    Done,
}

/// Lazily evaluated worklist response stream.
///
/// The registry is read on the first pull; cancellation is checked after
/// each remaining match is taken.
pub struct WorklistResponses {
    registry: Arc<ProcedureStepRegistry>,
    cancelled: CancelCheck,
    state: State,
}

impl Iterator for WorklistResponses {
    type Item = Result<Identifier, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match std::mem::replace(&mut self.state, State::Done) {
                State::Done => return None,
                State::Ready(Err(err)) => return Some(Err(err)),
                State::Ready(Ok(query)) => {
                    if (self.cancelled)() {
                        return Some(Err(QueryError::Cancelled));
                    }
                    debug!("Running worklist query: {:?}", query);
                    let matches: Vec<Identifier> = self
                        .registry
                        .snapshot()
                        .iter()
                        .flat_map(|step| {
                            let record = step.attributes();
                            record
                                .sequence(SCHEDULED_STEP_SEQUENCE)
                                .unwrap_or_default()
                                .iter()
                                .filter(|item| query.matches(item))
                                .map(|item| query.respond(record, item))
                                .collect::<Vec<_>>()
                        })
                        .collect();
                    self.state = State::Streaming(matches.into_iter());
                }
                State::Streaming(mut matches) => {
                    let response = matches.next()?;
                    if (self.cancelled)() {
                        return Some(Err(QueryError::Cancelled));
                    }
                    self.state = State::Streaming(matches);
                    return Some(Ok(response));
                }
            }
        }
    }
}

/// Answers worklist queries from the procedure step registry
#[derive(Clone)]
pub struct WorklistFinder {
    registry: Arc<ProcedureStepRegistry>,
}

impl WorklistFinder {
    pub fn new(registry: Arc<ProcedureStepRegistry>) -> Self {
        Self { registry }
    }

    pub fn find<F>(&self, identifier: &Identifier, cancelled: F) -> WorklistResponses
    where
        F: Fn() -> bool + Send + 'static,
    {
        WorklistResponses {
            registry: Arc::clone(&self.registry),
            cancelled: Box::new(cancelled),
            state: State::Ready(WorklistQuery::build(identifier)),
        }
    }
}
