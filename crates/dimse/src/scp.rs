//! Service Class Provider (SCP) dispatch for inbound DIMSE requests

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, span, warn, Instrument, Level};

use crate::config::DimseConfig;
use crate::identifier::Identifier;
use crate::router::{DimseRequest, DimseRequestPayload, DimseResponse, Router, RouterReceiver};
use crate::types::{DimseStatus, Requestor, MODALITY_PERFORMED_PROCEDURE_STEP};
use crate::{DimseError, Result};

/// Refused: SOP Class not supported
pub const STATUS_SOP_CLASS_NOT_SUPPORTED: u16 = 0x0122;

/// One response produced by a C-FIND handler
#[derive(Debug, Clone, PartialEq)]
pub struct FindItem {
    pub status: DimseStatus,
    pub dataset: Option<Identifier>,
    /// Ends the operation. A non-terminal failure only concerns its own row.
    pub terminal: bool,
}

impl FindItem {
    /// A matching row
    pub fn pending(dataset: Identifier) -> Self {
        Self {
            status: DimseStatus::Pending,
            dataset: Some(dataset),
            terminal: false,
        }
    }

    /// A row that could not be answered; the stream continues
    pub fn row_failure(status: DimseStatus) -> Self {
        Self {
            status,
            dataset: None,
            terminal: false,
        }
    }

    /// A failure or cancellation that ends the stream
    pub fn terminal(status: DimseStatus) -> Self {
        Self {
            status,
            dataset: None,
            terminal: true,
        }
    }
}

/// Responses produced by a C-FIND handler, in emission order
pub type FindResponseIter = Box<dyn Iterator<Item = FindItem> + Send>;

/// Application callbacks invoked by the dispatcher.
///
/// Handlers are synchronous. C-FIND handlers run on the blocking pool and
/// yield their responses lazily so that a C-CANCEL arriving mid-stream is
/// observed before the next row is produced.
pub trait ServiceProvider: Send + Sync + 'static {
    /// Verification request
    fn echo(&self, requestor: &Requestor, timestamp: DateTime<Utc>) -> DimseStatus;

    /// Query request under the information model named by `model_uid`
    fn find(
        &self,
        requestor: &Requestor,
        timestamp: DateTime<Utc>,
        model_uid: &str,
        identifier: Identifier,
        cancel: CancellationToken,
    ) -> FindResponseIter;

    /// MPPS N-CREATE request
    fn create(
        &self,
        requestor: &Requestor,
        timestamp: DateTime<Utc>,
        affected_sop_instance_uid: Option<String>,
        attribute_list: Identifier,
    ) -> (DimseStatus, Option<Identifier>);

    /// MPPS N-SET request
    fn set(
        &self,
        requestor: &Requestor,
        timestamp: DateTime<Utc>,
        requested_sop_instance_uid: Option<String>,
        modification_list: Identifier,
    ) -> (DimseStatus, Option<Identifier>);
}

/// DIMSE Service Class Provider
pub struct DimseScp {
    config: Arc<DimseConfig>,
    provider: Arc<dyn ServiceProvider>,
    permits: Arc<Semaphore>,
}

impl DimseScp {
    /// Create a new SCP with the given configuration and service provider
    pub fn new(config: DimseConfig, provider: Arc<dyn ServiceProvider>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_associations.max(1) as usize));
        Self {
            config: Arc::new(config),
            provider,
            permits,
        }
    }

    pub fn config(&self) -> &DimseConfig {
        &self.config
    }

    /// Drain requests from the router until shutdown or until every sender is dropped
    pub async fn serve(&self, mut receiver: RouterReceiver, shutdown: CancellationToken) -> Result<()> {
        self.config.validate()?;

        info!(
            "Starting DIMSE SCP (AET: {}, max concurrent requests: {})",
            self.config.local_aet, self.config.max_associations
        );

        loop {
            let request = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("DIMSE SCP shutting down");
                    break;
                }
                next = receiver.next_request() => match next {
                    Ok(request) => request,
                    Err(_) => {
                        debug!("Request channel closed, stopping dispatcher");
                        break;
                    }
                },
            };

            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|_| DimseError::operation_failed("Dispatcher semaphore closed"))?;

            let config = Arc::clone(&self.config);
            let provider = Arc::clone(&self.provider);
            let dispatch_span =
                span!(Level::DEBUG, "dimse_request", id = %request.id, command = ?request.command);

            tokio::spawn(
                async move {
                    if let Err(e) = dispatch(config, provider, request).await {
                        warn!("Failed to deliver DIMSE response: {}", e);
                    }
                    drop(permit);
                }
                .instrument(dispatch_span),
            );
        }

        Ok(())
    }
}

async fn dispatch(
    config: Arc<DimseConfig>,
    provider: Arc<dyn ServiceProvider>,
    request: DimseRequest,
) -> Result<()> {
    let DimseRequest {
        id,
        requestor,
        timestamp,
        payload,
        cancel,
        response_tx,
        stream_tx,
        stream_demand,
        ..
    } = request;

    let (status, dataset) = match payload {
        DimseRequestPayload::Echo => {
            debug!("Processing C-ECHO request");
            if config.enable_echo {
                (provider.echo(&requestor, timestamp), None)
            } else {
                (DimseStatus::Failure(STATUS_SOP_CLASS_NOT_SUPPORTED), None)
            }
        }

        DimseRequestPayload::Find {
            affected_sop_class_uid,
            identifier,
        } => {
            debug!("Processing C-FIND request under {}", affected_sop_class_uid);
            if config.enable_find {
                let (Some(stream_tx), Some(stream_demand)) = (stream_tx, stream_demand) else {
                    return Err(DimseError::router("C-FIND request has no stream channel"));
                };
                return stream_find(
                    provider,
                    id,
                    requestor,
                    timestamp,
                    affected_sop_class_uid,
                    identifier,
                    cancel,
                    stream_tx,
                    stream_demand,
                )
                .await;
            }
            (DimseStatus::Failure(STATUS_SOP_CLASS_NOT_SUPPORTED), None)
        }

        DimseRequestPayload::NCreate {
            affected_sop_class_uid,
            affected_sop_instance_uid,
            attribute_list,
        } => {
            debug!("Processing N-CREATE request");
            if config.enable_mpps && affected_sop_class_uid == MODALITY_PERFORMED_PROCEDURE_STEP {
                provider.create(&requestor, timestamp, affected_sop_instance_uid, attribute_list)
            } else {
                (DimseStatus::Failure(STATUS_SOP_CLASS_NOT_SUPPORTED), None)
            }
        }

        DimseRequestPayload::NSet {
            requested_sop_class_uid,
            requested_sop_instance_uid,
            modification_list,
        } => {
            debug!("Processing N-SET request");
            if config.enable_mpps && requested_sop_class_uid == MODALITY_PERFORMED_PROCEDURE_STEP {
                provider.set(&requestor, timestamp, requested_sop_instance_uid, modification_list)
            } else {
                (DimseStatus::Failure(STATUS_SOP_CLASS_NOT_SUPPORTED), None)
            }
        }
    };

    let response = DimseResponse::new(id, status, dataset, true);
    if let Some(tx) = response_tx {
        tx.send(response)
            .map_err(|_| DimseError::router("Failed to send response"))
    } else if let Some(tx) = stream_tx {
        tx.send(response)
            .await
            .map_err(|_| DimseError::router("Failed to send stream response"))
    } else {
        Err(DimseError::router("Request has no response channel"))
    }
}

/// Run a C-FIND handler on the blocking pool and forward its responses.
///
/// Each row is pulled from the handler only once the requestor asks for the
/// next response, so a cancellation raised after response N is seen before
/// row N+1 is produced. A terminal item is flagged final; otherwise a closing
/// Success follows the last row.
#[allow(clippy::too_many_arguments)]
async fn stream_find(
    provider: Arc<dyn ServiceProvider>,
    request_id: uuid::Uuid,
    requestor: Requestor,
    timestamp: DateTime<Utc>,
    model_uid: String,
    identifier: Identifier,
    cancel: CancellationToken,
    stream_tx: mpsc::Sender<DimseResponse>,
    mut demand: mpsc::Receiver<()>,
) -> Result<()> {
    let worker = tokio::task::spawn_blocking(move || -> Result<()> {
        let mut responses =
            provider.find(&requestor, timestamp, &model_uid, identifier, cancel.clone());

        loop {
            if demand.blocking_recv().is_none() {
                // The requestor went away; stop producing rows
                cancel.cancel();
                return Err(DimseError::router("C-FIND response stream closed"));
            }

            let response = match responses.next() {
                Some(item) => {
                    DimseResponse::new(request_id, item.status, item.dataset, item.terminal)
                }
                None => DimseResponse::status(request_id, DimseStatus::Success),
            };
            let is_final = response.is_final;
            if stream_tx.blocking_send(response).is_err() {
                cancel.cancel();
                return Err(DimseError::router("C-FIND response stream closed"));
            }
            if is_final {
                return Ok(());
            }
        }
    });

    worker
        .await
        .map_err(|e| DimseError::operation_failed(format!("C-FIND worker failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::InMemoryRouter;
    use crate::types::{PATIENT_ROOT_FIND, VERIFICATION_SOP_CLASS};
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider {
        rows: usize,
        /// Answer the last row with a row-scoped failure
        failing_last: bool,
        produced: Arc<AtomicUsize>,
    }

    impl ServiceProvider for FixedProvider {
        fn echo(&self, _requestor: &Requestor, _timestamp: DateTime<Utc>) -> DimseStatus {
            DimseStatus::Success
        }

        fn find(
            &self,
            _requestor: &Requestor,
            _timestamp: DateTime<Utc>,
            model_uid: &str,
            _identifier: Identifier,
            cancel: CancellationToken,
        ) -> FindResponseIter {
            if model_uid == VERIFICATION_SOP_CLASS {
                return Box::new(std::iter::once(FindItem::terminal(DimseStatus::Failure(0xA900))));
            }
            let produced = Arc::clone(&self.produced);
            let rows = self.rows;
            let failing_last = self.failing_last;
            Box::new((0..rows).map_while(move |i| {
                if cancel.is_cancelled() {
                    return None;
                }
                produced.fetch_add(1, Ordering::SeqCst);
                if i + 1 == rows && failing_last {
                    return Some(FindItem::row_failure(DimseStatus::Failure(0xC000)));
                }
                let row = Identifier::new().with("PatientID", format!("P{}", i));
                Some(FindItem::pending(row))
            }))
        }

        fn create(
            &self,
            _requestor: &Requestor,
            _timestamp: DateTime<Utc>,
            affected_sop_instance_uid: Option<String>,
            _attribute_list: Identifier,
        ) -> (DimseStatus, Option<Identifier>) {
            match affected_sop_instance_uid {
                Some(_) => (DimseStatus::Success, Some(Identifier::new())),
                None => (DimseStatus::Failure(0x0106), None),
            }
        }

        fn set(
            &self,
            _requestor: &Requestor,
            _timestamp: DateTime<Utc>,
            _requested_sop_instance_uid: Option<String>,
            _modification_list: Identifier,
        ) -> (DimseStatus, Option<Identifier>) {
            (DimseStatus::Failure(0x0112), None)
        }
    }

    fn requestor() -> Requestor {
        Requestor::new("TEST_SCU", "127.0.0.1", 40001)
    }

    fn start(
        config: DimseConfig,
        rows: usize,
    ) -> (crate::router::RouterSender, CancellationToken, Arc<AtomicUsize>) {
        start_provider(config, rows, false)
    }

    fn start_provider(
        config: DimseConfig,
        rows: usize,
        failing_last: bool,
    ) -> (crate::router::RouterSender, CancellationToken, Arc<AtomicUsize>) {
        let produced = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(FixedProvider {
            rows,
            failing_last,
            produced: Arc::clone(&produced),
        });
        let (sender, receiver) = InMemoryRouter::new().split();
        let shutdown = CancellationToken::new();
        let scp = DimseScp::new(config, provider);
        let token = shutdown.clone();
        tokio::spawn(async move { scp.serve(receiver, token).await });
        (sender, shutdown, produced)
    }

    #[tokio::test]
    async fn test_echo_dispatch() {
        let (sender, shutdown, _) = start(DimseConfig::default(), 0);
        let response = sender.send_request(DimseRequest::echo(requestor())).await.unwrap();
        assert_eq!(response.status, DimseStatus::Success);
        assert!(response.is_final);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_disabled_echo_is_refused() {
        let config = DimseConfig {
            enable_echo: false,
            ..Default::default()
        };
        let (sender, shutdown, _) = start(config, 0);
        let response = sender.send_request(DimseRequest::echo(requestor())).await.unwrap();
        assert_eq!(response.status, DimseStatus::Failure(STATUS_SOP_CLASS_NOT_SUPPORTED));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_find_appends_final_success() {
        let (sender, shutdown, _) = start(DimseConfig::default(), 3);
        let request = DimseRequest::find(requestor(), PATIENT_ROOT_FIND, Identifier::new());
        let responses: Vec<_> = sender
            .send_streaming_request(request)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(responses.len(), 4);
        assert!(responses[..3].iter().all(|r| r.status.is_pending() && !r.is_final));
        assert_eq!(responses[3].status, DimseStatus::Success);
        assert!(responses[3].is_final);
        assert!(responses[3].dataset.is_none());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_find_terminal_failure_is_final() {
        let (sender, shutdown, _) = start(DimseConfig::default(), 3);
        let request = DimseRequest::find(requestor(), VERIFICATION_SOP_CLASS, Identifier::new());
        let responses: Vec<_> = sender
            .send_streaming_request(request)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status, DimseStatus::Failure(0xA900));
        assert!(responses[0].is_final);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_find_without_matches_sends_single_success() {
        let (sender, shutdown, _) = start(DimseConfig::default(), 0);
        let request = DimseRequest::find(requestor(), PATIENT_ROOT_FIND, Identifier::new());
        let responses: Vec<_> = sender
            .send_streaming_request(request)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status, DimseStatus::Success);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_cancel_before_dispatch_produces_no_rows() {
        let (sender, shutdown, produced) = start(DimseConfig::default(), 1000);
        let request = DimseRequest::find(requestor(), PATIENT_ROOT_FIND, Identifier::new());
        request.cancellation_token().cancel();

        let responses: Vec<_> = sender
            .send_streaming_request(request)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(produced.load(Ordering::SeqCst), 0);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status, DimseStatus::Success);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_cancel_after_first_response_stops_production() {
        let (sender, shutdown, produced) = start(DimseConfig::default(), 1000);
        let request = DimseRequest::find(requestor(), PATIENT_ROOT_FIND, Identifier::new());
        let token = request.cancellation_token();

        let mut stream = sender.send_streaming_request(request).await.unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first.status, DimseStatus::Pending);
        assert_eq!(produced.load(Ordering::SeqCst), 1);

        token.cancel();
        let rest: Vec<_> = stream.collect().await;
        assert_eq!(produced.load(Ordering::SeqCst), 1);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].status, DimseStatus::Success);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_trailing_row_failure_is_followed_by_success() {
        let (sender, shutdown, _) = start_provider(DimseConfig::default(), 2, true);
        let request = DimseRequest::find(requestor(), PATIENT_ROOT_FIND, Identifier::new());
        let responses: Vec<_> = sender
            .send_streaming_request(request)
            .await
            .unwrap()
            .collect()
            .await;

        let statuses: Vec<_> = responses.iter().map(|r| (r.status, r.is_final)).collect();
        assert_eq!(
            statuses,
            vec![
                (DimseStatus::Pending, false),
                (DimseStatus::Failure(0xC000), false),
                (DimseStatus::Success, true),
            ]
        );
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_mpps_dispatch_and_toggle() {
        let (sender, shutdown, _) = start(DimseConfig::default(), 0);
        let created = sender
            .send_request(DimseRequest::n_create(requestor(), Some("1.2.3".into()), Identifier::new()))
            .await
            .unwrap();
        assert_eq!(created.status, DimseStatus::Success);

        let set = sender
            .send_request(DimseRequest::n_set(requestor(), Some("9.9".into()), Identifier::new()))
            .await
            .unwrap();
        assert_eq!(set.status, DimseStatus::Failure(0x0112));
        shutdown.cancel();

        let config = DimseConfig {
            enable_mpps: false,
            ..Default::default()
        };
        let (sender, shutdown, _) = start(config, 0);
        let refused = sender
            .send_request(DimseRequest::n_create(requestor(), Some("1.2.3".into()), Identifier::new()))
            .await
            .unwrap();
        assert_eq!(refused.status, DimseStatus::Failure(STATUS_SOP_CLASS_NOT_SUPPORTED));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_serve_rejects_invalid_config() {
        let config = DimseConfig {
            local_aet: String::new(),
            ..Default::default()
        };
        let provider = Arc::new(FixedProvider {
            rows: 0,
            failing_last: false,
            produced: Arc::new(AtomicUsize::new(0)),
        });
        let (_sender, receiver) = InMemoryRouter::new().split();
        let scp = DimseScp::new(config, provider);
        let result = scp.serve(receiver, CancellationToken::new()).await;
        assert!(matches!(result, Err(DimseError::InvalidAeTitle(_))));
    }
}
