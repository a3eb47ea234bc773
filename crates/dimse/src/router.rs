//! Internal router decoupling the transport layer from DIMSE service dispatch
//!
//! The transport collaborator decodes an inbound message, wraps it in a
//! [`DimseRequest`] and submits it through a [`RouterSender`]. The
//! [`crate::scp::DimseScp`] drains the matching [`RouterReceiver`] and answers
//! either on a oneshot channel (single response) or an mpsc channel (C-FIND).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::identifier::Identifier;
use crate::types::{DimseCommand, DimseStatus, Requestor, MODALITY_PERFORMED_PROCEDURE_STEP};
use crate::{DimseError, Result};

/// Request sent to the DIMSE router
#[derive(Debug)]
pub struct DimseRequest {
    /// Unique request ID for correlation
    pub id: Uuid,

    /// The DIMSE command to execute
    pub command: DimseCommand,

    /// Peer that issued the request
    pub requestor: Requestor,

    /// When the transport layer received the request
    pub timestamp: DateTime<Utc>,

    /// Request payload
    pub payload: DimseRequestPayload,

    /// Signalled when the peer sends C-CANCEL
    pub cancel: CancellationToken,

    /// Response channel (for single responses)
    pub response_tx: Option<oneshot::Sender<DimseResponse>>,

    /// Stream response channel (for streaming responses like C-FIND)
    pub stream_tx: Option<mpsc::Sender<DimseResponse>>,

    /// One signal per response the requestor is ready to take. A C-FIND
    /// handler produces its next row only after receiving a signal.
    pub stream_demand: Option<mpsc::Receiver<()>>,
}

/// Response from the DIMSE router
#[derive(Debug, Clone)]
pub struct DimseResponse {
    /// Request ID this response correlates to
    pub request_id: Uuid,

    /// Status carried in the response command set
    pub status: DimseStatus,

    /// Identifier (C-FIND) or attribute list (N-CREATE / N-SET)
    pub dataset: Option<Identifier>,

    /// Whether this is the final response in a sequence
    pub is_final: bool,
}

/// Payload types for DIMSE requests
#[derive(Debug, Clone)]
pub enum DimseRequestPayload {
    /// C-ECHO request (no additional data needed)
    Echo,

    /// C-FIND request under an information model
    Find {
        affected_sop_class_uid: String,
        identifier: Identifier,
    },

    /// N-CREATE request
    NCreate {
        affected_sop_class_uid: String,
        affected_sop_instance_uid: Option<String>,
        attribute_list: Identifier,
    },

    /// N-SET request
    NSet {
        requested_sop_class_uid: String,
        requested_sop_instance_uid: Option<String>,
        modification_list: Identifier,
    },
}

/// Router trait for handing DIMSE requests between layers
#[async_trait]
pub trait Router: Send + Sync {
    /// Send a request and wait for a single response
    async fn send_request(&self, request: DimseRequest) -> Result<DimseResponse>;

    /// Send a request and get a stream of responses (for C-FIND)
    async fn send_streaming_request(
        &self,
        request: DimseRequest,
    ) -> Result<BoxStream<'static, DimseResponse>>;

    /// Get the next available request (for SCP implementations)
    async fn next_request(&mut self) -> Result<DimseRequest>;
}

/// In-memory router implementation using tokio channels
pub struct InMemoryRouter {
    request_tx: mpsc::Sender<DimseRequest>,
    request_rx: mpsc::Receiver<DimseRequest>,
}

impl InMemoryRouter {
    /// Create a new in-memory router with default buffer sizes
    pub fn new() -> Self {
        Self::with_buffer_size(1000)
    }

    /// Create a new in-memory router with specified buffer size
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let (request_tx, request_rx) = mpsc::channel(buffer_size);
        Self {
            request_tx,
            request_rx,
        }
    }

    /// Split the router into sender and receiver halves
    pub fn split(self) -> (RouterSender, RouterReceiver) {
        (
            RouterSender {
                request_tx: self.request_tx,
            },
            RouterReceiver {
                request_rx: self.request_rx,
            },
        )
    }
}

impl Default for InMemoryRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Sender half of the router (used by the transport layer)
#[derive(Clone)]
pub struct RouterSender {
    request_tx: mpsc::Sender<DimseRequest>,
}

/// Receiver half of the router (used by the SCP dispatcher)
pub struct RouterReceiver {
    request_rx: mpsc::Receiver<DimseRequest>,
}

#[async_trait]
impl Router for RouterSender {
    async fn send_request(&self, mut request: DimseRequest) -> Result<DimseResponse> {
        let (response_tx, response_rx) = oneshot::channel();
        request.response_tx = Some(response_tx);

        self.request_tx
            .send(request)
            .await
            .map_err(|_| DimseError::router("Failed to send request"))?;

        response_rx
            .await
            .map_err(|_| DimseError::router("Failed to receive response"))
    }

    async fn send_streaming_request(
        &self,
        mut request: DimseRequest,
    ) -> Result<BoxStream<'static, DimseResponse>> {
        let (stream_tx, mut stream_rx) = mpsc::channel(1);
        let (demand_tx, demand_rx) = mpsc::channel(1);
        request.stream_tx = Some(stream_tx);
        request.stream_demand = Some(demand_rx);

        self.request_tx
            .send(request)
            .await
            .map_err(|_| DimseError::router("Failed to send streaming request"))?;

        // Demand is only signalled when the consumer polls, so nothing is
        // produced ahead of what has been taken
        let stream = async_stream::stream! {
            loop {
                let _ = demand_tx.try_send(());
                let Some(response) = stream_rx.recv().await else {
                    break;
                };
                let is_final = response.is_final;
                yield response;
                if is_final {
                    break;
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn next_request(&mut self) -> Result<DimseRequest> {
        Err(DimseError::operation_failed("RouterSender cannot receive requests"))
    }
}

#[async_trait]
impl Router for RouterReceiver {
    async fn send_request(&self, _request: DimseRequest) -> Result<DimseResponse> {
        Err(DimseError::operation_failed("RouterReceiver cannot send requests"))
    }

    async fn send_streaming_request(
        &self,
        _request: DimseRequest,
    ) -> Result<BoxStream<'static, DimseResponse>> {
        Err(DimseError::operation_failed("RouterReceiver cannot send requests"))
    }

    async fn next_request(&mut self) -> Result<DimseRequest> {
        self.request_rx
            .recv()
            .await
            .ok_or_else(|| DimseError::router("Request channel closed"))
    }
}

impl DimseRequest {
    fn new(command: DimseCommand, requestor: Requestor, payload: DimseRequestPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            command,
            requestor,
            timestamp: Utc::now(),
            payload,
            cancel: CancellationToken::new(),
            response_tx: None,
            stream_tx: None,
            stream_demand: None,
        }
    }

    /// Create a new C-ECHO request
    pub fn echo(requestor: Requestor) -> Self {
        Self::new(DimseCommand::Echo, requestor, DimseRequestPayload::Echo)
    }

    /// Create a new C-FIND request
    pub fn find(
        requestor: Requestor,
        affected_sop_class_uid: impl Into<String>,
        identifier: Identifier,
    ) -> Self {
        Self::new(
            DimseCommand::Find,
            requestor,
            DimseRequestPayload::Find {
                affected_sop_class_uid: affected_sop_class_uid.into(),
                identifier,
            },
        )
    }

    /// Create a new MPPS N-CREATE request
    pub fn n_create(
        requestor: Requestor,
        affected_sop_instance_uid: Option<String>,
        attribute_list: Identifier,
    ) -> Self {
        Self::new(
            DimseCommand::NCreate,
            requestor,
            DimseRequestPayload::NCreate {
                affected_sop_class_uid: MODALITY_PERFORMED_PROCEDURE_STEP.to_string(),
                affected_sop_instance_uid,
                attribute_list,
            },
        )
    }

    /// Create a new MPPS N-SET request
    pub fn n_set(
        requestor: Requestor,
        requested_sop_instance_uid: Option<String>,
        modification_list: Identifier,
    ) -> Self {
        Self::new(
            DimseCommand::NSet,
            requestor,
            DimseRequestPayload::NSet {
                requested_sop_class_uid: MODALITY_PERFORMED_PROCEDURE_STEP.to_string(),
                requested_sop_instance_uid,
                modification_list,
            },
        )
    }

    /// Handle the transport layer keeps to signal C-CANCEL for this request
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl DimseResponse {
    /// Create a response
    pub fn new(
        request_id: Uuid,
        status: DimseStatus,
        dataset: Option<Identifier>,
        is_final: bool,
    ) -> Self {
        Self {
            request_id,
            status,
            dataset,
            is_final,
        }
    }

    /// Create a final response carrying only a status
    pub fn status(request_id: Uuid, status: DimseStatus) -> Self {
        Self::new(request_id, status, None, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn requestor() -> Requestor {
        Requestor::new("TEST_AET", "127.0.0.1", 40000)
    }

    #[tokio::test]
    async fn test_router_echo() {
        let router = InMemoryRouter::new();
        let (sender, receiver) = router.split();

        // Spawn a task to handle the request
        let handle = tokio::spawn(async move {
            let mut receiver = receiver;
            let request = receiver.next_request().await.unwrap();
            assert_eq!(request.command, DimseCommand::Echo);
            let response = DimseResponse::status(request.id, DimseStatus::Success);

            if let Some(tx) = request.response_tx {
                tx.send(response).unwrap();
            }
        });

        let request = DimseRequest::echo(requestor());
        let response = sender.send_request(request).await.unwrap();
        assert_eq!(response.status, DimseStatus::Success);

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_streaming_request_stops_at_final() {
        let (sender, mut receiver) = InMemoryRouter::new().split();

        let handle = tokio::spawn(async move {
            let request = receiver.next_request().await.unwrap();
            let tx = request.stream_tx.unwrap();
            tx.send(DimseResponse::new(request.id, DimseStatus::Pending, Some(Identifier::new()), false))
                .await
                .unwrap();
            tx.send(DimseResponse::status(request.id, DimseStatus::Success))
                .await
                .unwrap();
            // Anything after the final response is not surfaced
            let _ = tx
                .send(DimseResponse::status(request.id, DimseStatus::Cancel))
                .await;
        });

        let request = DimseRequest::find(requestor(), crate::types::PATIENT_ROOT_FIND, Identifier::new());
        let responses: Vec<_> = sender
            .send_streaming_request(request)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].status, DimseStatus::Pending);
        assert_eq!(responses[1].status, DimseStatus::Success);
        handle.await.unwrap();
    }

    #[test]
    fn test_request_builders() {
        let echo_req = DimseRequest::echo(requestor());
        assert_eq!(echo_req.command, DimseCommand::Echo);

        let create = DimseRequest::n_create(requestor(), Some("1.2.3".into()), Identifier::new());
        assert_eq!(create.command, DimseCommand::NCreate);
        match create.payload {
            DimseRequestPayload::NCreate {
                affected_sop_class_uid,
                affected_sop_instance_uid,
                ..
            } => {
                assert_eq!(affected_sop_class_uid, MODALITY_PERFORMED_PROCEDURE_STEP);
                assert_eq!(affected_sop_instance_uid.as_deref(), Some("1.2.3"));
            }
            _ => panic!("Expected N-CREATE payload"),
        }

        let set = DimseRequest::n_set(requestor(), None, Identifier::new());
        assert_eq!(set.command, DimseCommand::NSet);
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let request = DimseRequest::echo(requestor());
        let token = request.cancellation_token();
        token.cancel();
        assert!(request.cancel.is_cancelled());
    }
}
