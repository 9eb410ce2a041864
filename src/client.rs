use std::future::pending;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{CallOptions, ConnectOptions};
use crate::connection::{self, ConnectionState, FramedStream};
use crate::errors::{CallError, ConnectError};
use crate::logging::Logger;
use crate::request::RequestFrame;
use crate::response::ResponseFrame;

/// One connection to a server, carrying sequential unary calls.
///
/// `call` takes `&mut self`, so a connection never has more than one call in
/// flight and responses come back in request order. The socket is released
/// when the client is closed or dropped.
pub struct RpcClient {
    framed: Option<FramedStream>,
    peer: String,
    next_id: u64,
    closer: CancellationToken,
    logger: Logger,
}

/// Closes an [`RpcClient`] from another task. A call in flight on that client
/// completes with [`CallError::ConnectionClosed`].
///
/// The socket itself belongs to the client: an idle client releases it on its
/// next `call`, on [`RpcClient::close`] or when dropped, whichever comes first.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    token: CancellationToken,
}

impl CloseHandle {
    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl RpcClient {
    pub async fn connect(addr: &str, options: ConnectOptions) -> Result<Self, ConnectError> {
        let logger = options.logger.clone();
        let framed = logger
            .instrument(async {
                debug!(
                    addr,
                    state = ?ConnectionState::Connecting,
                    tls = !options.is_insecure(),
                    "connecting"
                );
                match connection::establish(addr, &options).await {
                    Ok(framed) => {
                        debug!(addr, state = ?ConnectionState::Open, "connected");
                        Ok(framed)
                    }
                    Err(e) => {
                        warn!(addr, state = ?ConnectionState::Closed, error = %e, "connect failed");
                        Err(e)
                    }
                }
            })
            .await?;

        Ok(Self {
            framed: Some(framed),
            peer: addr.to_string(),
            next_id: 1,
            closer: CancellationToken::new(),
            logger,
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> ConnectionState {
        if self.framed.is_none() || self.closer.is_cancelled() {
            ConnectionState::Closed
        } else {
            ConnectionState::Open
        }
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            token: self.closer.clone(),
        }
    }

    /// Sends one request for `method` and waits for its response.
    pub async fn call(
        &mut self,
        method: &str,
        payload: Vec<u8>,
        options: CallOptions,
    ) -> Result<Vec<u8>, CallError> {
        let logger = self.logger.clone();
        logger.instrument(self.call_inner(method, payload, options)).await
    }

    async fn call_inner(
        &mut self,
        method: &str,
        payload: Vec<u8>,
        options: CallOptions,
    ) -> Result<Vec<u8>, CallError> {
        if options.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(CallError::Canceled);
        }
        if self.closer.is_cancelled() {
            self.framed = None;
        }
        let framed = self.framed.as_mut().ok_or(CallError::ConnectionClosed)?;

        let id = self.next_id;
        self.next_id += 1;
        let request = RequestFrame::new(id, method, payload).encode()?;
        debug!(peer = %self.peer, id, method, "calling");

        let mut sent = false;
        let outcome = tokio::select! {
            result = exchange(framed, id, Bytes::from(request), &mut sent) => result,
            _ = self.closer.cancelled() => Err(CallError::ConnectionClosed),
            deadline = deadline_elapsed(options.deadline) => Err(CallError::DeadlineExceeded { deadline }),
            _ = canceled(options.cancel) => Err(CallError::Canceled),
        };

        match &outcome {
            Ok(_) => debug!(peer = %self.peer, id, "call completed"),
            Err(CallError::ConnectionClosed) => {
                debug!(peer = %self.peer, id, state = ?ConnectionState::Closed, "connection closed during call");
                self.framed = None;
            }
            Err(e @ (CallError::DeadlineExceeded { .. } | CallError::Canceled)) if !sent => {
                // A partially written frame would desynchronise every later call.
                warn!(peer = %self.peer, id, error = %e, "call abandoned mid-write, closing connection");
                self.framed = None;
            }
            Err(e @ (CallError::DeadlineExceeded { .. } | CallError::Canceled)) => {
                debug!(peer = %self.peer, id, error = %e, "call abandoned, late response will be discarded");
            }
            Err(e) => debug!(peer = %self.peer, id, error = %e, "call failed"),
        }
        outcome
    }

    /// Shuts the connection down. Dropping the client has the same effect
    /// without waiting for buffered bytes to be flushed.
    pub async fn close(mut self) {
        self.closer.cancel();
        if let Some(mut framed) = self.framed.take() {
            let result = SinkExt::<Bytes>::close(&mut framed).await;
            self.logger.in_scope(|| match result {
                Ok(()) => debug!(peer = %self.peer, state = ?ConnectionState::Closed, "connection closed"),
                Err(e) => debug!(peer = %self.peer, error = %e, "error while closing connection"),
            });
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.closer.cancel();
    }
}

async fn exchange(
    framed: &mut FramedStream,
    id: u64,
    request: Bytes,
    sent: &mut bool,
) -> Result<Vec<u8>, CallError> {
    if let Err(e) = framed.send(request).await {
        debug!(id, error = %e, "failed to send request");
        return Err(CallError::ConnectionClosed);
    }
    *sent = true;

    loop {
        let frame = match framed.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                debug!(id, error = %e, "failed to read response");
                return Err(CallError::ConnectionClosed);
            }
            None => return Err(CallError::ConnectionClosed),
        };

        let response = ResponseFrame::decode(&frame)?;
        // Id 0 answers a request envelope the server could not read.
        if response.id() != id && response.id() != 0 {
            if response.id() < id {
                debug!(id = response.id(), "discarding response of an abandoned call");
                continue;
            }
            return Err(CallError::MalformedMessage(format!(
                "response id {} does not match request id {}",
                response.id(),
                id
            )));
        }

        return match response.into_result() {
            Ok(payload) => Ok(payload.to_vec()),
            Err(e) => Err(CallError::from_status(e.status, e.detail)),
        };
    }
}

async fn deadline_elapsed(deadline: Option<Duration>) -> Duration {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep(deadline).await;
            deadline
        }
        None => pending().await,
    }
}

async fn canceled(token: Option<CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => pending().await,
    }
}
