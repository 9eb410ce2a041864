use std::collections::HashMap;
use std::future::{pending, Future};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::ServerConfig;
use crate::connection::{self, ConnectionState, IoStream};
use crate::errors::{BindError, HandlerError, RpcError};
use crate::handler::{HandlerFn, HandlerFuture};
use crate::logging::Logger;
use crate::request::RequestFrame;
use crate::response::{DispatchError, ResponseFrame, Status};
use crate::schema::{self, Message};
use crate::tls::ServerTls;

type HandlerMap = Arc<RwLock<HashMap<String, HandlerFn>>>;

/// A bound listener, ready to be served.
#[derive(Debug)]
pub struct ListenHandle {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ListenHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[derive(Clone)]
pub struct RpcServer {
    handlers: HandlerMap,
    config: ServerConfig,
    logger: Logger,
}

impl RpcServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            config,
            logger: Logger::disabled(),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Registers a raw handler working on encoded payloads.
    pub async fn register<F, Fut>(&self, method: &str, handler: F)
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>, DispatchError>> + Send + 'static,
    {
        let mut handlers = self.handlers.write().await;
        handlers.insert(
            method.to_string(),
            Box::new(move |payload: Bytes| Box::pin(handler(payload)) as HandlerFuture),
        );
    }

    /// Registers a handler for schema-described messages. Payloads that do not
    /// decode as `Req` are answered with `MalformedMessage` or `SchemaMismatch`.
    pub async fn register_unary<Req, Resp, F, Fut>(&self, method: &str, handler: F)
    where
        Req: Message + Send + 'static,
        Resp: Message + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, HandlerError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register(method, move |payload: Bytes| {
            let handler = handler.clone();
            async move {
                let request: Req = schema::decode(&payload)?;
                let response = handler(request).await?;
                let encoded = schema::encode(&response)?;
                Ok::<_, DispatchError>(encoded)
            }
        })
        .await;
    }

    pub async fn bind(&self) -> Result<ListenHandle, BindError> {
        let requested = self.config.bind_address.as_str();
        let addr = normalize_bind_address(requested);

        let candidates: Vec<SocketAddr> = tokio::net::lookup_host(addr.as_str())
            .await
            .map_err(|e| BindError::InvalidAddress {
                addr: requested.to_string(),
                reason: e.to_string(),
            })?
            .collect();
        if candidates.is_empty() {
            return Err(BindError::InvalidAddress {
                addr: requested.to_string(),
                reason: "resolved to no addresses".to_string(),
            });
        }

        let listener = TcpListener::bind(candidates.as_slice())
            .await
            .map_err(|e| BindError::from_io(requested, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| BindError::from_io(requested, e))?;

        self.logger.in_scope(|| {
            info!(addr = %local_addr, tls = self.config.tls.is_some(), "listening");
        });
        Ok(ListenHandle {
            listener,
            local_addr,
        })
    }

    /// Accepts connections until the listener fails.
    pub async fn serve(&self, handle: ListenHandle) -> Result<(), RpcError> {
        self.serve_with_shutdown(handle, pending()).await
    }

    /// Accepts connections until `shutdown` resolves, then closes every open
    /// connection once its in-flight request has been answered.
    pub async fn serve_with_shutdown<S>(
        &self,
        handle: ListenHandle,
        shutdown: S,
    ) -> Result<(), RpcError>
    where
        S: Future<Output = ()>,
    {
        self.logger.instrument(self.accept_loop(handle, shutdown)).await
    }

    async fn accept_loop<S>(&self, handle: ListenHandle, shutdown: S) -> Result<(), RpcError>
    where
        S: Future<Output = ()>,
    {
        let stop = CancellationToken::new();
        let acceptor = self.config.tls.as_ref().map(ServerTls::acceptor);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(addr = %handle.local_addr, "shutdown requested");
                    break Ok(());
                }
                accepted = handle.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        let worker = ConnectionWorker {
                            handlers: self.handlers.clone(),
                            peer,
                            max_frame_length: self.config.max_frame_length,
                            stop: stop.child_token(),
                        };
                        connections.spawn(self.logger.instrument(worker.run(socket, acceptor.clone())));
                    }
                    Err(e) => match classify_accept_error(&e) {
                        AcceptFailure::Transient => {
                            warn!(error = %e, "accept failed, continuing");
                        }
                        AcceptFailure::Exhausted => {
                            warn!(error = %e, backoff = ?ACCEPT_BACKOFF, "out of resources, pausing accepts");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                        AcceptFailure::Fatal => {
                            error!(error = %e, "listener failed");
                            break Err(RpcError::Io(e));
                        }
                    },
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "connection worker failed");
                    }
                }
            }
        };

        stop.cancel();
        while connections.join_next().await.is_some() {}
        info!(addr = %handle.local_addr, "server stopped");
        result
    }
}

/// `":8080"` means every interface, as with most listeners.
fn normalize_bind_address(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

/// Pause before retrying `accept` after the process ran out of descriptors or memory.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

const ENFILE: i32 = 23;
const EMFILE: i32 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptFailure {
    /// The peer gave up mid-handshake; the listener is fine.
    Transient,
    /// Descriptor or memory exhaustion; clears once connections close.
    Exhausted,
    Fatal,
}

fn classify_accept_error(err: &io::Error) -> AcceptFailure {
    if matches!(err.raw_os_error(), Some(EMFILE | ENFILE))
        || err.kind() == io::ErrorKind::OutOfMemory
    {
        return AcceptFailure::Exhausted;
    }
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => AcceptFailure::Transient,
        _ => AcceptFailure::Fatal,
    }
}

/// Serves one accepted connection: one request at a time, in order.
struct ConnectionWorker {
    handlers: HandlerMap,
    peer: SocketAddr,
    max_frame_length: usize,
    stop: CancellationToken,
}

impl ConnectionWorker {
    async fn run(self, socket: TcpStream, tls: Option<TlsAcceptor>) {
        if let Err(e) = socket.set_nodelay(true) {
            debug!(peer = %self.peer, error = %e, "could not disable Nagle");
        }

        let stream: Box<dyn IoStream> = match tls {
            Some(acceptor) => {
                let handshake = tokio::select! {
                    _ = self.stop.cancelled() => return,
                    handshake = acceptor.accept(socket) => handshake,
                };
                match handshake {
                    Ok(stream) => Box::new(stream),
                    Err(e) => {
                        warn!(peer = %self.peer, error = %e, "TLS handshake failed");
                        return;
                    }
                }
            }
            None => Box::new(socket),
        };
        let mut framed = connection::framed(stream, self.max_frame_length);
        debug!(peer = %self.peer, state = ?ConnectionState::Open, "connection accepted");

        loop {
            let next = tokio::select! {
                _ = self.stop.cancelled() => break,
                next = framed.next() => next,
            };
            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    debug!(peer = %self.peer, error = %e, "read failed");
                    break;
                }
                None => break,
            };
            trace!(peer = %self.peer, len = frame.len(), "request frame read");

            let response = dispatch(&self.handlers, &frame).await;
            let encoded = match response.encode() {
                Ok(encoded) => encoded,
                Err(e) => {
                    error!(peer = %self.peer, id = response.id(), error = %e, "could not encode response");
                    break;
                }
            };
            if let Err(e) = framed.send(Bytes::from(encoded)).await {
                debug!(peer = %self.peer, error = %e, "write failed");
                break;
            }
            trace!(peer = %self.peer, id = response.id(), "response frame written");
        }

        debug!(peer = %self.peer, state = ?ConnectionState::Closed, "connection closed");
    }
}

/// Produces the single response owed for one request frame.
async fn dispatch(handlers: &RwLock<HashMap<String, HandlerFn>>, frame: &[u8]) -> ResponseFrame {
    let request = match RequestFrame::decode(frame) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "undecodable request envelope");
            return ResponseFrame::failure(0, Status::MalformedMessage, e.to_string());
        }
    };
    let (id, method, payload) = request.into_parts();

    let pending = {
        let handlers = handlers.read().await;
        handlers.get(&method).map(|handler| handler(payload))
    };

    match pending {
        Some(call) => {
            let result = call.await;
            if let Err(e) = &result {
                debug!(id, method = %method, status = ?e.status, detail = %e.detail, "call rejected");
            }
            ResponseFrame::from_result(id, result)
        }
        None => {
            debug!(id, method = %method, "unknown method");
            ResponseFrame::failure(id, Status::MethodNotFound, method)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{HelloRequest, HelloResponse};

    async fn greeting_handlers() -> HandlerMap {
        let server = RpcServer::new(ServerConfig::new("127.0.0.1:0"));
        server
            .register_unary("Greeter.SayHello", |request: HelloRequest| async move {
                Ok::<_, HandlerError>(HelloResponse {
                    message: format!("Hello, {}", request.name),
                })
            })
            .await;
        server.handlers
    }

    fn request(id: u64, method: &str, payload: Vec<u8>) -> Vec<u8> {
        RequestFrame::new(id, method, payload).encode().unwrap()
    }

    #[test]
    fn host_less_address_binds_everywhere() {
        assert_eq!(normalize_bind_address(":8080"), "0.0.0.0:8080");
        assert_eq!(normalize_bind_address("127.0.0.1:0"), "127.0.0.1:0");
    }

    #[test]
    fn accept_errors_are_classified() {
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::Interrupted,
        ] {
            assert_eq!(classify_accept_error(&io::Error::from(kind)), AcceptFailure::Transient);
        }

        for err in [
            io::Error::from_raw_os_error(EMFILE),
            io::Error::from_raw_os_error(ENFILE),
            io::Error::from(io::ErrorKind::OutOfMemory),
        ] {
            assert_eq!(classify_accept_error(&err), AcceptFailure::Exhausted, "{err}");
        }

        assert_eq!(
            classify_accept_error(&io::Error::from(io::ErrorKind::InvalidInput)),
            AcceptFailure::Fatal
        );
    }

    #[tokio::test]
    async fn dispatch_routes_to_registered_method() {
        let handlers = greeting_handlers().await;
        let payload = schema::encode(&HelloRequest::new("Alice")).unwrap();

        let response = dispatch(&handlers, &request(3, "Greeter.SayHello", payload)).await;

        assert_eq!(response.id(), 3);
        assert_eq!(response.status(), Status::Ok);
        let decoded: HelloResponse = schema::decode(response.payload()).unwrap();
        assert_eq!(decoded.message, "Hello, Alice");
    }

    #[tokio::test]
    async fn dispatch_reports_unknown_method() {
        let handlers = greeting_handlers().await;
        let response = dispatch(&handlers, &request(4, "Greeter.SayGoodbye", vec![])).await;
        assert_eq!(response.id(), 4);
        assert_eq!(response.status(), Status::MethodNotFound);
        assert_eq!(response.error(), Some("Greeter.SayGoodbye"));
    }

    #[tokio::test]
    async fn dispatch_reports_bad_envelope_with_id_zero() {
        let handlers = greeting_handlers().await;
        let response = dispatch(&handlers, b"\xc1\xc1\xc1").await;
        assert_eq!(response.id(), 0);
        assert_eq!(response.status(), Status::MalformedMessage);
    }

    #[tokio::test]
    async fn dispatch_reports_payload_problems() {
        let handlers = greeting_handlers().await;

        let garbage = dispatch(&handlers, &request(5, "Greeter.SayHello", vec![0x92, 0x01])).await;
        assert_eq!(garbage.status(), Status::MalformedMessage);

        let wrong_shape = schema::encode(&HelloResponse {
            message: "not a request".into(),
        })
        .unwrap();
        let mismatch = dispatch(&handlers, &request(6, "Greeter.SayHello", wrong_shape)).await;
        assert_eq!(mismatch.status(), Status::SchemaMismatch);
    }

    #[tokio::test]
    async fn handler_errors_travel_in_the_frame() {
        let server = RpcServer::new(ServerConfig::new("127.0.0.1:0"));
        server
            .register_unary("Greeter.SayHello", |_: HelloRequest| async move {
                Err::<HelloResponse, _>(HandlerError::new("no greetings today"))
            })
            .await;

        let payload = schema::encode(&HelloRequest::new("Bob")).unwrap();
        let response = dispatch(&server.handlers, &request(9, "Greeter.SayHello", payload)).await;
        assert_eq!(response.status(), Status::HandlerError);
        assert_eq!(response.error(), Some("no greetings today"));
    }
}
