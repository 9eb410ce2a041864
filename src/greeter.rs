//! Typed server and client for the [`Greeter`](crate::contract::Greeter) service.

use std::future::{pending, Future};
use std::sync::Arc;

use crate::client::{CloseHandle, RpcClient};
use crate::config::{CallOptions, ConnectOptions, ServerConfig};
use crate::connection::ConnectionState;
use crate::contract::{Greeter, HelloRequest, HelloResponse, SAY_HELLO};
use crate::errors::{CallError, ConnectError, RpcError};
use crate::logging::Logger;
use crate::schema;
use crate::server::{ListenHandle, RpcServer};

/// Wires a [`Greeter`] implementation into an [`RpcServer`].
pub struct GreeterServer<H: Greeter> {
    handler: Arc<H>,
    rpc_server: RpcServer,
}

impl<H: Greeter> GreeterServer<H> {
    pub fn new(handler: H, config: ServerConfig) -> Self {
        Self {
            handler: Arc::new(handler),
            rpc_server: RpcServer::new(config),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.rpc_server = self.rpc_server.with_logger(logger);
        self
    }

    /// Registers every method of the contract and hands back the server.
    pub async fn into_rpc_server(self) -> RpcServer {
        let handler = self.handler.clone();
        self.rpc_server
            .register_unary(SAY_HELLO.path, move |request: HelloRequest| {
                let handler = handler.clone();
                async move { handler.say_hello(request).await }
            })
            .await;
        self.rpc_server
    }

    /// Binds the configured address and serves until the listener fails.
    pub async fn serve(self) -> Result<(), RpcError> {
        self.serve_with_shutdown(pending()).await
    }

    /// Binds the configured address and serves until `shutdown` resolves.
    /// A bind failure is returned before anything is served.
    pub async fn serve_with_shutdown<S>(self, shutdown: S) -> Result<(), RpcError>
    where
        S: Future<Output = ()>,
    {
        let server = self.into_rpc_server().await;
        let handle: ListenHandle = server.bind().await?;
        server.serve_with_shutdown(handle, shutdown).await
    }
}

/// Typed client stub for the greeting service.
pub struct GreeterClient {
    inner: RpcClient,
}

impl GreeterClient {
    pub async fn connect(addr: &str, options: ConnectOptions) -> Result<Self, ConnectError> {
        let inner = RpcClient::connect(addr, options).await?;
        Ok(Self { inner })
    }

    pub fn new(inner: RpcClient) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> RpcClient {
        self.inner
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.inner.close_handle()
    }

    pub async fn say_hello(
        &mut self,
        request: HelloRequest,
        options: CallOptions,
    ) -> Result<HelloResponse, CallError> {
        let params = schema::encode(&request)?;
        let response_data = self.inner.call(SAY_HELLO.path, params, options).await?;
        // A response we cannot read is malformed whatever the codec says about it.
        schema::decode::<HelloResponse>(&response_data)
            .map_err(|e| CallError::MalformedMessage(e.to_string()))
    }

    pub async fn close(self) {
        self.inner.close().await
    }
}
