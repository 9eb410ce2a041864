//! A minimal unary RPC greeting service over length-delimited MessagePack frames.
//!
//! A server exposes `Greeter.SayHello`, which turns a name into a greeting.
//! Clients open one connection and make sequential calls on it, each with an
//! optional deadline and cancellation token.
//!
//! ```no_run
//! use greetnet::{
//!     CallOptions, ConnectOptions, GreeterClient, GreeterServer, HelloGreeter, HelloRequest,
//!     ServerConfig,
//! };
//!
//! # async fn run() -> Result<(), greetnet::RpcError> {
//! let server = GreeterServer::new(HelloGreeter, ServerConfig::new("127.0.0.1:8080"))
//!     .into_rpc_server()
//!     .await;
//! let handle = server.bind().await?;
//! tokio::spawn(async move { server.serve(handle).await });
//!
//! let mut client = GreeterClient::connect("127.0.0.1:8080", ConnectOptions::default()).await?;
//! let response = client
//!     .say_hello(HelloRequest::new("Alice"), CallOptions::default())
//!     .await?;
//! assert_eq!(response.message, "Hello, Alice");
//! # Ok(())
//! # }
//! ```

pub mod calculator;
pub mod client;
pub mod config;
pub mod connection;
pub mod contract;
pub mod errors;
pub mod greeter;
mod handler;
pub mod logging;
pub mod request;
pub mod response;
pub mod schema;
pub mod server;
pub mod tls;

pub mod runtime {
    //! Environment knobs read by the binaries.
    use std::time::Duration;
    use std::{env, thread};

    use tracing::Level;

    use crate::config::DEFAULT_CONNECT_TIMEOUT;
    use crate::errors::LogInitError;
    use crate::logging::LogConfig;

    /// Environment variable that controls the number of server worker threads.
    pub const SERVER_THREADS_ENV: &str = "GREETNET_SERVER_THREADS";

    /// Address the server binds, or the client dials.
    pub const ADDR_ENV: &str = "GREETNET_ADDR";

    /// Name the client greets.
    pub const NAME_ENV: &str = "GREETNET_NAME";

    pub const LOG_LEVEL_ENV: &str = "GREETNET_LOG_LEVEL";

    pub const CONNECT_TIMEOUT_ENV: &str = "GREETNET_CONNECT_TIMEOUT_MS";

    pub const DEADLINE_ENV: &str = "GREETNET_DEADLINE_MS";

    pub const DEFAULT_SERVER_ADDR: &str = ":8080";

    pub const DEFAULT_CLIENT_ADDR: &str = "localhost:8080";

    pub const DEFAULT_NAME: &str = "Alice";

    /// Returns the worker thread count derived from [`SERVER_THREADS_ENV`],
    /// falling back to the number of available CPU threads.
    pub fn server_worker_threads() -> usize {
        threads_from_env(SERVER_THREADS_ENV).unwrap_or_else(default_worker_threads)
    }

    /// Parses an environment variable as a positive worker-thread count.
    pub fn threads_from_env(key: &str) -> Option<usize> {
        let raw = env::var(key).ok()?;
        parse_threads(&raw)
    }

    pub fn server_address() -> String {
        non_empty_var(ADDR_ENV).unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string())
    }

    pub fn client_address() -> String {
        non_empty_var(ADDR_ENV).unwrap_or_else(|| DEFAULT_CLIENT_ADDR.to_string())
    }

    /// The name to greet. An explicitly empty value is kept: greeting `""` is valid.
    pub fn greeting_name() -> String {
        env::var(NAME_ENV).unwrap_or_else(|_| DEFAULT_NAME.to_string())
    }

    /// Level from [`LOG_LEVEL_ENV`], or `default` when unset.
    pub fn log_level(default: Level) -> Result<Level, LogInitError> {
        match non_empty_var(LOG_LEVEL_ENV) {
            Some(raw) => LogConfig::parse_level(&raw),
            None => Ok(default),
        }
    }

    pub fn connect_timeout() -> Duration {
        non_empty_var(CONNECT_TIMEOUT_ENV)
            .and_then(|raw| parse_millis(&raw))
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Per-call deadline; unset means calls wait as long as the connection lives.
    pub fn call_deadline() -> Option<Duration> {
        non_empty_var(DEADLINE_ENV).and_then(|raw| parse_millis(&raw))
    }

    fn non_empty_var(key: &str) -> Option<String> {
        env::var(key).ok().filter(|value| !value.trim().is_empty())
    }

    fn default_worker_threads() -> usize {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    fn parse_threads(raw: &str) -> Option<usize> {
        let value = raw.trim().parse::<usize>().ok()?;
        (value > 0).then_some(value)
    }

    fn parse_millis(raw: &str) -> Option<Duration> {
        let value = raw.trim().parse::<u64>().ok()?;
        (value > 0).then(|| Duration::from_millis(value))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn parse_threads_rejects_invalid_values() {
            assert_eq!(parse_threads("0"), None);
            assert_eq!(parse_threads("-1"), None);
            assert_eq!(parse_threads("abc"), None);
        }

        #[test]
        fn parse_threads_accepts_positive_values() {
            assert_eq!(parse_threads("8"), Some(8));
            assert_eq!(parse_threads(" 4 "), Some(4));
        }

        #[test]
        fn parse_millis_accepts_positive_values() {
            assert_eq!(parse_millis("250"), Some(Duration::from_millis(250)));
            assert_eq!(parse_millis(" 1000 "), Some(Duration::from_secs(1)));
        }

        #[test]
        fn parse_millis_rejects_invalid_values() {
            assert_eq!(parse_millis("0"), None);
            assert_eq!(parse_millis("1.5"), None);
            assert_eq!(parse_millis("soon"), None);
        }

        #[test]
        fn unset_variables_fall_back_to_defaults() {
            assert_eq!(
                threads_from_env("GREETNET_TEST_VARIABLE_THAT_IS_NEVER_SET"),
                None
            );
            assert!(server_worker_threads() >= 1);
        }
    }
}

pub use calculator::{Arithmetic, Calculator};
pub use client::{CloseHandle, RpcClient};
pub use config::{CallOptions, ConnectOptions, ServerConfig};
pub use connection::ConnectionState;
pub use contract::{Greeter, HelloGreeter, HelloRequest, HelloResponse, GREETER, SAY_HELLO};
pub use errors::{
    BindError, CallError, CodecError, ConnectError, HandlerError, LogInitError, RpcError, TlsError,
};
pub use greeter::{GreeterClient, GreeterServer};
pub use logging::{LogConfig, LogGuard, LogOutput, Logger};
pub use response::Status;
pub use server::{ListenHandle, RpcServer};
pub use tls::{ClientTls, SelfSigned, ServerTls};

/// Re-exported so handler signatures can be written without a direct dependency.
pub use async_trait::async_trait;
