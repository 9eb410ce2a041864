//! Greeting server. Binds `GREETNET_ADDR` (default `:8080`) and serves until interrupted.

use std::future::pending;
use std::process::ExitCode;

use greetnet::{runtime, GreeterServer, HelloGreeter, LogConfig, Logger, RpcError, ServerConfig};
use tracing::{error, info, warn, Level};

fn main() -> ExitCode {
    let level = match runtime::log_level(Level::INFO) {
        Ok(level) => level,
        Err(e) => {
            eprintln!("greetnet-server: {e}");
            return ExitCode::FAILURE;
        }
    };
    let (logger, _guard) = Logger::from_config(&LogConfig::new().with_level(level));

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(runtime::server_worker_threads())
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            logger.in_scope(|| error!(error = %e, "failed to start runtime"));
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(logger.clone())) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logger.in_scope(|| error!(error = %e, "server failed"));
            ExitCode::FAILURE
        }
    }
}

async fn run(logger: Logger) -> Result<(), RpcError> {
    let config = ServerConfig::new(runtime::server_address());
    let server = GreeterServer::new(HelloGreeter, config)
        .with_logger(logger.clone())
        .into_rpc_server()
        .await;

    let handle = server.bind().await?;
    server.serve_with_shutdown(handle, interrupted(logger)).await
}

async fn interrupted(logger: Logger) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => logger.in_scope(|| info!("interrupt received, shutting down")),
        Err(e) => {
            logger.in_scope(|| warn!(error = %e, "cannot listen for interrupts"));
            pending::<()>().await
        }
    }
}
