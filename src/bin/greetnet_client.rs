//! Greeting client. Dials `GREETNET_ADDR` (default `localhost:8080`) and greets
//! `GREETNET_NAME` (default `Alice`).

use std::process::ExitCode;

use greetnet::{
    runtime, CallOptions, ConnectOptions, GreeterClient, HelloRequest, LogConfig, Logger,
    RpcError,
};
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> ExitCode {
    let level = match runtime::log_level(Level::INFO) {
        Ok(level) => level,
        Err(e) => {
            eprintln!("greetnet-client: {e}");
            return ExitCode::FAILURE;
        }
    };
    let (logger, _guard) = Logger::from_config(&LogConfig::new().with_level(level));

    match greet(&logger).await {
        Ok(message) => {
            logger.in_scope(|| info!("Greeting: {message}"));
            ExitCode::SUCCESS
        }
        Err(e) => {
            logger.in_scope(|| error!(error = %e, "could not greet"));
            ExitCode::FAILURE
        }
    }
}

async fn greet(logger: &Logger) -> Result<String, RpcError> {
    let addr = runtime::client_address();
    let options = ConnectOptions::new()
        .with_timeout(runtime::connect_timeout())
        .with_logger(logger.clone());
    let mut client = GreeterClient::connect(&addr, options).await?;

    let mut call = CallOptions::new();
    if let Some(deadline) = runtime::call_deadline() {
        call = call.with_deadline(deadline);
    }
    let response = client
        .say_hello(HelloRequest::new(runtime::greeting_name()), call)
        .await?;

    client.close().await;
    Ok(response.message)
}
