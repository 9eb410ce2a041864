//! Runs a few additions and subtractions, logging each operation and its result.
//! The calculator's own per-operation records are debug level and only show
//! with `GREETNET_LOG_LEVEL=debug`.

use std::process::ExitCode;

use greetnet::{runtime, Arithmetic, Calculator, LogConfig, Logger};
use tracing::{info, Level};

const PAIRS: [(i64, i64); 3] = [(5, 3), (10, 7), (15, 8)];

fn main() -> ExitCode {
    let level = match runtime::log_level(Level::INFO) {
        Ok(level) => level,
        Err(e) => {
            eprintln!("calculator: {e}");
            return ExitCode::FAILURE;
        }
    };
    let (logger, _guard) = Logger::from_config(&LogConfig::new().with_level(level));
    let calculator = Calculator::new(logger.clone());
    logger.in_scope(|| info!("Starting calculator application"));

    for (a, b) in PAIRS {
        let sum = calculator.add(a, b);
        logger.in_scope(|| info!(a, b, result = sum, "Addition performed"));

        let difference = calculator.subtract(a, b);
        logger.in_scope(|| info!(a, b, result = difference, "Subtraction performed"));
    }

    logger.in_scope(|| info!("Calculator application finished"));
    ExitCode::SUCCESS
}
