//! Integer arithmetic that logs every operation it performs.

use tracing::debug;

use crate::logging::Logger;

/// Total integer operations. Overflow wraps.
pub trait Arithmetic {
    fn add(&self, a: i64, b: i64) -> i64;

    fn subtract(&self, a: i64, b: i64) -> i64;
}

/// [`Arithmetic`] emitting one debug record per call with fields `a`, `b` and `result`.
#[derive(Debug, Clone, Default)]
pub struct Calculator {
    logger: Logger,
}

impl Calculator {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

impl Arithmetic for Calculator {
    fn add(&self, a: i64, b: i64) -> i64 {
        let result = a.wrapping_add(b);
        self.logger
            .in_scope(|| debug!(a, b, result, "Add operation performed"));
        result
    }

    fn subtract(&self, a: i64, b: i64) -> i64 {
        let result = a.wrapping_sub(b);
        self.logger
            .in_scope(|| debug!(a, b, result, "Subtract operation performed"));
        result
    }
}
