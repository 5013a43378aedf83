#![allow(dead_code)]

use std::time::Duration;

use watchrun::engine::{RetryPolicy, Routine, Trigger};
use watchrun::expression::{Expression, MatchScope};

/// Expression matching every path.
pub fn match_all() -> Expression {
    Expression::all_of([])
}

/// `["match", pattern, "basename"]`.
pub fn basename(pattern: &str) -> Expression {
    Expression::glob(pattern, MatchScope::Basename).expect("valid glob")
}

/// Builder for `Trigger` with test-friendly defaults: matches every path,
/// no initial run, and retry delays in the millisecond range.
pub struct TriggerBuilder {
    name: String,
    expression: Expression,
    interruptible: bool,
    persistent: bool,
    initial_run: bool,
    retry: RetryPolicy,
}

impl TriggerBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            expression: match_all(),
            interruptible: true,
            persistent: false,
            initial_run: false,
            retry: fast_retry(0),
        }
    }

    pub fn expression(mut self, expression: Expression) -> Self {
        self.expression = expression;
        self
    }

    pub fn interruptible(mut self, val: bool) -> Self {
        self.interruptible = val;
        self
    }

    pub fn persistent(mut self, val: bool) -> Self {
        self.persistent = val;
        if val {
            self.initial_run = true;
        }
        self
    }

    pub fn initial_run(mut self, val: bool) -> Self {
        self.initial_run = val;
        self
    }

    pub fn retries(mut self, max_retries: u32) -> Self {
        self.retry = fast_retry(max_retries);
        self
    }

    pub fn build(self, routine: impl Routine + 'static) -> Trigger {
        Trigger::new(self.name, self.expression, routine)
            .interruptible(self.interruptible)
            .persistent(self.persistent)
            .initial_run(self.initial_run)
            .retry(self.retry)
    }
}

/// Retry policy with 5ms..20ms backoff.
pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::retries(max_retries)
        .with_delays(Duration::from_millis(5), Duration::from_millis(20))
}
