//! Stateful backoff shapes
//!
//! Retry policies walk a backoff up on failure and back down on success, so
//! a provider that recovers gradually earns its original request rate back.
//! All values are milliseconds.

/// Default initial backoff in milliseconds.
pub const DEFAULT_INITIAL_MS: f64 = 500.0;
/// Default exponential base.
pub const DEFAULT_BASE: f64 = 2.0;

/// A bidirectional, stateful backoff.
#[derive(Debug, Clone)]
pub enum Backoff {
    /// Identity in both directions
    Constant(ConstantBackoff),
    /// Adds/subtracts a fixed step, clamped
    Linear(LinearBackoff),
    /// Multiplies/divides by a base, clamped
    Exponential(ExponentialBackoff),
}

impl Backoff {
    /// Current backoff in milliseconds.
    pub fn current_ms(&self) -> f64 {
        match self {
            Self::Constant(backoff) => backoff.value,
            Self::Linear(backoff) => backoff.current,
            Self::Exponential(backoff) => backoff.current,
        }
    }

    /// Step up (after a failure) and return the new value.
    pub fn up(&mut self) -> f64 {
        match self {
            Self::Constant(backoff) => backoff.value,
            Self::Linear(backoff) => backoff.step_up(),
            Self::Exponential(backoff) => backoff.step_up(),
        }
    }

    /// Step down (after a success) and return the new value.
    pub fn down(&mut self) -> f64 {
        match self {
            Self::Constant(backoff) => backoff.value,
            Self::Linear(backoff) => backoff.step_down(),
            Self::Exponential(backoff) => backoff.step_down(),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential(ExponentialBackoff::default())
    }
}

/// Backoff that never changes.
#[derive(Debug, Clone)]
pub struct ConstantBackoff {
    /// The fixed value in milliseconds
    pub value: f64,
}

impl ConstantBackoff {
    /// Create a constant backoff.
    pub fn new(value: f64) -> Self {
        Self { value }
    }
}

/// Backoff that moves by a fixed step, clamped to optional bounds.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    current: f64,
    step: f64,
    minimum: Option<f64>,
    maximum: Option<f64>,
}

impl LinearBackoff {
    /// Create a linear backoff starting at `start` moving by `step`.
    pub fn new(start: f64, step: f64, minimum: Option<f64>, maximum: Option<f64>) -> Self {
        Self {
            current: start,
            step,
            minimum,
            maximum,
        }
    }

    fn step_up(&mut self) -> f64 {
        self.current = clamp(self.current + self.step, self.minimum, self.maximum);
        self.current
    }

    fn step_down(&mut self) -> f64 {
        self.current = clamp(self.current - self.step, self.minimum, self.maximum);
        self.current
    }
}

/// Backoff that multiplies/divides by a base, clamped to optional bounds.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: f64,
    base: f64,
    minimum: Option<f64>,
    maximum: Option<f64>,
}

impl ExponentialBackoff {
    /// Create an exponential backoff starting at `start` with the given base.
    pub fn new(start: f64, base: f64) -> Self {
        Self {
            current: start,
            base,
            minimum: None,
            maximum: None,
        }
    }

    /// Attach clamp bounds.
    #[must_use]
    pub fn with_bounds(mut self, minimum: Option<f64>, maximum: Option<f64>) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }

    fn step_up(&mut self) -> f64 {
        self.current = clamp(self.current * self.base, self.minimum, self.maximum);
        self.current
    }

    fn step_down(&mut self) -> f64 {
        self.current = clamp(self.current / self.base, self.minimum, self.maximum);
        self.current
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_MS, DEFAULT_BASE)
    }
}

fn clamp(value: f64, minimum: Option<f64>, maximum: Option<f64>) -> f64 {
    let value = match minimum {
        Some(minimum) => value.max(minimum),
        None => value,
    };
    match maximum {
        Some(maximum) => value.min(maximum),
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_walks_up_and_down() {
        let mut backoff = Backoff::Exponential(ExponentialBackoff::new(1.0, 2.0));

        for _ in 0..7 {
            backoff.up();
        }
        assert!((backoff.current_ms() - 128.0).abs() < f64::EPSILON);

        for _ in 0..4 {
            backoff.down();
        }
        assert!((backoff.current_ms() - 8.0).abs() < f64::EPSILON);
    }

    #[test]
    fn exponential_up_then_down_returns_to_start_within_bounds() {
        let mut backoff = Backoff::Exponential(ExponentialBackoff::default());
        let start = backoff.current_ms();

        backoff.up();
        backoff.down();

        assert!((backoff.current_ms() - start).abs() < f64::EPSILON);
    }

    #[test]
    fn exponential_clamps_at_bounds() {
        let mut backoff =
            Backoff::Exponential(ExponentialBackoff::new(100.0, 2.0).with_bounds(Some(50.0), Some(150.0)));

        backoff.up();
        assert!((backoff.current_ms() - 150.0).abs() < f64::EPSILON);

        backoff.down();
        backoff.down();
        assert!((backoff.current_ms() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn linear_moves_by_step() {
        let mut backoff = Backoff::Linear(LinearBackoff::new(100.0, 50.0, Some(0.0), None));

        assert!((backoff.up() - 150.0).abs() < f64::EPSILON);
        assert!((backoff.down() - 100.0).abs() < f64::EPSILON);
        backoff.down();
        backoff.down();
        backoff.down();
        assert!((backoff.current_ms() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn constant_ignores_both_directions() {
        let mut backoff = Backoff::Constant(ConstantBackoff::new(250.0));

        backoff.up();
        backoff.down();

        assert!((backoff.current_ms() - 250.0).abs() < f64::EPSILON);
    }
}
