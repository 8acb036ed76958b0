//! Expression sandbox
//!
//! Maps embed small script expressions (`input.characterName`,
//! `body.results[0]`). They are evaluated in an isolated rhai engine with no
//! host access, hard operation and size limits, and a wall-clock deadline.
//! The exposed standard library is side-effect-free: time conversions, a
//! debug log that forwards to `tracing`, and string/JSON/math helpers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rhai::{Dynamic, Engine, Map, Scope};
use tracing::debug;

use crate::values::{Variable, Variables};
use crate::{Error, ErrorReport, Result};

/// Default evaluation deadline, overridable via `SUPERFACE_SANDBOX_TIMEOUT`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// Hard ceiling on abstract operations per evaluation.
const MAX_OPERATIONS: u64 = 100_000;
/// Maximum call stack depth inside an expression.
const MAX_CALL_LEVELS: usize = 32;
/// Maximum array length an expression may build.
const MAX_ARRAY_SIZE: usize = 10_000;
/// Maximum string length an expression may build.
const MAX_STRING_SIZE: usize = 1_000_000;

/// Isolated evaluator for expressions embedded in maps.
///
/// One sandbox serves one perform; the deadline state is reset per
/// evaluation and must not be shared across concurrent performs.
pub struct Sandbox {
    engine: Engine,
    timeout: Duration,
    deadline: Arc<Mutex<Instant>>,
}

impl Sandbox {
    /// Create a sandbox with the given per-evaluation timeout.
    pub fn new(timeout: Duration) -> Self {
        let mut engine = Engine::new();

        engine.set_max_operations(MAX_OPERATIONS);
        engine.set_max_call_levels(MAX_CALL_LEVELS);
        engine.set_max_array_size(MAX_ARRAY_SIZE);
        engine.set_max_string_size(MAX_STRING_SIZE);
        engine.set_strict_variables(false);

        let deadline = Arc::new(Mutex::new(Instant::now() + timeout));
        let progress_deadline = Arc::clone(&deadline);
        engine.on_progress(move |_operations| {
            if Instant::now() >= *progress_deadline.lock() {
                Some("evaluation timed out".into())
            } else {
                None
            }
        });

        register_stdlib(&mut engine);

        Self {
            engine,
            timeout,
            deadline,
        }
    }

    /// Evaluate an expression against the given variable environment.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Jessie`] carrying the expression source when the
    /// expression does not parse, exceeds its limits, or hits the deadline.
    pub fn eval(&self, expression: &str, variables: &Variables) -> Result<Variable> {
        let mut scope = Scope::new();
        scope.push_constant("undefined", Dynamic::UNIT);
        scope.push_constant("null", Dynamic::UNIT);
        for (name, value) in variables {
            scope.push_dynamic(name.clone(), variable_to_dynamic(value));
        }

        *self.deadline.lock() = Instant::now() + self.timeout;

        self.engine
            .eval_with_scope::<Dynamic>(&mut scope, expression)
            .map(|value| dynamic_to_variable(&value))
            .map_err(|e| Error::Jessie {
                report: ErrorReport::new("Expression evaluation failed").detail(e.to_string()),
                expression: expression.to_string(),
            })
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

/// Register the side-effect-free standard library.
fn register_stdlib(engine: &mut Engine) {
    // std.unstable.time
    engine.register_fn("iso_date_to_unix_timestamp", |iso: &str| -> i64 {
        chrono::DateTime::parse_from_rfc3339(iso)
            .map(|dt| dt.timestamp_millis())
            .unwrap_or(0)
    });
    engine.register_fn("unix_timestamp_to_iso_date", |timestamp: i64| -> String {
        chrono::DateTime::from_timestamp_millis(timestamp)
            .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
            .unwrap_or_default()
    });

    // std.unstable.debug
    engine.register_fn("debug_log", |message: &str| {
        debug!(target: "superface_sdk::sandbox", "{message}");
    });

    // JSON escape hatches
    engine.register_fn("to_json", |value: Dynamic| -> String {
        serde_json::Value::from(dynamic_to_variable(&value)).to_string()
    });
    engine.register_fn("from_json", |json: &str| -> Dynamic {
        serde_json::from_str::<serde_json::Value>(json)
            .map(|value| variable_to_dynamic(&Variable::from(value)))
            .unwrap_or(Dynamic::UNIT)
    });

    // Regex matching (compiled per call; expressions are tiny and bounded)
    engine.register_fn("regex_matches", |value: &str, pattern: &str| -> bool {
        regex::Regex::new(pattern).is_ok_and(|re| re.is_match(value))
    });

    // String helpers
    engine.register_fn("trim", |s: &str| -> String { s.trim().to_string() });
    engine.register_fn("lower", |s: &str| -> String { s.to_lowercase() });
    engine.register_fn("upper", |s: &str| -> String { s.to_uppercase() });
    engine.register_fn("starts_with", |s: &str, prefix: &str| -> bool {
        s.starts_with(prefix)
    });
    engine.register_fn("ends_with", |s: &str, suffix: &str| -> bool { s.ends_with(suffix) });
    engine.register_fn("split", |s: &str, separator: &str| -> Vec<Dynamic> {
        s.split(separator)
            .map(|part| Dynamic::from(part.to_string()))
            .collect()
    });

    // Math helpers
    engine.register_fn("abs", |x: i64| -> i64 { x.abs() });
    engine.register_fn("min", |a: i64, b: i64| -> i64 { a.min(b) });
    engine.register_fn("max", |a: i64, b: i64| -> i64 { a.max(b) });
}

/// Convert a [`Variable`] into a rhai [`Dynamic`].
pub fn variable_to_dynamic(variable: &Variable) -> Dynamic {
    match variable {
        Variable::None => Dynamic::UNIT,
        Variable::Bool(b) => Dynamic::from(*b),
        Variable::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else {
                Dynamic::from(n.as_f64().unwrap_or(0.0))
            }
        }
        Variable::String(s) => Dynamic::from(s.clone()),
        Variable::Bytes(bytes) => Dynamic::from_blob(bytes.to_vec()),
        Variable::List(items) => Dynamic::from(
            items
                .iter()
                .map(variable_to_dynamic)
                .collect::<Vec<Dynamic>>(),
        ),
        Variable::Map(map) => {
            let mut rhai_map = Map::new();
            for (key, value) in map {
                rhai_map.insert(key.as_str().into(), variable_to_dynamic(value));
            }
            Dynamic::from(rhai_map)
        }
    }
}

/// Convert a rhai [`Dynamic`] back into a [`Variable`].
pub fn dynamic_to_variable(value: &Dynamic) -> Variable {
    if value.is_unit() {
        Variable::None
    } else if let Some(b) = value.clone().try_cast::<bool>() {
        Variable::Bool(b)
    } else if let Some(i) = value.clone().try_cast::<i64>() {
        Variable::Number(i.into())
    } else if let Some(f) = value.clone().try_cast::<f64>() {
        serde_json::Number::from_f64(f)
            .map_or(Variable::None, Variable::Number)
    } else if let Some(s) = value.clone().try_cast::<String>() {
        Variable::String(s)
    } else if let Some(blob) = value.clone().try_cast::<rhai::Blob>() {
        Variable::Bytes(bytes::Bytes::from(blob))
    } else if let Some(array) = value.clone().try_cast::<rhai::Array>() {
        Variable::List(array.iter().map(dynamic_to_variable).collect())
    } else if let Some(map) = value.clone().try_cast::<Map>() {
        Variable::Map(
            map.iter()
                .map(|(key, item)| (key.to_string(), dynamic_to_variable(item)))
                .collect(),
        )
    } else {
        Variable::String(value.to_string())
    }
}
