//! Report predicates.
//!
//! A report's `evaluation` expression decides whether fetched data is worth
//! delivering. Expressions are CEL programs with a single variable, `report`,
//! holding the fetch result as a map of card title to a list of row maps.
//! Two sentinels bypass compilation: `[*]` (always deliver) and `[!*]`
//! (never deliver).

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use cel_interpreter::{Context, Program, Value};
use lru::LruCache;
use parking_lot::Mutex;
use report_render::{FetchResult, Row, RowValue};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{DEFAULT_EVALUATOR_CACHE, EvaluatorConfig};
use crate::{Error, Result};

pub const ALWAYS: &str = "[*]";
pub const NEVER: &str = "[!*]";

/// Compiles, caches and runs report predicates.
pub struct Evaluator {
    cache: Mutex<LruCache<String, Arc<Program>>>,
    timeout: Duration,
}

impl Evaluator {
    pub fn new(config: &EvaluatorConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_size)
            .or(NonZeroUsize::new(DEFAULT_EVALUATOR_CACHE))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            timeout: config.timeout,
        }
    }

    /// Number of compiled programs currently cached.
    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }

    /// Evaluate `expr` against `data`.
    pub async fn evaluate(
        &self,
        cancel: &CancellationToken,
        data: &FetchResult,
        expr: &str,
    ) -> Result<bool> {
        match expr {
            ALWAYS => return Ok(true),
            NEVER => return Ok(false),
            _ => {}
        }

        let program = self.program(expr)?;
        let report = fetch_result_to_cel(data);

        let task = tokio::task::spawn_blocking(move || run(&program, report));
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Canceled),
            outcome = tokio::time::timeout(self.timeout, task) => outcome,
        };

        match outcome {
            Err(_) => Err(Error::Timeout(format!(
                "evaluation exceeded {}",
                humantime::format_duration(self.timeout)
            ))),
            Ok(Err(join_err)) if join_err.is_panic() => {
                Err(Error::Evaluation(format!("evaluation of {expr:?} panicked")))
            }
            Ok(Err(join_err)) => Err(Error::Evaluation(join_err.to_string())),
            Ok(Ok(value)) => match value? {
                Value::Bool(b) => Ok(b),
                other => Err(Error::UnexpectedResultType(cel_type_name(&other).to_string())),
            },
        }
    }

    /// Fetch the compiled program for `expr`, compiling it on a miss.
    fn program(&self, expr: &str) -> Result<Arc<Program>> {
        if let Some(program) = self.cache.lock().get(expr) {
            debug!(expr, "Predicate cache hit");
            return Ok(program.clone());
        }

        debug!(expr, "Predicate cache miss");
        let compiled = Program::compile(expr).map_err(|e| Error::InvalidExpression {
            expr: expr.to_string(),
            reason: e.to_string(),
        })?;
        let compiled = Arc::new(compiled);

        Ok(self
            .cache
            .lock()
            .get_or_insert(expr.to_string(), || compiled)
            .clone())
    }
}

fn run(program: &Program, report: Value) -> Result<Value> {
    let mut context = Context::default();
    context.add_variable_from_value("report", report);
    program
        .execute(&context)
        .map_err(|e| Error::Evaluation(e.to_string()))
}

fn cel_type_name(value: &Value) -> &'static str {
    match value {
        Value::List(_) => "list",
        Value::Map(_) => "map",
        Value::Int(_) => "int",
        Value::UInt(_) => "uint",
        Value::Float(_) => "double",
        Value::String(_) => "string",
        Value::Bytes(_) => "bytes",
        Value::Bool(_) => "bool",
        Value::Duration(_) => "duration",
        Value::Timestamp(_) => "timestamp",
        Value::Null => "null",
        #[allow(unreachable_patterns)]
        _ => "value",
    }
}

fn row_value_to_cel(value: &RowValue) -> Value {
    match value {
        RowValue::Null => Value::Null,
        RowValue::Bool(b) => Value::Bool(*b),
        RowValue::Int(i) => Value::Int(*i),
        RowValue::Float(f) => Value::Float(*f),
        RowValue::String(s) => Value::String(Arc::new(s.clone())),
        RowValue::Timestamp(ts) => Value::Timestamp(*ts),
    }
}

fn row_to_cel(row: &Row) -> Value {
    let fields: HashMap<String, Value> = row
        .iter()
        .map(|(key, value)| (key.clone(), row_value_to_cel(value)))
        .collect();
    Value::from(fields)
}

/// The `report` variable: card title to list of row maps.
pub fn fetch_result_to_cel(data: &FetchResult) -> Value {
    let cards: HashMap<String, Value> = data
        .iter()
        .map(|(title, rows)| {
            let rows: Vec<Value> = rows.iter().map(row_to_cel).collect();
            (title.to_string(), Value::from(rows))
        })
        .collect();
    Value::from(cards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn evaluator(cache_size: usize) -> Evaluator {
        Evaluator::new(&EvaluatorConfig {
            cache_size,
            timeout: Duration::from_secs(5),
        })
    }

    fn data() -> FetchResult {
        let mut data = FetchResult::new();
        data.insert(
            "Q",
            vec![
                Row::from([("x".to_string(), RowValue::Int(0))]),
                Row::from([("x".to_string(), RowValue::Int(4))]),
            ],
        );
        data
    }

    #[rstest]
    #[case("[*]", true)]
    #[case("[!*]", false)]
    #[tokio::test]
    async fn test_sentinels_bypass_cache(#[case] expr: &str, #[case] expected: bool) {
        let evaluator = evaluator(15);
        let result = evaluator
            .evaluate(&CancellationToken::new(), &FetchResult::new(), expr)
            .await
            .unwrap();
        assert_eq!(result, expected);
        assert_eq!(evaluator.cached(), 0);
    }

    #[rstest]
    #[case("size(report.Q) > 1", true)]
    #[case("report['Q'][0].x == 0", true)]
    #[case("report.Q.exists(r, r.x > 3)", true)]
    #[case("report.Q.all(r, r.x > 3)", false)]
    #[case("'Q' in report && !('Other' in report)", true)]
    #[tokio::test]
    async fn test_evaluate_predicates(#[case] expr: &str, #[case] expected: bool) {
        let evaluator = evaluator(15);
        let result = evaluator
            .evaluate(&CancellationToken::new(), &data(), expr)
            .await
            .unwrap();
        assert_eq!(result, expected);
    }

    #[tokio::test]
    async fn test_invalid_expression() {
        let result = evaluator(15)
            .evaluate(&CancellationToken::new(), &data(), "report[")
            .await;
        assert!(matches!(result, Err(Error::InvalidExpression { .. })));
    }

    #[rstest]
    #[case(" [*] ")]
    #[case("[!*]\n")]
    #[tokio::test]
    async fn test_padded_sentinel_is_compiled(#[case] expr: &str) {
        let result = evaluator(15)
            .evaluate(&CancellationToken::new(), &data(), expr)
            .await;
        assert!(matches!(result, Err(Error::InvalidExpression { .. })));
    }

    #[tokio::test]
    async fn test_non_bool_result() {
        let result = evaluator(15)
            .evaluate(&CancellationToken::new(), &data(), "size(report.Q)")
            .await;
        assert!(matches!(result, Err(Error::UnexpectedResultType(t)) if t == "int"));
    }

    #[tokio::test]
    async fn test_runtime_error() {
        let result = evaluator(15)
            .evaluate(&CancellationToken::new(), &data(), "report.Missing[0].x == 1")
            .await;
        assert!(matches!(result, Err(Error::Evaluation(_))));
    }

    #[tokio::test]
    async fn test_cache_is_bounded_and_reused() {
        let evaluator = evaluator(2);
        let cancel = CancellationToken::new();
        let data = data();

        for _ in 0..3 {
            evaluator.evaluate(&cancel, &data, "size(report.Q) == 2").await.unwrap();
        }
        assert_eq!(evaluator.cached(), 1);

        for n in 0..4 {
            let expr = format!("size(report.Q) == {n}");
            evaluator.evaluate(&cancel, &data, &expr).await.unwrap();
        }
        assert_eq!(evaluator.cached(), 2);
    }

    #[tokio::test]
    async fn test_canceled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = evaluator(15).evaluate(&cancel, &data(), "true").await;
        assert!(matches!(result, Err(Error::Canceled)));
    }
}
