// Step and job `if` conditions

use crate::expression::evaluator::{check, EvalContext, EvalError, Evaluator, Scope, STATUS_FUNCTIONS};
use crate::expression::parser::{BinaryOp, Expr, ExprParser, ParseExprError};

use std::fmt;

/// A parsed `if:` condition.
///
/// Accepts the bare keywords `success`, `always`, `failure` and `cancelled`,
/// full expressions, and expressions wrapped in `${{ }}`. A condition that
/// calls no status function is implicitly `success() && <condition>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, ParseExprError> {
        let trimmed = source.trim();
        let inner = trimmed
            .strip_prefix("${{")
            .and_then(|rest| rest.strip_suffix("}}"))
            .map(str::trim)
            .unwrap_or(trimmed);

        let expr = if STATUS_FUNCTIONS.contains(&inner.to_ascii_lowercase().as_str()) {
            Expr::Call {
                name: inner.to_ascii_lowercase(),
                args: Vec::new(),
            }
        } else {
            ExprParser::parse_str(inner)?
        };

        Ok(Self {
            source: trimmed.to_string(),
            expr,
        })
    }

    /// The default condition: run only while nothing has failed.
    pub fn success() -> Self {
        Self {
            source: "success()".to_string(),
            expr: Expr::Call {
                name: "success".to_string(),
                args: Vec::new(),
            },
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn calls_any(&self, names: &[&str]) -> bool {
        self.expr
            .calls()
            .iter()
            .any(|call| names.contains(&call.to_ascii_lowercase().as_str()))
    }

    pub fn is_status_aware(&self) -> bool {
        self.calls_any(STATUS_FUNCTIONS)
    }

    pub fn references_always(&self) -> bool {
        self.calls_any(&["always"])
    }

    /// Whether this condition is still evaluated after cancellation was requested.
    pub fn survives_cancellation(&self) -> bool {
        self.calls_any(&["always", "cancelled"])
    }

    pub fn check(&self, matrix_axes: &[String]) -> Result<(), EvalError> {
        check(
            &self.expr,
            &Scope {
                matrix_axes,
                allow_status: true,
            },
        )
    }

    pub fn evaluate(&self, context: &EvalContext) -> Result<bool, EvalError> {
        let evaluator = Evaluator::new(context);
        if self.is_status_aware() {
            return Ok(evaluator.eval(&self.expr)?.is_truthy());
        }

        let implicit = Expr::Binary {
            op: BinaryOp::And,
            left: Box::new(Condition::success().expr),
            right: Box::new(self.expr.clone()),
        };
        Ok(evaluator.eval(&implicit)?.is_truthy())
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::success()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::evaluator::{StatusContext, Value};
    use indexmap::IndexMap;

    fn status(failed: bool, cancelled: bool) -> EvalContext {
        EvalContext::new().with_status(StatusContext { failed, cancelled })
    }

    #[test]
    fn test_bare_keywords() {
        for (source, expected) in [
            ("success", "success"),
            ("always", "always"),
            ("failure", "failure"),
            ("${{ always() }}", "always"),
        ] {
            let condition = Condition::parse(source).unwrap();
            assert_eq!(condition.expr.calls(), vec![expected], "source: {}", source);
        }
    }

    #[test]
    fn test_default_runs_only_without_failure() {
        let condition = Condition::default();
        assert!(condition.evaluate(&status(false, false)).unwrap());
        assert!(!condition.evaluate(&status(true, false)).unwrap());
        assert!(!condition.evaluate(&status(false, true)).unwrap());
    }

    #[test]
    fn test_always_and_failure() {
        let always = Condition::parse("always()").unwrap();
        assert!(always.evaluate(&status(true, true)).unwrap());
        assert!(always.survives_cancellation());

        let failure = Condition::parse("failure()").unwrap();
        assert!(failure.evaluate(&status(true, false)).unwrap());
        assert!(!failure.evaluate(&status(false, false)).unwrap());
        assert!(!failure.survives_cancellation());
    }

    #[test]
    fn test_implicit_success() {
        let mut matrix = IndexMap::new();
        matrix.insert("os".to_string(), Value::from("ubuntu"));
        let mut ctx = EvalContext::new().with_matrix(matrix);

        let condition = Condition::parse("matrix.os == 'ubuntu'").unwrap();
        assert!(!condition.is_status_aware());
        assert!(condition.evaluate(&ctx).unwrap());

        ctx.status.failed = true;
        assert!(!condition.evaluate(&ctx).unwrap());
    }

    #[test]
    fn test_check_rejects_unknown_axis() {
        let condition = Condition::parse("matrix.arch == 'arm'").unwrap();
        assert!(condition.check(&["os".to_string()]).is_err());
        assert!(condition.check(&["arch".to_string()]).is_ok());
    }
}
