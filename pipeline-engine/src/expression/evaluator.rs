// Expression Evaluator
// Evaluates expressions against an explicit binding context and checks
// references statically before any run starts

use crate::expression::parser::{BinaryOp, Expr};

use indexmap::IndexMap;
use std::fmt;

/// Evaluation error
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub message: String,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evaluation error: {}", self.message)
    }
}

impl std::error::Error for EvalError {}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Runtime value produced by an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
        }
    }

    /// Loose equality: numbers compare numerically, strings case-insensitively,
    /// mixed types compare through their string form.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a.eq_ignore_ascii_case(b),
            (a, b) => a.to_string().eq_ignore_ascii_case(&b.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// Job-local state consulted by the status functions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusContext {
    /// A prior step failed, or an upstream job failed or was skipped
    pub failed: bool,
    /// Cancellation was requested for this job instance
    pub cancelled: bool,
}

/// Fields of the triggering event visible as `github.*`
pub const EVENT_FIELDS: &[&str] = &["event_name", "ref", "ref_name", "sha"];

/// Variable-binding context for one job instance
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    pub matrix: IndexMap<String, Value>,
    pub env: IndexMap<String, String>,
    pub event: IndexMap<String, String>,
    pub status: StatusContext,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_matrix(mut self, matrix: IndexMap<String, Value>) -> Self {
        self.matrix = matrix;
        self
    }

    pub fn with_env(mut self, env: IndexMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_event(mut self, event: IndexMap<String, String>) -> Self {
        self.event = event;
        self
    }

    pub fn with_status(mut self, status: StatusContext) -> Self {
        self.status = status;
        self
    }
}

/// Evaluates parsed expressions against an [`EvalContext`]
pub struct Evaluator<'a> {
    context: &'a EvalContext,
}

impl<'a> Evaluator<'a> {
    pub fn new(context: &'a EvalContext) -> Self {
        Self { context }
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Reference(parts) => self.lookup(parts),
            Expr::Call { name, args } => self.call(name, args),
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner)?.is_truthy())),
            Expr::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    if !self.eval(left)?.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                    Ok(Value::Bool(self.eval(right)?.is_truthy()))
                }
                BinaryOp::Or => {
                    if self.eval(left)?.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                    Ok(Value::Bool(self.eval(right)?.is_truthy()))
                }
                BinaryOp::Eq => Ok(Value::Bool(self.eval(left)?.loose_eq(&self.eval(right)?))),
                BinaryOp::Ne => Ok(Value::Bool(!self.eval(left)?.loose_eq(&self.eval(right)?))),
            },
        }
    }

    fn lookup(&self, parts: &[String]) -> Result<Value, EvalError> {
        let [root, key] = parts else {
            return Err(EvalError::new(format!(
                "unsupported reference '{}'",
                parts.join(".")
            )));
        };

        let value = match root.as_str() {
            "matrix" => self.context.matrix.get(key).cloned(),
            "env" => self.context.env.get(key).cloned().map(Value::String),
            "github" => self.context.event.get(key).cloned().map(Value::String),
            other => return Err(EvalError::new(format!("unknown context '{}'", other))),
        };

        Ok(value.unwrap_or(Value::Null))
    }

    fn call(&self, name: &str, args: &[Expr]) -> Result<Value, EvalError> {
        let status = self.context.status;
        match name.to_ascii_lowercase().as_str() {
            "success" => Ok(Value::Bool(!status.failed && !status.cancelled)),
            "failure" => Ok(Value::Bool(status.failed)),
            "always" => Ok(Value::Bool(true)),
            "cancelled" => Ok(Value::Bool(status.cancelled)),
            "contains" | "startswith" | "endswith" => {
                let [haystack, needle] = args else {
                    return Err(EvalError::new(format!("{}() takes 2 arguments", name)));
                };
                let haystack = self.eval(haystack)?.to_string().to_lowercase();
                let needle = self.eval(needle)?.to_string().to_lowercase();
                let result = match name.to_ascii_lowercase().as_str() {
                    "contains" => haystack.contains(&needle),
                    "startswith" => haystack.starts_with(&needle),
                    _ => haystack.ends_with(&needle),
                };
                Ok(Value::Bool(result))
            }
            _ => Err(EvalError::new(format!("unknown function '{}'", name))),
        }
    }
}

/// Names that are valid at a given place in a workflow.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    /// Declared matrix axes of the enclosing job (empty outside jobs)
    pub matrix_axes: &'a [String],
    /// Whether status functions (success(), always() ...) may appear
    pub allow_status: bool,
}

pub const STATUS_FUNCTIONS: &[&str] = &["success", "failure", "always", "cancelled"];

/// Statically check that an expression only uses known functions and
/// references that can be resolved in `scope`.
pub fn check(expr: &Expr, scope: &Scope<'_>) -> Result<(), EvalError> {
    match expr {
        Expr::Reference(parts) => check_reference(parts, scope),
        Expr::Call { name, args } => {
            let lower = name.to_ascii_lowercase();
            let arity = match lower.as_str() {
                n if STATUS_FUNCTIONS.contains(&n) => {
                    if !scope.allow_status {
                        return Err(EvalError::new(format!(
                            "status function '{}()' is only allowed in 'if' conditions",
                            name
                        )));
                    }
                    0
                }
                "contains" | "startswith" | "endswith" => 2,
                _ => return Err(EvalError::new(format!("unknown function '{}'", name))),
            };
            if args.len() != arity {
                return Err(EvalError::new(format!(
                    "{}() takes {} argument(s), got {}",
                    name,
                    arity,
                    args.len()
                )));
            }
            args.iter().try_for_each(|arg| check(arg, scope))
        }
        Expr::Not(inner) => check(inner, scope),
        Expr::Binary { left, right, .. } => {
            check(left, scope)?;
            check(right, scope)
        }
        _ => Ok(()),
    }
}

fn check_reference(parts: &[String], scope: &Scope<'_>) -> Result<(), EvalError> {
    let joined = parts.join(".");
    let [root, key] = parts else {
        return Err(EvalError::new(format!("unsupported reference '{}'", joined)));
    };

    match root.as_str() {
        "matrix" if scope.matrix_axes.iter().any(|axis| axis == key) => Ok(()),
        "matrix" => Err(EvalError::new(format!(
            "'{}' does not name a declared matrix axis",
            joined
        ))),
        "env" => Ok(()),
        "github" if EVENT_FIELDS.contains(&key.as_str()) => Ok(()),
        "github" => Err(EvalError::new(format!("unknown event field '{}'", joined))),
        other => Err(EvalError::new(format!("unknown context '{}'", other))),
    }
}
