// Text templates with embedded ${{ }} expressions

use crate::expression::evaluator::{check, EvalContext, EvalError, Evaluator, Scope};
use crate::expression::lexer::{extract_segments, Segment};
use crate::expression::parser::{Expr, ExprParser, ParseExprError};

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Text(String),
    Expr(Expr),
}

/// A string such as `build-${{ matrix.os }}` parsed once at load time.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, ParseExprError> {
        let parts = extract_segments(source)
            .into_iter()
            .map(|segment| match segment {
                Segment::Text(text) => Ok(Part::Text(text)),
                Segment::Expression(expr) => ExprParser::parse_str(&expr).map(Part::Expr),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// True when the template has no expressions.
    pub fn is_literal(&self) -> bool {
        self.parts.iter().all(|part| matches!(part, Part::Text(_)))
    }

    pub fn check(&self, matrix_axes: &[String]) -> Result<(), EvalError> {
        let scope = Scope {
            matrix_axes,
            allow_status: false,
        };
        self.parts.iter().try_for_each(|part| match part {
            Part::Text(_) => Ok(()),
            Part::Expr(expr) => check(expr, &scope),
        })
    }

    pub fn render(&self, context: &EvalContext) -> Result<String, EvalError> {
        let evaluator = Evaluator::new(context);
        let mut rendered = String::with_capacity(self.source.len());
        for part in &self.parts {
            match part {
                Part::Text(text) => rendered.push_str(text),
                Part::Expr(expr) => rendered.push_str(&evaluator.eval(expr)?.to_string()),
            }
        }
        Ok(rendered)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}
