// Expression Module
// Small typed expression language for `if` conditions and ${{ }} interpolation

pub mod condition;
pub mod evaluator;
pub mod lexer;
pub mod parser;
pub mod template;

pub use condition::Condition;
pub use evaluator::{EvalContext, EvalError, Evaluator, Scope, StatusContext, Value};
pub use lexer::{extract_segments, LexError, Lexer, Segment, Token};
pub use parser::{BinaryOp, Expr, ExprParser, ParseExprError};
pub use template::Template;
