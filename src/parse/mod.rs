mod error;
mod grammar;
mod parser;

pub use error::ParseError;
pub use parser::{ParsedDefinition, ParsedPolicy};

use crate::Expr;

/// Parse a single rule or macro expression into an [`Expr`].
///
/// # Errors
///
/// Returns [`ParseError`] if the input is not a valid expression or has
/// trailing input.
pub fn parse_expression(input: &str) -> Result<Expr, ParseError> {
    use winnow::Parser;
    grammar::full_expression
        .parse(input)
        .map_err(|e| ParseError::new(e.to_string()))
}

/// Parse a text policy made of `rule <id>: <expr>` and `macro <id>: <expr>`
/// definitions. Expression bodies are kept as source text; they are
/// compiled later against the field model.
///
/// # Errors
///
/// Returns [`ParseError`] if the input is not valid policy syntax.
pub fn parse_policy(input: &str) -> Result<ParsedPolicy, ParseError> {
    use winnow::Parser;
    grammar::policy
        .parse(input)
        .map_err(|e| ParseError::new(e.to_string()))
}
