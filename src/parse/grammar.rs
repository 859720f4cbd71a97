use winnow::ascii::{dec_int, hex_uint, till_line_ending};
use winnow::combinator::{
    alt, cut_err, delimited, not, opt, peek, preceded, repeat, separated, terminated,
};
use winnow::error::{ContextError, ErrMode, ModalResult, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{any, one_of, take_while};

use crate::{CompareOp, Expr, Literal};

use super::parser::{ParsedDefinition, ParsedPolicy};

// -- Whitespace & comments --------------------------------------------------

fn ws(input: &mut &str) -> ModalResult<()> {
    let _: () = repeat(
        0..,
        alt((
            take_while(1.., |c: char| c.is_ascii_whitespace()).void(),
            ('#', till_line_ending).void(),
        )),
    )
    .parse_next(input)?;
    Ok(())
}

// -- Identifiers & keywords -------------------------------------------------

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

fn ident<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1.., |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., is_ident_char),
    )
        .take()
        .parse_next(input)
}

/// A keyword that is not the prefix of a longer identifier.
fn keyword<'i>(kw: &'static str) -> impl Parser<&'i str, (), ErrMode<ContextError>> {
    terminated(kw, not(one_of(is_ident_char))).void()
}

// -- Literals ---------------------------------------------------------------

fn string_literal(input: &mut &str) -> ModalResult<String> {
    '"'.parse_next(input)?;
    let mut s = String::new();
    loop {
        let ch = any.parse_next(input)?;
        match ch {
            '"' => return Ok(s),
            '\\' => {
                let esc = any.parse_next(input)?;
                match esc {
                    '"' => s.push('"'),
                    '\\' => s.push('\\'),
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
            }
            c => s.push(c),
        }
    }
}

fn hex_literal(input: &mut &str) -> ModalResult<i64> {
    preceded(alt(("0x", "0X")), cut_err(hex_uint::<_, u64, _>))
        .try_map(i64::try_from)
        .parse_next(input)
}

fn int_literal(input: &mut &str) -> ModalResult<i64> {
    alt((hex_literal, dec_int::<_, i64, _>)).parse_next(input)
}

fn literal(input: &mut &str) -> ModalResult<Literal> {
    alt((
        string_literal.map(Literal::String),
        preceded('~', cut_err(string_literal)).map(Literal::Pattern),
        preceded('r', string_literal).map(Literal::Regex),
        int_literal.map(Literal::Int),
    ))
    .parse_next(input)
}

fn variable(input: &mut &str) -> ModalResult<Expr> {
    delimited(
        "${",
        cut_err(take_while(1.., is_ident_char)),
        cut_err('}'),
    )
    .map(|name: &str| Expr::Variable(name.to_owned()))
    .parse_next(input)
}

fn ident_or_bool(input: &mut &str) -> ModalResult<Expr> {
    let name = ident.parse_next(input)?;
    Ok(match name {
        "true" => Expr::Literal(Literal::Bool(true)),
        "false" => Expr::Literal(Literal::Bool(false)),
        other => Expr::Ident(other.to_owned()),
    })
}

fn array(input: &mut &str) -> ModalResult<Expr> {
    let items: Vec<Expr> = delimited(
        '[',
        separated(0.., preceded(ws, array_item), (ws, ',')),
        (ws, cut_err(']')),
    )
    .parse_next(input)?;
    Ok(Expr::Array(items))
}

fn array_item(input: &mut &str) -> ModalResult<Expr> {
    alt((literal.map(Expr::Literal), ident_or_bool)).parse_next(input)
}

// -- Comparison operators ---------------------------------------------------

fn compare_op(input: &mut &str) -> ModalResult<CompareOp> {
    ws.parse_next(input)?;
    alt((
        ">=".value(CompareOp::Gte),
        ">".value(CompareOp::Gt),
        "<=".value(CompareOp::Lte),
        "<".value(CompareOp::Lt),
        "==".value(CompareOp::Eq),
        "!=".value(CompareOp::Neq),
        "=~".value(CompareOp::Matches),
        "!~".value(CompareOp::NotMatches),
        keyword("in").value(CompareOp::In),
        (keyword("not"), ws, keyword("in")).value(CompareOp::NotIn),
    ))
    .parse_next(input)
}

// -- Expressions (precedence: OR < AND < NOT < comparison < primary) --------

fn operand(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    alt((
        delimited('(', expr, (ws, cut_err(')'))),
        array,
        variable,
        literal.map(Expr::Literal),
        ident_or_bool,
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "expression",
    )))
    .parse_next(input)
}

fn comparison(input: &mut &str) -> ModalResult<Expr> {
    let lhs = operand(input)?;
    let checkpoint = input.checkpoint();
    if let Ok(op) = compare_op.parse_next(input) {
        let rhs = cut_err(operand).parse_next(input)?;
        Ok(Expr::Compare {
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
        })
    } else {
        input.reset(&checkpoint);
        Ok(lhs)
    }
}

fn unary(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    let negated = opt(alt((
        terminated("!", peek(not('='))).void(),
        keyword("not"),
    )))
    .parse_next(input)?;
    if negated.is_some() {
        let inner = cut_err(unary).parse_next(input)?;
        Ok(Expr::Not(Box::new(inner)))
    } else {
        comparison(input)
    }
}

fn and_expr(input: &mut &str) -> ModalResult<Expr> {
    let first = unary(input)?;
    let rest: Vec<Expr> = repeat(
        0..,
        preceded((ws, alt(("&&".void(), keyword("and")))), cut_err(unary)),
    )
    .parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, r| Expr::And(Box::new(acc), Box::new(r))))
}

fn or_expr(input: &mut &str) -> ModalResult<Expr> {
    let first = and_expr(input)?;
    let rest: Vec<Expr> = repeat(
        0..,
        preceded((ws, alt(("||".void(), keyword("or")))), cut_err(and_expr)),
    )
    .parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, r| Expr::Or(Box::new(acc), Box::new(r))))
}

pub(crate) fn expr(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    or_expr(input)
}

pub(crate) fn full_expression(input: &mut &str) -> ModalResult<Expr> {
    terminated(expr, ws).parse_next(input)
}

// -- Text policies ----------------------------------------------------------

fn definition(input: &mut &str) -> ModalResult<ParsedDefinition> {
    ws.parse_next(input)?;
    let is_macro = alt((keyword("rule").value(false), keyword("macro").value(true)))
        .parse_next(input)?;
    ws.parse_next(input)?;

    let id = cut_err(ident)
        .context(StrContext::Expected(StrContextValue::Description(
            "definition id",
        )))
        .parse_next(input)?;

    ws.parse_next(input)?;
    cut_err(':').parse_next(input)?;

    let (_, body) = cut_err(expr.with_taken())
        .context(StrContext::Expected(StrContextValue::Description(
            "definition body",
        )))
        .parse_next(input)?;

    Ok(ParsedDefinition {
        id: id.to_owned(),
        expression: body.trim().to_owned(),
        is_macro,
    })
}

pub(crate) fn policy(input: &mut &str) -> ModalResult<ParsedPolicy> {
    let definitions: Vec<ParsedDefinition> = repeat(0.., definition).parse_next(input)?;
    ws.parse_next(input)?;

    let (macros, rules) = definitions.into_iter().partition(|d| d.is_macro);
    Ok(ParsedPolicy { rules, macros })
}
