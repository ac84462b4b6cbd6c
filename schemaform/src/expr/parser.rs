/// Nom grammar for visibility expressions.
///
/// ```text
/// expr     := and ( "||" and )*
/// and      := equality ( "&&" equality )*
/// equality := relation ( ("===" | "!==" | "==" | "!=") relation )*
/// relation := unary ( ("<=" | ">=" | "<" | ">") unary )*
/// unary    := "!" unary | primary
/// primary  := "(" expr ")" | string | number | keyword | path
/// path     := "$." ident ( "." ident )*
/// ```
use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while1},
    character::complete::{char, multispace0},
    combinator::{all_consuming, map, map_opt, map_res, recognize, value},
    multi::{many0, separated_list1},
    number::complete::recognize_float,
    sequence::{delimited, pair, preceded},
    IResult,
};
use serde_json::{Number, Value};

use super::{CompareOp, Expr, ExprError};
use crate::path::DataPath;

/// Parse an expression source into an (unbound) syntax tree.
/// A trailing `;` is tolerated.
pub fn parse(src: &str) -> Result<Expr, ExprError> {
    let body = src.trim().trim_end_matches(';').trim();
    if body.is_empty() {
        return Err(ExprError::Empty);
    }
    match all_consuming(ws(or_expr))(body) {
        Ok((_, expr)) => Ok(expr),
        Err(e) => Err(ExprError::Syntax {
            source_text: src.to_string(),
            message: e.to_string(),
        }),
    }
}

fn ws<'a, O>(
    inner: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> impl FnMut(&'a str) -> IResult<&'a str, O> {
    delimited(multispace0, inner, multispace0)
}

fn or_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(ws(tag("||")), and_expr))(input)?;
    let expr = rest
        .into_iter()
        .fold(first, |lhs, rhs| Expr::Or(Box::new(lhs), Box::new(rhs)));
    Ok((input, expr))
}

fn and_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = equality(input)?;
    let (input, rest) = many0(preceded(ws(tag("&&")), equality))(input)?;
    let expr = rest
        .into_iter()
        .fold(first, |lhs, rhs| Expr::And(Box::new(lhs), Box::new(rhs)));
    Ok((input, expr))
}

fn equality(input: &str) -> IResult<&str, Expr> {
    let op = alt((
        value(CompareOp::StrictEq, tag("===")),
        value(CompareOp::StrictNe, tag("!==")),
        value(CompareOp::LooseEq, tag("==")),
        value(CompareOp::LooseNe, tag("!=")),
    ));
    let (input, first) = relation(input)?;
    let (input, rest) = many0(pair(ws(op), relation))(input)?;
    Ok((input, fold_compare(first, rest)))
}

fn relation(input: &str) -> IResult<&str, Expr> {
    let op = alt((
        value(CompareOp::Le, tag("<=")),
        value(CompareOp::Ge, tag(">=")),
        value(CompareOp::Lt, tag("<")),
        value(CompareOp::Gt, tag(">")),
    ));
    let (input, first) = unary(input)?;
    let (input, rest) = many0(pair(ws(op), unary))(input)?;
    Ok((input, fold_compare(first, rest)))
}

fn fold_compare(first: Expr, rest: Vec<(CompareOp, Expr)>) -> Expr {
    rest.into_iter().fold(first, |lhs, (op, rhs)| Expr::Compare {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    })
}

fn unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(ws(char('!')), unary), |e| Expr::Not(Box::new(e))),
        primary,
    ))(input)
}

fn primary(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        delimited(char('('), ws(or_expr), char(')')),
        path,
        string_literal,
        keyword,
        number,
    )))(input)
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn path(input: &str) -> IResult<&str, Expr> {
    map(
        preceded(
            tag("$."),
            recognize(separated_list1(char('.'), take_while1(is_ident))),
        ),
        |p: &str| Expr::Path(DataPath::parse(p)),
    )(input)
}

fn string_literal(input: &str) -> IResult<&str, Expr> {
    map(
        alt((
            delimited(char('"'), take_until("\""), char('"')),
            delimited(char('\''), take_until("'"), char('\'')),
        )),
        |s: &str| Expr::Literal(Some(Value::String(s.to_string()))),
    )(input)
}

fn keyword(input: &str) -> IResult<&str, Expr> {
    map_opt(take_while1(is_ident), |word: &str| match word {
        "true" => Some(Expr::Literal(Some(Value::Bool(true)))),
        "false" => Some(Expr::Literal(Some(Value::Bool(false)))),
        "null" => Some(Expr::Literal(Some(Value::Null))),
        "undefined" => Some(Expr::Literal(None)),
        _ => None,
    })(input)
}

fn number(input: &str) -> IResult<&str, Expr> {
    map_res(recognize_float, |s: &str| {
        s.parse::<f64>().map(|n| {
            let value = if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                Value::from(n as i64)
            } else {
                Number::from_f64(n).map_or(Value::Null, Value::Number)
            };
            Expr::Literal(Some(value))
        })
    })(input)
}
