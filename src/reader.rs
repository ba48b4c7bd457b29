// ABOUTME: nom-based reader turning source text into Datum syntax (cons-chain lists, atoms)

use nom::{
    branch::alt,
    bytes::complete::{escaped, tag, take_while, take_while1},
    character::complete::{char, digit1, multispace1, none_of, one_of},
    combinator::{map, not, opt, peek, recognize, value},
    multi::many0,
    IResult, Parser,
};
use num_bigint::BigInt;
use num_rational::BigRational;

use crate::datum::{cons, intern, vec_to_improper_list, CharValue, Datum};
use crate::numeric::Number;

fn ws_and_comments(input: &str) -> IResult<&str, ()> {
    many0(alt((
        value((), multispace1),
        value((), (char(';'), take_while(|c| c != '\n'))),
    )))
    .map(|_| ())
    .parse(input)
}

fn symbol_char(c: char) -> bool {
    c.is_alphanumeric()
        || "+-*/%<>=!?_.:$&^~".contains(c)
}

fn parse_number(input: &str) -> IResult<&str, Datum> {
    let (input, text) = recognize((
        opt(char('-')),
        alt((
            recognize((digit1, opt((char('/'), digit1)))),
            recognize((digit1, char('.'), opt(digit1))),
            recognize((char('.'), digit1)),
        )),
    ))
    .parse(input)?;

    if let Some((num, den)) = text.split_once('/') {
        let n = num.parse::<BigInt>().map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit)))?;
        let d = den.parse::<BigInt>().map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit)))?;
        return Ok((input, Datum::Number(Number::Rational(BigRational::new(n, d)))));
    }
    if text.contains('.') {
        let f: f64 = text.parse().map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Float)))?;
        return Ok((input, Datum::Number(Number::Real(f))));
    }
    let i: BigInt = text.parse().map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit)))?;
    Ok((input, Datum::Number(Number::Integer(i))))
}

fn parse_bool(input: &str) -> IResult<&str, Datum> {
    alt((
        value(Datum::Boolean(true), tag("#t")),
        value(Datum::Boolean(false), tag("#f")),
    ))
    .parse(input)
}

fn parse_char_literal(input: &str) -> IResult<&str, Datum> {
    let (input, _) = tag("#\\")(input)?;
    alt((
        value(Datum::Character(CharValue::Ch(' ')), tag("space")),
        value(Datum::Character(CharValue::Ch('\n')), tag("newline")),
        value(Datum::Character(CharValue::Ch('\t')), tag("tab")),
        value(Datum::Character(CharValue::Eof), tag("eof")),
        map(take_while1(|_| true), |s: &str| {
            Datum::Character(CharValue::Ch(s.chars().next().unwrap_or(' ')))
        }),
    ))
    .parse(input)
}

fn parse_symbol(input: &str) -> IResult<&str, Datum> {
    let (input, first) = one_of("abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ+-*/%<>=!?_")(input)?;
    let (input, rest) = take_while(symbol_char)(input)?;
    let mut s = String::new();
    s.push(first);
    s.push_str(rest);
    Ok((input, Datum::Symbol(intern(&s))))
}

fn parse_string(input: &str) -> IResult<&str, Datum> {
    let (input, _) = char('"')(input)?;
    if let Ok((input, _)) = char::<_, nom::error::Error<_>>('"')(input) {
        return Ok((input, Datum::string("")));
    }
    let (input, content) = escaped(none_of("\"\\"), '\\', one_of("\"\\nt")).parse(input)?;
    let (input, _) = char('"')(input)?;

    let mut result = String::new();
    let mut chars = content.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('t') => result.push('\t'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => {}
            }
        } else {
            result.push(c);
        }
    }
    Ok((input, Datum::string(result)))
}

fn parse_quote_like(input: &str) -> IResult<&str, Datum> {
    alt((
        map((char('\''), parse_expr), |(_, e)| wrap("quote", e)),
        map((char('`'), parse_expr), |(_, e)| wrap("quasiquote", e)),
        map((tag(",@"), parse_expr), |(_, e)| wrap("unquote-splicing", e)),
        map((char(','), parse_expr), |(_, e)| wrap("unquote", e)),
    ))
    .parse(input)
}

fn wrap(head: &str, e: Datum) -> Datum {
    cons(Datum::Symbol(intern(head)), cons(e, Datum::EmptyList))
}

fn parse_list(input: &str) -> IResult<&str, Datum> {
    let (input, _) = char('(')(input)?;
    let (input, _) = ws_and_comments(input)?;

    let mut items = Vec::new();
    let mut remaining = input;
    let mut tail = Datum::EmptyList;

    loop {
        if let Ok((rest, _)) = char::<_, nom::error::Error<_>>(')')(remaining) {
            return Ok((rest, vec_to_improper_list(items, tail)));
        }
        if let Ok((rest, _)) = char::<_, nom::error::Error<_>>('.')(remaining) {
            if let Ok((rest, _)) = peek(alt((multispace1::<_, nom::error::Error<_>>, tag(")")))).parse(rest) {
                let (rest, _) = ws_and_comments(rest)?;
                let (rest, t) = parse_expr(rest)?;
                let (rest, _) = ws_and_comments(rest)?;
                let (rest, _) = char(')')(rest)?;
                tail = t;
                return Ok((rest, vec_to_improper_list(items, tail)));
            }
        }
        let (rest, expr) = parse_expr(remaining)?;
        items.push(expr);
        let (rest, _) = ws_and_comments(rest)?;
        remaining = rest;
    }
}

fn parse_vector(input: &str) -> IResult<&str, Datum> {
    let (input, _) = tag("#(")(input)?;
    let (input, _) = ws_and_comments(input)?;
    let mut items = Vec::new();
    let mut remaining = input;
    loop {
        if let Ok((rest, _)) = char::<_, nom::error::Error<_>>(')')(remaining) {
            return Ok((rest, Datum::vector(items)));
        }
        let (rest, expr) = parse_expr(remaining)?;
        items.push(expr);
        let (rest, _) = ws_and_comments(rest)?;
        remaining = rest;
    }
}

pub fn parse_expr(input: &str) -> IResult<&str, Datum> {
    let (input, _) = ws_and_comments(input)?;
    alt((
        parse_quote_like,
        parse_vector,
        parse_list,
        parse_char_literal,
        parse_bool,
        parse_number,
        parse_string,
        parse_symbol,
    ))
    .parse(input)
}

/// Parse every top-level form in `input`.
pub fn parse_program(input: &str) -> Result<Vec<Datum>, String> {
    let mut forms = Vec::new();
    let mut remaining = input;
    loop {
        let (rest, _) = ws_and_comments(remaining).map_err(|e| format!("{e:?}"))?;
        if rest.is_empty() {
            return Ok(forms);
        }
        let (rest, form) = parse_expr(rest).map_err(|e| format!("parse error: {e:?}"))?;
        forms.push(form);
        remaining = rest;
    }
}

/// Parse exactly one top-level form, erroring on trailing non-whitespace input.
pub fn parse_one(input: &str) -> Result<Datum, String> {
    let (rest, form) = parse_expr(input).map_err(|e| format!("parse error: {e:?}"))?;
    let (rest, _) = ws_and_comments(rest).unwrap_or((rest, ()));
    if !rest.is_empty() {
        return Err(format!("unexpected trailing input: '{rest}'"));
    }
    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_list() {
        let d = parse_one("(+ 1 (* 2 3))").unwrap();
        assert!(d.is_pair());
    }

    #[test]
    fn parses_dotted_pair() {
        let d = parse_one("(1 . 2)").unwrap();
        match d {
            Datum::Pair(p) => {
                assert!(matches!(&*p.cdr.borrow(), Datum::Number(_)));
            }
            _ => panic!("expected pair"),
        }
    }

    #[test]
    fn parses_quote_sugar() {
        let d = parse_one("'foo").unwrap();
        let items = crate::datum::list_to_vec(&d).unwrap();
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Datum::Symbol(s) if &**s == "quote"));
    }

    #[test]
    fn parses_exact_rational() {
        let d = parse_one("3/4").unwrap();
        assert!(matches!(d, Datum::Number(Number::Rational(_))));
    }

    #[test]
    fn parses_vector_literal() {
        let d = parse_one("#(1 2 3)").unwrap();
        assert!(matches!(d, Datum::Vector(_)));
    }
}
