// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! SPDX license expression grammar (`MIT OR Apache-2.0`, `GPL-2.0-only WITH
//! Classpath-exception-2.0`, parenthesised compounds).
//!
//! Precedence: `WITH` binds tighter than `AND`, which binds tighter than `OR`.
//! Operator chains are flat, so tree depth only grows with parenthesis nesting,
//! which is capped at [`MAX_NESTING`].

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

// `idstring` with the optional `DocumentRef-...:` prefix and `+` suffix.
static IDENTIFIER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(DocumentRef-[A-Za-z0-9.\-]+:)?[A-Za-z0-9.\-]+\+?$").ok()
});

/// Deepest parenthesis nesting accepted by [`SpdxExpression::parse`].
pub const MAX_NESTING: usize = 64;

fn is_identifier(word: &str) -> bool {
    IDENTIFIER.as_ref().is_some_and(|re| re.is_match(word))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpdxError {
    #[error("empty license expression")]
    Empty,
    #[error("invalid license identifier {0:?}")]
    InvalidIdentifier(String),
    #[error("unexpected {0} in license expression")]
    UnexpectedToken(String),
    #[error("unexpected end of license expression")]
    UnexpectedEnd,
    #[error("missing closing parenthesis")]
    UnbalancedParenthesis,
    #[error("license expression nested deeper than {} levels", MAX_NESTING)]
    TooDeep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpdxExpression {
    License(String),
    WithException { license: String, exception: String },
    /// Two or more operands.
    And(Vec<SpdxExpression>),
    /// Two or more operands.
    Or(Vec<SpdxExpression>),
}

impl SpdxExpression {
    /// Parse an expression.
    ///
    /// # Errors
    /// Returns an `SpdxError` describing the first grammar violation.
    pub fn parse(input: &str) -> Result<Self, SpdxError> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(SpdxError::Empty);
        }
        let (expr, rest) = parse_or(&tokens, 0)?;
        match rest.first() {
            None => Ok(expr),
            Some(token) => Err(SpdxError::UnexpectedToken(token.to_string())),
        }
    }

    /// License identifiers referenced by the expression, exceptions excluded.
    #[must_use]
    pub fn licenses(&self) -> Vec<&str> {
        match self {
            Self::License(id) | Self::WithException { license: id, .. } => vec![id.as_str()],
            Self::And(terms) | Self::Or(terms) => {
                terms.iter().flat_map(SpdxExpression::licenses).collect()
            }
        }
    }

    /// Whether some choice of `OR` branches avoids every license for which
    /// `denied` holds. An `-or-later` `+` suffix is ignored when matching.
    pub fn can_avoid(&self, denied: &impl Fn(&str) -> bool) -> bool {
        match self {
            Self::License(id) | Self::WithException { license: id, .. } => {
                !denied(id.trim_end_matches('+'))
            }
            Self::And(terms) => terms.iter().all(|term| term.can_avoid(denied)),
            Self::Or(terms) => terms.iter().any(|term| term.can_avoid(denied)),
        }
    }
}

impl fmt::Display for SpdxExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::License(id) => write!(f, "{id}"),
            Self::WithException { license, exception } => write!(f, "{license} WITH {exception}"),
            Self::And(terms) => write_joined(f, terms, " AND "),
            Self::Or(terms) => write_joined(f, terms, " OR "),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, terms: &[SpdxExpression], op: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            f.write_str(op)?;
        }
        write!(f, "{term}")?;
    }
    f.write_str(")")
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Identifier(String),
    And,
    Or,
    With,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier(id) => write!(f, "identifier {id:?}"),
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
            Self::With => write!(f, "WITH"),
            Self::LParen => write!(f, "'('"),
            Self::RParen => write!(f, "')'"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, SpdxError> {
    let spaced = input.replace('(', " ( ").replace(')', " ) ");
    spaced
        .split_whitespace()
        .map(|word| match word {
            "(" => Ok(Token::LParen),
            ")" => Ok(Token::RParen),
            _ => match word.to_ascii_uppercase().as_str() {
                "AND" => Ok(Token::And),
                "OR" => Ok(Token::Or),
                "WITH" => Ok(Token::With),
                _ if is_identifier(word) => Ok(Token::Identifier(word.to_string())),
                _ => Err(SpdxError::InvalidIdentifier(word.to_string())),
            },
        })
        .collect()
}

type Parsed<'a> = Result<(SpdxExpression, &'a [Token]), SpdxError>;

fn parse_or(tokens: &[Token], depth: usize) -> Parsed<'_> {
    let (first, mut rest) = parse_and(tokens, depth)?;
    let mut terms = vec![first];
    while rest.first() == Some(&Token::Or) {
        let (term, r) = parse_and(&rest[1..], depth)?;
        terms.push(term);
        rest = r;
    }
    Ok((collapse(terms, SpdxExpression::Or), rest))
}

fn parse_and(tokens: &[Token], depth: usize) -> Parsed<'_> {
    let (first, mut rest) = parse_with(tokens, depth)?;
    let mut terms = vec![first];
    while rest.first() == Some(&Token::And) {
        let (term, r) = parse_with(&rest[1..], depth)?;
        terms.push(term);
        rest = r;
    }
    Ok((collapse(terms, SpdxExpression::And), rest))
}

fn collapse(
    mut terms: Vec<SpdxExpression>,
    compound: fn(Vec<SpdxExpression>) -> SpdxExpression,
) -> SpdxExpression {
    if terms.len() == 1 {
        if let Some(only) = terms.pop() {
            return only;
        }
    }
    compound(terms)
}

fn parse_with(tokens: &[Token], depth: usize) -> Parsed<'_> {
    let (base, rest) = parse_primary(tokens, depth)?;
    if rest.first() != Some(&Token::With) {
        return Ok((base, rest));
    }
    let SpdxExpression::License(license) = base else {
        return Err(SpdxError::UnexpectedToken(Token::With.to_string()));
    };
    match rest.get(1) {
        Some(Token::Identifier(exception)) => Ok((
            SpdxExpression::WithException {
                license,
                exception: exception.clone(),
            },
            &rest[2..],
        )),
        Some(token) => Err(SpdxError::UnexpectedToken(token.to_string())),
        None => Err(SpdxError::UnexpectedEnd),
    }
}

fn parse_primary(tokens: &[Token], depth: usize) -> Parsed<'_> {
    match tokens.first() {
        None => Err(SpdxError::UnexpectedEnd),
        Some(Token::LParen) if depth >= MAX_NESTING => Err(SpdxError::TooDeep),
        Some(Token::LParen) => {
            let (expr, rest) = parse_or(&tokens[1..], depth + 1)?;
            match rest.first() {
                Some(Token::RParen) => Ok((expr, &rest[1..])),
                _ => Err(SpdxError::UnbalancedParenthesis),
            }
        }
        Some(Token::Identifier(id)) => Ok((SpdxExpression::License(id.clone()), &tokens[1..])),
        Some(token) => Err(SpdxError::UnexpectedToken(token.to_string())),
    }
}
