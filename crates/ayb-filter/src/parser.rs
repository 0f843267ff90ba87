//! Recursive-descent parser over the filter grammar's token stream.

use crate::ast::{CompareOp, Expr, Literal};
use crate::lexer::{Lexer, Token};
use ayb_error::AybError;

/// Nesting deeper than this fails with 400 "too deeply nested" — a filter
/// this deep is almost always a client bug, not a legitimate query.
const MAX_DEPTH: usize = 10;

/// Raw expression text longer than this fails with 400 "filter expression
/// too long" before tokenizing even starts.
const MAX_EXPR_LEN: usize = 2000;

/// `IN (...)` lists longer than this fail with 400.
const MAX_IN_LIST_LEN: usize = 200;

pub fn parse(input: &str) -> Result<Expr, AybError> {
    if input.len() > MAX_EXPR_LEN {
        return Err(AybError::Validation("filter expression too long".into()));
    }
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let expr = parser.parse_or(0)?;
    if parser.pos != parser.tokens.len() {
        return Err(AybError::Validation("unexpected trailing input in filter expression".into()));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn check_depth(depth: usize) -> Result<(), AybError> {
        if depth > MAX_DEPTH {
            Err(AybError::Validation("filter expression too deeply nested".into()))
        } else {
            Ok(())
        }
    }

    // or ::= and (("||"|"OR") and)*
    fn parse_or(&mut self, depth: usize) -> Result<Expr, AybError> {
        Self::check_depth(depth)?;
        let mut parts = vec![self.parse_and(depth + 1)?];
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            parts.push(self.parse_and(depth + 1)?);
        }
        Ok(if parts.len() == 1 { parts.remove(0) } else { Expr::Or(parts) })
    }

    // and ::= not (("&&"|"AND") not)*
    fn parse_and(&mut self, depth: usize) -> Result<Expr, AybError> {
        Self::check_depth(depth)?;
        let mut parts = vec![self.parse_not(depth + 1)?];
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            parts.push(self.parse_not(depth + 1)?);
        }
        Ok(if parts.len() == 1 { parts.remove(0) } else { Expr::And(parts) })
    }

    // not ::= "(" or ")" | atom
    fn parse_not(&mut self, depth: usize) -> Result<Expr, AybError> {
        Self::check_depth(depth)?;
        if matches!(self.peek(), Some(Token::LParen)) {
            self.advance();
            let inner = self.parse_or(depth + 1)?;
            match self.advance() {
                Some(Token::RParen) => Ok(inner),
                _ => Err(AybError::Validation("expected closing parenthesis in filter expression".into())),
            }
        } else {
            self.parse_atom()
        }
    }

    // atom ::= ident op literal | ident "IN" "(" literal ("," literal)* ")"
    fn parse_atom(&mut self) -> Result<Expr, AybError> {
        let column = match self.advance() {
            Some(Token::Ident(name)) => name.clone(),
            _ => return Err(AybError::Validation("expected column identifier in filter expression".into())),
        };

        match self.advance() {
            Some(Token::Op(op)) => {
                let value = self.parse_literal()?;
                Ok(Expr::Compare { column, op: *op, value })
            }
            Some(Token::In) => {
                match self.advance() {
                    Some(Token::LParen) => {}
                    _ => return Err(AybError::Validation("expected '(' after IN".into())),
                }
                let mut values = vec![self.parse_literal()?];
                while matches!(self.peek(), Some(Token::Comma)) {
                    self.advance();
                    if values.len() >= MAX_IN_LIST_LEN {
                        return Err(AybError::Validation("IN list too long".into()));
                    }
                    values.push(self.parse_literal()?);
                }
                match self.advance() {
                    Some(Token::RParen) => {}
                    _ => return Err(AybError::Validation("expected closing parenthesis after IN list".into())),
                }
                Ok(Expr::In { column, values })
            }
            _ => Err(AybError::Validation(format!("expected an operator or IN after column '{column}'"))),
        }
    }

    fn parse_literal(&mut self) -> Result<Literal, AybError> {
        match self.advance() {
            Some(Token::Literal(lit)) => Ok(lit.clone()),
            _ => Err(AybError::Validation("expected a literal value in filter expression".into())),
        }
    }
}

impl CompareOp {
    #[must_use]
    pub fn sql_operator(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_comparison() {
        let expr = parse("age >= 18").unwrap();
        assert_eq!(
            expr,
            Expr::Compare {
                column: "age".into(),
                op: CompareOp::Ge,
                value: Literal::Num(18.0),
            }
        );
    }

    #[test]
    fn parses_and_or_precedence() {
        // AND binds tighter than OR: a || b && c  ==  a || (b && c)
        let expr = parse("a = 1 || b = 2 && c = 3").unwrap();
        match expr {
            Expr::Or(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(parts[1], Expr::And(_)));
            }
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn parses_parenthesized_group() {
        let expr = parse("(a = 1 || b = 2) && c = 3").unwrap();
        assert!(matches!(expr, Expr::And(_)));
    }

    #[test]
    fn parses_in_list() {
        let expr = parse("status IN ('active', 'pending')").unwrap();
        match expr {
            Expr::In { column, values } => {
                assert_eq!(column, "status");
                assert_eq!(values.len(), 2);
            }
            other => panic!("expected In, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_operator_token() {
        assert!(parse("a % 1").is_err());
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse("a = 1 b = 2").is_err());
    }

    #[test]
    fn rejects_too_long_expression() {
        let long = format!("a = 1{}", " || a = 1".repeat(1000));
        assert!(parse(&long).is_err());
    }

    #[test]
    fn rejects_too_deeply_nested() {
        let mut expr = "a = 1".to_string();
        for _ in 0..30 {
            expr = format!("({expr})");
        }
        assert!(parse(&expr).is_err());
    }

    #[test]
    fn rejects_too_long_in_list() {
        let items: Vec<String> = (0..300).map(|i| i.to_string()).collect();
        let expr = format!("a IN ({})", items.join(", "));
        assert!(parse(&expr).is_err());
    }
}
