//! Expression grammar, precedence-climbing recursive descent.
//!
//! Precedence (loosest to tightest): `||`, `&&`, equality, relational,
//! additive, multiplicative, unary, postfix (`.field`, `[index]`), primary.

use crate::ast::{BinOp, Expr, Literal};
use crate::error::ElabError;
use crate::lexer::Token;

use super::Parser;

pub(super) fn parse_expr(p: &mut Parser) -> Result<Expr, ElabError> {
    parse_or(p)
}

fn parse_or(p: &mut Parser) -> Result<Expr, ElabError> {
    let mut left = parse_and(p)?;
    while p.peek() == &Token::OrOr {
        let line = p.line();
        p.advance();
        let right = parse_and(p)?;
        left = Expr::BinaryOp(BinOp::Or, Box::new(left), Box::new(right), p.loc(line));
    }
    Ok(left)
}

fn parse_and(p: &mut Parser) -> Result<Expr, ElabError> {
    let mut left = parse_equality(p)?;
    while p.peek() == &Token::AndAnd {
        let line = p.line();
        p.advance();
        let right = parse_equality(p)?;
        left = Expr::BinaryOp(BinOp::And, Box::new(left), Box::new(right), p.loc(line));
    }
    Ok(left)
}

fn parse_equality(p: &mut Parser) -> Result<Expr, ElabError> {
    let mut left = parse_relational(p)?;
    loop {
        let op = match p.peek() {
            Token::EqEq => BinOp::Eq,
            Token::NotEq => BinOp::Neq,
            _ => break,
        };
        let line = p.line();
        p.advance();
        let right = parse_relational(p)?;
        left = Expr::BinaryOp(op, Box::new(left), Box::new(right), p.loc(line));
    }
    Ok(left)
}

fn parse_relational(p: &mut Parser) -> Result<Expr, ElabError> {
    let mut left = parse_additive(p)?;
    loop {
        let op = match p.peek() {
            Token::Lt => BinOp::Lt,
            Token::Lte => BinOp::Lte,
            Token::Gt => BinOp::Gt,
            Token::Gte => BinOp::Gte,
            _ => break,
        };
        let line = p.line();
        p.advance();
        let right = parse_additive(p)?;
        left = Expr::BinaryOp(op, Box::new(left), Box::new(right), p.loc(line));
    }
    Ok(left)
}

fn parse_additive(p: &mut Parser) -> Result<Expr, ElabError> {
    let mut left = parse_multiplicative(p)?;
    loop {
        let op = match p.peek() {
            Token::Plus => BinOp::Add,
            Token::Minus => BinOp::Sub,
            _ => break,
        };
        let line = p.line();
        p.advance();
        let right = parse_multiplicative(p)?;
        left = Expr::BinaryOp(op, Box::new(left), Box::new(right), p.loc(line));
    }
    Ok(left)
}

fn parse_multiplicative(p: &mut Parser) -> Result<Expr, ElabError> {
    let mut left = parse_unary(p)?;
    loop {
        let op = match p.peek() {
            Token::Star => BinOp::Mul,
            Token::Slash => BinOp::Div,
            Token::Percent => BinOp::Mod,
            _ => break,
        };
        let line = p.line();
        p.advance();
        let right = parse_unary(p)?;
        left = Expr::BinaryOp(op, Box::new(left), Box::new(right), p.loc(line));
    }
    Ok(left)
}

fn parse_unary(p: &mut Parser) -> Result<Expr, ElabError> {
    let line = p.line();
    match p.peek() {
        Token::Bang => {
            p.advance();
            let inner = parse_unary(p)?;
            Ok(Expr::Not(Box::new(inner), p.loc(line)))
        }
        Token::Minus => {
            p.advance();
            let inner = parse_unary(p)?;
            Ok(Expr::Neg(Box::new(inner), p.loc(line)))
        }
        _ => parse_postfix(p),
    }
}

fn parse_postfix(p: &mut Parser) -> Result<Expr, ElabError> {
    let mut expr = parse_primary(p)?;
    loop {
        match p.peek() {
            Token::LBracket => {
                let line = p.line();
                p.advance();
                let index = parse_expr(p)?;
                p.expect(&Token::RBracket, "']'")?;
                expr = Expr::Index(Box::new(expr), Box::new(index), p.loc(line));
            }
            Token::Dot => {
                let line = p.line();
                p.advance();
                if p.peek() == &Token::LAngle {
                    expr = parse_attribute_access(p, Some(expr), line)?;
                } else {
                    let field = p.expect_ident()?;
                    expr = Expr::FieldAccess(Box::new(expr), field, p.loc(line));
                }
            }
            _ => break,
        }
    }
    Ok(expr)
}

/// `entity.<name(args)>` when `entity` is `Some`, or `<name(args)>` (environment form)
/// when `entity` is `None`. Called with the cursor positioned at `<`.
fn parse_attribute_access(p: &mut Parser, entity: Option<Expr>, line: u32) -> Result<Expr, ElabError> {
    p.expect(&Token::LAngle, "'<'")?;
    let mut segments = vec![p.expect_ident()?];
    while p.peek() == &Token::Dot {
        p.advance();
        segments.push(p.expect_ident()?);
    }
    let name = segments.join(".");
    let args = if p.peek() == &Token::LParen {
        parse_arg_list(p)?
    } else {
        Vec::new()
    };
    p.expect(&Token::RAngle, "'>'")?;
    Ok(Expr::AttributeAccess { entity: entity.map(Box::new), name, args, location: p.loc(line) })
}

fn parse_arg_list(p: &mut Parser) -> Result<Vec<Expr>, ElabError> {
    p.expect(&Token::LParen, "'('")?;
    let mut args = Vec::new();
    if p.peek() != &Token::RParen {
        loop {
            args.push(parse_expr(p)?);
            if p.peek() == &Token::Comma {
                p.advance();
                continue;
            }
            break;
        }
    }
    p.expect(&Token::RParen, "')'")?;
    Ok(args)
}

fn parse_primary(p: &mut Parser) -> Result<Expr, ElabError> {
    let line = p.line();
    match p.peek().clone() {
        Token::Number(text) => {
            p.advance();
            Ok(Expr::Literal(Literal::Number(text), p.loc(line)))
        }
        Token::Str(text) => {
            p.advance();
            Ok(Expr::Literal(Literal::Text(text), p.loc(line)))
        }
        Token::LParen => {
            p.advance();
            let inner = parse_expr(p)?;
            p.expect(&Token::RParen, "')'")?;
            Ok(inner)
        }
        Token::LBracket => {
            p.advance();
            let mut items = Vec::new();
            if p.peek() != &Token::RBracket {
                loop {
                    items.push(parse_expr(p)?);
                    if p.peek() == &Token::Comma {
                        p.advance();
                        continue;
                    }
                    break;
                }
            }
            p.expect(&Token::RBracket, "']'")?;
            Ok(Expr::ArrayLit(items, p.loc(line)))
        }
        Token::LBrace => {
            p.advance();
            let mut fields = Vec::new();
            if p.peek() != &Token::RBrace {
                loop {
                    let key = p.expect_string()?;
                    p.expect(&Token::Colon, "':'")?;
                    fields.push((key, parse_expr(p)?));
                    if p.peek() == &Token::Comma {
                        p.advance();
                        continue;
                    }
                    break;
                }
            }
            p.expect(&Token::RBrace, "'}'")?;
            Ok(Expr::ObjectLit(fields, p.loc(line)))
        }
        Token::At => {
            p.advance();
            Ok(Expr::RelativeSelf(p.loc(line)))
        }
        Token::Hash => {
            p.advance();
            Ok(Expr::RelativeKey(p.loc(line)))
        }
        Token::LAngle => parse_attribute_access(p, None, line),
        Token::Word(w) => parse_word_primary(p, w, line),
        other => Err(p.err(format!("unexpected token in expression: {:?}", other))),
    }
}

fn parse_word_primary(p: &mut Parser, first: String, line: u32) -> Result<Expr, ElabError> {
    match first.as_str() {
        "true" => {
            p.advance();
            return Ok(Expr::Literal(Literal::Bool(true), p.loc(line)));
        }
        "false" => {
            p.advance();
            return Ok(Expr::Literal(Literal::Bool(false), p.loc(line)));
        }
        "null" => {
            p.advance();
            return Ok(Expr::Literal(Literal::Null, p.loc(line)));
        }
        _ => {}
    }

    p.advance();
    let mut segments = vec![first];
    // Collect a dotted namespace chain, but stop before a `.< ... >` attribute suffix --
    // that is handled by the generic postfix loop so `entity.<attr>` composes uniformly.
    while p.peek() == &Token::Dot {
        let after_dot = p.peek_at(1);
        if after_dot == &Token::LAngle {
            break;
        }
        p.advance();
        segments.push(p.expect_ident()?);
    }

    if p.peek() == &Token::LParen {
        let args = parse_arg_list(p)?;
        let name = segments.pop().expect("at least one segment");
        let library = if segments.is_empty() { None } else { Some(segments.join(".")) };
        return Ok(Expr::FunctionCall { library, name, args, location: p.loc(line) });
    }

    // Plain variable, or a dotted field-access chain on it.
    let mut expr = Expr::Var(segments[0].clone(), p.loc(line));
    for seg in &segments[1..] {
        expr = Expr::FieldAccess(Box::new(expr), seg.clone(), p.loc(line));
    }
    Ok(expr)
}
