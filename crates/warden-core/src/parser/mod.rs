//! Recursive-descent parser for the policy/set source grammar (spec.md §6).
//!
//! No type checking or stratum inference happens here -- that is the expression
//! compiler's job (`warden_eval::compiler::expr`). The parser only builds the AST
//! and attaches source locations.

mod expr;

use crate::ast::{
    CombiningAlgorithm, Document, Entitlement, Policy, PolicySet, Statement,
};
use crate::error::ElabError;
use crate::lexer::{lex, Spanned, Token};
use crate::source::SourceLocation;

pub struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    document_name: String,
}

/// Parse a single source document into one `Document` (policy or set).
pub fn parse_document(src: &str, document_name: &str) -> Result<Document, ElabError> {
    let tokens = lex(src, document_name)?;
    let mut parser = Parser::new(&tokens, document_name);
    let doc = parser.parse_document()?;
    parser.expect(&Token::Eof, "end of document")?;
    Ok(doc)
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Spanned], document_name: &str) -> Self {
        Parser { tokens, pos: 0, document_name: document_name.to_owned() }
    }

    fn cur(&self) -> &Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        &self.cur().token
    }

    /// Look ahead `n` tokens without consuming.
    fn peek_at(&self, n: usize) -> &Token {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[idx].token
    }

    fn line(&self) -> u32 {
        self.cur().line
    }

    fn loc(&self, start_line: u32) -> SourceLocation {
        SourceLocation::new(self.document_name.clone(), start_line, 0, 0)
    }

    fn advance(&mut self) -> Spanned {
        let t = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn err(&self, message: impl Into<String>) -> ElabError {
        ElabError::parse(&self.document_name, self.line(), message)
    }

    fn expect(&mut self, tok: &Token, what: &str) -> Result<(), ElabError> {
        if self.peek() == tok {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected {}, got {:?}", what, self.peek())))
        }
    }

    fn expect_word(&mut self, expected: &str) -> Result<u32, ElabError> {
        let line = self.line();
        if let Token::Word(w) = self.peek() {
            if w == expected {
                self.advance();
                return Ok(line);
            }
        }
        Err(self.err(format!("expected keyword '{}', got {:?}", expected, self.peek())))
    }

    fn peek_word_is(&self, expected: &str) -> bool {
        matches!(self.peek(), Token::Word(w) if w == expected)
    }

    fn expect_ident(&mut self) -> Result<String, ElabError> {
        if let Token::Word(w) = self.peek().clone() {
            self.advance();
            Ok(w)
        } else {
            Err(self.err(format!("expected identifier, got {:?}", self.peek())))
        }
    }

    fn expect_string(&mut self) -> Result<String, ElabError> {
        if let Token::Str(s) = self.peek().clone() {
            self.advance();
            Ok(s)
        } else {
            Err(self.err(format!("expected string literal, got {:?}", self.peek())))
        }
    }

    fn parse_document(&mut self) -> Result<Document, ElabError> {
        if self.peek_word_is("policy") {
            Ok(Document::Policy(self.parse_policy()?))
        } else if self.peek_word_is("set") {
            Ok(Document::PolicySet(self.parse_policy_set()?))
        } else {
            Err(self.err("expected 'policy' or 'set'"))
        }
    }

    fn parse_policy(&mut self) -> Result<Policy, ElabError> {
        let start_line = self.expect_word("policy")?;
        let location = self.loc(start_line);
        let name = self.expect_string()?;
        let entitlement = match self.expect_ident()?.as_str() {
            "permit" => Entitlement::Permit,
            "deny" => Entitlement::Deny,
            other => return Err(self.err(format!("expected 'permit' or 'deny', got '{}'", other))),
        };

        let mut body = Vec::new();
        if self.peek_word_is("where") {
            self.advance();
            loop {
                body.push(self.parse_statement()?);
                if self.peek() == &Token::Semicolon {
                    self.advance();
                    if self.peek_word_is("obligation")
                        || self.peek_word_is("advice")
                        || self.peek_word_is("transform")
                        || self.peek() == &Token::Eof
                    {
                        break;
                    }
                } else {
                    break;
                }
            }
        }

        let mut obligations = Vec::new();
        while self.peek_word_is("obligation") {
            self.advance();
            obligations.push(expr::parse_expr(self)?);
        }

        let mut advice = Vec::new();
        while self.peek_word_is("advice") {
            self.advance();
            advice.push(expr::parse_expr(self)?);
        }

        let mut transform = None;
        if self.peek_word_is("transform") {
            self.advance();
            transform = Some(expr::parse_expr(self)?);
        }

        Ok(Policy { name, entitlement, body, obligations, advice, transform, location })
    }

    fn parse_statement(&mut self) -> Result<Statement, ElabError> {
        if self.peek_word_is("var") {
            self.advance();
            let name = self.expect_ident()?;
            self.expect(&Token::Assign, "'=' (var binding)")?;
            let value = expr::parse_expr(self)?;
            Ok(Statement::VarDef(name, value))
        } else {
            Ok(Statement::Condition(expr::parse_expr(self)?))
        }
    }

    fn parse_policy_set(&mut self) -> Result<PolicySet, ElabError> {
        let start_line = self.expect_word("set")?;
        let location = self.loc(start_line);
        let name = self.expect_string()?;
        self.expect(&Token::LParen, "'(' before algorithm name")?;
        let algo_name = self.expect_ident()?;
        self.expect(&Token::RParen, "')' after algorithm name")?;
        let algorithm = CombiningAlgorithm::by_name(&algo_name)
            .ok_or_else(|| self.err(format!("unknown combining algorithm '{}'", algo_name)))?;

        let mut children = Vec::new();
        loop {
            if self.peek_word_is("policy") {
                children.push(Document::Policy(self.parse_policy()?));
            } else if self.peek_word_is("set") {
                children.push(Document::PolicySet(self.parse_policy_set()?));
            } else {
                break;
            }
        }

        Ok(PolicySet { name, algorithm, children, location })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_empty_permit_policy() {
        let doc = parse_document(r#"policy "p" permit"#, "t.warden").unwrap();
        match doc {
            Document::Policy(p) => {
                assert_eq!(p.name, "p");
                assert_eq!(p.entitlement, Entitlement::Permit);
                assert!(p.body.is_empty());
            }
            _ => panic!("expected policy"),
        }
    }

    #[test]
    fn parses_deny_with_where_and_obligation() {
        let src = r#"policy "p" deny where subject == "alice"; obligation "block""#;
        let doc = parse_document(src, "t.warden").unwrap();
        match doc {
            Document::Policy(p) => {
                assert_eq!(p.entitlement, Entitlement::Deny);
                assert_eq!(p.body.len(), 1);
                assert_eq!(p.obligations.len(), 1);
            }
            _ => panic!("expected policy"),
        }
    }

    #[test]
    fn parses_policy_set_with_algorithm_and_nesting() {
        let src = r#"
            set "root" (deny-overrides)
                policy "a" permit
                policy "b" deny
        "#;
        let doc = parse_document(src, "t.warden").unwrap();
        match doc {
            Document::PolicySet(s) => {
                assert_eq!(s.name, "root");
                assert_eq!(s.algorithm.mode, crate::ast::CombiningMode::PriorityDeny);
                assert_eq!(s.children.len(), 2);
            }
            _ => panic!("expected policy set"),
        }
    }

    #[test]
    fn unknown_algorithm_is_a_parse_error() {
        let src = r#"set "root" (made-up) policy "a" permit"#;
        assert!(parse_document(src, "t.warden").is_err());
    }

    #[test]
    fn parses_multiple_where_statements_and_var_defs() {
        let src = r#"policy "p" permit where var x = 1; x == 1; subject == "a";"#;
        let doc = parse_document(src, "t.warden").unwrap();
        match doc {
            Document::Policy(p) => assert_eq!(p.body.len(), 3),
            _ => panic!("expected policy"),
        }
    }
}
