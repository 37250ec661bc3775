//! Hand-written lexer for the policy/set source grammar (spec.md §6).
//!
//! Grammar surface:
//! ```text
//! policy <name> (permit|deny) [where stmt (";" stmt)* ";"] [obligation expr]* [advice expr]* [transform expr]
//! set <name> (<algorithm>) (policy | set)*
//! ```

use crate::error::ElabError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identifiers and keywords -- the parser tells them apart.
    Word(String),
    /// Quoted string literal, escapes resolved.
    Str(String),
    /// Decimal literal, kept as text to preserve exact digits (parsed into `Decimal` later).
    Number(String),
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    LAngle,
    RAngle,
    Dot,
    Comma,
    Colon,
    Semicolon,
    At,   // @  (relative accessor, transform-only)
    Hash, // #  (relative accessor, transform-only)
    // Comparison
    Assign,
    EqEq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    // Logical
    AndAnd,
    OrOr,
    Bang,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: u32,
}

pub fn lex(src: &str, document_name: &str) -> Result<Vec<Spanned>, ElabError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut pos = 0usize;
    let mut line: u32 = 1;

    while pos < chars.len() {
        let c = chars[pos];

        if c == '/' && pos + 1 < chars.len() && chars[pos + 1] == '/' {
            while pos < chars.len() && chars[pos] != '\n' {
                pos += 1;
            }
            continue;
        }

        if c.is_whitespace() {
            if c == '\n' {
                line += 1;
            }
            pos += 1;
            continue;
        }

        let tok_line = line;

        if c == '"' {
            pos += 1;
            let mut s = String::new();
            loop {
                if pos >= chars.len() {
                    return Err(ElabError::lex(document_name, tok_line, "unterminated string literal"));
                }
                let sc = chars[pos];
                if sc == '"' {
                    pos += 1;
                    break;
                }
                if sc == '\\' {
                    pos += 1;
                    if pos >= chars.len() {
                        return Err(ElabError::lex(document_name, tok_line, "unterminated escape in string"));
                    }
                    let esc = chars[pos];
                    s.push(match esc {
                        'n' => '\n',
                        't' => '\t',
                        '"' => '"',
                        '\\' => '\\',
                        other => other,
                    });
                    pos += 1;
                    continue;
                }
                s.push(sc);
                pos += 1;
            }
            tokens.push(Spanned { token: Token::Str(s), line: tok_line });
            continue;
        }

        if c.is_ascii_digit() {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                pos += 1;
            }
            let text: String = chars[start..pos].iter().collect();
            tokens.push(Spanned { token: Token::Number(text), line: tok_line });
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            let text: String = chars[start..pos].iter().collect();
            tokens.push(Spanned { token: Token::Word(text), line: tok_line });
            continue;
        }

        macro_rules! two {
            ($next:expr, $double:expr, $single:expr) => {{
                if pos + 1 < chars.len() && chars[pos + 1] == $next {
                    pos += 2;
                    $double
                } else {
                    pos += 1;
                    $single
                }
            }};
        }

        let tok = match c {
            '{' => { pos += 1; Token::LBrace }
            '}' => { pos += 1; Token::RBrace }
            '[' => { pos += 1; Token::LBracket }
            ']' => { pos += 1; Token::RBracket }
            '(' => { pos += 1; Token::LParen }
            ')' => { pos += 1; Token::RParen }
            '<' => two!('=', Token::Lte, Token::LAngle),
            '>' => two!('=', Token::Gte, Token::RAngle),
            '.' => { pos += 1; Token::Dot }
            ',' => { pos += 1; Token::Comma }
            ':' => { pos += 1; Token::Colon }
            ';' => { pos += 1; Token::Semicolon }
            '@' => { pos += 1; Token::At }
            '#' => { pos += 1; Token::Hash }
            '=' => two!('=', Token::EqEq, Token::Assign),
            '!' => two!('=', Token::NotEq, Token::Bang),
            '+' => { pos += 1; Token::Plus }
            '-' => { pos += 1; Token::Minus }
            '*' => { pos += 1; Token::Star }
            '/' => { pos += 1; Token::Slash }
            '%' => { pos += 1; Token::Percent }
            '&' => two!('&', Token::AndAnd, return Err(ElabError::lex(document_name, tok_line, "expected '&&'"))),
            '|' => two!('|', Token::OrOr, return Err(ElabError::lex(document_name, tok_line, "expected '||'"))),
            other => {
                return Err(ElabError::lex(
                    document_name,
                    tok_line,
                    format!("unexpected character '{}'", other),
                ))
            }
        };
        tokens.push(Spanned { token: tok, line: tok_line });
    }

    tokens.push(Spanned { token: Token::Eof, line });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(src: &str) -> Vec<Token> {
        lex(src, "test.warden").unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn lexes_policy_header() {
        let toks = words(r#"policy "p" permit"#);
        assert_eq!(
            toks,
            vec![
                Token::Word("policy".into()),
                Token::Str("p".into()),
                Token::Word("permit".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn lexes_comparison_and_logical_operators() {
        let toks = words("a == b && c != d || !e");
        assert!(toks.contains(&Token::EqEq));
        assert!(toks.contains(&Token::AndAnd));
        assert!(toks.contains(&Token::NotEq));
        assert!(toks.contains(&Token::OrOr));
        assert!(toks.contains(&Token::Bang));
    }

    #[test]
    fn lexes_attribute_angle_brackets() {
        let toks = words("subject.<sensor.online>");
        assert!(toks.contains(&Token::LAngle));
        assert!(toks.contains(&Token::RAngle));
        assert!(toks.contains(&Token::Dot));
    }

    #[test]
    fn unterminated_string_is_lex_error() {
        let err = lex("\"abc", "test.warden").unwrap_err();
        assert_eq!(err.stage, crate::error::Stage::Lex);
    }

    #[test]
    fn line_numbers_advance_on_newline() {
        let toks = lex("a\nb\nc", "test.warden").unwrap();
        assert_eq!(toks[0].line, 1);
        assert_eq!(toks[1].line, 2);
        assert_eq!(toks[2].line, 3);
    }
}
