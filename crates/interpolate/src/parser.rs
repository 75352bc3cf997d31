//! Lexer and recursive-descent parser for templates and expressions

use crate::ast::{BinaryOp, Expr, Part, Reference, UnaryOp};
use crate::error::Cause;
use schema::Value;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    /// Identifier or dotted reference path
    Path(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Question,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    /// Closes the enclosing `${`
    RBrace,
    Eof,
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str, pos: usize) -> Self {
        Self { src, pos }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn error(&self, message: impl Into<String>) -> Cause {
        Cause::Parse {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn next_token(&mut self) -> Result<(usize, Token), Cause> {
        self.skip_whitespace();
        let start = self.pos;
        let Some(c) = self.peek_char() else {
            return Ok((start, Token::Eof));
        };

        if c.is_ascii_digit() {
            return self.number().map(|token| (start, token));
        }
        if is_ident_start(c) {
            return Ok((start, self.path()));
        }
        if c == '"' {
            return self.string().map(|token| (start, token));
        }

        let two = self.rest().get(..2).unwrap_or_default();
        let token = match two {
            "==" => Some(Token::EqEq),
            "!=" => Some(Token::NotEq),
            "<=" => Some(Token::Le),
            ">=" => Some(Token::Ge),
            "&&" => Some(Token::AndAnd),
            "||" => Some(Token::OrOr),
            _ => None,
        };
        if let Some(token) = token {
            self.pos += 2;
            return Ok((start, token));
        }

        let token = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ',' => Token::Comma,
            '?' => Token::Question,
            ':' => Token::Colon,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '!' => Token::Bang,
            '<' => Token::Lt,
            '>' => Token::Gt,
            '}' => Token::RBrace,
            other => return Err(self.error(format!("unexpected character {other:?}"))),
        };
        self.pos += c.len_utf8();
        Ok((start, token))
    }

    fn number(&mut self) -> Result<Token, Cause> {
        let start = self.pos;
        let mut seen_dot = false;
        while let Some(c) = self.peek_char() {
            let next_is_digit = self.rest()[1..]
                .chars()
                .next()
                .is_some_and(|n| n.is_ascii_digit());
            if c.is_ascii_digit() {
                self.pos += 1;
            } else if c == '.' && !seen_dot && next_is_digit {
                seen_dot = true;
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = &self.src[start..self.pos];
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| self.error(format!("invalid number {text}")))
    }

    /// Identifier with optional `.segment` continuations, where a segment is
    /// an identifier, an index, or the `#`/`%` count markers
    fn path(&mut self) -> Token {
        let start = self.pos;
        self.eat_while(is_ident_char);
        loop {
            let rest = self.rest();
            let mut chars = rest.chars();
            if chars.next() != Some('.') {
                break;
            }
            match chars.next() {
                Some(c) if is_ident_char(c) => {
                    self.pos += 1;
                    self.eat_while(is_ident_char);
                }
                Some('#' | '%' | '*') => self.pos += 2,
                _ => break,
            }
        }
        Token::Path(self.src[start..self.pos].to_string())
    }

    fn eat_while(&mut self, pred: fn(char) -> bool) {
        while let Some(c) = self.peek_char() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn string(&mut self) -> Result<Token, Cause> {
        let open = self.pos;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(c) = self.peek_char() else {
                self.pos = open;
                return Err(self.error("unterminated string"));
            };
            self.pos += c.len_utf8();
            match c {
                '"' => return Ok(Token::Str(out)),
                '\\' => {
                    let Some(escaped) = self.peek_char() else {
                        continue;
                    };
                    self.pos += escaped.len_utf8();
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        other => out.push(other),
                    }
                }
                other => out.push(other),
            }
        }
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    current_pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, pos: usize) -> Result<Self, Cause> {
        let mut lexer = Lexer::new(src, pos);
        let (current_pos, current) = lexer.next_token()?;
        Ok(Self {
            lexer,
            current,
            current_pos,
        })
    }

    fn advance(&mut self) -> Result<Token, Cause> {
        let (pos, next) = self.lexer.next_token()?;
        self.current_pos = pos;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn error(&self, message: impl Into<String>) -> Cause {
        Cause::Parse {
            offset: self.current_pos,
            message: message.into(),
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), Cause> {
        if &self.current == token {
            self.advance()?;
            Ok(())
        } else {
            Err(self.error(format!("expected {what}, found {:?}", self.current)))
        }
    }

    fn expression(&mut self) -> Result<Expr, Cause> {
        let cond = self.or()?;
        if self.current != Token::Question {
            return Ok(cond);
        }
        self.advance()?;
        let then = self.expression()?;
        self.expect(&Token::Colon, "':'")?;
        let otherwise = self.expression()?;
        Ok(Expr::Conditional {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, Cause>,
        ops: &[(Token, BinaryOp)],
    ) -> Result<Expr, Cause> {
        let mut left = next(self)?;
        while let Some(op) = ops
            .iter()
            .find(|(token, _)| *token == self.current)
            .map(|(_, op)| *op)
        {
            self.advance()?;
            let right = next(self)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn or(&mut self) -> Result<Expr, Cause> {
        self.binary_level(Self::and, &[(Token::OrOr, BinaryOp::Or)])
    }

    fn and(&mut self) -> Result<Expr, Cause> {
        self.binary_level(Self::equality, &[(Token::AndAnd, BinaryOp::And)])
    }

    fn equality(&mut self) -> Result<Expr, Cause> {
        self.binary_level(
            Self::comparison,
            &[(Token::EqEq, BinaryOp::Eq), (Token::NotEq, BinaryOp::NotEq)],
        )
    }

    fn comparison(&mut self) -> Result<Expr, Cause> {
        self.binary_level(
            Self::additive,
            &[
                (Token::Lt, BinaryOp::Lt),
                (Token::Le, BinaryOp::Le),
                (Token::Gt, BinaryOp::Gt),
                (Token::Ge, BinaryOp::Ge),
            ],
        )
    }

    fn additive(&mut self) -> Result<Expr, Cause> {
        self.binary_level(
            Self::multiplicative,
            &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
        )
    }

    fn multiplicative(&mut self) -> Result<Expr, Cause> {
        self.binary_level(
            Self::unary,
            &[
                (Token::Star, BinaryOp::Mul),
                (Token::Slash, BinaryOp::Div),
                (Token::Percent, BinaryOp::Rem),
            ],
        )
    }

    fn unary(&mut self) -> Result<Expr, Cause> {
        let op = match self.current {
            Token::Minus => UnaryOp::Neg,
            Token::Bang => UnaryOp::Not,
            _ => return self.postfix(),
        };
        self.advance()?;
        let expr = self.unary()?;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn postfix(&mut self) -> Result<Expr, Cause> {
        let mut expr = self.primary()?;
        while self.current == Token::LBracket {
            self.advance()?;
            let index = self.expression()?;
            self.expect(&Token::RBracket, "']'")?;
            expr = Expr::Index {
                target: Box::new(expr),
                index: Box::new(index),
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, Cause> {
        match self.advance()? {
            Token::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::LParen => {
                let expr = self.expression()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(expr)
            }
            Token::LBracket => {
                let items = self.list(&Token::RBracket, "']'")?;
                Ok(Expr::List(items))
            }
            Token::Path(path) => self.path(path),
            other => Err(self.error(format!("unexpected {other:?}"))),
        }
    }

    fn path(&mut self, path: String) -> Result<Expr, Cause> {
        match path.as_str() {
            "true" => return Ok(Expr::Literal(Value::Bool(true))),
            "false" => return Ok(Expr::Literal(Value::Bool(false))),
            _ => {}
        }
        if self.current == Token::LParen {
            if path.contains('.') {
                return Err(self.error(format!("invalid function name {path}")));
            }
            self.advance()?;
            let args = self.list(&Token::RParen, "')'")?;
            return Ok(Expr::Call { name: path, args });
        }
        Reference::parse(&path)
            .map(Expr::Reference)
            .ok_or_else(|| self.error(format!("invalid reference {path}")))
    }

    /// Comma-separated expressions up to `close`, which is consumed
    fn list(&mut self, close: &Token, what: &str) -> Result<Vec<Expr>, Cause> {
        let mut items = Vec::new();
        if &self.current == close {
            self.advance()?;
            return Ok(items);
        }
        loop {
            items.push(self.expression()?);
            if self.current == Token::Comma {
                self.advance()?;
                continue;
            }
            self.expect(close, what)?;
            return Ok(items);
        }
    }
}

/// Parse a standalone expression (without `${ }`)
pub fn parse_expression(src: &str) -> Result<Expr, Cause> {
    let mut parser = Parser::new(src, 0)?;
    let expr = parser.expression()?;
    if parser.current != Token::Eof {
        return Err(parser.error(format!("unexpected {:?}", parser.current)));
    }
    Ok(expr)
}

/// Split a template into literal text and `${...}` expressions
pub fn parse_template(src: &str) -> Result<Vec<Part>, Cause> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut pos = 0;

    while pos < src.len() {
        let rest = &src[pos..];
        if rest.starts_with("$${") {
            literal.push_str("${");
            pos += 3;
            continue;
        }
        if rest.starts_with("${") {
            if !literal.is_empty() {
                parts.push(Part::Literal(std::mem::take(&mut literal)));
            }
            let start = pos + 2;
            let mut parser = Parser::new(src, start)?;
            let expr = parser.expression()?;
            if parser.current != Token::RBrace {
                return Err(parser.error("expected '}' to close interpolation"));
            }
            let end = parser.current_pos;
            parts.push(Part::Expr {
                expr,
                source: src[start..end].trim().to_string(),
            });
            pos = end + 1;
            continue;
        }
        let Some(c) = rest.chars().next() else {
            break;
        };
        literal.push(c);
        pos += c.len_utf8();
    }
    if !literal.is_empty() {
        parts.push(Part::Literal(literal));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(path: &str) -> Expr {
        Expr::Reference(Reference::parse(path).unwrap())
    }

    #[test]
    fn literal_only_template() {
        assert_eq!(
            parse_template("plain text").unwrap(),
            vec![Part::Literal("plain text".to_string())]
        );
        assert_eq!(parse_template("").unwrap(), vec![]);
    }

    #[test]
    fn mixed_template() {
        let parts = parse_template("http://${aws_instance.web.ip}:8080").unwrap();
        assert_eq!(
            parts,
            vec![
                Part::Literal("http://".to_string()),
                Part::Expr {
                    expr: reference("aws_instance.web.ip"),
                    source: "aws_instance.web.ip".to_string(),
                },
                Part::Literal(":8080".to_string()),
            ]
        );
    }

    #[test]
    fn escaped_interpolation() {
        assert_eq!(
            parse_template("$${literal}").unwrap(),
            vec![Part::Literal("${literal}".to_string())]
        );
    }

    #[test]
    fn precedence() {
        let expr = parse_expression("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Add,
                left: Box::new(Expr::Literal(Value::Number(1.0))),
                right: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    left: Box::new(Expr::Literal(Value::Number(2.0))),
                    right: Box::new(Expr::Literal(Value::Number(3.0))),
                }),
            }
        );
    }

    #[test]
    fn calls_and_counts() {
        let expr = parse_expression("length(test_resource.a.list.#)").unwrap();
        assert_eq!(
            expr,
            Expr::Call {
                name: "length".to_string(),
                args: vec![reference("test_resource.a.list.#")],
            }
        );
    }

    #[test]
    fn strings_inside_expressions_may_contain_braces() {
        let parts = parse_template(r#"${upper("}")}"#).unwrap();
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn conditional_and_index() {
        let expr = parse_expression(r#"var.on ? ["a", "b"][1] : "c""#).unwrap();
        assert!(matches!(expr, Expr::Conditional { .. }));
    }

    #[test]
    fn errors() {
        assert!(matches!(
            parse_template("${"),
            Err(Cause::Parse { .. })
        ));
        assert!(parse_template("${a.b}").is_err());
        assert!(parse_template("${1 +}").is_err());
        assert!(parse_template("${upper(\"x\"}").is_err());
        assert!(parse_expression("\"open").is_err());
    }
}
