use serde_json::json;
use twin_types::{TqlError, WILDCARD};

use crate::ast::{BinOp, Expr, Projection, PropertyRef, Rule};
use crate::lexer::{tokenize, SpannedToken, Token};

/// Parse rule text into a [`Rule`]
pub fn parse(source: &str) -> Result<Rule, TqlError> {
    let tokens = tokenize(source)?;
    Parser::new(&tokens).parse_rule()
}

/// Recursive-descent parser over a token slice
pub struct Parser<'a> {
    tokens: &'a [SpannedToken],
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [SpannedToken]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    fn peek_nth(&self, n: usize) -> &Token {
        self.tokens
            .get(self.pos + n)
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.offset)
            .unwrap_or(0)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> TqlError {
        TqlError::Parse {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), TqlError> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {}, found {:?}", what, self.peek())))
        }
    }

    fn identifier(&mut self, what: &str) -> Result<String, TqlError> {
        match self.peek().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected {}, found {:?}", what, other))),
        }
    }

    pub fn parse_rule(&mut self) -> Result<Rule, TqlError> {
        self.expect(Token::Insert, "'insert'")?;
        self.expect(Token::Into, "'into'")?;
        let target = self.identifier("target entity")?;
        self.expect(Token::Select, "'select'")?;

        let mut projections = vec![self.parse_projection()?];
        while *self.peek() == Token::Comma {
            self.advance();
            projections.push(self.parse_projection()?);
        }

        if *self.peek() != Token::Eof {
            return Err(self.error(format!("unexpected trailing {:?}", self.peek())));
        }

        Ok(Rule {
            target,
            projections,
        })
    }

    fn parse_projection(&mut self) -> Result<Projection, TqlError> {
        // `<entity>.*`
        if let (Token::Identifier(entity), Token::Dot, Token::Star) =
            (self.peek(), self.peek_nth(1), self.peek_nth(2))
        {
            let entity = entity.clone();
            self.pos += 3;
            return Ok(Projection::Wildcard { entity });
        }

        let expr = self.parse_additive()?;
        let alias = if *self.peek() == Token::As {
            self.advance();
            self.parse_alias()?
        } else if let Expr::Property(r) = &expr {
            r.path.clone()
        } else {
            return Err(self.error("computed projection needs an alias"));
        };

        if alias == WILDCARD {
            return Err(self.error("alias cannot be a wildcard"));
        }
        Ok(Projection::Expr { expr, alias })
    }

    fn parse_alias(&mut self) -> Result<String, TqlError> {
        let mut alias = self.identifier("alias")?;
        while *self.peek() == Token::Dot {
            self.advance();
            alias.push('.');
            alias.push_str(&self.identifier("alias segment")?);
        }
        Ok(alias)
    }

    fn parse_additive(&mut self) -> Result<Expr, TqlError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, TqlError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, TqlError> {
        if *self.peek() == Token::Minus {
            self.advance();
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, TqlError> {
        match self.advance() {
            Token::IntLiteral(i) => Ok(Expr::Literal(json!(i))),
            Token::FloatLiteral(f) => Ok(Expr::Literal(json!(f))),
            Token::StringLiteral(s) => Ok(Expr::Literal(json!(s))),
            Token::True => Ok(Expr::Literal(json!(true))),
            Token::False => Ok(Expr::Literal(json!(false))),
            Token::Null => Ok(Expr::Literal(serde_json::Value::Null)),
            Token::LParen => {
                let inner = self.parse_additive()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Identifier(entity) => self.parse_property(entity).map(Expr::Property),
            other => {
                self.pos -= 1;
                Err(self.error(format!("unexpected {:?}", other)))
            }
        }
    }

    fn parse_property(&mut self, entity: String) -> Result<PropertyRef, TqlError> {
        self.expect(Token::Dot, "'.' after entity id")?;
        let mut path = self.identifier("property name")?;

        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    path.push('.');
                    path.push_str(&self.identifier("property name")?);
                }
                Token::LBracket => {
                    self.advance();
                    let index = match self.advance() {
                        Token::IntLiteral(i) => i,
                        _ => {
                            self.pos -= 1;
                            return Err(self.error("expected array index"));
                        }
                    };
                    self.expect(Token::RBracket, "']'")?;
                    path.push_str(&format!("[{}]", index));
                }
                _ => break,
            }
        }

        Ok(PropertyRef { entity, path })
    }
}
