//! Search expressions.
//!
//! Clients write ContentDirectory search criteria with bus property names
//! in place of the DIDL-Lite ones:
//!
//! ```text
//! searchCrit := '*' | orExp
//! orExp      := andExp ('or' andExp)*
//! andExp     := primary ('and' primary)*
//! primary    := '(' orExp ')' | relExp
//! relExp     := property binOp "value" | property 'exists' ('true' | 'false')
//! binOp      := '=' | '!=' | '<' | '<=' | '>' | '>='
//!             | 'contains' | 'doesNotContain' | 'derivedfrom' | 'startsWith'
//! ```
//!
//! Property names are replaced by their ContentDirectory fields and the
//! values compared with `Type` are expanded to UPnP classes, so
//! `Type derivedfrom "container" and DisplayName contains "Blue"` becomes
//! `upnp:class derivedfrom "object.container" and dc:title contains "Blue"`.

use crate::errors::GatewayError;
use crate::props::PropertyTable;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    Op(String),
    Word(String),
    Quoted(String),
}

const WORD_OPS: &[&str] = &["contains", "doesNotContain", "derivedfrom", "startsWith"];

/// Bus `Type` values and the UPnP classes they stand for.
pub(crate) const TYPE_CLASSES: &[(&str, &str)] = &[
    ("container", "object.container"),
    ("album", "object.container.album"),
    ("person", "object.container.person"),
    ("genre", "object.container.genre"),
    ("item", "object.item"),
    ("audio", "object.item.audioItem"),
    ("music", "object.item.audioItem.musicTrack"),
    ("video", "object.item.videoItem"),
    ("image", "object.item.imageItem"),
];

fn bad_query(message: impl Into<String>) -> GatewayError {
    GatewayError::BadQuery(message.into())
}

fn tokenize(input: &str) -> Result<Vec<Token>, GatewayError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' | '!' | '<' | '>' => {
                chars.next();
                let mut op = c.to_string();
                if chars.next_if_eq(&'=').is_some() {
                    op.push('=');
                }
                if op == "!" {
                    return Err(bad_query("Dangling '!' in search expression"));
                }
                tokens.push(Token::Op(op));
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => value.push(escaped),
                            None => return Err(bad_query("Unterminated string in search expression")),
                        },
                        Some(other) => value.push(other),
                        None => return Err(bad_query("Unterminated string in search expression")),
                    }
                }
                tokens.push(Token::Quoted(value));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '"' | '=' | '!' | '<' | '>') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }

    Ok(tokens)
}

fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Deepest parenthesis nesting accepted in a search expression.
pub const MAX_NESTING: usize = 64;

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    props: &'a PropertyTable,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn parse_or(&mut self) -> Result<String, GatewayError> {
        let mut expr = self.parse_and()?;
        while self.eat_keyword("or") {
            let rhs = self.parse_and()?;
            expr = format!("{} or {}", expr, rhs);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<String, GatewayError> {
        let mut expr = self.parse_primary()?;
        while self.eat_keyword("and") {
            let rhs = self.parse_primary()?;
            expr = format!("{} and {}", expr, rhs);
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<String, GatewayError> {
        if self.peek() == Some(&Token::LParen) {
            if self.depth == MAX_NESTING {
                return Err(bad_query(format!(
                    "Search expression nested deeper than {} levels",
                    MAX_NESTING
                )));
            }
            self.pos += 1;
            self.depth += 1;
            let inner = self.parse_or()?;
            self.depth -= 1;
            return match self.next() {
                Some(Token::RParen) => Ok(format!("({})", inner)),
                _ => Err(bad_query("Missing ')' in search expression")),
            };
        }
        self.parse_relation()
    }

    fn parse_relation(&mut self) -> Result<String, GatewayError> {
        let name = match self.next() {
            Some(Token::Word(name)) => name,
            other => return Err(bad_query(format!("Expected a property name, found {:?}", other))),
        };

        let prop = self
            .props
            .lookup(&name)
            .filter(|prop| prop.is_queryable())
            .ok_or_else(|| bad_query(format!("Cannot search on '{}'", name)))?;
        let key = prop.upnp.unwrap_or_default();

        let op = match self.next() {
            Some(Token::Op(op)) => op,
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("exists") => {
                return match self.next() {
                    Some(Token::Word(b)) if b == "true" || b == "false" => {
                        Ok(format!("{} exists {}", key, b))
                    }
                    _ => Err(bad_query("'exists' expects true or false")),
                };
            }
            Some(Token::Word(w)) => WORD_OPS
                .iter()
                .find(|op| op.eq_ignore_ascii_case(&w))
                .map(|op| op.to_string())
                .ok_or_else(|| bad_query(format!("Unknown search operator '{}'", w)))?,
            other => return Err(bad_query(format!("Expected an operator, found {:?}", other))),
        };

        let value = match self.next() {
            Some(Token::Quoted(value)) => value,
            other => return Err(bad_query(format!("Expected a quoted value, found {:?}", other))),
        };

        let value = if prop.name == "Type" {
            TYPE_CLASSES
                .iter()
                .find(|(ty, _)| *ty == value)
                .map(|(_, class)| class.to_string())
                .unwrap_or(value)
        } else {
            value
        };

        Ok(format!("{} {} {}", key, op, quote(&value)))
    }
}

/// Translates a client search expression into ContentDirectory
/// `SearchCriteria`. An empty query matches everything.
pub fn translate_search(props: &PropertyTable, query: &str) -> Result<String, GatewayError> {
    let query = query.trim();
    if query.is_empty() || query == "*" {
        return Ok("*".to_string());
    }

    let mut parser = Parser {
        tokens: tokenize(query)?,
        pos: 0,
        depth: 0,
        props,
    };
    let expr = parser.parse_or()?;

    if let Some(token) = parser.peek() {
        return Err(bad_query(format!("Unexpected {:?} in search expression", token)));
    }
    Ok(expr)
}
