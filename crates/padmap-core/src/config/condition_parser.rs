// Padmap Config - Condition Expression Parser
// Parses "LShift & !Ctrl@2 | ~CapsLock" into condition trees

use crate::condition::{Condition, ConditionLeaf};
use crate::control::ControlNamespace;
use crate::mapping::UserRef;
use crate::Key;

/// Errors that can occur while parsing control references and conditions
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConditionParseError {
    #[error("condition expression cannot be empty")]
    EmptyInput,

    #[error("unknown control name: '{0}'")]
    UnknownControl(String),

    #[error("invalid user reference: '{0}'")]
    InvalidUser(String),

    #[error("unexpected '{0}' in condition")]
    UnexpectedToken(String),

    #[error("condition ends unexpectedly")]
    UnexpectedEnd,

    #[error("'~' applies to a single control, not a group")]
    ToggleOnGroup,
}

/// Split `Name@user` into the control and its optional user reference
pub fn parse_control_ref(
    text: &str,
    namespace: &ControlNamespace,
) -> Result<(Key, Option<UserRef>), ConditionParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ConditionParseError::EmptyInput);
    }
    let (name, user) = match text.split_once('@') {
        Some((name, user)) => {
            let user = user
                .parse::<UserRef>()
                .map_err(|_| ConditionParseError::InvalidUser(user.to_string()))?;
            (name.trim(), Some(user))
        }
        None => (text, None),
    };
    let key = namespace
        .resolve(name)
        .ok_or_else(|| ConditionParseError::UnknownControl(name.to_string()))?;
    Ok((key, user))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Toggle,
    Ident(String),
}

impl Token {
    fn text(&self) -> String {
        match self {
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::And => "&".into(),
            Token::Or => "|".into(),
            Token::Not => "!".into(),
            Token::Toggle => "~".into(),
            Token::Ident(s) => s.clone(),
        }
    }
}

fn tokenize(expr: &str) -> Vec<Token> {
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0usize;
    let mut out = Vec::new();

    while i < chars.len() {
        let ch = chars[i];
        if ch.is_whitespace() {
            i += 1;
            continue;
        }
        let single = match ch {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '&' => Some(Token::And),
            '|' => Some(Token::Or),
            '!' => Some(Token::Not),
            '~' => Some(Token::Toggle),
            _ => None,
        };
        if let Some(token) = single {
            out.push(token);
            i += 1;
            continue;
        }

        let start = i;
        while i < chars.len() {
            let c = chars[i];
            if c.is_whitespace() || "()&|!~".contains(c) {
                break;
            }
            i += 1;
        }
        let word: String = chars[start..i].iter().collect();
        match word.to_ascii_lowercase().as_str() {
            "and" => out.push(Token::And),
            "or" => out.push(Token::Or),
            "not" => out.push(Token::Not),
            _ => out.push(Token::Ident(word)),
        }
    }

    out
}

/// Push a negation down to the leaves
fn negate(condition: Condition) -> Condition {
    match condition {
        Condition::Leaf(mut leaf) => {
            leaf.desired = !leaf.desired;
            Condition::Leaf(leaf)
        }
        Condition::All(children) => Condition::Any(children.into_iter().map(negate).collect()),
        Condition::Any(children) => Condition::All(children.into_iter().map(negate).collect()),
    }
}

struct ConditionParser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    namespace: &'a ControlNamespace,
}

impl<'a> ConditionParser<'a> {
    fn parse(mut self) -> Result<Condition, ConditionParseError> {
        if self.tokens.is_empty() {
            return Err(ConditionParseError::EmptyInput);
        }
        let expr = self.parse_or()?;
        if let Some(token) = self.peek() {
            return Err(ConditionParseError::UnexpectedToken(token.text()));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Condition, ConditionParseError> {
        let mut terms = vec![self.parse_and()?];
        while matches!(self.peek(), Some(Token::Or)) {
            self.next();
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Condition::Any(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Condition, ConditionParseError> {
        let mut terms = vec![self.parse_unary()?];
        while matches!(self.peek(), Some(Token::And)) {
            self.next();
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Condition::All(terms)
        })
    }

    fn parse_unary(&mut self) -> Result<Condition, ConditionParseError> {
        match self.peek() {
            Some(Token::Not) => {
                self.next();
                Ok(negate(self.parse_unary()?))
            }
            Some(Token::Toggle) => {
                self.next();
                match self.parse_unary()? {
                    Condition::Leaf(mut leaf) => {
                        leaf.toggle = true;
                        Ok(Condition::Leaf(leaf))
                    }
                    _ => Err(ConditionParseError::ToggleOnGroup),
                }
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Condition, ConditionParseError> {
        match self.next() {
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(expr),
                    Some(other) => Err(ConditionParseError::UnexpectedToken(other.text())),
                    None => Err(ConditionParseError::UnexpectedEnd),
                }
            }
            Some(Token::Ident(name)) => self.leaf(&name),
            Some(other) => Err(ConditionParseError::UnexpectedToken(other.text())),
            None => Err(ConditionParseError::UnexpectedEnd),
        }
    }

    fn leaf(&self, text: &str) -> Result<Condition, ConditionParseError> {
        let (key, user) = parse_control_ref(text, self.namespace)?;
        let of_user = self.namespace.control_type(key).flags.of_user;
        // User-less controls keep their bits under user 0
        let user = match user {
            Some(user) if of_user => user,
            _ => UserRef::Index(0),
        };
        Ok(Condition::Leaf(ConditionLeaf {
            key,
            user,
            desired: true,
            toggle: false,
        }))
    }

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
}

/// Parse a condition expression
///
/// `&` binds tighter than `|`; `and`, `or` and `not` are accepted as words.
/// `!` asks for the released state, `~` tests the toggle bit, and `@N`,
/// `@active` or `@all` pick the user of a gamepad control (default user 1).
pub fn parse_condition(
    expr: &str,
    namespace: &ControlNamespace,
) -> Result<Condition, ConditionParseError> {
    ConditionParser {
        tokens: tokenize(expr),
        pos: 0,
        namespace,
    }
    .parse()
}
