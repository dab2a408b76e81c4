//! Restricted boolean expression evaluator for CONDITIONAL steps.
//!
//! Condition text originates from stored workflow definitions that a
//! lower-trust actor may have authored, so it is never handed to a
//! general-purpose interpreter. The grammar is deliberately minimal:
//!
//! ```text
//! expr       := or
//! or         := and ( "||" and )*
//! and        := unary ( "&&" unary )*
//! unary      := "!" unary | comparison
//! comparison := operand ( ("==" | "!=" | "<" | "<=" | ">" | ">=") operand )?
//! operand    := literal | path | "(" expr ")"
//! literal    := number | 'string' | "string" | true | false | null
//! path       := ident ( "." ident | "[" string "]" )*
//! ```
//!
//! Paths resolve against the execution scope; missing paths read as `null`.
//! Non-boolean results and logical operands coerce with JS-like truthiness.
//!
//! **Security note:** scope values are always passed as data, never spliced
//! into the expression text.

use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from condition parsing or evaluation.
#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("condition parse error: {0}")]
    Parse(String),

    #[error("condition type error: {0}")]
    TypeMismatch(String),
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    AndAnd,
    OrOr,
    Bang,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ConditionError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::AndAnd);
                    i += 2;
                } else {
                    return Err(ConditionError::Parse("single '&' is not an operator".into()));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::OrOr);
                    i += 2;
                } else {
                    return Err(ConditionError::Parse("single '|' is not an operator".into()));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    return Err(ConditionError::Parse(
                        "assignment is not supported, use '=='".into(),
                    ));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                        None => {
                            return Err(ConditionError::Parse("unterminated string".into()));
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '-' | '0'..='9' => {
                let start = i;
                if c == '-' {
                    i += 1;
                    if !chars.get(i).is_some_and(|ch| ch.is_ascii_digit()) {
                        return Err(ConditionError::Parse(
                            "'-' must be followed by a digit".into(),
                        ));
                    }
                }
                while chars.get(i).is_some_and(|ch| ch.is_ascii_digit()) {
                    i += 1;
                }
                if chars.get(i) == Some(&'.')
                    && chars.get(i + 1).is_some_and(|ch| ch.is_ascii_digit())
                {
                    i += 1;
                    while chars.get(i).is_some_and(|ch| ch.is_ascii_digit()) {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text
                    .parse()
                    .map_err(|_| ConditionError::Parse(format!("invalid number '{text}'")))?;
                tokens.push(Token::Number(n));
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Ident(text));
            }
            _ => {
                return Err(ConditionError::Parse(format!(
                    "unexpected character '{c}'"
                )));
            }
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ConditionError> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            other => Err(ConditionError::Parse(format!(
                "expected {expected:?}, found {other:?}"
            ))),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ConditionError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&Token::Bang) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ConditionError> {
        let left = self.parse_operand()?;
        let op = match self.peek() {
            Some(Token::EqEq) => CmpOp::Eq,
            Some(Token::NotEq) => CmpOp::Ne,
            Some(Token::Lt) => CmpOp::Lt,
            Some(Token::Le) => CmpOp::Le,
            Some(Token::Gt) => CmpOp::Gt,
            Some(Token::Ge) => CmpOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_operand()?;
        Ok(Expr::Compare(Box::new(left), op, Box::new(right)))
    }

    fn parse_operand(&mut self) -> Result<Expr, ConditionError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ => self.parse_path_tail(name),
            },
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            other => Err(ConditionError::Parse(format!(
                "expected a value, found {other:?}"
            ))),
        }
    }

    /// Continue a path after its first identifier segment:
    /// `.ident` or `["segment"]` repeated.
    fn parse_path_tail(&mut self, first: String) -> Result<Expr, ConditionError> {
        let mut segments = vec![first];
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    match self.advance() {
                        Some(Token::Ident(segment)) => segments.push(segment),
                        other => {
                            return Err(ConditionError::Parse(format!(
                                "expected identifier after '.', found {other:?}"
                            )));
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.advance();
                    match self.advance() {
                        Some(Token::Str(segment)) => segments.push(segment),
                        other => {
                            return Err(ConditionError::Parse(format!(
                                "expected string key after '[', found {other:?}"
                            )));
                        }
                    }
                    self.expect(Token::RBracket)?;
                }
                _ => break,
            }
        }
        Ok(Expr::Path(segments))
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// A parsed condition, reusable across evaluations.
#[derive(Debug, Clone)]
pub struct Condition {
    root: Expr,
}

impl Condition {
    /// Parse a condition expression.
    pub fn parse(input: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(ConditionError::Parse("empty condition".into()));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.parse_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(ConditionError::Parse(format!(
                "unexpected trailing input at token {}",
                parser.pos
            )));
        }
        Ok(Self { root })
    }

    /// Evaluate against a scope object, coercing the result to boolean.
    pub fn evaluate(&self, scope: &Value) -> Result<bool, ConditionError> {
        Ok(truthy(&eval(&self.root, scope)?))
    }
}

/// Parse and evaluate in one call.
pub fn evaluate_condition(input: &str, scope: &Value) -> Result<bool, ConditionError> {
    Condition::parse(input)?.evaluate(scope)
}

fn eval(expr: &Expr, scope: &Value) -> Result<Value, ConditionError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(segments) => Ok(resolve_path(scope, segments)),
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, scope)?))),
        Expr::And(left, right) => {
            if !truthy(&eval(left, scope)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(&eval(right, scope)?)))
        }
        Expr::Or(left, right) => {
            if truthy(&eval(left, scope)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(&eval(right, scope)?)))
        }
        Expr::Compare(left, op, right) => {
            let lhs = eval(left, scope)?;
            let rhs = eval(right, scope)?;
            compare(&lhs, *op, &rhs).map(Value::Bool)
        }
    }
}

fn resolve_path(scope: &Value, segments: &[String]) -> Value {
    let mut current = scope;
    for segment in segments {
        current = match current {
            Value::Object(map) => match map.get(segment) {
                Some(value) => value,
                None => return Value::Null,
            },
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i))
            {
                Some(value) => value,
                None => return Value::Null,
            },
            _ => return Value::Null,
        };
    }
    current.clone()
}

fn compare(lhs: &Value, op: CmpOp, rhs: &Value) -> Result<bool, ConditionError> {
    match op {
        CmpOp::Eq => Ok(values_equal(lhs, rhs)),
        CmpOp::Ne => Ok(!values_equal(lhs, rhs)),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ordering = match (lhs, rhs) {
                (Value::Number(a), Value::Number(b)) => a
                    .as_f64()
                    .unwrap_or(f64::NAN)
                    .partial_cmp(&b.as_f64().unwrap_or(f64::NAN))
                    .ok_or_else(|| {
                        ConditionError::TypeMismatch("cannot order NaN".to_string())
                    })?,
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => {
                    return Err(ConditionError::TypeMismatch(format!(
                        "cannot order {lhs} and {rhs}"
                    )));
                }
            };
            Ok(match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Le => ordering.is_le(),
                CmpOp::Gt => ordering.is_gt(),
                CmpOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            })
        }
    }
}

/// Equality with numeric coercion (3 == 3.0).
fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => {
            a.as_f64().unwrap_or(f64::NAN) == b.as_f64().unwrap_or(f64::NAN)
        }
        _ => lhs == rhs,
    }
}

/// JS-like truthiness coercion.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
