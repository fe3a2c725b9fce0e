//! Guard expressions for declarative machines.
//!
//! Guards are boolean expressions over the variable snapshot:
//!
//! - `vars.name` - truthy check
//! - `vars.name.nested` - nested field access into object values
//! - `vars.name == value`, `vars.name != value` - strings, numbers, booleans, null
//! - `vars.name > n`, `>=`, `<`, `<=` - numeric comparison
//! - `!expr`, `expr && expr`, `expr || expr`, `(expr)`
//!
//! `&&` binds tighter than `||`.

use crate::error::CoreError;
use crate::variables::Variables;
use serde_json::Value;

const FIELD_PREFIX: &str = "vars.";

/// A parsed guard expression.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardExpr {
    Truthy(String),
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, f64),
    Ge(String, f64),
    Lt(String, f64),
    Le(String, f64),
    And(Box<GuardExpr>, Box<GuardExpr>),
    Or(Box<GuardExpr>, Box<GuardExpr>),
    Not(Box<GuardExpr>),
}

impl GuardExpr {
    /// Parses a guard expression.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(invalid("empty guard expression"));
        }

        let mut parser = Parser::new(s);
        let expr = parser.parse_or()?;
        parser.skip_whitespace();
        if parser.pos < parser.input.len() {
            return Err(invalid(format!(
                "unexpected input at offset {}: '{}'",
                parser.pos,
                &parser.input[parser.pos..]
            )));
        }
        Ok(expr)
    }

    /// Evaluates the guard against a snapshot. Missing fields read as null.
    pub fn evaluate(&self, vars: &Variables) -> bool {
        match self {
            GuardExpr::Truthy(path) => is_truthy(&lookup(vars, path)),
            GuardExpr::Eq(path, expected) => values_equal(&lookup(vars, path), expected),
            GuardExpr::Ne(path, expected) => !values_equal(&lookup(vars, path), expected),
            GuardExpr::Gt(path, n) => compare(vars, path, |v| v > *n),
            GuardExpr::Ge(path, n) => compare(vars, path, |v| v >= *n),
            GuardExpr::Lt(path, n) => compare(vars, path, |v| v < *n),
            GuardExpr::Le(path, n) => compare(vars, path, |v| v <= *n),
            GuardExpr::And(left, right) => left.evaluate(vars) && right.evaluate(vars),
            GuardExpr::Or(left, right) => left.evaluate(vars) || right.evaluate(vars),
            GuardExpr::Not(inner) => !inner.evaluate(vars),
        }
    }
}

fn invalid(reason: impl Into<String>) -> CoreError {
    CoreError::InvalidGuard {
        reason: reason.into(),
    }
}

/// Resolves `name.nested.path` against the snapshot.
fn lookup(vars: &Variables, path: &str) -> Value {
    let mut parts = path.split('.');
    let Some(mut current) = parts.next().and_then(|root| vars.get(root)) else {
        return Value::Null;
    };

    for part in parts {
        match current {
            Value::Object(map) => match map.get(part) {
                Some(v) => current = v,
                None => return Value::Null,
            },
            _ => return Value::Null,
        }
    }

    current.clone()
}

fn compare(vars: &Variables, path: &str, op: impl Fn(f64) -> bool) -> bool {
    lookup(vars, path).as_f64().map(op).unwrap_or(false)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .map(|(a, b)| (a - b).abs() < f64::EPSILON)
            .unwrap_or(false),
        _ => a == b,
    }
}

/// Recursive descent parser.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_or(&mut self) -> Result<GuardExpr, CoreError> {
        let mut left = self.parse_and()?;
        self.skip_whitespace();

        while self.eat("||") {
            let right = self.parse_and()?;
            left = GuardExpr::Or(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<GuardExpr, CoreError> {
        let mut left = self.parse_unary()?;
        self.skip_whitespace();

        while self.eat("&&") {
            let right = self.parse_unary()?;
            left = GuardExpr::And(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<GuardExpr, CoreError> {
        self.skip_whitespace();

        if self.eat("!") {
            let inner = self.parse_unary()?;
            return Ok(GuardExpr::Not(Box::new(inner)));
        }

        if self.eat("(") {
            let expr = self.parse_or()?;
            self.skip_whitespace();
            if !self.eat(")") {
                return Err(invalid("expected ')'"));
            }
            return Ok(expr);
        }

        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<GuardExpr, CoreError> {
        let field = self.parse_field()?;
        self.skip_whitespace();

        // Two-character operators first so `>=` is not read as `>`.
        if self.eat("==") {
            return Ok(GuardExpr::Eq(field, self.parse_value()?));
        }
        if self.eat("!=") {
            return Ok(GuardExpr::Ne(field, self.parse_value()?));
        }
        if self.eat(">=") {
            return Ok(GuardExpr::Ge(field, self.parse_number()?));
        }
        if self.eat("<=") {
            return Ok(GuardExpr::Le(field, self.parse_number()?));
        }
        if self.eat(">") {
            return Ok(GuardExpr::Gt(field, self.parse_number()?));
        }
        if self.eat("<") {
            return Ok(GuardExpr::Lt(field, self.parse_number()?));
        }

        Ok(GuardExpr::Truthy(field))
    }

    fn parse_field(&mut self) -> Result<String, CoreError> {
        self.skip_whitespace();
        if !self.eat(FIELD_PREFIX) {
            return Err(invalid(format!("field must start with '{}'", FIELD_PREFIX)));
        }

        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }

        let field = &self.input[start..self.pos];
        if field.is_empty() || field.starts_with('.') || field.ends_with('.') {
            return Err(invalid(format!("invalid field name '{}'", field)));
        }
        Ok(field.to_string())
    }

    fn parse_value(&mut self) -> Result<Value, CoreError> {
        self.skip_whitespace();

        for (keyword, value) in [
            ("true", Value::Bool(true)),
            ("false", Value::Bool(false)),
            ("null", Value::Null),
        ] {
            if self.eat(keyword) {
                return Ok(value);
            }
        }

        if self.peek_char() == Some('"') {
            return self.parse_string();
        }

        let n = self.parse_number()?;
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .ok_or_else(|| invalid(format!("number out of range: {}", n)))
    }

    fn parse_string(&mut self) -> Result<Value, CoreError> {
        // Opening quote.
        self.pos += 1;
        let mut out = String::new();
        let mut chars = self.input[self.pos..].char_indices();

        while let Some((offset, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += offset + 1;
                    return Ok(Value::String(out));
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, escaped)) => out.push(escaped),
                    None => break,
                },
                c => out.push(c),
            }
        }

        Err(invalid("unterminated string"))
    }

    fn parse_number(&mut self) -> Result<f64, CoreError> {
        self.skip_whitespace();
        let start = self.pos;

        if self.peek_char() == Some('-') {
            self.pos += 1;
        }
        while matches!(self.peek_char(), Some(c) if c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }

        let text = &self.input[start..self.pos];
        text.parse::<f64>()
            .map_err(|_| invalid(format!("invalid number: '{}'", text)))
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.input[self.pos..].starts_with(token) {
            self.pos += token.len();
            self.skip_whitespace();
            true
        } else {
            false
        }
    }
}
