//! Derived Feature Formula Module
//!
//! Restricted arithmetic grammar for derived features. A formula is parsed
//! once (at config load / fit time) into a small serializable AST; there is
//! no general-purpose evaluator behind it.
//!
//! Grammar:
//! ```text
//! expr    := term (("+" | "-") term)*
//! term    := unary (("*" | "/") unary)*
//! unary   := "-" unary | power
//! power   := primary ("^" unary)?
//! primary := NUMBER | IDENT | IDENT "(" expr ("," expr)* ")" | "(" expr ")"
//! ```
//! Functions: min, max, abs, sqrt, ln, log1p, clip(x, lo, hi).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::errors::{AppError, AppResult};
use crate::utils::constants::{MAX_FORMULA_DEPTH, MAX_FORMULA_TOKENS};

// ============================================
// AST
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Named transform functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Function {
    Min,
    Max,
    Abs,
    Sqrt,
    Ln,
    Log1p,
    Clip,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "abs" => Some(Self::Abs),
            "sqrt" => Some(Self::Sqrt),
            "ln" => Some(Self::Ln),
            "log1p" => Some(Self::Log1p),
            "clip" => Some(Self::Clip),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Abs => "abs",
            Self::Sqrt => "sqrt",
            Self::Ln => "ln",
            Self::Log1p => "log1p",
            Self::Clip => "clip",
        }
    }

    /// (min, max) argument count
    fn arity(&self) -> (usize, usize) {
        match self {
            Self::Min | Self::Max => (1, usize::MAX),
            Self::Abs | Self::Sqrt | Self::Ln | Self::Log1p => (1, 1),
            Self::Clip => (3, 3),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Expr {
    Const { value: f64 },
    Feature { name: String },
    Neg { expr: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Call { func: Function, args: Vec<Expr> },
}

impl Expr {
    /// Parse formula source into an AST
    pub fn parse(source: &str) -> AppResult<Expr> {
        let tokens = tokenize(source)?;
        if tokens.len() > MAX_FORMULA_TOKENS {
            return Err(AppError::formula_parse(format!(
                "Formula has {} tokens, limit is {}",
                tokens.len(),
                MAX_FORMULA_TOKENS
            )));
        }
        let mut parser = Parser { tokens, pos: 0, depth: 0 };
        let expr = parser.expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(AppError::formula_parse(format!(
                "Unexpected token {:?} in '{}'",
                parser.tokens[parser.pos], source
            )));
        }
        Ok(expr)
    }

    /// Feature names the formula reads
    pub fn references(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out.sort();
        out.dedup();
        out
    }

    fn collect_refs(&self, out: &mut Vec<String>) {
        match self {
            Expr::Const { .. } => {}
            Expr::Feature { name } => out.push(name.clone()),
            Expr::Neg { expr } => expr.collect_refs(out),
            Expr::Binary { left, right, .. } => {
                left.collect_refs(out);
                right.collect_refs(out);
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| a.collect_refs(out)),
        }
    }

    /// Evaluate against a feature lookup. Any missing feature, division by
    /// zero, domain error or non-finite intermediate is an error.
    pub fn eval<F>(&self, lookup: &F) -> AppResult<f64>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let value = match self {
            Expr::Const { value } => *value,
            Expr::Feature { name } => lookup(name)
                .ok_or_else(|| AppError::formula_eval(format!("feature '{}' unavailable", name)))?,
            Expr::Neg { expr } => -expr.eval(lookup)?,
            Expr::Binary { op, left, right } => {
                let l = left.eval(lookup)?;
                let r = right.eval(lookup)?;
                match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => {
                        if r == 0.0 {
                            return Err(AppError::formula_eval("division by zero"));
                        }
                        l / r
                    }
                    BinaryOp::Pow => l.powf(r),
                }
            }
            Expr::Call { func, args } => {
                let values = args
                    .iter()
                    .map(|a| a.eval(lookup))
                    .collect::<AppResult<Vec<f64>>>()?;
                apply(*func, &values)?
            }
        };

        if value.is_finite() {
            Ok(value)
        } else {
            Err(AppError::formula_eval("non-finite result"))
        }
    }
}

fn apply(func: Function, v: &[f64]) -> AppResult<f64> {
    match func {
        Function::Min => Ok(v.iter().copied().fold(f64::INFINITY, f64::min)),
        Function::Max => Ok(v.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        Function::Abs => Ok(v[0].abs()),
        Function::Sqrt => {
            if v[0] < 0.0 {
                Err(AppError::formula_eval("sqrt of negative value"))
            } else {
                Ok(v[0].sqrt())
            }
        }
        Function::Ln => {
            if v[0] <= 0.0 {
                Err(AppError::formula_eval("ln of non-positive value"))
            } else {
                Ok(v[0].ln())
            }
        }
        Function::Log1p => {
            if v[0] <= -1.0 {
                Err(AppError::formula_eval("log1p of value <= -1"))
            } else {
                Ok(v[0].ln_1p())
            }
        }
        Function::Clip => {
            if v[1] > v[2] {
                Err(AppError::formula_eval("clip bounds inverted"))
            } else {
                Ok(v[0].clamp(v[1], v[2]))
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const { value } => write!(f, "{}", value),
            Expr::Feature { name } => write!(f, "{}", name),
            Expr::Neg { expr } => write!(f, "(-{})", expr),
            Expr::Binary { op, left, right } => {
                let sym = match op {
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    BinaryOp::Div => "/",
                    BinaryOp::Pow => "^",
                };
                write!(f, "({} {} {})", left, sym, right)
            }
            Expr::Call { func, args } => {
                let parts: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", func.name(), parts.join(", "))
            }
        }
    }
}

// ============================================
// TOKENIZER
// ============================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

fn tokenize(source: &str) -> AppResult<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' | '-' | '*' | '/' | '^' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // exponent part, e.g. 1e-3
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| AppError::formula_parse(format!("Bad number literal '{}'", text)))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(AppError::formula_parse(format!(
                    "Unsupported character '{}' in '{}'",
                    other, source
                )))
            }
        }
    }

    if tokens.is_empty() {
        return Err(AppError::formula_parse("Empty formula"));
    }
    Ok(tokens)
}

// ============================================
// PARSER (recursive descent)
// ============================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Every recursive path passes through `unary`
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, want: Token) -> AppResult<()> {
        match self.next() {
            Some(t) if t == want => Ok(()),
            other => Err(AppError::formula_parse(format!(
                "Expected {:?}, found {:?}",
                want, other
            ))),
        }
    }

    fn expr(&mut self) -> AppResult<Expr> {
        let mut left = self.term()?;
        while let Some(Token::Op(c @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.term()?;
            let op = if c == '+' { BinaryOp::Add } else { BinaryOp::Sub };
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn term(&mut self) -> AppResult<Expr> {
        let mut left = self.unary()?;
        while let Some(Token::Op(c @ ('*' | '/'))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.unary()?;
            let op = if c == '*' { BinaryOp::Mul } else { BinaryOp::Div };
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn unary(&mut self) -> AppResult<Expr> {
        self.depth += 1;
        if self.depth > MAX_FORMULA_DEPTH {
            return Err(AppError::formula_parse(format!(
                "Formula nests deeper than {} levels",
                MAX_FORMULA_DEPTH
            )));
        }
        let expr = if let Some(Token::Op('-')) = self.peek() {
            self.pos += 1;
            self.unary().map(|inner| Expr::Neg { expr: Box::new(inner) })
        } else {
            self.power()
        };
        self.depth -= 1;
        expr
    }

    fn power(&mut self) -> AppResult<Expr> {
        let base = self.primary()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(Expr::Binary {
                op: BinaryOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn primary(&mut self) -> AppResult<Expr> {
        match self.next() {
            Some(Token::Number(value)) => Ok(Expr::Const { value }),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.pos += 1;
                    let func = Function::from_name(&name).ok_or_else(|| {
                        AppError::formula_parse(format!("Unknown function '{}'", name))
                    })?;
                    let mut args = vec![self.expr()?];
                    while let Some(Token::Comma) = self.peek() {
                        self.pos += 1;
                        args.push(self.expr()?);
                    }
                    self.expect(Token::RParen)?;
                    let (lo, hi) = func.arity();
                    if args.len() < lo || args.len() > hi {
                        return Err(AppError::formula_parse(format!(
                            "{}() takes {} argument(s), got {}",
                            name,
                            if lo == hi { lo.to_string() } else { format!("at least {}", lo) },
                            args.len()
                        )));
                    }
                    Ok(Expr::Call { func, args })
                } else {
                    Ok(Expr::Feature { name })
                }
            }
            other => Err(AppError::formula_parse(format!("Unexpected token {:?}", other))),
        }
    }
}
