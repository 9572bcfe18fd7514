//! Restricted predicate language for explanation rules.
//!
//! The grammar is closed: numbers, the literals `true`/`false`/`null`
//! (Python spellings `True`/`False`/`None` are accepted too), feature
//! names, parentheses, arithmetic (`+ - * / %`), comparisons (`== != < <= > >=`,
//! chainable as in `0 < x <= 5`) and boolean operators (`and or not`, or
//! `&& || !`). There are no calls, attribute access, indexing or strings, and
//! every identifier must be a known feature before anything is evaluated.
//!
//! ```text
//! or      := and (("or" | "||") and)*
//! and     := not (("and" | "&&") not)*
//! not     := ("not" | "!") not | compare
//! compare := sum (cmp_op sum)*
//! sum     := term (("+" | "-") term)*
//! term    := unary (("*" | "/" | "%") unary)*
//! unary   := ("-" | "+") unary | primary
//! primary := number | literal | identifier | "(" or ")"
//! ```

use crate::models::{FeatureSet, FeatureValue};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

const MAX_SOURCE_LEN: usize = 1024;
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("expression is too long")]
    TooLong,
    #[error("expression nests too deeply")]
    TooDeep,
    #[error("use of name '{0}' not allowed")]
    UnknownIdentifier(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("division by zero")]
    DivisionByZero,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Null,
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Value::Number(n) => *n != 0.0,
            Value::Bool(b) => *b,
            Value::Null => false,
        }
    }

    fn number(&self) -> Result<f64, ExprError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Null => Err(ExprError::Type("null used as a number".to_string())),
        }
    }
}

/// Variables visible to predicates. Booleans are stored as 0/1.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    vars: BTreeMap<String, Value>,
}

impl Context {
    pub fn from_features(features: &FeatureSet) -> Self {
        let vars = features
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    FeatureValue::Bool(b) => Value::Number(if *b { 1.0 } else { 0.0 }),
                    FeatureValue::Null => Value::Null,
                    other => other.to_number().map(Value::Number).unwrap_or(Value::Null),
                };
                (name.clone(), value)
            })
            .collect();
        Context { vars }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.vars.get(name).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Literal(Value),
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Cmp(CmpOp),
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Var(String),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);
        match c {
            c if c.is_whitespace() => {
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::InvalidNumber(text.clone()))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_ascii_alphanumeric() || chars[i].1 == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                tokens.push(match word.as_str() {
                    "true" | "True" => Token::Literal(Value::Bool(true)),
                    "false" | "False" => Token::Literal(Value::Bool(false)),
                    "null" | "None" => Token::Literal(Value::Null),
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                });
            }
            '(' | ')' | '+' | '-' | '*' | '/' | '%' => {
                tokens.push(match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    _ => Token::Percent,
                });
                i += 1;
            }
            '=' | '!' | '<' | '>' | '&' | '|' => {
                let (token, width) = match (c, next) {
                    ('=', Some('=')) => (Token::Cmp(CmpOp::Eq), 2),
                    ('!', Some('=')) => (Token::Cmp(CmpOp::Ne), 2),
                    ('<', Some('=')) => (Token::Cmp(CmpOp::Le), 2),
                    ('>', Some('=')) => (Token::Cmp(CmpOp::Ge), 2),
                    ('&', Some('&')) => (Token::And, 2),
                    ('|', Some('|')) => (Token::Or, 2),
                    ('!', _) => (Token::Not, 1),
                    ('<', _) => (Token::Cmp(CmpOp::Lt), 1),
                    ('>', _) => (Token::Cmp(CmpOp::Gt), 1),
                    _ => return Err(ExprError::UnexpectedChar { ch: c, offset }),
                };
                tokens.push(token);
                i += width;
            }
            _ => return Err(ExprError::UnexpectedChar { ch: c, offset }),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
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

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooDeep);
        }
        Ok(())
    }

    fn parse(mut self) -> Result<Expr, ExprError> {
        if self.tokens.is_empty() {
            return Err(ExprError::Syntax("empty expression".to_string()));
        }
        let expr = self.or_expr()?;
        match self.peek() {
            None => Ok(expr),
            Some(token) => Err(ExprError::Syntax(format!("unexpected {:?}", token))),
        }
    }

    fn or_expr(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.not_expr()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ExprError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            self.enter()?;
            let inner = self.not_expr()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.compare()
    }

    fn compare(&mut self) -> Result<Expr, ExprError> {
        let first = self.sum()?;
        let mut rest = Vec::new();
        while let Some(Token::Cmp(op)) = self.peek() {
            let op = *op;
            self.advance();
            rest.push((op, self.sum()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    fn sum(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.term()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithOp::Mul,
                Some(Token::Slash) => ArithOp::Div,
                Some(Token::Percent) => ArithOp::Rem,
                _ => break,
            };
            self.advance();
            let right = self.unary()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Some(Token::Minus) | Some(Token::Plus) => {
                let negate = self.advance() == Some(Token::Minus);
                self.enter()?;
                let inner = self.unary()?;
                self.depth -= 1;
                Ok(if negate { Expr::Neg(Box::new(inner)) } else { inner })
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(Value::Number(n))),
            Some(Token::Literal(v)) => Ok(Expr::Literal(v)),
            Some(Token::Ident(name)) => Ok(Expr::Var(name)),
            Some(Token::LParen) => {
                self.enter()?;
                let inner = self.or_expr()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(ExprError::Syntax("missing ')'".to_string())),
                }
            }
            Some(token) => Err(ExprError::Syntax(format!("unexpected {:?}", token))),
            None => Err(ExprError::Syntax("unexpected end of expression".to_string())),
        }
    }
}

/// A parsed explanation predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    source: String,
    ast: Expr,
}

impl Predicate {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        if source.len() > MAX_SOURCE_LEN {
            return Err(ExprError::TooLong);
        }
        let parser = Parser {
            tokens: tokenize(source)?,
            pos: 0,
            depth: 0,
        };
        Ok(Predicate {
            source: source.to_string(),
            ast: parser.parse()?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Every feature name the predicate refers to.
    pub fn identifiers(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        collect_names(&self.ast, &mut names);
        names
    }

    /// Static allow-list pass: every identifier must exist in the context.
    pub fn check_names(&self, ctx: &Context) -> Result<(), ExprError> {
        match self.identifiers().into_iter().find(|name| !ctx.contains(name)) {
            Some(name) => Err(ExprError::UnknownIdentifier(name.to_string())),
            None => Ok(()),
        }
    }

    pub fn evaluate(&self, ctx: &Context) -> Result<bool, ExprError> {
        self.check_names(ctx)?;
        Ok(eval(&self.ast, ctx)?.truthy())
    }
}

fn collect_names<'a>(expr: &'a Expr, names: &mut BTreeSet<&'a str>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Var(name) => {
            names.insert(name.as_str());
        }
        Expr::Neg(inner) | Expr::Not(inner) => collect_names(inner, names),
        Expr::Arith(_, l, r) | Expr::And(l, r) | Expr::Or(l, r) => {
            collect_names(l, names);
            collect_names(r, names);
        }
        Expr::Compare(first, rest) => {
            collect_names(first, names);
            for (_, e) in rest {
                collect_names(e, names);
            }
        }
    }
}

fn eval(expr: &Expr, ctx: &Context) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(v) => Ok(*v),
        Expr::Var(name) => ctx
            .get(name)
            .ok_or_else(|| ExprError::UnknownIdentifier(name.clone())),
        Expr::Neg(inner) => Ok(Value::Number(-eval(inner, ctx)?.number()?)),
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner, ctx)?.truthy())),
        Expr::Arith(op, l, r) => {
            let a = eval(l, ctx)?.number()?;
            let b = eval(r, ctx)?.number()?;
            let result = match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div | ArithOp::Rem if b == 0.0 => return Err(ExprError::DivisionByZero),
                ArithOp::Div => a / b,
                // Floored: the result takes the sign of the divisor
                ArithOp::Rem => a - b * (a / b).floor(),
            };
            if !result.is_finite() {
                return Err(ExprError::Type("arithmetic overflow".to_string()));
            }
            Ok(Value::Number(result))
        }
        Expr::Compare(first, rest) => {
            let mut left = eval(first, ctx)?;
            for (op, right) in rest {
                let right = eval(right, ctx)?;
                if !compare(*op, left, right)? {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
        Expr::And(l, r) => {
            let left = eval(l, ctx)?;
            if !left.truthy() {
                return Ok(left);
            }
            eval(r, ctx)
        }
        Expr::Or(l, r) => {
            let left = eval(l, ctx)?;
            if left.truthy() {
                return Ok(left);
            }
            eval(r, ctx)
        }
    }
}

fn compare(op: CmpOp, left: Value, right: Value) -> Result<bool, ExprError> {
    match (op, left, right) {
        (CmpOp::Eq, Value::Null, Value::Null) => Ok(true),
        (CmpOp::Ne, Value::Null, Value::Null) => Ok(false),
        (CmpOp::Eq, Value::Null, _) | (CmpOp::Eq, _, Value::Null) => Ok(false),
        (CmpOp::Ne, Value::Null, _) | (CmpOp::Ne, _, Value::Null) => Ok(true),
        (_, Value::Null, _) | (_, _, Value::Null) => {
            Err(ExprError::Type("null is not orderable".to_string()))
        }
        (op, l, r) => {
            let (a, b) = (l.number()?, r.number()?);
            Ok(match op {
                CmpOp::Eq => a == b,
                CmpOp::Ne => a != b,
                CmpOp::Lt => a < b,
                CmpOp::Le => a <= b,
                CmpOp::Gt => a > b,
                CmpOp::Ge => a >= b,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        let mut features = FeatureSet::new();
        features.insert("face_similarity", 72.0);
        features.insert("mrz_valid", false);
        features.insert("device_hash_dup", true);
        features.insert("velocity_count_24h", 4u64);
        features.insert("blur_score", 0.25);
        features.insert("ip_risk_score", FeatureValue::Null);
        Context::from_features(&features)
    }

    fn eval_str(source: &str) -> Result<bool, ExprError> {
        Predicate::parse(source)?.evaluate(&ctx())
    }

    #[test]
    fn test_comparisons_and_booleans() {
        assert_eq!(eval_str("face_similarity < 80"), Ok(true));
        assert_eq!(eval_str("mrz_valid == 0"), Ok(true));
        assert_eq!(eval_str("mrz_valid == false"), Ok(true));
        assert_eq!(eval_str("device_hash_dup == True"), Ok(true));
        assert_eq!(eval_str("not mrz_valid and blur_score <= 0.25"), Ok(true));
        assert_eq!(eval_str("!(velocity_count_24h > 3) || face_similarity >= 90"), Ok(false));
        assert_eq!(eval_str("device_hash_dup && velocity_count_24h != 4"), Ok(false));
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        assert_eq!(eval_str("face_similarity / 100 + blur_score * 2 > 1.2"), Ok(true));
        assert_eq!(eval_str("-velocity_count_24h + 5 == 1"), Ok(true));
        assert_eq!(eval_str("velocity_count_24h % 3 == 1"), Ok(true));
        assert_eq!(eval_str("5 % -3 == -1"), Ok(true));
        assert_eq!(eval_str("-5 % 3 == 1"), Ok(true));
        assert_eq!(eval_str("-5 % -3 == -2"), Ok(true));
        assert_eq!(eval_str("(1 + 2) * 3 == 9"), Ok(true));
        assert_eq!(eval_str("1 + 2 * 3 == 7"), Ok(true));
    }

    #[test]
    fn test_chained_comparison() {
        assert_eq!(eval_str("0 < blur_score < 0.5"), Ok(true));
        assert_eq!(eval_str("0 < blur_score < 0.1"), Ok(false));
    }

    #[test]
    fn test_null_handling() {
        assert_eq!(eval_str("ip_risk_score == null"), Ok(true));
        assert_eq!(eval_str("ip_risk_score != None"), Ok(false));
        assert!(matches!(eval_str("ip_risk_score > 0"), Err(ExprError::Type(_))));
        assert!(matches!(eval_str("ip_risk_score + 1 > 0"), Err(ExprError::Type(_))));
    }

    #[test]
    fn test_unknown_identifiers_rejected_before_evaluation() {
        assert_eq!(
            eval_str("undeclared > 1"),
            Err(ExprError::UnknownIdentifier("undeclared".to_string()))
        );
        // Short-circuiting would skip the right side, the allow-list still refuses it
        assert_eq!(
            eval_str("face_similarity > 0 or secret == 1"),
            Err(ExprError::UnknownIdentifier("secret".to_string()))
        );
    }

    #[test]
    fn test_escape_attempts_rejected() {
        for source in [
            "os.system('rm -rf /')",
            "__import__('os')",
            "open(\"/etc/passwd\")",
            "face_similarity.real > 0",
            "face_similarity[0]",
            "lambda: 1",
            "x = 1",
            "face_similarity; mrz_valid",
        ] {
            assert!(eval_str(source).is_err(), "accepted {}", source);
        }
    }

    #[test]
    fn test_calls_are_syntax_errors() {
        let err = Predicate::parse("len(face_similarity)").unwrap_err();
        assert!(matches!(err, ExprError::Syntax(_)));
    }

    #[test]
    fn test_malformed_expressions() {
        for source in ["", "   ", "face_similarity >", "(mrz_valid", "1..2 > 0", "and mrz_valid"] {
            assert!(Predicate::parse(source).is_err(), "parsed {:?}", source);
        }
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(eval_str("face_similarity / 0 > 1"), Err(ExprError::DivisionByZero));
    }

    #[test]
    fn test_limits() {
        let deep = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert_eq!(Predicate::parse(&deep).unwrap_err(), ExprError::TooDeep);
        let long = "1 + ".repeat(400) + "1";
        assert_eq!(Predicate::parse(&long).unwrap_err(), ExprError::TooLong);
    }

    #[test]
    fn test_identifiers() {
        let p = Predicate::parse("a > 1 and (b < c or not a)").unwrap();
        let names: Vec<&str> = p.identifiers().into_iter().collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(p.source(), "a > 1 and (b < c or not a)");
    }
}
