//! Value templates: small text templates evaluated against the transform
//! context.
//!
//! A template is literal text with `[[ expression ]]` actions. Expressions
//! are dotted lookups into the evaluation namespace (`.cursor.last`,
//! `.last_response.body.next_page`), builtin function calls with
//! space-separated arguments, and `|` pipelines that feed the previous value
//! as the final argument of the next call:
//!
//! ```text
//! [[ (parseDuration "-1h") | now | formatDate ]]
//! ```
//!
//! Compilation happens once at configuration time and fails fast on syntax
//! errors. Evaluation never aborts a poll: errors and empty results are
//! resolved to the configured default template, or reported as
//! [`TemplateError::EmptyResult`] for the caller to recover.

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::context::TransformContext;
use crate::error::TemplateError;
use crate::transformable::{Body, Transformable};

/// RFC 5988 Link header relation extractor.
///
/// The pattern is fixed and matches `<url>; ...; rel="name"` entries.
fn rfc5988_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"<(.*)>;.*\srel="?([^;"]*)"#).unwrap_or_else(|_| unreachable!()))
}

// ============================================================================
// Compiled form
// ============================================================================

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Expr(Expr),
}

#[derive(Debug, Clone)]
enum Expr {
    /// Dotted lookup into the namespace.
    Path(Vec<String>),
    /// String literal.
    Str(String),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// Function call.
    Call { func: String, args: Vec<Expr> },
    /// `a | b | c` pipeline.
    Pipeline(Vec<Expr>),
}

/// A compiled value template.
#[derive(Debug, Clone)]
pub struct ValueTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl ValueTemplate {
    /// Compiles template text. Fails on syntax errors.
    pub fn compile(text: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = text;
        while let Some(start) = rest.find("[[") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find("]]")
                .ok_or_else(|| TemplateError::Syntax(format!("unclosed action in {text:?}")))?;
            let expr_src = &after[..end];
            segments.push(Segment::Expr(parse_expr(expr_src)?));
            rest = &after[end + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Ok(Self {
            source: text.to_string(),
            segments,
        })
    }

    /// The original template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the template against the context and transformable.
    ///
    /// Applies the defaulting policy: if rendering fails or produces an empty
    /// string, the default template is rendered instead; with no default the
    /// result is an error ([`TemplateError::EmptyResult`] for empty output,
    /// [`TemplateError::Execution`] for a failed render) and the returned
    /// value is the empty string at the recovery boundary.
    pub fn execute(
        &self,
        ctx: &TransformContext,
        tr: &Transformable,
        default: Option<&ValueTemplate>,
    ) -> Result<String, TemplateError> {
        self.execute_at(ctx, tr, default, Utc::now())
    }

    /// Like [`ValueTemplate::execute`] with an explicit clock, for tests and
    /// deterministic evaluation.
    pub fn execute_at(
        &self,
        ctx: &TransformContext,
        tr: &Transformable,
        default: Option<&ValueTemplate>,
        now: DateTime<Utc>,
    ) -> Result<String, TemplateError> {
        let ns = build_namespace(ctx, tr);
        match self.render(&ns, now) {
            Ok(s) if !s.is_empty() => Ok(s),
            rendered => match default {
                Some(def) => match def.render(&ns, now) {
                    Ok(s) if !s.is_empty() => Ok(s),
                    _ => Err(TemplateError::EmptyResult),
                },
                None => match rendered {
                    Ok(_) => Err(TemplateError::EmptyResult),
                    Err(e) => Err(TemplateError::Execution(e.to_string())),
                },
            },
        }
    }

    fn render(&self, ns: &Value, now: DateTime<Utc>) -> Result<String, TemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Expr(expr) => {
                    let value = eval(expr, ns, now, None)?;
                    out.push_str(&value.render());
                }
            }
        }
        Ok(out)
    }
}

/// Builds the template lookup namespace from the context and transformable.
fn build_namespace(ctx: &TransformContext, tr: &Transformable) -> Value {
    let mut ns = match ctx.to_json() {
        Value::Object(obj) => obj,
        _ => Body::new(),
    };
    ns.insert("body".to_string(), Value::Object(tr.body.clone()));
    ns.insert("header".to_string(), tr.header_json());
    ns.insert("url".to_string(), tr.url_json());
    Value::Object(ns)
}

// ============================================================================
// Parsing
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Path(Vec<String>),
    Str(String),
    Int(i64),
    Float(f64),
    LParen,
    RParen,
    Pipe,
}

fn is_path_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '@'
}

fn tokenize(src: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                tokens.push(Token::LParen);
                chars.next();
            }
            ')' => {
                tokens.push(Token::RParen);
                chars.next();
            }
            '|' => {
                tokens.push(Token::Pipe);
                chars.next();
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, escaped)) => s.push(escaped),
                            None => break,
                        },
                        other => s.push(other),
                    }
                }
                if !closed {
                    return Err(TemplateError::Syntax(format!(
                        "unterminated string literal in {src:?}"
                    )));
                }
                tokens.push(Token::Str(s));
            }
            '.' => {
                let mut path = Vec::new();
                while chars.peek().is_some_and(|&(_, c)| c == '.') {
                    chars.next();
                    let mut segment = String::new();
                    while chars.peek().is_some_and(|&(_, c)| is_path_char(c)) {
                        if let Some((_, c)) = chars.next() {
                            segment.push(c);
                        }
                    }
                    if segment.is_empty() {
                        return Err(TemplateError::Syntax(format!(
                            "empty path segment at offset {start} in {src:?}"
                        )));
                    }
                    path.push(segment);
                }
                tokens.push(Token::Path(path));
            }
            '-' | '0'..='9' => {
                let mut text = String::new();
                if c == '-' {
                    text.push(c);
                    chars.next();
                }
                let mut is_float = false;
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        chars.next();
                    } else if c == '.' && !is_float {
                        is_float = true;
                        text.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let token = if is_float {
                    Token::Float(text.parse().map_err(|_| {
                        TemplateError::Syntax(format!("invalid number {text:?} in {src:?}"))
                    })?)
                } else {
                    Token::Int(text.parse().map_err(|_| {
                        TemplateError::Syntax(format!("invalid number {text:?} in {src:?}"))
                    })?)
                };
                tokens.push(token);
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while chars.peek().is_some_and(|&(_, c)| c.is_alphanumeric() || c == '_') {
                    if let Some((_, c)) = chars.next() {
                        ident.push(c);
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(TemplateError::Syntax(format!(
                    "unexpected character {other:?} in {src:?}"
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
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

    fn parse_pipeline(&mut self) -> Result<Expr, TemplateError> {
        let mut stages = vec![self.parse_call()?];
        while self.peek() == Some(&Token::Pipe) {
            self.next();
            stages.push(self.parse_call()?);
        }
        if stages.len() == 1 {
            Ok(stages.pop().unwrap_or(Expr::Str(String::new())))
        } else {
            Ok(Expr::Pipeline(stages))
        }
    }

    fn parse_call(&mut self) -> Result<Expr, TemplateError> {
        match self.peek() {
            Some(Token::Ident(_)) => {
                let Some(Token::Ident(func)) = self.next() else {
                    unreachable!()
                };
                let mut args = Vec::new();
                while self.peek().is_some_and(|t| {
                    !matches!(t, Token::Pipe | Token::RParen)
                }) {
                    args.push(self.parse_atom()?);
                }
                Ok(Expr::Call { func, args })
            }
            _ => self.parse_atom(),
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, TemplateError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Int(n)) => Ok(Expr::Int(n)),
            Some(Token::Float(f)) => Ok(Expr::Float(f)),
            Some(Token::Path(p)) => Ok(Expr::Path(p)),
            Some(Token::LParen) => {
                let inner = self.parse_pipeline()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(TemplateError::Syntax("missing closing parenthesis".into())),
                }
            }
            other => Err(TemplateError::Syntax(format!(
                "unexpected token {other:?}"
            ))),
        }
    }
}

fn parse_expr(src: &str) -> Result<Expr, TemplateError> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Ok(Expr::Str(String::new()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_pipeline()?;
    if parser.peek().is_some() {
        return Err(TemplateError::Syntax(format!(
            "trailing tokens in expression {src:?}"
        )));
    }
    Ok(expr)
}

// ============================================================================
// Evaluation
// ============================================================================

/// A typed intermediate value inside a template evaluation.
#[derive(Debug, Clone)]
enum TplValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Time(DateTime<Utc>),
    Dur(ChronoDuration),
    Json(Value),
}

impl TplValue {
    fn render(&self) -> String {
        match self {
            TplValue::Str(s) => s.clone(),
            TplValue::Int(n) => n.to_string(),
            TplValue::Float(f) => format_float(*f),
            TplValue::Bool(b) => b.to_string(),
            TplValue::Time(t) => t.to_rfc3339_opts(SecondsFormat::Secs, true),
            TplValue::Dur(d) => format_go_duration(*d),
            TplValue::Json(Value::String(s)) => s.clone(),
            TplValue::Json(Value::Null) => String::new(),
            // Single-value lists render as the value itself so header and
            // query parameter lookups behave like scalar access.
            TplValue::Json(Value::Array(items)) if items.len() == 1 => {
                TplValue::from_json(&items[0]).render()
            }
            TplValue::Json(v) => serde_json::to_string(v).unwrap_or_default(),
        }
    }

    fn from_json(v: &Value) -> Self {
        match v {
            Value::String(s) => TplValue::Str(s.clone()),
            Value::Bool(b) => TplValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    TplValue::Int(i)
                } else {
                    TplValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            other => TplValue::Json(other.clone()),
        }
    }
}

/// Renders a float without a trailing `.0` for whole numbers, so arithmetic
/// on integers never surprises a query parameter.
fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() {
        format!("{f:.0}")
    } else {
        f.to_string()
    }
}

fn eval(
    expr: &Expr,
    ns: &Value,
    now: DateTime<Utc>,
    piped: Option<TplValue>,
) -> Result<TplValue, TemplateError> {
    match expr {
        Expr::Str(s) => Ok(TplValue::Str(s.clone())),
        Expr::Int(n) => Ok(TplValue::Int(*n)),
        Expr::Float(f) => Ok(TplValue::Float(*f)),
        Expr::Path(path) => lookup_path(ns, path),
        Expr::Call { func, args } => {
            let mut values = Vec::with_capacity(args.len() + 1);
            for arg in args {
                values.push(eval(arg, ns, now, None)?);
            }
            if let Some(piped) = piped {
                values.push(piped);
            }
            apply(func, values, now)
        }
        Expr::Pipeline(stages) => {
            let mut value = eval(&stages[0], ns, now, piped)?;
            for stage in &stages[1..] {
                value = eval(stage, ns, now, Some(value))?;
            }
            Ok(value)
        }
    }
}

/// Resolves a dotted path. Keys inside a `header` map fall back to a
/// case-insensitive match so canonical header names resolve against
/// lowercased header maps; body lookups stay exact so typos surface as
/// missing keys.
fn lookup_path(ns: &Value, path: &[String]) -> Result<TplValue, TemplateError> {
    let mut current = ns;
    for (i, key) in path.iter().enumerate() {
        let obj = current.as_object().ok_or_else(|| {
            TemplateError::MissingKey(path[..=i].join("."))
        })?;
        let fold_case = i > 0 && path[i - 1] == "header";
        current = match obj.get(key) {
            Some(v) => v,
            None if fold_case => obj
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
                .ok_or_else(|| TemplateError::MissingKey(path[..=i].join(".")))?,
            None => return Err(TemplateError::MissingKey(path[..=i].join("."))),
        };
    }
    if current.is_null() {
        return Err(TemplateError::MissingKey(path.join(".")));
    }
    Ok(TplValue::from_json(current))
}

// ============================================================================
// Builtin functions
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Num {
    I(i64),
    F(f64),
}

fn to_num(func: &'static str, v: &TplValue) -> Result<Num, TemplateError> {
    match v {
        TplValue::Int(n) => Ok(Num::I(*n)),
        TplValue::Float(f) => Ok(Num::F(*f)),
        TplValue::Json(Value::Number(n)) => n
            .as_i64()
            .map(Num::I)
            .or_else(|| n.as_f64().map(Num::F))
            .ok_or_else(|| bad_args(func, "unsupported number")),
        TplValue::Str(s) => s
            .parse::<i64>()
            .map(Num::I)
            .or_else(|_| s.parse::<f64>().map(Num::F))
            .map_err(|_| bad_args(func, "expected a number")),
        _ => Err(bad_args(func, "expected a number")),
    }
}

fn bad_args(func: &'static str, reason: &str) -> TemplateError {
    TemplateError::BadArgs {
        func,
        reason: reason.to_string(),
    }
}

fn apply(func: &str, args: Vec<TplValue>, now: DateTime<Utc>) -> Result<TplValue, TemplateError> {
    match func {
        "now" => match args.as_slice() {
            [] => Ok(TplValue::Time(now)),
            [TplValue::Dur(d)] => Ok(TplValue::Time(now + *d)),
            _ => Err(bad_args("now", "expected at most one duration")),
        },
        "parseDuration" => match args.as_slice() {
            [TplValue::Str(s)] => parse_go_duration(s).map(TplValue::Dur),
            _ => Err(bad_args("parseDuration", "expected a duration string")),
        },
        "parseDate" => {
            let mut iter = args.into_iter();
            let value = match iter.next() {
                Some(TplValue::Str(s)) => s,
                Some(other) => other.render(),
                None => return Err(bad_args("parseDate", "expected a date string")),
            };
            let layout = match iter.next() {
                Some(TplValue::Str(s)) => s,
                Some(_) => return Err(bad_args("parseDate", "layout must be a string")),
                None => "RFC3339".to_string(),
            };
            let tz = match iter.next() {
                Some(TplValue::Str(s)) => Some(s),
                Some(_) => return Err(bad_args("parseDate", "timezone must be a string")),
                None => None,
            };
            parse_date(&value, &layout, tz.as_deref()).map(TplValue::Time)
        }
        "formatDate" => {
            let mut time = None;
            let mut layout = "RFC3339".to_string();
            let mut tz = None;
            for arg in args {
                match arg {
                    TplValue::Time(t) => time = Some(t),
                    TplValue::Str(s) => {
                        if parse_offset(&s).is_some() {
                            tz = Some(s);
                        } else if layout == "RFC3339" {
                            layout = s;
                        } else if tz.is_none() {
                            tz = Some(s);
                        }
                    }
                    _ => return Err(bad_args("formatDate", "unexpected argument")),
                }
            }
            let time = time.ok_or_else(|| bad_args("formatDate", "expected a time"))?;
            Ok(TplValue::Str(format_date(time, &layout, tz.as_deref())))
        }
        "parseTimestamp" => timestamp_arg("parseTimestamp", &args)
            .and_then(|secs| {
                Utc.timestamp_opt(secs, 0)
                    .single()
                    .ok_or_else(|| bad_args("parseTimestamp", "out of range"))
            })
            .map(TplValue::Time),
        "parseTimestampMilli" => timestamp_arg("parseTimestampMilli", &args)
            .and_then(|ms| {
                Utc.timestamp_millis_opt(ms)
                    .single()
                    .ok_or_else(|| bad_args("parseTimestampMilli", "out of range"))
            })
            .map(TplValue::Time),
        "parseTimestampNano" => timestamp_arg("parseTimestampNano", &args)
            .map(|ns| TplValue::Time(Utc.timestamp_nanos(ns))),
        "getRFC5988Link" => {
            let mut iter = args.into_iter();
            let rel = match iter.next() {
                Some(TplValue::Str(s)) => s,
                _ => return Err(bad_args("getRFC5988Link", "expected a relation name")),
            };
            let links = iter.next().unwrap_or(TplValue::Json(Value::Null));
            Ok(TplValue::Str(rfc5988_link(&rel, &links)))
        }
        "toInt" => match args.as_slice() {
            [v] => Ok(TplValue::Int(coerce_int(v))),
            _ => Err(bad_args("toInt", "expected one value")),
        },
        "add" => fold_nums("add", &args, |a, b| a + b, |a, b| a + b),
        "mul" => fold_nums("mul", &args, |a, b| a * b, |a, b| a * b),
        "div" => match args.as_slice() {
            [a, b] => {
                let a = to_num("div", a)?;
                let b = to_num("div", b)?;
                match (a, b) {
                    (_, Num::I(0)) => Err(bad_args("div", "division by zero")),
                    (Num::I(x), Num::I(y)) => Ok(TplValue::Int(x / y)),
                    (x, y) => Ok(TplValue::Float(as_f64(x) / as_f64(y))),
                }
            }
            _ => Err(bad_args("div", "expected two numbers")),
        },
        "min" => compare_pair("min", args, true),
        "max" => compare_pair("max", args, false),
        "join" => {
            let mut iter = args.into_iter();
            let value = iter.next().ok_or_else(|| bad_args("join", "expected a value"))?;
            let sep = match iter.next() {
                Some(TplValue::Str(s)) => s,
                Some(other) => other.render(),
                None => ",".to_string(),
            };
            Ok(TplValue::Str(join_value(&value, &sep)))
        }
        "format" => {
            let mut iter = args.into_iter();
            let fmt = match iter.next() {
                Some(TplValue::Str(s)) => s,
                _ => return Err(bad_args("format", "expected a format string")),
            };
            let mut out = String::new();
            let mut rest = fmt.as_str();
            for arg in iter {
                match rest.find("{}") {
                    Some(idx) => {
                        out.push_str(&rest[..idx]);
                        out.push_str(&arg.render());
                        rest = &rest[idx + 2..];
                    }
                    None => break,
                }
            }
            out.push_str(rest);
            Ok(TplValue::Str(out))
        }
        other => Err(TemplateError::UnknownFunction(other.to_string())),
    }
}

fn as_f64(n: Num) -> f64 {
    match n {
        Num::I(i) => i as f64,
        Num::F(f) => f,
    }
}

fn timestamp_arg(func: &'static str, args: &[TplValue]) -> Result<i64, TemplateError> {
    match args {
        [v] => match to_num(func, v)? {
            Num::I(i) => Ok(i),
            Num::F(f) => Ok(f as i64),
        },
        _ => Err(bad_args(func, "expected one integer")),
    }
}

fn coerce_int(v: &TplValue) -> i64 {
    match v {
        TplValue::Int(n) => *n,
        TplValue::Float(f) => *f as i64,
        TplValue::Str(s) => s
            .parse::<i64>()
            .or_else(|_| s.parse::<f64>().map(|f| f as i64))
            .unwrap_or(0),
        TplValue::Bool(b) => i64::from(*b),
        TplValue::Json(Value::Number(n)) => n.as_i64().unwrap_or_else(|| {
            n.as_f64().map_or(0, |f| f as i64)
        }),
        _ => 0,
    }
}

fn fold_nums(
    func: &'static str,
    args: &[TplValue],
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> Result<TplValue, TemplateError> {
    if args.is_empty() {
        return Err(bad_args(func, "expected at least one number"));
    }
    let nums = args
        .iter()
        .map(|v| to_num(func, v))
        .collect::<Result<Vec<_>, _>>()?;
    if nums.iter().any(|n| matches!(n, Num::F(_))) {
        let mut acc = as_f64(nums[0]);
        for n in &nums[1..] {
            acc = float_op(acc, as_f64(*n));
        }
        Ok(TplValue::Float(acc))
    } else {
        let mut acc = match nums[0] {
            Num::I(i) => i,
            Num::F(_) => unreachable!(),
        };
        for n in &nums[1..] {
            if let Num::I(i) = n {
                acc = int_op(acc, *i);
            }
        }
        Ok(TplValue::Int(acc))
    }
}

fn compare_pair(
    func: &'static str,
    args: Vec<TplValue>,
    want_min: bool,
) -> Result<TplValue, TemplateError> {
    let [a, b]: [TplValue; 2] = args
        .try_into()
        .map_err(|_| bad_args(func, "expected two values"))?;
    match (&a, &b) {
        (TplValue::Str(x), TplValue::Str(y)) => {
            let pick_a = (x <= y) == want_min;
            Ok(if pick_a { a } else { b })
        }
        (TplValue::Dur(x), TplValue::Dur(y)) => {
            let pick_a = (x <= y) == want_min;
            Ok(if pick_a { a } else { b })
        }
        (TplValue::Time(x), TplValue::Time(y)) => {
            let pick_a = (x <= y) == want_min;
            Ok(if pick_a { a } else { b })
        }
        _ => {
            let x = to_num(func, &a)?;
            let y = to_num(func, &b)?;
            let pick_a = (as_f64(x) <= as_f64(y)) == want_min;
            Ok(if pick_a { a } else { b })
        }
    }
}

fn join_value(v: &TplValue, sep: &str) -> String {
    match v {
        TplValue::Json(Value::Array(items)) => items
            .iter()
            .map(|item| TplValue::from_json(item).render())
            .collect::<Vec<_>>()
            .join(sep),
        other => other.render(),
    }
}

fn rfc5988_link(rel: &str, links: &TplValue) -> String {
    let values: Vec<String> = match links {
        TplValue::Str(s) => vec![s.clone()],
        TplValue::Json(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => return String::new(),
    };
    for value in values {
        for entry in value.split(',') {
            if let Some(captures) = rfc5988_regex().captures(entry.trim()) {
                let url = captures.get(1).map_or("", |m| m.as_str());
                let found = captures.get(2).map_or("", |m| m.as_str());
                if found == rel {
                    return url.to_string();
                }
            }
        }
    }
    String::new()
}

// ============================================================================
// Time helpers
// ============================================================================

/// Maps a named layout to a chrono format string. Returns `None` for names
/// that are not known layouts (callers treat those as custom formats or
/// timezone arguments).
fn layout_format(name: &str) -> Option<&'static str> {
    match name {
        "ANSIC" => Some("%a %b %e %H:%M:%S %Y"),
        "UnixDate" => Some("%a %b %e %H:%M:%S %Z %Y"),
        "RFC1123" => Some("%a, %d %b %Y %H:%M:%S %Z"),
        "RFC3339" | "RFC3339Nano" => Some("%+"),
        "Kitchen" => Some("%l:%M%p"),
        _ => None,
    }
}

fn parse_offset(tz: &str) -> Option<FixedOffset> {
    if tz == "UTC" || tz == "Z" {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match tz.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, tz.strip_prefix('+')?),
    };
    let digits: String = rest.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 4 {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn parse_date(value: &str, layout: &str, tz: Option<&str>) -> Result<DateTime<Utc>, TemplateError> {
    match layout {
        "RFC3339" | "RFC3339Nano" => DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| bad_args("parseDate", &format!("invalid RFC3339 date: {e}"))),
        "RFC1123" | "UnixDate" | "ANSIC" => parse_with_format(
            value,
            layout_format(layout).unwrap_or("%+"),
            tz,
        ),
        custom => parse_with_format(value, custom, tz),
    }
}

fn parse_with_format(
    value: &str,
    format: &str,
    tz: Option<&str>,
) -> Result<DateTime<Utc>, TemplateError> {
    if let Ok(t) = DateTime::parse_from_str(value, format) {
        return Ok(t.with_timezone(&Utc));
    }
    // No timezone in the input; interpret in the given zone, defaulting to
    // UTC. %Z tokens carry no offset for chrono, so strip them for the naive
    // parse.
    let naive_format = format.replace(" %Z", "").replace("%Z", "");
    let naive_value = value.trim();
    let naive = NaiveDateTime::parse_from_str(naive_value, &naive_format)
        .map_err(|e| bad_args("parseDate", &format!("invalid date {value:?}: {e}")))?;
    let offset = tz.and_then(parse_offset).unwrap_or_else(|| {
        FixedOffset::east_opt(0).unwrap_or_else(|| unreachable!())
    });
    match offset.from_local_datetime(&naive).single() {
        Some(t) => Ok(t.with_timezone(&Utc)),
        None => Err(bad_args("parseDate", "ambiguous local time")),
    }
}

fn format_date(time: DateTime<Utc>, layout: &str, tz: Option<&str>) -> String {
    let offset = tz.and_then(parse_offset).unwrap_or_else(|| {
        FixedOffset::east_opt(0).unwrap_or_else(|| unreachable!())
    });
    let local = time.with_timezone(&offset);
    match layout {
        "RFC3339" | "RFC3339Nano" => local.to_rfc3339_opts(SecondsFormat::Secs, true),
        name => match layout_format(name) {
            Some(fmt) => local.format(fmt).to_string(),
            None => local.format(layout).to_string(),
        },
    }
}

/// Parses a Go-style duration string such as `-1h30m10s` or `250ms`.
fn parse_go_duration(s: &str) -> Result<ChronoDuration, TemplateError> {
    let (negative, mut rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    if rest.is_empty() {
        return Err(bad_args("parseDuration", "empty duration"));
    }
    let mut total = ChronoDuration::zero();
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| bad_args("parseDuration", "missing unit"))?;
        let number: f64 = rest[..digits_end]
            .parse()
            .map_err(|_| bad_args("parseDuration", "invalid number"))?;
        rest = &rest[digits_end..];
        let (unit_millis, unit_len) = if rest.starts_with("ms") {
            (1.0, 2)
        } else if rest.starts_with('h') {
            (3_600_000.0, 1)
        } else if rest.starts_with('m') {
            (60_000.0, 1)
        } else if rest.starts_with('s') {
            (1_000.0, 1)
        } else {
            return Err(bad_args("parseDuration", "unknown unit"));
        };
        rest = &rest[unit_len..];
        total = total
            + ChronoDuration::milliseconds((number * unit_millis) as i64);
    }
    Ok(if negative { -total } else { total })
}

/// Formats a duration Go-style: `1h30m0s`, `-15m10s`, `250ms`.
fn format_go_duration(d: ChronoDuration) -> String {
    let negative = d < ChronoDuration::zero();
    let millis = d.num_milliseconds().abs();
    if millis == 0 {
        return "0s".to_string();
    }
    if millis < 1000 {
        return format!("{}{}ms", if negative { "-" } else { "" }, millis);
    }
    let secs = millis / 1000;
    let (hours, rem) = (secs / 3600, secs % 3600);
    let (minutes, seconds) = (rem / 60, rem % 60);
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if hours > 0 {
        out.push_str(&format!("{hours}h{minutes}m{seconds}s"));
    } else if minutes > 0 {
        out.push_str(&format!("{minutes}m{seconds}s"));
    } else {
        out.push_str(&format!("{seconds}s"));
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
