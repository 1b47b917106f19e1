//! Statement evaluator for [`HeapEngine`](super::HeapEngine).
//!
//! Understands `var`/`let`/`const` declarations, assignment to globals and
//! object members, literals, member access, `+`/`-` and calls of native
//! functions. Names resolve against the context's global object only.

use pest::error::{Error, ErrorVariant, LineColLocation};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use super::HeapEngine;
use crate::engine::value::{JsNumberType, JsValue, ObjectId};
use crate::engine::{Engine, IsolateId, ScriptError};

#[derive(Parser)]
#[grammar = "engine/heap/script.pest"] // relative to src
struct ScriptParser;

pub(super) fn run(
    engine: &HeapEngine,
    isolate: IsolateId,
    global: ObjectId,
    source: &str,
    origin: &str,
) -> Result<JsValue, ScriptError> {
    let program = ScriptParser::parse(Rule::program, source)
        .map_err(|e| syntax_error(origin, e))?
        .next()
        .ok_or_else(|| ScriptError::Syntax(format!("{}: empty parse", origin)))?;

    let eval = Evaluator {
        engine,
        isolate,
        global,
    };
    let mut last = JsValue::Undefined;
    for pair in program.into_inner() {
        match pair.as_rule() {
            Rule::EOI => {}
            _ => last = eval.statement(pair)?,
        }
    }
    Ok(last)
}

fn syntax_error(origin: &str, e: Error<Rule>) -> ScriptError {
    let (line, col) = match e.line_col {
        LineColLocation::Pos(pos) => pos,
        LineColLocation::Span(start, _) => start,
    };
    let message = match e.variant {
        ErrorVariant::ParsingError { positives, .. } if !positives.is_empty() => {
            format!("expected one of {:?}", positives)
        }
        ErrorVariant::ParsingError { .. } => "unexpected token".to_string(),
        ErrorVariant::CustomError { message } => message,
    };
    ScriptError::Syntax(format!("{}:{}:{}: {}", origin, line, col, message))
}

struct Evaluator<'a> {
    engine: &'a HeapEngine,
    isolate: IsolateId,
    global: ObjectId,
}

impl<'a> Evaluator<'a> {
    fn statement(&self, pair: Pair<Rule>) -> Result<JsValue, ScriptError> {
        match pair.as_rule() {
            Rule::declaration => {
                let mut inner = pair.into_inner().filter(|p| p.as_rule() != Rule::decl_kw);
                let name = next_str(&mut inner)?;
                let value = match inner.next() {
                    Some(expr) => self.expression(expr)?,
                    None => JsValue::Undefined,
                };
                self.engine
                    .set_property(self.isolate, self.global, &name, value)?;
                Ok(JsValue::Undefined)
            }
            Rule::assignment => {
                let mut inner = pair.into_inner();
                let target = inner
                    .next()
                    .ok_or_else(|| unexpected("assignment target"))?;
                let value = self.expression(
                    inner.next().ok_or_else(|| unexpected("assignment value"))?,
                )?;
                self.assign(target, value.clone())?;
                Ok(value)
            }
            Rule::expression => self.expression(pair),
            r => Err(unexpected(&format!("{:?}", r))),
        }
    }

    fn assign(&self, target: Pair<Rule>, value: JsValue) -> Result<(), ScriptError> {
        let names: Vec<&str> = target.into_inner().map(|p| p.as_str()).collect();
        let (last, path) = match names.split_last() {
            Some(split) => split,
            None => return Err(unexpected("empty assignment target")),
        };
        let mut object = self.global;
        let mut resolved = String::new();
        for (i, name) in path.iter().enumerate() {
            let v = if i == 0 {
                self.resolve(name)?
            } else {
                self.engine.get_property(self.isolate, object, name)?
            };
            if !resolved.is_empty() {
                resolved.push('.');
            }
            resolved.push_str(name);
            object = v.as_object().ok_or_else(|| {
                ScriptError::Type(format!("Cannot set property '{}' of {}", last, resolved))
            })?;
        }
        self.engine
            .set_property(self.isolate, object, last, value)
            .map_err(|e| ScriptError::Type(e.to_string()))
    }

    fn resolve(&self, name: &str) -> Result<JsValue, ScriptError> {
        self.engine
            .lookup(self.isolate, self.global, name)?
            .ok_or_else(|| ScriptError::Reference(format!("{} is not defined", name)))
    }

    fn expression(&self, pair: Pair<Rule>) -> Result<JsValue, ScriptError> {
        let mut inner = pair.into_inner();
        let mut acc = self.term(inner.next().ok_or_else(|| unexpected("operand"))?)?;
        while let Some(op) = inner.next() {
            let rhs = self.term(inner.next().ok_or_else(|| unexpected("operand"))?)?;
            acc = match op.as_str() {
                "+" => add(acc, rhs),
                _ => subtract(acc, rhs),
            };
        }
        Ok(acc)
    }

    fn term(&self, pair: Pair<Rule>) -> Result<JsValue, ScriptError> {
        let mut inner = pair.into_inner();
        let mut text = String::new();
        let first = inner.next().ok_or_else(|| unexpected("primary"))?;
        text.push_str(first.as_str());
        let mut value = self.primary(first)?;
        for postfix in inner {
            value = match postfix.as_rule() {
                Rule::member => {
                    let key = postfix.as_str().trim_start_matches('.').trim();
                    let object = value.as_object().ok_or_else(|| {
                        ScriptError::Type(format!("Cannot read property '{}' of {}", key, text))
                    })?;
                    self.engine.get_property(self.isolate, object, key)?
                }
                Rule::call => {
                    let args = postfix
                        .clone()
                        .into_inner()
                        .map(|p| self.expression(p))
                        .collect::<Result<Vec<_>, _>>()?;
                    let function = value
                        .as_object()
                        .ok_or_else(|| ScriptError::Type(format!("{} is not a function", text)))?;
                    self.engine.call_function(self.isolate, function, &args)?
                }
                r => return Err(unexpected(&format!("{:?}", r))),
            };
            text.push_str(postfix.as_str());
        }
        Ok(value)
    }

    fn primary(&self, pair: Pair<Rule>) -> Result<JsValue, ScriptError> {
        match pair.as_rule() {
            Rule::number => parse_number(pair.as_str()),
            Rule::string => {
                let raw = pair.into_inner().next().map_or("", |p| p.as_str());
                Ok(JsValue::String(unescape(raw)))
            }
            Rule::boolean => Ok(JsValue::Boolean(pair.as_str() == "true")),
            Rule::null => Ok(JsValue::Null),
            Rule::undefined => Ok(JsValue::Undefined),
            Rule::identifier => self.resolve(pair.as_str()),
            Rule::expression => self.expression(pair),
            r => Err(unexpected(&format!("{:?}", r))),
        }
    }
}

fn next_str<'i>(inner: &mut impl Iterator<Item = Pair<'i, Rule>>) -> Result<String, ScriptError> {
    inner
        .next()
        .map(|p| p.as_str().to_string())
        .ok_or_else(|| unexpected("identifier"))
}

fn unexpected(what: &str) -> ScriptError {
    ScriptError::Syntax(format!("unexpected {}", what))
}

fn parse_number(text: &str) -> Result<JsValue, ScriptError> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(JsValue::Number(JsNumberType::Integer(i)));
    }
    text.parse::<f64>()
        .map(|f| JsValue::Number(JsNumberType::Float(f)))
        .map_err(|_| ScriptError::Range(format!("invalid number literal {}", text)))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn to_js_string(value: &JsValue) -> String {
    match value {
        JsValue::String(s) => s.clone(),
        JsValue::Number(n) => n.to_string(),
        JsValue::Boolean(b) => b.to_string(),
        JsValue::Undefined => "undefined".to_string(),
        JsValue::Null => "null".to_string(),
        JsValue::Object(_) => "[object Object]".to_string(),
    }
}

fn to_number(value: &JsValue) -> f64 {
    match value {
        JsValue::Number(n) => n.as_f64(),
        JsValue::Boolean(b) => *b as i64 as f64,
        JsValue::Null => 0.0,
        JsValue::String(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
        JsValue::Undefined | JsValue::Object(_) => f64::NAN,
    }
}

fn add(lhs: JsValue, rhs: JsValue) -> JsValue {
    match (&lhs, &rhs) {
        (JsValue::String(_), _) | (_, JsValue::String(_)) => {
            JsValue::String(format!("{}{}", to_js_string(&lhs), to_js_string(&rhs)))
        }
        (
            JsValue::Number(JsNumberType::Integer(a)),
            JsValue::Number(JsNumberType::Integer(b)),
        ) => match a.checked_add(*b) {
            Some(n) => JsValue::Number(JsNumberType::Integer(n)),
            None => JsValue::Number(JsNumberType::Float(*a as f64 + *b as f64)),
        },
        _ => JsValue::Number(JsNumberType::Float(to_number(&lhs) + to_number(&rhs))),
    }
}

fn subtract(lhs: JsValue, rhs: JsValue) -> JsValue {
    match (&lhs, &rhs) {
        (
            JsValue::Number(JsNumberType::Integer(a)),
            JsValue::Number(JsNumberType::Integer(b)),
        ) => match a.checked_sub(*b) {
            Some(n) => JsValue::Number(JsNumberType::Integer(n)),
            None => JsValue::Number(JsNumberType::Float(*a as f64 - *b as f64)),
        },
        _ => JsValue::Number(JsNumberType::Float(to_number(&lhs) - to_number(&rhs))),
    }
}
