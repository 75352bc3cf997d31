//! Template evaluation

use crate::ast::{BinaryOp, Expr, Part, Reference, UnaryOp};
use crate::error::{Cause, InterpolationError, Result};
use crate::functions::lookup_function;
use crate::parser::parse_template;
use schema::Value;
use std::collections::BTreeMap;

/// Source of values for references.
///
/// Returns [`Value::Unknown`] for values that exist but are only known after
/// apply.
pub trait Scope {
    fn resolve(&self, reference: &Reference) -> std::result::Result<Value, Cause>;
}

/// Scope backed by plain maps, keyed by the reference's display form
#[derive(Debug, Clone, Default)]
pub struct MapScope {
    values: BTreeMap<String, Value>,
}

impl MapScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(path.into(), value.into());
        self
    }
}

impl Scope for MapScope {
    fn resolve(&self, reference: &Reference) -> std::result::Result<Value, Cause> {
        if let Some(value) = self.values.get(&reference.to_string()) {
            return Ok(value.clone());
        }
        match reference {
            Reference::Variable { name } => Err(Cause::UndefinedVariable(name.clone())),
            Reference::Resource { attribute, .. } => Err(Cause::UndefinedAttribute {
                resource: reference.resource_address().unwrap_or_default(),
                attribute: attribute.clone(),
            }),
        }
    }
}

/// A parsed template string
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        let parts = parse_template(source).map_err(|cause| InterpolationError::new(source, cause))?;
        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the template contains any `${...}`
    pub fn is_literal(&self) -> bool {
        self.parts.iter().all(|part| matches!(part, Part::Literal(_)))
    }

    /// Every reference in the template
    pub fn references(&self) -> Vec<Reference> {
        let mut out = Vec::new();
        for part in &self.parts {
            if let Part::Expr { expr, .. } = part {
                expr.references(&mut out);
            }
        }
        out
    }

    /// Evaluate against a scope.
    ///
    /// A template that is exactly one `${expr}` yields the expression's own
    /// value; otherwise the parts are concatenated into a string.
    pub fn evaluate(&self, scope: &dyn Scope) -> Result<Value> {
        if let [Part::Expr { expr, source }] = self.parts.as_slice() {
            return eval(expr, scope).map_err(|cause| InterpolationError::new(source.clone(), cause));
        }

        let mut out = String::new();
        let mut unknown = false;
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Expr { expr, source } => {
                    let error = |cause| InterpolationError::new(source.clone(), cause);
                    let value = eval(expr, scope).map_err(error)?;
                    if value.contains_unknown() {
                        unknown = true;
                        continue;
                    }
                    let text = value.to_flat_string().ok_or_else(|| {
                        error(Cause::mismatch(
                            "string interpolation",
                            "primitive",
                            value.type_name(),
                        ))
                    })?;
                    out.push_str(&text);
                }
            }
        }
        if unknown {
            return Ok(Value::Unknown);
        }
        Ok(Value::String(out))
    }
}

/// Interpolate every string inside a value
pub fn interpolate_value(value: &Value, scope: &dyn Scope) -> Result<Value> {
    match value {
        Value::String(s) if s.contains("${") => Template::parse(s)?.evaluate(scope),
        Value::List(items) => items
            .iter()
            .map(|item| interpolate_value(item, scope))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        Value::Set(items) => items
            .iter()
            .map(|item| interpolate_value(item, scope))
            .collect::<Result<Vec<_>>>()
            .map(Value::Set),
        Value::Map(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), interpolate_value(v, scope)?)))
            .collect::<Result<BTreeMap<_, _>>>()
            .map(Value::Map),
        other => Ok(other.clone()),
    }
}

/// Every reference in every string inside a value
pub fn value_references(value: &Value) -> Result<Vec<Reference>> {
    let mut out = Vec::new();
    collect_references(value, &mut out)?;
    Ok(out)
}

fn collect_references(value: &Value, out: &mut Vec<Reference>) -> Result<()> {
    match value {
        Value::String(s) if s.contains("${") => out.extend(Template::parse(s)?.references()),
        Value::List(items) | Value::Set(items) => {
            for item in items {
                collect_references(item, out)?;
            }
        }
        Value::Map(map) => {
            for item in map.values() {
                collect_references(item, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn eval(expr: &Expr, scope: &dyn Scope) -> std::result::Result<Value, Cause> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::List(items) => items
            .iter()
            .map(|item| eval(item, scope))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Value::List),
        Expr::Reference(reference) => scope.resolve(reference),
        Expr::Call { name, args } => {
            let function = lookup_function(name).ok_or_else(|| Cause::UnknownFunction(name.clone()))?;
            let args = args
                .iter()
                .map(|arg| eval(arg, scope))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            function.call(&args).inspect_err(|cause| {
                log::debug!("{name}() with {} argument(s) failed: {cause}", args.len());
            })
        }
        Expr::Index { target, index } => {
            let target = eval(target, scope)?;
            let index = eval(index, scope)?;
            eval_index(&target, &index)
        }
        Expr::Unary { op, expr } => {
            let value = eval(expr, scope)?;
            if value.is_unknown() {
                return Ok(Value::Unknown);
            }
            match op {
                UnaryOp::Neg => number(&value, "-").map(|n| Value::Number(-n)),
                UnaryOp::Not => boolean(&value, "!").map(|b| Value::Bool(!b)),
            }
        }
        Expr::Binary { op, left, right } => eval_binary(*op, left, right, scope),
        Expr::Conditional {
            cond,
            then,
            otherwise,
        } => {
            let cond = eval(cond, scope)?;
            if cond.is_unknown() {
                return Ok(Value::Unknown);
            }
            if boolean(&cond, "conditional")? {
                eval(then, scope)
            } else {
                eval(otherwise, scope)
            }
        }
    }
}

fn number(value: &Value, context: &str) -> std::result::Result<f64, Cause> {
    value
        .as_f64()
        .ok_or_else(|| Cause::mismatch(context, "number", value.type_name()))
}

fn boolean(value: &Value, context: &str) -> std::result::Result<bool, Cause> {
    value
        .as_bool()
        .ok_or_else(|| Cause::mismatch(context, "bool", value.type_name()))
}

fn eval_index(target: &Value, index: &Value) -> std::result::Result<Value, Cause> {
    if target.is_unknown() || index.is_unknown() {
        return Ok(Value::Unknown);
    }
    match target {
        Value::List(items) | Value::Set(items) => {
            let n = number(index, "index")?;
            #[allow(clippy::cast_possible_truncation)]
            let i = n as i64;
            usize::try_from(i)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .ok_or(Cause::IndexOutOfRange {
                    index: i,
                    len: items.len(),
                })
        }
        Value::Map(map) => {
            let key = index
                .to_flat_string()
                .ok_or_else(|| Cause::mismatch("index", "string", index.type_name()))?;
            map.get(&key).cloned().ok_or(Cause::KeyNotFound(key))
        }
        other => Err(Cause::mismatch("index", "list or map", other.type_name())),
    }
}

fn eval_binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    scope: &dyn Scope,
) -> std::result::Result<Value, Cause> {
    let lhs = eval(left, scope)?;

    // Short-circuit on a known left operand.
    if matches!(op, BinaryOp::And | BinaryOp::Or) && !lhs.is_unknown() {
        let l = boolean(&lhs, op.symbol())?;
        match (op, l) {
            (BinaryOp::And, false) => return Ok(Value::Bool(false)),
            (BinaryOp::Or, true) => return Ok(Value::Bool(true)),
            _ => {}
        }
        let rhs = eval(right, scope)?;
        if rhs.is_unknown() {
            return Ok(Value::Unknown);
        }
        return boolean(&rhs, op.symbol()).map(Value::Bool);
    }

    let rhs = eval(right, scope)?;
    if lhs.contains_unknown() || rhs.contains_unknown() {
        return Ok(Value::Unknown);
    }

    let symbol = op.symbol();
    match op {
        BinaryOp::Eq => Ok(Value::Bool(loosely_equal(&lhs, &rhs))),
        BinaryOp::NotEq => Ok(Value::Bool(!loosely_equal(&lhs, &rhs))),
        BinaryOp::And | BinaryOp::Or => Ok(Value::Unknown),
        _ => {
            let a = number(&lhs, symbol)?;
            let b = number(&rhs, symbol)?;
            let value = match op {
                BinaryOp::Add => Value::Number(a + b),
                BinaryOp::Sub => Value::Number(a - b),
                BinaryOp::Mul => Value::Number(a * b),
                BinaryOp::Div if b == 0.0 => return Err(Cause::DivisionByZero),
                BinaryOp::Div => Value::Number(a / b),
                BinaryOp::Rem if b == 0.0 => return Err(Cause::DivisionByZero),
                BinaryOp::Rem => Value::Number(a % b),
                BinaryOp::Lt => Value::Bool(a < b),
                BinaryOp::Le => Value::Bool(a <= b),
                BinaryOp::Gt => Value::Bool(a > b),
                BinaryOp::Ge => Value::Bool(a >= b),
                BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::And | BinaryOp::Or => Value::Unknown,
            };
            Ok(value)
        }
    }
}

/// Equality with weak typing between primitives, so `"5" == 5`
fn loosely_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a.to_flat_string(), b.to_flat_string()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
