//! Built-in interpolation functions

use crate::error::Cause;
use schema::Value;
use std::collections::BTreeMap;

type FunctionResult = Result<Value, Cause>;

/// Accepted argument counts
#[derive(Debug, Clone, Copy)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Between(usize, usize),
}

impl Arity {
    fn accepts(self, n: usize) -> bool {
        match self {
            Self::Exact(expected) => n == expected,
            Self::AtLeast(min) => n >= min,
            Self::Between(min, max) => (min..=max).contains(&n),
        }
    }

    fn describe(self) -> String {
        match self {
            Self::Exact(n) => n.to_string(),
            Self::AtLeast(n) => format!("at least {n}"),
            Self::Between(min, max) => format!("{min} to {max}"),
        }
    }
}

/// A named built-in
#[derive(Debug, Clone, Copy)]
pub struct Function {
    pub name: &'static str,
    pub arity: Arity,
    call: fn(&[Value]) -> FunctionResult,
}

impl Function {
    /// Check arity and invoke. Any unknown argument makes the result unknown.
    pub fn call(&self, args: &[Value]) -> FunctionResult {
        if !self.arity.accepts(args.len()) {
            return Err(Cause::Arity {
                function: self.name.to_string(),
                expected: self.arity.describe(),
                found: args.len(),
            });
        }
        if args.iter().any(Value::contains_unknown) {
            return Ok(Value::Unknown);
        }
        (self.call)(args)
    }
}

const FUNCTIONS: &[Function] = &[
    Function { name: "abs", arity: Arity::Exact(1), call: abs },
    Function { name: "coalesce", arity: Arity::AtLeast(1), call: coalesce },
    Function { name: "concat", arity: Arity::AtLeast(1), call: concat },
    Function { name: "contains", arity: Arity::Exact(2), call: contains },
    Function { name: "element", arity: Arity::Exact(2), call: element },
    Function { name: "format", arity: Arity::AtLeast(1), call: format },
    Function { name: "join", arity: Arity::AtLeast(2), call: join },
    Function { name: "keys", arity: Arity::Exact(1), call: keys },
    Function { name: "length", arity: Arity::Exact(1), call: length },
    Function { name: "lookup", arity: Arity::Between(2, 3), call: lookup },
    Function { name: "lower", arity: Arity::Exact(1), call: lower },
    Function { name: "max", arity: Arity::AtLeast(1), call: max },
    Function { name: "min", arity: Arity::AtLeast(1), call: min },
    Function { name: "replace", arity: Arity::Exact(3), call: replace },
    Function { name: "split", arity: Arity::Exact(2), call: split },
    Function { name: "substr", arity: Arity::Exact(3), call: substr },
    Function { name: "title", arity: Arity::Exact(1), call: title },
    Function { name: "trimspace", arity: Arity::Exact(1), call: trimspace },
    Function { name: "upper", arity: Arity::Exact(1), call: upper },
    Function { name: "values", arity: Arity::Exact(1), call: values },
];

/// Look up a built-in by name
pub fn lookup_function(name: &str) -> Option<&'static Function> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

/// Names of all built-ins
pub fn function_names() -> impl Iterator<Item = &'static str> {
    FUNCTIONS.iter().map(|f| f.name)
}

fn string_arg(function: &str, value: &Value) -> Result<String, Cause> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(_) | Value::Bool(_) => Ok(value.to_flat_string().unwrap_or_default()),
        other => Err(Cause::mismatch(function, "string", other.type_name())),
    }
}

fn number_arg(function: &str, value: &Value) -> Result<f64, Cause> {
    value
        .as_f64()
        .ok_or_else(|| Cause::mismatch(function, "number", value.type_name()))
}

fn list_arg<'v>(function: &str, value: &'v Value) -> Result<&'v [Value], Cause> {
    value
        .as_list()
        .ok_or_else(|| Cause::mismatch(function, "list", value.type_name()))
}

fn map_arg<'v>(function: &str, value: &'v Value) -> Result<&'v BTreeMap<String, Value>, Cause> {
    value
        .as_map()
        .ok_or_else(|| Cause::mismatch(function, "map", value.type_name()))
}

fn upper(args: &[Value]) -> FunctionResult {
    Ok(Value::String(string_arg("upper", &args[0])?.to_uppercase()))
}

fn lower(args: &[Value]) -> FunctionResult {
    Ok(Value::String(string_arg("lower", &args[0])?.to_lowercase()))
}

fn title(args: &[Value]) -> FunctionResult {
    let s = string_arg("title", &args[0])?;
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start && c.is_alphabetic() {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !c.is_alphanumeric();
    }
    Ok(Value::String(out))
}

fn trimspace(args: &[Value]) -> FunctionResult {
    Ok(Value::String(string_arg("trimspace", &args[0])?.trim().to_string()))
}

fn join(args: &[Value]) -> FunctionResult {
    let sep = string_arg("join", &args[0])?;
    let mut items = Vec::new();
    for list in &args[1..] {
        for item in list_arg("join", list)? {
            items.push(string_arg("join", item)?);
        }
    }
    Ok(Value::String(items.join(&sep)))
}

fn split(args: &[Value]) -> FunctionResult {
    let sep = string_arg("split", &args[0])?;
    let s = string_arg("split", &args[1])?;
    if s.is_empty() {
        return Ok(Value::List(Vec::new()));
    }
    Ok(Value::string_list(s.split(sep.as_str())))
}

fn length(args: &[Value]) -> FunctionResult {
    let n = match &args[0] {
        Value::List(items) | Value::Set(items) => items.len(),
        Value::Map(map) => map.len(),
        Value::String(s) => s.chars().count(),
        other => return Err(Cause::mismatch("length", "list, map or string", other.type_name())),
    };
    Ok(Value::Number(n as f64))
}

fn concat(args: &[Value]) -> FunctionResult {
    let mut out = Vec::new();
    for list in args {
        out.extend(list_arg("concat", list)?.iter().cloned());
    }
    Ok(Value::List(out))
}

fn index_arg(function: &str, value: &Value) -> Result<i64, Cause> {
    let n = number_arg(function, value)?;
    if n.fract() != 0.0 {
        return Err(Cause::mismatch(function, "integer", "number"));
    }
    #[allow(clippy::cast_possible_truncation)]
    let n = n as i64;
    Ok(n)
}

fn element(args: &[Value]) -> FunctionResult {
    let items = list_arg("element", &args[0])?;
    let index = index_arg("element", &args[1])?;
    if items.is_empty() || index < 0 {
        return Err(Cause::IndexOutOfRange {
            index,
            len: items.len(),
        });
    }
    // Indexes past the end wrap around.
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let i = (index as usize) % items.len();
    Ok(items[i].clone())
}

fn lookup(args: &[Value]) -> FunctionResult {
    let map = map_arg("lookup", &args[0])?;
    let key = string_arg("lookup", &args[1])?;
    match (map.get(&key), args.get(2)) {
        (Some(value), _) => Ok(value.clone()),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(Cause::KeyNotFound(key)),
    }
}

fn format(args: &[Value]) -> FunctionResult {
    let pattern = string_arg("format", &args[0])?;
    let mut rest = args[1..].iter();
    let mut out = String::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(d);
                chars.next();
            }
            precision = digits.parse::<usize>().ok();
        }
        let Some(verb) = chars.next() else {
            return Err(Cause::InvalidArgument("format: trailing %".to_string()));
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        let Some(arg) = rest.next() else {
            return Err(Cause::Arity {
                function: "format".to_string(),
                expected: format!("at least {}", args.len() + 1),
                found: args.len(),
            });
        };
        match verb {
            's' | 'v' => out.push_str(&string_arg("format", arg)?),
            'd' => {
                let n = index_arg("format", arg)?;
                out.push_str(&n.to_string());
            }
            'f' => {
                let n = number_arg("format", arg)?;
                out.push_str(&format!("{n:.*}", precision.unwrap_or(6)));
            }
            't' => {
                let b = arg
                    .as_bool()
                    .ok_or_else(|| Cause::mismatch("format", "bool", arg.type_name()))?;
                out.push_str(&b.to_string());
            }
            other => {
                return Err(Cause::InvalidArgument(format!(
                    "format: unsupported verb %{other}"
                )));
            }
        }
    }
    Ok(Value::String(out))
}

fn replace(args: &[Value]) -> FunctionResult {
    let s = string_arg("replace", &args[0])?;
    let search = string_arg("replace", &args[1])?;
    let replacement = string_arg("replace", &args[2])?;
    // `/pattern/` searches are regular expressions.
    if search.len() > 1 && search.starts_with('/') && search.ends_with('/') {
        let pattern = &search[1..search.len() - 1];
        let re = regex::Regex::new(pattern)
            .map_err(|err| Cause::InvalidArgument(format!("replace: {err}")))?;
        return Ok(Value::String(re.replace_all(&s, replacement.as_str()).into_owned()));
    }
    Ok(Value::String(s.replace(&search, &replacement)))
}

fn fold_numbers(function: &str, args: &[Value], pick: fn(f64, f64) -> f64) -> FunctionResult {
    let mut numbers = Vec::new();
    for arg in args {
        match arg {
            Value::List(items) | Value::Set(items) => {
                for item in items {
                    numbers.push(number_arg(function, item)?);
                }
            }
            other => numbers.push(number_arg(function, other)?),
        }
    }
    numbers
        .into_iter()
        .reduce(pick)
        .map(Value::Number)
        .ok_or_else(|| Cause::InvalidArgument(format!("{function}: no values")))
}

fn min(args: &[Value]) -> FunctionResult {
    fold_numbers("min", args, f64::min)
}

fn max(args: &[Value]) -> FunctionResult {
    fold_numbers("max", args, f64::max)
}

fn abs(args: &[Value]) -> FunctionResult {
    Ok(Value::Number(number_arg("abs", &args[0])?.abs()))
}

fn coalesce(args: &[Value]) -> FunctionResult {
    for arg in args {
        let s = string_arg("coalesce", arg)?;
        if !s.is_empty() {
            return Ok(arg.clone());
        }
    }
    Ok(Value::String(String::new()))
}

fn substr(args: &[Value]) -> FunctionResult {
    let s: Vec<char> = string_arg("substr", &args[0])?.chars().collect();
    let offset = index_arg("substr", &args[1])?;
    let length = index_arg("substr", &args[2])?;
    let len = s.len() as i64;

    let start = if offset < 0 { len + offset } else { offset };
    if start < 0 || start > len {
        return Err(Cause::IndexOutOfRange {
            index: offset,
            len: s.len(),
        });
    }
    let end = if length < 0 { len } else { start + length };
    if end > len {
        return Err(Cause::IndexOutOfRange {
            index: end,
            len: s.len(),
        });
    }
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let out: String = s[start as usize..end as usize].iter().collect();
    Ok(Value::String(out))
}

fn contains(args: &[Value]) -> FunctionResult {
    let items = list_arg("contains", &args[0])?;
    let needle = &args[1];
    let found = items.iter().any(|item| {
        item == needle || item.to_flat_string().is_some_and(|s| needle.to_flat_string() == Some(s))
    });
    Ok(Value::Bool(found))
}

fn keys(args: &[Value]) -> FunctionResult {
    let map = map_arg("keys", &args[0])?;
    Ok(Value::string_list(map.keys().cloned()))
}

fn values(args: &[Value]) -> FunctionResult {
    let map = map_arg("values", &args[0])?;
    Ok(Value::List(map.values().cloned().collect()))
}
