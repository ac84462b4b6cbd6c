/// Evaluation of bound expressions against an ordered list of dependency
/// values. Comparison and truthiness follow the loose scripting-language
/// rules form authors write their `show` rules against: `undefined` and
/// `null` are falsy, `0` and `""` are falsy, `==` coerces between numbers,
/// strings and booleans while `===` does not.
use serde_json::Value;

use super::{CompareOp, Expr};

/// Evaluate to an operand; `None` is `undefined`.
pub fn eval(expr: &Expr, deps: &[Option<Value>]) -> Option<Value> {
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Dep(i) => deps.get(*i).cloned().flatten(),
        // Unbound paths only appear if an expression is evaluated without
        // binding; treat them as undefined.
        Expr::Path(_) => None,
        Expr::Not(inner) => Some(Value::Bool(!truthy(eval(inner, deps).as_ref()))),
        Expr::And(lhs, rhs) => {
            let left = eval(lhs, deps);
            if truthy(left.as_ref()) {
                eval(rhs, deps)
            } else {
                left
            }
        }
        Expr::Or(lhs, rhs) => {
            let left = eval(lhs, deps);
            if truthy(left.as_ref()) {
                left
            } else {
                eval(rhs, deps)
            }
        }
        Expr::Compare { op, lhs, rhs } => {
            let a = eval(lhs, deps);
            let b = eval(rhs, deps);
            Some(Value::Bool(compare(*op, a.as_ref(), b.as_ref())))
        }
    }
}

pub fn truthy(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn compare(op: CompareOp, a: Option<&Value>, b: Option<&Value>) -> bool {
    match op {
        CompareOp::StrictEq => strict_eq(a, b),
        CompareOp::StrictNe => !strict_eq(a, b),
        CompareOp::LooseEq => loose_eq(a, b),
        CompareOp::LooseNe => !loose_eq(a, b),
        CompareOp::Lt => relate(a, b).is_some_and(|o| o.is_lt()),
        CompareOp::Le => relate(a, b).is_some_and(|o| o.is_le()),
        CompareOp::Gt => relate(a, b).is_some_and(|o| o.is_gt()),
        CompareOp::Ge => relate(a, b).is_some_and(|o| o.is_ge()),
    }
}

fn strict_eq(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x.as_f64() == y.as_f64(),
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn loose_eq(a: Option<&Value>, b: Option<&Value>) -> bool {
    let nullish = |v: Option<&Value>| matches!(v, None | Some(Value::Null));
    if nullish(a) || nullish(b) {
        return nullish(a) && nullish(b);
    }
    match (a, b) {
        (Some(Value::String(x)), Some(Value::String(y))) => x == y,
        (Some(x @ (Value::Number(_) | Value::String(_) | Value::Bool(_))), Some(y))
            if matches!(y, Value::Number(_) | Value::String(_) | Value::Bool(_)) =>
        {
            match (to_number(Some(x)), to_number(Some(y))) {
                (Some(p), Some(q)) => p == q,
                _ => false,
            }
        }
        _ => strict_eq(a, b),
    }
}

fn relate(a: Option<&Value>, b: Option<&Value>) -> Option<std::cmp::Ordering> {
    if let (Some(Value::String(x)), Some(Value::String(y))) = (a, b) {
        return Some(x.cmp(y));
    }
    let x = to_number(a)?;
    let y = to_number(b)?;
    x.partial_cmp(&y)
}

fn to_number(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Null => Some(0.0),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                Some(0.0)
            } else {
                s.parse::<f64>().ok()
            }
        }
        Value::Array(_) | Value::Object(_) => None,
    }
}
