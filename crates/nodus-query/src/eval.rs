//! Expression evaluation over a single row
//!
//! Null propagates through arithmetic, comparison and function calls;
//! AND, OR and XOR use three-valued logic.

use crate::ast::{BinaryOp, Expression, Literal, UnaryOp};
use crate::executor::{ExecutionContext, Row};
use nodus_core::temporal;
use nodus_core::{DurationValue, EntityId, Error, Result, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Evaluate an expression against a row
pub fn evaluate(expr: &Expression, row: &Row, ctx: &mut ExecutionContext<'_>) -> Result<Value> {
    match expr {
        Expression::Literal(literal) => Ok(literal_value(literal)),
        Expression::Variable(name) => row.get(name).cloned().ok_or_else(|| {
            Error::QueryExecution(format!("variable `{}` is not bound", name.trim()))
        }),
        Expression::Parameter(name) => ctx
            .params
            .get(name)
            .cloned()
            .ok_or_else(|| Error::QueryExecution(format!("missing parameter ${name}"))),
        Expression::Property(target, key) => {
            let target = evaluate(target, row, ctx)?;
            property(&target, key)
        }
        Expression::Index(target, index) => {
            let target = evaluate(target, row, ctx)?;
            let index = evaluate(index, row, ctx)?;
            subscript(&target, &index)
        }
        Expression::HasLabels(target, labels) => match evaluate(target, row, ctx)? {
            Value::Null => Ok(Value::Null),
            Value::Node(node) => Ok(Value::Boolean(
                labels.iter().all(|l| node.has_label_name(l)),
            )),
            other => Err(Error::QueryExecution(format!(
                "label check needs a node, got {}",
                other.type_name()
            ))),
        },
        Expression::Binary { left, op, right } => binary(left, *op, right, row, ctx),
        Expression::Unary { op, operand } => {
            let value = evaluate(operand, row, ctx)?;
            unary(*op, value)
        }
        Expression::Function { name, args, .. } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(evaluate(arg, row, ctx)?);
            }
            call_function(name, values, ctx)
        }
        Expression::CountStar => Err(Error::Internal(
            "count(*) evaluated outside an aggregation".to_string(),
        )),
        Expression::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(evaluate(item, row, ctx)?);
            }
            Ok(Value::List(values))
        }
        Expression::Map(entries) => {
            let mut map = BTreeMap::new();
            for (key, value) in entries {
                map.insert(key.clone(), evaluate(value, row, ctx)?);
            }
            Ok(Value::Map(map))
        }
    }
}

/// Evaluate a predicate; only `true` passes
pub fn is_true(expr: &Expression, row: &Row, ctx: &mut ExecutionContext<'_>) -> Result<bool> {
    Ok(matches!(evaluate(expr, row, ctx)?, Value::Boolean(true)))
}

pub fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Boolean(b) => Value::Boolean(*b),
        Literal::Integer(i) => Value::Integer(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::String(s.clone()),
    }
}

/// `target.key`
pub fn property(target: &Value, key: &str) -> Result<Value> {
    let found = match target {
        Value::Null => None,
        Value::Node(node) => node.get_property(key).cloned(),
        Value::Relationship(rel) => rel.get_property(key).cloned(),
        Value::Map(map) => map.get(key).cloned(),
        Value::Point(point) => match key {
            "x" => Some(Value::Float(point.x)),
            "y" => Some(Value::Float(point.y)),
            "srid" => Some(Value::Integer(i64::from(point.srid))),
            _ => None,
        },
        Value::Date(days) => temporal::date_component(*days, key).map(Value::Integer),
        Value::DateTime(millis) => datetime_component(*millis, key).map(Value::Integer),
        Value::Duration(duration) => duration_component(duration, key)?.map(Value::Integer),
        other => {
            return Err(Error::QueryExecution(format!(
                "cannot access property `{key}` on {}",
                other.type_name()
            )));
        }
    };
    Ok(found.unwrap_or(Value::Null))
}

fn datetime_component(millis: i64, key: &str) -> Option<i64> {
    let days = i32::try_from(millis.div_euclid(MILLIS_PER_DAY)).ok()?;
    let of_day = millis.rem_euclid(MILLIS_PER_DAY);
    match key {
        "hour" => Some(of_day / 3_600_000),
        "minute" => Some(of_day / 60_000 % 60),
        "second" => Some(of_day / 1000 % 60),
        "millisecond" => Some(of_day % 1000),
        "epochMillis" => Some(millis),
        "epochSeconds" => Some(millis.div_euclid(1000)),
        _ => temporal::date_component(days, key),
    }
}

fn duration_component(duration: &DurationValue, key: &str) -> Result<Option<i64>> {
    if key == "milliseconds" {
        return duration.clock_millis().map(Some).ok_or_else(overflow);
    }
    Ok(match key {
        "years" => Some(duration.months / 12),
        "months" => Some(duration.months),
        "days" => Some(duration.days),
        "hours" => Some(duration.seconds / 3600),
        "minutes" => Some(duration.seconds / 60),
        "seconds" => Some(duration.seconds),
        "nanoseconds" => Some(i64::from(duration.nanos)),
        _ => None,
    })
}

/// `target[index]`; negative list indexes count from the end
fn subscript(target: &Value, index: &Value) -> Result<Value> {
    match (target, index) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::List(items), Value::Integer(i)) => {
            let len = items.len() as i64;
            let position = if *i < 0 { len + i } else { *i };
            Ok(usize::try_from(position)
                .ok()
                .and_then(|p| items.get(p))
                .cloned()
                .unwrap_or(Value::Null))
        }
        (Value::Map(_) | Value::Node(_) | Value::Relationship(_), Value::String(key)) => {
            property(target, key)
        }
        (target, index) => Err(Error::QueryExecution(format!(
            "cannot index {} with {}",
            target.type_name(),
            index.type_name()
        ))),
    }
}

fn truth(value: &Value, op: &str) -> Result<Option<bool>> {
    match value {
        Value::Null => Ok(None),
        Value::Boolean(b) => Ok(Some(*b)),
        other => Err(Error::QueryExecution(format!(
            "{op} needs boolean operands, got {}",
            other.type_name()
        ))),
    }
}

fn from_truth(value: Option<bool>) -> Value {
    value.map(Value::Boolean).unwrap_or(Value::Null)
}

fn binary(
    left: &Expression,
    op: BinaryOp,
    right: &Expression,
    row: &Row,
    ctx: &mut ExecutionContext<'_>,
) -> Result<Value> {
    match op {
        BinaryOp::And => {
            let l = truth(&evaluate(left, row, ctx)?, "AND")?;
            if l == Some(false) {
                return Ok(Value::Boolean(false));
            }
            let r = truth(&evaluate(right, row, ctx)?, "AND")?;
            Ok(match (l, r) {
                (_, Some(false)) => Value::Boolean(false),
                (Some(true), Some(true)) => Value::Boolean(true),
                _ => Value::Null,
            })
        }
        BinaryOp::Or => {
            let l = truth(&evaluate(left, row, ctx)?, "OR")?;
            if l == Some(true) {
                return Ok(Value::Boolean(true));
            }
            let r = truth(&evaluate(right, row, ctx)?, "OR")?;
            Ok(match (l, r) {
                (_, Some(true)) => Value::Boolean(true),
                (Some(false), Some(false)) => Value::Boolean(false),
                _ => Value::Null,
            })
        }
        BinaryOp::Xor => {
            let l = truth(&evaluate(left, row, ctx)?, "XOR")?;
            let r = truth(&evaluate(right, row, ctx)?, "XOR")?;
            Ok(from_truth(l.zip(r).map(|(a, b)| a != b)))
        }
        _ => {
            let l = evaluate(left, row, ctx)?;
            let r = evaluate(right, row, ctx)?;
            apply_binary(op, &l, &r)
        }
    }
}

/// Apply a non-logical binary operator to evaluated operands
pub fn apply_binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    match op {
        BinaryOp::Equals => Ok(from_truth(l.equals(r))),
        BinaryOp::NotEquals => Ok(from_truth(l.equals(r).map(|b| !b))),
        BinaryOp::LessThan => Ok(from_truth(l.compare(r).map(Ordering::is_lt))),
        BinaryOp::LessEquals => Ok(from_truth(l.compare(r).map(Ordering::is_le))),
        BinaryOp::GreaterThan => Ok(from_truth(l.compare(r).map(Ordering::is_gt))),
        BinaryOp::GreaterEquals => Ok(from_truth(l.compare(r).map(Ordering::is_ge))),
        BinaryOp::Contains | BinaryOp::StartsWith | BinaryOp::EndsWith => {
            let (Some(haystack), Some(needle)) = (l.as_str(), r.as_str()) else {
                return Ok(Value::Null);
            };
            Ok(Value::Boolean(match op {
                BinaryOp::Contains => haystack.contains(needle),
                BinaryOp::StartsWith => haystack.starts_with(needle),
                _ => haystack.ends_with(needle),
            }))
        }
        BinaryOp::In => membership(l, r),
        BinaryOp::Add
        | BinaryOp::Subtract
        | BinaryOp::Multiply
        | BinaryOp::Divide
        | BinaryOp::Modulo
        | BinaryOp::Power => arithmetic(op, l, r),
        BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => {
            let l = truth(l, "logical operator")?;
            let r = truth(r, "logical operator")?;
            Ok(from_truth(match op {
                BinaryOp::And => match (l, r) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                },
                BinaryOp::Or => match (l, r) {
                    (Some(true), _) | (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                },
                _ => l.zip(r).map(|(a, b)| a != b),
            }))
        }
    }
}

/// Three-valued `IN`: null when no element matches but some comparison was unknown
fn membership(item: &Value, list: &Value) -> Result<Value> {
    let items = match list {
        Value::Null => return Ok(Value::Null),
        Value::List(items) => items,
        other => {
            return Err(Error::QueryExecution(format!(
                "IN needs a list on the right, got {}",
                other.type_name()
            )));
        }
    };
    let mut unknown = false;
    for candidate in items {
        match item.equals(candidate) {
            Some(true) => return Ok(Value::Boolean(true)),
            Some(false) => {}
            None => unknown = true,
        }
    }
    Ok(if unknown {
        Value::Null
    } else {
        Value::Boolean(false)
    })
}

fn overflow() -> Error {
    Error::QueryExecution("integer overflow".to_string())
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    use Value::*;

    if l.is_null() || r.is_null() {
        return Ok(Null);
    }
    let result = match (op, l, r) {
        (BinaryOp::Add, Integer(a), Integer(b)) => Integer(a.checked_add(*b).ok_or_else(overflow)?),
        (BinaryOp::Subtract, Integer(a), Integer(b)) => {
            Integer(a.checked_sub(*b).ok_or_else(overflow)?)
        }
        (BinaryOp::Multiply, Integer(a), Integer(b)) => {
            Integer(a.checked_mul(*b).ok_or_else(overflow)?)
        }
        (BinaryOp::Divide | BinaryOp::Modulo, Integer(_), Integer(0)) => {
            return Err(Error::QueryExecution("division by zero".to_string()));
        }
        (BinaryOp::Divide, Integer(a), Integer(b)) => {
            Integer(a.checked_div(*b).ok_or_else(overflow)?)
        }
        (BinaryOp::Modulo, Integer(a), Integer(b)) => {
            Integer(a.checked_rem(*b).ok_or_else(overflow)?)
        }
        (_, a, b) if a.is_number() && b.is_number() => {
            let x = a.as_float().unwrap_or(f64::NAN);
            let y = b.as_float().unwrap_or(f64::NAN);
            Float(match op {
                BinaryOp::Add => x + y,
                BinaryOp::Subtract => x - y,
                BinaryOp::Multiply => x * y,
                BinaryOp::Divide => x / y,
                BinaryOp::Modulo => x % y,
                _ => x.powf(y),
            })
        }

        (BinaryOp::Add, String(a), String(b)) => String(format!("{a}{b}")),
        (BinaryOp::Add, String(a), b @ (Integer(_) | Float(_) | Boolean(_))) => {
            String(format!("{a}{b}"))
        }
        (BinaryOp::Add, a @ (Integer(_) | Float(_) | Boolean(_)), String(b)) => {
            String(format!("{a}{b}"))
        }

        (BinaryOp::Add, List(a), List(b)) => List(a.iter().chain(b).cloned().collect()),
        (BinaryOp::Add, List(a), b) => {
            let mut items = a.clone();
            items.push(b.clone());
            List(items)
        }
        (BinaryOp::Add, a, List(b)) => {
            let mut items = Vec::with_capacity(b.len() + 1);
            items.push(a.clone());
            items.extend(b.iter().cloned());
            List(items)
        }

        (BinaryOp::Add, Date(d), Duration(dur)) | (BinaryOp::Add, Duration(dur), Date(d)) => {
            Date(temporal::add_duration_to_date(*d, dur)?)
        }
        (BinaryOp::Subtract, Date(d), Duration(dur)) => {
            Date(temporal::add_duration_to_date(*d, &dur.negate()?)?)
        }
        (BinaryOp::Add, DateTime(t), Duration(dur))
        | (BinaryOp::Add, Duration(dur), DateTime(t)) => {
            DateTime(temporal::add_duration_to_datetime(*t, dur)?)
        }
        (BinaryOp::Subtract, DateTime(t), Duration(dur)) => {
            DateTime(temporal::add_duration_to_datetime(*t, &dur.negate()?)?)
        }
        (BinaryOp::Add, Duration(a), Duration(b)) => Duration(a.add(b)?),
        (BinaryOp::Subtract, Duration(a), Duration(b)) => Duration(a.add(&b.negate()?)?),
        (BinaryOp::Subtract, DateTime(a), DateTime(b)) => {
            Duration(DurationValue::between_millis(*b, *a)?)
        }
        (BinaryOp::Subtract, Date(a), Date(b)) => {
            Duration(DurationValue::new(0, i64::from(*a) - i64::from(*b), 0, 0)?)
        }

        (op, a, b) => {
            return Err(Error::QueryExecution(format!(
                "cannot apply {} to {} and {}",
                operator_symbol(op),
                a.type_name(),
                b.type_name()
            )));
        }
    };
    Ok(result)
}

fn operator_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Subtract => "-",
        BinaryOp::Multiply => "*",
        BinaryOp::Divide => "/",
        BinaryOp::Modulo => "%",
        BinaryOp::Power => "^",
        _ => "operator",
    }
}

fn unary(op: UnaryOp, value: Value) -> Result<Value> {
    match op {
        UnaryOp::IsNull => Ok(Value::Boolean(value.is_null())),
        UnaryOp::IsNotNull => Ok(Value::Boolean(!value.is_null())),
        UnaryOp::Not => Ok(from_truth(truth(&value, "NOT")?.map(|b| !b))),
        UnaryOp::Negate => match value {
            Value::Null => Ok(Value::Null),
            Value::Integer(i) => Ok(Value::Integer(i.checked_neg().ok_or_else(overflow)?)),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Duration(d) => Ok(Value::Duration(d.negate()?)),
            other => Err(Error::QueryExecution(format!(
                "cannot negate {}",
                other.type_name()
            ))),
        },
    }
}

/// Built-in entity functions first, then the registry
fn call_function(name: &str, args: Vec<Value>, ctx: &mut ExecutionContext<'_>) -> Result<Value> {
    let lower = name.to_ascii_lowercase();
    if !crate::planner::ENTITY_FUNCTIONS.contains(&lower.as_str()) {
        return ctx.functions.call(name, &args);
    }

    if args.len() != 1 {
        return Err(Error::type_error(
            name,
            args.len().min(1) + 1,
            format!("expected 1 argument(s), got {}", args.len()),
        ));
    }
    let Some(arg) = args.into_iter().next() else {
        return Ok(Value::Null);
    };
    if arg.is_null() {
        return Ok(Value::Null);
    }
    let mismatch = |expected: &str, got: &Value| {
        Error::type_error(name, 1, format!("expected {expected}, got {}", got.type_name()))
    };

    match (lower.as_str(), &arg) {
        ("id", Value::Node(node)) => Ok(Value::Integer(node.id.as_internal() as i64)),
        ("id", Value::Relationship(rel)) => Ok(Value::Integer(rel.id.as_internal() as i64)),
        ("id", other) => Err(mismatch("a node or relationship", other)),

        ("labels", Value::Node(node)) => Ok(Value::List(
            node.labels
                .iter()
                .map(|l| Value::String(l.name().to_string()))
                .collect(),
        )),
        ("labels", other) => Err(mismatch("a node", other)),

        ("type", Value::Relationship(rel)) => Ok(Value::String(rel.rel_type.name().to_string())),
        ("type", other) => Err(mismatch("a relationship", other)),

        ("keys", Value::Node(node)) => Ok(key_list(node.properties.keys())),
        ("keys", Value::Relationship(rel)) => Ok(key_list(rel.properties.keys())),
        ("keys", Value::Map(map)) => Ok(key_list(map.keys())),
        ("keys", other) => Err(mismatch("a node, relationship or map", other)),

        ("properties", Value::Node(node)) => Ok(node.properties.to_value()),
        ("properties", Value::Relationship(rel)) => Ok(rel.properties.to_value()),
        ("properties", Value::Map(_)) => Ok(arg),
        ("properties", other) => Err(mismatch("a node, relationship or map", other)),

        ("length", Value::Path(path)) => Ok(Value::Integer(path.len() as i64)),
        ("length", other) => Err(mismatch("a path", other)),

        ("nodes", Value::Path(path)) => Ok(Value::List(
            path.nodes.iter().cloned().map(Value::from).collect(),
        )),
        ("nodes", other) => Err(mismatch("a path", other)),

        ("relationships", Value::Path(path)) => Ok(Value::List(
            path.relationships.iter().cloned().map(Value::from).collect(),
        )),
        ("relationships", other) => Err(mismatch("a path", other)),

        ("startnode", Value::Relationship(rel)) => Ok(ctx.tx.get_node(rel.source)?.into()),
        ("endnode", Value::Relationship(rel)) => Ok(ctx.tx.get_node(rel.target)?.into()),
        (_, other) => Err(mismatch("a relationship", other)),
    }
}

fn key_list<'k>(keys: impl Iterator<Item = &'k String>) -> Value {
    Value::List(keys.map(|k| Value::String(k.clone())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Value {
        Value::Integer(i)
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(apply_binary(BinaryOp::Add, &int(2), &int(3)).unwrap(), int(5));
        assert_eq!(apply_binary(BinaryOp::Divide, &int(7), &int(2)).unwrap(), int(3));
        assert_eq!(apply_binary(BinaryOp::Modulo, &int(7), &int(3)).unwrap(), int(1));
        assert!(apply_binary(BinaryOp::Divide, &int(1), &int(0)).is_err());
        assert!(apply_binary(BinaryOp::Add, &int(i64::MAX), &int(1)).is_err());
        assert_eq!(
            apply_binary(BinaryOp::Power, &int(2), &int(3)).unwrap(),
            Value::Float(8.0)
        );
    }

    #[test]
    fn test_mixed_and_null_arithmetic() {
        assert_eq!(
            apply_binary(BinaryOp::Multiply, &int(2), &Value::Float(1.5)).unwrap(),
            Value::Float(3.0)
        );
        assert_eq!(
            apply_binary(BinaryOp::Add, &Value::Null, &int(1)).unwrap(),
            Value::Null
        );
        assert_eq!(
            apply_binary(BinaryOp::Add, &Value::String("a".into()), &int(1)).unwrap(),
            Value::String("a1".into())
        );
        assert!(apply_binary(BinaryOp::Subtract, &Value::String("a".into()), &int(1)).is_err());
    }

    #[test]
    fn test_list_concatenation() {
        let list = Value::List(vec![int(1)]);
        assert_eq!(
            apply_binary(BinaryOp::Add, &list, &int(2)).unwrap(),
            Value::List(vec![int(1), int(2)])
        );
        assert_eq!(
            apply_binary(BinaryOp::Add, &list, &list).unwrap(),
            Value::List(vec![int(1), int(1)])
        );
    }

    #[test]
    fn test_comparisons_with_null() {
        assert_eq!(
            apply_binary(BinaryOp::Equals, &Value::Null, &int(1)).unwrap(),
            Value::Null
        );
        assert_eq!(
            apply_binary(BinaryOp::LessThan, &int(1), &Value::Float(1.5)).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            apply_binary(BinaryOp::LessThan, &int(1), &Value::String("a".into())).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_three_valued_in() {
        let list = Value::List(vec![int(1), Value::Null]);
        assert_eq!(membership(&int(1), &list).unwrap(), Value::Boolean(true));
        assert_eq!(membership(&int(2), &list).unwrap(), Value::Null);
        assert_eq!(
            membership(&int(2), &Value::List(vec![int(1)])).unwrap(),
            Value::Boolean(false)
        );
        assert!(membership(&int(1), &int(1)).is_err());
    }

    #[test]
    fn test_string_predicates() {
        let s = Value::String("graph".into());
        assert_eq!(
            apply_binary(BinaryOp::StartsWith, &s, &Value::String("gr".into())).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            apply_binary(BinaryOp::Contains, &s, &int(1)).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_property_access() {
        let mut map = BTreeMap::new();
        map.insert("k".to_string(), int(1));
        assert_eq!(property(&Value::Map(map), "k").unwrap(), int(1));
        assert_eq!(property(&Value::Null, "k").unwrap(), Value::Null);
        assert!(property(&int(1), "k").is_err());

        let date = temporal::parse_date("2024-03-15").unwrap();
        assert_eq!(property(&Value::Date(date), "month").unwrap(), int(3));
    }

    #[test]
    fn test_subscript() {
        let list = Value::List(vec![int(1), int(2), int(3)]);
        assert_eq!(subscript(&list, &int(-1)).unwrap(), int(3));
        assert_eq!(subscript(&list, &int(5)).unwrap(), Value::Null);
        assert!(subscript(&int(1), &int(0)).is_err());
    }

    #[test]
    fn test_temporal_arithmetic() {
        let date = temporal::parse_date("2024-01-31").unwrap();
        let month = temporal::parse_duration("P1M").unwrap();
        let later = apply_binary(BinaryOp::Add, &Value::Date(date), &Value::Duration(month)).unwrap();
        assert_eq!(later.to_string(), "2024-02-29");

        let a = temporal::parse_date("2024-01-10").unwrap();
        let b = temporal::parse_date("2024-01-01").unwrap();
        let diff = apply_binary(BinaryOp::Subtract, &Value::Date(a), &Value::Date(b)).unwrap();
        assert_eq!(diff, Value::Duration(DurationValue::new(0, 9, 0, 0).unwrap()));
    }

    #[test]
    fn test_temporal_overflow_is_an_error() {
        let long = Value::Duration(DurationValue::new(0, 0, i64::MAX, 0).unwrap());
        assert!(matches!(
            property(&long, "milliseconds"),
            Err(Error::QueryExecution(_))
        ));
        assert_eq!(property(&long, "seconds").unwrap(), int(i64::MAX));

        assert!(apply_binary(BinaryOp::Add, &long, &long).is_err());
        assert!(apply_binary(BinaryOp::Add, &Value::Date(0), &long).is_err());
        assert!(
            apply_binary(BinaryOp::Subtract, &Value::DateTime(i64::MIN), &Value::DateTime(1))
                .is_err()
        );
        let most_negative = Value::Duration(DurationValue::new(i64::MIN, 0, 0, 0).unwrap());
        assert!(unary(UnaryOp::Negate, most_negative).is_err());
    }

    #[test]
    fn test_unary_operators() {
        assert_eq!(unary(UnaryOp::Not, Value::Boolean(true)).unwrap(), Value::Boolean(false));
        assert_eq!(unary(UnaryOp::Not, Value::Null).unwrap(), Value::Null);
        assert_eq!(unary(UnaryOp::IsNull, Value::Null).unwrap(), Value::Boolean(true));
        assert!(unary(UnaryOp::Negate, Value::String("x".into())).is_err());
    }
}
