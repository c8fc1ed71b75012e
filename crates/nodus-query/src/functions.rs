//! Scalar function registry
//!
//! Functions are looked up by lower-cased name and described by a
//! [`Signature`]: the accepted arity and the [`ArgKind`] of each argument,
//! paired with a plain function pointer. The registry checks arity and
//! argument kinds before dispatching, so every function sees only non-null
//! arguments of the kinds it declared. A null argument short-circuits the
//! call to null.

use nodus_core::temporal;
use nodus_core::{DurationValue, Error, Point, Result, Value};
use rand::Rng;
use std::collections::HashMap;

/// Kind of value a function argument accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Any,
    Number,
    Integer,
    String,
    Map,
    Point,
    /// Strings or lists
    Sized,
    /// Strings, maps or temporal values
    TemporalSource,
}

impl ArgKind {
    /// Whether a non-null value is acceptable for this kind
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ArgKind::Any => true,
            ArgKind::Number => value.is_number(),
            ArgKind::Integer => matches!(value, Value::Integer(_)),
            ArgKind::String => matches!(value, Value::String(_)),
            ArgKind::Map => matches!(value, Value::Map(_)),
            ArgKind::Point => matches!(value, Value::Point(_)),
            ArgKind::Sized => matches!(value, Value::String(_) | Value::List(_)),
            ArgKind::TemporalSource => matches!(
                value,
                Value::String(_) | Value::Map(_) | Value::Date(_) | Value::DateTime(_)
            ),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            ArgKind::Any => "any value",
            ArgKind::Number => "a number",
            ArgKind::Integer => "an integer",
            ArgKind::String => "a string",
            ArgKind::Map => "a map",
            ArgKind::Point => "a point",
            ArgKind::Sized => "a string or a list",
            ArgKind::TemporalSource => "a string, a map or a temporal value",
        }
    }
}

pub type Nullary = fn() -> Result<Value>;
pub type Unary = fn(&Value) -> Result<Value>;
pub type Binary = fn(&Value, &Value) -> Result<Value>;
pub type OptionalUnary = fn(Option<&Value>) -> Result<Value>;
pub type UnaryOrBinary = fn(&Value, Option<&Value>) -> Result<Value>;

/// Arity and argument kinds of a function, with its implementation
#[derive(Clone, Copy)]
pub enum Signature {
    Nullary(Nullary),
    Unary(ArgKind, Unary),
    Binary(ArgKind, ArgKind, Binary),
    /// Zero or one argument
    OptionalUnary(ArgKind, OptionalUnary),
    /// One or two arguments
    UnaryOrBinary(ArgKind, ArgKind, UnaryOrBinary),
}

impl Signature {
    fn arity(&self) -> (usize, usize) {
        match self {
            Signature::Nullary(_) => (0, 0),
            Signature::Unary(..) => (1, 1),
            Signature::Binary(..) => (2, 2),
            Signature::OptionalUnary(..) => (0, 1),
            Signature::UnaryOrBinary(..) => (1, 2),
        }
    }

    fn kinds(&self) -> Vec<ArgKind> {
        match self {
            Signature::Nullary(_) => vec![],
            Signature::Unary(a, _) | Signature::OptionalUnary(a, _) => vec![*a],
            Signature::Binary(a, b, _) | Signature::UnaryOrBinary(a, b, _) => vec![*a, *b],
        }
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (min, max) = self.arity();
        write!(f, "Signature({min}..={max}, {:?})", self.kinds())
    }
}

/// Name-to-signature table of callable scalar functions
#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, Signature>,
}

impl FunctionRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Registry with the math, spatial, temporal and conversion functions
    pub fn standard() -> Self {
        let mut registry = Self::new();

        // Math
        registry.register("abs", Signature::Unary(ArgKind::Number, abs));
        registry.register("ceil", Signature::Unary(ArgKind::Number, ceil));
        registry.register("floor", Signature::Unary(ArgKind::Number, floor));
        registry.register(
            "round",
            Signature::UnaryOrBinary(ArgKind::Number, ArgKind::Integer, round),
        );
        registry.register("sqrt", Signature::Unary(ArgKind::Number, sqrt));
        registry.register("sign", Signature::Unary(ArgKind::Number, sign));
        registry.register("rand", Signature::Nullary(random));
        registry.register("exp", Signature::Unary(ArgKind::Number, exp));
        registry.register("log", Signature::Unary(ArgKind::Number, log));

        // Spatial
        registry.register("point", Signature::Unary(ArgKind::Map, point));
        registry.register(
            "distance",
            Signature::Binary(ArgKind::Point, ArgKind::Point, distance),
        );

        // Temporal
        registry.register("date", Signature::OptionalUnary(ArgKind::TemporalSource, date));
        registry.register(
            "datetime",
            Signature::OptionalUnary(ArgKind::TemporalSource, datetime),
        );
        registry.register("timestamp", Signature::Nullary(timestamp));
        registry.register("duration", Signature::Unary(ArgKind::TemporalSource, duration));

        // Conversion
        registry.register("tointeger", Signature::Unary(ArgKind::Any, to_integer));
        registry.register("tofloat", Signature::Unary(ArgKind::Any, to_float));
        registry.register("tostring", Signature::Unary(ArgKind::Any, to_string));
        registry.register("size", Signature::Unary(ArgKind::Sized, size));

        registry
    }

    /// Register or replace a function; names are case-insensitive
    pub fn register(&mut self, name: &str, signature: Signature) {
        self.functions.insert(name.to_ascii_lowercase(), signature);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(&name.to_ascii_lowercase())
    }

    pub fn signature(&self, name: &str) -> Option<&Signature> {
        self.functions.get(&name.to_ascii_lowercase())
    }

    /// Call a function by name
    ///
    /// Returns null if any argument is null, and a type error naming the
    /// function and argument position on wrong arity or argument kind.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        let signature = self
            .signature(name)
            .ok_or_else(|| Error::Planning(format!("unknown function '{name}'")))?;

        let (min, max) = signature.arity();
        if args.len() < min || args.len() > max {
            let expected = if min == max {
                format!("{min}")
            } else {
                format!("{min} to {max}")
            };
            return Err(Error::type_error(
                name,
                args.len().min(max) + 1,
                format!("expected {expected} argument(s), got {}", args.len()),
            ));
        }

        if args.iter().any(Value::is_null) {
            return Ok(Value::Null);
        }

        for (position, (arg, kind)) in args.iter().zip(signature.kinds()).enumerate() {
            if !kind.accepts(arg) {
                return Err(Error::type_error(
                    name,
                    position + 1,
                    format!("expected {}, got {}", kind.describe(), arg.type_name()),
                ));
            }
        }

        match *signature {
            Signature::Nullary(f) => f(),
            Signature::Unary(_, f) => f(&args[0]),
            Signature::Binary(_, _, f) => f(&args[0], &args[1]),
            Signature::OptionalUnary(_, f) => f(args.first()),
            Signature::UnaryOrBinary(_, _, f) => f(&args[0], args.get(1)),
        }
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn float(value: &Value) -> f64 {
    value.as_float().unwrap_or(f64::NAN)
}

// ========== Math ==========

fn abs(x: &Value) -> Result<Value> {
    match x {
        Value::Integer(i) => i
            .checked_abs()
            .map(Value::Integer)
            .ok_or_else(|| Error::QueryExecution("integer overflow in abs()".to_string())),
        other => Ok(Value::Float(float(other).abs())),
    }
}

fn ceil(x: &Value) -> Result<Value> {
    Ok(Value::Float(float(x).ceil()))
}

fn floor(x: &Value) -> Result<Value> {
    Ok(Value::Float(float(x).floor()))
}

/// Round half up: ties go toward positive infinity, so `-2.5` becomes `-2.0`
fn round_half_up(x: f64) -> f64 {
    let floor = x.floor();
    if x - floor >= 0.5 { floor + 1.0 } else { floor }
}

fn round(x: &Value, precision: Option<&Value>) -> Result<Value> {
    let x = float(x);
    let digits = precision.and_then(Value::as_integer).unwrap_or(0);
    if digits == 0 {
        return Ok(Value::Float(round_half_up(x)));
    }
    let digits = i32::try_from(digits)
        .map_err(|_| Error::type_error("round", 2, "precision out of range"))?;
    let scale = 10f64.powi(digits);
    Ok(Value::Float(round_half_up(x * scale) / scale))
}

fn sqrt(x: &Value) -> Result<Value> {
    Ok(Value::Float(float(x).sqrt()))
}

fn sign(x: &Value) -> Result<Value> {
    let sign = match x {
        Value::Integer(i) => i.signum(),
        other => {
            let f = float(other);
            if f > 0.0 {
                1
            } else if f < 0.0 {
                -1
            } else {
                0
            }
        }
    };
    Ok(Value::Integer(sign))
}

fn random() -> Result<Value> {
    Ok(Value::Float(rand::thread_rng().r#gen::<f64>()))
}

fn exp(x: &Value) -> Result<Value> {
    Ok(Value::Float(float(x).exp()))
}

fn log(x: &Value) -> Result<Value> {
    Ok(Value::Float(float(x).ln()))
}

// ========== Spatial ==========

fn point(map: &Value) -> Result<Value> {
    let Some(map) = map.as_map() else {
        return Err(Error::type_error("point", 1, "expected a map"));
    };
    let coordinate = |key: &str| -> Result<f64> {
        map.get(key)
            .and_then(Value::as_float)
            .ok_or_else(|| Error::type_error("point", 1, format!("map needs a numeric '{key}'")))
    };
    let mut point = Point::cartesian(coordinate("x")?, coordinate("y")?);
    if let Some(srid) = map.get("srid") {
        point.srid = srid
            .as_integer()
            .and_then(|s| u32::try_from(s).ok())
            .ok_or_else(|| Error::type_error("point", 1, "'srid' must be a non-negative integer"))?;
    }
    Ok(Value::Point(point))
}

fn distance(a: &Value, b: &Value) -> Result<Value> {
    match (a, b) {
        (Value::Point(a), Value::Point(b)) => Ok(a.distance(b).map_or(Value::Null, Value::Float)),
        _ => Err(Error::type_error("distance", 1, "expected two points")),
    }
}

// ========== Temporal ==========

fn map_integer(function: &str, map: &std::collections::BTreeMap<String, Value>, key: &str) -> Result<Option<i64>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Integer(i)) => Ok(Some(*i)),
        Some(other) => Err(Error::type_error(
            function,
            1,
            format!("'{key}' must be an integer, got {}", other.type_name()),
        )),
    }
}

fn date(source: Option<&Value>) -> Result<Value> {
    let days = match source {
        None => temporal::today(),
        Some(Value::String(s)) => temporal::parse_date(s)?,
        Some(Value::Date(d)) => *d,
        Some(Value::DateTime(ms)) => i32::try_from(ms.div_euclid(86_400_000))
            .map_err(|_| Error::type_error("date", 1, "datetime out of range"))?,
        Some(Value::Map(map)) => {
            let year = map_integer("date", map, "year")?
                .ok_or_else(|| Error::type_error("date", 1, "map needs a 'year'"))?;
            let month = map_integer("date", map, "month")?.unwrap_or(1);
            let day = map_integer("date", map, "day")?.unwrap_or(1);
            temporal::date_from_parts(year, month, day)?
        }
        Some(other) => {
            return Err(Error::type_error(
                "date",
                1,
                format!("cannot build a date from {}", other.type_name()),
            ));
        }
    };
    Ok(Value::Date(days))
}

fn datetime(source: Option<&Value>) -> Result<Value> {
    let millis = match source {
        None => temporal::now_millis(),
        Some(Value::String(s)) => temporal::parse_datetime(s)?,
        Some(Value::DateTime(ms)) => *ms,
        Some(Value::Date(d)) => i64::from(*d) * 86_400_000,
        Some(Value::Map(map)) => {
            let year = map_integer("datetime", map, "year")?
                .ok_or_else(|| Error::type_error("datetime", 1, "map needs a 'year'"))?;
            let days = temporal::date_from_parts(
                year,
                map_integer("datetime", map, "month")?.unwrap_or(1),
                map_integer("datetime", map, "day")?.unwrap_or(1),
            )?;
            let clock = [("hour", 3_600_000), ("minute", 60_000), ("second", 1000), ("millisecond", 1)];
            let mut millis = i64::from(days) * 86_400_000;
            for (key, scale) in clock {
                let part = map_integer("datetime", map, key)?.unwrap_or(0);
                millis = checked_scaled_add(millis, part, scale)
                    .ok_or_else(|| Error::type_error("datetime", 1, format!("'{key}' out of range")))?;
            }
            millis
        }
        Some(other) => {
            return Err(Error::type_error(
                "datetime",
                1,
                format!("cannot build a datetime from {}", other.type_name()),
            ));
        }
    };
    Ok(Value::DateTime(millis))
}

/// `acc + part * scale` without wrapping
fn checked_scaled_add(acc: i64, part: i64, scale: i64) -> Option<i64> {
    part.checked_mul(scale).and_then(|v| acc.checked_add(v))
}

fn timestamp() -> Result<Value> {
    Ok(Value::Integer(temporal::now_millis()))
}

fn duration(source: &Value) -> Result<Value> {
    match source {
        Value::String(s) => Ok(Value::Duration(temporal::parse_duration(s)?)),
        Value::Map(map) => {
            let sum = |parts: &[(&str, i64)]| -> Result<i64> {
                let mut total = 0i64;
                for (key, scale) in parts {
                    let part = map_integer("duration", map, key)?.unwrap_or(0);
                    total = checked_scaled_add(total, part, *scale).ok_or_else(|| {
                        Error::type_error("duration", 1, format!("'{key}' out of range"))
                    })?;
                }
                Ok(total)
            };
            let months = sum(&[("years", 12), ("months", 1)])?;
            let days = sum(&[("weeks", 7), ("days", 1)])?;
            let seconds = sum(&[("hours", 3600), ("minutes", 60), ("seconds", 1)])?;
            let nanos = sum(&[("milliseconds", 1_000_000), ("nanoseconds", 1)])?;
            DurationValue::new(months, days, seconds, nanos)
                .map(Value::Duration)
                .map_err(|_| Error::type_error("duration", 1, "out of range"))
        }
        other => Err(Error::type_error(
            "duration",
            1,
            format!("cannot build a duration from {}", other.type_name()),
        )),
    }
}

// ========== Conversion ==========

fn to_integer(value: &Value) -> Result<Value> {
    Ok(match value {
        Value::Integer(i) => Value::Integer(*i),
        Value::Float(f) if f.is_finite() => Value::Integer(f.trunc() as i64),
        Value::Float(_) => Value::Null,
        Value::Boolean(b) => Value::Integer(i64::from(*b)),
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(i) => Value::Integer(i),
                Err(_) => match s.parse::<f64>() {
                    Ok(f) if f.is_finite() => Value::Integer(f.trunc() as i64),
                    _ => Value::Null,
                },
            }
        }
        other => {
            return Err(Error::type_error(
                "toInteger",
                1,
                format!("cannot convert {} to an integer", other.type_name()),
            ));
        }
    })
}

fn to_float(value: &Value) -> Result<Value> {
    Ok(match value {
        Value::Integer(i) => Value::Float(*i as f64),
        Value::Float(f) => Value::Float(*f),
        Value::String(s) => s.trim().parse::<f64>().map_or(Value::Null, Value::Float),
        other => {
            return Err(Error::type_error(
                "toFloat",
                1,
                format!("cannot convert {} to a float", other.type_name()),
            ));
        }
    })
}

fn to_string(value: &Value) -> Result<Value> {
    match value {
        Value::List(_)
        | Value::Map(_)
        | Value::Node(_)
        | Value::Relationship(_)
        | Value::Path(_) => Err(Error::type_error(
            "toString",
            1,
            format!("cannot convert {} to a string", value.type_name()),
        )),
        other => Ok(Value::String(other.to_string())),
    }
}

fn size(value: &Value) -> Result<Value> {
    let len = match value {
        Value::String(s) => s.chars().count(),
        Value::List(items) => items.len(),
        other => {
            return Err(Error::type_error(
                "size",
                1,
                format!("expected a string or a list, got {}", other.type_name()),
            ));
        }
    };
    Ok(Value::Integer(len as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn call(name: &str, args: Vec<Value>) -> Result<Value> {
        FunctionRegistry::standard().call(name, &args)
    }

    #[test]
    fn test_math_functions() {
        assert_eq!(call("abs", vec![Value::Integer(-5)]).unwrap(), Value::Integer(5));
        assert_eq!(call("sqrt", vec![Value::Integer(16)]).unwrap(), Value::Float(4.0));
        assert_eq!(
            call("round", vec![Value::Float(3.14159), Value::Integer(2)]).unwrap(),
            Value::Float(3.14)
        );
        assert_eq!(call("round", vec![Value::Float(2.5)]).unwrap(), Value::Float(3.0));
        assert_eq!(call("round", vec![Value::Float(-2.5)]).unwrap(), Value::Float(-2.0));
        assert_eq!(call("round", vec![Value::Float(-2.6)]).unwrap(), Value::Float(-3.0));
        assert_eq!(call("round", vec![Value::Integer(-7)]).unwrap(), Value::Float(-7.0));
        assert_eq!(
            call("round", vec![Value::Float(-1.25), Value::Integer(1)]).unwrap(),
            Value::Float(-1.2)
        );
        assert_eq!(call("ceil", vec![Value::Float(1.2)]).unwrap(), Value::Float(2.0));
        assert_eq!(call("floor", vec![Value::Float(-1.2)]).unwrap(), Value::Float(-2.0));
        assert_eq!(call("sign", vec![Value::Float(-0.5)]).unwrap(), Value::Integer(-1));

        let r = call("rand", vec![]).unwrap().as_float().unwrap();
        assert!((0.0..1.0).contains(&r));
    }

    #[test]
    fn test_names_are_case_insensitive() {
        let registry = FunctionRegistry::standard();
        assert!(registry.contains("ABS"));
        assert!(registry.contains("toInteger"));
        assert!(!registry.contains("similarity"));
    }

    #[test]
    fn test_null_arguments_yield_null() {
        for name in ["abs", "sqrt", "toString", "size", "duration", "point"] {
            assert_eq!(call(name, vec![Value::Null]).unwrap(), Value::Null, "{name}");
        }
        assert_eq!(
            call("round", vec![Value::Float(1.5), Value::Null]).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_type_errors_name_function_and_position() {
        match call("round", vec![Value::Float(1.5), Value::from("x")]).unwrap_err() {
            Error::Type {
                function, position, ..
            } => {
                assert_eq!(function, "round");
                assert_eq!(position, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
        match call("abs", vec![Value::Integer(1), Value::Integer(2)]).unwrap_err() {
            Error::Type { position, .. } => assert_eq!(position, 2),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(
            call("sqrt", vec![Value::from("16")]),
            Err(Error::Type { .. })
        ));
    }

    #[test]
    fn test_spatial_functions() {
        let mut a = BTreeMap::new();
        a.insert("x".to_string(), Value::Integer(0));
        a.insert("y".to_string(), Value::Integer(0));
        let mut b = BTreeMap::new();
        b.insert("x".to_string(), Value::Float(3.0));
        b.insert("y".to_string(), Value::Float(4.0));

        let pa = call("point", vec![Value::Map(a)]).unwrap();
        let pb = call("point", vec![Value::Map(b.clone())]).unwrap();
        assert_eq!(call("distance", vec![pa, pb]).unwrap(), Value::Float(5.0));

        b.remove("y");
        assert!(matches!(
            call("point", vec![Value::Map(b)]),
            Err(Error::Type { .. })
        ));
    }

    #[test]
    fn test_temporal_functions() {
        let d = call("date", vec![Value::from("2024-02-29")]).unwrap();
        assert_eq!(d.to_string(), "2024-02-29");

        let dt = call("datetime", vec![Value::from("2024-01-01T00:00:00Z")]).unwrap();
        assert_eq!(dt, Value::DateTime(1_704_067_200_000));

        let dur = call("duration", vec![Value::from("P1DT2H")]).unwrap();
        assert_eq!(dur, Value::Duration(DurationValue::new(0, 1, 7200, 0).unwrap()));

        let mut parts = BTreeMap::new();
        parts.insert("hours".to_string(), Value::Integer(2));
        parts.insert("days".to_string(), Value::Integer(1));
        assert_eq!(call("duration", vec![Value::Map(parts)]).unwrap(), dur);

        assert!(call("timestamp", vec![]).unwrap().as_integer().unwrap() > 0);
        assert!(call("date", vec![Value::from("not a date")]).is_err());
    }

    #[test]
    fn test_temporal_overflow_is_a_type_error() {
        let mut years = BTreeMap::new();
        years.insert("years".to_string(), Value::Integer(i64::MAX));
        assert!(matches!(
            call("duration", vec![Value::Map(years)]),
            Err(Error::Type { .. })
        ));

        let mut seconds = BTreeMap::new();
        seconds.insert("seconds".to_string(), Value::Integer(i64::MAX));
        seconds.insert("milliseconds".to_string(), Value::Integer(1_000));
        assert!(call("duration", vec![Value::Map(seconds)]).is_err());

        let mut moment = BTreeMap::new();
        moment.insert("year".to_string(), Value::Integer(2020));
        moment.insert("hour".to_string(), Value::Integer(i64::MAX));
        assert!(matches!(
            call("datetime", vec![Value::Map(moment)]),
            Err(Error::Type { .. })
        ));

        assert!(call("duration", vec![Value::from("P999999999999999999Y")]).is_err());
        assert!(matches!(
            call("date", vec![Value::DateTime(i64::MAX)]),
            Err(Error::Type { .. })
        ));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(call("toInteger", vec![Value::from("42")]).unwrap(), Value::Integer(42));
        assert_eq!(call("toInteger", vec![Value::Float(3.9)]).unwrap(), Value::Integer(3));
        assert_eq!(call("toInteger", vec![Value::from("nope")]).unwrap(), Value::Null);
        assert_eq!(call("toFloat", vec![Value::Integer(2)]).unwrap(), Value::Float(2.0));
        assert_eq!(call("toString", vec![Value::Float(4.0)]).unwrap(), Value::from("4.0"));
        assert_eq!(call("size", vec![Value::from("héllo")]).unwrap(), Value::Integer(5));
        assert_eq!(
            call("size", vec![Value::List(vec![Value::Null, Value::Integer(1)])]).unwrap(),
            Value::Integer(2)
        );
    }
}
