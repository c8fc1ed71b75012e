//! Runtime values for Nodus
//!
//! `Value` is both the stored property type and the query-time value type.
//! Entity variants (`Node`, `Relationship`, `Path`) only appear at query
//! time; they are rejected as property values.

use crate::id::EntityId;
use crate::temporal::{self, DurationValue};
use crate::types::{Node, Path, Relationship};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Default spatial reference id for cartesian 2D points
pub const CARTESIAN_SRID: u32 = 7203;

/// A 2D point with a spatial reference id
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub srid: u32,
}

impl Point {
    /// Create a cartesian point
    pub fn cartesian(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            srid: CARTESIAN_SRID,
        }
    }

    /// Euclidean distance; `None` when reference systems differ
    pub fn distance(&self, other: &Point) -> Option<f64> {
        if self.srid != other.srid {
            return None;
        }
        Some(((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt())
    }
}

/// A tagged value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Null/missing value
    Null,

    /// Boolean value
    Boolean(bool),

    /// 64-bit signed integer
    Integer(i64),

    /// 64-bit floating point
    Float(f64),

    /// UTF-8 string
    String(String),

    /// Ordered sequence
    List(Vec<Value>),

    /// String-keyed map, kept ordered so encodings are deterministic
    Map(BTreeMap<String, Value>),

    /// 2D point
    Point(Point),

    /// Date (days since epoch)
    Date(i32),

    /// DateTime (UTC milliseconds since epoch)
    DateTime(i64),

    /// Calendar-aware duration
    Duration(DurationValue),

    /// Node bound by a query
    Node(Box<Node>),

    /// Relationship bound by a query
    Relationship(Box<Relationship>),

    /// Path bound by a query
    Path(Box<Path>),
}

impl Value {
    /// Returns true if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true for integers and floats
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    /// Returns true if the value may be stored as a property
    pub fn is_storable(&self) -> bool {
        match self {
            Value::Node(_) | Value::Relationship(_) | Value::Path(_) => false,
            Value::List(items) => items.iter().all(Value::is_storable),
            Value::Map(map) => map.values().all(Value::is_storable),
            _ => true,
        }
    }

    /// Try to get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as integer
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as float, widening integers
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get as string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as list reference
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Try to get as map reference
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Try to get as node reference
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Value::Node(node) => Some(node),
            _ => None,
        }
    }

    /// Try to get as relationship reference
    pub fn as_relationship(&self) -> Option<&Relationship> {
        match self {
            Value::Relationship(rel) => Some(rel),
            _ => None,
        }
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Point(_) => "point",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::Duration(_) => "duration",
            Value::Node(_) => "node",
            Value::Relationship(_) => "relationship",
            Value::Path(_) => "path",
        }
    }

    /// Query equality: `None` when either side is null
    ///
    /// Integers and floats compare numerically. Lists and maps compare
    /// element-wise and propagate null from their elements.
    pub fn equals(&self, other: &Value) -> Option<bool> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Integer(a), Value::Integer(b)) => Some(a == b),
            (a, b) if a.is_number() && b.is_number() => {
                Some(a.as_float() == b.as_float())
            }
            (Value::List(a), Value::List(b)) => {
                if a.len() != b.len() {
                    return Some(false);
                }
                let mut saw_null = false;
                for (x, y) in a.iter().zip(b) {
                    match x.equals(y) {
                        Some(false) => return Some(false),
                        None => saw_null = true,
                        Some(true) => {}
                    }
                }
                if saw_null { None } else { Some(true) }
            }
            (Value::Map(a), Value::Map(b)) => {
                if a.len() != b.len() || a.keys().ne(b.keys()) {
                    return Some(false);
                }
                let mut saw_null = false;
                for (x, y) in a.values().zip(b.values()) {
                    match x.equals(y) {
                        Some(false) => return Some(false),
                        None => saw_null = true,
                        Some(true) => {}
                    }
                }
                if saw_null { None } else { Some(true) }
            }
            (Value::Node(a), Value::Node(b)) => Some(a.id == b.id),
            (Value::Relationship(a), Value::Relationship(b)) => Some(a.id == b.id),
            (Value::Path(a), Value::Path(b)) => Some(
                a.node_ids() == b.node_ids() && a.relationship_ids() == b.relationship_ids(),
            ),
            (a, b) => Some(a == b),
        }
    }

    /// Query comparison for `<`, `<=`, `>`, `>=`
    ///
    /// `None` when either side is null or the types are not comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (a, b) if a.is_number() && b.is_number() => a.as_float()?.partial_cmp(&b.as_float()?),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        ord => return Some(ord),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }

    fn order_rank(&self) -> u8 {
        match self {
            Value::Map(_) => 0,
            Value::Node(_) => 1,
            Value::Relationship(_) => 2,
            Value::List(_) => 3,
            Value::Path(_) => 4,
            Value::String(_) => 5,
            Value::Boolean(_) => 6,
            Value::Integer(_) | Value::Float(_) => 7,
            Value::Point(_) => 8,
            Value::Date(_) => 9,
            Value::DateTime(_) => 10,
            Value::Duration(_) => 11,
            Value::Null => 12,
        }
    }

    /// Total order used by ORDER BY: values of different types order by
    /// type, numbers compare numerically, NaN sorts above other numbers and
    /// null sorts last.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        let rank = self.order_rank().cmp(&other.order_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (a, b) if a.is_number() && b.is_number() => {
                let x = a.as_float().unwrap_or(f64::NAN);
                let y = b.as_float().unwrap_or(f64::NAN);
                x.total_cmp(&y)
            }
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Duration(a), Value::Duration(b)) => a.approx_millis().cmp(&b.approx_millis()),
            (Value::Point(a), Value::Point(b)) => a
                .srid
                .cmp(&b.srid)
                .then(a.x.total_cmp(&b.x))
                .then(a.y.total_cmp(&b.y)),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b) {
                    let ord = x.sort_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Map(a), Value::Map(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b) {
                    let ord = ka.cmp(kb).then_with(|| va.sort_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Node(a), Value::Node(b)) => a.id.cmp(&b.id),
            (Value::Relationship(a), Value::Relationship(b)) => a.id.cmp(&b.id),
            (Value::Path(a), Value::Path(b)) => a
                .node_ids()
                .cmp(&b.node_ids())
                .then_with(|| a.relationship_ids().cmp(&b.relationship_ids())),
            _ => Ordering::Equal,
        }
    }

    /// Equivalence used for grouping and DISTINCT: null equals null,
    /// `1` equals `1.0` and NaN equals NaN.
    pub fn equivalent(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Float(a), Value::Float(b)) if a.is_nan() && b.is_nan() => true,
            (a, b) if a.is_number() && b.is_number() => a.as_float() == b.as_float(),
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equivalent(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.equivalent(vb))
            }
            _ => self.equals(other).unwrap_or(false),
        }
    }

    /// Stable 64-bit hash consistent with [`Value::equivalent`]
    ///
    /// Used for property index keys, so it must not change between releases.
    pub fn stable_hash(&self) -> u64 {
        let mut buf = Vec::with_capacity(32);
        self.encode_canonical(&mut buf);
        xxhash_rust::xxh3::xxh3_64(&buf)
    }

    fn encode_canonical(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Null => buf.push(0),
            Value::Boolean(b) => {
                buf.push(1);
                buf.push(u8::from(*b));
            }
            Value::Integer(i) => {
                buf.push(2);
                buf.extend_from_slice(&i.to_le_bytes());
            }
            Value::Float(f) => {
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                    buf.push(2);
                    buf.extend_from_slice(&(*f as i64).to_le_bytes());
                } else if f.is_nan() {
                    buf.push(3);
                    buf.extend_from_slice(&f64::NAN.to_bits().to_le_bytes());
                } else {
                    buf.push(3);
                    buf.extend_from_slice(&f.to_bits().to_le_bytes());
                }
            }
            Value::String(s) => {
                buf.push(4);
                buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            Value::List(items) => {
                buf.push(5);
                buf.extend_from_slice(&(items.len() as u64).to_le_bytes());
                for item in items {
                    item.encode_canonical(buf);
                }
            }
            Value::Map(map) => {
                buf.push(6);
                buf.extend_from_slice(&(map.len() as u64).to_le_bytes());
                for (k, v) in map {
                    buf.extend_from_slice(&(k.len() as u64).to_le_bytes());
                    buf.extend_from_slice(k.as_bytes());
                    v.encode_canonical(buf);
                }
            }
            Value::Point(p) => {
                buf.push(7);
                buf.extend_from_slice(&p.x.to_bits().to_le_bytes());
                buf.extend_from_slice(&p.y.to_bits().to_le_bytes());
                buf.extend_from_slice(&p.srid.to_le_bytes());
            }
            Value::Date(d) => {
                buf.push(8);
                buf.extend_from_slice(&d.to_le_bytes());
            }
            Value::DateTime(ms) => {
                buf.push(9);
                buf.extend_from_slice(&ms.to_le_bytes());
            }
            Value::Duration(d) => {
                buf.push(10);
                buf.extend_from_slice(&d.months.to_le_bytes());
                buf.extend_from_slice(&d.days.to_le_bytes());
                buf.extend_from_slice(&d.seconds.to_le_bytes());
                buf.extend_from_slice(&d.nanos.to_le_bytes());
            }
            Value::Node(n) => {
                buf.push(11);
                buf.extend_from_slice(&n.id.as_internal().to_le_bytes());
            }
            Value::Relationship(r) => {
                buf.push(12);
                buf.extend_from_slice(&r.id.as_internal().to_le_bytes());
            }
            Value::Path(p) => {
                buf.push(13);
                for id in p.node_ids() {
                    buf.extend_from_slice(&id.as_internal().to_le_bytes());
                }
                buf.push(0xff);
                for id in p.relationship_ids() {
                    buf.extend_from_slice(&id.as_internal().to_le_bytes());
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => {
                if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e15 {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x}")
                }
            }
            Value::String(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write_nested(f, item)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: ")?;
                    write_nested(f, v)?;
                }
                write!(f, "}}")
            }
            Value::Point(p) => write!(f, "point({{x: {}, y: {}, srid: {}}})", p.x, p.y, p.srid),
            Value::Date(d) => write!(f, "{}", temporal::format_date(*d)),
            Value::DateTime(ms) => write!(f, "{}", temporal::format_datetime(*ms)),
            Value::Duration(d) => write!(f, "{d}"),
            Value::Node(n) => {
                write!(f, "(")?;
                for label in &n.labels {
                    write!(f, ":{label}")?;
                }
                write!(f, " #{})", n.id)
            }
            Value::Relationship(r) => {
                write!(f, "[:{} #{} ({})->({})]", r.rel_type, r.id, r.source, r.target)
            }
            Value::Path(p) => write!(f, "<path length {}>", p.len()),
        }
    }
}

fn write_nested(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::String(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
        other => write!(f, "{other}"),
    }
}

// Convenience From implementations
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Point> for Value {
    fn from(v: Point) -> Self {
        Value::Point(v)
    }
}

impl From<DurationValue> for Value {
    fn from(v: DurationValue) -> Self {
        Value::Duration(v)
    }
}

impl From<Node> for Value {
    fn from(v: Node) -> Self {
        Value::Node(Box::new(v))
    }
}

impl From<Relationship> for Value {
    fn from(v: Relationship) -> Self {
        Value::Relationship(Box::new(v))
    }
}

impl From<Path> for Value {
    fn from(v: Path) -> Self {
        Value::Path(Box::new(v))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A list of values usable as a hash map key for grouping and DISTINCT
#[derive(Debug, Clone)]
pub struct GroupKey(pub Vec<Value>);

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a.equivalent(b))
    }
}

impl Eq for GroupKey {}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for value in &self.0 {
            state.write_u64(value.stable_hash());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{EntityId, NodeId};
    use std::collections::HashSet;

    #[test]
    fn test_equality_with_null_is_unknown() {
        assert_eq!(Value::Null.equals(&Value::Integer(1)), None);
        assert_eq!(Value::Integer(1).equals(&Value::Null), None);
        assert_eq!(Value::Integer(1).compare(&Value::Null), None);
    }

    #[test]
    fn test_numeric_equality() {
        assert_eq!(Value::Integer(1).equals(&Value::Float(1.0)), Some(true));
        assert_eq!(Value::Integer(1).equals(&Value::String("1".into())), Some(false));
        assert_eq!(
            Value::Integer(2).compare(&Value::Float(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::String("a".into()).compare(&Value::Integer(1)), None);
    }

    #[test]
    fn test_list_equality_propagates_null() {
        let a = Value::from(vec![Value::Integer(1), Value::Null]);
        let b = Value::from(vec![Value::Integer(1), Value::Integer(2)]);
        assert_eq!(a.equals(&b), None);
        let c = Value::from(vec![Value::Integer(3), Value::Null]);
        assert_eq!(c.equals(&b), Some(false));
    }

    #[test]
    fn test_sort_puts_null_last() {
        let mut values = vec![
            Value::Null,
            Value::Integer(3),
            Value::Float(1.5),
            Value::Integer(-1),
        ];
        values.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(
            values,
            vec![
                Value::Integer(-1),
                Value::Float(1.5),
                Value::Integer(3),
                Value::Null
            ]
        );
    }

    #[test]
    fn test_stable_hash_matches_equivalence() {
        assert_eq!(Value::Integer(7).stable_hash(), Value::Float(7.0).stable_hash());
        assert_ne!(Value::Integer(7).stable_hash(), Value::String("7".into()).stable_hash());
    }

    #[test]
    fn test_group_key_dedups_numbers() {
        let mut set = HashSet::new();
        set.insert(GroupKey(vec![Value::Integer(1), Value::Null]));
        set.insert(GroupKey(vec![Value::Float(1.0), Value::Null]));
        set.insert(GroupKey(vec![Value::Integer(2), Value::Null]));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_storable() {
        assert!(Value::from(vec![1i64, 2]).is_storable());
        let node = Node::new(NodeId::from_internal(1));
        assert!(!Value::from(node).is_storable());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Float(4.0).to_string(), "4.0");
        assert_eq!(Value::from(vec!["a", "b"]).to_string(), "['a', 'b']");
        assert_eq!(Value::Date(0).to_string(), "1970-01-01");
    }

    #[test]
    fn test_point_distance() {
        let a = Point::cartesian(0.0, 0.0);
        let b = Point::cartesian(3.0, 4.0);
        assert_eq!(a.distance(&b), Some(5.0));
        let c = Point { srid: 4326, ..b };
        assert_eq!(a.distance(&c), None);
    }

    proptest::proptest! {
        #[test]
        fn prop_mixed_numeric_order_is_antisymmetric(a in -1000i64..1000, b in -1000.0f64..1000.0) {
            let x = Value::Integer(a);
            let y = Value::Float(b);
            proptest::prop_assert_eq!(x.sort_cmp(&y), y.sort_cmp(&x).reverse());
        }

        #[test]
        fn prop_equivalent_values_hash_alike(a in -100_000i64..100_000) {
            let x = Value::Integer(a);
            let y = Value::Float(a as f64);
            proptest::prop_assert!(x.equivalent(&y));
            proptest::prop_assert_eq!(x.stable_hash(), y.stable_hash());
        }
    }
}
