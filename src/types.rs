//! Attribute types and the type-dispatched operations over [`Value`]:
//! comparison, casting (with cast costs for the planner), arithmetic and
//! text conversion. Dispatch is a match on the type tag; there is one row
//! of logic per type, as the type singletons of a classic engine would be.

use crate::rc::{DbError, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Threshold below which a float divisor counts as zero (division yields NULL).
pub const EPSILON: f32 = 1e-6;

/// Maximum TEXT length in bytes.
pub const TEXT_MAX_LENGTH: usize = 65535;

/// Cost returned by [`cast_cost`] for an unsupported cast.
pub const CAST_IMPOSSIBLE: i32 = i32::MAX;

/// Attribute (column / value) type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrType {
    Undefined,
    Chars,
    Ints,
    Floats,
    Dates,
    Vectors,
    Booleans,
    Texts,
}

impl AttrType {
    /// Name used in DESC output and error messages.
    pub fn name(self) -> &'static str {
        match self {
            AttrType::Undefined => "undefined",
            AttrType::Chars => "chars",
            AttrType::Ints => "ints",
            AttrType::Floats => "floats",
            AttrType::Dates => "dates",
            AttrType::Vectors => "vectors",
            AttrType::Booleans => "booleans",
            AttrType::Texts => "texts",
        }
    }
}

/// Lenient string→int parse: leading numeric prefix, 0 on failure.
pub fn lenient_parse_i32(bytes: &[u8]) -> i32 {
    let s = String::from_utf8_lossy(bytes);
    let s = s.trim();
    if let Ok(v) = s.parse::<i32>() {
        return v;
    }
    // Accept a numeric prefix, as strtol would.
    let mut end = 0;
    for (i, c) in s.char_indices() {
        if c == '-' || c == '+' {
            if i != 0 {
                break;
            }
        } else if !c.is_ascii_digit() {
            break;
        }
        end = i + c.len_utf8();
    }
    s[..end].parse::<i32>().unwrap_or(0)
}

/// Lenient string→float parse: leading numeric prefix, 0.0 on failure.
pub fn lenient_parse_f32(bytes: &[u8]) -> f32 {
    let s = String::from_utf8_lossy(bytes);
    let s = s.trim();
    if let Ok(v) = s.parse::<f32>() {
        return v;
    }
    let mut end = 0;
    for (i, c) in s.char_indices() {
        if c == '-' || c == '+' {
            if i != 0 {
                break;
            }
        } else if !c.is_ascii_digit() && c != '.' {
            break;
        }
        end = i + c.len_utf8();
    }
    s[..end].parse::<f32>().unwrap_or(0.0)
}

fn cmp_f32(a: f32, b: f32) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// Type-dispatched comparison. `None` when either operand is NULL or the
/// pair is not comparable. Cross-type rules: INT vs FLOAT promotes to float;
/// CHAR vs a numeric coerces the CHAR to that numeric type.
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    if left.is_null() || right.is_null() {
        return None;
    }
    match left {
        Value::Int(l) => match right {
            Value::Int(r) => Some(l.cmp(r)),
            Value::Float(_) => Some(cmp_f32(*l as f32, right.get_float())),
            Value::Chars(_) | Value::Text(_) => Some(l.cmp(&right.get_int())),
            Value::Date(r) => Some(l.cmp(r)),
            _ => None,
        },
        Value::Float(l) => match right {
            Value::Int(_) | Value::Float(_) | Value::Chars(_) | Value::Text(_) => {
                Some(cmp_f32(*l, right.get_float()))
            }
            _ => None,
        },
        Value::Chars(l) => match right {
            Value::Chars(r) | Value::Text(r) => Some(l.as_slice().cmp(r.as_slice())),
            Value::Int(_) => Some(left.get_int().cmp(&right.get_int())),
            Value::Float(_) => Some(cmp_f32(left.get_float(), right.get_float())),
            _ => None,
        },
        Value::Text(l) => match right {
            Value::Chars(r) | Value::Text(r) => Some(l.as_slice().cmp(r.as_slice())),
            _ => None,
        },
        Value::Date(l) => match right {
            Value::Date(r) | Value::Int(r) => Some(l.cmp(r)),
            _ => None,
        },
        Value::Bool(l) => Some(l.cmp(&right.get_bool())),
        Value::Vector(l) => match right {
            Value::Vector(r) => {
                if l.len() != r.len() {
                    return Some(l.len().cmp(&r.len()));
                }
                for (a, b) in l.iter().zip(r.iter()) {
                    let c = cmp_f32(*a, *b);
                    if c != Ordering::Equal {
                        return Some(c);
                    }
                }
                Some(Ordering::Equal)
            }
            _ => None,
        },
        Value::Null(_) => None,
    }
}

/// Cost of an implicit cast, used by the planner to decide which side of a
/// comparison to convert. 0 for same type, small for cheap casts,
/// [`CAST_IMPOSSIBLE`] otherwise.
pub fn cast_cost(from: AttrType, to: AttrType) -> i32 {
    use AttrType::*;
    if from == to {
        return 0;
    }
    match (from, to) {
        (Ints, Floats) => 1,
        (Floats, Ints) => 2,
        (Chars, Dates) => 1,
        (Chars, Ints) => 1,
        (Chars, Floats) => 1,
        (Chars, Texts) => 1,
        (Texts, Chars) => 1,
        (Dates, Ints) => 0,
        (Vectors, Chars) => 1,
        _ => CAST_IMPOSSIBLE,
    }
}

/// Cast a value to a target type. NULL always casts to the typed NULL of
/// the target. String→number follows the lenient MySQL policy; string→date
/// and string→vector validate and reject bad input.
pub fn cast_to(val: &Value, target: AttrType) -> Result<Value> {
    use AttrType::*;
    if val.is_null() {
        return Ok(Value::Null(target));
    }
    if val.attr_type() == target {
        return Ok(val.clone());
    }
    match (val, target) {
        (Value::Int(x), Floats) => Ok(Value::Float(*x as f32)),
        (Value::Float(x), Ints) => Ok(Value::Int(*x as i32)),
        (Value::Date(x), Ints) => Ok(Value::Int(*x)),
        (Value::Chars(_), Ints) => Ok(Value::Int(val.get_int())),
        (Value::Chars(_), Floats) => Ok(Value::Float(val.get_float())),
        (Value::Chars(b), Dates) => {
            let s = String::from_utf8_lossy(b);
            Ok(Value::Date(parse_date(&s)?))
        }
        (Value::Chars(b), Texts) => {
            let mut bytes = b.clone();
            if bytes.len() > TEXT_MAX_LENGTH {
                log::warn!("text data truncated from {} to {} bytes", bytes.len(), TEXT_MAX_LENGTH);
                bytes.truncate(TEXT_MAX_LENGTH);
            }
            Ok(Value::Text(bytes))
        }
        (Value::Chars(b), Vectors) => {
            let s = String::from_utf8_lossy(b);
            Ok(Value::Vector(parse_vector_literal(&s)?))
        }
        (Value::Text(b), Chars) => Ok(Value::Chars(b.clone())),
        (Value::Vector(_), Chars) => Ok(Value::Chars(to_string(val).into_bytes())),
        (Value::Bool(x), Ints) => Ok(Value::Int(*x as i32)),
        (Value::Bool(x), Floats) => Ok(Value::Float(*x as i32 as f32)),
        (Value::Bool(x), Chars) => Ok(Value::Chars(if *x { b"1".to_vec() } else { b"0".to_vec() })),
        _ => Err(DbError::FieldTypeMismatch(format!(
            "cannot cast {} to {}",
            val.attr_type().name(),
            target.name()
        ))),
    }
}

/// The result type of a binary arithmetic expression.
pub fn arith_result_type(left: AttrType, right: AttrType, is_div: bool) -> AttrType {
    use AttrType::*;
    if left == Vectors || right == Vectors {
        return Vectors;
    }
    if left == Ints && right == Ints && !is_div {
        return Ints;
    }
    Floats
}

fn vector_pair<'a>(l: &'a Value, r: &'a Value) -> Result<(&'a Vec<f32>, &'a Vec<f32>)> {
    match (l, r) {
        (Value::Vector(a), Value::Vector(b)) => {
            if a.len() != b.len() {
                return Err(DbError::InvalidArgument(format!(
                    "vector dimension mismatch: {} vs {}",
                    a.len(),
                    b.len()
                )));
            }
            Ok((a, b))
        }
        _ => Err(DbError::FieldTypeMismatch("vector arithmetic on non-vector".into())),
    }
}

/// Addition. NULL operands yield NULL; vectors add element-wise.
pub fn add(left: &Value, right: &Value) -> Result<Value> {
    let rt = arith_result_type(left.attr_type(), right.attr_type(), false);
    if left.is_null() || right.is_null() {
        return Ok(Value::Null(rt));
    }
    match rt {
        AttrType::Vectors => {
            let (a, b) = vector_pair(left, right)?;
            Ok(Value::Vector(a.iter().zip(b).map(|(x, y)| x + y).collect()))
        }
        AttrType::Ints => Ok(Value::Int(left.get_int().wrapping_add(right.get_int()))),
        _ => Ok(Value::Float(left.get_float() + right.get_float())),
    }
}

/// Subtraction, same promotion rules as [`add`].
pub fn subtract(left: &Value, right: &Value) -> Result<Value> {
    let rt = arith_result_type(left.attr_type(), right.attr_type(), false);
    if left.is_null() || right.is_null() {
        return Ok(Value::Null(rt));
    }
    match rt {
        AttrType::Vectors => {
            let (a, b) = vector_pair(left, right)?;
            Ok(Value::Vector(a.iter().zip(b).map(|(x, y)| x - y).collect()))
        }
        AttrType::Ints => Ok(Value::Int(left.get_int().wrapping_sub(right.get_int()))),
        _ => Ok(Value::Float(left.get_float() - right.get_float())),
    }
}

/// Multiplication, same promotion rules as [`add`].
pub fn multiply(left: &Value, right: &Value) -> Result<Value> {
    let rt = arith_result_type(left.attr_type(), right.attr_type(), false);
    if left.is_null() || right.is_null() {
        return Ok(Value::Null(rt));
    }
    match rt {
        AttrType::Vectors => {
            let (a, b) = vector_pair(left, right)?;
            Ok(Value::Vector(a.iter().zip(b).map(|(x, y)| x * y).collect()))
        }
        AttrType::Ints => Ok(Value::Int(left.get_int().wrapping_mul(right.get_int()))),
        _ => Ok(Value::Float(left.get_float() * right.get_float())),
    }
}

/// Division. The result is always FLOAT (or NULL); a divisor of magnitude
/// below [`EPSILON`] yields NULL, MySQL style.
pub fn divide(left: &Value, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null(AttrType::Floats));
    }
    if matches!(left, Value::Vector(_)) || matches!(right, Value::Vector(_)) {
        return Err(DbError::Unsupported("vector division".into()));
    }
    let d = right.get_float();
    if d.abs() < EPSILON {
        return Ok(Value::Null(AttrType::Floats));
    }
    Ok(Value::Float(left.get_float() / d))
}

/// Unary minus.
pub fn negative(val: &Value) -> Result<Value> {
    match val {
        Value::Null(t) => Ok(Value::Null(*t)),
        Value::Int(x) => Ok(Value::Int(-*x)),
        Value::Float(x) => Ok(Value::Float(-*x)),
        Value::Chars(_) => Ok(Value::Float(-val.get_float())),
        _ => Err(DbError::Unsupported(format!("negate {}", val.attr_type().name()))),
    }
}

/// Render a value the way SELECT output shows it.
pub fn to_string(val: &Value) -> String {
    match val {
        Value::Null(_) => "NULL".to_string(),
        Value::Int(x) => x.to_string(),
        Value::Float(x) => format_float(*x),
        Value::Bool(x) => if *x { "1" } else { "0" }.to_string(),
        Value::Date(x) => date_to_string(*x),
        Value::Chars(b) | Value::Text(b) => String::from_utf8_lossy(b).into_owned(),
        Value::Vector(v) => {
            let mut s = String::from("[");
            for (i, x) in v.iter().enumerate() {
                if i > 0 {
                    s.push(',');
                }
                s.push_str(&format_float(*x));
            }
            s.push(']');
            s
        }
    }
}

/// Floats print without trailing zeros; whole values print as integers.
fn format_float(x: f32) -> String {
    if x == x.trunc() && x.abs() < 1e9 {
        format!("{}", x as i64)
    } else {
        let s = format!("{:.2}", x);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// Parse a value of the given type from literal text. Unlike the lenient
/// coercions, this is strict: it is used by DDL defaults and LOAD DATA.
pub fn value_from_str(t: AttrType, s: &str) -> Result<Value> {
    match t {
        AttrType::Ints => s
            .trim()
            .parse::<i32>()
            .map(Value::Int)
            .map_err(|_| DbError::FieldTypeMismatch(format!("bad int literal: {s}"))),
        AttrType::Floats => s
            .trim()
            .parse::<f32>()
            .map(Value::Float)
            .map_err(|_| DbError::FieldTypeMismatch(format!("bad float literal: {s}"))),
        AttrType::Chars => Ok(Value::Chars(s.as_bytes().to_vec())),
        AttrType::Dates => Ok(Value::Date(parse_date(s)?)),
        AttrType::Texts => {
            if s.len() > TEXT_MAX_LENGTH {
                return Err(DbError::InvalidArgument(format!(
                    "text length {} exceeds maximum {}",
                    s.len(),
                    TEXT_MAX_LENGTH
                )));
            }
            Ok(Value::Text(s.as_bytes().to_vec()))
        }
        AttrType::Vectors => Ok(Value::Vector(parse_vector_literal(s)?)),
        AttrType::Booleans => Ok(Value::Bool(s.trim() != "0")),
        AttrType::Undefined => Ok(Value::null()),
    }
}

/// Is y-m-d an actual calendar date?
pub fn check_date(y: i32, m: i32, d: i32) -> bool {
    const DAYS: [i32; 13] = [0, 31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let leap = (y % 4 == 0 && y % 100 != 0) || y % 400 == 0;
    y > 0 && y < 9999 && m > 0 && m <= 12 && d > 0 && d <= DAYS[m as usize] + ((leap && m == 2) as i32)
}

/// Parse `'YYYY-MM-DD'` into the packed form `y*10000 + m*100 + d`.
pub fn parse_date(s: &str) -> Result<i32> {
    let parts: Vec<&str> = s.trim().split('-').collect();
    let bad = || DbError::InvalidArgument(format!("bad date: {s}"));
    if parts.len() != 3 {
        return Err(bad());
    }
    let y: i32 = parts[0].parse().map_err(|_| bad())?;
    let m: i32 = parts[1].parse().map_err(|_| bad())?;
    let d: i32 = parts[2].parse().map_err(|_| bad())?;
    if !check_date(y, m, d) {
        return Err(bad());
    }
    Ok(y * 10000 + m * 100 + d)
}

/// Packed date back to `YYYY-MM-DD`.
pub fn date_to_string(v: i32) -> String {
    format!("{:04}-{:02}-{:02}", v / 10000, (v % 10000) / 100, v % 100)
}

/// Parse a vector literal `[v1, v2, …]`.
pub fn parse_vector_literal(s: &str) -> Result<Vec<f32>> {
    let s = s.trim();
    let bad = || DbError::InvalidArgument(format!("bad vector literal: {s}"));
    if s.len() < 2 || !s.starts_with('[') || !s.ends_with(']') {
        return Err(bad());
    }
    let inner = &s[1..s.len() - 1];
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut result = Vec::new();
    for item in inner.split(',') {
        let item = item.trim();
        if item.is_empty() {
            return Err(bad());
        }
        result.push(item.parse::<f32>().map_err(|_| bad())?);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_type_compare() {
        assert_eq!(compare(&Value::Int(3), &Value::Float(3.5)), Some(Ordering::Less));
        assert_eq!(compare(&Value::from_str("10"), &Value::Int(10)), Some(Ordering::Equal));
        assert_eq!(compare(&Value::Float(2.0), &Value::from_str("1.5")), Some(Ordering::Greater));
        assert_eq!(compare(&Value::null(), &Value::Int(1)), None);
        assert_eq!(
            compare(&Value::Date(20240131), &Value::Date(20240201)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn null_and_epsilon_arithmetic() {
        assert!(add(&Value::null(), &Value::Int(1)).unwrap().is_null());
        assert!(divide(&Value::Int(5), &Value::Float(0.0)).unwrap().is_null());
        assert!(divide(&Value::Int(5), &Value::Float(1e-9)).unwrap().is_null());
        assert_eq!(divide(&Value::Int(5), &Value::Int(2)).unwrap(), Value::Float(2.5));
        assert_eq!(add(&Value::Int(2), &Value::Int(3)).unwrap(), Value::Int(5));
        assert_eq!(add(&Value::Int(2), &Value::Float(0.5)).unwrap(), Value::Float(2.5));
    }

    #[test]
    fn vector_arithmetic() {
        let a = Value::Vector(vec![1.0, 2.0, 3.0]);
        let b = Value::Vector(vec![4.0, 5.0, 6.0]);
        assert_eq!(add(&a, &b).unwrap(), Value::Vector(vec![5.0, 7.0, 9.0]));
        assert_eq!(subtract(&b, &a).unwrap(), Value::Vector(vec![3.0, 3.0, 3.0]));
        assert_eq!(multiply(&a, &b).unwrap(), Value::Vector(vec![4.0, 10.0, 18.0]));
        let short = Value::Vector(vec![1.0]);
        assert!(matches!(add(&a, &short), Err(DbError::InvalidArgument(_))));
    }

    #[test]
    fn dates_and_vectors_parse() {
        assert_eq!(parse_date("2024-02-29").unwrap(), 20240229);
        assert!(parse_date("2023-02-29").is_err());
        assert!(parse_date("2023-13-01").is_err());
        assert_eq!(date_to_string(20240229), "2024-02-29");
        assert_eq!(parse_vector_literal("[1, 2.5 ,3]").unwrap(), vec![1.0, 2.5, 3.0]);
        assert!(parse_vector_literal("[1,,2]").is_err());
        assert!(parse_vector_literal("1,2").is_err());
        assert_eq!(parse_vector_literal("[]").unwrap(), Vec::<f32>::new());
    }

    #[test]
    fn cast_preserves_null() {
        let casted = cast_to(&Value::null(), AttrType::Ints).unwrap();
        assert!(casted.is_null());
        assert_eq!(casted.attr_type(), AttrType::Ints);
        assert_eq!(cast_to(&Value::from_str("12"), AttrType::Ints).unwrap(), Value::Int(12));
        assert_eq!(cast_to(&Value::from_str("x"), AttrType::Ints).unwrap(), Value::Int(0));
        assert!(cast_to(&Value::from_str("2024-99-99"), AttrType::Dates).is_err());
    }

    #[test]
    fn cast_costs() {
        assert_eq!(cast_cost(AttrType::Ints, AttrType::Ints), 0);
        assert_eq!(cast_cost(AttrType::Ints, AttrType::Floats), 1);
        assert_eq!(cast_cost(AttrType::Floats, AttrType::Ints), 2);
        assert_eq!(cast_cost(AttrType::Chars, AttrType::Dates), 1);
        assert_eq!(cast_cost(AttrType::Dates, AttrType::Ints), 0);
        assert_eq!(cast_cost(AttrType::Vectors, AttrType::Ints), CAST_IMPOSSIBLE);
    }
}
