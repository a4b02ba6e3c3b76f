//! Cross-type equality and ordering.
//!
//! Comparisons never fail: incompatible operands are simply unequal (for
//! [`equals`]) or incomparable (`None` from [`compare`]), so a scan over records
//! with heterogeneous schemas keeps going.

use std::borrow::Cow;
use std::cmp::Ordering;

use crate::query::temporal::parse_date;
use crate::query::value::{CompositeKey, Value};
use crate::types::RecordId;

/// Equality across value kinds. Symmetric for every pair of kinds.
pub fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => return true,
        (Value::Null, _) | (_, Value::Null) => return false,
        _ => {}
    }

    // A single-field wrapper document stands for its only value.
    match (left, right) {
        (Value::Document(doc), other) | (other, Value::Document(doc))
            if !matches!(other, Value::Document(_) | Value::Link(_)) =>
        {
            return doc
                .single_value()
                .is_some_and(|inner| equals(inner, other));
        }
        _ => {}
    }

    match (left, right) {
        (Value::Link(id), Value::String(text)) | (Value::String(text), Value::Link(id)) => {
            return RecordId::parse(text) == Some(*id);
        }
        (Value::Link(id), Value::Document(doc)) | (Value::Document(doc), Value::Link(id)) => {
            return doc.id == Some(*id);
        }
        (Value::Key(key), other) | (other, Value::Key(key)) => {
            return key.compare(&CompositeKey::coerce(other)) == Ordering::Equal;
        }
        (Value::Date(a), Value::String(text)) | (Value::String(text), Value::Date(a)) => {
            return parse_date(text).is_ok_and(|b| *a == b);
        }
        (Value::Date(a), other) | (other, Value::Date(a)) if other.is_numeric() => {
            return other.as_f64() == Some(*a as f64);
        }
        _ => {}
    }

    if left.is_numeric() && right.is_numeric() {
        return numbers_equal(left, right);
    }

    match (left, right) {
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| equals(x, y))
        }
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a.iter().all(|(k, v)| {
                    b.iter()
                        .find(|(other, _)| equals(k, other))
                        .is_some_and(|(_, w)| equals(v, w))
                })
        }
        (Value::Document(a), Value::Document(b)) => match (a.id, b.id) {
            (Some(x), Some(y)) => x == y,
            _ => {
                a.class == b.class
                    && a.fields.len() == b.fields.len()
                    && a.fields
                        .iter()
                        .all(|(name, v)| b.field(name).is_some_and(|w| equals(v, w)))
            }
        },
        _ => left == right,
    }
}

/// Numeric equality through the least precise common representation.
fn numbers_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Long(a), Value::Long(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Double(a), Value::Double(b)) => a == b,
        (Value::Float(_), _) | (_, Value::Float(_)) => {
            match (left.as_f64(), right.as_f64()) {
                (Some(a), Some(b)) => (a as f32) == (b as f32),
                _ => false,
            }
        }
        (Value::Double(_), _) | (_, Value::Double(_)) => left.as_f64() == right.as_f64(),
        _ => left.as_i64() == right.as_i64(),
    }
}

/// Ordering across value kinds; `None` means the operands are incomparable.
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => return Some(Ordering::Equal),
        (Value::Null, _) | (_, Value::Null) => return None,
        (Value::Date(a), Value::Date(b)) => return Some(a.cmp(b)),
        (Value::Date(a), Value::String(text)) => return parse_date(text).ok().map(|b| a.cmp(&b)),
        (Value::String(text), Value::Date(b)) => return parse_date(text).ok().map(|a| a.cmp(b)),
        (Value::Date(a), other) if other.is_numeric() => {
            return other.as_f64().and_then(|b| (*a as f64).partial_cmp(&b));
        }
        (other, Value::Date(b)) if other.is_numeric() => {
            return other.as_f64().and_then(|a| a.partial_cmp(&(*b as f64)));
        }
        _ => {}
    }

    if left.is_numeric() && right.is_numeric() {
        return numbers_compare(left, right);
    }

    match (left, right) {
        (Value::Key(a), Value::Key(b)) => return Some(a.compare(b)),
        (Value::Key(key), other) => return Some(key.compare(&CompositeKey::coerce(other))),
        (other, Value::Key(key)) => return Some(CompositeKey::coerce(other).compare(key)),
        (Value::Bool(a), Value::Bool(b)) => return Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => return Some(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => return Some(a.cmp(b)),
        (Value::Link(a), Value::Link(b)) => return Some(a.cmp(b)),
        _ => {}
    }

    match (as_record_id(left), as_record_id(right)) {
        (Some(a), Some(b)) => Some(a.cmp(&b)),
        _ => None,
    }
}

/// Numeric ordering through the same representation [`equals`] uses, so that
/// `Equal` and equality agree.
fn numbers_compare(left: &Value, right: &Value) -> Option<Ordering> {
    let (a, b) = (left.as_f64()?, right.as_f64()?);
    match (left, right) {
        (Value::Float(_), _) | (_, Value::Float(_)) => (a as f32).partial_cmp(&(b as f32)),
        (Value::Double(_), _) | (_, Value::Double(_)) => a.partial_cmp(&b),
        _ => Some(left.as_i64()?.cmp(&right.as_i64()?)),
    }
}

fn as_record_id(value: &Value) -> Option<RecordId> {
    match value {
        Value::String(text) => RecordId::parse(text),
        other => other.record_id(),
    }
}

/// Fallback rank used when two key components cannot be compared directly.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) | Value::Long(_) | Value::Float(_) | Value::Double(_) => 2,
        Value::Date(_) => 3,
        Value::String(_) => 4,
        Value::Bytes(_) => 5,
        Value::Link(_) => 6,
        Value::Key(_) => 7,
        Value::List(_) => 8,
        Value::Map(_) => 9,
        Value::Document(_) => 10,
    }
}

impl CompositeKey {
    /// Total ordering over keys. Components are compared pairwise over the
    /// common prefix; a shorter key equals any key it is a prefix of.
    pub fn compare(&self, other: &CompositeKey) -> Ordering {
        for (a, b) in self.parts.iter().zip(&other.parts) {
            let ord = compare(a, b).unwrap_or_else(|| type_rank(a).cmp(&type_rank(b)));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// SQL `LIKE`: `%` matches any run of characters, `_` exactly one. Matching is
/// case-sensitive; an empty text or pattern never matches.
pub fn like(text: &str, pattern: &str) -> bool {
    if text.is_empty() || pattern.is_empty() {
        return false;
    }
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    like_chars(&text, &pattern)
}

/// Greedy wildcard match. On a mismatch only the most recent `%` is retried,
/// one character further along the text, so the cost stays `O(text * pattern)`.
fn like_chars(text: &[char], pattern: &[char]) -> bool {
    let (mut t, mut p) = (0, 0);
    // Pattern index of the last `%` and the text index it has absorbed up to.
    let mut retry: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p).copied() {
            Some('%') => {
                retry = Some((p, t));
                p += 1;
            }
            Some(ch) if ch == '_' || ch == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match retry {
                Some((star, absorbed)) => {
                    retry = Some((star, absorbed + 1));
                    p = star + 1;
                    t = absorbed + 1;
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&ch| ch == '%')
}

/// Pattern text of a `LIKE` right-hand side; non-string values match through
/// their display form.
pub fn like_pattern(pattern: &Value) -> Option<Cow<'_, str>> {
    match pattern {
        Value::Null => None,
        Value::String(text) => Some(Cow::Borrowed(text.as_str())),
        other => Some(Cow::Owned(other.to_string())),
    }
}

/// `LIKE` lifted to values: only strings can match.
pub fn like_value(value: &Value, pattern: &Value) -> bool {
    match (value, like_pattern(pattern)) {
        (Value::String(text), Some(pattern)) => like(text, &pattern),
        _ => false,
    }
}
