//! Property path lookup into JSON response bodies.
//!
//! Paths use dots for object keys and either dots or brackets for
//! array indices: `user.name`, `items.0.id`, `items[0].id`,
//! `links["self"]`. A missing intermediate node yields `None`.

use serde_json::Value;

/// One segment of a parsed property path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

fn parse(path: &str) -> Option<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut rest = path;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('[') {
            let end = after.find(']')?;
            let inner = after[..end].trim();
            let unquoted = inner
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .or_else(|| {
                    inner.strip_prefix('\'').and_then(|s| s.strip_suffix('\''))
                });
            match unquoted {
                Some(key) => segments.push(Segment::Key(key)),
                None => segments.push(Segment::Index(inner.parse().ok()?)),
            }
            rest = &after[end + 1..];
            rest = rest.strip_prefix('.').unwrap_or(rest);
            continue;
        }

        let end = rest.find(['.', '[']).unwrap_or(rest.len());
        let part = &rest[..end];
        if !part.is_empty() {
            segments.push(Segment::Key(part));
        }
        rest = &rest[end..];
        rest = rest.strip_prefix('.').unwrap_or(rest);
    }

    Some(segments)
}

/// Resolve `path` against `value`.
///
/// An empty path resolves to `value` itself. Numeric keys index into
/// arrays, so `items.0` and `items[0]` are equivalent.
pub fn get<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;

    for segment in parse(path)? {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key)?,
            (Segment::Key(key), Value::Array(array)) => {
                array.get(key.parse::<usize>().ok()?)?
            }
            (Segment::Index(idx), Value::Array(array)) => array.get(idx)?,
            (Segment::Index(idx), Value::Object(map)) => {
                map.get(&idx.to_string())?
            }
            _ => return None,
        };
    }

    Some(current)
}

/// Human readable rendering of a looked-up value for failure messages.
pub fn describe(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::String(s)) => format!("{s:?}"),
        Some(other) => other.to_string(),
    }
}
