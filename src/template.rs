//! Per-scenario variable store and `{name}` placeholder substitution.

use crate::error::{StepError, StepResult};
use crate::path;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_$][A-Za-z0-9_$.\-\[\]]*)\}")
        .expect("failed to compile placeholder regex")
});

/// Named values produced by extraction steps.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    values: HashMap<String, Value>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Resolve `name` or `name.nested.path` against the stored values.
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        if let Some(value) = self.values.get(key) {
            return Some(value);
        }
        let split = key.find(['.', '['])?;
        let (head, rest) = key.split_at(split);
        let rest = rest.strip_prefix('.').unwrap_or(rest);
        path::get(self.values.get(head)?, rest)
    }

    /// Replace every `{name}` placeholder in `text` with the stored value.
    ///
    /// Strings are inserted verbatim; other values use their JSON text.
    /// Unknown names are left untouched so JSON braces survive.
    pub fn template(&self, text: &str) -> String {
        PLACEHOLDER_RE
            .replace_all(text, |caps: &regex::Captures| {
                match self.lookup(&caps[1]) {
                    Some(Value::String(s)) => s.clone(),
                    Some(v) => v.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Parse a JSON object fragment (the members without the outer braces).
///
/// This is the second stage of the body pipeline; the first stage is
/// [`VariableStore::template`] over the raw fragment text.
pub fn parse_fragment(fragment: &str) -> StepResult<Map<String, Value>> {
    let wrapped = format!("{{{fragment}}}");
    match serde_json::from_str::<Value>(&wrapped) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(StepError::Template(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(StepError::Template(format!("{e}: {wrapped}"))),
    }
}

/// Template a body fragment and normalise it into a JSON document.
pub fn render_body(vars: &VariableStore, fragment: &str) -> StepResult<String> {
    let templated = vars.template(fragment);
    let object = parse_fragment(&templated)?;
    serde_json::to_string(&Value::Object(object))
        .map_err(|e| StepError::Template(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> VariableStore {
        let mut vars = VariableStore::new();
        vars.set("id", json!("42"));
        vars.set("count", json!(7));
        vars.set("jwt", json!({"sub": "https://api.example.com/user/5"}));
        vars.set("href", json!("http://127.0.0.1:8080/user/5"));
        vars
    }

    #[test]
    fn test_substitutes_known_names() {
        let vars = store();
        assert_eq!(vars.template("/user/{id}"), "/user/42");
        assert_eq!(vars.template("n={count}"), "n=7");
        assert_eq!(vars.template("{href}"), "http://127.0.0.1:8080/user/5");
    }

    #[test]
    fn test_nested_lookup() {
        let vars = store();
        assert_eq!(
            vars.template("{jwt.sub}"),
            "https://api.example.com/user/5"
        );
    }

    #[test]
    fn test_unknown_and_json_braces_untouched() {
        let vars = store();
        assert_eq!(vars.template("{missing}"), "{missing}");
        assert_eq!(
            vars.template(r#""a": {"b": 1}, "c": {}"#),
            r#""a": {"b": 1}, "c": {}"#
        );
    }

    #[test]
    fn test_parse_fragment_accepts_members() {
        let map = parse_fragment(r#""email": "a@b.c", "age": 3"#).unwrap();
        assert_eq!(map.get("email"), Some(&json!("a@b.c")));
        assert_eq!(map.get("age"), Some(&json!(3)));
    }

    #[test]
    fn test_parse_fragment_rejects_garbage() {
        let err = parse_fragment(r#""email": "#).unwrap_err();
        assert!(matches!(err, StepError::Template(_)));
    }

    #[test]
    fn test_render_body_round_trips_values() {
        let vars = store();
        let body = render_body(&vars, "\"user\": \"{id}\",\n  \"n\": 1").unwrap();
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed, json!({"user": "42", "n": 1}));
    }

    #[test]
    fn test_empty_fragment_is_empty_object() {
        let vars = VariableStore::new();
        assert_eq!(render_body(&vars, "").unwrap(), "{}");
    }
}
