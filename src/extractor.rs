//! Copies values out of the last response into the variable store.

use crate::error::{StepError, StepResult};
use crate::jwt;
use crate::model::{HypermediaLink, ScenarioContext, StoredResponse};
use crate::path;
use serde_json::Value;
use tracing::debug;

/// How to pick a link out of a `$links` array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkMatch {
    /// `rel` equals the relation.
    Relation(String),
    /// `subject` equals the context and the link is a list link.
    List(String),
    /// `subject` equals the context.
    Subject(String),
}

impl LinkMatch {
    fn matches(&self, link: &HypermediaLink) -> bool {
        match self {
            LinkMatch::Relation(rel) => link.rel.as_deref() == Some(rel.as_str()),
            LinkMatch::List(subject) => {
                link.list && link.subject.as_deref() == Some(subject.as_str())
            }
            LinkMatch::Subject(subject) => link.subject.as_deref() == Some(subject.as_str()),
        }
    }
}

impl std::fmt::Display for LinkMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkMatch::Relation(rel) => write!(f, "link to {rel:?}"),
            LinkMatch::List(subject) => write!(f, "link to the list {subject:?}"),
            LinkMatch::Subject(subject) => write!(f, "link of {subject:?}"),
        }
    }
}

/// Where in the body the link (or field) is looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Body,
    /// 1-based index into `body.items`.
    Item(usize),
    /// Property path into the body.
    Node(String),
}

pub(crate) fn response(ctx: &ScenarioContext) -> StepResult<&StoredResponse> {
    ctx.response.as_ref().ok_or_else(|| {
        let (method, url) = ctx
            .pending_request
            .as_ref()
            .map(|r| (r.method.clone(), r.url.clone()))
            .unwrap_or_else(|| ("(none)".into(), "(no request sent)".into()));
        StepError::NoResponse {
            method,
            url,
            cause: ctx.error.clone(),
        }
    })
}

pub(crate) fn resolve_source<'a>(
    response: &'a StoredResponse,
    source: &Source,
) -> StepResult<&'a Value> {
    match source {
        Source::Body => Ok(&response.body),
        Source::Item(num) => response
            .item(*num)
            .ok_or_else(|| StepError::lookup(format!("item {num} does not exist in the list"))),
        Source::Node(node) => path::get(&response.body, node)
            .ok_or_else(|| StepError::lookup(format!("{node:?} is not defined on the body"))),
    }
}

/// Store the value at `node` (of the body or of an item) as `storage`.
///
/// A missing path is stored as `null`.
pub fn store_field(
    ctx: &mut ScenarioContext,
    source: &Source,
    node: &str,
    storage: &str,
) -> StepResult {
    let response = response(ctx)?;
    let root = resolve_source(response, source)?;
    let value = path::get(root, node).cloned().unwrap_or(Value::Null);
    debug!("Stored {:?} as {:?}: {}", node, storage, value);
    ctx.variables.set(storage, value);
    Ok(())
}

/// Store the `href` of the first link matching `matcher` as `storage`.
pub fn store_link(
    ctx: &mut ScenarioContext,
    source: &Source,
    matcher: &LinkMatch,
    storage: &str,
) -> StepResult {
    let response = response(ctx)?;
    let root = resolve_source(response, source)?;
    let href = HypermediaLink::all_of(root)
        .into_iter()
        .find(|link| matcher.matches(link))
        .map(|link| link.href)
        .ok_or_else(|| StepError::lookup(format!("no {matcher} found in $links")))?;
    debug!("Stored {} as {:?}: {}", matcher, storage, href);
    ctx.variables.set(storage, Value::String(href));
    Ok(())
}

/// Store a response header (case-insensitive) as `storage`.
pub fn store_header(ctx: &mut ScenarioContext, header: &str, storage: &str) -> StepResult {
    let response = response(ctx)?;
    let value = response
        .header(header)
        .map(|v| Value::String(v.to_string()))
        .ok_or_else(|| StepError::lookup(format!("header {header:?} is not present")))?;
    ctx.variables.set(storage, value);
    Ok(())
}

/// Decode `body.token` into a token record stored as `name`.
pub fn parse_token_from_response(ctx: &mut ScenarioContext, name: &str) -> StepResult {
    let response = response(ctx)?;
    let token = response
        .body
        .get("token")
        .and_then(Value::as_str)
        .ok_or_else(|| StepError::lookup("response body has no \"token\""))?;
    let record = jwt::token_record(token)?;
    ctx.variables.set(name, record);
    Ok(())
}

/// Decode the token held in variable `storage` into a record stored as `name`.
pub fn parse_token_from_variable(
    ctx: &mut ScenarioContext,
    storage: &str,
    name: &str,
) -> StepResult {
    let token = ctx
        .variables
        .get(storage)
        .and_then(Value::as_str)
        .ok_or_else(|| StepError::lookup(format!("no token stored as {storage:?}")))?;
    let record = jwt::token_record(token)?;
    ctx.variables.set(name, record);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn ctx_with(body: Value) -> ScenarioContext {
        let mut ctx = ScenarioContext::new();
        let mut headers = HashMap::new();
        headers.insert("Location".to_string(), "/user/5".to_string());
        ctx.response = Some(StoredResponse::new(200, headers, body.to_string()));
        ctx
    }

    fn list_body() -> Value {
        json!({
            "$context": "https://github.com/ResourcefulHumans/rheactor-models#List",
            "total": 2,
            "items": [
                {"name": "first", "$links": [{"rel": "edit", "href": "/item/1/edit"}]},
                {"name": "second", "$links": [
                    {"subject": "urn:comment", "href": "/item/2/comments", "list": true}
                ]}
            ],
            "$links": [
                {"rel": "next", "href": "/items?offset=2"},
                {"subject": "urn:user", "href": "/users", "list": false},
                {"subject": "urn:user", "href": "/users?list", "list": true}
            ],
            "owner": {"$links": [{"rel": "self", "href": "/owner"}]}
        })
    }

    #[test]
    fn test_store_field_from_body_and_item() {
        let mut ctx = ctx_with(list_body());
        store_field(&mut ctx, &Source::Body, "total", "total").unwrap();
        store_field(&mut ctx, &Source::Item(2), "name", "second").unwrap();
        assert_eq!(ctx.variables.get("total"), Some(&json!(2)));
        assert_eq!(ctx.variables.get("second"), Some(&json!("second")));
    }

    #[test]
    fn test_store_field_missing_item_fails() {
        let mut ctx = ctx_with(list_body());
        let err = store_field(&mut ctx, &Source::Item(3), "name", "x").unwrap_err();
        assert!(matches!(err, StepError::Lookup(_)));
    }

    #[test]
    fn test_store_links() {
        let mut ctx = ctx_with(list_body());
        store_link(&mut ctx, &Source::Body, &LinkMatch::Relation("next".into()), "next").unwrap();
        store_link(&mut ctx, &Source::Body, &LinkMatch::List("urn:user".into()), "users").unwrap();
        store_link(&mut ctx, &Source::Body, &LinkMatch::Subject("urn:user".into()), "user").unwrap();
        store_link(&mut ctx, &Source::Item(1), &LinkMatch::Relation("edit".into()), "edit").unwrap();
        store_link(&mut ctx, &Source::Item(2), &LinkMatch::List("urn:comment".into()), "c").unwrap();
        store_link(&mut ctx, &Source::Node("owner".into()), &LinkMatch::Relation("self".into()), "o")
            .unwrap();

        assert_eq!(ctx.variables.get("next"), Some(&json!("/items?offset=2")));
        assert_eq!(ctx.variables.get("users"), Some(&json!("/users?list")));
        assert_eq!(ctx.variables.get("user"), Some(&json!("/users")));
        assert_eq!(ctx.variables.get("edit"), Some(&json!("/item/1/edit")));
        assert_eq!(ctx.variables.get("c"), Some(&json!("/item/2/comments")));
        assert_eq!(ctx.variables.get("o"), Some(&json!("/owner")));
    }

    #[test]
    fn test_missing_link_is_lookup_failure() {
        let mut ctx = ctx_with(list_body());
        let err = store_link(&mut ctx, &Source::Body, &LinkMatch::Relation("prev".into()), "p")
            .unwrap_err();
        assert!(matches!(err, StepError::Lookup(_)));
        assert!(err.to_string().contains("\"prev\""));
        assert!(ctx.variables.get("p").is_none());
    }

    #[test]
    fn test_store_header_case_insensitive() {
        let mut ctx = ctx_with(json!({}));
        store_header(&mut ctx, "LOCATION", "loc").unwrap();
        assert_eq!(ctx.variables.get("loc"), Some(&json!("/user/5")));
        assert!(store_header(&mut ctx, "ETag", "etag").is_err());
    }

    #[test]
    fn test_no_response_reports_request() {
        let mut ctx = ScenarioContext::new();
        let err = store_field(&mut ctx, &Source::Body, "x", "y").unwrap_err();
        assert!(matches!(err, StepError::NoResponse { .. }));
    }

    #[test]
    fn test_parse_token_from_variable() {
        // {"alg":"HS256"}.{"sub":"user/5"}.sig
        let token = "eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiJ1c2VyLzUifQ.c2ln";
        let mut ctx = ScenarioContext::new();
        ctx.variables.set("raw", json!(token));
        parse_token_from_variable(&mut ctx, "raw", "jwt").unwrap();
        let record = ctx.variables.get("jwt").unwrap();
        assert_eq!(record["sub"], json!("user/5"));
        assert_eq!(jwt::raw_token(record), Some(token));
    }
}
