//! Expectations against the last stored response.
//!
//! Everything here reads `ctx.response` without changing it, except the
//! two list filters which replace `body.items` in place.

use crate::clock::{self, Clock, Direction};
use crate::error::{StepError, StepResult};
use crate::extractor::{resolve_source, response, Source};
use crate::jwt::{self, TokenVerifier};
use crate::model::{ScenarioContext, LIST_CONTEXT, REFERENCE_CONTEXT, TOKEN_CONTEXT};
use crate::path::{self, describe};
use regex::Regex;
use serde_json::{Map, Value};
use std::str::FromStr;
use tracing::info;

/// Numeric comparison named in a sentence (`"age" should be above 17`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equal,
    Above,
    Below,
    AtLeast,
    AtMost,
}

impl Comparator {
    fn holds(self, actual: f64, expected: f64) -> bool {
        match self {
            Comparator::Equal => actual == expected,
            Comparator::Above => actual > expected,
            Comparator::Below => actual < expected,
            Comparator::AtLeast => actual >= expected,
            Comparator::AtMost => actual <= expected,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Comparator::Equal => "equal to",
            Comparator::Above => "above",
            Comparator::Below => "below",
            Comparator::AtLeast => "at least",
            Comparator::AtMost => "at most",
        }
    }
}

impl FromStr for Comparator {
    type Err = StepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "equal" | "eq" | "equals" => Ok(Comparator::Equal),
            "above" | "gt" | "greaterThan" => Ok(Comparator::Above),
            "below" | "lt" | "lessThan" => Ok(Comparator::Below),
            "least" | "gte" => Ok(Comparator::AtLeast),
            "most" | "lte" => Ok(Comparator::AtMost),
            other => Err(StepError::invalid(format!("unknown comparison: {other}"))),
        }
    }
}

/// Parse a sentence number such as `+12`, `-0.5` or `3`.
pub fn parse_number(text: &str) -> StepResult<f64> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| StepError::invalid(format!("not a number: {text}")))
}

fn field<'a>(ctx: &'a ScenarioContext, source: &Source, node: &str) -> StepResult<Option<&'a Value>> {
    let response = response(ctx)?;
    let root = resolve_source(response, source)?;
    Ok(path::get(root, node))
}

pub fn status(ctx: &ScenarioContext, expected: u16) -> StepResult {
    let response = response(ctx)?;
    if response.status == expected {
        return Ok(());
    }
    let request = ctx
        .pending_request
        .as_ref()
        .map(|r| format!("{} {}", r.method, r.url))
        .unwrap_or_default();
    Err(StepError::assertion(format!(
        "Unexpected HTTP response status\nExpected: {expected}\nGot:      {}\nRequest:  {request}",
        response.status
    )))
}

pub fn header_equals(ctx: &ScenarioContext, name: &str, expected: &str) -> StepResult {
    let actual = response(ctx)?.header(name);
    if actual == Some(expected) {
        return Ok(());
    }
    Err(StepError::assertion(format!(
        "header {name:?} should equal {expected:?}, got {}",
        actual.map(|v| format!("{v:?}")).unwrap_or_else(|| "undefined".into())
    )))
}

pub fn header_exists(ctx: &ScenarioContext, name: &str) -> StepResult {
    match response(ctx)?.header(name) {
        Some(_) => Ok(()),
        None => Err(StepError::assertion(format!("header {name:?} should exist"))),
    }
}

/// `node` equals the templated string `expected`.
pub fn field_equals(ctx: &ScenarioContext, source: &Source, node: &str, expected: &str) -> StepResult {
    let expected = ctx.variables.template(expected);
    let actual = field(ctx, source, node)?;
    if actual.and_then(Value::as_str) == Some(expected.as_str()) {
        return Ok(());
    }
    Err(StepError::assertion(format!(
        "{node:?} should equal {expected:?}, got {}",
        describe(actual)
    )))
}

pub fn field_not_equals(ctx: &ScenarioContext, node: &str, unexpected: &str) -> StepResult {
    let unexpected = ctx.variables.template(unexpected);
    let actual = field(ctx, &Source::Body, node)?;
    if actual.and_then(Value::as_str) != Some(unexpected.as_str()) {
        return Ok(());
    }
    Err(StepError::assertion(format!(
        "{node:?} should not equal {unexpected:?}"
    )))
}

pub fn field_compare(
    ctx: &ScenarioContext,
    source: &Source,
    node: &str,
    comparator: Comparator,
    number: &str,
) -> StepResult {
    let expected = parse_number(number)?;
    let actual = field(ctx, source, node)?;
    match actual.and_then(Value::as_f64) {
        Some(n) if comparator.holds(n, expected) => Ok(()),
        _ => Err(StepError::assertion(format!(
            "{node:?} should be {} {expected}, got {}",
            comparator.describe(),
            describe(actual)
        ))),
    }
}

pub fn field_equals_bool(ctx: &ScenarioContext, source: &Source, node: &str, expected: bool) -> StepResult {
    let actual = field(ctx, source, node)?;
    if actual.and_then(Value::as_bool) == Some(expected) {
        return Ok(());
    }
    Err(StepError::assertion(format!(
        "{node} should be {expected}, got {}",
        describe(actual)
    )))
}

/// `node` equals a multi-line text block verbatim.
pub fn field_equals_text(ctx: &ScenarioContext, node: &str, text: &str) -> StepResult {
    let actual = field(ctx, &Source::Body, node)?;
    if actual.and_then(Value::as_str) == Some(text) {
        return Ok(());
    }
    Err(StepError::assertion(format!(
        "{node:?} should equal\n{text}\ngot {}",
        describe(actual)
    )))
}

pub fn field_exists(ctx: &ScenarioContext, node: &str) -> StepResult {
    match field(ctx, &Source::Body, node)? {
        Some(_) => Ok(()),
        None => Err(StepError::assertion(format!("{node:?} should exist"))),
    }
}

pub fn field_not_exists(ctx: &ScenarioContext, node: &str) -> StepResult {
    match field(ctx, &Source::Body, node)? {
        None => Ok(()),
        Some(v) => Err(StepError::assertion(format!(
            "{node:?} should not exist, got {v}"
        ))),
    }
}

pub fn field_matches(ctx: &ScenarioContext, node: &str, pattern: &str) -> StepResult {
    let re = Regex::new(pattern)
        .map_err(|e| StepError::invalid(format!("invalid regular expression {pattern:?}: {e}")))?;
    let actual = field(ctx, &Source::Body, node)?;
    match actual.and_then(Value::as_str) {
        Some(s) if re.is_match(s) => Ok(()),
        _ => Err(StepError::assertion(format!(
            "{node:?} should match /{pattern}/, got {}",
            describe(actual)
        ))),
    }
}

/// Validate a list envelope; `node` selects a nested list.
///
/// `counts` is `(num, total)`: the expected `items.length` and `total`.
pub fn list(
    ctx: &ScenarioContext,
    node: Option<&str>,
    item_context: &str,
    counts: Option<(usize, usize)>,
) -> StepResult {
    status(ctx, 200)?;
    let response = response(ctx)?;
    let list = match node {
        Some(node) => path::get(&response.body, node),
        None => Some(&response.body),
    }
    .filter(|v| !v.is_null())
    .ok_or_else(|| StepError::assertion("The list should not be undefined"))?;

    check_list(list, item_context, counts)
}

fn check_list(list: &Value, item_context: &str, counts: Option<(usize, usize)>) -> StepResult {
    let context = list.get("$context").and_then(Value::as_str);
    if context != Some(LIST_CONTEXT) {
        return Err(StepError::assertion(format!(
            "The $context of a list should be {LIST_CONTEXT}, got {}",
            describe(list.get("$context"))
        )));
    }

    let items = list
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| StepError::assertion("The list should have an items array"))?;

    if let Some((num, total)) = counts {
        let actual_total = list.get("total").and_then(Value::as_u64);
        if actual_total != Some(total as u64) {
            return Err(StepError::assertion(format!(
                "The list should have {total} items, got {}",
                describe(list.get("total"))
            )));
        }
        if items.len() != num {
            return Err(StepError::assertion(format!(
                "The items array should have {num} elements, got {}",
                items.len()
            )));
        }
    }

    for (idx, item) in items.iter().enumerate() {
        if item.get("$context").and_then(Value::as_str) != Some(item_context) {
            return Err(StepError::assertion(format!(
                "The $context of each item should be {item_context}, item {} has {}",
                idx + 1,
                describe(item.get("$context"))
            )));
        }
    }
    Ok(())
}

/// `node` (of the body or an item) is a reference to `subject` with `$id`.
pub fn reference(
    ctx: &ScenarioContext,
    source: &Source,
    node: &str,
    subject: &str,
    id: &str,
) -> StepResult {
    let data = field(ctx, source, node)?
        .ok_or_else(|| StepError::assertion(format!("{node:?} should be defined")))?;

    let checks = [
        ("$context", REFERENCE_CONTEXT.to_string()),
        ("subject", ctx.variables.template(subject)),
        ("$id", ctx.variables.template(id)),
    ];
    for (key, expected) in checks {
        let actual = data.get(key);
        if actual.and_then(Value::as_str) != Some(expected.as_str()) {
            return Err(StepError::assertion(format!(
                "{key} of {node:?} should equal {expected:?}, got {}",
                describe(actual)
            )));
        }
    }
    Ok(())
}

fn filter_items(ctx: &mut ScenarioContext, keep: impl Fn(&Value) -> bool) -> StepResult {
    let response = ctx
        .response
        .as_mut()
        .ok_or_else(|| StepError::assertion("no response to filter"))?;
    let items = response
        .body
        .get_mut("items")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| StepError::lookup("response body has no items to filter"))?;
    items.retain(|item| keep(item));
    response.filtered = true;
    Ok(())
}

/// Keep only items whose `property` equals `expected`.
pub fn filter_by_bool(ctx: &mut ScenarioContext, property: &str, expected: bool) -> StepResult {
    filter_items(ctx, |item| {
        path::get(item, property).and_then(Value::as_bool) == Some(expected)
    })
}

/// Keep only items whose `property` contains the templated `text`.
pub fn filter_by_contains(ctx: &mut ScenarioContext, property: &str, text: &str) -> StepResult {
    let needle = ctx.variables.template(text);
    filter_items(ctx, |item| {
        path::get(item, property)
            .and_then(Value::as_str)
            .is_some_and(|s| s.contains(needle.as_str()))
    })
}

/// What a JWT claim must satisfy.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimCheck {
    Exists,
    Equals(Value),
    /// Epoch seconds within one second of the target.
    Near(i64),
}

/// Seconds in the unit named by the first letter of `unit`.
pub fn unit_seconds(unit: &str) -> i64 {
    match unit.chars().next() {
        Some('m') => 60,
        Some('h') => 3600,
        Some('d') => 86_400,
        _ => 1,
    }
}

/// Epoch second `num` units away from `now` in `direction`.
pub fn offset_target(clock: &Clock, num: u32, unit: &str, direction: Direction) -> i64 {
    let sign = match direction {
        Direction::Future => 1,
        Direction::Past => -1,
    };
    clock.now().timestamp() + sign * i64::from(num) * unit_seconds(unit)
}

/// Verify the current token and check one of its claims.
pub async fn jwt_claim(
    ctx: &ScenarioContext,
    verifier: &dyn TokenVerifier,
    clock: &Clock,
    current_token: Option<&str>,
    claim: &str,
    check: &ClaimCheck,
) -> StepResult {
    let name = current_token.ok_or_else(|| StepError::lookup("no JWT token has been parsed"))?;
    let record = ctx
        .variables
        .get(name)
        .ok_or_else(|| StepError::lookup(format!("no token stored as {name:?}")))?;
    let token = jwt::raw_token(record).ok_or_else(|| {
        StepError::assertion(format!("{name:?} is not a token record ({TOKEN_CONTEXT})"))
    })?;

    let claims: Map<String, Value> = verifier.verify(token).await?;
    jwt::check_expiry(&claims, clock.now())?;
    let actual = claims.get(claim);

    let ok = match check {
        ClaimCheck::Exists => actual.is_some(),
        ClaimCheck::Equals(expected) => actual == Some(expected),
        ClaimCheck::Near(target) => actual
            .and_then(Value::as_f64)
            .is_some_and(|v| v >= (*target - 1) as f64 && v <= (*target + 1) as f64),
    };
    if ok {
        return Ok(());
    }

    let expectation = match check {
        ClaimCheck::Exists => "exist".to_string(),
        ClaimCheck::Equals(expected) => format!("equal {expected}"),
        ClaimCheck::Near(target) => format!("be within {} and {}", target - 1, target + 1),
    };
    Err(StepError::assertion(format!(
        "JWT {claim} should {expectation}, got {}",
        describe(actual)
    )))
}

/// Body field `node` is `num` days from now in `direction`.
pub fn field_days_from_now(
    ctx: &ScenarioContext,
    clock: &Clock,
    node: &str,
    num: u32,
    direction: Direction,
) -> StepResult {
    let actual = field(ctx, &Source::Body, node)?;
    let then = actual
        .and_then(clock::parse_timestamp)
        .ok_or_else(|| StepError::assertion(format!("{node:?} is not a timestamp: {}", describe(actual))))?;
    let days = clock::days_between(clock.now(), then);
    let expected = match direction {
        Direction::Future => i64::from(num),
        Direction::Past => -i64::from(num),
    };
    if days == expected {
        return Ok(());
    }
    Err(StepError::assertion(format!(
        "{node:?} should be {num} days in the {}, is {days} days from now",
        match direction {
            Direction::Future => "future",
            Direction::Past => "past",
        }
    )))
}

fn within_ten_seconds(clock: &Clock, then: chrono::DateTime<chrono::Utc>) -> bool {
    let diff = (then - clock.now()).num_milliseconds() as f64 / 1000.0;
    (-10.0..=10.0).contains(&diff.round())
}

pub fn field_is_now(ctx: &ScenarioContext, clock: &Clock, node: &str) -> StepResult {
    let actual = field(ctx, &Source::Body, node)?;
    match actual.and_then(clock::parse_timestamp) {
        Some(then) if within_ten_seconds(clock, then) => Ok(()),
        _ => Err(StepError::assertion(format!(
            "{node:?} should be now ({}), got {}",
            clock.now().to_rfc3339(),
            describe(actual)
        ))),
    }
}

pub fn header_is_now(ctx: &ScenarioContext, clock: &Clock, name: &str) -> StepResult {
    let actual = response(ctx)?.header(name);
    match actual.and_then(clock::parse_timestamp_str) {
        Some(then) if within_ten_seconds(clock, then) => Ok(()),
        _ => Err(StepError::assertion(format!(
            "header {name:?} should be now ({}), got {}",
            clock.now().to_rfc2822(),
            actual.unwrap_or("undefined")
        ))),
    }
}

/// Log the stored body; lists get a summary first.
pub fn print_response(ctx: &ScenarioContext) -> StepResult {
    let response = response(ctx)?;
    let body = &response.body;
    if body.get("$context").and_then(Value::as_str) == Some(LIST_CONTEXT) {
        let items = body.get("items").and_then(Value::as_array);
        info!(
            "List containing {} of {} items",
            items.map(Vec::len).unwrap_or(0),
            describe(body.get("total"))
        );
        let links = pretty(body.get("$links").unwrap_or(&Value::Null));
        let listed = pretty(body.get("items").unwrap_or(&Value::Null));
        info!("Links:\n{}", links);
        info!("Items:\n{}", listed);
    } else if body.is_null() {
        info!("{}", response.text);
    } else {
        info!("{}", pretty(body));
    }
    Ok(())
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
