//! Issues HTTP requests from the accumulated scenario state.

use crate::config::SessionConfig;
use crate::error::{StepError, StepResult};
use crate::model::{PendingRequest, RequestBody, ScenarioContext, StoredResponse};
use crate::template::render_body;
use reqwest::{Client, Method};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info, instrument};

/// Emit at `info` when the toggle is on, at `debug` otherwise.
macro_rules! trace_rest {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            info!($($arg)+);
        } else {
            debug!($($arg)+);
        }
    };
}

/// The scenario's persistent client, created on first use.
fn client(ctx: &mut ScenarioContext) -> StepResult<Client> {
    if let Some(client) = &ctx.client {
        return Ok(client.clone());
    }
    let client = Client::builder()
        .cookie_store(true)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| StepError::Transport(format!("failed to build HTTP client: {e}")))?;
    ctx.client = Some(client.clone());
    Ok(client)
}

/// Strip the base host so absolute hrefs route through the same client.
pub fn local_path<'a>(config: &SessionConfig, url: &'a str) -> &'a str {
    url.strip_prefix(config.base_url.as_str()).unwrap_or(url)
}

fn absolute_url(config: &SessionConfig, path: &str) -> String {
    if path.contains("://") {
        path.to_string()
    } else if path.starts_with('/') {
        format!("{}{path}", config.base_url)
    } else {
        format!("{}/{path}", config.base_url)
    }
}

fn encode_body(ctx: &ScenarioContext) -> StepResult<Option<String>> {
    match &ctx.body {
        RequestBody::Empty => Ok(None),
        RequestBody::Fragment(fragment) => render_body(&ctx.variables, fragment).map(Some),
        RequestBody::Raw(raw) => Ok(Some(raw.clone())),
    }
}

/// Send `method endpoint` with the accumulated headers and body.
///
/// HTTP error statuses are stored like any other response. Only a
/// network failure populates `ctx.error`; neither case returns `Err`.
/// A body fragment that does not parse does return `Err`, before any
/// request is sent.
#[instrument(skip(config, ctx))]
pub async fn send(
    config: &SessionConfig,
    ctx: &mut ScenarioContext,
    method: &str,
    endpoint: &str,
) -> StepResult {
    let method = Method::from_str(&method.to_ascii_uppercase())
        .map_err(|_| StepError::invalid(format!("unknown HTTP method: {method}")))?;
    let url = ctx.variables.template(endpoint);
    let path = local_path(config, &url).to_string();
    let body = encode_body(ctx)?;
    dispatch(config, ctx, method, path, body).await
}

/// Follow the `Location` header of the last response with a GET.
pub async fn follow_redirect(config: &SessionConfig, ctx: &mut ScenarioContext) -> StepResult {
    let location = ctx
        .response
        .as_ref()
        .and_then(|r| r.header("location"))
        .map(str::to_string)
        .ok_or_else(|| StepError::assertion("Location header not present"))?;
    let path = local_path(config, &location).to_string();
    dispatch(config, ctx, Method::GET, path, None).await
}

async fn dispatch(
    config: &SessionConfig,
    ctx: &mut ScenarioContext,
    method: Method,
    path: String,
    body: Option<String>,
) -> StepResult {
    let client = client(ctx)?;
    let url = absolute_url(config, &path);

    trace_rest!(config.debug_rest, "> {} {}", method, path);

    let mut request = client.request(method.clone(), &url);
    let mut has_content_type = false;
    for (name, value) in &ctx.headers {
        has_content_type |= name.eq_ignore_ascii_case("content-type");
        request = request.header(name.as_str(), ctx.variables.template(value));
    }
    if let Some(body) = body {
        if !has_content_type {
            request = request.header("Content-Type", "application/json");
        }
        request = request.body(body);
    }

    ctx.pending_request = Some(PendingRequest {
        method: method.to_string(),
        url: path,
    });

    match request.send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            let headers: HashMap<String, String> = response
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.to_string(),
                        value.to_str().unwrap_or("").to_string(),
                    )
                })
                .collect();
            let text = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    ctx.response = None;
                    ctx.error = Some(format!("Failed to read response body: {e}"));
                    return Ok(());
                }
            };
            let stored = StoredResponse::new(status, headers, text);
            log_response(config, &stored);
            ctx.response = Some(stored);
            ctx.error = None;
        }
        Err(e) => {
            debug!("Request failed: {}", e);
            ctx.response = None;
            ctx.error = Some(e.to_string());
        }
    }
    Ok(())
}

fn log_response(config: &SessionConfig, response: &StoredResponse) {
    trace_rest!(config.debug_rest, "< {}", response.status);
    let verbose = config.debug_rest && (response.status >= 400 || config.debug_response);
    if response.status == 401 {
        if let Some(challenge) = response.header("www-authenticate") {
            trace_rest!(verbose, "< www-authenticate: {}", challenge);
        }
    }
    trace_rest!(verbose, "{}", response.text);
}
