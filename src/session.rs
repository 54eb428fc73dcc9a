//! Per-run test session: owns everything that outlives one scenario and
//! dispatches decoded steps against a scenario context.

use crate::assertor::{self, ClaimCheck};
use crate::clock::{Clock, Direction};
use crate::config::{AppConfig, SessionConfig};
use crate::error::StepResult;
use crate::executor;
use crate::extractor;
use crate::jwt::{JsonWebTokenVerifier, MissingKeyVerifier, TokenVerifier};
use crate::model::{RequestBody, ScenarioContext};
use crate::steps::{Step, StepRegistry};
use crate::template;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// State shared by the scenarios of one run.
///
/// The current token and the installed clock live here rather than in
/// globals; call [`TestSession::reset`] between scenarios.
pub struct TestSession {
    config: SessionConfig,
    app_config: Arc<AppConfig>,
    verifier: Arc<dyn TokenVerifier>,
    registry: Arc<StepRegistry>,
    clock: Clock,
    current_token: Option<String>,
}

impl std::fmt::Debug for TestSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestSession")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("current_token", &self.current_token)
            .finish_non_exhaustive()
    }
}

impl TestSession {
    /// Build a session; the verifier comes from the app config keys.
    pub fn new(config: SessionConfig, app_config: AppConfig) -> Self {
        let verifier: Arc<dyn TokenVerifier> = match JsonWebTokenVerifier::from_config(&app_config) {
            Ok(verifier) => Arc::new(verifier),
            Err(e) => {
                debug!("JWT verification unavailable: {}", e);
                Arc::new(MissingKeyVerifier(e.to_string()))
            }
        };
        Self {
            config,
            app_config: Arc::new(app_config),
            verifier,
            registry: Arc::new(StepRegistry::new()),
            clock: Clock::new(),
            current_token: None,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_registry(mut self, registry: StepRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn app_config(&self) -> &AppConfig {
        &self.app_config
    }

    /// Handle to the session clock; clones share the installed time.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Name of the token record JWT assertions check.
    pub fn current_token(&self) -> Option<&str> {
        self.current_token.as_deref()
    }

    /// Fresh context: no headers, no body, no client.
    pub fn begin_scenario(&self) -> ScenarioContext {
        ScenarioContext::new()
    }

    /// Forget the current token and return to real time.
    pub fn reset(&mut self) {
        self.current_token = None;
        self.revert_clock();
    }

    /// Decode and run one sentence.
    pub async fn run_sentence(
        &mut self,
        ctx: &mut ScenarioContext,
        sentence: &str,
        doc_string: Option<&str>,
    ) -> StepResult {
        let step = self.registry.parse(sentence, doc_string)?;
        self.run_step(ctx, step).await
    }

    /// Run one decoded step to completion.
    pub async fn run_step(&mut self, ctx: &mut ScenarioContext, step: Step) -> StepResult {
        match step {
            Step::SetHeader { name, value } => ctx.set_header(name, value),
            Step::ClearHeader { name } => ctx.clear_header(&name),
            Step::SetBody { fragment } => ctx.body = RequestBody::Fragment(fragment),
            Step::SetRawBody { json } => {
                let normalised = template::parse_fragment(&json)?;
                ctx.body = RequestBody::Raw(Value::Object(normalised).to_string());
            }
            Step::ClearBody => ctx.body = RequestBody::Empty,

            Step::Request { method, endpoint } => {
                return executor::send(&self.config, ctx, &method, &endpoint).await;
            }
            Step::FollowRedirect => return executor::follow_redirect(&self.config, ctx).await,

            Step::StoreField { source, node, storage } => {
                return extractor::store_field(ctx, &source, &node, &storage);
            }
            Step::StoreLink { source, matcher, storage } => {
                return extractor::store_link(ctx, &source, &matcher, &storage);
            }
            Step::StoreHeader { header, storage } => {
                return extractor::store_header(ctx, &header, &storage);
            }
            Step::ParseToken { name } => {
                extractor::parse_token_from_response(ctx, &name)?;
                self.current_token = Some(name);
            }
            Step::ParseTokenFrom { storage, name } => {
                extractor::parse_token_from_variable(ctx, &storage, &name)?;
                self.current_token = Some(name);
            }

            Step::Status { code } => return assertor::status(ctx, code),
            Step::HeaderEquals { name, value } => return assertor::header_equals(ctx, &name, &value),
            Step::HeaderExists { name } => return assertor::header_exists(ctx, &name),
            Step::FieldEquals { source, node, value } => {
                return assertor::field_equals(ctx, &source, &node, &value);
            }
            Step::FieldNotEquals { node, value } => return assertor::field_not_equals(ctx, &node, &value),
            Step::FieldCompare { source, node, comparator, number } => {
                return assertor::field_compare(ctx, &source, &node, comparator, &number);
            }
            Step::FieldBool { source, node, value } => {
                return assertor::field_equals_bool(ctx, &source, &node, value);
            }
            Step::FieldText { node, text } => return assertor::field_equals_text(ctx, &node, &text),
            Step::FieldExists { node } => return assertor::field_exists(ctx, &node),
            Step::FieldNotExists { node } => return assertor::field_not_exists(ctx, &node),
            Step::FieldMatches { node, pattern } => return assertor::field_matches(ctx, &node, &pattern),
            Step::List { node, item_context, counts } => {
                return assertor::list(ctx, node.as_deref(), &item_context, counts);
            }
            Step::Reference { source, node, subject, id } => {
                return assertor::reference(ctx, &source, &node, &subject, &id);
            }
            Step::FilterBool { property, value } => return assertor::filter_by_bool(ctx, &property, value),
            Step::FilterContains { property, text } => {
                return assertor::filter_by_contains(ctx, &property, &text);
            }
            Step::JwtExists { claim } => return self.check_claim(ctx, &claim, ClaimCheck::Exists).await,
            Step::JwtEquals { claim, value } => {
                let expected = Value::String(ctx.variables.template(&value));
                return self.check_claim(ctx, &claim, ClaimCheck::Equals(expected)).await;
            }
            Step::JwtBool { claim, value } => {
                return self.check_claim(ctx, &claim, ClaimCheck::Equals(Value::Bool(value))).await;
            }
            Step::JwtOffset { claim, num, unit, direction } => {
                let target = assertor::offset_target(&self.clock, num, &unit, direction);
                return self.check_claim(ctx, &claim, ClaimCheck::Near(target)).await;
            }
            Step::PrintResponse => return assertor::print_response(ctx),

            Step::Advance { days, direction } => {
                let direction: Direction = direction.parse()?;
                let time = self.clock.advance(days, direction)?;
                self.log_clock("🕘", &time.to_rfc3339());
            }
            Step::Weekday { name } => {
                let time = self.clock.set_weekday(&name)?;
                self.log_clock("✓ 🕘", &time.to_rfc3339());
            }
            Step::BackToPresent => self.revert_clock(),
            Step::FieldDaysFromNow { node, num, direction } => {
                let direction: Direction = direction.parse()?;
                return assertor::field_days_from_now(ctx, &self.clock, &node, num, direction);
            }
            Step::FieldIsNow { node } => return assertor::field_is_now(ctx, &self.clock, &node),
            Step::HeaderIsNow { name } => return assertor::header_is_now(ctx, &self.clock, &name),
        }
        Ok(())
    }

    async fn check_claim(&self, ctx: &ScenarioContext, claim: &str, check: ClaimCheck) -> StepResult {
        assertor::jwt_claim(
            ctx,
            self.verifier.as_ref(),
            &self.clock,
            self.current_token.as_deref(),
            claim,
            &check,
        )
        .await
    }

    fn revert_clock(&self) {
        self.clock.revert();
        self.log_clock("✕ 🕘", &chrono::Utc::now().to_rfc3339());
    }

    fn log_clock(&self, marker: &str, time: &str) {
        if self.config.debug_time {
            info!("{} {}", marker, time);
        } else {
            debug!("{} {}", marker, time);
        }
    }
}
