//! Plain-text scenario parsing and sequential execution.

use crate::model::{ScenarioReport, StepReport};
use crate::session::TestSession;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, instrument};

const KEYWORDS: [&str; 5] = ["Given", "When", "Then", "And", "But"];

/// One sentence of a scenario with its optional doc string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub keyword: String,
    pub text: String,
    pub doc_string: Option<String>,
}

impl Sentence {
    /// `Given "x" is the Foo header`, as written.
    pub fn display(&self) -> String {
        format!("{} {}", self.keyword, self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub name: String,
    pub sentences: Vec<Sentence>,
}

fn strip_keyword(line: &str) -> Option<(&'static str, &str)> {
    KEYWORDS.iter().find_map(|keyword| {
        line.strip_prefix(keyword)
            .and_then(|rest| rest.strip_prefix(' '))
            .map(|rest| (*keyword, rest.trim()))
    })
}

/// Parse scenario text into scenarios.
///
/// Sentences start with a Given/When/Then/And/But keyword. A `"""`
/// block directly after a sentence becomes its doc string, with the
/// indentation of the opening delimiter removed. `Feature:` lines and
/// `#` comments are ignored.
pub fn parse_scenarios(text: &str) -> Result<Vec<Scenario>> {
    let mut scenarios: Vec<Scenario> = Vec::new();
    let mut doc: Option<(usize, Vec<String>)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();

        if let Some((indent, lines)) = doc.as_mut() {
            if line == "\"\"\"" {
                let body = lines.join("\n");
                let sentence = scenarios
                    .last_mut()
                    .and_then(|s| s.sentences.last_mut())
                    .ok_or_else(|| anyhow!("line {line_no}: doc string without a step"))?;
                sentence.doc_string = Some(body);
                doc = None;
            } else {
                let cut = raw
                    .char_indices()
                    .take_while(|(i, c)| *i < *indent && c.is_whitespace())
                    .map(|(i, c)| i + c.len_utf8())
                    .last()
                    .unwrap_or(0);
                lines.push(raw[cut..].to_string());
            }
            continue;
        }

        if line.is_empty() || line.starts_with('#') || line.starts_with("Feature:") {
            continue;
        }

        if line == "\"\"\"" {
            let indent = raw.len() - raw.trim_start().len();
            doc = Some((indent, Vec::new()));
            continue;
        }

        if let Some(name) = line.strip_prefix("Scenario:") {
            scenarios.push(Scenario {
                name: name.trim().to_string(),
                sentences: Vec::new(),
            });
            continue;
        }

        let (keyword, rest) = strip_keyword(line)
            .ok_or_else(|| anyhow!("line {line_no}: expected a step, got {line:?}"))?;
        if scenarios.is_empty() {
            scenarios.push(Scenario {
                name: "Scenario".to_string(),
                sentences: Vec::new(),
            });
        }
        if let Some(scenario) = scenarios.last_mut() {
            scenario.sentences.push(Sentence {
                keyword: keyword.to_string(),
                text: rest.to_string(),
                doc_string: None,
            });
        }
    }

    if doc.is_some() {
        return Err(anyhow!("unterminated doc string"));
    }
    Ok(scenarios)
}

/// Read and parse a scenario file.
pub fn load_scenarios<P: AsRef<Path>>(path: P) -> Result<Vec<Scenario>> {
    let path = path.as_ref();
    info!("Loading scenarios from {}", path.display());
    let content = fs::read_to_string(path)
        .context(format!("Failed to read scenario file: {}", path.display()))?;
    let scenarios = parse_scenarios(&content)
        .context(format!("Failed to parse scenarios from {}", path.display()))?;
    debug!("Loaded {} scenario(s) from {}", scenarios.len(), path.display());
    Ok(scenarios)
}

/// Run `scenario` on a fresh context, stopping at the first failed step.
///
/// The session is reset first, so no token or clock leaks in from a
/// previous scenario.
#[instrument(skip(session, scenario), fields(scenario = %scenario.name))]
pub async fn run_scenario(session: &mut TestSession, scenario: &Scenario) -> ScenarioReport {
    let start = Instant::now();
    session.reset();
    let mut ctx = session.begin_scenario();
    let mut steps = Vec::new();
    let mut failure = None;

    for sentence in &scenario.sentences {
        let step_start = Instant::now();
        let outcome = session
            .run_sentence(&mut ctx, &sentence.text, sentence.doc_string.as_deref())
            .await;
        let error = outcome.err().map(|e| e.to_string());
        if let Some(err) = &error {
            error!("Step failed: {}\n{}", sentence.display(), err);
        } else {
            debug!("Step passed: {}", sentence.display());
        }
        let success = error.is_none();
        steps.push(StepReport {
            name: sentence.display(),
            success,
            error: error.clone(),
            duration_ms: step_start.elapsed().as_millis() as u64,
        });
        if !success {
            failure = error;
            break;
        }
    }

    session.reset();
    ScenarioReport {
        name: scenario.name.clone(),
        success: failure.is_none(),
        error: failure,
        steps,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}
