//! The step vocabulary: sentence patterns decoded into [`Step`] values.
//!
//! Each [`StepDefinition`] pairs an anchored pattern with a decoder that
//! turns the captures (and an optional doc string) into a [`Step`].
//! Definitions are tried in order and the first match wins, so more
//! specific phrasings come before the general ones they overlap with.

use crate::assertor::Comparator;
use crate::clock::Direction;
use crate::error::{StepError, StepResult};
use crate::extractor::{LinkMatch, Source};
use regex::{Captures, Regex};

/// One decoded sentence, ready to run.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    // Request setup
    SetHeader { name: String, value: String },
    ClearHeader { name: String },
    SetBody { fragment: String },
    SetRawBody { json: String },
    ClearBody,

    // Requests
    Request { method: String, endpoint: String },
    FollowRedirect,

    // Extraction
    StoreField { source: Source, node: String, storage: String },
    StoreLink { source: Source, matcher: LinkMatch, storage: String },
    StoreHeader { header: String, storage: String },
    ParseToken { name: String },
    ParseTokenFrom { storage: String, name: String },

    // Response assertions
    Status { code: u16 },
    HeaderEquals { name: String, value: String },
    HeaderExists { name: String },
    FieldEquals { source: Source, node: String, value: String },
    FieldNotEquals { node: String, value: String },
    FieldCompare { source: Source, node: String, comparator: Comparator, number: String },
    FieldBool { source: Source, node: String, value: bool },
    FieldText { node: String, text: String },
    FieldExists { node: String },
    FieldNotExists { node: String },
    FieldMatches { node: String, pattern: String },
    List { node: Option<String>, item_context: String, counts: Option<(usize, usize)> },
    Reference { source: Source, node: String, subject: String, id: String },
    FilterBool { property: String, value: bool },
    FilterContains { property: String, text: String },
    JwtExists { claim: String },
    JwtEquals { claim: String, value: String },
    JwtBool { claim: String, value: bool },
    JwtOffset { claim: String, num: u32, unit: String, direction: Direction },
    PrintResponse,

    // Clock
    Advance { days: u32, direction: String },
    Weekday { name: String },
    BackToPresent,
    FieldDaysFromNow { node: String, num: u32, direction: String },
    FieldIsNow { node: String },
    HeaderIsNow { name: String },
}

type Decoder = fn(&Captures<'_>, Option<&str>) -> StepResult<Step>;

/// A sentence pattern and how to decode its captures.
pub struct StepDefinition {
    pub pattern: Regex,
    decode: Decoder,
}

impl std::fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDefinition")
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

/// Ordered catalogue of step definitions.
#[derive(Debug)]
pub struct StepRegistry {
    definitions: Vec<StepDefinition>,
}

fn s(caps: &Captures<'_>, idx: usize) -> String {
    caps.get(idx).map(|m| m.as_str().to_string()).unwrap_or_default()
}

fn int<T: std::str::FromStr>(caps: &Captures<'_>, idx: usize) -> StepResult<T> {
    let raw = caps.get(idx).map(|m| m.as_str()).unwrap_or_default();
    raw.parse()
        .map_err(|_| StepError::invalid(format!("not a valid number: {raw}")))
}

fn boolean(caps: &Captures<'_>, idx: usize) -> bool {
    caps.get(idx).is_some_and(|m| m.as_str() == "true")
}

fn doc(doc: Option<&str>) -> StepResult<String> {
    doc.map(str::to_string)
        .ok_or_else(|| StepError::invalid("this step needs a doc string"))
}

fn item(caps: &Captures<'_>, idx: usize) -> StepResult<Source> {
    let num: usize = int(caps, idx)?;
    if num == 0 {
        return Err(StepError::invalid("items are numbered from 1"));
    }
    Ok(Source::Item(num))
}

const METHODS: &str = "(?i:GET|POST|PUT|PATCH|DELETE|HEAD|OPTIONS)";
const ORDINAL: &str = r"([0-9]+)[a-z]+ item";

impl StepRegistry {
    /// The full vocabulary, in matching order.
    pub fn new() -> Self {
        let mut registry = Self {
            definitions: Vec::new(),
        };
        registry.register_request_steps();
        registry.register_extraction_steps();
        registry.register_time_steps();
        registry.register_assertion_steps();
        registry
    }

    /// Append a definition; it is tried after every existing one.
    pub fn define(&mut self, pattern: &str, decode: Decoder) -> &mut Self {
        let pattern = Regex::new(&format!("^{pattern}$"))
            .unwrap_or_else(|e| panic!("invalid step pattern {pattern:?}: {e}"));
        self.definitions.push(StepDefinition { pattern, decode });
        self
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Decode `sentence` (keyword already stripped) with an optional doc
    /// string attached.
    pub fn parse(&self, sentence: &str, doc_string: Option<&str>) -> StepResult<Step> {
        let sentence = sentence.trim();
        for definition in &self.definitions {
            if let Some(caps) = definition.pattern.captures(sentence) {
                return (definition.decode)(&caps, doc_string);
            }
        }
        Err(StepError::UnknownStep(sentence.to_string()))
    }

    fn register_request_steps(&mut self) {
        self.define(r#""([^"]*)" is the (\S+) header"#, |c, _| {
            Ok(Step::SetHeader { value: s(c, 1), name: s(c, 2) })
        })
        .define(r"the (\S+) header is empty", |c, _| {
            Ok(Step::ClearHeader { name: s(c, 1) })
        })
        .define("this is the request body", |_, d| {
            Ok(Step::SetBody { fragment: doc(d)? })
        })
        .define("this JSON is the request body", |_, d| {
            Ok(Step::SetRawBody { json: doc(d)? })
        })
        .define("the request body is empty", |_, _| Ok(Step::ClearBody))
        .define(&format!(r"I ({METHODS}) to (\S+)"), |c, _| {
            Ok(Step::Request { method: s(c, 1).to_ascii_uppercase(), endpoint: s(c, 2) })
        })
        .define(&format!(r"I ({METHODS}) (\S+)"), |c, _| {
            Ok(Step::Request { method: s(c, 1).to_ascii_uppercase(), endpoint: s(c, 2) })
        })
        .define("I follow the redirect", |_, _| Ok(Step::FollowRedirect));
    }

    fn register_extraction_steps(&mut self) {
        self.define(&format!(r#"I store "([^"]+)" of the {ORDINAL} as "([^"]+)""#), |c, _| {
            Ok(Step::StoreField { source: item(c, 2)?, node: s(c, 1), storage: s(c, 3) })
        })
        .define(r#"I store the link to the list "([^"]+)" as "([^"]+)""#, |c, _| {
            Ok(Step::StoreLink {
                source: Source::Body,
                matcher: LinkMatch::List(s(c, 1)),
                storage: s(c, 2),
            })
        })
        .define(
            &format!(r#"I store the link to the list "([^"]+)" of the {ORDINAL} as "([^"]+)""#),
            |c, _| {
                Ok(Step::StoreLink {
                    source: item(c, 2)?,
                    matcher: LinkMatch::List(s(c, 1)),
                    storage: s(c, 3),
                })
            },
        )
        .define(
            &format!(r#"I store the link to "([^"]+)" of the {ORDINAL} as "([^"]+)""#),
            |c, _| {
                Ok(Step::StoreLink {
                    source: item(c, 2)?,
                    matcher: LinkMatch::Relation(s(c, 1)),
                    storage: s(c, 3),
                })
            },
        )
        .define(r#"I store the link to "([^"]+)" of "([^"]+)" as "([^"]+)""#, |c, _| {
            Ok(Step::StoreLink {
                source: Source::Node(s(c, 2)),
                matcher: LinkMatch::Relation(s(c, 1)),
                storage: s(c, 3),
            })
        })
        .define(r#"I store the link to "([^"]+)" as "([^"]+)""#, |c, _| {
            Ok(Step::StoreLink {
                source: Source::Body,
                matcher: LinkMatch::Relation(s(c, 1)),
                storage: s(c, 2),
            })
        })
        .define(r#"I store the link of "([^"]+)" as "([^"]+)""#, |c, _| {
            Ok(Step::StoreLink {
                source: Source::Body,
                matcher: LinkMatch::Subject(s(c, 1)),
                storage: s(c, 2),
            })
        })
        .define(r#"I store the (\S+) header as "([^"]+)""#, |c, _| {
            Ok(Step::StoreHeader { header: s(c, 1), storage: s(c, 2) })
        })
        .define(r#"I store "([^"]+)" as "([^"]+)""#, |c, _| {
            Ok(Step::StoreField { source: Source::Body, node: s(c, 1), storage: s(c, 2) })
        })
        .define(r#"I parse JWT token into "([^"]+)""#, |c, _| {
            Ok(Step::ParseToken { name: s(c, 1) })
        })
        .define(r#"I parse JWT token from "([^"]+)" into "([^"]+)""#, |c, _| {
            Ok(Step::ParseTokenFrom { storage: s(c, 1), name: s(c, 2) })
        });
    }

    fn register_time_steps(&mut self) {
        self.define(r"we are ([0-9]+) days? in the (\S+)", |c, _| {
            Ok(Step::Advance { days: int(c, 1)?, direction: s(c, 2) })
        })
        .define("we are back to the present", |_, _| Ok(Step::BackToPresent))
        .define(r"it is ([A-Za-z]+)", |c, _| Ok(Step::Weekday { name: s(c, 1) }))
        .define(r#""([^"]+)" should be ([0-9]+) days? in the (\S+)"#, |c, _| {
            Ok(Step::FieldDaysFromNow { node: s(c, 1), num: int(c, 2)?, direction: s(c, 3) })
        })
        .define(r#""([^"]+)" should be now"#, |c, _| Ok(Step::FieldIsNow { node: s(c, 1) }))
        .define(r"the (\S+) header should be now", |c, _| {
            Ok(Step::HeaderIsNow { name: s(c, 1) })
        });
    }

    fn register_assertion_steps(&mut self) {
        self.define(r"the status code should be ([0-9]+)", |c, _| {
            Ok(Step::Status { code: int(c, 1)? })
        })
        .define(r#"the (\S+) header should equal "([^"]*)""#, |c, _| {
            Ok(Step::HeaderEquals { name: s(c, 1), value: s(c, 2) })
        })
        .define(r"the (\S+) header should exist", |c, _| {
            Ok(Step::HeaderExists { name: s(c, 1) })
        })
        .define(
            &format!(r#""([^"]+)" of the {ORDINAL} should reference the "([^"]+)" with id "([^"]+)""#),
            |c, _| {
                Ok(Step::Reference { source: item(c, 2)?, node: s(c, 1), subject: s(c, 3), id: s(c, 4) })
            },
        )
        .define(r#""([^"]+)" should reference the "([^"]+)" with id "([^"]+)""#, |c, _| {
            Ok(Step::Reference { source: Source::Body, node: s(c, 1), subject: s(c, 2), id: s(c, 3) })
        })
        .define(&format!(r#""([^"]+)" of the {ORDINAL} should equal "([^"]*)""#), |c, _| {
            Ok(Step::FieldEquals { source: item(c, 2)?, node: s(c, 1), value: s(c, 3) })
        })
        .define(&format!(r#""([^"]+)" of the {ORDINAL} should equal (true|false)"#), |c, _| {
            Ok(Step::FieldBool { source: item(c, 2)?, node: s(c, 1), value: boolean(c, 3) })
        })
        .define(&format!(r#""([^"]+)" of the {ORDINAL} should equal ([+0-9,.-]+)"#), |c, _| {
            Ok(Step::FieldCompare {
                source: item(c, 2)?,
                node: s(c, 1),
                comparator: Comparator::Equal,
                number: s(c, 3),
            })
        })
        .define(r#""([^"]+)" should equal "([^"]*)""#, |c, _| {
            Ok(Step::FieldEquals { source: Source::Body, node: s(c, 1), value: s(c, 2) })
        })
        .define(r#""([^"]+)" should not equal "([^"]*)""#, |c, _| {
            Ok(Step::FieldNotEquals { node: s(c, 1), value: s(c, 2) })
        })
        .define(r#""([^"]+)" should equal (true|false)"#, |c, _| {
            Ok(Step::FieldBool { source: Source::Body, node: s(c, 1), value: boolean(c, 2) })
        })
        .define(r#""([^"]+)" should equal ([+0-9,.-]+)"#, |c, _| {
            Ok(Step::FieldCompare {
                source: Source::Body,
                node: s(c, 1),
                comparator: Comparator::Equal,
                number: s(c, 2),
            })
        })
        .define(r#""([^"]+)" should equal"#, |c, d| {
            Ok(Step::FieldText { node: s(c, 1), text: doc(d)? })
        })
        .define(
            r#""([^"]+)" should be a list of "([^"]+)" with ([0-9]+) of ([0-9]+) items?"#,
            |c, _| {
                Ok(Step::List {
                    node: Some(s(c, 1)),
                    item_context: s(c, 2),
                    counts: Some((int(c, 3)?, int(c, 4)?)),
                })
            },
        )
        .define(r#""([^"]+)" should be a list of "([^"]+)""#, |c, _| {
            Ok(Step::List { node: Some(s(c, 1)), item_context: s(c, 2), counts: None })
        })
        .define(r#""([^"]+)" should be ([A-Za-z]+) ([+0-9,.-]+)"#, |c, _| {
            Ok(Step::FieldCompare {
                source: Source::Body,
                node: s(c, 1),
                comparator: s(c, 2).parse()?,
                number: s(c, 3),
            })
        })
        .define(r#""([^"]+)" should exist"#, |c, _| Ok(Step::FieldExists { node: s(c, 1) }))
        .define(r#""([^"]+)" should not exist"#, |c, _| {
            Ok(Step::FieldNotExists { node: s(c, 1) })
        })
        .define(r#""([^"]+)" should match (.+)"#, |c, _| {
            Ok(Step::FieldMatches { node: s(c, 1), pattern: s(c, 2) })
        })
        .define(r#"a list of "([^"]+)" with ([0-9]+) of ([0-9]+) items? should be returned"#, |c, _| {
            Ok(Step::List { node: None, item_context: s(c, 1), counts: Some((int(c, 2)?, int(c, 3)?)) })
        })
        .define(r#"a list of "([^"]+)" should be returned"#, |c, _| {
            Ok(Step::List { node: None, item_context: s(c, 1), counts: None })
        })
        .define(r"I filter the list by (\S+) equals (true|false)", |c, _| {
            Ok(Step::FilterBool { property: s(c, 1), value: boolean(c, 2) })
        })
        .define(r#"I filter the list by (\S+) contains "([^"]+)""#, |c, _| {
            Ok(Step::FilterContains { property: s(c, 1), text: s(c, 2) })
        })
        .define(r"JWT (\S+) should exist", |c, _| Ok(Step::JwtExists { claim: s(c, 1) }))
        .define(r#"JWT (\S+) should equal "([^"]*)""#, |c, _| {
            Ok(Step::JwtEquals { claim: s(c, 1), value: s(c, 2) })
        })
        .define(r"JWT (\S+) should equal (true|false)", |c, _| {
            Ok(Step::JwtBool { claim: s(c, 1), value: boolean(c, 2) })
        })
        .define(r"JWT (\S+) should be ([0-9]+) ([a-z]+) in the (future|past)", |c, _| {
            Ok(Step::JwtOffset {
                claim: s(c, 1),
                num: int(c, 2)?,
                unit: s(c, 3),
                direction: s(c, 4).parse()?,
            })
        })
        .define("I print the response", |_, _| Ok(Step::PrintResponse));
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(sentence: &str) -> Step {
        StepRegistry::new()
            .parse(sentence, None)
            .unwrap_or_else(|e| panic!("{sentence:?}: {e}"))
    }

    #[test]
    fn test_request_steps() {
        assert_eq!(
            parse(r#""Bearer {token}" is the Authorization header"#),
            Step::SetHeader { name: "Authorization".into(), value: "Bearer {token}".into() }
        );
        assert_eq!(
            parse("I POST to /user/{id}/password"),
            Step::Request { method: "POST".into(), endpoint: "/user/{id}/password".into() }
        );
        assert_eq!(
            parse("I GET {userHref}"),
            Step::Request { method: "GET".into(), endpoint: "{userHref}".into() }
        );
        assert_eq!(parse("I follow the redirect"), Step::FollowRedirect);
    }

    #[test]
    fn test_method_is_case_insensitive() {
        assert_eq!(
            parse("I get /x"),
            Step::Request { method: "GET".into(), endpoint: "/x".into() }
        );
        assert_eq!(
            parse("I Post to /register"),
            Step::Request { method: "POST".into(), endpoint: "/register".into() }
        );
        assert!(matches!(parse("I store \"a\" as \"b\""), Step::StoreField { .. }));
    }

    #[test]
    fn test_body_steps_need_doc_string() {
        let registry = StepRegistry::new();
        assert!(registry.parse("this is the request body", None).is_err());
        assert_eq!(
            registry
                .parse("this is the request body", Some(r#""a": 1"#))
                .unwrap(),
            Step::SetBody { fragment: r#""a": 1"#.into() }
        );
    }

    #[test]
    fn test_link_steps_pick_right_source() {
        assert_eq!(
            parse(r#"I store the link to "edit" of the 2nd item as "editHref""#),
            Step::StoreLink {
                source: Source::Item(2),
                matcher: LinkMatch::Relation("edit".into()),
                storage: "editHref".into()
            }
        );
        assert_eq!(
            parse(r#"I store the link to the list "urn:Comment" as "comments""#),
            Step::StoreLink {
                source: Source::Body,
                matcher: LinkMatch::List("urn:Comment".into()),
                storage: "comments".into()
            }
        );
        assert_eq!(
            parse(r#"I store the link to "self" of "owner" as "ownerHref""#),
            Step::StoreLink {
                source: Source::Node("owner".into()),
                matcher: LinkMatch::Relation("self".into()),
                storage: "ownerHref".into()
            }
        );
        assert_eq!(
            parse(r#"I store "$id" of the 1st item as "firstId""#),
            Step::StoreField { source: Source::Item(1), node: "$id".into(), storage: "firstId".into() }
        );
    }

    #[test]
    fn test_equality_variants_do_not_collide() {
        assert_eq!(
            parse(r#""name" should equal "Alice""#),
            Step::FieldEquals { source: Source::Body, node: "name".into(), value: "Alice".into() }
        );
        assert_eq!(
            parse(r#""active" should equal true"#),
            Step::FieldBool { source: Source::Body, node: "active".into(), value: true }
        );
        assert_eq!(
            parse(r#""age" should equal -3.5"#),
            Step::FieldCompare {
                source: Source::Body,
                node: "age".into(),
                comparator: Comparator::Equal,
                number: "-3.5".into()
            }
        );
        assert_eq!(
            parse(r#""age" should be above 17"#),
            Step::FieldCompare {
                source: Source::Body,
                node: "age".into(),
                comparator: Comparator::Above,
                number: "17".into()
            }
        );
        assert_eq!(
            parse(r#""n" of the 3rd item should equal 2"#),
            Step::FieldCompare {
                source: Source::Item(3),
                node: "n".into(),
                comparator: Comparator::Equal,
                number: "2".into()
            }
        );
    }

    #[test]
    fn test_time_steps_win_over_comparisons() {
        assert_eq!(
            parse(r#""expires" should be 7 days in the future"#),
            Step::FieldDaysFromNow { node: "expires".into(), num: 7, direction: "future".into() }
        );
        assert_eq!(parse(r#""createdAt" should be now"#), Step::FieldIsNow { node: "createdAt".into() });
        assert_eq!(parse("the Date header should be now"), Step::HeaderIsNow { name: "Date".into() });
        assert_eq!(
            parse("we are 3 days in the past"),
            Step::Advance { days: 3, direction: "past".into() }
        );
        assert_eq!(parse("it is Monday"), Step::Weekday { name: "Monday".into() });
    }

    #[test]
    fn test_list_and_jwt_steps() {
        assert_eq!(
            parse(r#"a list of "Item" with 2 of 10 items should be returned"#),
            Step::List { node: None, item_context: "Item".into(), counts: Some((2, 10)) }
        );
        assert_eq!(
            parse(r#""comments" should be a list of "Comment" with 1 of 1 item"#),
            Step::List { node: Some("comments".into()), item_context: "Comment".into(), counts: Some((1, 1)) }
        );
        assert_eq!(
            parse("JWT exp should be 7 days in the future"),
            Step::JwtOffset { claim: "exp".into(), num: 7, unit: "days".into(), direction: Direction::Future }
        );
        assert_eq!(
            parse(r#"JWT sub should equal "{me}""#),
            Step::JwtEquals { claim: "sub".into(), value: "{me}".into() }
        );
    }

    #[test]
    fn test_unknown_sentence() {
        let err = StepRegistry::new().parse("I dance", None).unwrap_err();
        assert!(matches!(err, StepError::UnknownStep(_)));
    }

    #[test]
    fn test_bad_comparator_is_invalid_input() {
        let err = StepRegistry::new()
            .parse(r#""age" should be around 3"#, None)
            .unwrap_err();
        assert!(matches!(err, StepError::InvalidInput(_)));
    }

    #[test]
    fn test_zeroth_item_rejected() {
        let err = StepRegistry::new()
            .parse(r#"I store "x" of the 0th item as "y""#, None)
            .unwrap_err();
        assert!(matches!(err, StepError::InvalidInput(_)));
    }
}
