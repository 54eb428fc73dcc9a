//! Given/When/Then step definitions for testing hypermedia REST APIs.
//!
//! Sentences are decoded by a [`StepRegistry`] into [`Step`] values and
//! run by a [`TestSession`] against a per-scenario [`ScenarioContext`]:
//! requests are built from accumulated headers and bodies, values are
//! extracted from responses (fields, `$links`, JWT claims) into a
//! variable store, and responses are asserted on.

pub mod assertor;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod extractor;
pub mod jwt;
pub mod model;
pub mod path;
pub mod runner;
pub mod session;
pub mod steps;
pub mod template;

pub use clock::{Clock, Direction};
pub use config::*;
pub use error::{StepError, StepResult};
pub use model::*;
pub use runner::{load_scenarios, parse_scenarios, run_scenario, Scenario, Sentence};
pub use session::TestSession;
pub use steps::{Step, StepRegistry};
pub use template::VariableStore;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
