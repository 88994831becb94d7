//! crossrun server library
//!
//! Exposes the pieces the binary wires together so integration tests can
//! drive them in-process.

pub mod config;
pub mod metrics;
pub mod runner;
pub mod server;
pub mod tools;

pub use config::{load_config, ConfigError, RunConfig};
pub use runner::{
    coverage_adapter, test_runner, CoverageAdapter, EventSink, MergingCoverage, NullCoverage,
    Scenario, ScenarioRunner, ScenarioTest, Step, TestEvent, TestRunner,
};
pub use server::{app, exit_code, serve, SuiteDriver, SuiteReport};
pub use tools::{Arg, Context};
