//! Seams for the test framework and the coverage tooling, plus the
//! built-in YAML scenario runner.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use crossrun_core_types::{ErrorDescriptor, RelayError, RelayResult, SessionToken};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::tools::{Arg, Context};

/// Per-test notification sent to the reporting path.
#[derive(Clone, Debug, PartialEq)]
pub enum TestEvent {
    Test { name: String },
    Pass { name: String },
    Fail { name: String, error: ErrorDescriptor },
}

pub type EventSink = mpsc::UnboundedSender<TestEvent>;

/// A test framework adapter. `run` settles once every test has completed.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, ctx: Context, events: EventSink) -> RelayResult<()>;
}

#[async_trait]
pub trait CoverageAdapter: Send + Sync {
    /// Returns `code` prepared for collection under `filename`.
    async fn instrument(&self, code: &str, filename: &str) -> RelayResult<String>;
    async fn collect(&self, token: &SessionToken, data: Value) -> RelayResult<()>;
    async fn report(&self) -> RelayResult<()>;
}

#[derive(Debug, Default)]
pub struct NullCoverage;

#[async_trait]
impl CoverageAdapter for NullCoverage {
    async fn instrument(&self, code: &str, _filename: &str) -> RelayResult<String> {
        Ok(code.to_string())
    }

    async fn collect(&self, _token: &SessionToken, _data: Value) -> RelayResult<()> {
        Ok(())
    }

    async fn report(&self) -> RelayResult<()> {
        Ok(())
    }
}

type Counters = BTreeMap<String, BTreeMap<String, u64>>;

/// Keeps every session's `{file: {counter: hits}}` map apart and sums them
/// when asked.
#[derive(Debug, Default)]
pub struct MergingCoverage {
    sessions: DashMap<SessionToken, Counters>,
}

impl MergingCoverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, token: &SessionToken) -> Option<Value> {
        self.sessions.get(token).map(|counters| to_value(&counters))
    }

    pub fn merged(&self) -> Value {
        let mut total = Counters::new();
        for entry in self.sessions.iter() {
            add_counters(&mut total, entry.value());
        }
        to_value(&total)
    }
}

#[async_trait]
impl CoverageAdapter for MergingCoverage {
    async fn instrument(&self, code: &str, _filename: &str) -> RelayResult<String> {
        Ok(code.to_string())
    }

    async fn collect(&self, token: &SessionToken, data: Value) -> RelayResult<()> {
        let incoming = parse_counters(&data)?;
        let mut entry = self.sessions.entry(token.clone()).or_default();
        add_counters(&mut entry, &incoming);
        Ok(())
    }

    async fn report(&self) -> RelayResult<()> {
        let merged = self.merged();
        let files = merged.as_object().map(Map::len).unwrap_or_default();
        info!(files, sessions = self.sessions.len(), coverage = %merged, "coverage report");
        Ok(())
    }
}

fn parse_counters(data: &Value) -> RelayResult<Counters> {
    match data {
        Value::Null => Ok(Counters::new()),
        other => serde_json::from_value(other.clone())
            .map_err(|err| RelayError::Precondition(format!("malformed coverage map: {err}"))),
    }
}

fn add_counters(total: &mut Counters, more: &Counters) {
    for (file, counters) in more {
        let slot = total.entry(file.clone()).or_default();
        for (counter, hits) in counters {
            *slot.entry(counter.clone()).or_default() += hits;
        }
    }
}

fn to_value(counters: &Counters) -> Value {
    serde_json::to_value(counters).unwrap_or(Value::Null)
}

/// The coverage adapter named by `coverageReporter`.
pub fn coverage_adapter(config: &RunConfig) -> RelayResult<Arc<dyn CoverageAdapter>> {
    match config.coverage_reporter.as_deref() {
        None | Some("none") => Ok(Arc::new(NullCoverage)),
        Some("summary") | Some("memory") => Ok(Arc::new(MergingCoverage::new())),
        Some(other) => Err(RelayError::NotFound(format!(
            "unknown coverage reporter {other:?}"
        ))),
    }
}

/// The runner adapter named by `runner`.
pub fn test_runner(config: &RunConfig, root: &Path) -> RelayResult<Arc<dyn TestRunner>> {
    match config.runner.as_str() {
        "scenario" => Ok(Arc::new(ScenarioRunner::discover(
            root,
            &config.include,
            &config.exclude,
            config.bail,
        )?)),
        other => Err(RelayError::NotFound(format!("unknown runner {other:?}"))),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    pub tests: Vec<ScenarioTest>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioTest {
    pub name: String,
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub tool: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Scenario {
    pub fn from_yaml(yaml: &str) -> RelayResult<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|err| RelayError::Precondition(format!("malformed scenario: {err}")))
    }

    pub fn from_file(path: &Path) -> RelayResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            RelayError::NotFound(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_yaml(&content)
    }
}

/// Runs YAML scenarios: each test is a list of tool steps queued through
/// the session's [`Context`] and drained once.
#[derive(Clone, Debug, Default)]
pub struct ScenarioRunner {
    scenarios: Vec<(String, Scenario)>,
    bail: bool,
}

impl ScenarioRunner {
    pub fn new(bail: bool) -> Self {
        Self {
            scenarios: Vec::new(),
            bail,
        }
    }

    pub fn scenario(mut self, label: impl Into<String>, scenario: Scenario) -> Self {
        self.scenarios.push((label.into(), scenario));
        self
    }

    /// Loads every file under `root` matched by `include` and by none of `exclude`.
    pub fn discover(
        root: &Path,
        include: &[String],
        exclude: &[String],
        bail: bool,
    ) -> RelayResult<Self> {
        let mut runner = Self::new(bail);
        for path in select_files(root, include, exclude)? {
            let label = path
                .strip_prefix(root)
                .unwrap_or(path.as_path())
                .display()
                .to_string();
            let scenario = Scenario::from_file(&path)?;
            debug!(file = %label, tests = scenario.tests.len(), "scenario loaded");
            runner.scenarios.push((label, scenario));
        }
        Ok(runner)
    }

    pub fn len(&self) -> usize {
        self.scenarios.iter().map(|(_, s)| s.tests.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TestRunner for ScenarioRunner {
    async fn run(&self, ctx: Context, events: EventSink) -> RelayResult<()> {
        for (label, scenario) in &self.scenarios {
            let prefix = scenario.name.as_deref().unwrap_or(label);
            for test in &scenario.tests {
                let name = format!("{prefix} > {}", test.name);
                let _ = events.send(TestEvent::Test { name: name.clone() });
                for step in &test.steps {
                    let args = step.args.iter().cloned().map(Arg::Value).collect();
                    drop(ctx.tool(&step.tool, args));
                }
                match ctx.now().await {
                    Ok(_) => {
                        let _ = events.send(TestEvent::Pass { name });
                    }
                    Err(err) => {
                        warn!(test = %name, error = %err, "test failed");
                        let _ = events.send(TestEvent::Fail {
                            name,
                            error: err.to_descriptor(),
                        });
                        if self.bail {
                            info!("bailing after first failure");
                            return Ok(());
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Files under `root`, sorted, matched against patterns relative to `root`.
pub fn select_files(
    root: &Path,
    include: &[String],
    exclude: &[String],
) -> RelayResult<Vec<PathBuf>> {
    let include = compile(include)?;
    let exclude = compile(exclude)?;
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            let relative = path.strip_prefix(root).unwrap_or(path.as_path());
            include.iter().any(|p| p.matches_path(relative))
                && !exclude.iter().any(|p| p.matches_path(relative))
        })
        .collect();
    files.sort();
    Ok(files)
}

fn compile(patterns: &[String]) -> RelayResult<Vec<glob::Pattern>> {
    patterns
        .iter()
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| {
            glob::Pattern::new(raw.trim()).map_err(|err| {
                RelayError::InvalidTool(format!("bad glob pattern {raw:?}: {err}"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token(raw: &str) -> SessionToken {
        raw.parse().unwrap()
    }

    #[tokio::test]
    async fn merging_coverage_sums_sessions() {
        let coverage = MergingCoverage::new();
        coverage
            .collect(&token("a1b2"), json!({"app.js": {"s1": 2, "s2": 0}}))
            .await
            .unwrap();
        coverage
            .collect(&token("c3d4"), json!({"app.js": {"s1": 1}, "lib.js": {"f": 4}}))
            .await
            .unwrap();
        coverage.collect(&token("c3d4"), Value::Null).await.unwrap();

        assert_eq!(
            coverage.merged(),
            json!({"app.js": {"s1": 3, "s2": 0}, "lib.js": {"f": 4}})
        );
        assert_eq!(
            coverage.session(&token("a1b2")),
            Some(json!({"app.js": {"s1": 2, "s2": 0}}))
        );
        coverage.report().await.unwrap();
    }

    #[tokio::test]
    async fn malformed_coverage_is_rejected() {
        let err = MergingCoverage::new()
            .collect(&token("a1b2"), json!(["nope"]))
            .await
            .unwrap_err();
        assert_eq!(err.name(), "PreconditionError");
    }

    #[test]
    fn scenarios_parse_from_yaml() {
        let scenario = Scenario::from_yaml(
            r#"
name: login
tests:
  - name: submits
    steps:
      - tool: input.click
        args: [{type: text, value: Submit}]
      - tool: runner.delay
        args: [10]
"#,
        )
        .unwrap();
        assert_eq!(scenario.tests[0].steps.len(), 2);
        assert_eq!(
            scenario.tests[0].steps[0].args,
            vec![json!({"type": "text", "value": "Submit"})]
        );
    }

    #[test]
    fn unknown_adapters_are_not_found() {
        let config = RunConfig {
            coverage_reporter: Some("lcov".into()),
            runner: "mocha".into(),
            ..RunConfig::default()
        };
        assert_eq!(
            coverage_adapter(&config).err().unwrap().name(),
            "NotFoundError"
        );
        assert_eq!(
            test_runner(&config, Path::new(".")).err().unwrap().name(),
            "NotFoundError"
        );
    }

    #[test]
    fn globs_select_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tests/skip")).unwrap();
        for name in ["tests/a.yaml", "tests/b.yaml", "tests/skip/c.yaml", "notes.txt"] {
            std::fs::write(dir.path().join(name), "tests: []").unwrap();
        }
        let files = select_files(
            dir.path(),
            &["tests/**/*.yaml".to_string()],
            &["tests/skip/*".to_string()],
        )
        .unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["tests/a.yaml", "tests/b.yaml"]);

        let runner = ScenarioRunner::discover(
            dir.path(),
            &["tests/*.yaml".to_string()],
            &[],
            false,
        )
        .unwrap();
        assert!(runner.is_empty());
    }
}
