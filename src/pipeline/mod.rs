//! Stage Scheduler
//!
//! Runs the fixed stage list one stage at a time. Every stage ends in a
//! terminal state, gets one run log entry, and never stops the stages after
//! it. Only the Result Store failing to write can abort a run once it has
//! started.

pub mod facts;
pub mod stage;

use crate::config::RunConfig;
use crate::error::StageIssue;
use crate::output;
use crate::runner::{RunnerStats, ToolOutcome, ToolRunner};
use crate::stages::{default_stages, Stage, StageContext};
use crate::store::ResultStore;
use crate::target::TargetDescriptor;
use crate::templates;
use crate::Result;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use self::facts::StageFacts;
use self::stage::{RunResults, StageRecord, StageResult, StageState};

/// State owned by one run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub target: TargetDescriptor,
    pub config: RunConfig,
    pub started_at: DateTime<Utc>,
    /// Fired by Ctrl-C or the global deadline
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(target: TargetDescriptor, config: RunConfig, cancel: CancellationToken) -> Self {
        Self {
            target,
            config,
            started_at: Utc::now(),
            cancel,
        }
    }
}

/// Everything known about a finished run, written to `summary.json`
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub target: TargetDescriptor,
    pub config: RunConfig,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub run_dir: PathBuf,
    pub templates: Vec<PathBuf>,
    pub stages: RunResults,
    pub runner: RunnerStats,
    pub interrupted: bool,
}

pub struct Pipeline {
    ctx: RunContext,
    runner: ToolRunner,
    store: Arc<ResultStore>,
    stages: Vec<Box<dyn Stage>>,
    progress: bool,
}

impl Pipeline {
    /// Create the run directory and a runner for `ctx`
    pub fn new(ctx: RunContext) -> Result<Self> {
        let store = ResultStore::create(&ctx.config.output_root, &ctx.target, ctx.started_at)?;

        let mut runner = ToolRunner::new(ctx.config.jobs, ctx.cancel.clone());
        if let Some(path) = &ctx.config.tool_path {
            runner = runner.with_search_path(path);
        }

        Ok(Self {
            ctx,
            runner,
            store: Arc::new(store),
            stages: default_stages(),
            progress: false,
        })
    }

    /// Replace the stage list
    pub fn with_stages(mut self, stages: Vec<Box<dyn Stage>>) -> Self {
        self.stages = stages;
        self
    }

    /// Print one console line per finished stage
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn store(&self) -> Arc<ResultStore> {
        Arc::clone(&self.store)
    }

    pub async fn run(self) -> Result<RunSummary> {
        info!(
            "Starting pipeline for {} in {}",
            self.ctx.target,
            self.store.run_dir().display()
        );

        let mut template_paths = Vec::new();
        for template in templates::render(&self.ctx.target) {
            template_paths.push(self.store.write_new(template.file_name, template.body.as_bytes())?);
        }

        let mut results = RunResults::new();
        for stage in &self.stages {
            let result = self.run_stage(stage.as_ref(), &results).await;
            self.store.record_stage(&result)?;
            if self.progress {
                output::print_stage_result(&result);
            }
            results.push(result);
        }

        let summary = RunSummary {
            target: self.ctx.target.clone(),
            config: self.ctx.config.clone(),
            started_at: self.ctx.started_at,
            finished_at: Utc::now(),
            run_dir: self.store.run_dir().to_path_buf(),
            templates: template_paths,
            interrupted: self.ctx.cancel.is_cancelled(),
            runner: self.runner.stats(),
            stages: results,
        };
        self.store.write_summary(&summary)?;

        info!(
            "Pipeline finished: {} completed, {} skipped, {} failed",
            summary.stages.count(StageState::Completed),
            summary.stages.count(StageState::Skipped),
            summary.stages.count(StageState::Failed)
        );
        Ok(summary)
    }

    async fn run_stage(&self, stage: &dyn Stage, results: &RunResults) -> StageResult {
        let kind = stage.kind();
        let mut record = StageRecord::new(kind);

        if self.ctx.cancel.is_cancelled() {
            return record.finish(StageState::Skipped, Some(StageIssue::Interrupted), StageFacts::None, vec![]);
        }

        if let Some(reason) = stage.check_dependencies(results) {
            info!("{} skipped: {}", kind, reason);
            return record.finish(
                StageState::Skipped,
                Some(StageIssue::DependencyUnmet(reason)),
                StageFacts::None,
                vec![],
            );
        }

        let available: Vec<&str> = stage
            .tools()
            .iter()
            .copied()
            .filter(|tool| self.runner.is_available(tool))
            .collect();
        if available.is_empty() {
            let missing: Vec<String> = stage.tools().iter().map(|t| t.to_string()).collect();
            warn!("{} skipped: {} not installed", kind, missing.join(", "));
            return record.finish(
                StageState::Skipped,
                Some(StageIssue::ToolMissing(missing)),
                StageFacts::None,
                vec![],
            );
        }

        record.transition(StageState::Running);
        info!("Running {} ({})", kind, available.join(", "));

        let ctx = StageContext {
            stage: kind,
            target: &self.ctx.target,
            config: &self.ctx.config,
            runner: &self.runner,
            store: self.store.as_ref(),
            results,
        };
        let output = stage.execute(&ctx).await;

        let file = kind.output_file();
        let outputs = if self.store.exists(&file) {
            vec![self.store.path_for(&file)]
        } else {
            Vec::new()
        };

        let (state, reason) = judge(&output.outcomes);
        record.finish(state, reason, output.facts, outputs)
    }
}

/// Terminal state of a stage that ran, from its tool outcomes
fn judge(outcomes: &[ToolOutcome]) -> (StageState, Option<StageIssue>) {
    let executed: Vec<&ToolOutcome> = outcomes.iter().filter(|o| o.executed()).collect();

    if executed.is_empty() && !outcomes.is_empty() {
        let missing = outcomes.iter().map(|o| o.program.clone()).collect();
        return (StageState::Skipped, Some(StageIssue::ToolMissing(missing)));
    }
    if executed.iter().any(|o| o.interrupted) {
        return (StageState::Skipped, Some(StageIssue::Interrupted));
    }
    if let Some(slow) = executed.iter().find(|o| o.timed_out) {
        return (StageState::Failed, slow.issue());
    }
    if let Some(bad) = executed.iter().find(|o| !o.success()) {
        return (StageState::Failed, bad.issue());
    }
    (StageState::Completed, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(program: &str) -> ToolOutcome {
        ToolOutcome {
            program: program.to_string(),
            exit_code: Some(0),
            ..Default::default()
        }
    }

    #[test]
    fn test_judge_all_ok() {
        assert_eq!(judge(&[outcome("curl"), outcome("openssl")]), (StageState::Completed, None));
        assert_eq!(judge(&[]), (StageState::Completed, None));
    }

    #[test]
    fn test_judge_missing_tool_is_ignored_when_another_ran() {
        let mut missing = outcome("gobuster");
        missing.tool_missing = true;
        missing.exit_code = None;
        assert_eq!(judge(&[outcome("whatweb"), missing.clone()]).0, StageState::Completed);
        assert_eq!(
            judge(&[missing]),
            (StageState::Skipped, Some(StageIssue::ToolMissing(vec!["gobuster".into()])))
        );
    }

    #[test]
    fn test_judge_timeout_wins_over_nonzero() {
        let mut bad = outcome("whatweb");
        bad.exit_code = Some(1);
        let mut slow = outcome("gobuster");
        slow.exit_code = None;
        slow.timed_out = true;

        let (state, reason) = judge(&[bad.clone(), slow]);
        assert_eq!(state, StageState::Failed);
        assert_eq!(reason, Some(StageIssue::ToolTimeout("gobuster".into())));

        let (state, reason) = judge(&[bad]);
        assert_eq!(state, StageState::Failed);
        assert_eq!(reason, Some(StageIssue::ToolNonZeroExit { tool: "whatweb".into(), code: Some(1) }));
    }

    #[test]
    fn test_judge_interrupted() {
        let mut cut = outcome("nmap");
        cut.exit_code = None;
        cut.interrupted = true;
        assert_eq!(judge(&[cut]), (StageState::Skipped, Some(StageIssue::Interrupted)));
    }
}
