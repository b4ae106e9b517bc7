//! The six pipeline stages
//!
//! A stage knows which tools it drives, whether earlier facts allow it to
//! run, and how to turn tool output into `StageFacts`. Deciding the stage's
//! final state from the tool outcomes is left to the scheduler.

use crate::config::RunConfig;
use crate::pipeline::facts::StageFacts;
use crate::pipeline::stage::{RunResults, StageKind};
use crate::runner::{ToolInvocation, ToolOutcome, ToolRunner};
use crate::store::ResultStore;
use crate::target::TargetDescriptor;
use async_trait::async_trait;
use log::warn;

pub mod discovery;
pub mod ports;
pub mod probe;
pub mod vuln;
pub mod web;

pub use discovery::{HostResolver, PassiveDiscovery, SystemResolver};
pub use ports::{PortScan, ServiceDetection};
pub use probe::HttpTlsProbe;
pub use vuln::VulnScan;
pub use web::WebFingerprint;

/// Everything a stage may read while it executes
pub struct StageContext<'a> {
    pub stage: StageKind,
    pub target: &'a TargetDescriptor,
    pub config: &'a RunConfig,
    pub runner: &'a ToolRunner,
    pub store: &'a ResultStore,
    /// Results of the stages that already finished
    pub results: &'a RunResults,
}

impl StageContext<'_> {
    /// Invocation of `program` with the run's per-tool timeout
    pub fn invocation(&self, program: &str) -> ToolInvocation {
        ToolInvocation::new(program, self.config.timeout_duration())
    }

    /// Run a tool, appending its output to this stage's raw file
    pub async fn run(&self, invocation: &ToolInvocation) -> ToolOutcome {
        self.runner
            .run_captured(invocation, self.store, &self.stage.output_file())
            .await
    }

    /// Free-form line in this stage's raw file
    pub fn note(&self, text: &str) {
        let line = format!("# {}\n\n", text);
        if let Err(e) = self.store.append(&self.stage.output_file(), line.as_bytes()) {
            warn!("Failed to write note for {}: {}", self.stage, e);
        }
    }
}

/// What a stage hands back to the scheduler
#[derive(Debug, Default)]
pub struct StageOutput {
    pub facts: StageFacts,
    pub outcomes: Vec<ToolOutcome>,
}

impl StageOutput {
    pub fn new(facts: StageFacts, outcomes: Vec<ToolOutcome>) -> Self {
        Self { facts, outcomes }
    }
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Executables this stage drives
    fn tools(&self) -> &'static [&'static str];

    /// Reason this stage cannot run given earlier results, if any
    fn check_dependencies(&self, _results: &RunResults) -> Option<String> {
        None
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageOutput;
}

/// The fixed stage list, in execution order
pub fn default_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(PassiveDiscovery::new()),
        Box::new(HttpTlsProbe),
        Box::new(PortScan),
        Box::new(ServiceDetection),
        Box::new(WebFingerprint),
        Box::new(VulnScan),
    ]
}
