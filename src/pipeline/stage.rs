//! Stage identities, states and per-stage results

use super::facts::{ServiceInfo, StageFacts};
use crate::error::StageIssue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The six pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    PassiveDiscovery,
    HttpTlsProbe,
    PortScan,
    ServiceDetection,
    WebFingerprint,
    VulnScan,
}

impl StageKind {
    /// Fixed execution order
    pub const ALL: [StageKind; 6] = [
        StageKind::PassiveDiscovery,
        StageKind::HttpTlsProbe,
        StageKind::PortScan,
        StageKind::ServiceDetection,
        StageKind::WebFingerprint,
        StageKind::VulnScan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::PassiveDiscovery => "passive_discovery",
            StageKind::HttpTlsProbe => "http_tls_probe",
            StageKind::PortScan => "port_scan",
            StageKind::ServiceDetection => "service_detection",
            StageKind::WebFingerprint => "web_fingerprint",
            StageKind::VulnScan => "vuln_scan",
        }
    }

    /// 1-based position in the pipeline
    pub fn index(&self) -> usize {
        match self {
            StageKind::PassiveDiscovery => 1,
            StageKind::HttpTlsProbe => 2,
            StageKind::PortScan => 3,
            StageKind::ServiceDetection => 4,
            StageKind::WebFingerprint => 5,
            StageKind::VulnScan => 6,
        }
    }

    /// Raw output file name inside the run directory
    pub fn output_file(&self) -> String {
        format!("{:02}_{}.txt", self.index(), self.as_str())
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage lifecycle: `Pending -> Running -> {Completed, Skipped, Failed}`.
/// `Skipped` may also be entered straight from `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Running,
    Completed,
    Skipped,
    Failed,
}

impl StageState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageState::Completed | StageState::Skipped | StageState::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: StageState) -> bool {
        matches!(
            (self, next),
            (StageState::Pending, StageState::Running)
                | (StageState::Pending, StageState::Skipped)
                | (StageState::Running, StageState::Completed)
                | (StageState::Running, StageState::Skipped)
                | (StageState::Running, StageState::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageState::Pending => "pending",
            StageState::Running => "running",
            StageState::Completed => "completed",
            StageState::Skipped => "skipped",
            StageState::Failed => "failed",
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub state: StageState,
    pub at: DateTime<Utc>,
}

/// Outcome of exactly one stage execution. Read-only once finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub index: usize,
    pub stage: StageKind,
    pub state: StageState,
    pub reason: Option<StageIssue>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outputs: Vec<PathBuf>,
    pub facts: StageFacts,
    pub transitions: Vec<Transition>,
}

/// Mutable builder for a `StageResult`, owned by the scheduler while the
/// stage is in flight.
#[derive(Debug)]
pub struct StageRecord {
    stage: StageKind,
    state: StageState,
    started_at: DateTime<Utc>,
    transitions: Vec<Transition>,
}

impl StageRecord {
    pub fn new(stage: StageKind) -> Self {
        let now = Utc::now();
        Self {
            stage,
            state: StageState::Pending,
            started_at: now,
            transitions: vec![Transition { state: StageState::Pending, at: now }],
        }
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    /// Move to `next`. Illegal transitions are ignored and logged, the
    /// record keeps its current state.
    pub fn transition(&mut self, next: StageState) -> bool {
        if !self.state.can_transition_to(next) {
            log::warn!("{}: ignoring illegal transition {} -> {}", self.stage, self.state, next);
            return false;
        }
        log::debug!("{}: {} -> {}", self.stage, self.state, next);
        self.state = next;
        self.transitions.push(Transition { state: next, at: Utc::now() });
        true
    }

    /// Seal the record into an immutable result
    pub fn finish(
        mut self,
        state: StageState,
        reason: Option<StageIssue>,
        facts: StageFacts,
        outputs: Vec<PathBuf>,
    ) -> StageResult {
        self.transition(state);
        let finished_at = Utc::now();
        let duration_ms = (finished_at - self.started_at).num_milliseconds().max(0) as u64;

        StageResult {
            index: self.stage.index(),
            stage: self.stage,
            state: self.state,
            reason,
            started_at: self.started_at,
            finished_at,
            duration_ms,
            outputs,
            facts,
            transitions: self.transitions,
        }
    }
}

/// Append-only collection of finished stage results, in execution order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunResults {
    results: Vec<StageResult>,
}

impl RunResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, result: StageResult) {
        self.results.push(result);
    }

    pub fn get(&self, stage: StageKind) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage == stage)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageResult> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Facts of a stage, only if that stage completed
    fn completed_facts(&self, stage: StageKind) -> Option<&StageFacts> {
        self.get(stage)
            .filter(|r| r.state == StageState::Completed)
            .map(|r| &r.facts)
    }

    /// Live subdomains found by passive discovery
    pub fn subdomains(&self) -> &[String] {
        match self.completed_facts(StageKind::PassiveDiscovery) {
            Some(StageFacts::Subdomains(subs)) => subs,
            _ => &[],
        }
    }

    /// Open ports found by the port scan
    pub fn open_ports(&self) -> &[u16] {
        match self.completed_facts(StageKind::PortScan) {
            Some(StageFacts::OpenPorts(ports)) => ports,
            _ => &[],
        }
    }

    /// Services identified by version detection
    pub fn services(&self) -> &[ServiceInfo] {
        match self.completed_facts(StageKind::ServiceDetection) {
            Some(StageFacts::Services(services)) => services,
            _ => &[],
        }
    }

    pub fn count(&self, state: StageState) -> usize {
        self.results.iter().filter(|r| r.state == state).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_and_files() {
        let names: Vec<&str> = StageKind::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "passive_discovery",
                "http_tls_probe",
                "port_scan",
                "service_detection",
                "web_fingerprint",
                "vuln_scan"
            ]
        );
        assert_eq!(StageKind::PortScan.output_file(), "03_port_scan.txt");
        for (i, stage) in StageKind::ALL.iter().enumerate() {
            assert_eq!(stage.index(), i + 1);
        }
    }

    #[test]
    fn test_transitions() {
        assert!(StageState::Pending.can_transition_to(StageState::Running));
        assert!(StageState::Pending.can_transition_to(StageState::Skipped));
        assert!(!StageState::Pending.can_transition_to(StageState::Completed));
        assert!(!StageState::Completed.can_transition_to(StageState::Running));
        assert!(!StageState::Skipped.can_transition_to(StageState::Running));
    }

    #[test]
    fn test_record_ignores_illegal_transition() {
        let mut record = StageRecord::new(StageKind::WebFingerprint);
        assert!(!record.transition(StageState::Completed));
        assert_eq!(record.state(), StageState::Pending);
        assert!(!record.state().is_terminal());

        assert!(record.transition(StageState::Running));
        assert!(!record.transition(StageState::Pending));
        assert_eq!(record.state(), StageState::Running);

        let result = record.finish(StageState::Completed, None, StageFacts::None, vec![]);
        assert!(result.state.is_terminal());
        assert_eq!(result.transitions.len(), 3);
    }

    #[test]
    fn test_skipped_record_never_runs() {
        let record = StageRecord::new(StageKind::ServiceDetection);
        let result = record.finish(
            StageState::Skipped,
            Some(StageIssue::DependencyUnmet("no open ports".into())),
            StageFacts::None,
            vec![],
        );
        let states: Vec<StageState> = result.transitions.iter().map(|t| t.state).collect();
        assert_eq!(states, vec![StageState::Pending, StageState::Skipped]);
        assert_eq!(result.index, 4);
    }

    #[test]
    fn test_accessors_only_read_completed_stages() {
        let mut results = RunResults::new();

        let mut scan = StageRecord::new(StageKind::PortScan);
        scan.transition(StageState::Running);
        results.push(scan.finish(StageState::Failed, None, StageFacts::OpenPorts(vec![22]), vec![]));
        assert!(results.open_ports().is_empty());

        let mut discovery = StageRecord::new(StageKind::PassiveDiscovery);
        discovery.transition(StageState::Running);
        results.push(discovery.finish(
            StageState::Completed,
            None,
            StageFacts::Subdomains(vec!["www.example.com".into()]),
            vec![],
        ));
        assert_eq!(results.subdomains(), &["www.example.com".to_string()]);
        assert_eq!(results.count(StageState::Failed), 1);
    }
}
