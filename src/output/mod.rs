//! Console output

use crate::pipeline::stage::{StageResult, StageState};
use crate::pipeline::RunSummary;
use colored::*;

pub fn print_banner() {
    println!("{}", " ____  _____ ___ __  __  ___  ____  ".truecolor(231, 76, 60).bold());
    println!("{}", "|  _ \\| ____|_ _|  \\/  |/ _ \\/ ___| ".truecolor(231, 76, 60).bold());
    println!("{}", "| | | |  _|  | || |\\/| | | | \\___ \\ ".truecolor(231, 76, 60).bold());
    println!("{}", "| |_| | |___ | || |  | | |_| |___) |".truecolor(231, 76, 60).bold());
    println!("{}", "|____/|_____|___|_|  |_|\\___/|____/ ".truecolor(231, 76, 60).bold());
    println!();
    println!("{}", "Deimos - the recon pipeline that knows when to stop.".truecolor(255, 215, 0).bold());
    println!();
    println!("{}", "------------------------------------------------------".bright_blue());
    println!("{}", ": scan only what you are authorized to scan            :".bright_blue());
    println!("{}", "------------------------------------------------------".bright_blue());
    println!();
}

fn colored_state(state: StageState) -> ColoredString {
    let label = format!("{:<9}", state.as_str().to_uppercase());
    match state {
        StageState::Completed => label.green().bold(),
        StageState::Skipped => label.yellow().bold(),
        StageState::Failed => label.red().bold(),
        StageState::Pending | StageState::Running => label.normal(),
    }
}

/// One console line for a finished stage
pub fn format_stage_line(result: &StageResult) -> String {
    let detail = match &result.reason {
        Some(reason) => reason.to_string(),
        None => result.facts.summary(),
    };
    format!(
        "[{}/6] {:<18} {} {:>7.1}s  {}",
        result.index,
        result.stage.as_str(),
        colored_state(result.state),
        result.duration_ms as f64 / 1000.0,
        detail
    )
}

pub fn print_stage_result(result: &StageResult) {
    println!("{}", format_stage_line(result));
}

/// End-of-run report
pub fn format_summary(summary: &RunSummary) -> String {
    let stages = &summary.stages;
    let mut out = String::new();

    out.push('\n');
    out.push_str(&format!("{}\n", "Run summary".bold().underline()));
    out.push_str(&format!("  Target     : {}\n", summary.target));
    out.push_str(&format!("  Run dir    : {}\n", summary.run_dir.display()));
    out.push_str(&format!(
        "  Stages     : {} completed, {} skipped, {} failed\n",
        stages.count(StageState::Completed).to_string().green(),
        stages.count(StageState::Skipped).to_string().yellow(),
        stages.count(StageState::Failed).to_string().red()
    ));

    let ports = stages.open_ports();
    if !ports.is_empty() {
        let list: Vec<String> = ports.iter().map(u16::to_string).collect();
        out.push_str(&format!("  Open ports : {}\n", list.join(", ")));
    }
    for service in stages.services() {
        let version = [service.product.as_deref(), service.version.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(&format!(
            "    {}/{} {} {}\n",
            service.port, service.protocol, service.name, version
        ));
    }
    if !stages.subdomains().is_empty() {
        out.push_str(&format!("  Subdomains : {}\n", stages.subdomains().len()));
    }

    out.push_str(&format!(
        "  Templates  : {} (not executed)\n",
        summary.templates.len()
    ));
    if summary.interrupted {
        out.push_str(&format!("  {}\n", "Run interrupted, results are partial".yellow().bold()));
    }
    out
}

pub fn print_summary(summary: &RunSummary) {
    println!("{}", format_summary(summary));
}
