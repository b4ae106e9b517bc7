//! Template-based vulnerability scan with nuclei

use super::{Stage, StageContext, StageOutput};
use crate::parsers::nuclei;
use crate::pipeline::facts::StageFacts;
use crate::pipeline::stage::StageKind;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::info;

pub struct VulnScan;

impl VulnScan {
    /// Live subdomains when discovery found any, the target itself otherwise
    fn scan_targets(ctx: &StageContext<'_>) -> Vec<String> {
        let subdomains = ctx.results.subdomains();
        if subdomains.is_empty() {
            let target = ctx.target;
            let fallback = if target.port.is_some() {
                target.base_url.clone()
            } else {
                target.host.clone()
            };
            vec![fallback]
        } else {
            subdomains.to_vec()
        }
    }
}

#[async_trait]
impl Stage for VulnScan {
    fn kind(&self) -> StageKind {
        StageKind::VulnScan
    }

    fn tools(&self) -> &'static [&'static str] {
        &["nuclei"]
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageOutput {
        let targets = Self::scan_targets(ctx);
        info!("Running nuclei against {} target(s)", targets.len());

        let outcomes: Vec<_> = stream::iter(targets)
            .map(|target| async move {
                let invocation = ctx
                    .invocation("nuclei")
                    .arg("-u")
                    .arg(target)
                    .arg("-severity")
                    .arg(&ctx.config.severity)
                    .args(["-silent", "-jsonl"]);
                ctx.run(&invocation).await
            })
            .buffer_unordered(ctx.config.jobs.max(1))
            .collect()
            .await;

        let findings = outcomes
            .iter()
            .flat_map(|outcome| nuclei::parse(&outcome.stdout))
            .collect();

        StageOutput::new(StageFacts::Findings(findings), outcomes)
    }
}
