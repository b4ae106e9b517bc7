//! Web technology fingerprinting and directory discovery

use super::{Stage, StageContext, StageOutput};
use crate::parsers::web;
use crate::pipeline::facts::StageFacts;
use crate::pipeline::stage::StageKind;
use async_trait::async_trait;
use log::info;

pub struct WebFingerprint;

#[async_trait]
impl Stage for WebFingerprint {
    fn kind(&self) -> StageKind {
        StageKind::WebFingerprint
    }

    fn tools(&self) -> &'static [&'static str] {
        &["whatweb", "gobuster"]
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageOutput {
        let base_url = &ctx.target.base_url;
        let mut outcomes = Vec::new();

        let whatweb = ctx
            .invocation("whatweb")
            .args(["--color=never", "-a", "1"])
            .arg(base_url);
        let outcome = ctx.run(&whatweb).await;
        let technologies = web::parse_whatweb(&outcome.stdout);
        outcomes.push(outcome);

        let paths = match ctx.config.effective_wordlist() {
            Some(wordlist) => {
                let gobuster = ctx
                    .invocation("gobuster")
                    .args(["dir", "-u"])
                    .arg(base_url)
                    .arg("-w")
                    .arg(wordlist.to_string_lossy())
                    .args(["-q", "-t"])
                    .arg(ctx.config.jobs.to_string())
                    .arg("--no-color");
                let outcome = ctx.run(&gobuster).await;
                let paths = web::parse_gobuster(&outcome.stdout);
                outcomes.push(outcome);
                paths
            }
            None => {
                info!("No wordlist available, skipping directory discovery");
                ctx.note("no wordlist available, gobuster not run");
                Vec::new()
            }
        };

        StageOutput::new(StageFacts::Web { technologies, paths }, outcomes)
    }
}
