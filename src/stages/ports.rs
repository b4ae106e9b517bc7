//! Port scan and service/version detection, both driven by nmap

use super::{Stage, StageContext, StageOutput};
use crate::parsers::nmap;
use crate::pipeline::facts::StageFacts;
use crate::pipeline::stage::{RunResults, StageKind};
use crate::target::TargetKind;
use async_trait::async_trait;
use log::info;

pub struct PortScan;

#[async_trait]
impl Stage for PortScan {
    fn kind(&self) -> StageKind {
        StageKind::PortScan
    }

    fn tools(&self) -> &'static [&'static str] {
        &["nmap"]
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageOutput {
        let mut invocation = ctx
            .invocation("nmap")
            .args(["-Pn", "-T4", "--top-ports"])
            .arg(ctx.config.top_ports.to_string())
            .args(["--open", "-oX", "-"]);
        if ctx.target.kind == TargetKind::Ipv6 {
            invocation = invocation.arg("-6");
        }
        let invocation = invocation.arg(&ctx.target.host);

        let outcome = ctx.run(&invocation).await;
        let ports = nmap::open_ports(&nmap::parse(&outcome.stdout));
        info!("{} open port(s) on {}", ports.len(), ctx.target.host);

        StageOutput::new(StageFacts::OpenPorts(ports), vec![outcome])
    }
}

pub struct ServiceDetection;

#[async_trait]
impl Stage for ServiceDetection {
    fn kind(&self) -> StageKind {
        StageKind::ServiceDetection
    }

    fn tools(&self) -> &'static [&'static str] {
        &["nmap"]
    }

    fn check_dependencies(&self, results: &RunResults) -> Option<String> {
        results
            .open_ports()
            .is_empty()
            .then(|| "no open ports from port_scan".to_string())
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageOutput {
        let ports: Vec<String> = ctx.results.open_ports().iter().map(u16::to_string).collect();

        let mut invocation = ctx
            .invocation("nmap")
            .args(["-Pn", "-sV", "-p"])
            .arg(ports.join(","))
            .args(["-oX", "-"]);
        if ctx.target.kind == TargetKind::Ipv6 {
            invocation = invocation.arg("-6");
        }
        let invocation = invocation.arg(&ctx.target.host);

        let outcome = ctx.run(&invocation).await;
        let services = nmap::services(&nmap::parse(&outcome.stdout));

        StageOutput::new(StageFacts::Services(services), vec![outcome])
    }
}
