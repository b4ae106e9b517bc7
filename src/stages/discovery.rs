//! Passive subdomain discovery via certificate transparency

use super::{Stage, StageContext, StageOutput};
use crate::parsers::crtsh;
use crate::pipeline::facts::StageFacts;
use crate::pipeline::stage::StageKind;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::lookup_host;

/// Upper bound on a single DNS lookup
const DNS_TIMEOUT: Duration = Duration::from_secs(10);

/// Decides whether a candidate name is live
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolves(&self, name: &str) -> bool;
}

/// Resolver backed by the system's DNS configuration
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolves(&self, name: &str) -> bool {
        match lookup_host(format!("{}:0", name)).await {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(e) => {
                debug!("{} does not resolve: {}", name, e);
                false
            }
        }
    }
}

pub struct PassiveDiscovery {
    resolver: Arc<dyn HostResolver>,
}

impl PassiveDiscovery {
    pub fn new() -> Self {
        Self::with_resolver(Arc::new(SystemResolver))
    }

    pub fn with_resolver(resolver: Arc<dyn HostResolver>) -> Self {
        Self { resolver }
    }
}

impl Default for PassiveDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for PassiveDiscovery {
    fn kind(&self) -> StageKind {
        StageKind::PassiveDiscovery
    }

    fn tools(&self) -> &'static [&'static str] {
        &["curl"]
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageOutput {
        if ctx.target.is_ip() {
            ctx.note("target is an IP address, certificate transparency lookup not applicable");
            return StageOutput::new(StageFacts::Subdomains(Vec::new()), Vec::new());
        }

        let host = &ctx.target.host;
        let invocation = ctx
            .invocation("curl")
            .args(["-s", "--max-time"])
            .arg(ctx.config.timeout.to_string())
            .arg(format!("https://crt.sh/?q=%25.{}&output=json", host));
        let outcome = ctx.run(&invocation).await;

        let candidates = match crtsh::parse(&outcome.stdout, host) {
            Ok(names) => names,
            Err(e) => {
                warn!("{}", e);
                Vec::new()
            }
        };
        debug!("{} candidate name(s) from certificate transparency", candidates.len());

        let live = resolve_live(self.resolver.as_ref(), candidates, ctx).await;
        info!("{} live subdomain(s) for {}", live.len(), host);

        if !live.is_empty() {
            ctx.note(&format!("live subdomains:\n{}", live.join("\n")));
        }

        StageOutput::new(StageFacts::Subdomains(live), vec![outcome])
    }
}

/// Keep the names that resolve, at most `jobs` lookups in flight
async fn resolve_live(
    resolver: &dyn HostResolver,
    names: Vec<String>,
    ctx: &StageContext<'_>,
) -> Vec<String> {
    let cancel = ctx.runner.cancel_token().clone();
    let lookup_timeout = DNS_TIMEOUT.min(ctx.config.timeout_duration());

    let mut live: Vec<String> = stream::iter(names)
        .map(|name| {
            let cancel = cancel.clone();
            async move {
                let lookup = tokio::time::timeout(lookup_timeout, resolver.resolves(&name));
                let resolved = tokio::select! {
                    result = lookup => result.unwrap_or(false),
                    _ = cancel.cancelled() => false,
                };
                resolved.then_some(name)
            }
        })
        .buffer_unordered(ctx.config.jobs.max(1))
        .filter_map(|name| async move { name })
        .collect()
        .await;

    live.sort();
    live
}
