//! HTTP header and TLS certificate probe

use super::{Stage, StageContext, StageOutput};
use crate::parsers::http;
use crate::pipeline::facts::{HttpProbe, StageFacts};
use crate::pipeline::stage::StageKind;
use async_trait::async_trait;
use log::debug;

pub struct HttpTlsProbe;

#[async_trait]
impl Stage for HttpTlsProbe {
    fn kind(&self) -> StageKind {
        StageKind::HttpTlsProbe
    }

    fn tools(&self) -> &'static [&'static str] {
        &["curl", "openssl"]
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> StageOutput {
        let target = ctx.target;
        let mut outcomes = Vec::new();

        let headers = ctx
            .invocation("curl")
            .args(["-sS", "-I", "-L", "--max-time"])
            .arg(ctx.config.timeout.to_string())
            .arg(&target.base_url);
        let curl = ctx.run(&headers).await;
        let (status, headers) = http::parse_headers(&curl.stdout);
        outcomes.push(curl);

        let mut s_client = ctx
            .invocation("openssl")
            .args(["s_client", "-connect"])
            .arg(target.tls_authority())
            .arg("-showcerts");
        if !target.is_ip() {
            s_client = s_client.arg("-servername").arg(&target.host);
        }
        // Empty stdin so s_client exits right after the handshake
        let s_client = s_client.stdin(Vec::<u8>::new());
        let handshake = ctx.run(&s_client).await;
        let pem = http::extract_pem(&handshake.stdout);
        outcomes.push(handshake);

        let mut certificate = None;
        match pem {
            Some(pem) => {
                let x509 = ctx
                    .invocation("openssl")
                    .args(["x509", "-noout", "-subject", "-issuer", "-dates"])
                    .stdin(pem);
                let decoded = ctx.run(&x509).await;
                certificate = http::parse_x509(&decoded.stdout);
                outcomes.push(decoded);
            }
            None => debug!("No certificate presented by {}", target.tls_authority()),
        }

        let probe = HttpProbe {
            status,
            headers,
            certificate,
        };
        StageOutput::new(StageFacts::HttpProbe(probe), outcomes)
    }
}
