//! Forwarding service.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::config::AppConfig;
use crate::http::error::HandlerError;
use crate::http::message::Message;
use crate::http::response;
use crate::observability::metrics;
use crate::proxy::upstream::Upstream;
use crate::routing::{RequestContext, Service};

pub const X_FORWARDED_FOR: &str = "X-Forwarded-For";

/// Relays every request to one upstream.
pub struct ReverseProxy {
    upstream: Arc<Upstream>,
    host_rewrite: Option<String>,
}

impl ReverseProxy {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            upstream: Arc::new(Upstream::new(config.proxy.upstream.clone(), config)),
            host_rewrite: config.proxy.host_rewrite.clone(),
        }
    }

    pub fn upstream(&self) -> &Arc<Upstream> {
        &self.upstream
    }

    /// Rewrite the client request into the request sent upstream.
    fn prepare(&self, req: &mut Message, ctx: &RequestContext) {
        response::strip_hop_by_hop(req);

        if let Some(host) = &self.host_rewrite {
            req.headers.insert("Host", host.as_str());
        }

        let client_ip = ctx.peer_addr.ip().to_string();
        let forwarded = match req.headers.get(X_FORWARDED_FOR) {
            Some(prev) => format!("{}, {}", prev, client_ip),
            None => client_ip,
        };
        req.headers.insert(X_FORWARDED_FOR, forwarded);

        if !req.body.is_empty() {
            let body = std::mem::take(&mut req.body);
            req.set_body(body);
        }
    }

    async fn forward(&self, mut req: Message, ctx: RequestContext) -> Result<Message, HandlerError> {
        self.prepare(&mut req, &ctx);

        match self.upstream.exchange(&req).await {
            Ok(mut resp) => {
                response::strip_hop_by_hop(&mut resp);
                tracing::debug!(
                    request_id = %ctx.request_id,
                    upstream = %self.upstream.addr(),
                    status = resp.status().unwrap_or(0),
                    "Upstream responded"
                );
                Ok(resp)
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    upstream = %self.upstream.addr(),
                    error = %e,
                    "Upstream exchange failed"
                );
                metrics::record_upstream_error(e.kind());
                Ok(response::error(e.status(), &e.to_string()))
            }
        }
    }
}

impl Service for ReverseProxy {
    fn call(&self, req: Message, ctx: RequestContext) -> BoxFuture<'_, Result<Message, HandlerError>> {
        self.forward(req, ctx).boxed()
    }
}
