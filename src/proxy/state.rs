//! Proxy state types

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use super::tokens::TokenUsage;
use crate::auth::KeyInfo;
use crate::balancer::LoadBalancer;
use crate::pricing;
use crate::usage::{UsageCollector, UsageRecord};

// ─────────────────────────────────────────────────────────────────────────────
// Proxy State
// ─────────────────────────────────────────────────────────────────────────────

/// Shared state for the forwarding routes
#[derive(Clone)]
pub struct ProxyState {
    /// HTTP client for forwarding requests
    pub(crate) client: reqwest::Client,
    /// Backend registry and picker
    pub(crate) balancer: Arc<LoadBalancer>,
    /// Usage sink (optional, no accounting without it)
    pub(crate) collector: Option<Arc<UsageCollector>>,
}

impl ProxyState {
    pub fn new(
        client: reqwest::Client,
        balancer: Arc<LoadBalancer>,
        collector: Option<Arc<UsageCollector>>,
    ) -> Self {
        Self {
            client,
            balancer,
            collector,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-request accounting
// ─────────────────────────────────────────────────────────────────────────────

/// Which backend served a response and for whom, read by the request log
#[derive(Debug, Clone)]
pub struct ForwardTrace {
    pub backend: String,
    pub account: Option<String>,
}

/// Everything needed to bill a request once its usage is known
pub(crate) struct UsageContext {
    pub collector: Option<Arc<UsageCollector>>,
    pub caller: Option<Arc<KeyInfo>>,
    pub model: String,
    pub backend: String,
    pub status_code: u16,
    pub started: Instant,
}

impl UsageContext {
    /// Price the usage and hand it to the collector. Silently skipped when
    /// there is no caller identity or no collector.
    pub fn finish(self, usage: TokenUsage) {
        let (Some(collector), Some(caller)) = (self.collector, self.caller) else {
            return;
        };

        let cost_usd = pricing::calculate_cost(&self.model, usage.input_tokens, usage.output_tokens);
        tracing::debug!(
            backend = %self.backend,
            model = %self.model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cost_usd,
            "Usage recorded"
        );

        collector.emit(UsageRecord {
            user_id: caller.user_id,
            api_key_id: caller.key_id,
            model: self.model,
            backend: self.backend,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total(),
            cost_usd,
            status_code: self.status_code,
            latency: self.started.elapsed(),
            recorded_at: Utc::now(),
        });
    }
}
