use serde::Deserialize;

use crate::sim::config::Config;
use crate::sim::event::Tick;

/// Address pattern the generator walks.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrafficPattern {
    /// Consecutive bursts from `base`.
    #[default]
    Sequential,
    /// Fixed stride between requests; exercises bank and row behavior.
    Strided,
    /// Uniform random addresses inside the span.
    Random,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficConfig {
    pub enabled: bool,
    pub num_reqs: u32,
    /// Ticks between successive submit attempts.
    pub issue_interval: Tick,
    /// Fraction of requests that are reads, in [0, 1].
    pub read_fraction: f64,
    pub req_bytes: u32,
    pub pattern: TrafficPattern,
    pub stride: u64,
    pub base: u64,
    /// Addresses stay inside [base, base + span_bytes).
    pub span_bytes: u64,
    pub seed: u64,
}

impl Config for TrafficConfig {}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            num_reqs: 4096,
            issue_interval: 8,
            read_fraction: 0.5,
            req_bytes: 64,
            pattern: TrafficPattern::Sequential,
            stride: 256,
            base: 0,
            span_bytes: 1 << 24,
            seed: 1,
        }
    }
}
