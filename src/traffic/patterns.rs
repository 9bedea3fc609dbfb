use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::mem::request::Request;
use crate::sim::event::Tick;
use crate::traffic::config::{TrafficConfig, TrafficPattern};

/// Deterministic request generator. One instance drives one controller; the
/// seed fixes the whole request stream, so two runs with the same config
/// produce identical schedules.
pub struct TrafficGen {
    cfg: TrafficConfig,
    rng: StdRng,
    issued: u32,
    next_issue_at: Tick,
}

impl TrafficGen {
    pub fn new(cfg: TrafficConfig) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        debug!(
            "traffic: {} reqs, pattern {:?}, read fraction {}",
            cfg.num_reqs, cfg.pattern, cfg.read_fraction
        );
        Self {
            cfg,
            rng,
            issued: 0,
            next_issue_at: 0,
        }
    }

    pub fn done(&self) -> bool {
        !self.cfg.enabled || self.issued >= self.cfg.num_reqs
    }

    /// Tick of the next submit attempt; MAX when the stream is exhausted.
    pub fn next_issue_at(&self) -> Tick {
        if self.done() {
            Tick::MAX
        } else {
            self.next_issue_at
        }
    }

    fn addr_of(&mut self, idx: u32) -> u64 {
        let req_bytes = self.cfg.req_bytes as u64;
        let span = self.cfg.span_bytes.max(req_bytes);
        let offset = match self.cfg.pattern {
            TrafficPattern::Sequential => (idx as u64 * req_bytes) % (span - req_bytes + 1),
            TrafficPattern::Strided => (idx as u64 * self.cfg.stride) % (span - req_bytes + 1),
            TrafficPattern::Random => {
                let slots = (span - req_bytes) / req_bytes + 1;
                self.rng.gen_range(0..slots) * req_bytes
            }
        };
        self.cfg.base + offset
    }

    /// Build the request due at `now`. Callers that get rejected hold on to
    /// the request and resubmit after the retry callback; the generator does
    /// not track rejections.
    pub fn next(&mut self, now: Tick) -> Option<Request> {
        if self.done() || now < self.next_issue_at {
            return None;
        }
        let idx = self.issued;
        self.issued += 1;
        self.next_issue_at = now + self.cfg.issue_interval;

        let addr = self.addr_of(idx);
        let is_read = self.rng.gen_bool(self.cfg.read_fraction.clamp(0.0, 1.0));
        Some(if is_read {
            Request::read(addr, self.cfg.req_bytes, 0)
        } else {
            let mut data = vec![0u8; self.cfg.req_bytes as usize];
            self.rng.fill(data.as_mut_slice());
            Request::write(addr, data, 0)
        })
    }
}
