/*
Top-level simulation driver: one traffic generator feeding one memory
controller through the submit/retry protocol, with an architectural
reference store cross-checking every read response.
*/

use anyhow::{bail, Result};
use log::{debug, info};

use crate::mem::backing::SparseMem;
use crate::mem::ctrl::{DrainState, MemCtrl};
use crate::mem::request::{Request, Response, ResponsePort};
use crate::mem::stats::CtrlStats;
use crate::sim::config::SimConfig;
use crate::sim::event::Tick;
use crate::traffic::patterns::TrafficGen;

#[derive(Default)]
struct SimPort {
    responses: Vec<(Response, Tick)>,
    read_unblocked: bool,
    write_unblocked: bool,
}

impl ResponsePort for SimPort {
    fn respond(&mut self, resp: Response, at: Tick) {
        self.responses.push((resp, at));
    }

    fn retry_read(&mut self, now: Tick) {
        debug!("read retry at {}", now);
        self.read_unblocked = true;
    }

    fn retry_write(&mut self, now: Tick) {
        debug!("write retry at {}", now);
        self.write_unblocked = true;
    }
}

pub struct Sim {
    cfg: SimConfig,
    ctrl: MemCtrl,
    traffic: TrafficGen,
    port: SimPort,
    /// Architectural reference; written on request acceptance, read when a
    /// response arrives.
    reference: SparseMem,
    /// Rejected request parked until its retry callback.
    stalled: Option<Request>,
    responses_seen: u64,
}

impl Sim {
    pub fn new(cfg: SimConfig, ctrl: MemCtrl, traffic: TrafficGen) -> Self {
        Self {
            cfg,
            ctrl,
            traffic,
            port: SimPort::default(),
            reference: SparseMem::new(),
            stalled: None,
            responses_seen: 0,
        }
    }

    pub fn stats(&self) -> &CtrlStats {
        self.ctrl.stats()
    }

    pub fn run(&mut self) -> Result<()> {
        let mut now: Tick = 0;
        while now < self.cfg.timeout {
            // controller work due at this tick
            while self.ctrl.next_event_tick().is_some_and(|t| t <= now) {
                let _ = self.ctrl.process_next(&mut self.port);
                self.drain_responses()?;
            }

            // resubmit a parked request once its retry fired
            if let Some(req) = self.stalled.take() {
                let unblocked = if req.is_read() {
                    std::mem::take(&mut self.port.read_unblocked)
                } else {
                    std::mem::take(&mut self.port.write_unblocked)
                };
                if unblocked {
                    self.submit(req, now)?;
                } else {
                    self.stalled = Some(req);
                }
            }

            // fresh traffic, paused while a request is parked
            while self.stalled.is_none() {
                let Some(req) = self.traffic.next(now) else {
                    break;
                };
                self.submit(req, now)?;
            }

            // the submissions may have armed events at this very tick
            if self.ctrl.next_event_tick().is_some_and(|t| t <= now) {
                continue;
            }

            let mut next = self.ctrl.next_event_tick().unwrap_or(Tick::MAX);
            if self.stalled.is_none() {
                next = next.min(self.traffic.next_issue_at());
            }
            if next == Tick::MAX {
                if self.traffic.done() && self.stalled.is_none() {
                    break;
                }
                bail!("stuck at tick {} with work outstanding", now);
            }
            now = next;
        }
        if now >= self.cfg.timeout {
            bail!("simulation timed out at tick {}", now);
        }

        now = self.drain(now)?;
        info!(
            "done at tick {}: {} responses, avg read latency {:.1}",
            now,
            self.responses_seen,
            self.ctrl.stats().avg_read_latency()
        );
        Ok(())
    }

    fn submit(&mut self, req: Request, now: Tick) -> Result<()> {
        let saved = req.clone();
        if self.ctrl.submit(req, now, &mut self.port) {
            if saved.is_write() {
                self.reference.write(saved.addr, &saved.data);
            }
            // write acks and forwarded reads respond inside submit
            self.drain_responses()?;
        } else {
            let kind = if saved.is_write() { "write" } else { "read" };
            debug!("{} {:#x} rejected at {}", kind, saved.addr, now);
            self.stalled = Some(saved);
        }
        Ok(())
    }

    fn drain_responses(&mut self) -> Result<()> {
        for (resp, at) in self.port.responses.drain(..) {
            self.responses_seen += 1;
            if self.cfg.check_data && resp.kind.is_read() {
                let expected = self.reference.read(resp.addr, resp.size);
                if resp.data != expected {
                    bail!(
                        "data mismatch at {:#x} (response tick {}): controller returned {:?}..., expected {:?}...",
                        resp.addr,
                        at,
                        &resp.data[..resp.data.len().min(8)],
                        &expected[..expected.len().min(8)]
                    );
                }
            }
        }
        Ok(())
    }

    /// Flush the write backlog and wait for both tiers to quiesce.
    fn drain(&mut self, start: Tick) -> Result<Tick> {
        let mut now = start;
        while now < self.cfg.timeout {
            if self.ctrl.drain(now) == DrainState::Drained {
                return Ok(now);
            }
            while let Some(t) = self.ctrl.next_event_tick() {
                now = t.max(now);
                let _ = self.ctrl.process_next(&mut self.port);
                self.drain_responses()?;
            }
            // no events left; step to where the tier timers have elapsed
            now = self.ctrl.settle_tick(now);
        }
        bail!("drain did not complete before the timeout");
    }
}
