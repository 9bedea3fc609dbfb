/*
Hybrid DRAM/NVM memory-controller timing core.

The controller accepts requests from a transport layer, splits them into
burst-sized packets, and arbitrates them across two memory tiers: DRAM used
as a set-indexed cache in front of NVM. All timing decisions run inside two
recurring events (next-request and respond) driven by a deterministic event
queue, so a given request sequence always produces the same schedule.

Module layout mirrors the phases a packet moves through:
  admit:   capacity checks, burst decomposition, forwarding and merging
  arbiter: READ/WRITE bus state machine, per-queue candidate selection
  respond: ready-time ordered completion, tag re-check, miss handling
*/

mod admit;
mod arbiter;
mod respond;

#[cfg(test)]
mod tests;

use std::collections::{BinaryHeap, HashMap, HashSet};

use anyhow::{ensure, Result};
use log::debug;

use crate::mem::cmdbus::CommandBus;
use crate::mem::media::MemoryMedia;
use crate::mem::request::{
    BurstTable, MemPacket, ReqId, RespEntry, Request, Response, ResponsePort,
};
use crate::mem::backing::SparseMem;
use crate::mem::stats::CtrlStats;
use crate::mem::tags::TagStore;
use crate::sim::config::CtrlConfig;
use crate::sim::event::{Event, EventQueue, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Running,
    Draining,
    Drained,
}

/// Which controller queue a packet was selected from; drives retry-flag
/// bookkeeping after an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueKind {
    Read,
    Write,
    NvmRead,
    NvmWrite,
    DramFill,
}

#[derive(Debug)]
pub(crate) struct PendingReq {
    pub req: Request,
    pub submitted_at: Tick,
}

pub struct MemCtrl {
    pub(crate) cfg: CtrlConfig,
    pub(crate) dram: Box<dyn MemoryMedia>,
    pub(crate) nvm: Box<dyn MemoryMedia>,
    pub(crate) events: EventQueue,

    pub(crate) read_queue: Vec<MemPacket>,
    pub(crate) write_queue: Vec<MemPacket>,
    pub(crate) nvm_read_queue: Vec<MemPacket>,
    pub(crate) nvm_write_queue: Vec<MemPacket>,
    pub(crate) dram_fill_queue: Vec<MemPacket>,
    pub(crate) resp_queue: BinaryHeap<RespEntry>,
    pub(crate) resp_seq: u64,
    /// Burst-aligned addresses with a write resident in the write queue;
    /// consulted for merge and read-after-write forwarding.
    pub(crate) is_in_write_queue: HashSet<u64>,

    // edge-triggered retry obligations, one per backpressure path
    pub(crate) retry_rd: bool,
    pub(crate) retry_wr: bool,
    pub(crate) retry_nvm_rd: bool,
    pub(crate) retry_nvm_wr: bool,
    pub(crate) retry_fill: bool,

    pub(crate) bus_state: BusState,
    pub(crate) bus_state_next: BusState,
    pub(crate) reads_this_time: u32,
    pub(crate) writes_this_time: u32,
    pub(crate) next_burst_at: Tick,
    pub(crate) next_req_time: Tick,
    pub(crate) prev_arrival: Tick,

    pub(crate) cmd_bus: CommandBus,
    pub(crate) tags: TagStore,
    pub(crate) bursts: BurstTable,
    pub(crate) requests: HashMap<ReqId, PendingReq>,
    pub(crate) next_req_id: ReqId,
    pub(crate) backing: SparseMem,
    pub(crate) drain_state: DrainState,
    pub(crate) stats: CtrlStats,
}

impl MemCtrl {
    pub fn new(
        cfg: CtrlConfig,
        dram: Box<dyn MemoryMedia>,
        nvm: Box<dyn MemoryMedia>,
    ) -> Result<Self> {
        ensure!(
            cfg.write_low_thresh_pct < cfg.write_high_thresh_pct,
            "write buffer low threshold {} must be smaller than the high threshold {}",
            cfg.write_low_thresh_pct,
            cfg.write_high_thresh_pct
        );
        ensure!(
            dram.bytes_per_burst() == nvm.bytes_per_burst(),
            "tiers must agree on burst size ({} vs {})",
            dram.bytes_per_burst(),
            nvm.bytes_per_burst()
        );
        ensure!(
            cfg.line_bytes == dram.bytes_per_burst() as u64,
            "cache line size {} must equal the burst size {}",
            cfg.line_bytes,
            dram.bytes_per_burst()
        );
        ensure!(cfg.read_buffer_size > 0 && cfg.write_buffer_size > 0);

        let tags = TagStore::new(cfg.dram_cache_bytes, cfg.line_bytes);
        debug!(
            "setting up controller: {} cache lines, {} B bursts",
            tags.num_entries(),
            dram.bytes_per_burst()
        );

        // wind the bus horizon past the first command's lead time so early
        // timestamps never go negative
        let next_burst_at = dram.command_offset();
        let cmd_bus = CommandBus::new(cfg.command_window, cfg.max_cmds_per_window);

        Ok(Self {
            cfg,
            dram,
            nvm,
            events: EventQueue::new(),
            read_queue: Vec::new(),
            write_queue: Vec::new(),
            nvm_read_queue: Vec::new(),
            nvm_write_queue: Vec::new(),
            dram_fill_queue: Vec::new(),
            resp_queue: BinaryHeap::new(),
            resp_seq: 0,
            is_in_write_queue: HashSet::new(),
            retry_rd: false,
            retry_wr: false,
            retry_nvm_rd: false,
            retry_nvm_wr: false,
            retry_fill: false,
            bus_state: BusState::Read,
            bus_state_next: BusState::Read,
            reads_this_time: 0,
            writes_this_time: 0,
            next_burst_at,
            next_req_time: 0,
            prev_arrival: 0,
            cmd_bus,
            tags,
            bursts: BurstTable::default(),
            requests: HashMap::new(),
            next_req_id: 0,
            backing: SparseMem::new(),
            drain_state: DrainState::Running,
            stats: CtrlStats::default(),
        })
    }

    pub fn stats(&self) -> &CtrlStats {
        &self.stats
    }

    pub fn drain_state(&self) -> DrainState {
        self.drain_state
    }

    /// Accept or reject one external request. A false return obliges the
    /// caller to wait for the matching retry callback. Writes and fully
    /// forwarded reads respond on `port` before this returns.
    pub fn submit(&mut self, req: Request, now: Tick, port: &mut dyn ResponsePort) -> bool {
        assert!(
            self.nvm.addr_range().contains(req.addr)
                && self.nvm.addr_range().contains(req.addr + req.size as u64 - 1),
            "request {:#x}+{} outside the configured address range",
            req.addr,
            req.size
        );
        assert!(req.size > 0, "zero-sized request");

        if self.prev_arrival != 0 {
            self.stats.tot_gap += now - self.prev_arrival;
        }
        self.prev_arrival = now;

        let burst_size = self.dram.bytes_per_burst();
        let offset = (req.addr & (burst_size as u64 - 1)) as u32;
        let pkt_count = (offset + req.size).div_ceil(burst_size);

        if req.is_write() {
            if self.write_queue_full(pkt_count as usize) {
                debug!("write queue full, not accepting addr {:#x}", req.addr);
                self.retry_wr = true;
                self.stats.num_wr_retry += 1;
                return false;
            }
            self.stats.write_reqs += 1;
            self.stats.bytes_written_sys += req.size as u64;
            self.add_to_write_queue(req, pkt_count, now, port);
        } else {
            if self.read_queue_full(pkt_count as usize) {
                debug!("read queue full, not accepting addr {:#x}", req.addr);
                self.retry_rd = true;
                self.stats.num_rd_retry += 1;
                return false;
            }
            self.stats.read_reqs += 1;
            self.stats.bytes_read_sys += req.size as u64;
            self.add_to_read_queue(req, pkt_count, now, port);
        }
        true
    }

    /// Earliest pending controller event, if any.
    pub fn next_event_tick(&self) -> Option<Tick> {
        self.events.next_tick()
    }

    /// Pop and process the next pending event. Returns the tick it ran at.
    pub fn process_next(&mut self, port: &mut dyn ResponsePort) -> Option<Tick> {
        let (tick, event) = self.events.pop_next()?;
        match event {
            Event::Respond => self.process_respond_event(tick, port),
            Event::NextReq => self.process_next_req_event(tick, port),
        }
        Some(tick)
    }

    /// Ask the controller to drain. The write backlog is the only state that
    /// does not empty on its own, so kick the arbiter if that is all that is
    /// left.
    pub fn drain(&mut self, now: Tick) -> DrainState {
        if self.all_queues_empty() && self.resp_queue.is_empty() && self.all_intf_drained(now) {
            self.drain_state = DrainState::Drained;
        } else {
            debug!(
                "draining: write {} read {} resp {}",
                self.total_write_backlog(),
                self.read_queue.len(),
                self.resp_queue.len()
            );
            self.drain_state = DrainState::Draining;
            let _ = self.events.ensure_scheduled(Event::NextReq, now);
        }
        self.drain_state
    }

    /// Tick by which both tiers have quiesced, absent further commands.
    /// Always past `now` so a drain loop makes progress.
    pub fn settle_tick(&self, now: Tick) -> Tick {
        self.dram.quiesce_at().max(self.nvm.quiesce_at()).max(now + 1)
    }

    pub(crate) fn all_intf_drained(&self, now: Tick) -> bool {
        self.dram.all_ranks_drained(now) && self.nvm.all_ranks_drained(now)
    }

    pub(crate) fn all_queues_empty(&self) -> bool {
        self.read_queue.is_empty()
            && self.write_queue.is_empty()
            && self.nvm_read_queue.is_empty()
            && self.nvm_write_queue.is_empty()
            && self.dram_fill_queue.is_empty()
    }

    /// Everything the WRITE bus state is responsible for draining, plus
    /// writes still waiting on their tag check.
    pub(crate) fn total_write_backlog(&self) -> usize {
        self.write_queue.len() + self.nvm_write_queue.len() + self.dram_fill_queue.len()
    }

    // Capacity predicates. Pure: calling them twice without a state change
    // gives the same answer.

    pub(crate) fn read_queue_full(&self, needed: usize) -> bool {
        self.read_queue.len() + self.resp_queue.len() + needed > self.cfg.read_buffer_size
    }

    pub(crate) fn write_queue_full(&self, needed: usize) -> bool {
        self.write_queue.len() + needed > self.cfg.write_buffer_size
    }

    pub(crate) fn nvm_read_queue_full(&self, needed: usize) -> bool {
        self.nvm_read_queue.len() + needed > self.cfg.nvm_read_queue_size
    }

    pub(crate) fn nvm_write_queue_full(&self, needed: usize) -> bool {
        self.nvm_write_queue.len() + needed > self.cfg.nvm_write_queue_size
    }

    pub(crate) fn dram_fill_queue_full(&self, needed: usize) -> bool {
        self.dram_fill_queue.len() + needed > self.cfg.dram_fill_queue_size
    }

    pub(crate) fn burst_align(&self, addr: u64) -> u64 {
        addr & !(self.dram.bytes_per_burst() as u64 - 1)
    }

    pub(crate) fn alloc_req(&mut self, req: Request, now: Tick) -> ReqId {
        let id = self.next_req_id;
        self.next_req_id += 1;
        let prev = self.requests.insert(
            id,
            PendingReq {
                req,
                submitted_at: now,
            },
        );
        assert!(prev.is_none());
        id
    }

    /// Perform the functional access and hand the (possibly split) request
    /// back to the transport layer after the static latency. Consumes the
    /// pending-request entry; at most one response per request.
    pub(crate) fn access_and_respond(
        &mut self,
        req_id: ReqId,
        static_latency: Tick,
        now: Tick,
        port: &mut dyn ResponsePort,
    ) {
        let pending = self
            .requests
            .remove(&req_id)
            .expect("double response for one request");
        let req = pending.req;
        debug!("responding to addr {:#x}", req.addr);

        let data = if req.is_write() {
            self.backing.write(req.addr, &req.data);
            Vec::new()
        } else {
            self.backing.read(req.addr, req.size)
        };

        let at = now + static_latency;
        if req.is_read() {
            self.stats.tot_read_latency += at - pending.submitted_at;
        }
        self.stats.responses += 1;

        if req.needs_response {
            port.respond(
                Response {
                    addr: req.addr,
                    size: req.size,
                    kind: req.kind,
                    requestor: req.requestor,
                    data,
                },
                at,
            );
        }
    }

    pub(crate) fn push_resp(&mut self, pkt: MemPacket, now: Tick) {
        let ready_at = pkt.ready_at;
        assert!(ready_at >= now);
        let seq = self.resp_seq;
        self.resp_seq += 1;
        self.resp_queue.push(RespEntry { ready_at, seq, pkt });
        let _ = self.events.ensure_scheduled(Event::Respond, ready_at);
    }
}
