use log::{debug, trace};
use smallvec::SmallVec;

use crate::mem::request::{AccessKind, MemPacket, Request, ResponsePort, READY_UNSET};
use crate::sim::event::{Event, Tick};

use super::MemCtrl;

// Burst decomposition: the first packet keeps the unaligned start address so
// forwarding checks against queued writes stay exact; later packets are
// burst-aligned.
fn burst_slices(addr: u64, size: u32, burst: u32, count: u32) -> SmallVec<[(u64, u32); 4]> {
    let mut out = SmallVec::new();
    let end = addr + size as u64;
    let mut at = addr;
    for _ in 0..count {
        let slice_end = ((at | (burst as u64 - 1)) + 1).min(end);
        out.push((at, (slice_end - at) as u32));
        at = (at | (burst as u64 - 1)) + 1;
    }
    assert!(at >= end);
    out
}

impl MemCtrl {
    /// Is this read burst entirely covered by write data already queued in
    /// the controller? Checks the write queue, DRAM-fill queue and NVM write
    /// queue in that order.
    fn serviced_by_queued_write(&mut self, addr: u64, size: u32) -> bool {
        let covered = |p: &MemPacket| p.addr <= addr && addr + size as u64 <= p.addr + p.size as u64;

        if self.is_in_write_queue.contains(&self.burst_align(addr))
            && self.write_queue.iter().any(covered)
        {
            trace!("read {:#x}+{} serviced by write queue", addr, size);
            self.stats.serviced_by_wr_q += 1;
            self.stats.bytes_read_wr_q += self.dram.bytes_per_burst() as u64;
            return true;
        }
        if self.dram_fill_queue.iter().any(covered) {
            trace!("read {:#x}+{} serviced by fill queue", addr, size);
            self.stats.serviced_by_fill_q += 1;
            return true;
        }
        if self.nvm_write_queue.iter().any(covered) {
            trace!("read {:#x}+{} serviced by nvm write queue", addr, size);
            self.stats.serviced_by_nvm_wr_q += 1;
            return true;
        }
        false
    }

    pub(crate) fn add_to_read_queue(
        &mut self,
        req: Request,
        pkt_count: u32,
        now: Tick,
        port: &mut dyn ResponsePort,
    ) {
        assert!(req.is_read());
        assert!(pkt_count != 0);

        let burst = self.dram.bytes_per_burst();
        let slices = burst_slices(req.addr, req.size, burst, pkt_count);
        let requestor = req.requestor;
        let priority = req.priority;
        let req_id = self.alloc_req(req, now);

        let mut forwarded = 0u32;
        let mut burst_id = None;
        for (addr, size) in slices {
            self.stats.read_bursts += 1;

            if self.serviced_by_queued_write(addr, size) {
                forwarded += 1;
                continue;
            }

            if pkt_count > 1 && burst_id.is_none() {
                debug!("read {:#x} translates to {} bursts", addr, pkt_count);
                burst_id = Some(self.bursts.alloc(pkt_count));
            }

            // every request probes the DRAM tier first; the tag check on the
            // way back decides whether NVM gets involved
            let mut pkt = self
                .dram
                .decode_packet(addr, size, AccessKind::Read, requestor, priority, now);
            self.dram.setup_rank(pkt.rank, true);
            pkt.req = Some(req_id);
            pkt.burst = burst_id;

            assert!(!self.read_queue_full(1));
            trace!("adding {:#x}+{} to read queue", addr, size);
            self.read_queue.push(pkt);
        }

        if forwarded == pkt_count {
            // every burst was covered by queued write data, so nothing was
            // enqueued; answer straight away
            let latency = self.cfg.frontend_latency;
            self.access_and_respond(req_id, latency, now, port);
            return;
        }
        if forwarded > 0 {
            if let Some(id) = burst_id {
                self.bursts.set_serviced(id, forwarded);
            }
        }

        let _ = self.events.ensure_scheduled(Event::NextReq, now);
    }

    pub(crate) fn add_to_write_queue(
        &mut self,
        req: Request,
        pkt_count: u32,
        now: Tick,
        port: &mut dyn ResponsePort,
    ) {
        assert!(req.is_write());
        assert!(pkt_count != 0);

        let burst = self.dram.bytes_per_burst();
        let slices = burst_slices(req.addr, req.size, burst, pkt_count);
        let requestor = req.requestor;
        let priority = req.priority;
        let req_id = self.alloc_req(req, now);

        for (addr, size) in slices {
            self.stats.write_bursts += 1;

            let aligned = self.burst_align(addr);
            if self.is_in_write_queue.contains(&aligned) {
                debug!("merging write burst {:#x} with existing entry", addr);
                self.stats.merged_wr_bursts += 1;
                continue;
            }

            // the write enters as a DRAM read: it must check tag and
            // metadata before it can commit, so it masquerades as a read
            // until the response path sees it
            let mut pkt = self
                .dram
                .decode_packet(addr, size, AccessKind::Read, requestor, priority, now);
            pkt.read_before_write = true;
            self.dram.setup_rank(pkt.rank, true);

            assert!(!self.write_queue_full(1));
            trace!("adding {:#x}+{} to write queue", addr, size);
            self.write_queue.push(pkt);
            let inserted = self.is_in_write_queue.insert(aligned);
            assert!(inserted);
            assert_eq!(self.write_queue.len(), self.is_in_write_queue.len());
        }

        // writes are acknowledged once buffered; the tag check and actual
        // commit proceed in the background
        let latency = self.cfg.frontend_latency;
        self.access_and_respond(req_id, latency, now, port);
        let _ = self.events.ensure_scheduled(Event::NextReq, now);
    }

    // Secondary-queue insertions driven by the response path. Callers have
    // already verified capacity; these only build and enqueue.

    /// Queue a DRAM-cache fill for the line holding `addr` and update the
    /// tag store immediately so in-flight collisions see the new occupant.
    /// Returns true if a dirty victim write-back was synthesized.
    pub(crate) fn add_to_dram_fill_queue(
        &mut self,
        addr: u64,
        dirty: bool,
        waiting_for_nvm_read: bool,
        requestor: u16,
        priority: u8,
        now: Tick,
    ) -> bool {
        assert!(!self.dram_fill_queue_full(1));

        let line = self.tags.line_align(addr);
        let victim = self.tags.install(addr, dirty);

        let mut fill = self.dram.decode_packet(
            line,
            self.cfg.line_bytes as u32,
            AccessKind::Write,
            requestor,
            priority,
            now,
        );
        fill.ready_at = READY_UNSET;
        fill.waiting_for_nvm_read = waiting_for_nvm_read;
        self.dram.setup_rank(fill.rank, false);
        self.dram_fill_queue.push(fill);
        self.stats.dram_fills += 1;
        trace!("fill for line {:#x} (dirty={})", line, dirty);

        let mut wrote_back = false;
        if let Some(victim) = victim {
            if victim.dirty {
                // write-back: the displaced line's data must reach NVM
                self.add_to_nvm_write_queue(victim.addr, self.cfg.line_bytes as u32, requestor, priority, now);
                self.stats.victim_writebacks += 1;
                wrote_back = true;
            }
        }

        let _ = self.events.ensure_scheduled(Event::NextReq, now);
        wrote_back
    }

    /// Queue an NVM read for a missed line. The packet inherits the original
    /// read's ownership so the external response fires when NVM delivers.
    pub(crate) fn add_to_nvm_read_queue(&mut self, from: &MemPacket, now: Tick) {
        assert!(!self.nvm_read_queue_full(1));

        let mut pkt = self.nvm.decode_packet(
            from.addr,
            from.size,
            AccessKind::Read,
            from.requestor,
            from.priority,
            now,
        );
        pkt.ready_at = READY_UNSET;
        pkt.req = from.req;
        pkt.burst = from.burst;
        pkt.entry_at = from.entry_at;
        self.nvm.setup_rank(pkt.rank, true);
        self.nvm_read_queue.push(pkt);
        self.stats.nvm_reads += 1;
        trace!("nvm read for {:#x}+{}", from.addr, from.size);

        // tags are checked on the way back, so the next request event only
        // needs to run after that check could have completed
        let _ = self
            .events
            .ensure_scheduled(Event::NextReq, now + self.cfg.tag_check_latency);
    }

    /// Queue an NVM write (no-allocate write miss or victim write-back).
    pub(crate) fn add_to_nvm_write_queue(
        &mut self,
        addr: u64,
        size: u32,
        requestor: u16,
        priority: u8,
        now: Tick,
    ) {
        assert!(!self.nvm_write_queue_full(1));

        let mut pkt = self
            .nvm
            .decode_packet(addr, size, AccessKind::Write, requestor, priority, now);
        pkt.ready_at = READY_UNSET;
        self.nvm.setup_rank(pkt.rank, false);
        self.nvm_write_queue.push(pkt);
        self.stats.nvm_writes += 1;
        trace!("nvm write for {:#x}+{}", addr, size);

        let _ = self
            .events
            .ensure_scheduled(Event::NextReq, now + self.cfg.tag_check_latency);
    }
}
