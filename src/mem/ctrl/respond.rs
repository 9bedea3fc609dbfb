use log::{debug, trace};

use crate::mem::request::{MemPacket, ResponsePort};
use crate::mem::tags::TagOutcome;
use crate::sim::config::WriteAllocPolicy;
use crate::sim::event::{Event, Tick};

use super::{DrainState, MemCtrl};

/// What happens to the packet at the head of the response queue.
enum Resolution {
    /// Hand the data back to the transport layer.
    Deliver,
    /// Consumed internally (tag checks, fills kicked off), no response.
    Silent,
    /// A secondary queue it needs is full; leave the head in place until the
    /// matching retry fires.
    Blocked,
}

impl MemCtrl {
    pub(crate) fn process_respond_event(&mut self, now: Tick, port: &mut dyn ResponsePort) {
        let pkt = {
            let top = self
                .resp_queue
                .peek()
                .expect("respond event with an empty response queue");
            assert!(top.ready_at <= now);
            top.pkt.clone()
        };
        trace!("processing response for addr {:#x}", pkt.addr);

        let resolution = if pkt.is_dram() {
            self.resolve_dram_read(&pkt, now)
        } else {
            self.resolve_nvm_read(&pkt, now)
        };

        if let Resolution::Blocked = resolution {
            // head-of-line wait: the arbiter reschedules us when the full
            // queue drains a slot
            debug!("response for {:#x} blocked on a full queue", pkt.addr);
            self.stats.deferred_miss_inserts += 1;
            self.release_arrived_fills(now);
            return;
        }

        let entry = self.resp_queue.pop().expect("peeked entry vanished");
        let pkt = entry.pkt;
        if pkt.is_dram() {
            self.dram.respond_event(pkt.rank);
        } else {
            self.nvm.respond_event(pkt.rank);
        }

        if let Resolution::Deliver = resolution {
            let req_id = pkt.req.expect("deliverable packet without an owner");
            let done = match pkt.burst {
                Some(burst_id) => self.bursts.service_one(burst_id),
                None => true,
            };
            if done {
                let latency = self.cfg.frontend_latency + self.cfg.backend_latency;
                self.access_and_respond(req_id, latency, now, port);
            }
        }

        if let Some(top) = self.resp_queue.peek() {
            let at = top.ready_at.max(now);
            let _ = self.events.ensure_scheduled(Event::Respond, at);
        } else if self.drain_state == DrainState::Draining
            && self.all_queues_empty()
            && self.all_intf_drained(now)
        {
            debug!("controller done draining");
            self.drain_state = DrainState::Drained;
        }

        // popping freed a read buffer slot
        if self.retry_rd {
            self.retry_rd = false;
            port.retry_read(now);
        }
    }

    /// A DRAM read came back: this is where the tag check lands. Pure reads
    /// either deliver (hit) or turn into an NVM read plus a fill; writes shed
    /// their read disguise and turn into a fill or an NVM write.
    fn resolve_dram_read(&mut self, pkt: &MemPacket, now: Tick) -> Resolution {
        match self.tags.classify(pkt.addr) {
            TagOutcome::Hit => {
                self.stats.dram_hits += 1;
                if pkt.is_pure_read() {
                    return Resolution::Deliver;
                }
                // write hit: commit by filling the line in place
                if self.dram_fill_queue_full(1) {
                    self.retry_fill = true;
                    return Resolution::Blocked;
                }
                let _ = self.add_to_dram_fill_queue(
                    pkt.addr,
                    true,
                    false,
                    pkt.requestor,
                    pkt.priority,
                    now,
                );
                Resolution::Silent
            }
            outcome @ (TagOutcome::CleanMiss | TagOutcome::DirtyMiss) => {
                let dirty_victim = outcome == TagOutcome::DirtyMiss;
                let no_allocate_write =
                    !pkt.is_pure_read() && self.cfg.write_alloc == WriteAllocPolicy::NoAllocate;

                if no_allocate_write {
                    // write around: data goes straight to NVM, the resident
                    // line is left alone
                    if self.nvm_write_queue_full(1) {
                        self.retry_nvm_wr = true;
                        return Resolution::Blocked;
                    }
                } else {
                    if self.nvm_read_queue_full(1) {
                        self.retry_nvm_rd = true;
                        return Resolution::Blocked;
                    }
                    if self.dram_fill_queue_full(1) {
                        self.retry_fill = true;
                        return Resolution::Blocked;
                    }
                    if dirty_victim && self.nvm_write_queue_full(1) {
                        self.retry_nvm_wr = true;
                        return Resolution::Blocked;
                    }
                }

                if dirty_victim {
                    self.stats.dirty_misses += 1;
                } else {
                    self.stats.clean_misses += 1;
                }

                if no_allocate_write {
                    self.add_to_nvm_write_queue(
                        pkt.addr,
                        pkt.size,
                        pkt.requestor,
                        pkt.priority,
                        now,
                    );
                    return Resolution::Silent;
                }

                // the fetch inherits the packet's ownership, so a pure read
                // responds when NVM delivers; a write-allocate fetch has no
                // owner and completes silently
                self.add_to_nvm_read_queue(pkt, now);
                let dirty = !pkt.is_pure_read();
                let _ = self.add_to_dram_fill_queue(
                    pkt.addr,
                    dirty,
                    true,
                    pkt.requestor,
                    pkt.priority,
                    now,
                );
                Resolution::Silent
            }
        }
    }

    /// An NVM read delivered: release the fill that was waiting on its data,
    /// then deliver if an external request owns it.
    fn resolve_nvm_read(&mut self, pkt: &MemPacket, now: Tick) -> Resolution {
        assert!(pkt.is_read(), "NVM writes never enter the response queue");

        // the fill may already have been released (and even issued) while a
        // blocked head held this response back
        let line = self.tags.line_align(pkt.addr);
        if let Some(fill) = self
            .dram_fill_queue
            .iter_mut()
            .find(|f| f.addr == line && f.waiting_for_nvm_read)
        {
            fill.waiting_for_nvm_read = false;
            let _ = self.events.ensure_scheduled(Event::NextReq, now);
        }

        if pkt.req.is_some() {
            Resolution::Deliver
        } else {
            Resolution::Silent
        }
    }

    /// A blocked response head must not starve fills whose NVM data already
    /// arrived behind it; release them so the write phase can free a slot.
    fn release_arrived_fills(&mut self, now: Tick) {
        let arrived: Vec<u64> = self
            .resp_queue
            .iter()
            .filter(|entry| entry.ready_at <= now && !entry.pkt.is_dram())
            .map(|entry| self.tags.line_align(entry.pkt.addr))
            .collect();
        let mut released = false;
        for line in arrived {
            if let Some(fill) = self
                .dram_fill_queue
                .iter_mut()
                .find(|f| f.addr == line && f.waiting_for_nvm_read)
            {
                trace!("releasing fill for line {:#x} behind a blocked head", line);
                fill.waiting_for_nvm_read = false;
                released = true;
            }
        }
        if released {
            let _ = self.events.ensure_scheduled(Event::NextReq, now);
        }
    }
}
