use log::{debug, trace};

use crate::mem::request::{MemPacket, ResponsePort};
use crate::sim::config::SchedPolicy;
use crate::sim::event::{Event, Tick, MAX_TICK};

use super::{BusState, DrainState, MemCtrl, QueueKind};

impl MemCtrl {
    /// Bus arbiter. Commits a pending direction switch, picks one burst from
    /// the queues the current direction serves, and issues it.
    pub(crate) fn process_next_req_event(&mut self, now: Tick, port: &mut dyn ResponsePort) {
        let switched = self.bus_state != self.bus_state_next;
        if switched {
            match self.bus_state {
                BusState::Read => {
                    self.stats.record_turnaround(true, self.reads_this_time as u64);
                    self.reads_this_time = 0;
                }
                BusState::Write => {
                    self.stats.record_turnaround(false, self.writes_this_time as u64);
                    self.writes_this_time = 0;
                }
            }
            debug!("bus turnaround to {:?} at {}", self.bus_state_next, now);
            self.bus_state = self.bus_state_next;
        }

        if self.dram.is_busy(now) && self.nvm.is_busy(now) {
            let wake = self
                .dram
                .next_wake_at(now)
                .min(self.nvm.next_wake_at(now))
                .max(now + 1);
            trace!("both tiers busy, arbiter sleeping until {}", wake);
            let _ = self.events.ensure_scheduled(Event::NextReq, wake);
            return;
        }

        let issued = match self.bus_state {
            BusState::Read => self.serve_reads(switched, now),
            BusState::Write => self.serve_writes(switched, now),
        };

        if issued {
            let at = self.next_req_time.max(now);
            let _ = self.events.ensure_scheduled(Event::NextReq, at);
        }

        if self.retry_wr && !self.write_queue_full(1) {
            self.retry_wr = false;
            port.retry_write(now);
        }
    }

    /// Pick one read-direction burst: DRAM reads against NVM reads, with the
    /// write queue's pending tag checks as a fallback. Returns true if a
    /// burst was issued.
    fn serve_reads(&mut self, switched: bool, now: Tick) -> bool {
        let read_work = !self.read_queue.is_empty()
            || !self.nvm_read_queue.is_empty()
            || !self.write_queue.is_empty();

        if !read_work {
            let backlog = self.total_write_backlog();
            // a blocked response head waiting on a full write-side queue
            // forces the switch even below the low threshold
            if backlog != 0
                && (self.drain_state == DrainState::Draining
                    || backlog > self.cfg.write_low_threshold()
                    || self.retry_fill
                    || self.retry_nvm_wr)
            {
                self.bus_state_next = BusState::Write;
                let _ = self.events.ensure_scheduled(Event::NextReq, now);
            } else if self.drain_state == DrainState::Draining
                && backlog == 0
                && self.resp_queue.is_empty()
                && self.all_intf_drained(now)
            {
                debug!("controller done draining");
                self.drain_state = DrainState::Drained;
            }
            return false;
        }

        // honor the turnaround gap by pushing the earliest allowed column
        // command out, not by stalling the arbiter
        let extra = if switched {
            self.dram
                .min_write_to_read_gap()
                .min(self.nvm.min_write_to_read_gap())
        } else {
            0
        };
        let eff_burst_at = self.next_burst_at + extra;

        let (dram_idx, dram_at) = self.choose_candidate(QueueKind::Read, eff_burst_at, now);
        let (nvm_idx, nvm_at) = self.choose_candidate(QueueKind::NvmRead, eff_burst_at, now);

        // an NVM read that can issue no later than the DRAM candidate takes
        // the bus, keeping miss responses from stalling behind a hit stream
        let pick = match (dram_idx, nvm_idx) {
            (Some(d), Some(n)) => {
                if nvm_at <= dram_at {
                    Some((QueueKind::NvmRead, n))
                } else {
                    Some((QueueKind::Read, d))
                }
            }
            (Some(d), None) => Some((QueueKind::Read, d)),
            (None, Some(n)) => Some((QueueKind::NvmRead, n)),
            (None, None) => {
                let (w_idx, _) = self.choose_candidate(QueueKind::Write, eff_burst_at, now);
                w_idx.map(|idx| (QueueKind::Write, idx))
            }
        };

        let Some((kind, idx)) = pick else {
            let wake = self
                .dram
                .next_wake_at(now)
                .min(self.nvm.next_wake_at(now))
                .max(now + 1);
            let _ = self.events.ensure_scheduled(Event::NextReq, wake);
            return false;
        };

        self.issue_from(kind, idx, eff_burst_at, now);
        self.reads_this_time += 1;

        if self.total_write_backlog() > self.cfg.write_high_threshold() {
            debug!("write backlog over the high threshold, switching to writes");
            self.bus_state_next = BusState::Write;
        }
        true
    }

    /// Pick one write-direction burst: DRAM fills first, NVM writes second.
    /// Returns true if a burst was issued.
    fn serve_writes(&mut self, switched: bool, now: Tick) -> bool {
        let extra = if switched {
            self.dram
                .min_read_to_write_gap()
                .min(self.nvm.min_read_to_write_gap())
        } else {
            0
        };
        let eff_burst_at = self.next_burst_at + extra;

        let pick = {
            let (f_idx, _) = self.choose_candidate(QueueKind::DramFill, eff_burst_at, now);
            match f_idx {
                Some(idx) => Some((QueueKind::DramFill, idx)),
                None => {
                    let (w_idx, _) = self.choose_candidate(QueueKind::NvmWrite, eff_burst_at, now);
                    w_idx.map(|idx| (QueueKind::NvmWrite, idx))
                }
            }
        };

        let Some((kind, idx)) = pick else {
            // everything left is waiting on data; reads make the progress now
            self.bus_state_next = BusState::Read;
            if !self.read_queue.is_empty()
                || !self.nvm_read_queue.is_empty()
                || !self.write_queue.is_empty()
            {
                let _ = self.events.ensure_scheduled(Event::NextReq, now);
            }
            return false;
        };

        self.issue_from(kind, idx, eff_burst_at, now);
        self.writes_this_time += 1;

        let backlog = self.total_write_backlog();
        let read_work = !self.read_queue.is_empty()
            || !self.nvm_read_queue.is_empty()
            || !self.write_queue.is_empty();
        let below_threshold =
            backlog + (self.cfg.min_writes_per_switch as usize) < self.cfg.write_low_threshold();
        if backlog == 0
            || (below_threshold && self.drain_state != DrainState::Draining)
            || (read_work && self.writes_this_time >= self.cfg.min_writes_per_switch)
        {
            self.bus_state_next = BusState::Read;
        }
        true
    }

    /// Index of the packet the scheduling policy would issue next from one
    /// queue, with the tick its data could hit the bus.
    fn choose_candidate(
        &self,
        kind: QueueKind,
        min_col_at: Tick,
        now: Tick,
    ) -> (Option<usize>, Tick) {
        let (queue, media) = self.queue_and_media(kind);
        match self.cfg.sched_policy {
            SchedPolicy::Frfcfs => media.choose_next_frfcfs(queue, min_col_at, now),
            SchedPolicy::Fcfs => {
                for (idx, pkt) in queue.iter().enumerate() {
                    if pkt.waiting_for_nvm_read {
                        continue;
                    }
                    if media.burst_ready(pkt, now) {
                        return (Some(idx), min_col_at.max(now));
                    }
                }
                (None, MAX_TICK)
            }
        }
    }

    fn queue_and_media(&self, kind: QueueKind) -> (&[MemPacket], &dyn crate::mem::media::MemoryMedia) {
        match kind {
            QueueKind::Read => (&self.read_queue, &*self.dram),
            QueueKind::Write => (&self.write_queue, &*self.dram),
            QueueKind::DramFill => (&self.dram_fill_queue, &*self.dram),
            QueueKind::NvmRead => (&self.nvm_read_queue, &*self.nvm),
            QueueKind::NvmWrite => (&self.nvm_write_queue, &*self.nvm),
        }
    }

    /// Pull one packet out of its queue and put its burst on the bus. Reads
    /// (including pending tag checks) continue into the response queue;
    /// writes complete here.
    fn issue_from(&mut self, kind: QueueKind, idx: usize, eff_burst_at: Tick, now: Tick) {
        let mut pkt = match kind {
            QueueKind::Read => self.read_queue.remove(idx),
            QueueKind::Write => self.write_queue.remove(idx),
            QueueKind::DramFill => self.dram_fill_queue.remove(idx),
            QueueKind::NvmRead => self.nvm_read_queue.remove(idx),
            QueueKind::NvmWrite => self.nvm_write_queue.remove(idx),
        };
        assert!(!pkt.waiting_for_nvm_read);

        self.cmd_bus.prune(now);
        let (cmd_at, next_burst_at) = if pkt.is_dram() {
            let res = self
                .dram
                .do_burst_access(&mut pkt, eff_burst_at, now, &mut self.cmd_bus);
            self.nvm.add_rank_to_rank_delay(res.0);
            res
        } else {
            let res = self
                .nvm
                .do_burst_access(&mut pkt, eff_burst_at, now, &mut self.cmd_bus);
            self.dram.add_rank_to_rank_delay(res.0);
            res
        };
        let offset = if pkt.is_dram() {
            self.dram.command_offset()
        } else {
            self.nvm.command_offset()
        };
        self.next_burst_at = next_burst_at;
        self.next_req_time = next_burst_at.saturating_sub(offset);
        trace!(
            "issued {:?} burst {:#x}, cmd at {}, next burst at {}",
            kind,
            pkt.addr,
            cmd_at,
            next_burst_at
        );

        match kind {
            QueueKind::Write => {
                // the write left its buffer slot; merges and forwards against
                // it are over
                let removed = self.is_in_write_queue.remove(&self.burst_align(pkt.addr));
                assert!(removed);
            }
            QueueKind::NvmRead => {
                if self.retry_nvm_rd {
                    self.retry_nvm_rd = false;
                    let _ = self.events.ensure_scheduled(Event::Respond, now + 1);
                }
            }
            QueueKind::NvmWrite => {
                if self.retry_nvm_wr {
                    self.retry_nvm_wr = false;
                    let _ = self.events.ensure_scheduled(Event::Respond, now + 1);
                }
            }
            QueueKind::DramFill => {
                if self.retry_fill {
                    self.retry_fill = false;
                    let _ = self.events.ensure_scheduled(Event::Respond, now + 1);
                }
            }
            QueueKind::Read => {}
        }

        if pkt.is_read() {
            self.push_resp(pkt, now);
        }
    }
}
