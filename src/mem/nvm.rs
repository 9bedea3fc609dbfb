use log::trace;

use crate::mem::cmdbus::CommandBus;
use crate::mem::media::{AddrRange, MemoryMedia};
use crate::mem::request::{AccessKind, MemPacket, MediaTarget};
use crate::sim::config::NvmConfig;
use crate::sim::event::Tick;

#[derive(Debug, Clone, Copy, Default)]
struct NvmRank {
    busy_until: Tick,
    outstanding_reads: u32,
    outstanding_writes: u32,
}

/// Flat-latency NVM timing model: no row buffer, asymmetric read/write
/// media latency, one command per burst.
pub struct NvmModel {
    cfg: NvmConfig,
    range: AddrRange,
    ranks: Vec<NvmRank>,
    bus_free_at: Tick,
}

impl NvmModel {
    pub fn new(cfg: NvmConfig, range: AddrRange) -> Self {
        assert!(cfg.ranks > 0);
        assert!(cfg.bytes_per_burst.is_power_of_two());
        Self {
            cfg,
            range,
            ranks: vec![NvmRank::default(); cfg.ranks],
            bus_free_at: 0,
        }
    }

    fn rank_of(&self, addr: u64) -> usize {
        ((addr / self.cfg.bytes_per_burst as u64) as usize) % self.cfg.ranks
    }
}

impl MemoryMedia for NvmModel {
    fn decode_packet(
        &self,
        addr: u64,
        size: u32,
        kind: AccessKind,
        requestor: u16,
        priority: u8,
        now: Tick,
    ) -> MemPacket {
        assert!(size <= self.cfg.bytes_per_burst);
        MemPacket {
            addr,
            size,
            kind,
            target: MediaTarget::Nvm,
            rank: self.rank_of(addr),
            bank: 0,
            row: 0,
            req: None,
            burst: None,
            requestor,
            priority,
            entry_at: now,
            ready_at: 0,
            read_before_write: false,
            waiting_for_nvm_read: false,
        }
    }

    fn setup_rank(&mut self, rank: usize, is_read: bool) {
        let rank = &mut self.ranks[rank];
        if is_read {
            rank.outstanding_reads += 1;
        } else {
            rank.outstanding_writes += 1;
        }
    }

    fn respond_event(&mut self, rank: usize) {
        let rank = &mut self.ranks[rank];
        assert!(rank.outstanding_reads > 0);
        rank.outstanding_reads -= 1;
    }

    fn choose_next_frfcfs(
        &self,
        queue: &[MemPacket],
        min_col_at: Tick,
        now: Tick,
    ) -> (Option<usize>, Tick) {
        let mut best: Option<usize> = None;
        let mut best_at = Tick::MAX;
        for (idx, pkt) in queue.iter().enumerate() {
            if pkt.is_dram() || pkt.waiting_for_nvm_read {
                continue;
            }
            let at = min_col_at.max(self.ranks[pkt.rank].busy_until).max(now);
            if at < best_at {
                best = Some(idx);
                best_at = at;
            }
        }
        (best, best_at)
    }

    fn do_burst_access(
        &mut self,
        pkt: &mut MemPacket,
        next_burst_at: Tick,
        now: Tick,
        bus: &mut CommandBus,
    ) -> (Tick, Tick) {
        let rank_free = self.ranks[pkt.rank].busy_until;
        let cmd_at = bus.verify_single_cmd(next_burst_at.max(self.bus_free_at).max(rank_free).max(now));

        let media_latency = match pkt.kind {
            AccessKind::Read => self.cfg.t_read,
            AccessKind::Write => self.cfg.t_write,
        };
        pkt.ready_at = cmd_at + media_latency + self.cfg.t_burst;

        let rank = &mut self.ranks[pkt.rank];
        rank.busy_until = cmd_at + media_latency;
        if pkt.kind == AccessKind::Write {
            assert!(rank.outstanding_writes > 0);
            rank.outstanding_writes -= 1;
        }

        trace!(
            "nvm: burst addr {:#x} rank {} {:?} at {} ready {}",
            pkt.addr,
            pkt.rank,
            pkt.kind,
            cmd_at,
            pkt.ready_at
        );

        (cmd_at, cmd_at + self.cfg.t_burst)
    }

    fn is_busy(&self, now: Tick) -> bool {
        self.ranks.iter().all(|rank| rank.busy_until > now)
    }

    fn next_wake_at(&self, now: Tick) -> Tick {
        self.ranks
            .iter()
            .map(|rank| rank.busy_until)
            .min()
            .unwrap_or(now)
            .max(now)
    }

    fn burst_ready(&self, pkt: &MemPacket, now: Tick) -> bool {
        self.ranks[pkt.rank].busy_until <= now
    }

    fn bytes_per_burst(&self) -> u32 {
        self.cfg.bytes_per_burst
    }

    fn command_offset(&self) -> Tick {
        self.cfg.t_burst
    }

    fn min_read_to_write_gap(&self) -> Tick {
        self.cfg.t_rtw
    }

    fn min_write_to_read_gap(&self) -> Tick {
        self.cfg.t_wtr
    }

    fn add_rank_to_rank_delay(&mut self, cmd_at: Tick) {
        self.bus_free_at = self.bus_free_at.max(cmd_at + self.cfg.t_burst);
    }

    fn all_ranks_drained(&self, now: Tick) -> bool {
        self.ranks.iter().all(|rank| {
            rank.outstanding_reads == 0 && rank.outstanding_writes == 0 && rank.busy_until <= now
        })
    }

    fn quiesce_at(&self) -> Tick {
        self.ranks
            .iter()
            .map(|rank| rank.busy_until)
            .max()
            .unwrap_or(0)
    }

    fn addr_range(&self) -> AddrRange {
        self.range
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::cmdbus::CommandBus;
    use crate::mem::request::AccessKind;

    fn model() -> NvmModel {
        NvmModel::new(NvmConfig::default(), AddrRange::new(0, 1 << 30))
    }

    #[test]
    fn writes_cost_more_than_reads() {
        let mut nvm = model();
        let mut bus = CommandBus::new(10, 4);
        let mut rd = nvm.decode_packet(0, 64, AccessKind::Read, 0, 0, 0);
        let (rd_at, _) = nvm.do_burst_access(&mut rd, 0, 0, &mut bus);
        nvm.setup_rank(0, false);
        let start = rd.ready_at;
        let mut wr = nvm.decode_packet(0, 64, AccessKind::Write, 0, 0, start);
        let (wr_at, _) = nvm.do_burst_access(&mut wr, start, start, &mut bus);
        assert_eq!(rd.ready_at - rd_at, nvm.cfg.t_read + nvm.cfg.t_burst);
        assert_eq!(wr.ready_at - wr_at, nvm.cfg.t_write + nvm.cfg.t_burst);
    }

    #[test]
    fn busy_rank_defers_next_command() {
        let mut nvm = model();
        let mut bus = CommandBus::new(10, 4);
        let mut first = nvm.decode_packet(0, 64, AccessKind::Read, 0, 0, 0);
        let (cmd_at, _) = nvm.do_burst_access(&mut first, 0, 0, &mut bus);
        let busy_at = cmd_at + 1;
        assert!(nvm.is_busy(busy_at));
        assert_eq!(nvm.next_wake_at(busy_at), cmd_at + nvm.cfg.t_read);
        assert_eq!(nvm.quiesce_at(), cmd_at + nvm.cfg.t_read);
    }

    #[test]
    fn drained_when_counts_and_timing_quiesce() {
        let mut nvm = model();
        nvm.setup_rank(0, true);
        assert!(!nvm.all_ranks_drained(u64::MAX));
        nvm.respond_event(0);
        assert!(nvm.all_ranks_drained(u64::MAX));
    }
}
