use log::{debug, trace};

use crate::mem::cmdbus::CommandBus;
use crate::mem::media::{AddrRange, MemoryMedia};
use crate::mem::request::{AccessKind, MemPacket, MediaTarget};
use crate::sim::config::DramConfig;
use crate::sim::event::Tick;

#[derive(Debug, Clone, Copy, Default)]
struct Bank {
    open_row: Option<u64>,
    // earliest tick this bank can take another column command
    ready_at: Tick,
}

#[derive(Debug, Default)]
struct Rank {
    banks: Vec<Bank>,
    outstanding_reads: u32,
    outstanding_writes: u32,
}

/// Open-row DRAM timing model: per-bank row buffers with an
/// activate/precharge penalty and deterministic periodic refresh windows
/// during which a rank accepts no commands.
pub struct DramModel {
    cfg: DramConfig,
    range: AddrRange,
    ranks: Vec<Rank>,
    // data-bus alignment pushed out by the other tier's bursts
    bus_free_at: Tick,
}

impl DramModel {
    pub fn new(cfg: DramConfig, range: AddrRange) -> Self {
        assert!(cfg.ranks > 0 && cfg.banks_per_rank > 0);
        assert!(cfg.bytes_per_burst.is_power_of_two());
        assert!(cfg.t_rfc < cfg.t_refi, "refresh must leave the rank usable");
        let ranks = (0..cfg.ranks)
            .map(|_| Rank {
                banks: vec![Bank::default(); cfg.banks_per_rank],
                outstanding_reads: 0,
                outstanding_writes: 0,
            })
            .collect();
        Self {
            cfg,
            range,
            ranks,
            bus_free_at: 0,
        }
    }

    /// Ranks refresh in fixed windows at the end of each tREFI period.
    fn in_refresh(&self, now: Tick) -> bool {
        now % self.cfg.t_refi >= self.cfg.t_refi - self.cfg.t_rfc
    }

    fn refresh_end(&self, now: Tick) -> Tick {
        (now / self.cfg.t_refi + 1) * self.cfg.t_refi
    }

    fn decode_geometry(&self, addr: u64) -> (usize, usize, u64) {
        let burst = self.cfg.bytes_per_burst as u64;
        let blk = addr / burst;
        let rank = (blk as usize) % self.cfg.ranks;
        let bank = (blk as usize / self.cfg.ranks) % self.cfg.banks_per_rank;
        let row = blk / (self.cfg.ranks as u64 * self.cfg.banks_per_rank as u64);
        (rank, bank, row)
    }

    fn bank(&self, pkt: &MemPacket) -> &Bank {
        &self.ranks[pkt.rank].banks[pkt.bank]
    }

    /// Earliest tick the column command for `pkt` could issue, ignoring
    /// command-bus contention.
    fn col_allowed_at(&self, pkt: &MemPacket, min_col_at: Tick, now: Tick) -> Tick {
        let bank = self.bank(pkt);
        let mut at = min_col_at.max(bank.ready_at).max(now);
        if self.in_refresh(at) {
            at = self.refresh_end(at);
        }
        match bank.open_row {
            Some(row) if row == pkt.row => at,
            Some(_) => at + self.cfg.t_rp + self.cfg.t_rcd,
            None => at + self.cfg.t_rcd,
        }
    }
}

impl MemoryMedia for DramModel {
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
        let (rank, bank, row) = self.decode_geometry(addr);
        MemPacket {
            addr,
            size,
            kind,
            target: MediaTarget::Dram,
            rank,
            bank,
            row,
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
            if !pkt.is_dram() || pkt.waiting_for_nvm_read {
                continue;
            }
            let at = self.col_allowed_at(pkt, min_col_at, now);
            // earlier wins; FCFS order breaks ties
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
        let min_col_at = next_burst_at.max(self.bus_free_at);
        let col_at = self.col_allowed_at(pkt, min_col_at, now);
        let row_hit = self.bank(pkt).open_row == Some(pkt.row);
        // a row miss needs the paired ACT+RD/WR on the command bus
        let cmd_at = if row_hit {
            bus.verify_single_cmd(col_at)
        } else {
            bus.verify_multi_cmd(col_at, self.cfg.t_rcd + self.cfg.t_cas)
        };

        pkt.ready_at = cmd_at + self.cfg.t_cas + self.cfg.t_burst;
        if pkt.kind == AccessKind::Write {
            let rank = &mut self.ranks[pkt.rank];
            assert!(rank.outstanding_writes > 0);
            rank.outstanding_writes -= 1;
        }

        let bank = &mut self.ranks[pkt.rank].banks[pkt.bank];
        bank.open_row = Some(pkt.row);
        bank.ready_at = cmd_at + self.cfg.t_burst;

        trace!(
            "dram: burst addr {:#x} rank {} bank {} row {} {} at {} ready {}",
            pkt.addr,
            pkt.rank,
            pkt.bank,
            pkt.row,
            if row_hit { "hit" } else { "miss" },
            cmd_at,
            pkt.ready_at
        );

        (cmd_at, cmd_at + self.cfg.t_burst)
    }

    fn is_busy(&self, now: Tick) -> bool {
        // all ranks share the refresh window in this model
        self.in_refresh(now)
    }

    fn next_wake_at(&self, now: Tick) -> Tick {
        if self.in_refresh(now) {
            let at = self.refresh_end(now);
            debug!("dram: refreshing, wake at {}", at);
            at
        } else {
            now
        }
    }

    fn burst_ready(&self, pkt: &MemPacket, now: Tick) -> bool {
        !self.in_refresh(now) && self.bank(pkt).ready_at <= now + self.command_offset()
    }

    fn bytes_per_burst(&self) -> u32 {
        self.cfg.bytes_per_burst
    }

    fn command_offset(&self) -> Tick {
        self.cfg.t_rcd + self.cfg.t_cas
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
            rank.outstanding_reads == 0
                && rank.outstanding_writes == 0
                && rank.banks.iter().all(|bank| bank.ready_at <= now)
        })
    }

    fn quiesce_at(&self) -> Tick {
        self.ranks
            .iter()
            .flat_map(|rank| rank.banks.iter().map(|bank| bank.ready_at))
            .max()
            .unwrap_or(0)
    }

    fn addr_range(&self) -> AddrRange {
        self.range
    }
}
