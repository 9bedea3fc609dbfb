use crate::mem::cmdbus::CommandBus;
use crate::mem::request::{AccessKind, MemPacket};
use crate::sim::event::Tick;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrRange {
    pub start: u64,
    pub size: u64,
}

impl AddrRange {
    pub fn new(start: u64, size: u64) -> Self {
        Self { start, size }
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr - self.start < self.size
    }

    pub fn end(&self) -> u64 {
        self.start + self.size
    }
}

/// Capability interface one memory tier exposes to the controller. Both the
/// DRAM and NVM models implement it; the controller holds each tier behind
/// this trait and never sees device internals.
pub trait MemoryMedia {
    /// Turn one burst of an external request into a device-routed packet.
    /// The controller fills in ownership (`req`, `burst`) and policy flags
    /// afterwards.
    fn decode_packet(
        &self,
        addr: u64,
        size: u32,
        kind: AccessKind,
        requestor: u16,
        priority: u8,
        now: Tick,
    ) -> MemPacket;

    /// Account an access against a rank (outstanding read/write counters).
    fn setup_rank(&mut self, rank: usize, is_read: bool);

    /// A read to `rank` finished its response-queue trip.
    fn respond_event(&mut self, rank: usize);

    /// First-ready FCFS: index of the queue member that can put data on the
    /// bus soonest, together with that tick. `min_col_at` is the earliest
    /// seamless column-command tick the controller will allow.
    fn choose_next_frfcfs(&self, queue: &[MemPacket], min_col_at: Tick, now: Tick)
        -> (Option<usize>, Tick);

    /// Issue one burst. Returns `(cmd_at, next_burst_at)` and sets the
    /// packet's `ready_at`. Command-bus slots are reserved via `bus`.
    fn do_burst_access(
        &mut self,
        pkt: &mut MemPacket,
        next_burst_at: Tick,
        now: Tick,
        bus: &mut CommandBus,
    ) -> (Tick, Tick);

    /// Whole device unable to accept any command right now (e.g. every rank
    /// refreshing).
    fn is_busy(&self, now: Tick) -> bool;

    /// Tick at which a busy device will accept commands again. The arbiter
    /// schedules its wake-up here instead of polling.
    fn next_wake_at(&self, now: Tick) -> Tick;

    /// Can this specific packet's rank take a command now?
    fn burst_ready(&self, pkt: &MemPacket, now: Tick) -> bool;

    fn bytes_per_burst(&self) -> u32;

    /// Worst-case lead time between the first command of a burst and its
    /// data; used to wind the bus-busy horizon forward at startup and to
    /// derive the arbiter's conservative wake-up.
    fn command_offset(&self) -> Tick;

    fn min_read_to_write_gap(&self) -> Tick;

    fn min_write_to_read_gap(&self) -> Tick;

    /// Cross-tier data-bus synchronization after the other tier issued.
    fn add_rank_to_rank_delay(&mut self, cmd_at: Tick);

    fn all_ranks_drained(&self, now: Tick) -> bool;

    /// Tick at which every rank and bank timer has elapsed, given no
    /// further commands. Lets a drain loop step straight to the point where
    /// `all_ranks_drained` can turn true.
    fn quiesce_at(&self) -> Tick;

    fn addr_range(&self) -> AddrRange;
}

#[cfg(test)]
mod tests {
    use super::AddrRange;

    #[test]
    fn addr_range_contains_is_half_open() {
        let range = AddrRange::new(0x1000, 0x100);
        assert!(!range.contains(0xfff));
        assert!(range.contains(0x1000));
        assert!(range.contains(0x10ff));
        assert!(!range.contains(0x1100));
        assert_eq!(range.end(), 0x1100);
    }
}
