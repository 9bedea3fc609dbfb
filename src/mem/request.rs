use std::collections::HashMap;

use crate::sim::event::{Tick, MAX_TICK};

/// Id of an outstanding external request inside the controller. Packets carry
/// this id instead of a reference so sibling packets can be dropped
/// independently of each other.
pub type ReqId = u64;

/// Id of a shared split-request completion counter.
pub type BurstId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

impl AccessKind {
    pub fn is_read(self) -> bool {
        matches!(self, Self::Read)
    }

    pub fn is_write(self) -> bool {
        matches!(self, Self::Write)
    }
}

/// External memory request as delivered by the transport layer. The
/// controller borrows it for the lifetime of the access and hands it back as
/// a `Response`; it never retains one past completion.
#[derive(Debug, Clone)]
pub struct Request {
    pub addr: u64,
    pub size: u32,
    pub kind: AccessKind,
    pub requestor: u16,
    pub priority: u8,
    pub needs_response: bool,
    /// Payload for writes; empty for reads.
    pub data: Vec<u8>,
}

impl Request {
    pub fn read(addr: u64, size: u32, requestor: u16) -> Self {
        Self {
            addr,
            size,
            kind: AccessKind::Read,
            requestor,
            priority: 0,
            needs_response: true,
            data: Vec::new(),
        }
    }

    pub fn write(addr: u64, data: Vec<u8>, requestor: u16) -> Self {
        let size = data.len() as u32;
        Self {
            addr,
            size,
            kind: AccessKind::Write,
            requestor,
            priority: 0,
            needs_response: true,
            data,
        }
    }

    pub fn is_read(&self) -> bool {
        self.kind.is_read()
    }

    pub fn is_write(&self) -> bool {
        self.kind.is_write()
    }
}

/// Completed request flowing back to the transport layer. `data` carries the
/// read payload; writes echo an empty buffer.
#[derive(Debug, Clone)]
pub struct Response {
    pub addr: u64,
    pub size: u32,
    pub kind: AccessKind,
    pub requestor: u16,
    pub data: Vec<u8>,
}

/// Transport-layer callbacks. `respond` is invoked exactly once per accepted
/// request that needs a response; the retry hooks fire once per freed slot
/// after a rejected submit.
pub trait ResponsePort {
    fn respond(&mut self, resp: Response, at: Tick);
    fn retry_read(&mut self, now: Tick);
    fn retry_write(&mut self, now: Tick);
}

/// Which tier a packet is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaTarget {
    Dram,
    Nvm,
}

impl MediaTarget {
    pub fn is_dram(self) -> bool {
        matches!(self, Self::Dram)
    }
}

/// In-flight burst-sized unit of work inside the controller. Decoded from a
/// `Request` by a device model; owned exclusively by whichever queue it sits
/// in. Victim write-backs are synthesized without an owning request.
#[derive(Debug, Clone)]
pub struct MemPacket {
    pub addr: u64,
    pub size: u32,
    pub kind: AccessKind,
    pub target: MediaTarget,
    pub rank: usize,
    pub bank: usize,
    pub row: u64,
    /// Owning external request; None for synthesized victim write-backs.
    pub req: Option<ReqId>,
    pub burst: Option<BurstId>,
    pub requestor: u16,
    pub priority: u8,
    pub entry_at: Tick,
    pub ready_at: Tick,
    /// A write still masquerading as a DRAM read while its tag check is in
    /// flight.
    pub read_before_write: bool,
    /// A DRAM-fill that cannot be written until its NVM read delivers data.
    pub waiting_for_nvm_read: bool,
}

impl MemPacket {
    pub fn is_read(&self) -> bool {
        self.kind.is_read()
    }

    pub fn is_dram(&self) -> bool {
        self.target.is_dram()
    }

    /// True for reads that really are reads, not pending write tag checks.
    pub fn is_pure_read(&self) -> bool {
        self.is_read() && !self.read_before_write
    }
}

/// Shared completion counter for one oversized request split into several
/// bursts. Freed once every sibling has been serviced.
#[derive(Debug, Clone, Copy)]
pub struct BurstHelper {
    pub burst_count: u32,
    pub bursts_serviced: u32,
}

/// Id-indexed table of burst helpers; packets hold a `BurstId` into it.
#[derive(Debug, Default)]
pub struct BurstTable {
    next_id: BurstId,
    helpers: HashMap<BurstId, BurstHelper>,
}

impl BurstTable {
    pub fn alloc(&mut self, burst_count: u32) -> BurstId {
        let id = self.next_id;
        self.next_id += 1;
        let prev = self.helpers.insert(
            id,
            BurstHelper {
                burst_count,
                bursts_serviced: 0,
            },
        );
        assert!(prev.is_none());
        id
    }

    pub fn get(&self, id: BurstId) -> &BurstHelper {
        self.helpers.get(&id).expect("stale burst helper id")
    }

    pub fn set_serviced(&mut self, id: BurstId, serviced: u32) {
        let helper = self.helpers.get_mut(&id).expect("stale burst helper id");
        helper.bursts_serviced = serviced;
    }

    /// Count one completed sibling; returns true when the whole split request
    /// is done, in which case the helper is freed.
    pub fn service_one(&mut self, id: BurstId) -> bool {
        let helper = self.helpers.get_mut(&id).expect("stale burst helper id");
        helper.bursts_serviced += 1;
        assert!(helper.bursts_serviced <= helper.burst_count);
        if helper.bursts_serviced == helper.burst_count {
            let _ = self.helpers.remove(&id);
            true
        } else {
            false
        }
    }

    pub fn outstanding(&self) -> usize {
        self.helpers.len()
    }
}

/// Response-queue entry, ordered by `(ready_at, seq)` so equal ready times
/// pop in arrival order.
#[derive(Debug)]
pub struct RespEntry {
    pub ready_at: Tick,
    pub seq: u64,
    pub pkt: MemPacket,
}

impl PartialEq for RespEntry {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl Eq for RespEntry {}

impl PartialOrd for RespEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RespEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // reversed: BinaryHeap is a max-heap, we want the smallest key on top
        (other.ready_at, other.seq).cmp(&(self.ready_at, self.seq))
    }
}

/// Default ready time for packets that wait on another access (NVM reads,
/// DRAM fills) before they can be timed.
pub const READY_UNSET: Tick = MAX_TICK;
