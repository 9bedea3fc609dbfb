use serde::Serialize;

use crate::sim::event::Tick;

/// Controller counters. Pure side effects of the scheduling core; serialized
/// as JSON by the CLI driver at the end of a run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CtrlStats {
    pub read_reqs: u64,
    pub write_reqs: u64,
    pub read_bursts: u64,
    pub write_bursts: u64,
    /// Read bursts answered straight from queued write data.
    pub serviced_by_wr_q: u64,
    pub serviced_by_fill_q: u64,
    pub serviced_by_nvm_wr_q: u64,
    /// Write bursts that merged into an existing queue entry.
    pub merged_wr_bursts: u64,
    pub num_rd_retry: u64,
    pub num_wr_retry: u64,
    pub dram_hits: u64,
    pub clean_misses: u64,
    pub dirty_misses: u64,
    pub victim_writebacks: u64,
    pub nvm_reads: u64,
    pub nvm_writes: u64,
    pub dram_fills: u64,
    /// Respond-event attempts deferred because a secondary queue was full.
    pub deferred_miss_inserts: u64,
    pub rd_per_turnaround_max: u64,
    pub wr_per_turnaround_max: u64,
    pub bytes_read_sys: u64,
    pub bytes_written_sys: u64,
    pub bytes_read_wr_q: u64,
    pub tot_read_latency: Tick,
    pub tot_gap: Tick,
    pub responses: u64,
}

impl CtrlStats {
    pub fn record_turnaround(&mut self, was_read: bool, count: u64) {
        if was_read {
            self.rd_per_turnaround_max = self.rd_per_turnaround_max.max(count);
        } else {
            self.wr_per_turnaround_max = self.wr_per_turnaround_max.max(count);
        }
    }

    pub fn avg_read_latency(&self) -> f64 {
        if self.responses == 0 {
            0.0
        } else {
            self.tot_read_latency as f64 / self.responses as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CtrlStats;

    #[test]
    fn turnaround_tracks_maximum() {
        let mut stats = CtrlStats::default();
        stats.record_turnaround(true, 3);
        stats.record_turnaround(true, 1);
        stats.record_turnaround(false, 7);
        assert_eq!(stats.rd_per_turnaround_max, 3);
        assert_eq!(stats.wr_per_turnaround_max, 7);
    }

    #[test]
    fn avg_latency_handles_zero_responses() {
        let stats = CtrlStats::default();
        assert_eq!(stats.avg_read_latency(), 0.0);
    }
}
