use std::str::FromStr;

use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::Value;

use crate::sim::event::Tick;

/// Per-queue command scheduling policy.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedPolicy {
    Fcfs,
    #[default]
    Frfcfs,
}

impl FromStr for SchedPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "fcfs" => Ok(Self::Fcfs),
            "frfcfs" => Ok(Self::Frfcfs),
            _ => Err(format!(
                "unsupported scheduling policy '{}', expected one of: fcfs, frfcfs",
                value
            )),
        }
    }
}

/// What a write miss in the DRAM tier does.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WriteAllocPolicy {
    /// Bring the line into the DRAM cache on a write miss.
    Allocate,
    /// Write straight through to NVM, leaving the resident line alone.
    #[default]
    NoAllocate,
}

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Self {
        match section {
            Some(value) => value.clone().try_into().expect("cannot deserialize config"),
            None => {
                warn!("config section not found");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    /// Hard stop for the event loop; a run that exceeds this is stuck.
    pub timeout: Tick,
    /// Dump controller stats as JSON to stdout at the end of the run.
    pub dump_stats: bool,
    /// Cross-check every read response against the reference store.
    pub check_data: bool,
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            timeout: 10_000_000,
            dump_stats: true,
            check_data: true,
        }
    }
}

/// Controller-level knobs: queue capacities, turnaround thresholds, static
/// latencies, cache geometry.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CtrlConfig {
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub nvm_read_queue_size: usize,
    pub nvm_write_queue_size: usize,
    pub dram_fill_queue_size: usize,
    /// Percent of the write buffer above which the bus turns to writes.
    pub write_high_thresh_pct: u32,
    /// Percent below which it is not worth turning around.
    pub write_low_thresh_pct: u32,
    pub min_writes_per_switch: u32,
    pub sched_policy: SchedPolicy,
    pub write_alloc: WriteAllocPolicy,
    pub dram_cache_bytes: u64,
    pub line_bytes: u64,
    pub frontend_latency: Tick,
    pub backend_latency: Tick,
    pub tag_check_latency: Tick,
    pub command_window: Tick,
    pub max_cmds_per_window: u32,
}

impl Config for CtrlConfig {}

impl Default for CtrlConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 32,
            write_buffer_size: 64,
            nvm_read_queue_size: 32,
            nvm_write_queue_size: 32,
            dram_fill_queue_size: 32,
            write_high_thresh_pct: 85,
            write_low_thresh_pct: 50,
            min_writes_per_switch: 16,
            sched_policy: SchedPolicy::Frfcfs,
            write_alloc: WriteAllocPolicy::NoAllocate,
            dram_cache_bytes: 1 << 20,
            line_bytes: 64,
            frontend_latency: 10,
            backend_latency: 10,
            tag_check_latency: 4,
            command_window: 10,
            max_cmds_per_window: 2,
        }
    }
}

impl CtrlConfig {
    pub fn write_high_threshold(&self) -> usize {
        self.write_buffer_size * self.write_high_thresh_pct as usize / 100
    }

    pub fn write_low_threshold(&self) -> usize {
        self.write_buffer_size * self.write_low_thresh_pct as usize / 100
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct DramConfig {
    pub ranks: usize,
    pub banks_per_rank: usize,
    pub bytes_per_burst: u32,
    /// Data bus occupancy of one burst.
    pub t_burst: Tick,
    /// Activate to column command.
    pub t_rcd: Tick,
    /// Column command to first data beat.
    pub t_cas: Tick,
    /// Precharge before activating a new row.
    pub t_rp: Tick,
    /// Refresh interval and duration; each rank blocks for `t_rfc` out of
    /// every `t_refi` ticks.
    pub t_refi: Tick,
    pub t_rfc: Tick,
    /// Bus turnaround data gaps.
    pub t_rtw: Tick,
    pub t_wtr: Tick,
}

impl Config for DramConfig {}

impl Default for DramConfig {
    fn default() -> Self {
        Self {
            ranks: 2,
            banks_per_rank: 8,
            bytes_per_burst: 64,
            t_burst: 4,
            t_rcd: 14,
            t_cas: 14,
            t_rp: 14,
            t_refi: 7800,
            t_rfc: 350,
            t_rtw: 4,
            t_wtr: 8,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct NvmConfig {
    pub ranks: usize,
    pub bytes_per_burst: u32,
    pub t_burst: Tick,
    /// Fixed media latencies; reads are much slower than DRAM, writes
    /// slower still.
    pub t_read: Tick,
    pub t_write: Tick,
    pub t_rtw: Tick,
    pub t_wtr: Tick,
    /// Size of the NVM address space; the controller's full range.
    pub size_bytes: u64,
}

impl Config for NvmConfig {}

impl Default for NvmConfig {
    fn default() -> Self {
        Self {
            ranks: 1,
            bytes_per_burst: 64,
            t_burst: 4,
            t_read: 150,
            t_write: 500,
            t_rtw: 4,
            t_wtr: 8,
            size_bytes: 1 << 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_follow_buffer_size() {
        let cfg = CtrlConfig {
            write_buffer_size: 100,
            write_high_thresh_pct: 85,
            write_low_thresh_pct: 50,
            ..Default::default()
        };
        assert_eq!(cfg.write_high_threshold(), 85);
        assert_eq!(cfg.write_low_threshold(), 50);
    }

    #[test]
    fn configs_deserialize_from_toml_sections() {
        let table: toml::Table = toml::from_str(
            r#"
            [ctrl]
            read_buffer_size = 4
            sched_policy = "fcfs"
            write_alloc = "allocate"
            [dram]
            ranks = 1
            "#,
        )
        .unwrap();
        let ctrl = CtrlConfig::from_section(table.get("ctrl"));
        assert_eq!(ctrl.read_buffer_size, 4);
        assert_eq!(ctrl.sched_policy, SchedPolicy::Fcfs);
        assert_eq!(ctrl.write_alloc, WriteAllocPolicy::Allocate);
        let dram = DramConfig::from_section(table.get("dram"));
        assert_eq!(dram.ranks, 1);
    }
}
