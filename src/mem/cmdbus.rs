use std::collections::BTreeMap;

use log::trace;

use crate::sim::event::Tick;

/// Shared command-bus contention tracker. Every issued device command
/// reserves a slot in a fixed-size window; a window that is full pushes the
/// command out to the next one. Reservations older than "now" are pruned
/// lazily before each burst.
#[derive(Debug)]
pub struct CommandBus {
    window: Tick,
    max_cmds_per_window: u32,
    // reservation count per window-aligned tick
    slots: BTreeMap<Tick, u32>,
}

impl CommandBus {
    pub fn new(window: Tick, max_cmds_per_window: u32) -> Self {
        assert!(window > 0 && max_cmds_per_window > 0);
        Self {
            window,
            max_cmds_per_window,
            slots: BTreeMap::new(),
        }
    }

    fn window_of(&self, tick: Tick) -> Tick {
        tick - tick % self.window
    }

    fn count(&self, window_tick: Tick) -> u32 {
        self.slots.get(&window_tick).copied().unwrap_or(0)
    }

    fn reserve(&mut self, window_tick: Tick) {
        *self.slots.entry(window_tick).or_insert(0) += 1;
    }

    /// Drop reservations in windows that ended before `now`.
    pub fn prune(&mut self, now: Tick) {
        let keep_from = self.window_of(now);
        let stale: Vec<Tick> = self.slots.range(..keep_from).map(|(t, _)| *t).collect();
        for tick in stale {
            trace!("cmdbus: pruning window {}", tick);
            let _ = self.slots.remove(&tick);
        }
    }

    /// Find the earliest tick at or after `cmd_tick` where one command fits,
    /// reserve it, and return the (possibly pushed-out) issue tick.
    pub fn verify_single_cmd(&mut self, cmd_tick: Tick) -> Tick {
        let mut cmd_at = cmd_tick;
        let mut window_tick = self.window_of(cmd_tick);
        while self.count(window_tick) >= self.max_cmds_per_window {
            trace!("cmdbus: contention at window {}", window_tick);
            window_tick += self.window;
            cmd_at = window_tick;
        }
        self.reserve(window_tick);
        cmd_at
    }

    /// Reserve a paired command (e.g. activate + read) where the second part
    /// nominally issues at `cmd_tick` and the first must land no more than
    /// `max_split` ticks before it. Returns the issue tick of the second
    /// command.
    pub fn verify_multi_cmd(&mut self, cmd_tick: Tick, max_split: Tick) -> Tick {
        let mut cmd_at = cmd_tick;
        let mut second_tick = self.window_of(cmd_tick);

        // earliest window for the first command, bounded by the split limit
        let mut offset = 0;
        let first_offset = cmd_tick % self.window;
        while max_split > first_offset + offset {
            offset += self.window;
        }
        let mut first_tick = second_tick - offset.min(second_tick);

        loop {
            let same_window = second_tick == first_tick;
            let first_count = self.count(first_tick);
            let second_count = if same_window {
                first_count + 1
            } else {
                self.count(second_tick)
            };

            let first_fits = first_count < self.max_cmds_per_window;
            let second_fits = second_count < self.max_cmds_per_window;
            if first_fits && second_fits {
                break;
            }

            if !second_fits {
                trace!("cmdbus: contention (cmd2) at window {}", second_tick);
                second_tick += self.window;
                cmd_at = second_tick;
            }

            // keep the split constraint when the second command moved
            let gap_violated = !same_window && second_tick - first_tick > max_split;
            if !first_fits || (!second_fits && gap_violated) {
                trace!("cmdbus: contention (cmd1) at window {}", first_tick);
                first_tick += self.window;
            }
        }

        self.reserve(second_tick);
        self.reserve(first_tick);
        cmd_at
    }
}

#[cfg(test)]
mod tests {
    use super::CommandBus;

    #[test]
    fn single_cmd_uncontended_issues_in_place() {
        let mut bus = CommandBus::new(10, 2);
        assert_eq!(bus.verify_single_cmd(23), 23);
        assert_eq!(bus.verify_single_cmd(24), 24);
    }

    #[test]
    fn single_cmd_overflows_to_next_window() {
        let mut bus = CommandBus::new(10, 1);
        assert_eq!(bus.verify_single_cmd(23), 23);
        // window [20,30) is full, so the next command lands at 30
        assert_eq!(bus.verify_single_cmd(25), 30);
        assert_eq!(bus.verify_single_cmd(26), 40);
    }

    #[test]
    fn prune_frees_old_windows() {
        let mut bus = CommandBus::new(10, 1);
        assert_eq!(bus.verify_single_cmd(5), 5);
        bus.prune(20);
        assert_eq!(bus.verify_single_cmd(7), 7);
    }

    #[test]
    fn multi_cmd_reserves_a_slot_in_each_window() {
        let mut bus = CommandBus::new(10, 2);
        assert_eq!(bus.verify_multi_cmd(25, 15), 25);
        // the split put the first command in [10,20) and the second in
        // [20,30), so one slot remains free in each
        assert_eq!(bus.verify_single_cmd(25), 25);
        assert_eq!(bus.verify_single_cmd(26), 30);
        assert_eq!(bus.verify_single_cmd(13), 13);
        assert_eq!(bus.verify_single_cmd(14), 30);
    }

    #[test]
    fn multi_cmd_pushes_out_when_second_window_full() {
        let mut bus = CommandBus::new(10, 1);
        assert_eq!(bus.verify_single_cmd(22), 22);
        let at = bus.verify_multi_cmd(25, 15);
        assert!(at >= 30, "second command pushed past full window, got {}", at);
    }
}
