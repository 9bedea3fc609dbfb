/*
Deterministic two-event scheduler for the memory controller model.

The controller is a discrete-event state machine driven by exactly two
recurring events: the next-request (arbiter) event and the respond event.
Instead of sprinkling "is it already scheduled" checks through the model,
everything goes through one idempotent `ensure_scheduled` helper: asking for
an event that is already pending at an earlier-or-equal tick is a no-op,
asking for an earlier tick pulls the event forward.

Events that are pending at the same tick fire in a fixed order (Respond
before NextReq), so a ready response is always drained before the arbiter
looks at the queues again. This makes every run bit-reproducible.
*/

pub type Tick = u64;

pub const MAX_TICK: Tick = Tick::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Pop the response queue head once its ready time has been reached.
    Respond,
    /// Run the bus arbiter and issue the next burst if one is eligible.
    NextReq,
}

impl Event {
    fn index(self) -> usize {
        match self {
            Event::Respond => 0,
            Event::NextReq => 1,
        }
    }

    fn from_index(idx: usize) -> Self {
        match idx {
            0 => Event::Respond,
            1 => Event::NextReq,
            _ => unreachable!("bad event index"),
        }
    }
}

#[derive(Debug, Default)]
pub struct EventQueue {
    // one pending tick per event kind; index = Event::index()
    pending: [Option<Tick>; 2],
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `event` at `tick` unless it is already pending no later than
    /// that. Returns true if the pending tick changed.
    pub fn ensure_scheduled(&mut self, event: Event, tick: Tick) -> bool {
        let slot = &mut self.pending[event.index()];
        match *slot {
            Some(at) if at <= tick => false,
            _ => {
                *slot = Some(tick);
                true
            }
        }
    }

    pub fn is_scheduled(&self, event: Event) -> bool {
        self.pending[event.index()].is_some()
    }

    pub fn scheduled_at(&self, event: Event) -> Option<Tick> {
        self.pending[event.index()]
    }

    pub fn cancel(&mut self, event: Event) {
        self.pending[event.index()] = None;
    }

    /// Earliest pending tick across all events, if any.
    pub fn next_tick(&self) -> Option<Tick> {
        self.pending.iter().flatten().copied().min()
    }

    /// Take the next due event. Ties at the same tick fire in kind order,
    /// which puts Respond ahead of NextReq.
    pub fn pop_next(&mut self) -> Option<(Tick, Event)> {
        let tick = self.next_tick()?;
        for idx in 0..self.pending.len() {
            if self.pending[idx] == Some(tick) {
                self.pending[idx] = None;
                return Some((tick, Event::from_index(idx)));
            }
        }
        unreachable!("next_tick reported a tick with no pending event");
    }

    pub fn is_idle(&self) -> bool {
        self.pending.iter().all(|slot| slot.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::{Event, EventQueue};

    #[test]
    fn ensure_scheduled_is_idempotent() {
        let mut q = EventQueue::new();
        assert!(q.ensure_scheduled(Event::NextReq, 10));
        assert!(!q.ensure_scheduled(Event::NextReq, 10));
        assert!(!q.ensure_scheduled(Event::NextReq, 20));
        assert_eq!(q.scheduled_at(Event::NextReq), Some(10));
    }

    #[test]
    fn ensure_scheduled_pulls_event_earlier() {
        let mut q = EventQueue::new();
        assert!(q.ensure_scheduled(Event::Respond, 50));
        assert!(q.ensure_scheduled(Event::Respond, 30));
        assert_eq!(q.scheduled_at(Event::Respond), Some(30));
    }

    #[test]
    fn respond_fires_before_next_req_at_same_tick() {
        let mut q = EventQueue::new();
        let _ = q.ensure_scheduled(Event::NextReq, 5);
        let _ = q.ensure_scheduled(Event::Respond, 5);
        assert_eq!(q.pop_next(), Some((5, Event::Respond)));
        assert_eq!(q.pop_next(), Some((5, Event::NextReq)));
        assert!(q.is_idle());
    }

    #[test]
    fn pop_next_returns_earliest_tick() {
        let mut q = EventQueue::new();
        let _ = q.ensure_scheduled(Event::NextReq, 7);
        let _ = q.ensure_scheduled(Event::Respond, 3);
        assert_eq!(q.pop_next(), Some((3, Event::Respond)));
        assert_eq!(q.pop_next(), Some((7, Event::NextReq)));
    }
}
