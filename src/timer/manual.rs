use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

use super::{Clock, Timer, TimerCallback, TimerError, TimerId};

/// Queue position: deadline first, then insertion order
type Slot = (u64, u64);

struct Entry {
    id: TimerId,
    callback: TimerCallback,
}

#[derive(Default)]
struct Queue {
    now: u64,
    seq: u64,
    entries: BTreeMap<Slot, Entry>,
    slots: HashMap<TimerId, Slot>,
}

impl Queue {
    fn remove(&mut self, id: TimerId) -> bool {
        self.slots
            .remove(&id)
            .and_then(|slot| self.entries.remove(&slot))
            .is_some()
    }

    fn pop_due(&mut self, until: u64) -> Option<(u64, Entry)> {
        let (&slot, _) = self.entries.first_key_value()?;
        if slot.0 > until {
            return None;
        }
        let entry = self.entries.remove(&slot)?;
        self.slots.remove(&entry.id);
        Some((slot.0, entry))
    }
}

/// Deterministic scheduler driven by explicit calls to [`VirtualTimer::advance_to`]
///
/// Virtual time starts at 0 and only moves when advanced. Due callbacks run in
/// deadline order, ties in insertion order, with `now` set to the callback's
/// deadline while it runs.
#[derive(Default)]
pub struct VirtualTimer {
    queue: Mutex<Queue>,
}

impl VirtualTimer {
    /// Create a timer at virtual time 0
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move virtual time forward to `t_ms`, running every callback due by then
    ///
    /// Returns the number of callbacks run. Moving backwards is ignored.
    pub fn advance_to(&self, t_ms: u64) -> usize {
        let mut fired = 0;
        loop {
            // Lock is released before each callback so it can reschedule
            let due = {
                let mut queue = self.queue();
                let due = queue.pop_due(t_ms);
                if let Some((deadline, _)) = &due {
                    queue.now = queue.now.max(*deadline);
                }
                due
            };
            let Some((deadline, entry)) = due else {
                break;
            };
            trace!(id = %entry.id, deadline_ms = deadline, "virtual timer firing");
            (entry.callback)();
            fired += 1;
        }

        let mut queue = self.queue();
        queue.now = queue.now.max(t_ms);
        fired
    }

    /// Move virtual time forward by `delta_ms`
    pub fn advance_by(&self, delta_ms: u64) -> usize {
        let target = self.now().saturating_add(delta_ms);
        self.advance_to(target)
    }

    /// Number of entries waiting to fire
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue().entries.len()
    }

    /// Deadline of the pending entry for `id`, if any
    #[must_use]
    pub fn deadline_of(&self, id: TimerId) -> Option<u64> {
        self.queue().slots.get(&id).map(|slot| slot.0)
    }
}

impl Timer for VirtualTimer {
    fn schedule(
        &self,
        id: TimerId,
        deadline_ms: u64,
        callback: TimerCallback,
    ) -> Result<(), TimerError> {
        let mut queue = self.queue();
        queue.remove(id);
        let slot = (deadline_ms, queue.seq);
        queue.seq += 1;
        queue.entries.insert(slot, Entry { id, callback });
        queue.slots.insert(id, slot);
        trace!(id = %id, deadline_ms, "virtual timer scheduled");
        Ok(())
    }

    fn cancel(&self, id: TimerId) {
        if self.queue().remove(id) {
            trace!(id = %id, "virtual timer cancelled");
        }
    }

    fn now(&self) -> u64 {
        self.queue().now
    }
}

impl Clock for VirtualTimer {
    fn now_ms(&self) -> u64 {
        Timer::now(self)
    }
}
