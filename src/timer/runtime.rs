use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{Clock, Timer, TimerCallback, TimerError, TimerId};

struct Pending {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Tasks {
    next_generation: AtomicU64,
    pending: Mutex<HashMap<TimerId, Pending>>,
}

impl Tasks {
    fn pending(&self) -> MutexGuard<'_, HashMap<TimerId, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the entry for a task whose sleep finished; false if it was superseded
    fn claim(&self, id: TimerId, generation: u64) -> bool {
        let mut pending = self.pending();
        match pending.get(&id) {
            Some(entry) if entry.generation == generation => {
                pending.remove(&id);
                true
            }
            _ => false,
        }
    }
}

/// Production timer: one sleeping tokio task per pending entry
///
/// Deadlines are milliseconds since the timer was created. Rescheduling an id
/// aborts the previous task; a generation number stops a task that already woke
/// from firing after it was superseded.
pub struct TokioTimer {
    handle: Handle,
    origin: Instant,
    tasks: Arc<Tasks>,
}

impl TokioTimer {
    /// Create a timer that spawns onto the given runtime
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            origin: Instant::now(),
            tasks: Arc::new(Tasks::default()),
        }
    }

    /// Create a timer on the runtime of the calling context
    ///
    /// # Errors
    /// Returns [`TimerError::NoRuntime`] when called outside a tokio runtime
    pub fn current() -> Result<Self, TimerError> {
        let handle = Handle::try_current().map_err(|_| TimerError::NoRuntime)?;
        Ok(Self::new(handle))
    }

    /// Number of entries waiting to fire
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.pending().len()
    }
}

impl Timer for TokioTimer {
    fn schedule(
        &self,
        id: TimerId,
        deadline_ms: u64,
        callback: TimerCallback,
    ) -> Result<(), TimerError> {
        let generation = self.tasks.next_generation.fetch_add(1, Ordering::Relaxed);
        let wake_at = self.origin + Duration::from_millis(deadline_ms);
        let tasks = Arc::clone(&self.tasks);

        // Hold the map while spawning so a zero-length sleep cannot claim before insert
        let mut pending = self.tasks.pending();
        let task = self.handle.spawn(async move {
            tokio::time::sleep_until(wake_at).await;
            if tasks.claim(id, generation) {
                trace!(id = %id, deadline_ms, "timer firing");
                callback();
            }
        });

        if let Some(previous) = pending.insert(id, Pending { generation, task }) {
            previous.task.abort();
            trace!(id = %id, "replaced pending timer");
        }
        drop(pending);

        debug!(id = %id, deadline_ms, "timer scheduled");
        Ok(())
    }

    fn cancel(&self, id: TimerId) {
        if let Some(previous) = self.tasks.pending().remove(&id) {
            previous.task.abort();
            trace!(id = %id, "timer cancelled");
        }
    }

    fn now(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Clock for TokioTimer {
    fn now_ms(&self) -> u64 {
        Timer::now(self)
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        for (_, entry) in self.tasks.pending().drain() {
            entry.task.abort();
        }
    }
}
