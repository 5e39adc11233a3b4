//! Cooperative single-threaded scheduler. One logical scheduler owns every
//! timed job a client instance runs — registration ticks, download
//! reconnects, observe notifications, retransmissions, receive timeouts —
//! and `tick` is the only place any of them actually execute.
//!
//! There is no worker pool: a [`Scheduler`] is driven by whatever owns the
//! client's event loop calling `tick` with the current time, and jobs
//! queued from inside a running job (the "callback calls back into the
//! client" case) land on the same queue rather than running re-entrantly —
//! they simply borrow `&mut Scheduler` to do so, which is what keeps this
//! re-entrancy bracket a borrow-checker property instead of a runtime lock.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const INTERRUPT: u8 = 2;

pub type Job = Box<dyn FnOnce(&mut Scheduler) + Send>;

struct ScheduledJob {
    at: Instant,
    seq: u64,
    job: Job,
}

impl PartialEq for ScheduledJob {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}
impl Eq for ScheduledJob {}

// `BinaryHeap` is a max-heap; reversing the comparison makes the earliest
// `at` (and, on a tie, the earliest `seq`) pop first.
impl Ord for ScheduledJob {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.at.cmp(&self.at).then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for ScheduledJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// A cooperative stop signal that can be handed to another thread or a
/// signal handler without giving it access to the job queue itself.
#[derive(Clone)]
pub struct SchedulerHandle(Arc<AtomicU8>);

impl SchedulerHandle {
    /// Requests that the scheduler stop after its current job, if any, and
    /// before starting the next one. A no-op if the scheduler is already
    /// idle — there is nothing running to interrupt.
    pub fn interrupt(&self) {
        let _ = self
            .0
            .compare_exchange(RUNNING, INTERRUPT, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst) == RUNNING
    }
}

pub struct Scheduler {
    queue: BinaryHeap<ScheduledJob>,
    next_seq: u64,
    state: Arc<AtomicU8>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            queue: BinaryHeap::new(),
            next_seq: 0,
            state: Arc::new(AtomicU8::new(IDLE)),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle(self.state.clone())
    }

    pub fn schedule_at(&mut self, at: Instant, job: Job) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(ScheduledJob { at, seq, job });
    }

    pub fn schedule_in(&mut self, delay: Duration, job: Job) {
        self.schedule_at(Instant::now() + delay, job);
    }

    pub fn schedule_now(&mut self, job: Job) {
        self.schedule_at(Instant::now(), job);
    }

    pub fn cancel_all(&mut self) {
        self.queue.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.queue.peek().map(|j| j.at)
    }

    /// Runs every job whose scheduled time has passed, in time order,
    /// stopping early if a job calls [`SchedulerHandle::interrupt`] on a
    /// handle it was given. Returns how many jobs ran.
    pub fn tick(&mut self, now: Instant) -> usize {
        if self.state.load(Ordering::SeqCst) == INTERRUPT {
            self.state.store(IDLE, Ordering::SeqCst);
            return 0;
        }
        self.state.store(RUNNING, Ordering::SeqCst);
        let mut ran = 0;
        while let Some(next_at) = self.queue.peek().map(|j| j.at) {
            if next_at > now {
                break;
            }
            let scheduled = self.queue.pop().expect("peeked above");
            (scheduled.job)(self);
            ran += 1;
            if self.state.load(Ordering::SeqCst) == INTERRUPT {
                break;
            }
        }
        self.state.store(IDLE, Ordering::SeqCst);
        ran
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn jobs_run_in_time_order_regardless_of_schedule_order() {
        let mut scheduler = Scheduler::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let base = Instant::now();

        let o2 = order.clone();
        scheduler.schedule_at(base + Duration::from_millis(20), Box::new(move |_| o2.lock().unwrap().push(2)));
        let o1 = order.clone();
        scheduler.schedule_at(base + Duration::from_millis(10), Box::new(move |_| o1.lock().unwrap().push(1)));
        let o3 = order.clone();
        scheduler.schedule_at(base + Duration::from_millis(30), Box::new(move |_| o3.lock().unwrap().push(3)));

        let ran = scheduler.tick(base + Duration::from_millis(25));
        assert_eq!(ran, 2);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
        assert_eq!(scheduler.pending_count(), 1);
    }

    #[test]
    fn a_job_can_reschedule_itself() {
        let mut scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let base = Instant::now();

        fn requeue(scheduler: &mut Scheduler, count: Arc<AtomicUsize>, base: Instant) {
            let n = count.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                let count = count.clone();
                scheduler.schedule_at(base, Box::new(move |s| requeue(s, count, base)));
            }
        }
        let count0 = count.clone();
        scheduler.schedule_at(base, Box::new(move |s| requeue(s, count0, base)));

        scheduler.tick(base);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn interrupt_stops_before_the_next_job() {
        let mut scheduler = Scheduler::new();
        let handle = scheduler.handle();
        let ran = Arc::new(AtomicUsize::new(0));
        let base = Instant::now();

        let ran1 = ran.clone();
        let handle1 = handle.clone();
        scheduler.schedule_at(
            base,
            Box::new(move |_| {
                ran1.fetch_add(1, Ordering::SeqCst);
                handle1.interrupt();
            }),
        );
        let ran2 = ran.clone();
        scheduler.schedule_at(base, Box::new(move |_| { ran2.fetch_add(1, Ordering::SeqCst); }));

        let processed = scheduler.tick(base);
        assert_eq!(processed, 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_count(), 1);
    }

    #[test]
    fn cancel_all_clears_the_queue() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_now(Box::new(|_| {}));
        scheduler.schedule_now(Box::new(|_| {}));
        scheduler.cancel_all();
        assert_eq!(scheduler.pending_count(), 0);
    }
}
