//! Timer queue for the orchestration thread.
//!
//! Time is whatever the host says it is: the orchestrator calls
//! [`Timers::advance`] with the current time in milliseconds and every timer
//! due by then fires, earliest first. Nothing here sleeps or blocks.

use alloc::collections::BinaryHeap;
use alloc::rc::Rc;
use core::cell::RefCell;
use core::cmp::Ordering;

use hashbrown::{HashMap, HashSet};

use crate::description::NodeId;

/// Identifies a scheduled timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

type Callback = Box<dyn FnOnce(f64)>;

struct Due {
    at: f64,
    id: u64,
}

impl PartialEq for Due {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Due {}

impl PartialOrd for Due {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed: BinaryHeap is a max-heap, we want the earliest (then oldest) first.
impl Ord for Due {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .total_cmp(&self.at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

struct Pending {
    owner: Option<NodeId>,
    callback: Callback,
}

#[derive(Default)]
struct Queue {
    now: f64,
    next_id: u64,
    heap: BinaryHeap<Due>,
    pending: HashMap<u64, Pending>,
}

/// Heap entries tolerated beyond twice the live timer count.
const COMPACT_SLACK: usize = 64;

impl Queue {
    /// Drop heap entries of cancelled timers once they dominate the heap.
    fn compact(&mut self) {
        if self.heap.len() > 2 * self.pending.len() + COMPACT_SLACK {
            let pending = &self.pending;
            self.heap.retain(|d| pending.contains_key(&d.id));
        }
    }
}

/// Shared timer queue. Clones share state.
#[derive(Clone, Default)]
pub struct Timers {
    queue: Rc<RefCell<Queue>>,
}

impl Timers {
    /// An empty queue at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// The time of the last `advance`, or of the timer currently firing.
    pub fn now(&self) -> f64 {
        self.queue.borrow().now
    }

    /// Run `callback` at absolute time `at` (ms). Past times fire on the next
    /// `advance`.
    pub fn schedule_at(&self, at: f64, owner: Option<&NodeId>, callback: impl FnOnce(f64) + 'static) -> TimerId {
        let mut q = self.queue.borrow_mut();
        let id = q.next_id;
        q.next_id += 1;
        q.heap.push(Due { at, id });
        q.pending.insert(
            id,
            Pending {
                owner: owner.cloned(),
                callback: Box::new(callback),
            },
        );
        TimerId(id)
    }

    /// Run `callback` `delay` ms from now.
    pub fn schedule_in(&self, delay: f64, owner: Option<&NodeId>, callback: impl FnOnce(f64) + 'static) -> TimerId {
        let at = self.now() + delay.max(0.0);
        self.schedule_at(at, owner, callback)
    }

    /// Cancel a timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&self, id: TimerId) -> bool {
        let mut q = self.queue.borrow_mut();
        let removed = q.pending.remove(&id.0).is_some();
        q.compact();
        removed
    }

    /// Cancel every timer scheduled on behalf of `owner`.
    pub fn cancel_owner(&self, owner: &NodeId) -> usize {
        let mut q = self.queue.borrow_mut();
        let before = q.pending.len();
        q.pending.retain(|_, p| p.owner.as_ref() != Some(owner));
        q.compact();
        before - q.pending.len()
    }

    /// Cancel everything.
    pub fn clear(&self) {
        let mut q = self.queue.borrow_mut();
        q.pending.clear();
        q.heap.clear();
    }

    /// Number of timers still waiting to fire.
    pub fn pending(&self) -> usize {
        self.queue.borrow().pending.len()
    }

    /// Number of timers waiting on behalf of `owner`.
    pub fn pending_for(&self, owner: &NodeId) -> usize {
        self.queue
            .borrow()
            .pending
            .values()
            .filter(|p| p.owner.as_ref() == Some(owner))
            .count()
    }

    /// Fire every timer due at or before `to`, in time order.
    ///
    /// Callbacks may schedule further timers; those fire in the same call if
    /// they are due. Returns the number of callbacks run.
    pub fn advance(&self, to: f64) -> usize {
        let mut fired = 0;
        loop {
            let next = {
                let mut guard = self.queue.borrow_mut();
                let q = &mut *guard;
                // Drop heap entries whose timers were cancelled.
                while q.heap.peek().is_some_and(|d| !q.pending.contains_key(&d.id)) {
                    q.heap.pop();
                }
                let ready = q.heap.peek().is_some_and(|d| d.at <= to);
                match q.heap.pop() {
                    Some(Due { at, id }) if ready => {
                        q.now = q.now.max(at);
                        q.pending.remove(&id).map(|p| (at, p.callback))
                    }
                    Some(due) => {
                        q.heap.push(due);
                        None
                    }
                    None => None,
                }
            };
            match next {
                Some((at, callback)) => {
                    callback(at);
                    fired += 1;
                }
                None => break,
            }
        }
        let mut q = self.queue.borrow_mut();
        q.now = q.now.max(to);
        fired
    }

    /// Owners with at least one pending timer.
    pub fn owners(&self) -> HashSet<NodeId> {
        self.queue
            .borrow()
            .pending
            .values()
            .filter_map(|p| p.owner.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_timers_do_not_pile_up() {
        let timers = Timers::new();
        let live = timers.schedule_at(1.0e9, None, |_| {});
        for i in 0..10_000 {
            let id = timers.schedule_at(1.0e6 + i as f64, None, |_| {});
            assert!(timers.cancel(id));
        }
        assert_eq!(timers.pending(), 1);
        assert!(timers.queue.borrow().heap.len() <= 2 + COMPACT_SLACK);

        let owner = NodeId::new("clk").unwrap();
        for i in 0..1_000 {
            timers.schedule_at(5.0e5 + i as f64, Some(&owner), |_| {});
        }
        assert_eq!(timers.cancel_owner(&owner), 1_000);
        assert!(timers.queue.borrow().heap.len() <= 2 + COMPACT_SLACK);

        assert!(timers.cancel(live));
        assert_eq!(timers.advance(2.0e9), 0);
    }

    #[test]
    fn fires_in_time_order() {
        let timers = Timers::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for at in [30.0, 10.0, 20.0] {
            let log = log.clone();
            timers.schedule_at(at, None, move |t| log.borrow_mut().push(t));
        }
        assert_eq!(timers.advance(25.0), 2);
        assert_eq!(*log.borrow(), vec![10.0, 20.0]);
        assert_eq!(timers.now(), 25.0);
        timers.advance(100.0);
        assert_eq!(*log.borrow(), vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn cancelled_and_owned_timers_never_fire() {
        let timers = Timers::new();
        let node = NodeId::new("clock").unwrap();
        let hit = Rc::new(RefCell::new(0));
        let h = hit.clone();
        let a = timers.schedule_at(5.0, None, move |_| *h.borrow_mut() += 1);
        let h = hit.clone();
        timers.schedule_at(6.0, Some(&node), move |_| *h.borrow_mut() += 1);
        assert!(timers.cancel(a));
        assert_eq!(timers.cancel_owner(&node), 1);
        assert_eq!(timers.advance(10.0), 0);
        assert_eq!(*hit.borrow(), 0);
    }

    #[test]
    fn callbacks_can_reschedule() {
        let timers = Timers::new();
        let count = Rc::new(RefCell::new(0));
        fn tick(timers: Timers, count: Rc<RefCell<u32>>, at: f64) {
            *count.borrow_mut() += 1;
            let t = timers.clone();
            timers.schedule_at(at + 10.0, None, move |next| tick(t, count, next));
        }
        let t = timers.clone();
        let c = count.clone();
        timers.schedule_at(0.0, None, move |at| tick(t, c, at));
        timers.advance(95.0);
        assert_eq!(*count.borrow(), 10);
        assert_eq!(timers.pending(), 1);
    }
}
