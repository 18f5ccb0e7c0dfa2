//! Run-queue of fibers that can continue without an OS wait
//!
//! Scheduler-thread only, so a plain `VecDeque` behind the scheduler's
//! `RefCell` is enough. Producers always push at the back; the configured
//! order decides which end `pop` takes from.

use std::collections::VecDeque;

use ff_core::FiberId;

use crate::config::RunQueueOrder;

#[derive(Debug)]
pub struct RunQueue {
    order: RunQueueOrder,
    items: VecDeque<FiberId>,
}

impl RunQueue {
    pub fn new(order: RunQueueOrder) -> Self {
        Self {
            order,
            items: VecDeque::with_capacity(64),
        }
    }

    #[inline]
    pub fn push(&mut self, id: FiberId) {
        self.items.push_back(id);
    }

    #[inline]
    pub fn pop(&mut self) -> Option<FiberId> {
        match self.order {
            RunQueueOrder::Fifo => self.items.pop_front(),
            RunQueueOrder::Lifo => self.items.pop_back(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn order(&self) -> RunQueueOrder {
        self.order
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(q: &mut RunQueue) -> Vec<u32> {
        std::iter::from_fn(|| q.pop()).map(|id| id.slot() as u32).collect()
    }

    #[test]
    fn test_fifo_and_lifo() {
        let mut fifo = RunQueue::new(RunQueueOrder::Fifo);
        let mut lifo = RunQueue::new(RunQueueOrder::Lifo);
        for n in 1..=3 {
            fifo.push(FiberId::new(n, 0));
            lifo.push(FiberId::new(n, 0));
        }
        assert_eq!(fifo.len(), 3);
        assert_eq!(drain(&mut fifo), vec![1, 2, 3]);
        assert_eq!(drain(&mut lifo), vec![3, 2, 1]);
        assert!(fifo.is_empty());
    }
}
