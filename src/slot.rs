//! One-shot rendezvous between a caller and a single idle worker.
//!
//! A worker creates a fresh [`RequestSlot`] per iteration and offers it on the
//! pool's availability channel. Whoever receives it owns the handoff until it
//! is released, explicitly or on drop.

use super::{
    errors::PoolError,
    model::JobResult,
    task::{Job, NonBlockingRunner},
};
use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotPhase {
    Created = 0,
    Offered = 1,
    Claimed = 2,
    TaskDelivered = 3,
    ResultDelivered = 4,
    ResultDropped = 5,
    Abandoned = 6,
    Released = 7,
}

impl SlotPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SlotPhase::Created,
            1 => SlotPhase::Offered,
            2 => SlotPhase::Claimed,
            3 => SlotPhase::TaskDelivered,
            4 => SlotPhase::ResultDelivered,
            5 => SlotPhase::ResultDropped,
            6 => SlotPhase::Abandoned,
            _ => SlotPhase::Released,
        }
    }
}

#[derive(Debug)]
struct SlotState {
    phase: AtomicU8,
}

impl SlotState {
    #[inline]
    fn phase(&self) -> SlotPhase {
        SlotPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    #[inline]
    fn transition(&self, from: SlotPhase, to: SlotPhase) -> bool {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `Released` is terminal. Returns `true` only for the first release.
    #[inline]
    fn release(&self) -> bool {
        self.phase.swap(SlotPhase::Released as u8, Ordering::AcqRel) != SlotPhase::Released as u8
    }

    #[inline]
    fn is_released(&self) -> bool {
        self.phase() == SlotPhase::Released
    }
}

/// Caller side of a worker's offer.
pub struct RequestSlot<T: Send + 'static> {
    worker: usize,
    state: Arc<SlotState>,
    task_tx: Option<oneshot::Sender<Job<T>>>,
    result_rx: Option<oneshot::Receiver<JobResult<T>>>,
}

/// Worker side of the same offer.
pub(crate) struct WorkerEnd<T: Send + 'static> {
    state: Arc<SlotState>,
    task_rx: oneshot::Receiver<Job<T>>,
    result_tx: oneshot::Sender<JobResult<T>>,
}

pub(crate) fn request_slot<T: Send + 'static>(worker: usize) -> (RequestSlot<T>, WorkerEnd<T>) {
    let state = Arc::new(SlotState {
        phase: AtomicU8::new(SlotPhase::Created as u8),
    });
    let (task_tx, task_rx) = oneshot::channel();
    let (result_tx, result_rx) = oneshot::channel();

    let slot = RequestSlot {
        worker,
        state: Arc::clone(&state),
        task_tx: Some(task_tx),
        result_rx: Some(result_rx),
    };
    let end = WorkerEnd {
        state,
        task_rx,
        result_tx,
    };
    (slot, end)
}

impl<T: Send + 'static> RequestSlot<T> {
    /// Id of the worker that created this slot.
    #[inline]
    pub fn worker(&self) -> usize {
        self.worker
    }

    #[inline]
    pub fn phase(&self) -> SlotPhase {
        self.state.phase()
    }

    #[inline]
    pub fn is_released(&self) -> bool {
        self.state.is_released()
    }

    pub(crate) fn mark_offered(&self) {
        self.state.transition(SlotPhase::Created, SlotPhase::Offered);
    }

    /// Fails when the worker already gave up on this offer.
    pub(crate) fn claim(&self) -> bool {
        self.state.transition(SlotPhase::Offered, SlotPhase::Claimed)
    }

    /// Hands the task to the worker. Never blocks: the worker is already
    /// waiting on the other end.
    pub fn send<R: NonBlockingRunner<T>>(&mut self, task: R) -> Result<(), PoolError> {
        self.send_boxed(Box::new(task))
    }

    pub fn send_boxed(&mut self, task: Job<T>) -> Result<(), PoolError> {
        if self.state.is_released() {
            return Err(PoolError::SlotReleased);
        }
        let tx = self.task_tx.take().ok_or(PoolError::SlotReleased)?;
        tx.send(task).map_err(|_| PoolError::Closed)
    }

    /// Waits for the worker's result. Wrap in a timeout to bound task latency;
    /// a timed-out call can be retried or followed by [`RequestSlot::release`].
    pub async fn recv(&mut self) -> Result<JobResult<T>, PoolError> {
        if self.state.is_released() {
            return Err(PoolError::SlotReleased);
        }
        let rx = self.result_rx.as_mut().ok_or(PoolError::SlotReleased)?;
        let result = rx.await.map_err(|_| PoolError::Closed);
        self.result_rx = None;
        result
    }

    /// Closes both handoffs. Idempotent, and safe against a worker delivering
    /// at the same moment: that delivery becomes a no-op.
    pub fn release(&mut self) {
        if self.state.release() {
            tracing::trace!(worker = self.worker, "request slot released");
        }
        self.task_tx = None;
        self.result_rx = None;
    }
}

impl<T: Send + 'static> Drop for RequestSlot<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: Send + 'static> WorkerEnd<T> {
    #[inline]
    pub(crate) fn task(&mut self) -> &mut oneshot::Receiver<Job<T>> {
        &mut self.task_rx
    }

    /// Withdraws an offer nobody claimed. Returns `false` if a caller got
    /// there first.
    pub(crate) fn abandon(&self) -> bool {
        self.state.transition(SlotPhase::Offered, SlotPhase::Abandoned)
    }

    pub(crate) fn accepted(&self) {
        self.state.transition(SlotPhase::Claimed, SlotPhase::TaskDelivered);
    }

    pub(crate) fn deliver(self, result: JobResult<T>) -> Result<(), PoolError> {
        if self.state.is_released() {
            return Err(PoolError::SlotReleased);
        }
        match self.result_tx.send(result) {
            Ok(()) => {
                self.state
                    .transition(SlotPhase::TaskDelivered, SlotPhase::ResultDelivered);
                Ok(())
            }
            Err(_) => {
                self.state
                    .transition(SlotPhase::TaskDelivered, SlotPhase::ResultDropped);
                Err(PoolError::SlotReleased)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct Answer;

    #[async_trait]
    impl NonBlockingRunner<u32> for Answer {
        async fn job(&self, _cancel: CancellationToken) -> JobResult<u32> {
            Ok(42)
        }
    }

    #[tokio::test]
    async fn slot_walks_through_phases() {
        let (mut slot, mut end) = request_slot::<u32>(3);
        assert_eq!(slot.phase(), SlotPhase::Created);
        assert_eq!(slot.worker(), 3);

        slot.mark_offered();
        assert_eq!(slot.phase(), SlotPhase::Offered);
        assert!(slot.claim());
        assert!(!slot.claim());
        assert!(!end.abandon());

        slot.send(Answer).unwrap();
        let task = end.task().await.unwrap();
        end.accepted();
        assert_eq!(slot.phase(), SlotPhase::TaskDelivered);

        let result = task.job(CancellationToken::new()).await;
        end.deliver(result).unwrap();
        assert_eq!(slot.phase(), SlotPhase::ResultDelivered);

        assert_eq!(slot.recv().await.unwrap().unwrap(), 42);
        slot.release();
        assert_eq!(slot.phase(), SlotPhase::Released);
    }

    #[tokio::test]
    async fn delivery_after_release_is_a_no_op() {
        let (mut slot, mut end) = request_slot::<u32>(0);
        slot.mark_offered();
        assert!(slot.claim());
        slot.send(Answer).unwrap();
        let _task = end.task().await.unwrap();
        end.accepted();

        slot.release();
        slot.release();
        assert!(slot.is_released());

        assert_eq!(end.deliver(Ok(7)), Err(PoolError::SlotReleased));
        assert_eq!(slot.phase(), SlotPhase::Released);
    }

    #[tokio::test]
    async fn send_after_release_is_rejected() {
        let (mut slot, _end) = request_slot::<u32>(0);
        slot.release();
        assert_eq!(slot.send(Answer), Err(PoolError::SlotReleased));
        assert!(matches!(slot.recv().await, Err(PoolError::SlotReleased)));
    }

    #[tokio::test]
    async fn dropped_slot_wakes_waiting_worker() {
        let (slot, mut end) = request_slot::<u32>(0);
        slot.mark_offered();
        assert!(slot.claim());
        drop(slot);
        assert!(end.task().await.is_err());
    }

    #[test]
    fn unclaimed_offer_can_be_abandoned() {
        let (slot, end) = request_slot::<u32>(0);
        slot.mark_offered();
        assert!(end.abandon());
        assert!(!slot.claim());
        assert_eq!(slot.phase(), SlotPhase::Abandoned);
    }
}
