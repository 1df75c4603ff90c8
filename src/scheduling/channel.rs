// Bounded multi-producer / multi-consumer channel with rendezvous support
//
// A channel of capacity 0 never buffers: a send only succeeds when a receiver
// is already parked on it. Receivers park a shared `Slot`, and one slot may be
// parked on several channels at once; whichever sender claims it first wins.
// Senders that cannot make progress wait on `changed()`, which fires whenever
// buffer space frees up or a receiver parks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::futures::Notified;
use tokio::sync::{oneshot, Notify};

use super::lock;

/// A parked receiver. Cloning shares the same underlying claim.
///
/// A slot built with [`Slot::counted`] bumps its counter the moment it takes
/// a value, while the channel lock is still held, so the value is never
/// invisible to a reader of the counter and the channel length.
pub(crate) struct Slot<T> {
    tx: Arc<Mutex<Option<oneshot::Sender<T>>>>,
    taken: Option<Arc<AtomicUsize>>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
            taken: self.taken.clone(),
        }
    }
}

impl<T> Slot<T> {
    /// Create a slot and the receiver its value will arrive on.
    pub(crate) fn new() -> (Self, oneshot::Receiver<T>) {
        Self::with_counter(None)
    }

    /// Like [`Slot::new`], but every value the slot takes increments `taken`.
    /// The receiver owns that increment from then on.
    pub(crate) fn counted(taken: &Arc<AtomicUsize>) -> (Self, oneshot::Receiver<T>) {
        Self::with_counter(Some(Arc::clone(taken)))
    }

    fn with_counter(taken: Option<Arc<AtomicUsize>>) -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
                taken,
            },
            rx,
        )
    }

    /// False once the slot has been claimed or its receiver has given up.
    fn is_live(&self) -> bool {
        lock(&self.tx).as_ref().is_some_and(|tx| !tx.is_closed())
    }

    fn count(&self) {
        if let Some(taken) = &self.taken {
            taken.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn uncount(&self) {
        if let Some(taken) = &self.taken {
            taken.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Claim the slot and hand `value` over. Returns the value if the slot
    /// was already claimed or its receiver is gone.
    fn deliver(&self, value: T) -> Result<(), T> {
        let claimed = lock(&self.tx).take();
        match claimed {
            Some(tx) => {
                self.count();
                tx.send(value).inspect_err(|_| self.uncount())
            }
            None => Err(value),
        }
    }
}

struct State<T> {
    buffer: VecDeque<T>,
    // Only non-empty while `buffer` is empty.
    parked: VecDeque<Slot<T>>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    capacity: usize,
    changed: Notify,
}

/// Cloneable handle to a channel; every clone is both a sender and a receiver.
pub(crate) struct Channel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Channel<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    buffer: VecDeque::with_capacity(capacity),
                    parked: VecDeque::new(),
                }),
                capacity,
                changed: Notify::new(),
            }),
        }
    }

    /// Number of buffered values. Always 0 for a rendezvous channel.
    pub(crate) fn len(&self) -> usize {
        lock(&self.shared.state).buffer.len()
    }

    /// Future that resolves the next time space frees up or a receiver parks.
    ///
    /// Call `enable()` on the pinned future *before* `try_send` so a wakeup
    /// between the failed attempt and the wait is not lost.
    pub(crate) fn changed(&self) -> Notified<'_> {
        self.shared.changed.notified()
    }

    /// Hand `value` to a parked receiver, or buffer it if there is room.
    pub(crate) fn try_send(&self, mut value: T) -> Result<(), T> {
        let mut state = lock(&self.shared.state);
        while let Some(slot) = state.parked.pop_front() {
            match slot.deliver(value) {
                Ok(()) => return Ok(()),
                Err(returned) => value = returned,
            }
        }
        if state.buffer.len() < self.shared.capacity {
            state.buffer.push_back(value);
            return Ok(());
        }
        Err(value)
    }

    /// Park `slot` so the next sender can hand a value straight to it.
    ///
    /// Only meaningful while the buffer is empty; buffered channels go
    /// through [`Channel::recv`] instead.
    pub(crate) fn park(&self, slot: &Slot<T>) {
        {
            let mut state = lock(&self.shared.state);
            debug_assert!(state.buffer.is_empty());
            state.parked.retain(Slot::is_live);
            state.parked.push_back(slot.clone());
        }
        self.shared.changed.notify_waiters();
    }

    /// Take the oldest buffered value, or park `slot` for the next sender.
    ///
    /// A value taken from the buffer is counted against `slot` exactly as a
    /// delivered one would be.
    pub(crate) fn take_or_park(&self, slot: &Slot<T>) -> Option<T> {
        let popped = {
            let mut state = lock(&self.shared.state);
            match state.buffer.pop_front() {
                Some(value) => {
                    slot.count();
                    Some(value)
                }
                None => {
                    state.parked.retain(Slot::is_live);
                    state.parked.push_back(slot.clone());
                    None
                }
            }
        };
        self.shared.changed.notify_waiters();
        popped
    }

    /// Take the oldest buffered value, or park and wait for a sender.
    ///
    /// Dropping the future after a sender delivered into the parked slot
    /// drops that value.
    #[cfg(test)]
    pub(crate) async fn recv(&self) -> Option<T> {
        let (slot, rx) = Slot::new();
        match self.take_or_park(&slot) {
            Some(value) => Some(value),
            None => rx.await.ok(),
        }
    }
}
