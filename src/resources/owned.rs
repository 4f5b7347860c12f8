//! Deferred destruction of device objects.
//!
//! The CPU records up to `frames_in_flight` frames ahead of the GPU, so an
//! object dropped on the CPU may still be referenced by submitted work.
//! Dropping an [`Owned`] handle only queues the object; it is destroyed once
//! the frame that queued it has been retired by its fence.
//!
//! ```text
//! drop(Owned<H>)        -> queue[current % N].push(H)
//! frame begin (fence ok) -> advance_frame() drains queue[(current + 1) % N]
//! flush (device idle)    -> flush_all() drains every queue
//! ```

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::traits::AnyHandle;

/// Per-frame queues of handles waiting for the GPU to let go of them.
pub struct DeferredDestructor {
    frame_queues: Vec<Mutex<Vec<AnyHandle>>>,
    current_frame: AtomicUsize,
}

impl fmt::Debug for DeferredDestructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredDestructor")
            .field("current_frame", &self.current_frame.load(Ordering::Relaxed))
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

impl DeferredDestructor {
    /// Create a destructor holding objects for `frames_in_flight` frames.
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frame_queues: (0..frames_in_flight.max(1))
                .map(|_| Mutex::new(Vec::new()))
                .collect(),
            current_frame: AtomicUsize::new(0),
        }
    }

    /// Queue a handle for destruction once the current frame retires.
    pub fn queue(&self, handle: AnyHandle) {
        let frame = self.current_frame.load(Ordering::Relaxed);
        let index = frame % self.frame_queues.len();
        self.frame_queues[index].lock().push(handle);
    }

    /// Move to the next frame and return the handles it is now safe to destroy.
    ///
    /// Must be called after the fence of the frame slot being reused has
    /// signalled. The returned handles were queued `frames_in_flight` frames
    /// ago, by work that fence covers.
    pub fn advance_frame(&self) -> Vec<AnyHandle> {
        let current = self.current_frame.fetch_add(1, Ordering::SeqCst);
        let index = (current + 1) % self.frame_queues.len();
        std::mem::take(&mut *self.frame_queues[index].lock())
    }

    /// Drain every queue. The device must be idle.
    pub fn flush_all(&self) -> Vec<AnyHandle> {
        self.frame_queues
            .iter()
            .flat_map(|queue| std::mem::take(&mut *queue.lock()))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.frame_queues.iter().map(|q| q.lock().len()).sum()
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame.load(Ordering::Relaxed)
    }
}

/// A device object that is queued for destruction when dropped.
pub struct Owned<H: Into<AnyHandle> + Copy> {
    handle: H,
    destructor: Arc<DeferredDestructor>,
}

impl<H: Into<AnyHandle> + Copy> Owned<H> {
    pub fn new(handle: H, destructor: &Arc<DeferredDestructor>) -> Self {
        Self {
            handle,
            destructor: Arc::clone(destructor),
        }
    }

    pub fn handle(&self) -> H {
        self.handle
    }
}

impl<H: Into<AnyHandle> + Copy + fmt::Debug> fmt::Debug for Owned<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owned").field(&self.handle).finish()
    }
}

impl<H: Into<AnyHandle> + Copy> Drop for Owned<H> {
    fn drop(&mut self) {
        self.destructor.queue(self.handle.into());
    }
}
