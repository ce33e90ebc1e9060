//! Reusable scheduler buffers.
//!
//! A run needs four scratch collections. The pool keeps one set between
//! runs in a single atomic slot: a run takes it if it is there and
//! allocates a fresh set if it is not, and puts its set back when done
//! unless another run already did.

use crate::executor::NodeOutcome;
use crate::node::NodeId;
use arc_swap::ArcSwapOption;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Scratch collections used by one run.
#[derive(Debug, Default)]
pub struct WaveBuffers {
    /// Nodes waiting to be started, in enqueue order.
    pub ready: VecDeque<NodeId>,
    /// Nodes holding an unflushed deferred value.
    pub deferred: Vec<NodeId>,
    /// Spawned work of the current wave.
    pub tasks: Vec<JoinHandle<NodeOutcome>>,
    /// The node of each entry in `tasks`.
    pub nodes: Vec<NodeId>,
}

impl WaveBuffers {
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
            && self.deferred.is_empty()
            && self.tasks.is_empty()
            && self.nodes.is_empty()
    }

    fn clear(&mut self) {
        self.ready.clear();
        self.deferred.clear();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.nodes.clear();
    }
}

/// Single-slot pool of [`WaveBuffers`].
#[derive(Debug)]
pub struct BufferPool {
    slot: ArcSwapOption<WaveBuffers>,
    enabled: bool,
    reuses: AtomicUsize,
}

impl BufferPool {
    /// Creates a pool that keeps buffers between runs.
    pub fn new() -> Self {
        Self {
            slot: ArcSwapOption::empty(),
            enabled: true,
            reuses: AtomicUsize::new(0),
        }
    }

    /// Creates a pool that allocates fresh buffers for every run.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of check-outs served from the slot.
    pub fn reuses(&self) -> usize {
        self.reuses.load(Ordering::Relaxed)
    }

    /// Takes the pooled buffers, or fresh ones if the slot is empty.
    pub fn checkout(&self) -> PooledBuffers<'_> {
        let pooled = if self.enabled {
            self.slot
                .swap(None)
                .and_then(|buffers| Arc::try_unwrap(buffers).ok())
        } else {
            None
        };
        if pooled.is_some() {
            self.reuses.fetch_add(1, Ordering::Relaxed);
        }
        PooledBuffers {
            pool: self,
            buffers: pooled.unwrap_or_default(),
        }
    }

    fn checkin(&self, mut buffers: WaveBuffers) {
        buffers.clear();
        if self.enabled {
            // Leave the slot alone if a concurrent run refilled it first.
            self.slot
                .compare_and_swap(&None::<Arc<WaveBuffers>>, Some(Arc::new(buffers)));
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Buffers checked out of a [`BufferPool`], returned on drop.
#[derive(Debug)]
pub struct PooledBuffers<'a> {
    pool: &'a BufferPool,
    buffers: WaveBuffers,
}

impl Deref for PooledBuffers<'_> {
    type Target = WaveBuffers;

    fn deref(&self) -> &WaveBuffers {
        &self.buffers
    }
}

impl DerefMut for PooledBuffers<'_> {
    fn deref_mut(&mut self) -> &mut WaveBuffers {
        &mut self.buffers
    }
}

impl Drop for PooledBuffers<'_> {
    fn drop(&mut self) {
        self.pool.checkin(std::mem::take(&mut self.buffers));
    }
}
