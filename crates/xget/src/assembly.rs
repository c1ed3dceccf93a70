//! Ordered reassembly pool.
//!
//! The capacity-bounded merge point between N segment producers and the one
//! merging consumer. Each segment owns a slot; all slots share one byte
//! budget. Writers park on a global admit queue when the budget is spent —
//! their completion is withheld until their chunk is admitted, which is the
//! backpressure. A full pool may still hand a queued chunk directly to a
//! reader waiting on the same slot; without that bypass one slow slot could
//! stall every producer behind a budget nobody can free.
//!
//! All state lives behind one mutex that is never held across a suspension
//! point; producers and the consumer await oneshot completions outside it.

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{XgetError, XgetResult};

/// Default shared byte budget: 200 MiB.
pub const DEFAULT_CAPACITY: u64 = 200 * 1024 * 1024;

/// Fraction of physical memory above which a requested capacity draws a
/// warning.
const CAPACITY_WARN_RATIO: f64 = 0.4;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Shared byte budget across all slots. Zero turns the pool into a
    /// rendezvous: every chunk is handed writer-to-reader directly.
    pub max_capacity: u64,
    /// When a chunk only partially fits, re-queue the overflow tail at the
    /// back of the admit queue instead of leaving it at its position,
    /// letting other segments progress before the tail is revisited.
    pub reallocate: bool,
    /// Suppress the oversized-capacity warning.
    pub nowarn: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_capacity: DEFAULT_CAPACITY,
            reallocate: false,
            nowarn: false,
        }
    }
}

/// Usage statistics, ticked on every stored-byte change.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoolMetrics {
    /// Peak bytes stored.
    pub peak: u64,
    /// Mean bytes stored across ticks.
    pub average: f64,
    /// Number of capacity changes observed.
    pub ticks: u64,
}

/// A queued write: `None` chunk is the end-of-slot sentinel.
struct Admission {
    slot: usize,
    chunk: Option<Bytes>,
    done: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct SlotState {
    /// Admitted chunks in arrival order; `None` marks end of the slot.
    buffer: VecDeque<Option<Bytes>>,
    /// Chunks buffered plus chunks waiting in the admit queue for this slot.
    pending_writes: usize,
    /// Readers waiting for this slot.
    pending_reads: VecDeque<oneshot::Sender<Option<Bytes>>>,
}

struct PoolState {
    slots: Vec<SlotState>,
    queue: VecDeque<Admission>,
    /// Bytes currently stored across all slots.
    length: u64,
    max_capacity: u64,
    reallocate: bool,
    closed: bool,
    peak: u64,
    total_computed: u64,
    ticks: u64,
}

impl PoolState {
    fn tick(&mut self) {
        self.peak = self.peak.max(self.length);
        self.total_computed += self.length;
        self.ticks += 1;
    }

    fn add_length(&mut self, n: u64) {
        if n > 0 {
            self.length += n;
            self.tick();
        }
    }

    fn sub_length(&mut self, n: u64) {
        if n > 0 {
            self.length -= n;
            self.tick();
        }
    }

    /// Walk the admit queue front to back, moving whatever fits.
    ///
    /// Invariant on exit: no slot has both a non-empty buffer and waiting
    /// readers, and no queued entry could be admitted or bypassed.
    fn dispatch(&mut self) {
        let mut i = 0;
        while i < self.queue.len() {
            let slot_idx = self.queue[i].slot;

            if self.length >= self.max_capacity {
                // Full. A reader waiting on this entry's slot can take the
                // chunk directly, skipping the store; otherwise leave the
                // entry where it is and look further down the queue.
                if self.slots[slot_idx].pending_reads.is_empty() {
                    i += 1;
                } else {
                    let mut adm = self.queue.remove(i).expect("index in bounds");
                    let reader = self.slots[slot_idx]
                        .pending_reads
                        .pop_front()
                        .expect("checked non-empty");
                    let _ = reader.send(adm.chunk.take());
                    self.slots[slot_idx].pending_writes -= 1;
                    if let Some(done) = adm.done.take() {
                        let _ = done.send(());
                    }
                }
                continue;
            }

            let avail = self.max_capacity - self.length;
            let fits = match &self.queue[i].chunk {
                None => true, // sentinel costs nothing
                Some(c) => c.len() as u64 <= avail,
            };

            if fits {
                let mut adm = self.queue.remove(i).expect("index in bounds");
                let cost = adm.chunk.as_ref().map_or(0, |c| c.len() as u64);
                self.slots[slot_idx].buffer.push_back(adm.chunk.take());
                self.add_length(cost);
                if let Some(done) = adm.done.take() {
                    let _ = done.send(());
                }
            } else {
                // Partial fit: store the head, keep the tail queued with the
                // completion still deferred.
                let chunk = self.queue[i]
                    .chunk
                    .as_mut()
                    .expect("split only on real chunks");
                let head = chunk.split_to(avail as usize);
                self.slots[slot_idx].buffer.push_back(Some(head));
                self.slots[slot_idx].pending_writes += 1;
                self.add_length(avail);
                if self.reallocate {
                    let adm = self.queue.remove(i).expect("index in bounds");
                    self.queue.push_back(adm);
                }
            }

            self.serve_readers(slot_idx);
        }
    }

    /// Match buffered chunks with waiting readers until one side is empty.
    fn serve_readers(&mut self, slot_idx: usize) {
        loop {
            let slot = &mut self.slots[slot_idx];
            if slot.pending_reads.is_empty() || slot.buffer.is_empty() {
                break;
            }
            let chunk = slot.buffer.pop_front().expect("checked non-empty");
            slot.pending_writes -= 1;
            let reader = slot.pending_reads.pop_front().expect("checked non-empty");
            let freed = chunk.as_ref().map_or(0, |c| c.len() as u64);
            let _ = reader.send(chunk);
            self.sub_length(freed);
        }
    }
}

/// The shared reassembly pool.
pub struct AssemblyPool {
    state: Mutex<PoolState>,
    nowarn: bool,
}

impl AssemblyPool {
    pub fn new(slot_count: usize, config: PoolConfig) -> Self {
        let mut slots = Vec::with_capacity(slot_count);
        slots.resize_with(slot_count, SlotState::default);
        Self {
            state: Mutex::new(PoolState {
                slots,
                queue: VecDeque::new(),
                length: 0,
                max_capacity: config.max_capacity,
                reallocate: config.reallocate,
                closed: false,
                peak: 0,
                total_computed: 0,
                ticks: 0,
            }),
            nowarn: config.nowarn,
        }
    }

    /// Validate a requested capacity against physical memory.
    ///
    /// Rejects capacities larger than RAM; warns (once, here) above 40% of
    /// it unless `nowarn`.
    pub fn validate_capacity(n: u64, nowarn: bool) -> XgetResult<()> {
        let Some(physical) = total_physical_memory() else {
            return Ok(());
        };
        if n > physical {
            return Err(XgetError::InvalidOption("cache_size"));
        }
        if !nowarn && n as f64 > physical as f64 * CAPACITY_WARN_RATIO {
            warn!(
                requested = n,
                physical, "reassembly capacity exceeds 40% of physical memory"
            );
        }
        Ok(())
    }

    /// Admit a chunk into `slot`, or its end-of-slot sentinel (`None`).
    ///
    /// Resolves when the chunk is fully admitted (stored or handed to a
    /// reader); until then the producer is backpressured.
    pub async fn write(&self, slot: usize, chunk: Option<Bytes>) {
        let waiter = {
            let mut st = self.state.lock().expect("pool mutex poisoned");
            if st.closed {
                return;
            }
            let s = &mut st.slots[slot];
            if s.pending_writes == 0 && !s.pending_reads.is_empty() {
                // Reader already waiting and nothing queued ahead: hand the
                // chunk over directly, completion is immediate.
                let reader = s.pending_reads.pop_front().expect("checked non-empty");
                let _ = reader.send(chunk);
                None
            } else {
                let (tx, rx) = oneshot::channel();
                st.slots[slot].pending_writes += 1;
                st.queue.push_back(Admission {
                    slot,
                    chunk,
                    done: Some(tx),
                });
                st.dispatch();
                Some(rx)
            }
        };
        if let Some(rx) = waiter {
            // Err means the pool was torn down; the producer is being
            // cancelled anyway.
            let _ = rx.await;
        }
    }

    /// Take the next chunk from `slot`; `None` means the slot is finished.
    pub async fn read(&self, slot: usize) -> Option<Bytes> {
        let waiter = {
            let mut st = self.state.lock().expect("pool mutex poisoned");
            if let Some(chunk) = st.slots[slot].buffer.pop_front() {
                st.slots[slot].pending_writes -= 1;
                let freed = chunk.as_ref().map_or(0, |c| c.len() as u64);
                st.sub_length(freed);
                // Freed budget may admit queued writes.
                st.dispatch();
                return chunk;
            }
            if st.closed {
                return None;
            }
            let (tx, rx) = oneshot::channel();
            st.slots[slot].pending_reads.push_back(tx);
            st.dispatch();
            rx
        };
        waiter.await.unwrap_or(None)
    }

    /// Resize the shared budget.
    ///
    /// Raising it immediately admits queued writes. Lowering it below the
    /// current load never evicts: the pool drains down to the new bound as
    /// the consumer reads.
    pub fn set_capacity(&self, n: u64) -> XgetResult<()> {
        Self::validate_capacity(n, self.nowarn)?;
        let mut st = self.state.lock().expect("pool mutex poisoned");
        debug!(from = st.max_capacity, to = n, "pool capacity changed");
        st.max_capacity = n;
        st.dispatch();
        Ok(())
    }

    pub fn capacity(&self) -> u64 {
        self.state.lock().expect("pool mutex poisoned").max_capacity
    }

    /// Bytes currently stored.
    pub fn len(&self) -> u64 {
        self.state.lock().expect("pool mutex poisoned").length
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> PoolMetrics {
        let st = self.state.lock().expect("pool mutex poisoned");
        PoolMetrics {
            peak: st.peak,
            average: if st.ticks == 0 {
                0.0
            } else {
                st.total_computed as f64 / st.ticks as f64
            },
            ticks: st.ticks,
        }
    }

    /// Tear the pool down: wake every parked producer and reader.
    ///
    /// Waiting readers observe end-of-slot; queued chunks are dropped.
    pub fn close(&self) {
        let mut st = self.state.lock().expect("pool mutex poisoned");
        st.closed = true;
        for mut adm in st.queue.drain(..) {
            if let Some(done) = adm.done.take() {
                let _ = done.send(());
            }
        }
        for slot in &mut st.slots {
            slot.buffer.clear();
            slot.pending_writes = 0;
            for reader in slot.pending_reads.drain(..) {
                let _ = reader.send(None);
            }
        }
        st.length = 0;
    }

    #[cfg(test)]
    fn assert_counter_exclusivity(&self) {
        let st = self.state.lock().expect("pool mutex poisoned");
        for (i, slot) in st.slots.iter().enumerate() {
            assert!(
                slot.pending_writes == 0 || slot.pending_reads.is_empty(),
                "slot {i}: pending_writes={} and pending_reads={} both nonzero",
                slot.pending_writes,
                slot.pending_reads.len()
            );
        }
    }
}

fn total_physical_memory() -> Option<u64> {
    use sysinfo::{MemoryRefreshKind, RefreshKind, System};
    let sys = System::new_with_specifics(
        RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
    );
    let total = sys.total_memory();
    (total > 0).then_some(total)
}
