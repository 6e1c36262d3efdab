//! Single-producer / single-consumer byte ring.
//!
//! The producer never blocks: bytes that do not fit are dropped and counted.
//! The consumer can poll with [`RingConsumer::try_read`] or park on a
//! condition variable with [`RingConsumer::read_blocking`]. Head and tail are
//! atomics published with Release stores and observed with Acquire loads; the
//! mutex only guards the sleep/wake handshake.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{trace, warn};

/// Control header in front of the data region: head (u32) then tail (u32).
pub const CONTROL_BYTES: usize = std::mem::size_of::<[AtomicU32; 2]>();
const HEAD: usize = 0;
const TAIL: usize = 1;
pub const DEFAULT_CAPACITY: usize = 262_144;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    #[error("ring is empty")]
    WouldBlock,
    #[error("timed out waiting for ring data")]
    TimedOut,
    #[error("ring producer closed")]
    Closed,
    #[error("invalid ring capacity {0}")]
    InvalidCapacity(usize),
}

pub type RingResult<T> = Result<T, RingError>;

/// Size bookkeeping for a ring backed by one shared region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    pub capacity: usize,
}

impl RingLayout {
    pub fn new(capacity: usize) -> RingResult<Self> {
        if capacity < 2 || u32::try_from(capacity).is_err() {
            return Err(RingError::InvalidCapacity(capacity));
        }
        Ok(Self { capacity })
    }

    /// Total bytes of the shared region: control words plus data.
    pub const fn region_len(capacity: usize) -> usize {
        CONTROL_BYTES + capacity
    }

    /// Largest number of bytes that can be outstanding at once. One slot stays
    /// empty so that `head == tail` always means empty.
    pub const fn usable(&self) -> usize {
        self.capacity - 1
    }
}

impl Default for RingLayout {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Result of a single [`RingProducer::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PushOutcome {
    pub written: usize,
    pub dropped: usize,
}

impl PushOutcome {
    pub fn is_lossless(&self) -> bool {
        self.dropped == 0
    }
}

struct Shared {
    /// `[head, tail]`, laid out as [`CONTROL_BYTES`] ahead of `data`.
    control: [AtomicU32; 2],
    data: Box<[AtomicU8]>,
    capacity: u32,
    dropped: AtomicU64,
    closed: AtomicBool,
    wake_lock: Mutex<()>,
    wake: Condvar,
}

impl Shared {
    fn new(capacity: u32) -> Self {
        let data = (0..capacity).map(|_| AtomicU8::new(0)).collect();
        Self {
            control: [AtomicU32::new(0), AtomicU32::new(0)],
            data,
            capacity,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    /// Read position, owned by the consumer.
    fn head(&self) -> &AtomicU32 {
        &self.control[HEAD]
    }

    /// Write position, owned by the producer.
    fn tail(&self) -> &AtomicU32 {
        &self.control[TAIL]
    }

    fn used(&self, head: u32, tail: u32) -> u32 {
        if tail >= head {
            tail - head
        } else {
            self.capacity - head + tail
        }
    }

    fn notify(&self) {
        let _guard = self.wake_lock.lock();
        self.wake.notify_all();
    }
}

/// Creates a ring with `capacity` data bytes and returns its two ends.
pub fn channel(capacity: usize) -> RingResult<(RingProducer, RingConsumer)> {
    let layout = RingLayout::new(capacity)?;
    let capacity =
        u32::try_from(layout.capacity).map_err(|_| RingError::InvalidCapacity(capacity))?;
    let shared = Arc::new(Shared::new(capacity));
    Ok((
        RingProducer {
            shared: Arc::clone(&shared),
        },
        RingConsumer { shared },
    ))
}

/// Writing end. Owns `tail`; dropping it closes the ring.
pub struct RingProducer {
    shared: Arc<Shared>,
}

impl RingProducer {
    /// Copies as much of `bytes` as fits and drops the rest.
    pub fn push(&self, bytes: &[u8]) -> PushOutcome {
        let shared = &*self.shared;
        let cap = shared.capacity;
        let tail = shared.tail().load(Ordering::Relaxed);
        let head = shared.head().load(Ordering::Acquire);
        let free = (cap - 1 - shared.used(head, tail)) as usize;
        let written = bytes.len().min(free);

        let mut idx = tail;
        for byte in &bytes[..written] {
            shared.data[idx as usize].store(*byte, Ordering::Relaxed);
            idx = (idx + 1) % cap;
        }
        if written > 0 {
            shared.tail().store(idx, Ordering::Release);
        }

        let dropped = bytes.len() - written;
        if dropped > 0 {
            let total = shared.dropped.fetch_add(dropped as u64, Ordering::Relaxed) + dropped as u64;
            warn!(
                written,
                dropped,
                total_dropped = total,
                capacity = cap,
                "ring full, dropping bytes"
            );
        }
        if written > 0 {
            trace!(written, "ring push");
            shared.notify();
        }
        PushOutcome { written, dropped }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity as usize
    }

    /// Bytes that a push could accept right now.
    pub fn free_space(&self) -> usize {
        let shared = &*self.shared;
        let head = shared.head().load(Ordering::Acquire);
        let tail = shared.tail().load(Ordering::Relaxed);
        (shared.capacity - 1 - shared.used(head, tail)) as usize
    }

    pub fn dropped_bytes(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for RingProducer {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify();
    }
}

impl io::Write for RingProducer {
    /// Lossy: reports the whole buffer as written even when part of it was
    /// dropped, so `write_all` never spins on a full ring.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.push(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reading end. Owns `head`.
pub struct RingConsumer {
    shared: Arc<Shared>,
}

impl RingConsumer {
    /// Drains up to `max_len` bytes without waiting.
    pub fn try_read(&self, max_len: usize) -> RingResult<Vec<u8>> {
        let mut out = vec![0u8; max_len.min(self.len())];
        if max_len > 0 && out.is_empty() {
            return Err(RingError::WouldBlock);
        }
        let n = self.drain_into(&mut out);
        out.truncate(n);
        Ok(out)
    }

    /// Waits until data is available, the producer is gone, or `timeout`
    /// elapses. `None` waits indefinitely. Data still buffered when the
    /// producer closes is returned before [`RingError::Closed`].
    pub fn read_blocking(&self, max_len: usize, timeout: Option<Duration>) -> RingResult<Vec<u8>> {
        let mut out = vec![0u8; max_len];
        let n = self.read_blocking_into(&mut out, timeout)?;
        out.truncate(n);
        Ok(out)
    }

    fn read_blocking_into(&self, buf: &mut [u8], timeout: Option<Duration>) -> RingResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let shared = &*self.shared;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = shared.wake_lock.lock();
        loop {
            let n = self.drain_into(buf);
            if n > 0 {
                return Ok(n);
            }
            if shared.closed.load(Ordering::Acquire) {
                // Producer may have published a final push before closing.
                let n = self.drain_into(buf);
                return if n > 0 { Ok(n) } else { Err(RingError::Closed) };
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(RingError::TimedOut);
                    }
                    shared.wake.wait_until(&mut guard, deadline);
                }
                None => shared.wake.wait(&mut guard),
            }
        }
    }

    fn drain_into(&self, buf: &mut [u8]) -> usize {
        let shared = &*self.shared;
        let cap = shared.capacity;
        let head = shared.head().load(Ordering::Relaxed);
        let tail = shared.tail().load(Ordering::Acquire);
        let n = (shared.used(head, tail) as usize).min(buf.len());
        if n == 0 {
            return 0;
        }
        let mut idx = head;
        for slot in &mut buf[..n] {
            *slot = shared.data[idx as usize].load(Ordering::Relaxed);
            idx = (idx + 1) % cap;
        }
        shared.head().store(idx, Ordering::Release);
        n
    }

    /// Bytes currently waiting to be read.
    pub fn len(&self) -> usize {
        let shared = &*self.shared;
        let head = shared.head().load(Ordering::Relaxed);
        let tail = shared.tail().load(Ordering::Acquire);
        shared.used(head, tail) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity as usize
    }

    pub fn dropped_bytes(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl io::Read for RingConsumer {
    /// Blocks until at least one byte is available. Returns `Ok(0)` once the
    /// producer is dropped and the ring is drained.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.read_blocking_into(buf, None) {
            Ok(n) => Ok(n),
            Err(RingError::Closed) => Ok(0),
            Err(err) => Err(io::Error::new(io::ErrorKind::Other, err)),
        }
    }
}
