use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) fn next_pow2(x: usize) -> usize {
    x.max(1).next_power_of_two()
}

/// Single-producer single-consumer sample FIFO between the capture callback
/// and the render callback. Power-of-two capacity, one slot kept free.
pub(crate) struct CaptureRing {
    buf: UnsafeCell<Box<[f32]>>,
    mask: usize,
    write: AtomicUsize,
    read: AtomicUsize,
}

// SAFETY: exactly one producer and one consumer. The producer writes only
// slots outside [read, write) and publishes them with a release store; the
// consumer reads only slots inside it.
unsafe impl Send for CaptureRing {}
unsafe impl Sync for CaptureRing {}

impl CaptureRing {
    pub(crate) fn with_capacity(samples: usize) -> Self {
        let cap = next_pow2(samples.max(2));
        Self {
            buf: UnsafeCell::new(vec![0.0; cap].into_boxed_slice()),
            mask: cap - 1,
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
        }
    }

    pub(crate) fn capacity(&self) -> usize { self.mask + 1 }

    #[inline]
    fn filled(&self, w: usize, r: usize) -> usize {
        w.wrapping_sub(r) & self.mask
    }

    /// Producer side. All or nothing; `false` when there is no room.
    pub(crate) fn push_slice(&self, data: &[f32]) -> bool {
        let r = self.read.load(Ordering::Acquire);
        let w = self.write.load(Ordering::Relaxed);
        if self.capacity() - self.filled(w, r) - 1 < data.len() {
            return false;
        }
        // SAFETY: see the impl-level comment; the free-space check keeps us
        // off slots the consumer may be reading.
        let buf = unsafe { &mut *self.buf.get() };
        let mut wi = w;
        for &v in data {
            buf[wi & self.mask] = v;
            wi = wi.wrapping_add(1);
        }
        self.write.store(wi, Ordering::Release);
        true
    }

    /// Consumer side. Fills all of `out` or leaves it untouched.
    pub(crate) fn pop_into(&self, out: &mut [f32]) -> bool {
        let w = self.write.load(Ordering::Acquire);
        let r = self.read.load(Ordering::Relaxed);
        if self.filled(w, r) < out.len() {
            return false;
        }
        // SAFETY: only published slots are read.
        let buf = unsafe { &*self.buf.get() };
        let mut ri = r;
        for o in out.iter_mut() {
            *o = buf[ri & self.mask];
            ri = ri.wrapping_add(1);
        }
        self.read.store(ri, Ordering::Release);
        true
    }
}
