use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::packet::Packet;

/// Number of size buckets in the payload pool.
const BUCKET_COUNT: usize = 16;
/// Capacity of the smallest bucket; bucket `i` holds `1024 << i` bytes.
const MIN_BUCKET_CAPACITY: usize = 1024;

/// Recycles packet allocations.
///
/// Mutex-guarded so that packets handed out by the demuxer can be released
/// from another thread than the one that produced them.
#[derive(Debug, Default)]
pub struct PacketPool {
    free: Mutex<Vec<Box<Packet>>>,
}

impl PacketPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a reset packet, reusing a previously released one if possible.
    pub fn get(&self) -> Box<Packet> {
        match self.free.lock().unwrap().pop() {
            Some(mut p) => {
                p.reset();
                p
            }
            None => Box::new(Packet::new()),
        }
    }

    /// Release a packet for reuse. The packet and its payload slice must not
    /// be used after this call.
    pub fn put(&self, packet: Box<Packet>) {
        self.free.lock().unwrap().push(packet);
    }

    /// Number of packets currently resting in the pool.
    pub fn idle_count(&self) -> usize {
        self.free.lock().unwrap().len()
    }
}

/// Size-bucketed pool of scratch payload buffers.
///
/// Short PES payloads and long PSI sections differ in size by orders of
/// magnitude; sixteen power-of-two buckets keep reuse effective across the
/// whole range. Oversized buffers are dropped on release and reclaimed by
/// the allocator.
#[derive(Debug)]
pub struct PayloadPool {
    buckets: [Mutex<Vec<Vec<u8>>>; BUCKET_COUNT],
}

impl Default for PayloadPool {
    fn default() -> Self {
        PayloadPool {
            buckets: std::array::from_fn(|_| Mutex::new(Vec::new())),
        }
    }
}

impl PayloadPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Smallest bucket whose capacity covers a request of `n` bytes.
    fn bucket_for_request(n: usize) -> usize {
        if n <= MIN_BUCKET_CAPACITY {
            return 0;
        }
        let k = (n - 1) / MIN_BUCKET_CAPACITY;
        ((k.ilog2() + 1) as usize).min(BUCKET_COUNT - 1)
    }

    /// Bucket a buffer of capacity `cap` belongs to, if any.
    fn bucket_for_capacity(cap: usize) -> Option<usize> {
        if cap < MIN_BUCKET_CAPACITY {
            return None;
        }
        let idx = (cap / MIN_BUCKET_CAPACITY).ilog2() as usize;
        (idx < BUCKET_COUNT).then_some(idx)
    }

    /// Fetch a zeroed buffer of length `n` from the matching bucket.
    pub fn get(pool: &Arc<Self>, n: usize) -> PooledBuffer {
        let idx = Self::bucket_for_request(n);
        let mut buf = match pool.buckets[idx].lock().unwrap().pop() {
            Some(buf) if buf.capacity() >= n => buf,
            _ => {
                debug!(bucket = idx, size = n, "allocating payload buffer");
                Vec::with_capacity((MIN_BUCKET_CAPACITY << idx).max(n))
            }
        };
        buf.clear();
        buf.resize(n, 0);
        PooledBuffer {
            buf,
            pool: Arc::clone(pool),
        }
    }

    /// Return a raw buffer to the bucket matching its capacity.
    fn put(&self, buf: Vec<u8>) {
        if let Some(idx) = Self::bucket_for_capacity(buf.capacity()) {
            self.buckets[idx].lock().unwrap().push(buf);
        }
    }

    /// Number of buffers resting in each size bucket.
    pub fn idle_buckets(&self) -> [usize; BUCKET_COUNT] {
        std::array::from_fn(|idx| self.buckets[idx].lock().unwrap().len())
    }

    /// Total number of buffers resting in the pool.
    pub fn idle_count(&self) -> usize {
        self.idle_buckets().iter().sum()
    }
}

/// A scratch buffer borrowed from a [`PayloadPool`].
///
/// Returned to its size bucket when dropped. Owned by exactly one record or
/// one transient parser at a time.
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<PayloadPool>,
}

impl std::ops::Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.put(std::mem::take(&mut self.buf));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_pool_reuses_packets() {
        let pool = PacketPool::new();
        let mut p = pool.get();
        p.slot_mut(188)[0] = 0x47;
        pool.put(p);
        assert_eq!(pool.idle_count(), 1);
        let p = pool.get();
        assert!(p.payload().is_none());
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn request_bucket_is_log2_ceiling() {
        assert_eq!(PayloadPool::bucket_for_request(1), 0);
        assert_eq!(PayloadPool::bucket_for_request(1024), 0);
        assert_eq!(PayloadPool::bucket_for_request(1025), 1);
        assert_eq!(PayloadPool::bucket_for_request(2048), 1);
        assert_eq!(PayloadPool::bucket_for_request(2049), 2);
        assert_eq!(PayloadPool::bucket_for_request(1024 << 15), 15);
        assert_eq!(PayloadPool::bucket_for_request(usize::MAX / 2), 15);
    }

    #[test]
    fn buffers_return_to_their_bucket_on_drop() {
        let pool = Arc::new(PayloadPool::new());
        let buf = PayloadPool::get(&pool, 2000);
        assert_eq!(buf.len(), 2000);
        drop(buf);
        assert_eq!(pool.idle_buckets()[1], 1);

        // The next request of the same class reuses the pooled buffer.
        let buf = PayloadPool::get(&pool, 1500);
        assert_eq!(pool.idle_buckets()[1], 0);
        drop(buf);
        assert_eq!(pool.idle_buckets()[1], 1);
    }

    #[test]
    fn oversized_buffers_are_dropped() {
        let pool = Arc::new(PayloadPool::new());
        pool.put(Vec::with_capacity(MIN_BUCKET_CAPACITY << BUCKET_COUNT));
        for idx in 0..BUCKET_COUNT {
            assert_eq!(pool.idle_buckets()[idx], 0);
        }
        // Tiny buffers are dropped too rather than polluting bucket zero.
        pool.put(Vec::with_capacity(16));
        assert_eq!(pool.idle_buckets()[0], 0);
    }

    #[test]
    fn pooled_buffer_is_zeroed() {
        let pool = Arc::new(PayloadPool::new());
        let mut buf = PayloadPool::get(&pool, 64);
        buf[..4].copy_from_slice(&[1, 2, 3, 4]);
        drop(buf);
        let buf = PayloadPool::get(&pool, 64);
        assert_eq!(&buf[..4], &[0, 0, 0, 0]);
    }
}
