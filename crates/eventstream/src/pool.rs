use std::sync::{Arc, Mutex};

use bytes::BytesMut;

/// Initial capacity handed out for decode buffers.
const INITIAL_CAPACITY: usize = 64 * 1024;

/// Buffers that grew past this are dropped instead of retained.
const RETAIN_CAPACITY: usize = 1024 * 1024;

/// Maximum number of idle buffers kept around.
const MAX_IDLE: usize = 32;

/// Shared pool of decode buffers.
///
/// Requests churn through short-lived decoders; recycling their buffers keeps
/// steady-state allocation flat. Retention is bounded both in buffer size and
/// in idle count.
#[derive(Debug, Clone, Default)]
pub struct BufferPool {
    idle: Arc<Mutex<Vec<BytesMut>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> BytesMut {
        let recycled = self
            .idle
            .lock()
            .expect("buffer pool lock poisoned")
            .pop();

        recycled.unwrap_or_else(|| BytesMut::with_capacity(INITIAL_CAPACITY))
    }

    pub fn put(&self, mut buf: BytesMut) {
        if buf.capacity() > RETAIN_CAPACITY {
            return;
        }

        buf.clear();

        let mut idle = self.idle.lock().expect("buffer pool lock poisoned");
        if idle.len() < MAX_IDLE {
            idle.push(buf);
        }
    }

    #[cfg(test)]
    pub(crate) fn idle_count(&self) -> usize {
        self.idle.lock().expect("buffer pool lock poisoned").len()
    }
}
