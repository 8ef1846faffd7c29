use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use tokio::sync::Notify;

use super::SegmentSink;

/// In-memory [`SegmentSink`] with an async reading side.
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    queue: Mutex<ChunkQueue>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct ChunkQueue {
    chunks: VecDeque<Bytes>,
    buffered_bytes: usize,
    end_of_stream: bool,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self) -> MutexGuard<'_, ChunkQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the next chunk. Returns `None` once the end of stream has been
    /// reached and every chunk before it was read.
    pub async fn read_chunk(&self) -> Option<Bytes> {
        loop {
            if let Some(result) = self.poll_chunk() {
                return result;
            }
            self.notify.notified().await;
        }
    }

    /// Read a chunk without waiting.
    pub fn try_read_chunk(&self) -> Option<Bytes> {
        self.poll_chunk().flatten()
    }

    fn poll_chunk(&self) -> Option<Option<Bytes>> {
        let mut queue = self.queue();
        if let Some(chunk) = queue.chunks.pop_front() {
            queue.buffered_bytes -= chunk.len();
            return Some(Some(chunk));
        }
        queue.end_of_stream.then_some(None)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.queue().end_of_stream
    }

    /// Bytes written but not read yet.
    pub fn buffered_bytes(&self) -> usize {
        self.queue().buffered_bytes
    }
}

impl SegmentSink for ChunkBuffer {
    fn write(&self, data: Bytes) {
        {
            let mut queue = self.queue();
            if queue.end_of_stream {
                tracing::warn!("Dropping {} bytes written after end of stream", data.len());
                return;
            }
            queue.buffered_bytes += data.len();
            queue.chunks.push_back(data);
        }
        self.notify.notify_one();
    }

    fn end_of_stream(&self) {
        self.queue().end_of_stream = true;
        self.notify.notify_one();
    }

    fn clear(&self) {
        let mut queue = self.queue();
        queue.chunks.clear();
        queue.buffered_bytes = 0;
        queue.end_of_stream = false;
    }
}
