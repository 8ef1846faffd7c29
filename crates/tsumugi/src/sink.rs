mod chunk;

pub use chunk::ChunkBuffer;

use std::sync::Arc;

use bytes::Bytes;

/// Append-only byte channel feeding the demuxer of one stream.
///
/// Implementations must not block: they are called from the scheduling path.
pub trait SegmentSink: Send + Sync + 'static {
    fn write(&self, data: Bytes);

    /// Marks the end of the stream. No data may be written afterwards until
    /// the sink is cleared.
    fn end_of_stream(&self);

    /// Drops everything not consumed yet.
    fn clear(&self);
}

impl<K> SegmentSink for Arc<K>
where
    K: SegmentSink,
{
    fn write(&self, data: Bytes) {
        self.as_ref().write(data)
    }

    fn end_of_stream(&self) {
        self.as_ref().end_of_stream()
    }

    fn clear(&self) {
        self.as_ref().clear()
    }
}
