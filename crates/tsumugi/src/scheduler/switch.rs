use std::sync::Arc;

use arc_swap::ArcSwapOption;

use super::{Inner, StreamState};
use crate::{download::Downloader, sink::SegmentSink, Representation, TimeRange};

/// Representation staged by a manifest update, waiting for the next
/// scheduling pass.
#[derive(Default)]
pub(super) struct PendingRepresentation(ArcSwapOption<Representation>);

impl PendingRepresentation {
    /// Stage `representation`, replacing anything staged before.
    pub(super) fn stage(&self, representation: Arc<Representation>) {
        self.0.store(Some(representation));
    }

    pub(super) fn take(&self) -> Option<Arc<Representation>> {
        self.0.swap(None)
    }

    pub(super) fn clear(&self) {
        self.0.store(None);
    }
}

/// Segment id to continue from after switching to `representation`.
///
/// Continues after the segment covering the start of the last downloaded
/// one, or from the aligned start when nothing was downloaded yet.
pub fn continuation_segment_id(
    representation: &Representation,
    last_downloaded: Option<TimeRange>,
) -> Option<u64> {
    match last_downloaded {
        Some(range) => representation.segments.segment_id_after(range.start),
        None => Some(representation.aligned_start_segment_id),
    }
}

impl<D, K> Inner<D, K>
where
    D: Downloader,
    K: SegmentSink,
{
    /// Install a new current representation and recompute everything derived
    /// from its manifest.
    pub(super) fn install(&self, state: &mut StreamState, representation: Arc<Representation>) {
        state.stream_duration = representation.stream_duration();
        state.target_depth = self.buffer_depth.target_depth(&representation);
        tracing::info!(
            stream = %self.stream_type,
            "Representation {}: target buffer depth {:?}, duration {:?}",
            representation.id,
            state.target_depth,
            state.stream_duration,
        );
        state.representation = Some(representation);
    }

    /// Apply a staged representation, if any.
    pub(super) fn swap_representation(&self, state: &mut StreamState) {
        let Some(representation) = self.pending.take() else {
            return;
        };

        let segment_id = continuation_segment_id(&representation, state.last_downloaded);
        match (state.last_downloaded, segment_id) {
            (None, _) => tracing::info!(
                stream = %self.stream_type,
                "Rep. swap. Start segment: [{segment_id:?}]"
            ),
            (Some(last), Some(id)) => tracing::info!(
                stream = %self.stream_type,
                "Rep. swap. Last segment: {:?} {last}, continuing from [{id}] {:?}",
                state.segment_id,
                representation.segments.time_range(id),
            ),
            (Some(last), None) => tracing::warn!(
                stream = %self.stream_type,
                "Rep. swap. Last segment: {:?} {last}, no continuation found",
                state.segment_id,
            ),
        }

        self.install(state, representation);
        state.segment_id = segment_id;
    }
}
