use std::sync::Arc;

use bytes::Bytes;

use super::{download_timeout, Completion, Inner, SchedulerState, StreamState};
use crate::{download::Downloader, sink::SegmentSink, DownloadRequest, Segment, TsumugiError};

impl<D, K> Inner<D, K>
where
    D: Downloader,
    K: SegmentSink,
{
    /// Feed the initialization segment to the sink, from the cache when it was
    /// downloaded before, then continue with media segments.
    pub(super) fn load_init_segment(self: &Arc<Self>, segment: Segment) {
        let mut state = self.state();

        if let Some(data) = state.init_cache.get(&segment).cloned() {
            tracing::info!(stream = %self.stream_type, "Segment: INIT reusing {}", segment.url);
            self.on_init_downloaded(&mut state, segment, data);
            drop(state);
            self.schedule_next();
            return;
        }

        let timeout = download_timeout(&self.config, self.throughput.estimate(), None, None, None);
        let request = DownloadRequest {
            segment,
            segment_id: None,
            stream_type: self.stream_type,
            ignore_error: false,
        };
        tracing::info!(stream = %self.stream_type, "Segment: INIT {}", request.segment.url);

        let run = state.run;
        let cancel = state.cancel.clone();
        state.pipeline_active = true;

        let inner = self.clone();
        let task = tokio::spawn(async move {
            let result = inner.download(&request, timeout, &cancel).await;

            let completion = {
                let mut state = inner.state();
                if state.run != run {
                    return;
                }
                let completion = match result {
                    Ok(_) if cancel.is_cancelled() => Completion::Halt,
                    Ok(response) => {
                        inner.on_init_downloaded(&mut state, response.segment, response.data);
                        Completion::Continue
                    }
                    Err(TsumugiError::Cancelled(reason)) if cancel.is_cancelled() => {
                        tracing::info!(
                            stream = %inner.stream_type,
                            "Segment: INIT cancelled ({reason:?})"
                        );
                        Completion::Halt
                    }
                    Err(e) => inner.on_init_failed(&mut state, &request, e),
                };
                state.pipeline_active = false;
                completion
            };

            match completion {
                Completion::Continue if !cancel.is_cancelled() => inner.schedule_next(),
                Completion::Report(message) => inner.report_error(&message),
                _ => {}
            }
        });
        state.track(task);
    }

    fn on_init_downloaded(&self, state: &mut StreamState, segment: Segment, data: Bytes) {
        tracing::info!(
            stream = %self.stream_type,
            "Segment: INIT enqueued, {} bytes",
            data.len()
        );
        self.sink.write(data.clone());
        state.init_cache.entry(segment).or_insert(data);
        state.init_ingested = true;
        state.phase = SchedulerState::Streaming;
    }

    /// Initialization failures are never retried, including timeouts.
    fn on_init_failed(
        &self,
        state: &mut StreamState,
        request: &DownloadRequest,
        error: TsumugiError,
    ) -> Completion {
        tracing::error!(
            stream = %self.stream_type,
            "Segment: INIT {} download failed: {error}",
            request.segment.url
        );
        self.stop_async(state);
        state.phase = SchedulerState::Faulted;

        Completion::Report(format!(
            "{} initialization segment {} download failed: {error}",
            self.stream_type, request.segment.url
        ))
    }
}
