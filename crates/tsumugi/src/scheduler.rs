mod init;
mod switch;
mod timeout;

pub use switch::continuation_segment_id;
pub use timeout::download_timeout;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use bytes::Bytes;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    buffer::BufferDepthController, download::Downloader, sink::SegmentSink, CancelReason,
    DownloadRequest, DownloadResponse, Representation, SchedulerConfig, Segment, StreamType,
    ThroughputEstimator, TimeRange, TsumugiError, TsumugiResult,
};
use switch::PendingRepresentation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    #[default]
    Idle,
    /// The initialization segment is being fetched.
    Initializing,
    Streaming,
    Stopped,
    /// Stopped after an error which can not be recovered from.
    Faulted,
}

pub type ErrorHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Drives the download of one stream (audio or video).
///
/// Every call to [`on_time_updated`](Self::on_time_updated) or
/// [`update_representation`](Self::update_representation) triggers a scheduling
/// pass. A pass either returns immediately or starts exactly one download in
/// the background. The completion of that download triggers the next pass,
/// so the buffer is filled one segment at a time until the target depth is
/// reached.
///
/// Passes never run concurrently: a pass requested while another one is
/// running is dropped, the next trigger retries.
pub struct SegmentScheduler<D, K> {
    inner: Arc<Inner<D, K>>,
}

pub(crate) struct Inner<D, K> {
    stream_type: StreamType,
    throughput: Arc<ThroughputEstimator>,
    downloader: D,
    sink: K,
    config: SchedulerConfig,
    buffer_depth: BufferDepthController,

    scheduling: AtomicBool,
    pending: PendingRepresentation,
    error_handler: Mutex<Option<ErrorHandler>>,
    state: Mutex<StreamState>,
}

#[derive(Default)]
pub(crate) struct StreamState {
    phase: SchedulerState,
    /// Incremented on every start, completions of older runs are ignored.
    run: u64,
    cancel: CancellationToken,
    pipeline_active: bool,
    tasks: Vec<JoinHandle<()>>,

    representation: Option<Arc<Representation>>,
    stream_duration: Option<Duration>,
    target_depth: Duration,

    current_time: Duration,
    buffered_time: Duration,
    segment_id: Option<u64>,
    trim_offset: Option<Duration>,
    last_downloaded: Option<TimeRange>,

    eos_sent: bool,
    init_ingested: bool,
    init_cache: HashMap<Segment, Bytes>,
}

impl StreamState {
    fn is_end_of_content(&self, time: Duration) -> bool {
        match self.stream_duration {
            Some(duration) if !duration.is_zero() => time >= duration,
            _ => false,
        }
    }

    fn trimmed(&self, time: Duration) -> Duration {
        time.saturating_sub(self.trim_offset.unwrap_or_default())
    }

    fn track(&mut self, task: JoinHandle<()>) {
        self.tasks.retain(|task| !task.is_finished());
        self.tasks.push(task);
    }
}

/// What to do after a download finished.
enum Completion {
    Continue,
    Halt,
    /// Halted on an error which must be reported.
    Report(String),
}

/// Held while a scheduling pass runs.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<D, K> SegmentScheduler<D, K>
where
    D: Downloader,
    K: SegmentSink,
{
    pub fn new(
        stream_type: StreamType,
        throughput: Arc<ThroughputEstimator>,
        downloader: D,
        sink: K,
        config: SchedulerConfig,
    ) -> Self {
        let buffer_depth = BufferDepthController::new(&config);
        let state = StreamState {
            target_depth: config.default_buffer_depth(),
            ..Default::default()
        };

        Self {
            inner: Arc::new(Inner {
                stream_type,
                throughput,
                downloader,
                sink,
                config,
                buffer_depth,
                scheduling: AtomicBool::new(false),
                pending: PendingRepresentation::default(),
                error_handler: Mutex::new(None),
                state: Mutex::new(state),
            }),
        }
    }

    /// Register the handler called with a message when the stream faults.
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.set_error_handler(Arc::new(handler));
    }

    pub fn set_error_handler(&self, handler: ErrorHandler) {
        *self
            .inner
            .error_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn stream_type(&self) -> StreamType {
        self.inner.stream_type
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.state().phase
    }

    pub fn representation(&self) -> Option<Arc<Representation>> {
        self.inner.state().representation.clone()
    }

    /// Last reported playback position.
    pub fn current_time(&self) -> Duration {
        self.inner.state().current_time
    }

    /// End of the buffered media, on the trimmed timeline.
    pub fn buffered_time(&self) -> Duration {
        self.inner.state().buffered_time
    }

    pub fn target_buffer_depth(&self) -> Duration {
        self.inner.state().target_depth
    }

    /// Id of the next media segment to download.
    pub fn segment_id(&self) -> Option<u64> {
        self.inner.state().segment_id
    }

    pub fn is_end_of_stream_sent(&self) -> bool {
        self.inner.state().eos_sent
    }

    /// Representation switches are refused while initializing.
    pub fn can_stream_switch(&self) -> bool {
        self.state() != SchedulerState::Initializing
    }

    /// Replace the current representation. Must not be called while a
    /// pipeline is running, reset first.
    pub fn set_representation(&self, representation: Representation) {
        let inner = &self.inner;
        inner.pending.clear();
        let mut state = inner.state();
        inner.install(&mut state, Arc::new(representation));
    }

    /// Stage a refreshed representation of live content. It is applied by the
    /// next scheduling pass, continuing after the last downloaded segment.
    ///
    /// Ignored unless the current representation is dynamic.
    pub fn update_representation(&self, representation: Representation) {
        let inner = &self.inner;
        {
            let state = inner.state();
            let Some(current) = &state.representation else {
                return;
            };
            if !current.is_dynamic() {
                return;
            }
            tracing::info!(
                stream = %inner.stream_type,
                "Representation {} updated, current segment {:?}",
                representation.id,
                state.segment_id,
            );
        }

        inner.pending.stage(Arc::new(representation));
        inner.schedule_next();
    }

    /// Position the stream at `position` and return the time downloading will
    /// actually start from, which is the start of the segment covering it.
    pub fn seek(&self, position: Duration) -> Duration {
        let inner = &self.inner;
        let mut state = inner.state();
        let Some(representation) = state.representation.clone() else {
            tracing::error!(stream = %inner.stream_type, "Seek without representation");
            return position;
        };

        let index = &representation.segments;
        state.segment_id = index.segment_id(position);
        state.trim_offset = representation.aligned_trim_offset;
        state.last_downloaded = None;

        let range = state.segment_id.and_then(|id| index.time_range(id));
        let Some((id, range)) = state.segment_id.zip(range) else {
            tracing::warn!(
                stream = %inner.stream_type,
                "Seek: no segment covers {position:?}"
            );
            state.current_time = position;
            state.buffered_time = position;
            return position;
        };

        state.current_time = range.start;
        state.buffered_time = range.start;
        tracing::info!(
            stream = %inner.stream_type,
            "Seek to {position:?} resolved to segment [{id}] {range}"
        );

        range.start
    }

    /// Start downloading: the initialization segment first, media segments
    /// afterwards.
    pub fn start(&self) -> TsumugiResult<()> {
        let inner = &self.inner;
        let init_segment = {
            let mut state = inner.state();
            let Some(representation) = state.representation.clone() else {
                return Err(TsumugiError::RepresentationNotSet);
            };
            tracing::info!(stream = %inner.stream_type, "Segment scheduler start");

            if state.cancel.is_cancelled() {
                state.cancel = CancellationToken::new();
            }
            state.run += 1;
            state.pipeline_active = false;
            inner.sink.clear();

            state.buffered_time = state.current_time;
            state.eos_sent = false;
            if state.segment_id.is_none() {
                state.segment_id = Some(representation.aligned_start_segment_id);
            }
            if state.trim_offset.is_none() {
                state.trim_offset = representation.aligned_trim_offset;
            }

            let init_segment = representation.segments.init_segment();
            state.init_ingested = init_segment.is_none();
            state.phase = if init_segment.is_some() {
                SchedulerState::Initializing
            } else {
                SchedulerState::Streaming
            };
            init_segment
        };

        match init_segment {
            Some(segment) => inner.load_init_segment(segment),
            None => inner.schedule_next(),
        }
        Ok(())
    }

    /// Report the playback position, which may start the next download.
    pub fn on_time_updated(&self, time: Duration) {
        {
            let mut state = self.inner.state();
            if state.eos_sent {
                return;
            }
            state.current_time = time;
        }
        self.inner.schedule_next();
    }

    /// Cancel everything in flight and wait for it, up to the configured join
    /// timeout. The position is kept.
    pub async fn reset(&self) {
        let inner = &self.inner;
        tracing::info!(stream = %inner.stream_type, "Segment scheduler reset");
        inner.state().cancel.cancel();
        inner.join_pipeline().await;

        let mut state = inner.state();
        state.pipeline_active = false;
        state.phase = SchedulerState::Idle;
        tracing::info!(stream = %inner.stream_type, "Data downloader stopped");
    }

    /// Reset and signal the end of the stream to the sink.
    pub async fn stop(&self) {
        self.reset().await;

        let mut state = self.inner.state();
        self.inner.send_eos(&mut state);
        state.phase = SchedulerState::Stopped;
    }
}

impl<D, K> Inner<D, K>
where
    D: Downloader,
    K: SegmentSink,
{
    fn state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report_error(&self, message: &str) {
        let handler = self
            .error_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(message);
        }
    }

    fn send_eos(&self, state: &mut StreamState) {
        if !state.init_ingested || state.eos_sent {
            return;
        }
        tracing::info!(stream = %self.stream_type, "Sending end of stream");
        self.sink.end_of_stream();
        state.eos_sent = true;
    }

    /// Stop from the scheduling path, without waiting for anything.
    fn stop_async(&self, state: &mut StreamState) {
        state.cancel.cancel();
        self.send_eos(state);
        state.phase = SchedulerState::Stopped;
    }

    async fn join_pipeline(&self) {
        let deadline = Instant::now() + self.config.join_timeout();
        loop {
            let tasks = std::mem::take(&mut self.state().tasks);
            if tasks.is_empty() {
                return;
            }

            for mut task in tasks {
                match tokio::time::timeout_at(deadline, &mut task).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) if e.is_cancelled() => {}
                    Ok(Err(e)) => {
                        tracing::warn!(stream = %self.stream_type, "Pipeline task failed: {e}")
                    }
                    Err(_) => {
                        tracing::warn!(
                            stream = %self.stream_type,
                            "Pipeline did not finish in time, aborting"
                        );
                        task.abort();
                    }
                }
            }
        }
    }

    fn schedule_next(self: &Arc<Self>) {
        let Some(_pass) = PassGuard::try_acquire(&self.scheduling) else {
            return;
        };
        let mut state = self.state();

        if state.is_end_of_content(state.buffered_time) {
            tracing::info!(
                stream = %self.stream_type,
                "End of content reached at {:?}",
                state.buffered_time
            );
            self.stop_async(&mut state);
            return;
        }

        if state.phase != SchedulerState::Streaming
            || state.pipeline_active
            || state.cancel.is_cancelled()
        {
            return;
        }

        let buffered = state.buffered_time.saturating_sub(state.current_time);
        if buffered > state.target_depth {
            tracing::debug!(
                stream = %self.stream_type,
                "Buffer full: {buffered:?} > {:?}",
                state.target_depth
            );
            return;
        }

        self.swap_representation(&mut state);

        let Some(representation) = state.representation.clone() else {
            return;
        };
        let segment = state
            .segment_id
            .and_then(|id| representation.segments.media_segment(id));
        let Some(segment) = segment else {
            tracing::info!(
                stream = %self.stream_type,
                "Segment [{:?}] not available",
                state.segment_id
            );
            if !representation.is_dynamic() {
                tracing::warn!(stream = %self.stream_type, "No more segments, stopping stream");
                self.stop_async(&mut state);
            }
            return;
        };

        let request = DownloadRequest {
            segment,
            segment_id: state.segment_id,
            stream_type: self.stream_type,
            ignore_error: representation.is_dynamic(),
        };
        self.spawn_media_download(&mut state, &representation, request);
    }

    fn spawn_media_download(
        self: &Arc<Self>,
        state: &mut StreamState,
        representation: &Representation,
        request: DownloadRequest,
    ) {
        let timeout = download_timeout(
            &self.config,
            self.throughput.estimate(),
            representation.bandwidth,
            request.segment.period,
            representation.segments.document().min_buffer_time,
        );
        tracing::debug!(
            stream = %self.stream_type,
            "Segment [{:?}] {} timeout {timeout:?}",
            request.segment_id,
            request.segment.url,
        );

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
                    Ok(response) => inner.on_media_downloaded(&mut state, &cancel, response),
                    Err(e) => match e.cancel_reason() {
                        Some(reason) => inner.on_download_cancelled(&cancel, reason),
                        None => inner.on_download_failed(&mut state, &request, e),
                    },
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

    /// Fetch one segment, racing the download against the stream's
    /// cancellation and the segment timeout.
    async fn download(
        &self,
        request: &DownloadRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> TsumugiResult<DownloadResponse> {
        let segment_cancel = cancel.child_token();
        let started = Instant::now();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TsumugiError::Cancelled(CancelReason::Stopped)),
            _ = tokio::time::sleep(timeout) => Err(TsumugiError::Cancelled(CancelReason::TimedOut)),
            result = self.downloader.fetch(request, segment_cancel.clone()) => result,
        };
        segment_cancel.cancel();

        let data = result?;
        self.throughput.observe(data.len(), started.elapsed());
        Ok(DownloadResponse {
            data,
            segment_id: request.segment_id,
            segment: request.segment.clone(),
        })
    }

    fn on_media_downloaded(
        &self,
        state: &mut StreamState,
        cancel: &CancellationToken,
        response: DownloadResponse,
    ) -> Completion {
        if cancel.is_cancelled() {
            return Completion::Halt;
        }

        let size = response.data.len();
        self.sink.write(response.data);

        if let Some(period) = response.segment.period {
            state.last_downloaded = Some(period);
            state.buffered_time = state.trimmed(period.end());
        }
        state.segment_id = match (&state.representation, response.segment_id) {
            (Some(representation), Some(id)) => representation.segments.next_id(id),
            _ => None,
        };

        tracing::info!(
            stream = %self.stream_type,
            "Segment [{:?}] enqueued, {size} bytes, buffered until {:?}",
            response.segment_id,
            state.buffered_time,
        );
        Completion::Continue
    }

    fn on_download_cancelled(&self, cancel: &CancellationToken, reason: CancelReason) -> Completion {
        let resume = reason == CancelReason::TimedOut && !cancel.is_cancelled();
        tracing::info!(
            stream = %self.stream_type,
            "Download cancelled ({reason:?}), continue: {resume}"
        );
        if resume {
            Completion::Continue
        } else {
            Completion::Halt
        }
    }

    fn on_download_failed(
        &self,
        state: &mut StreamState,
        request: &DownloadRequest,
        error: TsumugiError,
    ) -> Completion {
        let is_dynamic = state
            .representation
            .as_ref()
            .is_some_and(|representation| representation.is_dynamic());

        if is_dynamic {
            if error.is_not_found() {
                // not published yet or already gone, move on
                let next = match (&state.representation, request.segment_id) {
                    (Some(representation), Some(id)) => representation.segments.next_id(id),
                    _ => None,
                };
                tracing::warn!(
                    stream = %self.stream_type,
                    "Segment [{:?}] not found, skipping to [{next:?}]",
                    request.segment_id,
                );
                state.segment_id = next;
                return Completion::Continue;
            }

            // retried on the next clock tick
            tracing::warn!(
                stream = %self.stream_type,
                "Segment [{:?}] download failed: {error}",
                request.segment_id,
            );
            return Completion::Halt;
        }

        self.stop_async(state);

        let past_end = request
            .segment
            .period
            .is_some_and(|period| state.is_end_of_content(state.trimmed(period.end())));
        if past_end {
            tracing::info!(
                stream = %self.stream_type,
                "Segment [{:?}] failed at the end of content, treated as complete",
                request.segment_id,
            );
            return Completion::Halt;
        }

        tracing::error!(
            stream = %self.stream_type,
            "Segment [{:?}] download failed: {error}, stopping stream",
            request.segment_id,
        );
        state.phase = SchedulerState::Faulted;
        if self.config.report_static_failures {
            Completion::Report(format!(
                "{} segment {} download failed: {error}",
                self.stream_type, request.segment.url
            ))
        } else {
            Completion::Halt
        }
    }
}
