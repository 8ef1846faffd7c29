use std::{sync::Arc, time::Duration};

use futures::future::join_all;

use crate::{
    abr::select_representation, download::Downloader, scheduler::ErrorHandler, sink::SegmentSink,
    Representation, SegmentScheduler, StreamType, ThroughputEstimator, TsumugiConfig, TsumugiError,
    TsumugiResult,
};

struct SessionStream<D, K> {
    scheduler: SegmentScheduler<Arc<D>, K>,
    adaptive: bool,
}

/// The streams of one playback, sharing a throughput estimator and a
/// downloader.
pub struct StreamSession<D, K> {
    config: TsumugiConfig,
    throughput: Arc<ThroughputEstimator>,
    downloader: Arc<D>,
    streams: Vec<(StreamType, SessionStream<D, K>)>,
    error_handler: Option<SessionErrorHandler>,
}

type SessionErrorHandler = Arc<dyn Fn(StreamType, &str) + Send + Sync>;

fn stream_error_handler(handler: &SessionErrorHandler, stream_type: StreamType) -> ErrorHandler {
    let handler = handler.clone();
    Arc::new(move |message: &str| handler(stream_type, message))
}

impl<D, K> StreamSession<D, K>
where
    D: Downloader,
    K: SegmentSink,
{
    pub fn new(downloader: D, config: TsumugiConfig) -> Self {
        Self {
            throughput: Arc::new(ThroughputEstimator::new(config.throughput.clone())),
            downloader: Arc::new(downloader),
            config,
            streams: Vec::new(),
            error_handler: None,
        }
    }

    /// Add a stream writing to `sink`, replacing any stream of the same type.
    ///
    /// Video adapts to the estimated throughput by default, audio does not.
    pub fn add_stream(&mut self, stream_type: StreamType, sink: K) -> &SegmentScheduler<Arc<D>, K> {
        self.streams.retain(|(kind, _)| *kind != stream_type);

        let scheduler = SegmentScheduler::new(
            stream_type,
            self.throughput.clone(),
            self.downloader.clone(),
            sink,
            self.config.scheduler.clone(),
        );
        if let Some(handler) = &self.error_handler {
            scheduler.set_error_handler(stream_error_handler(handler, stream_type));
        }
        self.streams.push((
            stream_type,
            SessionStream {
                scheduler,
                adaptive: stream_type == StreamType::Video,
            },
        ));

        &self.streams[self.streams.len() - 1].1.scheduler
    }

    fn stream(&self, stream_type: StreamType) -> TsumugiResult<&SessionStream<D, K>> {
        self.streams
            .iter()
            .find(|(kind, _)| *kind == stream_type)
            .map(|(_, stream)| stream)
            .ok_or(TsumugiError::StreamNotFound(stream_type))
    }

    pub fn scheduler(&self, stream_type: StreamType) -> TsumugiResult<&SegmentScheduler<Arc<D>, K>> {
        self.stream(stream_type).map(|stream| &stream.scheduler)
    }

    pub fn schedulers(&self) -> impl Iterator<Item = &SegmentScheduler<Arc<D>, K>> {
        self.streams.iter().map(|(_, stream)| &stream.scheduler)
    }

    pub fn set_adaptive(&mut self, stream_type: StreamType, adaptive: bool) -> TsumugiResult<()> {
        let stream = self
            .streams
            .iter_mut()
            .find(|(kind, _)| *kind == stream_type)
            .map(|(_, stream)| stream)
            .ok_or(TsumugiError::StreamNotFound(stream_type))?;
        stream.adaptive = adaptive;
        Ok(())
    }

    pub fn throughput(&self) -> &Arc<ThroughputEstimator> {
        &self.throughput
    }

    /// Register one error handler for every stream, including streams added
    /// later.
    pub fn on_error<F>(&mut self, handler: F)
    where
        F: Fn(StreamType, &str) + Send + Sync + 'static,
    {
        let handler: SessionErrorHandler = Arc::new(handler);
        for (stream_type, stream) in &self.streams {
            stream
                .scheduler
                .set_error_handler(stream_error_handler(&handler, *stream_type));
        }
        self.error_handler = Some(handler);
    }

    pub fn set_representation(
        &self,
        stream_type: StreamType,
        representation: Representation,
    ) -> TsumugiResult<()> {
        self.scheduler(stream_type)?
            .set_representation(representation);
        Ok(())
    }

    pub fn update_representation(
        &self,
        stream_type: StreamType,
        representation: Representation,
    ) -> TsumugiResult<()> {
        self.scheduler(stream_type)?
            .update_representation(representation);
        Ok(())
    }

    /// Seek every stream. Video is positioned first and the other streams
    /// follow the segment boundary it resolved to.
    pub fn seek(&self, position: Duration) -> Duration {
        let mut position = position;
        if let Ok(video) = self.scheduler(StreamType::Video) {
            position = video.seek(position);
        }
        for (stream_type, stream) in &self.streams {
            if *stream_type != StreamType::Video {
                stream.scheduler.seek(position);
            }
        }
        position
    }

    pub fn start(&self) -> TsumugiResult<()> {
        for scheduler in self.schedulers() {
            scheduler.start()?;
        }
        Ok(())
    }

    pub fn on_time_updated(&self, time: Duration) {
        for scheduler in self.schedulers() {
            scheduler.on_time_updated(time);
        }
    }

    /// Follow the throughput estimate with one stream.
    ///
    /// Nothing happens when the stream already uses the selected
    /// representation. Otherwise, on live content the selection is staged for
    /// the next scheduling pass, and on static content the stream is
    /// restarted at the current position unless it is still initializing.
    ///
    /// Returns whether a switch was made.
    pub async fn adapt(
        &self,
        stream_type: StreamType,
        representations: &[Representation],
    ) -> TsumugiResult<bool> {
        let stream = self.stream(stream_type)?;
        if !stream.adaptive {
            return Ok(false);
        }

        let estimate = self.throughput.estimate();
        let Some(selected) = select_representation(representations, estimate) else {
            return Ok(false);
        };

        let scheduler = &stream.scheduler;
        let Some(current) = scheduler.representation() else {
            return Ok(false);
        };
        if current.id == selected.id {
            return Ok(false);
        }
        if current.is_dynamic() {
            scheduler.update_representation(selected.clone());
            return Ok(true);
        }
        if !scheduler.can_stream_switch() {
            return Ok(false);
        }

        tracing::info!(
            stream = %stream_type,
            "Switching to representation {} at {:.0} bps",
            selected.id,
            estimate
        );
        scheduler.reset().await;
        scheduler.set_representation(selected.clone());
        scheduler.seek(scheduler.current_time());
        scheduler.start()?;
        Ok(true)
    }

    pub async fn reset(&self) {
        join_all(self.schedulers().map(|scheduler| scheduler.reset())).await;
    }

    pub async fn stop(&self) {
        join_all(self.schedulers().map(|scheduler| scheduler.stop())).await;
    }
}
