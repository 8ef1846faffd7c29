mod clock;
mod config;

use std::{path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use anyhow::{anyhow, bail};
use clap::Parser;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    ClientBuilder,
};
use tokio::{io::AsyncWriteExt, task::JoinHandle, time::Instant};
use tsumugi::{
    download::HttpDownloader,
    index::TemplateSegmentIndex,
    sink::ChunkBuffer,
    Representation, SchedulerState, SegmentIndex, StreamSession, StreamType,
};
use url::Url;

use crate::{clock::PlaybackClock, config::Config};

type Session = StreamSession<HttpDownloader, Arc<ChunkBuffer>>;

#[derive(Parser, Debug, Clone)]
#[clap(version, about = "Stream a DASH SegmentTemplate representation to disk")]
pub struct TsumugiArgs {
    /// Media segment template of the video representation
    ///
    /// Supports $RepresentationID$, $Number$, $Time$ and $Bandwidth$, eg. "$RepresentationID$/$Number%05d$.m4s".
    #[clap(long)]
    media: String,

    /// Initialization segment template of the video representation
    #[clap(long)]
    init: Option<String>,

    /// Video representation id
    #[clap(long, default_value = "video")]
    representation_id: String,

    /// Declared video bitrate in bits per second
    #[clap(long)]
    bandwidth: Option<u64>,

    /// Media segment template of an audio representation
    #[clap(long)]
    audio_media: Option<String>,

    /// Initialization segment template of the audio representation
    #[clap(long)]
    audio_init: Option<String>,

    /// Audio representation id
    #[clap(long, default_value = "audio")]
    audio_representation_id: String,

    /// Declared audio bitrate in bits per second
    #[clap(long)]
    audio_bandwidth: Option<u64>,

    /// Segment duration in seconds
    #[clap(long, default_value = "2")]
    segment_duration: f64,

    /// Number of segments of static content
    #[clap(long)]
    segment_count: Option<u64>,

    /// Number of the first segment
    #[clap(long, default_value = "1")]
    start_number: u64,

    /// Ticks per second used by $Time$
    #[clap(long, default_value = "1")]
    timescale: u64,

    /// Minimum buffer time in seconds
    #[clap(long)]
    min_buffer_time: Option<f64>,

    /// Treat the stream as live
    #[clap(long)]
    live: bool,

    /// Time shift buffer depth of live content, in seconds
    #[clap(long, default_value = "30")]
    time_shift_buffer_depth: f64,

    /// Seconds the live stream has been running at launch
    ///
    /// Defaults to the time shift buffer depth.
    #[clap(long)]
    live_elapsed: Option<f64>,

    /// Playback speed of the simulated player
    #[clap(long, default_value = "1.0")]
    speed: f64,

    /// HTTP Header used to download
    ///
    /// Custom header. eg. "User-Agent: xxxxx".
    #[clap(short = 'H', long)]
    headers: Vec<String>,

    /// Engine configuration file
    #[clap(short, long, env = "TSUMUGI_CONFIG")]
    config: Option<PathBuf>,

    /// Output directory
    #[clap(short, long, default_value = "./output")]
    output: PathBuf,

    /// Base URL segment templates are resolved against
    base_url: Url,
}

struct StreamTemplate {
    stream_type: StreamType,
    id: String,
    media: String,
    init: Option<String>,
    bandwidth: Option<u64>,
}

impl TsumugiArgs {
    fn downloader(&self) -> anyhow::Result<HttpDownloader> {
        let mut headers = HeaderMap::new();
        for header in &self.headers {
            let (key, value) = header
                .split_once(':')
                .ok_or_else(|| anyhow!("Invalid header: {header}"))?;
            headers.insert(
                HeaderName::from_str(key.trim())?,
                HeaderValue::from_str(value.trim())?,
            );
        }

        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(HttpDownloader::new(client).with_headers(headers))
    }

    fn streams(&self) -> Vec<StreamTemplate> {
        let mut streams = vec![StreamTemplate {
            stream_type: StreamType::Video,
            id: self.representation_id.clone(),
            media: self.media.clone(),
            init: self.init.clone(),
            bandwidth: self.bandwidth,
        }];
        if let Some(media) = &self.audio_media {
            streams.push(StreamTemplate {
                stream_type: StreamType::Audio,
                id: self.audio_representation_id.clone(),
                media: media.clone(),
                init: self.audio_init.clone(),
                bandwidth: self.audio_bandwidth,
            });
        }
        streams
    }

    fn segment_duration(&self) -> anyhow::Result<Duration> {
        Ok(Duration::try_from_secs_f64(self.segment_duration)?)
    }

    /// Index of `stream`. Live content lists what was published `elapsed`
    /// after availability start.
    fn index(
        &self,
        stream: &StreamTemplate,
        elapsed: Option<Duration>,
    ) -> anyhow::Result<TemplateSegmentIndex> {
        let mut builder = TemplateSegmentIndex::builder(self.base_url.clone(), &stream.media)
            .representation_id(&stream.id)
            .segment_duration(self.segment_duration()?)
            .timescale(self.timescale)
            .start_number(self.start_number);
        if let Some(init) = &stream.init {
            builder = builder.initialization(init);
        }
        if let Some(bandwidth) = stream.bandwidth {
            builder = builder.bandwidth(bandwidth);
        }
        if let Some(min_buffer_time) = self.min_buffer_time {
            builder = builder.min_buffer_time(Duration::try_from_secs_f64(min_buffer_time)?);
        }

        builder = match elapsed {
            Some(elapsed) => builder
                .time_shift_buffer_depth(Duration::try_from_secs_f64(self.time_shift_buffer_depth)?)
                .published_until(elapsed),
            None => match self.segment_count {
                Some(count) => builder.segment_count(count),
                None => bail!("--segment-count is required for static content"),
            },
        };
        Ok(builder.build()?)
    }

    fn representation(
        &self,
        stream: &StreamTemplate,
        elapsed: Option<Duration>,
    ) -> anyhow::Result<Representation> {
        let index = self.index(stream, elapsed)?;
        let live_start = index.live_start_id().filter(|_| elapsed.is_some());
        let trim_offset = live_start.and_then(|id| index.time_range(id));

        let mut representation = Representation::new(&stream.id, Arc::new(index));
        if let Some(bandwidth) = stream.bandwidth {
            representation = representation.with_bandwidth(bandwidth);
        }
        if let Some(id) = live_start {
            representation = representation.with_aligned_start_segment_id(id);
        }
        if let Some(range) = trim_offset {
            representation = representation.with_aligned_trim_offset(range.start);
        }
        Ok(representation)
    }
}

async fn write_stream(buffer: Arc<ChunkBuffer>, path: PathBuf) -> anyhow::Result<u64> {
    let mut file = tokio::fs::File::create(&path).await?;
    let mut written = 0;
    while let Some(chunk) = buffer.read_chunk().await {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    tracing::info!("{} bytes written to {}", written, path.display());
    Ok(written)
}

fn is_finished(session: &Session) -> bool {
    session.schedulers().all(|scheduler| {
        matches!(
            scheduler.state(),
            SchedulerState::Stopped | SchedulerState::Faulted
        )
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .try_from_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = TsumugiArgs::parse();
    let config = Config::load(args.config.as_deref())?;
    let streams = args.streams();

    let launched_at = Instant::now();
    let live_elapsed = if args.live {
        let elapsed = args.live_elapsed.unwrap_or(args.time_shift_buffer_depth);
        Some(Duration::try_from_secs_f64(elapsed)?)
    } else {
        None
    };

    tokio::fs::create_dir_all(&args.output).await?;

    let mut session: Session = StreamSession::new(args.downloader()?, config.engine);
    let mut writers: Vec<JoinHandle<anyhow::Result<u64>>> = Vec::new();
    for stream in &streams {
        let buffer = Arc::new(ChunkBuffer::new());
        session.add_stream(stream.stream_type, buffer.clone());
        let path = args.output.join(format!("{}.mp4", stream.stream_type));
        writers.push(tokio::spawn(write_stream(buffer, path)));
    }
    session.on_error(|stream_type, message| {
        tracing::error!(stream = %stream_type, "{message}");
    });

    for stream in &streams {
        session.set_representation(stream.stream_type, args.representation(stream, live_elapsed)?)?;
    }
    session.start()?;

    let mut clock = PlaybackClock::new(Duration::ZERO, args.speed);
    let mut ticker = tokio::time::interval(config.playback.tick_interval());
    let mut refresher = tokio::time::interval(args.segment_duration()?);
    refresher.reset();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(
                    stalled = clock.is_stalled(),
                    "Interrupted at {:?}, stopping",
                    clock.position()
                );
                break;
            }
            _ = ticker.tick() => {
                let buffered = session
                    .schedulers()
                    .map(|scheduler| scheduler.buffered_time())
                    .min()
                    .unwrap_or_default();
                session.on_time_updated(clock.tick(buffered));

                if is_finished(&session) {
                    tracing::info!("All streams finished at {:?}", clock.position());
                    break;
                }
            }
            _ = refresher.tick(), if live_elapsed.is_some() => {
                let elapsed = live_elapsed.unwrap_or_default() + launched_at.elapsed();
                for stream in &streams {
                    let representation = args.representation(stream, Some(elapsed))?;
                    session.update_representation(stream.stream_type, representation)?;
                }
            }
        }
    }

    session.stop().await;
    for writer in writers {
        match tokio::time::timeout(Duration::from_secs(5), writer).await {
            Ok(result) => {
                result??;
            }
            // a stream which never got initialized is never ended
            Err(_) => tracing::warn!("Output writer did not finish"),
        }
    }

    Ok(())
}
