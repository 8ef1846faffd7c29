use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tsumugi::{Representation, SchedulerConfig, SchedulerState, TsumugiError};

use crate::{
    fixture::{live_index, vod_representation, wait_until, Behaviour, Harness},
    AssertWrapper,
};

fn secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

fn collect_errors(harness: &Harness) -> Arc<Mutex<Vec<String>>> {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    harness
        .scheduler
        .on_error(move |message| sink.lock().unwrap().push(message.to_string()));
    errors
}

fn live_representation(id: &str, published: u64) -> Representation {
    Representation::new(id, Arc::new(live_index(id, secs(published))))
        .with_aligned_start_segment_id(8)
        .with_aligned_trim_offset(secs(14))
}

#[tokio::test]
async fn test_start_without_representation() {
    let harness = Harness::new(SchedulerConfig::default());
    let result = harness.scheduler.start();
    assert!(matches!(result, Err(TsumugiError::RepresentationNotSet)));
    assert_eq!(harness.scheduler.state(), SchedulerState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_static_stream_to_end() -> anyhow::Result<()> {
    let harness = Harness::new(SchedulerConfig::default());
    harness
        .scheduler
        .set_representation(vod_representation("v", 3, true));
    // 4s segments with a 2s minimum buffer
    assert_eq!(
        harness.scheduler.target_buffer_depth(),
        Duration::from_millis(4400)
    );

    harness.scheduler.start()?;
    harness
        .play_until(Duration::ZERO, |h| h.sink.end_of_stream_count() > 0)
        .await;

    assert_eq!(
        harness.sink.written(),
        vec![
            "/vod/v/init.mp4",
            "/vod/v/1.m4s",
            "/vod/v/2.m4s",
            "/vod/v/3.m4s"
        ]
    );
    assert_eq!(harness.scheduler.state(), SchedulerState::Stopped);
    assert_eq!(harness.scheduler.buffered_time(), secs(12));

    // ticks after the end change nothing
    harness.scheduler.on_time_updated(secs(11));
    tokio::time::sleep(secs(1)).await;
    assert_eq!(harness.sink.end_of_stream_count(), 1);
    assert_eq!(harness.downloader.requests().len(), 4);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_buffer_depth_bounds_downloads() -> anyhow::Result<()> {
    let harness = Harness::new(SchedulerConfig::default());
    harness
        .scheduler
        .set_representation(vod_representation("v", 10, false));
    harness.scheduler.start()?;

    wait_until(|| harness.sink.written().len() == 2).await;
    tokio::time::sleep(secs(5)).await;

    // 4s buffered is within the 4.4s target, 8s is not
    assert_eq!(harness.sink.written(), vec!["/vod/v/1.m4s", "/vod/v/2.m4s"]);
    assert_eq!(harness.scheduler.buffered_time(), secs(8));

    harness.scheduler.on_time_updated(secs(4));
    wait_until(|| harness.sink.written().len() == 3).await;
    assert_eq!(harness.scheduler.segment_id(), Some(4));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_download_in_flight() -> anyhow::Result<()> {
    let harness = Arc::new(Harness::new(SchedulerConfig::default()));
    harness
        .scheduler
        .set_representation(vod_representation("v", 50, false));
    harness.scheduler.start()?;

    let tickers = (0..8).map(|_| {
        let harness = harness.clone();
        tokio::spawn(async move {
            for step in 0..100u64 {
                harness
                    .scheduler
                    .on_time_updated(Duration::from_millis(step * 200));
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    });
    for ticker in tickers.collect::<Vec<_>>() {
        ticker.await?;
    }

    assert!(harness.downloader.requests().len() > 1);
    assert_eq!(harness.downloader.max_in_flight(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_seek_resolves_segment_start() -> anyhow::Result<()> {
    let harness = Harness::new(SchedulerConfig::default());
    harness
        .scheduler
        .set_representation(vod_representation("v", 3, false));

    assert_eq!(harness.scheduler.seek(secs(5)), secs(4));
    assert_eq!(harness.scheduler.segment_id(), Some(2));
    assert_eq!(harness.scheduler.current_time(), secs(4));

    harness.scheduler.start()?;
    wait_until(|| !harness.downloader.requests().is_empty()).await;
    assert_eq!(harness.downloader.requests()[0], "/vod/v/2.m4s");

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_live_not_found_skips_segment() -> anyhow::Result<()> {
    let harness = Harness::new(SchedulerConfig::default());
    harness.downloader.script("/live/v/8.m4s", Behaviour::NotFound);
    harness
        .scheduler
        .set_representation(live_representation("v", 20));
    assert_eq!(harness.scheduler.target_buffer_depth(), secs(10));

    harness.scheduler.start()?;
    wait_until(|| harness.sink.written().len() == 2).await;

    assert_eq!(
        harness.downloader.requests(),
        vec!["/live/v/8.m4s", "/live/v/9.m4s", "/live/v/10.m4s"]
    );
    assert_eq!(harness.sink.written(), vec!["/live/v/9.m4s", "/live/v/10.m4s"]);
    // the live edge is reached, waiting for a manifest update
    assert_eq!(harness.scheduler.segment_id(), Some(11));
    assert_eq!(harness.scheduler.state(), SchedulerState::Streaming);
    assert_eq!(harness.sink.end_of_stream_count(), 0);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_live_failure_retried_on_next_tick() -> anyhow::Result<()> {
    let harness = Harness::new(SchedulerConfig::default());
    harness.downloader.script("/live/v/8.m4s", Behaviour::Fail);
    harness
        .scheduler
        .set_representation(live_representation("v", 20));

    harness.scheduler.start()?;
    wait_until(|| harness.downloader.request_count("/live/v/8.m4s") == 1).await;
    tokio::time::sleep(secs(1)).await;
    assert!(harness.sink.written().is_empty());
    assert_eq!(harness.scheduler.segment_id(), Some(8));

    harness.scheduler.on_time_updated(Duration::ZERO);
    wait_until(|| harness.sink.written().len() == 3).await;
    assert_eq!(harness.sink.written()[0], "/live/v/8.m4s");
    assert_eq!(harness.scheduler.state(), SchedulerState::Streaming);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_live_update_continues_after_last_segment() -> anyhow::Result<()> {
    let harness = Harness::new(SchedulerConfig::default());
    harness
        .scheduler
        .set_representation(live_representation("lo", 20));
    harness.scheduler.start()?;
    wait_until(|| harness.sink.written().len() == 3).await;

    // ten seconds later the window lists 6..=15
    let refreshed = Representation::new("hi", Arc::new(live_index("hi", secs(30))))
        .with_aligned_start_segment_id(12);
    harness.scheduler.update_representation(refreshed);
    wait_until(|| harness.sink.written().len() >= 4).await;

    assert_eq!(
        harness.sink.written()[..4],
        ["/live/lo/8.m4s", "/live/lo/9.m4s", "/live/lo/10.m4s", "/live/hi/11.m4s"]
    );
    assert_eq!(
        harness.scheduler.representation().assert_success().id,
        "hi"
    );

    Ok(())
}

#[tokio::test]
async fn test_update_ignored_on_static_content() {
    let harness = Harness::new(SchedulerConfig::default());
    harness
        .scheduler
        .set_representation(vod_representation("v", 3, false));

    harness
        .scheduler
        .update_representation(vod_representation("other", 3, false));

    assert_eq!(harness.scheduler.representation().assert_success().id, "v");
    assert!(harness.downloader.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_init_failure_is_fatal() -> anyhow::Result<()> {
    let harness = Harness::new(SchedulerConfig::default());
    let errors = collect_errors(&harness);
    harness.downloader.script("/vod/v/init.mp4", Behaviour::Fail);
    harness
        .scheduler
        .set_representation(vod_representation("v", 3, true));

    harness.scheduler.start()?;
    wait_until(|| harness.scheduler.state() == SchedulerState::Faulted).await;

    assert_eq!(errors.lock().unwrap().len(), 1);
    // nothing reached the demuxer, so no end of stream either
    assert_eq!(harness.sink.end_of_stream_count(), 0);

    harness.scheduler.on_time_updated(secs(1));
    tokio::time::sleep(secs(1)).await;
    assert_eq!(harness.downloader.requests(), vec!["/vod/v/init.mp4"]);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_no_switch_while_initializing() -> anyhow::Result<()> {
    let harness = Harness::new(SchedulerConfig::default());
    harness.downloader.script("/vod/v/init.mp4", Behaviour::Hang);
    harness
        .scheduler
        .set_representation(vod_representation("v", 3, true));

    harness.scheduler.start()?;
    assert_eq!(harness.scheduler.state(), SchedulerState::Initializing);
    assert!(!harness.scheduler.can_stream_switch());

    harness.scheduler.reset().await;
    assert_eq!(harness.scheduler.state(), SchedulerState::Idle);
    assert!(harness.scheduler.can_stream_switch());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_end_of_stream_sent_once() -> anyhow::Result<()> {
    let harness = Harness::new(SchedulerConfig::default());
    harness
        .scheduler
        .set_representation(vod_representation("v", 2, true));
    harness.scheduler.start()?;
    harness
        .play_until(Duration::ZERO, |h| h.sink.end_of_stream_count() > 0)
        .await;

    harness.scheduler.stop().await;
    harness.scheduler.stop().await;

    assert_eq!(harness.sink.end_of_stream_count(), 1);
    assert!(harness.scheduler.is_end_of_stream_sent());
    assert_eq!(harness.scheduler.state(), SchedulerState::Stopped);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_before_init_sends_nothing() -> anyhow::Result<()> {
    let harness = Harness::new(SchedulerConfig::default());
    harness.downloader.script("/vod/v/init.mp4", Behaviour::Hang);
    harness
        .scheduler
        .set_representation(vod_representation("v", 3, true));

    harness.scheduler.start()?;
    tokio::time::sleep(secs(1)).await;
    harness.scheduler.stop().await;

    assert_eq!(harness.sink.end_of_stream_count(), 0);
    assert_eq!(harness.scheduler.state(), SchedulerState::Stopped);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_init_segment_reused_after_reset() -> anyhow::Result<()> {
    let harness = Harness::new(SchedulerConfig::default());
    harness
        .scheduler
        .set_representation(vod_representation("v", 5, true));
    harness.scheduler.start()?;
    wait_until(|| harness.sink.written().contains(&"/vod/v/1.m4s".to_string())).await;

    harness.scheduler.reset().await;
    harness.scheduler.seek(Duration::ZERO);
    harness.scheduler.start()?;
    wait_until(|| harness.sink.written().contains(&"/vod/v/1.m4s".to_string())).await;

    assert_eq!(harness.downloader.request_count("/vod/v/init.mp4"), 1);
    assert_eq!(harness.sink.written()[0], "/vod/v/init.mp4");

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_download_is_retried() -> anyhow::Result<()> {
    let harness = Harness::new(SchedulerConfig {
        default_timeout_secs: 2.,
        ..Default::default()
    });
    harness.downloader.script("/vod/v/1.m4s", Behaviour::Hang);
    harness
        .scheduler
        .set_representation(vod_representation("v", 3, false));

    harness.scheduler.start()?;
    wait_until(|| !harness.sink.written().is_empty()).await;

    assert_eq!(harness.downloader.request_count("/vod/v/1.m4s"), 2);
    assert_eq!(harness.sink.written()[0], "/vod/v/1.m4s");
    assert_eq!(harness.scheduler.state(), SchedulerState::Streaming);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reset_cancels_download() -> anyhow::Result<()> {
    let harness = Harness::new(SchedulerConfig::default());
    harness.downloader.script("/vod/v/1.m4s", Behaviour::Hang);
    harness
        .scheduler
        .set_representation(vod_representation("v", 3, false));

    harness.scheduler.start()?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    harness.scheduler.reset().await;
    tokio::time::sleep(secs(30)).await;

    assert_eq!(harness.downloader.requests(), vec!["/vod/v/1.m4s"]);
    assert!(harness.sink.written().is_empty());
    assert_eq!(harness.scheduler.state(), SchedulerState::Idle);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_static_failure_stops_silently() -> anyhow::Result<()> {
    let harness = Harness::new(SchedulerConfig::default());
    let errors = collect_errors(&harness);
    harness.downloader.script("/vod/v/2.m4s", Behaviour::Fail);
    harness
        .scheduler
        .set_representation(vod_representation("v", 3, true));

    harness.scheduler.start()?;
    harness
        .play_until(Duration::ZERO, |h| {
            h.scheduler.state() == SchedulerState::Faulted
        })
        .await;

    assert!(errors.lock().unwrap().is_empty());
    assert_eq!(harness.sink.end_of_stream_count(), 1);
    assert_eq!(harness.downloader.request_count("/vod/v/3.m4s"), 0);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_static_failure_reported_when_configured() -> anyhow::Result<()> {
    let harness = Harness::new(SchedulerConfig {
        report_static_failures: true,
        ..Default::default()
    });
    let errors = collect_errors(&harness);
    harness.downloader.script("/vod/v/2.m4s", Behaviour::Fail);
    harness
        .scheduler
        .set_representation(vod_representation("v", 3, true));

    harness.scheduler.start()?;
    harness
        .play_until(Duration::ZERO, |h| {
            h.scheduler.state() == SchedulerState::Faulted
        })
        .await;

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("/vod/v/2.m4s"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failure_of_last_segment_completes_stream() -> anyhow::Result<()> {
    let harness = Harness::new(SchedulerConfig {
        report_static_failures: true,
        ..Default::default()
    });
    let errors = collect_errors(&harness);
    harness.downloader.script("/vod/v/3.m4s", Behaviour::Fail);
    harness
        .scheduler
        .set_representation(vod_representation("v", 3, true));

    harness.scheduler.start()?;
    harness
        .play_until(Duration::ZERO, |h| h.sink.end_of_stream_count() > 0)
        .await;

    assert_eq!(harness.scheduler.state(), SchedulerState::Stopped);
    assert!(errors.lock().unwrap().is_empty());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_update_during_download_applies_to_next_segment() -> anyhow::Result<()> {
    let harness = Harness::new(SchedulerConfig::default());
    harness
        .scheduler
        .set_representation(live_representation("lo", 20));
    harness.scheduler.start()?;

    // lo/8 is still downloading
    wait_until(|| !harness.downloader.requests().is_empty()).await;
    assert!(harness.sink.written().is_empty());
    assert_eq!(harness.downloader.requests(), vec!["/live/lo/8.m4s"]);
    harness
        .scheduler
        .update_representation(live_representation("hi", 20));
    assert_eq!(harness.downloader.requests().len(), 1);
    assert_eq!(harness.scheduler.representation().assert_success().id, "lo");

    wait_until(|| harness.sink.written().len() == 3).await;
    assert_eq!(
        harness.sink.written(),
        vec!["/live/lo/8.m4s", "/live/hi/9.m4s", "/live/hi/10.m4s"]
    );
    assert_eq!(harness.scheduler.representation().assert_success().id, "hi");

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_buffered_time_never_decreases() -> anyhow::Result<()> {
    let harness = Harness::new(SchedulerConfig {
        default_timeout_secs: 2.,
        ..Default::default()
    });
    harness.downloader.script("/vod/v/3.m4s", Behaviour::Hang);
    harness
        .scheduler
        .set_representation(vod_representation("v", 5, true));
    harness.scheduler.start()?;

    let mut samples = vec![harness.scheduler.buffered_time()];
    let mut time = Duration::ZERO;
    while harness.sink.end_of_stream_count() == 0 {
        assert!(time < secs(60), "stream did not end");
        harness.scheduler.on_time_updated(time);
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            samples.push(harness.scheduler.buffered_time());
        }
        time += secs(1);
    }

    assert!(samples.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(samples.last().copied(), Some(secs(20)));
    assert_eq!(harness.downloader.request_count("/vod/v/3.m4s"), 2);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_invalid_durations_use_defaults() -> anyhow::Result<()> {
    let harness = Harness::new(SchedulerConfig {
        default_buffer_depth_secs: f64::NAN,
        max_buffer_depth_secs: -1.,
        join_timeout_secs: -1.,
        ..Default::default()
    });
    assert_eq!(harness.scheduler.target_buffer_depth(), secs(10));

    harness.downloader.script("/vod/v/1.m4s", Behaviour::Hang);
    harness
        .scheduler
        .set_representation(vod_representation("v", 3, false));
    assert_eq!(
        harness.scheduler.target_buffer_depth(),
        Duration::from_millis(4400)
    );

    harness.scheduler.start()?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    harness.scheduler.reset().await;
    assert_eq!(harness.scheduler.state(), SchedulerState::Idle);

    Ok(())
}
