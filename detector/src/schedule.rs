use chrono::{Local, TimeZone, Utc};
use gridwatch_common::config::Config;
use gridwatch_common::source::SourceFactory;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::session::{run_session, SessionError};
use crate::signals::SignalFlags;

/// What ended a wait for the next capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Due,
    CaptureNow,
    Terminate,
}

/// Run one capture session, or keep running them on the configured interval.
///
/// A failed session is fatal in single-session mode. In loop mode it is
/// logged and the next tick tries again. A reload that sets `loop_secs` to 0
/// leaves loop mode after one more session.
pub async fn run<F: SourceFactory>(
    factory: &F,
    config_path: &Path,
    mut config: Config,
    signals: &SignalFlags,
) -> Result<(), SessionError> {
    loop {
        if signals.take_reload() {
            reload(config_path, &mut config);
        }
        if signals.terminate_requested() {
            break;
        }
        if config.schedule.loop_secs == 0 {
            run_session(factory, &config, signals, std::io::stdout()).await?;
            return Ok(());
        }

        let now = Utc::now().timestamp();
        let due = next_capture_time(now, config.schedule.loop_secs, config.schedule.offset_secs);
        info!(due = %format_due(due), "next capture due");

        let delay = Duration::from_secs(due.saturating_sub(now).max(0) as u64);
        match wait_for_capture(delay, config_path, &mut config, signals).await {
            Wake::Terminate => {
                info!("terminate requested, leaving capture loop");
                break;
            }
            Wake::CaptureNow => info!("capture requested ahead of schedule"),
            Wake::Due => {}
        }
        signals.clear_capture();

        if config.schedule.loop_secs == 0 {
            warn!("reloaded configuration disables loop mode, running a final session");
            continue;
        }
        if let Err(e) = run_session(factory, &config, signals, std::io::stdout()).await {
            error!(error = %e, "capture session failed, retrying at the next tick");
        }
    }
    Ok(())
}

/// Next capture time in Unix seconds: the next multiple of `interval` plus
/// `offset`, pulled back one period if the offset pushes it more than one
/// period away. The offset is first folded into `0..interval`.
///
/// `interval` must be non-zero.
pub fn next_capture_time(now: i64, interval: u64, offset: i64) -> i64 {
    let interval = interval as i64;
    let offset = offset.rem_euclid(interval);
    let mut due = now - now.rem_euclid(interval) + interval + offset;
    if due - now > interval {
        due -= interval;
    }
    due
}

/// Sleep until `delay` elapses, handling reloads in the meantime. Returns
/// early on capture-now or terminate.
pub async fn wait_for_capture(
    delay: Duration,
    config_path: &Path,
    config: &mut Config,
    signals: &SignalFlags,
) -> Wake {
    let deadline = Instant::now() + delay;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return Wake::Due,
            _ = signals.wait_until(|s| {
                s.terminate_requested() || s.capture_requested() || s.reload_requested()
            }) => {}
        }

        if signals.take_reload() {
            reload(config_path, config);
        }
        if signals.terminate_requested() {
            return Wake::Terminate;
        }
        if signals.capture_requested() {
            return Wake::CaptureNow;
        }
    }
}

/// Re-read the config file, keeping the current one if that fails.
fn reload(config_path: &Path, config: &mut Config) {
    match Config::load(config_path) {
        Ok(fresh) => {
            info!(path = %config_path.display(), "configuration reloaded");
            *config = fresh;
        }
        Err(e) => {
            error!(path = %config_path.display(), error = %e, "reload failed, keeping previous configuration");
        }
    }
}

fn format_due(due: i64) -> String {
    match Local.timestamp_opt(due, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S (%Z)").to_string(),
        None => due.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gridwatch_common::config::CaptureConfig;
    use gridwatch_common::frame::RawFrame;
    use gridwatch_common::source::{FrameSource, SourceError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// A camera that is never there.
    #[derive(Default)]
    struct Unplugged {
        opens: AtomicUsize,
    }

    struct NoFrames;

    #[async_trait]
    impl FrameSource for NoFrames {
        fn resolution(&self) -> (u32, u32) {
            (0, 0)
        }

        async fn grab(&mut self) -> Result<RawFrame, SourceError> {
            Err(SourceError::EndOfStream)
        }

        async fn close(&mut self) {}

        fn name(&self) -> &str {
            "none"
        }
    }

    #[async_trait]
    impl SourceFactory for Unplugged {
        type Source = NoFrames;

        async fn open(&self, _config: &CaptureConfig) -> Result<NoFrames, SourceError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Err(SourceError::Connect("camera unplugged".into()))
        }
    }

    fn config() -> Config {
        Config::parse("[capture]\nurl = \"http://cam/stream\"\n[schedule]\nloop_secs = 60\n")
            .unwrap()
    }

    #[test]
    fn due_time_aligns_to_interval() {
        assert_eq!(next_capture_time(1000, 60, 0), 1020);
        assert_eq!(next_capture_time(1020, 60, 0), 1080);
        assert_eq!(next_capture_time(1000, 60, 15), 1035);
    }

    #[test]
    fn large_offset_is_pulled_back() {
        // 1020 + 60 + 50 is more than a period away
        assert_eq!(next_capture_time(1025, 60, 50), 1070);
    }

    #[test]
    fn offset_folds_into_one_period() {
        // -30 behaves as 30, 130 as 10
        assert_eq!(next_capture_time(1000, 60, -30), 1050);
        assert_eq!(next_capture_time(1000, 60, 130), 1030);
        assert_eq!(next_capture_time(1000, 60, -60), 1020);
        for offset in [-250, -30, 0, 59, 130, 600] {
            let due = next_capture_time(1000, 60, offset);
            assert!(due > 1000 && due - 1000 <= 60, "offset {offset} gave {due}");
        }
    }

    #[tokio::test]
    async fn capture_now_cuts_the_wait_short() {
        let signals = Arc::new(SignalFlags::default());
        let mut config = config();
        let trigger = {
            let signals = Arc::clone(&signals);
            tokio::spawn(async move { signals.request_capture() })
        };
        let wake = tokio::time::timeout(
            Duration::from_secs(5),
            wait_for_capture(
                Duration::from_secs(3600),
                Path::new("missing.toml"),
                &mut config,
                &signals,
            ),
        )
        .await
        .unwrap();
        trigger.await.unwrap();
        assert_eq!(wake, Wake::CaptureNow);
    }

    #[tokio::test]
    async fn failed_reload_keeps_config_and_keeps_waiting() {
        let signals = SignalFlags::default();
        signals.request_reload();
        let mut config = config();
        let wake = wait_for_capture(
            Duration::from_millis(20),
            Path::new("/nonexistent/gridwatch.toml"),
            &mut config,
            &signals,
        )
        .await;
        assert_eq!(wake, Wake::Due);
        assert_eq!(config.schedule.loop_secs, 60);
        assert!(!signals.reload_requested());
    }

    #[tokio::test]
    async fn terminate_wins_over_capture() {
        let signals = SignalFlags::default();
        signals.request_capture();
        signals.request_terminate();
        let mut config = config();
        let wake = wait_for_capture(
            Duration::from_secs(3600),
            Path::new("missing.toml"),
            &mut config,
            &signals,
        )
        .await;
        assert_eq!(wake, Wake::Terminate);
    }

    #[tokio::test]
    async fn reload_to_single_session_leaves_loop_mode() {
        let path = std::env::temp_dir().join(format!("gridwatch-reload-{}.toml", std::process::id()));
        std::fs::write(&path, "[capture]\nurl = \"http://cam/stream\"\n[schedule]\nloop_secs = 0\n")
            .unwrap();
        let factory = Unplugged::default();
        let signals = SignalFlags::default();
        signals.request_reload();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run(&factory, &path, config(), &signals),
        )
        .await
        .unwrap();
        std::fs::remove_file(&path).ok();

        // One session, run the way single-session mode runs it
        assert!(matches!(result, Err(SessionError::Open(SourceError::Connect(_)))));
        assert_eq!(factory.opens.load(Ordering::SeqCst), 1);
    }
}
