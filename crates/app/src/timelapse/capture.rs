//! The timelapse engine: capture tick, bounded buffer, scheduled flush,
//! and daily rotation.
//!
//! Two threads cooperate over one mutex-guarded state block. The capture
//! thread appends a combined frame on every tick; the scheduler thread
//! flushes the buffer into the current day's video on the update
//! interval and rotates the file name at local midnight. Only the
//! scheduler ever flushes, so appends cannot interleave with a flush.

use std::{
    collections::VecDeque,
    fs,
    path::PathBuf,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Days, Local};
use crossbeam_channel::{Sender, after, bounded, select, tick};
use tracing::{debug, info, warn};

use crate::{
    camera::SharedVideoSource,
    timelapse::{
        CaptureStatus, CombinedFrame, FrameComposer, TimelapseConfig, Video, VideoGenerator,
        VideoStatus,
    },
};

/// Hard limit on how long `stop` waits for the worker threads.
const STOP_TIMEOUT: Duration = Duration::from_secs(3);

struct State {
    frame_buffer: VecDeque<CombinedFrame>,
    current_video: String,
    last_update: Option<DateTime<Local>>,
}

struct Workers {
    stop_tx: Sender<()>,
    capture: JoinHandle<()>,
    scheduler: JoinHandle<()>,
}

pub struct TimelapseCapture {
    output_dir: PathBuf,
    config: TimelapseConfig,
    /// The sources captured by this run, fixed at construction.
    sources: Vec<SharedVideoSource>,
    composer: FrameComposer,
    generator: VideoGenerator,
    state: Mutex<State>,
    workers: Mutex<Option<Workers>>,
}

impl TimelapseCapture {
    pub fn new(
        output_dir: PathBuf,
        config: TimelapseConfig,
        sources: Vec<SharedVideoSource>,
    ) -> Self {
        let composer = FrameComposer::new(
            config.resolution.width,
            config.resolution.height,
            config.quality,
        );
        Self {
            output_dir,
            config,
            sources,
            composer,
            generator: VideoGenerator::new(),
            state: Mutex::new(State {
                frame_buffer: VecDeque::new(),
                current_video: String::new(),
                last_update: None,
            }),
            workers: Mutex::new(None),
        }
    }

    pub fn start(self: &Arc<Self>) -> Result<()> {
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("creating timelapse output directory {}", self.output_dir.display())
        })?;

        let (stop_tx, stop_rx) = bounded(1);

        let capture_rx = stop_rx.clone();
        let capture_self = self.clone();
        let capture = thread::Builder::new()
            .name("timelapse-capture".into())
            .spawn(move || {
                let ticker = tick(capture_self.config.capture_interval);
                loop {
                    select! {
                        recv(capture_rx) -> _ => return,
                        recv(ticker) -> _ => capture_self.capture_frame(),
                    }
                }
            })
            .context("failed to spawn timelapse capture thread")?;

        let scheduler_self = self.clone();
        let scheduler = thread::Builder::new()
            .name("timelapse-scheduler".into())
            .spawn(move || {
                let ticker = tick(scheduler_self.config.update_interval);
                let mut midnight = after(duration_until_midnight());
                loop {
                    select! {
                        recv(stop_rx) -> _ => return,
                        recv(ticker) -> _ => {
                            if let Err(err) = scheduler_self.update_video() {
                                warn!("timelapse flush failed: {err:#}");
                            }
                        }
                        recv(midnight) -> _ => {
                            scheduler_self.rotate_video();
                            midnight = after(duration_until_midnight());
                        }
                    }
                }
            })
            .context("failed to spawn timelapse scheduler thread")?;

        let mut workers = self
            .workers
            .lock()
            .map_err(|_| anyhow::anyhow!("timelapse worker lock poisoned"))?;
        *workers = Some(Workers {
            stop_tx,
            capture,
            scheduler,
        });

        info!(
            "timelapse capture started over {} source(s), writing to {}",
            self.sources.len(),
            self.output_dir.display()
        );
        Ok(())
    }

    /// Stop both workers, waiting at most [`STOP_TIMEOUT`]. Whatever is
    /// left in the buffer is deliberately not flushed.
    pub fn stop(&self) -> Result<()> {
        let Some(workers) = self.workers.lock().ok().and_then(|mut w| w.take()) else {
            return Ok(());
        };
        drop(workers.stop_tx);

        let (done_tx, done_rx) = bounded(1);
        let joiner = thread::Builder::new()
            .name("timelapse-join".into())
            .spawn(move || {
                let _ = workers.capture.join();
                let _ = workers.scheduler.join();
                let _ = done_tx.send(());
            });
        match joiner {
            Ok(_) => {
                if done_rx.recv_timeout(STOP_TIMEOUT).is_err() {
                    warn!("timelapse workers did not stop in time; forced stop");
                }
            }
            Err(err) => warn!("could not wait for timelapse workers: {err}"),
        }

        if let Ok(state) = self.state.lock() {
            if !state.frame_buffer.is_empty() {
                info!(
                    "{} buffered frame(s) abandoned at shutdown",
                    state.frame_buffer.len()
                );
            }
        }
        info!("timelapse capture stopped");
        Ok(())
    }

    /// One capture tick: compose and buffer, evicting the oldest frame
    /// past the cap. Composition failures only log.
    fn capture_frame(&self) {
        let combined = match self.composer.compose(&self.sources) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("combined frame capture failed: {err}");
                metrics::counter!("argus_timelapse_compose_errors_total").increment(1);
                return;
            }
        };

        if let Ok(mut state) = self.state.lock() {
            state.frame_buffer.push_back(combined);
            while state.frame_buffer.len() > self.config.max_frame_buffer {
                state.frame_buffer.pop_front();
            }
            metrics::gauge!("argus_timelapse_buffer_frames").set(state.frame_buffer.len() as f64);
        }
    }

    /// Flush the buffer into the current video. No-op when empty; on
    /// failure the buffer is kept so the next tick retries.
    fn update_video(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("timelapse state lock poisoned"))?;
        if state.frame_buffer.is_empty() {
            return Ok(());
        }

        if state.current_video.is_empty() {
            state.current_video = video_filename(Local::now(), &self.config.output_format);
        }
        let video_path = self.output_dir.join(&state.current_video);

        let frames: &[CombinedFrame] = state.frame_buffer.make_contiguous();
        self.generator
            .extend(&video_path, frames, &self.config)
            .with_context(|| format!("extending {}", video_path.display()))?;

        debug!(
            "flushed {} frame(s) into {}",
            state.frame_buffer.len(),
            video_path.display()
        );
        metrics::counter!("argus_timelapse_flushes_total").increment(1);
        state.frame_buffer.clear();
        metrics::gauge!("argus_timelapse_buffer_frames").set(0.0);
        state.last_update = Some(Local::now());
        Ok(())
    }

    /// Daily rotation: final flush for the old day, then point the
    /// current video at the new date.
    fn rotate_video(&self) {
        if let Err(err) = self.update_video() {
            warn!("final flush before rotation failed: {err:#}");
        }
        if let Ok(mut state) = self.state.lock() {
            state.current_video = video_filename(Local::now(), &self.config.output_format);
            info!("rotated timelapse video to {}", state.current_video);
        }
    }

    /// Enumerate the videos in the output directory.
    pub fn videos(&self) -> Result<Vec<Video>> {
        let current = self
            .state
            .lock()
            .map(|state| state.current_video.clone())
            .unwrap_or_default();

        let entries = match fs::read_dir(&self.output_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("reading timelapse directory {}", self.output_dir.display())
                });
            }
        };

        let mut videos = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("unreadable entry in output directory: {err}");
                    continue;
                }
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("mp4") {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if meta.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let status = if name == current {
                VideoStatus::Recording
            } else {
                VideoStatus::Completed
            };
            let date = meta
                .modified()
                .map(DateTime::<Local>::from)
                .unwrap_or_else(|_| Local::now());

            videos.push(Video {
                date,
                file_path: path.to_string_lossy().into_owned(),
                file_size: meta.len(),
                status,
                source_count: self.sources.len(),
                duration: None,
                frame_count: None,
                start_time: None,
                end_time: None,
            });
        }
        videos.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        Ok(videos)
    }

    pub fn status(&self) -> CaptureStatus {
        self.state
            .lock()
            .map(|state| CaptureStatus {
                current_video: state.current_video.clone(),
                frame_buffer_size: state.frame_buffer.len(),
                last_update: state.last_update,
            })
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn flush_now(&self) -> Result<()> {
        self.update_video()
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.state.lock().map(|s| s.frame_buffer.len()).unwrap_or(0)
    }
}

/// File name for the day containing `now`.
fn video_filename(now: DateTime<Local>, format: &str) -> String {
    format!("timelapse_{}.{format}", now.format("%Y-%m-%d"))
}

/// Time remaining until the next local midnight.
fn duration_until_midnight() -> Duration {
    let now = Local::now();
    let next = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .and_then(|naive| naive.and_local_timezone(Local).earliest());
    match next {
        Some(next) => (next - now).to_std().unwrap_or(Duration::from_secs(1)),
        // Unrepresentable local midnight (DST edge): fall back to a day.
        None => Duration::from_secs(24 * 60 * 60),
    }
}
