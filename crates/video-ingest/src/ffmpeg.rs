//! Spawns the external encoder and turns its stdout into JPEG frames.
//!
//! Capture never decodes video in-process: every stream is an encoder
//! child producing `image2pipe`/`mjpeg` output that a background thread
//! chops into frames via [`FrameSplitter`]. Stopping a stream kills the
//! child outright rather than signalling it, so a reader blocked on a
//! full pipe can never deadlock shutdown.

use std::{
    io::Read,
    process::{Child, ChildStdout, Command, Stdio},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use anyhow::anyhow;
use crossbeam_channel::{Receiver, bounded};
use tracing::debug;

use crate::{
    jpeg::FrameSplitter,
    types::{CaptureError, CaptureKind, StreamSpec},
};

/// Encoder binary resolved from `PATH`.
pub const ENCODER: &str = "ffmpeg";

/// Capacity of the internal frame queue between reader and consumer.
const STREAM_QUEUE: usize = 10;
/// Read chunk size for the encoder's stdout pipe.
const READ_CHUNK: usize = 64 * 1024;

/// Handle to a long-running MJPEG capture process.
///
/// Frames arrive on [`MjpegStream::frames`]; dropping the handle or
/// calling [`MjpegStream::stop`] kills the encoder, after which the
/// reader thread drains to EOF and exits quietly.
pub struct MjpegStream {
    frames: Receiver<Result<Vec<u8>, CaptureError>>,
    child: Arc<Mutex<Child>>,
}

impl MjpegStream {
    /// Channel carrying complete JPEG frames or read errors.
    pub fn frames(&self) -> Receiver<Result<Vec<u8>, CaptureError>> {
        self.frames.clone()
    }

    /// Kill the encoder process. Idempotent; the reap result is ignored.
    pub fn stop(&self) {
        reap(&self.child);
    }
}

impl Drop for MjpegStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn a streaming capture that emits JPEG frames until stopped.
pub fn spawn_mjpeg_stream(spec: &StreamSpec) -> Result<MjpegStream, CaptureError> {
    let mut cmd = Command::new(ENCODER);
    stream_args(&mut cmd, spec);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().map_err(|source| CaptureError::Spawn {
        input: spec.input.clone(),
        source,
    })?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CaptureError::Other(anyhow!("failed to capture encoder stdout")))?;
    let child = Arc::new(Mutex::new(child));

    let (tx, rx) = bounded(STREAM_QUEUE);
    let reader_child = child.clone();
    let input = spec.input.clone();
    thread::Builder::new()
        .name(format!("ingest-{}", thread_label(&spec.input)))
        .spawn(move || {
            stream_loop(stdout, tx, &input);
            reap(&reader_child);
        })
        .map_err(|err| CaptureError::Other(err.into()))?;

    Ok(MjpegStream { frames: rx, child })
}

/// Capture exactly one JPEG frame, killing the encoder on timeout.
pub fn capture_single_frame(
    spec: &StreamSpec,
    timeout: Duration,
) -> Result<Vec<u8>, CaptureError> {
    let mut cmd = Command::new(ENCODER);
    single_frame_args(&mut cmd, spec);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    run_with_timeout(cmd, &spec.input, timeout)
}

/// Check that the encoder binary is runnable.
pub fn probe_encoder(timeout: Duration) -> Result<(), CaptureError> {
    let mut cmd = Command::new(ENCODER);
    cmd.arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    run_with_timeout(cmd, ENCODER, timeout).map(|_| ())
}

fn stream_args(cmd: &mut Command, spec: &StreamSpec) {
    input_args(cmd, spec);
    match spec.kind {
        CaptureKind::Usb => {}
        // Screen grabs can carry odd pixel formats; normalise before mjpeg.
        CaptureKind::Screen => {
            cmd.args(["-vf", "format=yuv420p"]);
        }
    }
    cmd.args(["-f", "image2pipe", "-c:v", "mjpeg", "-q:v", "3", "-"]);
}

fn single_frame_args(cmd: &mut Command, spec: &StreamSpec) {
    input_args(cmd, spec);
    cmd.args(["-vframes", "1", "-f", "image2", "-c:v", "mjpeg", "-q:v", "2", "-"]);
}

fn input_args(cmd: &mut Command, spec: &StreamSpec) {
    let demuxer = match spec.kind {
        CaptureKind::Usb => "v4l2",
        CaptureKind::Screen => "x11grab",
    };
    cmd.args(["-f", demuxer])
        .args(["-video_size", &format!("{}x{}", spec.width, spec.height)])
        .args(["-r", &spec.frame_rate.to_string()])
        .args(["-i", &spec.input]);
}

fn stream_loop(
    mut stdout: ChildStdout,
    tx: crossbeam_channel::Sender<Result<Vec<u8>, CaptureError>>,
    input: &str,
) {
    let mut splitter = FrameSplitter::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        match stdout.read(&mut buf) {
            // EOF: the encoder exited or was killed by `stop`.
            Ok(0) => {
                debug!("encoder stream for {input} reached EOF");
                return;
            }
            Ok(n) => {
                for frame in splitter.push(&buf[..n]) {
                    if tx.send(Ok(frame)).is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                let _ = tx.send(Err(CaptureError::Other(err.into())));
                return;
            }
        }
    }
}

/// Run a finite encoder invocation, returning its stdout.
///
/// The child is read on a helper thread so the caller can enforce the
/// timeout; on expiry the child is killed and the partial output dropped.
fn run_with_timeout(
    mut cmd: Command,
    input: &str,
    timeout: Duration,
) -> Result<Vec<u8>, CaptureError> {
    let mut child = cmd.spawn().map_err(|source| CaptureError::Spawn {
        input: input.to_string(),
        source,
    })?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| CaptureError::Other(anyhow!("failed to capture encoder stdout")))?;
    let mut stderr = child.stderr.take();
    let child = Arc::new(Mutex::new(child));

    let (done_tx, done_rx) = bounded(1);
    let waiter_child = child.clone();
    thread::Builder::new()
        .name("ingest-oneshot".into())
        .spawn(move || {
            let mut out = Vec::new();
            let read = stdout
                .read_to_end(&mut out)
                .map(|_| out)
                .map_err(anyhow::Error::from);
            let mut err_text = String::new();
            if let Some(stderr) = stderr.as_mut() {
                let _ = stderr.read_to_string(&mut err_text);
            }
            let status = waiter_child.lock().ok().and_then(|mut c| c.wait().ok());
            let _ = done_tx.send((read, err_text, status));
        })
        .map_err(|err| CaptureError::Other(err.into()))?;

    match done_rx.recv_timeout(timeout) {
        Ok((Ok(out), stderr, status)) => match status {
            Some(status) if !status.success() => Err(CaptureError::Encoder {
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            }),
            _ => Ok(out),
        },
        Ok((Err(err), _, _)) => Err(CaptureError::Other(err)),
        Err(_) => {
            reap(&child);
            Err(CaptureError::Timeout { timeout })
        }
    }
}

fn reap(child: &Arc<Mutex<Child>>) {
    if let Ok(mut child) = child.lock() {
        let _ = child.kill();
        let _ = child.wait();
    }
}

fn thread_label(input: &str) -> String {
    input
        .rsplit('/')
        .next()
        .unwrap_or(input)
        .replace(':', "display")
}
