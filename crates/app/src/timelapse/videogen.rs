//! Turning buffered mosaic frames into an MP4 on disk.
//!
//! Frames are dumped as numbered JPEGs in a per-session temp directory,
//! listed in a concat manifest, and handed to the encoder. A fresh
//! target is encoded directly; an existing target is extended by
//! encoding a segment and stream-copy concatenating it, then atomically
//! renaming over the original.

use std::{
    env, fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::{Context, Result, bail};
use tracing::debug;
use video_ingest::ENCODER;

use crate::timelapse::{CombinedFrame, TimelapseConfig};

/// Seconds each frame is shown in the output (~30 fps).
const FRAME_DURATION: &str = "0.033";

pub struct VideoGenerator {
    temp_root: PathBuf,
}

/// Session temp directory removed on drop, success or failure.
struct TempSession(PathBuf);

impl Drop for TempSession {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

impl Default for VideoGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoGenerator {
    pub fn new() -> Self {
        Self {
            temp_root: env::temp_dir().join("argus-timelapse"),
        }
    }

    #[cfg(test)]
    fn with_temp_root(temp_root: PathBuf) -> Self {
        Self { temp_root }
    }

    /// Append `frames` to the video at `video_path`, creating it if
    /// needed. An empty frame list is a no-op.
    pub fn extend(
        &self,
        video_path: &Path,
        frames: &[CombinedFrame],
        config: &TimelapseConfig,
    ) -> Result<()> {
        if frames.is_empty() {
            return Ok(());
        }

        let session = self.create_session()?;
        let images = write_frame_images(&session.0, frames)?;
        if images.is_empty() {
            bail!("every buffered frame was empty");
        }

        let manifest = session.0.join("images.txt");
        fs::write(&manifest, build_manifest(&images))
            .with_context(|| format!("writing concat manifest {}", manifest.display()))?;

        if video_path.exists() {
            self.append_segment(video_path, &session.0, &manifest, config)
        } else {
            encode_manifest(&manifest, video_path, config)
        }
    }

    fn create_session(&self) -> Result<TempSession> {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let dir = self.temp_root.join(format!("session_{nanos}"));
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating session directory {}", dir.display()))?;
        Ok(TempSession(dir))
    }

    /// Encode the new frames as a segment, then stream-copy concat the
    /// existing video with it and atomically swap the result in.
    fn append_segment(
        &self,
        video_path: &Path,
        session_dir: &Path,
        manifest: &Path,
        config: &TimelapseConfig,
    ) -> Result<()> {
        let segment = session_dir.join("segment.mp4");
        encode_manifest(manifest, &segment, config)?;

        let concat_list = session_dir.join("concat.txt");
        fs::write(
            &concat_list,
            format!(
                "file '{}'\nfile '{}'\n",
                video_path.display(),
                segment.display()
            ),
        )
        .with_context(|| format!("writing concat list {}", concat_list.display()))?;

        let merged = with_suffix(video_path, ".new");
        run_encoder(
            Command::new(ENCODER)
                .args(["-f", "concat", "-safe", "0"])
                .arg("-i")
                .arg(&concat_list)
                .args(["-c", "copy", "-y"])
                .arg(&merged),
            "concatenating timelapse segments",
        )?;

        fs::rename(&merged, video_path)
            .with_context(|| format!("replacing {}", video_path.display()))?;
        Ok(())
    }
}

/// Dump composed frames as zero-padded JPEGs, skipping empty ones.
fn write_frame_images(session_dir: &Path, frames: &[CombinedFrame]) -> Result<Vec<PathBuf>> {
    let mut images = Vec::with_capacity(frames.len());
    for (index, frame) in frames.iter().enumerate() {
        if frame.composed.is_empty() {
            continue;
        }
        let path = session_dir.join(format!("frame_{index:06}.jpg"));
        fs::write(&path, &frame.composed)
            .with_context(|| format!("writing frame image {}", path.display()))?;
        images.push(path);
    }
    Ok(images)
}

/// Concat-format manifest. The final entry repeats the last image with
/// no duration so the encoder actually renders it.
fn build_manifest(images: &[PathBuf]) -> String {
    let mut manifest = String::new();
    for image in images {
        manifest.push_str(&format!(
            "file '{}'\nduration {FRAME_DURATION}\n",
            image.display()
        ));
    }
    if let Some(last) = images.last() {
        manifest.push_str(&format!("file '{}'\n", last.display()));
    }
    manifest
}

fn encode_manifest(manifest: &Path, output: &Path, config: &TimelapseConfig) -> Result<()> {
    debug!("encoding {} frames manifest into {}", manifest.display(), output.display());
    run_encoder(
        Command::new(ENCODER)
            .args(["-f", "concat", "-safe", "0"])
            .arg("-i")
            .arg(manifest)
            .args(["-r", "30", "-c:v", "libx264", "-preset", "fast"])
            .args(["-crf", &crf_for_quality(config.quality)])
            .args(["-pix_fmt", "yuv420p", "-y"])
            .arg(output),
        "encoding timelapse segment",
    )
}

fn run_encoder(cmd: &mut Command, what: &str) -> Result<()> {
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("{what}: failed to run {ENCODER}"))?;
    if !output.status.success() {
        bail!(
            "{what}: {ENCODER} exited with {} ({})",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Quality 1 (small) maps to CRF 28.0, quality 5 (best) to CRF 18.0.
fn crf_for_quality(quality: u8) -> String {
    let crf = (28.0 - f64::from(quality.saturating_sub(1)) * 2.5).clamp(18.0, 28.0);
    format!("{crf:.1}")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use std::collections::HashMap;

    fn frame(composed: Vec<u8>) -> CombinedFrame {
        CombinedFrame {
            timestamp: Local::now(),
            source_frames: HashMap::new(),
            composed,
        }
    }

    #[test]
    fn quality_clamps_to_the_crf_range() {
        assert_eq!(crf_for_quality(0), "28.0");
        assert_eq!(crf_for_quality(1), "28.0");
        assert_eq!(crf_for_quality(3), "23.0");
        assert_eq!(crf_for_quality(5), "18.0");
        assert_eq!(crf_for_quality(6), "18.0");
    }

    #[test]
    fn manifest_repeats_the_last_image_without_a_duration() {
        let images = vec![PathBuf::from("/t/frame_000000.jpg"), PathBuf::from("/t/frame_000001.jpg")];
        let manifest = build_manifest(&images);
        assert_eq!(
            manifest,
            "file '/t/frame_000000.jpg'\nduration 0.033\n\
             file '/t/frame_000001.jpg'\nduration 0.033\n\
             file '/t/frame_000001.jpg'\n"
        );
    }

    #[test]
    fn extend_with_no_frames_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let generator = VideoGenerator::with_temp_root(dir.path().join("tmp"));
        let target = dir.path().join("timelapse_2026-08-02.mp4");

        generator
            .extend(&target, &[], &TimelapseConfig::default())
            .unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn extend_rejects_all_empty_frames_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let temp_root = dir.path().join("tmp");
        let generator = VideoGenerator::with_temp_root(temp_root.clone());
        let target = dir.path().join("out.mp4");

        let err = generator
            .extend(&target, &[frame(Vec::new())], &TimelapseConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("empty"));
        // The session directory was removed on the way out.
        let leftovers: Vec<_> = fs::read_dir(&temp_root)
            .map(|entries| entries.collect())
            .unwrap_or_default();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn frame_images_are_zero_padded_and_skip_empties() {
        let dir = tempfile::tempdir().unwrap();
        let frames = vec![frame(vec![1]), frame(Vec::new()), frame(vec![2])];
        let images = write_frame_images(dir.path(), &frames).unwrap();

        let names: Vec<String> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["frame_000000.jpg", "frame_000002.jpg"]);
    }
}
