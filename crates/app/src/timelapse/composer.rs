//! Mosaic composition of per-source snapshots into one JPEG.

use std::collections::HashMap;

use chrono::Local;
use image::{ImageFormat, RgbImage, codecs::jpeg::JpegEncoder};
use thiserror::Error;
use tracing::warn;

use crate::{
    camera::{SharedVideoSource, Status},
    timelapse::{CombinedFrame, SourceFrame},
};

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("no source produced a frame")]
    NoFrames,
    #[error("mosaic encoding failed")]
    Encode(#[from] image::ImageError),
}

/// Grid placement for `n` tiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Layout {
    cols: u32,
    rows: u32,
    cell_width: u32,
    cell_height: u32,
}

pub struct FrameComposer {
    output_width: u32,
    output_height: u32,
    quality: u8,
}

impl FrameComposer {
    pub fn new(output_width: u32, output_height: u32, quality: u8) -> Self {
        Self {
            output_width,
            output_height,
            quality,
        }
    }

    /// Snapshot every active source and tile the results into one frame.
    ///
    /// Individual snapshot or decode failures skip that source; the
    /// composition only fails when nothing usable remains. Tiles are
    /// placed in (name, id) order so the mosaic is stable regardless of
    /// iteration order.
    pub fn compose(&self, sources: &[SharedVideoSource]) -> Result<CombinedFrame, ComposeError> {
        let timestamp = Local::now();
        let mut entries: Vec<(String, String, Vec<u8>)> = Vec::new();

        for source in sources {
            if source.status() != Status::Active {
                continue;
            }
            let info = source.info();
            match source.snapshot() {
                Ok(data) if !data.is_empty() => entries.push((info.name, info.id, data)),
                Ok(_) => {}
                Err(err) => warn!("snapshot from source {} failed: {err}", info.id),
            }
        }

        if entries.is_empty() {
            return Err(ComposeError::NoFrames);
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let layout = Layout::for_tiles(entries.len(), self.output_width, self.output_height);
        let mut canvas = RgbImage::new(self.output_width, self.output_height);

        let mut source_frames = HashMap::new();
        let mut tile = 0u32;
        for (_, id, data) in &entries {
            let decoded = match image::load_from_memory_with_format(data, ImageFormat::Jpeg) {
                Ok(img) => img.to_rgb8(),
                Err(err) => {
                    warn!("frame from source {id} did not decode: {err}");
                    continue;
                }
            };
            layout.draw_tile(&mut canvas, &decoded, tile);
            tile += 1;

            source_frames.insert(
                id.clone(),
                SourceFrame {
                    source_id: id.clone(),
                    timestamp,
                    data: data.clone(),
                },
            );
        }
        if tile == 0 {
            return Err(ComposeError::NoFrames);
        }

        let mut composed = Vec::new();
        JpegEncoder::new_with_quality(&mut composed, self.jpeg_quality())
            .encode_image(&canvas)?;

        Ok(CombinedFrame {
            timestamp,
            source_frames,
            composed,
        })
    }

    /// Map the 1..=5 config scale onto the JPEG 20..=100 scale.
    fn jpeg_quality(&self) -> u8 {
        self.quality.clamp(1, 5) * 20
    }
}

impl Layout {
    fn for_tiles(count: usize, output_width: u32, output_height: u32) -> Self {
        let (cols, rows) = match count {
            0 | 1 => (1, 1),
            2 => (2, 1),
            3 | 4 => (2, 2),
            n => {
                // Wider than tall: more columns than rows.
                let cols = (n as f64 * 0.6) as u32 + 1;
                let rows = (n as u32).div_ceil(cols);
                (cols, rows)
            }
        };
        Self {
            cols,
            rows,
            cell_width: output_width / cols,
            cell_height: output_height / rows,
        }
    }

    /// Nearest-neighbour resize of `src` into tile `index`. Fast and
    /// deterministic; unused cells stay black.
    fn draw_tile(&self, canvas: &mut RgbImage, src: &RgbImage, index: u32) {
        let origin_x = (index % self.cols) * self.cell_width;
        let origin_y = (index / self.cols) * self.cell_height;
        if src.width() == 0 || src.height() == 0 || self.cell_width == 0 || self.cell_height == 0 {
            return;
        }

        for y in 0..self.cell_height {
            for x in 0..self.cell_width {
                let src_x = x * src.width() / self.cell_width;
                let src_y = y * src.height() / self.cell_height;
                canvas.put_pixel(origin_x + x, origin_y + y, *src.get_pixel(src_x, src_y));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::testing::{MockSource, solid_jpeg};

    #[test]
    fn grid_shapes_follow_tile_count() {
        let layout = |n| {
            let l = Layout::for_tiles(n, 1920, 1080);
            (l.cols, l.rows)
        };
        assert_eq!(layout(1), (1, 1));
        assert_eq!(layout(2), (2, 1));
        assert_eq!(layout(3), (2, 2));
        assert_eq!(layout(4), (2, 2));
        assert_eq!(layout(5), (4, 2));
        assert_eq!(layout(9), (6, 2));
    }

    #[test]
    fn cell_sizes_divide_the_output() {
        let layout = Layout::for_tiles(5, 1920, 1080);
        assert_eq!(layout.cell_width, 480);
        assert_eq!(layout.cell_height, 540);
    }

    #[test]
    fn quality_scale_maps_to_jpeg_quality() {
        assert_eq!(FrameComposer::new(64, 64, 1).jpeg_quality(), 20);
        assert_eq!(FrameComposer::new(64, 64, 3).jpeg_quality(), 60);
        assert_eq!(FrameComposer::new(64, 64, 5).jpeg_quality(), 100);
    }

    #[test]
    fn compose_fails_without_active_frames() {
        let idle = MockSource::new("camera_1", "Front");
        idle.set_status(Status::Inactive);
        let sources: Vec<SharedVideoSource> = vec![idle];

        assert!(matches!(
            FrameComposer::new(64, 64, 3).compose(&sources),
            Err(ComposeError::NoFrames)
        ));
    }

    #[test]
    fn compose_skips_failing_sources_and_keeps_the_rest() {
        let good = MockSource::new("camera_1", "Front");
        good.set_frame(solid_jpeg(200));
        let empty = MockSource::new("camera_2", "Back");
        let sources: Vec<SharedVideoSource> = vec![good, empty];

        let frame = FrameComposer::new(64, 64, 3).compose(&sources).unwrap();
        assert_eq!(frame.source_frames.len(), 1);
        assert!(frame.source_frames.contains_key("camera_1"));
        assert!(!frame.composed.is_empty());
    }

    #[test]
    fn composition_is_deterministic_across_input_order() {
        let a = MockSource::new("camera_1", "Front");
        a.set_frame(solid_jpeg(40));
        let b = MockSource::new("camera_2", "Back");
        b.set_frame(solid_jpeg(220));

        let composer = FrameComposer::new(64, 32, 3);
        let forward_order: Vec<SharedVideoSource> = vec![a.clone(), b.clone()];
        let reverse_order: Vec<SharedVideoSource> = vec![b, a];
        let forward = composer.compose(&forward_order).unwrap();
        let reversed = composer.compose(&reverse_order).unwrap();
        assert_eq!(forward.composed, reversed.composed);
    }

    #[test]
    fn undecodable_frames_are_skipped() {
        let bogus = MockSource::new("camera_1", "Front");
        bogus.set_frame(vec![0xFF, 0xD8, 0x00, 0xFF, 0xD9]);
        let sources: Vec<SharedVideoSource> = vec![bogus];

        assert!(matches!(
            FrameComposer::new(64, 64, 3).compose(&sources),
            Err(ComposeError::NoFrames)
        ));
    }
}
