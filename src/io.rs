use image::RgbImage;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::config::{Point, SessionKey};
use crate::error::{DragError, Result};

// ============================================================================
// SESSION SNAPSHOT FILE FORMAT
// ============================================================================

/// Magic header for session snapshots (v1)
const SNAPSHOT_MAGIC_V1: &str = "LDS1";

/// Everything needed to resume a drag: which network and seed, the
/// optimiser learning rate, both latent codes and the handle/target points.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub key: SessionKey,
    pub lr: f32,
    pub w: Array2<f32>,
    pub w0: Array2<f32>,
    pub points: Vec<Point>,
    pub targets: Vec<Point>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotFileV1 {
    magic: String,
    snapshot: SessionSnapshot,
}

/// Write a snapshot as a bincode file.
pub fn save_snapshot(snapshot: &SessionSnapshot, path: &Path) -> Result<()> {
    let file = SnapshotFileV1 { magic: SNAPSHOT_MAGIC_V1.to_string(), snapshot: snapshot.clone() };
    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, &file)?;
    Ok(())
}

pub fn load_snapshot(path: &Path) -> Result<SessionSnapshot> {
    let raw = std::fs::read(path)?;
    if raw.len() < 12 {
        return Err(DragError::Serialize("snapshot file too small".into()));
    }
    // bincode writes a String as an 8-byte length prefix then the UTF-8 bytes.
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != SNAPSHOT_MAGIC_V1 {
        return Err(DragError::Serialize(format!("unknown snapshot magic '{}'", magic)));
    }
    let file: SnapshotFileV1 = bincode::deserialize(&raw)?;
    Ok(file.snapshot)
}

// ============================================================================
// FRAME EXPORT
// ============================================================================

/// Path of frame `index` inside `dir`: `frame_00042.png`.
pub fn frame_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("frame_{:05}.png", index))
}

pub fn save_png_frame(frame: &RgbImage, path: &Path) -> Result<()> {
    frame
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| DragError::Io(std::io::Error::other(format!("failed to write {}: {}", path.display(), e))))
}

/// Encode the drag animation as a looping GIF with a NeuQuant palette per
/// frame. All frames must share the first frame's dimensions.
pub fn encode_animated_gif(frames: &[RgbImage], fps: f32, path: &Path) -> Result<()> {
    let Some(first) = frames.first() else {
        return Err(DragError::Serialize("no frames to encode".into()));
    };
    if first.width() > u16::MAX as u32 || first.height() > u16::MAX as u32 {
        return Err(DragError::Serialize("frame dimensions exceed GIF maximum (65535x65535)".into()));
    }
    if frames.iter().any(|f| f.dimensions() != first.dimensions()) {
        return Err(DragError::Serialize("all GIF frames must have the same size".into()));
    }
    let (w, h) = (first.width() as u16, first.height() as u16);
    let delay_cs = ((100.0 / fps.max(0.01)).round() as u16).max(1);

    let gif_err = |e: gif::EncodingError| DragError::Serialize(format!("GIF encoding failed: {}", e));

    let (global_palette, _) = quantize_rgb(first, 256);
    let file = File::create(path)?;
    let mut encoder = gif::Encoder::new(BufWriter::new(file), w, h, &global_palette).map_err(gif_err)?;
    encoder.set_repeat(gif::Repeat::Infinite).map_err(gif_err)?;

    for img in frames {
        let (palette, indexed) = quantize_rgb(img, 256);
        let frame = gif::Frame {
            width: w,
            height: h,
            delay: delay_cs,
            palette: Some(palette),
            buffer: std::borrow::Cow::Owned(indexed),
            ..Default::default()
        };
        encoder.write_frame(&frame).map_err(gif_err)?;
    }
    Ok(())
}

/// Quantize to a flat `[R,G,B, ...]` palette plus one index per pixel.
fn quantize_rgb(image: &RgbImage, max_colors: usize) -> (Vec<u8>, Vec<u8>) {
    let rgba: Vec<u8> = image.pixels().flat_map(|p| [p[0], p[1], p[2], 255]).collect();
    let nq = color_quant::NeuQuant::new(10, max_colors, &rgba);

    let mut palette = Vec::with_capacity(max_colors * 3);
    for i in 0..max_colors {
        let color = nq.lookup(i).unwrap_or([0, 0, 0, 255]);
        palette.extend_from_slice(&color[..3]);
    }
    let indices = rgba.chunks_exact(4).map(|px| nq.index_of(px) as u8).collect();
    (palette, indices)
}
