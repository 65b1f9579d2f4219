//! Derived artifacts: files written as a side effect of image transforms.
//!
//! All artifacts live under one processed-artifacts root and are named
//! `{user_id}_{datetime}_{modality}.jpg`, so re-processing a snapshot
//! overwrites the previous file instead of adding a new one.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::record::CorrelationKey;

/// Errors reading source blobs or writing derived artifacts.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to create artifact directory {}: {source}", .path.display())]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("invalid depth data in {}: {reason}", .path.display())]
    DepthData { path: PathBuf, reason: String },

    #[error("raster of {width}x{height} needs {expected} bytes, got {actual}")]
    ShortRaster {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("cannot render heat map: {0}")]
    Render(String),

    #[error("failed to encode {}: {reason}", .path.display())]
    Encode { path: PathBuf, reason: String },

    #[error("{field} '{value}' cannot be used in an artifact name")]
    UnsafeName { field: &'static str, value: String },
}

/// Sensor modality an artifact was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Color,
    Depth,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Color => "color",
            Modality::Depth => "depth",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability to encode an RGB raster into an image file.
///
/// The file format is chosen by the implementation; callers only pick the path.
pub trait RasterEncoder: Send + Sync {
    fn encode_rgb(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<(), ArtifactError>;
}

/// JPEG encoder backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegEncoder;

impl RasterEncoder for JpegEncoder {
    fn encode_rgb(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<(), ArtifactError> {
        image::save_buffer_with_format(
            path,
            pixels,
            width,
            height,
            image::ColorType::Rgb8,
            image::ImageFormat::Jpeg,
        )
        .map_err(|e| ArtifactError::Encode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// The processed-artifacts directory plus the encoder that fills it.
pub struct ArtifactStore {
    root: PathBuf,
    encoder: Box<dyn RasterEncoder>,
}

impl ArtifactStore {
    /// Store writing JPEG files under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_encoder(root, Box::new(JpegEncoder))
    }

    pub fn with_encoder(root: impl Into<PathBuf>, encoder: Box<dyn RasterEncoder>) -> Self {
        Self {
            root: root.into(),
            encoder,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic artifact path for a capture and modality.
    ///
    /// Key values that would place the file outside the root are rejected.
    pub fn artifact_path(
        &self,
        key: &CorrelationKey,
        modality: Modality,
    ) -> Result<PathBuf, ArtifactError> {
        let user_id = name_part("user_id", key.user_id_text())?;
        let datetime = name_part("datetime", key.datetime_text())?;
        let path = self
            .root
            .join(format!("{}_{}_{}.jpg", user_id, datetime, modality));

        if path.parent() != Some(self.root.as_path()) {
            return Err(ArtifactError::UnsafeName {
                field: "user_id",
                value: user_id,
            });
        }
        Ok(path)
    }

    /// Encode `pixels` as the artifact for `key`, returning where it was written.
    ///
    /// The root directory is created if absent; an existing file is overwritten.
    pub fn write_rgb(
        &self,
        key: &CorrelationKey,
        modality: Modality,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<PathBuf, ArtifactError> {
        let expected = rgb_len(width, height);
        if pixels.len() < expected {
            return Err(ArtifactError::ShortRaster {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }

        let path = self.artifact_path(key, modality)?;
        fs::create_dir_all(&self.root).map_err(|source| ArtifactError::CreateDir {
            path: self.root.clone(),
            source,
        })?;

        self.encoder
            .encode_rgb(&path, width, height, &pixels[..expected])?;
        tracing::debug!(path = %path.display(), width, height, "wrote artifact");
        Ok(path)
    }
}

/// A key value as it appears in a file name; path separators and `..` are refused.
fn name_part(field: &'static str, value: String) -> Result<String, ArtifactError> {
    let unsafe_name = value.is_empty()
        || value == "."
        || value.contains("..")
        || value.contains(['/', '\\', '\0']);
    if unsafe_name {
        return Err(ArtifactError::UnsafeName { field, value });
    }
    Ok(value)
}

fn rgb_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

/// Read a raw blob referenced by a snapshot.
pub fn read_blob(path: &Path) -> Result<Vec<u8>, ArtifactError> {
    fs::read(path).map_err(|source| ArtifactError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DepthFile {
    Bare(Vec<f64>),
    Wrapped { data: Vec<f64> },
}

/// Read a depth blob: a JSON array of numbers, or an object with a `data` array.
pub fn read_depth_values(path: &Path) -> Result<Vec<f64>, ArtifactError> {
    let raw = read_blob(path)?;
    let parsed: DepthFile = serde_json::from_slice(&raw).map_err(|e| ArtifactError::DepthData {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    Ok(match parsed {
        DepthFile::Bare(values) => values,
        DepthFile::Wrapped { data } => data,
    })
}

/// A rendered heat map: dimensions plus packed RGB pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatMap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Render a rectangular grid of values with the "hot" colormap.
///
/// Values are scaled linearly between the grid minimum and maximum; a flat
/// grid renders black. Empty or ragged grids are rejected.
pub fn render_heat_map(rows: &[Vec<f64>]) -> Result<HeatMap, ArtifactError> {
    let columns = rows.first().map(Vec::len).unwrap_or(0);
    if rows.is_empty() || columns == 0 {
        return Err(ArtifactError::Render("grid is empty".to_string()));
    }
    if let Some(row) = rows.iter().position(|row| row.len() != columns) {
        return Err(ArtifactError::Render(format!(
            "row {} has {} values, expected {}",
            row,
            rows[row].len(),
            columns
        )));
    }

    let (min, max) = rows
        .iter()
        .flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let span = max - min;

    let mut pixels = Vec::with_capacity(rows.len() * columns * 3);
    for &value in rows.iter().flatten() {
        let t = if span > 0.0 { (value - min) / span } else { 0.0 };
        pixels.extend_from_slice(&hot(t));
    }

    Ok(HeatMap {
        width: columns as u32,
        height: rows.len() as u32,
        pixels,
    })
}

// Breakpoints of the "hot" colormap: black -> red -> yellow -> white.
const RED_END: f64 = 0.365079;
const GREEN_END: f64 = 0.746032;
const RED_FLOOR: f64 = 0.0416;

/// Map `t` in `[0, 1]` to an RGB colour on the "hot" colormap.
pub fn hot(t: f64) -> [u8; 3] {
    let t = t.clamp(0.0, 1.0);
    let red = if t < RED_END {
        RED_FLOOR + (1.0 - RED_FLOOR) * t / RED_END
    } else {
        1.0
    };
    let green = ramp(t, RED_END, GREEN_END);
    let blue = ramp(t, GREEN_END, 1.0);
    [channel(red), channel(green), channel(blue)]
}

fn ramp(t: f64, start: f64, end: f64) -> f64 {
    ((t - start) / (end - start)).clamp(0.0, 1.0)
}

fn channel(level: f64) -> u8 {
    (level * 255.0).round() as u8
}
