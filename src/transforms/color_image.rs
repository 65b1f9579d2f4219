use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

use crate::artifacts::{read_blob, ArtifactStore, Modality};
use crate::record::{CorrelationKey, ResultRecord, SnapshotRecord};
use crate::transform_registry::TransformError;

/// Reference to a raw RGB capture on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorImageSnapshot {
    pub key: CorrelationKey,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl ColorImageSnapshot {
    pub fn extract(snapshot: &SnapshotRecord) -> Result<Self, TransformError> {
        Ok(Self {
            key: snapshot.require_key()?,
            path: PathBuf::from(snapshot.require_str("color_image_path")?),
            width: snapshot.require_u32("color_image_width")?,
            height: snapshot.require_u32("color_image_height")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColorImageResult {
    pub user_id: Value,
    pub datetime: Value,
    pub color_image_path: String,
    pub height: u32,
    pub width: u32,
}

/// Encode the raw RGB capture as a JPEG artifact and report where it went.
pub fn color_image(
    artifacts: &ArtifactStore,
    snapshot: &SnapshotRecord,
) -> Result<ResultRecord, TransformError> {
    let input = ColorImageSnapshot::extract(snapshot)?;
    let pixels = read_blob(&input.path)?;
    let written = artifacts.write_rgb(
        &input.key,
        Modality::Color,
        input.width,
        input.height,
        &pixels,
    )?;

    let result = ColorImageResult {
        user_id: input.key.user_id,
        datetime: input.key.datetime,
        color_image_path: written.display().to_string(),
        height: input.height,
        width: input.width,
    };
    Ok(ResultRecord::from_serialize(&result)?)
}
