use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

use crate::artifacts::{read_depth_values, render_heat_map, ArtifactStore, Modality};
use crate::record::{CorrelationKey, ResultRecord, SnapshotRecord};
use crate::transform_registry::TransformError;

/// Reference to a JSON depth capture on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthImageSnapshot {
    pub key: CorrelationKey,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl DepthImageSnapshot {
    pub fn extract(snapshot: &SnapshotRecord) -> Result<Self, TransformError> {
        let input = Self {
            key: snapshot.require_key()?,
            path: PathBuf::from(snapshot.require_str("depth_image_path")?),
            width: snapshot.require_u32("depth_image_width")?,
            height: snapshot.require_u32("depth_image_height")?,
        };
        if input.width == 0 {
            return Err(TransformError::InvalidField {
                field: "depth_image_width".to_string(),
                reason: "width must be positive".to_string(),
            });
        }
        Ok(input)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepthImageResult {
    pub user_id: Value,
    pub datetime: Value,
    pub height: u32,
    pub width: u32,
    pub depth_image_path: String,
}

/// Split a flat depth array into `height` rows.
///
/// Row `i` starts at `i * width` and keeps `width - 1` values, so the last
/// column of every row is dropped. Slices are clamped to the array, which
/// makes trailing rows short or empty when the array is too small.
pub fn reshape_rows(values: &[f64], width: usize, height: usize) -> Vec<Vec<f64>> {
    let kept = width.saturating_sub(1);
    (0..height)
        .map(|row| {
            let start = (row * width).min(values.len());
            let end = (row * width + kept).min(values.len());
            values[start..end].to_vec()
        })
        .collect()
}

/// Render the depth capture as a heat map artifact and report where it went.
pub fn depth_image(
    artifacts: &ArtifactStore,
    snapshot: &SnapshotRecord,
) -> Result<ResultRecord, TransformError> {
    let input = DepthImageSnapshot::extract(snapshot)?;
    let values = read_depth_values(&input.path)?;

    // Rows starting past the array would be empty and can never render.
    let filled = values.len().div_ceil(input.width as usize);
    if input.height as usize > filled {
        return Err(TransformError::InvalidField {
            field: "depth_image_height".to_string(),
            reason: format!(
                "{} rows requested but the depth data fills {}",
                input.height, filled
            ),
        });
    }
    let rows = reshape_rows(&values, input.width as usize, input.height as usize);
    let map = render_heat_map(&rows)?;
    let written = artifacts.write_rgb(
        &input.key,
        Modality::Depth,
        map.width,
        map.height,
        &map.pixels,
    )?;

    let result = DepthImageResult {
        user_id: input.key.user_id,
        datetime: input.key.datetime,
        height: input.height,
        width: input.width,
        depth_image_path: written.display().to_string(),
    };
    Ok(ResultRecord::from_serialize(&result)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactError;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_reshape_keeps_width_minus_one_per_row() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];

        let rows = reshape_rows(&values, 3, 2);

        assert_eq!(rows, vec![vec![1.0, 2.0], vec![4.0, 5.0]]);
        assert!(rows.iter().all(|row| row.len() == 2));
    }

    #[test]
    fn test_reshape_clamps_at_array_end() {
        // Second row starts at 3 but only one value is left before the end.
        assert_eq!(
            reshape_rows(&[1.0, 2.0, 3.0, 4.0], 3, 2),
            vec![vec![1.0, 2.0], vec![4.0]]
        );
        // Rows past the array are empty.
        assert_eq!(
            reshape_rows(&[1.0, 2.0, 3.0], 3, 3),
            vec![vec![1.0, 2.0], vec![], vec![]]
        );
        // Extra trailing values are ignored.
        assert_eq!(
            reshape_rows(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0], 3, 2),
            vec![vec![1.0, 2.0], vec![4.0, 5.0]]
        );
        assert!(reshape_rows(&[1.0, 2.0], 1, 2).iter().all(Vec::is_empty));
    }

    fn snapshot(path: &std::path::Path, width: u32, height: u32) -> SnapshotRecord {
        serde_json::from_value(json!({
            "user_id": "u1",
            "datetime": 1575446887339u64,
            "depth_image_path": path.display().to_string(),
            "depth_image_width": width,
            "depth_image_height": height
        }))
        .unwrap()
    }

    #[test]
    fn test_depth_image_renders_artifact() {
        let dir = TempDir::new().unwrap();
        let raw = dir.path().join("depth.json");
        fs::write(&raw, r#"{"data": [0.5, 1.0, 9.0, 1.5, 2.0, 9.0]}"#).unwrap();
        let store = ArtifactStore::new(dir.path().join("processed"));

        let result = depth_image(&store, &snapshot(&raw, 3, 2)).unwrap();

        let expected = dir.path().join("processed").join("u1_1575446887339_depth.jpg");
        assert!(expected.exists());
        assert_eq!(
            result.get("depth_image_path"),
            Some(&json!(expected.display().to_string()))
        );
        assert_eq!(result.get("width"), Some(&json!(3)));
        assert_eq!(result.get("height"), Some(&json!(2)));
        assert_eq!(result.get("datetime"), Some(&json!(1575446887339u64)));
    }

    #[test]
    fn test_depth_image_rejects_ragged_grid() {
        let dir = TempDir::new().unwrap();
        let raw = dir.path().join("depth.json");
        fs::write(&raw, "[1, 2, 3, 4]").unwrap();
        let store = ArtifactStore::new(dir.path().join("processed"));

        let result = depth_image(&store, &snapshot(&raw, 3, 2));

        assert!(matches!(
            result,
            Err(TransformError::Artifact(ArtifactError::Render(_)))
        ));
        assert!(!store.root().exists());
    }

    #[test]
    fn test_depth_image_rejects_zero_width() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());

        assert!(matches!(
            depth_image(&store, &snapshot(&dir.path().join("d.json"), 0, 2)),
            Err(TransformError::InvalidField { field, .. }) if field == "depth_image_width"
        ));
    }

    #[test]
    fn test_depth_image_rejects_height_beyond_data() {
        let dir = TempDir::new().unwrap();
        let raw = dir.path().join("depth.json");
        fs::write(&raw, "[1, 2, 3, 4, 5, 6]").unwrap();
        let store = ArtifactStore::new(dir.path().join("processed"));

        let result = depth_image(&store, &snapshot(&raw, 3, 4_000_000_000));

        assert!(matches!(
            result,
            Err(TransformError::InvalidField { field, .. }) if field == "depth_image_height"
        ));
        assert!(!store.root().exists());
    }

    #[test]
    fn test_depth_image_keeps_artifact_under_root() {
        let dir = TempDir::new().unwrap();
        let raw = dir.path().join("depth.json");
        fs::write(&raw, "[1, 2, 3, 4, 5, 6]").unwrap();
        let store = ArtifactStore::new(dir.path().join("processed"));
        let input: SnapshotRecord = serde_json::from_value(json!({
            "user_id": "u1",
            "datetime": "../../escaped",
            "depth_image_path": raw.display().to_string(),
            "depth_image_width": 3,
            "depth_image_height": 2
        }))
        .unwrap();

        assert!(matches!(
            depth_image(&store, &input),
            Err(TransformError::Artifact(ArtifactError::UnsafeName { field: "datetime", .. }))
        ));
        assert!(!store.root().exists());
    }
}
