use serde::Serialize;
use serde_json::{Number, Value};

use crate::record::{CorrelationKey, ResultRecord, SnapshotRecord};
use crate::transform_registry::TransformError;

/// Pose fields of a snapshot: head rotation quaternion and translation.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseSnapshot {
    pub key: CorrelationKey,
    pub rotation: [Number; 4],
    pub translation: [Number; 3],
}

impl PoseSnapshot {
    pub fn extract(snapshot: &SnapshotRecord) -> Result<Self, TransformError> {
        Ok(Self {
            key: snapshot.require_key()?,
            rotation: [
                snapshot.require_number("pose_rotation_x")?,
                snapshot.require_number("pose_rotation_y")?,
                snapshot.require_number("pose_rotation_z")?,
                snapshot.require_number("pose_rotation_w")?,
            ],
            translation: [
                snapshot.require_number("pose_translation_x")?,
                snapshot.require_number("pose_translation_y")?,
                snapshot.require_number("pose_translation_z")?,
            ],
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoseResult {
    pub user_id: Value,
    pub datetime: Value,
    pub rotation_x: Number,
    pub rotation_y: Number,
    pub rotation_z: Number,
    pub rotation_w: Number,
    pub translation_x: Number,
    pub translation_y: Number,
    pub translation_z: Number,
}

impl From<PoseSnapshot> for PoseResult {
    fn from(input: PoseSnapshot) -> Self {
        let [rotation_x, rotation_y, rotation_z, rotation_w] = input.rotation;
        let [translation_x, translation_y, translation_z] = input.translation;
        Self {
            user_id: input.key.user_id,
            datetime: input.key.datetime,
            rotation_x,
            rotation_y,
            rotation_z,
            rotation_w,
            translation_x,
            translation_y,
            translation_z,
        }
    }
}

/// Remap the eight pose values; no I/O.
pub fn pose(snapshot: &SnapshotRecord) -> Result<ResultRecord, TransformError> {
    let result = PoseResult::from(PoseSnapshot::extract(snapshot)?);
    Ok(ResultRecord::from_serialize(&result)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: Value) -> SnapshotRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_pose_remaps_fields_in_order() {
        let input = snapshot(json!({
            "user_id": "u1",
            "datetime": "d1",
            "pose_rotation_x": 0.1,
            "pose_rotation_y": 0.2,
            "pose_rotation_z": 0.3,
            "pose_rotation_w": 1,
            "pose_translation_x": -4.5,
            "pose_translation_y": 0,
            "pose_translation_z": 2.25,
            "color_image_path": "/tmp/ignored"
        }));

        let result = pose(&input).unwrap();
        let body = String::from_utf8(result.to_vec().unwrap()).unwrap();

        assert_eq!(
            body,
            r#"{"user_id":"u1","datetime":"d1","rotation_x":0.1,"rotation_y":0.2,"rotation_z":0.3,"rotation_w":1,"translation_x":-4.5,"translation_y":0,"translation_z":2.25}"#
        );
    }

    #[test]
    fn test_pose_missing_translation_names_field() {
        let input = snapshot(json!({
            "user_id": "u1",
            "datetime": "d1",
            "pose_rotation_x": 0.1,
            "pose_rotation_y": 0.2,
            "pose_rotation_z": 0.3,
            "pose_rotation_w": 1.0,
            "pose_translation_x": 1.0,
            "pose_translation_y": 1.0
        }));

        match pose(&input) {
            Err(TransformError::MissingField { field }) => assert_eq!(field, "pose_translation_z"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_pose_rejects_non_numeric_value() {
        let input = snapshot(json!({
            "user_id": "u1",
            "datetime": "d1",
            "pose_rotation_x": "0.1",
            "pose_rotation_y": 0.2,
            "pose_rotation_z": 0.3,
            "pose_rotation_w": 1.0,
            "pose_translation_x": 1.0,
            "pose_translation_y": 1.0,
            "pose_translation_z": 1.0
        }));

        assert!(matches!(
            pose(&input),
            Err(TransformError::InvalidField { field, .. }) if field == "pose_rotation_x"
        ));
    }

    #[test]
    fn test_pose_writes_no_artifact() {
        use crate::artifacts::ArtifactStore;
        use crate::transform_registry::{Transform, TransformRegistry};
        use std::sync::Arc;

        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("processed");
        let registry = TransformRegistry::builtin(Arc::new(ArtifactStore::new(&root))).unwrap();
        let input = snapshot(json!({
            "user_id": "u1",
            "datetime": "d1",
            "pose_rotation_x": 0.1,
            "pose_rotation_y": 0.2,
            "pose_rotation_z": 0.3,
            "pose_rotation_w": 1.0,
            "pose_translation_x": 1.0,
            "pose_translation_y": 1.0,
            "pose_translation_z": 1.0
        }));

        registry.lookup("pose").unwrap().apply(&input).unwrap();

        assert!(!root.exists());
    }
}
