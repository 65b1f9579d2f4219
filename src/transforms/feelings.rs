use serde::Serialize;
use serde_json::{Number, Value};

use crate::record::{CorrelationKey, ResultRecord, SnapshotRecord};
use crate::transform_registry::TransformError;

#[derive(Debug, Clone, PartialEq)]
pub struct FeelingsSnapshot {
    pub key: CorrelationKey,
    pub happiness: Number,
    pub thirst: Number,
    pub hunger: Number,
    pub exhaustion: Number,
}

impl FeelingsSnapshot {
    pub fn extract(snapshot: &SnapshotRecord) -> Result<Self, TransformError> {
        Ok(Self {
            key: snapshot.require_key()?,
            happiness: snapshot.require_number("happiness")?,
            thirst: snapshot.require_number("thirst")?,
            hunger: snapshot.require_number("hunger")?,
            exhaustion: snapshot.require_number("exhaustion")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeelingsResult {
    pub user_id: Value,
    pub datetime: Value,
    pub happiness: Number,
    pub thirst: Number,
    pub hunger: Number,
    pub exhaustion: Number,
}

impl From<FeelingsSnapshot> for FeelingsResult {
    fn from(input: FeelingsSnapshot) -> Self {
        Self {
            user_id: input.key.user_id,
            datetime: input.key.datetime,
            happiness: input.happiness,
            thirst: input.thirst,
            hunger: input.hunger,
            exhaustion: input.exhaustion,
        }
    }
}

/// Pass the four feelings through; no I/O.
pub fn feelings(snapshot: &SnapshotRecord) -> Result<ResultRecord, TransformError> {
    let result = FeelingsResult::from(FeelingsSnapshot::extract(snapshot)?);
    Ok(ResultRecord::from_serialize(&result)?)
}
