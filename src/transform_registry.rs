//! Transform registry: named transforms and the table that holds them.
//!
//! The set of transform names is closed ([`TransformName`]). The registry is
//! filled once at startup by [`TransformRegistry::builtin`] and is read-only
//! afterwards, so it can be shared behind an `Arc` without locking.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::record::{ResultRecord, SnapshotRecord};
use crate::transforms;

/// Errors raised while building or querying the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("transform '{0}' is already registered")]
    DuplicateName(TransformName),

    #[error("unknown transform: {0}")]
    UnknownTransform(String),
}

/// Why a transform rejected a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("missing field '{field}'")]
    MissingField { field: String },

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("result encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Name of a registered transform.
///
/// The string form doubles as the inbound queue name and the outbound
/// routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransformName {
    Pose,
    ColorImage,
    DepthImage,
    Feelings,
}

impl TransformName {
    /// Every transform name, in registration order.
    pub const ALL: [TransformName; 4] = [
        TransformName::Pose,
        TransformName::ColorImage,
        TransformName::DepthImage,
        TransformName::Feelings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransformName::Pose => "pose",
            TransformName::ColorImage => "color_image",
            TransformName::DepthImage => "depth_image",
            TransformName::Feelings => "feelings",
        }
    }
}

impl fmt::Display for TransformName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransformName {
    type Err = RegistryError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        TransformName::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == name)
            .ok_or_else(|| RegistryError::UnknownTransform(name.to_string()))
    }
}

/// A transform maps one snapshot to one result record.
///
/// `Err` is the "rejected" outcome: nothing is published for that snapshot.
/// Implementations hold no per-message state, so one instance can be called
/// from several threads at once.
pub trait Transform: Send + Sync {
    fn apply(&self, snapshot: &SnapshotRecord) -> Result<ResultRecord, TransformError>;
}

/// Plain functions and closures are transforms.
impl<F> Transform for F
where
    F: Fn(&SnapshotRecord) -> Result<ResultRecord, TransformError> + Send + Sync,
{
    fn apply(&self, snapshot: &SnapshotRecord) -> Result<ResultRecord, TransformError> {
        self(snapshot)
    }
}

/// Table of transforms keyed by name, in registration order.
pub struct TransformRegistry {
    transforms: IndexMap<TransformName, Box<dyn Transform>>,
}

impl TransformRegistry {
    /// Create a new empty transform registry.
    pub fn new() -> Self {
        Self {
            transforms: IndexMap::new(),
        }
    }

    /// Registry holding every built-in transform.
    ///
    /// Image transforms write their artifacts through `artifacts`.
    pub fn builtin(artifacts: Arc<ArtifactStore>) -> Result<Self, RegistryError> {
        let mut registry = Self::new();

        for name in TransformName::ALL {
            let transform: Box<dyn Transform> = match name {
                TransformName::Pose => Box::new(transforms::pose),
                TransformName::Feelings => Box::new(transforms::feelings),
                TransformName::ColorImage => {
                    let artifacts = Arc::clone(&artifacts);
                    Box::new(move |snapshot: &SnapshotRecord| {
                        transforms::color_image(&artifacts, snapshot)
                    })
                }
                TransformName::DepthImage => {
                    let artifacts = Arc::clone(&artifacts);
                    Box::new(move |snapshot: &SnapshotRecord| {
                        transforms::depth_image(&artifacts, snapshot)
                    })
                }
            };
            registry.register(name, transform)?;
        }

        Ok(registry)
    }

    /// Register a transform under `name`.
    ///
    /// Registering a name twice fails instead of shadowing the first transform.
    pub fn register(
        &mut self,
        name: TransformName,
        transform: Box<dyn Transform>,
    ) -> Result<(), RegistryError> {
        if self.transforms.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        self.transforms.insert(name, transform);
        Ok(())
    }

    /// Look up a transform by its string name.
    pub fn lookup(&self, name: &str) -> Result<&dyn Transform, RegistryError> {
        let parsed: TransformName = name.parse()?;
        self.get(parsed)
            .ok_or_else(|| RegistryError::UnknownTransform(name.to_string()))
    }

    pub fn get(&self, name: TransformName) -> Option<&dyn Transform> {
        self.transforms.get(&name).map(|transform| transform.as_ref())
    }

    /// Check if a transform is registered.
    pub fn has_transform(&self, name: &str) -> bool {
        self.lookup(name).is_ok()
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<TransformName> {
        self.transforms.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}
