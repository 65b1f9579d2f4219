//! # Cortex Parsers: snapshot transforms over a message broker
//!
//! Sensor snapshots arrive on the `snapshot` exchange. Each parser worker
//! binds a queue named after its transform, runs the transform on every
//! snapshot, and publishes the result on the `processed_data` topic exchange
//! with the transform name as routing key.
//!
//! ## Transforms
//!
//! - `pose`: rotation quaternion and translation, passed through
//! - `feelings`: happiness, thirst, hunger and exhaustion, passed through
//! - `color_image`: raw RGB capture encoded as a JPEG artifact
//! - `depth_image`: depth capture rendered as a heat map artifact
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use cortex_parsers::{ArtifactStore, Dispatcher, TransformRegistry};
//!
//! let artifacts = Arc::new(ArtifactStore::new("files/processed"));
//! let registry = Arc::new(TransformRegistry::builtin(artifacts)?);
//! let dispatcher = Dispatcher::new(registry);
//!
//! let body = br#"{"user_id": "u1", "datetime": "d1", "happiness": 0.5,
//!                 "thirst": 0.1, "hunger": 0.2, "exhaustion": 0.3}"#;
//! let result = dispatcher.dispatch("feelings", body);
//! ```

// Records and transforms
pub mod record;
pub mod transform_registry;
pub mod transforms;
pub mod artifacts;

// Message handling
pub mod dispatcher;
pub mod publisher;
pub mod service;

// Broker capability and its NATS / in-memory implementations
pub mod broker;

pub mod config;

// Re-export key types
pub use artifacts::{ArtifactError, ArtifactStore, JpegEncoder, Modality, RasterEncoder};
pub use broker::{Broker, BrokerError, Connector, MemoryBroker, NatsConnector};
pub use config::{ConfigError, ServiceConfig};
pub use dispatcher::{DispatchError, Dispatched, Dispatcher};
pub use publisher::Publisher;
pub use record::{CorrelationKey, ResultRecord, SnapshotRecord};
pub use service::{AckMode, ServiceLoop, ServiceState};
pub use transform_registry::{
    RegistryError, Transform, TransformError, TransformName, TransformRegistry,
};
