//! Dispatcher: raw message bytes in, encoded result bytes (or nothing) out.
//!
//! Every per-message failure stops here. Malformed bodies, unknown names and
//! transform rejections are logged with the correlation key when one can be
//! read, and turn into "no output" for the caller.

use std::sync::Arc;

use crate::record::{CorrelationKey, SnapshotRecord};
use crate::transform_registry::{RegistryError, TransformError, TransformRegistry};

/// Why a message produced no result.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("malformed message body: {0}")]
    Decode(#[source] serde_json::Error),

    #[error(transparent)]
    UnknownTransform(#[from] RegistryError),

    #[error("snapshot rejected: {source}")]
    Rejected {
        key: Option<CorrelationKey>,
        #[source]
        source: TransformError,
    },

    #[error("failed to encode result: {0}")]
    Encode(#[source] serde_json::Error),
}

/// An encoded result together with the capture it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub key: Option<CorrelationKey>,
    pub body: Vec<u8>,
}

/// Routes message bodies to transforms held by a shared registry.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<TransformRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<TransformRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TransformRegistry {
        &self.registry
    }

    /// Run transform `name` on `raw`, returning the encoded result.
    ///
    /// Returns `None` for any per-message failure; the failure is logged.
    pub fn dispatch(&self, name: &str, raw: &[u8]) -> Option<Vec<u8>> {
        self.dispatch_keyed(name, raw).map(|dispatched| dispatched.body)
    }

    /// Like [`Dispatcher::dispatch`], keeping the correlation key for logging.
    pub fn dispatch_keyed(&self, name: &str, raw: &[u8]) -> Option<Dispatched> {
        match self.try_dispatch(name, raw) {
            Ok(dispatched) => Some(dispatched),
            Err(err) => {
                log_failure(name, &err);
                None
            }
        }
    }

    /// Decode, look up, invoke and encode, surfacing the failure.
    pub fn try_dispatch(&self, name: &str, raw: &[u8]) -> Result<Dispatched, DispatchError> {
        let snapshot = SnapshotRecord::from_slice(raw).map_err(DispatchError::Decode)?;
        let transform = self.registry.lookup(name)?;

        let key = snapshot.correlation_key();
        if let Some(key) = &key {
            tracing::debug!(
                transform = name,
                user_id = %key.user_id_text(),
                datetime = %key.datetime_text(),
                "received snapshot"
            );
        }

        let result = transform
            .apply(&snapshot)
            .map_err(|source| DispatchError::Rejected {
                key: key.clone(),
                source,
            })?;
        let body = result.to_vec().map_err(DispatchError::Encode)?;

        Ok(Dispatched {
            key: result.correlation_key().or(key),
            body,
        })
    }
}

fn log_failure(name: &str, err: &DispatchError) {
    match err {
        DispatchError::Rejected { key: Some(key), source } => tracing::warn!(
            transform = name,
            user_id = %key.user_id_text(),
            datetime = %key.datetime_text(),
            error = %source,
            "snapshot rejected"
        ),
        DispatchError::Rejected { key: None, source } => tracing::warn!(
            transform = name,
            error = %source,
            "snapshot without correlation key rejected"
        ),
        DispatchError::UnknownTransform(e) => tracing::error!(transform = name, error = %e, "dropping message"),
        DispatchError::Decode(e) | DispatchError::Encode(e) => {
            tracing::warn!(transform = name, error = %e, "dropping message")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ResultRecord;
    use crate::transform_registry::TransformName;
    use serde_json::{json, Value};

    fn dispatcher() -> Dispatcher {
        let mut registry = TransformRegistry::new();
        registry
            .register(TransformName::Feelings, Box::new(crate::transforms::feelings))
            .unwrap();
        registry
            .register(
                TransformName::Pose,
                Box::new(|_: &SnapshotRecord| -> Result<ResultRecord, TransformError> {
                    Err(TransformError::MissingField { field: "pose_rotation_x".to_string() })
                }),
            )
            .unwrap();
        Dispatcher::new(Arc::new(registry))
    }

    fn feelings_body() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "user_id": "u1",
            "datetime": "d1",
            "happiness": 1,
            "thirst": 2,
            "hunger": 3,
            "exhaustion": 4
        }))
        .unwrap()
    }

    #[test]
    fn test_dispatch_encodes_result() {
        let output = dispatcher().dispatch("feelings", &feelings_body()).unwrap();
        let decoded: Value = serde_json::from_slice(&output).unwrap();

        assert_eq!(
            decoded,
            json!({
                "user_id": "u1",
                "datetime": "d1",
                "happiness": 1,
                "thirst": 2,
                "hunger": 3,
                "exhaustion": 4
            })
        );
    }

    #[test]
    fn test_dispatch_keeps_correlation_key() {
        let dispatched = dispatcher().try_dispatch("feelings", &feelings_body()).unwrap();
        let key = dispatched.key.unwrap();

        assert_eq!(key.user_id, json!("u1"));
        assert_eq!(key.datetime, json!("d1"));
    }

    #[test]
    fn test_malformed_body_is_dropped() {
        let dispatcher = dispatcher();

        assert!(dispatcher.dispatch("feelings", b"{not json").is_none());
        assert!(matches!(
            dispatcher.try_dispatch("feelings", b"[1]"),
            Err(DispatchError::Decode(_))
        ));
    }

    #[test]
    fn test_unknown_transform_is_dropped() {
        let dispatcher = dispatcher();

        assert!(dispatcher.dispatch("color_image", &feelings_body()).is_none());
        assert!(matches!(
            dispatcher.try_dispatch("bogus", &feelings_body()),
            Err(DispatchError::UnknownTransform(RegistryError::UnknownTransform(name))) if name == "bogus"
        ));
    }

    #[test]
    fn test_rejection_carries_key() {
        match dispatcher().try_dispatch("pose", &feelings_body()) {
            Err(DispatchError::Rejected { key: Some(key), source }) => {
                assert_eq!(key.user_id, json!("u1"));
                assert!(matches!(source, TransformError::MissingField { .. }));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_decode_failure_precedes_lookup() {
        assert!(matches!(
            dispatcher().try_dispatch("bogus", b"garbage"),
            Err(DispatchError::Decode(_))
        ));
    }
}
