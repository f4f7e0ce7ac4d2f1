//! Versioned blob framing for the storage key/value interface.
//!
//! The storage engine itself is a collaborator: a stable blob get/put
//! interface is assumed. This module only fixes the framing used on top
//! of that interface so that a version bump discards stale records
//! cleanly rather than trusting in-memory layout to stay stable across
//! releases.

use serde::{de::DeserializeOwned, Serialize};

use hc_error::{Error, Result};

pub const KEY_RUNTIME: &str = "runtime";

pub fn bmodel_key(name: &str) -> String {
    format!("models_bmodel_{name}")
}

pub fn boiler_state_key(name: &str) -> String {
    format!("hs_boiler_{name}.state")
}

/// Reserved namespace for caller-chosen logging-backend keys.
pub const LOG_KEY_PREFIX: &str = "log_";

pub fn log_key(suffix: &str) -> String {
    format!("{LOG_KEY_PREFIX}{suffix}")
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Envelope<T> {
    version: u32,
    payload: T,
}

/// Serialize `payload` tagged with `version` into bytes suitable for
/// [`StorageBackend::dump`](../hc_core/backend/trait.StorageBackend.html).
pub fn encode_versioned<T: Serialize>(version: u32, payload: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(&Envelope {
        version,
        payload: PayloadRef(payload),
    })
    .map_err(|e| Error::Store(e.to_string()))
}

/// Helper so `encode_versioned` can serialize a borrowed payload without an
/// extra clone.
#[derive(Serialize)]
struct PayloadRef<'a, T>(&'a T);

/// Decode bytes previously produced by [`encode_versioned`]. Returns
/// [`Error::Mismatch`] if the stored version does not equal
/// `expected_version`, per the "version mismatch discards the record"
/// rule.
pub fn decode_versioned<T: DeserializeOwned>(expected_version: u32, bytes: &[u8]) -> Result<T> {
    let env: Envelope<T> = serde_json::from_slice(bytes).map_err(|e| Error::Store(e.to_string()))?;
    if env.version != expected_version {
        return Err(Error::Mismatch(format!(
            "stored version {} != expected {}",
            env.version, expected_version
        )));
    }
    Ok(env.payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, serde::Deserialize, PartialEq)]
    struct Demo {
        a: i32,
        b: String,
    }

    #[test]
    fn roundtrips_matching_version() {
        let d = Demo { a: 3, b: "x".into() };
        let bytes = encode_versioned(2, &d).unwrap();
        let back: Demo = decode_versioned(2, &bytes).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn mismatched_version_is_discarded() {
        let d = Demo { a: 3, b: "x".into() };
        let bytes = encode_versioned(2, &d).unwrap();
        let err = decode_versioned::<Demo>(3, &bytes).unwrap_err();
        assert!(matches!(err, Error::Mismatch(_)));
    }
}
