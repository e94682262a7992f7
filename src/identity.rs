//! Participant identity.
//!
//! Each participant has a persistent Ed25519 keypair and a display name. The
//! public half and a signature attribute every snapshot the participant
//! authors. Created once, persisted locally, never mutated.

use crate::error::{ApiError, StorageError};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// On-disk identity record.
#[derive(Serialize, Deserialize)]
struct IdentityRecord {
    name: String,
    secret_key: String,
}

/// Signing keypair plus display name.
#[derive(Clone)]
pub struct Identity {
    name: String,
    signing_key: SigningKey,
}

impl Identity {
    /// Generate a new random identity.
    pub fn generate(name: &str) -> Result<Self, ApiError> {
        validate_name(name)?;
        Ok(Self {
            name: name.to_string(),
            signing_key: SigningKey::generate(&mut OsRng),
        })
    }

    /// Rebuild an identity from its secret key bytes.
    pub fn from_secret_bytes(name: &str, bytes: &[u8; 32]) -> Result<Self, ApiError> {
        validate_name(name)?;
        Ok(Self {
            name: name.to_string(),
            signing_key: SigningKey::from_bytes(bytes),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hex encoding of the verifying key.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Load the identity at `path`, or create and persist one named `name`.
    ///
    /// An existing identity under a different name is an error: names are
    /// fixed once created.
    pub fn load_or_create(path: &Path, name: &str) -> Result<Self, ApiError> {
        if path.exists() {
            let identity = Self::load(path)?;
            if identity.name != name {
                return Err(ApiError::IdentityError(format!(
                    "Identity at {:?} belongs to '{}', not '{}'",
                    path, identity.name, name
                )));
            }
            return Ok(identity);
        }

        debug!("Generating new participant identity");
        let identity = Self::generate(name)?;
        identity.save(path)?;
        info!(
            name = %identity.name,
            public_key = %identity.public_key_hex(),
            path = %path.display(),
            "Generated new participant identity"
        );
        Ok(identity)
    }

    /// Load an existing identity.
    pub fn load(path: &Path) -> Result<Self, ApiError> {
        let bytes = fs::read(path).map_err(|e| {
            ApiError::IdentityError(format!("Failed to read identity file {:?}: {}", path, e))
        })?;
        let record: IdentityRecord = serde_json::from_slice(&bytes).map_err(|e| {
            ApiError::IdentityError(format!("Invalid identity file {:?}: {}", path, e))
        })?;
        let secret = hex::decode(&record.secret_key)
            .map_err(|e| ApiError::IdentityError(format!("Invalid secret key encoding: {}", e)))?;
        let secret: [u8; 32] = secret.try_into().map_err(|_| {
            ApiError::IdentityError("invalid key length (expected 32 bytes)".to_string())
        })?;

        let identity = Self::from_secret_bytes(&record.name, &secret)?;
        info!(name = %identity.name, public_key = %identity.public_key_hex(), "Loaded participant identity");
        Ok(identity)
    }

    /// Persist the identity, readable only by the owner on unix.
    pub fn save(&self, path: &Path) -> Result<(), ApiError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(StorageError::IoError)?;
        }

        let record = IdentityRecord {
            name: self.name.clone(),
            secret_key: hex::encode(self.signing_key.to_bytes()),
        };
        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|e| StorageError::Encoding(format!("identity record: {}", e)))?;

        write_private(path, &bytes).map_err(|e| {
            ApiError::IdentityError(format!("Failed to write identity file {:?}: {}", path, e))
        })
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("name", &self.name)
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

#[cfg(unix)]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)?;
    file.flush()
}

#[cfg(not(unix))]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    fs::write(path, bytes)
}

fn validate_name(name: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::IdentityError(
            "Participant name cannot be empty".to_string(),
        ));
    }
    if name.chars().any(char::is_control) {
        return Err(ApiError::IdentityError(format!(
            "Participant name contains control characters: {:?}",
            name
        )));
    }
    Ok(())
}

/// Check a hex-encoded signature against a hex-encoded public key.
pub fn verify_signature(public_key_hex: &str, message: &[u8], signature_hex: &str) -> bool {
    let Ok(key_bytes) = hex::decode(public_key_hex) else {
        return false;
    };
    let Ok(key_bytes) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    key.verify(message, &Signature::from_bytes(&sig_bytes)).is_ok()
}
