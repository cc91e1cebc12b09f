//! URI resolution for object-memory sources
//!
//! Supported schemes:
//!
//! | scheme       | source                                                     |
//! |--------------|------------------------------------------------------------|
//! | `file://`    | a file, relative paths searched along the configured path |
//! | `memory:`    | an image registered in process                             |
//! | `suite://`   | a signed container `<suite_dir>/<name>.suite`              |
//!
//! A suite container is the image followed by a 64-byte secp256k1 ECDSA
//! signature (`r || s`) over the SHA-256 digest of the image. The loader
//! holds only the public key; the image is handed out after the signature
//! verifies.

use std::io::{Error as IoError, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::config::LoaderConfig;
use crate::error::{MemError, Result};
use crate::logging::{log_event, LoadEvent};

/// URI of the image at the bottom of every chain
pub const BOOTSTRAP_URI: &str = "memory:bootstrap";

/// URI of the installed library suite
pub const LIBRARY_URI: &str = "suite://library";

pub const FILE_SCHEME: &str = "file://";
pub const MEMORY_SCHEME: &str = "memory:";
pub const SUITE_SCHEME: &str = "suite://";

/// Bytes of the signature trailing a suite container
pub const SIGNATURE_LEN: usize = 64;

/// Resolves URIs to image bytes
pub struct UriResolver {
    file_path: Vec<PathBuf>,
    suite_dir: PathBuf,
    suite_key: Option<VerifyingKey>,
    hosted: bool,
    bootstrap_url: String,
    images: RwLock<IndexMap<String, Arc<[u8]>>>,
}

impl UriResolver {
    pub fn new(config: &LoaderConfig) -> Result<Self> {
        let suite_key = config
            .suite_public_key
            .as_deref()
            .map(decode_public_key)
            .transpose()?;
        Ok(Self {
            file_path: config.file_path.clone(),
            suite_dir: config.suite_dir.clone(),
            suite_key,
            hosted: config.hosted,
            bootstrap_url: config.bootstrap_url.clone(),
            images: RwLock::new(IndexMap::new()),
        })
    }

    /// Make `bytes` available under a `memory:` URI
    pub fn register(&self, uri: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Result<()> {
        let uri = uri.into();
        if !uri.starts_with(MEMORY_SCHEME) {
            return Err(MemError::InvalidArgument(format!(
                "only {} URIs can be registered, got {}",
                MEMORY_SCHEME, uri
            )));
        }
        self.images.write().insert(uri, bytes.into());
        Ok(())
    }

    pub fn is_registered(&self, uri: &str) -> bool {
        self.images.read().contains_key(uri)
    }

    /// Location actually read for `uri`
    ///
    /// In hosted mode an unregistered bootstrap URI stands for the
    /// configured bootstrap URL.
    pub fn locate(&self, uri: &str) -> String {
        if self.hosted && uri == BOOTSTRAP_URI && !self.is_registered(uri) {
            self.bootstrap_url.clone()
        } else {
            uri.to_string()
        }
    }

    /// Image bytes for `uri`
    pub fn open(&self, uri: &str) -> Result<Arc<[u8]>> {
        let url = self.locate(uri);
        if let Some(name) = url.strip_prefix(FILE_SCHEME) {
            let path = self.find_file(Path::new(name))?;
            log::debug!("{} resolved to {}", uri, path.display());
            Ok(std::fs::read(&path)?.into())
        } else if let Some(name) = url.strip_prefix(SUITE_SCHEME) {
            let path = self.suite_dir.join(format!("{}.suite", name));
            let container = std::fs::read(&path).map_err(|e| {
                IoError::new(e.kind(), format!("{}: {}", path.display(), e))
            })?;
            self.unseal(&url, &container).map(Arc::from)
        } else if url.starts_with(MEMORY_SCHEME) {
            self.images.read().get(url.as_str()).cloned().ok_or_else(|| {
                MemError::Io(IoError::new(
                    ErrorKind::NotFound,
                    format!("no image registered for {}", url),
                ))
            })
        } else {
            Err(MemError::UnsupportedUri(url))
        }
    }

    fn find_file(&self, name: &Path) -> Result<PathBuf> {
        if name.is_absolute() || name.exists() {
            return Ok(name.to_path_buf());
        }
        self.file_path
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.exists())
            .ok_or_else(|| {
                MemError::Io(IoError::new(
                    ErrorKind::NotFound,
                    format!(
                        "{} not found in current directory or search path {:?}",
                        name.display(),
                        self.file_path
                    ),
                ))
            })
    }

    /// Check a suite container and return its image
    pub fn unseal(&self, uri: &str, container: &[u8]) -> Result<Vec<u8>> {
        if container.len() < SIGNATURE_LEN {
            return Err(MemError::format(uri, "signature", "container shorter than its signature"));
        }
        let (payload, signature) = container.split_at(container.len() - SIGNATURE_LEN);

        let Some(key) = &self.suite_key else {
            log_event(LoadEvent::SignatureSkipped { uri: uri.to_string() });
            return Ok(payload.to_vec());
        };

        let verified = Signature::from_slice(signature)
            .and_then(|signature| key.verify_prehash(&Sha256::digest(payload), &signature));
        if let Err(e) = verified {
            log::debug!("{}: {}", uri, e);
            return Err(MemError::SignatureInvalid {
                uri: uri.to_string(),
                hint: signature_hint(uri),
            });
        }
        Ok(payload.to_vec())
    }
}

/// Parse a hex SEC1 public key
pub fn decode_public_key(text: &str) -> Result<VerifyingKey> {
    let bytes = hex::decode(text.trim())
        .map_err(|e| MemError::InvalidArgument(format!("public key is not hex: {}", e)))?;
    VerifyingKey::from_sec1_bytes(&bytes)
        .map_err(|_| MemError::InvalidArgument("not a secp256k1 public key".to_string()))
}

/// Parse a hex 32-byte secret scalar
pub fn decode_signing_key(text: &str) -> Result<SigningKey> {
    let bytes = hex::decode(text.trim())
        .map_err(|e| MemError::InvalidArgument(format!("signing key is not hex: {}", e)))?;
    SigningKey::from_slice(&bytes)
        .map_err(|_| MemError::InvalidArgument("not a secp256k1 secret key".to_string()))
}

/// Hex of the compressed public key matching `key`
pub fn public_key_hex(key: &SigningKey) -> String {
    hex::encode(key.verifying_key().to_encoded_point(true).as_bytes())
}

/// Wrap an image as a suite container signed with `key`
pub fn seal(key: &SigningKey, payload: &[u8]) -> Result<Vec<u8>> {
    let signature: Signature = key
        .sign_prehash(&Sha256::digest(payload))
        .map_err(|e| MemError::Internal(format!("signing failed: {}", e)))?;
    let mut container = Vec::with_capacity(payload.len() + SIGNATURE_LEN);
    container.extend_from_slice(payload);
    container.extend_from_slice(&signature.to_bytes());
    Ok(container)
}

fn signature_hint(uri: &str) -> String {
    if uri.ends_with("library") {
        format!(
            "Signature verification of the library ({}) failed.\n\
             Reinstall the library, signed with the key installed on this device.",
            uri
        )
    } else {
        format!(
            "Signature verification of the application ({}) failed.\n\
             Redeploy the application, signed with the key installed on this device.",
            uri
        )
    }
}
