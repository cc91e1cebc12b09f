//! Sign command implementation.
//!
//! Wraps an image as a suite container: the image followed by an ECDSA
//! signature over its SHA-256 digest. The key file holds the hex secret
//! scalar; devices are configured with the public key the report prints.

use std::path::PathBuf;

use serde::Serialize;

use isle_mem::resolver::{decode_signing_key, public_key_hex, seal, SIGNATURE_LEN};

use crate::commands::common::read_header;
use crate::commands::traits::{Command, Report};
use crate::config::Config;
use crate::error::{IsletError, Result};

/// Arguments for the sign command.
#[derive(Debug, Clone)]
pub struct SignArgs {
    /// Image to sign.
    pub file: PathBuf,
    /// File holding the hex signing key; surrounding whitespace is ignored.
    pub key: PathBuf,
    /// Container to write.
    pub output: PathBuf,
    /// Replace an existing output file.
    pub force: bool,
}

pub struct SignCommand {
    args: SignArgs,
}

#[derive(Debug, Serialize)]
pub struct SignReport {
    pub input: String,
    pub output: String,
    pub bytes: usize,
    /// Value for `suite_public_key` on devices that should accept the suite
    pub public_key: String,
}

impl Command for SignCommand {
    type Args = SignArgs;
    type Output = SignReport;

    fn new(args: SignArgs, _config: &Config) -> Result<Self> {
        if args.output.exists() && !args.force {
            return Err(IsletError::Validation(format!(
                "Output file already exists: {}",
                args.output.display()
            )));
        }
        Ok(Self { args })
    }

    fn execute(&self) -> Result<SignReport> {
        // refuse to seal something that is not an image
        read_header(&self.args.file)?;

        let key = std::fs::read_to_string(&self.args.key)?;
        if key.trim().is_empty() {
            return Err(IsletError::Validation(format!("key file {} is empty", self.args.key.display())));
        }
        let key = decode_signing_key(&key)
            .map_err(|e| IsletError::Validation(format!("key file {}: {}", self.args.key.display(), e)))?;

        let payload = std::fs::read(&self.args.file)?;
        let container = seal(&key, &payload)?;
        std::fs::write(&self.args.output, &container)?;
        tracing::info!(
            "sealed {} ({} bytes + {} byte signature)",
            self.args.file.display(),
            payload.len(),
            SIGNATURE_LEN
        );

        Ok(SignReport {
            input: self.args.file.display().to_string(),
            output: self.args.output.display().to_string(),
            bytes: container.len(),
            public_key: public_key_hex(&key),
        })
    }

    fn name() -> &'static str {
        "sign"
    }
}

impl Report for SignReport {
    fn render(&self) -> String {
        format!(
            "{} -> {} ({} bytes)\npublic key: {}",
            self.input, self.output, self.bytes, self.public_key
        )
    }
}
