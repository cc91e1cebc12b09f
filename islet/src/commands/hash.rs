//! Hash command implementation.
//!
//! Prints the content hash a child image records for this one as its
//! parent hash.

use std::path::PathBuf;

use serde::Serialize;

use crate::commands::common::read_image;
use crate::commands::traits::{Command, Report};
use crate::config::Config;
use crate::error::Result;

/// Arguments for the hash command.
#[derive(Debug, Clone)]
pub struct HashArgs {
    pub file: PathBuf,
}

pub struct HashCommand {
    args: HashArgs,
}

#[derive(Debug, Serialize)]
pub struct HashReport {
    pub path: String,
    pub size: u32,
    pub hash: i32,
}

impl Command for HashCommand {
    type Args = HashArgs;
    type Output = HashReport;

    fn new(args: HashArgs, _config: &Config) -> Result<Self> {
        Ok(Self { args })
    }

    fn execute(&self) -> Result<HashReport> {
        let image = read_image(&self.args.file)?;
        Ok(HashReport {
            path: image.path,
            size: image.size,
            hash: image.hash,
        })
    }

    fn name() -> &'static str {
        "hash"
    }
}

impl Report for HashReport {
    fn render(&self) -> String {
        format!("{:#010x}  {}", self.hash, self.path)
    }
}
