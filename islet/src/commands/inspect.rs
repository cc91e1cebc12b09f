//! Inspect command implementation.
//!
//! Prints the header of an object-memory file and the layout of its
//! memory component without loading its parents.

use std::path::PathBuf;

use serde::Serialize;

use crate::commands::common::{read_image, ImageSummary};
use crate::commands::traits::{Command, Report};
use crate::config::Config;
use crate::error::Result;

/// Arguments for the inspect command.
#[derive(Debug, Clone)]
pub struct InspectArgs {
    /// Image file to read.
    pub file: PathBuf,
}

/// Inspect command handler.
pub struct InspectCommand {
    args: InspectArgs,
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct InspectReport(ImageSummary);

impl Command for InspectCommand {
    type Args = InspectArgs;
    type Output = InspectReport;

    fn new(args: InspectArgs, _config: &Config) -> Result<Self> {
        Ok(Self { args })
    }

    fn execute(&self) -> Result<InspectReport> {
        read_image(&self.args.file).map(InspectReport)
    }

    fn name() -> &'static str {
        "inspect"
    }
}

impl Report for InspectReport {
    fn render(&self) -> String {
        let s = &self.0;
        let parent = if s.header.has_parent() {
            format!("{} (hash {:#x})", s.header.parent_uri, s.header.parent_hash)
        } else {
            "none".to_string()
        };
        let mut lines = vec![
            format!("file:       {}", s.path),
            format!("version:    {}.{}", s.header.major_version, s.header.minor_version),
            format!(
                "attributes: {:#x} ({}-bit, {} endian{})",
                s.header.attributes.bits(),
                s.bytes_per_word * 8,
                if s.big_endian { "big" } else { "little" },
                if s.has_typemap { ", typemap" } else { "" }
            ),
            format!("parent:     {}", parent),
            format!("root:       {}", s.root),
            format!("size:       {} bytes", s.size),
            format!("pointers:   {}", s.pointers),
            format!("hash:       {:#x}", s.hash),
        ];
        if s.padding > 0 {
            lines.push(format!("padding:    {} bytes", s.padding));
        }
        lines.join("\n")
    }
}
