//! Load command implementation.
//!
//! Loads an image and its parent chain through the resolver, relocating
//! each into the simulated heap, and prints where every memory ended up.

use serde::Serialize;

use isle_mem::{LoaderConfig, ObjectMemory, ObjectMemoryLoader};

use crate::commands::common::{file_dir, to_uri};
use crate::commands::traits::{Command, Report};
use crate::config::Config;
use crate::error::Result;

/// Arguments for the load command.
#[derive(Debug, Clone)]
pub struct LoadArgs {
    /// URI or file path of the image.
    pub uri: String,
    /// Load into read-only memory instead of RAM.
    pub read_only: bool,
    /// Extra directories searched for `file://` parents.
    pub path: Option<String>,
    /// Run as the hosted build tool.
    pub hosted: bool,
}

pub struct LoadCommand {
    uri: String,
    read_only: bool,
    config: LoaderConfig,
}

/// One memory of the loaded chain
#[derive(Debug, Serialize)]
pub struct LoadedMemory {
    pub uri: String,
    pub start: u64,
    pub size: usize,
    pub root: u64,
    pub hash: i32,
    pub read_only: bool,
}

impl From<&ObjectMemory> for LoadedMemory {
    fn from(memory: &ObjectMemory) -> Self {
        Self {
            uri: memory.uri().to_string(),
            start: memory.start().to_u64(),
            size: memory.size(),
            root: memory.root().to_u64(),
            hash: memory.hash(),
            read_only: memory.is_read_only(),
        }
    }
}

/// The chain from the loaded memory down to the bootstrap
#[derive(Debug, Serialize)]
pub struct LoadReport {
    pub chain: Vec<LoadedMemory>,
}

impl Command for LoadCommand {
    type Args = LoadArgs;
    type Output = LoadReport;

    fn new(args: LoadArgs, config: &Config) -> Result<Self> {
        let uri = to_uri(&args.uri);
        let mut loader = config.loader.clone();
        if let Some(path) = &args.path {
            loader.add_file_path(path);
        }
        if let Some(dir) = file_dir(&uri) {
            loader.file_path.push(dir);
        }
        loader.hosted |= args.hosted;
        Ok(Self {
            uri,
            read_only: args.read_only,
            config: loader,
        })
    }

    fn execute(&self) -> Result<LoadReport> {
        let loader = ObjectMemoryLoader::new(self.config.clone())?;
        let file = loader.load_uri(&self.uri, self.read_only)?;
        let memory = file.memory()?;

        let chain = std::iter::once(memory.as_ref())
            .chain(memory.ancestors())
            .map(LoadedMemory::from)
            .collect();
        Ok(LoadReport { chain })
    }

    fn name() -> &'static str {
        "load"
    }
}

impl Report for LoadReport {
    fn render(&self) -> String {
        self.chain
            .iter()
            .enumerate()
            .map(|(depth, m)| {
                format!(
                    "{}{} @ {:#x} size {} root {:#x} hash {:#x}{}",
                    "  ".repeat(depth),
                    m.uri,
                    m.start,
                    m.size,
                    m.root,
                    m.hash,
                    if m.read_only { " [ro]" } else { "" }
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
