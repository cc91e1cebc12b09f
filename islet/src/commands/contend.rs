//! Contend command implementation.
//!
//! Starts a simulated fabric, spawns threads that increment one shared
//! `AtomicInteger2`, and reports the final value with the managers'
//! counters. A final value short of threads × increments means an update
//! was lost.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use isle_sync::{AtomicInteger2, Fabric, FabricConfig, StatsSnapshot};

use crate::commands::traits::{Command, Report};
use crate::config::Config;
use crate::error::{IsletError, Result};

/// Arguments for the contend command.
#[derive(Debug, Clone)]
pub struct ContendArgs {
    /// Threads to spawn; defaults to the number of enabled cores.
    pub threads: Option<usize>,
    /// Increments per thread.
    pub increments: u32,
    /// Use compare-and-set loops instead of increment_and_get.
    pub cas: bool,
}

pub struct ContendCommand {
    args: ContendArgs,
    fabric: FabricConfig,
}

#[derive(Debug, Serialize)]
pub struct ContendReport {
    pub threads: usize,
    pub increments: u32,
    pub expected: i64,
    pub value: i32,
    pub elapsed_ms: u128,
    pub stats: StatsSnapshot,
}

impl Command for ContendCommand {
    type Args = ContendArgs;
    type Output = ContendReport;

    fn new(args: ContendArgs, config: &Config) -> Result<Self> {
        if args.threads == Some(0) {
            return Err(IsletError::Validation("threads must be > 0".to_string()));
        }
        Ok(Self {
            args,
            fabric: config.fabric.clone(),
        })
    }

    fn execute(&self) -> Result<ContendReport> {
        let fabric = Fabric::new(self.fabric.clone())?;
        let enabled = fabric.config().enabled_cores();
        let threads = self.args.threads.unwrap_or(enabled.len());
        let increments = self.args.increments;
        let cas = self.args.cas;
        let first = enabled
            .first()
            .copied()
            .ok_or_else(|| IsletError::Config("fabric has no enabled core".to_string()))?;
        let main = fabric.core(first)?;
        let counter = Arc::new(AtomicInteger2::new(0));
        tracing::info!(
            "{} threads x {} increments on {} cores, {} managers",
            threads,
            increments,
            enabled.len(),
            fabric.managers().len()
        );

        let start = Instant::now();
        let mut spawned = Vec::with_capacity(threads);
        for _ in 0..threads {
            let counter = counter.clone();
            spawned.push(main.spawn(move |core| {
                for _ in 0..increments {
                    let done = if cas { cas_increment(&counter, &core) } else { counter.increment_and_get(&core).map(|_| ()) };
                    if let Err(e) = done {
                        tracing::error!("{} thread {}: {}", core.id(), core.thread(), e);
                        return;
                    }
                }
            })?);
        }
        for handle in spawned {
            handle.join()?;
        }
        let elapsed_ms = start.elapsed().as_millis();

        let value = counter.get(&main)?;
        let stats = fabric.stats();
        fabric.shutdown();

        Ok(ContendReport {
            threads,
            increments,
            expected: threads as i64 * increments as i64,
            value,
            elapsed_ms,
            stats,
        })
    }

    fn name() -> &'static str {
        "contend"
    }
}

fn cas_increment(counter: &AtomicInteger2, core: &isle_sync::CoreHandle) -> isle_sync::Result<()> {
    loop {
        let seen = counter.get(core)?;
        if counter.compare_and_set(core, seen, seen.wrapping_add(1))? {
            return Ok(());
        }
    }
}

impl Report for ContendReport {
    fn render(&self) -> String {
        let verdict = if self.value as i64 == self.expected { "ok" } else { "LOST UPDATES" };
        format!(
            "value {} of {} expected ({}) in {} ms\n{}",
            self.value, self.expected, verdict, self.elapsed_ms, self.stats
        )
    }
}
