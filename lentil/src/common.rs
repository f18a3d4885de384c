#![allow(unused)]

pub use matrix_util::common_io as io;

pub use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
pub use env_logger;

pub use log::{info, warn};
pub use std::collections::{BTreeMap, HashMap, HashSet};
pub use std::path::Path;
pub use std::sync::atomic::{AtomicBool, Ordering};
pub use std::sync::Arc;

pub use indicatif::ParallelProgressIterator;
pub use rayon::prelude::*;

pub use crate::error::LentilError;

pub type GuideId = u64;
pub type CellId = u64;

/// largest seed CmdStan accepts (2^32 - 1)
pub const MAX_SEED_INT: u64 = 4_294_967_295;

pub const DEFAULT_CHAINS: usize = 4;
pub const DEFAULT_NOISE_CEILING: u64 = 2;
pub const DEFAULT_SAMPLES: usize = 1000;
pub const DEFAULT_WARMUP: usize = 300;

/// `warn` unless `RUST_LOG` (read from `env`) says otherwise; `-v`
/// turns on `info` in any case.
fn logger_builder(verbose: bool, env: env_logger::Env) -> env_logger::Builder {
    let mut builder = env_logger::Builder::from_env(env.default_filter_or("warn"));
    if verbose {
        builder.filter_level(log::LevelFilter::Info);
    }
    builder
}

pub fn init_logger(verbose: bool) {
    let _ = logger_builder(verbose, env_logger::Env::default()).try_init();
}
