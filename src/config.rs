//! Algorithm parameters that vary between networks and test setups.

use std::path::PathBuf;

use ethereum_types::H256;
use serde::{Deserialize, Serialize};

use crate::miller_rabin::is_prime;
use crate::{Error, HASH_BYTES, MIX_BYTES};

pub const REVISION: u32 = 23;
pub const EPOCH_LENGTH: u64 = 30_000;
pub const DAG_MAGIC_NUM: u64 = 0xFEE1_DEAD_BADD_CAFE;

const DATASET_BYTES_INIT: usize = 1 << 30;
const DATASET_BYTES_GROWTH: usize = 1 << 23;
const CACHE_BYTES_GROWTH: usize = 1 << 17;

/// Sizing constants, file format tags and the DAG directory.
///
/// Built once at startup and shared by reference; handles keep their own
/// copy so a later change never affects a DAG that already exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Format revision encoded in DAG file names.
    pub revision: u32,
    /// Number of blocks sharing one seed, cache and dataset.
    pub epoch_length: u64,
    pub cache_bytes_init: usize,
    pub cache_bytes_growth: usize,
    pub dataset_bytes_init: usize,
    pub dataset_bytes_growth: usize,
    /// Prefix that marks a DAG file as completely written.
    pub magic: u64,
    /// Where full datasets are persisted. `None` keeps them in memory only.
    pub dag_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::vapash()
    }
}

impl Config {
    /// Vapory network parameters. The cache starts at 1 GiB.
    pub fn vapash() -> Self {
        Self {
            revision: REVISION,
            epoch_length: EPOCH_LENGTH,
            cache_bytes_init: 1 << 30,
            cache_bytes_growth: CACHE_BYTES_GROWTH,
            dataset_bytes_init: DATASET_BYTES_INIT,
            dataset_bytes_growth: DATASET_BYTES_GROWTH,
            magic: DAG_MAGIC_NUM,
            dag_dir: dirs::home_dir().map(|home| home.join(".vapash")),
        }
    }

    /// Ethereum mainnet parameters (16 MiB initial cache).
    pub fn ethash() -> Self {
        Self {
            cache_bytes_init: 1 << 24,
            dag_dir: dirs::home_dir().map(|home| home.join(".ethash")),
            ..Self::vapash()
        }
    }

    /// Tiny sizes for tests: an epoch 0 cache of 832 bytes and a dataset of
    /// 32128 bytes. Nothing is persisted unless `dag_dir` is set.
    pub fn testing() -> Self {
        Self {
            cache_bytes_init: 1024,
            cache_bytes_growth: 128,
            dataset_bytes_init: 32 * 1024,
            dataset_bytes_growth: 1024,
            dag_dir: None,
            ..Self::vapash()
        }
    }

    pub fn with_dag_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dag_dir = Some(dir.into());
        self
    }

    /// Checks that every epoch yields a non-empty, aligned cache and dataset.
    pub fn validate(&self) -> Result<(), Error> {
        let invalid =
            |reason: String| -> Result<(), Error> { Err(Error::InvalidConfig { reason }) };

        if self.epoch_length == 0 {
            return invalid("epoch length must be non-zero".into());
        }
        for (name, value, width) in [
            ("cache_bytes_init", self.cache_bytes_init, HASH_BYTES),
            ("cache_bytes_growth", self.cache_bytes_growth, HASH_BYTES),
            ("dataset_bytes_init", self.dataset_bytes_init, MIX_BYTES),
            ("dataset_bytes_growth", self.dataset_bytes_growth, MIX_BYTES),
        ] {
            if value % width != 0 {
                return invalid(format!("{name} ({value}) is not a multiple of {width}"));
            }
        }
        if self.cache_bytes_init < 4 * HASH_BYTES {
            return invalid(format!("cache_bytes_init must be at least {}", 4 * HASH_BYTES));
        }
        if self.dataset_bytes_init < 4 * MIX_BYTES {
            return invalid(format!("dataset_bytes_init must be at least {}", 4 * MIX_BYTES));
        }
        Ok(())
    }

    pub fn epoch(&self, block_number: u64) -> u64 {
        block_number / self.epoch_length
    }

    /// Seed hash of the epoch containing `block_number`.
    pub fn seedhash(&self, block_number: u64) -> H256 {
        crate::get_seedhash(self.epoch(block_number))
    }

    /// Cache size in bytes: the largest size not above the epoch's target
    /// whose node count is prime.
    pub fn cache_size(&self, epoch: u64) -> usize {
        prime_size(self.cache_bytes_init, self.cache_bytes_growth, epoch, HASH_BYTES)
    }

    /// Dataset size in bytes: the largest size not above the epoch's target
    /// whose row count (in `MIX_BYTES` units) is prime.
    pub fn full_size(&self, epoch: u64) -> usize {
        prime_size(self.dataset_bytes_init, self.dataset_bytes_growth, epoch, MIX_BYTES)
    }
}

fn prime_size(init: usize, growth: usize, epoch: u64, width: usize) -> usize {
    let epoch = usize::try_from(epoch).unwrap_or(usize::MAX);
    let mut sz = init.saturating_add(growth.saturating_mul(epoch));
    // keep the starting point aligned if the addition saturated
    sz -= sz % width;
    sz = sz.saturating_sub(width);
    while sz > width && !is_prime((sz / width) as u64) {
        sz -= 2 * width;
    }
    sz
}
