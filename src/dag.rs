use std::fmt;
use std::ops::ControlFlow;
use std::path::Path;
use std::time::Instant;

use ethereum_types::H256;
use tracing::{debug, info, warn};

use crate::io::{self, Status};
use crate::{Config, Error, Generated, ReturnValue};

fn alloc_buffer(what: &'static str, size: usize) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(size)
        .map_err(|_| Error::OutOfMemory { what, size })?;
    buf.resize(size, 0);
    Ok(buf)
}

/// Light client handle: the epoch's cache, enough to verify any nonce.
pub struct LightDAG {
    epoch: u64,
    seed: H256,
    cache: Vec<u8>,
    full_size: usize,
    config: Config,
}

impl LightDAG {
    /// Build the cache of the epoch containing block `number`.
    pub fn new(config: &Config, number: u64) -> Result<Self, Error> {
        config.validate()?;
        let epoch = config.epoch(number);
        let cache_size = config.cache_size(epoch);
        let full_size = config.full_size(epoch);
        let seed = crate::get_seedhash(epoch);

        let mut cache = alloc_buffer("cache", cache_size)?;
        let now = Instant::now();
        crate::make_cache(&mut cache, seed);
        debug!(epoch, cache_size, elapsed = ?now.elapsed(), "built cache");

        Ok(Self {
            epoch,
            seed,
            cache,
            full_size,
            config: config.clone(),
        })
    }

    pub fn hashimoto(&self, hash: H256, nonce: u64) -> ReturnValue {
        crate::hashimoto_light(hash, nonce, self.full_size, &self.cache)
    }

    pub fn is_valid_for(&self, number: u64) -> bool {
        self.config.epoch(number) == self.epoch
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn seedhash(&self) -> H256 {
        self.seed
    }

    pub fn cache(&self) -> &[u8] {
        &self.cache
    }

    /// Size of the dataset this cache expands to.
    pub fn full_size(&self) -> usize {
        self.full_size
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Full client handle: the epoch's complete dataset.
pub struct FullDAG {
    epoch: u64,
    epoch_length: u64,
    dataset: Vec<u8>,
    from_disk: bool,
}

impl FullDAG {
    /// Build the dataset for `light`'s epoch.
    ///
    /// With a configured DAG directory, a previously committed file for this
    /// epoch is loaded instead of regenerating; otherwise the dataset is
    /// generated and committed to disk. `progress` only runs during
    /// generation and may cancel it, in which case `Generated::Cancelled` is
    /// returned and any file on disk stays untrusted.
    pub fn new<F>(light: &LightDAG, progress: F) -> Result<Generated<Self>, Error>
    where
        F: Fn(u32) -> ControlFlow<()> + Sync,
    {
        let config = light.config();
        let dataset = match &config.dag_dir {
            Some(dir) => Self::load_or_generate(dir, light, progress)?,
            None => {
                let mut dataset = alloc_buffer("dataset", light.full_size)?;
                match generate(&mut dataset, light, progress)? {
                    Generated::Complete(()) => Generated::Complete((dataset, false)),
                    Generated::Cancelled => Generated::Cancelled,
                }
            }
        };

        Ok(match dataset {
            Generated::Complete((dataset, from_disk)) => Generated::Complete(Self {
                epoch: light.epoch,
                epoch_length: config.epoch_length,
                dataset,
                from_disk,
            }),
            Generated::Cancelled => Generated::Cancelled,
        })
    }

    fn load_or_generate<F>(
        dir: &Path,
        light: &LightDAG,
        progress: F,
    ) -> Result<Generated<(Vec<u8>, bool)>, Error>
    where
        F: Fn(u32) -> ControlFlow<()> + Sync,
    {
        let config = light.config();
        let mut dag = io::prepare(dir, config, &light.seed, light.full_size, false)?;
        if dag.status == Status::SizeMismatch {
            warn!(path = %dag.path.display(), "DAG file is stale or incomplete, recreating");
            dag = io::prepare(dir, config, &light.seed, light.full_size, true)?;
        }

        let mut dataset = alloc_buffer("dataset", light.full_size)?;
        if dag.status == Status::Match {
            let now = Instant::now();
            io::load(&mut dag, &mut dataset)?;
            info!(epoch = light.epoch, path = %dag.path.display(), elapsed = ?now.elapsed(), "loaded DAG");
            return Ok(Generated::Complete((dataset, true)));
        }

        if generate(&mut dataset, light, progress)?.is_cancelled() {
            return Ok(Generated::Cancelled);
        }
        io::commit(&mut dag, &dataset, config.magic)?;
        debug!(path = %dag.path.display(), "committed DAG file");
        Ok(Generated::Complete((dataset, false)))
    }

    pub fn hashimoto(&self, hash: H256, nonce: u64) -> ReturnValue {
        crate::hashimoto_full(hash, nonce, &self.dataset)
    }

    pub fn is_valid_for(&self, number: u64) -> bool {
        number / self.epoch_length == self.epoch
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Read-only view of the dataset.
    pub fn dataset(&self) -> &[u8] {
        &self.dataset
    }

    pub fn dataset_size(&self) -> usize {
        self.dataset.len()
    }

    /// Whether the dataset was reused from a committed DAG file.
    pub fn loaded_from_disk(&self) -> bool {
        self.from_disk
    }
}

impl fmt::Debug for LightDAG {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LightDAG")
            .field("epoch", &self.epoch)
            .field("seed", &self.seed)
            .field("cache_size", &self.cache.len())
            .field("full_size", &self.full_size)
            .finish()
    }
}

impl fmt::Debug for FullDAG {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FullDAG")
            .field("epoch", &self.epoch)
            .field("full_size", &self.dataset.len())
            .field("from_disk", &self.from_disk)
            .finish()
    }
}

fn generate<F>(
    dataset: &mut [u8],
    light: &LightDAG,
    progress: F,
) -> Result<Generated<()>, Error>
where
    F: Fn(u32) -> ControlFlow<()> + Sync,
{
    let now = Instant::now();
    info!(epoch = light.epoch, full_size = light.full_size, "generating DAG");
    let outcome = crate::make_dataset(dataset, &light.cache, progress)?;
    match outcome {
        Generated::Complete(()) => {
            info!(epoch = light.epoch, elapsed = ?now.elapsed(), "generated DAG")
        }
        Generated::Cancelled => warn!(epoch = light.epoch, "DAG generation cancelled"),
    }
    Ok(outcome)
}
