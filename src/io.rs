//! On-disk persistence of full datasets.
//!
//! A DAG file is `[magic: u64 LE][dataset bytes]` and is named after the
//! format revision and the epoch's seed hash. The magic number is written
//! only after the payload, so a file is trusted only when both its length and
//! its magic number agree with what the caller expects.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use ethereum_types::H256;
use tracing::{debug, error};

use crate::{Config, Error};

pub const MAGIC_NUM_SIZE: usize = 8;

/// What [`prepare`] found at the DAG path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The file has the expected size and magic number and can be loaded.
    Match,
    /// The file was freshly created; it must be populated and committed.
    Mismatch,
    /// A file exists but has the wrong size, an unreadable or wrong magic
    /// number. Its contents must not be used.
    SizeMismatch,
}

/// An open DAG file together with the verdict on its contents.
#[derive(Debug)]
pub struct DagFile {
    pub status: Status,
    pub file: File,
    pub path: PathBuf,
}

/// File name for the DAG of the epoch with `seedhash`, e.g.
/// `full-R23-290decd9548b62a8`.
pub fn mutable_name(revision: u32, seedhash: &H256) -> String {
    format!("full-R{}-{}", revision, hex::encode(&seedhash.as_bytes()[..8]))
}

/// Decide whether the DAG file for `seedhash` in `dir` can be reused, or
/// create a new one sized for `dataset_size` bytes of payload.
///
/// With `force_create` an existing file is truncated and recreated without
/// being inspected. Directory creation, size queries and every step of file
/// creation are fatal and reported as [`Error::Io`].
pub fn prepare(
    dir: &Path,
    config: &Config,
    seedhash: &H256,
    dataset_size: usize,
    force_create: bool,
) -> Result<DagFile, Error> {
    fs::create_dir_all(dir).map_err(|e| {
        error!(dir = %dir.display(), "could not create the DAG directory: {}", e);
        Error::io(dir, e)
    })?;

    let path = dir.join(mutable_name(config.revision, seedhash));
    let file_size = dataset_size as u64 + MAGIC_NUM_SIZE as u64;

    if !force_create {
        if let Ok(file) = OpenOptions::new().read(true).write(true).open(&path) {
            let status = inspect(&file, &path, config.magic, file_size)?;
            debug!(path = %path.display(), ?status, "found existing DAG file");
            return Ok(DagFile { status, file, path });
        }
    }

    let file = create(&path, file_size)?;
    debug!(path = %path.display(), file_size, "created DAG file");
    Ok(DagFile {
        status: Status::Mismatch,
        file,
        path,
    })
}

fn inspect(mut file: &File, path: &Path, magic: u64, file_size: u64) -> Result<Status, Error> {
    let found_size = file
        .metadata()
        .map_err(|e| {
            error!(path = %path.display(), "could not query size of DAG file: {}", e);
            Error::io(path, e)
        })?
        .len();
    if found_size != file_size {
        return Ok(Status::SizeMismatch);
    }

    let mut buf = [0u8; MAGIC_NUM_SIZE];
    if let Err(e) = file.read_exact(&mut buf) {
        error!(path = %path.display(), "could not read from DAG file: {}", e);
        return Ok(Status::SizeMismatch);
    }
    if LittleEndian::read_u64(&buf) != magic {
        return Ok(Status::SizeMismatch);
    }
    Ok(Status::Match)
}

fn create(path: &Path, file_size: u64) -> Result<File, Error> {
    let critical = |what: &str, e: std::io::Error| {
        error!(path = %path.display(), "could not {} DAG file: {}", what, e);
        Error::io(path, e)
    };

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| critical("create", e))?;
    // writing one byte at the end sizes the file without touching the rest,
    // which stays sparse on most filesystems.
    file.seek(SeekFrom::Start(file_size - 1))
        .map_err(|e| critical("seek to the end of", e))?;
    file.write_all(b"\n")
        .map_err(|e| critical("write at the end of", e))?;
    file.flush().map_err(|e| critical("flush", e))?;
    Ok(file)
}

/// Read the payload of a matching DAG file into `dataset`.
pub fn load(dag: &mut DagFile, dataset: &mut [u8]) -> Result<(), Error> {
    let path = &dag.path;
    dag.file
        .seek(SeekFrom::Start(MAGIC_NUM_SIZE as u64))
        .and_then(|_| dag.file.read_exact(dataset))
        .map_err(|e| {
            error!(path = %path.display(), "could not load DAG file: {}", e);
            Error::io(path, e)
        })
}

/// Write `dataset` as the payload, then mark the file valid by writing the
/// magic number in front of it.
pub fn commit(dag: &mut DagFile, dataset: &[u8], magic: u64) -> Result<(), Error> {
    let path = &dag.path;
    let file = &mut dag.file;
    let mut buf = [0u8; MAGIC_NUM_SIZE];
    LittleEndian::write_u64(&mut buf, magic);

    file.seek(SeekFrom::Start(MAGIC_NUM_SIZE as u64))
        .and_then(|_| file.write_all(dataset))
        .and_then(|_| file.flush())
        .and_then(|_| file.seek(SeekFrom::Start(0)))
        .and_then(|_| file.write_all(&buf))
        .and_then(|_| file.flush())
        .map_err(|e| {
            error!(path = %path.display(), "could not write DAG file: {}", e);
            Error::io(path, e)
        })?;
    dag.status = Status::Match;
    Ok(())
}
