//! Versioned persistence for fitted forests.
//!
//! A model artifact is a single blob: a 4-byte magic number, a two-byte
//! format version, and a bincode payload holding the fitted ensemble. Loads
//! fail closed: an unrecognized magic or version, a payload that does not
//! decode, or a decoded forest violating its structural invariants is
//! rejected as a corrupt model rather than parsed best-effort.
//!
//! Reads and writes move the whole blob at once; persistence is never
//! interleaved with fitting or scoring.

use std::fs;
use std::path::Path;

use crate::error::{CentinelaError, Result};
use crate::forest::IsolationForest;

/// Magic number: "CNTL" in ASCII.
pub const MAGIC: [u8; 4] = *b"CNTL";

/// Current artifact format version (major, minor).
pub const FORMAT_VERSION: (u8, u8) = (1, 0);

/// Header size in bytes (magic + version).
const HEADER_SIZE: usize = 6;

/// Serializes a fitted forest into a versioned blob.
///
/// # Errors
///
/// Returns `CorruptModel` if the forest is unfitted or structurally invalid
/// (nothing unloadable is ever written), `Serialization` if encoding fails.
pub fn to_bytes(forest: &IsolationForest) -> Result<Vec<u8>> {
    forest
        .check_invariants()
        .map_err(|message| CentinelaError::CorruptModel { message })?;

    let payload =
        bincode::serialize(forest).map_err(|e| CentinelaError::Serialization(e.to_string()))?;
    let mut blob = Vec::with_capacity(HEADER_SIZE + payload.len());
    blob.extend_from_slice(&MAGIC);
    blob.push(FORMAT_VERSION.0);
    blob.push(FORMAT_VERSION.1);
    blob.extend_from_slice(&payload);
    Ok(blob)
}

/// Deserializes a forest from a versioned blob.
///
/// Score-equivalence round-trip law: `from_bytes(to_bytes(f))` produces a
/// forest whose `score` and `predict` outputs are identical to `f` for every
/// input (`f64` fields survive bincode bit-exactly).
///
/// # Errors
///
/// Returns `CorruptModel` on a truncated blob, wrong magic, unsupported
/// version, undecodable payload, or violated structural invariants.
pub fn from_bytes(blob: &[u8]) -> Result<IsolationForest> {
    if blob.len() < HEADER_SIZE {
        return Err(CentinelaError::CorruptModel {
            message: format!("blob truncated: {} bytes, header needs {HEADER_SIZE}", blob.len()),
        });
    }
    if blob[..4] != MAGIC {
        return Err(CentinelaError::CorruptModel {
            message: format!("bad magic number {:02X?}", &blob[..4]),
        });
    }
    let found = (blob[4], blob[5]);
    if found.0 != FORMAT_VERSION.0 || found.1 > FORMAT_VERSION.1 {
        return Err(CentinelaError::CorruptModel {
            message: format!(
                "unsupported format version {}.{}, supported up to {}.{}",
                found.0, found.1, FORMAT_VERSION.0, FORMAT_VERSION.1
            ),
        });
    }

    let forest: IsolationForest = bincode::deserialize(&blob[HEADER_SIZE..])
        .map_err(|e| CentinelaError::CorruptModel {
            message: format!("payload does not decode: {e}"),
        })?;
    forest
        .check_invariants()
        .map_err(|message| CentinelaError::CorruptModel { message })?;
    Ok(forest)
}

/// Writes a fitted forest to a file as one atomic blob.
///
/// # Errors
///
/// Returns `CorruptModel`/`Serialization` from [`to_bytes`] or `Io` if the
/// write fails.
pub fn save<P: AsRef<Path>>(forest: &IsolationForest, path: P) -> Result<()> {
    let blob = to_bytes(forest)?;
    fs::write(&path, blob)?;
    log::info!("model saved to {}", path.as_ref().display());
    Ok(())
}

/// Reads a forest back from a file written by [`save`].
///
/// # Errors
///
/// Returns `Io` if the file cannot be read and `CorruptModel` from
/// [`from_bytes`] for anything that fails validation.
pub fn load<P: AsRef<Path>>(path: P) -> Result<IsolationForest> {
    let blob = fs::read(&path)?;
    let forest = from_bytes(&blob)?;
    log::info!(
        "model loaded from {} ({} trees, subsample {})",
        path.as_ref().display(),
        forest.num_trees(),
        forest.sample_size()
    );
    Ok(forest)
}
