//! Historical load series codec.
//!
//! Each record is 16 bytes: a little-endian `f64` timestamp followed by a
//! little-endian `f64` load. A persisted blob never exceeds
//! [`MAX_HISTORY_BYTES`]; serializing a longer series keeps only the
//! newest records.

use shoal_core::HistoricalLoadRecord;
use shoal_state::{Coordinator, StateResult, paths};
use tracing::warn;

pub const RECORD_SIZE: usize = 16;
pub const MAX_HISTORY_BYTES: usize = 1_000_000;
pub const MAX_HISTORY_RECORDS: usize = MAX_HISTORY_BYTES / RECORD_SIZE;

/// Encode records oldest first, dropping the oldest beyond capacity.
pub fn serialize_history(records: &[HistoricalLoadRecord]) -> Vec<u8> {
    let skip = records.len().saturating_sub(MAX_HISTORY_RECORDS);
    let kept = &records[skip..];

    let mut out = Vec::with_capacity(kept.len() * RECORD_SIZE);
    for record in kept {
        out.extend_from_slice(&record.timestamp.to_le_bytes());
        out.extend_from_slice(&record.load.to_le_bytes());
    }
    out
}

/// Decode a blob produced by [`serialize_history`]. A trailing partial
/// record is ignored.
pub fn deserialize_history(bytes: &[u8]) -> Vec<HistoricalLoadRecord> {
    let chunks = bytes.chunks_exact(RECORD_SIZE);
    if !chunks.remainder().is_empty() {
        warn!(
            trailing = chunks.remainder().len(),
            "historical load blob has a partial record"
        );
    }
    chunks
        .map(|chunk| {
            let mut timestamp = [0u8; 8];
            let mut load = [0u8; 8];
            timestamp.copy_from_slice(&chunk[..8]);
            load.copy_from_slice(&chunk[8..]);
            HistoricalLoadRecord {
                timestamp: f64::from_le_bytes(timestamp),
                load: f64::from_le_bytes(load),
            }
        })
        .collect()
}

pub fn load_history<C: Coordinator>(
    coordinator: &C,
    service: &str,
    instance: &str,
) -> StateResult<Vec<HistoricalLoadRecord>> {
    Ok(coordinator
        .get(&paths::historical_load(service, instance))?
        .map(|raw| deserialize_history(&raw))
        .unwrap_or_default())
}

pub fn save_history<C: Coordinator>(
    coordinator: &C,
    service: &str,
    instance: &str,
    records: &[HistoricalLoadRecord],
) -> StateResult<()> {
    coordinator.set(
        &paths::historical_load(service, instance),
        &serialize_history(records),
    )
}
