//! Collector tuning options. Every knob can be overridden from the
//! environment (`PARCOMPACT_*`), and defaults follow the machine.

use crate::util::constants::*;
use std::env;

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|x| x.parse().ok())
}

#[derive(Debug, Clone)]
pub struct Options {
    /// Number of GC worker threads.
    pub workers: usize,
    /// Region size in bytes. Must be a power of two, at least 512 bytes.
    pub region_bytes: usize,
    /// Reference arrays with at least this many elements are traced in
    /// chunks of this length.
    pub array_chunk_len: usize,
    /// Flush threshold for per-worker marking buffers.
    pub mark_buffer_cap: usize,
    /// Back the mark bitmap with a dedicated anonymous mapping instead of
    /// boxed storage.
    pub dedicated_bitmap: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            workers: num_cpus::get(),
            region_bytes: DEFAULT_REGION_BYTES,
            array_chunk_len: DEFAULT_ARRAY_CHUNK_LEN,
            mark_buffer_cap: DEFAULT_MARK_BUFFER_CAP,
            dedicated_bitmap: false,
        }
    }
}

impl Options {
    pub fn from_env() -> Self {
        let defaults = Options::default();
        Options {
            workers: env_usize("PARCOMPACT_WORKERS").unwrap_or(defaults.workers),
            region_bytes: env_usize("PARCOMPACT_REGION_BYTES").unwrap_or(defaults.region_bytes),
            array_chunk_len: env_usize("PARCOMPACT_ARRAY_CHUNK_LEN")
                .unwrap_or(defaults.array_chunk_len),
            mark_buffer_cap: env_usize("PARCOMPACT_MARK_BUFFER_CAP")
                .unwrap_or(defaults.mark_buffer_cap),
            dedicated_bitmap: env::var("PARCOMPACT_DEDICATED_BITMAP")
                .map(|v| v != "0")
                .unwrap_or(defaults.dedicated_bitmap),
        }
    }

    pub fn region_words(&self) -> usize {
        self.region_bytes >> LOG_BYTES_IN_WORD
    }

    /// Panic on configurations the collector cannot run with.
    pub fn validate(&self) {
        assert!(self.workers > 0, "need at least one GC worker");
        assert!(
            self.region_bytes.is_power_of_two() && self.region_bytes >= 512,
            "region size must be a power of two of at least 512 bytes"
        );
        assert!(self.array_chunk_len >= 2, "array chunks must hold at least two elements");
        assert!(self.mark_buffer_cap >= 1);
    }
}
