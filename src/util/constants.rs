//! Heap-wide layout constants.

/// log2 of the number of bytes in a word.
pub const LOG_BYTES_IN_WORD: usize = 3;
/// Bytes in a word. A word is also the minimum object alignment, so the mark
/// bitmap carries one bit per word.
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;

/// log2 of the default region size in bytes (1 MiB).
pub const LOG_DEFAULT_REGION_BYTES: usize = 20;
/// Default region size in bytes.
pub const DEFAULT_REGION_BYTES: usize = 1 << LOG_DEFAULT_REGION_BYTES;

/// The smallest object the object model may report, in words. A header word
/// plus one payload word.
pub const MIN_OBJECT_WORDS: usize = 2;

/// Reference arrays with at least this many elements are traced in chunks
/// rather than scanned atomically.
pub const DEFAULT_ARRAY_CHUNK_LEN: usize = 512;

/// Marking buffers are flushed into a stealable packet once they grow past
/// this many entries.
pub const DEFAULT_MARK_BUFFER_CAP: usize = 4096;
