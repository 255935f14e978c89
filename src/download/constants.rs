//! Constants for the download module (timeouts, buffer sizes).

use std::time::Duration;

/// Default per-attempt request timeout (30 seconds).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Write buffer capacity used while streaming a body to disk.
pub const WRITE_BUFFER_SIZE: usize = 8192;

/// Longest stem kept from a URL when naming a downloaded file.
pub const MAX_STEM_CHARS: usize = 100;

/// Leading bytes of every well-formed PDF.
pub const PDF_MAGIC: &[u8] = b"%PDF";
