//! Input readers for NDJSON sources
//!
//! Sources are plain files, gzip-compressed files, or stdin (`-`). Gzip is
//! recognized by a `.gz` extension or by the gzip magic bytes, so renamed
//! archives still decompress.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, stdin, BufRead, BufReader, Read};
use std::path::Path;

/// Buffer size for input reading
const BUFFER_SIZE: usize = 128 * 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Open an input source for line-by-line reading
///
/// Path "-" reads from stdin.
pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead + Send>> {
    let path = path.as_ref();

    if path.to_str() == Some("-") {
        return Ok(Box::new(BufReader::with_capacity(BUFFER_SIZE, stdin())));
    }

    let file = File::open(path)?;
    if has_gz_extension(path) {
        return Ok(gunzip(file));
    }

    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    if reader.fill_buf()?.starts_with(&GZIP_MAGIC) {
        return Ok(gunzip(reader));
    }
    Ok(Box::new(reader))
}

fn gunzip<R: Read + Send + 'static>(inner: R) -> Box<dyn BufRead + Send> {
    Box::new(BufReader::with_capacity(BUFFER_SIZE, GzDecoder::new(inner)))
}

fn has_gz_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false)
}
