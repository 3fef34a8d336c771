//! Module file loading

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Read a module file, decompressing gzip-wrapped modules if necessary
pub fn read_file(path: &Path) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;
    let data = unwrap_gzip(data)?;
    tracing::debug!(path = %path.display(), len = data.len(), "read module file");
    Ok(data)
}

/// Gunzip `data` when it carries the gzip magic, otherwise hand it back untouched.
///
/// Extension alone is not trusted; modules named *.gz that are not gzip are
/// returned unchanged.
pub fn unwrap_gzip(data: Vec<u8>) -> io::Result<Vec<u8>> {
    if !data.starts_with(&GZIP_MAGIC) {
        return Ok(data);
    }
    let mut decoder = GzDecoder::new(data.as_slice());
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    tracing::debug!(
        compressed = data.len(),
        decompressed = decompressed.len(),
        "gunzipped module"
    );
    Ok(decompressed)
}
