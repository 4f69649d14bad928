//! Optional gzip envelope around raw profile bytes.

use flate2::read::GzDecoder;

use std::borrow::Cow;
use std::io::Read as _;

use crate::{LensError, LensResult};

/// gzip member header magic (RFC 1952).
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn is_compressed(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Returns the undecorated wire bytes. Input without the magic prefix is
/// returned borrowed and untouched.
pub fn decompress(bytes: &[u8]) -> LensResult<Cow<'_, [u8]>> {
    if !is_compressed(bytes) {
        return Ok(Cow::Borrowed(bytes));
    }
    let mut out = Vec::with_capacity(bytes.len().saturating_mul(4));
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| LensError::Decompression(e.to_string()))?;
    tracing::debug!(
        compressed = bytes.len(),
        decompressed = out.len(),
        "stripped gzip envelope"
    );
    Ok(Cow::Owned(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write as _;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).expect("write");
        enc.finish().expect("finish")
    }

    #[test]
    fn plain_bytes_pass_through() {
        let raw = [0x0a, 0x04, 0x08, 0x01, 0x10, 0x02];
        let out = decompress(&raw).expect("decompress");
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(&*out, &raw);
    }

    #[test]
    fn gzip_envelope_is_stripped() {
        let payload = b"profile bytes".repeat(10);
        let compressed = gzip(&payload);
        let out = decompress(&compressed).expect("decompress");
        assert_eq!(&*out, payload.as_slice());
    }

    #[test]
    fn corrupt_envelope_is_an_error() {
        let mut bad = gzip(b"hello world");
        bad.truncate(12);
        let err = decompress(&bad).expect_err("must fail");
        assert!(matches!(err, LensError::Decompression(_)), "got {err:?}");
    }

    #[test]
    fn empty_input_is_not_compressed() {
        assert!(!is_compressed(&[]));
        assert!(decompress(&[]).expect("empty").is_empty());
    }
}
