// src/compression.rs

//! Compression helpers shared by the package encoders
//!
//! Three formats are needed: gzip (pacman's .MTREE manifest), xz (pacman
//! archives) and LZMA-alone (RPM payloads, which advertise the `lzma`
//! payload compressor rather than the newer xz container).

use crate::error::{Error, Result};
use std::io::{Read, Write};
use xz2::stream::{LzmaOptions, Stream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    /// Gzip (.gz)
    Gzip,
    /// XZ container (.xz)
    Xz,
    /// Legacy LZMA-alone stream (.lzma)
    Lzma,
}

impl CompressionFormat {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Xz => "xz",
            Self::Lzma => "lzma",
        }
    }
}

impl std::fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Compress a byte slice using the given format and preset (0-9).
pub fn compress(data: &[u8], format: CompressionFormat, preset: u32) -> Result<Vec<u8>> {
    match format {
        CompressionFormat::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(preset));
            encoder
                .write_all(data)
                .and_then(|_| encoder.finish())
                .map_err(|e| compression_error(format, e))
        }
        CompressionFormat::Xz => {
            let mut encoder = xz2::write::XzEncoder::new(Vec::new(), preset);
            encoder
                .write_all(data)
                .and_then(|_| encoder.finish())
                .map_err(|e| compression_error(format, e))
        }
        CompressionFormat::Lzma => {
            let options = LzmaOptions::new_preset(preset)
                .map_err(|e| compression_error(format, std::io::Error::from(e)))?;
            let stream = Stream::new_lzma_encoder(&options)
                .map_err(|e| compression_error(format, std::io::Error::from(e)))?;
            let mut encoder = xz2::write::XzEncoder::new_stream(Vec::new(), stream);
            encoder
                .write_all(data)
                .and_then(|_| encoder.finish())
                .map_err(|e| compression_error(format, e))
        }
    }
}

/// Decompress a byte slice using the given format.
pub fn decompress(data: &[u8], format: CompressionFormat) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    match format {
        CompressionFormat::Gzip => flate2::read::GzDecoder::new(data)
            .read_to_end(&mut output)
            .map(|_| ())
            .map_err(|e| compression_error(format, e))?,
        CompressionFormat::Xz => xz2::read::XzDecoder::new(data)
            .read_to_end(&mut output)
            .map(|_| ())
            .map_err(|e| compression_error(format, e))?,
        CompressionFormat::Lzma => {
            let stream = Stream::new_lzma_decoder(u64::MAX)
                .map_err(|e| compression_error(format, std::io::Error::from(e)))?;
            xz2::read::XzDecoder::new_stream(data, stream)
                .read_to_end(&mut output)
                .map(|_| ())
                .map_err(|e| compression_error(format, e))?
        }
    }
    Ok(output)
}

fn compression_error(format: CompressionFormat, source: std::io::Error) -> Error {
    Error::Compression {
        format: format.name(),
        detail: source.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_formats() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(64);
        for format in [
            CompressionFormat::Gzip,
            CompressionFormat::Xz,
            CompressionFormat::Lzma,
        ] {
            let compressed = compress(&data, format, 6).unwrap();
            assert_ne!(compressed, data);
            let restored = decompress(&compressed, format).unwrap();
            assert_eq!(restored, data, "round trip failed for {}", format);
        }
    }

    #[test]
    fn test_lzma_output_is_not_an_xz_container() {
        let compressed = compress(b"payload", CompressionFormat::Lzma, 5).unwrap();
        // xz container magic is fd 37 7a 58 5a 00
        assert_ne!(&compressed[..2], &[0xfd, 0x37]);
    }

    #[test]
    fn test_gzip_output_carries_gzip_magic() {
        let compressed = compress(b"manifest", CompressionFormat::Gzip, 6).unwrap();
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);
    }
}
