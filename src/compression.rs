//! Transparent compression for stored file content.
//!
//! Provides LZ4 and Zstd compression applied per file or to the whole
//! package. Compression is transparent: reads automatically decompress,
//! writes automatically compress when beneficial.
//!
//! **Design**:
//! - Compression threshold: only compress data >= 512 bytes (avoid overhead)
//! - Fallback: store uncompressed if compression ratio is not worthwhile
//! - Strategy: package-level for many small files, per-file otherwise

use crate::error::{NovusError, Result};

/// Compression algorithm identifier as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionType {
    /// No compression
    None = 0,
    /// Zstd compression (slower, better ratio)
    Zstd = 1,
    /// LZ4 compression (fast, moderate ratio)
    Lz4 = 2,
    /// LZMA: valid identifier, no codec wired in
    Lzma = 3,
}

impl CompressionType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Zstd),
            2 => Some(CompressionType::Lz4),
            3 => Some(CompressionType::Lzma),
            _ => None,
        }
    }
}

/// Where compression is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionStrategy {
    /// Store everything uncompressed
    None,
    /// Compress each file independently (preserves random access)
    PerFile,
    /// Compress the package payload as one stream (amortizes codec
    /// overhead across many small files)
    PackageLevel,
}

/// Caller preference fed into strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionPreference {
    Auto,
    ForceNone,
    ForcePerFile,
    ForcePackageLevel,
}

/// Files below this size rarely benefit from per-file compression.
const SMALL_FILE_AVG: u64 = 4096;

/// With this many files, package-level compression amortizes well.
const MANY_FILES: usize = 64;

/// Pick a compression strategy from the workload shape. Many small files
/// favor a single package-level stream; fewer or larger files keep per-file
/// compression so individual reads stay cheap.
pub fn select_strategy(
    preference: CompressionPreference,
    file_count: usize,
    avg_size: u64,
) -> CompressionStrategy {
    match preference {
        CompressionPreference::ForceNone => CompressionStrategy::None,
        CompressionPreference::ForcePerFile => CompressionStrategy::PerFile,
        CompressionPreference::ForcePackageLevel => CompressionStrategy::PackageLevel,
        CompressionPreference::Auto => {
            if file_count >= MANY_FILES && avg_size < SMALL_FILE_AVG {
                CompressionStrategy::PackageLevel
            } else {
                CompressionStrategy::PerFile
            }
        }
    }
}

/// Compression configuration
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Compression algorithm to use
    pub method: CompressionType,

    /// Zstd level; ignored for LZ4
    pub level: i32,

    /// Minimum size to compress (bytes).
    /// Data smaller than this will not be compressed.
    pub threshold: usize,

    /// Minimum compression ratio (compressed_size / original_size).
    /// If ratio is worse than this, store uncompressed.
    pub min_ratio: f32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        CompressionConfig {
            method: CompressionType::Zstd,
            level: 3,
            threshold: 512,
            min_ratio: 0.9,
        }
    }
}

impl CompressionConfig {
    /// Create config with no compression
    pub fn none() -> Self {
        CompressionConfig {
            method: CompressionType::None,
            level: 0,
            threshold: usize::MAX,
            min_ratio: 0.0,
        }
    }

    /// Create config with LZ4 compression
    pub fn lz4() -> Self {
        CompressionConfig {
            method: CompressionType::Lz4,
            ..Default::default()
        }
    }

    /// Create config with Zstd compression
    pub fn zstd() -> Self {
        CompressionConfig {
            method: CompressionType::Zstd,
            level: 3,
            threshold: 1024, // Zstd overhead is higher
            min_ratio: 0.85,
        }
    }
}

/// Compress data using the specified method
pub fn compress(data: &[u8], method: CompressionType, level: i32) -> Result<Vec<u8>> {
    match method {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lz4 => {
            let compressed = lz4_flex::compress_prepend_size(data);
            Ok(compressed)
        }
        CompressionType::Zstd => {
            let compressed = zstd::bulk::compress(data, level)
                .map_err(|e| NovusError::format(format!("Zstd compression failed: {}", e), 0))?;
            Ok(compressed)
        }
        CompressionType::Lzma => Err(NovusError::Unsupported {
            what: "compression type",
            value: CompressionType::Lzma as u32,
        }),
    }
}

/// Decompress data using the specified method. `original_size` bounds the
/// decompressed output; a stream that inflates past it is rejected as
/// corrupt rather than allocated.
pub fn decompress(data: &[u8], method: CompressionType, original_size: u64) -> Result<Vec<u8>> {
    match method {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lz4 => {
            let decompressed = lz4_flex::decompress_size_prepended(data)
                .map_err(|e| NovusError::format(format!("LZ4 decompression failed: {}", e), 0))?;
            if decompressed.len() as u64 > original_size {
                return Err(NovusError::format(
                    format!(
                        "LZ4 stream decompressed to {} bytes, entry declares {}",
                        decompressed.len(),
                        original_size
                    ),
                    0,
                ));
            }
            Ok(decompressed)
        }
        CompressionType::Zstd => {
            let decompressed = zstd::bulk::decompress(data, original_size as usize)
                .map_err(|e| NovusError::format(format!("Zstd decompression failed: {}", e), 0))?;
            Ok(decompressed)
        }
        CompressionType::Lzma => Err(NovusError::Unsupported {
            what: "compression type",
            value: CompressionType::Lzma as u32,
        }),
    }
}

/// Compression ratio as an integer percentage: stored * 100 / original.
/// An original size of zero has no meaningful ratio.
pub fn compression_ratio(stored: u64, original: u64) -> Result<u64> {
    if original == 0 {
        return Err(NovusError::format(
            "cannot compute compression ratio with original size 0",
            0,
        ));
    }
    Ok(stored * 100 / original)
}

/// Compress data if beneficial, returns (data, method_used)
pub fn compress_if_beneficial(
    data: &[u8],
    config: &CompressionConfig,
) -> Result<(Vec<u8>, CompressionType)> {
    // Skip compression if below threshold
    if data.len() < config.threshold {
        return Ok((data.to_vec(), CompressionType::None));
    }

    if matches!(config.method, CompressionType::None) {
        return Ok((data.to_vec(), CompressionType::None));
    }

    let compressed = compress(data, config.method, config.level)?;

    // Check compression ratio
    let ratio = compressed.len() as f32 / data.len() as f32;
    if ratio < config.min_ratio {
        Ok((compressed, config.method))
    } else {
        // Compression not worth it, store uncompressed
        Ok((data.to_vec(), CompressionType::None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_type_conversion() {
        assert_eq!(CompressionType::from_u8(0), Some(CompressionType::None));
        assert_eq!(CompressionType::from_u8(1), Some(CompressionType::Zstd));
        assert_eq!(CompressionType::from_u8(2), Some(CompressionType::Lz4));
        assert_eq!(CompressionType::from_u8(3), Some(CompressionType::Lzma));
        assert_eq!(CompressionType::from_u8(99), None);
    }

    #[test]
    fn test_lz4_round_trip() {
        let data = b"Hello, World! ".repeat(100);
        let compressed = compress(&data, CompressionType::Lz4, 0).unwrap();
        let decompressed =
            decompress(&compressed, CompressionType::Lz4, data.len() as u64).unwrap();

        assert_eq!(data.as_slice(), decompressed.as_slice());
        assert!(compressed.len() < data.len());
    }

    #[test]
    fn test_zstd_round_trip() {
        let data = b"Zstandard compression test data! ".repeat(100);
        let compressed = compress(&data, CompressionType::Zstd, 3).unwrap();
        let decompressed =
            decompress(&compressed, CompressionType::Zstd, data.len() as u64).unwrap();

        assert_eq!(data.as_slice(), decompressed.as_slice());
        assert!(compressed.len() < data.len());
    }

    #[test]
    fn test_lzma_is_unsupported() {
        let err = compress(b"data", CompressionType::Lzma, 0).unwrap_err();
        assert!(matches!(err, NovusError::Unsupported { .. }));
    }

    #[test]
    fn test_decompression_bound_enforced() {
        let data = b"A".repeat(10_000);
        let compressed = compress(&data, CompressionType::Zstd, 3).unwrap();
        // Declared original size far below the real payload.
        let err = decompress(&compressed, CompressionType::Zstd, 16).unwrap_err();
        assert!(matches!(err, NovusError::Format { .. }));
    }

    #[test]
    fn test_compress_if_beneficial() {
        let config = CompressionConfig::lz4();

        // Small data - should not compress
        let small_data = b"Hello";
        let (result, method) = compress_if_beneficial(small_data, &config).unwrap();
        assert_eq!(method, CompressionType::None);
        assert_eq!(result, small_data);

        // Large repetitive data - should compress
        let large_data = b"X".repeat(2000);
        let (result, method) = compress_if_beneficial(&large_data, &config).unwrap();
        assert_eq!(method, CompressionType::Lz4);
        assert!(result.len() < large_data.len());
    }

    #[test]
    fn test_compression_ratio() {
        assert_eq!(compression_ratio(50, 100).unwrap(), 50);
        assert_eq!(compression_ratio(100, 100).unwrap(), 100);
        assert_eq!(compression_ratio(4_200, 10_000).unwrap(), 42);
        assert!(compression_ratio(10, 0).is_err());
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(
            select_strategy(CompressionPreference::Auto, 1000, 512),
            CompressionStrategy::PackageLevel
        );
        assert_eq!(
            select_strategy(CompressionPreference::Auto, 10, 1 << 20),
            CompressionStrategy::PerFile
        );
        assert_eq!(
            select_strategy(CompressionPreference::ForceNone, 1000, 512),
            CompressionStrategy::None
        );
    }

    #[test]
    fn test_garbage_input_is_format_error() {
        let garbage = vec![0xFFu8; 64];
        let err = decompress(&garbage, CompressionType::Zstd, 1024).unwrap_err();
        assert!(matches!(err, NovusError::Format { .. }));
        assert!(!err.is_retryable());
    }
}
