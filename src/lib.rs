//! NovusPack Package Format
//!
//! A mutable binary package container for game and application content,
//! with per-file compression, encryption, deduplication, multiple path
//! aliases per file, and post-quantum-ready signatures.
//!
//! ## Features
//!
//! - **Fixed 112-byte header** locating every section by absolute offset
//! - **Interleaved entries**: each file's metadata record is directly
//!   followed by its stored bytes
//! - **O(1) lookups** by FileID and by any path alias
//! - **Content dedup** keyed by checksum and confirmed byte-for-byte
//! - **LZ4/Zstd compression** with a stored-uncompressed fallback
//! - **AES-256-GCM encryption** per file, pluggable via `CryptoProvider`
//! - **Append-only signatures** (ML-DSA, SLH-DSA, PGP, X.509)
//! - **Safe and fast write strategies**, plus safe-write-based
//!   defragmentation
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use novuspack::{AddFileOptions, Package, WriteStrategy};
//!
//! let pkg = Package::create("assets.nvpk").unwrap();
//! pkg.add_file_from_memory("textures/grass.png", &[0u8; 1024], &AddFileOptions::default())
//!     .unwrap();
//! pkg.set_comment("Level 1 assets").unwrap();
//! novuspack::writer::commit(&pkg, WriteStrategy::Safe, None).unwrap();
//!
//! let pkg = Package::open_read_only("assets.nvpk").unwrap();
//! for info in pkg.list_files(None) {
//!     println!("{} ({} bytes)", info.primary_path, info.original_size);
//! }
//! ```
//!
//! ## Archive Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Header (112 bytes)                          │
//! │  - Magic "NVPK", version, flags             │
//! │  - Index/comment/signature offsets          │
//! ├─────────────────────────────────────────────┤
//! │ File entries, interleaved with data         │
//! │  - 64-byte fixed prefix                     │
//! │  - Paths, hashes, optional data             │
//! │  - Stored (compressed/encrypted) bytes      │
//! ├─────────────────────────────────────────────┤
//! │ File index                                  │
//! │  - FileID → offset table                    │
//! ├─────────────────────────────────────────────┤
//! │ Comment (optional)                          │
//! ├─────────────────────────────────────────────┤
//! │ Signature block (optional, append-only)     │
//! └─────────────────────────────────────────────┘
//! ```

pub mod buffer_pool;
pub mod checksum;
pub mod codec;
pub mod comment;
pub mod compression;
pub mod encryption;
pub mod entry;
pub mod error;
pub mod file_info;
pub mod hash;
pub mod header;
pub mod index;
pub mod io;
pub mod package;
pub mod signature;
pub mod worker_pool;
pub mod writer;

// Re-export commonly used types
pub use buffer_pool::{BufferPool, BufferPoolStats};
pub use comment::PackageComment;
pub use compression::{CompressionConfig, CompressionStrategy, CompressionType};
pub use encryption::{AesGcmProvider, CryptoProvider, EncryptionType, KeyRef};
pub use entry::{FileEntry, OptionalDataEntry, OptionalDataKind, PathEntry};
pub use error::{NovusError, Result};
pub use file_info::{FileFilter, FileInfo};
pub use hash::{HashEntry, HashPurpose, HashType};
pub use header::{Header, HEADER_SIZE, MAGIC};
pub use index::FileIndex;
pub use io::PackageFile;
pub use package::{AccessMode, AddFileOptions, Package};
pub use signature::{Signature, SignatureBlock, SignatureType, SignatureVerifier, TrustLevel};
pub use worker_pool::{CancellationToken, WorkerPool, WorkerPoolConfig};
pub use writer::WriteStrategy;

/// Package format version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
