use crate::codec::{Reader, Writer};
use crate::error::{NovusError, Result};
use serde::{Deserialize, Serialize};

/// Magic number identifying a NovusPack file ("NVPK").
pub const MAGIC: u32 = 0x4E56_504B;

/// Current format version. Readers reject anything else.
pub const FORMAT_VERSION: u32 = 1;

/// Fixed size of the package header in bytes.
pub const HEADER_SIZE: usize = 112;

// Feature flag bits (Flags bits 0-7).
pub const FLAG_HAS_SIGNATURES: u32 = 1 << 0;
pub const FLAG_HAS_COMPRESSED_FILES: u32 = 1 << 1;
pub const FLAG_HAS_ENCRYPTED_FILES: u32 = 1 << 2;
pub const FLAG_HAS_EXTENDED_ATTRS: u32 = 1 << 3;
pub const FLAG_HAS_PACKAGE_COMMENT: u32 = 1 << 4;
pub const FLAG_HAS_PER_FILE_TAGS: u32 = 1 << 5;
pub const FLAG_HAS_SPECIAL_METADATA: u32 = 1 << 6;
pub const FLAG_METADATA_ONLY: u32 = 1 << 7;

// Flags field layout: bits 0-7 features, bits 8-15 package compression type,
// bits 16-31 reserved.
const FLAGS_MASK_FEATURES: u32 = 0x0000_00FF;
const FLAGS_MASK_COMPRESSION: u32 = 0x0000_FF00;
const FLAGS_SHIFT_COMPRESSION: u32 = 8;

/// Well-known VendorID values (platform/storefront identifiers).
pub mod vendor {
    pub const NONE: u32 = 0x0000_0000;
    pub const STEAM: u32 = 0x5354_4541; // "STEA"
    pub const EPIC: u32 = 0x4550_4943; // "EPIC"
    pub const GOG: u32 = 0x474F_4720; // "GOG "
    pub const ITCH: u32 = 0x4954_4348; // "ITCH"
    pub const GITHUB: u32 = 0x4749_5448; // "GITH"
    pub const GITLAB: u32 = 0x4749_544C; // "GITL"
}

/// Package header (first 112 bytes of every archive)
///
/// Provides navigation offsets for the index, comment, and signature block,
/// plus package-level feature flags and identity. All multi-byte fields are
/// little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Magic number: 0x4E56504B ("NVPK")
    pub magic: u32,

    /// Format version (readers reject unknown versions)
    pub format_version: u32,

    /// Feature bits 0-7, package compression type bits 8-15, rest reserved
    pub flags: u32,

    /// Increments on file additions, removals, or data modification
    pub package_data_version: u32,

    /// Increments on metadata or comment modification
    pub metadata_version: u32,

    /// CRC32 of package content excluding header and signatures (0 = not computed)
    pub package_crc: u32,

    /// Creation timestamp (Unix nanoseconds)
    pub created_time: u64,

    /// Last modification timestamp (Unix nanoseconds)
    pub modified_time: u64,

    /// Locale identifier for path encoding
    pub locale_id: u32,

    /// Reserved, must be 0
    pub reserved: u32,

    /// Application/game identifier (0 = not associated)
    pub app_id: u64,

    /// Platform/storefront identifier (0 = not associated)
    pub vendor_id: u32,

    /// Creator identifier (reserved for future use)
    pub creator_id: u32,

    /// Offset of the file index from start of file
    pub index_start: u64,

    /// Size of the file index in bytes
    pub index_size: u64,

    /// Shared identifier across parts of a multi-part archive
    pub archive_chain_id: u64,

    /// Part number in bits 31-16, total parts in bits 15-0
    pub archive_part_info: u32,

    /// Size of package comment in bytes (0 = no comment)
    pub comment_size: u32,

    /// Offset of the package comment from start of file
    pub comment_start: u64,

    /// Offset of the signature block (0 = unsigned)
    pub signature_offset: u64,
}

impl Header {
    /// Create a header with initial values: version counters at 1, part 1 of 1.
    pub fn new() -> Self {
        Header {
            magic: MAGIC,
            format_version: FORMAT_VERSION,
            flags: 0,
            package_data_version: 1,
            metadata_version: 1,
            package_crc: 0,
            created_time: 0,
            modified_time: 0,
            locale_id: 0,
            reserved: 0,
            app_id: 0,
            vendor_id: 0,
            creator_id: 0,
            index_start: 0,
            index_size: 0,
            archive_chain_id: 0,
            archive_part_info: 0x0001_0001, // part 1 of 1
            comment_size: 0,
            comment_start: 0,
            signature_offset: 0,
        }
    }

    /// Validate magic, version, and reserved fields.
    ///
    /// Magic and version are checked first so corrupt files fail before any
    /// other field is interpreted.
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(NovusError::format(
                format!("invalid magic 0x{:08X}, expected 0x{:08X}", self.magic, MAGIC),
                0,
            ));
        }
        if self.format_version != FORMAT_VERSION {
            return Err(NovusError::format(
                format!(
                    "unsupported format version {}, expected {}",
                    self.format_version, FORMAT_VERSION
                ),
                4,
            ));
        }
        if self.reserved != 0 {
            return Err(NovusError::format("reserved field must be 0", 40));
        }
        // Flag bits must agree with the fields they gate.
        if self.has_feature(FLAG_HAS_PACKAGE_COMMENT) != (self.comment_size > 0) {
            return Err(NovusError::format(
                "comment flag inconsistent with CommentSize",
                8,
            ));
        }
        if self.has_feature(FLAG_HAS_SIGNATURES) != (self.signature_offset > 0) {
            return Err(NovusError::format(
                "signature flag inconsistent with SignatureOffset",
                8,
            ));
        }
        // Per-file compression may set the feature bit while the package-level
        // type stays none, so only the inverse is inconsistent.
        if self.compression_type() != 0 && !self.has_feature(FLAG_HAS_COMPRESSED_FILES) {
            return Err(NovusError::format(
                "package compression type set without compressed-files flag",
                8,
            ));
        }
        Ok(())
    }

    /// Package-level compression type (Flags bits 8-15).
    pub fn compression_type(&self) -> u8 {
        ((self.flags & FLAGS_MASK_COMPRESSION) >> FLAGS_SHIFT_COMPRESSION) as u8
    }

    /// Set the package-level compression type, preserving feature bits.
    pub fn set_compression_type(&mut self, compression_type: u8) {
        self.flags &= !FLAGS_MASK_COMPRESSION;
        self.flags |= (compression_type as u32) << FLAGS_SHIFT_COMPRESSION;
        if compression_type != 0 {
            self.set_feature(FLAG_HAS_COMPRESSED_FILES);
        }
    }

    /// Feature bits 0-7 as a bitmask.
    pub fn features(&self) -> u8 {
        (self.flags & FLAGS_MASK_FEATURES) as u8
    }

    pub fn has_feature(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn set_feature(&mut self, flag: u32) {
        self.flags |= flag;
    }

    pub fn clear_feature(&mut self, flag: u32) {
        self.flags &= !flag;
    }

    /// Part number of a multi-part archive (1-based).
    pub fn archive_part(&self) -> u16 {
        (self.archive_part_info >> 16) as u16
    }

    /// Total parts in the archive chain.
    pub fn archive_total_parts(&self) -> u16 {
        (self.archive_part_info & 0xFFFF) as u16
    }

    pub fn set_archive_part_info(&mut self, part: u16, total: u16) {
        self.archive_part_info = ((part as u32) << 16) | total as u32;
    }

    pub fn is_signed(&self) -> bool {
        self.signature_offset > 0
    }

    pub fn has_comment(&self) -> bool {
        self.comment_size > 0
    }

    /// Serialize to the fixed 112-byte layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(HEADER_SIZE);
        w.u32(self.magic);
        w.u32(self.format_version);
        w.u32(self.flags);
        w.u32(self.package_data_version);
        w.u32(self.metadata_version);
        w.u32(self.package_crc);
        w.u64(self.created_time);
        w.u64(self.modified_time);
        w.u32(self.locale_id);
        w.u32(self.reserved);
        w.u64(self.app_id);
        w.u32(self.vendor_id);
        w.u32(self.creator_id);
        w.u64(self.index_start);
        w.u64(self.index_size);
        w.u64(self.archive_chain_id);
        w.u32(self.archive_part_info);
        w.u32(self.comment_size);
        w.u64(self.comment_start);
        w.u64(self.signature_offset);
        debug_assert_eq!(w.len(), HEADER_SIZE);
        w.into_vec()
    }

    /// Deserialize and validate from the fixed 112-byte layout.
    ///
    /// Magic and version are rejected before the remaining fields are used.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(NovusError::format(
                format!("header needs {} bytes, got {}", HEADER_SIZE, bytes.len()),
                0,
            ));
        }
        let mut r = Reader::new(&bytes[..HEADER_SIZE], 0);
        let magic = r.u32("Magic")?;
        if magic != MAGIC {
            return Err(NovusError::format(
                format!("invalid magic 0x{:08X}, expected 0x{:08X}", magic, MAGIC),
                0,
            ));
        }
        let format_version = r.u32("FormatVersion")?;
        if format_version != FORMAT_VERSION {
            return Err(NovusError::format(
                format!("unsupported format version {}", format_version),
                4,
            ));
        }

        let header = Header {
            magic,
            format_version,
            flags: r.u32("Flags")?,
            package_data_version: r.u32("PackageDataVersion")?,
            metadata_version: r.u32("MetadataVersion")?,
            package_crc: r.u32("PackageCRC")?,
            created_time: r.u64("CreatedTime")?,
            modified_time: r.u64("ModifiedTime")?,
            locale_id: r.u32("LocaleID")?,
            reserved: r.u32("Reserved")?,
            app_id: r.u64("AppID")?,
            vendor_id: r.u32("VendorID")?,
            creator_id: r.u32("CreatorID")?,
            index_start: r.u64("IndexStart")?,
            index_size: r.u64("IndexSize")?,
            archive_chain_id: r.u64("ArchiveChainID")?,
            archive_part_info: r.u32("ArchivePartInfo")?,
            comment_size: r.u32("CommentSize")?,
            comment_start: r.u64("CommentStart")?,
            signature_offset: r.u64("SignatureOffset")?,
        };
        header.validate()?;
        Ok(header)
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_creation() {
        let header = Header::new();
        assert_eq!(header.magic, MAGIC);
        assert_eq!(header.format_version, FORMAT_VERSION);
        assert_eq!(header.package_data_version, 1);
        assert_eq!(header.metadata_version, 1);
        assert_eq!(header.archive_part(), 1);
        assert_eq!(header.archive_total_parts(), 1);
        assert!(header.validate().is_ok());
    }

    #[test]
    fn test_invalid_magic_fails_before_other_fields() {
        let mut bytes = Header::new().to_bytes();
        bytes[0] = 0x00;
        // Corrupt a later field too; the magic error must win.
        bytes[40] = 0xFF;
        let err = Header::from_bytes(&bytes).unwrap_err();
        match err {
            NovusError::Format { offset, context } => {
                assert_eq!(offset, 0);
                assert!(context.contains("magic"));
            }
            other => panic!("expected Format, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut header = Header::new();
        header.format_version = 99;
        let bytes = header.to_bytes();
        assert!(Header::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_reserved_must_be_zero() {
        let mut header = Header::new();
        header.reserved = 7;
        assert!(header.validate().is_err());
    }

    #[test]
    fn test_serialization_round_trip() {
        let mut header = Header::new();
        header.set_compression_type(1);
        header.set_feature(FLAG_HAS_PACKAGE_COMMENT);
        header.index_start = 4096;
        header.index_size = 320;
        header.app_id = 440;
        header.vendor_id = vendor::STEAM;
        header.comment_size = 6;
        header.comment_start = 4416;
        header.archive_chain_id = 0xCAFEBABE;
        header.set_archive_part_info(2, 4);

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        let decoded = Header::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_compression_type_nibble_preserves_features() {
        let mut header = Header::new();
        header.set_feature(FLAG_HAS_ENCRYPTED_FILES);
        header.set_compression_type(2);
        assert_eq!(header.compression_type(), 2);
        assert!(header.has_feature(FLAG_HAS_ENCRYPTED_FILES));
        assert!(header.has_feature(FLAG_HAS_COMPRESSED_FILES));

        header.set_compression_type(0);
        assert_eq!(header.compression_type(), 0);
        assert!(header.has_feature(FLAG_HAS_ENCRYPTED_FILES));
    }

    #[test]
    fn test_flag_field_consistency_enforced() {
        let mut header = Header::new();
        header.comment_size = 10;
        // Flag not set, size non-zero.
        assert!(header.validate().is_err());
        header.set_feature(FLAG_HAS_PACKAGE_COMMENT);
        assert!(header.validate().is_ok());

        // Compression type set without the feature flag.
        let mut header = Header::new();
        header.flags |= 1 << FLAGS_SHIFT_COMPRESSION;
        assert!(header.validate().is_err());
    }

    #[test]
    fn test_archive_part_info_packing() {
        let mut header = Header::new();
        header.set_archive_part_info(3, 7);
        assert_eq!(header.archive_part(), 3);
        assert_eq!(header.archive_total_parts(), 7);
        assert_eq!(header.archive_part_info, 0x0003_0007);
    }

    #[test]
    fn test_truncated_header_rejected() {
        let bytes = Header::new().to_bytes();
        assert!(Header::from_bytes(&bytes[..HEADER_SIZE - 1]).is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_header_round_trip(
            app_id in proptest::prelude::any::<u64>(),
            vendor_id in proptest::prelude::any::<u32>(),
            created in proptest::prelude::any::<u64>(),
            index_start in 112u64..1 << 40,
            index_size in 0u64..1 << 30,
            chain_id in proptest::prelude::any::<u64>(),
            part in 1u16..100,
            crc in proptest::prelude::any::<u32>(),
        ) {
            let mut header = Header::new();
            header.app_id = app_id;
            header.vendor_id = vendor_id;
            header.created_time = created;
            header.modified_time = created;
            header.index_start = index_start;
            header.index_size = index_size;
            header.archive_chain_id = chain_id;
            header.set_archive_part_info(part, part);
            header.package_crc = crc;

            let bytes = header.to_bytes();
            proptest::prop_assert_eq!(bytes.len(), HEADER_SIZE);
            let decoded = Header::from_bytes(&bytes).unwrap();
            proptest::prop_assert_eq!(decoded, header);
        }
    }
}
