//! Optional package comment section.
//!
//! Layout: CommentLength (u32, includes the null terminator when non-empty),
//! UTF-8 comment text ending in 0x00, then 3 reserved zero bytes.

use crate::codec::{Reader, Writer};
use crate::error::{NovusError, Result};

/// Maximum comment length in bytes including the null terminator (1 MiB - 1).
pub const MAX_COMMENT_LENGTH: u32 = 1_048_575;

/// Package comment with its on-disk length field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackageComment {
    /// Length of the comment including null terminator, 0 when empty.
    pub comment_length: u32,
    /// Comment text without the terminator.
    pub comment: String,
    /// Reserved, must be zero.
    pub reserved: [u8; 3],
}

impl PackageComment {
    pub fn new() -> Self {
        PackageComment::default()
    }

    /// Set the comment text, updating the length field.
    ///
    /// Embedded null characters are rejected as unsafe content.
    pub fn set(&mut self, text: &str) -> Result<()> {
        if text.contains('\0') {
            return Err(NovusError::security(
                "comment must not contain embedded null characters",
            ));
        }
        let needed = text.len() as u64 + 1;
        if needed > MAX_COMMENT_LENGTH as u64 {
            return Err(NovusError::security(format!(
                "comment length {} exceeds maximum {}",
                needed, MAX_COMMENT_LENGTH
            )));
        }
        if text.is_empty() {
            self.clear();
        } else {
            self.comment_length = needed as u32;
            self.comment = text.to_string();
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.comment_length = 0;
        self.comment.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.comment_length == 0
    }

    pub fn validate(&self) -> Result<()> {
        if self.reserved != [0, 0, 0] {
            return Err(NovusError::format("comment reserved bytes must be zero", 0));
        }
        if self.comment_length == 0 {
            if !self.comment.is_empty() {
                return Err(NovusError::format(
                    "zero CommentLength with non-empty comment text",
                    0,
                ));
            }
            return Ok(());
        }
        if self.comment_length > MAX_COMMENT_LENGTH {
            return Err(NovusError::format(
                format!("comment length {} exceeds maximum", self.comment_length),
                0,
            ));
        }
        if self.comment_length as usize != self.comment.len() + 1 {
            return Err(NovusError::format(
                format!(
                    "CommentLength {} does not match text length {} + terminator",
                    self.comment_length,
                    self.comment.len()
                ),
                0,
            ));
        }
        if self.comment.contains('\0') {
            return Err(NovusError::security(
                "comment must not contain embedded null characters",
            ));
        }
        Ok(())
    }

    /// Encoded size in bytes: length field + text + terminator + reserved.
    pub fn size(&self) -> usize {
        if self.is_empty() {
            4 + 3
        } else {
            4 + self.comment_length as usize + 3
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(self.size());
        w.u32(self.comment_length);
        if self.comment_length > 0 {
            w.bytes(self.comment.as_bytes());
            w.u8(0);
        }
        w.bytes(&self.reserved);
        w.into_vec()
    }

    pub fn from_bytes(bytes: &[u8], base_offset: u64) -> Result<Self> {
        let mut r = Reader::new(bytes, base_offset);
        let comment_length = r.u32("CommentLength")?;
        if comment_length > MAX_COMMENT_LENGTH {
            return Err(NovusError::format(
                format!("comment length {} exceeds maximum", comment_length),
                base_offset,
            ));
        }
        let comment = if comment_length > 0 {
            let mut raw = r.bytes(comment_length as usize, "Comment")?;
            match raw.pop() {
                Some(0) => {}
                _ => {
                    return Err(NovusError::format(
                        "comment is not null-terminated",
                        base_offset + 4,
                    ))
                }
            }
            if raw.contains(&0) {
                return Err(NovusError::format(
                    "comment contains embedded null characters",
                    base_offset + 4,
                ));
            }
            String::from_utf8(raw).map_err(|_| {
                NovusError::format("comment is not valid UTF-8", base_offset + 4)
            })?
        } else {
            String::new()
        };
        let reserved_bytes = r.bytes(3, "Reserved")?;
        let reserved = [reserved_bytes[0], reserved_bytes[1], reserved_bytes[2]];

        let comment = PackageComment {
            comment_length,
            comment,
            reserved,
        };
        comment.validate()?;
        Ok(comment)
    }
}
