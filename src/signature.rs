//! Digital signature block.
//!
//! Signatures live in a count-prefixed block at the tail of the package,
//! located by the header's `SignatureOffset`. The block is append-only:
//! re-signing adds an entry, it never edits or removes earlier ones.
//! Verification is delegated to `SignatureVerifier` implementations and
//! always yields a `TrustLevel`, never a bare bool.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec::{Reader, Writer};
use crate::error::{NovusError, Result};

/// Signature algorithm identifier as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SignatureType {
    /// ML-DSA (FIPS 204, post-quantum)
    MlDsa = 1,
    /// SLH-DSA (FIPS 205, post-quantum)
    SlhDsa = 2,
    /// OpenPGP
    Pgp = 3,
    /// X.509 certificate based
    X509 = 4,
}

impl SignatureType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(SignatureType::MlDsa),
            2 => Some(SignatureType::SlhDsa),
            3 => Some(SignatureType::Pgp),
            4 => Some(SignatureType::X509),
            _ => None,
        }
    }

    /// Post-quantum algorithms rate higher than classical ones when a
    /// valid signature is graded.
    pub fn is_quantum_safe(&self) -> bool {
        matches!(self, SignatureType::MlDsa | SignatureType::SlhDsa)
    }
}

/// Verification verdict: validity combined with algorithm strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustLevel {
    /// Valid signature from a strong algorithm
    Trusted,
    /// Valid signature, but the algorithm or key does not meet the trust
    /// bar
    Untrusted,
    /// Signature failed verification
    Invalid,
}

/// One signature over the package content.
///
/// Layout: Type u32, Size u32, Flags u32, Timestamp u32 (unix seconds),
/// CommentLength u16 + comment, then Size raw signature bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub signature_type: SignatureType,
    pub flags: u32,
    pub timestamp: u32,
    pub comment: String,
    pub data: Vec<u8>,
}

impl Signature {
    pub fn new(signature_type: SignatureType, data: Vec<u8>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        Signature {
            signature_type,
            flags: 0,
            timestamp,
            comment: String::new(),
            data,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.data.is_empty() {
            return Err(NovusError::format("signature has no data", 0));
        }
        if self.comment.len() > u16::MAX as usize {
            return Err(NovusError::format("signature comment too long", 0));
        }
        if self.comment.contains('\0') {
            return Err(NovusError::security(
                "signature comment must not contain null bytes",
            ));
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        16 + 2 + self.comment.len() + self.data.len()
    }

    pub fn encode(&self, w: &mut Writer) {
        w.u32(self.signature_type as u32);
        w.u32(self.data.len() as u32);
        w.u32(self.flags);
        w.u32(self.timestamp);
        w.u16(self.comment.len() as u16);
        w.bytes(self.comment.as_bytes());
        w.bytes(&self.data);
    }

    pub fn decode(r: &mut Reader) -> Result<Self> {
        let type_raw = r.u32("SignatureType")?;
        let signature_type =
            SignatureType::from_u32(type_raw).ok_or(NovusError::Unsupported {
                what: "signature type",
                value: type_raw,
            })?;
        let size = r.u32("SignatureSize")? as usize;
        let flags = r.u32("SignatureFlags")?;
        let timestamp = r.u32("SignatureTimestamp")?;
        let comment_len = r.u16("SignatureCommentLength")? as usize;
        let comment = r.utf8(comment_len, "SignatureComment")?;
        let data = r.bytes(size, "SignatureData")?;
        let sig = Signature {
            signature_type,
            flags,
            timestamp,
            comment,
            data,
        };
        sig.validate()?;
        Ok(sig)
    }
}

/// Append-only list of signatures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureBlock {
    signatures: Vec<Signature>,
}

impl SignatureBlock {
    pub fn new() -> Self {
        SignatureBlock {
            signatures: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// Append a signature. Earlier entries are never modified.
    pub fn add(&mut self, signature: Signature) -> Result<()> {
        signature.validate()?;
        self.signatures.push(signature);
        Ok(())
    }

    pub fn size(&self) -> usize {
        4 + self.signatures.iter().map(|s| s.size()).sum::<usize>()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(self.size());
        w.u32(self.signatures.len() as u32);
        for sig in &self.signatures {
            sig.encode(&mut w);
        }
        w.into_vec()
    }

    pub fn from_bytes(bytes: &[u8], base_offset: u64) -> Result<Self> {
        let mut r = Reader::new(bytes, base_offset);
        let count = r.u32("SignatureCount")? as usize;
        let mut signatures = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            signatures.push(Signature::decode(&mut r)?);
        }
        Ok(SignatureBlock { signatures })
    }
}

/// Pluggable signature verification. `signed_bytes` covers everything the
/// signature protects (all package bytes before the signature block).
pub trait SignatureVerifier: Send + Sync {
    fn signature_type(&self) -> SignatureType;
    fn verify(&self, signature: &Signature, signed_bytes: &[u8]) -> Result<TrustLevel>;
}

/// Verify every signature in a block, pairing each with the matching
/// verifier. Signatures with no registered verifier are unsupported.
pub fn verify_all(
    block: &SignatureBlock,
    verifiers: &[Box<dyn SignatureVerifier>],
    signed_bytes: &[u8],
) -> Result<Vec<(SignatureType, TrustLevel)>> {
    let mut results = Vec::with_capacity(block.len());
    for sig in block.signatures() {
        let verifier = verifiers
            .iter()
            .find(|v| v.signature_type() == sig.signature_type)
            .ok_or(NovusError::Unsupported {
                what: "signature type",
                value: sig.signature_type as u32,
            })?;
        results.push((sig.signature_type, verifier.verify(sig, signed_bytes)?));
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedVerifier(SignatureType, TrustLevel);

    impl SignatureVerifier for FixedVerifier {
        fn signature_type(&self) -> SignatureType {
            self.0
        }
        fn verify(&self, _signature: &Signature, _signed_bytes: &[u8]) -> Result<TrustLevel> {
            Ok(self.1)
        }
    }

    #[test]
    fn test_signature_round_trip() {
        let sig = Signature::new(SignatureType::MlDsa, vec![0xAB; 40])
            .with_comment("release signing key");

        let mut block = SignatureBlock::new();
        block.add(sig.clone()).unwrap();
        let bytes = block.to_bytes();
        assert_eq!(bytes.len(), block.size());

        let decoded = SignatureBlock::from_bytes(&bytes, 0).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.signatures()[0].comment, "release signing key");
    }

    #[test]
    fn test_block_is_append_only() {
        let mut block = SignatureBlock::new();
        block
            .add(Signature::new(SignatureType::Pgp, vec![1, 2, 3]))
            .unwrap();
        let first = block.signatures()[0].clone();

        block
            .add(Signature::new(SignatureType::MlDsa, vec![4, 5, 6]))
            .unwrap();
        assert_eq!(block.len(), 2);
        assert_eq!(block.signatures()[0], first);
    }

    #[test]
    fn test_empty_signature_rejected() {
        let mut block = SignatureBlock::new();
        let err = block
            .add(Signature::new(SignatureType::X509, Vec::new()))
            .unwrap_err();
        assert!(matches!(err, NovusError::Format { .. }));
    }

    #[test]
    fn test_unknown_type_unsupported() {
        let mut block = SignatureBlock::new();
        block
            .add(Signature::new(SignatureType::Pgp, vec![9]))
            .unwrap();
        let mut bytes = block.to_bytes();
        // Overwrite the type field of the first signature.
        bytes[4] = 0xEE;
        let err = SignatureBlock::from_bytes(&bytes, 0).unwrap_err();
        assert!(matches!(err, NovusError::Unsupported { .. }));
    }

    #[test]
    fn test_quantum_safe_classification() {
        assert!(SignatureType::MlDsa.is_quantum_safe());
        assert!(SignatureType::SlhDsa.is_quantum_safe());
        assert!(!SignatureType::Pgp.is_quantum_safe());
        assert!(!SignatureType::X509.is_quantum_safe());
    }

    #[test]
    fn test_verify_all_pairs_by_type() {
        let mut block = SignatureBlock::new();
        block
            .add(Signature::new(SignatureType::MlDsa, vec![1]))
            .unwrap();
        block
            .add(Signature::new(SignatureType::Pgp, vec![2]))
            .unwrap();

        let verifiers: Vec<Box<dyn SignatureVerifier>> = vec![
            Box::new(FixedVerifier(SignatureType::MlDsa, TrustLevel::Trusted)),
            Box::new(FixedVerifier(SignatureType::Pgp, TrustLevel::Untrusted)),
        ];
        let results = verify_all(&block, &verifiers, b"payload").unwrap();
        assert_eq!(
            results,
            vec![
                (SignatureType::MlDsa, TrustLevel::Trusted),
                (SignatureType::Pgp, TrustLevel::Untrusted),
            ]
        );
    }

    #[test]
    fn test_verify_without_verifier_is_unsupported() {
        let mut block = SignatureBlock::new();
        block
            .add(Signature::new(SignatureType::X509, vec![7]))
            .unwrap();
        let err = verify_all(&block, &[], b"payload").unwrap_err();
        assert!(matches!(err, NovusError::Unsupported { .. }));
    }
}
