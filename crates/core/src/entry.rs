//! Application-level entries submitted to a chain.

use crate::codec::{BinaryMarshal, BinaryUnmarshal, CodecError, Reader, Result, Writer};
use crate::hash::{hash, Hash};
use serde::{Deserialize, Serialize};

/// Largest ext-id section, length prefixes included, a u16 size can describe.
pub const MAX_EXT_IDS_SIZE: usize = u16::MAX as usize;

/// An entry: external ids plus free-form content, addressed to one chain.
///
/// Binary layout: version(1) ++ chain id(32) ++ ext-id section size(u16)
/// ++ each ext id as len(u16) ++ bytes ++ content (rest of the input).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub version: u8,
    pub chain_id: Hash,
    pub ext_ids: Vec<Vec<u8>>,
    pub content: Vec<u8>,
}

impl Entry {
    pub fn new(chain_id: Hash, ext_ids: Vec<Vec<u8>>, content: Vec<u8>) -> Self {
        Self {
            version: 0,
            chain_id,
            ext_ids,
            content,
        }
    }

    /// Content hash of the entry, as referenced from an Entry Block.
    ///
    /// Only meaningful for entries that pass [`Entry::validate`].
    pub fn hash(&self) -> Hash {
        hash(&self.marshal())
    }

    /// Check that the ext ids fit their u16 size prefixes.
    pub fn validate(&self) -> Result<()> {
        let size = self.ext_ids_size();
        if size > MAX_EXT_IDS_SIZE {
            return Err(CodecError::TooLong {
                field: "ext id section",
                len: size,
                max: MAX_EXT_IDS_SIZE,
            });
        }
        Ok(())
    }

    fn ext_ids_size(&self) -> usize {
        self.ext_ids.iter().map(|id| 2 + id.len()).sum()
    }
}

impl BinaryMarshal for Entry {
    fn marshal_into(&self, w: &mut Writer) {
        w.put_u8(self.version);
        w.put_hash(&self.chain_id);
        // fits once the entry passes validate()
        w.put_u16(self.ext_ids_size() as u16);
        for id in &self.ext_ids {
            w.put_u16(id.len() as u16);
            w.put_bytes(id);
        }
        w.put_bytes(&self.content);
    }
}

impl BinaryUnmarshal for Entry {
    fn unmarshal_from(r: &mut Reader<'_>) -> Result<Self> {
        let version = r.read_u8("entry version")?;
        let chain_id = r.read_hash("entry chain id")?;
        let section_size = r.read_u16("ext id section size")? as usize;
        let section_start = r.offset();

        let mut ext_ids = Vec::new();
        while r.offset() - section_start < section_size {
            let len = r.read_u16("ext id length")? as usize;
            ext_ids.push(r.take(len, "ext id")?.to_vec());
        }

        let consumed = r.offset() - section_start;
        if consumed != section_size {
            return Err(CodecError::CountMismatch {
                field: "ext id section bytes",
                declared: section_size as u64,
                actual: consumed as u64,
            });
        }

        let content = r.read_rest().to_vec();
        Ok(Self {
            version,
            chain_id,
            ext_ids,
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Entry {
        Entry::new(
            Hash::repeat(0x01),
            vec![b"first".to_vec(), b"".to_vec(), b"third id".to_vec()],
            b"entry content".to_vec(),
        )
    }

    #[test]
    fn test_entry_layout() {
        let entry = sample();
        let bytes = entry.marshal();
        assert_eq!(bytes[0], 0);
        assert_eq!(&bytes[1..33], Hash::repeat(0x01).as_bytes());
        // 2+5 + 2+0 + 2+8
        assert_eq!(&bytes[33..35], &[0, 19]);
        assert!(bytes.ends_with(b"entry content"));
    }

    #[test]
    fn test_entry_decodes() {
        let entry = sample();
        let decoded = Entry::unmarshal(&entry.marshal()).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(decoded.hash(), entry.hash());
    }

    #[test]
    fn test_entry_hash_depends_on_content() {
        let mut other = sample();
        other.content.push(b'!');
        assert_ne!(other.hash(), sample().hash());
    }

    #[test]
    fn test_entry_overrunning_ext_ids_rejected() {
        let mut bytes = sample().marshal();
        // declare a section one byte shorter than the ids actually encoded
        bytes[34] = 18;
        assert!(matches!(
            Entry::unmarshal(&bytes),
            Err(CodecError::CountMismatch { .. })
        ));
    }

    #[test]
    fn test_oversized_ext_id_rejected() {
        let entry = Entry::new(Hash::repeat(0x01), vec![vec![7u8; 70_000]], b"c".to_vec());
        assert_eq!(
            entry.validate(),
            Err(CodecError::TooLong {
                field: "ext id section",
                len: 70_002,
                max: MAX_EXT_IDS_SIZE,
            })
        );

        // many small ids can overflow the section as well
        let many = Entry::new(Hash::repeat(0x01), vec![vec![0u8; 1_000]; 66], Vec::new());
        assert!(many.validate().is_err());

        let fits = Entry::new(
            Hash::repeat(0x01),
            vec![vec![7u8; MAX_EXT_IDS_SIZE - 2]],
            b"c".to_vec(),
        );
        assert!(fits.validate().is_ok());
        assert_eq!(Entry::unmarshal(&fits.marshal()).unwrap(), fits);
    }

    #[test]
    fn test_entry_truncated_header() {
        let bytes = sample().marshal();
        assert!(matches!(
            Entry::unmarshal(&bytes[..20]),
            Err(CodecError::Truncated {
                field: "entry chain id",
                ..
            })
        ));
    }
}
