//! Signed credit commitments recorded in Entry Credit Blocks.
//!
//! A commitment pays entry credits for an entry before the entry itself is
//! revealed. The signature covers every field before the public key.

use crate::codec::{BinaryMarshal, BinaryUnmarshal, Reader, Result, Writer};
use crate::crypto::{CryptoError, Keypair, PublicKey, Signature, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use crate::hash::{hash, hash_concat, Hash, HASH_LENGTH};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of a commitment timestamp on the wire.
pub const MILLI_TIME_LENGTH: usize = 6;

/// Milliseconds since the Unix epoch, stored as 6 big-endian bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct MilliTime(pub [u8; MILLI_TIME_LENGTH]);

impl MilliTime {
    pub fn now() -> Self {
        Self::from_millis(Utc::now().timestamp_millis().max(0) as u64)
    }

    /// Keep the low 48 bits of `millis`.
    pub fn from_millis(millis: u64) -> Self {
        let bytes = millis.to_be_bytes();
        let mut out = [0u8; MILLI_TIME_LENGTH];
        out.copy_from_slice(&bytes[8 - MILLI_TIME_LENGTH..]);
        Self(out)
    }

    pub fn as_millis(&self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes[8 - MILLI_TIME_LENGTH..].copy_from_slice(&self.0);
        u64::from_be_bytes(bytes)
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.as_millis() as i64).single()
    }
}

impl fmt::Debug for MilliTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MilliTime({})", self.as_millis())
    }
}

/// Commitment that creates a new chain with its first entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitChain {
    pub version: u8,
    pub milli_time: MilliTime,
    /// Double hash of the new chain id.
    pub chain_id_hash: Hash,
    /// Binds the first entry to the chain id.
    pub weld: Hash,
    pub entry_hash: Hash,
    /// Entry credits paid.
    pub credits: u8,
    pub ec_pub_key: PublicKey,
    pub sig: Signature,
}

impl CommitChain {
    /// Encoded size of the signed fields.
    pub const SIGNED_LENGTH: usize = 1 + MILLI_TIME_LENGTH + 3 * HASH_LENGTH + 1;
    /// Encoded size of the full commitment.
    pub const LENGTH: usize = Self::SIGNED_LENGTH + PUBLIC_KEY_LENGTH + SIGNATURE_LENGTH;

    /// An unsigned commitment for `entry_hash` as the first entry of `chain_id`.
    pub fn new(chain_id: &Hash, entry_hash: Hash, credits: u8, milli_time: MilliTime) -> Self {
        Self {
            version: 0,
            milli_time,
            chain_id_hash: chain_id_hash(chain_id),
            weld: weld(&entry_hash, chain_id),
            entry_hash,
            credits,
            ec_pub_key: PublicKey::default(),
            sig: Signature::default(),
        }
    }

    /// Whether this commitment is for `entry_hash` opening `chain_id`.
    pub fn commits_to(&self, chain_id: &Hash, entry_hash: &Hash) -> bool {
        self.entry_hash == *entry_hash
            && self.chain_id_hash == chain_id_hash(chain_id)
            && self.weld == weld(entry_hash, chain_id)
    }

    /// The bytes covered by the signature.
    pub fn signable_message(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(Self::SIGNED_LENGTH);
        self.write_signed_fields(&mut w);
        w.into_bytes()
    }

    fn write_signed_fields(&self, w: &mut Writer) {
        w.put_u8(self.version);
        w.put_bytes(&self.milli_time.0);
        w.put_hash(&self.chain_id_hash);
        w.put_hash(&self.weld);
        w.put_hash(&self.entry_hash);
        w.put_u8(self.credits);
    }

    /// Sign with `keypair`, recording its public key.
    pub fn sign(&mut self, keypair: &Keypair) {
        self.ec_pub_key = keypair.public_key;
        self.sig = keypair.sign(&self.signable_message());
    }

    pub fn signed(mut self, keypair: &Keypair) -> Self {
        self.sign(keypair);
        self
    }

    /// Any failure, including an undecodable key, is `SignatureInvalid`.
    pub fn verify(&self) -> std::result::Result<(), CryptoError> {
        verify_commitment(&self.ec_pub_key, &self.signable_message(), &self.sig)
    }
}

impl BinaryMarshal for CommitChain {
    fn marshal_into(&self, w: &mut Writer) {
        self.write_signed_fields(w);
        w.put_bytes(self.ec_pub_key.as_bytes());
        w.put_bytes(self.sig.as_bytes());
    }
}

impl BinaryUnmarshal for CommitChain {
    fn unmarshal_from(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            version: r.read_u8("commit chain version")?,
            milli_time: MilliTime(r.read_array("commit chain timestamp")?),
            chain_id_hash: r.read_hash("commit chain id hash")?,
            weld: r.read_hash("commit chain weld")?,
            entry_hash: r.read_hash("commit chain entry hash")?,
            credits: r.read_u8("commit chain credits")?,
            ec_pub_key: PublicKey(r.read_array("commit chain public key")?),
            sig: Signature(r.read_array("commit chain signature")?),
        })
    }
}

/// Commitment for one new entry in an existing chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEntry {
    pub version: u8,
    pub milli_time: MilliTime,
    pub entry_hash: Hash,
    pub credits: u8,
    pub ec_pub_key: PublicKey,
    pub sig: Signature,
}

impl CommitEntry {
    pub const SIGNED_LENGTH: usize = 1 + MILLI_TIME_LENGTH + HASH_LENGTH + 1;
    pub const LENGTH: usize = Self::SIGNED_LENGTH + PUBLIC_KEY_LENGTH + SIGNATURE_LENGTH;

    pub fn new(entry_hash: Hash, credits: u8, milli_time: MilliTime) -> Self {
        Self {
            version: 0,
            milli_time,
            entry_hash,
            credits,
            ec_pub_key: PublicKey::default(),
            sig: Signature::default(),
        }
    }

    pub fn signable_message(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(Self::SIGNED_LENGTH);
        self.write_signed_fields(&mut w);
        w.into_bytes()
    }

    fn write_signed_fields(&self, w: &mut Writer) {
        w.put_u8(self.version);
        w.put_bytes(&self.milli_time.0);
        w.put_hash(&self.entry_hash);
        w.put_u8(self.credits);
    }

    pub fn sign(&mut self, keypair: &Keypair) {
        self.ec_pub_key = keypair.public_key;
        self.sig = keypair.sign(&self.signable_message());
    }

    pub fn signed(mut self, keypair: &Keypair) -> Self {
        self.sign(keypair);
        self
    }

    pub fn verify(&self) -> std::result::Result<(), CryptoError> {
        verify_commitment(&self.ec_pub_key, &self.signable_message(), &self.sig)
    }
}

impl BinaryMarshal for CommitEntry {
    fn marshal_into(&self, w: &mut Writer) {
        self.write_signed_fields(w);
        w.put_bytes(self.ec_pub_key.as_bytes());
        w.put_bytes(self.sig.as_bytes());
    }
}

impl BinaryUnmarshal for CommitEntry {
    fn unmarshal_from(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            version: r.read_u8("commit entry version")?,
            milli_time: MilliTime(r.read_array("commit entry timestamp")?),
            entry_hash: r.read_hash("commit entry hash")?,
            credits: r.read_u8("commit entry credits")?,
            ec_pub_key: PublicKey(r.read_array("commit entry public key")?),
            sig: Signature(r.read_array("commit entry signature")?),
        })
    }
}

fn verify_commitment(
    key: &PublicKey,
    message: &[u8],
    sig: &Signature,
) -> std::result::Result<(), CryptoError> {
    key.verify(message, sig).map_err(|_| CryptoError::SignatureInvalid)
}

/// Double SHA-256 of a chain id, as committed before the chain is revealed.
pub fn chain_id_hash(chain_id: &Hash) -> Hash {
    hash(hash(chain_id.as_ref()).as_ref())
}

/// Double SHA-256 of the first entry hash followed by the chain id.
pub fn weld(entry_hash: &Hash, chain_id: &Hash) -> Hash {
    hash(hash_concat(&[entry_hash.as_ref(), chain_id.as_ref()]).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_commit_chain() -> CommitChain {
        CommitChain {
            version: 0,
            milli_time: MilliTime([1, 1, 1, 1, 1, 1]),
            chain_id_hash: Hash::repeat(0xAA),
            weld: Hash::repeat(0xBB),
            entry_hash: Hash::repeat(0xCC),
            credits: 11,
            ec_pub_key: PublicKey::default(),
            sig: Signature::default(),
        }
    }

    #[test]
    fn test_milli_time() {
        let t = MilliTime::from_millis(1_430_000_000_123);
        assert_eq!(t.as_millis(), 1_430_000_000_123);
        assert_eq!(MilliTime([1, 1, 1, 1, 1, 1]).as_millis(), 0x0101_0101_0101);
        assert!(MilliTime::now().to_datetime().is_some());
    }

    #[test]
    fn test_commit_chain_sizes() {
        assert_eq!(CommitChain::SIGNED_LENGTH, 104);
        assert_eq!(CommitChain::LENGTH, 200);
        assert_eq!(CommitEntry::LENGTH, 136);

        let cc = sample_commit_chain();
        assert_eq!(cc.signable_message().len(), CommitChain::SIGNED_LENGTH);
        assert_eq!(cc.marshal().len(), CommitChain::LENGTH);
    }

    #[test]
    fn test_signable_message_layout() {
        let msg = sample_commit_chain().signable_message();
        assert_eq!(msg[0], 0);
        assert_eq!(&msg[1..7], &[1, 1, 1, 1, 1, 1]);
        assert_eq!(&msg[7..39], &[0xAA; 32]);
        assert_eq!(&msg[39..71], &[0xBB; 32]);
        assert_eq!(&msg[71..103], &[0xCC; 32]);
        assert_eq!(msg[103], 11);
    }

    #[test]
    fn test_commit_chain_sign_verify() {
        let kp = Keypair::generate();
        let cc = sample_commit_chain().signed(&kp);
        assert_eq!(cc.ec_pub_key, kp.public_key);
        assert!(cc.verify().is_ok());
    }

    #[test]
    fn test_any_mutation_breaks_signature() {
        let kp = Keypair::generate();
        let cc = sample_commit_chain().signed(&kp);
        let bytes = cc.marshal();

        for i in 0..CommitChain::SIGNED_LENGTH {
            let mut tampered = bytes.clone();
            tampered[i] ^= 0x01;
            let decoded = CommitChain::unmarshal(&tampered).unwrap();
            assert_eq!(
                decoded.verify(),
                Err(CryptoError::SignatureInvalid),
                "byte {} not covered",
                i
            );
        }
    }

    #[test]
    fn test_commit_chain_decode() {
        let kp = Keypair::generate();
        let cc = sample_commit_chain().signed(&kp);
        let decoded = CommitChain::unmarshal(&cc.marshal()).unwrap();
        assert_eq!(decoded, cc);
        assert!(decoded.verify().is_ok());
    }

    #[test]
    fn test_commit_chain_binding() {
        let chain_id = Hash::repeat(0x11);
        let entry_hash = Hash::repeat(0x22);
        let cc = CommitChain::new(&chain_id, entry_hash, 10, MilliTime::from_millis(5));
        assert!(cc.commits_to(&chain_id, &entry_hash));
        assert!(!cc.commits_to(&Hash::repeat(0x12), &entry_hash));
        assert!(!cc.commits_to(&chain_id, &Hash::repeat(0x23)));
    }

    #[test]
    fn test_commit_entry_sign_and_decode() {
        let kp = Keypair::generate();
        let ce = CommitEntry::new(Hash::repeat(0x33), 1, MilliTime::from_millis(99)).signed(&kp);
        assert!(ce.verify().is_ok());

        let decoded = CommitEntry::unmarshal(&ce.marshal()).unwrap();
        assert_eq!(decoded, ce);

        let mut tampered = decoded.clone();
        tampered.credits = 2;
        assert!(tampered.verify().is_err());
    }

    #[test]
    fn test_undecodable_key_is_invalid_signature() {
        let bad_key = (0u8..=255)
            .map(|b| {
                let mut bytes = [0u8; PUBLIC_KEY_LENGTH];
                bytes[0] = b;
                PublicKey(bytes)
            })
            .find(|key| {
                key.verify(b"msg", &Signature::default()) == Err(CryptoError::InvalidPublicKey)
            })
            .expect("some y coordinate has no curve point");

        let mut cc = sample_commit_chain();
        cc.ec_pub_key = bad_key;
        assert_eq!(cc.verify(), Err(CryptoError::SignatureInvalid));

        let mut ce = CommitEntry::new(Hash::repeat(0x33), 1, MilliTime::from_millis(99));
        ce.ec_pub_key = bad_key;
        assert_eq!(ce.verify(), Err(CryptoError::SignatureInvalid));
    }

    #[test]
    fn test_unsigned_commit_fails_verification() {
        let kp = Keypair::generate();
        let mut cc = sample_commit_chain();
        cc.ec_pub_key = kp.public_key;
        assert!(cc.verify().is_err());
    }
}
