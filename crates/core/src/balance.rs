//! Entry-credit balance increases.

use crate::codec::{BinaryMarshal, BinaryUnmarshal, Reader, Result, Writer};
use crate::crypto::{PublicKey, PUBLIC_KEY_LENGTH};
use crate::hash::{Hash, HASH_LENGTH};

/// Credits `num_ec` entry credits to `ec_pub_key`, paid for by transaction
/// `tx_id`. Emitted by the credit issuance path, so it carries no signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncreaseBalance {
    pub ec_pub_key: PublicKey,
    pub tx_id: Hash,
    pub num_ec: u64,
}

impl IncreaseBalance {
    pub const LENGTH: usize = PUBLIC_KEY_LENGTH + HASH_LENGTH + 8;

    pub fn new(ec_pub_key: PublicKey, tx_id: Hash, num_ec: u64) -> Self {
        Self {
            ec_pub_key,
            tx_id,
            num_ec,
        }
    }
}

impl BinaryMarshal for IncreaseBalance {
    fn marshal_into(&self, w: &mut Writer) {
        w.put_bytes(self.ec_pub_key.as_bytes());
        w.put_hash(&self.tx_id);
        w.put_u64(self.num_ec);
    }
}

impl BinaryUnmarshal for IncreaseBalance {
    fn unmarshal_from(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            ec_pub_key: PublicKey(r.read_array("increase balance public key")?),
            tx_id: r.read_hash("increase balance transaction id")?,
            num_ec: r.read_u64("increase balance amount")?,
        })
    }
}
