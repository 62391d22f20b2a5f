//! Legacy EIP-155 transaction signing.
//!
//! Signing is a separate step from building because the account only exists
//! while the card is unlocked. The chain id comes from the
//! [`SigningAccount`], never from the transaction, so an account cannot be
//! talked into signing for a chain it was not bound to.
//!
//! ```text
//! signing hash = keccak256(rlp([nonce, gasPrice, gas, to, value, data, chainId, 0, 0]))
//! raw          = rlp([nonce, gasPrice, gas, to, value, data, v, r, s])
//! v            = recovery_id + chainId * 2 + 35
//! ```

use crate::codec::Address;
use crate::crypto::hash::keccak256;
use crate::crypto::keys::{KeyError, RecoverableSignature, SigningAccount};

use super::rlp::{encode_bytes, encode_list, encode_uint};
use super::types::TxHash;

/// An unsigned legacy transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: u128,
    pub data: Vec<u8>,
}

impl LegacyTransaction {
    fn body(&self) -> Vec<Vec<u8>> {
        vec![
            encode_uint(u128::from(self.nonce)),
            encode_uint(self.gas_price),
            encode_uint(u128::from(self.gas_limit)),
            encode_bytes(self.to.as_bytes()),
            encode_uint(self.value),
            encode_bytes(&self.data),
        ]
    }

    /// EIP-155 pre-image for `chain_id`.
    pub fn signing_payload(&self, chain_id: u64) -> Vec<u8> {
        let mut items = self.body();
        items.push(encode_uint(u128::from(chain_id)));
        items.push(encode_uint(0));
        items.push(encode_uint(0));
        encode_list(&items)
    }

    /// Digest the signature covers.
    pub fn signing_hash(&self, chain_id: u64) -> [u8; 32] {
        keccak256(&self.signing_payload(chain_id))
    }
}

/// A signed transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Vec<u8>,
    pub hash: TxHash,
    pub signature: RecoverableSignature,
}

impl SignedTransaction {
    /// `0x`-prefixed raw bytes.
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }
}

impl SigningAccount {
    /// Signs `tx` for this account's chain.
    pub fn sign_transaction(&self, tx: &LegacyTransaction) -> Result<SignedTransaction, KeyError> {
        let chain_id = self.chain_id();
        let signature = self.sign_digest(&tx.signing_hash(chain_id))?;
        let v = u128::from(signature.recovery_id) + u128::from(chain_id) * 2 + 35;

        let mut items = tx.body();
        items.push(encode_uint(v));
        // r and s are scalars: minimal big-endian.
        items.push(encode_bytes(trim(&signature.r)));
        items.push(encode_bytes(trim(&signature.s)));

        let raw = encode_list(&items);
        let hash = TxHash::from_bytes(keccak256(&raw));
        Ok(SignedTransaction {
            raw,
            hash,
            signature,
        })
    }
}

fn trim(bytes: &[u8; 32]) -> &[u8] {
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::recover_address;
    use crate::crypto::SecretKey;

    fn eip155_example() -> LegacyTransaction {
        LegacyTransaction {
            nonce: 9,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: Address::from_bytes([0x35; 20]),
            value: 1_000_000_000_000_000_000,
            data: Vec::new(),
        }
    }

    fn account(chain_id: u64) -> SigningAccount {
        SigningAccount::from_secret(&SecretKey::from_bytes([0x46; 32]), chain_id).unwrap()
    }

    #[test]
    fn eip155_signing_payload_vector() {
        assert_eq!(
            hex::encode(eip155_example().signing_payload(1)),
            "ec098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a764000080018080"
        );
        assert_eq!(
            hex::encode(eip155_example().signing_hash(1)),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );
    }

    #[test]
    fn eip155_signed_vector() {
        let signed = account(1).sign_transaction(&eip155_example()).unwrap();
        assert_eq!(
            signed.raw_hex(),
            "0xf86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a7640000\
             8025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f\
             761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83"
        );
        assert_eq!(
            signed.hash.to_string(),
            "0x33469b22e9f636356c4160a87eb19df52b7412e8eac32a4a55ffe88ea8350788"
        );
    }

    #[test]
    fn signature_recovers_to_sender_on_any_chain() {
        let tx = eip155_example();
        for chain_id in [1u64, 137, 11_155_111] {
            let acct = account(chain_id);
            let signed = acct.sign_transaction(&tx).unwrap();
            let recovered = recover_address(&tx.signing_hash(chain_id), &signed.signature).unwrap();
            assert_eq!(recovered, acct.address());
        }
    }

    #[test]
    fn chain_id_changes_the_hash() {
        let tx = eip155_example();
        let a = account(1).sign_transaction(&tx).unwrap();
        let b = account(5).sign_transaction(&tx).unwrap();
        assert_ne!(a.hash, b.hash);
    }
}
