//! Decoding of state-trie leaf bodies into accounts.

use ethereum_types::{H256, U256};
use rlp::{DecoderError, Prototype, Rlp, RlpStream};

use crate::CodecError;

/// The root hash of an empty trie: `Keccak256(RLP(""))`.
pub const EMPTY_ROOT_HASH: H256 = H256([
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8, 0x6e,
    0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63, 0xb4, 0x21,
]);

/// The code hash of a contract-less account: `Keccak256([])`.
pub const EMPTY_CODE_HASH: H256 = H256([
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03, 0xc0,
    0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85, 0xa4, 0x70,
]);

/// The body of a state-trie leaf.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct StateAccount {
    /// The transaction count of the account.
    pub nonce: u64,
    /// The balance of the account in wei.
    pub balance: U256,
    /// The root of the account's storage trie; [`EMPTY_ROOT_HASH`] when the
    /// account has no storage.
    pub storage_root: H256,
    /// The digest of the account's bytecode; [`EMPTY_CODE_HASH`] when the
    /// account has no code.
    pub code_hash: H256,
}

impl StateAccount {
    /// Returns `true` if the account references a storage trie.
    pub fn has_storage(&self) -> bool {
        self.storage_root != EMPTY_ROOT_HASH
    }

    /// Returns `true` if the account references bytecode.
    pub fn has_code(&self) -> bool {
        self.code_hash != EMPTY_CODE_HASH
    }
}

/// Decodes the RLP body of a state-trie leaf into an account.
pub fn decode_account(blob: &[u8]) -> Result<StateAccount, CodecError> {
    rlp::decode(blob).map_err(|e: DecoderError| CodecError::MalformedAccount(e.to_string()))
}

impl rlp::Decodable for StateAccount {
    fn decode(rlp: &Rlp<'_>) -> Result<Self, DecoderError> {
        match rlp.prototype()? {
            Prototype::List(4) => {}
            _ => return Err(DecoderError::RlpIncorrectListLen),
        }

        Ok(Self {
            nonce: rlp.val_at(0)?,
            balance: u256_at(rlp, 1)?,
            storage_root: h256_at(rlp, 2)?,
            code_hash: h256_at(rlp, 3)?,
        })
    }
}

impl rlp::Encodable for StateAccount {
    fn rlp_append(&self, stream: &mut RlpStream) {
        let mut balance = [0u8; 32];
        self.balance.to_big_endian(&mut balance);
        let balance_minimal: Vec<u8> = balance
            .iter()
            .copied()
            .skip_while(|b| *b == 0)
            .collect();

        stream.begin_list(4);
        stream.append(&self.nonce);
        stream.append(&balance_minimal);
        stream.append(&self.storage_root.as_bytes().to_vec());
        stream.append(&self.code_hash.as_bytes().to_vec());
    }
}

fn u256_at(rlp: &Rlp<'_>, index: usize) -> Result<U256, DecoderError> {
    let data = rlp.at(index)?.data()?;
    match data.len() {
        0..=32 => Ok(U256::from_big_endian(data)),
        _ => Err(DecoderError::RlpIsTooBig),
    }
}

fn h256_at(rlp: &Rlp<'_>, index: usize) -> Result<H256, DecoderError> {
    let data = rlp.at(index)?.data()?;
    match data.len() {
        32 => Ok(H256::from_slice(data)),
        _ => Err(DecoderError::RlpIncorrectListLen),
    }
}
