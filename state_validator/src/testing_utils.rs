//! Shared fixtures for the engine tests.
//!
//! The hand-built state trie below mirrors a small mined chain: a 17-slot
//! branch root referencing five account leaves (bank, miner, two externally
//! owned accounts and one contract), with the contract owning a two-slot
//! storage trie and a bytecode blob.

use std::collections::HashMap;

use bytes::Bytes;
use ethereum_types::{Address, H160, H256, U256};
use hex_literal::hex;
use keccak_hash::keccak;
use mpt_codec::{StateAccount, EMPTY_CODE_HASH, EMPTY_ROOT_HASH};
use rlp::RlpStream;

use crate::store::{ContentWriter, MemoryStore};

/// Copies a built node set into a store.
pub(crate) async fn seed_store(store: &MemoryStore, nodes: &HashMap<H256, Vec<u8>>) {
    for (hash, blob) in nodes {
        store
            .put(*hash, Bytes::copy_from_slice(blob))
            .await
            .expect("memory store writes are infallible");
    }
}

/// The contract account's address.
pub(crate) const CONTRACT_ADDR: Address = H160(hex!("aE9BEa628c4Ce503DcFD7E305CaB4e29E7476592"));

/// The contract's runtime bytecode (contents arbitrary; referenced by hash).
pub(crate) const CONTRACT_CODE: &[u8] = &hex!("60806040526000357c010000000000000000");

/// A complete world state: every node blob of the state trie and the
/// contract's storage trie, plus the contract code.
pub(crate) struct StateFixture {
    pub state_root: H256,
    pub storage_root: H256,
    /// State-trie node blobs keyed by digest; the first entry is the branch
    /// root, the rest are the five account leaves.
    pub state_nodes: Vec<(H256, Vec<u8>)>,
    /// Storage-trie node blobs: branch root, slot-0 leaf, slot-1 leaf.
    pub storage_nodes: Vec<(H256, Vec<u8>)>,
    pub code_hash: H256,
    /// Digest and state-trie path of the contract account leaf.
    pub contract_leaf: (H256, &'static [u8]),
    /// Digest and state-trie path of the `account1` leaf.
    pub account1_leaf: (H256, &'static [u8]),
    /// Digest and storage-trie path of the slot-1 leaf.
    pub slot1_leaf: (H256, &'static [u8]),
}

fn leaf_node(encoded_path: &[u8], value: &[u8]) -> Vec<u8> {
    let mut stream = RlpStream::new_list(2);
    stream.append(&encoded_path.to_vec());
    stream.append(&value.to_vec());
    stream.out().to_vec()
}

fn branch_node(children: [Option<H256>; 16]) -> Vec<u8> {
    let mut stream = RlpStream::new_list(17);
    for child in children {
        match child {
            None => stream.append_empty_data(),
            Some(hash) => stream.append(&hash.as_bytes().to_vec()),
        };
    }
    stream.append_empty_data();
    stream.out().to_vec()
}

fn account_body(nonce: u64, balance: u64, storage_root: H256, code_hash: H256) -> Vec<u8> {
    rlp::encode(&StateAccount {
        nonce,
        balance: U256::from(balance),
        storage_root,
        code_hash,
    })
    .to_vec()
}

/// Builds the five-account world state.
pub(crate) fn state_fixture() -> StateFixture {
    // Storage trie: slots 0 and 1 of the contract, keyed by hashed slot
    // index, under a branch root.
    let slot0_leaf = leaf_node(
        &hex!("390decd9548b62a8d60345a988386fc84ba6bc95484008f6362f93160ef3e563"),
        &hex!("94703c4b2bd70c169f5717101caee543299fc946c7"),
    );
    let slot1_leaf = leaf_node(
        &hex!("310e2d527612073b26eecdfd717e6a320cf44b4afac2b0732d9fcbe2b7fa0cf6"),
        &hex!("01"),
    );
    let mut storage_children: [Option<H256>; 16] = Default::default();
    storage_children[2] = Some(keccak(&slot0_leaf));
    storage_children[11] = Some(keccak(&slot1_leaf));
    let storage_branch = branch_node(storage_children);
    let storage_root = keccak(&storage_branch);

    let code_hash = keccak(CONTRACT_CODE);

    // State trie: five account leaves under a branch root. The leaf path
    // segments are the hashed addresses minus the leading branch nibble.
    let bank_leaf = leaf_node(
        &hex!("30bf49f440a1cd0527e4d06e2765654c0f56452257516d793a9b8d604dcfdf2a"),
        &account_body(2, 1000, EMPTY_ROOT_HASH, EMPTY_CODE_HASH),
    );
    let miner_leaf = leaf_node(
        &hex!("3380c7b7ae81a58eb98d9c78de4a1fd7fd9535fc953ed2be602daaa41767312a"),
        &account_body(0, 1000, EMPTY_ROOT_HASH, EMPTY_CODE_HASH),
    );
    let contract_leaf = leaf_node(
        &hex!("3114658a74d9cc9f7acf2c5cd696c3494d7c344d78bfec3add0d91ec4e8d1c45"),
        &account_body(1, 0, storage_root, code_hash),
    );
    let account1_leaf = leaf_node(
        &hex!("3926db69aaced518e9b9f0f434a473e7174109c943548bb8f23be41ca76d9ad2"),
        &account_body(2, 1000, EMPTY_ROOT_HASH, EMPTY_CODE_HASH),
    );
    let account2_leaf = leaf_node(
        &hex!("3957f3e2f04a0764c3a0491b175f69926da61efbcc8f61fa1455fd2d2b4cdd45"),
        &account_body(0, 1000, EMPTY_ROOT_HASH, EMPTY_CODE_HASH),
    );

    let mut state_children: [Option<H256>; 16] = Default::default();
    state_children[0] = Some(keccak(&bank_leaf));
    state_children[5] = Some(keccak(&miner_leaf));
    state_children[6] = Some(keccak(&contract_leaf));
    state_children[12] = Some(keccak(&account2_leaf));
    state_children[14] = Some(keccak(&account1_leaf));
    let state_branch = branch_node(state_children);
    let state_root = keccak(&state_branch);

    let contract_leaf_hash = keccak(&contract_leaf);
    let account1_leaf_hash = keccak(&account1_leaf);
    let slot1_leaf_hash = keccak(&slot1_leaf);

    StateFixture {
        state_root,
        storage_root,
        state_nodes: vec![
            (state_root, state_branch),
            (keccak(&bank_leaf), bank_leaf),
            (keccak(&miner_leaf), miner_leaf),
            (contract_leaf_hash, contract_leaf),
            (account1_leaf_hash, account1_leaf),
            (keccak(&account2_leaf), account2_leaf),
        ],
        storage_nodes: vec![
            (storage_root, storage_branch),
            (keccak(&slot0_leaf), slot0_leaf),
            (slot1_leaf_hash, slot1_leaf),
        ],
        code_hash,
        contract_leaf: (contract_leaf_hash, &[6]),
        account1_leaf: (account1_leaf_hash, &[14]),
        slot1_leaf: (slot1_leaf_hash, &[11]),
    }
}

impl StateFixture {
    /// Seeds a fresh store with the given subsets of the fixture, plus the
    /// contract code unless excluded.
    pub(crate) async fn seed(
        &self,
        state: &[(H256, Vec<u8>)],
        storage: &[(H256, Vec<u8>)],
        with_code: bool,
    ) -> std::sync::Arc<MemoryStore> {
        let store = MemoryStore::new();
        for (hash, blob) in state.iter().chain(storage) {
            store
                .put(*hash, Bytes::copy_from_slice(blob))
                .await
                .expect("memory store writes are infallible");
        }
        if with_code {
            store
                .put(self.code_hash, Bytes::copy_from_slice(CONTRACT_CODE))
                .await
                .expect("memory store writes are infallible");
        }
        std::sync::Arc::new(store)
    }

    /// Seeds a store with the complete fixture.
    pub(crate) async fn seed_complete(&self) -> std::sync::Arc<MemoryStore> {
        self.seed(&self.state_nodes, &self.storage_nodes, true).await
    }

    /// The state nodes without the entry whose digest is `omit`.
    pub(crate) fn state_nodes_without(&self, omit: H256) -> Vec<(H256, Vec<u8>)> {
        self.state_nodes
            .iter()
            .filter(|(hash, _)| *hash != omit)
            .cloned()
            .collect()
    }

    /// The storage nodes without the entry whose digest is `omit`.
    pub(crate) fn storage_nodes_without(&self, omit: H256) -> Vec<(H256, Vec<u8>)> {
        self.storage_nodes
            .iter()
            .filter(|(hash, _)| *hash != omit)
            .cloned()
            .collect()
    }
}
