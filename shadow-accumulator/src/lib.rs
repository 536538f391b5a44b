//! shadow-accumulator
//!
//! Per-pool commitment accumulator for the shadow relay: a fixed-depth
//! binary Merkle tree over BN254 scalars, hashed with the circom Poseidon
//! parameters so paths verify inside the withdrawal circuit.

pub mod field;
pub mod hasher;
pub mod merkle;

pub use ark_bn254::Fr;
pub use field::{
    abbreviate_field, field_to_be_bytes, format_field, parse_field, parse_field_json,
    FieldError,
};
pub use hasher::{HashError, PairHasher, PoseidonHasher};
pub use merkle::{AccumulatorError, MerkleProof, MerkleTree, DEFAULT_DEPTH, ROOT_HISTORY_CAPACITY};
