//! Deterministic, on-chain-compatible serialization and signing.
//!
//! Everything that crosses the wire (account records inside tree leaves,
//! transitions inside blocks, the block tuple that gets signed and
//! submitted, fraud-proof bundles) is encoded with the settlement chain's
//! canonical structured encoding (head-then-tail layout, dynamic fields
//! referenced by 256-bit offsets). The encoder is a closed function of its
//! input and round-trips through the decoder; byte-exact agreement with the
//! on-chain verifier's decoder is the contract this crate exists to keep.

mod codec;
mod signing;

pub use codec::{
    decode_account_info, decode_block, decode_rollup_block, decode_transition,
    encode_account_info, encode_block, encode_included_storage_slot, encode_included_transition,
    encode_rollup_block, encode_storage_slot, encode_transition, encode_transitions, CodecError,
};
pub use signing::{
    packed_digest, prefixed_digest, recover_signer, signature_is_valid, BlockSigner, PackedValue,
    SignError,
};
