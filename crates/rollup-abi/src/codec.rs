use ethers_core::abi::{decode, encode, ParamType, Token};
use ethers_core::types::{H256, U256};
use rollup_interface::{
    AccountInfo, IncludedStorageSlot, IncludedTransition, RollupBlock, StorageSlot, Transition,
    TransitionKind,
};

/// Errors from decoding wire bytes.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The underlying ABI decoder rejected the bytes.
    #[error("abi decoding failed: {0}")]
    Abi(String),
    /// The bytes decoded, but not into the expected shape.
    #[error("malformed payload: {0}")]
    Malformed(&'static str),
    /// The leading discriminant word does not name a transition variant.
    #[error("unknown transition discriminant {0}")]
    UnknownDiscriminant(U256),
}

fn uint_array(values: &[U256]) -> Token {
    Token::Array(values.iter().map(|v| Token::Uint(*v)).collect())
}

fn hash_array(values: &[H256]) -> Token {
    Token::Array(
        values
            .iter()
            .map(|h| Token::FixedBytes(h.as_bytes().to_vec()))
            .collect(),
    )
}

fn account_info_tokens(info: &AccountInfo) -> Vec<Token> {
    vec![
        Token::Address(info.account),
        uint_array(&info.balances),
        uint_array(&info.transfer_nonces),
        uint_array(&info.withdraw_nonces),
    ]
}

fn account_info_params() -> Vec<ParamType> {
    vec![
        ParamType::Address,
        ParamType::Array(Box::new(ParamType::Uint(256))),
        ParamType::Array(Box::new(ParamType::Uint(256))),
        ParamType::Array(Box::new(ParamType::Uint(256))),
    ]
}

/// Encodes an [`AccountInfo`] as `(address, uint256[], uint256[],
/// uint256[])`. This is the byte string stored in state-tree leaves.
pub fn encode_account_info(info: &AccountInfo) -> Vec<u8> {
    encode(&account_info_tokens(info))
}

/// Decodes the leaf encoding produced by [`encode_account_info`].
pub fn decode_account_info(bytes: &[u8]) -> Result<AccountInfo, CodecError> {
    let tokens = decode(&account_info_params(), bytes).map_err(|e| CodecError::Abi(e.to_string()))?;
    let mut reader = TokenReader::new(tokens);
    let info = AccountInfo {
        account: reader.address()?,
        balances: reader.uint_array()?,
        transfer_nonces: reader.uint_array()?,
        withdraw_nonces: reader.uint_array()?,
    };
    reader.finish()?;
    if info.balances.len() != info.transfer_nonces.len()
        || info.balances.len() != info.withdraw_nonces.len()
    {
        return Err(CodecError::Malformed("account sequences differ in length"));
    }
    Ok(info)
}

/// Encodes a [`Transition`]. The first 32-byte word is always the variant
/// discriminant.
pub fn encode_transition(transition: &Transition) -> Vec<u8> {
    let discriminant = Token::Uint(U256::from(transition.discriminant()));
    let tokens = match transition {
        Transition::CreateAndDeposit {
            state_root,
            slot_index,
            account,
            token_index,
            amount,
            signature,
        } => vec![
            discriminant,
            Token::FixedBytes(state_root.as_bytes().to_vec()),
            Token::Uint(*slot_index),
            Token::Address(*account),
            Token::Uint(*token_index),
            Token::Uint(*amount),
            Token::Bytes(signature.clone()),
        ],
        Transition::Deposit {
            state_root,
            slot_index,
            token_index,
            amount,
            signature,
        } => vec![
            discriminant,
            Token::FixedBytes(state_root.as_bytes().to_vec()),
            Token::Uint(*slot_index),
            Token::Uint(*token_index),
            Token::Uint(*amount),
            Token::Bytes(signature.clone()),
        ],
        Transition::Withdraw {
            state_root,
            slot_index,
            token_index,
            amount,
            nonce,
            signature,
        } => vec![
            discriminant,
            Token::FixedBytes(state_root.as_bytes().to_vec()),
            Token::Uint(*slot_index),
            Token::Uint(*token_index),
            Token::Uint(*amount),
            Token::Uint(*nonce),
            Token::Bytes(signature.clone()),
        ],
        Transition::CreateAndTransfer {
            state_root,
            sender_slot,
            recipient_slot,
            recipient,
            token_index,
            amount,
            nonce,
            signature,
        } => vec![
            discriminant,
            Token::FixedBytes(state_root.as_bytes().to_vec()),
            Token::Uint(*sender_slot),
            Token::Uint(*recipient_slot),
            Token::Address(*recipient),
            Token::Uint(*token_index),
            Token::Uint(*amount),
            Token::Uint(*nonce),
            Token::Bytes(signature.clone()),
        ],
        Transition::Transfer {
            state_root,
            sender_slot,
            recipient_slot,
            token_index,
            amount,
            nonce,
            signature,
        } => vec![
            discriminant,
            Token::FixedBytes(state_root.as_bytes().to_vec()),
            Token::Uint(*sender_slot),
            Token::Uint(*recipient_slot),
            Token::Uint(*token_index),
            Token::Uint(*amount),
            Token::Uint(*nonce),
            Token::Bytes(signature.clone()),
        ],
    };
    encode(&tokens)
}

/// Decodes a transition, dispatching on the leading discriminant word.
pub fn decode_transition(bytes: &[u8]) -> Result<Transition, CodecError> {
    if bytes.len() < 32 {
        return Err(CodecError::Malformed("transition shorter than one word"));
    }
    let discriminant = U256::from_big_endian(&bytes[..32]);
    let kind = if discriminant <= U256::from(u64::MAX) {
        TransitionKind::from_discriminant(discriminant.low_u64())
    } else {
        None
    }
    .ok_or(CodecError::UnknownDiscriminant(discriminant))?;

    let mut params = vec![ParamType::Uint(256), ParamType::FixedBytes(32)];
    params.extend(match kind {
        TransitionKind::CreateAndDeposit => vec![
            ParamType::Uint(256),
            ParamType::Address,
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Bytes,
        ],
        TransitionKind::Deposit => vec![
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Bytes,
        ],
        TransitionKind::Withdraw => vec![
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Bytes,
        ],
        TransitionKind::CreateAndTransfer => vec![
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Address,
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Bytes,
        ],
        TransitionKind::Transfer => vec![
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Bytes,
        ],
    });

    let tokens = decode(&params, bytes).map_err(|e| CodecError::Abi(e.to_string()))?;
    let mut reader = TokenReader::new(tokens);
    // Skip the already-inspected discriminant.
    reader.uint()?;
    let state_root = reader.hash()?;

    let transition = match kind {
        TransitionKind::CreateAndDeposit => Transition::CreateAndDeposit {
            state_root,
            slot_index: reader.uint()?,
            account: reader.address()?,
            token_index: reader.uint()?,
            amount: reader.uint()?,
            signature: reader.bytes()?,
        },
        TransitionKind::Deposit => Transition::Deposit {
            state_root,
            slot_index: reader.uint()?,
            token_index: reader.uint()?,
            amount: reader.uint()?,
            signature: reader.bytes()?,
        },
        TransitionKind::Withdraw => Transition::Withdraw {
            state_root,
            slot_index: reader.uint()?,
            token_index: reader.uint()?,
            amount: reader.uint()?,
            nonce: reader.uint()?,
            signature: reader.bytes()?,
        },
        TransitionKind::CreateAndTransfer => Transition::CreateAndTransfer {
            state_root,
            sender_slot: reader.uint()?,
            recipient_slot: reader.uint()?,
            recipient: reader.address()?,
            token_index: reader.uint()?,
            amount: reader.uint()?,
            nonce: reader.uint()?,
            signature: reader.bytes()?,
        },
        TransitionKind::Transfer => Transition::Transfer {
            state_root,
            sender_slot: reader.uint()?,
            recipient_slot: reader.uint()?,
            token_index: reader.uint()?,
            amount: reader.uint()?,
            nonce: reader.uint()?,
            signature: reader.bytes()?,
        },
    };
    reader.finish()?;
    Ok(transition)
}

/// Encodes the canonical block tuple `(uint256 block_number, bytes[]
/// transitions)`; the byte sequence signatures cover.
pub fn encode_block(block_number: u64, encoded_transitions: &[Vec<u8>]) -> Vec<u8> {
    encode(&[
        Token::Uint(U256::from(block_number)),
        Token::Array(
            encoded_transitions
                .iter()
                .map(|t| Token::Bytes(t.clone()))
                .collect(),
        ),
    ])
}

/// Decodes the block tuple back into its number and encoded transitions.
pub fn decode_block(bytes: &[u8]) -> Result<(u64, Vec<Vec<u8>>), CodecError> {
    let params = vec![
        ParamType::Uint(256),
        ParamType::Array(Box::new(ParamType::Bytes)),
    ];
    let tokens = decode(&params, bytes).map_err(|e| CodecError::Abi(e.to_string()))?;
    let mut reader = TokenReader::new(tokens);
    let block_number = reader.uint()?;
    if block_number > U256::from(u64::MAX) {
        return Err(CodecError::Malformed("block number exceeds u64"));
    }
    let transitions = reader.bytes_array()?;
    reader.finish()?;
    Ok((block_number.low_u64(), transitions))
}

/// Serializes every transition of `block` individually, in order.
pub fn encode_transitions(block: &RollupBlock) -> Vec<Vec<u8>> {
    block.transitions.iter().map(encode_transition).collect()
}

/// Encodes a whole [`RollupBlock`] as the canonical block tuple.
pub fn encode_rollup_block(block: &RollupBlock) -> Vec<u8> {
    encode_block(block.block_number, &encode_transitions(block))
}

/// Decodes a block tuple into a typed [`RollupBlock`].
pub fn decode_rollup_block(bytes: &[u8]) -> Result<RollupBlock, CodecError> {
    let (block_number, encoded_transitions) = decode_block(bytes)?;
    let transitions = encoded_transitions
        .iter()
        .map(|t| decode_transition(t))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RollupBlock {
        block_number,
        transitions,
    })
}

/// Encodes a [`StorageSlot`] as `(uint256, (address, uint256[], uint256[],
/// uint256[]))`.
pub fn encode_storage_slot(slot: &StorageSlot) -> Vec<u8> {
    encode(&[
        Token::Uint(slot.slot_index),
        Token::Tuple(account_info_tokens(&slot.account_info)),
    ])
}

/// Encodes an [`IncludedStorageSlot`] as `(StorageSlot, bytes32[])`.
pub fn encode_included_storage_slot(slot: &IncludedStorageSlot) -> Vec<u8> {
    encode(&[
        Token::Tuple(vec![
            Token::Uint(slot.storage_slot.slot_index),
            Token::Tuple(account_info_tokens(&slot.storage_slot.account_info)),
        ]),
        hash_array(&slot.siblings),
    ])
}

/// Encodes an [`IncludedTransition`] as `(bytes, (uint256, uint256,
/// bytes32[]))`.
pub fn encode_included_transition(included: &IncludedTransition) -> Vec<u8> {
    encode(&[
        Token::Bytes(included.transition.clone()),
        Token::Tuple(vec![
            Token::Uint(included.inclusion_proof.block_number),
            Token::Uint(included.inclusion_proof.transition_index),
            hash_array(&included.inclusion_proof.siblings),
        ]),
    ])
}

/// Consumes a decoded token list in order with typed extraction.
struct TokenReader {
    tokens: std::vec::IntoIter<Token>,
}

impl TokenReader {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens: tokens.into_iter(),
        }
    }

    fn next(&mut self) -> Result<Token, CodecError> {
        self.tokens
            .next()
            .ok_or(CodecError::Malformed("missing field"))
    }

    fn uint(&mut self) -> Result<U256, CodecError> {
        self.next()?
            .into_uint()
            .ok_or(CodecError::Malformed("expected uint256"))
    }

    fn address(&mut self) -> Result<ethers_core::types::Address, CodecError> {
        self.next()?
            .into_address()
            .ok_or(CodecError::Malformed("expected address"))
    }

    fn hash(&mut self) -> Result<H256, CodecError> {
        let bytes = self
            .next()?
            .into_fixed_bytes()
            .ok_or(CodecError::Malformed("expected bytes32"))?;
        if bytes.len() != 32 {
            return Err(CodecError::Malformed("expected 32 fixed bytes"));
        }
        Ok(H256::from_slice(&bytes))
    }

    fn bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        self.next()?
            .into_bytes()
            .ok_or(CodecError::Malformed("expected bytes"))
    }

    fn uint_array(&mut self) -> Result<Vec<U256>, CodecError> {
        self.next()?
            .into_array()
            .ok_or(CodecError::Malformed("expected uint256[]"))?
            .into_iter()
            .map(|t| t.into_uint().ok_or(CodecError::Malformed("expected uint256 element")))
            .collect()
    }

    fn bytes_array(&mut self) -> Result<Vec<Vec<u8>>, CodecError> {
        self.next()?
            .into_array()
            .ok_or(CodecError::Malformed("expected bytes[]"))?
            .into_iter()
            .map(|t| t.into_bytes().ok_or(CodecError::Malformed("expected bytes element")))
            .collect()
    }

    fn finish(mut self) -> Result<(), CodecError> {
        if self.tokens.next().is_some() {
            return Err(CodecError::Malformed("trailing fields"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ethers_core::types::Address;
    use rollup_interface::TransitionInclusionProof;

    use super::*;

    fn sample_account_info() -> AccountInfo {
        AccountInfo {
            account: Address::repeat_byte(0xaa),
            balances: vec![U256::from(100), U256::zero(), U256::from(7)],
            transfer_nonces: vec![U256::from(1), U256::zero(), U256::zero()],
            withdraw_nonces: vec![U256::zero(), U256::from(2), U256::zero()],
        }
    }

    fn sample_transitions() -> Vec<Transition> {
        let root = H256::repeat_byte(0x11);
        vec![
            Transition::CreateAndDeposit {
                state_root: root,
                slot_index: U256::zero(),
                account: Address::repeat_byte(0xaa),
                token_index: U256::zero(),
                amount: U256::from(100),
                signature: vec![1, 2, 3],
            },
            Transition::Deposit {
                state_root: root,
                slot_index: U256::from(1),
                token_index: U256::from(2),
                amount: U256::from(50),
                signature: vec![4, 5],
            },
            Transition::Withdraw {
                state_root: root,
                slot_index: U256::from(1),
                token_index: U256::zero(),
                amount: U256::from(20),
                nonce: U256::from(3),
                signature: vec![6],
            },
            Transition::CreateAndTransfer {
                state_root: root,
                sender_slot: U256::zero(),
                recipient_slot: U256::from(1),
                recipient: Address::repeat_byte(0xbb),
                token_index: U256::zero(),
                amount: U256::from(30),
                nonce: U256::zero(),
                signature: vec![7, 8, 9, 10],
            },
            Transition::Transfer {
                state_root: root,
                sender_slot: U256::zero(),
                recipient_slot: U256::from(1),
                token_index: U256::zero(),
                amount: U256::from(10),
                nonce: U256::from(1),
                signature: vec![],
            },
        ]
    }

    #[test]
    fn account_info_round_trips() {
        let info = sample_account_info();
        let encoded = encode_account_info(&info);
        assert_eq!(decode_account_info(&encoded).unwrap(), info);
    }

    #[test]
    fn every_transition_variant_round_trips() {
        for transition in sample_transitions() {
            let encoded = encode_transition(&transition);
            let expected_discriminant = U256::from(transition.discriminant());
            assert_eq!(U256::from_big_endian(&encoded[..32]), expected_discriminant);
            assert_eq!(decode_transition(&encoded).unwrap(), transition);
        }
    }

    #[test]
    fn block_tuple_round_trips() {
        let block = RollupBlock {
            block_number: 7,
            transitions: sample_transitions(),
        };
        let encoded = encode_rollup_block(&block);
        assert_eq!(decode_rollup_block(&encoded).unwrap(), block);

        let (number, raw) = decode_block(&encoded).unwrap();
        assert_eq!(number, 7);
        assert_eq!(raw.len(), block.transitions.len());
        assert_eq!(decode_transition(&raw[2]).unwrap(), block.transitions[2]);
    }

    #[test]
    fn empty_genesis_block_round_trips() {
        let genesis = RollupBlock::new(0);
        let encoded = encode_rollup_block(&genesis);
        assert_eq!(decode_rollup_block(&encoded).unwrap(), genesis);
    }

    #[test]
    fn unknown_discriminant_is_rejected() {
        let mut bytes = encode_transition(&sample_transitions()[0]);
        // Overwrite the discriminant word with 9.
        bytes[..32].copy_from_slice(&{
            let mut word = [0u8; 32];
            word[31] = 9;
            word
        });
        assert!(matches!(
            decode_transition(&bytes),
            Err(CodecError::UnknownDiscriminant(_))
        ));
    }

    #[test]
    fn truncated_payloads_are_rejected() {
        let encoded = encode_account_info(&sample_account_info());
        assert!(decode_account_info(&encoded[..encoded.len() - 1]).is_err());
        assert!(decode_transition(&[0u8; 16]).is_err());
    }

    proptest::proptest! {
        #[test]
        fn arbitrary_account_infos_round_trip(
            account in proptest::array::uniform20(proptest::prelude::any::<u8>()),
            words in proptest::collection::vec((proptest::prelude::any::<u64>(), proptest::prelude::any::<u64>(), proptest::prelude::any::<u64>()), 0..12)
        ) {
            let info = AccountInfo {
                account: Address::from(account),
                balances: words.iter().map(|(b, _, _)| U256::from(*b)).collect(),
                transfer_nonces: words.iter().map(|(_, t, _)| U256::from(*t)).collect(),
                withdraw_nonces: words.iter().map(|(_, _, w)| U256::from(*w)).collect(),
            };
            let encoded = encode_account_info(&info);
            proptest::prop_assert_eq!(decode_account_info(&encoded).unwrap(), info);
        }
    }

    #[test]
    fn fraud_bundle_encodings_decode_with_raw_abi() {
        let included = IncludedTransition {
            transition: encode_transition(&sample_transitions()[4]),
            inclusion_proof: TransitionInclusionProof {
                block_number: U256::from(3),
                transition_index: U256::from(1),
                siblings: vec![H256::repeat_byte(0x01), H256::repeat_byte(0x02)],
            },
        };
        let encoded = encode_included_transition(&included);
        let tokens = decode(
            &[
                ParamType::Bytes,
                ParamType::Tuple(vec![
                    ParamType::Uint(256),
                    ParamType::Uint(256),
                    ParamType::Array(Box::new(ParamType::FixedBytes(32))),
                ]),
            ],
            &encoded,
        )
        .unwrap();
        assert_eq!(tokens[0].clone().into_bytes().unwrap(), included.transition);

        let slot = IncludedStorageSlot {
            storage_slot: StorageSlot {
                slot_index: U256::zero(),
                account_info: sample_account_info(),
            },
            siblings: vec![H256::repeat_byte(0x03)],
        };
        let encoded_slot = encode_included_storage_slot(&slot);
        let slot_tokens = decode(
            &[
                ParamType::Tuple(vec![
                    ParamType::Uint(256),
                    ParamType::Tuple(account_info_params()),
                ]),
                ParamType::Array(Box::new(ParamType::FixedBytes(32))),
            ],
            &encoded_slot,
        )
        .unwrap();
        assert_eq!(slot_tokens.len(), 2);

        let storage_slot_only = encode_storage_slot(&slot.storage_slot);
        assert!(!storage_slot_only.is_empty());
    }
}
