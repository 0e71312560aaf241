//! 跨链消息的定长二进制编码
//!
//! 消息由固定宽度字段直接拼接而成，没有类型标记也没有分隔符。
//! 解码时只能依靠上下文区分种类：长度等于合约给出的 `requiredMessageLength`
//! 的按转账消息解析，其余一律按验证人集合变更消息解析。这一规则只在
//! [`classify_then_decode`] 中出现。

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::Error;

pub mod signature;

pub use signature::{recover_signer, signature_to_vrs, Vrs};

pub const ADDRESS_LEN: usize = 20;
pub const HASH_LEN: usize = 32;
pub const VALUE_LEN: usize = 32;

/// recipient + value + txHash + bridge
pub const TRANSFER_MESSAGE_LEN: usize = ADDRESS_LEN + VALUE_LEN + HASH_LEN + ADDRESS_LEN;
/// txHash + bridge，后接任意个地址
pub const NEW_SET_HEADER_LEN: usize = HASH_LEN + ADDRESS_LEN;
/// txHash + bridge + contractType + contractAddress
pub const UPGRADE_MESSAGE_LEN: usize = HASH_LEN + ADDRESS_LEN + 1 + ADDRESS_LEN;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMessage {
    pub recipient: Address,
    pub value: U256,
    pub tx_hash: B256,
    pub bridge: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorSetMessage {
    pub tx_hash: B256,
    pub bridge: Address,
    pub new_set: Vec<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeMessage {
    pub tx_hash: B256,
    pub bridge: Address,
    pub contract_type: u8,
    pub contract_address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CrossChainMessage {
    Transfer(TransferMessage),
    ValidatorSet(ValidatorSetMessage),
    Upgrade(UpgradeMessage),
}

impl CrossChainMessage {
    /// 源链上触发该消息的交易哈希
    pub fn tx_hash(&self) -> B256 {
        match self {
            CrossChainMessage::Transfer(m) => m.tx_hash,
            CrossChainMessage::ValidatorSet(m) => m.tx_hash,
            CrossChainMessage::Upgrade(m) => m.tx_hash,
        }
    }

    pub fn bridge(&self) -> Address {
        match self {
            CrossChainMessage::Transfer(m) => m.bridge,
            CrossChainMessage::ValidatorSet(m) => m.bridge,
            CrossChainMessage::Upgrade(m) => m.bridge,
        }
    }

    pub fn is_new_set(&self) -> bool {
        matches!(self, CrossChainMessage::ValidatorSet(_))
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            CrossChainMessage::Transfer(m) => m.to_bytes(),
            CrossChainMessage::ValidatorSet(m) => m.to_bytes(),
            CrossChainMessage::Upgrade(m) => m.to_bytes(),
        }
    }
}

/// 写入一个定宽字段。宽度不符属于编程错误，直接 panic。
fn push_field(buf: &mut Vec<u8>, field: &[u8], width: usize, name: &str) {
    assert_eq!(
        field.len(),
        width,
        "field `{name}` must be exactly {width} bytes, got {}",
        field.len()
    );
    buf.extend_from_slice(field);
}

fn read_address(bytes: &[u8], offset: usize) -> Address {
    Address::from_slice(&bytes[offset..offset + ADDRESS_LEN])
}

fn read_hash(bytes: &[u8], offset: usize) -> B256 {
    B256::from_slice(&bytes[offset..offset + HASH_LEN])
}

impl TransferMessage {
    /// 编码并校验总长度与合约要求一致
    pub fn encode(&self, expected_message_length: usize) -> Result<Bytes, Error> {
        let bytes = self.to_bytes();
        if bytes.len() != expected_message_length {
            return Err(Error::MessageLengthMismatch {
                actual: bytes.len(),
                required: expected_message_length,
            });
        }
        Ok(bytes)
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = Vec::with_capacity(TRANSFER_MESSAGE_LEN);
        push_field(&mut buf, self.recipient.as_slice(), ADDRESS_LEN, "recipient");
        push_field(&mut buf, &self.value.to_be_bytes::<VALUE_LEN>(), VALUE_LEN, "value");
        push_field(&mut buf, self.tx_hash.as_slice(), HASH_LEN, "txHash");
        push_field(&mut buf, self.bridge.as_slice(), ADDRESS_LEN, "bridge");
        buf.into()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != TRANSFER_MESSAGE_LEN {
            return Err(Error::Codec(format!(
                "transfer message must be {TRANSFER_MESSAGE_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let value_start = ADDRESS_LEN;
        let hash_start = value_start + VALUE_LEN;
        let bridge_start = hash_start + HASH_LEN;
        Ok(Self {
            recipient: read_address(bytes, 0),
            value: U256::from_be_slice(&bytes[value_start..hash_start]),
            tx_hash: read_hash(bytes, hash_start),
            bridge: read_address(bytes, bridge_start),
        })
    }
}

impl ValidatorSetMessage {
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = Vec::with_capacity(NEW_SET_HEADER_LEN + self.new_set.len() * ADDRESS_LEN);
        push_field(&mut buf, self.tx_hash.as_slice(), HASH_LEN, "txHash");
        push_field(&mut buf, self.bridge.as_slice(), ADDRESS_LEN, "bridge");
        for validator in &self.new_set {
            push_field(&mut buf, validator.as_slice(), ADDRESS_LEN, "newSet");
        }
        buf.into()
    }

    /// 末尾不足一个地址的字节被忽略
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < NEW_SET_HEADER_LEN {
            return Err(Error::Codec(format!(
                "validator set message must be at least {NEW_SET_HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let new_set = bytes[NEW_SET_HEADER_LEN..]
            .chunks_exact(ADDRESS_LEN)
            .map(Address::from_slice)
            .collect();
        Ok(Self {
            tx_hash: read_hash(bytes, 0),
            bridge: read_address(bytes, HASH_LEN),
            new_set,
        })
    }
}

impl UpgradeMessage {
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = Vec::with_capacity(UPGRADE_MESSAGE_LEN);
        push_field(&mut buf, self.tx_hash.as_slice(), HASH_LEN, "txHash");
        push_field(&mut buf, self.bridge.as_slice(), ADDRESS_LEN, "bridge");
        push_field(&mut buf, &[self.contract_type], 1, "contractType");
        push_field(&mut buf, self.contract_address.as_slice(), ADDRESS_LEN, "contractAddress");
        buf.into()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != UPGRADE_MESSAGE_LEN {
            return Err(Error::Codec(format!(
                "upgrade message must be {UPGRADE_MESSAGE_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let type_offset = NEW_SET_HEADER_LEN;
        Ok(Self {
            tx_hash: read_hash(bytes, 0),
            bridge: read_address(bytes, HASH_LEN),
            contract_type: bytes[type_offset],
            contract_address: read_address(bytes, type_offset + 1),
        })
    }
}

/// 按长度判定消息种类后解码
pub fn classify_then_decode(
    bytes: &[u8],
    expected_message_length: usize,
) -> Result<CrossChainMessage, Error> {
    if bytes.len() == expected_message_length {
        TransferMessage::decode(bytes).map(CrossChainMessage::Transfer)
    } else {
        ValidatorSetMessage::decode(bytes).map(CrossChainMessage::ValidatorSet)
    }
}

/// `0x` 前缀可有可无
pub fn decode_hex(input: &str) -> Result<Vec<u8>, Error> {
    let stripped = input.strip_prefix("0x").unwrap_or(input);
    hex::decode(stripped).map_err(|e| Error::Codec(format!("invalid hex payload: {e}")))
}

pub fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}
