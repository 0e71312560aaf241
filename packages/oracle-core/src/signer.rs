use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, Bytes, TxKind, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;

use crate::{Error, Result};

/// 待签名的 legacy 交易，按 EIP-155 绑定链 id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub chain_id: u64,
}

impl TryFrom<&LegacyTransaction> for TxLegacy {
    type Error = Error;

    fn try_from(tx: &LegacyTransaction) -> Result<Self> {
        let gas_price = u128::try_from(tx.gas_price)
            .map_err(|_| Error::Config(format!("gas price {} does not fit into u128", tx.gas_price)))?;
        Ok(TxLegacy {
            chain_id: Some(tx.chain_id),
            nonce: tx.nonce,
            gas_price,
            gas_limit: tx.gas_limit,
            to: TxKind::Call(tx.to),
            value: tx.value,
            input: tx.data.clone(),
        })
    }
}

/// 验证者私钥，负责消息签名和交易签名
#[derive(Clone)]
pub struct ValidatorSigner {
    inner: PrivateKeySigner,
}

impl std::fmt::Debug for ValidatorSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorSigner")
            .field("address", &self.address())
            .finish()
    }
}

impl ValidatorSigner {
    /// 接受带或不带 `0x` 前缀的十六进制私钥
    pub fn from_hex(key: &str) -> Result<Self> {
        let inner = key
            .trim()
            .parse::<PrivateKeySigner>()
            .map_err(|e| Error::Config(format!("invalid validator private key: {e}")))?;
        Ok(Self { inner })
    }

    pub fn random() -> Self {
        Self {
            inner: PrivateKeySigner::random(),
        }
    }

    pub fn address(&self) -> Address {
        self.inner.address()
    }

    /// EIP-191 个人消息签名，返回 r ++ s ++ v（v 为 27/28）
    pub fn sign_message(&self, message: &[u8]) -> Result<Bytes> {
        let signature = self
            .inner
            .sign_message_sync(message)
            .map_err(|e| Error::Chain(format!("failed to sign message: {e}")))?;
        Ok(Bytes::copy_from_slice(&signature.as_bytes()))
    }

    /// 返回可以直接广播的 RLP 编码
    pub fn sign_transaction(&self, tx: &LegacyTransaction) -> Result<Bytes> {
        let tx = TxLegacy::try_from(tx)?;
        let signature = self
            .inner
            .sign_hash_sync(&tx.signature_hash())
            .map_err(|e| Error::Chain(format!("failed to sign transaction: {e}")))?;
        let envelope = TxEnvelope::from(tx.into_signed(signature));
        Ok(Bytes::from(envelope.encoded_2718()))
    }
}

/// 测试里解出已签名的 legacy 交易
#[cfg(test)]
pub(crate) fn decode_signed(raw: &[u8]) -> alloy_consensus::Signed<TxLegacy> {
    use alloy_eips::eip2718::Decodable2718;
    let envelope = TxEnvelope::decode_2718(&mut &raw[..]).unwrap();
    envelope.as_legacy().cloned().unwrap()
}
