use alloy_primitives::{Address, Signature, B256, U256};
use serde::{Deserialize, Serialize};

use crate::Error;

/// r(32) + s(32) + v(1)
pub const SIGNATURE_LEN: usize = 65;

/// 从 65 字节签名拆出的三元组，目标链合约按数组形式接收
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vrs {
    pub v: u8,
    pub r: B256,
    pub s: B256,
}

impl Vrs {
    /// 转成可用于恢复签名者的签名对象
    pub fn to_signature(&self) -> Result<Signature, Error> {
        let y_parity = match self.v {
            27 | 0 => false,
            28 | 1 => true,
            v => return Err(Error::Codec(format!("invalid signature v value {v}"))),
        };
        Ok(Signature::new(
            U256::from_be_bytes(self.r.0),
            U256::from_be_bytes(self.s.0),
            y_parity,
        ))
    }
}

pub fn signature_to_vrs(blob: &[u8]) -> Result<Vrs, Error> {
    if blob.len() != SIGNATURE_LEN {
        return Err(Error::Codec(format!(
            "signature must be {SIGNATURE_LEN} bytes, got {}",
            blob.len()
        )));
    }
    Ok(Vrs {
        r: B256::from_slice(&blob[..32]),
        s: B256::from_slice(&blob[32..64]),
        v: blob[64],
    })
}

/// 按 EIP-191 个人消息格式恢复签名者地址
pub fn recover_signer(message: &[u8], vrs: &Vrs) -> Result<Address, Error> {
    vrs.to_signature()?
        .recover_address_from_msg(message)
        .map_err(|e| Error::Codec(format!("signature recovery failed: {e}")))
}
