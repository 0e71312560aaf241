use std::collections::HashSet;

use alloy_primitives::{Address, Bytes, B256};
use futures::{StreamExt, TryStreamExt};
use tracing::debug;

use crate::contracts::{HomeBridge, ValidatorSet};
use crate::message::{recover_signer, signature_to_vrs, Vrs};
use crate::{Error, Result};

/// 目标链 `executeSignatures` 需要的三个数组，顺序与源链签名下标一致
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureBundle {
    pub vs: Vec<u8>,
    pub rs: Vec<B256>,
    pub ss: Vec<B256>,
}

impl SignatureBundle {
    pub fn len(&self) -> usize {
        self.vs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vs.is_empty()
    }
}

impl From<&[Vrs]> for SignatureBundle {
    fn from(signatures: &[Vrs]) -> Self {
        let mut bundle = SignatureBundle::default();
        for sig in signatures {
            bundle.vs.push(sig.v);
            bundle.rs.push(sig.r);
            bundle.ss.push(sig.s);
        }
        bundle
    }
}

/// 一条消息及其全部签名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedMessage {
    pub message: Bytes,
    pub signatures: Vec<Vrs>,
}

impl CollectedMessage {
    pub fn bundle(&self) -> SignatureBundle {
        SignatureBundle::from(self.signatures.as_slice())
    }
}

/// 并发拉取 `count` 个签名，结果保持下标顺序
pub async fn fetch_signatures(
    home: &HomeBridge,
    message_hash: B256,
    count: u64,
    concurrency: usize,
) -> Result<Vec<Vrs>> {
    futures::stream::iter(0..count)
        .map(|index| async move {
            debug!(index, "Getting message signature");
            let blob = home.signature(message_hash, index).await?;
            signature_to_vrs(&blob)
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}

/// 恢复每个签名者，拒绝非验证者和重复签名
pub async fn verify_signers(
    message: &[u8],
    signatures: &[Vrs],
    validators: &ValidatorSet,
) -> Result<Vec<Address>> {
    let mut seen = HashSet::with_capacity(signatures.len());
    let mut signers = Vec::with_capacity(signatures.len());
    for sig in signatures {
        let signer = recover_signer(message, sig)?;
        debug!(%signer, "Check that signature is from a validator");
        if !validators.is_validator(signer).await? {
            return Err(Error::InvalidValidator(signer));
        }
        if !seen.insert(signer) {
            return Err(Error::DuplicateSigner(signer));
        }
        signers.push(signer);
    }
    Ok(signers)
}

/// 拉取消息和签名并校验签名者
pub async fn collect(
    home: &HomeBridge,
    validators: &ValidatorSet,
    message_hash: B256,
    count: u64,
    concurrency: usize,
) -> Result<CollectedMessage> {
    let message = home.message(message_hash).await?;
    let signatures = fetch_signatures(home, message_hash, count, concurrency).await?;
    verify_signers(&message, &signatures, validators).await?;
    Ok(CollectedMessage { message, signatures })
}
