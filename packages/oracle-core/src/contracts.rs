//! 桥合约的 ABI 绑定与类型化封装
//!
//! 只覆盖中继流程实际会调用的方法和事件。事件解码按 topic0 匹配后手工解析 data，
//! 所有调用都经过 [`ChainAdapter`]，测试里可以直接替换成内存实现。

use std::sync::Arc;

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::{sol, SolCall, SolEvent, SolValue};

use crate::chain_adapter::ChainAdapter;
use crate::types::{BridgeMapping, CallRequest, ChainEvent, ChainSide};
use crate::{Error, Result};

sol! {
    interface IHomeBridge {
        event UserRequestForSignature(address recipient, uint256 value, bytes data);
        event CollectedSignatures(address authorityResponsibleForRelay, bytes32 messageHash, uint256 NumberOfCollectedSignatures);

        function requiredMessageLength() external view returns (uint256);
        function requiredBlockConfirmations() external view returns (uint256);
        function validatorContract() external view returns (address);
        function message(bytes32 hash) external view returns (bytes);
        function signature(bytes32 hash, uint256 index) external view returns (bytes);
        function numMessagesSigned(bytes32 hash) external view returns (uint256);
        function isAlreadyProcessed(uint256 number) external view returns (bool);
        function messagesSigned(bytes32 hash) external view returns (bool);
        function numAffirmationsSigned(bytes32 hash) external view returns (uint256);
        function affirmationsSigned(bytes32 hash) external view returns (bool);

        function submitSignature(bytes signature, bytes message) external;
        function submitSignatureOfMessageWithUnknownLength(bytes signature, bytes message) external;
        function submitSignatureOfBridgeUpgrade(bytes signature, bytes message) external;
        function executeAffirmation(address recipient, uint256 value, bytes32 transactionHash) external;
    }

    interface IForeignBridge {
        event UserRequestForAffirmation(address recipient, uint256 value);

        function requiredBlockConfirmations() external view returns (uint256);
        function validatorContract() external view returns (address);
        function relayedMessages(bytes32 txHash) external view returns (bool);

        function executeSignatures(uint8[] vs, bytes32[] rs, bytes32[] ss, bytes message) external;
        function executeNewSetSignatures(uint8[] vs, bytes32[] rs, bytes32[] ss, bytes message) external;
    }

    interface IBridgeValidators {
        event InitiateChange(bytes32 indexed parentHash, address[] newSet);

        function requiredSignatures() external view returns (uint256);
        function isValidator(address validator) external view returns (bool);
        function validators() external view returns (address[]);
    }

    interface IProxyStorage {
        event UpgradeBridge(uint256 contractType, address contractAddress);
    }

    interface IBridgeMapper {
        event BridgeMappingUpdated(bytes32 key, address homeBridge, address homeToken, uint256 homeStartBlock, address foreignBridge, address foreignToken, uint256 foreignStartBlock);
    }

    interface IERC20 {
        event Transfer(address indexed from, address indexed to, uint256 value);
    }

    interface IERC677 {
        event Transfer(address indexed from, address indexed to, uint256 value, bytes data);
    }

    interface IBlockReward {
        event RewardedOnCycle(uint256 amount);
    }
}

/// 执行只读调用并解码单个返回值
async fn read<C: SolCall, R: SolValue>(chain: &dyn ChainAdapter, to: Address, call: C) -> Result<R>
where
    R: From<<<R as SolValue>::SolType as alloy_sol_types::SolType>::RustType>,
{
    let raw = chain.call(to, Bytes::from(call.abi_encode())).await?;
    R::abi_decode(&raw).map_err(|e| {
        Error::Codec(format!(
            "failed to decode {} result from {to}: {e}",
            C::SIGNATURE
        ))
    })
}

fn to_u64(value: U256, what: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::Codec(format!("{what} does not fit into u64: {value}")))
}

/// `keccak(validator ++ hash)`，合约用它记录某个验证者是否已签过
pub fn sender_hash(validator: Address, hash: B256) -> B256 {
    let mut buf = Vec::with_capacity(52);
    buf.extend_from_slice(validator.as_slice());
    buf.extend_from_slice(hash.as_slice());
    keccak256(buf)
}

/// `keccak(recipient ++ value ++ txHash)`，确认请求的消息哈希
pub fn affirmation_hash(recipient: Address, value: U256, tx_hash: B256) -> B256 {
    let mut buf = Vec::with_capacity(84);
    buf.extend_from_slice(recipient.as_slice());
    buf.extend_from_slice(&value.to_be_bytes::<32>());
    buf.extend_from_slice(tx_hash.as_slice());
    keccak256(buf)
}

#[derive(Clone)]
pub struct HomeBridge {
    chain: Arc<dyn ChainAdapter>,
    address: Address,
}

impl HomeBridge {
    pub fn new(chain: Arc<dyn ChainAdapter>, address: Address) -> Self {
        Self { chain, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain(&self) -> &Arc<dyn ChainAdapter> {
        &self.chain
    }

    /// 同一条链上的另一个 home bridge 实例
    pub fn at(&self, address: Address) -> Self {
        Self::new(self.chain.clone(), address)
    }

    pub async fn required_message_length(&self) -> Result<usize> {
        let len: U256 = read(self.chain.as_ref(), self.address, IHomeBridge::requiredMessageLengthCall {}).await?;
        Ok(to_u64(len, "requiredMessageLength")? as usize)
    }

    pub async fn required_block_confirmations(&self) -> Result<u64> {
        let n: U256 = read(
            self.chain.as_ref(),
            self.address,
            IHomeBridge::requiredBlockConfirmationsCall {},
        )
        .await?;
        to_u64(n, "requiredBlockConfirmations")
    }

    pub async fn validator_contract(&self) -> Result<Address> {
        read(self.chain.as_ref(), self.address, IHomeBridge::validatorContractCall {}).await
    }

    pub async fn message(&self, hash: B256) -> Result<Bytes> {
        read(self.chain.as_ref(), self.address, IHomeBridge::messageCall { hash }).await
    }

    pub async fn signature(&self, hash: B256, index: u64) -> Result<Bytes> {
        read(
            self.chain.as_ref(),
            self.address,
            IHomeBridge::signatureCall {
                hash,
                index: U256::from(index),
            },
        )
        .await
    }

    pub async fn num_messages_signed(&self, hash: B256) -> Result<U256> {
        read(self.chain.as_ref(), self.address, IHomeBridge::numMessagesSignedCall { hash }).await
    }

    pub async fn is_already_processed(&self, number: U256) -> Result<bool> {
        read(self.chain.as_ref(), self.address, IHomeBridge::isAlreadyProcessedCall { number }).await
    }

    pub async fn messages_signed(&self, hash: B256) -> Result<bool> {
        read(self.chain.as_ref(), self.address, IHomeBridge::messagesSignedCall { hash }).await
    }

    pub async fn num_affirmations_signed(&self, hash: B256) -> Result<U256> {
        read(self.chain.as_ref(), self.address, IHomeBridge::numAffirmationsSignedCall { hash }).await
    }

    pub async fn affirmations_signed(&self, hash: B256) -> Result<bool> {
        read(self.chain.as_ref(), self.address, IHomeBridge::affirmationsSignedCall { hash }).await
    }

    /// 以 `from` 身份 dry run 一次写调用，返回 gas 估算
    pub async fn estimate(&self, from: Address, data: Bytes) -> Result<u64> {
        self.chain
            .estimate_gas(CallRequest {
                from: Some(from),
                to: self.address,
                data,
            })
            .await
    }
}

#[derive(Clone)]
pub struct ForeignBridge {
    chain: Arc<dyn ChainAdapter>,
    address: Address,
}

impl ForeignBridge {
    pub fn new(chain: Arc<dyn ChainAdapter>, address: Address) -> Self {
        Self { chain, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain(&self) -> &Arc<dyn ChainAdapter> {
        &self.chain
    }

    /// 同一条链上的另一个 foreign bridge 实例
    pub fn at(&self, address: Address) -> Self {
        Self::new(self.chain.clone(), address)
    }

    pub async fn required_block_confirmations(&self) -> Result<u64> {
        let n: U256 = read(
            self.chain.as_ref(),
            self.address,
            IForeignBridge::requiredBlockConfirmationsCall {},
        )
        .await?;
        to_u64(n, "requiredBlockConfirmations")
    }

    pub async fn validator_contract(&self) -> Result<Address> {
        read(self.chain.as_ref(), self.address, IForeignBridge::validatorContractCall {}).await
    }

    pub async fn relayed_messages(&self, tx_hash: B256) -> Result<bool> {
        read(self.chain.as_ref(), self.address, IForeignBridge::relayedMessagesCall { txHash: tx_hash }).await
    }

    pub async fn estimate(&self, from: Option<Address>, data: Bytes) -> Result<u64> {
        self.chain
            .estimate_gas(CallRequest {
                from,
                to: self.address,
                data,
            })
            .await
    }
}

#[derive(Clone)]
pub struct ValidatorSet {
    chain: Arc<dyn ChainAdapter>,
    address: Address,
}

impl ValidatorSet {
    pub fn new(chain: Arc<dyn ChainAdapter>, address: Address) -> Self {
        Self { chain, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub async fn required_signatures(&self) -> Result<u64> {
        let n: U256 = read(self.chain.as_ref(), self.address, IBridgeValidators::requiredSignaturesCall {}).await?;
        to_u64(n, "requiredSignatures")
    }

    pub async fn is_validator(&self, validator: Address) -> Result<bool> {
        read(self.chain.as_ref(), self.address, IBridgeValidators::isValidatorCall { validator }).await
    }

    pub async fn validators(&self) -> Result<Vec<Address>> {
        read(self.chain.as_ref(), self.address, IBridgeValidators::validatorsCall {}).await
    }
}

/// 中继关心的事件种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    SignatureRequest,
    CollectedSignatures,
    AffirmationRequest,
    InitiateChange,
    UpgradeBridge,
    BridgeMapping,
    /// foreign 代币的 `Transfer`，转入 foreign bridge 即跨链请求
    Transfer,
    RewardedOnCycle,
}

impl EventKind {
    pub fn topic0(&self) -> B256 {
        match self {
            EventKind::SignatureRequest => IHomeBridge::UserRequestForSignature::SIGNATURE_HASH,
            EventKind::CollectedSignatures => IHomeBridge::CollectedSignatures::SIGNATURE_HASH,
            EventKind::AffirmationRequest => IForeignBridge::UserRequestForAffirmation::SIGNATURE_HASH,
            EventKind::InitiateChange => IBridgeValidators::InitiateChange::SIGNATURE_HASH,
            EventKind::UpgradeBridge => IProxyStorage::UpgradeBridge::SIGNATURE_HASH,
            EventKind::BridgeMapping => IBridgeMapper::BridgeMappingUpdated::SIGNATURE_HASH,
            EventKind::Transfer => IERC20::Transfer::SIGNATURE_HASH,
            EventKind::RewardedOnCycle => IBlockReward::RewardedOnCycle::SIGNATURE_HASH,
        }
    }

    /// 事件所在的链
    pub fn source_side(&self) -> ChainSide {
        match self {
            EventKind::AffirmationRequest | EventKind::Transfer => ChainSide::Foreign,
            _ => ChainSide::Home,
        }
    }

    /// 产生的交易发往哪条链；注册表事件不产生交易
    pub fn destination_side(&self) -> Option<ChainSide> {
        match self {
            EventKind::CollectedSignatures => Some(ChainSide::Foreign),
            EventKind::BridgeMapping => None,
            _ => Some(ChainSide::Home),
        }
    }

    /// 由 home bridge 发出、可能来自多个已注册桥的事件
    pub fn emitted_by_home_bridge(&self) -> bool {
        matches!(self, EventKind::SignatureRequest | EventKind::CollectedSignatures)
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            EventKind::SignatureRequest => "UserRequestForSignature",
            EventKind::CollectedSignatures => "CollectedSignatures",
            EventKind::AffirmationRequest => "UserRequestForAffirmation",
            EventKind::InitiateChange => "InitiateChange",
            EventKind::UpgradeBridge => "UpgradeBridge",
            EventKind::BridgeMapping => "BridgeMappingUpdated",
            EventKind::Transfer => "Transfer",
            EventKind::RewardedOnCycle => "RewardedOnCycle",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.event_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRequest {
    pub recipient: Address,
    pub value: U256,
    pub data: Bytes,
}

impl SignatureRequest {
    /// `data` 恰好是一个地址时，它才是真正的收款人
    pub fn effective_recipient(&self) -> Address {
        if self.data.len() == 20 {
            Address::from_slice(&self.data)
        } else {
            self.recipient
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectedSignatures {
    pub authority_responsible_for_relay: Address,
    pub message_hash: B256,
    pub number_of_collected_signatures: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffirmationRequest {
    pub recipient: Address,
    pub value: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateChange {
    pub new_set: Vec<Address>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeBridge {
    pub contract_type: u8,
    pub contract_address: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTransfer {
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardedOnCycle {
    pub amount: U256,
}

fn check_topic(event: &ChainEvent, kind: EventKind) -> Result<()> {
    match event.topics.first() {
        Some(topic) if *topic == kind.topic0() => Ok(()),
        _ => Err(Error::Codec(format!(
            "log {} is not a {} event",
            event.transaction_hash, kind
        ))),
    }
}

fn decode_failed(kind: EventKind) -> impl Fn(alloy_sol_types::Error) -> Error {
    move |e| Error::Codec(format!("failed to decode {kind} data: {e}"))
}

impl SignatureRequest {
    pub fn from_log(event: &ChainEvent) -> Result<Self> {
        check_topic(event, EventKind::SignatureRequest)?;
        let (recipient, value, data) = <(Address, U256, Bytes)>::abi_decode_params(&event.data)
            .map_err(decode_failed(EventKind::SignatureRequest))?;
        Ok(Self { recipient, value, data })
    }
}

impl CollectedSignatures {
    pub fn from_log(event: &ChainEvent) -> Result<Self> {
        check_topic(event, EventKind::CollectedSignatures)?;
        let (authority, message_hash, count) = <(Address, B256, U256)>::abi_decode_params(&event.data)
            .map_err(decode_failed(EventKind::CollectedSignatures))?;
        Ok(Self {
            authority_responsible_for_relay: authority,
            message_hash,
            number_of_collected_signatures: to_u64(count, "NumberOfCollectedSignatures")?,
        })
    }
}

impl AffirmationRequest {
    pub fn from_log(event: &ChainEvent) -> Result<Self> {
        check_topic(event, EventKind::AffirmationRequest)?;
        let (recipient, value) = <(Address, U256)>::abi_decode_params(&event.data)
            .map_err(decode_failed(EventKind::AffirmationRequest))?;
        Ok(Self { recipient, value })
    }
}

impl InitiateChange {
    pub fn from_log(event: &ChainEvent) -> Result<Self> {
        check_topic(event, EventKind::InitiateChange)?;
        let (new_set,) = <(Vec<Address>,)>::abi_decode_params(&event.data)
            .map_err(decode_failed(EventKind::InitiateChange))?;
        Ok(Self { new_set })
    }
}

impl UpgradeBridge {
    pub fn from_log(event: &ChainEvent) -> Result<Self> {
        check_topic(event, EventKind::UpgradeBridge)?;
        let (contract_type, contract_address) = <(U256, Address)>::abi_decode_params(&event.data)
            .map_err(decode_failed(EventKind::UpgradeBridge))?;
        let contract_type = u8::try_from(contract_type)
            .map_err(|_| Error::Codec(format!("contract type {contract_type} out of range")))?;
        Ok(Self {
            contract_type,
            contract_address,
        })
    }
}

impl TokenTransfer {
    pub fn from_log(event: &ChainEvent) -> Result<Self> {
        check_topic(event, EventKind::Transfer)?;
        let [_, from, to] = event.topics.as_slice() else {
            return Err(Error::Codec(format!(
                "Transfer log {} has {} topics, expected 3",
                event.transaction_hash,
                event.topics.len()
            )));
        };
        let value = U256::abi_decode(&event.data).map_err(decode_failed(EventKind::Transfer))?;
        Ok(Self {
            from: Address::from_word(*from),
            to: Address::from_word(*to),
            value,
        })
    }
}

/// 交易收据里同一代币的 ERC677 `Transfer` 附带的 data
pub fn erc677_transfer_data(logs: &[ChainEvent], token: Address) -> Vec<Bytes> {
    logs.iter()
        .filter(|log| log.address == token)
        .filter(|log| log.topics.first() == Some(&IERC677::Transfer::SIGNATURE_HASH))
        .filter_map(|log| <(U256, Bytes)>::abi_decode_params(&log.data).ok())
        .map(|(_, data)| data)
        .collect()
}

impl RewardedOnCycle {
    pub fn from_log(event: &ChainEvent) -> Result<Self> {
        check_topic(event, EventKind::RewardedOnCycle)?;
        let amount = U256::abi_decode(&event.data).map_err(decode_failed(EventKind::RewardedOnCycle))?;
        Ok(Self { amount })
    }
}

impl BridgeMapping {
    pub fn from_log(event: &ChainEvent) -> Result<Self> {
        check_topic(event, EventKind::BridgeMapping)?;
        let (key, home_bridge, home_token, home_start, foreign_bridge, foreign_token, foreign_start) =
            <(B256, Address, Address, U256, Address, Address, U256)>::abi_decode_params(&event.data)
                .map_err(decode_failed(EventKind::BridgeMapping))?;
        Ok(Self {
            key,
            home_bridge,
            home_token,
            home_start_block: to_u64(home_start, "homeStartBlock")?,
            foreign_bridge,
            foreign_token,
            foreign_start_block: to_u64(foreign_start, "foreignStartBlock")?,
        })
    }
}
