//! 测试用的内存链：模拟两条链上的桥合约、验证者合约和交易池

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use alloy_primitives::{address, keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::{SolEvent, SolInterface, SolValue};
use async_trait::async_trait;

use crate::chain_adapter::ChainAdapter;
use crate::context::{BridgeContext, ContextOptions};
use crate::contracts::{
    sender_hash, ForeignBridge, HomeBridge, IBlockReward, IBridgeMapper, IBridgeValidators, IForeignBridge,
    IHomeBridge, IProxyStorage, ValidatorSet, IERC20, IERC677,
};
use crate::coordinator::RotationStrategy;
use crate::message::{classify_then_decode, recover_signer, Vrs, TRANSFER_MESSAGE_LEN};
use crate::signer::ValidatorSigner;
use crate::store::{InMemoryStore, KeyValueStore};
use crate::types::{BridgeMapping, CallRequest, ChainEvent, ChainSide, LogFilter};
use crate::{Error, Result};

pub const HOME_BRIDGE: Address = address!("00000000000000000000000000000000000000a0");
pub const FOREIGN_BRIDGE: Address = address!("00000000000000000000000000000000000000b0");
pub const HOME_VALIDATORS: Address = address!("00000000000000000000000000000000000000a1");
pub const FOREIGN_VALIDATORS: Address = address!("00000000000000000000000000000000000000b1");
pub const PROXY_STORAGE: Address = address!("00000000000000000000000000000000000000a2");
pub const MAPPER: Address = address!("00000000000000000000000000000000000000a3");
pub const BLOCK_REWARD: Address = address!("00000000000000000000000000000000000000a4");
pub const FOREIGN_TOKEN: Address = address!("00000000000000000000000000000000000000b2");

pub const HOME_CHAIN_ID: u64 = 77;
pub const FOREIGN_CHAIN_ID: u64 = 1;

const RELAY_GAS: u64 = 250_000;
const SUBMISSION_GAS: u64 = 120_000;

#[derive(Default)]
struct SideState {
    down: bool,
    block: u64,
    block_delay: Option<Duration>,
    confirmations: u64,
    logs: Vec<ChainEvent>,
    validators: Vec<Address>,
    nonce: u64,
    nonce_queries: usize,
    failing_nonce_queries: usize,
    balance: U256,
    sent: Vec<Bytes>,
    send_attempts: usize,
    failing_sends: HashMap<usize, String>,
}

#[derive(Default)]
struct State {
    home: SideState,
    foreign: SideState,
    required_signatures: u64,
    messages: HashMap<B256, Bytes>,
    signatures: HashMap<B256, Vec<Bytes>>,
    num_messages_signed: HashMap<B256, U256>,
    messages_signed: HashSet<B256>,
    num_affirmations_signed: HashMap<B256, U256>,
    affirmations_signed: HashSet<B256>,
    relayed: HashSet<B256>,
    force_foreign_revert: bool,
    force_foreign_accept: bool,
    failing_messages: HashSet<B256>,
    required_message_length: Option<usize>,
    next_tx: u64,
}

impl State {
    fn side(&mut self, side: ChainSide) -> &mut SideState {
        match side {
            ChainSide::Home => &mut self.home,
            ChainSide::Foreign => &mut self.foreign,
        }
    }
}

fn processed_bit() -> U256 {
    U256::from(1u64) << 255
}

fn reverted(reason: &str) -> Error {
    Error::Reverted(reason.to_string())
}

fn rpc_down(side: ChainSide) -> Error {
    Error::Rpc(format!("{side} node unreachable"))
}

struct FakeAdapter {
    side: ChainSide,
    state: Arc<Mutex<State>>,
}

impl FakeAdapter {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn check_up(&self) -> Result<()> {
        let mut state = self.lock();
        if state.side(self.side).down {
            return Err(rpc_down(self.side));
        }
        Ok(())
    }

    fn call_validators(&self, data: &[u8]) -> Result<Bytes> {
        let mut state = self.lock();
        let required = state.required_signatures;
        let validators = state.side(self.side).validators.clone();
        let call = IBridgeValidators::IBridgeValidatorsCalls::abi_decode(data).map_err(|e| reverted(&e.to_string()))?;
        let out = match call {
            IBridgeValidators::IBridgeValidatorsCalls::requiredSignatures(_) => U256::from(required).abi_encode(),
            IBridgeValidators::IBridgeValidatorsCalls::isValidator(c) => validators.contains(&c.validator).abi_encode(),
            IBridgeValidators::IBridgeValidatorsCalls::validators(_) => validators.abi_encode(),
        };
        Ok(Bytes::from(out))
    }

    fn call_home_bridge(&self, data: &[u8]) -> Result<Bytes> {
        use IHomeBridge::IHomeBridgeCalls as C;
        let state = self.lock();
        let call = C::abi_decode(data).map_err(|e| reverted(&e.to_string()))?;
        let out = match call {
            C::requiredMessageLength(_) => U256::from(state.required_message_length.unwrap_or(TRANSFER_MESSAGE_LEN)).abi_encode(),
            C::requiredBlockConfirmations(_) => U256::from(state.home.confirmations).abi_encode(),
            C::validatorContract(_) => HOME_VALIDATORS.abi_encode(),
            C::message(c) if state.failing_messages.contains(&c.hash) => {
                return Err(Error::Rpc(format!("message {} unavailable", c.hash)))
            }
            C::message(c) => state.messages.get(&c.hash).cloned().unwrap_or_default().abi_encode(),
            C::signature(c) => {
                let index = c.index.to::<usize>();
                state
                    .signatures
                    .get(&c.hash)
                    .and_then(|sigs| sigs.get(index))
                    .cloned()
                    .unwrap_or_default()
                    .abi_encode()
            }
            C::numMessagesSigned(c) => state.num_messages_signed.get(&c.hash).copied().unwrap_or_default().abi_encode(),
            C::isAlreadyProcessed(c) => c.number.bit(255).abi_encode(),
            C::messagesSigned(c) => state.messages_signed.contains(&c.hash).abi_encode(),
            C::numAffirmationsSigned(c) => state
                .num_affirmations_signed
                .get(&c.hash)
                .copied()
                .unwrap_or_default()
                .abi_encode(),
            C::affirmationsSigned(c) => state.affirmations_signed.contains(&c.hash).abi_encode(),
            _ => return Err(reverted("not a view function")),
        };
        Ok(Bytes::from(out))
    }

    fn call_foreign_bridge(&self, data: &[u8]) -> Result<Bytes> {
        use IForeignBridge::IForeignBridgeCalls as C;
        let state = self.lock();
        let call = C::abi_decode(data).map_err(|e| reverted(&e.to_string()))?;
        let out = match call {
            C::requiredBlockConfirmations(_) => U256::from(state.foreign.confirmations).abi_encode(),
            C::validatorContract(_) => FOREIGN_VALIDATORS.abi_encode(),
            C::relayedMessages(c) => state.relayed.contains(&c.txHash).abi_encode(),
            _ => return Err(reverted("not a view function")),
        };
        Ok(Bytes::from(out))
    }

    fn estimate_home(&self, from: Address, data: &[u8]) -> Result<u64> {
        use IHomeBridge::IHomeBridgeCalls as C;
        let state = self.lock();
        if !state.home.validators.contains(&from) {
            return Err(reverted("sender is not a validator"));
        }
        let call = C::abi_decode(data).map_err(|e| reverted(&e.to_string()))?;
        let (hash, signed, processed) = match call {
            C::submitSignature(c) => message_status(&state, &c.message),
            C::submitSignatureOfMessageWithUnknownLength(c) => message_status(&state, &c.message),
            C::submitSignatureOfBridgeUpgrade(c) => message_status(&state, &c.message),
            C::executeAffirmation(c) => {
                let hash = crate::contracts::affirmation_hash(c.recipient, c.value, c.transactionHash);
                let count = state.num_affirmations_signed.get(&hash).copied().unwrap_or_default();
                (hash, &state.affirmations_signed, count.bit(255))
            }
            _ => return Err(reverted("not a transaction")),
        };
        if processed || signed.contains(&sender_hash(from, hash)) {
            return Err(reverted("already signed"));
        }
        Ok(SUBMISSION_GAS)
    }

    fn estimate_foreign(&self, data: &[u8]) -> Result<u64> {
        use IForeignBridge::IForeignBridgeCalls as C;
        let state = self.lock();
        let (vs, rs, ss, message) = match C::abi_decode(data).map_err(|e| reverted(&e.to_string()))? {
            C::executeSignatures(c) => (c.vs, c.rs, c.ss, c.message),
            C::executeNewSetSignatures(c) => (c.vs, c.rs, c.ss, c.message),
            _ => return Err(reverted("not a transaction")),
        };
        if state.force_foreign_revert {
            return Err(reverted("forced"));
        }
        if state.force_foreign_accept {
            return Ok(RELAY_GAS);
        }
        let parsed = classify_then_decode(&message, TRANSFER_MESSAGE_LEN).map_err(|_| reverted("bad message"))?;
        if state.relayed.contains(&parsed.tx_hash()) {
            return Err(reverted("already relayed"));
        }
        let mut signers = HashSet::new();
        for ((v, r), s) in vs.into_iter().zip(rs).zip(ss) {
            let signer = recover_signer(&message, &Vrs { v, r, s }).map_err(|_| reverted("bad signature"))?;
            if !state.foreign.validators.contains(&signer) || !signers.insert(signer) {
                return Err(reverted("invalid signer"));
            }
        }
        if (signers.len() as u64) < state.required_signatures {
            return Err(reverted("not enough signatures"));
        }
        Ok(RELAY_GAS)
    }
}

fn message_status<'a>(state: &'a State, message: &[u8]) -> (B256, &'a HashSet<B256>, bool) {
    let hash = keccak256(message);
    let count = state.num_messages_signed.get(&hash).copied().unwrap_or_default();
    (hash, &state.messages_signed, count.bit(255))
}

#[async_trait]
impl ChainAdapter for FakeAdapter {
    async fn block_number(&self) -> Result<u64> {
        self.check_up()?;
        let delay = self.lock().side(self.side).block_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.lock().side(self.side).block)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<ChainEvent>> {
        self.check_up()?;
        let mut state = self.lock();
        Ok(state
            .side(self.side)
            .logs
            .iter()
            .filter(|log| filter.addresses.is_empty() || filter.addresses.contains(&log.address))
            .filter(|log| filter.topic0.map_or(true, |t| log.topics.first() == Some(&t)))
            .filter(|log| log.block_number >= filter.from_block && log.block_number <= filter.to_block)
            .cloned()
            .collect())
    }

    async fn transaction_logs(&self, tx_hash: B256) -> Result<Vec<ChainEvent>> {
        self.check_up()?;
        let mut state = self.lock();
        Ok(state
            .side(self.side)
            .logs
            .iter()
            .filter(|log| log.transaction_hash == tx_hash)
            .cloned()
            .collect())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        self.check_up()?;
        match (self.side, to) {
            (ChainSide::Home, HOME_VALIDATORS) | (ChainSide::Foreign, FOREIGN_VALIDATORS) => {
                self.call_validators(&data)
            }
            (ChainSide::Home, _) => self.call_home_bridge(&data),
            (ChainSide::Foreign, _) => self.call_foreign_bridge(&data),
        }
    }

    async fn estimate_gas(&self, request: CallRequest) -> Result<u64> {
        self.check_up()?;
        match self.side {
            ChainSide::Home => self.estimate_home(request.from.unwrap_or_default(), &request.data),
            ChainSide::Foreign => self.estimate_foreign(&request.data),
        }
    }

    async fn transaction_count(&self, _address: Address) -> Result<u64> {
        self.check_up()?;
        let mut state = self.lock();
        let side = state.side(self.side);
        side.nonce_queries += 1;
        if side.failing_nonce_queries > 0 {
            side.failing_nonce_queries -= 1;
            return Err(rpc_down(self.side));
        }
        Ok(side.nonce)
    }

    async fn chain_id(&self) -> Result<u64> {
        self.check_up()?;
        Ok(match self.side {
            ChainSide::Home => HOME_CHAIN_ID,
            ChainSide::Foreign => FOREIGN_CHAIN_ID,
        })
    }

    async fn balance(&self, _address: Address) -> Result<U256> {
        self.check_up()?;
        Ok(self.lock().side(self.side).balance)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256> {
        self.check_up()?;
        let mut state = self.lock();
        let side = state.side(self.side);
        let index = side.send_attempts;
        side.send_attempts += 1;
        if let Some(reason) = side.failing_sends.remove(&index) {
            return Err(Error::Chain(reason));
        }
        side.sent.push(raw.clone());
        side.nonce += 1;
        Ok(keccak256(&raw))
    }
}

/// 两条链的内存模拟，测试里通过它构造事件、调整合约状态
pub struct FakeChain {
    state: Arc<Mutex<State>>,
    home: Arc<FakeAdapter>,
    foreign: Arc<FakeAdapter>,
    store: Arc<dyn KeyValueStore>,
}

impl FakeChain {
    pub fn new() -> Self {
        let mut initial = State {
            required_signatures: 1,
            ..State::default()
        };
        initial.home.confirmations = 1;
        initial.foreign.confirmations = 2;
        initial.home.balance = U256::from(10u64).pow(U256::from(18u64));
        initial.foreign.balance = U256::from(10u64).pow(U256::from(18u64));
        let state = Arc::new(Mutex::new(initial));
        Self {
            home: Arc::new(FakeAdapter {
                side: ChainSide::Home,
                state: state.clone(),
            }),
            foreign: Arc::new(FakeAdapter {
                side: ChainSide::Foreign,
                state: state.clone(),
            }),
            state,
            store: Arc::new(InMemoryStore::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn home_chain(&self) -> Arc<dyn ChainAdapter> {
        self.home.clone()
    }

    pub fn foreign_chain(&self) -> Arc<dyn ChainAdapter> {
        self.foreign.clone()
    }

    pub fn chain(&self, side: ChainSide) -> Arc<dyn ChainAdapter> {
        match side {
            ChainSide::Home => self.home_chain(),
            ChainSide::Foreign => self.foreign_chain(),
        }
    }

    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        self.store.clone()
    }

    pub fn home_bridge(&self) -> HomeBridge {
        HomeBridge::new(self.home_chain(), HOME_BRIDGE)
    }

    pub fn foreign_bridge(&self) -> ForeignBridge {
        ForeignBridge::new(self.foreign_chain(), FOREIGN_BRIDGE)
    }

    pub fn home_validators(&self) -> ValidatorSet {
        ValidatorSet::new(self.home_chain(), HOME_VALIDATORS)
    }

    pub fn foreign_validators(&self) -> ValidatorSet {
        ValidatorSet::new(self.foreign_chain(), FOREIGN_VALIDATORS)
    }

    pub fn options(&self) -> ContextOptions {
        ContextOptions {
            home_bridge: HOME_BRIDGE,
            foreign_bridge: FOREIGN_BRIDGE,
            deployed_bridges_key: "deployed:bridges".to_string(),
            max_concurrent_events: 4,
            relay_timeout_blocks: 10,
            rotation_strategy: RotationStrategy::ValidatorSetWalk,
            max_pending_failures: 2,
        }
    }

    pub async fn context(&self, signer: ValidatorSigner) -> Arc<BridgeContext> {
        let ctx = BridgeContext::resolve(self.home_chain(), self.foreign_chain(), self.options(), signer, self.store())
            .await
            .unwrap();
        Arc::new(ctx)
    }

    pub fn add_home_validator(&self, validator: Address) {
        self.lock().home.validators.push(validator);
    }

    pub fn remove_home_validator(&self, validator: Address) {
        self.lock().home.validators.retain(|v| *v != validator);
    }

    pub fn add_foreign_validator(&self, validator: Address) {
        self.lock().foreign.validators.push(validator);
    }

    pub fn remove_foreign_validator(&self, validator: Address) {
        self.lock().foreign.validators.retain(|v| *v != validator);
    }

    /// 两端验证者合约共用同一个签名阈值
    pub fn set_required_signatures(&self, n: u64) {
        self.lock().required_signatures = n;
    }

    pub fn set_home_down(&self, down: bool) {
        self.lock().home.down = down;
    }

    pub fn set_foreign_down(&self, down: bool) {
        self.lock().foreign.down = down;
    }

    pub fn set_down(&self, side: ChainSide, down: bool) {
        self.lock().side(side).down = down;
    }

    pub fn force_foreign_revert(&self, revert: bool) {
        self.lock().force_foreign_revert = revert;
    }

    /// 中继 dry run 总是通过，模拟不校验签名者的目标合约
    pub fn force_foreign_accept(&self, accept: bool) {
        self.lock().force_foreign_accept = accept;
    }

    /// 读取该消息时返回节点错误
    pub fn set_message_unavailable(&self, hash: B256, unavailable: bool) {
        let mut state = self.lock();
        if unavailable {
            state.failing_messages.insert(hash);
        } else {
            state.failing_messages.remove(&hash);
        }
    }

    pub fn set_required_message_length(&self, length: usize) {
        self.lock().required_message_length = Some(length);
    }

    /// 接下来的 `n` 次 nonce 查询返回节点错误
    pub fn fail_nonce_queries(&self, side: ChainSide, n: usize) {
        self.lock().side(side).failing_nonce_queries = n;
    }

    pub fn set_block_number(&self, side: ChainSide, block: u64) {
        self.lock().side(side).block = block;
    }

    pub fn set_block_delay(&self, side: ChainSide, delay: Option<Duration>) {
        self.lock().side(side).block_delay = delay;
    }

    pub fn set_confirmations(&self, side: ChainSide, confirmations: u64) {
        self.lock().side(side).confirmations = confirmations;
    }

    pub fn set_balance(&self, side: ChainSide, balance: U256) {
        self.lock().side(side).balance = balance;
    }

    pub fn set_nonce(&self, side: ChainSide, nonce: u64) {
        self.lock().side(side).nonce = nonce;
    }

    /// 第 `index` 次发送（从 0 计）以 `reason` 失败
    pub fn fail_send(&self, side: ChainSide, index: usize, reason: &str) {
        self.lock().side(side).failing_sends.insert(index, reason.to_string());
    }

    pub fn sent(&self, side: ChainSide) -> Vec<Bytes> {
        self.lock().side(side).sent.clone()
    }

    pub fn nonce_queries(&self, side: ChainSide) -> usize {
        self.lock().side(side).nonce_queries
    }

    pub fn relay_gas(&self) -> u64 {
        RELAY_GAS
    }

    pub fn submission_gas(&self) -> u64 {
        SUBMISSION_GAS
    }

    /// 保存一条已收集签名的消息，签名顺序即链上下标顺序
    pub fn store_collected_message(&self, message: &Bytes, signers: &[ValidatorSigner]) -> B256 {
        let hash = keccak256(message);
        let signatures = signers.iter().map(|s| s.sign_message(message).unwrap()).collect();
        let mut state = self.lock();
        state.messages.insert(hash, message.clone());
        state.signatures.insert(hash, signatures);
        hash
    }

    pub fn mark_relayed(&self, tx_hash: B256) {
        self.lock().relayed.insert(tx_hash);
    }

    pub fn mark_message_signed(&self, hash: B256, validator: Address) {
        let mut state = self.lock();
        state.messages_signed.insert(sender_hash(validator, hash));
        *state.num_messages_signed.entry(hash).or_default() += U256::from(1u64);
    }

    pub fn mark_message_processed(&self, hash: B256) {
        let mut state = self.lock();
        let count = state.num_messages_signed.entry(hash).or_default();
        *count |= processed_bit();
    }

    pub fn mark_affirmation_signed(&self, hash: B256, validator: Address) {
        let mut state = self.lock();
        state.affirmations_signed.insert(sender_hash(validator, hash));
        *state.num_affirmations_signed.entry(hash).or_default() += U256::from(1u64);
    }

    /// 在 `side` 链上以一笔新交易记录一条日志并返回它
    pub fn emit(&self, side: ChainSide, address: Address, topics: Vec<B256>, data: Vec<u8>, block: u64) -> ChainEvent {
        let tx_hash = {
            let mut state = self.lock();
            state.next_tx += 1;
            B256::left_padding_from(&state.next_tx.to_be_bytes())
        };
        self.emit_in(side, tx_hash, address, topics, data, block)
    }

    /// 在已有交易 `tx_hash` 中追加一条日志
    pub fn emit_in(
        &self,
        side: ChainSide,
        tx_hash: B256,
        address: Address,
        topics: Vec<B256>,
        data: Vec<u8>,
        block: u64,
    ) -> ChainEvent {
        let mut state = self.lock();
        let log_index = state.side(side).logs.len() as u64;
        let event = ChainEvent {
            address,
            topics,
            data: Bytes::from(data),
            block_number: block,
            transaction_hash: tx_hash,
            log_index,
        };
        state.side(side).logs.push(event.clone());
        event
    }

    /// foreign 代币的 ERC20 `Transfer`
    pub fn token_transfer(&self, token: Address, from: Address, to: Address, value: U256, block: u64) -> ChainEvent {
        self.emit(
            ChainSide::Foreign,
            token,
            vec![IERC20::Transfer::SIGNATURE_HASH, from.into_word(), to.into_word()],
            value.abi_encode(),
            block,
        )
    }

    /// 与 `transfer` 同一笔交易中的 ERC677 `Transfer`
    pub fn erc677_transfer(&self, transfer: &ChainEvent, data: Bytes) -> ChainEvent {
        let value = U256::abi_decode(&transfer.data).unwrap();
        self.emit_in(
            ChainSide::Foreign,
            transfer.transaction_hash,
            transfer.address,
            vec![IERC677::Transfer::SIGNATURE_HASH, transfer.topics[1], transfer.topics[2]],
            (value, data).abi_encode_params(),
            transfer.block_number,
        )
    }

    pub fn rewarded_on_cycle(&self, amount: U256, block: u64) -> ChainEvent {
        self.emit(
            ChainSide::Home,
            BLOCK_REWARD,
            vec![IBlockReward::RewardedOnCycle::SIGNATURE_HASH],
            amount.abi_encode(),
            block,
        )
    }

    pub fn signature_request(&self, recipient: Address, value: U256, data: Bytes, block: u64) -> ChainEvent {
        self.emit(
            ChainSide::Home,
            HOME_BRIDGE,
            vec![IHomeBridge::UserRequestForSignature::SIGNATURE_HASH],
            (recipient, value, data).abi_encode_params(),
            block,
        )
    }

    pub fn collected_signatures(&self, authority: Address, message_hash: B256, count: u64, block: u64) -> ChainEvent {
        self.emit(
            ChainSide::Home,
            HOME_BRIDGE,
            vec![IHomeBridge::CollectedSignatures::SIGNATURE_HASH],
            (authority, message_hash, U256::from(count)).abi_encode_params(),
            block,
        )
    }

    pub fn affirmation_request(&self, recipient: Address, value: U256, block: u64) -> ChainEvent {
        self.emit(
            ChainSide::Foreign,
            FOREIGN_BRIDGE,
            vec![IForeignBridge::UserRequestForAffirmation::SIGNATURE_HASH],
            (recipient, value).abi_encode_params(),
            block,
        )
    }

    pub fn initiate_change(&self, new_set: Vec<Address>, block: u64) -> ChainEvent {
        self.emit(
            ChainSide::Home,
            HOME_VALIDATORS,
            vec![IBridgeValidators::InitiateChange::SIGNATURE_HASH, B256::repeat_byte(0xfe)],
            (new_set,).abi_encode_params(),
            block,
        )
    }

    pub fn upgrade_bridge(&self, contract_type: u8, contract_address: Address, block: u64) -> ChainEvent {
        self.emit(
            ChainSide::Home,
            PROXY_STORAGE,
            vec![IProxyStorage::UpgradeBridge::SIGNATURE_HASH],
            (U256::from(contract_type), contract_address).abi_encode_params(),
            block,
        )
    }

    pub fn bridge_mapping(&self, mapping: &BridgeMapping, block: u64) -> ChainEvent {
        self.emit(
            ChainSide::Home,
            MAPPER,
            vec![IBridgeMapper::BridgeMappingUpdated::SIGNATURE_HASH],
            (
                mapping.key,
                mapping.home_bridge,
                mapping.home_token,
                U256::from(mapping.home_start_block),
                mapping.foreign_bridge,
                mapping.foreign_token,
                U256::from(mapping.foreign_start_block),
            )
                .abi_encode_params(),
            block,
        )
    }
}
