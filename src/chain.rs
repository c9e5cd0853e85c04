//! In-memory test chain.
//!
//! Every account is unlocked and pre-funded, every accepted transaction is
//! mined into its own block, and contracts are native [`PurchaseAgreement`]
//! values keyed by address. Nothing is persisted.

use crate::agreement::{
    AgreementEvent, Call, DeployParams, Effects, ExecutionContext, PurchaseAgreement, Revert,
    View, ViewValue,
};
use crate::clock::Clock;
use crate::types::{
    address_from_digest, ether, u128_string, Address, BlockNumber, Timestamp, TxHash, Wei,
    WEI_PER_GWEI,
};
use keccak_hash::keccak;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

// Gas schedule
pub const TX_BASE_GAS: u64 = 21_000;
pub const DEPLOY_GAS: u64 = 450_000;
pub const DEPLOY_GAS_PER_BYTE: u64 = 640;
pub const REVERT_GAS: u64 = 2_300;
pub const DEFAULT_BLOCK_GAS_LIMIT: u64 = 30_000_000;

pub fn call_gas(call: Call) -> u64 {
    TX_BASE_GAS
        + match call {
            Call::Sign => 9_800,
            Call::Pay => 3_200,
            Call::ConfirmDelivery => 17_500,
            Call::Cancel => 16_900,
        }
}

pub fn deploy_gas(params: &DeployParams) -> u64 {
    DEPLOY_GAS + DEPLOY_GAS_PER_BYTE * params.object.len() as u64
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainConfig {
    pub account_count: usize,
    pub initial_balance: Wei,
    pub gas_price: Wei,
    /// Upper bound on the gas a single transaction (and so a single block) may use.
    pub block_gas_limit: u64,
    /// Mixed into account derivation; the same seed always yields the same accounts.
    pub account_seed: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            account_count: 10,
            initial_balance: ether(1_000_000),
            gas_price: WEI_PER_GWEI,
            block_gas_limit: DEFAULT_BLOCK_GAS_LIMIT,
            account_seed: 0,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("account {0} is not managed by this chain")]
    UnknownAccount(Address),
    #[error("no contract deployed at {0}")]
    UnknownContract(Address),
    #[error("insufficient funds for {account}: need {required} wei, have {available} wei")]
    InsufficientFunds {
        account: Address,
        required: Wei,
        available: Wei,
    },
    #[error("cannot travel to {requested}: latest block is already at {latest}")]
    TimeTravelBackwards {
        requested: Timestamp,
        latest: Timestamp,
    },
    #[error("timestamp {0} leaves no room for a following block")]
    TimestampOutOfRange(Timestamp),
    #[error("transaction needs {gas} gas, block gas limit is {limit}")]
    GasLimitExceeded { gas: u64, limit: u64 },
    #[error("value overflow in balance arithmetic")]
    Overflow,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Account {
    pub balance: Wei,
    pub nonce: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub number: BlockNumber,
    pub timestamp: Timestamp,
    pub transactions: Vec<TxHash>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: Address,
    pub block_number: BlockNumber,
    pub tx_hash: TxHash,
    pub log_index: u64,
    #[serde(flatten)]
    pub event: AgreementEvent,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: BlockNumber,
    pub timestamp: Timestamp,
    pub from: Address,
    pub to: Option<Address>,
    pub contract_address: Option<Address>,
    pub status: bool,
    pub gas_used: u64,
    #[serde(with = "u128_string")]
    pub fee: Wei,
    pub revert_reason: Option<String>,
    pub logs: Vec<LogEntry>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status
    }
}

pub struct TestChain {
    config: ChainConfig,
    clock: Arc<dyn Clock>,
    accounts: Vec<Address>,
    state: HashMap<Address, Account>,
    contracts: HashMap<Address, PurchaseAgreement>,
    blocks: Vec<Block>,
    receipts: HashMap<TxHash, Receipt>,
    logs: Vec<LogEntry>,
    // Lower bound for the next block timestamp, set by time_travel.
    timestamp_floor: Option<Timestamp>,
}

impl TestChain {
    pub fn new(config: ChainConfig, clock: Arc<dyn Clock>) -> Self {
        let accounts: Vec<Address> = (0..config.account_count)
            .map(|i| derive_account(config.account_seed, i as u64))
            .collect();
        let state = accounts
            .iter()
            .map(|addr| {
                (
                    *addr,
                    Account {
                        balance: config.initial_balance,
                        nonce: 0,
                    },
                )
            })
            .collect();
        let genesis = Block {
            number: 0,
            timestamp: clock.now(),
            transactions: Vec::new(),
        };

        info!(
            accounts = accounts.len(),
            gas_price = %config.gas_price,
            genesis_timestamp = genesis.timestamp,
            "test chain started"
        );

        Self {
            config,
            clock,
            accounts,
            state,
            contracts: HashMap::new(),
            blocks: vec![genesis],
            receipts: HashMap::new(),
            logs: Vec::new(),
            timestamp_floor: None,
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn accounts(&self) -> &[Address] {
        &self.accounts
    }

    pub fn balance(&self, addr: Address) -> Wei {
        self.state.get(&addr).map(|a| a.balance).unwrap_or(0)
    }

    pub fn nonce(&self, addr: Address) -> u64 {
        self.state.get(&addr).map(|a| a.nonce).unwrap_or(0)
    }

    pub fn latest_block(&self) -> &Block {
        // genesis is pushed in new() and blocks are never removed
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn block(&self, number: BlockNumber) -> Option<&Block> {
        self.blocks.get(number as usize)
    }

    /// Timestamp the next mined block will carry.
    pub fn pending_timestamp(&self) -> Timestamp {
        let parent = self.latest_block().timestamp.saturating_add(1);
        parent
            .max(self.clock.now())
            .max(self.timestamp_floor.unwrap_or(0))
    }

    pub fn time_travel(&mut self, timestamp: Timestamp) -> Result<(), ChainError> {
        let latest = self.latest_block().timestamp;
        if timestamp <= latest {
            return Err(ChainError::TimeTravelBackwards {
                requested: timestamp,
                latest,
            });
        }
        if timestamp == Timestamp::MAX {
            return Err(ChainError::TimestampOutOfRange(timestamp));
        }
        info!(from = latest, to = timestamp, "time travel");
        self.timestamp_floor = Some(timestamp);
        Ok(())
    }

    pub fn agreement(&self, addr: Address) -> Result<&PurchaseAgreement, ChainError> {
        self.contracts
            .get(&addr)
            .ok_or(ChainError::UnknownContract(addr))
    }

    pub fn receipt(&self, tx_hash: &TxHash) -> Option<&Receipt> {
        self.receipts.get(tx_hash)
    }

    pub fn logs(&self, contract: Address) -> Vec<LogEntry> {
        self.logs
            .iter()
            .filter(|log| log.address == contract)
            .cloned()
            .collect()
    }

    /// Evaluates a read-only accessor against the pending block.
    pub fn call_view(&self, contract: Address, view: View) -> Result<ViewValue, ChainError> {
        let agreement = self.agreement(contract)?;
        Ok(agreement.view(view, self.pending_timestamp()))
    }

    pub fn deploy(&mut self, from: Address, params: DeployParams) -> Result<Receipt, ChainError> {
        let gas = deploy_gas(&params);
        self.ensure_gas_limit(gas)?;
        let fee = self.fee(gas)?;
        self.ensure_funds(from, fee)?;

        let nonce = self.nonce(from);
        let contract = contract_address(from, nonce);
        let tx_hash = self.next_tx_hash(from, nonce);
        let timestamp = self.pending_timestamp();
        self.charge(from, fee);

        self.contracts
            .insert(contract, PurchaseAgreement::deploy(from, params));
        self.state.entry(contract).or_default();

        let block = self.mine(tx_hash, timestamp);
        info!(
            contract = %contract,
            from = %from.short(),
            block = block.number,
            "agreement deployed"
        );

        let receipt = Receipt {
            tx_hash,
            block_number: block.number,
            timestamp: block.timestamp,
            from,
            to: None,
            contract_address: Some(contract),
            status: true,
            gas_used: gas,
            fee,
            revert_reason: None,
            logs: Vec::new(),
        };
        self.receipts.insert(tx_hash, receipt.clone());
        Ok(receipt)
    }

    /// Sends a message to a deployed agreement. A revert still yields a mined
    /// receipt with `status == false`; `Err` means the transaction was never accepted.
    pub fn transact(
        &mut self,
        from: Address,
        contract: Address,
        call: Call,
        value: Wei,
    ) -> Result<Receipt, ChainError> {
        let mut staged = self.agreement(contract)?.clone();
        self.ensure_gas_limit(call_gas(call))?;
        let max_fee = self.fee(call_gas(call))?;
        let revert_fee = self.fee(TX_BASE_GAS + REVERT_GAS)?;
        let upfront = max_fee.checked_add(value).ok_or(ChainError::Overflow)?;
        self.ensure_funds(from, upfront)?;

        let nonce = self.nonce(from);
        let tx_hash = self.next_tx_hash(from, nonce);
        let timestamp = self.pending_timestamp();
        let block_number = self.latest_block().number + 1;

        let ctx = ExecutionContext {
            sender: from,
            value,
            timestamp,
            balance: self
                .balance(contract)
                .checked_add(value)
                .ok_or(ChainError::Overflow)?,
        };
        let outcome = staged.execute(call, &ctx).and_then(|effects| {
            let balances = self.stage_balances(from, contract, value, &effects)?;
            Ok((effects, balances))
        });

        let (gas_used, fee, revert_reason, logs) = match outcome {
            Ok((effects, balances)) => {
                for (addr, balance) in balances {
                    self.state.entry(addr).or_default().balance = balance;
                }
                if staged.status().is_terminal() {
                    info!(
                        contract = %contract,
                        status = staged.status().name(),
                        "agreement closed"
                    );
                }
                self.contracts.insert(contract, staged);
                let logs = self.record_logs(contract, block_number, tx_hash, effects.events);
                (call_gas(call), max_fee, None, logs)
            }
            Err(Revert(reason)) => {
                warn!(
                    call = call.name(),
                    from = %from.short(),
                    reason = %reason,
                    "transaction reverted"
                );
                (TX_BASE_GAS + REVERT_GAS, revert_fee, Some(reason), Vec::new())
            }
        };

        self.charge(from, fee);
        let block = self.mine(tx_hash, timestamp);
        debug!(
            call = call.name(),
            block = block.number,
            gas_used,
            success = revert_reason.is_none(),
            "transaction mined"
        );

        let receipt = Receipt {
            tx_hash,
            block_number: block.number,
            timestamp: block.timestamp,
            from,
            to: Some(contract),
            contract_address: None,
            status: revert_reason.is_none(),
            gas_used,
            fee,
            revert_reason,
            logs,
        };
        self.receipts.insert(tx_hash, receipt.clone());
        Ok(receipt)
    }

    fn fee(&self, gas: u64) -> Result<Wei, ChainError> {
        (gas as u128)
            .checked_mul(self.config.gas_price)
            .ok_or(ChainError::Overflow)
    }

    fn ensure_gas_limit(&self, gas: u64) -> Result<(), ChainError> {
        let limit = self.config.block_gas_limit;
        if gas > limit {
            return Err(ChainError::GasLimitExceeded { gas, limit });
        }
        Ok(())
    }

    fn ensure_funds(&self, from: Address, required: Wei) -> Result<(), ChainError> {
        if !self.accounts.contains(&from) {
            return Err(ChainError::UnknownAccount(from));
        }
        let available = self.balance(from);
        if available < required {
            return Err(ChainError::InsufficientFunds {
                account: from,
                required,
                available,
            });
        }
        Ok(())
    }

    // Caller has already checked the balance covers `fee`.
    fn charge(&mut self, from: Address, fee: Wei) {
        let account = self.state.entry(from).or_default();
        account.balance = account.balance.saturating_sub(fee);
        account.nonce += 1;
    }

    /// Computes post-transaction balances for every touched address without
    /// mutating chain state.
    fn stage_balances(
        &self,
        from: Address,
        contract: Address,
        value: Wei,
        effects: &Effects,
    ) -> Result<BTreeMap<Address, Wei>, Revert> {
        let mut moves = vec![(from, contract, value, "value transfer failed")];
        moves.extend(
            effects
                .transfers
                .iter()
                .map(|t| (contract, t.to, t.amount, t.failure)),
        );

        let mut balances = BTreeMap::new();
        for (src, dst, amount, failure) in moves {
            let src_balance = *balances.entry(src).or_insert_with(|| self.balance(src));
            let debited = src_balance
                .checked_sub(amount)
                .ok_or_else(|| Revert(failure.to_string()))?;
            balances.insert(src, debited);

            let dst_balance = *balances.entry(dst).or_insert_with(|| self.balance(dst));
            let credited = dst_balance
                .checked_add(amount)
                .ok_or_else(|| Revert(failure.to_string()))?;
            balances.insert(dst, credited);
        }
        Ok(balances)
    }

    fn record_logs(
        &mut self,
        contract: Address,
        block_number: BlockNumber,
        tx_hash: TxHash,
        events: Vec<AgreementEvent>,
    ) -> Vec<LogEntry> {
        let entries: Vec<LogEntry> = events
            .into_iter()
            .enumerate()
            .map(|(i, event)| LogEntry {
                address: contract,
                block_number,
                tx_hash,
                log_index: i as u64,
                event,
            })
            .collect();
        self.logs.extend(entries.iter().cloned());
        entries
    }

    fn mine(&mut self, tx_hash: TxHash, timestamp: Timestamp) -> Block {
        let block = Block {
            number: self.latest_block().number + 1,
            timestamp,
            transactions: vec![tx_hash],
        };
        self.timestamp_floor = None;
        self.blocks.push(block.clone());
        block
    }

    fn next_tx_hash(&self, from: Address, nonce: u64) -> TxHash {
        let salt: u64 = thread_rng().gen();
        let mut buf = Vec::with_capacity(Address::LEN + 24);
        buf.extend_from_slice(from.as_bytes());
        buf.extend_from_slice(&nonce.to_be_bytes());
        buf.extend_from_slice(&(self.latest_block().number + 1).to_be_bytes());
        buf.extend_from_slice(&salt.to_be_bytes());
        TxHash(keccak(&buf).to_fixed_bytes())
    }
}

pub fn derive_account(seed: u64, index: u64) -> Address {
    let mut buf = Vec::with_capacity(32);
    buf.extend_from_slice(b"escrow-sim/account");
    buf.extend_from_slice(&seed.to_be_bytes());
    buf.extend_from_slice(&index.to_be_bytes());
    address_from_digest(&keccak(&buf).to_fixed_bytes())
}

/// Contract address from the deployer and its nonce at deployment.
pub fn contract_address(deployer: Address, nonce: u64) -> Address {
    let mut buf = Vec::with_capacity(Address::LEN + 8);
    buf.extend_from_slice(deployer.as_bytes());
    buf.extend_from_slice(&nonce.to_be_bytes());
    address_from_digest(&keccak(&buf).to_fixed_bytes())
}
