//! Interactive workflow over one test chain: a fixed seller and buyer, at most
//! one live agreement, and one operation per action the parties can take.

use crate::agreement::{AgreementStatus, Call, DeployParams, View, ViewValue};
use crate::chain::{ChainError, LogEntry, Receipt, TestChain};
use crate::types::{format_ether, to_wei, u128_string, Address, Timestamp, TxHash, UnitError, Wei};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_OBJECT: &str = "Laptop X";
pub const DEFAULT_PRICE_ETHER: &str = "0.01";
pub const DEFAULT_DEADLINE_MINUTES: u64 = 60;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no agreement has been deployed yet")]
    NotDeployed,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error(transparent)]
    Unit(#[from] UnitError),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployRequest {
    pub object: String,
    pub price_ether: String,
    pub deadline_minutes: u64,
}

impl Default for DeployRequest {
    fn default() -> Self {
        Self {
            object: DEFAULT_OBJECT.to_string(),
            price_ether: DEFAULT_PRICE_ETHER.to_string(),
            deadline_minutes: DEFAULT_DEADLINE_MINUTES,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Seller,
    Buyer,
}

/// How an action result should be presented. A buyer's failed follow-up
/// signature or cancellation is expected and only informational.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Info,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub actor: Party,
    pub action: Call,
    pub success: bool,
    pub severity: Severity,
    pub tx_hash: Option<TxHash>,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementSnapshot {
    pub address: Address,
    pub status: AgreementStatus,
    pub status_code: u8,
    pub status_name: String,
    pub object: String,
    pub seller: Address,
    pub buyer: Address,
    #[serde(with = "u128_string")]
    pub price_wei: Wei,
    pub price_ether: String,
    pub deadline: Timestamp,
    pub time_remaining: u64,
    #[serde(with = "u128_string")]
    pub balance_wei: Wei,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub address: Address,
    #[serde(with = "u128_string")]
    pub balance_wei: Wei,
    pub balance_ether: String,
    pub nonce: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountsOverview {
    pub seller: Address,
    pub buyer: Address,
    #[serde(with = "u128_string")]
    pub gas_price_wei: Wei,
    pub block_gas_limit: u64,
    pub accounts: Vec<AccountInfo>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClauseMapping {
    pub clause: String,
    pub code: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Explanation {
    pub title: String,
    pub agreement_text: String,
    pub mapping: Vec<ClauseMapping>,
}

const AGREEMENT_TEXT: &str = "\
Basic sale agreement with payment and delivery confirmation

1. Parties: Seller (A) and Buyer (B).
2. Object: delivery of the good or service described as OBJECT.
3. Price: PRICE, payable in a single payment.
4. Term: the operation must be completed before the DEADLINE.
5. Flow:
   a) Both parties sign the agreement.
   b) The Buyer pays the price.
   c) The Buyer confirms delivery.
   d) After confirmation, the Seller receives the funds.
6. Cancellation: if cancelled before completion, funds are returned to the Buyer.
";

const CLAUSE_MAPPING: &[(&str, &str)] = &[
    ("Parties (A/B)", "seller and buyer addresses on the chain"),
    ("Object", "object string; describes the good, does not guarantee physical delivery"),
    ("Price", "price_wei; pay() requires the exact amount"),
    ("Term", "deadline compared with the block timestamp"),
    ("States", "Draft -> Active -> Resolved or Cancelled"),
    ("Sign", "sign() moves to Active; caller must be a party and within the term"),
    ("Payment", "pay() holds the funds in the contract (escrow)"),
    ("Confirmation", "confirm_delivery() releases the funds to the seller"),
    ("Cancellation", "cancel() refunds the buyer if there is a balance"),
    ("Events", "emitted on every transition for auditing"),
    ("Guarantees", "require checks revert the whole transaction"),
];

pub fn explain() -> Explanation {
    Explanation {
        title: "Purchase escrow: from agreement text to contract".to_string(),
        agreement_text: AGREEMENT_TEXT.to_string(),
        mapping: CLAUSE_MAPPING
            .iter()
            .map(|(clause, code)| ClauseMapping {
                clause: clause.to_string(),
                code: code.to_string(),
            })
            .collect(),
    }
}

pub struct Session {
    chain: TestChain,
    seller: Address,
    buyer: Address,
    agreement: Option<Address>,
}

impl Session {
    pub fn new(chain: TestChain) -> Result<Self, SessionError> {
        let (seller, buyer) = match chain.accounts() {
            [seller, buyer, ..] => (*seller, *buyer),
            _ => {
                return Err(SessionError::InvalidParameter(
                    "the chain needs at least two accounts".to_string(),
                ))
            }
        };
        Ok(Self {
            chain,
            seller,
            buyer,
            agreement: None,
        })
    }

    pub fn chain(&self) -> &TestChain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut TestChain {
        &mut self.chain
    }

    pub fn seller(&self) -> Address {
        self.seller
    }

    pub fn buyer(&self) -> Address {
        self.buyer
    }

    pub fn agreement_address(&self) -> Option<Address> {
        self.agreement
    }

    fn deployed(&self) -> Result<Address, SessionError> {
        self.agreement.ok_or(SessionError::NotDeployed)
    }

    pub fn accounts(&self) -> AccountsOverview {
        let config = self.chain.config();
        AccountsOverview {
            seller: self.seller,
            buyer: self.buyer,
            gas_price_wei: config.gas_price,
            block_gas_limit: config.block_gas_limit,
            accounts: self
                .chain
                .accounts()
                .iter()
                .map(|addr| {
                    let balance = self.chain.balance(*addr);
                    AccountInfo {
                        address: *addr,
                        balance_wei: balance,
                        balance_ether: format_ether(balance),
                        nonce: self.chain.nonce(*addr),
                    }
                })
                .collect(),
        }
    }

    /// Deploys a fresh agreement from the seller. Replaces any earlier one.
    pub fn deploy(&mut self, request: DeployRequest) -> Result<Receipt, SessionError> {
        if request.deadline_minutes < 1 {
            return Err(SessionError::InvalidParameter(
                "deadline_minutes must be at least 1".to_string(),
            ));
        }
        let price_wei = to_wei(&request.price_ether)?;
        let deadline = request
            .deadline_minutes
            .checked_mul(60)
            .and_then(|secs| self.chain.pending_timestamp().checked_add(secs))
            .ok_or_else(|| {
                SessionError::InvalidParameter("deadline_minutes is too large".to_string())
            })?;

        let receipt = self.chain.deploy(
            self.seller,
            DeployParams {
                buyer: self.buyer,
                object: request.object,
                price_wei,
                deadline,
            },
        )?;
        self.agreement = receipt.contract_address;
        info!(
            address = ?self.agreement,
            price = %format_ether(price_wei),
            deadline,
            "agreement ready"
        );
        Ok(receipt)
    }

    pub fn snapshot(&self) -> Result<AgreementSnapshot, SessionError> {
        let address = self.deployed()?;
        let agreement = self.chain.agreement(address)?;
        let time_remaining = match self.chain.call_view(address, View::TimeRemaining)? {
            ViewValue::Uint(secs) => u64::try_from(secs).unwrap_or(u64::MAX),
            _ => 0,
        };
        let status = agreement.status();
        Ok(AgreementSnapshot {
            address,
            status,
            status_code: status.code(),
            status_name: status.name().to_string(),
            object: agreement.object().to_string(),
            seller: agreement.seller(),
            buyer: agreement.buyer(),
            price_wei: agreement.price_wei(),
            price_ether: format_ether(agreement.price_wei()),
            deadline: agreement.deadline(),
            time_remaining,
            balance_wei: self.chain.balance(address),
        })
    }

    pub fn view(&self, view: View) -> Result<ViewValue, SessionError> {
        let address = self.deployed()?;
        Ok(self.chain.call_view(address, view)?)
    }

    pub fn events(&self) -> Result<Vec<LogEntry>, SessionError> {
        Ok(self.chain.logs(self.deployed()?))
    }

    /// Seller signs, then buyer signs. Only the first succeeds on a fresh agreement.
    pub fn sign(&mut self) -> Result<Vec<ActionOutcome>, SessionError> {
        let contract = self.deployed()?;
        Ok(vec![
            self.act(contract, Party::Seller, Call::Sign, 0, Severity::Error),
            self.act(contract, Party::Buyer, Call::Sign, 0, Severity::Info),
        ])
    }

    /// Buyer pays exactly the agreed price.
    pub fn pay(&mut self) -> Result<Vec<ActionOutcome>, SessionError> {
        let contract = self.deployed()?;
        let price = self.chain.agreement(contract)?.price_wei();
        Ok(vec![self.act(
            contract,
            Party::Buyer,
            Call::Pay,
            price,
            Severity::Error,
        )])
    }

    pub fn confirm_delivery(&mut self) -> Result<Vec<ActionOutcome>, SessionError> {
        let contract = self.deployed()?;
        Ok(vec![self.act(
            contract,
            Party::Buyer,
            Call::ConfirmDelivery,
            0,
            Severity::Error,
        )])
    }

    /// Seller cancels, then buyer cancels; whichever runs second is expected to fail.
    pub fn cancel(&mut self) -> Result<Vec<ActionOutcome>, SessionError> {
        let contract = self.deployed()?;
        Ok(vec![
            self.act(contract, Party::Seller, Call::Cancel, 0, Severity::Info),
            self.act(contract, Party::Buyer, Call::Cancel, 0, Severity::Info),
        ])
    }

    fn act(
        &mut self,
        contract: Address,
        actor: Party,
        call: Call,
        value: Wei,
        on_failure: Severity,
    ) -> ActionOutcome {
        let from = match actor {
            Party::Seller => self.seller,
            Party::Buyer => self.buyer,
        };
        match self.chain.transact(from, contract, call, value) {
            Ok(receipt) if receipt.is_success() => ActionOutcome {
                actor,
                action: call,
                success: true,
                severity: Severity::Success,
                tx_hash: Some(receipt.tx_hash),
                message: success_message(actor, call),
            },
            Ok(receipt) => ActionOutcome {
                actor,
                action: call,
                success: false,
                severity: on_failure,
                tx_hash: Some(receipt.tx_hash),
                message: format!(
                    "reverted: {}",
                    receipt.revert_reason.unwrap_or_default()
                ),
            },
            Err(err) => {
                warn!(?actor, call = call.name(), error = %err, "transaction rejected");
                ActionOutcome {
                    actor,
                    action: call,
                    success: false,
                    severity: on_failure,
                    tx_hash: None,
                    message: err.to_string(),
                }
            }
        }
    }
}

fn success_message(actor: Party, call: Call) -> String {
    let who = match actor {
        Party::Seller => "seller",
        Party::Buyer => "buyer",
    };
    match call {
        Call::Sign => format!("agreement signed by {who}"),
        Call::Pay => "payment made by the buyer".to_string(),
        Call::ConfirmDelivery => "delivery confirmed, funds released to the seller".to_string(),
        Call::Cancel => format!("cancellation requested by {who}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainConfig;
    use crate::clock::ManualClock;
    use crate::types::ether;
    use std::sync::Arc;

    const START: Timestamp = 1_700_000_000;

    fn session() -> Session {
        let config = ChainConfig {
            gas_price: 0,
            ..ChainConfig::default()
        };
        let chain = TestChain::new(config, Arc::new(ManualClock::new(START)));
        Session::new(chain).unwrap()
    }

    #[test]
    fn actions_require_deployment() {
        let mut s = session();
        assert!(matches!(s.snapshot(), Err(SessionError::NotDeployed)));
        assert!(matches!(s.sign(), Err(SessionError::NotDeployed)));
        assert!(matches!(s.events(), Err(SessionError::NotDeployed)));
    }

    #[test]
    fn needs_two_accounts() {
        let config = ChainConfig {
            account_count: 1,
            ..ChainConfig::default()
        };
        let chain = TestChain::new(config, Arc::new(ManualClock::new(START)));
        assert!(matches!(
            Session::new(chain),
            Err(SessionError::InvalidParameter(_))
        ));
    }

    #[test]
    fn deploy_validates_request() {
        let mut s = session();
        let err = s
            .deploy(DeployRequest {
                deadline_minutes: 0,
                ..DeployRequest::default()
            })
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidParameter(_)));

        let err = s
            .deploy(DeployRequest {
                price_ether: "-1".to_string(),
                ..DeployRequest::default()
            })
            .unwrap_err();
        assert!(matches!(err, SessionError::Unit(UnitError::Negative)));
        assert!(s.agreement_address().is_none());
    }

    #[test]
    fn snapshot_reflects_deploy_parameters() {
        let mut s = session();
        s.deploy(DeployRequest::default()).unwrap();
        let snap = s.snapshot().unwrap();
        assert_eq!(snap.status, AgreementStatus::Draft);
        assert_eq!(snap.status_code, 0);
        assert_eq!(snap.object, DEFAULT_OBJECT);
        assert_eq!(snap.price_ether, "0.01");
        assert_eq!(snap.seller, s.seller());
        assert_eq!(snap.buyer, s.buyer());
        // deployed in block 1 at START + 1, snapshot reads the pending block
        assert_eq!(snap.deadline, START + 1 + 3600);
        assert_eq!(snap.time_remaining, 3600 - 1);
    }

    #[test]
    fn sign_reports_buyer_as_info() {
        let mut s = session();
        s.deploy(DeployRequest::default()).unwrap();
        let outcomes = s.sign().unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].success);
        assert_eq!(outcomes[0].actor, Party::Seller);
        assert!(!outcomes[1].success);
        assert_eq!(outcomes[1].severity, Severity::Info);
        assert_eq!(outcomes[1].message, "reverted: not in draft");
        assert_eq!(s.snapshot().unwrap().status, AgreementStatus::Active);
    }

    #[test]
    fn full_escrow_cycle() {
        let mut s = session();
        s.deploy(DeployRequest::default()).unwrap();
        s.sign().unwrap();
        assert!(s.pay().unwrap()[0].success);
        assert_eq!(s.snapshot().unwrap().balance_wei, to_wei("0.01").unwrap());

        let confirm = s.confirm_delivery().unwrap();
        assert!(confirm[0].success);
        let snap = s.snapshot().unwrap();
        assert_eq!(snap.status, AgreementStatus::Resolved);
        assert_eq!(snap.balance_wei, 0);
        assert_eq!(
            s.chain().balance(s.seller()),
            ether(1_000_000) + to_wei("0.01").unwrap()
        );
        assert_eq!(s.events().unwrap().len(), 3);
    }

    #[test]
    fn cancel_refunds_buyer() {
        let mut s = session();
        s.deploy(DeployRequest::default()).unwrap();
        s.sign().unwrap();
        s.pay().unwrap();
        let outcomes = s.cancel().unwrap();
        assert!(outcomes[0].success);
        assert!(!outcomes[1].success);
        assert_eq!(outcomes[1].message, "reverted: not cancellable");
        assert_eq!(s.chain().balance(s.buyer()), ether(1_000_000));
        assert_eq!(s.snapshot().unwrap().status, AgreementStatus::Cancelled);
    }

    #[test]
    fn explain_lists_every_clause() {
        let e = explain();
        assert!(e.agreement_text.contains("Cancellation"));
        assert_eq!(e.mapping.len(), CLAUSE_MAPPING.len());
    }
}
