//! The purchase agreement contract.
//!
//! A seller deploys the agreement naming a buyer, an object, a price and a
//! deadline. Either party signs it to activate it, the buyer pays the exact
//! price into escrow, and then either the buyer confirms delivery (funds go to
//! the seller) or a party cancels (funds go back to the buyer).
//!
//! The contract never touches chain state directly. [`PurchaseAgreement::execute`]
//! validates a message against an [`ExecutionContext`] and returns the events
//! and outbound transfers it wants; the chain applies them atomically or
//! discards everything on [`Revert`].

use crate::types::{u128_string, Address, Timestamp, Wei};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgreementStatus {
    Draft,
    Active,
    Resolved,
    Cancelled,
}

impl AgreementStatus {
    pub fn code(self) -> u8 {
        match self {
            AgreementStatus::Draft => 0,
            AgreementStatus::Active => 1,
            AgreementStatus::Resolved => 2,
            AgreementStatus::Cancelled => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AgreementStatus::Draft => "Draft",
            AgreementStatus::Active => "Active",
            AgreementStatus::Resolved => "Resolved",
            AgreementStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AgreementStatus::Resolved | AgreementStatus::Cancelled)
    }
}

/// Constructor arguments. The seller is always the deploying account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployParams {
    pub buyer: Address,
    pub object: String,
    #[serde(with = "u128_string")]
    pub price_wei: Wei,
    pub deadline: Timestamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Call {
    Sign,
    Pay,
    ConfirmDelivery,
    Cancel,
}

impl Call {
    pub fn is_payable(self) -> bool {
        matches!(self, Call::Pay)
    }

    pub fn name(self) -> &'static str {
        match self {
            Call::Sign => "sign",
            Call::Pay => "pay",
            Call::ConfirmDelivery => "confirm_delivery",
            Call::Cancel => "cancel",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    Seller,
    Buyer,
    Object,
    PriceWei,
    Deadline,
    Status,
    TimeRemaining,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ViewValue {
    Address(Address),
    Text(String),
    Uint(#[serde(with = "u128_string")] u128),
    Status(AgreementStatus),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum AgreementEvent {
    Signed { seller: Address, buyer: Address },
    Paid {
        from: Address,
        #[serde(with = "u128_string")]
        amount: Wei,
    },
    DeliveryConfirmed { by: Address },
    Cancelled {
        by: Address,
        #[serde(with = "u128_string")]
        refund: Wei,
    },
}

/// A failed `require`: the whole message is rolled back.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("reverted: {0}")]
pub struct Revert(pub String);

impl Revert {
    pub fn reason(&self) -> &str {
        &self.0
    }
}

fn require(condition: bool, reason: &str) -> Result<(), Revert> {
    if condition {
        Ok(())
    } else {
        Err(Revert(reason.to_string()))
    }
}

/// What the chain knows about the message being executed.
#[derive(Clone, Copy, Debug)]
pub struct ExecutionContext {
    pub sender: Address,
    pub value: Wei,
    pub timestamp: Timestamp,
    /// Contract balance with `value` already credited.
    pub balance: Wei,
}

/// Value the contract sends out. `failure` is the revert reason if the
/// chain cannot deliver it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transfer {
    pub to: Address,
    pub amount: Wei,
    pub failure: &'static str,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Effects {
    pub events: Vec<AgreementEvent>,
    pub transfers: Vec<Transfer>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseAgreement {
    seller: Address,
    buyer: Address,
    object: String,
    #[serde(with = "u128_string")]
    price_wei: Wei,
    deadline: Timestamp,
    status: AgreementStatus,
}

impl PurchaseAgreement {
    pub fn deploy(seller: Address, params: DeployParams) -> Self {
        Self {
            seller,
            buyer: params.buyer,
            object: params.object,
            price_wei: params.price_wei,
            deadline: params.deadline,
            status: AgreementStatus::Draft,
        }
    }

    pub fn seller(&self) -> Address {
        self.seller
    }

    pub fn buyer(&self) -> Address {
        self.buyer
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    pub fn price_wei(&self) -> Wei {
        self.price_wei
    }

    pub fn deadline(&self) -> Timestamp {
        self.deadline
    }

    pub fn status(&self) -> AgreementStatus {
        self.status
    }

    pub fn time_remaining(&self, now: Timestamp) -> u64 {
        self.deadline.saturating_sub(now)
    }

    fn is_party(&self, who: Address) -> bool {
        who == self.seller || who == self.buyer
    }

    /// Runs one message. On `Err` the agreement may be partially updated, so
    /// callers execute against a copy and keep it only on success.
    pub fn execute(&mut self, call: Call, ctx: &ExecutionContext) -> Result<Effects, Revert> {
        require(call.is_payable() || ctx.value == 0, "non-payable function")?;
        match call {
            Call::Sign => self.sign(ctx),
            Call::Pay => self.pay(ctx),
            Call::ConfirmDelivery => self.confirm_delivery(ctx),
            Call::Cancel => self.cancel(ctx),
        }
    }

    fn sign(&mut self, ctx: &ExecutionContext) -> Result<Effects, Revert> {
        require(self.is_party(ctx.sender), "only parties")?;
        require(self.status == AgreementStatus::Draft, "not in draft")?;
        require(ctx.timestamp < self.deadline, "deadline passed")?;

        self.status = AgreementStatus::Active;
        Ok(Effects {
            events: vec![AgreementEvent::Signed {
                seller: self.seller,
                buyer: self.buyer,
            }],
            transfers: Vec::new(),
        })
    }

    fn pay(&mut self, ctx: &ExecutionContext) -> Result<Effects, Revert> {
        require(self.status == AgreementStatus::Active, "not active")?;
        require(ctx.sender == self.buyer, "only buyer")?;
        require(ctx.value == self.price_wei, "incorrect amount")?;

        Ok(Effects {
            events: vec![AgreementEvent::Paid {
                from: ctx.sender,
                amount: ctx.value,
            }],
            transfers: Vec::new(),
        })
    }

    fn confirm_delivery(&mut self, ctx: &ExecutionContext) -> Result<Effects, Revert> {
        require(self.status == AgreementStatus::Active, "not active")?;
        require(ctx.sender == self.buyer, "only buyer")?;

        self.status = AgreementStatus::Resolved;
        Ok(Effects {
            events: vec![AgreementEvent::DeliveryConfirmed { by: ctx.sender }],
            transfers: vec![Transfer {
                to: self.seller,
                amount: ctx.balance,
                failure: "seller payout failed",
            }],
        })
    }

    fn cancel(&mut self, ctx: &ExecutionContext) -> Result<Effects, Revert> {
        require(self.is_party(ctx.sender), "only parties")?;
        require(
            matches!(
                self.status,
                AgreementStatus::Active | AgreementStatus::Draft
            ),
            "not cancellable",
        )?;

        self.status = AgreementStatus::Cancelled;
        let refund = ctx.balance;
        let mut transfers = Vec::new();
        if refund > 0 {
            transfers.push(Transfer {
                to: self.buyer,
                amount: refund,
                failure: "refund failed",
            });
        }
        Ok(Effects {
            events: vec![AgreementEvent::Cancelled {
                by: ctx.sender,
                refund,
            }],
            transfers,
        })
    }

    pub fn view(&self, view: View, now: Timestamp) -> ViewValue {
        match view {
            View::Seller => ViewValue::Address(self.seller),
            View::Buyer => ViewValue::Address(self.buyer),
            View::Object => ViewValue::Text(self.object.clone()),
            View::PriceWei => ViewValue::Uint(self.price_wei),
            View::Deadline => ViewValue::Uint(self.deadline as u128),
            View::Status => ViewValue::Status(self.status),
            View::TimeRemaining => ViewValue::Uint(self.time_remaining(now) as u128),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SELLER: Address = Address([1; 20]);
    const BUYER: Address = Address([2; 20]);
    const STRANGER: Address = Address([3; 20]);
    const PRICE: Wei = 10_000;
    const DEADLINE: Timestamp = 1_000;

    fn agreement() -> PurchaseAgreement {
        PurchaseAgreement::deploy(
            SELLER,
            DeployParams {
                buyer: BUYER,
                object: "Laptop X".to_string(),
                price_wei: PRICE,
                deadline: DEADLINE,
            },
        )
    }

    fn ctx(sender: Address, value: Wei, timestamp: Timestamp, balance: Wei) -> ExecutionContext {
        ExecutionContext {
            sender,
            value,
            timestamp,
            balance,
        }
    }

    fn active() -> PurchaseAgreement {
        let mut a = agreement();
        a.execute(Call::Sign, &ctx(SELLER, 0, 10, 0)).unwrap();
        a
    }

    #[test]
    fn deploy_starts_in_draft() {
        let a = agreement();
        assert_eq!(a.status(), AgreementStatus::Draft);
        assert_eq!(a.seller(), SELLER);
        assert_eq!(a.buyer(), BUYER);
        assert_eq!(a.object(), "Laptop X");
    }

    #[test]
    fn either_party_activates() {
        for signer in [SELLER, BUYER] {
            let mut a = agreement();
            let effects = a.execute(Call::Sign, &ctx(signer, 0, 10, 0)).unwrap();
            assert_eq!(a.status(), AgreementStatus::Active);
            assert_eq!(
                effects.events,
                vec![AgreementEvent::Signed {
                    seller: SELLER,
                    buyer: BUYER
                }]
            );
        }
    }

    #[test]
    fn second_signature_reverts() {
        let mut a = active();
        let err = a.execute(Call::Sign, &ctx(BUYER, 0, 11, 0)).unwrap_err();
        assert_eq!(err.reason(), "not in draft");
    }

    #[test]
    fn sign_guards() {
        let mut a = agreement();
        let err = a.execute(Call::Sign, &ctx(STRANGER, 0, 10, 0)).unwrap_err();
        assert_eq!(err.reason(), "only parties");

        let err = a.execute(Call::Sign, &ctx(SELLER, 0, DEADLINE, 0)).unwrap_err();
        assert_eq!(err.reason(), "deadline passed");
        assert_eq!(a.status(), AgreementStatus::Draft);
    }

    #[test]
    fn pay_guards() {
        let mut draft = agreement();
        let err = draft.execute(Call::Pay, &ctx(BUYER, PRICE, 10, PRICE)).unwrap_err();
        assert_eq!(err.reason(), "not active");

        let mut a = active();
        let err = a.execute(Call::Pay, &ctx(SELLER, PRICE, 10, PRICE)).unwrap_err();
        assert_eq!(err.reason(), "only buyer");

        let err = a.execute(Call::Pay, &ctx(BUYER, PRICE - 1, 10, PRICE - 1)).unwrap_err();
        assert_eq!(err.reason(), "incorrect amount");

        let effects = a.execute(Call::Pay, &ctx(BUYER, PRICE, 10, PRICE)).unwrap();
        assert_eq!(
            effects.events,
            vec![AgreementEvent::Paid {
                from: BUYER,
                amount: PRICE
            }]
        );
        assert!(effects.transfers.is_empty());
        assert_eq!(a.status(), AgreementStatus::Active);
    }

    #[test]
    fn non_payable_rejects_value() {
        let mut a = agreement();
        let err = a.execute(Call::Sign, &ctx(SELLER, 1, 10, 1)).unwrap_err();
        assert_eq!(err.reason(), "non-payable function");
    }

    #[test]
    fn confirm_pays_whole_balance_to_seller() {
        let mut a = active();
        let effects = a
            .execute(Call::ConfirmDelivery, &ctx(BUYER, 0, 20, 2 * PRICE))
            .unwrap();
        assert_eq!(a.status(), AgreementStatus::Resolved);
        assert_eq!(effects.transfers.len(), 1);
        assert_eq!(effects.transfers[0].to, SELLER);
        assert_eq!(effects.transfers[0].amount, 2 * PRICE);

        let err = a.execute(Call::Cancel, &ctx(BUYER, 0, 21, 0)).unwrap_err();
        assert_eq!(err.reason(), "not cancellable");
    }

    #[test]
    fn confirm_requires_buyer() {
        let mut a = active();
        let err = a
            .execute(Call::ConfirmDelivery, &ctx(SELLER, 0, 20, PRICE))
            .unwrap_err();
        assert_eq!(err.reason(), "only buyer");
    }

    #[test]
    fn cancel_refunds_only_when_funded() {
        let mut draft = agreement();
        let effects = draft.execute(Call::Cancel, &ctx(SELLER, 0, 10, 0)).unwrap();
        assert!(effects.transfers.is_empty());
        assert_eq!(
            effects.events,
            vec![AgreementEvent::Cancelled {
                by: SELLER,
                refund: 0
            }]
        );

        let mut a = active();
        let effects = a.execute(Call::Cancel, &ctx(BUYER, 0, 10, PRICE)).unwrap();
        assert_eq!(a.status(), AgreementStatus::Cancelled);
        assert_eq!(effects.transfers[0].to, BUYER);
        assert_eq!(effects.transfers[0].amount, PRICE);
    }

    #[test]
    fn stranger_cannot_cancel() {
        let mut a = active();
        let err = a.execute(Call::Cancel, &ctx(STRANGER, 0, 10, 0)).unwrap_err();
        assert_eq!(err.reason(), "only parties");
        assert!(!a.status().is_terminal());
    }

    #[test]
    fn time_remaining_saturates() {
        let a = agreement();
        assert_eq!(a.view(View::TimeRemaining, 400), ViewValue::Uint(600));
        assert_eq!(a.view(View::TimeRemaining, DEADLINE), ViewValue::Uint(0));
        assert_eq!(a.view(View::TimeRemaining, DEADLINE + 50), ViewValue::Uint(0));
        assert_eq!(
            a.view(View::Status, 0),
            ViewValue::Status(AgreementStatus::Draft)
        );
    }
}
