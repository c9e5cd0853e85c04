//! Scripted walkthroughs of the two ways an agreement can end.

use crate::chain::TestChain;
use crate::session::{ActionOutcome, AgreementSnapshot, DeployRequest, Session, SessionError};
use crate::types::format_ether;
use serde::Serialize;
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// sign, pay, confirm delivery
    Settle,
    /// sign, pay, cancel
    Cancel,
}

#[derive(Clone, Debug, Serialize)]
pub struct DemoReport {
    pub scenario: Scenario,
    pub outcomes: Vec<ActionOutcome>,
    pub final_state: AgreementSnapshot,
    pub seller_balance: String,
    pub buyer_balance: String,
}

pub fn run(
    chain: TestChain,
    scenario: Scenario,
    request: DeployRequest,
) -> Result<DemoReport, SessionError> {
    let mut session = Session::new(chain)?;
    info!(
        ?scenario,
        seller = %session.seller(),
        buyer = %session.buyer(),
        "starting scenario"
    );

    session.deploy(request)?;
    let mut outcomes = session.sign()?;
    outcomes.extend(session.pay()?);
    match scenario {
        Scenario::Settle => outcomes.extend(session.confirm_delivery()?),
        Scenario::Cancel => outcomes.extend(session.cancel()?),
    }

    for outcome in &outcomes {
        info!(
            actor = ?outcome.actor,
            action = outcome.action.name(),
            success = outcome.success,
            "{}",
            outcome.message
        );
    }

    let final_state = session.snapshot()?;
    let seller_balance = format_ether(session.chain().balance(session.seller()));
    let buyer_balance = format_ether(session.chain().balance(session.buyer()));
    info!(
        status = final_state.status.name(),
        seller = %seller_balance,
        buyer = %buyer_balance,
        "scenario finished"
    );

    Ok(DemoReport {
        scenario,
        outcomes,
        final_state,
        seller_balance,
        buyer_balance,
    })
}
