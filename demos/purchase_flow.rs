// demos/purchase_flow.rs
use escrow_simulator::agreement::View;
use escrow_simulator::session::ActionOutcome;
use escrow_simulator::*;
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    telemetry::init();

    println!("Purchase escrow on an in-memory test chain");
    println!("==========================================");

    let clock = ManualClock::new(SystemClock.now());
    let chain = TestChain::new(ChainConfig::default(), Arc::new(clock.clone()));
    let mut session = Session::new(chain)?;

    println!("Seller: {}", session.seller());
    println!("Buyer:  {}", session.buyer());

    let receipt = session.deploy(DeployRequest {
        object: "Road bike".to_string(),
        price_ether: "0.25".to_string(),
        deadline_minutes: 30,
    })?;
    println!(
        "\nDeployed at {} (gas {}, fee {} ETH)",
        receipt
            .contract_address
            .map(|a| a.to_string())
            .unwrap_or_default(),
        receipt.gas_used,
        format_ether(receipt.fee)
    );

    type Step = fn(&mut Session) -> Result<Vec<ActionOutcome>, SessionError>;
    let steps: [(&str, Step); 3] = [
        ("sign", Session::sign),
        ("pay", Session::pay),
        ("confirm", Session::confirm_delivery),
    ];
    for (label, step) in steps {
        println!("\n> {label}");
        for outcome in step(&mut session)? {
            let mark = if outcome.success { "ok  " } else { "fail" };
            println!("  [{mark}] {:?}: {}", outcome.actor, outcome.message);
        }
        let snapshot = session.snapshot()?;
        println!(
            "  status={} escrow={} ETH",
            snapshot.status_name,
            format_ether(snapshot.balance_wei)
        );
        clock.advance(60);
    }

    println!(
        "\nTime remaining: {:?}",
        session.view(View::TimeRemaining)?
    );
    println!("\nEvents:");
    for log in session.events()? {
        println!("  block {} {:?}", log.block_number, log.event);
    }
    Ok(())
}
