// src/bin/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use escrow_simulator::config::{Cli, Command};
use escrow_simulator::demo::{self, Scenario};
use escrow_simulator::{telemetry, DeployRequest, Session, SystemClock, TestChain};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();

    let cli = Cli::parse();
    let config = cli
        .chain
        .to_config()
        .context("invalid --initial-balance-ether")?;

    let listen = cli.command.socket_addr();
    match cli.command {
        Command::Serve { .. } => {
            let addr = listen.context("serve has no listen address")?;
            let chain = TestChain::new(config, Arc::new(SystemClock));
            let session = Session::new(chain)?;
            info!(
                seller = %session.seller(),
                buyer = %session.buyer(),
                "simulated accounts ready"
            );
            escrow_simulator::server::serve(addr, Arc::new(RwLock::new(session))).await
        }
        Command::Demo {
            object,
            price,
            minutes,
        } => {
            let request = DeployRequest {
                object,
                price_ether: price,
                deadline_minutes: minutes,
            };
            for scenario in [Scenario::Settle, Scenario::Cancel] {
                let chain = TestChain::new(config.clone(), Arc::new(SystemClock));
                let report = demo::run(chain, scenario, request.clone())?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Ok(())
        }
    }
}
