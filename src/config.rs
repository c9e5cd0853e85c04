use crate::chain::{ChainConfig, DEFAULT_BLOCK_GAS_LIMIT};
use crate::session::{DEFAULT_DEADLINE_MINUTES, DEFAULT_OBJECT, DEFAULT_PRICE_ETHER};
use crate::types::{to_wei, UnitError, Wei, WEI_PER_GWEI};
use clap::{Args, Parser, Subcommand};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[derive(Parser, Debug)]
#[command(name = "escrow-sim", version, about = "Purchase escrow agreement on an in-memory test chain")]
pub struct Cli {
    #[command(flatten)]
    pub chain: ChainArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct ChainArgs {
    /// Number of pre-funded accounts. The first two are seller and buyer.
    #[arg(long, env = "ESCROW_SIM_ACCOUNTS", default_value_t = 10, global = true)]
    pub accounts: usize,

    /// Starting balance of every account, in ether.
    #[arg(long, env = "ESCROW_SIM_INITIAL_BALANCE", default_value = "1000000", global = true)]
    pub initial_balance_ether: String,

    #[arg(long, env = "ESCROW_SIM_GAS_PRICE", default_value_t = WEI_PER_GWEI, global = true)]
    pub gas_price_wei: Wei,

    /// Gas ceiling for any single transaction.
    #[arg(
        long,
        env = "ESCROW_SIM_BLOCK_GAS_LIMIT",
        default_value_t = DEFAULT_BLOCK_GAS_LIMIT,
        global = true
    )]
    pub block_gas_limit: u64,

    /// Derive accounts from a random seed instead of the fixed one.
    #[arg(long, global = true)]
    pub random_accounts: bool,
}

impl ChainArgs {
    pub fn to_config(&self) -> Result<ChainConfig, UnitError> {
        Ok(ChainConfig {
            account_count: self.accounts,
            initial_balance: to_wei(&self.initial_balance_ether)?,
            gas_price: self.gas_price_wei,
            block_gas_limit: self.block_gas_limit,
            account_seed: if self.random_accounts {
                rand::random()
            } else {
                0
            },
        })
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP API.
    Serve {
        #[arg(long, env = "ESCROW_SIM_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
        host: IpAddr,
        #[arg(long, env = "ESCROW_SIM_PORT", default_value_t = 8080)]
        port: u16,
    },
    /// Walk through the settle and cancel scenarios and log every step.
    Demo {
        #[arg(long, default_value = DEFAULT_OBJECT)]
        object: String,
        #[arg(long, default_value = DEFAULT_PRICE_ETHER)]
        price: String,
        #[arg(long, default_value_t = DEFAULT_DEADLINE_MINUTES)]
        minutes: u64,
    },
}

impl Command {
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Command::Serve { host, port } => Some(SocketAddr::new(*host, *port)),
            Command::Demo { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ether;

    #[test]
    fn defaults_match_chain_defaults() {
        let cli = Cli::try_parse_from(["escrow-sim", "demo"]).unwrap();
        assert_eq!(cli.chain.to_config().unwrap(), ChainConfig::default());
        match cli.command {
            Command::Demo {
                object,
                price,
                minutes,
            } => {
                assert_eq!(object, DEFAULT_OBJECT);
                assert_eq!(price, DEFAULT_PRICE_ETHER);
                assert_eq!(minutes, DEFAULT_DEADLINE_MINUTES);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn serve_flags() {
        let cli = Cli::try_parse_from([
            "escrow-sim",
            "serve",
            "--port",
            "9000",
            "--accounts",
            "3",
            "--initial-balance-ether",
            "5.5",
            "--gas-price-wei",
            "0",
            "--block-gas-limit",
            "500000",
        ])
        .unwrap();
        assert_eq!(
            cli.command.socket_addr(),
            Some("127.0.0.1:9000".parse().unwrap())
        );
        let config = cli.chain.to_config().unwrap();
        assert_eq!(config.account_count, 3);
        assert_eq!(config.initial_balance, ether(5) + ether(1) / 2);
        assert_eq!(config.gas_price, 0);
        assert_eq!(config.block_gas_limit, 500_000);
    }

    #[test]
    fn bad_balance_is_reported() {
        let cli =
            Cli::try_parse_from(["escrow-sim", "demo", "--initial-balance-ether", "lots"]).unwrap();
        assert!(cli.chain.to_config().is_err());
    }
}
