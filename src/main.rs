use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dam_core::{
    events, format_units, logic_for_version, parse_units, AccountId, Amount, MarketEvent,
    ProxyBuilder,
};

mod config;
mod identity;
mod state;

use config::MarketConfig;
use identity::Identity;
use state::{Session, StateFile};

#[derive(Parser, Debug)]
#[command(name = "dam", version)]
#[command(about = "Digital asset market: list, buy and withdraw against an upgradeable ledger")]
struct Cli {
    /// JSON config file
    #[arg(long, env = "DAM_CONFIG")]
    config: Option<PathBuf>,

    /// State file (overrides config and DAM_STATE_PATH)
    #[arg(long)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Args, Debug)]
struct CallerArgs {
    /// Caller's ed25519 secret key in hex, as printed by `keygen`
    #[arg(long, env = "DAM_SECRET", hide_env_values = true)]
    secret: String,
}

impl CallerArgs {
    fn account(&self) -> Result<AccountId> {
        Ok(Identity::from_secret_hex(&self.secret)?.account())
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate an ed25519 keypair and print the derived account id
    Keygen,
    /// Deploy a fresh market behind a proxy; the caller becomes admin and owner
    Deploy {
        #[command(flatten)]
        caller: CallerArgs,
        #[arg(long)]
        share_percent: Option<u32>,
        #[arg(long, default_value_t = 0)]
        salt: u64,
    },
    /// Credit an external account (decimal units)
    Fund {
        #[arg(long)]
        account: String,
        #[arg(long)]
        amount: String,
    },
    /// List an asset for sale
    AddAsset {
        #[command(flatten)]
        caller: CallerArgs,
        #[arg(long)]
        name: String,
        #[arg(long)]
        price: String,
    },
    /// Read an asset record (owner only)
    AssetData {
        #[command(flatten)]
        caller: CallerArgs,
        #[arg(long)]
        index: u64,
    },
    /// Buy an asset by attaching exactly its price
    Buy {
        #[command(flatten)]
        caller: CallerArgs,
        #[arg(long)]
        index: u64,
        #[arg(long)]
        value: String,
    },
    /// Withdraw market funds to the owner
    Withdraw {
        #[command(flatten)]
        caller: CallerArgs,
        #[arg(long)]
        amount: String,
    },
    /// Reclaim an unsold asset (logic version 2)
    WithdrawAsset {
        #[command(flatten)]
        caller: CallerArgs,
        #[arg(long)]
        index: u64,
    },
    /// Swap the market logic, keeping storage and address
    Upgrade {
        #[command(flatten)]
        caller: CallerArgs,
        #[arg(long)]
        to: u32,
        /// Run initialize with this share percent as part of the upgrade.
        /// A deployed market is already initialized, so the upgrade then
        /// fails with "already initialized" and the old logic stays active.
        #[arg(long)]
        init_share_percent: Option<u32>,
    },
    /// Print market summary
    Status,
    /// Print the external balance and ledger history of an account
    BalanceOf {
        #[arg(long)]
        account: String,
    },
}

fn amount_arg(name: &str, value: &str) -> Result<Amount> {
    parse_units(value).with_context(|| format!("invalid --{name}"))
}

fn print_events(events: &[MarketEvent]) -> Result<()> {
    for event in events {
        println!("event {}", serde_json::to_string(event)?);
    }
    Ok(())
}

fn keygen_cmd() {
    let identity = Identity::generate();
    println!("secret  {}", identity.secret_hex());
    println!("account {}", identity.account());
}

fn deploy_cmd(
    config: &MarketConfig,
    admin: AccountId,
    share_percent: Option<u32>,
    salt: u64,
) -> Result<()> {
    let (_lock, mut state) = StateFile::load_locked(&config.state_path)?;
    if let Some(existing) = &state.market {
        bail!("a market is already deployed at {}", existing.address);
    }
    let share_percent = share_percent.unwrap_or(config.share_percent);
    let logic = logic_for_version(1, config.strict_share_percent).context("logic version 1")?;

    let ledger = Arc::new(parking_lot::Mutex::new(std::mem::take(&mut state.accounts)));
    let proxy = ProxyBuilder::new(admin, ledger.clone())
        .salt(salt)
        .event_capacity(config.event_capacity)
        .deploy(logic, share_percent)?;
    println!(
        "deployed market {} (owner {}, share {}%)",
        proxy.address(),
        proxy.admin(),
        share_percent
    );
    Session { proxy, ledger }.into_state().save(&config.state_path)
}

fn fund_cmd(config: &MarketConfig, account: &str, amount: &str) -> Result<()> {
    let amount = amount_arg("amount", amount)?;
    let (_lock, mut state) = StateFile::load_locked(&config.state_path)?;
    state
        .accounts
        .deposit(&account.to_string(), amount, Some("cli fund".into()))?;
    println!(
        "{account}: {}",
        format_units(state.accounts.balance(&account.to_string()))
    );
    state.save(&config.state_path)
}

fn balance_of_cmd(config: &MarketConfig, account: &str) -> Result<()> {
    let state = StateFile::load(&config.state_path)?;
    let account = account.to_string();
    println!("{account}: {}", format_units(state.accounts.balance(&account)));
    for entry in state.accounts.journal().iter().filter(|e| e.involves(&account)) {
        println!("  {}", serde_json::to_string(entry)?);
    }
    Ok(())
}

fn status_cmd(config: &MarketConfig) -> Result<()> {
    let session = Session::open(StateFile::load(&config.state_path)?, config)?;
    let proxy = &session.proxy;
    let ledger = session.ledger.lock().snapshot();
    println!("address        {}", proxy.address());
    println!("admin          {}", proxy.admin());
    println!("owner          {}", proxy.owner().unwrap_or_default());
    println!("logic version  {}", proxy.version());
    println!("share percent  {}", proxy.share_percent());
    println!("assets         {}", proxy.assets_count());
    println!("balance        {}", format_units(proxy.balance()));
    println!("escrow funds   {}", format_units(proxy.escrow_balance()));
    println!("storage digest {}", hex::encode(proxy.storage_digest()));
    println!("ledger root    {}", hex::encode(ledger.root));
    println!("ledger journal {} entries", ledger.journal_len);
    Ok(())
}

/// Run one market call against the persisted state and save on success.
///
/// The state lock is held from load through save, so overlapping
/// invocations on one state file run one after another.
fn with_session<T>(
    config: &MarketConfig,
    call: impl FnOnce(&Session) -> Result<T>,
) -> Result<T> {
    let (_lock, state) = StateFile::load_locked(&config.state_path)?;
    let session = Session::open(state, config)?;
    let mut rx = session.proxy.events().subscribe();
    let out = call(&session)?;
    print_events(&events::drain(&mut rx))?;
    session.into_state().save(&config.state_path)?;
    Ok(out)
}

fn run(cli: Cli) -> Result<()> {
    let mut config = MarketConfig::load(cli.config.as_deref())?;
    if let Some(state) = cli.state {
        config.state_path = state;
    }
    info!(state = %config.state_path.display(), "using state file");

    match cli.cmd {
        Command::Keygen => {
            keygen_cmd();
            Ok(())
        }
        Command::Deploy {
            caller,
            share_percent,
            salt,
        } => deploy_cmd(&config, caller.account()?, share_percent, salt),
        Command::Fund { account, amount } => fund_cmd(&config, &account, &amount),
        Command::BalanceOf { account } => balance_of_cmd(&config, &account),
        Command::Status => status_cmd(&config),
        Command::AddAsset {
            caller,
            name,
            price,
        } => {
            let caller = caller.account()?;
            let price = amount_arg("price", &price)?;
            let index = with_session(&config, |s| Ok(s.proxy.add_asset(&caller, name, price)?))?;
            println!("listed asset #{index}");
            Ok(())
        }
        Command::AssetData { caller, index } => {
            let caller = caller.account()?;
            let data = with_session(&config, |s| Ok(s.proxy.asset_data(&caller, index)?))?;
            println!("{}", serde_json::to_string_pretty(&data)?);
            Ok(())
        }
        Command::Buy {
            caller,
            index,
            value,
        } => {
            let caller = caller.account()?;
            let value = amount_arg("value", &value)?;
            with_session(&config, |s| Ok(s.proxy.buy(&caller, index, value)?))?;
            println!("{caller} bought asset #{index} for {}", format_units(value));
            Ok(())
        }
        Command::Withdraw { caller, amount } => {
            let caller = caller.account()?;
            let amount = amount_arg("amount", &amount)?;
            let remaining = with_session(&config, |s| {
                s.proxy.withdraw(&caller, amount)?;
                Ok(s.proxy.balance())
            })?;
            println!(
                "withdrew {} to {caller}, market balance {}",
                format_units(amount),
                format_units(remaining)
            );
            Ok(())
        }
        Command::WithdrawAsset { caller, index } => {
            let caller = caller.account()?;
            with_session(&config, |s| {
                if !s.proxy.supports("withdraw_asset") {
                    bail!(
                        "logic version {} cannot withdraw assets; upgrade to version 2 first",
                        s.proxy.version()
                    );
                }
                Ok(s.proxy.withdraw_asset(&caller, index)?)
            })?;
            println!("asset #{index} withdrawn by {caller}");
            Ok(())
        }
        Command::Upgrade {
            caller,
            to,
            init_share_percent,
        } => {
            let caller = caller.account()?;
            let logic = logic_for_version(to, config.strict_share_percent)
                .with_context(|| format!("unknown logic version {to}"))?;
            let address = with_session(&config, |s| {
                s.proxy.upgrade(&caller, logic, init_share_percent)?;
                Ok(s.proxy.address().clone())
            })?;
            println!("market {address} now runs logic version {to}");
            Ok(())
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("dam").chain(args.iter().copied())).unwrap()
    }

    fn run_in(path: &std::path::Path, args: &[&str]) -> Result<()> {
        let mut full = vec!["--state", path.to_str().unwrap()];
        full.extend_from_slice(args);
        run(cli(&full))
    }

    /// Deterministic identity: (secret hex, account id).
    fn key(seed: u8) -> (String, AccountId) {
        let identity = Identity::from_secret_hex(&hex::encode([seed; 32])).unwrap();
        (identity.secret_hex(), identity.account())
    }

    #[test]
    fn parses_buy_command() {
        let (secret, account) = key(3);
        let parsed = cli(&["buy", "--secret", &secret, "--index", "0", "--value", "0.2"]);
        match parsed.cmd {
            Command::Buy {
                caller,
                index,
                value,
            } => {
                assert_eq!(caller.account().unwrap(), account);
                assert_eq!(index, 0);
                assert_eq!(value, "0.2");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn full_flow_through_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dam.state.json");
        let (owner_sk, owner) = key(1);
        let (seller_sk, _) = key(2);
        let (buyer_sk, buyer) = key(3);
        let (owner_sk, seller_sk, buyer_sk) =
            (owner_sk.as_str(), seller_sk.as_str(), buyer_sk.as_str());

        run_in(&path, &["deploy", "--secret", owner_sk, "--share-percent", "50"]).unwrap();
        run_in(&path, &["fund", "--account", &buyer, "--amount", "1"]).unwrap();
        run_in(
            &path,
            &["add-asset", "--secret", seller_sk, "--name", "Asset 1", "--price", "0.2"],
        )
        .unwrap();
        assert!(run_in(&path, &["asset-data", "--secret", seller_sk, "--index", "0"]).is_err());
        run_in(&path, &["asset-data", "--secret", owner_sk, "--index", "0"]).unwrap();
        assert!(run_in(
            &path,
            &["buy", "--secret", buyer_sk, "--index", "0", "--value", "0.1"]
        )
        .is_err());
        run_in(
            &path,
            &["buy", "--secret", buyer_sk, "--index", "0", "--value", "0.2"],
        )
        .unwrap();
        assert!(run_in(&path, &["withdraw", "--secret", seller_sk, "--amount", "0.2"]).is_err());
        run_in(&path, &["withdraw", "--secret", owner_sk, "--amount", "0.2"]).unwrap();

        let err = run_in(&path, &["withdraw-asset", "--secret", seller_sk, "--index", "0"])
            .unwrap_err();
        assert!(err.to_string().contains("upgrade to version 2"));
        run_in(&path, &["upgrade", "--secret", owner_sk, "--to", "2"]).unwrap();
        run_in(&path, &["status"]).unwrap();
        run_in(&path, &["balance-of", "--account", &buyer]).unwrap();

        let state = StateFile::load(&path).unwrap();
        let market = state.market.unwrap();
        assert_eq!(market.admin, owner);
        assert_eq!(market.storage.owner.as_deref(), Some(owner.as_str()));
        assert_eq!(market.logic_version, 2);
        assert_eq!(market.storage.balance, 0);
        assert_eq!(market.storage.assets.len(), 1);
        assert_eq!(market.storage.assets[0].buyer.as_deref(), Some(buyer.as_str()));
        assert_eq!(state.accounts.balance(&buyer), parse_units("0.8").unwrap());
        assert_eq!(state.accounts.balance(&owner), parse_units("0.2").unwrap());
    }

    #[test]
    fn account_name_without_its_key_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dam.state.json");
        let (owner_sk, owner) = key(1);
        run_in(&path, &["deploy", "--secret", &owner_sk]).unwrap();

        // The owner's account id is public; it is not a secret key.
        let err = run_in(&path, &["withdraw", "--secret", &owner, "--amount", "0"]).unwrap_err();
        assert!(err.to_string().contains("Only market owner"));
        let err = run_in(&path, &["withdraw", "--secret", "owner", "--amount", "0"]).unwrap_err();
        assert!(err.to_string().contains("secret key"));
    }

    #[test]
    fn second_deploy_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dam.state.json");
        let (owner_sk, _) = key(1);
        run_in(&path, &["deploy", "--secret", &owner_sk]).unwrap();
        assert!(run_in(&path, &["deploy", "--secret", &owner_sk]).is_err());
    }
}
