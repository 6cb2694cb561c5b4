use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use ethers::prelude::*;
use modular_aa::account::{salt_from_text, CounterfactualAccount};
use modular_aa::builder::{HashedOperation, OperationBuilder};
use modular_aa::config::{load_deployment, Deployment, GasConfig};
use modular_aa::contracts::{AccountFactory, AccountFactoryLike, ChainLike, EntryPoint, Paymaster};
use modular_aa::encoding::{fmt_address, fmt_h256, user_op_to_json};
use modular_aa::funding::{default_sponsor_deposit, ensure_sponsor_deposit, FundingPolicy};
use modular_aa::packing::ExecutionMode;
use modular_aa::sponsor::{
    now_unix, PaymasterGasConfig, SponsorshipAuthorizer, SponsorshipDomain, ValidityWindow,
    DEFAULT_VALID_BEFORE, DEFAULT_VALID_FOR,
};
use modular_aa::submit::Submitter;
use modular_aa::vault::{mint_approve_deposit, DEMO_AMOUNT};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

// In --json mode stdout carries a single JSON document; everything
// human-readable goes to stderr.
macro_rules! outln {
    ($machine_mode:expr, $($arg:tt)*) => {{
        if $machine_mode {
            eprintln!($($arg)*);
        } else {
            println!($($arg)*);
        }
    }};
}

#[derive(Parser, Debug)]
#[command(name = "modular-aa", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the counterfactual modular account address (and deployment status).
    Account(AccountArgs),

    /// Build, sign and submit a user operation that mints, approves and
    /// deposits into the vault in one batch.
    Send(SendArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Deployment artifact (entry point, factory, paymaster, token, vault).
    #[arg(long, default_value = "deployments/localhost.json")]
    deployment: PathBuf,

    /// Override the chain RPC URL (otherwise uses deployment JSON).
    #[arg(long, env = "MODULAR_AA_RPC_URL")]
    rpc: Option<String>,

    /// Account owner private key. Also funds the account and receives the
    /// bundle refund.
    #[arg(long, env = "MODULAR_AA_OWNER_PRIVATE_KEY")]
    owner_private_key: String,

    /// Salt text; the factory salt is its keccak256.
    #[arg(long, default_value = "salt")]
    salt: String,

    /// Print a single JSON object to stdout; logs go to stderr.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct AccountArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct GasArgs {
    #[arg(long)]
    verification_gas_limit: u128,

    #[arg(long)]
    call_gas_limit: u128,

    #[arg(long)]
    pre_verification_gas: u128,

    /// Wei.
    #[arg(long)]
    max_priority_fee_per_gas: u128,

    /// Wei.
    #[arg(long)]
    max_fee_per_gas: u128,
}

impl From<&GasArgs> for GasConfig {
    fn from(args: &GasArgs) -> Self {
        Self {
            verification_gas_limit: U256::from(args.verification_gas_limit),
            call_gas_limit: U256::from(args.call_gas_limit),
            pre_verification_gas: U256::from(args.pre_verification_gas),
            max_priority_fee_per_gas: U256::from(args.max_priority_fee_per_gas),
            max_fee_per_gas: U256::from(args.max_fee_per_gas),
        }
    }
}

#[derive(Args, Debug)]
struct SendArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    gas: GasArgs,

    /// Amount minted, approved and deposited (token base units).
    #[arg(long, default_value_t = DEMO_AMOUNT)]
    amount: u64,

    /// Have the paymaster pay for gas instead of funding the account.
    #[arg(long, default_value_t = false)]
    sponsored: bool,

    /// Paymaster signer key (defaults to the owner key).
    #[arg(long, env = "MODULAR_AA_SPONSOR_PRIVATE_KEY")]
    sponsor_private_key: Option<String>,

    #[arg(long, requires = "sponsored")]
    paymaster_verification_gas_limit: Option<u128>,

    #[arg(long, requires = "sponsored")]
    paymaster_post_op_gas_limit: Option<u128>,

    /// Build and sign, print the user operation, but do not send any transaction.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// How long to wait for funding, deposit and bundle confirmations.
    #[arg(long, default_value_t = 120)]
    max_wait_seconds: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // Always write logs to stderr so stdout can be used for script-friendly outputs.
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Account(args) => cmd_account(args).await,
        Command::Send(args) => cmd_send(args).await,
    }
}

type Client = SignerMiddleware<Provider<Http>, LocalWallet>;

async fn connect(common: &CommonArgs) -> Result<(Deployment, Arc<Client>, LocalWallet)> {
    let dep = load_deployment(&common.deployment, common.rpc.clone())?;
    let provider =
        Provider::<Http>::try_from(dep.rpc_url.as_str())?.interval(Duration::from_millis(350));

    let chain_id = ChainLike::chain_id(&provider).await?;
    if chain_id != dep.chain_id {
        return Err(anyhow!(
            "chainId mismatch: deployment has {}, RPC returned {}",
            dep.chain_id,
            chain_id
        ));
    }

    let wallet = LocalWallet::from_str(&common.owner_private_key)
        .context("invalid owner private key")?
        .with_chain_id(chain_id);
    let client = Arc::new(SignerMiddleware::new(provider, wallet.clone()));
    Ok((dep, client, wallet))
}

async fn cmd_account(args: AccountArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let (dep, client, wallet) = connect(&args.common).await?;
    let owner = wallet.address();

    let factory = AccountFactory::new(dep.account_factory, client.clone())?;
    let salt = salt_from_text(&args.common.salt);
    let account = CounterfactualAccount::ecdsa(dep.account_factory, salt, owner)?;
    let smart_account = account.predict(&factory).await?;
    let deployed = !client.code_at(smart_account).await?.is_empty();

    if machine_mode {
        let out = serde_json::json!({
            "owner": fmt_address(owner),
            "smartAccount": fmt_address(smart_account),
            "isDeployed": deployed,
        });
        println!("{}", out);
    }

    outln!(machine_mode, "chainId:        {}", dep.chain_id);
    outln!(machine_mode, "entryPoint:     {:?}", dep.entry_point);
    outln!(machine_mode, "factory:        {:?}", factory.address());
    outln!(machine_mode, "owner:          {:?}", owner);
    outln!(machine_mode, "smartAccount:   {:?}", smart_account);
    outln!(machine_mode, "isDeployed:     {}", deployed);

    Ok(())
}

async fn cmd_send(args: SendArgs) -> Result<()> {
    let machine_mode = args.common.json;
    let (dep, client, wallet) = connect(&args.common).await?;
    let owner = wallet.address();
    let max_wait = Duration::from_secs(args.max_wait_seconds);

    let token = dep
        .token
        .ok_or_else(|| anyhow!("deployment json has no token address"))?;
    let vault = dep
        .vault
        .ok_or_else(|| anyhow!("deployment json has no vault address"))?;

    let factory = AccountFactory::new(dep.account_factory, client.clone())?;
    let entry_point = EntryPoint::new(dep.entry_point, client.clone())?;
    let salt = salt_from_text(&args.common.salt);
    let account = CounterfactualAccount::ecdsa(dep.account_factory, salt, owner)?;

    let builder = OperationBuilder::new(account, &GasConfig::from(&args.gas))?
        .resolve_address(&factory)
        .await?;
    let sender = builder.sender();
    outln!(machine_mode, "smartAccount:   {:?}", sender);

    let calls = mint_approve_deposit(sender, token, vault, U256::from(args.amount))?;

    let funded = if args.sponsored || args.dry_run {
        builder.skip_funding()
    } else {
        let (funded, outcome) = builder
            .fund(client.as_ref(), &FundingPolicy::bootstrap(max_wait)?)
            .await?;
        outln!(machine_mode, "funding:        {:?}", outcome);
        funded
    };

    let resolved = funded
        .call_data(&ExecutionMode::default(), &calls)
        .resolve_nonce_and_init_code(&entry_point, client.as_ref(), U256::zero())
        .await?;

    let hashed: HashedOperation = if args.sponsored {
        let paymaster = dep
            .paymaster
            .ok_or_else(|| anyhow!("--sponsored requires a paymaster in the deployment json"))?;
        let pm_gas = PaymasterGasConfig {
            verification_gas_limit: U256::from(
                args.paymaster_verification_gas_limit.ok_or_else(|| {
                    anyhow!("--sponsored requires --paymaster-verification-gas-limit")
                })?,
            ),
            post_op_gas_limit: U256::from(
                args.paymaster_post_op_gas_limit
                    .ok_or_else(|| anyhow!("--sponsored requires --paymaster-post-op-gas-limit"))?,
            ),
        };

        if !args.dry_run {
            let sponsor = Paymaster::new(paymaster, dep.entry_point, client.clone())?;
            let amount = default_sponsor_deposit()?;
            if let Some(tx) =
                ensure_sponsor_deposit(&sponsor, client.as_ref(), amount, max_wait).await?
            {
                outln!(machine_mode, "paymaster deposit tx: {:?}", tx);
            }
        }

        let sponsor_wallet = match args.sponsor_private_key.as_deref() {
            Some(key) => LocalWallet::from_str(key).context("invalid sponsor private key")?,
            None => wallet.clone(),
        };
        let domain = SponsorshipDomain::new(dep.paymaster_name.clone(), dep.chain_id, paymaster);
        let authorizer = SponsorshipAuthorizer::new(domain, &sponsor_wallet);
        let now = now_unix();
        let window = ValidityWindow::around(now, DEFAULT_VALID_BEFORE, DEFAULT_VALID_FOR)?;

        resolved
            .sponsor(&authorizer, pm_gas, window, now)
            .await?
            .hash(&entry_point)
            .await?
    } else {
        resolved.hash(&entry_point).await?
    };

    let signed = hashed.sign(&wallet).await?;
    let user_op_hash = signed.user_op_hash();

    outln!(machine_mode, "userOpHash:     {}", fmt_h256(user_op_hash));
    if args.dry_run {
        let out = serde_json::json!({
            "userOpHash": fmt_h256(user_op_hash),
            "userOp": user_op_to_json(signed.op()),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        outln!(machine_mode, "\n--dry-run set: not sending user operation.");
        return Ok(());
    }

    let receipt = Submitter::new(&entry_point, client.as_ref(), max_wait)
        .submit(&[signed], owner)
        .await?;
    let success = receipt
        .outcome(user_op_hash)
        .map(|o| o.success)
        .unwrap_or(false);

    if machine_mode {
        let out = serde_json::json!({
            "smartAccount": fmt_address(sender),
            "userOpHash": fmt_h256(user_op_hash),
            "txHash": fmt_h256(receipt.tx_hash),
            "success": success,
        });
        println!("{}", out);
    }
    outln!(machine_mode, "txHash:         {}", fmt_h256(receipt.tx_hash));
    outln!(machine_mode, "success:        {}", success);

    if !success {
        return Err(anyhow!("user operation {} reverted", fmt_h256(user_op_hash)));
    }
    Ok(())
}
