//! IronWallet 命令行入口

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use ironwallet::{
    config::Config,
    domain::{identity::WordCount, transaction::TransactionRequest},
    infrastructure::{logging::init_logging, secure_store::EncryptedFileStore},
    WalletSession,
};

const USAGE: &str = "\
Usage: ironwallet <command> [args]

Commands:
  create [12|24]                 生成新钱包（默认 12 个单词）
  import <phrase|private-key>    导入助记词或私钥
  address                        显示当前地址
  balances                       查询所有链的余额
  gas [chain]                    查询 gas 价格（gwei）
  select <chain>                 检查并显示链配置
  validate <address> [chain]     校验收款地址
  send <to> <amount> [chain]     发送原生币并等待确认
  history [chain] [tokens]       查看交易记录
  export                         导出助记词或私钥
  erase                          删除本地钱包

Environment:
  WALLET_PASSPHRASE   本地加密存储口令（必需）
  CONFIG_PATH         TOML 配置文件路径";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载环境变量与配置
    dotenvy::dotenv().ok();
    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = Config::from_env_and_file(config_path.as_deref())?;
    config.validate().context("Invalid configuration")?;

    // 2. 初始化日志
    init_logging(&config.logging)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        println!("{}", USAGE);
        return Ok(());
    };
    if matches!(command, "help" | "-h" | "--help") {
        println!("{}", USAGE);
        return Ok(());
    }

    // 3. 打开本地加密存储并恢复会话
    let passphrase = std::env::var("WALLET_PASSPHRASE")
        .context("WALLET_PASSPHRASE must be set to open the wallet store")?;
    let store = EncryptedFileStore::open(&config.storage.path, &passphrase).await?;
    let session = WalletSession::new(config, Arc::new(store))?;
    session.restore().await?;

    tracing::debug!(command, "Running command");
    run(&session, command, &args[1..]).await
}

async fn run(session: &WalletSession, command: &str, args: &[String]) -> Result<()> {
    match command {
        "create" => {
            let words = match args.first() {
                Some(n) => WordCount::from_count(n.parse().context("Word count must be 12 or 24")?)?,
                None => WordCount::Twelve,
            };
            let phrase = session.create_wallet(words).await?;
            println!("Address: {}", session.address()?);
            println!("Recovery phrase (write it down, it will not be shown again):");
            println!("{}", phrase.expose());
        }
        "import" => {
            if args.is_empty() {
                bail!("import requires a recovery phrase or private key");
            }
            let address = session.import(&args.join(" ")).await?;
            println!("Imported {}", address);
        }
        "address" => println!("{}", session.address()?),
        "balances" => {
            let balances = session.balances().await?;
            for chain in session.registry.list() {
                let balance = balances.get(&chain.chain_id).map(String::as_str).unwrap_or("0");
                println!("{:<10} {:>12} {} {}", chain.name, chain.chain_id, balance, chain.symbol);
            }
        }
        "gas" => {
            let chain_id = parse_chain(args.first())?;
            println!("{} gwei", session.gas_price(chain_id).await?);
        }
        "select" => {
            let chain_id = parse_chain(args.first())?.context("select requires a chain id")?;
            session.select_chain(chain_id)?;
            let chain = session.registry.selected_config();
            println!("{} ({}) via {}", chain.name, chain.chain_id, chain.rpc_url);
            if let Ok(address) = session.address() {
                println!("{}", chain.explorer_address_url(&address));
            }
        }
        "validate" => {
            let input = args.first().context("validate requires an address")?;
            let snapshot = session.validate_recipient(input, parse_chain(args.get(1))?).await;
            match snapshot.reason {
                Some(reason) => println!("{:?}: {}", snapshot.state, reason.as_str()),
                None => println!("{:?}", snapshot.state),
            }
        }
        "send" => {
            let (to, amount) = match (args.first(), args.get(1)) {
                (Some(to), Some(amount)) => (to, amount),
                _ => bail!("send requires <to> <amount>"),
            };
            let chain_id = parse_chain(args.get(2))?.unwrap_or_else(|| session.selected_chain());
            let request = TransactionRequest::new(to.as_str(), amount.as_str(), chain_id);

            match session.estimate(&request).await {
                Ok(estimate) => println!(
                    "Estimated fee: {} ({} gas @ {} gwei)",
                    estimate.total_fee, estimate.gas_limit, estimate.gas_price_gwei
                ),
                Err(e) => tracing::warn!(error = %e, "Fee estimation failed before send"),
            }

            let (submission, handle) = session.send(&request).await.map_err(|e| {
                anyhow::anyhow!(e.user_message())
            })?;
            println!("Submitted {}", submission.hash);
            if let Ok(chain) = session.registry.get(chain_id) {
                println!("{}", chain.explorer_tx_url(&submission.hash));
            }

            let record = handle.wait().await?;
            println!("Status: {} ({})", record.status, record.status.description());
        }
        "history" => {
            let chain_id = parse_chain(args.first())?.unwrap_or_else(|| session.selected_chain());
            let view = session.activity(Some(chain_id)).await?;
            if view.degraded {
                println!("History is temporarily unavailable; showing what is known");
            }
            if args.get(1).map(String::as_str) == Some("tokens") {
                for tx in &view.token_txs {
                    println!("{} {} {} {} -> {}", tx.hash, tx.value, tx.symbol, tx.from, tx.to);
                }
            } else {
                for tx in &view.native_txs {
                    println!("{} {} {} -> {} [{}]", tx.hash, tx.value, tx.from, tx.to, tx.status);
                }
            }
        }
        "export" => {
            let identity = session.identity()?;
            match identity.export_phrase() {
                Some(phrase) => println!("{}", phrase.expose()),
                None => println!("{}", identity.export_private_key().as_str()),
            }
        }
        "erase" => {
            session.erase_wallet().await?;
            println!("Wallet erased");
        }
        other => {
            println!("{}", USAGE);
            bail!("Unknown command: {}", other);
        }
    }
    Ok(())
}

fn parse_chain(arg: Option<&String>) -> Result<Option<u64>> {
    arg.map(|s| s.parse::<u64>().with_context(|| format!("Invalid chain id: {}", s)))
        .transpose()
}
