use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use oracle_core::chain_adapter::{ChainAdapterFactory, DefaultChainAdapterFactory};
use oracle_core::context::ContextOptions;
use oracle_core::dispatcher::{Dispatcher, FundsCheck};
use oracle_core::gas_price::GasPriceOracle;
use oracle_core::queue::{ChannelQueue, JobQueue};
use oracle_core::recovery::{self, MessageFilter};
use oracle_core::store::SledStore;
use oracle_core::types::ChainSide;
use oracle_core::watcher::{Watcher, WatcherSettings};
use oracle_core::{BridgeContext, Config, Error, FatalError};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const SIDES: [ChainSide; 2] = [ChainSide::Home, ChainSide::Foreign];

/// 收到关闭信号后等待任务退出的时间
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 验证并解析配置文件
    ValidateConfig {
        /// 配置文件路径
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// 启动验证者服务
    Start {
        /// 配置文件路径
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// 列出 home 链上已收齐签名的消息
    Messages {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        #[arg(long)]
        from_block: u64,
        /// 默认到最新区块
        #[arg(long)]
        to_block: Option<u64>,
        /// 只看已中继 (true) 或未中继 (false) 的消息
        #[arg(long)]
        relayed: Option<bool>,
        /// 只看验证者集合变更 (true) 或转账 (false) 消息
        #[arg(long)]
        new_set: Option<bool>,
        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
    },
    /// 为未中继的消息补发中继交易
    Relay {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        #[arg(long)]
        from_block: u64,
        #[arg(long)]
        to_block: Option<u64>,
        /// 最多处理的消息数
        #[arg(long)]
        limit: Option<usize>,
        /// 实际发送交易，否则只做估算
        #[arg(long)]
        execute: bool,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// 创建两端适配器、持久化存储，并解析合约上下文
async fn build_context(config: &Config) -> Result<Arc<BridgeContext>> {
    let factory = DefaultChainAdapterFactory;
    let home = factory.create_adapter(ChainSide::Home, &config.home)?;
    let foreign = factory.create_adapter(ChainSide::Foreign, &config.foreign)?;
    let signer = config.validator.signer()?;
    let store = SledStore::open(&config.relayer.store_path)
        .with_context(|| format!("无法打开存储目录 {}", config.relayer.store_path))?;
    let ctx = BridgeContext::resolve(home, foreign, ContextOptions::from(config), signer, Arc::new(store))
        .await
        .context("无法读取桥合约信息")?;
    Ok(Arc::new(ctx))
}

fn build_dispatcher(config: &Config, ctx: &BridgeContext, side: ChainSide, gas_price: Arc<GasPriceOracle>) -> Dispatcher {
    Dispatcher::new(
        side,
        ctx.chain(side).clone(),
        ctx.signer.clone(),
        gas_price,
        config.relayer.extra_gas_percentage,
    )
    .with_chain_id(config.chain(side).chain_id)
    .with_funds_check(FundsCheck::from_config(config))
}

async fn latest_block(ctx: &BridgeContext, to_block: Option<u64>) -> Result<u64> {
    match to_block {
        Some(block) => Ok(block),
        None => Ok(ctx.home.chain().block_number().await?),
    }
}

fn print_summary(config: &Config) {
    println!("配置文件验证成功!");
    println!("配置内容概要:");
    println!("- 验证者地址: {:?}", config.validator.signer().map(|s| s.address()).ok());
    for side in SIDES {
        let chain = config.chain(side);
        println!("- {} 链:", side);
        println!("  - 桥合约: {}", chain.bridge_address);
        println!("  - RPC 节点: {}", chain.rpc_urls.join(", "));
        println!("  - 轮询间隔: {}毫秒", chain.polling_interval_ms);
        match chain.confirmations {
            Some(n) => println!("  - 确认数: {}", n),
            None => println!("  - 确认数: 从合约读取"),
        }
    }
    println!("- 事件监听:");
    for watcher in &config.watchers {
        println!("  - {} ({})", watcher.id, watcher.kind);
    }
    println!("- 中继器配置:");
    println!("  - 最大并发事件数: {}", config.relayer.max_concurrent_events);
    println!("  - 额外 gas 比例: {}", config.relayer.extra_gas_percentage);
    println!("  - 中继超时区块数: {}", config.relayer.relay_timeout_blocks);
    println!("  - 存储目录: {}", config.relayer.store_path);
}

/// 运行所有 watcher 和 dispatcher，返回进程退出码
async fn start(config: Config) -> Result<i32> {
    let ctx = build_context(&config).await?;
    info!(validator = %ctx.validator_address(), "Bridge context resolved");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: JoinSet<oracle_core::Result<()>> = JoinSet::new();
    let mut refreshers = Vec::new();
    let mut queues: HashMap<ChainSide, Arc<dyn JobQueue>> = HashMap::new();

    for side in SIDES {
        let gas_price = Arc::new(config.chain(side).gas_price.build_oracle(side));
        if let Some(handle) = gas_price.clone().spawn_refresher(shutdown_rx.clone()) {
            refreshers.push(handle);
        }
        let (queue, jobs) = ChannelQueue::bounded(side.to_string(), config.relayer.queue_capacity);
        queues.insert(side, Arc::new(queue));
        let dispatcher = build_dispatcher(&config, &ctx, side, gas_price);
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            dispatcher.run(jobs, shutdown).await;
            Ok(())
        });
    }

    for watcher_config in &config.watchers {
        let settings = WatcherSettings::from_config(&config, watcher_config, &ctx)?;
        let queue = watcher_config
            .kind
            .destination_side()
            .and_then(|side| queues.get(&side).cloned());
        let watcher = Watcher::new(settings, ctx.clone(), queue);
        tasks.spawn(watcher.run(shutdown_rx.clone()));
    }
    // watcher 持有队列的发送端，这里不再需要
    drop(queues);
    info!(watchers = config.watchers.len(), "Oracle started");

    let exit_code = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break 0;
            }
            joined = tasks.join_next() => match joined {
                Some(Ok(Ok(()))) => continue,
                Some(Ok(Err(Error::Fatal(fatal)))) => {
                    error!(error = %fatal, "Fatal error, stopping oracle");
                    break fatal.exit_code();
                }
                Some(Ok(Err(e))) => {
                    error!(error = %e, "Task stopped with error");
                    break FatalError::General.exit_code();
                }
                Some(Err(e)) => {
                    error!(error = %e, "Task panicked");
                    break FatalError::General.exit_code();
                }
                None => break 0,
            }
        }
    };

    let _ = shutdown_tx.send(true);
    let drain = async { while tasks.join_next().await.is_some() {} };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("Tasks did not stop in time, aborting");
        tasks.shutdown().await;
    }
    for handle in refreshers {
        let _ = handle.await;
    }
    Ok(exit_code)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::ValidateConfig { config } => {
            info!("正在验证配置文件: {:?}", config);
            let config = Config::load(config)?;
            print_summary(&config);
            Ok(())
        }
        Commands::Start { config } => {
            info!("使用配置文件: {:?}", config);
            let config = Config::load(config)?;
            let exit_code = start(config).await?;
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
            Ok(())
        }
        Commands::Messages {
            config,
            from_block,
            to_block,
            relayed,
            new_set,
            json,
        } => {
            let config = Config::load(config)?;
            let ctx = build_context(&config).await?;
            let to_block = latest_block(&ctx, to_block).await?;
            let filter = MessageFilter { relayed, new_set };
            let messages = recovery::find_messages(&ctx, from_block, to_block, filter).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&messages)?);
                return Ok(());
            }
            println!("区块 {} - {} 共找到 {} 条消息:", from_block, to_block, messages.len());
            for m in &messages {
                let kind = if m.message.is_new_set() { "验证者集合" } else { "转账" };
                let status = if m.relayed { "已中继" } else { "未中继" };
                println!(
                    "  - 区块 {} 交易 {} [{}] 源交易 {} 签名数 {} {}",
                    m.block_number,
                    m.transaction_hash,
                    kind,
                    m.message.tx_hash(),
                    m.number_of_collected_signatures,
                    status
                );
            }
            Ok(())
        }
        Commands::Relay {
            config,
            from_block,
            to_block,
            limit,
            execute,
        } => {
            let config = Config::load(config)?;
            let ctx = build_context(&config).await?;
            let to_block = latest_block(&ctx, to_block).await?;

            let gas_price = Arc::new(config.foreign.gas_price.build_oracle(ChainSide::Foreign));
            if let Err(e) = gas_price.refresh().await {
                warn!(error = %e, "Using fallback gas price");
            }
            let dispatcher = build_dispatcher(&config, &ctx, ChainSide::Foreign, gas_price);
            let outcome =
                recovery::relay_messages(&ctx, execute.then_some(&dispatcher), from_block, to_block, limit).await?;

            println!("可中继消息: {} 条", outcome.jobs.len());
            for (tx_hash, reason) in &outcome.skipped {
                println!("  - 跳过 {}: {}", tx_hash, reason);
            }
            match outcome.report {
                Some(report) => {
                    println!("已发送 {} 笔交易, 失败 {} 笔", report.sent.len(), report.failed.len());
                    for tx_hash in &report.sent {
                        println!("  - {}", tx_hash);
                    }
                }
                None => println!("未发送交易 (使用 --execute 实际发送)"),
            }
            Ok(())
        }
    }
}
