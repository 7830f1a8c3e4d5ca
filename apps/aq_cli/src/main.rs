// apps/aq_cli/src/main.rs

//! AquAssim 命令行界面
//!
//! 提供粒子滤波数据同化与集合预报的命令行工具。
//!
//! # 架构层级
//!
//! 本模块属于应用层：只负责装配——解析参数、加载配置与观测、
//! 把外部模拟器适配器接到活动驱动上，不包含任何同化语义。

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// AquAssim 水文数据同化与集合预报命令行工具
#[derive(Parser)]
#[command(name = "aq_cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "AquAssim particle-filter data assimilation engine", long_about = None)]
struct Cli {
    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 运行同化-预报活动
    Run(commands::run::RunArgs),
    /// 显示归档与配置信息
    Info(commands::info::InfoArgs),
    /// 验证配置文件
    Validate(commands::validate::ValidateArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // 执行命令
    match cli.command {
        Commands::Run(args) => commands::run::execute(args),
        Commands::Info(args) => commands::info::execute(args),
        Commands::Validate(args) => commands::validate::execute(args),
    }
}
