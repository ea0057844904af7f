// Goldfish - 基于硬链接和内容哈希索引的去重增量备份工具
//
// 主程序入口，负责命令行参数解析和各子命令的协调
//
// 功能特性：
// - 增量备份：大小和修改时间未变的文件直接硬链接到上一备份代
// - 去重：内容相同的文件按哈希硬链接到任意历史备份代
// - 每个备份代一个元数据库，记录文件与内容哈希
// - 清理元数据库中已经不存在于存储上的记录

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use goldfish::cli::{confirm_prune, print_headline, print_inventory, print_summary};
use goldfish::config::ConfigFile;
use goldfish::generation::{inventory, GenerationId};
use goldfish::prune::prune_orphans;
use goldfish::report::ConsoleReporter;
use goldfish::run_backup;
use goldfish::size::folder_size;
use goldfish::utils::format_bytes;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// 子命令枚举
#[derive(Subcommand, Debug)]
enum Commands {
    /// 按配置文件创建新的备份代
    Backup {
        /// 试运行模式（不写入任何内容）
        #[arg(long)]
        dry_run: bool,

        /// 逐个列出被复制和哈希链接的文件
        #[arg(short, long)]
        verbose: bool,
    },

    /// 列出存储上和元数据库中的所有备份代
    List,

    /// 清理存储上已不存在的文件夹的元数据记录
    Prune {
        /// 不询问，直接删除
        #[arg(long)]
        yes: bool,

        /// 只列出，不删除
        #[arg(long)]
        dry_run: bool,
    },

    /// 统计已备份文件夹的大小以及删除后可释放的空间
    Size {
        /// 已备份的文件夹
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
}

/// 命令行参数结构体
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 子命令
    #[command(subcommand)]
    command: Commands,

    /// 配置文件路径（默认使用系统配置目录中的 config.toml）
    #[arg(short, long, global = true, value_name = "CONFIG")]
    config: Option<PathBuf>,
}

/// 程序入口
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match &args.command {
        Commands::Backup { dry_run, verbose } => backup(&args, *dry_run, *verbose),
        Commands::List => {
            let config = load_config(&args)?;
            print_headline();
            let inv = inventory(&config.destination, config.metadata_dir.as_deref())?;
            print_inventory(&inv);
            Ok(())
        }
        Commands::Prune { yes, dry_run } => {
            let config = load_config(&args)?;
            print_headline();
            let inv = inventory(&config.destination, config.metadata_dir.as_deref())?;
            print_inventory(&inv);
            println!();

            let report = prune_orphans(&config, *dry_run, |generation, folder| {
                if *yes {
                    Ok(true)
                } else {
                    confirm_prune(generation, folder)
                }
            })?;

            for (generation, folder) in &report.removed {
                println!("Removed: {} {}", style(generation).yellow(), style(folder).red());
            }
            if *dry_run {
                for (generation, folder) in &report.kept {
                    println!("{} Would remove {} {}", style("Dry run:").yellow(), generation, folder);
                }
            }
            if report.removed.is_empty() && report.kept.is_empty() {
                println!("{}", style("Nothing to prune.").green());
            }
            Ok(())
        }
        Commands::Size { path } => {
            print_headline();
            let report = folder_size(path)?;
            println!("Folder to inspect: {:?}", style(path).blue());
            println!("  Size of the backup:           {}", format_bytes(report.total));
            println!("  Will be freed after deletion: {}", format_bytes(report.exclusive));
            Ok(())
        }
    }
}

/// 加载并校验配置文件
fn load_config(args: &Args) -> Result<goldfish::BackupConfig> {
    let path = match &args.config {
        Some(p) => p.clone(),
        None => ConfigFile::default_path().context("Could not determine config directory")?,
    };
    let raw = ConfigFile::load(&path)
        .with_context(|| format!("Failed to load config file {:?}", path))?;
    Ok(raw.validate()?)
}

/// 执行备份操作
fn backup(args: &Args, dry_run: bool, verbose: bool) -> Result<()> {
    let config = load_config(args)?.with_dry_run(dry_run);
    let generation = GenerationId::now();

    print_headline();
    println!("Dest:   {:?}", style(&config.destination).blue());
    println!("Time:   {}", style(&generation).yellow());
    if dry_run {
        println!("{}", style("Dry run: nothing will be written.").yellow());
    }

    let start_time = std::time::Instant::now();
    let mut reporter = ConsoleReporter::new(verbose || dry_run);
    let summary = run_backup(&config, generation, &mut reporter)
        .context("Backup aborted; the new generation may be incomplete")?;

    print_summary(&summary, start_time.elapsed(), dry_run);
    Ok(())
}
