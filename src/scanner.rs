// Goldfish - 备份代遍历模块
// 深度优先遍历每个源目录，镜像目录结构，并对每个文件调用链接决策

use crate::actions::{FileTask, SourceStats};
use crate::config::BackupConfig;
use crate::error::{BackupError, Result};
use crate::executor::BackupExecutor;
use crate::generation::{find_previous, GenerationId};
use crate::history::HistoryChain;
use crate::linker::{Linker, MetadataContext, PreviousIndex};
use crate::metadata::MetadataStore;
use crate::report::Reporter;
use crate::utils::folder_name;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 一次备份运行的结果
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub generation: GenerationId,
    pub sources: Vec<SourceStats>,
}

impl RunSummary {
    pub fn total_failed(&self) -> u64 {
        self.sources.iter().map(|s| s.failed).sum()
    }
}

/// 执行一次完整备份，生成新的备份代
///
/// # 参数
/// * `config` - 校验后的备份配置
/// * `generation` - 新备份代的标识（不能已存在）
/// * `reporter` - 进度报告接口
///
/// # 流程
/// 1. 检查备份代目录和元数据库都不存在
/// 2. 打开当前元数据库（试运行时为内存库）和历史链
/// 3. 逐个处理源目录，每个源目录结束时同步到磁盘
pub fn run_backup(
    config: &BackupConfig,
    generation: GenerationId,
    reporter: &mut dyn Reporter,
) -> Result<RunSummary> {
    let gen_dir = generation.dir(&config.destination);
    if gen_dir.exists() {
        return Err(BackupError::Config(vec![format!(
            "generation {} already exists at {:?}",
            generation, gen_dir
        )]));
    }
    if let Some(dir) = &config.metadata_dir {
        let store_path = generation.store_path(dir);
        if store_path.exists() {
            return Err(BackupError::Config(vec![format!(
                "metadata store {:?} already exists",
                store_path
            )]));
        }
    }

    info!(%generation, dry_run = config.dry_run, "starting backup");
    let mut executor = BackupExecutor::new(config.dry_run, config.follow_symlinks);
    executor.create_dir(&gen_dir)?;

    let (mut current, history) = match &config.metadata_dir {
        Some(dir) => {
            let store = if config.dry_run {
                MetadataStore::create_in_memory(generation.as_str())?
            } else {
                fs::create_dir_all(dir).map_err(|e| BackupError::storage(dir, "mkdir", e))?;
                MetadataStore::create(&generation.store_path(dir), generation.as_str())?
            };
            let history = HistoryChain::open(dir, &generation, config.history_depth)?;
            (Some(store), history)
        }
        None => (None, HistoryChain::empty()),
    };

    let mut sources = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        let stats = scan_source(
            config,
            &generation,
            source,
            &mut executor,
            current.as_mut(),
            &history,
            reporter,
        )?;
        sources.push(stats);
    }

    executor.sync_dir(&gen_dir)?;
    if let Some(store) = current {
        if !config.dry_run {
            store.finish()?;
        }
    }

    info!(%generation, "backup finished");
    Ok(RunSummary {
        generation,
        sources,
    })
}

/// 处理单个源目录
///
/// 目录总是在新备份代中重新创建；文件逐个交给 [`Linker`]。
/// 非致命错误只记录，致命错误立即返回。
fn scan_source(
    config: &BackupConfig,
    generation: &GenerationId,
    source: &Path,
    executor: &mut BackupExecutor,
    current: Option<&mut MetadataStore>,
    history: &HistoryChain,
    reporter: &mut dyn Reporter,
) -> Result<SourceStats> {
    let folder = folder_name(source);
    let dest_root = generation.dir(&config.destination).join(&folder);
    let previous = find_previous(&config.destination, generation, &folder)?;
    let prev_dir = previous
        .as_ref()
        .map(|g| g.dir(&config.destination).join(&folder));

    reporter.source_started(&folder, source, previous.as_ref());
    debug!(%folder, ?previous, "scanning source");

    let prev_store = match (&config.metadata_dir, &previous) {
        (Some(dir), Some(g)) => open_previous(&g.store_path(dir), &folder),
        _ => None,
    };

    executor.create_dir(&dest_root)?;

    let metadata = match current {
        Some(store) => {
            let folder_id = store.insert_folder(&folder)?;
            Some(MetadataContext {
                current: store,
                folder_id,
                previous: prev_store.as_ref().map(|(store, folder_id)| PreviousIndex {
                    store,
                    folder_id: *folder_id,
                }),
                history,
            })
        }
        None => None,
    };

    let mut stats = SourceStats::new(&folder);
    let mut linker = Linker::new(config, executor, metadata);

    let walker = WalkDir::new(source)
        .follow_links(config.follow_symlinks)
        .min_depth(1)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                let io_err = err
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::other("filesystem loop"));
                let error = BackupError::FsRace {
                    path: path.clone(),
                    op: "walk",
                    source: io_err,
                };
                warn!(?path, %error, "skipping unreadable entry");
                stats.failed += 1;
                reporter.file_failed(&path, &error);
                continue;
            }
        };

        let rel_path = match entry.path().strip_prefix(source) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };
        let file_type = entry.file_type();

        if file_type.is_dir() {
            linker.executor().create_dir(&dest_root.join(&rel_path))?;
            continue;
        }
        if !file_type.is_file() && !file_type.is_symlink() {
            debug!(path = ?rel_path, "skipping special file");
            continue;
        }

        let task = FileTask::new(
            rel_path.clone(),
            entry.path().to_path_buf(),
            dest_root.join(&rel_path),
            prev_dir.as_ref().map(|p| p.join(&rel_path)),
        );

        match linker.process(&task) {
            Ok((outcome, size)) => {
                stats.record(&task, &outcome, size);
                reporter.file_done(&task, &outcome, size);
            }
            Err(error) if !error.is_fatal() => {
                warn!(path = ?rel_path, %error, "file skipped");
                stats.failed += 1;
                reporter.file_failed(&rel_path, &error);
            }
            Err(error) => return Err(error),
        }
    }

    // 源目录结束：确保链接、复制和元数据提交都已落盘
    let (executor, metadata) = linker.into_parts();
    executor.sync_dir(&dest_root)?;
    if let Some(ctx) = metadata {
        ctx.current.checkpoint()?;
    }

    info!(
        %folder,
        files = stats.files,
        copied = stats.bytes_copied,
        linked = stats.bytes_linked,
        hash_linked = stats.bytes_hash_linked,
        "source finished"
    );
    reporter.source_finished(&stats);
    Ok(stats)
}

/// 只读打开上一备份代的元数据库并查找同名文件夹
///
/// 上一备份代没有元数据库或没有该文件夹时返回 `None`，快速路径会现场计算哈希。
fn open_previous(path: &Path, folder: &str) -> Option<(MetadataStore, i64)> {
    if !path.exists() {
        return None;
    }
    let store = match MetadataStore::open_read_only(path) {
        Ok(store) => store,
        Err(e) => {
            warn!(?path, error = %e, "previous metadata store unreadable");
            return None;
        }
    };
    match store.folder_id(folder) {
        Ok(Some(id)) => Some((store, id)),
        Ok(None) => None,
        Err(e) => {
            warn!(?path, error = %e, "previous metadata store unreadable");
            None
        }
    }
}
