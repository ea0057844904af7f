// Goldfish - 元数据清理模块
// 删除元数据库中那些在备份存储上已经不存在的文件夹记录

use crate::config::BackupConfig;
use crate::error::Result;
use crate::generation::{inventory, orphaned_folders, GenerationId};
use crate::metadata::MetadataStore;
use tracing::info;

/// 清理结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    /// 已删除的 (备份代, 文件夹)
    pub removed: Vec<(GenerationId, String)>,

    /// 用户拒绝删除的 (备份代, 文件夹)
    pub kept: Vec<(GenerationId, String)>,

    /// 删除的文件行数
    pub files_removed: usize,
}

/// 清理孤立的元数据记录
///
/// # 参数
/// * `config` - 备份配置；未启用元数据时什么也不做
/// * `dry_run` - 是否为试运行模式（只列出，不删除）
/// * `confirm` - 对每个孤立文件夹询问是否删除
///
/// # 示例
/// ```ignore
/// prune_orphans(&config, false, |generation, folder| Ok(true))?;
/// ```
pub fn prune_orphans<F>(config: &BackupConfig, dry_run: bool, mut confirm: F) -> Result<PruneReport>
where
    F: FnMut(&GenerationId, &str) -> Result<bool>,
{
    let mut report = PruneReport::default();
    let Some(metadata_dir) = config.metadata_dir.as_deref() else {
        return Ok(report);
    };

    let inv = inventory(&config.destination, Some(metadata_dir))?;
    for (generation, folder) in orphaned_folders(&inv) {
        if dry_run || !confirm(&generation, &folder)? {
            report.kept.push((generation, folder));
            continue;
        }

        let mut store = MetadataStore::open(&generation.store_path(metadata_dir))?;
        if let Some(folder_id) = store.folder_id(&folder)? {
            report.files_removed += store.remove_folder(folder_id)?;
        }
        store.finish()?;
        info!(%generation, %folder, "removed orphaned metadata");
        report.removed.push((generation, folder));
    }

    Ok(report)
}
