// Goldfish - 链接决策模块
// 对每个源文件决定：快速路径硬链接、哈希路径硬链接，或完整复制
// 并保证元数据库与实际写入的内容一致

use crate::actions::{FileTask, Outcome};
use crate::config::BackupConfig;
use crate::error::{BackupError, Result};
use crate::executor::BackupExecutor;
use crate::hasher::{hash_path, ContentDigest};
use crate::history::HistoryChain;
use crate::metadata::MetadataStore;
use crate::utils::rounded_mtime;
use std::fs::{self, Metadata};
use std::io;
use std::path::Path;
use tracing::{debug, trace};

/// 上一备份代的元数据：只读库及同名文件夹的 id
pub struct PreviousIndex<'a> {
    pub store: &'a MetadataStore,
    pub folder_id: i64,
}

/// 启用元数据时的决策上下文
pub struct MetadataContext<'a> {
    /// 当前备份代的可写库
    pub current: &'a mut MetadataStore,

    /// 当前源目录在当前库中的文件夹 id
    pub folder_id: i64,

    /// 上一备份代（可能没有元数据库）
    pub previous: Option<PreviousIndex<'a>>,

    /// 历史链
    pub history: &'a HistoryChain,
}

/// 链接决策器
///
/// 每个源目录创建一个，按遍历顺序逐个处理文件。
pub struct Linker<'a> {
    config: &'a BackupConfig,
    executor: &'a mut BackupExecutor,
    metadata: Option<MetadataContext<'a>>,
}

impl<'a> Linker<'a> {
    pub fn new(
        config: &'a BackupConfig,
        executor: &'a mut BackupExecutor,
        metadata: Option<MetadataContext<'a>>,
    ) -> Self {
        Self {
            config,
            executor,
            metadata,
        }
    }

    /// 执行器（遍历时用于创建目录）
    pub fn executor(&mut self) -> &mut BackupExecutor {
        &mut *self.executor
    }

    /// 拆出执行器和元数据上下文
    pub fn into_parts(self) -> (&'a mut BackupExecutor, Option<MetadataContext<'a>>) {
        (self.executor, self.metadata)
    }

    fn stat(&self, path: &Path) -> io::Result<Metadata> {
        if self.config.follow_symlinks {
            fs::metadata(path)
        } else {
            fs::symlink_metadata(path)
        }
    }

    /// 处理单个文件
    ///
    /// # 决策顺序（先命中者生效）
    /// 1. **快速路径**：上一备份代同路径文件的大小和修改时间（按秒取整）都相同，直接硬链接
    /// 2. **哈希路径**：计算摘要，在历史索引中查找内容相同的文件，优先修改时间相同的候选
    /// 3. **复制路径**：没有可用的匹配，完整复制
    ///
    /// # 返回
    /// * `Ok((Outcome, u64))` - 处理结果和文件大小
    /// * `Err(BackupError)` - 由调用方根据 `is_fatal` 决定是否中止
    pub fn process(&mut self, task: &FileTask) -> Result<(Outcome, u64)> {
        let meta = self
            .stat(&task.src_path)
            .map_err(|e| BackupError::from_source_io(&task.src_path, "stat", e))?;
        let size = meta.len();
        let mtime = rounded_mtime(&meta);

        if let Some(old) = &task.old_path {
            if let Some(outcome) = self.fast_path(task, old, &meta, mtime)? {
                return Ok((outcome, size));
            }
        }

        let outcome = match self.metadata.as_mut() {
            Some(ctx) => hash_link(ctx, self.config, self.executor, task, &meta, mtime)?,
            None => {
                self.executor.copy(&task.src_path, &task.dest_path, &meta)?;
                Outcome::Copied {
                    possible_match: None,
                }
            }
        };
        Ok((outcome, size))
    }

    /// 快速路径：与上一备份代的同路径文件比较大小和修改时间
    ///
    /// 未命中返回 `Ok(None)`。上一备份代的文件在比较之后消失，或其链接数已满，
    /// 同样视为未命中。
    fn fast_path(
        &mut self,
        task: &FileTask,
        old: &Path,
        meta: &Metadata,
        mtime: i64,
    ) -> Result<Option<Outcome>> {
        let Ok(old_meta) = self.stat(old) else {
            return Ok(None);
        };
        if old_meta.is_dir()
            || old_meta.file_type().is_symlink() != meta.file_type().is_symlink()
            || old_meta.len() != meta.len()
            || rounded_mtime(&old_meta) != mtime
        {
            return Ok(None);
        }

        // 先确定内容哈希，再落盘，避免出现没有 File 行的链接
        let digest = match self.metadata.as_ref() {
            Some(ctx) => Some(resolve_previous_digest(ctx, task, self.config.follow_symlinks)?),
            None => None,
        };

        if let Err(e) = self.executor.hard_link(old, &task.dest_path) {
            return match fast_link_error(old, &task.dest_path, e) {
                Some(err) => Err(err),
                None => Ok(None),
            };
        }
        trace!(path = ?task.rel_path, "fast path");

        if let (Some(ctx), Some(digest)) = (self.metadata.as_mut(), digest) {
            record_file(ctx, task, &digest, meta.len(), mtime)?;
        }

        Ok(Some(Outcome::Linked {
            target: old.to_path_buf(),
        }))
    }
}

/// 哈希路径：按摘要在历史中查找内容相同的文件
///
/// 优先选择修改时间相同且仍然存在的候选；否则只有在允许时才链接到
/// 修改时间不同的候选。候选的链接数已满时改为复制。
/// 文件落盘之后才写入哈希行和 File 行。
fn hash_link(
    ctx: &mut MetadataContext<'_>,
    config: &BackupConfig,
    executor: &mut BackupExecutor,
    task: &FileTask,
    meta: &Metadata,
    mtime: i64,
) -> Result<Outcome> {
    let digest = hash_path(&task.src_path, config.follow_symlinks)?;
    let size = meta.len();

    let candidates = ctx
        .history
        .candidates(ctx.current, &digest, size, &config.destination)?;

    let exact = candidates
        .iter()
        .find(|c| c.file.mtime == mtime && executor.is_live(&c.physical, size));
    let fallback = match exact {
        Some(_) => None,
        None => candidates
            .iter()
            .find(|c| executor.is_live(&c.physical, size)),
    };

    let mut linked = None;
    if let Some(candidate) = exact {
        if link_candidate(executor, &candidate.physical, &task.dest_path)? {
            linked = Some(Outcome::HashLinked {
                target: candidate.physical.clone(),
                mtime_mismatch: false,
            });
        }
    } else if let Some(candidate) = fallback.filter(|_| config.link_mtime_mismatch) {
        if link_candidate(executor, &candidate.physical, &task.dest_path)? {
            // 不用较旧的时间戳覆盖较新的
            if mtime > candidate.file.mtime {
                executor.copy_attributes(meta, &task.dest_path)?;
            }
            linked = Some(Outcome::HashLinked {
                target: candidate.physical.clone(),
                mtime_mismatch: true,
            });
        }
    }

    let outcome = match linked {
        Some(outcome) => outcome,
        None => {
            let possible_match = fallback
                .filter(|_| !config.link_mtime_mismatch)
                .map(|c| c.physical.clone());
            if let Some(candidate) = &possible_match {
                debug!(
                    path = ?task.rel_path,
                    ?candidate,
                    "content match with different mtime, copying"
                );
            }
            executor.copy(&task.src_path, &task.dest_path, meta)?;
            Outcome::Copied { possible_match }
        }
    };

    record_file(ctx, task, &digest, size, mtime)?;
    Ok(outcome)
}

/// 为当前路径写入哈希行和 File 行
fn record_file(
    ctx: &mut MetadataContext<'_>,
    task: &FileTask,
    digest: &ContentDigest,
    size: u64,
    mtime: i64,
) -> Result<()> {
    let hash_id = ctx.current.insert_hash(&digest.hex, size, digest.is_symlink)?;
    ctx.current
        .insert_file(&task.key(), mtime, ctx.folder_id, hash_id)?;
    Ok(())
}

/// 为快速路径确定内容摘要
///
/// 上一备份代有对应的 File 行时直接复用其哈希，不重新计算；
/// 否则现场计算摘要，使元数据链在历史缺失索引时也能自我修复。
fn resolve_previous_digest(
    ctx: &MetadataContext<'_>,
    task: &FileTask,
    follow_symlinks: bool,
) -> Result<ContentDigest> {
    if let Some(prev) = &ctx.previous {
        if let Some(row) = prev.store.file(&task.key(), prev.folder_id)? {
            let hash = prev.store.referenced_hash(row.hash_id)?;
            return Ok(ContentDigest {
                hex: hash.digest,
                is_symlink: hash.is_symlink,
            });
        }
    }
    hash_path(&task.src_path, follow_symlinks)
}

/// 硬链接到哈希候选
///
/// 返回 `Ok(false)` 表示候选的链接数已满，调用方改为复制。
fn link_candidate(executor: &mut BackupExecutor, target: &Path, dest: &Path) -> Result<bool> {
    match executor.hard_link(target, dest) {
        Ok(()) => Ok(true),
        Err(e) => match candidate_link_error(target, dest, e) {
            Some(err) => Err(err),
            None => Ok(false),
        },
    }
}

/// 快速路径硬链接失败的分类
///
/// 上一备份代的文件已消失，或其 inode 的链接数已满时返回 `None`，
/// 改走哈希路径；其余错误视为存储故障。
fn fast_link_error(old: &Path, dest: &Path, e: io::Error) -> Option<BackupError> {
    if e.kind() == io::ErrorKind::NotFound && !old.exists() {
        debug!(?old, "previous file vanished, falling back to hash path");
        return None;
    }
    if e.kind() == io::ErrorKind::TooManyLinks {
        debug!(?old, "link limit reached, falling back to hash path");
        return None;
    }
    Some(BackupError::storage(dest, "link", e))
}

/// 哈希候选硬链接失败的分类
///
/// 链接数已满返回 `None`（改为复制）；空间耗尽中止运行；
/// 其余错误只放弃当前文件。
fn candidate_link_error(target: &Path, dest: &Path, e: io::Error) -> Option<BackupError> {
    match e.kind() {
        io::ErrorKind::TooManyLinks => {
            debug!(?target, "link limit reached, copying instead");
            None
        }
        io::ErrorKind::StorageFull => Some(BackupError::storage(dest, "link", e)),
        _ => Some(BackupError::Link {
            dest: dest.to_path_buf(),
            target: target.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn exhausted_links_fall_through() {
        let old = Path::new("/nonexistent/old");
        let dest = Path::new("/nonexistent/dest");
        assert!(fast_link_error(old, dest, Error::from(ErrorKind::TooManyLinks)).is_none());
        assert!(candidate_link_error(old, dest, Error::from(ErrorKind::TooManyLinks)).is_none());
    }

    #[test]
    fn vanished_previous_file_falls_through() {
        let old = Path::new("/nonexistent/old");
        let dest = Path::new("/nonexistent/dest");
        assert!(fast_link_error(old, dest, Error::from(ErrorKind::NotFound)).is_none());
    }

    #[test]
    fn other_fast_path_failures_abort_the_run() {
        let dir = tempfile::TempDir::new().unwrap();
        let old = dir.path().join("old");
        std::fs::write(&old, "x").unwrap();
        let err = fast_link_error(&old, Path::new("dest"), Error::from(ErrorKind::NotFound)).unwrap();
        assert!(matches!(err, BackupError::Storage { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn candidate_failures_skip_only_the_file() {
        let target = Path::new("target");
        let dest = Path::new("dest");
        let err = candidate_link_error(target, dest, Error::from(ErrorKind::PermissionDenied)).unwrap();
        assert!(matches!(err, BackupError::Link { .. }));
        assert!(!err.is_fatal());

        let err = candidate_link_error(target, dest, Error::from(ErrorKind::StorageFull)).unwrap();
        assert!(err.is_fatal());
    }
}
