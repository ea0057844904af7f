// Goldfish - 备份大小统计模块
// 统计某个已备份文件夹的总大小，以及删除它能真正释放的空间

use crate::error::{BackupError, Result};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// 文件夹大小统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SizeReport {
    /// 全部文件的字节数（硬链接按每个目录项计算）
    pub total: u64,

    /// 只被这里引用的文件字节数（链接数为 1），即删除后可释放的空间
    pub exclusive: u64,
}

/// 统计文件夹大小
pub fn folder_size(path: &Path) -> Result<SizeReport> {
    if !path.exists() {
        return Err(BackupError::Config(vec![format!(
            "{:?} does not exist",
            path
        )]));
    }

    let mut report = SizeReport::default();
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(|e| {
            let p = e.path().map(Path::to_path_buf).unwrap_or_default();
            BackupError::io(p, e.into())
        })?;
        if entry.file_type().is_dir() {
            continue;
        }
        let meta = fs::symlink_metadata(entry.path()).map_err(|e| BackupError::io(entry.path(), e))?;
        report.total += meta.len();
        if link_count(&meta) == 1 {
            report.exclusive += meta.len();
        }
    }
    Ok(report)
}

#[cfg(unix)]
fn link_count(meta: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.nlink()
}

#[cfg(not(unix))]
fn link_count(_meta: &fs::Metadata) -> u64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    #[test]
    fn shared_files_are_not_freed() {
        let dir = TempDir::new().unwrap();
        let gen = dir.path().join("gen");
        fs::create_dir(&gen).unwrap();
        fs::write(gen.join("own"), "12345").unwrap();
        fs::write(dir.path().join("elsewhere"), "abc").unwrap();
        fs::hard_link(dir.path().join("elsewhere"), gen.join("shared")).unwrap();

        let report = folder_size(&gen).unwrap();
        assert_eq!(report.total, 8);
        assert_eq!(report.exclusive, 5);
    }
}
