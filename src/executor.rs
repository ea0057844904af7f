// Goldfish - 备份执行器模块
// 负责执行实际的文件操作（创建目录、硬链接、复制、同步），试运行时只做记录

use crate::error::{BackupError, Result};
use filetime::FileTime;
use std::collections::HashSet;
use std::fs::{self, Metadata};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::trace;

/// 复制时每次读取的块大小
const COPY_CHUNK_SIZE: usize = 1024 * 1024;

/// 备份执行器
///
/// 所有物理写入都经过这里。试运行模式下不写盘，但会记住本应创建的路径，
/// 使后续的存活检查与真实运行得出相同的结论。
pub struct BackupExecutor {
    /// 是否为试运行模式
    dry_run: bool,

    /// 是否跟随符号链接
    follow_symlinks: bool,

    /// 试运行中“已创建”的路径
    planned: HashSet<PathBuf>,
}

impl BackupExecutor {
    pub fn new(dry_run: bool, follow_symlinks: bool) -> Self {
        Self {
            dry_run,
            follow_symlinks,
            planned: HashSet::new(),
        }
    }

    /// 创建目录（备份代中的目录总是新建，从不链接）
    pub fn create_dir(&mut self, path: &Path) -> Result<()> {
        if self.dry_run {
            self.planned.insert(path.to_path_buf());
            return Ok(());
        }
        fs::create_dir_all(path).map_err(|e| BackupError::storage(path, "mkdir", e))
    }

    /// 创建硬链接
    ///
    /// 返回原始 I/O 错误，由调用方决定其归类。
    pub fn hard_link(&mut self, target: &Path, dest: &Path) -> io::Result<()> {
        trace!(?target, ?dest, "hard link");
        if self.dry_run {
            self.planned.insert(dest.to_path_buf());
            return Ok(());
        }
        fs::hard_link(target, dest)
    }

    /// 完整复制文件，保留时间戳和权限
    ///
    /// 不跟随符号链接时，源符号链接会以相同目标重新创建。
    ///
    /// # 返回
    /// * `Ok(u64)` - 复制的字节数
    pub fn copy(&mut self, src: &Path, dest: &Path, src_meta: &Metadata) -> Result<u64> {
        trace!(?src, ?dest, "copy");
        let size = src_meta.len();
        if self.dry_run {
            self.planned.insert(dest.to_path_buf());
            return Ok(size);
        }

        if src_meta.file_type().is_symlink() {
            let target = fs::read_link(src).map_err(|e| BackupError::from_source_io(src, "readlink", e))?;
            make_symlink(&target, dest).map_err(|e| BackupError::storage(dest, "symlink", e))?;
            let mtime = FileTime::from_last_modification_time(src_meta);
            let atime = FileTime::from_last_access_time(src_meta);
            filetime::set_symlink_file_times(dest, atime, mtime)
                .map_err(|e| BackupError::storage(dest, "set times", e))?;
            return Ok(size);
        }

        // 源端错误按文件竞争分类，目标端错误才是存储故障
        let mut reader = fs::File::open(src).map_err(|e| BackupError::from_source_io(src, "open", e))?;
        let mut writer = fs::File::create(dest).map_err(|e| BackupError::storage(dest, "create", e))?;

        let bytes = match copy_content(&mut reader, &mut writer, src, dest) {
            Ok(bytes) => bytes,
            Err(e) => {
                drop(writer);
                let _ = fs::remove_file(dest);
                return Err(e);
            }
        };

        fs::set_permissions(dest, src_meta.permissions())
            .map_err(|e| BackupError::storage(dest, "chmod", e))?;
        apply_times(src_meta, dest)?;
        writer
            .sync_all()
            .map_err(|e| BackupError::storage(dest, "fsync", e))?;

        Ok(bytes)
    }

    /// 将源文件的时间戳和权限复制到目标上
    ///
    /// 用于修改时间不一致的哈希链接：目标与历史文件共享 inode。
    pub fn copy_attributes(&mut self, src_meta: &Metadata, dest: &Path) -> Result<()> {
        if self.dry_run || src_meta.file_type().is_symlink() {
            return Ok(());
        }
        fs::set_permissions(dest, src_meta.permissions())
            .map_err(|e| BackupError::storage(dest, "chmod", e))?;
        apply_times(src_meta, dest)
    }

    /// 检查已备份文件是否仍然存在且大小一致
    pub fn is_live(&self, path: &Path, size: u64) -> bool {
        if self.dry_run && self.planned.contains(path) {
            return true;
        }
        let meta = if self.follow_symlinks {
            fs::metadata(path)
        } else {
            fs::symlink_metadata(path)
        };
        meta.map(|m| !m.is_dir() && m.len() == size).unwrap_or(false)
    }

    /// 同步目录，确保新建的目录项落盘
    pub fn sync_dir(&self, path: &Path) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        #[cfg(unix)]
        {
            fs::File::open(path)
                .and_then(|f| f.sync_all())
                .map_err(|e| BackupError::storage(path, "fsync", e))?;
        }
        #[cfg(not(unix))]
        let _ = path;
        Ok(())
    }
}

/// 分块复制文件内容
///
/// 读失败归于源文件，写失败归于目标存储。
fn copy_content(reader: &mut fs::File, writer: &mut fs::File, src: &Path, dest: &Path) -> Result<u64> {
    let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(BackupError::from_source_io(src, "read", e)),
        };
        writer
            .write_all(&buffer[..n])
            .map_err(|e| BackupError::storage(dest, "write", e))?;
        total += n as u64;
    }
    Ok(total)
}

/// 设置目标的访问时间和修改时间
///
/// 只读文件需要先取消只读才能设置时间戳，完成后恢复。
fn apply_times(src_meta: &Metadata, dest: &Path) -> Result<()> {
    let mtime = FileTime::from_last_modification_time(src_meta);
    let atime = FileTime::from_last_access_time(src_meta);

    let mut perms = fs::metadata(dest)
        .map_err(|e| BackupError::storage(dest, "stat", e))?
        .permissions();
    let original_readonly = perms.readonly();

    if original_readonly {
        perms.set_readonly(false);
        fs::set_permissions(dest, perms.clone())
            .map_err(|e| BackupError::storage(dest, "chmod", e))?;
    }

    filetime::set_file_times(dest, atime, mtime)
        .map_err(|e| BackupError::storage(dest, "set times", e))?;

    if original_readonly {
        perms.set_readonly(true);
        fs::set_permissions(dest, perms).map_err(|e| BackupError::storage(dest, "chmod", e))?;
    }
    Ok(())
}

#[cfg(unix)]
fn make_symlink(target: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, dest)
}

#[cfg(windows)]
fn make_symlink(target: &Path, dest: &Path) -> io::Result<()> {
    // Windows 需要区分目录符号链接和文件符号链接
    let is_dir = dest
        .parent()
        .map(|p| p.join(target).is_dir())
        .unwrap_or(false);
    if is_dir {
        std::os::windows::fs::symlink_dir(target, dest)
    } else {
        std::os::windows::fs::symlink_file(target, dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copy_preserves_mtime() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("dest");
        fs::write(&src, "hello").unwrap();
        filetime::set_file_mtime(&src, FileTime::from_unix_time(1_000_000, 0)).unwrap();

        let mut exec = BackupExecutor::new(false, true);
        let meta = fs::metadata(&src).unwrap();
        assert_eq!(exec.copy(&src, &dest, &meta).unwrap(), 5);

        let copied = fs::metadata(&dest).unwrap();
        assert_eq!(
            FileTime::from_last_modification_time(&copied).unix_seconds(),
            1_000_000
        );
        assert!(exec.is_live(&dest, 5));
        assert!(!exec.is_live(&dest, 6));
    }

    #[test]
    fn vanished_source_only_skips_the_file() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("dest");
        fs::write(&src, "hello").unwrap();
        let meta = fs::metadata(&src).unwrap();
        fs::remove_file(&src).unwrap();

        let err = BackupExecutor::new(false, true)
            .copy(&src, &dest, &meta)
            .unwrap_err();
        assert!(matches!(err, BackupError::FsRace { .. }));
        assert!(!err.is_fatal());
        assert!(!dest.exists());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_source_only_skips_the_file() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("dest");
        fs::write(&src, "hello").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o000)).unwrap();
        // root 不受权限位限制
        if fs::File::open(&src).is_ok() {
            return;
        }

        let meta = fs::metadata(&src).unwrap();
        let err = BackupExecutor::new(false, true)
            .copy(&src, &dest, &meta)
            .unwrap_err();
        assert!(matches!(err, BackupError::FsRace { .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn unwritable_destination_is_a_storage_failure() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        fs::write(&src, "hello").unwrap();
        let dest = dir.path().join("missing-dir/dest");

        let meta = fs::metadata(&src).unwrap();
        let err = BackupExecutor::new(false, true)
            .copy(&src, &dest, &meta)
            .unwrap_err();
        assert!(matches!(err, BackupError::Storage { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn dry_run_writes_nothing_but_remembers() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        fs::write(&src, "hello").unwrap();
        let dest = dir.path().join("gen/dest");

        let mut exec = BackupExecutor::new(true, true);
        exec.create_dir(&dir.path().join("gen")).unwrap();
        let meta = fs::metadata(&src).unwrap();
        assert_eq!(exec.copy(&src, &dest, &meta).unwrap(), 5);

        assert!(!dest.exists());
        assert!(!dir.path().join("gen").exists());
        assert!(exec.is_live(&dest, 5));
    }

    #[cfg(unix)]
    #[test]
    fn hard_link_shares_the_inode() {
        use std::os::unix::fs::MetadataExt;
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        fs::write(&target, "x").unwrap();
        let dest = dir.path().join("dest");

        BackupExecutor::new(false, true).hard_link(&target, &dest).unwrap();
        assert_eq!(
            fs::metadata(&target).unwrap().ino(),
            fs::metadata(&dest).unwrap().ino()
        );
    }
}
