// Goldfish - 文件哈希计算模块
// 使用 SHA-256 计算文件内容（或符号链接目标）的摘要，用于跨代去重

use crate::error::{BackupError, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;

/// 读取缓冲区大小
const READ_BUFFER: usize = 1024 * 1024;

/// 哈希计算块大小
const CHUNK: usize = 64 * 1024;

/// 内容摘要
///
/// `is_symlink` 为真时，摘要是对符号链接目标字符串计算的，
/// 而不是对文件内容。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentDigest {
    /// 十六进制编码的 SHA-256
    pub hex: String,

    /// 是否为符号链接目标的摘要
    pub is_symlink: bool,
}

/// 计算路径内容的摘要
///
/// # 参数
/// * `path` - 文件路径
/// * `follow_symlinks` - 为 `false` 且路径是符号链接时，对链接目标字符串计算摘要
///
/// # 返回
/// * `Ok(ContentDigest)` - 摘要
/// * `Err(BackupError)` - 读取过程中文件消失或不可读；不做重试
///
/// # 实现细节
/// - 使用 1MB 的缓冲读取器
/// - 以 64KB 为单位更新摘要，内存占用与文件大小无关
pub fn hash_path(path: &Path, follow_symlinks: bool) -> Result<ContentDigest> {
    if !follow_symlinks {
        let meta = fs::symlink_metadata(path)
            .map_err(|e| BackupError::from_source_io(path, "stat", e))?;
        if meta.file_type().is_symlink() {
            let target =
                fs::read_link(path).map_err(|e| BackupError::from_source_io(path, "readlink", e))?;
            let mut hasher = Sha256::new();
            hasher.update(target.to_string_lossy().as_bytes());
            return Ok(ContentDigest {
                hex: hex::encode(hasher.finalize()),
                is_symlink: true,
            });
        }
    }

    let file = File::open(path).map_err(|e| BackupError::from_source_io(path, "open", e))?;
    let mut reader = BufReader::with_capacity(READ_BUFFER, file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK];

    loop {
        let count = reader
            .read(&mut buffer)
            .map_err(|e| BackupError::from_source_io(path, "read", e))?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }

    Ok(ContentDigest {
        hex: hex::encode(hasher.finalize()),
        is_symlink: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn identical_bytes_give_identical_digests() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, "hello").unwrap();
        fs::write(&b, "hello").unwrap();

        let da = hash_path(&a, true).unwrap();
        let db = hash_path(&b, true).unwrap();
        assert_eq!(da, db);
        assert!(!da.is_symlink);
        assert_eq!(
            da.hex,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn missing_file_is_a_race() {
        let dir = TempDir::new().unwrap();
        let err = hash_path(&dir.path().join("gone"), true).unwrap_err();
        assert!(matches!(err, BackupError::FsRace { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn unfollowed_symlink_hashes_its_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        fs::write(&target, "payload").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let followed = hash_path(&link, true).unwrap();
        let raw = hash_path(&link, false).unwrap();
        assert!(!followed.is_symlink);
        assert!(raw.is_symlink);
        assert_eq!(followed, hash_path(&target, true).unwrap());
        assert_ne!(followed.hex, raw.hex);
    }
}
