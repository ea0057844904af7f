// Goldfish - 错误类型模块
// 定义备份引擎在各个阶段可能出现的错误种类

use std::path::PathBuf;
use thiserror::Error;

/// 库内统一使用的 Result 类型
pub type Result<T> = std::result::Result<T, BackupError>;

/// 备份引擎错误
///
/// 错误按照处理方式分为两类：
/// - 致命错误：立即中止整个备份运行
/// - 单文件错误：仅中止当前文件的处理，遍历继续
#[derive(Debug, Error)]
pub enum BackupError {
    /// 配置校验失败（在任何写入之前发生）
    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Config(Vec<String>),

    /// 文件在 stat 与读取之间被外部修改或删除
    #[error("{path:?} changed during {op}: {source}")]
    FsRace {
        path: PathBuf,
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// 元数据库中的 File 行引用了本库中不存在的 ContentHash
    #[error("metadata of generation {generation} is inconsistent: {detail}")]
    MetadataInconsistency { generation: String, detail: String },

    /// 复制或链接时存储空间不足 / 权限不足
    #[error("storage failure during {op} on {path:?}: {source}")]
    Storage {
        path: PathBuf,
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// 已选中的哈希候选文件无法建立硬链接
    #[error("failed to link {dest:?} to {target:?}: {source}")]
    Link {
        dest: PathBuf,
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 元数据库操作失败
    #[error("metadata store {path:?}: {source}")]
    Database {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// 其他 I/O 错误
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BackupError {
    /// 是否需要中止整个运行
    ///
    /// 文件竞争和链接失败只影响当前文件，其余错误都会终止运行。
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BackupError::FsRace { .. } | BackupError::Link { .. })
    }

    /// 将源文件读取阶段的 I/O 错误分类
    ///
    /// 文件消失或不可读视为文件竞争，其余视为普通 I/O 错误。
    pub(crate) fn from_source_io(
        path: impl Into<PathBuf>,
        op: &'static str,
        source: std::io::Error,
    ) -> Self {
        use std::io::ErrorKind;
        let path = path.into();
        match source.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::UnexpectedEof => {
                BackupError::FsRace { path, op, source }
            }
            _ => BackupError::Io { path, source },
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, op: &'static str, source: std::io::Error) -> Self {
        BackupError::Storage {
            path: path.into(),
            op,
            source,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BackupError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn db(path: impl Into<PathBuf>, source: rusqlite::Error) -> Self {
        BackupError::Database {
            path: path.into(),
            source,
        }
    }
}
