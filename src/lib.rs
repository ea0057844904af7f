// Goldfish - 基于硬链接和内容哈希索引的去重增量备份工具
// 模块声明文件

/// 链接决策结果和统计数据结构
pub mod actions;

/// 命令行输出与交互模块
pub mod cli;

/// 备份配置管理模块
pub mod config;

/// 错误类型模块
pub mod error;

/// 备份执行器模块（所有物理写入）
pub mod executor;

/// 备份代命名与枚举模块
pub mod generation;

/// 文件哈希计算模块
pub mod hasher;

/// 历史索引模块
pub mod history;

/// 链接决策模块
pub mod linker;

/// 元数据库模块
pub mod metadata;

/// 孤立元数据清理模块
pub mod prune;

/// 进度报告模块
pub mod report;

/// 源目录遍历模块
pub mod scanner;

/// 备份大小统计模块
pub mod size;

/// 工具函数模块
pub mod utils;

pub use config::{BackupConfig, ConfigFile};
pub use error::{BackupError, Result};
pub use generation::GenerationId;
pub use scanner::{run_backup, RunSummary};
