// Goldfish - 备份配置管理模块
// 负责加载 TOML 配置文件，并一次性校验为不可变的备份配置

use crate::error::{BackupError, Result};
use crate::utils::folder_name;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// 元数据目录的默认名称（位于目标根目录下）
pub const DEFAULT_METADATA_DIR: &str = ".goldfish";

/// 配置文件中的元数据部分
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataFile {
    /// 是否启用元数据库（默认启用）
    pub enabled: Option<bool>,

    /// 元数据目录（默认 `<destination>/.goldfish`）
    pub dir: Option<PathBuf>,
}

/// 配置文件原始内容
///
/// 所有可选项都有文档化的默认值，由 [`ConfigFile::validate`] 填充。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// 备份目标根路径（必须已存在）
    pub destination: Option<PathBuf>,

    /// 要备份的源目录列表（每个都必须存在）
    #[serde(default)]
    pub sources: Vec<PathBuf>,

    /// 是否跟随符号链接（默认跟随）
    pub follow_symlinks: Option<bool>,

    /// 哈希匹配时最多查询的历史备份代数量（默认不限）
    pub history_depth: Option<usize>,

    /// 修改时间不一致时是否仍然允许哈希链接（默认不允许）
    pub link_mtime_mismatch: Option<bool>,

    #[serde(default)]
    pub metadata: MetadataFile,
}

impl ConfigFile {
    /// 从指定路径加载配置文件
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| BackupError::io(path, e))?;
        toml::from_str(&content)
            .map_err(|e| BackupError::Config(vec![format!("{}: {}", path.display(), e)]))
    }

    /// 默认配置文件路径
    ///
    /// - Linux: `~/.config/goldfish/config.toml`
    /// - macOS: `~/Library/Application Support/goldfish/config.toml`
    /// - Windows: `C:\Users\<用户>\AppData\Roaming\goldfish\config.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "goldfish").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// 校验配置并生成不可变的备份配置
    ///
    /// 一次性收集所有问题，全部列在 `BackupError::Config` 中返回。
    pub fn validate(self) -> Result<BackupConfig> {
        let mut issues = Vec::new();

        match &self.destination {
            None => issues.push("`destination` is required".to_string()),
            Some(dest) if !dest.is_dir() => {
                issues.push(format!("destination {:?} is not an existing directory", dest))
            }
            Some(_) => {}
        }

        if self.sources.is_empty() {
            issues.push("`sources` must list at least one directory".to_string());
        }
        let mut names = HashSet::new();
        for source in &self.sources {
            if !source.is_dir() {
                issues.push(format!("source {:?} is not an existing directory", source));
            }
            let name = folder_name(source);
            if !names.insert(name.clone()) {
                issues.push(format!(
                    "source {:?} shares the folder name {:?} with another source",
                    source, name
                ));
            }
        }

        if self.history_depth == Some(0) {
            issues.push("`history_depth` must be at least 1 when set".to_string());
        }

        if !issues.is_empty() {
            return Err(BackupError::Config(issues));
        }

        let destination = self.destination.unwrap_or_default();
        let metadata_dir = if self.metadata.enabled.unwrap_or(true) {
            Some(
                self.metadata
                    .dir
                    .unwrap_or_else(|| destination.join(DEFAULT_METADATA_DIR)),
            )
        } else {
            None
        };

        Ok(BackupConfig {
            destination,
            sources: self.sources,
            follow_symlinks: self.follow_symlinks.unwrap_or(true),
            history_depth: self.history_depth,
            metadata_dir,
            link_mtime_mismatch: self.link_mtime_mismatch.unwrap_or(false),
            dry_run: false,
        })
    }
}

/// 备份配置结构体（校验后的不可变值）
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// 备份目标根路径
    pub destination: PathBuf,

    /// 源目录列表
    pub sources: Vec<PathBuf>,

    /// 是否跟随符号链接（统一作用于 stat、哈希和链接）
    pub follow_symlinks: bool,

    /// 哈希匹配时最多查询的历史备份代数量
    pub history_depth: Option<usize>,

    /// 元数据目录；`None` 表示未启用元数据
    pub metadata_dir: Option<PathBuf>,

    /// 修改时间不一致时是否仍然允许哈希链接
    pub link_mtime_mismatch: bool,

    /// 是否为试运行模式（不做任何物理写入）
    pub dry_run: bool,
}

impl BackupConfig {
    /// 返回开启试运行模式的副本
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_filled_in() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("docs");
        fs::create_dir(&src).unwrap();

        let raw: ConfigFile = toml::from_str(&format!(
            "destination = {:?}\nsources = [{:?}]\n",
            dir.path(),
            src
        ))
        .unwrap();
        let config = raw.validate().unwrap();
        assert!(config.follow_symlinks);
        assert!(!config.link_mtime_mismatch);
        assert!(!config.dry_run);
        assert_eq!(config.history_depth, None);
        assert_eq!(config.metadata_dir, Some(dir.path().join(DEFAULT_METADATA_DIR)));
    }

    #[test]
    fn metadata_can_be_disabled() {
        let dir = TempDir::new().unwrap();
        let raw = ConfigFile {
            destination: Some(dir.path().to_path_buf()),
            sources: vec![dir.path().to_path_buf()],
            metadata: MetadataFile {
                enabled: Some(false),
                dir: None,
            },
            ..ConfigFile::default()
        };
        assert!(raw.validate().unwrap().metadata_dir.is_none());
    }

    #[test]
    fn every_issue_is_reported_at_once() {
        let dir = TempDir::new().unwrap();
        let raw = ConfigFile {
            destination: Some(dir.path().join("missing")),
            sources: vec![dir.path().join("a/docs"), dir.path().join("b/docs")],
            history_depth: Some(0),
            ..ConfigFile::default()
        };
        match raw.validate() {
            Err(BackupError::Config(issues)) => assert_eq!(issues.len(), 5),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<ConfigFile>("destinaton = \"/x\"").is_err());
    }
}
