// Goldfish - 备份代（Generation）管理模块
// 负责备份代的命名、枚举，以及存储与元数据两侧的对照

use crate::error::{BackupError, Result};
use chrono::{Local, NaiveDateTime};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// 备份代目录名格式：`YYYY-MM-DD_HH-MM-SS`
pub const GENERATION_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// 元数据库文件扩展名
pub const STORE_EXTENSION: &str = "sqlite";

/// 备份代标识
///
/// 名称本身就是时间戳，字典序即时间顺序。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenerationId(String);

impl GenerationId {
    /// 以当前本地时间生成新的备份代标识
    pub fn now() -> Self {
        Self(Local::now().format(GENERATION_FORMAT).to_string())
    }

    /// 解析备份代名称，不符合时间戳格式的返回 `None`
    pub fn parse(name: &str) -> Option<Self> {
        NaiveDateTime::parse_from_str(name, GENERATION_FORMAT)
            .ok()
            .map(|_| Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 该备份代在目标根目录下的路径
    pub fn dir(&self, destination: &Path) -> PathBuf {
        destination.join(&self.0)
    }

    /// 该备份代的元数据库路径
    pub fn store_path(&self, metadata_dir: &Path) -> PathBuf {
        metadata_dir.join(format!("{}.{}", self.0, STORE_EXTENSION))
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 列出目标目录中所有备份代（最旧的在前）
///
/// 名称不是有效时间戳的条目（如元数据目录）会被忽略。
pub fn list_on_storage(destination: &Path) -> Result<Vec<GenerationId>> {
    if !destination.exists() {
        return Ok(Vec::new());
    }

    let mut generations: Vec<GenerationId> = fs::read_dir(destination)
        .map_err(|e| BackupError::io(destination, e))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().and_then(GenerationId::parse))
        .collect();

    generations.sort();
    Ok(generations)
}

/// 列出拥有元数据库的备份代（最旧的在前）
pub fn list_in_metadata(metadata_dir: &Path) -> Result<Vec<GenerationId>> {
    if !metadata_dir.exists() {
        return Ok(Vec::new());
    }

    let mut generations: Vec<GenerationId> = fs::read_dir(metadata_dir)
        .map_err(|e| BackupError::io(metadata_dir, e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext == STORE_EXTENSION)
        })
        .filter_map(|path| {
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(GenerationId::parse)
        })
        .collect();

    generations.sort();
    Ok(generations)
}

/// 查找某个文件夹的上一个备份代
///
/// 返回比 `current` 更早、且目录中包含 `folder` 的最新备份代。
pub fn find_previous(
    destination: &Path,
    current: &GenerationId,
    folder: &str,
) -> Result<Option<GenerationId>> {
    Ok(list_on_storage(destination)?
        .into_iter()
        .rev()
        .filter(|g| g < current)
        .find(|g| g.dir(destination).join(folder).is_dir()))
}

/// 单个文件夹在存储与元数据两侧的存在情况
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Presence {
    /// 存在于备份存储上
    pub on_storage: bool,

    /// 存在于元数据库中
    pub in_metadata: bool,
}

/// 备份代清单：备份代 → 文件夹名 → 存在情况
pub type Inventory = BTreeMap<GenerationId, BTreeMap<String, Presence>>;

/// 汇总存储与元数据两侧的全部备份代和文件夹
///
/// # 参数
/// * `destination` - 备份目标根目录
/// * `metadata_dir` - 元数据目录；`None` 表示未启用元数据
pub fn inventory(destination: &Path, metadata_dir: Option<&Path>) -> Result<Inventory> {
    let mut inv = Inventory::new();

    for generation in list_on_storage(destination)? {
        let dir = generation.dir(destination);
        let folders = inv.entry(generation).or_default();
        for entry in fs::read_dir(&dir).map_err(|e| BackupError::io(&dir, e))? {
            let entry = entry.map_err(|e| BackupError::io(&dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            folders.entry(name).or_default().on_storage = true;
        }
    }

    if let Some(metadata_dir) = metadata_dir {
        for generation in list_in_metadata(metadata_dir)? {
            let store = crate::metadata::MetadataStore::open_read_only(
                &generation.store_path(metadata_dir),
            )?;
            let folders = inv.entry(generation).or_default();
            for folder in store.folders()? {
                folders.entry(folder.name).or_default().in_metadata = true;
            }
        }
    }

    Ok(inv)
}

/// 只存在于元数据中、存储上已经不存在的文件夹
pub fn orphaned_folders(inv: &Inventory) -> Vec<(GenerationId, String)> {
    inv.iter()
        .rev()
        .flat_map(|(generation, folders)| {
            folders
                .iter()
                .filter(|(_, p)| p.in_metadata && !p.on_storage)
                .map(move |(name, _)| (generation.clone(), name.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_rejects_non_timestamps() {
        assert!(GenerationId::parse("2024-01-15_14-30-00").is_some());
        assert!(GenerationId::parse(".goldfish").is_none());
        assert!(GenerationId::parse("2024-13-15_14-30-00").is_none());
    }

    #[test]
    fn storage_listing_is_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        for name in ["2024-01-02_00-00-00", "2024-01-01_00-00-00", ".goldfish", "junk"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        let names: Vec<String> = list_on_storage(dir.path())
            .unwrap()
            .iter()
            .map(|g| g.to_string())
            .collect();
        assert_eq!(names, vec!["2024-01-01_00-00-00", "2024-01-02_00-00-00"]);
    }

    #[test]
    fn previous_generation_must_contain_the_folder() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("2024-01-01_00-00-00/docs")).unwrap();
        fs::create_dir_all(dir.path().join("2024-01-02_00-00-00/photos")).unwrap();
        let current = GenerationId::parse("2024-01-03_00-00-00").unwrap();

        let prev = find_previous(dir.path(), &current, "docs").unwrap();
        assert_eq!(prev.unwrap().as_str(), "2024-01-01_00-00-00");
        assert!(find_previous(dir.path(), &current, "music").unwrap().is_none());
    }

    #[test]
    fn previous_generation_ignores_newer_ones() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("2024-01-05_00-00-00/docs")).unwrap();
        let current = GenerationId::parse("2024-01-03_00-00-00").unwrap();
        assert!(find_previous(dir.path(), &current, "docs").unwrap().is_none());
    }
}
