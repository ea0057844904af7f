// Goldfish - 历史索引模块
// 将多个历史备份代的只读元数据库串成一条链，按摘要查找历史文件

use crate::error::Result;
use crate::generation::{list_in_metadata, GenerationId};
use crate::hasher::ContentDigest;
use crate::metadata::{HashedFile, MetadataStore};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 历史链：历史备份代的只读元数据库，最新的在前
///
/// 当前备份代的可写库不在链中，由调用方单独传入。
pub struct HistoryChain {
    stores: Vec<MetadataStore>,
}

/// 哈希匹配的候选文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// 所属备份代、文件夹、相对路径与记录的修改时间
    pub file: HashedFile,

    /// 候选文件在备份存储上的物理路径
    pub physical: PathBuf,
}

impl HistoryChain {
    /// 空链（未启用元数据或没有历史）
    pub fn empty() -> Self {
        Self { stores: Vec::new() }
    }

    /// 打开比 `current` 更早的备份代元数据库
    ///
    /// # 参数
    /// * `metadata_dir` - 元数据目录
    /// * `current` - 当前备份代
    /// * `depth` - 最多查询的历史备份代数量，`None` 表示不限
    ///
    /// 无法打开的数据库会被跳过，相当于该备份代没有索引。
    pub fn open(metadata_dir: &Path, current: &GenerationId, depth: Option<usize>) -> Result<Self> {
        let generations: Vec<GenerationId> = list_in_metadata(metadata_dir)?
            .into_iter()
            .rev()
            .filter(|g| g < current)
            .take(depth.unwrap_or(usize::MAX))
            .collect();

        let mut stores = Vec::with_capacity(generations.len());
        for generation in generations {
            match MetadataStore::open_read_only(&generation.store_path(metadata_dir)) {
                Ok(store) => stores.push(store),
                Err(e) => warn!(%generation, error = %e, "skipping unreadable metadata store"),
            }
        }
        debug!(len = stores.len(), "history chain opened");
        Ok(Self { stores })
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// 查找与给定内容哈希相同的所有已知文件，最新的备份代在前
    ///
    /// 先查当前备份代（本次运行中已经写入的文件），再依次查询历史链。
    /// 只读查询，当前库中还没有该哈希时不会写入。
    pub fn candidates(
        &self,
        current: &MetadataStore,
        digest: &ContentDigest,
        size: u64,
        destination: &Path,
    ) -> Result<Vec<Candidate>> {
        let mut files = Vec::new();
        for store in std::iter::once(current).chain(&self.stores) {
            if let Some(id) = store.hash_id(&digest.hex, size, digest.is_symlink)? {
                files.extend(store.files_with_hash(id)?);
            }
        }

        Ok(files
            .into_iter()
            .map(|file| {
                let physical = destination
                    .join(&file.generation)
                    .join(&file.folder)
                    .join(&file.path);
                Candidate { file, physical }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn digest(hex: &str) -> ContentDigest {
        ContentDigest {
            hex: hex.to_string(),
            is_symlink: false,
        }
    }

    fn seed(dir: &Path, generation: &str, path: &str, digest: &str) {
        let g = GenerationId::parse(generation).unwrap();
        let mut store = MetadataStore::create(&g.store_path(dir), generation).unwrap();
        let folder = store.insert_folder("docs").unwrap();
        let hash = store.insert_hash(digest, 5, false).unwrap();
        store.insert_file(path, 100, folder, hash).unwrap();
        store.finish().unwrap();
    }

    #[test]
    fn candidates_come_newest_generation_first() {
        let dir = TempDir::new().unwrap();
        seed(dir.path(), "2024-01-01_00-00-00", "one.txt", "abc");
        seed(dir.path(), "2024-01-02_00-00-00", "two.txt", "abc");
        seed(dir.path(), "2024-01-03_00-00-00", "three.txt", "other");

        let current_id = GenerationId::parse("2024-01-04_00-00-00").unwrap();
        let chain = HistoryChain::open(dir.path(), &current_id, None).unwrap();
        assert_eq!(chain.len(), 3);

        let current = MetadataStore::create_in_memory(current_id.as_str()).unwrap();
        let found = chain
            .candidates(&current, &digest("abc"), 5, Path::new("/backup"))
            .unwrap();
        let paths: Vec<&str> = found.iter().map(|c| c.file.path.as_str()).collect();
        assert_eq!(paths, vec!["two.txt", "one.txt"]);
        assert_eq!(
            found[0].physical,
            Path::new("/backup/2024-01-02_00-00-00/docs/two.txt")
        );
    }

    #[test]
    fn depth_bounds_the_chain() {
        let dir = TempDir::new().unwrap();
        seed(dir.path(), "2024-01-01_00-00-00", "one.txt", "abc");
        seed(dir.path(), "2024-01-02_00-00-00", "two.txt", "xyz");

        let current_id = GenerationId::parse("2024-01-04_00-00-00").unwrap();
        let chain = HistoryChain::open(dir.path(), &current_id, Some(1)).unwrap();
        assert_eq!(chain.len(), 1);

        let current = MetadataStore::create_in_memory(current_id.as_str()).unwrap();
        assert!(chain
            .candidates(&current, &digest("abc"), 5, Path::new("/b"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn lookup_does_not_touch_the_current_store() {
        let dir = TempDir::new().unwrap();
        let current_id = GenerationId::parse("2024-01-04_00-00-00").unwrap();
        let chain = HistoryChain::open(dir.path(), &current_id, None).unwrap();

        let mut current = MetadataStore::create_in_memory(current_id.as_str()).unwrap();
        let folder = current.insert_folder("docs").unwrap();
        let h = current.insert_hash("abc", 5, false).unwrap();
        current.insert_file("first.txt", 100, folder, h).unwrap();

        let found = chain
            .candidates(&current, &digest("abc"), 5, Path::new("/b"))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].file.path, "first.txt");

        assert!(chain
            .candidates(&current, &digest("new"), 5, Path::new("/b"))
            .unwrap()
            .is_empty());
        assert_eq!(current.hash_count().unwrap(), 1);
    }
}
