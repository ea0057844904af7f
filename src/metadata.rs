// Goldfish - 元数据库模块
// 每个备份代一个 SQLite 数据库，记录文件夹、文件和内容哈希

use crate::error::{BackupError, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::debug;

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS generations (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS folders (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  generation_id INTEGER NOT NULL REFERENCES generations(id) ON DELETE CASCADE,
  CONSTRAINT folders_unique__name_generation UNIQUE (name, generation_id)
);
CREATE TABLE IF NOT EXISTS hashes (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  digest TEXT NOT NULL,
  size INTEGER NOT NULL,
  is_symlink INTEGER NOT NULL,
  CONSTRAINT hashes_unique__digest_size_symlink UNIQUE (digest, size, is_symlink)
);
CREATE TABLE IF NOT EXISTS files (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  path TEXT NOT NULL,
  mtime INTEGER NOT NULL,
  folder_id INTEGER NOT NULL REFERENCES folders(id) ON DELETE CASCADE,
  hash_id INTEGER NOT NULL REFERENCES hashes(id),
  CONSTRAINT files_unique__path_folder UNIQUE (path, folder_id)
);
CREATE INDEX IF NOT EXISTS files_hash_id ON files(hash_id);
";

/// 内容哈希行：(摘要, 大小, 是否符号链接) 三元组
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRow {
    pub id: i64,
    pub digest: String,
    pub size: u64,
    pub is_symlink: bool,
}

/// 文件行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRow {
    pub id: i64,
    pub path: String,
    pub mtime: i64,
    pub folder_id: i64,
    pub hash_id: i64,
}

/// 文件夹行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRow {
    pub id: i64,
    pub name: String,
}

/// 与某个内容哈希关联的文件，带所属备份代和文件夹名称
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedFile {
    pub generation: String,
    pub folder: String,
    pub path: String,
    pub mtime: i64,
}

/// 单个备份代的元数据库
///
/// 当前备份代以读写方式打开，历史备份代只读打开且从不修改。
pub struct MetadataStore {
    conn: Connection,
    path: PathBuf,
    generation: String,
    generation_id: i64,
    read_only: bool,
}

impl MetadataStore {
    /// 为新备份代创建元数据库
    ///
    /// 使用 WAL 日志与 `synchronous = FULL`，运行中崩溃不会破坏已提交的行。
    pub fn create(path: &Path, generation: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| BackupError::db(path, e))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| BackupError::db(path, e))?;
        Self::initialize(conn, path.to_path_buf(), generation)
    }

    /// 创建内存数据库（试运行模式，不落盘）
    pub fn create_in_memory(generation: &str) -> Result<Self> {
        let path = PathBuf::from(":memory:");
        let conn = Connection::open_in_memory().map_err(|e| BackupError::db(&path, e))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| BackupError::db(&path, e))?;
        Self::initialize(conn, path, generation)
    }

    fn initialize(conn: Connection, path: PathBuf, generation: &str) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| BackupError::db(&path, e))?;
        conn.execute(
            "INSERT OR IGNORE INTO generations(name) VALUES (?1)",
            params![generation],
        )
        .map_err(|e| BackupError::db(&path, e))?;
        let generation_id = conn
            .query_row(
                "SELECT id FROM generations WHERE name = ?1",
                params![generation],
                |row| row.get(0),
            )
            .map_err(|e| BackupError::db(&path, e))?;

        debug!(store = %path.display(), generation, "metadata store ready");
        Ok(Self {
            conn,
            path,
            generation: generation.to_string(),
            generation_id,
            read_only: false,
        })
    }

    /// 只读打开历史备份代的元数据库
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags).map_err(|e| BackupError::db(path, e))?;
        Self::attach_existing(conn, path, true)
    }

    /// 读写打开已有的元数据库（仅供清理使用）
    pub fn open(path: &Path) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags).map_err(|e| BackupError::db(path, e))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| BackupError::db(path, e))?;
        Self::attach_existing(conn, path, false)
    }

    fn attach_existing(conn: Connection, path: &Path, read_only: bool) -> Result<Self> {
        let (generation_id, generation): (i64, String) = conn
            .query_row(
                "SELECT id, name FROM generations ORDER BY id LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| BackupError::db(path, e))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            generation,
            generation_id,
            read_only,
        })
    }

    /// 所属备份代名称
    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn err(&self, e: rusqlite::Error) -> BackupError {
        BackupError::db(&self.path, e)
    }

    /// 插入文件夹，已存在时返回已有行的 id
    pub fn insert_folder(&mut self, name: &str) -> Result<i64> {
        let tx = self.conn.transaction().map_err(|e| BackupError::db(&self.path, e))?;
        tx.execute(
            "INSERT OR IGNORE INTO folders(name, generation_id) VALUES (?1, ?2)",
            params![name, self.generation_id],
        )
        .map_err(|e| BackupError::db(&self.path, e))?;
        let id = tx
            .query_row(
                "SELECT id FROM folders WHERE name = ?1 AND generation_id = ?2",
                params![name, self.generation_id],
                |row| row.get(0),
            )
            .map_err(|e| BackupError::db(&self.path, e))?;
        tx.commit().map_err(|e| BackupError::db(&self.path, e))?;
        Ok(id)
    }

    pub fn folder_id(&self, name: &str) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT id FROM folders WHERE name = ?1 AND generation_id = ?2",
                params![name, self.generation_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| self.err(e))
    }

    pub fn folders(&self) -> Result<Vec<FolderRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM folders ORDER BY name")
            .map_err(|e| self.err(e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(FolderRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .map_err(|e| self.err(e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| self.err(e))
    }

    /// 插入内容哈希，(摘要, 大小, 符号链接) 已存在时返回已有行的 id
    ///
    /// 唯一约束保证重复插入是幂等的。
    pub fn insert_hash(&mut self, digest: &str, size: u64, is_symlink: bool) -> Result<i64> {
        let tx = self.conn.transaction().map_err(|e| BackupError::db(&self.path, e))?;
        tx.execute(
            "INSERT OR IGNORE INTO hashes(digest, size, is_symlink) VALUES (?1, ?2, ?3)",
            params![digest, size as i64, is_symlink],
        )
        .map_err(|e| BackupError::db(&self.path, e))?;
        let id = tx
            .query_row(
                "SELECT id FROM hashes WHERE digest = ?1 AND size = ?2 AND is_symlink = ?3",
                params![digest, size as i64, is_symlink],
                |row| row.get(0),
            )
            .map_err(|e| BackupError::db(&self.path, e))?;
        tx.commit().map_err(|e| BackupError::db(&self.path, e))?;
        Ok(id)
    }

    pub fn hash_id(&self, digest: &str, size: u64, is_symlink: bool) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT id FROM hashes WHERE digest = ?1 AND size = ?2 AND is_symlink = ?3",
                params![digest, size as i64, is_symlink],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| self.err(e))
    }

    pub fn hash(&self, id: i64) -> Result<Option<HashRow>> {
        self.conn
            .query_row(
                "SELECT id, digest, size, is_symlink FROM hashes WHERE id = ?1",
                params![id],
                |row| {
                    Ok(HashRow {
                        id: row.get(0)?,
                        digest: row.get(1)?,
                        size: row.get::<_, i64>(2)? as u64,
                        is_symlink: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(|e| self.err(e))
    }

    /// 读取 File 行引用的内容哈希行
    ///
    /// File 行引用的哈希必须存在于同一个库中，找不到说明该库的元数据已损坏。
    pub fn referenced_hash(&self, id: i64) -> Result<HashRow> {
        self.hash(id)?.ok_or_else(|| BackupError::MetadataInconsistency {
            generation: self.generation.clone(),
            detail: format!("file references missing content hash #{}", id),
        })
    }

    /// 插入文件行，(路径, 文件夹) 已存在时返回已有行的 id
    pub fn insert_file(&mut self, path: &str, mtime: i64, folder_id: i64, hash_id: i64) -> Result<i64> {
        let tx = self.conn.transaction().map_err(|e| BackupError::db(&self.path, e))?;
        tx.execute(
            "INSERT OR IGNORE INTO files(path, mtime, folder_id, hash_id) VALUES (?1, ?2, ?3, ?4)",
            params![path, mtime, folder_id, hash_id],
        )
        .map_err(|e| BackupError::db(&self.path, e))?;
        let id = tx
            .query_row(
                "SELECT id FROM files WHERE path = ?1 AND folder_id = ?2",
                params![path, folder_id],
                |row| row.get(0),
            )
            .map_err(|e| BackupError::db(&self.path, e))?;
        tx.commit().map_err(|e| BackupError::db(&self.path, e))?;
        Ok(id)
    }

    pub fn file(&self, path: &str, folder_id: i64) -> Result<Option<FileRow>> {
        self.conn
            .query_row(
                "SELECT id, path, mtime, folder_id, hash_id FROM files WHERE path = ?1 AND folder_id = ?2",
                params![path, folder_id],
                |row| {
                    Ok(FileRow {
                        id: row.get(0)?,
                        path: row.get(1)?,
                        mtime: row.get(2)?,
                        folder_id: row.get(3)?,
                        hash_id: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(|e| self.err(e))
    }

    /// 列出引用同一内容哈希的所有文件，最新插入的在前
    pub fn files_with_hash(&self, hash_id: i64) -> Result<Vec<HashedFile>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT generations.name, folders.name, files.path, files.mtime
                 FROM files
                 JOIN folders ON files.folder_id = folders.id
                 JOIN generations ON folders.generation_id = generations.id
                 WHERE files.hash_id = ?1
                 ORDER BY files.id DESC",
            )
            .map_err(|e| self.err(e))?;
        let rows = stmt
            .query_map(params![hash_id], |row| {
                Ok(HashedFile {
                    generation: row.get(0)?,
                    folder: row.get(1)?,
                    path: row.get(2)?,
                    mtime: row.get(3)?,
                })
            })
            .map_err(|e| self.err(e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| self.err(e))
    }

    /// 删除文件夹及其所有文件行，返回删除的文件数
    pub fn remove_folder(&mut self, folder_id: i64) -> Result<usize> {
        let tx = self.conn.transaction().map_err(|e| BackupError::db(&self.path, e))?;
        let removed = tx
            .execute("DELETE FROM files WHERE folder_id = ?1", params![folder_id])
            .map_err(|e| BackupError::db(&self.path, e))?;
        tx.execute("DELETE FROM folders WHERE id = ?1", params![folder_id])
            .map_err(|e| BackupError::db(&self.path, e))?;
        tx.execute(
            "DELETE FROM hashes WHERE id NOT IN (SELECT DISTINCT hash_id FROM files)",
            [],
        )
        .map_err(|e| BackupError::db(&self.path, e))?;
        tx.commit().map_err(|e| BackupError::db(&self.path, e))?;
        Ok(removed)
    }

    pub fn hash_count(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM hashes")
    }

    pub fn file_count(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM files")
    }

    fn count(&self, sql: &str) -> Result<u64> {
        self.conn
            .query_row(sql, [], |row| row.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(|e| self.err(e))
    }

    /// 将 WAL 合并回主库文件
    pub fn checkpoint(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.conn
            .execute_batch("PRAGMA wal_checkpoint(FULL);")
            .map_err(|e| self.err(e))
    }

    /// 结束写入：合并 WAL 并切回单文件日志，便于之后只读打开
    pub fn finish(self) -> Result<()> {
        if !self.read_only {
            self.conn
                .execute_batch("PRAGMA wal_checkpoint(TRUNCATE); PRAGMA journal_mode = DELETE;")
                .map_err(|e| self.err(e))?;
        }
        self.conn
            .close()
            .map_err(|(_, e)| BackupError::db(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn hash_insert_is_idempotent() {
        let mut store = MetadataStore::create_in_memory("2024-01-01_00-00-00").unwrap();
        let a = store.insert_hash("abc", 5, false).unwrap();
        let b = store.insert_hash("abc", 5, false).unwrap();
        let c = store.insert_hash("abc", 5, true).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.hash_count().unwrap(), 2);
    }

    #[test]
    fn file_rows_are_unique_per_folder() {
        let mut store = MetadataStore::create_in_memory("2024-01-01_00-00-00").unwrap();
        let docs = store.insert_folder("docs").unwrap();
        let music = store.insert_folder("music").unwrap();
        assert_eq!(store.insert_folder("docs").unwrap(), docs);

        let h = store.insert_hash("abc", 5, false).unwrap();
        let first = store.insert_file("a.txt", 10, docs, h).unwrap();
        let again = store.insert_file("a.txt", 99, docs, h).unwrap();
        store.insert_file("a.txt", 10, music, h).unwrap();
        assert_eq!(first, again);
        assert_eq!(store.file_count().unwrap(), 2);
        // 已有行不会被覆盖
        assert_eq!(store.file("a.txt", docs).unwrap().unwrap().mtime, 10);
    }

    #[test]
    fn files_with_hash_are_newest_first() {
        let mut store = MetadataStore::create_in_memory("2024-01-01_00-00-00").unwrap();
        let docs = store.insert_folder("docs").unwrap();
        let h = store.insert_hash("abc", 5, false).unwrap();
        store.insert_file("old.txt", 1, docs, h).unwrap();
        store.insert_file("new.txt", 2, docs, h).unwrap();

        let files = store.files_with_hash(h).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["new.txt", "old.txt"]);
        assert_eq!(files[0].generation, "2024-01-01_00-00-00");
        assert_eq!(files[0].folder, "docs");
    }

    #[test]
    fn referenced_hash_rows_must_exist() {
        let dir = TempDir::new().unwrap();
        let old_path = dir.path().join("old.sqlite");
        let mut old = MetadataStore::create(&old_path, "2024-01-01_00-00-00").unwrap();
        let old_id = old.insert_hash("abc", 5, false).unwrap();
        old.finish().unwrap();

        let old = MetadataStore::open_read_only(&old_path).unwrap();
        assert_eq!(old.generation(), "2024-01-01_00-00-00");
        let row = old.referenced_hash(old_id).unwrap();
        assert_eq!(row.digest, "abc");
        assert_eq!(row.size, 5);

        let err = old.referenced_hash(42).unwrap_err();
        assert!(matches!(err, BackupError::MetadataInconsistency { .. }));
    }

    #[test]
    fn read_only_store_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("g.sqlite");
        MetadataStore::create(&path, "2024-01-01_00-00-00")
            .unwrap()
            .finish()
            .unwrap();

        let mut store = MetadataStore::open_read_only(&path).unwrap();
        assert!(store.insert_folder("docs").is_err());
    }

    #[test]
    fn removing_a_folder_drops_its_files_and_unused_hashes() {
        let mut store = MetadataStore::create_in_memory("2024-01-01_00-00-00").unwrap();
        let docs = store.insert_folder("docs").unwrap();
        let music = store.insert_folder("music").unwrap();
        let shared = store.insert_hash("shared", 1, false).unwrap();
        let only_docs = store.insert_hash("docs-only", 1, false).unwrap();
        store.insert_file("a", 0, docs, shared).unwrap();
        store.insert_file("b", 0, docs, only_docs).unwrap();
        store.insert_file("c", 0, music, shared).unwrap();

        assert_eq!(store.remove_folder(docs).unwrap(), 2);
        assert_eq!(store.file_count().unwrap(), 1);
        assert_eq!(store.hash_count().unwrap(), 1);
        assert!(store.folder_id("docs").unwrap().is_none());
    }
}
