//! Volume operations - the main interface.

use crate::config::{VolumeConfig, MIN_BLOCK_SIZE, ROOT_INODE};
use crate::crypto::KeyTable;
use crate::error::{Error, Result};
use crate::storage::{Allocator, BlockStore};
use crate::vfs::content::{ContentManager, ContentReader};
use crate::vfs::directory::{validate_name, Directory};
use crate::vfs::inode::InodeTable;
use crate::vfs::path::VolumePath;
use crate::vfs::superblock::Superblock;
use crate::vfs::types::{DirEntry, FileStat, Inode, InodeId, InodeKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Volume summary, readable without the secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub path: PathBuf,
    pub version: u32,
    pub block_size: u32,
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub max_blocks: u32,
    pub inode_capacity: u32,
    pub inode_count: u32,
    pub file_count: u32,
    pub dir_count: u32,
    pub volume_bytes: u64,
    pub created: u64,
    pub modified: u64,
}

impl VolumeInfo {
    fn from_superblock(path: &Path, sb: &Superblock) -> Self {
        Self {
            path: path.to_path_buf(),
            version: sb.version,
            block_size: sb.block_size,
            total_blocks: sb.total_blocks,
            free_blocks: sb.free_blocks,
            max_blocks: sb.max_blocks,
            inode_capacity: sb.inode_capacity,
            inode_count: sb.inode_count,
            file_count: sb.file_count,
            dir_count: sb.dir_count,
            volume_bytes: sb.volume_len(),
            created: sb.created,
            modified: sb.modified,
        }
    }
}

/// An open volume.
///
/// Holds exclusive access to the backing file for its lifetime. Every
/// mutating operation takes `&mut self` and ends by committing the
/// superblock and bitmap.
#[derive(Debug)]
pub struct Volume {
    /// Backing file location.
    path: PathBuf,
    /// In-memory superblock; counters refreshed on commit.
    superblock: Superblock,
    /// Block access to the backing file.
    store: BlockStore,
    /// Block bitmap.
    allocator: Allocator,
    /// Inode slots.
    inodes: InodeTable,
    /// Keystream table derived from the secret.
    key: KeyTable,
}

impl Volume {
    /// Create a new volume at `path`.
    ///
    /// Fails with `VolumeExists` if anything is already at `path`; an
    /// existing file is never modified.
    pub fn init(path: &Path, secret: &str, config: VolumeConfig) -> Result<Self> {
        config.validate().map_err(Error::InvalidConfig)?;
        let key = KeyTable::derive(secret.as_bytes(), config.block_size as usize)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => Error::VolumeExists(path.to_path_buf()),
                _ => Error::Io(e),
            })?;

        match Self::format(path, file, key, &config) {
            Ok(volume) => {
                info!(
                    path = %path.display(),
                    blocks = volume.superblock.total_blocks,
                    "initialized volume"
                );
                Ok(volume)
            }
            Err(e) => {
                // Leave nothing half-formatted behind.
                let _ = std::fs::remove_file(path);
                Err(e)
            }
        }
    }

    fn format(path: &Path, file: File, key: KeyTable, config: &VolumeConfig) -> Result<Self> {
        let layout = config.layout();
        let total = config.initial_blocks.max(layout.data_start);
        file.set_len(u64::from(total) * u64::from(config.block_size))?;

        let mut store = BlockStore::new(file, config.block_size, total);
        let bitmap_bytes = layout.bitmap_blocks as usize * config.block_size as usize;
        let mut allocator = Allocator::new(total, config.max_blocks, bitmap_bytes);
        for block in 0..layout.data_start {
            allocator.claim(block)?;
        }

        let mut inodes =
            InodeTable::new(layout.inode_table_start, config.inode_capacity, config.block_size);
        let root = inodes.allocate_inode(InodeKind::Directory, &mut store)?;
        if root != ROOT_INODE {
            return Err(Error::Corrupt(format!("root directory got inode {}", root)));
        }

        let mut superblock = Superblock::new(config, total);
        superblock.dir_count = 1;

        let mut volume = Self {
            path: path.to_path_buf(),
            superblock,
            store,
            allocator,
            inodes,
            key,
        };
        volume.commit()?;
        Ok(volume)
    }

    /// Open an existing volume.
    ///
    /// A wrong secret is not detected here: metadata is stored in the
    /// clear, and only data blocks depend on the key table.
    pub fn open(path: &Path, secret: &str) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let superblock = read_superblock(&file)?;

        let file_len = file.metadata()?.len();
        if file_len != superblock.volume_len() {
            return Err(Error::Corrupt(format!(
                "file is {} bytes, superblock describes {}",
                file_len,
                superblock.volume_len()
            )));
        }

        let store = BlockStore::new(file, superblock.block_size, superblock.total_blocks);

        let mut bitmap = Vec::with_capacity(
            superblock.bitmap_blocks as usize * superblock.block_size as usize,
        );
        for b in 0..superblock.bitmap_blocks {
            bitmap.extend_from_slice(&store.read_block(superblock.bitmap_start + b)?);
        }
        let allocator = Allocator::load(
            &bitmap,
            superblock.total_blocks,
            superblock.max_blocks,
            superblock.free_blocks,
        )?;
        if let Some(block) = (0..superblock.data_start).find(|&b| !allocator.is_allocated(b)) {
            return Err(Error::Corrupt(format!(
                "metadata block {} is marked free",
                block
            )));
        }

        let inodes = InodeTable::load(
            &store,
            superblock.inode_table_start,
            superblock.inode_capacity,
        )?;
        if inodes.count() != superblock.inode_count {
            warn!(
                stored = superblock.inode_count,
                actual = inodes.count(),
                "inode count disagrees with inode table, using table"
            );
        }

        let key = KeyTable::derive(secret.as_bytes(), superblock.block_size as usize)?;

        let volume = Self {
            path: path.to_path_buf(),
            superblock,
            store,
            allocator,
            inodes,
            key,
        };
        if !volume.read_inode(volume.superblock.root_inode)?.is_directory() {
            return Err(Error::Corrupt("root inode is not a directory".to_string()));
        }

        info!(
            path = %path.display(),
            blocks = volume.superblock.total_blocks,
            free = volume.allocator.free_blocks(),
            "opened volume"
        );
        Ok(volume)
    }

    /// Read the superblock of a volume without its secret.
    pub fn inspect(path: &Path) -> Result<VolumeInfo> {
        let file = File::open(path)?;
        let superblock = read_superblock(&file)?;
        Ok(VolumeInfo::from_superblock(path, &superblock))
    }

    /// Persist superblock and bitmap, then sync the file.
    fn commit(&mut self) -> Result<()> {
        self.superblock.total_blocks = self.allocator.total_blocks();
        self.superblock.free_blocks = self.allocator.free_blocks();
        self.superblock.inode_count = self.inodes.count();
        self.superblock.touch();

        let bs = self.superblock.block_size as usize;
        let start = self.superblock.bitmap_start;
        for (i, chunk) in self.allocator.as_bytes().chunks(bs).enumerate() {
            self.store.write_block(start + i as u32, chunk)?;
        }

        let block = self.superblock.to_block()?;
        self.store.write_block(0, &block)?;
        self.store.sync()
    }

    /// Commit regardless of outcome so growth and rollbacks are recorded,
    /// then hand back the operation's result.
    fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        let committed = self.commit();
        let value = result?;
        committed?;
        Ok(value)
    }

    fn reader(&self) -> ContentReader<'_> {
        ContentReader::new(&self.store, &self.key)
    }

    /// Read an inode record.
    pub fn read_inode(&self, n: InodeId) -> Result<Inode> {
        self.inodes.read_inode(n, &self.store)
    }

    /// Read the content of inode `n`.
    pub fn read_content(&self, n: InodeId) -> Result<Vec<u8>> {
        let inode = self.read_inode(n)?;
        self.reader().read(&inode)
    }

    /// Replace the content of inode `n`.
    pub fn write_content(&mut self, n: InodeId, data: &[u8]) -> Result<()> {
        let result = self.store_content(n, data);
        self.finish(result)
    }

    fn store_content(&mut self, n: InodeId, data: &[u8]) -> Result<()> {
        let mut inode = self.read_inode(n)?;
        ContentManager::new(&mut self.store, &mut self.allocator, &self.key)
            .write(&mut inode, data)?;
        self.inodes.write_inode(n, &inode, &mut self.store)
    }

    /// Allocate an inode and give it `data`. Undone on failure.
    fn create_inode(&mut self, kind: InodeKind, data: &[u8]) -> Result<InodeId> {
        let n = self.inodes.allocate_inode(kind, &mut self.store)?;
        if let Err(e) = self.store_content(n, data) {
            self.discard_after_failure(n);
            return Err(e);
        }
        Ok(n)
    }

    /// Undo a half-created inode. The caller's error is the one reported.
    fn discard_after_failure(&mut self, n: InodeId) {
        if let Err(e) = self.discard_inode(n) {
            warn!(inode = n, error = %e, "could not release inode after failed operation");
        }
    }

    /// Release an inode's blocks and its slot.
    fn discard_inode(&mut self, n: InodeId) -> Result<()> {
        let mut inode = self.read_inode(n)?;
        ContentManager::new(&mut self.store, &mut self.allocator, &self.key)
            .release(&mut inode)?;
        self.inodes.free_inode(n, &mut self.store)
    }

    fn read_directory(&self, n: InodeId) -> Result<Directory> {
        let inode = self.read_inode(n)?;
        if !inode.is_directory() {
            return Err(Error::NotADirectory(format!("inode {}", n)));
        }
        Directory::from_bytes(&self.reader().read(&inode)?)
    }

    /// Walk `path` from the root, one component at a time.
    fn resolve(&self, path: &VolumePath) -> Result<InodeId> {
        let mut cursor = self.superblock.root_inode;
        let mut walked = VolumePath::root();

        for component in path.components() {
            let inode = self.read_inode(cursor)?;
            if !inode.is_directory() {
                return Err(Error::NotADirectory(walked.to_string()));
            }
            let directory = Directory::from_bytes(&self.reader().read(&inode)?)?;
            walked = walked.join(component)?;
            cursor = directory
                .lookup(component)
                .ok_or_else(|| Error::NotFound(walked.to_string()))?
                .inode;
        }
        Ok(cursor)
    }

    /// Resolve `path` and require a directory.
    fn resolve_dir(&self, path: &VolumePath) -> Result<InodeId> {
        let n = self.resolve(path)?;
        if !self.read_inode(n)?.is_directory() {
            return Err(Error::NotADirectory(path.to_string()));
        }
        Ok(n)
    }

    /// Add an entry to directory `dir_n`, whose current content is `directory`.
    fn link(
        &mut self,
        dir_n: InodeId,
        mut directory: Directory,
        name: &str,
        child: InodeId,
        kind: InodeKind,
    ) -> Result<()> {
        directory.add_entry(name, child, kind)?;
        self.store_content(dir_n, &directory.to_bytes())
    }

    /// Create a child inode and link it under `dir_n`.
    fn create_child(
        &mut self,
        dir_n: InodeId,
        directory: Directory,
        name: &str,
        kind: InodeKind,
        data: &[u8],
    ) -> Result<InodeId> {
        let child = self.create_inode(kind, data)?;
        if let Err(e) = self.link(dir_n, directory, name, child, kind) {
            self.discard_after_failure(child);
            return Err(e);
        }
        match kind {
            InodeKind::File => self.superblock.file_count += 1,
            InodeKind::Directory => self.superblock.dir_count += 1,
        }
        debug!(inode = child, ?kind, name, "linked");
        Ok(child)
    }

    /// Store `data` as a new file `name` in directory `dir`.
    ///
    /// The directory must already exist. Fails with `AlreadyExists` if the
    /// name is taken.
    pub fn add(&mut self, dir: &str, name: &str, data: &[u8]) -> Result<InodeId> {
        validate_name(name)?;
        let dir_path = VolumePath::parse(dir)?;
        let dir_n = self.resolve_dir(&dir_path)?;
        let directory = self.read_directory(dir_n)?;
        if directory.lookup(name).is_some() {
            return Err(Error::AlreadyExists(dir_path.join(name)?.to_string()));
        }

        let result = self.create_child(dir_n, directory, name, InodeKind::File, data);
        self.finish(result)
    }

    /// Like [`Volume::add`], but replaces the content of an existing file.
    pub fn put(&mut self, dir: &str, name: &str, data: &[u8]) -> Result<InodeId> {
        validate_name(name)?;
        let dir_path = VolumePath::parse(dir)?;
        let dir_n = self.resolve_dir(&dir_path)?;
        let directory = self.read_directory(dir_n)?;

        let existing = directory.lookup(name).map(|e| (e.inode, e.is_dir()));
        let result = match existing {
            Some((_, true)) => return Err(Error::NotAFile(dir_path.join(name)?.to_string())),
            Some((n, false)) => self.store_content(n, data).map(|_| n),
            None => self.create_child(dir_n, directory, name, InodeKind::File, data),
        };
        self.finish(result)
    }

    /// Return the content of file `name` in directory `dir`.
    pub fn export(&self, dir: &str, name: &str) -> Result<Vec<u8>> {
        let n = self.lookup_file(dir, name)?;
        self.read_content(n)
    }

    fn lookup_entry(&self, dir: &str, name: &str) -> Result<(VolumePath, DirEntry)> {
        validate_name(name)?;
        let dir_path = VolumePath::parse(dir)?;
        let dir_n = self.resolve_dir(&dir_path)?;
        let path = dir_path.join(name)?;
        let entry = self
            .read_directory(dir_n)?
            .lookup(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        Ok((path, entry))
    }

    fn lookup_file(&self, dir: &str, name: &str) -> Result<InodeId> {
        let (path, entry) = self.lookup_entry(dir, name)?;
        if entry.is_dir() {
            return Err(Error::NotAFile(path.to_string()));
        }
        Ok(entry.inode)
    }

    /// Create directory `path`. Its parent must exist.
    pub fn mkdir(&mut self, path: &str) -> Result<InodeId> {
        let path = VolumePath::parse(path)?;
        let (parent, name) = match (path.parent(), path.name()) {
            (Some(parent), Some(name)) => (parent, name.to_string()),
            _ => return Err(Error::AlreadyExists("/".to_string())),
        };
        let dir_n = self.resolve_dir(&parent)?;
        let directory = self.read_directory(dir_n)?;
        if directory.lookup(&name).is_some() {
            return Err(Error::AlreadyExists(path.to_string()));
        }

        let result = self.create_child(dir_n, directory, &name, InodeKind::Directory, &[]);
        self.finish(result)
    }

    /// Create directory `path` and any missing parents.
    pub fn create_dir_all(&mut self, path: &str) -> Result<InodeId> {
        let path = VolumePath::parse(path)?;
        let result = self.create_dirs(&path);
        self.finish(result)
    }

    fn create_dirs(&mut self, path: &VolumePath) -> Result<InodeId> {
        let mut cursor = self.superblock.root_inode;
        let mut walked = VolumePath::root();

        for component in path.components() {
            walked = walked.join(component)?;
            let directory = self.read_directory(cursor)?;
            let existing = directory.lookup(component).map(|e| (e.inode, e.is_dir()));
            cursor = match existing {
                Some((n, true)) => n,
                Some((_, false)) => return Err(Error::NotADirectory(walked.to_string())),
                None => {
                    self.create_child(cursor, directory, component, InodeKind::Directory, &[])?
                }
            };
        }
        Ok(cursor)
    }

    /// List directory `dir`, sorted by name.
    pub fn list(&self, dir: &str) -> Result<Vec<DirEntry>> {
        let dir_path = VolumePath::parse(dir)?;
        let dir_n = self.resolve_dir(&dir_path)?;
        let mut entries = self.read_directory(dir_n)?.entries().to_vec();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Metadata of entry `name` in directory `dir`.
    pub fn stat(&self, dir: &str, name: &str) -> Result<FileStat> {
        let (_, entry) = self.lookup_entry(dir, name)?;
        self.stat_inode(entry.inode)
    }

    /// Metadata of inode `n`.
    pub fn stat_inode(&self, n: InodeId) -> Result<FileStat> {
        let inode = self.read_inode(n)?;
        let map = self.reader().block_map(&inode)?;
        Ok(FileStat {
            inode: n,
            kind: inode.kind,
            size: inode.size,
            created: inode.created,
            modified: inode.modified,
            blocks: inode.layout.block_count(),
            extents: map.extents.len() as u32,
        })
    }

    /// Delete file `name` from directory `dir`, returning its blocks and inode.
    pub fn remove(&mut self, dir: &str, name: &str) -> Result<()> {
        validate_name(name)?;
        let dir_path = VolumePath::parse(dir)?;
        let dir_n = self.resolve_dir(&dir_path)?;
        let mut directory = self.read_directory(dir_n)?;
        let path = dir_path.join(name)?;
        match directory.lookup(name) {
            None => return Err(Error::NotFound(path.to_string())),
            Some(entry) if entry.is_dir() => return Err(Error::NotAFile(path.to_string())),
            Some(_) => {}
        }

        let result = directory.remove_entry(name).and_then(|entry| {
            self.store_content(dir_n, &directory.to_bytes())?;
            self.superblock.file_count = self.superblock.file_count.saturating_sub(1);
            if let Err(e) = self.discard_inode(entry.inode) {
                warn!(
                    inode = entry.inode,
                    error = %e,
                    "unlinked but could not release inode, its blocks stay allocated"
                );
                return Err(e);
            }
            debug!(inode = entry.inode, name, "removed");
            Ok(())
        });
        self.finish(result)
    }

    /// Every directory in the volume, root included, sorted by path.
    pub fn directories(&self) -> Result<Vec<VolumePath>> {
        let root = self.superblock.root_inode;
        let mut seen = HashSet::from([root]);
        let mut pending = vec![(VolumePath::root(), root)];
        let mut found = Vec::new();

        while let Some((path, n)) = pending.pop() {
            for entry in self.read_directory(n)?.entries() {
                if !entry.is_dir() {
                    continue;
                }
                if !seen.insert(entry.inode) {
                    return Err(Error::Corrupt(format!(
                        "directory inode {} is linked more than once",
                        entry.inode
                    )));
                }
                pending.push((path.join(&entry.name)?, entry.inode));
            }
            found.push(path);
        }

        found.sort_by_key(|p| p.to_string());
        Ok(found)
    }

    /// Volume summary.
    pub fn info(&self) -> VolumeInfo {
        let mut info = VolumeInfo::from_superblock(&self.path, &self.superblock);
        info.total_blocks = self.allocator.total_blocks();
        info.free_blocks = self.allocator.free_blocks();
        info.inode_count = self.inodes.count();
        info.volume_bytes = self.store.byte_len();
        info
    }

    /// Current superblock as last committed.
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Backing file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `block` is marked in the bitmap.
    pub fn is_block_allocated(&self, block: u32) -> bool {
        self.allocator.is_allocated(block)
    }
}

/// Read and validate the superblock at the start of `file`.
fn read_superblock(file: &File) -> Result<Superblock> {
    let mut header = vec![0u8; MIN_BLOCK_SIZE as usize];
    let mut reader = file;
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(Error::InvalidMagic),
        Err(e) => return Err(Error::Io(e)),
    }
    Superblock::from_bytes(&header)
}
