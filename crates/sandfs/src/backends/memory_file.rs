//! In-memory file handle.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::error::{FileSystemError, FsError, FsResult, OpContext};
use crate::ops::File;
use crate::types::{entry_name, FileInfo, FsType, OpenFlags};

const MEMORY: Option<FsType> = Some(FsType::Memory);

/// Contents and metadata of one in-memory file.
#[derive(Debug, Clone)]
pub(crate) struct FileData {
    pub(crate) bytes: Vec<u8>,
    pub(crate) perm: u32,
    pub(crate) mod_time: SystemTime,
    pub(crate) uid: Option<u32>,
    pub(crate) gid: Option<u32>,
}

impl FileData {
    pub(crate) fn new(perm: u32) -> Self {
        Self {
            bytes: Vec::new(),
            perm,
            mod_time: SystemTime::now(),
            uid: None,
            gid: None,
        }
    }

    pub(crate) fn info(&self, path: &Path) -> FileInfo {
        FileInfo::file(entry_name(path), self.bytes.len() as u64, self.perm, self.mod_time)
            .with_owner(self.uid, self.gid)
    }

    /// Copy `buf` to `pos`, zero-filling any gap past the current end.
    fn write_at(&mut self, buf: &[u8], pos: u64) -> Result<usize, FsError> {
        let start = usize::try_from(pos)
            .map_err(|_| FsError::ResourceExhausted(format!("offset {pos} too large")))?;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| FsError::ResourceExhausted("file too large".to_string()))?;
        if end > self.bytes.len() {
            self.set_len(end)?;
        }
        self.bytes[start..end].copy_from_slice(buf);
        self.mod_time = SystemTime::now();
        Ok(buf.len())
    }

    /// Resize to `len`, zero-filling on growth. An allocation that cannot be
    /// satisfied is reported instead of aborting the process.
    fn set_len(&mut self, len: usize) -> Result<(), FsError> {
        if let Some(additional) = len.checked_sub(self.bytes.len()) {
            self.bytes.try_reserve(additional).map_err(|e| {
                FsError::ResourceExhausted(format!("cannot grow file to {len} bytes: {e}"))
            })?;
        }
        self.bytes.resize(len, 0);
        Ok(())
    }

    fn read_at(&self, buf: &mut [u8], pos: u64) -> usize {
        let len = self.bytes.len() as u64;
        if pos >= len {
            return 0;
        }
        let start = pos as usize;
        let n = buf.len().min(self.bytes.len() - start);
        buf[..n].copy_from_slice(&self.bytes[start..start + n]);
        n
    }
}

/// Shared content lock. The filesystem map and every open handle on the
/// same path hold the same node.
pub(crate) type FileNode = Arc<RwLock<FileData>>;

/// An open handle on an in-memory file.
///
/// The cursor and closed flag belong to the handle; content lives in a
/// node shared with the filesystem, guarded by its own lock so file I/O
/// never contends with directory operations.
#[derive(Debug)]
pub struct MemoryFile {
    name: PathBuf,
    node: FileNode,
    flags: OpenFlags,
    offset: u64,
    closed: bool,
}

impl MemoryFile {
    pub(crate) fn new(name: PathBuf, node: FileNode, flags: OpenFlags) -> Self {
        Self {
            name,
            node,
            flags,
            offset: 0,
            closed: false,
        }
    }

    fn check_open(&self) -> Result<(), FsError> {
        if self.closed {
            Err(FsError::FileClosed)
        } else {
            Ok(())
        }
    }

    fn check_readable(&self) -> Result<(), FsError> {
        self.check_open()?;
        if !self.flags.read {
            return Err(FsError::PermissionDenied(format!(
                "{} not opened for reading",
                self.name.display()
            )));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), FsError> {
        self.check_open()?;
        if !self.flags.writable() {
            return Err(FsError::ReadOnlyFile);
        }
        Ok(())
    }

    fn io_error(&self, op: &'static str, err: FsError) -> io::Error {
        FileSystemError::new(op, &self.name, MEMORY, err).into()
    }

    /// Read at `offset` without moving the cursor.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        self.check_readable().context("read_at", &self.name, MEMORY)?;
        Ok(self.node.read().read_at(buf, offset))
    }

    /// Write at `offset` without moving the cursor.
    pub fn write_at(&self, buf: &[u8], offset: u64) -> FsResult<usize> {
        let result = self.check_writable().and_then(|()| {
            if self.flags.append {
                return Err(FsError::UnsupportedOperation(
                    "write_at on a handle opened for append".to_string(),
                ));
            }
            self.node.write().write_at(buf, offset)
        });
        result.context("write_at", &self.name, MEMORY)
    }

    /// Independent copy with its own buffer. Later writes to either side
    /// are not visible to the other.
    pub fn clone_file(&self) -> FsResult<MemoryFile> {
        self.check_open().context("clone", &self.name, MEMORY)?;
        let data = self.node.read().clone();
        Ok(Self {
            name: self.name.clone(),
            node: Arc::new(RwLock::new(data)),
            flags: self.flags,
            offset: self.offset,
            closed: false,
        })
    }

    /// Current size in bytes.
    pub fn size(&self) -> u64 {
        self.node.read().bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Cursor position.
    pub fn position(&self) -> u64 {
        self.offset
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn is_readable(&self) -> bool {
        self.flags.read
    }

    pub fn is_writable(&self) -> bool {
        self.flags.writable()
    }

    pub fn is_append(&self) -> bool {
        self.flags.append
    }
}

impl Read for MemoryFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_readable().map_err(|e| self.io_error("read", e))?;
        let n = self.node.read().read_at(buf, self.offset);
        self.offset += n as u64;
        Ok(n)
    }
}

impl Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_writable().map_err(|e| self.io_error("write", e))?;
        let mut data = self.node.write();
        if self.flags.append {
            self.offset = data.bytes.len() as u64;
        }
        let n = data
            .write_at(buf, self.offset)
            .map_err(|e| self.io_error("write", e))?;
        self.offset += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check_open().map_err(|e| self.io_error("flush", e))
    }
}

impl Seek for MemoryFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.check_open().map_err(|e| self.io_error("seek", e))?;
        let target = match pos {
            SeekFrom::Start(n) => i128::from(n),
            SeekFrom::Current(delta) => i128::from(self.offset) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.size()) + i128::from(delta),
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative offset",
            ));
        }
        self.offset = u64::try_from(target)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "seek offset overflow"))?;
        Ok(self.offset)
    }
}

impl File for MemoryFile {
    fn name(&self) -> &Path {
        &self.name
    }

    fn stat(&self) -> FsResult<FileInfo> {
        self.check_open().context("stat", &self.name, MEMORY)?;
        Ok(self.node.read().info(&self.name))
    }

    fn sync(&self) -> FsResult<()> {
        self.check_open().context("sync", &self.name, MEMORY)
    }

    fn truncate(&self, size: u64) -> FsResult<()> {
        self.check_writable().context("truncate", &self.name, MEMORY)?;
        let result = usize::try_from(size)
            .map_err(|_| FsError::ResourceExhausted(format!("size {size} too large")))
            .and_then(|len| {
                let mut data = self.node.write();
                data.set_len(len)?;
                data.mod_time = SystemTime::now();
                Ok(())
            });
        result.context("truncate", &self.name, MEMORY)
    }

    fn chmod(&self, mode: u32) -> FsResult<()> {
        self.check_open().context("chmod", &self.name, MEMORY)?;
        self.node.write().perm = mode & 0o7777;
        Ok(())
    }

    fn chown(&self, uid: u32, gid: u32) -> FsResult<()> {
        self.check_open().context("chown", &self.name, MEMORY)?;
        let mut data = self.node.write();
        data.uid = Some(uid);
        data.gid = Some(gid);
        Ok(())
    }

    fn close(&mut self) -> FsResult<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(flags: OpenFlags) -> MemoryFile {
        let node = Arc::new(RwLock::new(FileData::new(0o644)));
        MemoryFile::new(PathBuf::from("f.txt"), node, flags)
    }

    #[test]
    fn test_write_then_read() {
        let mut f = handle(OpenFlags::create_truncate());
        f.write_all(b"hello world").unwrap();
        assert_eq!(f.size(), 11);

        f.seek(SeekFrom::Start(6)).unwrap();
        let mut out = String::new();
        f.read_to_string(&mut out).unwrap();
        assert_eq!(out, "world");
    }

    #[test]
    fn test_seek_past_end_zero_fills() {
        let mut f = handle(OpenFlags::write());
        f.write_all(b"ab").unwrap();
        assert_eq!(f.seek(SeekFrom::End(3)).unwrap(), 5);
        f.write_all(b"z").unwrap();

        let mut buf = [0xffu8; 6];
        assert_eq!(f.read_at(&mut buf, 0).unwrap(), 6);
        assert_eq!(&buf, b"ab\0\0\0z");
    }

    #[test]
    fn test_negative_seek_rejected() {
        let mut f = handle(OpenFlags::write());
        f.write_all(b"abc").unwrap();
        let err = f.seek(SeekFrom::Current(-10)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(f.position(), 3);
    }

    #[test]
    fn test_positional_io_keeps_cursor() {
        let mut f = handle(OpenFlags::write());
        f.write_all(b"0123456789").unwrap();
        f.seek(SeekFrom::Start(2)).unwrap();

        f.write_at(b"XY", 12).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(f.read_at(&mut buf, 8).unwrap(), 4);
        assert_eq!(&buf, b"89\0\0");
        let mut tail = [0xffu8; 6];
        assert_eq!(f.read_at(&mut tail, 8).unwrap(), 6);
        assert_eq!(&tail, b"89\0\0XY");
        assert_eq!(f.position(), 2);
        assert_eq!(f.size(), 14);
    }

    #[test]
    fn test_huge_offset_write_fails_cleanly() {
        let mut f = handle(OpenFlags::write());
        f.write_all(b"ab").unwrap();
        f.seek(SeekFrom::Start(u64::MAX / 2)).unwrap();

        let err = f.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::OutOfMemory);
        assert_eq!(f.size(), 2);

        let err = f.write_at(b"x", u64::MAX / 2).unwrap_err();
        assert!(matches!(err.kind(), FsError::ResourceExhausted(_)));
        assert!(crate::is_critical_error(&err));
        assert_eq!(f.size(), 2);
    }

    #[test]
    fn test_huge_truncate_fails_cleanly() {
        let f = handle(OpenFlags::write());
        f.write_at(b"abc", 0).unwrap();

        let err = f.truncate(u64::MAX / 2).unwrap_err();
        assert!(matches!(err.kind(), FsError::ResourceExhausted(_)));
        assert_eq!(f.size(), 3);

        f.truncate(5).unwrap();
        let mut buf = [0xffu8; 5];
        f.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"abc\0\0");
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let mut f = handle(OpenFlags::read());
        let err = f.write(b"nope").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert!(f.write_at(b"nope", 0).is_err());
        assert!(f.truncate(0).is_err());
    }

    #[test]
    fn test_write_only_rejects_reads() {
        let mut f = handle(OpenFlags::write_only());
        let mut buf = [0u8; 1];
        assert!(f.read(&mut buf).is_err());
    }

    #[test]
    fn test_append_writes_at_end() {
        let mut f = handle(OpenFlags::append());
        f.write_all(b"one").unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        f.write_all(b"two").unwrap();
        assert_eq!(f.node.read().bytes, b"onetwo");
        assert!(f.write_at(b"x", 0).is_err());
    }

    #[test]
    fn test_close_is_idempotent_and_final() {
        let mut f = handle(OpenFlags::write());
        f.close().unwrap();
        f.close().unwrap();
        assert!(f.is_closed());

        let mut buf = [0u8; 1];
        let err = f.read(&mut buf).unwrap_err();
        let inner = err
            .get_ref()
            .and_then(|e| e.downcast_ref::<FileSystemError>())
            .unwrap();
        assert!(matches!(inner.kind(), FsError::FileClosed));

        assert!(f.write(b"x").is_err());
        assert!(f.seek(SeekFrom::Start(0)).is_err());
        assert!(matches!(f.stat().unwrap_err().kind(), FsError::FileClosed));
        assert!(f.sync().is_err());
        assert!(f.chmod(0o600).is_err());
    }

    #[test]
    fn test_clone_file_is_independent() {
        let mut f = handle(OpenFlags::write());
        f.write_all(b"base").unwrap();

        let mut copy = f.clone_file().unwrap();
        copy.write_all(b"-copy").unwrap();
        f.write_all(b"-orig").unwrap();

        assert_eq!(f.node.read().bytes, b"base-orig");
        assert_eq!(copy.node.read().bytes, b"base-copy");
    }

    #[test]
    fn test_truncate_and_metadata() {
        let f = handle(OpenFlags::write());
        f.write_at(b"abcdef", 0).unwrap();
        f.truncate(3).unwrap();
        f.chmod(0o600).unwrap();
        f.chown(1000, 1000).unwrap();

        let info = f.stat().unwrap();
        assert_eq!(info.size, 3);
        assert_eq!(info.perm, 0o600);
        assert_eq!(info.uid, Some(1000));
        assert_eq!(info.name, "f.txt");
        assert!(!f.is_empty());
    }
}
