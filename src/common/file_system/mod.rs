mod posix;
mod reader;
mod writer;

use super::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub use posix::PosixFileSystem;
pub use reader::RandomAccessFileReader;
pub use writer::WritableFileWriter;

/// Positional reads; safe to share across threads.
pub trait RandomAccessFile: Send + Sync {
    /// Reads up to `data.len()` bytes at `offset`. Returns the number of
    /// bytes read, which is short only at end of file.
    fn read(&self, offset: usize, data: &mut [u8]) -> Result<usize>;
    fn file_size(&self) -> usize;
}

pub trait SequentialFile: Send {
    fn read(&mut self, data: &mut [u8]) -> Result<usize>;
}

pub trait WritableFile: Send {
    fn append(&mut self, data: &[u8]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    fn sync(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

pub trait FileSystem: Send + Sync {
    fn open_writable_file(&self, path: &Path) -> Result<WritableFileWriter>;
    fn open_random_access_file(&self, path: &Path) -> Result<RandomAccessFileReader>;
    fn open_sequential_file(&self, path: &Path) -> Result<Box<dyn SequentialFile>>;
    fn file_exists(&self, path: &Path) -> bool;
    fn delete_file(&self, path: &Path) -> Result<()>;
    fn rename_file(&self, from: &Path, to: &Path) -> Result<()>;
}

#[derive(Default)]
struct InMemFileSystemRep {
    files: HashMap<PathBuf, Arc<Vec<u8>>>,
}

/// A heap-backed file system for tests.
#[derive(Default, Clone)]
pub struct InMemFileSystem {
    inner: Arc<Mutex<InMemFileSystemRep>>,
}

struct InMemWritableFile {
    buf: Vec<u8>,
    fs: Arc<Mutex<InMemFileSystemRep>>,
    path: PathBuf,
}

impl WritableFile for InMemWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let mut fs = self.fs.lock().unwrap();
        fs.files.insert(self.path.clone(), Arc::new(self.buf.clone()));
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.flush()
    }

    fn close(&mut self) -> Result<()> {
        self.flush()
    }
}

struct InMemRandomAccessFile {
    data: Arc<Vec<u8>>,
}

impl RandomAccessFile for InMemRandomAccessFile {
    fn read(&self, offset: usize, data: &mut [u8]) -> Result<usize> {
        if offset >= self.data.len() {
            return Ok(0);
        }
        let n = std::cmp::min(data.len(), self.data.len() - offset);
        data[..n].copy_from_slice(&self.data[offset..offset + n]);
        Ok(n)
    }

    fn file_size(&self) -> usize {
        self.data.len()
    }
}

struct InMemSequentialFile {
    data: Arc<Vec<u8>>,
    offset: usize,
}

impl SequentialFile for InMemSequentialFile {
    fn read(&mut self, data: &mut [u8]) -> Result<usize> {
        if self.offset >= self.data.len() {
            return Ok(0);
        }
        let n = std::cmp::min(data.len(), self.data.len() - self.offset);
        data[..n].copy_from_slice(&self.data[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

impl InMemFileSystem {
    /// Overwrites a file's bytes directly, bypassing the writer. Tests use
    /// this to corrupt stored tables.
    pub fn store(&self, path: &Path, data: Vec<u8>) {
        let mut fs = self.inner.lock().unwrap();
        fs.files.insert(path.to_path_buf(), Arc::new(data));
    }

    pub fn read_all(&self, path: &Path) -> Option<Vec<u8>> {
        let fs = self.inner.lock().unwrap();
        fs.files.get(path).map(|d| d.as_ref().clone())
    }
}

impl FileSystem for InMemFileSystem {
    fn open_writable_file(&self, path: &Path) -> Result<WritableFileWriter> {
        let f = InMemWritableFile {
            buf: vec![],
            fs: self.inner.clone(),
            path: path.to_path_buf(),
        };
        Ok(WritableFileWriter::new(Box::new(f), path.to_path_buf()))
    }

    fn open_random_access_file(&self, path: &Path) -> Result<RandomAccessFileReader> {
        let fs = self.inner.lock().unwrap();
        let data = fs.files.get(path).ok_or_else(|| {
            super::Error::Io(Box::new(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{:?} not found", path),
            )))
        })?;
        Ok(RandomAccessFileReader::new(
            Box::new(InMemRandomAccessFile { data: data.clone() }),
            path.to_path_buf(),
        ))
    }

    fn open_sequential_file(&self, path: &Path) -> Result<Box<dyn SequentialFile>> {
        let fs = self.inner.lock().unwrap();
        let data = fs.files.get(path).ok_or_else(|| {
            super::Error::Io(Box::new(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{:?} not found", path),
            )))
        })?;
        Ok(Box::new(InMemSequentialFile {
            data: data.clone(),
            offset: 0,
        }))
    }

    fn file_exists(&self, path: &Path) -> bool {
        let fs = self.inner.lock().unwrap();
        fs.files.contains_key(path)
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        let mut fs = self.inner.lock().unwrap();
        fs.files.remove(path);
        Ok(())
    }

    fn rename_file(&self, from: &Path, to: &Path) -> Result<()> {
        let mut fs = self.inner.lock().unwrap();
        if let Some(data) = fs.files.remove(from) {
            fs.files.insert(to.to_path_buf(), data);
        }
        Ok(())
    }
}
