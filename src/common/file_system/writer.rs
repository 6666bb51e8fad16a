use super::WritableFile;
use crate::common::Result;
use std::path::PathBuf;

/// Tracks the write offset so builders can compute block handles without
/// asking the file system.
pub struct WritableFileWriter {
    writable_file: Box<dyn WritableFile>,
    file_name: PathBuf,
    file_size: u64,
}

impl WritableFileWriter {
    pub fn new(writable_file: Box<dyn WritableFile>, file_name: PathBuf) -> Self {
        WritableFileWriter {
            writable_file,
            file_name,
            file_size: 0,
        }
    }

    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        self.writable_file.append(data)?;
        self.file_size += data.len() as u64;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writable_file.flush()
    }

    pub fn sync(&mut self) -> Result<()> {
        self.writable_file.sync()
    }

    pub fn close(&mut self) -> Result<()> {
        self.writable_file.close()
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn file_name(&self) -> &PathBuf {
        &self.file_name
    }
}
