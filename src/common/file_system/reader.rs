use super::RandomAccessFile;
use crate::common::Result;
use std::path::PathBuf;

pub struct RandomAccessFileReader {
    file: Box<dyn RandomAccessFile>,
    file_name: PathBuf,
}

impl RandomAccessFileReader {
    pub fn new(file: Box<dyn RandomAccessFile>, file_name: PathBuf) -> Self {
        RandomAccessFileReader { file, file_name }
    }

    /// Reads up to `n` bytes at `offset`; short only at end of file.
    pub fn read(&self, offset: usize, n: usize, data: &mut [u8]) -> Result<usize> {
        self.file.read(offset, &mut data[..n])
    }

    pub fn file_size(&self) -> usize {
        self.file.file_size()
    }

    pub fn file_name(&self) -> &PathBuf {
        &self.file_name
    }
}
