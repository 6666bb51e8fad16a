use super::{
    FileSystem, RandomAccessFile, RandomAccessFileReader, SequentialFile, WritableFile,
    WritableFileWriter,
};
use crate::common::Result;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::FileExt;

struct PosixWritableFile {
    writer: BufWriter<File>,
}

impl WritableFile for PosixWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

struct PosixRandomAccessFile {
    file: File,
    size: usize,
}

impl RandomAccessFile for PosixRandomAccessFile {
    fn read(&self, offset: usize, data: &mut [u8]) -> Result<usize> {
        let mut read = 0;
        while read < data.len() {
            let n = self.file.read_at(&mut data[read..], (offset + read) as u64)?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(read)
    }

    fn file_size(&self) -> usize {
        self.size
    }
}

struct PosixSequentialFile {
    file: File,
}

impl SequentialFile for PosixSequentialFile {
    fn read(&mut self, data: &mut [u8]) -> Result<usize> {
        let n = self.file.read(data)?;
        Ok(n)
    }
}

/// File system backed by std::fs.
#[derive(Default, Clone)]
pub struct PosixFileSystem {}

impl FileSystem for PosixFileSystem {
    fn open_writable_file(&self, path: &Path) -> Result<WritableFileWriter> {
        let file = File::create(path)?;
        Ok(WritableFileWriter::new(
            Box::new(PosixWritableFile {
                writer: BufWriter::new(file),
            }),
            path.to_path_buf(),
        ))
    }

    fn open_random_access_file(&self, path: &Path) -> Result<RandomAccessFileReader> {
        let file = File::open(path)?;
        let size = file.metadata()?.len() as usize;
        Ok(RandomAccessFileReader::new(
            Box::new(PosixRandomAccessFile { file, size }),
            path.to_path_buf(),
        ))
    }

    fn open_sequential_file(&self, path: &Path) -> Result<Box<dyn SequentialFile>> {
        let file = File::open(path)?;
        Ok(Box::new(PosixSequentialFile { file }))
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    fn rename_file(&self, from: &Path, to: &Path) -> Result<()> {
        std::fs::rename(from, to)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posix_round_trip() {
        let dir = tempfile::Builder::new()
            .prefix("test_posix_round_trip")
            .tempdir()
            .unwrap();
        let fs = PosixFileSystem::default();
        let path = dir.path().join("000001.ldb");
        let mut w = fs.open_writable_file(&path).unwrap();
        w.append(b"0123456789").unwrap();
        w.sync().unwrap();

        let r = fs.open_random_access_file(&path).unwrap();
        assert_eq!(r.file_size(), 10);
        let mut buf = [0u8; 4];
        assert_eq!(r.read(3, 4, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"3456");

        let renamed = dir.path().join("000001.sst");
        fs.rename_file(&path, &renamed).unwrap();
        assert!(!fs.file_exists(&path));
        assert!(fs.file_exists(&renamed));
        fs.delete_file(&renamed).unwrap();
        assert!(!fs.file_exists(&renamed));
    }
}
