//   Copyright (c) 2024-2026 Anton Kundenko <singaraiona@gmail.com>
//   All rights reserved.
//
//   Permission is hereby granted, free of charge, to any person obtaining a copy
//   of this software and associated documentation files (the "Software"), to deal
//   in the Software without restriction, including without limitation the rights
//   to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
//   copies of the Software, and to permit persons to whom the Software is
//   furnished to do so, subject to the following conditions:
//
//   The above copyright notice and this permission notice shall be included in all
//   copies or substantial portions of the Software.
//
//   THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
//   IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//   FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
//   AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
//   LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
//   OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
//   SOFTWARE.

// Data sources: the random-access byte windows the evaluator lays patterns
// over. The evaluator only ever talks to the `DataSource` trait; whether the
// backing store is a file, an in-memory buffer or something else is opaque.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Mutex, RwLock};

use crate::{Error, Result};

/// Random-access byte window with size and base-address metadata.
///
/// Reads within one evaluation job are sequential and come from a single
/// thread; implementations still need `Send + Sync` so a source can be shared
/// across queued jobs.
pub trait DataSource: Send + Sync {
    /// Total number of addressable bytes.
    fn size(&self) -> u64;

    /// Logical base address reported alongside offsets. Defaults to 0.
    fn base_address(&self) -> u64 {
        0
    }

    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    /// Reading past the end fails with `Error::OutOfBounds`.
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    fn is_writable(&self) -> bool {
        false
    }

    /// Write `buf` at `offset`. Only accepted when `is_writable()` is true.
    fn write(&self, _offset: u64, _buf: &[u8]) -> Result<()> {
        Err(Error::ReadOnly)
    }
}

fn check_range(offset: u64, len: usize, size: u64) -> Result<()> {
    let len = len as u64;
    if offset.checked_add(len).map_or(true, |end| end > size) {
        return Err(Error::OutOfBounds { offset, len, size });
    }
    Ok(())
}

/// Owned in-memory byte buffer.
pub struct MemorySource {
    data: RwLock<Vec<u8>>,
    base: u64,
    writable: bool,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        MemorySource { data: RwLock::new(data), base: 0, writable: false }
    }

    pub fn writable(data: Vec<u8>) -> Self {
        MemorySource { data: RwLock::new(data), base: 0, writable: true }
    }

    pub fn with_base(mut self, base: u64) -> Self {
        self.base = base;
        self
    }
}

impl DataSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.read().expect("source lock poisoned").len() as u64
    }

    fn base_address(&self) -> u64 {
        self.base
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.data.read().expect("source lock poisoned");
        check_range(offset, buf.len(), data.len() as u64)?;
        let start = offset as usize;
        buf.copy_from_slice(&data[start..start + buf.len()]);
        Ok(())
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn write(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(Error::ReadOnly);
        }
        let mut data = self.data.write().expect("source lock poisoned");
        check_range(offset, buf.len(), data.len() as u64)?;
        let start = offset as usize;
        data[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }
}

/// File-backed byte source. The file handle is seek-and-read behind a mutex,
/// which is cheap enough for the single-reader-per-job access model.
pub struct FileSource {
    file: Mutex<File>,
    size: u64,
    base: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(FileSource { file: Mutex::new(file), size, base: 0 })
    }

    pub fn with_base(mut self, base: u64) -> Self {
        self.base = base;
        self
    }
}

impl DataSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn base_address(&self) -> u64 {
        self.base
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.size)?;
        let mut file = self.file.lock().expect("source lock poisoned");
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn memory_read_in_bounds() {
        let src = MemorySource::new(vec![1, 2, 3, 4]);
        let mut buf = [0u8; 2];
        src.read(1, &mut buf).unwrap();
        assert_eq!(buf, [2, 3]);
    }

    #[test]
    fn read_at_last_byte_ok_past_end_fails() {
        let src = MemorySource::new(vec![0xAA; 8]);
        let mut one = [0u8; 1];
        src.read(7, &mut one).unwrap();
        assert!(matches!(src.read(8, &mut one), Err(Error::OutOfBounds { .. })));
    }

    #[test]
    fn write_respects_readonly_flag() {
        let ro = MemorySource::new(vec![0; 4]);
        assert!(matches!(ro.write(0, &[1]), Err(Error::ReadOnly)));

        let rw = MemorySource::writable(vec![0; 4]);
        rw.write(1, &[7, 8]).unwrap();
        let mut buf = [0u8; 4];
        rw.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0, 7, 8, 0]);
    }

    #[test]
    fn file_source_reads() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        f.flush().unwrap();

        let src = FileSource::open(f.path()).unwrap();
        assert_eq!(src.size(), 4);
        let mut buf = [0u8; 2];
        src.read(2, &mut buf).unwrap();
        assert_eq!(buf, [0xBE, 0xEF]);
        assert!(src.read(3, &mut [0u8; 2]).is_err());
    }
}
