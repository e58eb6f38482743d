//! An in-memory [`FileSystem`] for the tests, with knobs for making it fail.

// -----------------------------------------------------------------------------
// Licence Statement
// -----------------------------------------------------------------------------
// Copyright (c) The dvi-stream developers, 2026
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <https://www.gnu.org/licenses/>.
// -----------------------------------------------------------------------------

// -----------------------------------------------------------------------------
// Imports
// -----------------------------------------------------------------------------

use super::{FileSystem, FsError};

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

struct OpenFile {
    index: usize,
    offset: usize,
}

/// Files in a `Vec`. A [`FileSystem::File`] is an index into the open file
/// table.
#[derive(Default)]
pub struct MemoryFs {
    files: Vec<(String, Vec<u8>)>,
    open: Vec<Option<OpenFile>>,
    reads: usize,
    fail_after: Option<usize>,
    fail_seeks: bool,
    fail_closes: bool,
}

impl MemoryFs {
    pub fn new() -> MemoryFs {
        MemoryFs::default()
    }

    pub fn add(&mut self, path: &str, contents: &[u8]) {
        self.files.push((path.to_string(), contents.to_vec()));
    }

    /// Let `reads` more reads succeed, then fail the rest.
    pub fn fail_reads_after(&mut self, reads: usize) {
        self.fail_after = Some(self.reads + reads);
    }

    pub fn fail_seeks(&mut self) {
        self.fail_seeks = true;
    }

    /// Closes still forget the file, but report an error.
    pub fn fail_closes(&mut self) {
        self.fail_closes = true;
    }

    /// Reads done so far.
    pub fn read_count(&self) -> usize {
        self.reads
    }

    /// Files opened and not yet closed.
    pub fn open_count(&self) -> usize {
        self.open.iter().filter(|f| f.is_some()).count()
    }

    fn handle(&mut self, file: usize) -> Result<&mut OpenFile, FsError> {
        self.open
            .get_mut(file)
            .and_then(Option::as_mut)
            .ok_or(FsError::Io)
    }
}

impl FileSystem for MemoryFs {
    type File = usize;

    fn open(&mut self, path: &str) -> Result<usize, FsError> {
        let index = self
            .files
            .iter()
            .position(|(name, _)| name == path)
            .ok_or(FsError::NotFound)?;
        let entry = Some(OpenFile { index, offset: 0 });
        match self.open.iter().position(Option::is_none) {
            Some(slot) => {
                self.open[slot] = entry;
                Ok(slot)
            }
            None => {
                self.open.push(entry);
                Ok(self.open.len() - 1)
            }
        }
    }

    fn size(&mut self, file: usize) -> Result<u32, FsError> {
        let index = self.handle(file)?.index;
        Ok(self.files[index].1.len() as u32)
    }

    fn read(&mut self, file: usize, buffer: &mut [u8]) -> Result<usize, FsError> {
        if self.fail_after.is_some_and(|n| self.reads >= n) {
            return Err(FsError::Io);
        }
        self.reads += 1;
        let (index, offset) = {
            let handle = self.handle(file)?;
            (handle.index, handle.offset)
        };
        let contents = &self.files[index].1;
        let start = offset.min(contents.len());
        let n = buffer.len().min(contents.len() - start);
        buffer[..n].copy_from_slice(&contents[start..start + n]);
        self.handle(file)?.offset += n;
        Ok(n)
    }

    fn seek(&mut self, file: usize, position: u32) -> Result<(), FsError> {
        if self.fail_seeks {
            return Err(FsError::Io);
        }
        self.handle(file)?.offset = position as usize;
        Ok(())
    }

    fn close(&mut self, file: usize) -> Result<(), FsError> {
        self.handle(file)?;
        self.open[file] = None;
        if self.fail_closes {
            return Err(FsError::Io);
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

/// Some bytes that don't repeat every 256.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}

// End of file
