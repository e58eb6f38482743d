//! # Storage I/O scheduling
//!
//! The SD card is slow and the video is not allowed to wait for it. Reads
//! are broken into sector-sized chunks and spread out, so no single piece
//! of work keeps the CPU (or the bus) for long.
//!
//! Two kinds of work are supported:
//!
//! * **Streams** hand out a file sequentially. Each stream has two halves;
//!   the application reads from one while the other fills.
//! * **One-shot requests** read a whole file into a buffer the caller lends
//!   us, and the caller polls for completion.
//!
//! There are two ways of doing the work, behind the same
//! [`StorageScheduler`] trait:
//!
//! * [`cooperative::Cooperative`] does one chunk per busy stream or request
//!   each time the main loop calls [`StorageScheduler::pump`]. No locks.
//! * [`worker::Worker`] runs on the second core and waits for vertical blank
//!   before each chunk. It is kept because it works, but it spends most of
//!   its time waiting, and the locking costs more than it saves.

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
// Sub-modules
// -----------------------------------------------------------------------------

pub mod cooperative;
pub mod lock;
pub mod oneshot;
pub mod stream;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

// -----------------------------------------------------------------------------
// Imports
// -----------------------------------------------------------------------------

use portable_atomic::{AtomicU32, Ordering};

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// The things that can go wrong inside a [`FileSystem`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FsError {
    /// No file at that path.
    NotFound,
    /// The card or the filesystem on it failed.
    Io,
}

/// The things that can go wrong with a stream or a request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// No file at that path.
    NotFound,
    /// The card or the filesystem on it failed.
    Device,
    /// Everything in the file has been read.
    EndOfFile,
    /// Every stream or request slot is in use.
    NoFreeSlot,
    /// The handle doesn't refer to an open stream.
    BadHandle,
    /// The path is longer than we can store.
    PathTooLong,
    /// The request hasn't finished yet.
    NotReady,
}

impl From<FsError> for StorageError {
    fn from(error: FsError) -> StorageError {
        match error {
            FsError::NotFound => StorageError::NotFound,
            FsError::Io => StorageError::Device,
        }
    }
}

/// Counts files that failed to close when there was no caller left to
/// report it to.
///
/// That happens when a request has already finished, or when a stream is
/// being torn down because of some earlier error.
#[derive(Debug, Default)]
pub struct CloseFailures(AtomicU32);

impl CloseFailures {
    /// Nothing failed yet.
    pub const fn new() -> CloseFailures {
        CloseFailures(AtomicU32::new(0))
    }

    /// Note how a close went.
    pub fn record(&self, result: Result<(), FsError>) {
        if result.is_err() {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// How many closes have failed.
    pub fn count(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

/// The few file operations the scheduler needs.
///
/// Implemented on top of the SD card driver in the firmware, and on top of a
/// `Vec` in the tests.
pub trait FileSystem {
    /// Something that identifies an open file.
    type File: Copy;

    /// Open a file for reading, at offset zero.
    fn open(&mut self, path: &str) -> Result<Self::File, FsError>;

    /// How long the file is, in bytes.
    fn size(&mut self, file: Self::File) -> Result<u32, FsError>;

    /// Read from the current offset. Returns the number of bytes read, which
    /// is only less than `buffer.len()` at the end of the file.
    fn read(&mut self, file: Self::File, buffer: &mut [u8]) -> Result<usize, FsError>;

    /// Move the current offset.
    fn seek(&mut self, file: Self::File, position: u32) -> Result<(), FsError>;

    /// Finish with a file.
    fn close(&mut self, file: Self::File) -> Result<(), FsError>;
}

/// Refers to an open stream.
///
/// Closing the stream makes the handle stale; using it afterwards gives
/// [`StorageError::BadHandle`], even if the slot has been reused.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamHandle {
    slot: u8,
    generation: u16,
}

impl StreamHandle {
    pub(crate) const fn new(slot: usize, generation: u16) -> StreamHandle {
        StreamHandle {
            slot: slot as u8,
            generation,
        }
    }

    /// Which stream slot this is.
    pub const fn slot(self) -> usize {
        self.slot as usize
    }

    pub(crate) const fn generation(self) -> u16 {
        self.generation
    }
}

/// Refers to a one-shot request.
///
/// Ids go up by one for each request and zero is never issued.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RequestId(pub u32);

impl RequestId {
    /// Never refers to a request.
    pub const INVALID: RequestId = RequestId(0);

    /// Could this refer to a request?
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// The interface the application uses for storage, whichever way the work
/// is actually done.
///
/// `'buf` is how long the buffers lent to [`StorageScheduler::submit`] must
/// live. They come back from [`StorageScheduler::release`] or
/// [`StorageScheduler::cancel`].
pub trait StorageScheduler<'buf> {
    /// Open a file as a stream. Both halves are filled before this returns.
    fn open(&mut self, path: &str) -> Result<StreamHandle, StorageError>;

    /// Copy up to `dest.len()` bytes out of a stream, without waiting.
    ///
    /// `Ok(0)` means nothing is buffered yet; try again after a pump.
    /// [`StorageError::EndOfFile`] means nothing is left at all.
    fn read(&mut self, stream: StreamHandle, dest: &mut [u8]) -> Result<usize, StorageError>;

    /// How many bytes [`StorageScheduler::read`] could return right now.
    fn available(&self, stream: StreamHandle) -> usize;

    /// Has every byte of the file been read?
    fn eof(&self, stream: StreamHandle) -> bool;

    /// Move the read position. Anything buffered is thrown away.
    fn seek(&mut self, stream: StreamHandle, position: u32) -> Result<(), StorageError>;

    /// Finish with a stream and free its slot.
    fn close(&mut self, stream: StreamHandle) -> Result<(), StorageError>;

    /// Length of the streamed file, in bytes. Zero for a bad handle.
    fn size(&self, stream: StreamHandle) -> u32;

    /// Offset of the next byte [`StorageScheduler::read`] will return.
    fn tell(&self, stream: StreamHandle) -> u32;

    /// Do a little background work. Returns `true` if there is more to do.
    fn pump(&mut self) -> bool;

    /// Queue a read of an entire file into `dest`.
    ///
    /// Reads stop when `dest` is full, even if the file is longer.
    fn submit(&mut self, path: &str, dest: &'buf mut [u8]) -> Result<RequestId, StorageError>;

    /// Has this request finished? Unknown and invalid ids count as
    /// finished, so a polling loop can't hang on them.
    fn is_complete(&self, id: RequestId) -> bool;

    /// How many bytes the request read, or why it failed.
    ///
    /// Unknown ids report [`StorageError::BadHandle`], and requests that are
    /// still queued or running report [`StorageError::NotReady`].
    fn result(&self, id: RequestId) -> Result<usize, StorageError>;

    /// Drop a request that has not started yet, getting the buffer back.
    fn cancel(&mut self, id: RequestId) -> Option<&'buf mut [u8]>;

    /// Forget a finished request, getting the buffer back.
    fn release(&mut self, id: RequestId) -> Option<&'buf mut [u8]>;

    /// How many files have failed to close in the background.
    ///
    /// A failed [`StorageScheduler::close`] is returned to the caller
    /// instead, and is not counted here.
    fn close_failures(&self) -> u32;
}

// End of file
