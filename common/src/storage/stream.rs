//! One double-buffered file stream.
//!
//! The reader drains the active half while the other half fills. A
//! [`Stream`] never talks to the [`FileSystem`](super::FileSystem) itself.
//! The scheduler asks it for a [`FillPlan`], does the read, and hands the
//! result back with [`Stream::commit_fill`]. That way the worker can do the
//! read without holding the lock on the stream.

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

use heapless::String;

use super::{FsError, StorageError, StreamHandle};
use crate::config::MAX_PATH_LEN;

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// One of the two halves of a stream's buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Half {
    A,
    B,
}

impl Half {
    /// The half that isn't this one.
    pub const fn other(self) -> Half {
        match self {
            Half::A => Half::B,
            Half::B => Half::A,
        }
    }

    const fn index(self) -> usize {
        match self {
            Half::A => 0,
            Half::B => 1,
        }
    }
}

/// Where a stream is up to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamState {
    /// The slot is free.
    Closed,
    /// Waiting for the file to be opened.
    Opening,
    /// Reading the file into the given half.
    Filling(Half),
    /// Nothing to fill until the reader frees up a half.
    Ready,
    /// Waiting for the file offset to move.
    Seeking,
    /// Every byte of the file is in the buffer, or has been read.
    Eof,
    /// The card failed. Only closing the stream gets out of this state.
    Error,
}

/// One chunk of file that should be read next.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FillPlan<F> {
    /// The file to read from
    pub file: F,
    /// Which half the bytes go into
    pub half: Half,
    /// How many bytes to ask for
    pub len: usize,
    /// Stamps the plan so it can be thrown away if the stream is seeked or
    /// closed before the read comes back.
    pub epoch: u32,
}

struct HalfBuffer<'buf> {
    data: &'buf mut [u8],
    valid: usize,
    consumed: usize,
}

impl<'buf> HalfBuffer<'buf> {
    fn remaining(&self) -> usize {
        self.valid - self.consumed
    }

    fn clear(&mut self) {
        self.valid = 0;
        self.consumed = 0;
    }
}

/// A file being read sequentially through two buffers.
///
/// The bytes in the half being filled don't count as valid until the half is
/// full (or the file runs out), so the reader only ever sees whole halves.
pub struct Stream<'buf, F> {
    state: StreamState,
    error: StorageError,
    file: Option<F>,
    size: u32,
    file_pos: u32,
    halves: [HalfBuffer<'buf>; 2],
    active: Half,
    fill_offset: usize,
    epoch: u32,
    generation: u16,
    seek_target: u32,
    path: String<MAX_PATH_LEN>,
}

impl<'buf, F> Stream<'buf, F>
where
    F: Copy,
{
    /// Make a closed stream that will use these two buffers.
    pub fn new(a: &'buf mut [u8], b: &'buf mut [u8]) -> Stream<'buf, F> {
        Stream {
            state: StreamState::Closed,
            error: StorageError::Device,
            file: None,
            size: 0,
            file_pos: 0,
            halves: [
                HalfBuffer {
                    data: a,
                    valid: 0,
                    consumed: 0,
                },
                HalfBuffer {
                    data: b,
                    valid: 0,
                    consumed: 0,
                },
            ],
            active: Half::A,
            fill_offset: 0,
            epoch: 0,
            generation: 0,
            seek_target: 0,
            path: String::new(),
        }
    }

    /// What the stream is doing.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Can this slot be claimed?
    pub fn is_free(&self) -> bool {
        self.state == StreamState::Closed
    }

    /// Is there file work waiting to be done?
    pub fn is_busy(&self) -> bool {
        matches!(
            self.state,
            StreamState::Opening | StreamState::Filling(_) | StreamState::Seeking
        )
    }

    /// Does this handle refer to the stream as it is now?
    pub fn matches(&self, handle: StreamHandle) -> bool {
        self.state != StreamState::Closed && self.generation == handle.generation()
    }

    /// Take a free slot for the file at `path`.
    ///
    /// The stream waits in [`StreamState::Opening`] until [`Stream::begin`]
    /// or [`Stream::fail`] is called.
    pub fn claim(&mut self, slot: usize, path: &str) -> Result<StreamHandle, StorageError> {
        let mut stored = String::new();
        stored
            .push_str(path)
            .map_err(|_| StorageError::PathTooLong)?;
        self.path = stored;
        self.generation = self.generation.wrapping_add(1);
        self.epoch = self.epoch.wrapping_add(1);
        self.file = None;
        self.size = 0;
        self.file_pos = 0;
        self.fill_offset = 0;
        self.active = Half::A;
        for half in self.halves.iter_mut() {
            half.clear();
        }
        self.state = StreamState::Opening;
        Ok(StreamHandle::new(slot, self.generation))
    }

    /// The path this stream was opened with.
    pub fn path(&self) -> &str {
        self.path.as_str()
    }

    pub(crate) fn path_buf(&self) -> String<MAX_PATH_LEN> {
        self.path.clone()
    }

    /// Changes every time a read in flight should be thrown away.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// The file has been opened. Start filling from the beginning.
    pub fn begin(&mut self, file: F, size: u32) {
        self.file = Some(file);
        self.size = size;
        self.restart_at(0);
    }

    /// Something went wrong.
    pub fn fail(&mut self, error: StorageError) {
        self.error = error;
        self.state = StreamState::Error;
    }

    /// The open file, if there is one.
    pub fn file(&self) -> Option<F> {
        self.file
    }

    /// Why the stream broke, if it has.
    pub fn error(&self) -> Option<StorageError> {
        (self.state == StreamState::Error).then_some(self.error)
    }

    /// Is the stream open and not broken?
    pub fn check(&self) -> Result<(), StorageError> {
        match self.state {
            StreamState::Closed => Err(StorageError::BadHandle),
            StreamState::Error => Err(self.error),
            _ => Ok(()),
        }
    }

    /// If the reader has finished with the inactive half and there is more
    /// file to come, start filling it. Returns `true` if a fill started.
    pub fn refill_due(&mut self) -> bool {
        let inactive = self.active.other();
        if self.state == StreamState::Ready
            && self.halves[inactive.index()].valid == 0
            && self.file_pos < self.size
        {
            self.fill_offset = 0;
            self.state = StreamState::Filling(inactive);
            true
        } else {
            false
        }
    }

    /// Work out the next read, if the stream wants one.
    pub fn plan_fill(&mut self, chunk: usize) -> Option<FillPlan<F>> {
        let StreamState::Filling(half) = self.state else {
            return None;
        };
        let Some(file) = self.file else {
            self.fail(StorageError::BadHandle);
            return None;
        };
        let room = self.halves[half.index()].data.len() - self.fill_offset;
        let left_in_file = (self.size - self.file_pos) as usize;
        let len = chunk.min(room).min(left_in_file);
        if len == 0 {
            self.finish_fill(half);
            return None;
        }
        Some(FillPlan {
            file,
            half,
            len,
            epoch: self.epoch,
        })
    }

    /// Where the bytes for `plan` should go.
    pub fn fill_slice(&mut self, plan: &FillPlan<F>) -> &mut [u8] {
        let data = &mut self.halves[plan.half.index()].data;
        let end = (self.fill_offset + plan.len).min(data.len());
        &mut data[self.fill_offset..end]
    }

    /// Is the stream still waiting for the read in `plan`?
    pub fn accepts(&self, plan: &FillPlan<F>) -> bool {
        plan.epoch == self.epoch && self.state == StreamState::Filling(plan.half)
    }

    /// Take the outcome of a read made for `plan`.
    ///
    /// If the bytes were read somewhere other than [`Stream::fill_slice`],
    /// copy them in first. Plans from before a seek or close are ignored.
    pub fn commit_fill(&mut self, plan: &FillPlan<F>, result: Result<usize, FsError>) {
        if !self.accepts(plan) {
            return;
        }
        match result {
            Err(e) => self.fail(e.into()),
            // The file is shorter than it said it was.
            Ok(0) => self.fail(StorageError::Device),
            Ok(n) => {
                let n = n.min(plan.len);
                self.fill_offset += n;
                self.file_pos += n as u32;
                if self.fill_offset >= self.halves[plan.half.index()].data.len()
                    || self.file_pos >= self.size
                {
                    self.finish_fill(plan.half);
                }
            }
        }
    }

    fn finish_fill(&mut self, half: Half) {
        let filled = &mut self.halves[half.index()];
        filled.valid = self.fill_offset;
        filled.consumed = 0;
        self.fill_offset = 0;
        self.state = if self.file_pos >= self.size {
            StreamState::Eof
        } else if self.halves[half.other().index()].valid == 0 {
            StreamState::Filling(half.other())
        } else {
            StreamState::Ready
        };
    }

    fn restart_at(&mut self, position: u32) {
        self.epoch = self.epoch.wrapping_add(1);
        self.file_pos = position;
        self.fill_offset = 0;
        self.active = Half::A;
        for half in self.halves.iter_mut() {
            half.clear();
        }
        self.state = if position < self.size {
            StreamState::Filling(Half::A)
        } else {
            StreamState::Eof
        };
    }

    /// Copy out whatever is buffered, up to `dest.len()` bytes.
    pub fn read(&mut self, dest: &mut [u8]) -> Result<usize, StorageError> {
        self.check()?;
        if matches!(self.state, StreamState::Opening | StreamState::Seeking) {
            return Ok(0);
        }
        if self.halves[self.active.index()].remaining() == 0 {
            let other = self.active.other();
            if self.halves[other.index()].valid > 0 {
                // The drained half gets refilled on the next pump
                self.halves[self.active.index()].clear();
                self.active = other;
            } else if self.state == StreamState::Eof {
                return Err(StorageError::EndOfFile);
            } else {
                return Ok(0);
            }
        }
        let half = &mut self.halves[self.active.index()];
        let n = dest.len().min(half.remaining());
        dest[..n].copy_from_slice(&half.data[half.consumed..half.consumed + n]);
        half.consumed += n;
        Ok(n)
    }

    /// Bytes [`Stream::read`] can hand out without waiting for the card.
    pub fn available(&self) -> usize {
        self.halves.iter().map(HalfBuffer::remaining).sum()
    }

    /// Has every byte been read?
    pub fn is_eof(&self) -> bool {
        self.state == StreamState::Eof && self.available() == 0
    }

    /// File length in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// The file offset of the next byte [`Stream::read`] will return.
    pub fn tell(&self) -> u32 {
        self.file_pos - self.fill_offset as u32 - self.available() as u32
    }

    /// Drop everything buffered and wait in [`StreamState::Seeking`] for the
    /// file offset to be moved. Positions past the end mean the end.
    pub fn begin_seek(&mut self, position: u32) -> Result<u32, StorageError> {
        self.check()?;
        let position = position.min(self.size);
        self.restart_at(position);
        self.seek_target = position;
        self.state = StreamState::Seeking;
        Ok(position)
    }

    /// Where a pending seek is going.
    pub fn seek_target(&self) -> u32 {
        self.seek_target
    }

    /// The file offset has moved. Start filling from there.
    pub fn finish_seek(&mut self, position: u32) {
        self.restart_at(position);
    }

    /// Free the slot, returning the file so the caller can close it.
    pub fn close(&mut self) -> Option<F> {
        self.epoch = self.epoch.wrapping_add(1);
        for half in self.halves.iter_mut() {
            half.clear();
        }
        self.fill_offset = 0;
        self.state = StreamState::Closed;
        self.file.take()
    }
}

/// Statically allocated buffers for every stream slot.
pub struct StreamBuffers<const HALF: usize, const STREAMS: usize> {
    data: [[[u8; HALF]; 2]; STREAMS],
}

impl<const HALF: usize, const STREAMS: usize> StreamBuffers<HALF, STREAMS> {
    /// All zeroes.
    pub const fn new() -> StreamBuffers<HALF, STREAMS> {
        StreamBuffers {
            data: [[[0; HALF]; 2]; STREAMS],
        }
    }

    /// Make one closed [`Stream`] per slot.
    pub fn split<F: Copy>(&mut self) -> [Stream<'_, F>; STREAMS] {
        self.data.each_mut().map(|[a, b]| Stream::new(a, b))
    }
}

impl<const HALF: usize, const STREAMS: usize> Default for StreamBuffers<HALF, STREAMS> {
    fn default() -> Self {
        StreamBuffers::new()
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::pattern;
    use proptest::prelude::*;

    /// Do one chunk of fill work from `data`, the way a scheduler would.
    fn pump(stream: &mut Stream<'_, ()>, data: &[u8], chunk: usize) -> bool {
        stream.refill_due();
        let Some(plan) = stream.plan_fill(chunk) else {
            return false;
        };
        let start = stream.file_pos as usize;
        let dest = stream.fill_slice(&plan);
        let n = dest.len().min(data.len() - start);
        dest[..n].copy_from_slice(&data[start..start + n]);
        stream.commit_fill(&plan, Ok(n));
        true
    }

    fn open(stream: &mut Stream<'_, ()>, size: usize) {
        stream.claim(0, "test.bin").unwrap();
        stream.begin((), size as u32);
    }

    #[test]
    fn fills_a_then_b() {
        let (mut a, mut b) = ([0u8; 64], [0u8; 64]);
        let mut stream = Stream::new(&mut a, &mut b);
        let data = pattern(200);
        open(&mut stream, data.len());
        assert_eq!(stream.state(), StreamState::Filling(Half::A));
        // nothing to read until a half is complete
        assert_eq!(stream.read(&mut [0; 8]), Ok(0));
        while pump(&mut stream, &data, 16) {}
        assert_eq!(stream.state(), StreamState::Ready);
        assert_eq!(stream.available(), 128);
        assert_eq!(stream.tell(), 0);
        assert!(!stream.is_eof());
    }

    #[test]
    fn reads_whole_file_in_order() {
        let (mut a, mut b) = ([0u8; 64], [0u8; 64]);
        let mut stream = Stream::new(&mut a, &mut b);
        let data = pattern(200);
        open(&mut stream, data.len());
        let mut out = Vec::new();
        let mut buffer = [0u8; 37];
        loop {
            pump(&mut stream, &data, 16);
            match stream.read(&mut buffer) {
                Ok(n) => out.extend_from_slice(&buffer[..n]),
                Err(StorageError::EndOfFile) => break,
                Err(e) => panic!("unexpected {e:?}"),
            }
        }
        assert_eq!(out, data);
        assert!(stream.is_eof());
        assert_eq!(stream.tell(), 200);
        // and it stays that way
        assert_eq!(stream.read(&mut buffer), Err(StorageError::EndOfFile));
    }

    #[test]
    fn short_file_is_buffered_in_one_half() {
        let (mut a, mut b) = ([0u8; 64], [0u8; 64]);
        let mut stream = Stream::new(&mut a, &mut b);
        let data = pattern(10);
        open(&mut stream, data.len());
        while pump(&mut stream, &data, 16) {}
        assert_eq!(stream.state(), StreamState::Eof);
        assert!(!stream.is_eof());
        let mut buffer = [0u8; 32];
        assert_eq!(stream.read(&mut buffer), Ok(10));
        assert_eq!(&buffer[..10], &data[..]);
        assert!(stream.is_eof());
        assert_eq!(stream.read(&mut buffer), Err(StorageError::EndOfFile));
    }

    #[test]
    fn empty_file() {
        let (mut a, mut b) = ([0u8; 64], [0u8; 64]);
        let mut stream = Stream::<()>::new(&mut a, &mut b);
        open(&mut stream, 0);
        assert_eq!(stream.state(), StreamState::Eof);
        assert!(stream.is_eof());
        assert_eq!(stream.read(&mut [0; 4]), Err(StorageError::EndOfFile));
    }

    #[test]
    fn device_error_sticks() {
        let (mut a, mut b) = ([0u8; 64], [0u8; 64]);
        let mut stream = Stream::new(&mut a, &mut b);
        open(&mut stream, 100);
        let plan = stream.plan_fill(16).unwrap();
        stream.commit_fill(&plan, Err(FsError::Io));
        assert_eq!(stream.state(), StreamState::Error);
        assert_eq!(stream.error(), Some(StorageError::Device));
        assert_eq!(stream.read(&mut [0; 4]), Err(StorageError::Device));
        assert_eq!(stream.begin_seek(0), Err(StorageError::Device));
        assert!(!stream.is_free());
        stream.close();
        assert!(stream.is_free());
    }

    #[test]
    fn truncated_file_is_an_error() {
        let (mut a, mut b) = ([0u8; 64], [0u8; 64]);
        let mut stream = Stream::new(&mut a, &mut b);
        open(&mut stream, 100);
        let plan = stream.plan_fill(16).unwrap();
        stream.commit_fill(&plan, Ok(0));
        assert_eq!(stream.read(&mut [0; 4]), Err(StorageError::Device));
    }

    #[test]
    fn seek_throws_away_reads_in_flight() {
        let (mut a, mut b) = ([0u8; 64], [0u8; 64]);
        let mut stream = Stream::new(&mut a, &mut b);
        let data = pattern(200);
        open(&mut stream, data.len());
        let plan = stream.plan_fill(16).unwrap();
        assert!(stream.accepts(&plan));
        assert_eq!(stream.begin_seek(150), Ok(150));
        assert!(!stream.accepts(&plan));
        assert_eq!(stream.state(), StreamState::Seeking);
        assert_eq!(stream.available(), 0);
        // this read was for the old position
        stream.commit_fill(&plan, Ok(16));
        assert_eq!(stream.tell(), 150);
        stream.finish_seek(150);
        while pump(&mut stream, &data, 16) {}
        let mut buffer = [0u8; 64];
        assert_eq!(stream.read(&mut buffer), Ok(50));
        assert_eq!(&buffer[..50], &data[150..]);
    }

    #[test]
    fn seek_past_end_clamps() {
        let (mut a, mut b) = ([0u8; 64], [0u8; 64]);
        let mut stream = Stream::<()>::new(&mut a, &mut b);
        open(&mut stream, 100);
        assert_eq!(stream.begin_seek(1000), Ok(100));
        stream.finish_seek(100);
        assert!(stream.is_eof());
        assert_eq!(stream.tell(), 100);
    }

    #[test]
    fn stale_handles_do_not_match() {
        let (mut a, mut b) = ([0u8; 64], [0u8; 64]);
        let mut stream = Stream::<()>::new(&mut a, &mut b);
        let first = stream.claim(2, "one").unwrap();
        assert_eq!(first.slot(), 2);
        assert!(stream.matches(first));
        stream.close();
        assert!(!stream.matches(first));
        let second = stream.claim(2, "two").unwrap();
        assert!(stream.matches(second));
        assert!(!stream.matches(first));
        assert_eq!(stream.path(), "two");
    }

    #[test]
    fn long_paths_are_refused() {
        let (mut a, mut b) = ([0u8; 64], [0u8; 64]);
        let mut stream = Stream::<()>::new(&mut a, &mut b);
        let path = "x".repeat(MAX_PATH_LEN + 1);
        assert_eq!(stream.claim(0, &path), Err(StorageError::PathTooLong));
        assert!(stream.is_free());
    }

    #[test]
    fn buffers_split_into_closed_streams() {
        let mut buffers = StreamBuffers::<32, 3>::new();
        let streams = buffers.split::<()>();
        assert_eq!(streams.len(), 3);
        assert!(streams.iter().all(Stream::is_free));
    }

    proptest! {
        #[test]
        fn tell_tracks_bytes_read(
            size in 0usize..700,
            steps in proptest::collection::vec((any::<bool>(), 1usize..90), 1..200),
        ) {
            let (mut a, mut b) = ([0u8; 64], [0u8; 64]);
            let mut stream = Stream::new(&mut a, &mut b);
            let data = pattern(size);
            open(&mut stream, size);
            let mut out = Vec::new();
            let mut buffer = [0u8; 90];
            for (do_pump, len) in steps {
                if do_pump {
                    pump(&mut stream, &data, 24);
                } else if let Ok(n) = stream.read(&mut buffer[..len]) {
                    out.extend_from_slice(&buffer[..n]);
                }
                prop_assert!(stream.available() <= 128);
                prop_assert_eq!(stream.tell() as usize, out.len());
                prop_assert_eq!(&out[..], &data[..out.len()]);
            }
        }

        #[test]
        fn available_drops_by_what_read_returns(
            size in 0usize..700,
            steps in proptest::collection::vec((any::<bool>(), 0usize..90), 1..200),
        ) {
            let (mut a, mut b) = ([0u8; 64], [0u8; 64]);
            let mut stream = Stream::new(&mut a, &mut b);
            let data = pattern(size);
            open(&mut stream, size);
            let mut buffer = [0u8; 90];
            for (do_pump, len) in steps {
                if do_pump {
                    pump(&mut stream, &data, 24);
                    continue;
                }
                let before = stream.available();
                match stream.read(&mut buffer[..len]) {
                    Ok(n) => {
                        prop_assert!(n <= len);
                        prop_assert_eq!(stream.available(), before - n);
                    }
                    Err(StorageError::EndOfFile) => prop_assert_eq!(before, 0),
                    Err(e) => prop_assert!(false, "unexpected {:?}", e),
                }
            }
        }
    }
}

// End of file
