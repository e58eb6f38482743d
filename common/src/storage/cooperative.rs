//! The cooperative scheduler: the main loop calls [`Cooperative::pump`]
//! and a little work gets done each time.

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

use super::{
    oneshot::{self, RequestTable},
    stream::{Stream, StreamBuffers},
    CloseFailures, FileSystem, RequestId, StorageError, StorageScheduler, StreamHandle,
};
use crate::config::PUMP_CHUNK_BYTES;

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// Streams and one-shot requests, all driven from one thread.
///
/// Each call to [`StorageScheduler::pump`] reads at most one
/// [`PUMP_CHUNK_BYTES`] chunk for each stream and each request that wants
/// one. Opening a stream and seeking talk to the card straight away.
pub struct Cooperative<'buf, D, const S: usize, const R: usize>
where
    D: FileSystem,
{
    device: D,
    streams: [Stream<'buf, D::File>; S],
    requests: RequestTable<'buf, D::File, R>,
    close_failures: CloseFailures,
}

impl<'buf, D, const S: usize, const R: usize> Cooperative<'buf, D, S, R>
where
    D: FileSystem,
{
    /// Make a scheduler that reads from `device`, with `S` stream slots
    /// using `buffers` and `R` request slots.
    pub fn new<const HALF: usize>(
        device: D,
        buffers: &'buf mut StreamBuffers<HALF, S>,
    ) -> Cooperative<'buf, D, S, R> {
        Cooperative {
            device,
            streams: buffers.split(),
            requests: RequestTable::new(),
            close_failures: CloseFailures::new(),
        }
    }

    /// Get at the file system.
    pub fn device(&self) -> &D {
        &self.device
    }

    fn stream(&self, handle: StreamHandle) -> Option<&Stream<'buf, D::File>> {
        self.streams
            .get(handle.slot())
            .filter(|stream| stream.matches(handle))
    }
}

impl<'buf, D, const S: usize, const R: usize> StorageScheduler<'buf> for Cooperative<'buf, D, S, R>
where
    D: FileSystem,
{
    fn open(&mut self, path: &str) -> Result<StreamHandle, StorageError> {
        let (slot, stream) = self
            .streams
            .iter_mut()
            .enumerate()
            .find(|(_, stream)| stream.is_free())
            .ok_or(StorageError::NoFreeSlot)?;
        let handle = stream.claim(slot, path)?;
        match oneshot::open(&mut self.device, path, &self.close_failures) {
            Ok((file, size)) => stream.begin(file, size),
            Err(e) => {
                stream.close();
                return Err(e);
            }
        }
        // Fill both halves now, so the caller has data straight away
        while pump_stream(&mut self.device, stream) {}
        if let Some(error) = stream.error() {
            if let Some(file) = stream.close() {
                self.close_failures.record(self.device.close(file));
            }
            return Err(error);
        }
        Ok(handle)
    }

    fn read(&mut self, handle: StreamHandle, dest: &mut [u8]) -> Result<usize, StorageError> {
        lookup(&mut self.streams, handle)?.read(dest)
    }

    fn available(&self, handle: StreamHandle) -> usize {
        self.stream(handle).map_or(0, Stream::available)
    }

    fn eof(&self, handle: StreamHandle) -> bool {
        self.stream(handle).map_or(true, Stream::is_eof)
    }

    fn seek(&mut self, handle: StreamHandle, position: u32) -> Result<(), StorageError> {
        let stream = lookup(&mut self.streams, handle)?;
        let position = stream.begin_seek(position)?;
        let file = stream.file().ok_or(StorageError::BadHandle)?;
        match self.device.seek(file, position) {
            Ok(()) => {
                stream.finish_seek(position);
                Ok(())
            }
            Err(e) => {
                stream.fail(e.into());
                Err(e.into())
            }
        }
    }

    fn close(&mut self, handle: StreamHandle) -> Result<(), StorageError> {
        let stream = lookup(&mut self.streams, handle)?;
        if let Some(file) = stream.close() {
            self.device.close(file)?;
        }
        Ok(())
    }

    fn size(&self, handle: StreamHandle) -> u32 {
        self.stream(handle).map_or(0, Stream::size)
    }

    fn tell(&self, handle: StreamHandle) -> u32 {
        self.stream(handle).map_or(0, Stream::tell)
    }

    fn pump(&mut self) -> bool {
        for stream in self.streams.iter_mut() {
            pump_stream(&mut self.device, stream);
        }
        for request in self.requests.iter_mut() {
            oneshot::pump_request(
                &mut self.device,
                request,
                PUMP_CHUNK_BYTES,
                &self.close_failures,
            );
        }
        self.streams.iter().any(Stream::is_busy) || self.requests.any_busy()
    }

    fn submit(&mut self, path: &str, dest: &'buf mut [u8]) -> Result<RequestId, StorageError> {
        self.requests.submit(path, dest)
    }

    fn is_complete(&self, id: RequestId) -> bool {
        self.requests.is_complete(id)
    }

    fn result(&self, id: RequestId) -> Result<usize, StorageError> {
        self.requests.result(id)
    }

    fn cancel(&mut self, id: RequestId) -> Option<&'buf mut [u8]> {
        self.requests.cancel(id)
    }

    fn release(&mut self, id: RequestId) -> Option<&'buf mut [u8]> {
        self.requests.release(id)
    }

    fn close_failures(&self) -> u32 {
        self.close_failures.count()
    }
}

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

/// Find the stream a handle refers to.
pub(crate) fn lookup<'s, 'buf, F>(
    streams: &'s mut [Stream<'buf, F>],
    handle: StreamHandle,
) -> Result<&'s mut Stream<'buf, F>, StorageError>
where
    F: Copy,
{
    streams
        .get_mut(handle.slot())
        .filter(|stream| stream.matches(handle))
        .ok_or(StorageError::BadHandle)
}

/// Read one chunk into a stream, if it wants one.
fn pump_stream<D>(device: &mut D, stream: &mut Stream<'_, D::File>) -> bool
where
    D: FileSystem,
{
    stream.refill_due();
    let Some(plan) = stream.plan_fill(PUMP_CHUNK_BYTES) else {
        return false;
    };
    let result = device.read(plan.file, stream.fill_slice(&plan));
    stream.commit_fill(&plan, result);
    true
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{pattern, MemoryFs};
    use proptest::prelude::*;

    type Storage<'buf> = Cooperative<'buf, MemoryFs, 2, 4>;

    fn read_to_end(storage: &mut Storage<'_>, handle: StreamHandle) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buffer = [0u8; 700];
        loop {
            match storage.read(handle, &mut buffer) {
                Ok(0) => {
                    storage.pump();
                }
                Ok(n) => out.extend_from_slice(&buffer[..n]),
                Err(StorageError::EndOfFile) => return out,
                Err(e) => panic!("unexpected {e:?}"),
            }
        }
    }

    #[test]
    fn streams_a_file() {
        let data = pattern(10_000);
        let mut fs = MemoryFs::new();
        fs.add("music.raw", &data);
        let mut buffers = StreamBuffers::<2048, 2>::new();
        let mut storage = Storage::new(fs, &mut buffers);

        let handle = storage.open("music.raw").unwrap();
        assert_eq!(storage.size(handle), 10_000);
        assert_eq!(storage.available(handle), 4096);
        assert_eq!(storage.tell(handle), 0);
        assert_eq!(storage.device().read_count(), 8);
        // both halves are full, so there is nothing to do
        assert!(!storage.pump());
        assert_eq!(storage.device().read_count(), 8);

        assert_eq!(read_to_end(&mut storage, handle), data);
        assert!(storage.eof(handle));
        assert_eq!(storage.tell(handle), 10_000);
        assert_eq!(storage.available(handle), 0);
        storage.close(handle).unwrap();
        assert_eq!(storage.device().open_count(), 0);
    }

    #[test]
    fn one_chunk_per_stream_per_pump() {
        let mut fs = MemoryFs::new();
        fs.add("a", &pattern(10_000));
        fs.add("b", &pattern(10_000));
        let mut buffers = StreamBuffers::<2048, 2>::new();
        let mut storage = Storage::new(fs, &mut buffers);
        let a = storage.open("a").unwrap();
        let b = storage.open("b").unwrap();
        let mut buffer = [0u8; 2048];
        // drain the first half of each, then step onto the second half
        for handle in [a, b] {
            assert_eq!(storage.read(handle, &mut buffer), Ok(2048));
            assert_eq!(storage.read(handle, &mut buffer[..1]), Ok(1));
        }
        let before = storage.device().read_count();
        assert!(storage.pump());
        assert_eq!(storage.device().read_count(), before + 2);
        for _ in 0..3 {
            storage.pump();
        }
        assert_eq!(storage.device().read_count(), before + 8);
        assert!(!storage.pump());
        assert_eq!(storage.available(a), 4095);
        assert_eq!(storage.tell(a), 2049);
    }

    #[test]
    fn available_never_exceeds_both_halves() {
        let mut fs = MemoryFs::new();
        fs.add("a", &pattern(10_000));
        let mut buffers = StreamBuffers::<2048, 2>::new();
        let mut storage = Storage::new(fs, &mut buffers);
        let handle = storage.open("a").unwrap();
        let mut buffer = [0u8; 300];
        while !storage.eof(handle) {
            assert!(storage.available(handle) <= 4096);
            let _ = storage.read(handle, &mut buffer);
            storage.pump();
        }
    }

    #[test]
    fn small_file() {
        let data = pattern(100);
        let mut fs = MemoryFs::new();
        fs.add("small", &data);
        let mut buffers = StreamBuffers::<2048, 2>::new();
        let mut storage = Storage::new(fs, &mut buffers);
        let handle = storage.open("small").unwrap();
        assert_eq!(storage.available(handle), 100);
        assert!(!storage.eof(handle));
        assert_eq!(read_to_end(&mut storage, handle), data);
        assert!(storage.eof(handle));
    }

    #[test]
    fn open_failures() {
        let mut fs = MemoryFs::new();
        fs.add("a", &pattern(10));
        let mut buffers = StreamBuffers::<64, 1>::new();
        let mut storage: Cooperative<MemoryFs, 1, 1> = Cooperative::new(fs, &mut buffers);
        assert_eq!(storage.open("missing"), Err(StorageError::NotFound));
        let path = "a".repeat(300);
        assert_eq!(storage.open(&path), Err(StorageError::PathTooLong));
        // failures don't use up the slot
        let handle = storage.open("a").unwrap();
        assert_eq!(storage.open("a"), Err(StorageError::NoFreeSlot));
        storage.close(handle).unwrap();
        assert!(storage.open("a").is_ok());
    }

    #[test]
    fn open_reports_read_errors() {
        let mut fs = MemoryFs::new();
        fs.add("a", &pattern(1000));
        fs.fail_reads_after(0);
        let mut buffers = StreamBuffers::<64, 1>::new();
        let mut storage: Cooperative<MemoryFs, 1, 1> = Cooperative::new(fs, &mut buffers);
        assert_eq!(storage.open("a"), Err(StorageError::Device));
        assert_eq!(storage.device().open_count(), 0);
    }

    #[test]
    fn closed_handles_are_rejected() {
        let mut fs = MemoryFs::new();
        fs.add("a", &pattern(1000));
        let mut buffers = StreamBuffers::<2048, 2>::new();
        let mut storage = Storage::new(fs, &mut buffers);
        let old = storage.open("a").unwrap();
        storage.close(old).unwrap();
        // the slot gets reused, but the old handle still doesn't work
        let new = storage.open("a").unwrap();
        assert_eq!(old.slot(), new.slot());
        assert_eq!(storage.read(old, &mut [0; 4]), Err(StorageError::BadHandle));
        assert_eq!(storage.seek(old, 0), Err(StorageError::BadHandle));
        assert_eq!(storage.close(old), Err(StorageError::BadHandle));
        assert_eq!(storage.available(old), 0);
        assert!(storage.eof(old));
        assert_eq!(storage.size(old), 0);
        assert_eq!(storage.tell(old), 0);
        assert_eq!(storage.size(new), 1000);
    }

    #[test]
    fn seek_then_read() {
        let data = pattern(10_000);
        let mut fs = MemoryFs::new();
        fs.add("a", &data);
        let mut buffers = StreamBuffers::<2048, 2>::new();
        let mut storage = Storage::new(fs, &mut buffers);
        let handle = storage.open("a").unwrap();
        storage.seek(handle, 5000).unwrap();
        assert_eq!(storage.tell(handle), 5000);
        assert_eq!(storage.available(handle), 0);
        assert_eq!(read_to_end(&mut storage, handle), &data[5000..]);
        // back to the start
        storage.seek(handle, 0).unwrap();
        assert!(!storage.eof(handle));
        assert_eq!(read_to_end(&mut storage, handle), data);
    }

    #[test]
    fn seek_failure_breaks_the_stream() {
        let mut fs = MemoryFs::new();
        fs.add("a", &pattern(10_000));
        fs.fail_seeks();
        let mut buffers = StreamBuffers::<2048, 2>::new();
        let mut storage = Storage::new(fs, &mut buffers);
        let handle = storage.open("a").unwrap();
        assert_eq!(storage.seek(handle, 100), Err(StorageError::Device));
        assert_eq!(storage.read(handle, &mut [0; 4]), Err(StorageError::Device));
        assert!(storage.close(handle).is_ok());
    }

    #[test]
    fn read_failure_while_streaming() {
        let mut fs = MemoryFs::new();
        fs.add("a", &pattern(10_000));
        fs.fail_reads_after(9);
        let mut buffers = StreamBuffers::<2048, 2>::new();
        let mut storage = Storage::new(fs, &mut buffers);
        let handle = storage.open("a").unwrap();
        let mut buffer = [0u8; 4096];
        assert_eq!(storage.read(handle, &mut buffer), Ok(2048));
        assert_eq!(storage.read(handle, &mut buffer), Ok(2048));
        // one good chunk, then a bad one
        storage.pump();
        storage.pump();
        assert!(!storage.pump());
        assert_eq!(storage.read(handle, &mut buffer), Err(StorageError::Device));
    }

    #[test]
    fn one_shot_alongside_a_stream() {
        let level = pattern(1300);
        let mut fs = MemoryFs::new();
        fs.add("music.raw", &pattern(10_000));
        fs.add("level.dat", &level);
        let mut dest = vec![0u8; 2000];
        let mut buffers = StreamBuffers::<2048, 2>::new();
        let mut storage = Storage::new(fs, &mut buffers);
        let handle = storage.open("music.raw").unwrap();
        let id = storage.submit("level.dat", &mut dest).unwrap();
        assert!(id.is_valid());
        let mut pumps = 0;
        while !storage.is_complete(id) {
            storage.pump();
            pumps += 1;
        }
        // open, then three chunks
        assert_eq!(pumps, 4);
        assert_eq!(storage.result(id), Ok(1300));
        assert!(storage.cancel(id).is_none());
        let dest = storage.release(id).unwrap();
        assert_eq!(&dest[..1300], &level[..]);
        // the stream was left alone
        assert_eq!(storage.available(handle), 4096);
    }

    #[test]
    fn one_shot_cancel() {
        let mut fs = MemoryFs::new();
        fs.add("a", &pattern(100));
        let mut dest = [0u8; 100];
        let mut buffers = StreamBuffers::<64, 2>::new();
        let mut storage = Storage::new(fs, &mut buffers);
        let id = storage.submit("a", &mut dest).unwrap();
        assert!(!storage.is_complete(id));
        assert!(storage.cancel(id).is_some());
        assert!(storage.is_complete(id));
        assert_eq!(storage.result(id), Err(StorageError::BadHandle));
        assert!(!storage.pump());
        assert_eq!(storage.device().read_count(), 0);
    }

    #[test]
    fn close_failures_are_reported() {
        let mut fs = MemoryFs::new();
        fs.add("a", &pattern(100));
        fs.fail_closes();
        let mut dest = [0u8; 100];
        let mut buffers = StreamBuffers::<2048, 2>::new();
        let mut storage = Storage::new(fs, &mut buffers);
        let handle = storage.open("a").unwrap();
        // the caller hears about this one directly
        assert_eq!(storage.close(handle), Err(StorageError::Device));
        assert_eq!(storage.close_failures(), 0);
        assert_eq!(storage.size(handle), 0);
        let id = storage.submit("a", &mut dest).unwrap();
        while storage.pump() {}
        assert_eq!(storage.result(id), Ok(100));
        assert_eq!(storage.close_failures(), 1);
    }

    #[test]
    fn missing_file_fails_every_request() {
        let (mut a, mut b, mut c) = ([0u8; 100], [0u8; 0], [0u8; 50]);
        let mut buffers = StreamBuffers::<64, 2>::new();
        let mut storage = Storage::new(MemoryFs::new(), &mut buffers);
        let ids = [
            storage.submit("missing", &mut a).unwrap(),
            storage.submit("missing", &mut b).unwrap(),
            storage.submit("missing", &mut c).unwrap(),
        ];
        while storage.pump() {}
        for id in ids {
            assert!(storage.is_complete(id));
            assert_eq!(storage.result(id), Err(StorageError::NotFound));
        }
        let lengths: Vec<usize> = ids
            .iter()
            .map(|id| storage.release(*id).map_or(usize::MAX, |dest| dest.len()))
            .collect();
        assert_eq!(lengths, [100, 0, 50]);
    }

    proptest! {
        #[test]
        fn missing_file_fails_whatever_the_buffer(
            lengths in proptest::collection::vec(0usize..600, 1..=4),
        ) {
            let mut dests: Vec<Vec<u8>> = lengths.iter().map(|&n| vec![0; n]).collect();
            let mut buffers = StreamBuffers::<64, 2>::new();
            let mut storage = Storage::new(MemoryFs::new(), &mut buffers);
            let ids: Vec<RequestId> = dests
                .iter_mut()
                .map(|dest| storage.submit("missing", dest))
                .collect::<Result<_, _>>()
                .unwrap();
            while storage.pump() {}
            for id in ids {
                prop_assert!(storage.is_complete(id));
                prop_assert_eq!(storage.result(id), Err(StorageError::NotFound));
            }
        }
    }
}

// End of file
