//! Whole-file reads into a buffer the caller lends us.

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

use super::{CloseFailures, FileSystem, FsError, RequestId, StorageError};
use crate::config::MAX_PATH_LEN;

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// Where a one-shot request is up to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestState {
    /// The slot is free.
    Free,
    /// Queued, and can still be cancelled.
    Pending,
    /// The file is open and being read.
    InProgress,
    /// Finished. The result is the byte count.
    Complete,
    /// Finished badly.
    Error,
}

/// What to do next for an in-flight request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStep<F> {
    /// Open the file.
    Open,
    /// Read up to `len` more bytes from `file`.
    Read { file: F, len: usize },
}

/// One slot in a [`RequestTable`].
pub struct Request<'buf, F> {
    id: RequestId,
    state: RequestState,
    path: String<MAX_PATH_LEN>,
    dest: Option<&'buf mut [u8]>,
    file: Option<F>,
    done: usize,
    target: usize,
    outcome: Result<usize, StorageError>,
}

impl<'buf, F> Request<'buf, F>
where
    F: Copy,
{
    const fn new() -> Request<'buf, F> {
        Request {
            id: RequestId::INVALID,
            state: RequestState::Free,
            path: String::new(),
            dest: None,
            file: None,
            done: 0,
            target: 0,
            outcome: Err(StorageError::NotReady),
        }
    }

    /// Which request this is.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Where it is up to.
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// The file being read.
    pub fn path(&self) -> &str {
        self.path.as_str()
    }

    pub(crate) fn path_buf(&self) -> String<MAX_PATH_LEN> {
        self.path.clone()
    }

    /// Is there file work waiting to be done?
    pub fn is_busy(&self) -> bool {
        matches!(self.state, RequestState::Pending | RequestState::InProgress)
    }

    /// Work out what to do next, if anything.
    pub fn next_step(&mut self, chunk: usize) -> Option<RequestStep<F>> {
        match self.state {
            RequestState::Pending => {
                self.state = RequestState::InProgress;
                Some(RequestStep::Open)
            }
            RequestState::InProgress => {
                let file = self.file?;
                let len = chunk.min(self.target - self.done);
                Some(RequestStep::Read { file, len })
            }
            _ => None,
        }
    }

    /// The file is open. Returns the file back if there is nothing to read,
    /// in which case the request is already complete and the caller must
    /// close it.
    pub fn opened(&mut self, file: F, size: u32) -> Option<F> {
        let capacity = self.dest.as_ref().map_or(0, |d| d.len());
        self.target = capacity.min(size as usize);
        self.done = 0;
        if self.target == 0 {
            self.finish(Ok(0));
            Some(file)
        } else {
            self.file = Some(file);
            None
        }
    }

    /// Where the next `len` bytes should go.
    pub fn read_slice(&mut self, len: usize) -> &mut [u8] {
        let start = self.done;
        match self.dest.as_deref_mut() {
            Some(dest) => {
                let end = (start + len).min(dest.len());
                &mut dest[start..end]
            }
            None => &mut [],
        }
    }

    /// Take the outcome of a read. Returns the file when the request has
    /// finished with it, so the caller can close it.
    pub fn read_done(&mut self, result: Result<usize, FsError>) -> Option<F> {
        match result {
            Err(e) => {
                self.finish(Err(e.into()));
                self.file.take()
            }
            // End of file came early. Whatever we have is the answer.
            Ok(0) => {
                self.finish(Ok(self.done));
                self.file.take()
            }
            Ok(n) => {
                self.done += n;
                if self.done >= self.target {
                    self.finish(Ok(self.done));
                    self.file.take()
                } else {
                    None
                }
            }
        }
    }

    /// Give up on the request.
    pub fn fail(&mut self, error: StorageError) -> Option<F> {
        self.finish(Err(error));
        self.file.take()
    }

    fn finish(&mut self, outcome: Result<usize, StorageError>) {
        self.state = if outcome.is_ok() {
            RequestState::Complete
        } else {
            RequestState::Error
        };
        self.outcome = outcome;
    }

    fn free(&mut self) -> Option<&'buf mut [u8]> {
        self.state = RequestState::Free;
        self.id = RequestId::INVALID;
        self.file = None;
        self.dest.take()
    }
}

/// A fixed number of one-shot request slots.
///
/// Finished requests keep their slot, and their buffer, until they are
/// released.
pub struct RequestTable<'buf, F, const N: usize> {
    slots: [Request<'buf, F>; N],
    next_id: u32,
}

impl<'buf, F, const N: usize> RequestTable<'buf, F, N>
where
    F: Copy,
{
    /// Make a table with every slot free.
    pub fn new() -> RequestTable<'buf, F, N> {
        RequestTable {
            slots: core::array::from_fn(|_| Request::new()),
            next_id: 1,
        }
    }

    /// Queue a read of `path` into `dest`.
    pub fn submit(&mut self, path: &str, dest: &'buf mut [u8]) -> Result<RequestId, StorageError> {
        let mut stored = String::new();
        stored
            .push_str(path)
            .map_err(|_| StorageError::PathTooLong)?;
        let slot = self
            .slots
            .iter_mut()
            .find(|r| r.state == RequestState::Free)
            .ok_or(StorageError::NoFreeSlot)?;
        let id = RequestId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == RequestId::INVALID.0 {
            self.next_id = 1;
        }
        *slot = Request {
            id,
            state: RequestState::Pending,
            path: stored,
            dest: Some(dest),
            file: None,
            done: 0,
            target: 0,
            outcome: Err(StorageError::NotReady),
        };
        Ok(id)
    }

    fn find(&self, id: RequestId) -> Option<&Request<'buf, F>> {
        if !id.is_valid() {
            return None;
        }
        self.slots
            .iter()
            .find(|r| r.state != RequestState::Free && r.id == id)
    }

    fn find_mut(&mut self, id: RequestId) -> Option<&mut Request<'buf, F>> {
        if !id.is_valid() {
            return None;
        }
        self.slots
            .iter_mut()
            .find(|r| r.state != RequestState::Free && r.id == id)
    }

    /// Finished, or never existed?
    pub fn is_complete(&self, id: RequestId) -> bool {
        self.find(id).map_or(true, |r| {
            matches!(r.state, RequestState::Complete | RequestState::Error)
        })
    }

    /// Bytes read, or why not.
    pub fn result(&self, id: RequestId) -> Result<usize, StorageError> {
        let request = self.find(id).ok_or(StorageError::BadHandle)?;
        match request.state {
            RequestState::Complete | RequestState::Error => request.outcome,
            _ => Err(StorageError::NotReady),
        }
    }

    /// Drop a request that hasn't been started.
    pub fn cancel(&mut self, id: RequestId) -> Option<&'buf mut [u8]> {
        let request = self.find_mut(id)?;
        if request.state == RequestState::Pending {
            request.free()
        } else {
            None
        }
    }

    /// Free the slot of a finished request.
    pub fn release(&mut self, id: RequestId) -> Option<&'buf mut [u8]> {
        let request = self.find_mut(id)?;
        if matches!(request.state, RequestState::Complete | RequestState::Error) {
            request.free()
        } else {
            None
        }
    }

    /// Look at one slot.
    pub fn slot_mut(&mut self, index: usize) -> Option<&mut Request<'buf, F>> {
        self.slots.get_mut(index)
    }

    /// All the slots.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Request<'buf, F>> {
        self.slots.iter_mut()
    }

    /// Is any request queued or running?
    pub fn any_busy(&self) -> bool {
        self.slots.iter().any(Request::is_busy)
    }
}

impl<'buf, F, const N: usize> Default for RequestTable<'buf, F, N>
where
    F: Copy,
{
    fn default() -> Self {
        RequestTable::new()
    }
}

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

/// Do one step of a request directly against the device.
///
/// Returns `true` if any work was done. The request's result is settled
/// before its file is closed, so a failed close goes into `failures`.
pub fn pump_request<D>(
    device: &mut D,
    request: &mut Request<'_, D::File>,
    chunk: usize,
    failures: &CloseFailures,
) -> bool
where
    D: FileSystem,
{
    let Some(step) = request.next_step(chunk) else {
        return false;
    };
    let finished_with = match step {
        RequestStep::Open => match open(device, request.path(), failures) {
            Ok((file, size)) => request.opened(file, size),
            Err(e) => request.fail(e),
        },
        RequestStep::Read { file, len } => {
            let result = device.read(file, request.read_slice(len));
            request.read_done(result)
        }
    };
    if let Some(file) = finished_with {
        failures.record(device.close(file));
    }
    true
}

/// Open a file and find out how big it is.
pub(crate) fn open<D>(
    device: &mut D,
    path: &str,
    failures: &CloseFailures,
) -> Result<(D::File, u32), StorageError>
where
    D: FileSystem,
{
    let file = device.open(path)?;
    match device.size(file) {
        Ok(size) => Ok((file, size)),
        Err(e) => {
            failures.record(device.close(file));
            Err(e.into())
        }
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{pattern, MemoryFs};

    fn drive<const N: usize>(fs: &mut MemoryFs, table: &mut RequestTable<'_, usize, N>) -> usize {
        let failures = CloseFailures::new();
        let mut pumps = 0;
        while table.any_busy() {
            for request in table.iter_mut() {
                pump_request(fs, request, 512, &failures);
            }
            pumps += 1;
        }
        pumps
    }

    #[test]
    fn ids_count_up_from_one() {
        let mut buffers = [[0u8; 4]; 3];
        let mut table = RequestTable::<usize, 3>::new();
        let ids: Vec<RequestId> = buffers
            .iter_mut()
            .map(|b| table.submit("a", b).unwrap())
            .collect();
        assert_eq!(ids, [RequestId(1), RequestId(2), RequestId(3)]);
    }

    #[test]
    fn ids_skip_zero_when_they_wrap() {
        let mut buffer = [0u8; 4];
        let mut table = RequestTable::<usize, 1>::new();
        table.next_id = u32::MAX;
        let id = table.submit("a", &mut buffer).unwrap();
        assert_eq!(id, RequestId(u32::MAX));
        let buffer = table.cancel(id).unwrap();
        assert_eq!(table.submit("a", buffer), Ok(RequestId(1)));
    }

    #[test]
    fn table_full() {
        let mut a = [0u8; 4];
        let mut b = [0u8; 4];
        let mut table = RequestTable::<usize, 1>::new();
        table.submit("a", &mut a).unwrap();
        assert_eq!(table.submit("b", &mut b), Err(StorageError::NoFreeSlot));
    }

    #[test]
    fn reads_whole_file_in_chunks() {
        let mut fs = MemoryFs::new();
        let data = pattern(1500);
        fs.add("level.dat", &data);
        let mut dest = vec![0u8; 4096];
        let mut table = RequestTable::<usize, 4>::new();
        let id = table.submit("level.dat", &mut dest).unwrap();
        assert!(!table.is_complete(id));
        assert_eq!(table.result(id), Err(StorageError::NotReady));
        // one pump to open, three to read
        assert_eq!(drive(&mut fs, &mut table), 4);
        assert!(table.is_complete(id));
        assert_eq!(table.result(id), Ok(1500));
        assert_eq!(fs.open_count(), 0);
        let dest = table.release(id).unwrap();
        assert_eq!(&dest[..1500], &data[..]);
        // released ids are unknown
        assert!(table.is_complete(id));
        assert_eq!(table.result(id), Err(StorageError::BadHandle));
    }

    #[test]
    fn stops_when_buffer_is_full() {
        let mut fs = MemoryFs::new();
        let data = pattern(1000);
        fs.add("big", &data);
        let mut dest = [0u8; 600];
        let mut table = RequestTable::<usize, 4>::new();
        let id = table.submit("big", &mut dest).unwrap();
        drive(&mut fs, &mut table);
        assert_eq!(table.result(id), Ok(600));
        let dest = table.release(id).unwrap();
        assert_eq!(&dest[..], &data[..600]);
    }

    #[test]
    fn empty_file_completes_with_zero() {
        let mut fs = MemoryFs::new();
        fs.add("empty", &[]);
        let mut dest = [0u8; 16];
        let mut table = RequestTable::<usize, 4>::new();
        let id = table.submit("empty", &mut dest).unwrap();
        drive(&mut fs, &mut table);
        assert_eq!(table.result(id), Ok(0));
        assert_eq!(fs.open_count(), 0);
    }

    #[test]
    fn missing_file_is_an_error() {
        let mut fs = MemoryFs::new();
        let mut dest = [0u8; 16];
        let mut table = RequestTable::<usize, 4>::new();
        let id = table.submit("nope", &mut dest).unwrap();
        drive(&mut fs, &mut table);
        assert!(table.is_complete(id));
        assert_eq!(table.result(id), Err(StorageError::NotFound));
    }

    #[test]
    fn read_failure_is_an_error() {
        let mut fs = MemoryFs::new();
        fs.add("flaky", &pattern(2000));
        fs.fail_reads_after(1);
        let mut dest = [0u8; 2000];
        let mut table = RequestTable::<usize, 4>::new();
        let id = table.submit("flaky", &mut dest).unwrap();
        drive(&mut fs, &mut table);
        assert_eq!(table.result(id), Err(StorageError::Device));
        assert_eq!(fs.open_count(), 0);
        assert!(table.release(id).is_some());
    }

    #[test]
    fn failed_close_is_counted() {
        let mut fs = MemoryFs::new();
        fs.add("a", &pattern(100));
        fs.fail_closes();
        let mut dest = [0u8; 100];
        let mut table = RequestTable::<usize, 4>::new();
        let failures = CloseFailures::new();
        let id = table.submit("a", &mut dest).unwrap();
        while table.any_busy() {
            for request in table.iter_mut() {
                pump_request(&mut fs, request, 512, &failures);
            }
        }
        // the data all arrived, so the result stands
        assert_eq!(table.result(id), Ok(100));
        assert_eq!(failures.count(), 1);
        assert_eq!(fs.open_count(), 0);
    }

    #[test]
    fn cancel_only_while_pending() {
        let mut fs = MemoryFs::new();
        fs.add("a", &pattern(2000));
        let mut first = [0u8; 2000];
        let mut second = [0u8; 2000];
        let mut table = RequestTable::<usize, 4>::new();
        let started = table.submit("a", &mut first).unwrap();
        let failures = CloseFailures::new();
        for request in table.iter_mut() {
            pump_request(&mut fs, request, 512, &failures);
        }
        let queued = table.submit("a", &mut second).unwrap();
        assert!(table.cancel(started).is_none());
        assert!(table.cancel(queued).is_some());
        assert!(table.is_complete(queued));
        assert!(table.cancel(queued).is_none());
        assert!(table.cancel(RequestId::INVALID).is_none());
    }

    #[test]
    fn invalid_ids_look_finished() {
        let table = RequestTable::<usize, 4>::new();
        assert!(table.is_complete(RequestId::INVALID));
        assert!(table.is_complete(RequestId(99)));
        assert_eq!(table.result(RequestId::INVALID), Err(StorageError::BadHandle));
    }
}

// End of file
