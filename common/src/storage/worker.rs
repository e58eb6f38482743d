//! The dual-core scheduler.
//!
//! Core 1 sits in [`Worker::run`] doing all the card work. Core 0 talks to
//! the same [`Worker`] through [`StorageScheduler`], where `open`, `seek` and
//! `close` wait for Core 1 to catch up.
//!
//! Every chunk waits for vertical blank first, to keep the card traffic away
//! from the video DMA. In practice the waiting, and the locking, costs more
//! than it saves, which is why [`Cooperative`](super::cooperative::Cooperative)
//! is the default.

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

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::String;
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

use super::{
    cooperative::lookup,
    lock::DeviceLock,
    oneshot::{self, Request, RequestState, RequestStep, RequestTable},
    stream::{FillPlan, Stream, StreamBuffers, StreamState},
    CloseFailures, FileSystem, RequestId, StorageError, StorageScheduler, StreamHandle,
};
use crate::config::{MAX_PATH_LEN, PUMP_CHUNK_BYTES, VBLANK_WAIT_POLLS, WORKER_YIELD_SPINS};

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// Something that knows whether the video is in vertical blank.
pub trait VblankSource {
    /// Are we between frames right now?
    fn in_vblank(&self) -> bool;
}

impl<F> VblankSource for F
where
    F: Fn() -> bool,
{
    fn in_vblank(&self) -> bool {
        self()
    }
}

/// Streams and requests shared between the two cores.
pub struct Worker<'buf, D, const S: usize, const R: usize>
where
    D: FileSystem,
{
    device: DeviceLock<D>,
    shared: Mutex<RefCell<Shared<'buf, D::File, S, R>>>,
    passes: AtomicU32,
    running: AtomicBool,
    close_failures: CloseFailures,
}

struct Shared<'buf, F, const S: usize, const R: usize> {
    streams: [Stream<'buf, F>; S],
    requests: RequestTable<'buf, F, R>,
}

/// Card work, planned with the metadata locked and done with it unlocked.
enum Job<F> {
    Open {
        slot: usize,
        epoch: u32,
        path: String<MAX_PATH_LEN>,
    },
    Seek {
        slot: usize,
        epoch: u32,
        file: F,
        position: u32,
    },
    Fill {
        slot: usize,
        plan: FillPlan<F>,
    },
    RequestOpen {
        index: usize,
        id: RequestId,
        path: String<MAX_PATH_LEN>,
    },
    RequestRead {
        index: usize,
        id: RequestId,
        file: F,
        len: usize,
    },
}

impl<'buf, D, const S: usize, const R: usize> Worker<'buf, D, S, R>
where
    D: FileSystem,
{
    /// Make a worker that reads from `device`, with `S` stream slots using
    /// `buffers` and `R` request slots.
    pub fn new<const HALF: usize>(
        device: D,
        buffers: &'buf mut StreamBuffers<HALF, S>,
    ) -> Worker<'buf, D, S, R> {
        Worker {
            device: DeviceLock::new(device),
            shared: Mutex::new(RefCell::new(Shared {
                streams: buffers.split(),
                requests: RequestTable::new(),
            })),
            passes: AtomicU32::new(0),
            running: AtomicBool::new(false),
            close_failures: CloseFailures::new(),
        }
    }

    /// Has [`Worker::run`] been called?
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// How many times the worker has been round all the slots.
    pub fn passes(&self) -> u32 {
        self.passes.load(Ordering::Relaxed)
    }

    /// The worker loop. Call this on the second core.
    pub fn run<V>(&self, vblank: &V) -> !
    where
        V: VblankSource + ?Sized,
    {
        self.running.store(true, Ordering::Release);
        loop {
            self.service(vblank);
            for _ in 0..WORKER_YIELD_SPINS {
                core::hint::spin_loop();
            }
        }
    }

    /// Go round every stream and request once, finishing whatever each one
    /// needs doing. Returns `true` if there was any work.
    pub fn service<V>(&self, vblank: &V) -> bool
    where
        V: VblankSource + ?Sized,
    {
        let mut worked = false;
        for slot in 0..S {
            while let Some(job) = self.plan_stream(slot) {
                self.do_job(job, vblank);
                worked = true;
            }
        }
        for index in 0..R {
            while let Some(job) = self.plan_request(index) {
                self.do_job(job, vblank);
                worked = true;
            }
        }
        self.passes.fetch_add(1, Ordering::Relaxed);
        worked
    }

    fn with_shared<T>(&self, f: impl FnOnce(&mut Shared<'buf, D::File, S, R>) -> T) -> T {
        critical_section::with(|cs| f(&mut self.shared.borrow_ref_mut(cs)))
    }

    fn plan_stream(&self, slot: usize) -> Option<Job<D::File>> {
        self.with_shared(|shared| {
            let stream = shared.streams.get_mut(slot)?;
            match stream.state() {
                StreamState::Opening => Some(Job::Open {
                    slot,
                    epoch: stream.epoch(),
                    path: stream.path_buf(),
                }),
                StreamState::Seeking => {
                    let Some(file) = stream.file() else {
                        stream.fail(StorageError::BadHandle);
                        return None;
                    };
                    Some(Job::Seek {
                        slot,
                        epoch: stream.epoch(),
                        file,
                        position: stream.seek_target(),
                    })
                }
                StreamState::Ready | StreamState::Filling(_) => {
                    stream.refill_due();
                    stream
                        .plan_fill(PUMP_CHUNK_BYTES)
                        .map(|plan| Job::Fill { slot, plan })
                }
                _ => None,
            }
        })
    }

    fn plan_request(&self, index: usize) -> Option<Job<D::File>> {
        self.with_shared(|shared| {
            let request = shared.requests.slot_mut(index)?;
            let id = request.id();
            match request.next_step(PUMP_CHUNK_BYTES)? {
                RequestStep::Open => Some(Job::RequestOpen {
                    index,
                    id,
                    path: request.path_buf(),
                }),
                RequestStep::Read { file, len } => Some(Job::RequestRead {
                    index,
                    id,
                    file,
                    len,
                }),
            }
        })
    }

    fn do_job<V>(&self, job: Job<D::File>, vblank: &V)
    where
        V: VblankSource + ?Sized,
    {
        let mut scratch = [0u8; PUMP_CHUNK_BYTES];
        match job {
            Job::Open { slot, epoch, path } => {
                let result = oneshot::open(&mut *self.device.lock(), &path, &self.close_failures);
                let stale = self.with_shared(|shared| {
                    let stream = &mut shared.streams[slot];
                    if stream.epoch() != epoch || stream.state() != StreamState::Opening {
                        return result.ok().map(|(file, _)| file);
                    }
                    match result {
                        Ok((file, size)) => stream.begin(file, size),
                        Err(e) => stream.fail(e),
                    }
                    None
                });
                self.close_file(stale);
            }
            Job::Seek {
                slot,
                epoch,
                file,
                position,
            } => {
                let result = self.device.lock().seek(file, position);
                self.with_shared(|shared| {
                    let stream = &mut shared.streams[slot];
                    if stream.epoch() == epoch && stream.state() == StreamState::Seeking {
                        match result {
                            Ok(()) => stream.finish_seek(position),
                            Err(e) => stream.fail(e.into()),
                        }
                    }
                });
            }
            Job::Fill { slot, plan } => {
                wait_for_vblank(vblank, VBLANK_WAIT_POLLS);
                let chunk = &mut scratch[..plan.len];
                let result = self.device.lock().read(plan.file, chunk);
                self.with_shared(|shared| {
                    let stream = &mut shared.streams[slot];
                    if !stream.accepts(&plan) {
                        return;
                    }
                    if let Ok(n) = result {
                        let dest = stream.fill_slice(&plan);
                        let n = n.min(dest.len());
                        dest[..n].copy_from_slice(&chunk[..n]);
                    }
                    stream.commit_fill(&plan, result);
                });
            }
            Job::RequestOpen { index, id, path } => {
                let result = oneshot::open(&mut *self.device.lock(), &path, &self.close_failures);
                let finished_with = self.with_shared(|shared| {
                    match running(&mut shared.requests, index, id) {
                        Some(request) => match result {
                            Ok((file, size)) => request.opened(file, size),
                            Err(e) => request.fail(e),
                        },
                        None => result.ok().map(|(file, _)| file),
                    }
                });
                self.close_file(finished_with);
            }
            Job::RequestRead {
                index,
                id,
                file,
                len,
            } => {
                wait_for_vblank(vblank, VBLANK_WAIT_POLLS);
                let chunk = &mut scratch[..len];
                let result = self.device.lock().read(file, chunk);
                let finished_with = self.with_shared(|shared| {
                    let Some(request) = running(&mut shared.requests, index, id) else {
                        return Some(file);
                    };
                    if let Ok(n) = result {
                        let dest = request.read_slice(len);
                        let n = n.min(dest.len());
                        dest[..n].copy_from_slice(&chunk[..n]);
                    }
                    request.read_done(result)
                });
                self.close_file(finished_with);
            }
        }
    }

    fn close_file(&self, file: Option<D::File>) {
        if let Some(file) = file {
            let result = self.device.lock().close(file);
            self.close_failures.record(result);
        }
    }

    /// Spin until `f` says the stream has got somewhere.
    fn wait_for<T>(
        &self,
        handle: StreamHandle,
        mut f: impl FnMut(&mut Stream<'buf, D::File>) -> Option<Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        loop {
            let outcome = self.with_shared(|shared| match lookup(&mut shared.streams, handle) {
                Ok(stream) => f(stream),
                Err(e) => Some(Err(e)),
            });
            if let Some(outcome) = outcome {
                return outcome;
            }
            core::hint::spin_loop();
        }
    }
}

impl<'w, 'buf, D, const S: usize, const R: usize> StorageScheduler<'buf> for &'w Worker<'buf, D, S, R>
where
    D: FileSystem,
{
    fn open(&mut self, path: &str) -> Result<StreamHandle, StorageError> {
        let handle = self.with_shared(|shared| {
            let (slot, stream) = shared
                .streams
                .iter_mut()
                .enumerate()
                .find(|(_, stream)| stream.is_free())
                .ok_or(StorageError::NoFreeSlot)?;
            stream.claim(slot, path)
        })?;
        // Core 1 opens the file and fills both halves
        let failed = self.wait_for(handle, |stream| match stream.state() {
            StreamState::Opening | StreamState::Filling(_) => None,
            _ => Some(Ok(stream.error().map(|error| (error, stream.close())))),
        })?;
        match failed {
            None => Ok(handle),
            Some((error, file)) => {
                self.close_file(file);
                Err(error)
            }
        }
    }

    fn read(&mut self, handle: StreamHandle, dest: &mut [u8]) -> Result<usize, StorageError> {
        self.with_shared(|shared| lookup(&mut shared.streams, handle)?.read(dest))
    }

    fn available(&self, handle: StreamHandle) -> usize {
        self.with_shared(|shared| lookup(&mut shared.streams, handle).map_or(0, |s| s.available()))
    }

    fn eof(&self, handle: StreamHandle) -> bool {
        self.with_shared(|shared| lookup(&mut shared.streams, handle).map_or(true, |s| s.is_eof()))
    }

    fn seek(&mut self, handle: StreamHandle, position: u32) -> Result<(), StorageError> {
        self.with_shared(|shared| lookup(&mut shared.streams, handle)?.begin_seek(position))?;
        self.wait_for(handle, |stream| match stream.state() {
            StreamState::Seeking => None,
            _ => Some(stream.check()),
        })
    }

    fn close(&mut self, handle: StreamHandle) -> Result<(), StorageError> {
        let file = self.wait_for(handle, |stream| {
            if stream.is_busy() {
                None
            } else {
                Some(Ok(stream.close()))
            }
        })?;
        if let Some(file) = file {
            self.device.lock().close(file)?;
        }
        Ok(())
    }

    fn size(&self, handle: StreamHandle) -> u32 {
        self.with_shared(|shared| lookup(&mut shared.streams, handle).map_or(0, |s| s.size()))
    }

    fn tell(&self, handle: StreamHandle) -> u32 {
        self.with_shared(|shared| lookup(&mut shared.streams, handle).map_or(0, |s| s.tell()))
    }

    /// Core 1 does the work. This only reports whether there is any.
    fn pump(&mut self) -> bool {
        self.with_shared(|shared| {
            shared.streams.iter().any(Stream::is_busy) || shared.requests.any_busy()
        })
    }

    fn submit(&mut self, path: &str, dest: &'buf mut [u8]) -> Result<RequestId, StorageError> {
        self.with_shared(|shared| shared.requests.submit(path, dest))
    }

    fn is_complete(&self, id: RequestId) -> bool {
        self.with_shared(|shared| shared.requests.is_complete(id))
    }

    fn result(&self, id: RequestId) -> Result<usize, StorageError> {
        self.with_shared(|shared| shared.requests.result(id))
    }

    fn cancel(&mut self, id: RequestId) -> Option<&'buf mut [u8]> {
        self.with_shared(|shared| shared.requests.cancel(id))
    }

    fn release(&mut self, id: RequestId) -> Option<&'buf mut [u8]> {
        self.with_shared(|shared| shared.requests.release(id))
    }

    fn close_failures(&self) -> u32 {
        self.close_failures.count()
    }
}

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

/// Poll `source` until it reports vertical blank, up to `polls` times.
///
/// Returns `false` if we gave up waiting. The caller should go ahead
/// anyway, as a late read is better than no read.
pub fn wait_for_vblank<V>(source: &V, polls: u32) -> bool
where
    V: VblankSource + ?Sized,
{
    for _ in 0..polls {
        if source.in_vblank() {
            return true;
        }
        core::hint::spin_loop();
    }
    false
}

/// The in-progress request in slot `index`, if it is still request `id`.
fn running<'t, 'buf, F, const R: usize>(
    requests: &'t mut RequestTable<'buf, F, R>,
    index: usize,
    id: RequestId,
) -> Option<&'t mut Request<'buf, F>>
where
    F: Copy,
{
    requests
        .slot_mut(index)
        .filter(|request| request.id() == id && request.state() == RequestState::InProgress)
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------


// End of file
