//! A spin lock around the SD card, for when both cores want it.

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

use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};

use portable_atomic::{AtomicBool, Ordering};

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// Owns a device and hands out one [`DeviceGuard`] at a time.
///
/// Card transfers take far too long to do inside a critical section, so this
/// spins instead of masking interrupts.
pub struct DeviceLock<D> {
    locked: AtomicBool,
    device: UnsafeCell<D>,
}

// Safety: the device is only reachable through a guard, and the flag makes
// sure there is at most one guard.
unsafe impl<D> Sync for DeviceLock<D> where D: Send {}

/// Access to a locked device. Dropping it (or calling
/// [`DeviceGuard::unlock`]) lets the other core in.
pub struct DeviceGuard<'a, D> {
    lock: &'a DeviceLock<D>,
}

impl<D> DeviceLock<D> {
    /// Wrap a device.
    pub const fn new(device: D) -> DeviceLock<D> {
        DeviceLock {
            locked: AtomicBool::new(false),
            device: UnsafeCell::new(device),
        }
    }

    /// Wait for the device to be free, then take it.
    pub fn lock(&self) -> DeviceGuard<'_, D> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            core::hint::spin_loop();
        }
    }

    /// Take the device if nobody else has it.
    pub fn try_lock(&self) -> Option<DeviceGuard<'_, D>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| DeviceGuard { lock: self })
    }

    /// Is somebody using the device right now?
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Get the device back.
    pub fn into_inner(self) -> D {
        self.device.into_inner()
    }
}

impl<'a, D> DeviceGuard<'a, D> {
    /// Give the device back.
    pub fn unlock(self) {}
}

impl<'a, D> Deref for DeviceGuard<'a, D> {
    type Target = D;

    fn deref(&self) -> &D {
        // Safety: we hold the lock
        unsafe { &*self.lock.device.get() }
    }
}

impl<'a, D> DerefMut for DeviceGuard<'a, D> {
    fn deref_mut(&mut self) -> &mut D {
        // Safety: we hold the lock, and `&mut self` means nobody else is
        // using this guard
        unsafe { &mut *self.lock.device.get() }
    }
}

impl<'a, D> Drop for DeviceGuard<'a, D> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_guard_at_a_time() {
        let lock = DeviceLock::new(5u32);
        let mut guard = lock.lock();
        assert!(lock.is_locked());
        assert!(lock.try_lock().is_none());
        *guard += 1;
        guard.unlock();
        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(), 6);
        assert_eq!(lock.into_inner(), 6);
    }

    #[test]
    fn two_threads() {
        let lock = DeviceLock::new(Vec::new());
        std::thread::scope(|s| {
            for t in 0..2 {
                let lock = &lock;
                s.spawn(move || {
                    for i in 0..1000 {
                        lock.lock().push(t * 1000 + i);
                    }
                });
            }
        });
        let mut all = lock.into_inner();
        assert_eq!(all.len(), 2000);
        all.sort();
        assert!(all.iter().copied().eq(0..2000));
    }
}

// End of file
