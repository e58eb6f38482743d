//! Where the picture comes from.
//!
//! The application draws 8-bit palette indices into a [`FrameBuffer`]. It
//! tells the line interrupt which buffer to show, how big the picture is and
//! where to put it on screen through a [`FrameSource`]. The interrupt takes
//! a [`FrameView`] snapshot at the start of each line it builds.

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

use core::{cell::UnsafeCell, marker::PhantomData};

use portable_atomic::{AtomicBool, AtomicI16, AtomicPtr, AtomicU16, AtomicUsize, Ordering};

use crate::config::{SCREEN_HEIGHT, SCREEN_WIDTH};

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// Somewhere to draw pixels.
///
/// The line interrupt reads this while the application writes it, so we
/// only ever touch the contents through raw pointers.
#[repr(C, align(4))]
pub struct FrameBuffer<const N: usize> {
    pixels: UnsafeCell<[u8; N]>,
}

impl<const N: usize> FrameBuffer<N> {
    /// Make a new frame buffer, full of index zero.
    pub const fn new() -> FrameBuffer<N> {
        FrameBuffer {
            pixels: UnsafeCell::new([0; N]),
        }
    }

    /// Size in bytes.
    pub const fn len(&self) -> usize {
        N
    }

    /// Is this a zero-sized buffer?
    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    /// Get a pointer to the first pixel.
    pub fn as_ptr(&self) -> *const u8 {
        self.pixels.get() as *const u8
    }

    /// Write one pixel. Out of range writes are ignored.
    pub fn store_at(&self, offset: usize, index: u8) {
        if offset < N {
            // Safety: in bounds, and a byte store cannot tear
            unsafe { (self.pixels.get() as *mut u8).add(offset).write_volatile(index) }
        }
    }

    /// Read one pixel back. Out of range reads give `None`.
    pub fn load_at(&self, offset: usize) -> Option<u8> {
        if offset < N {
            // Safety: in bounds
            Some(unsafe { (self.pixels.get() as *const u8).add(offset).read_volatile() })
        } else {
            None
        }
    }

    /// Copy a run of pixels in, clipped to the end of the buffer.
    ///
    /// Returns how many pixels were copied.
    pub fn copy_from(&self, offset: usize, data: &[u8]) -> usize {
        let count = data.len().min(N.saturating_sub(offset));
        if count > 0 {
            // Safety: the destination range was clipped to the buffer, and
            // `data` cannot alias it because we never hand out references.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    data.as_ptr(),
                    (self.pixels.get() as *mut u8).add(offset),
                    count,
                );
            }
        }
        count
    }

    /// Set every pixel to the same index.
    pub fn fill(&self, index: u8) {
        // Safety: whole buffer, byte writes
        unsafe { core::ptr::write_bytes(self.pixels.get() as *mut u8, index, N) }
    }
}

impl<const N: usize> Default for FrameBuffer<N> {
    fn default() -> Self {
        FrameBuffer::new()
    }
}

unsafe impl<const N: usize> Sync for FrameBuffer<N> {}

/// The boot-time test pictures.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TestPattern {
    /// 8x8 squares cycling through palette entries 0..16.
    Checker,
    /// A left-to-right ramp through palette entries 0..240.
    Ramp,
}

impl TestPattern {
    /// The palette index for one pixel.
    pub fn pixel(self, x: usize, y: usize, width: usize) -> u8 {
        match self {
            TestPattern::Checker => (((x >> 3) ^ (y >> 3)) & 0x0F) as u8,
            TestPattern::Ramp => {
                let last = width.saturating_sub(1).max(1);
                ((x * 239) / last) as u8
            }
        }
    }

    /// Draw the whole pattern into a buffer.
    pub fn draw<const N: usize>(self, buffer: &FrameBuffer<N>, width: usize, height: usize) {
        for y in 0..height {
            for x in 0..width {
                buffer.store_at(y * width + x, self.pixel(x, y, width));
            }
        }
    }
}

/// Shared description of what to show, written by the application and read
/// by the line interrupt.
pub struct FrameSource {
    pixels: AtomicPtr<u8>,
    len: AtomicUsize,
    width: AtomicU16,
    height: AtomicU16,
    shift_x: AtomicI16,
    shift_y: AtomicI16,
    loading: AtomicBool,
}

impl FrameSource {
    /// No buffer, full-screen geometry, not loading.
    pub const fn new() -> FrameSource {
        FrameSource {
            pixels: AtomicPtr::new(core::ptr::null_mut()),
            len: AtomicUsize::new(0),
            width: AtomicU16::new(SCREEN_WIDTH as u16),
            height: AtomicU16::new(SCREEN_HEIGHT as u16),
            shift_x: AtomicI16::new(0),
            shift_y: AtomicI16::new(0),
            loading: AtomicBool::new(false),
        }
    }

    /// Show this buffer from the next line onwards.
    pub fn set_buffer<const N: usize>(&self, buffer: &'static FrameBuffer<N>) {
        critical_section::with(|_| {
            self.pixels
                .store(buffer.as_ptr() as *mut u8, Ordering::Relaxed);
            self.len.store(N, Ordering::Relaxed);
        });
    }

    /// Show only the border colour.
    pub fn clear_buffer(&self) {
        critical_section::with(|_| {
            self.pixels.store(core::ptr::null_mut(), Ordering::Relaxed);
            self.len.store(0, Ordering::Relaxed);
        });
    }

    /// Set the size of the picture in the buffer.
    pub fn set_resolution(&self, width: u16, height: u16) {
        critical_section::with(|_| {
            self.width.store(width, Ordering::Relaxed);
            self.height.store(height, Ordering::Relaxed);
        });
    }

    /// The size of the picture in the buffer.
    pub fn resolution(&self) -> (u16, u16) {
        (
            self.width.load(Ordering::Relaxed),
            self.height.load(Ordering::Relaxed),
        )
    }

    /// Move the picture on screen. Positive values move it right and down.
    pub fn set_shift(&self, x: i16, y: i16) {
        critical_section::with(|_| {
            self.shift_x.store(x, Ordering::Relaxed);
            self.shift_y.store(y, Ordering::Relaxed);
        });
    }

    /// Where the picture sits on screen.
    pub fn shift(&self) -> (i16, i16) {
        (
            self.shift_x.load(Ordering::Relaxed),
            self.shift_y.load(Ordering::Relaxed),
        )
    }

    /// While loading, only the border colour is shown.
    pub fn set_loading_mode(&self, loading: bool) {
        self.loading.store(loading, Ordering::Relaxed);
    }

    /// Are we showing just the border colour?
    pub fn loading_mode(&self) -> bool {
        self.loading.load(Ordering::Relaxed)
    }

    /// Take a copy of everything for building one line.
    pub fn snapshot(&self) -> FrameView {
        critical_section::with(|_| FrameView {
            pixels: self.pixels.load(Ordering::Relaxed),
            len: self.len.load(Ordering::Relaxed),
            width: self.width.load(Ordering::Relaxed),
            height: self.height.load(Ordering::Relaxed),
            shift_x: self.shift_x.load(Ordering::Relaxed),
            shift_y: self.shift_y.load(Ordering::Relaxed),
            loading: self.loading.load(Ordering::Relaxed),
        })
    }
}

impl Default for FrameSource {
    fn default() -> Self {
        FrameSource::new()
    }
}

/// One row of source pixels.
///
/// The application may be drawing into the frame buffer while the line
/// interrupt copies out of it, so pixels are only ever read one at a time
/// through a volatile load and never through a `&[u8]`.
#[derive(Debug, Copy, Clone)]
pub struct SourceRow<'a> {
    pixels: *const u8,
    len: usize,
    _buffer: PhantomData<&'a [u8]>,
}

impl<'a> SourceRow<'a> {
    /// Read from an ordinary slice.
    pub fn from_slice(pixels: &'a [u8]) -> SourceRow<'a> {
        SourceRow {
            pixels: pixels.as_ptr(),
            len: pixels.len(),
            _buffer: PhantomData,
        }
    }

    /// Number of pixels in the row.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Is the row empty?
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The same row without its first `count` pixels.
    pub fn skip(self, count: usize) -> SourceRow<'a> {
        let count = count.min(self.len);
        SourceRow {
            pixels: self.pixels.wrapping_add(count),
            len: self.len - count,
            _buffer: PhantomData,
        }
    }

    /// Read the pixels, left to right.
    pub fn iter(&self) -> impl Iterator<Item = u8> + 'a {
        let pixels = self.pixels;
        (0..self.len).map(move |offset| {
            // Safety: `offset < len`, and `pixels..pixels + len` was in
            // bounds of the slice or frame buffer this row came from.
            unsafe { pixels.add(offset).read_volatile() }
        })
    }
}

/// One consistent reading of a [`FrameSource`].
#[derive(Debug, Copy, Clone)]
pub struct FrameView {
    pixels: *const u8,
    len: usize,
    /// Picture width, in pixels
    pub width: u16,
    /// Picture height, in lines
    pub height: u16,
    /// Horizontal offset on screen
    pub shift_x: i16,
    /// Vertical offset on screen
    pub shift_y: i16,
    /// Show only the border
    pub loading: bool,
}

impl FrameView {
    /// A view with no buffer, as seen before the application starts.
    pub const EMPTY: FrameView = FrameView {
        pixels: core::ptr::null(),
        len: 0,
        width: SCREEN_WIDTH as u16,
        height: SCREEN_HEIGHT as u16,
        shift_x: 0,
        shift_y: 0,
        loading: false,
    };

    /// Is there anything to show?
    pub fn has_buffer(&self) -> bool {
        !self.pixels.is_null()
    }

    /// The source pixels for screen line `y`, if that line shows any of the
    /// picture.
    ///
    /// Returns `None` while loading, with no buffer, or when the line is
    /// above, below or entirely beside the picture.
    pub fn source_row(&self, y: u16) -> Option<SourceRow<'static>> {
        if self.loading || self.pixels.is_null() || self.width == 0 {
            return None;
        }
        let width = i32::from(self.width);
        let shift_x = i32::from(self.shift_x);
        if shift_x >= SCREEN_WIDTH as i32 || shift_x + width <= 0 {
            return None;
        }
        let row = i32::from(y) - i32::from(self.shift_y);
        if row < 0 || row >= i32::from(self.height) {
            return None;
        }
        let start = row as usize * width as usize;
        let end = start + width as usize;
        if end > self.len {
            return None;
        }
        // `pixels` came from a `&'static FrameBuffer` at least `len` bytes
        // long, so the whole row is in bounds.
        Some(SourceRow {
            pixels: self.pixels.wrapping_add(start),
            len: width as usize,
            _buffer: PhantomData,
        })
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------


// End of file
