//! Scan-line generation.
//!
//! The DMA engine plays 400-byte line buffers, where every byte is a palette
//! index. The sync periods are just more palette indices (240 to 243) whose
//! CLUT entries hold control symbols, so the same path carries both.
//!
//! There are two line buffers. Each one is played for two consecutive
//! lines, which doubles the picture vertically, and we rebuild the idle one
//! on every odd line.

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

use crate::{
    clut::is_reserved,
    config::{BORDER_INDEX, SCREEN_WIDTH},
    frame::{FrameView, SourceRow},
    tmds::SyncSymbol,
};

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// What kind of line a buffer should hold.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LineKind {
    /// A visible line, showing picture line `y` (0..240).
    Active(u16),
    /// A line inside the vertical sync pulse.
    VSync,
    /// Any other line in vertical blank.
    Blank,
}

impl LineKind {
    /// Work out what goes on a given line of the 525-line frame.
    pub const fn for_line(line: u16) -> LineKind {
        if line < ACTIVE_LINES {
            LineKind::Active(line >> 1)
        } else if line >= VSYNC_FIRST_LINE && line <= VSYNC_LAST_LINE {
            LineKind::VSync
        } else {
            LineKind::Blank
        }
    }
}

/// A buffer to rebuild, and what to put in it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Prepare {
    /// Which of the two line buffers
    pub buffer: usize,
    /// What goes in it
    pub kind: LineKind,
}

/// Everything the line interrupt has to do this time round.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tick {
    /// Which line buffer the control channel should load next.
    pub queue: usize,
    /// The line counter after this tick.
    pub line: u16,
    /// The frame just wrapped, so publish the CLUT now.
    pub publish: bool,
    /// The idle buffer to rebuild, on odd lines only.
    pub prepare: Option<Prepare>,
}

/// Tracks where we are in the frame.
///
/// Lives inside the line interrupt and nowhere else.
#[derive(Debug, Clone)]
pub struct ScanlineEngine {
    line: u16,
    buffer: u32,
}

impl ScanlineEngine {
    /// Start at the top of the frame, playing buffer 0.
    pub const fn new() -> ScanlineEngine {
        ScanlineEngine { line: 0, buffer: 0 }
    }

    /// Advance one line.
    ///
    /// Call this once per line, when the control channel completes.
    pub fn tick(&mut self) -> Tick {
        let queue = (self.buffer & 1) as usize;
        let publish = if self.line >= LAST_LINE {
            self.line = 0;
            true
        } else {
            self.line += 1;
            false
        };
        let prepare = if self.line & 1 == 1 {
            self.buffer = self.buffer.wrapping_add(1);
            Some(Prepare {
                buffer: (self.buffer & 1) as usize,
                kind: LineKind::for_line(self.line),
            })
        } else {
            None
        };
        Tick {
            queue,
            line: self.line,
            publish,
            prepare,
        }
    }

    /// The current line counter, 0..525.
    pub fn line(&self) -> u16 {
        self.line
    }
}

impl Default for ScanlineEngine {
    fn default() -> Self {
        ScanlineEngine::new()
    }
}

// -----------------------------------------------------------------------------
// Static and Const Data
// -----------------------------------------------------------------------------

/// Bytes (palette indices) per line buffer.
pub const LINE_BYTES: usize = 400;

/// Length of the horizontal sync pulse.
pub const HSYNC_BYTES: usize = 48;

/// Where the picture starts, after sync and back porch.
pub const ACTIVE_START: usize = HSYNC_BYTES + 24;

/// Where the picture ends. The front porch follows.
pub const ACTIVE_END: usize = ACTIVE_START + SCREEN_WIDTH;

/// Lines with picture on them.
pub const ACTIVE_LINES: u16 = 480;

/// First line of the vertical sync pulse.
pub const VSYNC_FIRST_LINE: u16 = 490;

/// Last line of the vertical sync pulse.
pub const VSYNC_LAST_LINE: u16 = 491;

/// The highest value of the line counter.
pub const LAST_LINE: u16 = 524;

const _: () = assert!(ACTIVE_END + 8 == LINE_BYTES);

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

/// Is this line in vertical blank?
pub const fn in_vblank(line: u16) -> bool {
    line >= ACTIVE_LINES
}

/// Swap any reserved index for the border index.
///
/// The frame buffer must never be able to emit a sync symbol.
pub const fn guard(index: u8) -> u8 {
    if is_reserved(index) {
        BORDER_INDEX
    } else {
        index
    }
}

/// Fill a whole line buffer.
pub fn build_line(buffer: &mut [u8; LINE_BYTES], kind: LineKind, view: &FrameView) {
    match kind {
        LineKind::Active(y) => {
            buffer[..HSYNC_BYTES].fill(SyncSymbol::HSync.index());
            buffer[HSYNC_BYTES..ACTIVE_START].fill(SyncSymbol::Blank.index());
            compose_active(
                &mut buffer[ACTIVE_START..ACTIVE_END],
                view.source_row(y),
                view.shift_x,
            );
            buffer[ACTIVE_END..].fill(SyncSymbol::Blank.index());
        }
        LineKind::VSync => {
            buffer[..HSYNC_BYTES].fill(SyncSymbol::HVSync.index());
            buffer[HSYNC_BYTES..].fill(SyncSymbol::VSync.index());
        }
        LineKind::Blank => {
            buffer[..HSYNC_BYTES].fill(SyncSymbol::HSync.index());
            buffer[HSYNC_BYTES..].fill(SyncSymbol::Blank.index());
        }
    }
}

/// Lay one row of source pixels into the visible part of a line.
///
/// `shift_x` border pixels go first. A negative shift drops that many source
/// pixels instead. Whatever is left after the source runs out is border.
pub fn compose_active(out: &mut [u8], source: Option<SourceRow<'_>>, shift_x: i16) {
    let Some(source) = source else {
        out.fill(BORDER_INDEX);
        return;
    };
    let shift_x = i32::from(shift_x);
    let lead = shift_x.clamp(0, out.len() as i32) as usize;
    let skip = (-shift_x).max(0) as usize;
    out[..lead].fill(BORDER_INDEX);
    let source = source.skip(skip);
    let room = out.len() - lead;
    let (picture, trail) = out[lead..].split_at_mut(source.len().min(room));
    for (dst, src) in picture.iter_mut().zip(source.iter()) {
        *dst = guard(src);
    }
    trail.fill(BORDER_INDEX);
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------


// End of file
