//! Compile-time tuning for the video pipeline and the storage scheduler.
//!
//! Most of these numbers came from running on real hardware with a real SD
//! card. Change them with care.

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
// Static and Const Data
// -----------------------------------------------------------------------------

/// Width of the picture we show, in pixels.
///
/// Each pixel is doubled horizontally and every line is shown twice, giving
/// 640x480 on the wire.
pub const SCREEN_WIDTH: usize = 320;

/// Height of the largest picture we show, in lines.
pub const SCREEN_HEIGHT: usize = 240;

/// The first palette index that is reserved for sync and control symbols.
pub const RESERVED_BASE: u8 = 240;

/// How many palette indices are reserved, starting at [`RESERVED_BASE`].
pub const RESERVED_COUNT: u8 = 4;

/// Palette index used for borders, and in place of any reserved index found
/// in the frame buffer.
pub const BORDER_INDEX: u8 = 255;

/// Fade level at which every faded entry is simply black.
///
/// The top sixteen entries of [`FADE_GAMMA`] are zero anyway, so this only
/// saves the multiply.
pub const FADE_BLACK_LEVEL: u8 = 48;

/// Brightness scale for each fade level, out of 256.
pub const FADE_GAMMA: [u8; 64] = [
    255, 253, 251, 249, 247, 245, 243, 241, //
    239, 236, 234, 231, 229, 226, 223, 220, //
    217, 214, 211, 208, 204, 201, 197, 193, //
    189, 185, 181, 176, 172, 167, 162, 156, //
    151, 145, 139, 133, 126, 119, 112, 104, //
    96, 88, 79, 69, 59, 48, 36, 23, //
    0, 0, 0, 0, 0, 0, 0, 0, //
    0, 0, 0, 0, 0, 0, 0, 0, //
];

/// Most bytes we ask the card for in one go.
///
/// One 512 byte sector takes roughly 50 µs over SPI at 25 MHz, which fits
/// comfortably between two scan-line interrupts.
pub const PUMP_CHUNK_BYTES: usize = 512;

/// Size of each half of a stream's double buffer, in bytes.
pub const STREAM_HALF_BYTES: usize = 8192;

/// How many streams can be open at once.
pub const MAX_STREAMS: usize = 4;

/// How many one-shot reads can be queued at once.
pub const MAX_REQUESTS: usize = 8;

/// Longest path we accept, in bytes.
pub const MAX_PATH_LEN: usize = 256;

/// How many times the storage worker polls for vertical blank before it gives
/// up waiting and reads anyway.
pub const VBLANK_WAIT_POLLS: u32 = 50_000;

/// How many spins the storage worker idles for between passes.
pub const WORKER_YIELD_SPINS: u32 = 1_000;

const _: () = assert!(FADE_BLACK_LEVEL as usize <= FADE_GAMMA.len());
const _: () = assert!(PUMP_CHUNK_BYTES <= STREAM_HALF_BYTES);

// End of file
