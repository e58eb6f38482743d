//! # dvi-stream common code
//!
//! Everything in here is independent of the RP2040 peripherals, so it builds
//! for the host and gets unit tested there. The `dvi-stream` firmware crate
//! wires these types up to PIO, DMA and the SD card.
//!
//! * [`tmds`] turns 8-bit colour channels into 10-bit TMDS symbols, and packs
//!   three of those into the 64-bit words the output state machine wants.
//! * [`clut`] holds the two colour look-up tables the DMA engine reads from.
//! * [`palette`] keeps the 24-bit palette and applies fades on top of it.
//! * [`frame`] describes where the indexed frame buffer lives.
//! * [`scanline`] decides what goes into each 400-byte line buffer.
//! * [`storage`] is the SD card stream and one-shot read scheduler.

#![cfg_attr(not(test), no_std)]

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

pub mod clut;
pub mod config;
pub mod frame;
pub mod palette;
pub mod rgb;
pub mod scanline;
pub mod stats;
pub mod storage;
pub mod tmds;

// -----------------------------------------------------------------------------
// Imports
// -----------------------------------------------------------------------------

pub use rgb::RGBColour;

// End of file
