//! TMDS symbol generation.
//!
//! The output state machine shifts out six bits per PIO clock: one
//! differential pair per lane, three lanes. A pixel is ten PIO clocks long,
//! so one pixel is sixty bits. We pack those into a `u64` as two 30-bit
//! halves, because the state machine autopulls at 30 bits.
//!
//! There is no DC balancing. Each channel value always maps to the same
//! symbol, which is what lets us pre-encode the whole palette.

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

use crate::rgb::RGBColour;

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// Which way round the three lanes are wired to the output pins.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LaneOrder {
    /// Red on the highest pair, blue on the lowest
    Rgb,
    /// Blue on the highest pair, red on the lowest
    Bgr,
}

/// Board-specific details of how symbols reach the pins.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Serialiser {
    /// The P and N pins of every pair are swapped on the board.
    pub invert_pairs: bool,
    /// Lane to pin mapping.
    pub lane_order: LaneOrder,
    /// The red and green lanes are swapped on the board.
    pub swap_red_green: bool,
}

/// The four DVI control periods we generate.
///
/// The discriminant is the palette index the symbol lives at.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SyncSymbol {
    /// Blanking, neither sync pulse active
    Blank = 240,
    /// Horizontal sync pulse
    HSync = 241,
    /// Vertical sync pulse
    VSync = 242,
    /// Both sync pulses at once
    HVSync = 243,
}

impl SyncSymbol {
    /// All the sync symbols, in palette order.
    pub const ALL: [SyncSymbol; 4] = [
        SyncSymbol::Blank,
        SyncSymbol::HSync,
        SyncSymbol::VSync,
        SyncSymbol::HVSync,
    ];

    /// The palette index this symbol is stored at.
    pub const fn index(self) -> u8 {
        self as u8
    }

    /// The control code carried on the blue lane.
    ///
    /// Red and green always carry `CONTROL_CODES[0]`.
    const fn blue_code(self) -> u16 {
        match self {
            SyncSymbol::Blank => CONTROL_CODES[3],
            SyncSymbol::HSync => CONTROL_CODES[2],
            SyncSymbol::VSync => CONTROL_CODES[1],
            SyncSymbol::HVSync => CONTROL_CODES[0],
        }
    }
}

impl Serialiser {
    /// Straight-through wiring, red on the top pair.
    pub const DEFAULT: Serialiser = Serialiser {
        invert_pairs: false,
        lane_order: LaneOrder::Rgb,
        swap_red_green: false,
    };

    /// Pack three 10-bit channel symbols into one 64-bit output word.
    ///
    /// Symbols are sent most-significant bit first. The first five bit
    /// periods land in bits 32..62 and the last five in bits 0..30. Bits 30,
    /// 31, 62 and 63 are always clear.
    pub const fn serialise(&self, red: u16, green: u16, blue: u16) -> u64 {
        let (red, green) = if self.swap_red_green {
            (green, red)
        } else {
            (red, green)
        };
        let mut out: u64 = 0;
        let mut i = 0;
        while i < 10 {
            out <<= 6;
            if i == 5 {
                // skip the two pad bits at the top of the low word
                out <<= 2;
            }
            let shift = 9 - i;
            let r = self.pair((red >> shift) & 1);
            let g = self.pair((green >> shift) & 1);
            let b = self.pair((blue >> shift) & 1);
            let symbol = match self.lane_order {
                LaneOrder::Rgb => (r << 4) | (g << 2) | b,
                LaneOrder::Bgr => (b << 4) | (g << 2) | r,
            };
            out |= symbol as u64;
            i += 1;
        }
        out
    }

    /// Encode and pack a 24-bit colour.
    pub const fn encode_colour(&self, colour: RGBColour) -> u64 {
        self.serialise(
            tmds_encode(colour.red()),
            tmds_encode(colour.green()),
            tmds_encode(colour.blue()),
        )
    }

    /// Pack one of the control period symbols.
    pub const fn sync_word(&self, symbol: SyncSymbol) -> u64 {
        self.serialise(CONTROL_CODES[0], CONTROL_CODES[0], symbol.blue_code())
    }

    /// Turn one data bit into the two bits of a differential pair.
    const fn pair(&self, bit: u16) -> u16 {
        let pair = bit | ((bit ^ 1) << 1);
        if self.invert_pairs {
            pair ^ 0b11
        } else {
            pair
        }
    }
}

impl Default for Serialiser {
    fn default() -> Self {
        Serialiser::DEFAULT
    }
}

// -----------------------------------------------------------------------------
// Static and Const Data
// -----------------------------------------------------------------------------

/// The four DVI control period symbols.
pub const CONTROL_CODES: [u16; 4] = [0b1101010100, 0b0010101011, 0b0101010100, 0b1010101011];

/// Bits of a packed word that carry lane data. The rest are padding.
pub const LANE_BITS: u64 = 0x3FFF_FFFF_3FFF_FFFF;

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

/// Transition-minimise one 8-bit channel into a 10-bit symbol.
///
/// Bit 8 is set when the XOR chain was used, bit 9 when XNOR was.
pub const fn tmds_encode(data: u8) -> u16 {
    let ones = data.count_ones();
    let use_xnor = ones > 4 || (ones == 4 && (data & 1) == 0);
    let data = data as u16;
    let mut code: u16 = data & 1;
    let mut previous = code;
    let mut bit = 1;
    while bit < 8 {
        let invert = if use_xnor { 1 << bit } else { 0 };
        code |= ((previous << 1) ^ (data & (1 << bit))) ^ invert;
        previous = code & (1 << bit);
        bit += 1;
    }
    if use_xnor {
        code | (1 << 9)
    } else {
        code | (1 << 8)
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Undo the XOR/XNOR chain.
    fn tmds_decode(code: u16) -> u8 {
        let xnor = (code >> 9) & 1 == 1;
        let q = code & 0xFF;
        let mut data = q & 1;
        for bit in 1..8 {
            let mut d = ((q >> bit) ^ (q >> (bit - 1))) & 1;
            if xnor {
                d ^= 1;
            }
            data |= d << bit;
        }
        data as u8
    }

    #[test]
    fn known_symbols() {
        assert_eq!(tmds_encode(0x00), 0x100);
        assert_eq!(tmds_encode(0xFF), 0x2FF);
        assert_eq!(tmds_encode(0x01), 0x1FF);
        assert_eq!(tmds_encode(0x55), 0x133);
        // four ones with bit 0 set stays on the XOR chain
        assert_eq!(tmds_encode(0x0F), 0x105);
    }

    #[test]
    fn every_value_decodes() {
        for value in 0..=255u8 {
            let code = tmds_encode(value);
            assert!(code < 1 << 10);
            // exactly one of the two flag bits
            assert_eq!((code >> 8).count_ones(), 1, "value {value:#04x}");
            assert_eq!(tmds_decode(code), value);
        }
    }

    #[test]
    fn packed_red() {
        let word = Serialiser::DEFAULT.serialise(0x3FF, 0, 0);
        // every symbol is red=01, green=10, blue=10
        assert_eq!(word, 0x1A69_A69A_1A69_A69A);
    }

    #[test]
    fn packed_black() {
        let word = Serialiser::DEFAULT.encode_colour(RGBColour::BLACK);
        assert_eq!(word, 0x2A56_AAAA_2AAA_AAAA);
    }

    #[test]
    fn blank_symbol() {
        let word = Serialiser::DEFAULT.sync_word(SyncSymbol::Blank);
        assert_eq!(word, 0x155A_95A9_16A5_6A69);
    }

    #[test]
    fn bgr_mirrors_rgb() {
        let bgr = Serialiser {
            lane_order: LaneOrder::Bgr,
            ..Serialiser::DEFAULT
        };
        assert_eq!(
            bgr.serialise(0x3FF, 0x155, 0x0AA),
            Serialiser::DEFAULT.serialise(0x0AA, 0x155, 0x3FF)
        );
    }

    proptest! {
        #[test]
        fn pairs_are_always_differential(r in 0u16..1024, g in 0u16..1024, b in 0u16..1024) {
            let word = Serialiser::DEFAULT.serialise(r, g, b);
            prop_assert_eq!(word & !LANE_BITS, 0);
            for pair in 0..32 {
                let bits = (word >> (pair * 2)) & 0b11;
                if (pair * 2) % 32 == 30 {
                    prop_assert_eq!(bits, 0);
                } else {
                    prop_assert!(bits == 0b01 || bits == 0b10);
                }
            }
        }

        #[test]
        fn inverted_pairs_flip_every_lane_bit(r in 0u16..1024, g in 0u16..1024, b in 0u16..1024) {
            let inverted = Serialiser { invert_pairs: true, ..Serialiser::DEFAULT };
            prop_assert_eq!(
                inverted.serialise(r, g, b),
                Serialiser::DEFAULT.serialise(r, g, b) ^ LANE_BITS
            );
        }

        #[test]
        fn swapping_red_and_green(r in 0u16..1024, g in 0u16..1024, b in 0u16..1024) {
            let swapped = Serialiser { swap_red_green: true, ..Serialiser::DEFAULT };
            prop_assert_eq!(
                swapped.serialise(r, g, b),
                Serialiser::DEFAULT.serialise(g, r, b)
            );
        }
    }
}

// End of file
