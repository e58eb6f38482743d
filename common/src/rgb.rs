//! Code for handling 24-bit RGB colour values.

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
// Types
// -----------------------------------------------------------------------------

/// Represents a 24-bit colour value.
///
/// Packed as `0x00RRGGBB`, which is how colours arrive from the application
/// and from palette files on the SD card.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RGBColour(pub u32);

impl RGBColour {
    /// Black (all bits off)
    pub const BLACK: RGBColour = RGBColour::from_24bit(0x00, 0x00, 0x00);

    /// White (all bits on)
    pub const WHITE: RGBColour = RGBColour::from_24bit(0xFF, 0xFF, 0xFF);

    /// Make an [`RGBColour`] from three 8-bit channels.
    pub const fn from_24bit(red: u8, green: u8, blue: u8) -> RGBColour {
        RGBColour(((red as u32) << 16) | ((green as u32) << 8) | (blue as u32))
    }

    /// Make an [`RGBColour`] from a packed `0xRRGGBB` value.
    ///
    /// Anything in the top byte is discarded.
    pub const fn from_packed(rgb: u32) -> RGBColour {
        RGBColour(rgb & 0x00FF_FFFF)
    }

    /// Get the red component
    pub const fn red(self) -> u8 {
        (self.0 >> 16) as u8
    }

    /// Get the green component
    pub const fn green(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Get the blue component
    pub const fn blue(self) -> u8 {
        self.0 as u8
    }

    /// Scale every channel by `scale / 256`.
    ///
    /// A scale of 255 is very nearly, but not quite, the identity.
    pub const fn scale(self, scale: u8) -> RGBColour {
        const fn channel(value: u8, scale: u8) -> u8 {
            ((value as u16 * scale as u16) >> 8) as u8
        }
        RGBColour::from_24bit(
            channel(self.red(), scale),
            channel(self.green(), scale),
            channel(self.blue(), scale),
        )
    }
}

impl From<u32> for RGBColour {
    fn from(rgb: u32) -> RGBColour {
        RGBColour::from_packed(rgb)
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_unpack() {
        let c = RGBColour::from_packed(0xFF12_3456);
        assert_eq!(c.0, 0x0012_3456);
        assert_eq!((c.red(), c.green(), c.blue()), (0x12, 0x34, 0x56));
    }

    #[test]
    fn scaling() {
        assert_eq!(RGBColour::WHITE.scale(0), RGBColour::BLACK);
        assert_eq!(
            RGBColour::WHITE.scale(128),
            RGBColour::from_24bit(0x7F, 0x7F, 0x7F)
        );
        // 200 * 239 / 256 = 186.7, which truncates
        assert_eq!(
            RGBColour::from_24bit(200, 0, 100).scale(239),
            RGBColour::from_24bit(186, 0, 93)
        );
    }
}

// End of file
