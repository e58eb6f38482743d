//! The application's view of the palette.
//!
//! We remember the colour the application asked for (the original) and the
//! colour we actually encoded (the current one, after any fade). Fades are
//! always recomputed from the originals, so fading out and back in again is
//! lossless.

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
    clut::{ClutEdit, ClutError, DoubleClut, ENTRIES, ROW_ENTRIES},
    config::{BORDER_INDEX, FADE_BLACK_LEVEL, FADE_GAMMA, RESERVED_BASE},
    rgb::RGBColour,
};

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// Palette and fade state, bound to the CLUT it feeds.
pub struct Palette<'a> {
    clut: &'a DoubleClut,
    original: [RGBColour; ENTRIES],
    current: [RGBColour; ENTRIES],
    fade_level: u8,
    fade_rows: u16,
}

impl<'a> Palette<'a> {
    /// Make a new all-black palette with no fade.
    pub const fn new(clut: &'a DoubleClut) -> Palette<'a> {
        Palette {
            clut,
            original: [RGBColour::BLACK; ENTRIES],
            current: [RGBColour::BLACK; ENTRIES],
            fade_level: 0,
            fade_rows: 0,
        }
    }

    /// Set one palette entry.
    ///
    /// The colour is remembered even for the reserved indices, but those
    /// never reach the CLUT. The change shows up at the next vertical blank.
    pub fn set_palette(&mut self, index: u8, colour: RGBColour) {
        self.store(index, colour);
        match self.clut.write_entry(index, self.current[usize::from(index)]) {
            Ok(()) | Err(ClutError::Reserved(_)) => {}
        }
    }

    /// Set the colour used for the border, and for any reserved index found
    /// in the frame buffer.
    pub fn set_background(&mut self, colour: RGBColour) {
        self.set_palette(BORDER_INDEX, colour);
    }

    /// Set a run of entries, starting at `first`, in one batch.
    ///
    /// Everything lands in the same published frame.
    pub fn load(&mut self, first: u8, colours: &[RGBColour]) {
        let clut = self.clut;
        let mut edit = clut.edit();
        for (index, colour) in (usize::from(first)..ENTRIES).zip(colours.iter()) {
            let index = index as u8;
            self.store(index, *colour);
            encode(&mut edit, index, self.current[usize::from(index)]);
        }
    }

    /// Change the fade.
    ///
    /// `level` 0 is full brightness. At [`FADE_BLACK_LEVEL`] and above,
    /// faded entries are black. `rows` selects which groups of sixteen
    /// entries fade (bit `n` is entries `16n..16n+16`); zero means all of
    /// them.
    pub fn set_fade_level(&mut self, level: u8, rows: u16) {
        self.fade_level = level;
        self.fade_rows = rows;
        let clut = self.clut;
        let mut edit = clut.edit();
        for index in 0..ENTRIES {
            let index = index as u8;
            let current = fade(self.original[usize::from(index)], index, level, rows);
            self.current[usize::from(index)] = current;
            encode(&mut edit, index, current);
        }
        drop(edit);
        self.clut.restore_sync_codes();
    }

    /// The fade level last set.
    pub fn fade_level(&self) -> u8 {
        self.fade_level
    }

    /// The fade row mask last set.
    pub fn fade_rows(&self) -> u16 {
        self.fade_rows
    }

    /// The colour the application asked for.
    pub fn original(&self, index: u8) -> RGBColour {
        self.original[usize::from(index)]
    }

    /// The colour after the fade was applied.
    pub fn current(&self, index: u8) -> RGBColour {
        self.current[usize::from(index)]
    }

    /// Put the sync symbols back, in case something scribbled on them.
    pub fn restore_sync_colors(&self) {
        self.clut.restore_sync_codes();
    }

    /// Load the 16-colour CGA palette into entries 0..16, with a black
    /// border.
    pub fn load_basic(&mut self) {
        self.load(0, &CGA_COLOURS);
        self.set_background(RGBColour::BLACK);
        self.restore_sync_colors();
    }

    /// Load a grey ramp into every entry below the reserved range, with a
    /// black border.
    pub fn load_greyscale(&mut self) {
        let mut ramp = [RGBColour::BLACK; RESERVED_BASE as usize];
        for (level, colour) in ramp.iter_mut().enumerate() {
            let level = level as u8;
            *colour = RGBColour::from_24bit(level, level, level);
        }
        self.load(0, &ramp);
        self.set_background(RGBColour::BLACK);
        self.restore_sync_colors();
    }

    fn store(&mut self, index: u8, colour: RGBColour) {
        let colour = RGBColour::from_packed(colour.0);
        self.original[usize::from(index)] = colour;
        self.current[usize::from(index)] = fade(colour, index, self.fade_level, self.fade_rows);
    }
}

// -----------------------------------------------------------------------------
// Static and Const Data
// -----------------------------------------------------------------------------

/// The sixteen CGA colours.
pub const CGA_COLOURS: [RGBColour; 16] = [
    RGBColour(0x000000),
    RGBColour(0x0000AA),
    RGBColour(0x00AA00),
    RGBColour(0x00AAAA),
    RGBColour(0xAA0000),
    RGBColour(0xAA00AA),
    RGBColour(0xAA5500),
    RGBColour(0xAAAAAA),
    RGBColour(0x555555),
    RGBColour(0x5555FF),
    RGBColour(0x55FF55),
    RGBColour(0x55FFFF),
    RGBColour(0xFF5555),
    RGBColour(0xFF55FF),
    RGBColour(0xFFFF55),
    RGBColour(0xFFFFFF),
];

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

/// Work out what colour an entry shows at a given fade.
pub fn fade(colour: RGBColour, index: u8, level: u8, rows: u16) -> RGBColour {
    if level >= FADE_BLACK_LEVEL {
        // every row, whatever the mask says
        return RGBColour::BLACK;
    }
    let row = usize::from(index) / ROW_ENTRIES;
    let selected = rows == 0 || (rows & (1 << row)) != 0;
    if !selected || level == 0 {
        colour
    } else {
        colour.scale(FADE_GAMMA[usize::from(level)])
    }
}

/// Reserved indices keep their sync symbol whatever the palette says, so
/// the CLUT refusing them is expected.
fn encode(edit: &mut ClutEdit<'_>, index: u8, colour: RGBColour) {
    match edit.write(index, colour) {
        Ok(()) | Err(ClutError::Reserved(_)) => {}
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmds::Serialiser;
    use proptest::prelude::*;

    fn new_clut() -> Box<DoubleClut> {
        let clut = Box::new(DoubleClut::new(Serialiser::DEFAULT));
        clut.restore_sync_codes();
        clut
    }

    fn encoded(colour: u32) -> u64 {
        Serialiser::DEFAULT.encode_colour(RGBColour::from_packed(colour))
    }

    #[test]
    fn set_then_publish() {
        let clut = new_clut();
        let mut palette = Palette::new(&clut);
        palette.set_palette(5, RGBColour::from_packed(0xFF0000));
        assert!(clut.is_dirty());
        assert_ne!(clut.front_entry(5)[0], encoded(0xFF0000));
        assert!(clut.publish());
        assert_eq!(clut.front_entry(5)[0], encoded(0xFF0000));
    }

    #[test]
    fn reserved_index_is_remembered_but_not_encoded() {
        let clut = new_clut();
        let mut palette = Palette::new(&clut);
        let sync = clut.back_entry(241);
        palette.set_palette(241, RGBColour::from_packed(0x00FF00));
        assert_eq!(palette.original(241), RGBColour::from_packed(0x00FF00));
        assert_eq!(clut.back_entry(241), sync);
        clut.publish();
        assert_eq!(clut.front_entry(241), sync);
    }

    #[test]
    fn fade_all_to_black() {
        let clut = new_clut();
        let mut palette = Palette::new(&clut);
        palette.set_palette(7, RGBColour::from_packed(0x808080));
        palette.set_fade_level(63, 0);
        assert_eq!(palette.current(7), RGBColour::BLACK);
        assert_eq!(palette.original(7), RGBColour::from_packed(0x808080));
        assert_eq!(clut.back_entry(7)[0], encoded(0x000000));
        // the sync symbols survive a fade
        let blank = Serialiser::DEFAULT.sync_word(crate::tmds::SyncSymbol::Blank);
        assert_eq!(clut.back_entry(240), [blank, blank]);
    }

    #[test]
    fn black_threshold_ignores_gamma() {
        assert_eq!(
            fade(RGBColour::WHITE, 3, FADE_BLACK_LEVEL, 0),
            RGBColour::BLACK
        );
        assert_eq!(
            fade(RGBColour::WHITE, 3, FADE_BLACK_LEVEL - 1, 0),
            RGBColour::WHITE.scale(23)
        );
    }

    #[test]
    fn fade_only_selected_rows() {
        let clut = new_clut();
        let mut palette = Palette::new(&clut);
        palette.set_palette(3, RGBColour::WHITE);
        palette.set_palette(20, RGBColour::WHITE);
        // row 1 only: entries 16..32
        palette.set_fade_level(10, 1 << 1);
        assert_eq!(palette.current(3), RGBColour::WHITE);
        assert_eq!(palette.current(20), RGBColour::WHITE.scale(FADE_GAMMA[10]));
    }

    #[test]
    fn black_level_ignores_row_mask() {
        let clut = new_clut();
        let mut palette = Palette::new(&clut);
        palette.set_palette(3, RGBColour::WHITE);
        palette.set_palette(20, RGBColour::WHITE);
        palette.set_fade_level(FADE_BLACK_LEVEL, 1 << 1);
        assert_eq!(palette.current(3), RGBColour::BLACK);
        assert_eq!(palette.current(20), RGBColour::BLACK);
        assert_eq!(clut.back_entry(3)[0], encoded(0x000000));
        assert_eq!(
            fade(RGBColour::WHITE, 3, FADE_BLACK_LEVEL + 5, 1 << 1),
            RGBColour::BLACK
        );
    }

    #[test]
    fn fade_applies_to_later_sets() {
        let clut = new_clut();
        let mut palette = Palette::new(&clut);
        palette.set_fade_level(50, 0);
        palette.set_palette(9, RGBColour::WHITE);
        assert_eq!(palette.current(9), RGBColour::BLACK);
        palette.set_fade_level(0, 0);
        assert_eq!(palette.current(9), RGBColour::WHITE);
        assert_eq!(palette.fade_level(), 0);
    }

    #[test]
    fn background_is_border_index() {
        let clut = new_clut();
        let mut palette = Palette::new(&clut);
        palette.set_background(RGBColour::from_packed(0x102030));
        assert_eq!(palette.original(255), RGBColour::from_packed(0x102030));
        assert_eq!(clut.back_entry(255)[0], encoded(0x102030));
    }

    #[test]
    fn basic_palette() {
        let clut = new_clut();
        let mut palette = Palette::new(&clut);
        palette.load_basic();
        assert_eq!(palette.original(4), RGBColour::from_packed(0xAA0000));
        assert_eq!(palette.original(15), RGBColour::WHITE);
        assert_eq!(palette.original(255), RGBColour::BLACK);
    }

    #[test]
    fn greyscale_palette() {
        let clut = new_clut();
        let mut palette = Palette::new(&clut);
        palette.load_greyscale();
        assert_eq!(palette.original(0), RGBColour::BLACK);
        assert_eq!(palette.original(239), RGBColour::from_packed(0xEFEFEF));
        assert_eq!(clut.back_entry(100)[0], encoded(0x646464));
    }

    proptest! {
        #[test]
        fn fade_zero_restores_originals(
            colours in proptest::collection::vec(0..=0xFF_FFFFu32, ENTRIES),
            fades in proptest::collection::vec((any::<u8>(), any::<u16>()), 0..8),
            rows in any::<u16>(),
        ) {
            let clut = new_clut();
            let mut palette = Palette::new(&clut);
            let colours: Vec<RGBColour> =
                colours.into_iter().map(RGBColour::from_packed).collect();
            palette.load(0, &colours);
            for (level, mask) in fades {
                palette.set_fade_level(level, mask);
            }
            palette.set_fade_level(0, rows);
            for index in 0..=255u8 {
                let original = colours[usize::from(index)];
                prop_assert_eq!(palette.current(index), original);
                if !crate::clut::is_reserved(index) {
                    prop_assert_eq!(clut.back_entry(index)[0], encoded(original.0));
                }
            }
        }
    }
}

// End of file
