//! The double-buffered colour look-up table.
//!
//! The palette DMA channel reads four words per pixel straight out of the
//! front table: the packed symbol for the pixel, then the same symbol with
//! the clock lane phase flipped, which is how each pixel gets doubled
//! horizontally. The address generator builds the read address from the
//! top twenty bits of the table base and the pixel index, so each table has
//! to sit on a 4 KiB boundary.
//!
//! Application code only ever writes to the back table. The line interrupt
//! copies the changed rows across at the start of vertical blank.

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

use portable_atomic::{AtomicU32, Ordering};

use crate::{
    config::{RESERVED_BASE, RESERVED_COUNT},
    rgb::RGBColour,
    tmds::{Serialiser, SyncSymbol},
};

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// Errors from editing the CLUT.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClutError {
    /// That index holds a sync symbol and cannot be given a colour.
    Reserved(u8),
}

/// One full table, as the DMA engine sees it.
#[repr(C, align(4096))]
pub struct ClutTable {
    words: [AtomicU32; TABLE_WORDS],
}

impl ClutTable {
    const fn new() -> ClutTable {
        #[allow(clippy::declare_interior_mutable_const)]
        const ZERO: AtomicU32 = AtomicU32::new(0);
        ClutTable {
            words: [ZERO; TABLE_WORDS],
        }
    }

    /// The address of the first word.
    pub fn address(&self) -> usize {
        self as *const _ as usize
    }

    /// Read back both 64-bit slots of an entry.
    pub fn entry(&self, index: u8) -> [u64; 2] {
        let base = usize::from(index) * WORDS_PER_ENTRY;
        let word = |n: usize| u64::from(self.words[base + n].load(Ordering::Relaxed));
        [word(0) | (word(1) << 32), word(2) | (word(3) << 32)]
    }

    fn store_entry(&self, index: u8, first: u64) {
        let second = first ^ SECOND_PIXEL_FLIP;
        let base = usize::from(index) * WORDS_PER_ENTRY;
        self.words[base].store(first as u32, Ordering::Relaxed);
        self.words[base + 1].store((first >> 32) as u32, Ordering::Relaxed);
        self.words[base + 2].store(second as u32, Ordering::Relaxed);
        self.words[base + 3].store((second >> 32) as u32, Ordering::Relaxed);
    }

    /// Sync entries hold the same word in both slots.
    fn store_sync(&self, index: u8, word: u64) {
        let base = usize::from(index) * WORDS_PER_ENTRY;
        for slot in 0..2 {
            self.words[base + slot * 2].store(word as u32, Ordering::Relaxed);
            self.words[base + slot * 2 + 1].store((word >> 32) as u32, Ordering::Relaxed);
        }
    }

    fn copy_row_from(&self, other: &ClutTable, row: usize) {
        let words = row * ROW_ENTRIES * WORDS_PER_ENTRY..(row + 1) * ROW_ENTRIES * WORDS_PER_ENTRY;
        for (dst, src) in self.words[words.clone()]
            .iter()
            .zip(other.words[words].iter())
        {
            dst.store(src.load(Ordering::Relaxed), Ordering::Relaxed);
        }
    }
}

/// The front and back tables plus the bookkeeping for publishing.
pub struct DoubleClut {
    /// Read by the palette DMA channel, all the time.
    front: ClutTable,
    /// Written by the application.
    back: ClutTable,
    /// One bit per row of sixteen entries that differs from the front.
    dirty_rows: AtomicU32,
    /// Non-zero while a [`ClutEdit`] is alive.
    editors: AtomicU32,
    /// How many times the back table has been published.
    generation: AtomicU32,
    serialiser: Serialiser,
}

impl DoubleClut {
    /// Make a new, all-zero, pair of tables.
    ///
    /// Call [`DoubleClut::restore_sync_codes`] before the hardware starts
    /// reading it.
    pub const fn new(serialiser: Serialiser) -> DoubleClut {
        DoubleClut {
            front: ClutTable::new(),
            back: ClutTable::new(),
            dirty_rows: AtomicU32::new(0),
            editors: AtomicU32::new(0),
            generation: AtomicU32::new(0),
            serialiser,
        }
    }

    /// The board options we encode with.
    pub fn serialiser(&self) -> Serialiser {
        self.serialiser
    }

    /// Start changing the back table.
    ///
    /// Nothing is published while the returned guard is alive, so a batch of
    /// changes always goes out together.
    pub fn edit(&self) -> ClutEdit<'_> {
        self.editors.fetch_add(1, Ordering::AcqRel);
        ClutEdit {
            clut: self,
            rows: 0,
        }
    }

    /// Encode one colour into the back table, as a batch of one.
    pub fn write_entry(&self, index: u8, colour: RGBColour) -> Result<(), ClutError> {
        self.edit().write(index, colour)
    }

    /// Rewrite the four sync symbols in both tables.
    ///
    /// Their values never change, so writing the front table here is fine.
    pub fn restore_sync_codes(&self) {
        for symbol in SyncSymbol::ALL {
            let word = self.serialiser.sync_word(symbol);
            self.back.store_sync(symbol.index(), word);
            self.front.store_sync(symbol.index(), word);
        }
    }

    /// Copy any changed rows from the back table to the front.
    ///
    /// Only the line interrupt calls this, at the top of vertical blank.
    /// Returns `true` if anything was copied.
    pub fn publish(&self) -> bool {
        if self.editors.load(Ordering::Acquire) != 0 {
            return false;
        }
        let rows = self.dirty_rows.swap(0, Ordering::AcqRel);
        if rows == 0 {
            return false;
        }
        for row in 0..ROWS {
            if rows & (1 << row) != 0 {
                self.front.copy_row_from(&self.back, row);
            }
        }
        self.generation.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Does the back table hold anything the front doesn't?
    pub fn is_dirty(&self) -> bool {
        self.dirty_rows.load(Ordering::Relaxed) != 0
    }

    /// How many times [`DoubleClut::publish`] has copied something.
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Relaxed)
    }

    /// Address of the table the hardware reads.
    pub fn front_address(&self) -> usize {
        self.front.address()
    }

    /// The table the hardware reads.
    pub fn front(&self) -> &ClutTable {
        &self.front
    }

    /// Read an entry from the front table.
    pub fn front_entry(&self, index: u8) -> [u64; 2] {
        self.front.entry(index)
    }

    /// Read an entry from the back table.
    pub fn back_entry(&self, index: u8) -> [u64; 2] {
        self.back.entry(index)
    }
}

/// An open batch of changes to the back table.
///
/// The rows touched are marked dirty when this is dropped.
pub struct ClutEdit<'a> {
    clut: &'a DoubleClut,
    rows: u32,
}

impl ClutEdit<'_> {
    /// Encode a colour into the back table.
    pub fn write(&mut self, index: u8, colour: RGBColour) -> Result<(), ClutError> {
        if is_reserved(index) {
            return Err(ClutError::Reserved(index));
        }
        let word = self.clut.serialiser.encode_colour(colour);
        self.clut.back.store_entry(index, word);
        self.rows |= 1 << (usize::from(index) / ROW_ENTRIES);
        Ok(())
    }
}

impl Drop for ClutEdit<'_> {
    fn drop(&mut self) {
        if self.rows != 0 {
            self.clut.dirty_rows.fetch_or(self.rows, Ordering::AcqRel);
        }
        self.clut.editors.fetch_sub(1, Ordering::AcqRel);
    }
}

// -----------------------------------------------------------------------------
// Static and Const Data
// -----------------------------------------------------------------------------

/// Number of palette entries.
pub const ENTRIES: usize = 256;

/// 32-bit words per entry: two packed 64-bit pixels.
pub const WORDS_PER_ENTRY: usize = 4;

/// 32-bit words per table.
pub const TABLE_WORDS: usize = ENTRIES * WORDS_PER_ENTRY;

/// Entries per dirty-tracking row.
pub const ROW_ENTRIES: usize = 16;

/// Rows per table.
pub const ROWS: usize = ENTRIES / ROW_ENTRIES;

/// XOR this into the first packed pixel to get the second.
///
/// This inverts the eight data bits of every channel and leaves the two flag
/// bits alone, so a run of identical pixels alternates polarity on the wire.
/// The pad bits it also sets are dropped by the state machine.
pub const SECOND_PIXEL_FLIP: u64 = 0x0003_FFFF_FFFF_FFFF;

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

/// Is this palette index one of the sync symbols?
pub const fn is_reserved(index: u8) -> bool {
    index >= RESERVED_BASE && index < RESERVED_BASE + RESERVED_COUNT
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn new_clut() -> Box<DoubleClut> {
        let clut = Box::new(DoubleClut::new(Serialiser::DEFAULT));
        clut.restore_sync_codes();
        clut
    }

    #[test]
    fn tables_are_page_aligned() {
        let clut = new_clut();
        assert_eq!(clut.front_address() % 4096, 0);
        assert_eq!(clut.back.address() % 4096, 0);
        assert_eq!(core::mem::size_of::<ClutTable>(), 4096);
    }

    #[test]
    fn reserved_range() {
        assert!(!is_reserved(239));
        assert!(is_reserved(240));
        assert!(is_reserved(243));
        assert!(!is_reserved(244));
        assert!(!is_reserved(255));
    }

    #[test]
    fn write_goes_to_back_only() {
        let clut = new_clut();
        let before = clut.front_entry(5);
        clut.write_entry(5, RGBColour::from_packed(0xFF0000)).unwrap();
        assert!(clut.is_dirty());
        assert_eq!(clut.front_entry(5), before);
        let expected = Serialiser::DEFAULT.encode_colour(RGBColour::from_packed(0xFF0000));
        assert_eq!(clut.back_entry(5), [expected, expected ^ SECOND_PIXEL_FLIP]);
    }

    #[test]
    fn reserved_write_is_refused() {
        let clut = new_clut();
        let sync = clut.back_entry(241);
        let result = clut.write_entry(241, RGBColour::WHITE);
        assert_eq!(result, Err(ClutError::Reserved(241)));
        assert_eq!(clut.back_entry(241), sync);
        assert!(!clut.is_dirty());
    }

    #[test]
    fn sync_entries_fill_both_slots() {
        let clut = new_clut();
        for symbol in SyncSymbol::ALL {
            let word = Serialiser::DEFAULT.sync_word(symbol);
            assert_eq!(clut.front_entry(symbol.index()), [word, word]);
            assert_eq!(clut.back_entry(symbol.index()), [word, word]);
        }
    }

    #[test]
    fn publish_copies_and_counts() {
        let clut = new_clut();
        assert!(!clut.publish());
        assert_eq!(clut.generation(), 0);

        {
            let mut edit = clut.edit();
            edit.write(5, RGBColour::from_packed(0x123456)).unwrap();
            edit.write(200, RGBColour::from_packed(0x654321)).unwrap();
        }
        assert!(clut.publish());
        assert_eq!(clut.generation(), 1);
        assert!(!clut.is_dirty());
        assert_eq!(clut.front_entry(5), clut.back_entry(5));
        assert_eq!(clut.front_entry(200), clut.back_entry(200));
        // the sync row came across untouched
        assert_eq!(clut.front_entry(242), clut.back_entry(242));

        // nothing new, nothing to do
        assert!(!clut.publish());
        assert_eq!(clut.generation(), 1);
    }

    #[test]
    fn publish_waits_for_open_edit() {
        let clut = new_clut();
        let mut edit = clut.edit();
        edit.write(1, RGBColour::WHITE).unwrap();
        // the dirty bits only land when the edit closes
        assert!(!clut.publish());
        drop(edit);

        let second = clut.edit();
        assert!(clut.is_dirty());
        assert!(!clut.publish());
        drop(second);
        assert!(clut.publish());
    }

    proptest! {
        #[test]
        fn front_changes_only_at_publish(
            writes in proptest::collection::vec((any::<u8>(), 0..=0xFF_FFFFu32), 1..40),
        ) {
            let clut = new_clut();
            let before: Vec<[u64; 2]> = (0..=255u8).map(|i| clut.front_entry(i)).collect();
            let mut expected = before.clone();
            for &(index, colour) in &writes {
                let colour = RGBColour::from_packed(colour);
                if clut.write_entry(index, colour).is_ok() {
                    let word = Serialiser::DEFAULT.encode_colour(colour);
                    expected[usize::from(index)] = [word, word ^ SECOND_PIXEL_FLIP];
                }
            }
            for index in 0..=255u8 {
                prop_assert_eq!(clut.front_entry(index), before[usize::from(index)]);
            }
            clut.publish();
            for index in 0..=255u8 {
                prop_assert_eq!(clut.front_entry(index), expected[usize::from(index)]);
            }
            prop_assert!(!clut.is_dirty());
        }
    }
}

// End of file
