//! The SD card, as a [`FileSystem`] the storage scheduler can drive.
//!
//! We use `embedded-sdmmc` over SPI0 with the raw handle API, because the
//! scheduler keeps files open across calls and needs plain `Copy` handles.

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

use dvi_stream_common::storage::{FileSystem, FsError};
use embedded_hal_bus::spi::{ExclusiveDevice, NoDelay};
use embedded_sdmmc::{
    Mode, RawDirectory, RawFile, SdCard, SdCardError, TimeSource, Timestamp, VolumeIdx,
    VolumeManager,
};
use fugit::{HertzU32, RateExtU32};
use rp2040_hal::Timer;

use crate::hw;

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

pub type SdDevice = ExclusiveDevice<hw::SdSpi, hw::SdCs, NoDelay>;
pub type SdBlockDevice = SdCard<SdDevice, Timer>;
type Volumes = VolumeManager<SdBlockDevice, FixedTime, MAX_DIRS, MAX_FILES, 1>;
type SdError = embedded_sdmmc::Error<SdCardError>;

/// We only ever read, so the time never matters.
pub struct FixedTime;

impl TimeSource for FixedTime {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 56,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

/// Why the card didn't come up.
#[derive(Debug, defmt::Format)]
pub enum MountError {
    /// Couldn't drive the chip select pin
    ChipSelect,
    /// The card didn't answer, or isn't a card we understand
    Card(SdCardError),
    /// No FAT volume, or no root directory
    Volume(SdError),
}

/// A mounted card, with the first volume's root directory open.
pub struct Card {
    volumes: Volumes,
    root: RawDirectory,
}

impl Card {
    /// Bring the card up and open the first partition.
    ///
    /// The bus must already be at identification speed; once the card
    /// answers we turn it up to [`hw::SD_RUN_BAUD`].
    pub fn mount(
        spi: hw::SdSpi,
        cs: hw::SdCs,
        timer: Timer,
        peripheral_freq: HertzU32,
    ) -> Result<Card, MountError> {
        let device = ExclusiveDevice::new_no_delay(spi, cs).map_err(|_x| MountError::ChipSelect)?;
        let card = SdCard::new(device, timer);
        let bytes = card.num_bytes().map_err(MountError::Card)?;
        let baud = card.spi(|device| {
            device
                .bus_mut()
                .set_baudrate(peripheral_freq, hw::SD_RUN_BAUD.Hz())
        });
        defmt::info!(
            "SD card is {=u64} MiB, bus now {=u32} Hz",
            bytes / (1024 * 1024),
            baud.to_Hz()
        );

        let mut volumes: Volumes = VolumeManager::new_with_limits(card, FixedTime, 5000);
        let volume = volumes
            .open_raw_volume(VolumeIdx(0))
            .map_err(MountError::Volume)?;
        let root = volumes.open_root_dir(volume).map_err(MountError::Volume)?;
        Ok(Card { volumes, root })
    }

    /// Close a directory we opened on the way to a file.
    fn leave(&mut self, dir: RawDirectory) {
        if dir == self.root {
            return;
        }
        if let Err(e) = self.volumes.close_dir(dir) {
            defmt::warn!("Closing directory: {}", e);
        }
    }
}

impl FileSystem for Card {
    type File = RawFile;

    /// Paths are `/`-separated 8.3 names, relative to the root whether or
    /// not they start with `/`.
    fn open(&mut self, path: &str) -> Result<RawFile, FsError> {
        let path = path.trim_start_matches('/');
        let (dirs, name) = path.rsplit_once('/').unwrap_or(("", path));
        let mut dir = self.root;
        for component in dirs.split('/').filter(|c| !c.is_empty()) {
            let next = self.volumes.open_dir(dir, component);
            self.leave(dir);
            dir = next.map_err(fs_error)?;
        }
        let file = self.volumes.open_file_in_dir(dir, name, Mode::ReadOnly);
        self.leave(dir);
        file.map_err(fs_error)
    }

    fn size(&mut self, file: RawFile) -> Result<u32, FsError> {
        self.volumes.file_length(file).map_err(fs_error)
    }

    fn read(&mut self, file: RawFile, buffer: &mut [u8]) -> Result<usize, FsError> {
        match self.volumes.read(file, buffer) {
            Ok(n) => Ok(n),
            Err(embedded_sdmmc::Error::EndOfFile) => Ok(0),
            Err(e) => Err(fs_error(e)),
        }
    }

    fn seek(&mut self, file: RawFile, position: u32) -> Result<(), FsError> {
        self.volumes
            .file_seek_from_start(file, position)
            .map_err(fs_error)
    }

    fn close(&mut self, file: RawFile) -> Result<(), FsError> {
        self.volumes.close_file(file).map_err(fs_error)
    }
}

// -----------------------------------------------------------------------------
// Static and Const Data
// -----------------------------------------------------------------------------

/// The root, plus the two directories we hold while walking a path.
const MAX_DIRS: usize = 4;

/// Every stream and every one-shot request can hold a file at once.
const MAX_FILES: usize =
    dvi_stream_common::config::MAX_STREAMS + dvi_stream_common::config::MAX_REQUESTS;

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

fn fs_error(e: SdError) -> FsError {
    match e {
        embedded_sdmmc::Error::NotFound | embedded_sdmmc::Error::FilenameError(_) => {
            FsError::NotFound
        }
        e => {
            defmt::warn!("SD card error: {}", e);
            FsError::Io
        }
    }
}

// End of file
