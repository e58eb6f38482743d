//! # dvi-stream
//!
//! 640x480 DVI output from a 320x240 palettised frame buffer, with pictures
//! and palettes streamed off an SD card while the video keeps running.
//!
//! Core 0 takes the line interrupt and runs the storage scheduler from its
//! main loop. With the `legacy-worker` feature the scheduler runs on Core 1
//! instead.

#![no_std]
#![no_main]

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

mod dvi;
mod hw;
mod sdcard;

// -----------------------------------------------------------------------------
// Imports
// -----------------------------------------------------------------------------

use cortex_m_rt::exception;
use defmt::*;
use defmt_rtt as _;
use dvi_stream_common::{
    config::{
        FADE_BLACK_LEVEL, MAX_REQUESTS, MAX_STREAMS, PUMP_CHUNK_BYTES, SCREEN_HEIGHT,
        SCREEN_WIDTH, STREAM_HALF_BYTES,
    },
    frame::{FrameBuffer, TestPattern},
    palette::Palette,
    storage::{stream::StreamBuffers, RequestId, StorageError, StorageScheduler, StreamHandle},
    RGBColour,
};
use fugit::MicrosDurationU64;
use panic_probe as _;
use rp2040_hal::{self as hal, pac, timer::Instant, Timer};
use static_cell::ConstStaticCell;

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// Loads the boot picture and its palette while the border is showing.
struct Splash {
    picture: Option<StreamHandle>,
    offset: usize,
    palette: Option<RequestId>,
}

impl Splash {
    /// Ask for both files. Whatever fails to start is skipped.
    fn start<S>(storage: &mut S) -> Splash
    where
        S: StorageScheduler<'static>,
    {
        dvi::FRAME.set_loading_mode(true);
        let palette = match storage.submit(SPLASH_PALETTE, PALETTE_FILE.take()) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Can't queue {}: {}", SPLASH_PALETTE, e);
                None
            }
        };
        let picture = match storage.open(SPLASH_PICTURE) {
            Ok(handle) => {
                info!(
                    "Streaming {} ({=u32} bytes)",
                    SPLASH_PICTURE,
                    storage.size(handle)
                );
                Some(handle)
            }
            Err(e) => {
                warn!("Can't open {}: {}", SPLASH_PICTURE, e);
                None
            }
        };
        Splash {
            picture,
            offset: 0,
            palette,
        }
    }

    /// Move things along. Returns `true` once both files are dealt with.
    fn poll<S>(&mut self, storage: &mut S, palette: &mut Palette) -> bool
    where
        S: StorageScheduler<'static>,
    {
        if let Some(handle) = self.picture {
            let mut chunk = [0u8; PUMP_CHUNK_BYTES];
            match storage.read(handle, &mut chunk) {
                Ok(n) => {
                    self.offset += FRAME_BUFFER.copy_from(self.offset, &chunk[..n]);
                }
                Err(StorageError::EndOfFile) => {
                    info!("Picture loaded, {=usize} bytes", self.offset);
                    self.picture = None;
                    close(storage, handle);
                }
                Err(e) => {
                    warn!("Reading {}: {}", SPLASH_PICTURE, e);
                    self.picture = None;
                    close(storage, handle);
                }
            }
        }

        if let Some(id) = self.palette.filter(|id| storage.is_complete(*id)) {
            let result = storage.result(id);
            let bytes = storage.release(id);
            match (result, bytes) {
                (Ok(n), Some(bytes)) => load_palette(palette, &bytes[..n]),
                (Err(e), _) => warn!("Reading {}: {}", SPLASH_PALETTE, e),
                (Ok(_), None) => warn!("Request {} lost its buffer", id),
            }
            self.palette = None;
        }

        let done = self.picture.is_none() && self.palette.is_none();
        if done {
            dvi::FRAME.set_loading_mode(false);
        }
        done
    }
}

/// Steps the fade level down by one every frame.
struct FadeIn {
    level: u8,
    was_blank: bool,
}

impl FadeIn {
    fn new() -> FadeIn {
        FadeIn {
            level: FADE_BLACK_LEVEL,
            was_blank: false,
        }
    }

    /// Returns `true` once we are at full brightness.
    fn poll(&mut self, palette: &mut Palette) -> bool {
        let blank = dvi::in_vblank();
        if blank && !self.was_blank && self.level > 0 {
            self.level -= 1;
            palette.set_fade_level(self.level, 0);
        }
        self.was_blank = blank;
        self.level == 0
    }
}

/// Logs the video counters every so often.
struct StatsLog {
    timer: Timer,
    last: Instant,
    underruns: u32,
}

impl StatsLog {
    fn new(timer: Timer) -> StatsLog {
        StatsLog {
            timer,
            last: timer.get_counter(),
            underruns: 0,
        }
    }

    fn poll(&mut self) {
        let now = self.timer.get_counter();
        if now - self.last < STATS_INTERVAL {
            return;
        }
        self.last = now;
        let stats = dvi::stats();
        if stats.underruns != self.underruns {
            warn!(
                "Video underruns: {=u32} new",
                stats.underruns.wrapping_sub(self.underruns)
            );
            self.underruns = stats.underruns;
        }
        info!("Video: {}, line {=u16}", stats, dvi::current_line());
    }
}

// -----------------------------------------------------------------------------
// Static and Const Data
// -----------------------------------------------------------------------------

#[link_section = ".boot2"]
#[no_mangle]
#[used]
pub static BOOT2_FIRMWARE: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;

/// Program metadata for `picotool info`.
#[link_section = ".bi_entries"]
#[used]
pub static PICOTOOL_ENTRIES: [hal::binary_info::EntryAddr; 4] = [
    hal::binary_info::rp_cargo_bin_name!(),
    hal::binary_info::rp_cargo_version!(),
    hal::binary_info::rp_program_description!(c"DVI video with SD card streaming"),
    hal::binary_info::rp_program_build_attribute!(),
];

/// The picture on screen.
static FRAME_BUFFER: FrameBuffer<{ SCREEN_WIDTH * SCREEN_HEIGHT }> = FrameBuffer::new();

/// Lent to the storage scheduler for stream buffering.
static STREAM_BUFFERS: ConstStaticCell<StreamBuffers<STREAM_HALF_BYTES, MAX_STREAMS>> =
    ConstStaticCell::new(StreamBuffers::new());

/// Where the splash palette gets read to.
static PALETTE_FILE: ConstStaticCell<[u8; PALETTE_FILE_BYTES]> =
    ConstStaticCell::new([0; PALETTE_FILE_BYTES]);

/// 76,800 palette indices, top line first.
const SPLASH_PICTURE: &str = "/SPLASH.BIN";

/// 256 RGB triples.
const SPLASH_PALETTE: &str = "/SPLASH.PAL";

const PALETTE_FILE_BYTES: usize = 256 * 3;

const STATS_INTERVAL: MicrosDurationU64 = MicrosDurationU64::secs(5);

#[cfg(not(feature = "test-pattern-ramp"))]
const BOOT_PATTERN: TestPattern = TestPattern::Checker;

#[cfg(feature = "test-pattern-ramp")]
const BOOT_PATTERN: TestPattern = TestPattern::Ramp;

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

#[hal::entry]
fn main() -> ! {
    info!(
        "Firmware {} {} starting up",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let periph = unwrap!(pac::Peripherals::take());
    let mut hw = hw::Hardware::init(periph);

    let mut palette = Palette::new(&dvi::CLUT);
    match BOOT_PATTERN {
        TestPattern::Checker => palette.load_basic(),
        TestPattern::Ramp => palette.load_greyscale(),
    }
    BOOT_PATTERN.draw(&FRAME_BUFFER, SCREEN_WIDTH, SCREEN_HEIGHT);
    dvi::FRAME.set_buffer(&FRAME_BUFFER);
    info!("Boot pattern is {}", BOOT_PATTERN);

    dvi::init(
        hw.pio,
        hw.dma,
        &mut hw.busctrl,
        &mut hw.resets,
        hw.system_freq,
    );

    info!("Mounting SD card...");
    let card = match sdcard::Card::mount(hw.sd_spi, hw.sd_cs, hw.timer, hw.peripheral_freq) {
        Ok(card) => card,
        Err(e) => {
            warn!("No SD card: {}", e);
            idle(hw.timer);
        }
    };

    let buffers = STREAM_BUFFERS.take();

    #[cfg(not(feature = "legacy-worker"))]
    {
        use dvi_stream_common::storage::cooperative::Cooperative;
        info!("Storage: cooperative pump on Core 0");
        let storage: Cooperative<'static, sdcard::Card, MAX_STREAMS, MAX_REQUESTS> =
            Cooperative::new(card, buffers);
        run(storage, palette, hw.timer)
    }

    #[cfg(feature = "legacy-worker")]
    {
        info!("Storage: worker on Core 1");
        let storage = start_worker(card, buffers, &mut hw.psm, &mut hw.ppb, &mut hw.fifo);
        run(storage, palette, hw.timer)
    }
}

/// The main loop, once the card is up.
fn run<S>(mut storage: S, mut palette: Palette<'static>, timer: Timer) -> !
where
    S: StorageScheduler<'static>,
{
    let mut splash = Some(Splash::start(&mut storage));
    palette.set_fade_level(FADE_BLACK_LEVEL, 0);
    let mut fade: Option<FadeIn> = None;
    let mut stats = StatsLog::new(timer);
    let mut close_failures = 0;

    loop {
        let busy = storage.pump();

        if let Some(loader) = splash.as_mut() {
            if loader.poll(&mut storage, &mut palette) {
                splash = None;
                fade = Some(FadeIn::new());
            }
        }

        if let Some(f) = fade.as_mut() {
            if f.poll(&mut palette) {
                info!("Fade complete");
                fade = None;
            }
        }

        stats.poll();

        let failures = storage.close_failures();
        if failures != close_failures {
            warn!(
                "{=u32} more files failed to close",
                failures.wrapping_sub(close_failures)
            );
            close_failures = failures;
        }

        if !busy && splash.is_none() && fade.is_none() {
            // The line interrupt wakes us at least every 32 µs.
            cortex_m::asm::wfi();
        }
    }
}

/// Nothing to load, so just keep the test pattern up.
fn idle(timer: Timer) -> ! {
    let mut stats = StatsLog::new(timer);
    loop {
        stats.poll();
        cortex_m::asm::wfi();
    }
}

/// Close a stream, logging rather than failing.
fn close<S>(storage: &mut S, handle: StreamHandle)
where
    S: StorageScheduler<'static>,
{
    if let Err(e) = storage.close(handle) {
        warn!("Closing stream {}: {}", handle, e);
    }
}

/// Turn a file of RGB triples into palette entries, starting at zero.
fn load_palette(palette: &mut Palette, bytes: &[u8]) {
    let mut colours = [RGBColour::BLACK; 256];
    let mut count = 0;
    for (colour, rgb) in colours.iter_mut().zip(bytes.chunks_exact(3)) {
        *colour = RGBColour::from_24bit(rgb[0], rgb[1], rgb[2]);
        count += 1;
    }
    palette.load(0, &colours[..count]);
    palette.restore_sync_colors();
    info!("Loaded {=usize} palette entries", count);
}

/// Put the storage worker on Core 1.
#[cfg(feature = "legacy-worker")]
fn start_worker(
    card: sdcard::Card,
    buffers: &'static mut StreamBuffers<STREAM_HALF_BYTES, MAX_STREAMS>,
    psm: &mut pac::PSM,
    ppb: &mut pac::PPB,
    fifo: &mut hal::sio::SioFifo,
) -> &'static dvi_stream_common::storage::worker::Worker<'static, sdcard::Card, MAX_STREAMS, MAX_REQUESTS>
{
    use dvi_stream_common::storage::worker::Worker;
    use hal::multicore;
    use static_cell::StaticCell;

    static WORKER: StaticCell<Worker<'static, sdcard::Card, MAX_STREAMS, MAX_REQUESTS>> =
        StaticCell::new();
    static CORE1_STACK: multicore::Stack<4096> = multicore::Stack::new();

    let worker: &'static Worker<'static, sdcard::Card, MAX_STREAMS, MAX_REQUESTS> =
        WORKER.init(Worker::new(card, buffers));

    let mut multicore = multicore::Multicore::new(psm, ppb, fifo);
    let core1 = &mut multicore.cores()[1];
    let Some(stack) = CORE1_STACK.take() else {
        defmt::panic!("Core 1 stack already taken");
    };
    info!("Spawning Core 1...");
    if core1
        .spawn(stack, move || worker.run(&dvi::in_vblank))
        .is_err()
    {
        defmt::panic!("Spawning Core 1");
    }
    worker
}

#[exception]
unsafe fn HardFault(frame: &cortex_m_rt::ExceptionFrame) -> ! {
    error!(
        "HardFault pc=0x{=u32:08x} lr=0x{=u32:08x} r0=0x{=u32:08x} r1=0x{=u32:08x} r2=0x{=u32:08x} r3=0x{=u32:08x} r12=0x{=u32:08x}",
        frame.pc(),
        frame.lr(),
        frame.r0(),
        frame.r1(),
        frame.r2(),
        frame.r3(),
        frame.r12()
    );
    loop {
        cortex_m::asm::wfi();
    }
}

// End of file
