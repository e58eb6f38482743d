//! # DVI output
//!
//! Everything here runs without the CPU, apart from one interrupt per line.
//!
//! ```text
//!  line buffer --(data DMA, 8-bit)--> PIO0 SM1 "address" --> RX FIFO
//!        ^                                                     |
//!  line table --(ctrl DMA)--> data read address     (palette ctrl DMA)
//!                                                              v
//!  CLUT front table --(palette DMA, 4 words)--> PIO0 SM0 "output" --> pins
//! ```
//!
//! The address state machine turns each palette index into the address of
//! its CLUT entry. The palette channel copies that entry, which holds two
//! pixels' worth of TMDS symbols, into the output state machine.
//!
//! The control channel raises `DMA_IRQ_0` each time it has queued a line.
//! The handler then points the control channel at the next line buffer,
//! publishes any palette changes at the top of vertical blank, and fills in
//! whichever line buffer the hardware is not looking at.

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

use core::cell::UnsafeCell;

use dvi_stream_common::{
    clut::DoubleClut,
    frame::{FrameSource, FrameView},
    scanline::{self, LineKind, ScanlineEngine, LINE_BYTES},
    stats::{StatsSnapshot, VideoStats},
    tmds::SyncSymbol,
};
use fugit::HertzU32;
use pio::{
    InSource, Instruction, InstructionOperands, MovDestination, MovOperation, MovSource,
    SetDestination,
};
use portable_atomic::{AtomicU16, Ordering};
use rp2040_hal::{
    self as hal,
    pio::PIOExt,
    pac::{self, interrupt},
};

use crate::hw;

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// One scan-line's worth of palette indices.
///
/// Gets read by the data DMA channel, and written by the line interrupt.
#[repr(C, align(4))]
struct LineBuffer {
    bytes: UnsafeCell<[u8; LINE_BYTES]>,
}

impl LineBuffer {
    /// A line of blanking, so we output valid DVI before the first interrupt.
    const fn new() -> LineBuffer {
        LineBuffer {
            bytes: UnsafeCell::new([SyncSymbol::Blank.index(); LINE_BYTES]),
        }
    }

    /// Get at the contents.
    ///
    /// # Safety
    ///
    /// Only the line interrupt may call this, and only for the buffer that
    /// is not queued for the data channel.
    #[allow(clippy::mut_from_ref)]
    unsafe fn contents(&self) -> &mut [u8; LINE_BYTES] {
        unsafe { &mut *self.bytes.get() }
    }
}

unsafe impl Sync for LineBuffer {}

/// Element sizes for a DMA transfer.
#[derive(Debug, Copy, Clone)]
enum DataSize {
    Byte = 0,
    Word = 2,
}

/// Settings for one DMA channel, in the order they sit in `CHx_CTRL`.
#[derive(Debug, Copy, Clone)]
struct ChannelConfig {
    size: DataSize,
    incr_read: bool,
    chain_to: usize,
    treq: u8,
}

impl ChannelConfig {
    /// Build the `CHx_CTRL` value: enabled, high priority, never writing to
    /// an incrementing address, no ring, no byte swap, no sniffing.
    const fn ctrl(self) -> u32 {
        1 | (1 << 1)
            | ((self.size as u32) << 2)
            | ((self.incr_read as u32) << 4)
            | ((self.chain_to as u32 & 0x0F) << 11)
            | ((self.treq as u32 & 0x3F) << 15)
    }
}

// -----------------------------------------------------------------------------
// Static and Const Data
// -----------------------------------------------------------------------------

/// The colour look-up tables. Write to them through a `Palette`.
pub static CLUT: DoubleClut = DoubleClut::new(hw::SERIALISER);

/// What picture to show, and where.
pub static FRAME: FrameSource = FrameSource::new();

/// Interrupt and underrun counters.
static STATS: VideoStats = VideoStats::new();

/// Which of the 525 lines the hardware is on.
///
/// Set by the line interrupt.
static CURRENT_LINE: AtomicU16 = AtomicU16::new(0);

/// Line buffer for the even buffer count.
static LINE_BUFFER_EVEN: LineBuffer = LineBuffer::new();

/// Line buffer for the odd buffer count.
static LINE_BUFFER_ODD: LineBuffer = LineBuffer::new();

/// The control channel copies one of these into the data channel's read
/// address, so these must stay 32-bit pointers.
static LINE_TABLE: [&LineBuffer; 2] = [&LINE_BUFFER_EVEN, &LINE_BUFFER_ODD];

/// DMA channel moving line buffer bytes into the address state machine.
const DATA_CHAN: usize = 0;

/// DMA channel loading the data channel's read address, once per line.
const CTRL_CHAN: usize = 1;

/// DMA channel moving CLUT entries into the output state machine.
const PALETTE_CHAN: usize = 2;

/// DMA channel loading the palette channel's read address, once per pixel
/// pair.
const PALETTE_CTRL_CHAN: usize = 3;

/// The output state machine number on PIO0.
const OUTPUT_SM: u8 = 0;

/// TREQ value meaning "go as fast as you like".
const TREQ_UNPACED: u8 = 0x3F;

/// Each TMDS bit period takes one PIO clock at this rate.
const BIT_CLOCK_HZ: u32 = 252_000_000;

/// Words in one CLUT entry, and so in one palette channel transfer.
const PALETTE_WORDS: u32 = 4;

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

/// Initialise all the static data and peripherals we need for DVI output,
/// and start it running.
///
/// We need to keep `pio` and `dma` to run the video. We need `resets` and
/// `busctrl` to set things up, so we only borrow those.
///
/// Panics if the CLUT isn't 4 KiB aligned, or the PIO programs don't fit.
pub fn init(
    pio: pac::PIO0,
    dma: pac::DMA,
    busctrl: &mut pac::BUSCTRL,
    resets: &mut pac::RESETS,
    system_freq: HertzU32,
) {
    let clut_base = CLUT.front_address();
    if clut_base & 0xFFF != 0 {
        defmt::panic!("CLUT at 0x{:08x} is not 4 KiB aligned", clut_base);
    }
    CLUT.restore_sync_codes();
    // Anything the application put in the back table before now can go
    // straight out; nothing is reading the front table yet.
    CLUT.publish();

    // Grab PIO0 and the state machines it contains
    let (mut pio, sm0, sm1, _sm2, _sm3) = pio.split(resets);

    // Reset the DMA Peripheral.
    resets.reset().modify(|_r, w| w.dma().set_bit());
    unsafe {
        core::arch::asm!("nop");
    }
    resets.reset().modify(|_r, w| w.dma().clear_bit());
    while resets.reset_done().read().dma().bit_is_clear() {}

    // The output program sends ten 6-bit groups (one bit of each of the
    // six data pins per clock) for every 64-bit symbol pair, driving the
    // clock pair high for the first five and low for the last five. The
    // FIFO word holds five groups, so autopull at 30 bits.
    let output_program = pio_proc::pio_asm!(
        ".side_set 2"
        ".wrap_target"
        "out pins, 6 side 2"
        "out pins, 6 side 2"
        "out pins, 6 side 2"
        "out pins, 6 side 2"
        "out pins, 6 side 2"
        "out pins, 6 side 1"
        "out pins, 6 side 1"
        "out pins, 6 side 1"
        "out pins, 6 side 1"
        "out pins, 6 side 1"
        ".wrap"
    );

    // The address program takes one palette index per FIFO word (the data
    // channel does byte writes, so the index is replicated across the word
    // and we take the bottom eight bits) and pushes out
    // `(X << 12) | (index << 4)`, the address of that index's 16-byte CLUT
    // entry. X holds the top twenty bits of the CLUT address.
    let address_program = pio_proc::pio_asm!(
        ".wrap_target"
        "pull block"
        "in osr, 8"
        "in x, 20"
        "push block"
        ".wrap"
    );

    let Ok(output_installed) = pio.install(&output_program.program) else {
        defmt::panic!("No room in PIO0 for the output program");
    };
    let Ok(address_installed) = pio.install(&address_program.program) else {
        defmt::panic!("No room in PIO0 for the address program");
    };

    // A fractional divider adds jitter to every edge, which a DVI sink
    // will not lock to.
    let sys_hz = system_freq.to_Hz();
    let div_int = (sys_hz / BIT_CLOCK_HZ) as u16;
    let div_frac = ((u64::from(sys_hz % BIT_CLOCK_HZ) * 256) / u64::from(BIT_CLOCK_HZ)) as u8;
    if div_frac != 0 {
        defmt::warn!(
            "PIO divider is {=u16} + {=u8}/256; expect an unstable picture",
            div_int,
            div_frac
        );
    }

    let (mut output_sm, _, output_fifo) =
        hal::pio::PIOBuilder::from_installed_program(output_installed)
            .buffers(hal::pio::Buffers::OnlyTx)
            .out_pins(hw::DVI_DATA_PIN, 6)
            .side_set_pin_base(hw::DVI_CLOCK_PIN)
            .autopull(true)
            .out_shift_direction(hal::pio::ShiftDirection::Right)
            .pull_threshold(30)
            .clock_divisor_fixed_point(div_int, div_frac)
            .build(sm0);
    output_sm.set_pindirs(
        (hw::DVI_CLOCK_PIN..hw::DVI_DATA_PIN + 6).map(|x| (x, hal::pio::PinDir::Output)),
    );

    let (mut address_sm, address_rx, address_tx) =
        hal::pio::PIOBuilder::from_installed_program(address_installed)
            .buffers(hal::pio::Buffers::RxTx)
            .in_shift_direction(hal::pio::ShiftDirection::Right)
            .autopush(false)
            .build(sm1);

    // Load X four bits at a time through the ISR, then restart the state
    // machine to throw away what we left in the ISR.
    let x_value = (clut_base >> 12) as u32;
    for nibble in 0..8 {
        address_sm.exec_instruction(Instruction {
            operands: InstructionOperands::SET {
                destination: SetDestination::X,
                data: ((x_value >> (nibble * 4)) & 0x0F) as u8,
            },
            delay: 0,
            side_set: None,
        });
        address_sm.exec_instruction(Instruction {
            operands: InstructionOperands::IN {
                source: InSource::X,
                bit_count: 4,
            },
            delay: 0,
            side_set: None,
        });
    }
    address_sm.exec_instruction(Instruction {
        operands: InstructionOperands::MOV {
            destination: MovDestination::X,
            op: MovOperation::None,
            source: MovSource::ISR,
        },
        delay: 0,
        side_set: None,
    });
    address_sm.restart();

    // Line data: one byte per index into the address state machine, 400 per
    // line, then hand over to the control channel.
    configure_channel(
        &dma,
        DATA_CHAN,
        ChannelConfig {
            size: DataSize::Byte,
            incr_read: true,
            chain_to: CTRL_CHAN,
            treq: address_tx.dreq_value(),
        },
        LINE_TABLE[0] as *const LineBuffer as usize as u32,
        address_tx.fifo_address() as usize as u32,
        LINE_BYTES as u32,
    );

    // Line control: one word from the line table into the data channel's
    // read address, then kick the data channel.
    configure_channel(
        &dma,
        CTRL_CHAN,
        ChannelConfig {
            size: DataSize::Word,
            incr_read: false,
            chain_to: DATA_CHAN,
            treq: TREQ_UNPACED,
        },
        line_table_address(0),
        dma.ch(DATA_CHAN).ch_read_addr().as_ptr() as usize as u32,
        1,
    );

    // Palette: one CLUT entry into the output state machine.
    configure_channel(
        &dma,
        PALETTE_CHAN,
        ChannelConfig {
            size: DataSize::Word,
            incr_read: true,
            chain_to: PALETTE_CTRL_CHAN,
            treq: output_fifo.dreq_value(),
        },
        clut_base as u32,
        output_fifo.fifo_address() as usize as u32,
        PALETTE_WORDS,
    );

    // Palette control: one address from the address state machine into the
    // palette channel's read address, then kick the palette channel.
    configure_channel(
        &dma,
        PALETTE_CTRL_CHAN,
        ChannelConfig {
            size: DataSize::Word,
            incr_read: false,
            chain_to: PALETTE_CHAN,
            treq: address_rx.dreq_value(),
        },
        address_rx.fifo_address() as usize as u32,
        dma.ch(PALETTE_CHAN).ch_read_addr().as_ptr() as usize as u32,
        1,
    );

    // The DMA must win over both cores, or the FIFOs run dry while the CPU
    // is busy with the SD card.
    busctrl
        .bus_priority()
        .write(|w| w.dma_r().set_bit().dma_w().set_bit());

    // Only the line control channel interrupts us.
    dma.ints0()
        .write(|w| unsafe { w.ints0().bits(1 << CTRL_CHAN) });
    dma.inte0()
        .write(|w| unsafe { w.inte0().bits(1 << CTRL_CHAN) });

    address_sm.start();
    output_sm.start();

    dma.multi_chan_trigger()
        .write(|w| unsafe { w.bits((1 << PALETTE_CTRL_CHAN) | (1 << CTRL_CHAN)) });

    // We drop our state-machine and PIO objects here - this means the video
    // cannot be reconfigured at a later time, but they do keep on running
    // as-is.

    unsafe {
        cortex_m::peripheral::NVIC::unpend(pac::Interrupt::DMA_IRQ_0);
        cortex_m::peripheral::NVIC::unmask(pac::Interrupt::DMA_IRQ_0);
    }

    defmt::info!(
        "DVI running: CLUT at 0x{=u32:08x}, PIO divider {=u16}",
        clut_base as u32,
        div_int
    );
}

/// Load a channel's addresses, count and control word, without starting it.
fn configure_channel(
    dma: &pac::DMA,
    channel: usize,
    config: ChannelConfig,
    read_addr: u32,
    write_addr: u32,
    count: u32,
) {
    let ch = dma.ch(channel);
    ch.ch_read_addr().write(|w| unsafe { w.bits(read_addr) });
    ch.ch_write_addr().write(|w| unsafe { w.bits(write_addr) });
    ch.ch_trans_count().write(|w| unsafe { w.bits(count) });
    // The alias doesn't trigger the channel; the CTRL_TRIG register would.
    ch.ch_al1_ctrl().write(|w| unsafe { w.bits(config.ctrl()) });
}

/// Where the control channel should read the address of line buffer `n`
/// from.
fn line_table_address(n: usize) -> u32 {
    &LINE_TABLE[n] as *const &LineBuffer as usize as u32
}

/// Get the current scan line, 0..525.
///
/// These are timing lines, so the picture's 240 lines are 0..480 here.
pub fn current_line() -> u16 {
    CURRENT_LINE.load(Ordering::Relaxed)
}

/// Are we between frames?
pub fn in_vblank() -> bool {
    scanline::in_vblank(current_line())
}

/// Take a copy of the video counters.
pub fn stats() -> StatsSnapshot {
    STATS.snapshot(CLUT.generation())
}

/// Called once per line, when the control channel has handed the data
/// channel its next line buffer.
#[link_section = ".data"]
#[interrupt]
fn DMA_IRQ_0() {
    static mut ENGINE: ScanlineEngine = ScanlineEngine::new();

    let pio = unsafe { &*pac::PIO0::ptr() };
    let dma = unsafe { &*pac::DMA::ptr() };

    let underrun = pio.fstat().read().txempty().bits() & (1 << OUTPUT_SM) != 0;
    STATS.record_irq(underrun);

    // Clear the interrupt
    dma.ints0()
        .write(|w| unsafe { w.ints0().bits(1 << CTRL_CHAN) });

    let tick = ENGINE.tick();
    dma.ch(CTRL_CHAN)
        .ch_read_addr()
        .write(|w| unsafe { w.bits(line_table_address(tick.queue)) });
    CURRENT_LINE.store(tick.line, Ordering::Relaxed);

    if tick.publish {
        CLUT.publish();
    }

    if let Some(prepare) = tick.prepare {
        let view = match prepare.kind {
            LineKind::Active(_) => FRAME.snapshot(),
            LineKind::VSync | LineKind::Blank => FrameView::EMPTY,
        };
        // Safety: the engine never prepares the buffer it just queued, and
        // we are the line interrupt.
        let buffer = unsafe { LINE_TABLE[prepare.buffer].contents() };
        scanline::build_line(buffer, prepare.kind, &view);
    }
}

// End of file
