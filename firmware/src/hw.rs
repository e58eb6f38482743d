//! Hardware set-up: clocks, pins and the board wiring options.
//!
//! The DVI output wants a 252 MHz system clock (ten bit periods per 25.2 MHz
//! pixel) so we run the whole chip at that and clock the output state
//! machine at ÷1.

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

use dvi_stream_common::tmds::{LaneOrder, Serialiser};
use fugit::{HertzU32, RateExtU32};
use rp2040_hal::{
    clocks,
    gpio::{
        bank0, FunctionPio0, FunctionSioOutput, FunctionSpi, OutputDriveStrength, OutputSlewRate,
        Pin, Pins, PullNone, PullUp,
    },
    pac, pll,
    sio::SioFifo,
    spi, vreg, xosc, Clock as _, Sio, Timer, Watchdog,
};

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// The TMDS clock pair. Driven by side-set from the output state machine.
pub struct ClockPins {
    _positive: Pin<bank0::Gpio6, FunctionPio0, PullNone>,
    _negative: Pin<bank0::Gpio7, FunctionPio0, PullNone>,
}

/// The three TMDS data pairs, highest lane on GPIO12/13.
pub struct DataPins {
    _lane0_p: Pin<bank0::Gpio8, FunctionPio0, PullNone>,
    _lane0_n: Pin<bank0::Gpio9, FunctionPio0, PullNone>,
    _lane1_p: Pin<bank0::Gpio10, FunctionPio0, PullNone>,
    _lane1_n: Pin<bank0::Gpio11, FunctionPio0, PullNone>,
    _lane2_p: Pin<bank0::Gpio12, FunctionPio0, PullNone>,
    _lane2_n: Pin<bank0::Gpio13, FunctionPio0, PullNone>,
}

pub struct DviPins {
    /// Clock pair
    _clock: ClockPins,
    /// Data pairs
    _data: DataPins,
}

pub type SdSck = Pin<bank0::Gpio2, FunctionSpi, PullNone>;
pub type SdMosi = Pin<bank0::Gpio3, FunctionSpi, PullNone>;
pub type SdMiso = Pin<bank0::Gpio4, FunctionSpi, PullUp>;
pub type SdCs = Pin<bank0::Gpio5, FunctionSioOutput, PullNone>;
pub type SdSpi = spi::Spi<spi::Enabled, pac::SPI0, (SdMosi, SdMiso, SdSck), 8>;

/// Everything the rest of the firmware needs, once the clocks are running.
pub struct Hardware {
    /// Our pins for DVI output
    ///
    /// These are handed to PIO0. We only keep them so nobody else can have
    /// them.
    pub _dvi_pins: DviPins,
    /// The SD card bus, still at the slow identification speed
    pub sd_spi: SdSpi,
    /// The SD card chip select
    pub sd_cs: SdCs,
    /// Microsecond timer
    pub timer: Timer,
    /// Inter-core FIFO
    pub fifo: SioFifo,
    pub pio: pac::PIO0,
    pub dma: pac::DMA,
    pub busctrl: pac::BUSCTRL,
    pub resets: pac::RESETS,
    pub psm: pac::PSM,
    pub ppb: pac::PPB,
    /// What `clk_sys` ended up at
    pub system_freq: HertzU32,
    /// What `clk_peri` ended up at
    pub peripheral_freq: HertzU32,
}

impl Hardware {
    /// Call this once on start-up to initialise the hardware
    pub fn init(mut periph: pac::Peripherals) -> Hardware {
        // The DMA chain keeps running across a debugger reset of Core 0, and
        // it would be scribbling on RAM we are about to zero.
        if stuff_running(&mut periph) {
            watchdog_reboot();
        }

        let mut watchdog = Watchdog::new(periph.WATCHDOG);
        let sio = Sio::new(periph.SIO);

        defmt::info!("Configuring clocks...");

        // The PLL runs at 1512 MHz and we divide by 6 to get 252 MHz, which
        // is ten times the 25.2 MHz pixel clock. Bump the core voltage
        // first; 252 MHz is past what the RP2040 promises at 1.10 V.
        vreg::set_voltage(
            &mut periph.VREG_AND_CHIP_RESET,
            pac::vreg_and_chip_reset::vreg::VSEL_A::VOLTAGE1_20,
        );

        // Step 1. Turn on the crystal.
        let xosc = xosc::setup_xosc_blocking(periph.XOSC, XOSC_CRYSTAL_FREQ.Hz())
            .map_err(|_x| false)
            .unwrap();
        // Step 2. Configure watchdog tick generation to tick over every microsecond.
        watchdog.enable_tick_generation((XOSC_CRYSTAL_FREQ / 1_000_000) as u8);
        // Step 3. Create a clocks manager.
        let mut clocks = clocks::ClocksManager::new(periph.CLOCKS);
        // Step 4. Set up the system PLL.
        //
        // 12 MHz ×126 gives a FOUTVCO of 1512 MHz, then ÷6 ÷1.
        let pll_sys = pll::setup_pll_blocking(
            periph.PLL_SYS,
            xosc.operating_frequency(),
            pll::PLLConfig {
                vco_freq: 1512.MHz(),
                refdiv: 1,
                post_div1: 6,
                post_div2: 1,
            },
            &mut clocks,
            &mut periph.RESETS,
        )
        .map_err(|_x| false)
        .unwrap();
        // Step 5. Set up a 48 MHz PLL for USB and the ADC.
        let pll_usb = pll::setup_pll_blocking(
            periph.PLL_USB,
            xosc.operating_frequency(),
            pll::common_configs::PLL_USB_48MHZ,
            &mut clocks,
            &mut periph.RESETS,
        )
        .map_err(|_x| false)
        .unwrap();
        // Step 6. Set the system to run from the PLLs we just configured.
        clocks
            .init_default(&xosc, &pll_sys, &pll_usb)
            .map_err(|_x| false)
            .unwrap();

        let system_freq = clocks.system_clock.freq();
        let peripheral_freq = clocks.peripheral_clock.freq();
        defmt::info!(
            "Clocks OK! sys={=u32} Hz, peri={=u32} Hz",
            system_freq.to_Hz(),
            peripheral_freq.to_Hz()
        );

        let timer = Timer::new(periph.TIMER, &mut periph.RESETS, &clocks);

        defmt::info!("Configuring pins...");

        let hal_pins = Pins::new(
            periph.IO_BANK0,
            periph.PADS_BANK0,
            sio.gpio_bank0,
            &mut periph.RESETS,
        );

        let sd_spi = {
            let sck: SdSck = hal_pins.gpio2.reconfigure();
            let mosi: SdMosi = hal_pins.gpio3.reconfigure();
            let miso: SdMiso = hal_pins.gpio4.reconfigure();
            spi::Spi::<_, _, _, 8>::new(periph.SPI0, (mosi, miso, sck)).init(
                &mut periph.RESETS,
                peripheral_freq,
                SD_INIT_BAUD.Hz(),
                embedded_hal::spi::MODE_0,
            )
        };

        Hardware {
            _dvi_pins: DviPins {
                _clock: ClockPins {
                    _positive: dvi_pin(hal_pins.gpio6.reconfigure()),
                    _negative: dvi_pin(hal_pins.gpio7.reconfigure()),
                },
                _data: DataPins {
                    _lane0_p: dvi_pin(hal_pins.gpio8.reconfigure()),
                    _lane0_n: dvi_pin(hal_pins.gpio9.reconfigure()),
                    _lane1_p: dvi_pin(hal_pins.gpio10.reconfigure()),
                    _lane1_n: dvi_pin(hal_pins.gpio11.reconfigure()),
                    _lane2_p: dvi_pin(hal_pins.gpio12.reconfigure()),
                    _lane2_n: dvi_pin(hal_pins.gpio13.reconfigure()),
                },
            },
            sd_spi,
            sd_cs: hal_pins.gpio5.reconfigure(),
            timer,
            fifo: sio.fifo,
            pio: periph.PIO0,
            dma: periph.DMA,
            busctrl: periph.BUSCTRL,
            resets: periph.RESETS,
            psm: periph.PSM,
            ppb: periph.PPB,
            system_freq,
            peripheral_freq,
        }
    }
}

// -----------------------------------------------------------------------------
// Static and Const Data
// -----------------------------------------------------------------------------

/// On-board crystal frequency, in Hz.
const XOSC_CRYSTAL_FREQ: u32 = 12_000_000;

/// SD cards must be identified at no more than 400 kHz.
const SD_INIT_BAUD: u32 = 400_000;

/// What the SD bus runs at once the card is up.
pub const SD_RUN_BAUD: u32 = 21_000_000;

/// GPIO of the positive clock pin. The negative pin is the next one up.
pub const DVI_CLOCK_PIN: u8 = 6;

/// GPIO of the first data pin. The six data pins are consecutive.
pub const DVI_DATA_PIN: u8 = 8;

/// How the HDMI connector is wired on this board.
///
/// The pairs come out N-then-P, so every pair is inverted.
pub const SERIALISER: Serialiser = Serialiser {
    invert_pairs: true,
    lane_order: LaneOrder::Rgb,
    swap_red_green: false,
};

/// Marker left in watchdog scratch 7 while we are running.
const RUNNING_MARKER: u32 = 0xD1D1_5EED;

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

/// Fast edges and full drive for a TMDS pin.
fn dvi_pin<I>(mut pin: Pin<I, FunctionPio0, PullNone>) -> Pin<I, FunctionPio0, PullNone>
where
    I: rp2040_hal::gpio::PinId,
{
    pin.set_drive_strength(OutputDriveStrength::TwelveMilliAmps);
    pin.set_slew_rate(OutputSlewRate::Fast);
    pin
}

/// Check if the rest of the system appears to be running already.
///
/// If so, returns `true`, else `false`.
fn stuff_running(p: &mut pac::Peripherals) -> bool {
    let scratch = p.WATCHDOG.scratch7().read().bits();
    defmt::info!("WD Scratch is 0x{:08x}", scratch);
    if scratch == RUNNING_MARKER {
        true
    } else {
        p.WATCHDOG
            .scratch7()
            .write(|w| unsafe { w.bits(RUNNING_MARKER) });
        false
    }
}

/// Clear the scratch register so we don't force a full watchdog reboot on the
/// next boot.
fn clear_scratch() {
    let p = unsafe { pac::Peripherals::steal() };
    p.WATCHDOG.scratch7().write(|w| unsafe { w.bits(0) });
}

/// Do a full watchdog reboot
fn watchdog_reboot() -> ! {
    clear_scratch();
    let p = unsafe { pac::Peripherals::steal() };
    let mut watchdog = Watchdog::new(p.WATCHDOG);
    watchdog.start(fugit::Duration::<u32, 1, 1000000>::millis(10));
    loop {
        cortex_m::asm::wfi();
    }
}

// End of file
