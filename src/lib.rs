/*
   Copyright 2018 Ilya Epifanov

   Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
   http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
   http://opensource.org/licenses/MIT>, at your option. This file may not be
   copied, modified, or distributed except according to those terms.
*/
/*!
A register-level Rust driver for the [Si5351A], based on the
[`embedded-hal`] traits.

## The Device

The Silicon Labs (now Skyworks) [Si5351A] is an any-frequency CMOS clock
generator with two PLLs, one multisynth divider per output and an I²C
interface.

This driver does not plan frequencies. The caller picks the PLL and
multisynth ratios as `a + b/c`; the driver encodes them into the chip's
P1/P2/P3 fields (see [AN619]) and writes them, together with output
control, spread spectrum and the other auxiliary registers.

## Usage

Instantiate the device over any I²C bus implementing
`embedded_hal::blocking::i2c::{Write, WriteRead}`:

```no_run
use embedded_hal::blocking::i2c::{Write, WriteRead};
use si5351a_regmap::{
    ClockControl, ClockOutput, DividerRatio, Error, OutputDivider, Si5351, Si5351Device, PLL,
};

fn clk0_at_1_5mhz<I2C, E>(i2c: I2C) -> Result<(), Error>
where
    I2C: WriteRead<Error = E> + Write<Error = E>,
{
    let mut clock = Si5351Device::new_adafruit_module(i2c);
    clock.disable_all_outputs(true)?;
    clock.disable_oeb_pin_all()?;

    // PLL A at 25 MHz * 24 = 600 MHz, CLK0 at 600 MHz / 400 = 1.5 MHz
    clock.setup_pll(PLL::A, DividerRatio::int(24), true)?;
    clock.set_clock_control(
        ClockOutput::Clk0,
        &ClockControl {
            powered_down: false,
            ..ClockControl::default()
        },
    )?;
    clock.setup_multisynth(ClockOutput::Clk0, DividerRatio::int(400), OutputDivider::Div1, true, false)?;
    clock.reset_plls()?;
    clock.set_outputs_enabled(&[(ClockOutput::Clk0, true)])?;
    Ok(())
}
```

Read-modify-write operations issue a fresh read every time and are not
atomic: if the write fails after a successful read, the error is returned
and the register keeps whatever the device last accepted.

[Si5351A]: https://www.skyworksinc.com/-/media/Skyworks/SL/documents/public/data-sheets/Si5351-B.pdf
[AN619]: https://www.skyworksinc.com/-/media/Skyworks/SL/documents/public/application-notes/AN619.pdf
[`embedded-hal`]: https://github.com/rust-embedded/embedded-hal
*/
#![no_std]

#[macro_use]
extern crate bitflags;
#[cfg(test)]
#[macro_use]
extern crate std;

use embedded_hal as hal;

use crate::hal::blocking::i2c::{Write, WriteRead};
use core::fmt;
use log::{debug, trace};

pub mod spread_spectrum;
pub mod synth;

#[cfg(test)]
mod mock;

pub use crate::spread_spectrum::{SpreadMode, SpreadParams, SpreadSpectrum};
pub use crate::synth::{split_u16, split_u20, DividerRatio, SynthParams};

use crate::spread_spectrum::SPREAD_SPECTRUM_REGISTERS;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The I²C transaction failed.
    CommunicationError,
    InvalidParameter,
    /// Divider ratio with `c == 0`.
    ZeroDenominator,
    /// A computed field does not fit its register width.
    FieldOverflow,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::CommunicationError => f.write_str("I2C communication error"),
            Error::InvalidParameter => f.write_str("invalid parameter"),
            Error::ZeroDenominator => f.write_str("divider ratio denominator is zero"),
            Error::FieldOverflow => f.write_str("value does not fit its register field"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CrystalLoad {
    _6,
    _8,
    _10,
}

impl CrystalLoad {
    /// Only 6, 8 and 10 pF are supported by the chip.
    pub fn from_picofarads(pf: u8) -> Result<CrystalLoad, Error> {
        match pf {
            6 => Ok(CrystalLoad::_6),
            8 => Ok(CrystalLoad::_8),
            10 => Ok(CrystalLoad::_10),
            _ => Err(Error::InvalidParameter),
        }
    }

    fn bits(self) -> CrystalLoadBits {
        match self {
            CrystalLoad::_6 => CrystalLoadBits::CL_6,
            CrystalLoad::_8 => CrystalLoadBits::CL_8,
            CrystalLoad::_10 => CrystalLoadBits::CL_10,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PLL {
    A,
    B,
}

#[derive(Debug, Copy, Clone)]
enum FeedbackMultisynth {
    MSNA,
    MSNB,
}

#[derive(Debug, Copy, Clone)]
enum Multisynth {
    MS0,
    MS1,
    MS2,
    MS3,
    MS4,
    MS5,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ClockOutput {
    Clk0 = 0,
    Clk1,
    Clk2,
    Clk3,
    Clk4,
    Clk5,
    Clk6,
    Clk7,
}

/// R divider applied after an output multisynth.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OutputDivider {
    Div1 = 0,
    Div2,
    Div4,
    Div8,
    Div16,
    Div32,
    Div64,
    Div128,
}

impl Default for OutputDivider {
    fn default() -> Self {
        OutputDivider::Div1
    }
}

/// Input of an output driver (CLK_SRC field).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ClockSource {
    Xtal,
    ClkIn,
    /// Multisynth 0 for CLK0..3, multisynth 4 for CLK4..7.
    MultisynthAlt,
    /// The output's own multisynth.
    Multisynth,
}

impl Default for ClockSource {
    fn default() -> Self {
        ClockSource::Multisynth
    }
}

/// Output driver strength in mA.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DriveStrength {
    _2,
    _4,
    _6,
    _8,
}

impl Default for DriveStrength {
    fn default() -> Self {
        DriveStrength::_2
    }
}

/// Output state while the clock is disabled.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DisableState {
    Low = 0b00,
    High = 0b01,
    HighImpedance = 0b10,
    Never = 0b11,
}

const ADDRESS: u8 = 0b0110_0000;
const MAX_BLOCK_WRITE: usize = SPREAD_SPECTRUM_REGISTERS;

impl PLL {
    fn multisynth(&self) -> FeedbackMultisynth {
        match *self {
            PLL::A => FeedbackMultisynth::MSNA,
            PLL::B => FeedbackMultisynth::MSNB,
        }
    }
}

impl FeedbackMultisynth {
    fn base_register(&self) -> Register {
        match *self {
            FeedbackMultisynth::MSNA => Register::MultisynthNA,
            FeedbackMultisynth::MSNB => Register::MultisynthNB,
        }
    }

    /// FBA_INT / FBB_INT live in bit 6 of the CLK6 / CLK7 control registers.
    fn mode_register(&self) -> Register {
        match *self {
            FeedbackMultisynth::MSNA => Register::Clk6,
            FeedbackMultisynth::MSNB => Register::Clk7,
        }
    }
}

impl Multisynth {
    fn base_register(&self) -> Register {
        match *self {
            Multisynth::MS0 => Register::Multisynth0,
            Multisynth::MS1 => Register::Multisynth1,
            Multisynth::MS2 => Register::Multisynth2,
            Multisynth::MS3 => Register::Multisynth3,
            Multisynth::MS4 => Register::Multisynth4,
            Multisynth::MS5 => Register::Multisynth5,
        }
    }
}

#[derive(Debug, Copy, Clone)]
enum Register {
    DeviceStatus = 0,
    InterruptStatus = 1,
    OutputEnable = 3,
    OebPinEnable = 9,
    PLLInputSource = 15,
    Clk0 = 16,
    Clk1 = 17,
    Clk2 = 18,
    Clk3 = 19,
    Clk4 = 20,
    Clk5 = 21,
    Clk6 = 22,
    Clk7 = 23,
    DisableState = 24,
    MultisynthNA = 26,
    MultisynthNB = 34,
    Multisynth0 = 42,
    Multisynth1 = 50,
    Multisynth2 = 58,
    Multisynth3 = 66,
    Multisynth4 = 74,
    Multisynth5 = 82,
    SpreadSpectrum = 149,
    Clk0PhaseOffset = 165,
    Clk1PhaseOffset = 166,
    Clk2PhaseOffset = 167,
    Clk3PhaseOffset = 168,
    Clk4PhaseOffset = 169,
    Clk5PhaseOffset = 170,
    PLLReset = 177,
    CrystalLoad = 183,
    Fanout = 187,
}

impl Register {
    pub fn addr(&self) -> u8 {
        *self as u8
    }
}

bitflags! {
    pub struct DeviceStatusBits: u8 {
        const SYS_INIT = 0b1000_0000;
        const LOL_B = 0b0100_0000;
        const LOL_A = 0b0010_0000;
        const LOS = 0b0001_0000;
    }
}

bitflags! {
    /// Sticky status bits, cleared by writing zero.
    pub struct InterruptStatusBits: u8 {
        const SYS_INIT_STKY = 0b1000_0000;
        const LOL_B_STKY = 0b0100_0000;
        const LOL_A_STKY = 0b0010_0000;
        const LOS_CLKIN_STKY = 0b0001_0000;
        const LOS_XTAL_STKY = 0b0000_1000;
    }
}

bitflags! {
    struct CrystalLoadBits: u8 {
        const RESERVED = 0b00_010010;
        const CL_MASK = 0b11_000000;
        const CL_6 = 0b01_000000;
        const CL_8 = 0b10_000000;
        const CL_10 = 0b11_000000;
    }
}

bitflags! {
    struct ClockControlBits: u8 {
        const CLK_PDN = 0b1000_0000;
        const MS_INT = 0b0100_0000;
        const MS_SRC = 0b0010_0000;
        const CLK_INV = 0b0001_0000;
        const CLK_SRC_MASK = 0b0000_1100;
        const CLK_SRC_XTAL = 0b0000_0000;
        const CLK_SRC_CLKIN = 0b0000_0100;
        const CLK_SRC_MS_ALT = 0b0000_1000;
        const CLK_SRC_MS = 0b0000_1100;
        const CLK_DRV_MASK = 0b0000_0011;
        const CLK_DRV_2 = 0b0000_0000;
        const CLK_DRV_4 = 0b0000_0001;
        const CLK_DRV_6 = 0b0000_0010;
        const CLK_DRV_8 = 0b0000_0011;
    }
}

bitflags! {
    struct MultisynthDivBits: u8 {
        const R_DIV_MASK = 0b0111_0000;
        const DIVBY4 = 0b0000_1100;
    }
}

bitflags! {
    struct PLLInputSourceBits: u8 {
        const PLLB_SRC_CLKIN = 0b0000_1000;
        const PLLA_SRC_CLKIN = 0b0000_0100;
    }
}

bitflags! {
    struct PLLResetBits: u8 {
        const PLLB_RST = 0b1000_0000;
        const PLLA_RST = 0b0010_0000;
    }
}

bitflags! {
    struct SpreadSpectrumBits: u8 {
        const SSC_EN = 0b1000_0000;
    }
}

bitflags! {
    struct FanoutBits: u8 {
        const CLKIN_FANOUT_EN = 0b1000_0000;
        const XO_FANOUT_EN = 0b0100_0000;
        const MS_FANOUT_EN = 0b0001_0000;
    }
}

impl ClockOutput {
    fn register(self) -> Register {
        match self {
            ClockOutput::Clk0 => Register::Clk0,
            ClockOutput::Clk1 => Register::Clk1,
            ClockOutput::Clk2 => Register::Clk2,
            ClockOutput::Clk3 => Register::Clk3,
            ClockOutput::Clk4 => Register::Clk4,
            ClockOutput::Clk5 => Register::Clk5,
            ClockOutput::Clk6 => Register::Clk6,
            ClockOutput::Clk7 => Register::Clk7,
        }
    }

    fn ix(&self) -> u8 {
        *self as u8
    }

    fn phase_register(&self) -> Result<Register, Error> {
        match self {
            ClockOutput::Clk0 => Ok(Register::Clk0PhaseOffset),
            ClockOutput::Clk1 => Ok(Register::Clk1PhaseOffset),
            ClockOutput::Clk2 => Ok(Register::Clk2PhaseOffset),
            ClockOutput::Clk3 => Ok(Register::Clk3PhaseOffset),
            ClockOutput::Clk4 => Ok(Register::Clk4PhaseOffset),
            ClockOutput::Clk5 => Ok(Register::Clk5PhaseOffset),
            _ => Err(Error::InvalidParameter),
        }
    }

    /// CLK6 and CLK7 only have integer dividers, which this driver does not
    /// program.
    fn multisynth(&self) -> Result<Multisynth, Error> {
        match self {
            ClockOutput::Clk0 => Ok(Multisynth::MS0),
            ClockOutput::Clk1 => Ok(Multisynth::MS1),
            ClockOutput::Clk2 => Ok(Multisynth::MS2),
            ClockOutput::Clk3 => Ok(Multisynth::MS3),
            ClockOutput::Clk4 => Ok(Multisynth::MS4),
            ClockOutput::Clk5 => Ok(Multisynth::MS5),
            _ => Err(Error::InvalidParameter),
        }
    }
}

impl OutputDivider {
    fn bits(&self) -> u8 {
        *self as u8
    }

    /// Maps a division ratio to its divider, falling back to `Div1` for
    /// anything that is not a power of two up to 128.
    pub fn from_ratio(ratio: u8) -> OutputDivider {
        match ratio {
            1 => OutputDivider::Div1,
            2 => OutputDivider::Div2,
            4 => OutputDivider::Div4,
            8 => OutputDivider::Div8,
            16 => OutputDivider::Div16,
            32 => OutputDivider::Div32,
            64 => OutputDivider::Div64,
            128 => OutputDivider::Div128,
            _ => OutputDivider::default(),
        }
    }
}

impl ClockSource {
    fn bits(self) -> ClockControlBits {
        match self {
            ClockSource::Xtal => ClockControlBits::CLK_SRC_XTAL,
            ClockSource::ClkIn => ClockControlBits::CLK_SRC_CLKIN,
            ClockSource::MultisynthAlt => ClockControlBits::CLK_SRC_MS_ALT,
            ClockSource::Multisynth => ClockControlBits::CLK_SRC_MS,
        }
    }
}

impl DriveStrength {
    /// Unsupported currents fall back to the weakest setting, 2 mA.
    pub fn from_milliamps(ma: u8) -> DriveStrength {
        match ma {
            2 => DriveStrength::_2,
            4 => DriveStrength::_4,
            6 => DriveStrength::_6,
            8 => DriveStrength::_8,
            _ => DriveStrength::default(),
        }
    }

    fn bits(self) -> ClockControlBits {
        match self {
            DriveStrength::_2 => ClockControlBits::CLK_DRV_2,
            DriveStrength::_4 => ClockControlBits::CLK_DRV_4,
            DriveStrength::_6 => ClockControlBits::CLK_DRV_6,
            DriveStrength::_8 => ClockControlBits::CLK_DRV_8,
        }
    }
}

impl DisableState {
    fn bits(&self) -> u8 {
        *self as u8
    }
}

/// Contents of a CLKx control register.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ClockControl {
    pub powered_down: bool,
    pub int_mode: bool,
    pub pll: PLL,
    pub inverted: bool,
    pub source: ClockSource,
    pub drive: DriveStrength,
}

impl Default for ClockControl {
    fn default() -> Self {
        ClockControl {
            powered_down: true,
            int_mode: true,
            pll: PLL::A,
            inverted: false,
            source: ClockSource::default(),
            drive: DriveStrength::default(),
        }
    }
}

impl ClockControl {
    fn bits(&self) -> ClockControlBits {
        let mut bits = self.source.bits() | self.drive.bits();
        bits.set(ClockControlBits::CLK_PDN, self.powered_down);
        bits.set(ClockControlBits::MS_INT, self.int_mode);
        bits.set(ClockControlBits::MS_SRC, self.pll == PLL::B);
        bits.set(ClockControlBits::CLK_INV, self.inverted);
        bits
    }
}

/// Clears the bit of every enabled clock and sets it for every disabled one.
/// Used for both the output enable and the OEB pin enable registers, which
/// are active low.
fn apply_enable_mask(mut mask: u8, clocks: &[(ClockOutput, bool)]) -> u8 {
    for &(clk, enabled) in clocks {
        let bit = 1u8 << clk.ix();
        if enabled {
            mask &= !bit;
        } else {
            mask |= bit;
        }
    }
    mask
}

fn i2c_error<E>(_: E) -> Error {
    Error::CommunicationError
}

/// Si5351A driver
pub struct Si5351Device<I2C> {
    i2c: I2C,
    address: u8,
    xtal_freq: u32,
}

pub trait Si5351 {
    fn init_adafruit_module(&mut self) -> Result<(), Error>;
    fn init(&mut self, xtal_load: CrystalLoad) -> Result<(), Error>;
    fn read_device_status(&mut self) -> Result<DeviceStatusBits, Error>;
    fn read_interrupt_status(&mut self) -> Result<InterruptStatusBits, Error>;
    fn clear_interrupt_status(&mut self) -> Result<(), Error>;

    fn setup_pll(&mut self, pll: PLL, ratio: DividerRatio, int_mode: bool) -> Result<(), Error>;
    fn setup_multisynth(
        &mut self,
        clk: ClockOutput,
        ratio: DividerRatio,
        r_div: OutputDivider,
        int_mode: bool,
        div_by_4: bool,
    ) -> Result<(), Error>;
    fn reset_plls(&mut self) -> Result<(), Error>;

    fn set_clock_control(&mut self, clk: ClockOutput, control: &ClockControl)
        -> Result<(), Error>;
    fn disable_all_outputs(&mut self, power_down: bool) -> Result<(), Error>;
    fn set_outputs_enabled(&mut self, clocks: &[(ClockOutput, bool)]) -> Result<(), Error>;
    fn disable_oeb_pin_all(&mut self) -> Result<(), Error>;
    fn set_oeb_pin_enabled(&mut self, clocks: &[(ClockOutput, bool)]) -> Result<(), Error>;
    fn set_disable_states(&mut self, states: &[(ClockOutput, DisableState)])
        -> Result<(), Error>;

    fn set_fanout(&mut self, xtal: bool, clkin: bool, multisynth: bool) -> Result<(), Error>;
    fn set_initial_offset(&mut self, clk: ClockOutput, offset: u8) -> Result<(), Error>;
    fn set_crystal_load(&mut self, xtal_load: CrystalLoad) -> Result<(), Error>;

    fn set_spread_spectrum_enabled(&mut self, enabled: bool) -> Result<(), Error>;
    fn setup_spread_spectrum(
        &mut self,
        amplitude: f64,
        mode: SpreadMode,
        pll_ratio: u32,
    ) -> Result<(), Error>;
}

impl<I2C, E> Si5351Device<I2C>
where
    I2C: WriteRead<Error = E> + Write<Error = E>,
{
    /// Creates a new driver from a I2C peripheral. `xtal_freq` is in Hz.
    pub fn new(i2c: I2C, address_bit: bool, xtal_freq: u32) -> Self {
        Si5351Device {
            i2c,
            address: ADDRESS | if address_bit { 1 } else { 0 },
            xtal_freq,
        }
    }

    /// Creates a driver for a device at an arbitrary 7-bit address.
    pub fn with_address(i2c: I2C, address: u8, xtal_freq: u32) -> Result<Self, Error> {
        if address > 0x7f {
            return Err(Error::InvalidParameter);
        }
        Ok(Si5351Device {
            i2c,
            address,
            xtal_freq,
        })
    }

    pub fn new_adafruit_module(i2c: I2C) -> Self {
        Si5351Device::new(i2c, false, 25_000_000)
    }

    /// Returns the I2C peripheral.
    pub fn release(self) -> I2C {
        self.i2c
    }

    pub fn xtal_freq(&self) -> u32 {
        self.xtal_freq
    }

    fn read_register(&mut self, reg: Register) -> Result<u8, Error> {
        let mut buffer = [0u8; 1];
        self.read_registers(reg, &mut buffer)?;
        Ok(buffer[0])
    }

    fn read_registers(&mut self, start: Register, buffer: &mut [u8]) -> Result<(), Error> {
        self.i2c
            .write_read(self.address, &[start.addr()], buffer)
            .map_err(i2c_error)?;
        trace!("read {:?} -> {:02x?}", start, buffer);
        Ok(())
    }

    fn write_register(&mut self, reg: Register, byte: u8) -> Result<(), Error> {
        trace!("write {:?} <- {:02x}", reg, byte);
        self.i2c
            .write(self.address, &[reg.addr(), byte])
            .map_err(i2c_error)
    }

    fn write_registers(&mut self, start: Register, values: &[u8]) -> Result<(), Error> {
        if values.len() > MAX_BLOCK_WRITE {
            return Err(Error::InvalidParameter);
        }

        let mut buffer = [0u8; MAX_BLOCK_WRITE + 1];
        buffer[0] = start.addr();
        buffer[1..=values.len()].copy_from_slice(values);

        trace!("write {:?} <- {:02x?}", start, values);
        self.i2c
            .write(self.address, &buffer[..=values.len()])
            .map_err(i2c_error)
    }

    fn update_register<F>(&mut self, reg: Register, f: F) -> Result<(), Error>
    where
        F: FnOnce(u8) -> u8,
    {
        let value = self.read_register(reg)?;
        self.write_register(reg, f(value))
    }
}

impl<I2C, E> Si5351 for Si5351Device<I2C>
where
    I2C: WriteRead<Error = E> + Write<Error = E>,
{
    fn init_adafruit_module(&mut self) -> Result<(), Error> {
        self.init(CrystalLoad::_10)
    }

    /// Waits for the device to leave system initialization, disables and
    /// powers down all outputs, then sets the crystal load.
    fn init(&mut self, xtal_load: CrystalLoad) -> Result<(), Error> {
        loop {
            let device_status = self.read_device_status()?;
            if !device_status.contains(DeviceStatusBits::SYS_INIT) {
                break;
            }
        }

        self.disable_all_outputs(true)?;
        self.set_crystal_load(xtal_load)?;

        debug!("initialized, crystal load {:?}", xtal_load);
        Ok(())
    }

    fn read_device_status(&mut self) -> Result<DeviceStatusBits, Error> {
        Ok(DeviceStatusBits::from_bits_truncate(
            self.read_register(Register::DeviceStatus)?,
        ))
    }

    fn read_interrupt_status(&mut self) -> Result<InterruptStatusBits, Error> {
        Ok(InterruptStatusBits::from_bits_truncate(
            self.read_register(Register::InterruptStatus)?,
        ))
    }

    fn clear_interrupt_status(&mut self) -> Result<(), Error> {
        self.write_register(Register::InterruptStatus, 0)
    }

    /// Programs a PLL feedback multisynth, with the crystal as input for
    /// both PLLs.
    fn setup_pll(&mut self, pll: PLL, ratio: DividerRatio, int_mode: bool) -> Result<(), Error> {
        let ms = pll.multisynth();
        let regs = SynthParams::from_ratio(ratio)?.to_registers(0)?;

        self.write_register(
            Register::PLLInputSource,
            PLLInputSourceBits::empty().bits(),
        )?;
        self.update_register(ms.mode_register(), |value| {
            let mut bits = ClockControlBits::from_bits_truncate(value);
            bits.set(ClockControlBits::MS_INT, int_mode);
            bits.bits()
        })?;
        self.write_registers(ms.base_register(), &regs)?;

        debug!("PLL {:?} set to {:?}, int mode {}", pll, ratio, int_mode);
        Ok(())
    }

    /// Programs the multisynth feeding `clk`. Only CLK0..CLK5 have one.
    fn setup_multisynth(
        &mut self,
        clk: ClockOutput,
        ratio: DividerRatio,
        r_div: OutputDivider,
        int_mode: bool,
        div_by_4: bool,
    ) -> Result<(), Error> {
        let ms = clk.multisynth()?;

        let mut div_bits = MultisynthDivBits::from_bits_truncate(r_div.bits() << 4);
        div_bits.set(MultisynthDivBits::DIVBY4, div_by_4);
        let regs = SynthParams::from_ratio(ratio)?.to_registers(div_bits.bits())?;

        self.update_register(clk.register(), |value| {
            let mut bits = ClockControlBits::from_bits_truncate(value);
            bits.set(ClockControlBits::MS_INT, int_mode);
            bits.bits()
        })?;
        self.write_registers(ms.base_register(), &regs)?;

        debug!(
            "{:?} multisynth set to {:?}, {:?}, int mode {}, divby4 {}",
            clk, ratio, r_div, int_mode, div_by_4
        );
        Ok(())
    }

    /// Soft-resets both PLLs; the chip has no way to reset only one.
    fn reset_plls(&mut self) -> Result<(), Error> {
        self.write_register(
            Register::PLLReset,
            (PLLResetBits::PLLA_RST | PLLResetBits::PLLB_RST).bits(),
        )
    }

    fn set_clock_control(
        &mut self,
        clk: ClockOutput,
        control: &ClockControl,
    ) -> Result<(), Error> {
        self.write_register(clk.register(), control.bits().bits())
    }

    fn disable_all_outputs(&mut self, power_down: bool) -> Result<(), Error> {
        self.write_register(Register::OutputEnable, 0xff)?;

        if power_down {
            self.write_registers(Register::Clk0, &[ClockControlBits::CLK_PDN.bits(); 8])?;
        }

        debug!("all outputs disabled, power down {}", power_down);
        Ok(())
    }

    fn set_outputs_enabled(&mut self, clocks: &[(ClockOutput, bool)]) -> Result<(), Error> {
        self.update_register(Register::OutputEnable, |mask| {
            apply_enable_mask(mask, clocks)
        })
    }

    fn disable_oeb_pin_all(&mut self) -> Result<(), Error> {
        self.write_register(Register::OebPinEnable, 0xff)
    }

    fn set_oeb_pin_enabled(&mut self, clocks: &[(ClockOutput, bool)]) -> Result<(), Error> {
        self.update_register(Register::OebPinEnable, |mask| {
            apply_enable_mask(mask, clocks)
        })
    }

    /// `Low` clears the clock's field; every other state is OR'ed into the
    /// field as it stands.
    fn set_disable_states(
        &mut self,
        states: &[(ClockOutput, DisableState)],
    ) -> Result<(), Error> {
        let mut regs = [0u8; 2];
        self.read_registers(Register::DisableState, &mut regs)?;

        for &(clk, state) in states {
            let reg = &mut regs[(clk.ix() / 4) as usize];
            let shift = 2 * (clk.ix() % 4);
            match state {
                DisableState::Low => *reg &= !(0b11 << shift),
                _ => *reg |= state.bits() << shift,
            }
        }

        self.write_registers(Register::DisableState, &regs)
    }

    fn set_fanout(&mut self, xtal: bool, clkin: bool, multisynth: bool) -> Result<(), Error> {
        let mut bits = FanoutBits::empty();
        bits.set(FanoutBits::XO_FANOUT_EN, xtal);
        bits.set(FanoutBits::CLKIN_FANOUT_EN, clkin);
        bits.set(FanoutBits::MS_FANOUT_EN, multisynth);
        self.write_register(Register::Fanout, bits.bits())
    }

    /// Writes the 7bit initial phase offset register. The offset is in units
    /// of VCO/4 period and is not derived from a time delay here.
    fn set_initial_offset(&mut self, clk: ClockOutput, offset: u8) -> Result<(), Error> {
        if offset > 0b0111_1111 {
            return Err(Error::InvalidParameter);
        }
        self.write_register(clk.phase_register()?, offset)
    }

    fn set_crystal_load(&mut self, xtal_load: CrystalLoad) -> Result<(), Error> {
        self.write_register(
            Register::CrystalLoad,
            (CrystalLoadBits::RESERVED | xtal_load.bits()).bits(),
        )
    }

    fn set_spread_spectrum_enabled(&mut self, enabled: bool) -> Result<(), Error> {
        let ssc_en = SpreadSpectrumBits::SSC_EN.bits();
        self.update_register(Register::SpreadSpectrum, |value| {
            if enabled {
                value | ssc_en
            } else {
                value & !ssc_en
            }
        })
    }

    /// Writes the spread spectrum parameters for PLL A. PLL A must already
    /// be in fractional mode. Leaves spread spectrum disabled.
    fn setup_spread_spectrum(
        &mut self,
        amplitude: f64,
        mode: SpreadMode,
        pll_ratio: u32,
    ) -> Result<(), Error> {
        let ss = SpreadSpectrum::new(self.xtal_freq, amplitude, mode, pll_ratio)?;
        self.write_registers(Register::SpreadSpectrum, &ss.to_registers())?;

        debug!("spread spectrum set to {:?}", ss);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockI2c;
    use std::vec::Vec;

    fn w(reg: u8, data: &[u8]) -> (u8, Vec<u8>) {
        (reg, data.to_vec())
    }

    fn device() -> Si5351Device<MockI2c> {
        Si5351Device::new_adafruit_module(MockI2c::new())
    }

    #[test]
    fn pll_setup_selects_crystal_sets_mode_and_writes_block() {
        let mut clock = device();
        clock.i2c.regs[22] = 0b1000_0011;

        clock.setup_pll(PLL::A, DividerRatio::int(24), true).unwrap();

        assert_eq!(
            clock.i2c.writes,
            vec![
                w(15, &[0x00]),
                w(22, &[0b1100_0011]),
                w(26, &[0x00, 0x01, 0x00, 0x0a, 0x00, 0x00, 0x00, 0x00]),
            ]
        );
    }

    #[test]
    fn pll_b_fractional_clears_mode_bit() {
        let mut clock = device();
        clock.i2c.regs[23] = 0xff;

        clock
            .setup_pll(PLL::B, DividerRatio::new(35, 999_999, 1_000_000), false)
            .unwrap();

        assert_eq!(clock.i2c.regs[23], 0xbf);
        assert_eq!(
            &clock.i2c.regs[34..42],
            &[0x42, 0x40, 0x00, 0x0f, 0xff, 0xff, 0x41, 0xc0]
        );
    }

    #[test]
    fn pll_setup_with_zero_denominator_touches_nothing() {
        let mut clock = device();
        assert_eq!(
            clock.setup_pll(PLL::A, DividerRatio::new(24, 1, 0), false),
            Err(Error::ZeroDenominator)
        );
        assert!(clock.i2c.writes.is_empty());
    }

    #[test]
    fn multisynth_carries_r_divider_and_divby4() {
        let mut clock = device();

        clock
            .setup_multisynth(
                ClockOutput::Clk0,
                DividerRatio::int(1200),
                OutputDivider::from_ratio(4),
                true,
                false,
            )
            .unwrap();
        assert_eq!(clock.i2c.regs[16], 0b0100_0000);
        assert_eq!(
            &clock.i2c.regs[42..50],
            &[0x00, 0x01, 0x22, 0x56, 0x00, 0x00, 0x00, 0x00]
        );

        clock
            .setup_multisynth(
                ClockOutput::Clk2,
                DividerRatio::int(4),
                OutputDivider::Div128,
                true,
                true,
            )
            .unwrap();
        assert_eq!(clock.i2c.regs[58..61], [0x00, 0x01, 0x7c]);
    }

    #[test]
    fn unknown_r_divider_falls_back_to_div1() {
        assert_eq!(OutputDivider::from_ratio(3), OutputDivider::Div1);
        assert_eq!(OutputDivider::from_ratio(0), OutputDivider::Div1);
        assert_eq!(OutputDivider::from_ratio(64), OutputDivider::Div64);
    }

    #[test]
    fn multisynth_on_clk6_is_rejected() {
        let mut clock = device();
        assert_eq!(
            clock.setup_multisynth(
                ClockOutput::Clk6,
                DividerRatio::int(8),
                OutputDivider::Div1,
                true,
                false
            ),
            Err(Error::InvalidParameter)
        );
    }

    #[test]
    fn clock_control_byte() {
        let mut clock = device();
        let control = ClockControl {
            powered_down: false,
            int_mode: true,
            pll: PLL::B,
            inverted: true,
            source: ClockSource::MultisynthAlt,
            drive: DriveStrength::_6,
        };
        clock.set_clock_control(ClockOutput::Clk1, &control).unwrap();
        assert_eq!(clock.i2c.writes, vec![w(17, &[0b0111_1010])]);

        clock
            .set_clock_control(ClockOutput::Clk0, &ClockControl::default())
            .unwrap();
        assert_eq!(clock.i2c.regs[16], 0b1100_1100);
    }

    #[test]
    fn unknown_drive_strength_matches_2ma() {
        let mut clock = device();
        let control = |ma| ClockControl {
            powered_down: false,
            drive: DriveStrength::from_milliamps(ma),
            ..ClockControl::default()
        };

        clock.set_clock_control(ClockOutput::Clk0, &control(5)).unwrap();
        clock.set_clock_control(ClockOutput::Clk1, &control(2)).unwrap();
        assert_eq!(clock.i2c.regs[16], clock.i2c.regs[17]);
        assert_eq!(clock.i2c.regs[16], 0b0100_1100);
    }

    #[test]
    fn disable_all_outputs_powers_down_drivers() {
        let mut clock = device();
        clock.disable_all_outputs(true).unwrap();
        assert_eq!(
            clock.i2c.writes,
            vec![w(3, &[0xff]), w(16, &[0x80; 8])]
        );

        let mut clock = device();
        clock.disable_all_outputs(false).unwrap();
        assert_eq!(clock.i2c.writes, vec![w(3, &[0xff])]);
    }

    #[test]
    fn output_enable_only_touches_named_clocks() {
        let mut clock = device();
        clock.i2c.regs[3] = 0b1010_1111;

        clock
            .set_outputs_enabled(&[(ClockOutput::Clk0, true)])
            .unwrap();
        clock
            .set_outputs_enabled(&[(ClockOutput::Clk2, false)])
            .unwrap();
        assert_eq!(clock.i2c.regs[3], 0b1010_1110);

        clock
            .set_outputs_enabled(&[(ClockOutput::Clk7, true), (ClockOutput::Clk4, false)])
            .unwrap();
        assert_eq!(clock.i2c.regs[3], 0b0011_1110);
    }

    #[test]
    fn oeb_pin_control() {
        let mut clock = device();
        clock.disable_oeb_pin_all().unwrap();
        assert_eq!(clock.i2c.regs[9], 0xff);

        clock
            .set_oeb_pin_enabled(&[(ClockOutput::Clk1, true), (ClockOutput::Clk3, true)])
            .unwrap();
        assert_eq!(clock.i2c.regs[9], 0b1111_0101);
        assert_eq!(clock.i2c.regs[3], 0);
    }

    #[test]
    fn pll_reset_hits_both_plls() {
        let mut clock = device();
        clock.reset_plls().unwrap();
        assert_eq!(clock.i2c.writes, vec![w(177, &[0xa0])]);
    }

    #[test]
    fn fanout_bits() {
        let mut clock = device();
        clock.set_fanout(true, false, true).unwrap();
        assert_eq!(clock.i2c.regs[187], 0b0101_0000);
        clock.set_fanout(false, true, false).unwrap();
        assert_eq!(clock.i2c.regs[187], 0b1000_0000);
    }

    #[test]
    fn initial_offset_is_raw_7bit_code() {
        let mut clock = device();
        clock.set_initial_offset(ClockOutput::Clk1, 27).unwrap();
        assert_eq!(clock.i2c.writes, vec![w(166, &[27])]);

        assert_eq!(
            clock.set_initial_offset(ClockOutput::Clk0, 0x80),
            Err(Error::InvalidParameter)
        );
        assert_eq!(
            clock.set_initial_offset(ClockOutput::Clk6, 1),
            Err(Error::InvalidParameter)
        );
    }

    #[test]
    fn status_read_and_clear() {
        let mut clock = device();
        clock.i2c.regs[1] = 0b0011_1000;

        let status = clock.read_interrupt_status().unwrap();
        assert_eq!(
            status,
            InterruptStatusBits::LOL_A_STKY
                | InterruptStatusBits::LOS_CLKIN_STKY
                | InterruptStatusBits::LOS_XTAL_STKY
        );

        clock.clear_interrupt_status().unwrap();
        assert_eq!(clock.i2c.regs[1], 0);
    }

    #[test]
    fn spread_spectrum_enable_keeps_low_bits() {
        let mut clock = device();
        clock.i2c.regs[149] = 0b0101_0101;

        clock.set_spread_spectrum_enabled(true).unwrap();
        assert_eq!(clock.i2c.regs[149], 0b1101_0101);

        clock.set_spread_spectrum_enabled(false).unwrap();
        assert_eq!(clock.i2c.regs[149], 0b0101_0101);
    }

    #[test]
    fn spread_spectrum_block_write() {
        let mut clock = device();
        clock
            .setup_spread_spectrum(0.015, SpreadMode::Center, 24)
            .unwrap();
        assert_eq!(
            clock.i2c.writes,
            vec![w(
                149,
                &[0x1d, 0x59, 0xff, 0xff, 0x00, 0x00, 0xc6, 0x1e, 0x3d, 0x7f, 0xff, 0x00, 0x00]
            )]
        );
    }

    #[test]
    fn crystal_load() {
        let mut clock = device();
        clock
            .set_crystal_load(CrystalLoad::from_picofarads(6).unwrap())
            .unwrap();
        assert_eq!(clock.i2c.regs[183], 0b0101_0010);
        clock.set_crystal_load(CrystalLoad::_10).unwrap();
        assert_eq!(clock.i2c.regs[183], 0b1101_0010);

        assert_eq!(CrystalLoad::from_picofarads(7), Err(Error::InvalidParameter));
    }

    #[test]
    fn disable_state_low_clears_only_its_field() {
        let mut clock = device();
        clock.i2c.regs[24] = 0b1110_0111;
        clock.i2c.regs[25] = 0b1001_1011;

        clock
            .set_disable_states(&[(ClockOutput::Clk0, DisableState::Low)])
            .unwrap();

        assert_eq!(clock.i2c.regs[24], 0b1110_0100);
        assert_eq!(clock.i2c.regs[25], 0b1001_1011);
        assert_eq!(clock.i2c.writes, vec![w(24, &[0b1110_0100, 0b1001_1011])]);
    }

    #[test]
    fn disable_state_other_states_or_into_field() {
        let mut clock = device();
        clock.i2c.regs[25] = 0b0000_0010;

        clock
            .set_disable_states(&[
                (ClockOutput::Clk4, DisableState::High),
                (ClockOutput::Clk7, DisableState::HighImpedance),
                (ClockOutput::Clk1, DisableState::Never),
            ])
            .unwrap();

        assert_eq!(clock.i2c.regs[24], 0b0000_1100);
        // HIGH over HIGH_IMPEDANCE is not cleared first
        assert_eq!(clock.i2c.regs[25], 0b1000_0011);
    }

    #[test]
    fn init_waits_for_sys_init_then_powers_down() {
        let mut clock = device();
        clock.init_adafruit_module().unwrap();
        assert_eq!(
            clock.i2c.writes,
            vec![w(3, &[0xff]), w(16, &[0x80; 8]), w(183, &[0b1101_0010])]
        );
    }

    #[test]
    fn bus_errors_are_reported() {
        let mut clock = device();
        clock.i2c.fail_reads = true;
        assert_eq!(clock.read_device_status(), Err(Error::CommunicationError));
        assert_eq!(
            clock.set_outputs_enabled(&[(ClockOutput::Clk0, true)]),
            Err(Error::CommunicationError)
        );
        assert!(clock.i2c.writes.is_empty());
    }

    #[test]
    fn failed_write_after_read_is_reported() {
        let mut clock = device();
        clock.i2c.regs[3] = 0xff;
        clock.i2c.fail_writes = true;

        assert_eq!(
            clock.set_outputs_enabled(&[(ClockOutput::Clk0, true)]),
            Err(Error::CommunicationError)
        );
        assert_eq!(clock.i2c.regs[3], 0xff);
    }

    #[test]
    fn address_selection() {
        let clock = Si5351Device::new(MockI2c::new(), true, 27_000_000);
        assert_eq!(clock.address, 0x61);
        assert_eq!(clock.xtal_freq(), 27_000_000);

        assert!(Si5351Device::with_address(MockI2c::new(), 0x80, 25_000_000).is_err());
        let clock = Si5351Device::with_address(MockI2c::new(), 0x62, 25_000_000).unwrap();
        assert_eq!(clock.address, 0x62);
        let i2c: MockI2c = clock.release();
        assert!(i2c.writes.is_empty());
    }
}
