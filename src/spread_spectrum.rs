/*
   Copyright 2018 Ilya Epifanov

   Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
   http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
   http://opensource.org/licenses/MIT>, at your option. This file may not be
   copied, modified, or distributed except according to those terms.
*/
//! Spread spectrum parameters for PLL A (registers 149..=161).

use crate::synth::split_u16;
use crate::Error;

const SSC_P3: u16 = 0x7fff;
const U12_MAX: u32 = 0xfff;

/// Number of registers in the spread spectrum block.
pub const SPREAD_SPECTRUM_REGISTERS: usize = 13;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SpreadMode {
    /// Spread above and below the nominal frequency.
    Center,
    /// Spread only below the nominal frequency.
    Down,
}

/// One of the up/down spread triples. `p1` is 12 bits, `p2` and `p3` are 15.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SpreadParams {
    pub p1: u16,
    pub p2: u16,
    pub p3: u16,
}

impl SpreadParams {
    /// Up-spread triple used in down-spread mode.
    pub const DISABLED: SpreadParams = SpreadParams { p1: 0, p2: 0, p3: 1 };

    fn from_rate(rate: f64) -> Result<SpreadParams, Error> {
        // rate is non-negative, so truncation is floor
        let p1 = rate as u32;
        if p1 > U12_MAX {
            return Err(Error::FieldOverflow);
        }
        let p2 = (SSC_P3 as f64 * (rate - p1 as f64)) as u16;

        Ok(SpreadParams {
            p1: p1 as u16,
            p2,
            p3: SSC_P3,
        })
    }
}

/// Everything written to the spread spectrum block.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SpreadSpectrum {
    pub mode: SpreadMode,
    pub up_down: u16,
    pub down: SpreadParams,
    pub up: SpreadParams,
}

impl SpreadSpectrum {
    /// Derives the spread spectrum parameters.
    ///
    /// `amplitude` is a fraction (`0.015` for 1.5%), `pll_ratio` the integer
    /// part of PLL A's feedback ratio. PLL A has to run in fractional mode
    /// for spread spectrum to work; that is not checked here.
    pub fn new(
        xtal_freq: u32,
        amplitude: f64,
        mode: SpreadMode,
        pll_ratio: u32,
    ) -> Result<SpreadSpectrum, Error> {
        if !(0.0..1.0).contains(&amplitude) {
            return Err(Error::InvalidParameter);
        }

        let up_down = xtal_freq / (4 * 31_500);
        if up_down == 0 {
            return Err(Error::InvalidParameter);
        }
        if up_down > U12_MAX {
            return Err(Error::FieldOverflow);
        }

        let scale = (128 * pll_ratio as u64) as f64;
        let down_rate = scale * (amplitude / ((1.0 + amplitude) * up_down as f64));
        let down = SpreadParams::from_rate(down_rate)?;

        let up = match mode {
            SpreadMode::Center => {
                let up_rate = scale * (amplitude / ((1.0 - amplitude) * up_down as f64));
                SpreadParams::from_rate(up_rate)?
            }
            SpreadMode::Down => SpreadParams::DISABLED,
        };

        Ok(SpreadSpectrum {
            mode,
            up_down: up_down as u16,
            down,
            up,
        })
    }

    /// Register image for 149..=161.
    ///
    /// Register 149 bit 7 is the enable bit and ends up cleared.
    pub fn to_registers(&self) -> [u8; SPREAD_SPECTRUM_REGISTERS] {
        let udp = split_u16(self.up_down);
        let dn_p1 = split_u16(self.down.p1);
        let dn_p2 = split_u16(self.down.p2);
        let dn_p3 = split_u16(self.down.p3);
        let up_p1 = split_u16(self.up.p1);
        let up_p2 = split_u16(self.up.p2);
        let up_p3 = split_u16(self.up.p3);

        let ssc_mode = match self.mode {
            SpreadMode::Center => dn_p3[0] | 0x80,
            SpreadMode::Down => dn_p3[0] & 0x7f,
        };

        [
            dn_p2[0],
            dn_p2[1],
            ssc_mode,
            dn_p3[1],
            dn_p1[1],
            (udp[0] << 4) | dn_p1[0],
            udp[1],
            up_p2[0],
            up_p2[1],
            up_p3[0],
            up_p3[1],
            up_p1[1],
            up_p1[0] & 0x0f,
        ]
    }
}
