/*
   Copyright 2018 Ilya Epifanov

   Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
   http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
   http://opensource.org/licenses/MIT>, at your option. This file may not be
   copied, modified, or distributed except according to those terms.
*/
//! P1/P2/P3 encoding of `a + b/c` divider ratios, as described in
//! Skyworks AN619 ("Manually Generating an Si5351 Register Map").

use crate::Error;

const U20_MAX: u32 = 0xf_ffff;
const U18_MAX: u32 = 0x3_ffff;

/// A divider ratio `a + b/c`.
///
/// Used both for the PLL feedback multisynths (`a` in 15..=90) and for the
/// output multisynths (`a` in 8..=2048). The hardware ranges are not checked
/// here.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DividerRatio {
    pub a: u32,
    pub b: u32,
    pub c: u32,
}

impl DividerRatio {
    pub fn new(a: u32, b: u32, c: u32) -> Self {
        DividerRatio { a, b, c }
    }

    /// Integer-mode ratio `a + 0/1`.
    pub fn int(a: u32) -> Self {
        DividerRatio { a, b: 0, c: 1 }
    }
}

/// The three fixed-point fields the chip stores for a divider.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SynthParams {
    pub p1: u32,
    pub p2: u32,
    pub p3: u32,
}

impl SynthParams {
    /// ```text
    /// P1 = 128*a + floor(128*b/c) - 512
    /// P2 = 128*b - c*floor(128*b/c)
    /// P3 = c
    /// ```
    pub fn from_ratio(ratio: DividerRatio) -> Result<SynthParams, Error> {
        let DividerRatio { a, b, c } = ratio;
        if c == 0 {
            return Err(Error::ZeroDenominator);
        }

        let (a, b, c) = (a as u64, b as u64, c as u64);
        let frac = 128 * b / c;

        let p1 = (128 * a + frac)
            .checked_sub(512)
            .ok_or(Error::FieldOverflow)?;
        let p2 = 128 * b - c * frac;
        let p3 = c;

        Ok(SynthParams {
            p1: fit_u20(p1)?,
            p2: fit_u20(p2)?,
            p3: fit_u20(p3)?,
        })
    }

    /// Packs the fields into the 8-register block shared by the PLL and
    /// output multisynths. `p1_high_extra` is OR'ed into the register that
    /// carries `P1[17:16]` (R divider and DIVBY4 bits for the outputs).
    pub fn to_registers(&self, p1_high_extra: u8) -> Result<[u8; 8], Error> {
        if self.p1 > U18_MAX {
            return Err(Error::FieldOverflow);
        }

        let p1 = split_u20(self.p1)?;
        let p2 = split_u20(self.p2)?;
        let p3 = split_u20(self.p3)?;

        Ok([
            p3[1],
            p3[2],
            p1[0] | p1_high_extra,
            p1[1],
            p1[2],
            (p3[0] << 4) | p2[0],
            p2[1],
            p2[2],
        ])
    }
}

fn fit_u20(value: u64) -> Result<u32, Error> {
    if value > U20_MAX as u64 {
        Err(Error::FieldOverflow)
    } else {
        Ok(value as u32)
    }
}

/// Splits a 20-bit field into bytes, most significant first.
///
/// Values wider than 20 bits are rejected rather than masked.
pub fn split_u20(value: u32) -> Result<[u8; 3], Error> {
    if value > U20_MAX {
        return Err(Error::FieldOverflow);
    }
    Ok([(value >> 16) as u8, (value >> 8) as u8, value as u8])
}

/// Splits a 16-bit field into bytes, most significant first.
pub fn split_u16(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}
