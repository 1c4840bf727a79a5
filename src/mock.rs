/*
   Copyright 2018 Ilya Epifanov

   Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
   http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
   http://opensource.org/licenses/MIT>, at your option. This file may not be
   copied, modified, or distributed except according to those terms.
*/
//! In-memory Si5351 register file for tests.

use crate::hal::blocking::i2c::{Write, WriteRead};
use std::vec::Vec;

const ADDRESSES: [u8; 4] = [0x60, 0x61, 0x62, 0x63];

pub struct MockI2c {
    pub regs: [u8; 256],
    /// Every successful write as (start register, data bytes).
    pub writes: Vec<(u8, Vec<u8>)>,
    pub fail_reads: bool,
    pub fail_writes: bool,
}

impl MockI2c {
    pub fn new() -> Self {
        MockI2c {
            regs: [0; 256],
            writes: Vec::new(),
            fail_reads: false,
            fail_writes: false,
        }
    }
}

impl Write for MockI2c {
    type Error = ();

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), ()> {
        assert!(ADDRESSES.contains(&address));
        if self.fail_writes {
            return Err(());
        }

        let start = bytes[0];
        let data = &bytes[1..];
        for (i, &byte) in data.iter().enumerate() {
            self.regs[start as usize + i] = byte;
        }

        let mut recorded = Vec::new();
        recorded.extend_from_slice(data);
        self.writes.push((start, recorded));
        Ok(())
    }
}

impl WriteRead for MockI2c {
    type Error = ();

    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<(), ()> {
        assert!(ADDRESSES.contains(&address));
        assert_eq!(bytes.len(), 1);
        if self.fail_reads {
            return Err(());
        }

        let start = bytes[0] as usize;
        buffer.copy_from_slice(&self.regs[start..start + buffer.len()]);
        Ok(())
    }
}
