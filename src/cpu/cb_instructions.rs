// CB-prefixed opcodes
//
// The second 256-entry table behind the 0xCB prefix: rotates, shifts,
// SWAP, and the BIT/RES/SET bit operations. The encoding is regular:
//
//   bits 7-6: group (00 = rotate/shift, 01 = BIT, 10 = RES, 11 = SET)
//   bits 5-3: bit number, or the rotate/shift variant
//   bits 2-0: operand (B C D E H L (HL) A)
//
// The (HL) operand reads and writes through the bus and costs 16
// T-cycles (12 for BIT, which never writes back); register operands
// cost 8.

use super::Cpu;
use crate::bus::Bus;

impl Cpu {
    pub(super) fn execute_cb(&mut self, bus: &mut Bus, opcode: u8) -> u32 {
        let operand = opcode & 0x07;
        let value = self.read_operand(bus, operand);

        let (result, cycles) = match opcode {
            // RLC
            0x00..=0x07 => {
                let r = self.rlc(value);
                (Some(r), if operand == 6 { 16 } else { 8 })
            }
            // RRC
            0x08..=0x0F => {
                let r = self.rrc(value);
                (Some(r), if operand == 6 { 16 } else { 8 })
            }
            // RL
            0x10..=0x17 => {
                let r = self.rl(value);
                (Some(r), if operand == 6 { 16 } else { 8 })
            }
            // RR
            0x18..=0x1F => {
                let r = self.rr(value);
                (Some(r), if operand == 6 { 16 } else { 8 })
            }
            // SLA
            0x20..=0x27 => {
                let r = self.sla(value);
                (Some(r), if operand == 6 { 16 } else { 8 })
            }
            // SRA
            0x28..=0x2F => {
                let r = self.sra(value);
                (Some(r), if operand == 6 { 16 } else { 8 })
            }
            // SWAP
            0x30..=0x37 => {
                let r = self.swap(value);
                (Some(r), if operand == 6 { 16 } else { 8 })
            }
            // SRL
            0x38..=0x3F => {
                let r = self.srl(value);
                (Some(r), if operand == 6 { 16 } else { 8 })
            }
            // BIT b, r: test only, no write-back
            0x40..=0x7F => {
                let bit = (opcode >> 3) & 0x07;
                self.bit(value, bit);
                (None, if operand == 6 { 12 } else { 8 })
            }
            // RES b, r
            0x80..=0xBF => {
                let bit = (opcode >> 3) & 0x07;
                (Some(value & !(1 << bit)), if operand == 6 { 16 } else { 8 })
            }
            // SET b, r
            0xC0..=0xFF => {
                let bit = (opcode >> 3) & 0x07;
                (Some(value | (1 << bit)), if operand == 6 { 16 } else { 8 })
            }
        };

        if let Some(result) = result {
            self.write_operand(bus, operand, result);
        }

        cycles
    }

    fn read_operand(&self, bus: &Bus, operand: u8) -> u8 {
        match operand {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => self.regs.h,
            5 => self.regs.l,
            6 => bus.read(self.regs.hl()),
            _ => self.regs.a,
        }
    }

    fn write_operand(&mut self, bus: &mut Bus, operand: u8, value: u8) {
        match operand {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 => self.regs.h = value,
            5 => self.regs.l = value,
            6 => bus.write(self.regs.hl(), value),
            _ => self.regs.a = value,
        }
    }

    // Unlike the A-register rotates in the primary table, every CB form
    // sets Z from the result.

    fn rlc(&mut self, value: u8) -> u8 {
        let carry = value >> 7;
        let result = (value << 1) | carry;
        self.set_shift_flags(result, carry != 0);
        result
    }

    fn rrc(&mut self, value: u8) -> u8 {
        let carry = value & 1;
        let result = (value >> 1) | (carry << 7);
        self.set_shift_flags(result, carry != 0);
        result
    }

    fn rl(&mut self, value: u8) -> u8 {
        let old_carry = self.regs.f.c as u8;
        let result = (value << 1) | old_carry;
        self.set_shift_flags(result, value & 0x80 != 0);
        result
    }

    fn rr(&mut self, value: u8) -> u8 {
        let old_carry = (self.regs.f.c as u8) << 7;
        let result = (value >> 1) | old_carry;
        self.set_shift_flags(result, value & 1 != 0);
        result
    }

    fn sla(&mut self, value: u8) -> u8 {
        let result = value << 1;
        self.set_shift_flags(result, value & 0x80 != 0);
        result
    }

    /// Arithmetic right shift: bit 7 is replicated
    fn sra(&mut self, value: u8) -> u8 {
        let result = (value >> 1) | (value & 0x80);
        self.set_shift_flags(result, value & 1 != 0);
        result
    }

    fn swap(&mut self, value: u8) -> u8 {
        let result = value.rotate_left(4);
        self.set_shift_flags(result, false);
        result
    }

    /// Logical right shift: bit 7 becomes 0
    fn srl(&mut self, value: u8) -> u8 {
        let result = value >> 1;
        self.set_shift_flags(result, value & 1 != 0);
        result
    }

    fn set_shift_flags(&mut self, result: u8, carry: bool) {
        self.regs.f.z = result == 0;
        self.regs.f.n = false;
        self.regs.f.h = false;
        self.regs.f.c = carry;
    }

    /// BIT: Z set when the tested bit is clear; C preserved
    fn bit(&mut self, value: u8, bit: u8) {
        self.regs.f.z = value & (1 << bit) == 0;
        self.regs.f.n = false;
        self.regs.f.h = true;
    }
}
