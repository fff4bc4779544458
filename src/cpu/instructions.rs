// Primary opcode dispatch
//
// Fetch one byte at PC, dispatch on it, return the T-cycles consumed
// (1 M-cycle = 4 T-cycles). Immediates are read at PC and PC advances
// past them as part of each opcode's semantics. Conditional control
// transfers charge the taken cost when the condition holds, the untaken
// cost otherwise.
//
// The 11 opcodes the hardware never defined (0xD3, 0xDB, 0xDD, 0xE3,
// 0xE4, 0xEB, 0xEC, 0xED, 0xF4, 0xFC, 0xFD) halt the machine, as do
// HALT and STOP.

use super::Cpu;
use crate::bus::Bus;

impl Cpu {
    /// Fetch, decode and execute one instruction.
    /// Returns the number of T-cycles consumed.
    pub fn step(&mut self, bus: &mut Bus) -> u32 {
        if self.halted {
            return 4;
        }

        // EI takes effect after the instruction that follows it
        let ei_pending = self.ime_scheduled;

        let opcode = self.fetch(bus);
        let cycles = self.execute(bus, opcode);

        // DI in the delay slot cancels the pending enable
        if ei_pending && self.ime_scheduled {
            self.ime = true;
            self.ime_scheduled = false;
        }

        cycles
    }

    /// Read the byte at PC and advance PC
    fn fetch(&mut self, bus: &Bus) -> u8 {
        let byte = bus.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        byte
    }

    /// Read a little-endian 16-bit immediate at PC and advance PC by 2
    fn fetch16(&mut self, bus: &Bus) -> u16 {
        let lo = self.fetch(bus) as u16;
        let hi = self.fetch(bus) as u16;
        (hi << 8) | lo
    }

    fn execute(&mut self, bus: &mut Bus, opcode: u8) -> u32 {
        match opcode {
            // NOP
            0x00 => 4,

            // STOP: halt execution (the pad byte is still consumed)
            0x10 => {
                self.fetch(bus);
                self.halted = true;
                4
            }

            // HALT: halt execution
            0x76 => {
                self.halted = true;
                4
            }

            // ---- 8-bit loads ----

            // LD r, n
            0x06 => { self.regs.b = self.fetch(bus); 8 }
            0x0E => { self.regs.c = self.fetch(bus); 8 }
            0x16 => { self.regs.d = self.fetch(bus); 8 }
            0x1E => { self.regs.e = self.fetch(bus); 8 }
            0x26 => { self.regs.h = self.fetch(bus); 8 }
            0x2E => { self.regs.l = self.fetch(bus); 8 }
            0x3E => { self.regs.a = self.fetch(bus); 8 }

            // LD B, r
            0x40 => 4,
            0x41 => { self.regs.b = self.regs.c; 4 }
            0x42 => { self.regs.b = self.regs.d; 4 }
            0x43 => { self.regs.b = self.regs.e; 4 }
            0x44 => { self.regs.b = self.regs.h; 4 }
            0x45 => { self.regs.b = self.regs.l; 4 }
            0x46 => { self.regs.b = bus.read(self.regs.hl()); 8 }
            0x47 => { self.regs.b = self.regs.a; 4 }

            // LD C, r
            0x48 => { self.regs.c = self.regs.b; 4 }
            0x49 => 4,
            0x4A => { self.regs.c = self.regs.d; 4 }
            0x4B => { self.regs.c = self.regs.e; 4 }
            0x4C => { self.regs.c = self.regs.h; 4 }
            0x4D => { self.regs.c = self.regs.l; 4 }
            0x4E => { self.regs.c = bus.read(self.regs.hl()); 8 }
            0x4F => { self.regs.c = self.regs.a; 4 }

            // LD D, r
            0x50 => { self.regs.d = self.regs.b; 4 }
            0x51 => { self.regs.d = self.regs.c; 4 }
            0x52 => 4,
            0x53 => { self.regs.d = self.regs.e; 4 }
            0x54 => { self.regs.d = self.regs.h; 4 }
            0x55 => { self.regs.d = self.regs.l; 4 }
            0x56 => { self.regs.d = bus.read(self.regs.hl()); 8 }
            0x57 => { self.regs.d = self.regs.a; 4 }

            // LD E, r
            0x58 => { self.regs.e = self.regs.b; 4 }
            0x59 => { self.regs.e = self.regs.c; 4 }
            0x5A => { self.regs.e = self.regs.d; 4 }
            0x5B => 4,
            0x5C => { self.regs.e = self.regs.h; 4 }
            0x5D => { self.regs.e = self.regs.l; 4 }
            0x5E => { self.regs.e = bus.read(self.regs.hl()); 8 }
            0x5F => { self.regs.e = self.regs.a; 4 }

            // LD H, r
            0x60 => { self.regs.h = self.regs.b; 4 }
            0x61 => { self.regs.h = self.regs.c; 4 }
            0x62 => { self.regs.h = self.regs.d; 4 }
            0x63 => { self.regs.h = self.regs.e; 4 }
            0x64 => 4,
            0x65 => { self.regs.h = self.regs.l; 4 }
            0x66 => { self.regs.h = bus.read(self.regs.hl()); 8 }
            0x67 => { self.regs.h = self.regs.a; 4 }

            // LD L, r
            0x68 => { self.regs.l = self.regs.b; 4 }
            0x69 => { self.regs.l = self.regs.c; 4 }
            0x6A => { self.regs.l = self.regs.d; 4 }
            0x6B => { self.regs.l = self.regs.e; 4 }
            0x6C => { self.regs.l = self.regs.h; 4 }
            0x6D => 4,
            0x6E => { self.regs.l = bus.read(self.regs.hl()); 8 }
            0x6F => { self.regs.l = self.regs.a; 4 }

            // LD (HL), r
            0x70 => { bus.write(self.regs.hl(), self.regs.b); 8 }
            0x71 => { bus.write(self.regs.hl(), self.regs.c); 8 }
            0x72 => { bus.write(self.regs.hl(), self.regs.d); 8 }
            0x73 => { bus.write(self.regs.hl(), self.regs.e); 8 }
            0x74 => { bus.write(self.regs.hl(), self.regs.h); 8 }
            0x75 => { bus.write(self.regs.hl(), self.regs.l); 8 }
            0x77 => { bus.write(self.regs.hl(), self.regs.a); 8 }

            // LD A, r
            0x78 => { self.regs.a = self.regs.b; 4 }
            0x79 => { self.regs.a = self.regs.c; 4 }
            0x7A => { self.regs.a = self.regs.d; 4 }
            0x7B => { self.regs.a = self.regs.e; 4 }
            0x7C => { self.regs.a = self.regs.h; 4 }
            0x7D => { self.regs.a = self.regs.l; 4 }
            0x7E => { self.regs.a = bus.read(self.regs.hl()); 8 }
            0x7F => 4,

            // LD (HL), n
            0x36 => {
                let n = self.fetch(bus);
                bus.write(self.regs.hl(), n);
                12
            }

            // LD A <-> (BC)/(DE)
            0x02 => { bus.write(self.regs.bc(), self.regs.a); 8 }
            0x12 => { bus.write(self.regs.de(), self.regs.a); 8 }
            0x0A => { self.regs.a = bus.read(self.regs.bc()); 8 }
            0x1A => { self.regs.a = bus.read(self.regs.de()); 8 }

            // LD (HL+)/(HL-), A and the loads back
            0x22 => {
                bus.write(self.regs.hl(), self.regs.a);
                self.regs.set_hl(self.regs.hl().wrapping_add(1));
                8
            }
            0x32 => {
                bus.write(self.regs.hl(), self.regs.a);
                self.regs.set_hl(self.regs.hl().wrapping_sub(1));
                8
            }
            0x2A => {
                self.regs.a = bus.read(self.regs.hl());
                self.regs.set_hl(self.regs.hl().wrapping_add(1));
                8
            }
            0x3A => {
                self.regs.a = bus.read(self.regs.hl());
                self.regs.set_hl(self.regs.hl().wrapping_sub(1));
                8
            }

            // LD (nn), A / LD A, (nn)
            0xEA => {
                let addr = self.fetch16(bus);
                bus.write(addr, self.regs.a);
                16
            }
            0xFA => {
                let addr = self.fetch16(bus);
                self.regs.a = bus.read(addr);
                16
            }

            // LDH (n), A / LDH A, (n): 0xFF00-page access
            0xE0 => {
                let offset = self.fetch(bus) as u16;
                bus.write(0xFF00 + offset, self.regs.a);
                12
            }
            0xF0 => {
                let offset = self.fetch(bus) as u16;
                self.regs.a = bus.read(0xFF00 + offset);
                12
            }

            // LD (C), A / LD A, (C)
            0xE2 => { bus.write(0xFF00 + self.regs.c as u16, self.regs.a); 8 }
            0xF2 => { self.regs.a = bus.read(0xFF00 + self.regs.c as u16); 8 }

            // ---- 16-bit loads ----

            0x01 => { let v = self.fetch16(bus); self.regs.set_bc(v); 12 }
            0x11 => { let v = self.fetch16(bus); self.regs.set_de(v); 12 }
            0x21 => { let v = self.fetch16(bus); self.regs.set_hl(v); 12 }
            0x31 => { self.regs.sp = self.fetch16(bus); 12 }

            // LD (nn), SP
            0x08 => {
                let addr = self.fetch16(bus);
                bus.write16(addr, self.regs.sp);
                20
            }

            // LD SP, HL
            0xF9 => { self.regs.sp = self.regs.hl(); 8 }

            // LD HL, SP+e8
            0xF8 => {
                let offset = self.fetch(bus);
                let result = self.sp_plus_e8(offset);
                self.regs.set_hl(result);
                12
            }

            // PUSH / POP
            0xC5 => { self.push16(bus, self.regs.bc()); 16 }
            0xD5 => { self.push16(bus, self.regs.de()); 16 }
            0xE5 => { self.push16(bus, self.regs.hl()); 16 }
            0xF5 => { self.push16(bus, self.regs.af()); 16 }

            0xC1 => { let v = self.pop16(bus); self.regs.set_bc(v); 12 }
            0xD1 => { let v = self.pop16(bus); self.regs.set_de(v); 12 }
            0xE1 => { let v = self.pop16(bus); self.regs.set_hl(v); 12 }
            0xF1 => { let v = self.pop16(bus); self.regs.set_af(v); 12 }

            // ---- 8-bit arithmetic and logic ----

            0x80 => { self.add(self.regs.b); 4 }
            0x81 => { self.add(self.regs.c); 4 }
            0x82 => { self.add(self.regs.d); 4 }
            0x83 => { self.add(self.regs.e); 4 }
            0x84 => { self.add(self.regs.h); 4 }
            0x85 => { self.add(self.regs.l); 4 }
            0x86 => { self.add(bus.read(self.regs.hl())); 8 }
            0x87 => { self.add(self.regs.a); 4 }
            0xC6 => { let n = self.fetch(bus); self.add(n); 8 }

            0x88 => { self.adc(self.regs.b); 4 }
            0x89 => { self.adc(self.regs.c); 4 }
            0x8A => { self.adc(self.regs.d); 4 }
            0x8B => { self.adc(self.regs.e); 4 }
            0x8C => { self.adc(self.regs.h); 4 }
            0x8D => { self.adc(self.regs.l); 4 }
            0x8E => { self.adc(bus.read(self.regs.hl())); 8 }
            0x8F => { self.adc(self.regs.a); 4 }
            0xCE => { let n = self.fetch(bus); self.adc(n); 8 }

            0x90 => { self.sub(self.regs.b); 4 }
            0x91 => { self.sub(self.regs.c); 4 }
            0x92 => { self.sub(self.regs.d); 4 }
            0x93 => { self.sub(self.regs.e); 4 }
            0x94 => { self.sub(self.regs.h); 4 }
            0x95 => { self.sub(self.regs.l); 4 }
            0x96 => { self.sub(bus.read(self.regs.hl())); 8 }
            0x97 => { self.sub(self.regs.a); 4 }
            0xD6 => { let n = self.fetch(bus); self.sub(n); 8 }

            0x98 => { self.sbc(self.regs.b); 4 }
            0x99 => { self.sbc(self.regs.c); 4 }
            0x9A => { self.sbc(self.regs.d); 4 }
            0x9B => { self.sbc(self.regs.e); 4 }
            0x9C => { self.sbc(self.regs.h); 4 }
            0x9D => { self.sbc(self.regs.l); 4 }
            0x9E => { self.sbc(bus.read(self.regs.hl())); 8 }
            0x9F => { self.sbc(self.regs.a); 4 }
            0xDE => { let n = self.fetch(bus); self.sbc(n); 8 }

            0xA0 => { self.and(self.regs.b); 4 }
            0xA1 => { self.and(self.regs.c); 4 }
            0xA2 => { self.and(self.regs.d); 4 }
            0xA3 => { self.and(self.regs.e); 4 }
            0xA4 => { self.and(self.regs.h); 4 }
            0xA5 => { self.and(self.regs.l); 4 }
            0xA6 => { self.and(bus.read(self.regs.hl())); 8 }
            0xA7 => { self.and(self.regs.a); 4 }
            0xE6 => { let n = self.fetch(bus); self.and(n); 8 }

            0xA8 => { self.xor(self.regs.b); 4 }
            0xA9 => { self.xor(self.regs.c); 4 }
            0xAA => { self.xor(self.regs.d); 4 }
            0xAB => { self.xor(self.regs.e); 4 }
            0xAC => { self.xor(self.regs.h); 4 }
            0xAD => { self.xor(self.regs.l); 4 }
            0xAE => { self.xor(bus.read(self.regs.hl())); 8 }
            0xAF => { self.xor(self.regs.a); 4 }
            0xEE => { let n = self.fetch(bus); self.xor(n); 8 }

            0xB0 => { self.or(self.regs.b); 4 }
            0xB1 => { self.or(self.regs.c); 4 }
            0xB2 => { self.or(self.regs.d); 4 }
            0xB3 => { self.or(self.regs.e); 4 }
            0xB4 => { self.or(self.regs.h); 4 }
            0xB5 => { self.or(self.regs.l); 4 }
            0xB6 => { self.or(bus.read(self.regs.hl())); 8 }
            0xB7 => { self.or(self.regs.a); 4 }
            0xF6 => { let n = self.fetch(bus); self.or(n); 8 }

            0xB8 => { self.cp(self.regs.b); 4 }
            0xB9 => { self.cp(self.regs.c); 4 }
            0xBA => { self.cp(self.regs.d); 4 }
            0xBB => { self.cp(self.regs.e); 4 }
            0xBC => { self.cp(self.regs.h); 4 }
            0xBD => { self.cp(self.regs.l); 4 }
            0xBE => { self.cp(bus.read(self.regs.hl())); 8 }
            0xBF => { self.cp(self.regs.a); 4 }
            0xFE => { let n = self.fetch(bus); self.cp(n); 8 }

            // INC r / INC (HL)
            0x04 => { self.regs.b = self.inc(self.regs.b); 4 }
            0x0C => { self.regs.c = self.inc(self.regs.c); 4 }
            0x14 => { self.regs.d = self.inc(self.regs.d); 4 }
            0x1C => { self.regs.e = self.inc(self.regs.e); 4 }
            0x24 => { self.regs.h = self.inc(self.regs.h); 4 }
            0x2C => { self.regs.l = self.inc(self.regs.l); 4 }
            0x34 => {
                let v = self.inc(bus.read(self.regs.hl()));
                bus.write(self.regs.hl(), v);
                12
            }
            0x3C => { self.regs.a = self.inc(self.regs.a); 4 }

            // DEC r / DEC (HL)
            0x05 => { self.regs.b = self.dec(self.regs.b); 4 }
            0x0D => { self.regs.c = self.dec(self.regs.c); 4 }
            0x15 => { self.regs.d = self.dec(self.regs.d); 4 }
            0x1D => { self.regs.e = self.dec(self.regs.e); 4 }
            0x25 => { self.regs.h = self.dec(self.regs.h); 4 }
            0x2D => { self.regs.l = self.dec(self.regs.l); 4 }
            0x35 => {
                let v = self.dec(bus.read(self.regs.hl()));
                bus.write(self.regs.hl(), v);
                12
            }
            0x3D => { self.regs.a = self.dec(self.regs.a); 4 }

            // ---- 16-bit arithmetic ----

            0x03 => { self.regs.set_bc(self.regs.bc().wrapping_add(1)); 8 }
            0x13 => { self.regs.set_de(self.regs.de().wrapping_add(1)); 8 }
            0x23 => { self.regs.set_hl(self.regs.hl().wrapping_add(1)); 8 }
            0x33 => { self.regs.sp = self.regs.sp.wrapping_add(1); 8 }

            0x0B => { self.regs.set_bc(self.regs.bc().wrapping_sub(1)); 8 }
            0x1B => { self.regs.set_de(self.regs.de().wrapping_sub(1)); 8 }
            0x2B => { self.regs.set_hl(self.regs.hl().wrapping_sub(1)); 8 }
            0x3B => { self.regs.sp = self.regs.sp.wrapping_sub(1); 8 }

            0x09 => { self.add_hl(self.regs.bc()); 8 }
            0x19 => { self.add_hl(self.regs.de()); 8 }
            0x29 => { self.add_hl(self.regs.hl()); 8 }
            0x39 => { self.add_hl(self.regs.sp); 8 }

            // ADD SP, e8
            0xE8 => {
                let offset = self.fetch(bus);
                self.regs.sp = self.sp_plus_e8(offset);
                16
            }

            // ---- Rotates on A, and the accumulator misc group ----

            0x07 => { self.rlca(); 4 }
            0x0F => { self.rrca(); 4 }
            0x17 => { self.rla(); 4 }
            0x1F => { self.rra(); 4 }

            0x27 => { self.daa(); 4 }
            0x2F => { self.cpl(); 4 }
            0x37 => { self.scf(); 4 }
            0x3F => { self.ccf(); 4 }

            // ---- Jumps ----

            0xC3 => { self.regs.pc = self.fetch16(bus); 16 }
            0xE9 => { self.regs.pc = self.regs.hl(); 4 }

            0xC2 => {
                let addr = self.fetch16(bus);
                if !self.regs.f.z { self.regs.pc = addr; 16 } else { 12 }
            }
            0xCA => {
                let addr = self.fetch16(bus);
                if self.regs.f.z { self.regs.pc = addr; 16 } else { 12 }
            }
            0xD2 => {
                let addr = self.fetch16(bus);
                if !self.regs.f.c { self.regs.pc = addr; 16 } else { 12 }
            }
            0xDA => {
                let addr = self.fetch16(bus);
                if self.regs.f.c { self.regs.pc = addr; 16 } else { 12 }
            }

            // JR: signed offset relative to the next instruction
            0x18 => {
                let offset = self.fetch(bus) as i8;
                self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
                12
            }
            0x20 => {
                let offset = self.fetch(bus) as i8;
                if !self.regs.f.z {
                    self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
                    12
                } else {
                    8
                }
            }
            0x28 => {
                let offset = self.fetch(bus) as i8;
                if self.regs.f.z {
                    self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
                    12
                } else {
                    8
                }
            }
            0x30 => {
                let offset = self.fetch(bus) as i8;
                if !self.regs.f.c {
                    self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
                    12
                } else {
                    8
                }
            }
            0x38 => {
                let offset = self.fetch(bus) as i8;
                if self.regs.f.c {
                    self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
                    12
                } else {
                    8
                }
            }

            // ---- Calls and returns ----

            0xCD => {
                let addr = self.fetch16(bus);
                self.push16(bus, self.regs.pc);
                self.regs.pc = addr;
                24
            }
            0xC4 => {
                let addr = self.fetch16(bus);
                if !self.regs.f.z {
                    self.push16(bus, self.regs.pc);
                    self.regs.pc = addr;
                    24
                } else {
                    12
                }
            }
            0xCC => {
                let addr = self.fetch16(bus);
                if self.regs.f.z {
                    self.push16(bus, self.regs.pc);
                    self.regs.pc = addr;
                    24
                } else {
                    12
                }
            }
            0xD4 => {
                let addr = self.fetch16(bus);
                if !self.regs.f.c {
                    self.push16(bus, self.regs.pc);
                    self.regs.pc = addr;
                    24
                } else {
                    12
                }
            }
            0xDC => {
                let addr = self.fetch16(bus);
                if self.regs.f.c {
                    self.push16(bus, self.regs.pc);
                    self.regs.pc = addr;
                    24
                } else {
                    12
                }
            }

            0xC9 => { self.regs.pc = self.pop16(bus); 16 }
            0xD9 => {
                // RETI: return and enable interrupts immediately
                self.regs.pc = self.pop16(bus);
                self.ime = true;
                16
            }
            0xC0 => { if !self.regs.f.z { self.regs.pc = self.pop16(bus); 20 } else { 8 } }
            0xC8 => { if self.regs.f.z { self.regs.pc = self.pop16(bus); 20 } else { 8 } }
            0xD0 => { if !self.regs.f.c { self.regs.pc = self.pop16(bus); 20 } else { 8 } }
            0xD8 => { if self.regs.f.c { self.regs.pc = self.pop16(bus); 20 } else { 8 } }

            // RST: push PC and jump to the fixed vector
            0xC7 => { self.rst(bus, 0x00); 16 }
            0xCF => { self.rst(bus, 0x08); 16 }
            0xD7 => { self.rst(bus, 0x10); 16 }
            0xDF => { self.rst(bus, 0x18); 16 }
            0xE7 => { self.rst(bus, 0x20); 16 }
            0xEF => { self.rst(bus, 0x28); 16 }
            0xF7 => { self.rst(bus, 0x30); 16 }
            0xFF => { self.rst(bus, 0x38); 16 }

            // ---- Interrupt control ----

            0xF3 => {
                self.ime = false;
                self.ime_scheduled = false;
                4
            }
            0xFB => {
                self.ime_scheduled = true;
                4
            }

            // ---- CB prefix ----

            0xCB => {
                let cb_opcode = self.fetch(bus);
                self.execute_cb(bus, cb_opcode)
            }

            // ---- Illegal opcodes: halt the machine ----

            0xD3 | 0xDB | 0xDD | 0xE3 | 0xE4 | 0xEB | 0xEC | 0xED | 0xF4 | 0xFC | 0xFD => {
                log::warn!(
                    "illegal opcode {:#04x} at {:#06x}, halting",
                    opcode,
                    self.regs.pc.wrapping_sub(1)
                );
                self.halted = true;
                4
            }
        }
    }

    // ---- ALU helpers ----

    fn inc(&mut self, value: u8) -> u8 {
        let result = value.wrapping_add(1);
        self.regs.f.z = result == 0;
        self.regs.f.n = false;
        self.regs.f.h = (value & 0x0F) == 0x0F;
        // C preserved
        result
    }

    fn dec(&mut self, value: u8) -> u8 {
        let result = value.wrapping_sub(1);
        self.regs.f.z = result == 0;
        self.regs.f.n = true;
        self.regs.f.h = (value & 0x0F) == 0;
        // C preserved
        result
    }

    fn add(&mut self, value: u8) {
        let (result, carry) = self.regs.a.overflowing_add(value);
        self.regs.f.z = result == 0;
        self.regs.f.n = false;
        self.regs.f.h = (self.regs.a & 0x0F) + (value & 0x0F) > 0x0F;
        self.regs.f.c = carry;
        self.regs.a = result;
    }

    fn adc(&mut self, value: u8) {
        let carry = self.regs.f.c as u8;
        let result = self.regs.a.wrapping_add(value).wrapping_add(carry);
        self.regs.f.z = result == 0;
        self.regs.f.n = false;
        self.regs.f.h = (self.regs.a & 0x0F) + (value & 0x0F) + carry > 0x0F;
        self.regs.f.c = self.regs.a as u16 + value as u16 + carry as u16 > 0xFF;
        self.regs.a = result;
    }

    fn sub(&mut self, value: u8) {
        let (result, borrow) = self.regs.a.overflowing_sub(value);
        self.regs.f.z = result == 0;
        self.regs.f.n = true;
        self.regs.f.h = (self.regs.a & 0x0F) < (value & 0x0F);
        self.regs.f.c = borrow;
        self.regs.a = result;
    }

    fn sbc(&mut self, value: u8) {
        let carry = self.regs.f.c as u8;
        let result = self.regs.a.wrapping_sub(value).wrapping_sub(carry);
        self.regs.f.z = result == 0;
        self.regs.f.n = true;
        self.regs.f.h = (self.regs.a & 0x0F) < (value & 0x0F) + carry;
        self.regs.f.c = (self.regs.a as u16) < value as u16 + carry as u16;
        self.regs.a = result;
    }

    fn and(&mut self, value: u8) {
        self.regs.a &= value;
        self.regs.f.z = self.regs.a == 0;
        self.regs.f.n = false;
        self.regs.f.h = true;
        self.regs.f.c = false;
    }

    fn xor(&mut self, value: u8) {
        self.regs.a ^= value;
        self.regs.f.z = self.regs.a == 0;
        self.regs.f.n = false;
        self.regs.f.h = false;
        self.regs.f.c = false;
    }

    fn or(&mut self, value: u8) {
        self.regs.a |= value;
        self.regs.f.z = self.regs.a == 0;
        self.regs.f.n = false;
        self.regs.f.h = false;
        self.regs.f.c = false;
    }

    /// CP: SUB flags without writing A
    fn cp(&mut self, value: u8) {
        let result = self.regs.a.wrapping_sub(value);
        self.regs.f.z = result == 0;
        self.regs.f.n = true;
        self.regs.f.h = (self.regs.a & 0x0F) < (value & 0x0F);
        self.regs.f.c = self.regs.a < value;
    }

    /// ADD HL, rr: H and C from bits 11 and 15, Z preserved
    fn add_hl(&mut self, value: u16) {
        let hl = self.regs.hl();
        let (result, carry) = hl.overflowing_add(value);
        self.regs.f.n = false;
        self.regs.f.h = (hl & 0x0FFF) + (value & 0x0FFF) > 0x0FFF;
        self.regs.f.c = carry;
        self.regs.set_hl(result);
    }

    /// SP + signed byte, H and C from the low-byte add, Z cleared
    fn sp_plus_e8(&mut self, offset: u8) -> u16 {
        let off = offset as i8 as i16 as u16;
        let sp = self.regs.sp;
        self.regs.f.z = false;
        self.regs.f.n = false;
        self.regs.f.h = (sp & 0x000F) + (off & 0x000F) > 0x000F;
        self.regs.f.c = (sp & 0x00FF) + (off & 0x00FF) > 0x00FF;
        sp.wrapping_add(off)
    }

    // ---- Stack ----

    /// Decrement SP and store the high byte, then the low byte
    pub(crate) fn push16(&mut self, bus: &mut Bus, value: u16) {
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        bus.write(self.regs.sp, (value >> 8) as u8);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        bus.write(self.regs.sp, value as u8);
    }

    /// Read low at SP, high at SP+1, increment SP by 2
    pub(crate) fn pop16(&mut self, bus: &Bus) -> u16 {
        let lo = bus.read(self.regs.sp) as u16;
        let hi = bus.read(self.regs.sp.wrapping_add(1)) as u16;
        self.regs.sp = self.regs.sp.wrapping_add(2);
        (hi << 8) | lo
    }

    fn rst(&mut self, bus: &mut Bus, vector: u16) {
        self.push16(bus, self.regs.pc);
        self.regs.pc = vector;
    }

    // ---- Rotates on A (Z always cleared, unlike the CB forms) ----

    fn rlca(&mut self) {
        let carry = self.regs.a >> 7;
        self.regs.a = (self.regs.a << 1) | carry;
        self.regs.f.z = false;
        self.regs.f.n = false;
        self.regs.f.h = false;
        self.regs.f.c = carry != 0;
    }

    fn rrca(&mut self) {
        let carry = self.regs.a & 1;
        self.regs.a = (self.regs.a >> 1) | (carry << 7);
        self.regs.f.z = false;
        self.regs.f.n = false;
        self.regs.f.h = false;
        self.regs.f.c = carry != 0;
    }

    fn rla(&mut self) {
        let old_carry = self.regs.f.c as u8;
        let new_carry = self.regs.a >> 7;
        self.regs.a = (self.regs.a << 1) | old_carry;
        self.regs.f.z = false;
        self.regs.f.n = false;
        self.regs.f.h = false;
        self.regs.f.c = new_carry != 0;
    }

    fn rra(&mut self) {
        let old_carry = (self.regs.f.c as u8) << 7;
        let new_carry = self.regs.a & 1;
        self.regs.a = (self.regs.a >> 1) | old_carry;
        self.regs.f.z = false;
        self.regs.f.n = false;
        self.regs.f.h = false;
        self.regs.f.c = new_carry != 0;
    }

    // ---- Accumulator misc ----

    /// DAA: adjust A to packed BCD after an ADD or SUB
    fn daa(&mut self) {
        let mut adjust = 0u8;

        if self.regs.f.n {
            if self.regs.f.c {
                adjust |= 0x60;
            }
            if self.regs.f.h {
                adjust |= 0x06;
            }
            self.regs.a = self.regs.a.wrapping_sub(adjust);
        } else {
            if self.regs.f.c || self.regs.a > 0x99 {
                adjust |= 0x60;
                self.regs.f.c = true;
            }
            if self.regs.f.h || (self.regs.a & 0x0F) > 0x09 {
                adjust |= 0x06;
            }
            self.regs.a = self.regs.a.wrapping_add(adjust);
        }

        self.regs.f.z = self.regs.a == 0;
        self.regs.f.h = false;
    }

    fn cpl(&mut self) {
        self.regs.a = !self.regs.a;
        self.regs.f.n = true;
        self.regs.f.h = true;
    }

    fn scf(&mut self) {
        self.regs.f.n = false;
        self.regs.f.h = false;
        self.regs.f.c = true;
    }

    fn ccf(&mut self) {
        self.regs.f.n = false;
        self.regs.f.h = false;
        self.regs.f.c = !self.regs.f.c;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Cpu, Bus) {
        let mut cpu = Cpu::new();
        cpu.regs.pc = 0xC000; // run test programs from WRAM
        (cpu, Bus::new())
    }

    fn load(bus: &mut Bus, program: &[u8]) {
        for (i, byte) in program.iter().enumerate() {
            bus.write(0xC000 + i as u16, *byte);
        }
    }

    #[test]
    fn nop_advances_pc() {
        let (mut cpu, mut bus) = setup();
        load(&mut bus, &[0x00]);

        assert_eq!(cpu.step(&mut bus), 4);
        assert_eq!(cpu.regs.pc, 0xC001);
    }

    #[test]
    fn add_half_carry() {
        // A=0x3A + B=0x0F: H set, nothing else
        let (mut cpu, mut bus) = setup();
        cpu.regs.a = 0x3A;
        cpu.regs.b = 0x0F;
        cpu.regs.f.from_byte(0);
        load(&mut bus, &[0x80]);

        cpu.step(&mut bus);

        assert_eq!(cpu.regs.a, 0x49);
        assert_eq!(cpu.regs.f.to_byte(), 0x20);
    }

    #[test]
    fn sub_borrow() {
        // A=0x00 - B=0x01: N, H, C all set
        let (mut cpu, mut bus) = setup();
        cpu.regs.a = 0x00;
        cpu.regs.b = 0x01;
        cpu.regs.f.from_byte(0);
        load(&mut bus, &[0x90]);

        cpu.step(&mut bus);

        assert_eq!(cpu.regs.a, 0xFF);
        assert_eq!(cpu.regs.f.to_byte(), 0x70);
    }

    #[test]
    fn adc_uses_carry_in() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.a = 0xFE;
        cpu.regs.c = 0x01;
        cpu.regs.f.c = true;
        load(&mut bus, &[0x89]); // ADC A, C

        cpu.step(&mut bus);

        assert_eq!(cpu.regs.a, 0x00);
        assert!(cpu.regs.f.z);
        assert!(cpu.regs.f.c);
        assert!(cpu.regs.f.h);
    }

    #[test]
    fn cp_leaves_a_alone() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.a = 0x42;
        cpu.regs.b = 0x42;
        load(&mut bus, &[0xB8]);

        cpu.step(&mut bus);

        assert_eq!(cpu.regs.a, 0x42);
        assert!(cpu.regs.f.z);
        assert!(cpu.regs.f.n);
    }

    #[test]
    fn inc_dec_preserve_carry() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.b = 0x0F;
        cpu.regs.f.c = true;
        load(&mut bus, &[0x04, 0x05]); // INC B, DEC B

        cpu.step(&mut bus);
        assert_eq!(cpu.regs.b, 0x10);
        assert!(cpu.regs.f.h);
        assert!(cpu.regs.f.c);

        cpu.step(&mut bus);
        assert_eq!(cpu.regs.b, 0x0F);
        assert!(cpu.regs.f.n);
        assert!(cpu.regs.f.c);
    }

    #[test]
    fn add_hl_flags_from_high_bits() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.set_hl(0x0FFF);
        cpu.regs.set_bc(0x0001);
        cpu.regs.f.z = true;
        load(&mut bus, &[0x09]); // ADD HL, BC

        cpu.step(&mut bus);

        assert_eq!(cpu.regs.hl(), 0x1000);
        assert!(cpu.regs.f.h);
        assert!(!cpu.regs.f.c);
        assert!(cpu.regs.f.z); // Z preserved
    }

    #[test]
    fn add_sp_e8_flags_from_low_byte() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.sp = 0xFFF8;
        load(&mut bus, &[0xE8, 0x08]); // ADD SP, +8

        let cycles = cpu.step(&mut bus);

        assert_eq!(cycles, 16);
        assert_eq!(cpu.regs.sp, 0x0000);
        assert!(!cpu.regs.f.z); // Z always cleared
        assert!(cpu.regs.f.h);
        assert!(cpu.regs.f.c);
    }

    #[test]
    fn ld_hl_sp_plus_negative_offset() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.sp = 0xFFFE;
        load(&mut bus, &[0xF8, 0xFE]); // LD HL, SP-2

        let cycles = cpu.step(&mut bus);

        assert_eq!(cycles, 12);
        assert_eq!(cpu.regs.hl(), 0xFFFC);
        assert_eq!(cpu.regs.sp, 0xFFFE);
    }

    #[test]
    fn jr_not_taken_charges_untaken_cost() {
        // PC=0x0150 in ROM: JR Z with Z clear falls through past the
        // immediate at the 8-cycle cost
        let mut cpu = Cpu::new();
        let mut bus = Bus::new();
        let mut rom = vec![0u8; 0x8000];
        rom[0x0150] = 0x28;
        rom[0x0151] = 0x05;
        bus.load_rom(&rom);
        cpu.regs.pc = 0x0150;
        cpu.regs.f.z = false;

        let cycles = cpu.step(&mut bus);

        assert_eq!(cycles, 8);
        assert_eq!(cpu.regs.pc, 0x0152);
    }

    #[test]
    fn jr_taken_is_relative_to_next_instruction() {
        let (mut cpu, mut bus) = setup();
        load(&mut bus, &[0x18, 0xFE]); // JR -2: back onto itself

        let cycles = cpu.step(&mut bus);

        assert_eq!(cycles, 12);
        assert_eq!(cpu.regs.pc, 0xC000);
    }

    #[test]
    fn push_pop_round_trip() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.sp = 0xFFFE;
        cpu.regs.set_bc(0x1234);
        load(&mut bus, &[0xC5, 0xD1]); // PUSH BC; POP DE

        cpu.step(&mut bus);
        assert_eq!(cpu.regs.sp, 0xFFFC);
        assert_eq!(bus.read(0xFFFC), 0x34);
        assert_eq!(bus.read(0xFFFD), 0x12);

        cpu.step(&mut bus);
        assert_eq!(cpu.regs.de(), 0x1234);
        assert_eq!(cpu.regs.sp, 0xFFFE);
    }

    #[test]
    fn pop_af_masks_flag_low_nibble() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.sp = 0xFFFC;
        bus.write16(0xFFFC, 0x12FF);
        load(&mut bus, &[0xF1]); // POP AF

        cpu.step(&mut bus);

        assert_eq!(cpu.regs.af(), 0x12F0);
    }

    #[test]
    fn call_and_ret() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.sp = 0xFFFE;
        load(&mut bus, &[0xCD, 0x00, 0xC1]); // CALL 0xC100
        bus.write(0xC100, 0xC9); // RET

        assert_eq!(cpu.step(&mut bus), 24);
        assert_eq!(cpu.regs.pc, 0xC100);
        assert_eq!(bus.read16(0xFFFC), 0xC003);

        assert_eq!(cpu.step(&mut bus), 16);
        assert_eq!(cpu.regs.pc, 0xC003);
        assert_eq!(cpu.regs.sp, 0xFFFE);
    }

    #[test]
    fn conditional_call_untaken() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.f.z = false;
        load(&mut bus, &[0xCC, 0x00, 0xC1]); // CALL Z

        assert_eq!(cpu.step(&mut bus), 12);
        assert_eq!(cpu.regs.pc, 0xC003);
        assert_eq!(cpu.regs.sp, 0xFFFE);
    }

    #[test]
    fn conditional_ret_costs() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.sp = 0xFFFC;
        bus.write16(0xFFFC, 0xC200);
        cpu.regs.f.c = true;
        load(&mut bus, &[0xD8]); // RET C, taken

        assert_eq!(cpu.step(&mut bus), 20);
        assert_eq!(cpu.regs.pc, 0xC200);

        // Untaken path
        let (mut cpu, mut bus) = setup();
        cpu.regs.f.c = false;
        load(&mut bus, &[0xD8]);
        assert_eq!(cpu.step(&mut bus), 8);
        assert_eq!(cpu.regs.pc, 0xC001);
    }

    #[test]
    fn rst_pushes_and_vectors() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.sp = 0xFFFE;
        load(&mut bus, &[0xEF]); // RST 28H

        assert_eq!(cpu.step(&mut bus), 16);
        assert_eq!(cpu.regs.pc, 0x0028);
        assert_eq!(bus.read16(0xFFFC), 0xC001);
    }

    #[test]
    fn jp_hl() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.set_hl(0xC123);
        load(&mut bus, &[0xE9]);

        assert_eq!(cpu.step(&mut bus), 4);
        assert_eq!(cpu.regs.pc, 0xC123);
    }

    #[test]
    fn ldh_accesses_the_ff00_page() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.a = 0x5A;
        load(&mut bus, &[0xE0, 0x80, 0xF0, 0x80]); // LDH (0x80),A; LDH A,(0x80)

        cpu.step(&mut bus);
        assert_eq!(bus.read(0xFF80), 0x5A);

        cpu.regs.a = 0;
        cpu.step(&mut bus);
        assert_eq!(cpu.regs.a, 0x5A);
    }

    #[test]
    fn hl_postincrement_loads() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.a = 0x77;
        cpu.regs.set_hl(0xC100);
        load(&mut bus, &[0x22, 0x3A]); // LD (HL+),A; LD A,(HL-)

        cpu.step(&mut bus);
        assert_eq!(bus.read(0xC100), 0x77);
        assert_eq!(cpu.regs.hl(), 0xC101);

        cpu.step(&mut bus);
        assert_eq!(cpu.regs.a, bus.read(0xC101));
        assert_eq!(cpu.regs.hl(), 0xC100);
    }

    #[test]
    fn daa_after_bcd_add() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.a = 0x45;
        cpu.regs.b = 0x38;
        load(&mut bus, &[0x80, 0x27]); // ADD A,B; DAA

        cpu.step(&mut bus);
        assert_eq!(cpu.regs.a, 0x7D);

        cpu.step(&mut bus);
        assert_eq!(cpu.regs.a, 0x83);
        assert!(!cpu.regs.f.c);
    }

    #[test]
    fn scf_ccf_cpl() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.a = 0x0F;
        cpu.regs.f.z = true;
        load(&mut bus, &[0x37, 0x3F, 0x2F]); // SCF; CCF; CPL

        cpu.step(&mut bus);
        assert!(cpu.regs.f.c && !cpu.regs.f.n && !cpu.regs.f.h);
        assert!(cpu.regs.f.z); // Z preserved

        cpu.step(&mut bus);
        assert!(!cpu.regs.f.c);

        cpu.step(&mut bus);
        assert_eq!(cpu.regs.a, 0xF0);
        assert!(cpu.regs.f.n && cpu.regs.f.h);
    }

    #[test]
    fn rotate_a_clears_z() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.a = 0x85;
        cpu.regs.f.z = true;
        load(&mut bus, &[0x07]); // RLCA

        cpu.step(&mut bus);

        assert_eq!(cpu.regs.a, 0x0B);
        assert!(cpu.regs.f.c);
        assert!(!cpu.regs.f.z);
    }

    #[test]
    fn rra_through_carry() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.a = 0x01;
        cpu.regs.f.c = false;
        load(&mut bus, &[0x1F]); // RRA

        cpu.step(&mut bus);

        assert_eq!(cpu.regs.a, 0x00);
        assert!(cpu.regs.f.c);
        assert!(!cpu.regs.f.z); // Z cleared even on zero result
    }

    #[test]
    fn halt_is_terminal() {
        let (mut cpu, mut bus) = setup();
        load(&mut bus, &[0x76, 0x00]);

        cpu.step(&mut bus);
        assert!(cpu.halted);
        let pc = cpu.regs.pc;

        // Further steps idle without fetching
        cpu.step(&mut bus);
        assert_eq!(cpu.regs.pc, pc);
    }

    #[test]
    fn stop_consumes_pad_byte_and_halts() {
        let (mut cpu, mut bus) = setup();
        load(&mut bus, &[0x10, 0x00]);

        cpu.step(&mut bus);

        assert!(cpu.halted);
        assert_eq!(cpu.regs.pc, 0xC002);
    }

    #[test]
    fn illegal_opcode_halts() {
        let (mut cpu, mut bus) = setup();
        load(&mut bus, &[0xD3]);

        cpu.step(&mut bus);

        assert!(cpu.halted);
    }

    #[test]
    fn ei_enables_after_next_instruction() {
        let (mut cpu, mut bus) = setup();
        cpu.ime = false;
        load(&mut bus, &[0xFB, 0x00, 0x00]); // EI; NOP; NOP

        cpu.step(&mut bus);
        assert!(!cpu.ime);

        cpu.step(&mut bus);
        assert!(cpu.ime);
    }

    #[test]
    fn di_cancels_pending_ei() {
        let (mut cpu, mut bus) = setup();
        cpu.ime = false;
        load(&mut bus, &[0xFB, 0xF3, 0x00]); // EI; DI; NOP

        cpu.step(&mut bus);
        cpu.step(&mut bus);
        cpu.step(&mut bus);

        assert!(!cpu.ime);
    }

    #[test]
    fn ld_nn_sp_stores_little_endian() {
        let (mut cpu, mut bus) = setup();
        cpu.regs.sp = 0xBEEF;
        load(&mut bus, &[0x08, 0x00, 0xC2]); // LD (0xC200), SP

        assert_eq!(cpu.step(&mut bus), 20);
        assert_eq!(bus.read16(0xC200), 0xBEEF);
    }
}
