// Machine loop
//
// One iteration: execute an instruction, advance the timer and the LCD
// by the cycles it consumed, then poll for interrupts. Instruction
// effects are fully committed before the hardware steps; IF bits raised
// by the timer or the PPU are seen at the next instruction boundary.
//
// A frame is 70224 T-cycles (59.7 Hz). The halted state is terminal:
// once the CPU halts, the loop stops dispatching.

use crate::bus::Bus;
use crate::cartridge::Cartridge;
use crate::cpu::Cpu;

/// T-cycles per frame
pub const FRAME_CYCLES: u64 = 70_224;

/// The whole machine: CPU plus bus (which owns timer and PPU)
pub struct Emulator {
    pub cpu: Cpu,
    pub bus: Bus,
    /// Total T-cycles executed since power-on
    pub cycles: u64,
}

impl Emulator {
    /// Power on with a loaded cartridge
    pub fn new(cartridge: &Cartridge) -> Self {
        Self::with_rom(&cartridge.rom)
    }

    /// Power on with raw ROM bytes
    pub fn with_rom(rom: &[u8]) -> Self {
        let mut bus = Bus::new();
        bus.load_rom(rom);

        Self {
            cpu: Cpu::new(),
            bus,
            cycles: 0,
        }
    }

    /// Run one machine-loop iteration.
    /// Returns the T-cycles consumed.
    pub fn step(&mut self) -> u32 {
        let mut cycles = self.cpu.step(&mut self.bus);
        self.bus.tick(cycles);

        let service_cycles = self.cpu.service_interrupt(&mut self.bus);
        if service_cycles > 0 {
            self.bus.tick(service_cycles);
            cycles += service_cycles;
        }

        self.cycles += cycles as u64;
        cycles
    }

    /// Run one frame's worth of cycles, stopping early if the CPU halts
    pub fn run_frame(&mut self) {
        let target = self.cycles + FRAME_CYCLES;
        while self.cycles < target && !self.cpu.halted {
            self.step();
        }
    }

    /// Run until the CPU halts, up to `max_cycles`.
    /// Returns whether the CPU halted.
    pub fn run_until_halt(&mut self, max_cycles: u64) -> bool {
        while !self.cpu.halted && self.cycles < max_cycles {
            self.step();
        }
        self.cpu.halted
    }

    /// The PPU's rendered frame: 160x144 shades (0-3), row-major
    pub fn framebuffer(&self) -> &[u8] {
        self.bus.ppu.framebuffer()
    }

    /// Serial capture so far
    pub fn serial_output(&self) -> String {
        self.bus.serial_output()
    }
}
