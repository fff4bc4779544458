// Game Boy (DMG) emulator
//
// CPU: Sharp LR35902 at 4.194304 MHz
// Display: 160x144, 4 shades, background tile layer
//
// Runs one frame of emulation per window update and presents the PPU's
// shade buffer through a greyscale map. A single-step mode (Tab) pauses
// the machine and advances one frame per Space press, logging CPU state.

mod bus;
mod cartridge;
mod cpu;
mod emulator;
mod interrupts;
mod ppu;
mod timer;

use std::path::PathBuf;
use std::process;

use clap::Parser;
use minifb::{Key, KeyRepeat, Scale, Window, WindowOptions};

use cartridge::Cartridge;
use emulator::Emulator;
use ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};

/// Shade-id to RGB, light to dark
const SHADES: [u32; 4] = [0xFFFFFF, 0xCECECE, 0x7B7B7B, 0x000000];

#[derive(Parser)]
#[command(name = "dmg-emu", about = "Game Boy (DMG) emulator")]
struct Args {
    /// ROM file to run
    rom: PathBuf,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let cartridge = match Cartridge::from_file(&args.rom) {
        Ok(cartridge) => cartridge,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    let mut emu = Emulator::new(&cartridge);

    let mut window = match Window::new(
        "dmg-emu",
        SCREEN_WIDTH,
        SCREEN_HEIGHT,
        WindowOptions {
            scale: Scale::X4,
            ..WindowOptions::default()
        },
    ) {
        Ok(window) => window,
        Err(e) => {
            eprintln!("error: failed to open window: {}", e);
            process::exit(1);
        }
    };
    window.set_target_fps(60);

    let mut buffer = vec![0u32; SCREEN_WIDTH * SCREEN_HEIGHT];
    let mut single_step = false;
    let mut reported_halt = false;

    while window.is_open() && !window.is_key_down(Key::Escape) {
        if window.is_key_pressed(Key::Tab, KeyRepeat::No) {
            single_step = !single_step;
            log::info!(
                "single-step {}",
                if single_step { "on" } else { "off" }
            );
        }

        let advance = !single_step || window.is_key_pressed(Key::Space, KeyRepeat::No);

        if advance && !emu.cpu.halted {
            emu.run_frame();

            if single_step {
                log::debug!(
                    "PC {:#06x} SP {:#06x} AF {:#06x} BC {:#06x} DE {:#06x} HL {:#06x} IME {}",
                    emu.cpu.regs.pc,
                    emu.cpu.regs.sp,
                    emu.cpu.regs.af(),
                    emu.cpu.regs.bc(),
                    emu.cpu.regs.de(),
                    emu.cpu.regs.hl(),
                    emu.cpu.ime,
                );
            }
        }

        if emu.cpu.halted && !reported_halt {
            reported_halt = true;
            log::info!(
                "CPU halted at {:#06x} after {} cycles",
                emu.cpu.regs.pc,
                emu.cycles
            );
        }

        for (dst, &shade) in buffer.iter_mut().zip(emu.framebuffer()) {
            *dst = SHADES[shade as usize & 0x03];
        }

        if let Err(e) = window.update_with_buffer(&buffer, SCREEN_WIDTH, SCREEN_HEIGHT) {
            eprintln!("error: window update failed: {}", e);
            process::exit(1);
        }
    }
}
