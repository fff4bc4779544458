// Interrupt sources
//
// Five sources share the IF (0xFF0F) and IE (0xFFFF) registers, one bit
// each, with a fixed service vector per source:
//
// | Bit | Source   | Vector | Priority |
// |-----|----------|--------|----------|
// |  0  | VBlank   | 0x0040 | highest  |
// |  1  | LCD STAT | 0x0048 |          |
// |  2  | Timer    | 0x0050 |          |
// |  3  | Serial   | 0x0058 |          |
// |  4  | Joypad   | 0x0060 | lowest   |
//
// IME is a CPU-internal latch (EI/DI), separate from IE. Servicing an
// interrupt clears IME and the source's IF bit, pushes PC, and jumps to
// the vector. At most one interrupt is serviced per poll; the lowest set
// bit wins.

/// IF/IE bit masks
pub const VBLANK: u8 = 1 << 0;
pub const LCD_STAT: u8 = 1 << 1;
pub const TIMER: u8 = 1 << 2;
pub const SERIAL: u8 = 1 << 3;
pub const JOYPAD: u8 = 1 << 4;

/// Only bits 0-4 are interrupt sources
pub const SOURCE_MASK: u8 = 0x1F;

pub const VBLANK_VECTOR: u16 = 0x0040;
pub const LCD_STAT_VECTOR: u16 = 0x0048;
pub const TIMER_VECTOR: u16 = 0x0050;
pub const SERIAL_VECTOR: u16 = 0x0058;
pub const JOYPAD_VECTOR: u16 = 0x0060;

/// Pick the highest-priority pending interrupt from IE and IF.
/// Returns the vector and the IF bit to clear.
pub fn highest_priority(ie: u8, if_reg: u8) -> Option<(u16, u8)> {
    let pending = ie & if_reg & SOURCE_MASK;

    if pending & VBLANK != 0 {
        Some((VBLANK_VECTOR, VBLANK))
    } else if pending & LCD_STAT != 0 {
        Some((LCD_STAT_VECTOR, LCD_STAT))
    } else if pending & TIMER != 0 {
        Some((TIMER_VECTOR, TIMER))
    } else if pending & SERIAL != 0 {
        Some((SERIAL_VECTOR, SERIAL))
    } else if pending & JOYPAD != 0 {
        Some((JOYPAD_VECTOR, JOYPAD))
    } else {
        None
    }
}
