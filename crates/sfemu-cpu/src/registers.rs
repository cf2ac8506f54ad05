use bitflags::bitflags;

bitflags! {
    /// Architecturally defined bits of the 8086 FLAGS register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u16 {
        const CF = 1 << 0;
        const PF = 1 << 2;
        const AF = 1 << 4;
        const ZF = 1 << 6;
        const SF = 1 << 7;
        const TF = 1 << 8;
        const IF = 1 << 9;
        const DF = 1 << 10;
        const OF = 1 << 11;
    }
}

impl Flags {
    /// Bits that read as 1 on an 8086 (bit 1 and the top nibble).
    pub const FIXED_ONES: u16 = 0xF002;

    /// The FLAGS word as PUSHF stores it.
    #[inline]
    pub fn to_word(self) -> u16 {
        self.bits() | Self::FIXED_ONES
    }

    #[inline]
    pub fn from_word(word: u16) -> Self {
        Self::from_bits_truncate(word)
    }
}

/// Segment registers in ModR/M `reg` field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegReg {
    Es = 0,
    Cs = 1,
    Ss = 2,
    Ds = 3,
}

impl SegReg {
    pub fn from_index(index: u8) -> Self {
        match index & 3 {
            0 => SegReg::Es,
            1 => SegReg::Cs,
            2 => SegReg::Ss,
            _ => SegReg::Ds,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SegReg::Es => "es",
            SegReg::Cs => "cs",
            SegReg::Ss => "ss",
            SegReg::Ds => "ds",
        }
    }
}

pub(crate) const REG16_NAMES: [&str; 8] = ["ax", "cx", "dx", "bx", "sp", "bp", "si", "di"];
pub(crate) const REG8_NAMES: [&str; 8] = ["al", "cl", "dl", "bl", "ah", "ch", "dh", "bh"];

/// The 8086 register file plus the retired-instruction and cycle counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registers {
    pub ax: u16,
    pub cx: u16,
    pub dx: u16,
    pub bx: u16,
    pub sp: u16,
    pub bp: u16,
    pub si: u16,
    pub di: u16,

    pub es: u16,
    pub cs: u16,
    pub ss: u16,
    pub ds: u16,

    pub ip: u16,
    pub flags: Flags,

    pub cycles: u64,
    pub instructions: u64,
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            ax: 0,
            cx: 0,
            dx: 0,
            bx: 0,
            sp: 0,
            bp: 0,
            si: 0,
            di: 0,
            es: 0,
            cs: 0,
            ss: 0,
            ds: 0,
            ip: 0,
            flags: Flags::empty(),
            cycles: 0,
            instructions: 0,
        }
    }
}

/// Fold a segment:offset pair into the 20-bit linear address space, wrapping at 1 MiB.
#[inline]
pub fn linear(seg: u16, off: u16) -> u32 {
    ((u32::from(seg) << 4) + u32::from(off)) & 0xF_FFFF
}

impl Registers {
    /// Register number as encoded in ModR/M (`ax cx dx bx sp bp si di`).
    pub fn reg16(&self, index: u8) -> u16 {
        match index & 7 {
            0 => self.ax,
            1 => self.cx,
            2 => self.dx,
            3 => self.bx,
            4 => self.sp,
            5 => self.bp,
            6 => self.si,
            _ => self.di,
        }
    }

    pub fn set_reg16(&mut self, index: u8, value: u16) {
        match index & 7 {
            0 => self.ax = value,
            1 => self.cx = value,
            2 => self.dx = value,
            3 => self.bx = value,
            4 => self.sp = value,
            5 => self.bp = value,
            6 => self.si = value,
            _ => self.di = value,
        }
    }

    /// Byte register number as encoded in ModR/M (`al cl dl bl ah ch dh bh`).
    pub fn reg8(&self, index: u8) -> u8 {
        let word = self.reg16(index & 3);
        if index & 4 == 0 {
            word as u8
        } else {
            (word >> 8) as u8
        }
    }

    pub fn set_reg8(&mut self, index: u8, value: u8) {
        let word = self.reg16(index & 3);
        let word = if index & 4 == 0 {
            (word & 0xFF00) | u16::from(value)
        } else {
            (word & 0x00FF) | (u16::from(value) << 8)
        };
        self.set_reg16(index & 3, word);
    }

    pub fn seg(&self, seg: SegReg) -> u16 {
        match seg {
            SegReg::Es => self.es,
            SegReg::Cs => self.cs,
            SegReg::Ss => self.ss,
            SegReg::Ds => self.ds,
        }
    }

    pub fn set_seg(&mut self, seg: SegReg, value: u16) {
        match seg {
            SegReg::Es => self.es = value,
            SegReg::Cs => self.cs = value,
            SegReg::Ss => self.ss = value,
            SegReg::Ds => self.ds = value,
        }
    }

    #[inline]
    pub fn al(&self) -> u8 {
        self.ax as u8
    }

    #[inline]
    pub fn set_al(&mut self, v: u8) {
        self.ax = (self.ax & 0xFF00) | u16::from(v);
    }

    #[inline]
    pub fn ah(&self) -> u8 {
        (self.ax >> 8) as u8
    }

    #[inline]
    pub fn set_ah(&mut self, v: u8) {
        self.ax = (self.ax & 0x00FF) | (u16::from(v) << 8);
    }

    #[inline]
    pub fn flag(&self, f: Flags) -> bool {
        self.flags.contains(f)
    }

    #[inline]
    pub fn set_flag(&mut self, f: Flags, on: bool) {
        self.flags.set(f, on);
    }

    /// Linear address of the next instruction (`CS:IP`).
    #[inline]
    pub fn pc(&self) -> u32 {
        linear(self.cs, self.ip)
    }

    /// Linear address of the top of stack (`SS:SP`).
    #[inline]
    pub fn stack_top(&self) -> u32 {
        linear(self.ss, self.sp)
    }

    /// Compare architectural state, ignoring the cycle and instruction counters.
    pub fn same_architectural_state(&self, other: &Registers) -> bool {
        let strip = |r: &Registers| Registers {
            cycles: 0,
            instructions: 0,
            ..*r
        };
        strip(self) == strip(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_registers_alias_word_halves() {
        let mut regs = Registers::default();
        regs.set_reg16(3, 0x1234);
        assert_eq!(regs.reg8(3), 0x34);
        assert_eq!(regs.reg8(7), 0x12);
        regs.set_reg8(7, 0xAB);
        assert_eq!(regs.bx, 0xAB34);
        regs.set_reg8(0, 0xFF);
        assert_eq!(regs.ax, 0x00FF);
    }

    #[test]
    fn linear_wraps_at_one_megabyte() {
        assert_eq!(linear(0xFFFF, 0x0010), 0x00000);
        assert_eq!(linear(0x1234, 0x0005), 0x12345);
    }

    #[test]
    fn flags_word_has_fixed_bits() {
        let flags = Flags::CF | Flags::ZF;
        assert_eq!(flags.to_word(), 0xF043);
        assert_eq!(Flags::from_word(0xFFFF).bits(), 0x0FD5);
    }
}
