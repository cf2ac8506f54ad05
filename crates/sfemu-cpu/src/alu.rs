use crate::decode::OpSize;
use crate::registers::Flags;

#[inline]
fn mask(size: OpSize) -> u32 {
    match size {
        OpSize::Byte => 0xFF,
        OpSize::Word => 0xFFFF,
    }
}

#[inline]
fn sign_bit(size: OpSize) -> u32 {
    match size {
        OpSize::Byte => 0x80,
        OpSize::Word => 0x8000,
    }
}

#[inline]
pub(crate) fn parity(byte: u8) -> bool {
    byte.count_ones() % 2 == 0
}

pub(crate) fn set_szp(flags: &mut Flags, result: u32, size: OpSize) {
    flags.set(Flags::ZF, result == 0);
    flags.set(Flags::SF, (result & sign_bit(size)) != 0);
    flags.set(Flags::PF, parity(result as u8));
}

pub fn add_with_flags(flags: &mut Flags, dest: u32, src: u32, carry_in: bool, size: OpSize) -> u32 {
    let m = mask(size);
    let dest = dest & m;
    let src = src & m;
    let full = dest + src + u32::from(carry_in);
    let result = full & m;

    let sb = sign_bit(size);
    flags.set(Flags::CF, full > m);
    flags.set(Flags::OF, ((dest ^ result) & (src ^ result) & sb) != 0);
    flags.set(Flags::AF, ((dest ^ src ^ result) & 0x10) != 0);
    set_szp(flags, result, size);
    result
}

pub fn sub_with_flags(flags: &mut Flags, dest: u32, src: u32, borrow_in: bool, size: OpSize) -> u32 {
    let m = mask(size);
    let dest = dest & m;
    let src = src & m;
    let subtrahend = src + u32::from(borrow_in);
    let result = dest.wrapping_sub(subtrahend) & m;

    let sb = sign_bit(size);
    flags.set(Flags::CF, dest < subtrahend);
    flags.set(Flags::OF, ((dest ^ src) & (dest ^ result) & sb) != 0);
    flags.set(Flags::AF, ((dest ^ src ^ result) & 0x10) != 0);
    set_szp(flags, result, size);
    result
}

pub fn logic_with_flags(flags: &mut Flags, result: u32, size: OpSize) -> u32 {
    let result = result & mask(size);
    flags.remove(Flags::CF | Flags::OF | Flags::AF);
    set_szp(flags, result, size);
    result
}

/// INC/DEC leave CF untouched.
pub fn inc_dec_with_flags(flags: &mut Flags, dest: u32, dec: bool, size: OpSize) -> u32 {
    let cf = flags.contains(Flags::CF);
    let result = if dec {
        sub_with_flags(flags, dest, 1, false, size)
    } else {
        add_with_flags(flags, dest, 1, false, size)
    };
    flags.set(Flags::CF, cf);
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    Add,
    Or,
    Adc,
    Sbb,
    And,
    Sub,
    Xor,
    Cmp,
}

impl AluOp {
    pub fn from_index(index: u8) -> Self {
        match index & 7 {
            0 => AluOp::Add,
            1 => AluOp::Or,
            2 => AluOp::Adc,
            3 => AluOp::Sbb,
            4 => AluOp::And,
            5 => AluOp::Sub,
            6 => AluOp::Xor,
            _ => AluOp::Cmp,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            AluOp::Add => "add",
            AluOp::Or => "or",
            AluOp::Adc => "adc",
            AluOp::Sbb => "sbb",
            AluOp::And => "and",
            AluOp::Sub => "sub",
            AluOp::Xor => "xor",
            AluOp::Cmp => "cmp",
        }
    }

    /// CMP computes flags only.
    pub fn writes_result(self) -> bool {
        self != AluOp::Cmp
    }
}

pub fn alu(flags: &mut Flags, op: AluOp, dest: u32, src: u32, size: OpSize) -> u32 {
    let cf = flags.contains(Flags::CF);
    match op {
        AluOp::Add => add_with_flags(flags, dest, src, false, size),
        AluOp::Adc => add_with_flags(flags, dest, src, cf, size),
        AluOp::Sub | AluOp::Cmp => sub_with_flags(flags, dest, src, false, size),
        AluOp::Sbb => sub_with_flags(flags, dest, src, cf, size),
        AluOp::Or => logic_with_flags(flags, dest | src, size),
        AluOp::And => logic_with_flags(flags, dest & src, size),
        AluOp::Xor => logic_with_flags(flags, dest ^ src, size),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftOp {
    Rol,
    Ror,
    Rcl,
    Rcr,
    Shl,
    Shr,
    Sar,
}

impl ShiftOp {
    pub fn from_index(index: u8) -> Option<Self> {
        match index & 7 {
            0 => Some(ShiftOp::Rol),
            1 => Some(ShiftOp::Ror),
            2 => Some(ShiftOp::Rcl),
            3 => Some(ShiftOp::Rcr),
            4 => Some(ShiftOp::Shl),
            5 => Some(ShiftOp::Shr),
            7 => Some(ShiftOp::Sar),
            _ => None,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            ShiftOp::Rol => "rol",
            ShiftOp::Ror => "ror",
            ShiftOp::Rcl => "rcl",
            ShiftOp::Rcr => "rcr",
            ShiftOp::Shl => "shl",
            ShiftOp::Shr => "shr",
            ShiftOp::Sar => "sar",
        }
    }
}

/// Shift or rotate by `count` single-bit steps. The 8086 does not mask the count.
pub fn shift_with_flags(flags: &mut Flags, op: ShiftOp, dest: u32, count: u8, size: OpSize) -> u32 {
    let m = mask(size);
    let sb = sign_bit(size);
    let mut value = dest & m;
    if count == 0 {
        return value;
    }

    for _ in 0..count {
        let cf = flags.contains(Flags::CF);
        let (next, carry) = match op {
            ShiftOp::Rol => {
                let out = value & sb != 0;
                (((value << 1) | u32::from(out)) & m, out)
            }
            ShiftOp::Ror => {
                let out = value & 1 != 0;
                ((value >> 1) | if out { sb } else { 0 }, out)
            }
            ShiftOp::Rcl => {
                let out = value & sb != 0;
                (((value << 1) | u32::from(cf)) & m, out)
            }
            ShiftOp::Rcr => {
                let out = value & 1 != 0;
                ((value >> 1) | if cf { sb } else { 0 }, out)
            }
            ShiftOp::Shl => ((value << 1) & m, value & sb != 0),
            ShiftOp::Shr => (value >> 1, value & 1 != 0),
            ShiftOp::Sar => ((value >> 1) | (value & sb), value & 1 != 0),
        };
        value = next;
        flags.set(Flags::CF, carry);
    }

    let msb = value & sb != 0;
    let cf = flags.contains(Flags::CF);
    let of = match op {
        ShiftOp::Rol | ShiftOp::Rcl | ShiftOp::Shl => msb != cf,
        ShiftOp::Ror | ShiftOp::Rcr => {
            let next = value & (sb >> 1) != 0;
            msb != next
        }
        ShiftOp::Shr => (dest & sb) != 0 && count == 1,
        ShiftOp::Sar => false,
    };
    flags.set(Flags::OF, of);

    if matches!(op, ShiftOp::Shl | ShiftOp::Shr | ShiftOp::Sar) {
        set_szp(flags, value, size);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_sets_carry_and_overflow() {
        let mut flags = Flags::empty();
        let r = add_with_flags(&mut flags, 0x7F, 0x01, false, OpSize::Byte);
        assert_eq!(r, 0x80);
        assert!(flags.contains(Flags::OF | Flags::SF | Flags::AF));
        assert!(!flags.contains(Flags::CF));

        let r = add_with_flags(&mut flags, 0xFFFF, 0x0001, false, OpSize::Word);
        assert_eq!(r, 0);
        assert!(flags.contains(Flags::CF | Flags::ZF | Flags::PF));
        assert!(!flags.contains(Flags::OF));
    }

    #[test]
    fn sbb_consumes_borrow() {
        let mut flags = Flags::CF;
        let r = alu(&mut flags, AluOp::Sbb, 0x10, 0x0F, OpSize::Byte);
        assert_eq!(r, 0);
        assert!(flags.contains(Flags::ZF));
        assert!(!flags.contains(Flags::CF));
    }

    #[test]
    fn inc_preserves_carry() {
        let mut flags = Flags::CF;
        let r = inc_dec_with_flags(&mut flags, 0xFF, false, OpSize::Byte);
        assert_eq!(r, 0);
        assert!(flags.contains(Flags::CF | Flags::ZF));
    }

    #[test]
    fn rotates_through_carry() {
        let mut flags = Flags::CF;
        let r = shift_with_flags(&mut flags, ShiftOp::Rcl, 0x80, 1, OpSize::Byte);
        assert_eq!(r, 0x01);
        assert!(flags.contains(Flags::CF));

        let mut flags = Flags::empty();
        let r = shift_with_flags(&mut flags, ShiftOp::Sar, 0x8000, 4, OpSize::Word);
        assert_eq!(r, 0xF800);
        assert!(flags.contains(Flags::SF));
    }

    #[test]
    fn shift_count_is_not_masked() {
        let mut flags = Flags::empty();
        let r = shift_with_flags(&mut flags, ShiftOp::Shl, 0xFFFF, 32, OpSize::Word);
        assert_eq!(r, 0);
        assert!(flags.contains(Flags::ZF));
    }
}
