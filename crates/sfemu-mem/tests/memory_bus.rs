use proptest::prelude::*;
use sfemu_mem::{MemoryBus, MemoryError, MmioDevice, RegionKind, RomWritePolicy, Width, WriteOutcome};
use std::any::Any;

/// Counts reads so tests can tell side-effecting accesses from peeks.
#[derive(Default)]
struct CountingMmio {
    reads: usize,
    writes: Vec<(u32, Vec<u8>)>,
}

impl MmioDevice for CountingMmio {
    fn read(&mut self, offset: u32, buf: &mut [u8]) {
        self.reads += 1;
        for (i, b) in buf.iter_mut().enumerate() {
            *b = (offset as u8).wrapping_add(i as u8);
        }
    }

    fn write(&mut self, offset: u32, data: &[u8]) {
        self.writes.push((offset, data.to_vec()));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn standard_bus() -> MemoryBus {
    let mut bus = MemoryBus::new();
    bus.map_ram(0x0000, 0x8000).unwrap();
    bus.map_rom(0x8000, vec![0xC3; 0x100]).unwrap();
    bus.map_mmio(0x9000, 0x40, Box::<CountingMmio>::default())
        .unwrap();
    bus
}

#[test]
fn byte_write_reads_back() {
    let mut bus = standard_bus();
    assert_eq!(bus.write_u8(0x1000, 0x42).unwrap(), WriteOutcome::Written);
    assert_eq!(bus.read_u8(0x1000).unwrap(), 0x42);
    assert_eq!(bus.read(0x1000, Width::Byte).unwrap().value(), 0x42);
}

#[test]
fn typed_accesses_are_little_endian() {
    let mut bus = standard_bus();
    bus.write_u32(0x200, 0x1122_3344).unwrap();
    let mut buf = [0u8; 4];
    bus.read_bytes(0x200, &mut buf).unwrap();
    assert_eq!(buf, [0x44, 0x33, 0x22, 0x11]);
    assert_eq!(bus.read_u16(0x202).unwrap(), 0x1122);
}

#[test]
fn regions_report_layout_in_address_order() {
    let bus = standard_bus();
    let kinds: Vec<_> = bus.regions().map(|r| (r.base, r.kind)).collect();
    assert_eq!(
        kinds,
        vec![
            (0x0000, RegionKind::Ram),
            (0x8000, RegionKind::Rom),
            (0x9000, RegionKind::Mmio),
        ]
    );
    assert_eq!(bus.region_at(0x8010).map(|r| r.kind), Some(RegionKind::Rom));
    assert_eq!(bus.region_at(0xA000), None);
}

#[test]
fn gap_between_regions_is_unmapped() {
    let mut bus = standard_bus();
    assert_eq!(
        bus.read_u8(0x8100),
        Err(MemoryError::OutOfBounds {
            addr: 0x8100,
            len: 1
        })
    );
    assert!(!bus.is_mapped(0x80FF, 2));
    assert!(bus.is_mapped(0x7FFF, 2));
}

#[test]
fn rom_write_under_fault_policy_is_an_error() {
    let mut bus = standard_bus();
    bus.set_rom_policy(RomWritePolicy::Fault);
    assert_eq!(
        bus.write_u16(0x8000, 0xFFFF),
        Err(MemoryError::ReadOnly {
            addr: 0x8000,
            len: 2
        })
    );
    assert_eq!(bus.read_u16(0x8000).unwrap(), 0xC3C3);
}

#[test]
fn peek_does_not_touch_devices() {
    let mut bus = standard_bus();
    let mut buf = [0u8; 4];
    bus.peek(0x9000, &mut buf).unwrap();
    assert_eq!(buf, [0xFF; 4]);
    assert_eq!(bus.device::<CountingMmio>(0x9000).unwrap().reads, 0);

    bus.read_bytes(0x9004, &mut buf).unwrap();
    assert_eq!(buf, [4, 5, 6, 7]);
    assert_eq!(bus.device::<CountingMmio>(0x9000).unwrap().reads, 1);
}

#[test]
fn writable_regions_skip_rom_and_mmio() {
    let bus = standard_bus();
    let infos: Vec<_> = bus.writable_regions().map(|(info, _)| info.base).collect();
    assert_eq!(infos, vec![0x0000]);
}

proptest! {
    #[test]
    fn ram_round_trips_arbitrary_writes(
        addr in 0u32..0x7F00,
        data in proptest::collection::vec(any::<u8>(), 1..64),
    ) {
        let mut bus = standard_bus();
        bus.write_bytes(addr, &data).unwrap();
        let mut out = vec![0u8; data.len()];
        bus.read_bytes(addr, &mut out).unwrap();
        prop_assert_eq!(out, data);
    }

    #[test]
    fn failed_writes_have_no_side_effects(
        addr in 0x7FC0u32..0x8000,
        len in 0x141usize..0x180,
    ) {
        // Every write here runs off the end of RAM into ROM and then into the unmapped gap.
        let mut bus = standard_bus();
        let before = bus.slice(0x7FC0, 0x40).unwrap().to_vec();
        prop_assert!(bus.write_bytes(addr, &vec![0x5A; len]).is_err());
        prop_assert_eq!(bus.slice(0x7FC0, 0x40).unwrap(), before.as_slice());
    }
}
