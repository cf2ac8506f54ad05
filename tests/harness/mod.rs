#![allow(dead_code)]

use std::sync::Once;

use sfemu::speech::VoiceModel;
use sfemu::{Machine, MachineConfig};

/// Route `tracing` output through the test harness so it only shows for failing tests.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// A machine with the default memory map and `code` loaded as a `.COM` image at `0000:0100`.
pub fn com_machine(code: &[u8]) -> Machine {
    com_machine_with(MachineConfig::default(), code)
}

pub fn com_machine_with(config: MachineConfig, code: &[u8]) -> Machine {
    init_tracing();
    let mut machine = Machine::new(config, VoiceModel::standard()).expect("machine");
    machine.load_com(code).expect("load .COM image");
    machine
}

/// Every writable byte, in address order.
pub fn ram_image(machine: &Machine) -> Vec<u8> {
    machine
        .memory()
        .writable_regions()
        .flat_map(|(_, bytes)| bytes.iter().copied())
        .collect()
}
