use sfemu_debug::{disassemble, PauseReason, TraceBuffer, TraceEvent, TraceFilter};
use sfemu_mem::MemoryBus;

#[test]
fn trace_exports_tagged_json() {
    let mut trace = TraceBuffer::new(8);
    trace.enable(TraceFilter {
        include_instructions: true,
        ..TraceFilter::default()
    });

    let mut mem = MemoryBus::new();
    mem.map_ram(0, 0x200).unwrap();
    mem.load_image(0x100, &[0x90]).unwrap();
    for line in disassemble(&mem, 0x100, 1) {
        trace.record(TraceEvent::Instruction {
            addr: line.addr,
            cs: 0,
            ip: line.addr as u16,
            bytes: line.bytes,
            text: line.text,
        });
    }
    trace.record(TraceEvent::Hook {
        hook: "#0v0".into(),
        label: "halt".into(),
        trigger: "Fetch@0x00100".into(),
        access_addr: 0x100,
        verdict: "Halt".into(),
    });

    let json: serde_json::Value = serde_json::from_slice(&trace.export_json().unwrap()).unwrap();
    let events = json.as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["type"], "Instruction");
    assert_eq!(events[0]["text"], "nop");
    assert_eq!(events[0]["bytes"], serde_json::json!([0x90]));
    assert_eq!(events[1]["type"], "Hook");
    assert_eq!(events[1]["label"], "halt");

    let back: Vec<TraceEvent> = serde_json::from_value(json).unwrap();
    assert_eq!(back, trace.drain(usize::MAX));
}

#[test]
fn pause_reasons_serialize_with_a_type_tag() {
    let json = serde_json::to_value(PauseReason::Breakpoint { addr: 0x100 }).unwrap();
    assert_eq!(json, serde_json::json!({"type": "Breakpoint", "addr": 256}));
}
