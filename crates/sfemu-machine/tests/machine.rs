use std::cell::RefCell;
use std::rc::Rc;

use sfemu_cpu::CpuFault;
use sfemu_debug::{PauseReason, TraceEvent, TraceFilter};
use sfemu_machine::{
    scan_code, DecodeFaultPolicy, Key, Machine, MachineConfig, MachineError, RegionConfig,
    RomWrites, SpeechBuffer, SpeechConfig, StopReason, VoiceSource, Warning, EGA_PALETTE,
};
use sfemu_mem::MemoryError;
use sfemu_patch::{Hook, HookAction, Trigger, Verdict};
use sfemu_speech::{CodecKind, SpeechError, VoiceModel, VoiceParams};

fn machine_with(config: MachineConfig, code: &[u8]) -> Machine {
    let mut m = Machine::new(config, VoiceModel::standard()).unwrap();
    m.load_com(code).unwrap();
    m
}

fn machine(code: &[u8]) -> Machine {
    machine_with(MachineConfig::default(), code)
}

#[test]
fn runs_until_hlt() {
    // mov ax, 1; inc ax; hlt
    let mut m = machine(&[0xB8, 0x01, 0x00, 0x40, 0xF4]);
    let summary = m.step(100);
    assert_eq!(summary.stop, StopReason::Halted);
    assert_eq!(summary.executed, 3);
    assert!(summary.cycles > 0);
    assert!(summary.warnings.is_empty());
    assert_eq!(m.cpu().regs().ax, 2);

    let again = m.step(100);
    assert_eq!(again.stop, StopReason::Halted);
    assert_eq!(again.executed, 0);
}

#[test]
fn step_budget_is_honored() {
    // nop x4
    let mut m = machine(&[0x90; 4]);
    let summary = m.step(3);
    assert_eq!(summary.stop, StopReason::Completed);
    assert_eq!(summary.executed, 3);
    assert_eq!(m.cpu().regs().ip, 0x103);
}

#[test]
fn decode_fault_halts_by_default() {
    // 0x0f is undefined here; inc ax; hlt
    let mut m = machine(&[0x0F, 0x40, 0xF4]);
    let summary = m.step(10);
    assert_eq!(
        summary.stop,
        StopReason::Fault(CpuFault::Decode {
            linear: 0x100,
            opcode: 0x0F
        })
    );
    assert_eq!(m.cpu().regs().ip, 0x100);
    assert_eq!(m.step(10).stop, StopReason::Halted);
}

#[test]
fn decode_fault_can_be_skipped() {
    let config = MachineConfig {
        decode_faults: DecodeFaultPolicy::Skip,
        ..MachineConfig::default()
    };
    let mut m = machine_with(config, &[0x0F, 0x40, 0xF4]);
    let summary = m.step(10);
    assert_eq!(summary.stop, StopReason::Halted);
    assert_eq!(m.cpu().regs().ax, 1);
    assert_eq!(
        summary.warnings,
        vec![Warning::DecodeSkipped {
            addr: 0x100,
            opcode: 0x0F
        }]
    );
}

#[test]
fn unmapped_access_halts_the_run() {
    // mov ax, 0xf000; mov ds, ax; mov al, [0]
    let mut m = machine(&[0xB8, 0x00, 0xF0, 0x8E, 0xD8, 0xA0, 0x00, 0x00, 0xF4]);
    let summary = m.step(10);
    assert_eq!(summary.executed, 2);
    assert!(matches!(
        summary.stop,
        StopReason::Fault(CpuFault::Memory(MemoryError::OutOfBounds { addr: 0xF0000, .. }))
    ));
    assert!(m.cpu().is_halted());
}

fn rom_config(rom_writes: RomWrites) -> MachineConfig {
    let mut config = MachineConfig {
        rom_writes,
        ..MachineConfig::default()
    };
    config.regions.push(RegionConfig::rom(0xC0000, 0x1000));
    config
}

// mov ax, 0xc000; mov ds, ax; mov byte [0], 1; hlt
const ROM_STORE: [u8; 11] = [0xB8, 0x00, 0xC0, 0x8E, 0xD8, 0xC6, 0x06, 0x00, 0x00, 0x01, 0xF4];

#[test]
fn rom_writes_follow_policy() {
    let mut ignore = machine_with(rom_config(RomWrites::Ignore), &ROM_STORE);
    ignore.load_program(0xC0000, &[0xAB]).unwrap();
    assert_eq!(ignore.step(10).stop, StopReason::Halted);
    assert_eq!(ignore.poll_output_region(0xC0000, 1).unwrap(), &[0xAB]);

    let mut fault = machine_with(rom_config(RomWrites::Fault), &ROM_STORE);
    let summary = fault.step(10);
    assert!(matches!(
        summary.stop,
        StopReason::Fault(CpuFault::Memory(MemoryError::ReadOnly { addr: 0xC0000, .. }))
    ));
}

#[test]
fn breakpoint_stops_before_the_instruction_and_resumes() {
    let mut m = machine(&[0xB8, 0x01, 0x00, 0x40, 0xF4]);
    m.debugger_mut().set_breakpoint(0x103);

    let summary = m.step(10);
    assert_eq!(summary.stop, StopReason::Breakpoint(0x103));
    assert_eq!(summary.executed, 1);
    assert_eq!(m.cpu().regs().ax, 1);

    // Still paused until the debugger resumes.
    assert_eq!(m.step(10).executed, 0);

    m.debugger_mut().resume();
    let summary = m.step(10);
    assert_eq!(summary.stop, StopReason::Halted);
    assert_eq!(m.cpu().regs().ax, 2);
}

#[test]
fn single_step_request_pauses_after_one() {
    let mut m = machine(&[0x90, 0x90, 0x90]);
    m.debugger_mut().request_single_step();
    let summary = m.step(10);
    assert_eq!(summary.executed, 1);
    assert_eq!(summary.stop, StopReason::Paused(PauseReason::SingleStep));
}

#[test]
fn register_change_hooks_fire_after_changing_instructions() {
    // mov ax, 1; nop; hlt
    let mut m = machine(&[0xB8, 0x01, 0x00, 0x90, 0xF4]);
    let nop_fires = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&nop_fires);
    m.patches_mut()
        .register(Hook::augment(Trigger::register_change(0x100), |ctx| {
            assert_eq!(ctx.registers().ax, 1);
            if let Some(regs) = ctx.registers_mut() {
                regs.bx = 0x55;
            }
            Ok(Verdict::Proceed)
        }));
    m.patches_mut()
        .register(Hook::observe(Trigger::register_change(0x103), move |_| {
            *counter.borrow_mut() += 1;
        }));

    m.step(10);
    assert_eq!(m.cpu().regs().bx, 0x55);
    assert_eq!(*nop_fires.borrow(), 0);
}

#[test]
fn failing_hooks_become_warnings() {
    let mut m = machine(&[0x90, 0xF4]);
    m.patches_mut().register(
        Hook::augment(Trigger::fetch(0x100), |_| Err(sfemu_patch::HookError::msg("boom")))
            .with_label("broken"),
    );
    let summary = m.step(10);
    assert_eq!(summary.stop, StopReason::Halted);
    assert!(matches!(
        summary.warnings.as_slice(),
        [Warning::HookFailed { label, access_addr: 0x100, .. }] if label == "broken"
    ));
}

#[test]
fn input_device_is_visible_to_the_program() {
    // mov ax, 0xe000; mov ds, ax; mov al, [0]; mov bx, [2]; mov cl, [0]; hlt
    let code = [
        0xB8, 0x00, 0xE0, 0x8E, 0xD8, 0xA0, 0x00, 0x00, 0x8B, 0x1E, 0x02, 0x00, 0x8A, 0x0E, 0x00,
        0x00, 0xF4,
    ];
    let mut m = machine(&code);
    let up = scan_code(Key::Up, false).unwrap();
    m.set_input(up, true).unwrap();
    m.step(10);

    let regs = m.cpu().regs();
    assert_eq!(regs.ax & 0xFF, 1);
    assert_eq!(regs.bx, 0x4800);
    assert_eq!(regs.cx & 0xFF, 0);
}

#[test]
fn observers_do_not_pop_the_key_queue() {
    // mov ax, 0xe000; mov ds, ax; mov bx, [2]; hlt
    let code = [0xB8, 0x00, 0xE0, 0x8E, 0xD8, 0x8B, 0x1E, 0x02, 0x00, 0xF4];
    let mut m = machine(&code);
    let seen = Rc::new(RefCell::new(None));
    let s = Rc::clone(&seen);
    m.patches_mut().register(Hook::new(
        Trigger::fetch(0x0100),
        HookAction::Observe,
        move |ctx| {
            *s.borrow_mut() = Some(ctx.read_u16(0xE0002)?);
            Ok(Verdict::Proceed)
        },
    ));
    m.push_key(0x4800).unwrap();
    let summary = m.step(10);

    assert!(summary.warnings.is_empty());
    // MMIO reads float high when peeked.
    assert_eq!(*seen.borrow(), Some(0xFFFF));
    assert_eq!(m.cpu().regs().bx, 0x4800);
}

#[test]
fn input_calls_need_a_device() {
    let config = MachineConfig {
        input_base: None,
        ..MachineConfig::default()
    };
    let mut m = machine_with(config, &[0xF4]);
    assert!(matches!(m.push_key(13), Err(MachineError::NoInputDevice)));
}

#[test]
fn framebuffer_renders_through_the_palette() {
    // mov ax, 0xa000; mov es, ax; mov byte [es:0], 0xf1; hlt
    let code = [0xB8, 0x00, 0xA0, 0x8E, 0xC0, 0x26, 0xC6, 0x06, 0x00, 0x00, 0xF1, 0xF4];
    let mut m = machine(&code);
    m.step(10);

    assert_eq!(m.framebuffer().unwrap().len(), 320 * 200 / 2);
    let bgra = m.render_bgra(&EGA_PALETTE).unwrap();
    assert_eq!(bgra.len(), 320 * 200 * 4);
    assert_eq!(&bgra[..8], &[0xFF, 0xFF, 0xFF, 0xFF, 0xAA, 0x00, 0x00, 0xFF]);
}

fn speech_config(buffer: SpeechBuffer, trigger: u32, voice: VoiceSource) -> MachineConfig {
    MachineConfig {
        speech: Some(SpeechConfig {
            trigger,
            buffer,
            buffer_len: 4,
            codec: CodecKind::Byte,
            voice,
        }),
        ..MachineConfig::default()
    }
}

#[test]
fn speech_from_a_fixed_buffer() {
    let config = speech_config(
        SpeechBuffer::Fixed { addr: 0x2000 },
        0x100,
        VoiceSource::default(),
    );
    let mut m = machine_with(config, &[0x90, 0xF4]);
    // AA, S, end.
    m.load_program(0x2000, &[5, 21, 0, 0]).unwrap();

    let summary = m.step(10);
    assert!(summary.warnings.is_empty());
    let audio = m.take_audio();
    assert_eq!(audio.len(), 1);
    assert_eq!(audio[0].len(), 3528 + 2426);
    assert_eq!(audio[0].sample_rate, 22_050);
    assert!(m.take_audio().is_empty());
}

#[test]
fn speech_from_ds_si_with_voice_bytes() {
    // mov ax, 0x200; mov ds, ax; mov si, 0x10; nop; hlt
    let code = [0xB8, 0x00, 0x02, 0x8E, 0xD8, 0xBE, 0x10, 0x00, 0x90, 0xF4];
    let config = speech_config(SpeechBuffer::DsSi, 0x108, VoiceSource::Sixteenths);
    let mut m = machine_with(config, &code);
    // AA at double rate: pitch 1.0, rate 2.0, amplitude 0.5.
    m.load_program(0x2010, &[5, 0, 0, 0, 16, 32, 8]).unwrap();

    let summary = m.step(10);
    assert!(summary.warnings.is_empty());
    let audio = m.take_audio();
    assert_eq!(audio.len(), 1);
    assert_eq!(audio[0].len(), 1764);
}

#[test]
fn speech_failure_is_silence_and_a_warning() {
    let config = speech_config(
        SpeechBuffer::Fixed { addr: 0x2000 },
        0x100,
        VoiceSource::Fixed(VoiceParams::default()),
    );
    let mut m = machine_with(config, &[0x90, 0xF4]);
    m.load_program(0x2000, &[200, 0, 0, 0]).unwrap();

    let summary = m.step(10);
    assert_eq!(summary.stop, StopReason::Halted);
    assert_eq!(
        summary.warnings,
        vec![Warning::Speech {
            trigger: 0x100,
            error: SpeechError::UnknownPhoneme(200)
        }]
    );
    assert!(m.take_audio().is_empty());
}

#[test]
fn audio_sink_receives_pcm() {
    let config = speech_config(
        SpeechBuffer::Fixed { addr: 0x2000 },
        0x100,
        VoiceSource::default(),
    );
    let mut m = machine_with(config, &[0x90, 0xF4]);
    m.load_program(0x2000, &[5, 0, 0, 0]).unwrap();
    let received = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&received);
    m.set_audio_sink(Box::new(move |samples: &[i16], rate: u32| {
        sink.borrow_mut().push((samples.len(), rate));
    }));

    m.step(10);
    assert_eq!(*received.borrow(), vec![(3528, 22_050)]);
    assert!(m.take_audio().is_empty());
}

#[test]
fn trace_records_instructions_and_hooks() {
    let mut m = machine(&[0xB8, 0x01, 0x00, 0xF4]);
    m.patches_mut()
        .register(Hook::observe(Trigger::fetch(0x100), |_| {}).with_label("watch"));
    m.trace_mut().enable(TraceFilter {
        include_instructions: true,
        ..TraceFilter::default()
    });
    m.step(10);

    let events: Vec<_> = m.trace().events().cloned().collect();
    assert!(matches!(
        &events[0],
        TraceEvent::Instruction { addr: 0x100, text, .. } if text.contains("mov")
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, TraceEvent::Hook { label, .. } if label == "watch")));
}

#[test]
fn invalid_config_is_rejected() {
    let config = MachineConfig {
        regions: vec![RegionConfig::ram(0, 0x1000), RegionConfig::ram(0x800, 0x1000)],
        framebuffer: None,
        ..MachineConfig::default()
    };
    assert!(matches!(
        Machine::new(config, VoiceModel::standard()),
        Err(MachineError::Memory(MemoryError::Overlap { .. }))
    ));

    let config = MachineConfig {
        regions: vec![RegionConfig::ram(0, 0x1000)],
        ..MachineConfig::default()
    };
    assert!(Machine::new(config, VoiceModel::standard()).is_err());
}

#[test]
fn oversized_com_is_rejected() {
    let mut m = Machine::new(MachineConfig::default(), VoiceModel::standard()).unwrap();
    assert!(matches!(
        m.load_com(&vec![0x90; 0xFF01]),
        Err(MachineError::InvalidConfig(_))
    ));
}

#[test]
fn speech_glue_can_be_disabled_like_any_hook() {
    let config = speech_config(
        SpeechBuffer::Fixed { addr: 0x2000 },
        0x100,
        VoiceSource::default(),
    );
    let mut m = machine_with(config, &[0x90, 0xF4]);
    m.load_program(0x2000, &[5, 0, 0, 0]).unwrap();
    let id = m.speech_hook().unwrap();
    m.patches_mut().set_enabled(id, false).unwrap();

    m.step(10);
    assert!(m.take_audio().is_empty());

    m.reset();
    m.resume_halted();
    m.patches_mut().set_enabled(id, true).unwrap();
    m.step(10);
    assert_eq!(m.take_audio().len(), 1);
}
