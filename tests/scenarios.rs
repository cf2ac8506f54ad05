mod harness;

use std::cell::RefCell;
use std::rc::Rc;

use harness::{com_machine, com_machine_with};
use sfemu::machine::{SpeechBuffer, SpeechConfig, VoiceSource};
use sfemu::patch::{Hook, Trigger, Verdict};
use sfemu::speech::{
    synthesize, CodecKind, PackedCodec, PhonemeCodec, SpeechRequest, VoiceModel, VoiceParams,
};
use sfemu::{MachineConfig, StopReason};

// mov byte [0x1000], 0x42
const STORE_42: [u8; 5] = [0xC6, 0x06, 0x00, 0x10, 0x42];

#[test]
fn program_store_reaches_ram() {
    let mut machine = com_machine(&STORE_42);
    let out = machine.step_one();
    assert!(out.completed);
    assert!(out.fault.is_none());
    assert_eq!(machine.memory_mut().read_u8(0x1000).unwrap(), 0x42);
}

#[test]
fn fetch_halt_hook_stops_at_the_entry_point() {
    let mut machine = com_machine(&STORE_42);
    machine.patches_mut().register(Hook::halt_at(0x0100));

    let out = machine.step_one();
    assert!(out.halted);
    assert_eq!(machine.cpu().regs().pc(), 0x0100);
    assert_eq!(machine.memory_mut().read_u8(0x1000).unwrap(), 0);
    assert_eq!(machine.step(10).stop, StopReason::Halted);
}

#[test]
fn hook_reads_a_phoneme_record_and_synthesizes_it() {
    // nop; hlt
    let mut machine = com_machine(&[0x90, 0xF4]);
    // AA, duration and pitch scale 16/16.
    machine.load_program(0x2000, &[5, 16, 16, 0]).unwrap();

    let captured = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&captured);
    machine
        .patches_mut()
        .register(Hook::augment(Trigger::fetch(0x0100), move |ctx| {
            let mut record = [0u8; 4];
            ctx.read(0x2000, &mut record)?;
            *slot.borrow_mut() = Some(record);
            Ok(Verdict::Proceed)
        }));
    machine.step(10);

    let record = captured.take().expect("hook fired");
    let model = VoiceModel::standard();
    let request = SpeechRequest::new(
        PackedCodec.decode(&record).unwrap(),
        VoiceParams {
            pitch: 1.0,
            rate: 1.0,
            ..VoiceParams::default()
        },
    );
    let pcm = synthesize(&model, &request).unwrap();
    assert_eq!(pcm.sample_rate, 22_050);
    // 160 ms at 22 050 Hz.
    assert_eq!(pcm.len(), 3528);
    assert_eq!(pcm.len(), model.samples_for(160, 1.0, 1.0));
    assert!(!pcm.is_silent());
}

#[test]
fn configured_speech_glue_produces_the_same_audio() {
    let config = MachineConfig {
        speech: Some(SpeechConfig {
            trigger: 0x0100,
            buffer: SpeechBuffer::Fixed { addr: 0x2000 },
            buffer_len: 4,
            codec: CodecKind::Packed,
            voice: VoiceSource::Fixed(VoiceParams::default()),
        }),
        ..MachineConfig::default()
    };
    let mut machine = com_machine_with(config, &[0x90, 0xF4]);
    machine.load_program(0x2000, &[5, 16, 16, 0]).unwrap();

    let summary = machine.step(10);
    assert!(summary.warnings.is_empty());
    let audio = machine.take_audio();
    assert_eq!(audio.len(), 1);
    assert_eq!(audio[0].len(), 3528);
}

#[test]
fn higher_priority_hook_fires_first() {
    for h1_first in [true, false] {
        let mut machine = com_machine(&[0x90, 0xF4]);
        let order = Rc::new(RefCell::new(Vec::new()));
        let hook = |name: &'static str, priority: i32| {
            let order = Rc::clone(&order);
            Hook::observe(Trigger::fetch(0x0100), move |_| order.borrow_mut().push(name))
                .with_priority(priority)
        };
        let (h1, h2) = (hook("H1", 10), hook("H2", 5));
        if h1_first {
            machine.patches_mut().register(h1);
            machine.patches_mut().register(h2);
        } else {
            machine.patches_mut().register(h2);
            machine.patches_mut().register(h1);
        }
        machine.step_one();
        assert_eq!(*order.borrow(), vec!["H1", "H2"]);
    }
}

#[test]
fn replace_hook_suppresses_the_original_instruction() {
    let mut plain = com_machine(&STORE_42);
    plain.step_one();

    let mut patched = com_machine(&STORE_42);
    patched
        .patches_mut()
        .register(Hook::replace(Trigger::fetch(0x0100), |_| Ok(Verdict::Replace)));
    let out = patched.step_one();

    assert!(out.replaced);
    assert_eq!(patched.memory_mut().read_u8(0x1000).unwrap(), 0);
    assert_eq!(plain.memory_mut().read_u8(0x1000).unwrap(), 0x42);
    // Only the memory side effect differs; both step past the instruction.
    let (a, b) = (plain.cpu().regs(), patched.cpu().regs());
    assert_eq!((a.ax, a.bx, a.flags, a.ip), (b.ax, b.bx, b.flags, b.ip));
}
