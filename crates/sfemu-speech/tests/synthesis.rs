use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use sfemu_speech::{
    synthesize, PackedCodec, PhonemeCodec, PhonemeEvent, SpeechRequest, VoiceConfig, VoiceModel,
    VoiceParams,
};

#[test]
fn packed_record_renders_its_nominal_duration() {
    let model = VoiceModel::standard();
    let aa = model.code_of("AA").unwrap();
    let events = PackedCodec.decode(&[aa, 16, 16, 0]).unwrap();
    let req = SpeechRequest::new(
        events,
        VoiceParams {
            pitch: 1.0,
            rate: 1.0,
            amplitude: 1.0,
        },
    );
    let pcm = synthesize(&model, &req).unwrap();
    let expected = (160.0f64 * 22_050.0 / 1000.0).round() as usize;
    assert_eq!(pcm.len(), expected);
    assert!((pcm.duration().as_secs_f64() - 0.160).abs() < 1e-9);
}

#[test]
fn custom_sample_rate_scales_length() {
    let model = VoiceModel::new(VoiceConfig {
        sample_rate: 8_000,
        ..VoiceConfig::default()
    })
    .unwrap();
    let req = SpeechRequest::new(vec![PhonemeEvent::new(5)], VoiceParams::default());
    assert_eq!(synthesize(&model, &req).unwrap().len(), 1280);
}

#[test]
fn model_is_shared_across_threads() {
    let model = VoiceModel::standard();
    let req = SpeechRequest::new(
        vec![PhonemeEvent::new(1), PhonemeEvent::new(14)],
        VoiceParams::default(),
    );
    let local = synthesize(&model, &req).unwrap();

    let handle = {
        let model = Arc::clone(&model);
        let req = req.clone();
        thread::spawn(move || synthesize(&model, &req).unwrap())
    };
    assert_eq!(handle.join().unwrap(), local);
}

fn event() -> impl Strategy<Value = PhonemeEvent> {
    (1u8..36, 1u8..64, 4u8..=64).prop_map(|(phoneme, dur, pitch)| PhonemeEvent {
        phoneme,
        duration_scale: f32::from(dur) / 16.0,
        pitch_scale: f32::from(pitch) / 16.0,
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn synthesis_is_deterministic(
        events in proptest::collection::vec(event(), 0..6),
        pitch in 4u8..=64,
        rate in 4u8..=64,
        amplitude in 0u8..=16,
    ) {
        let model = VoiceModel::standard();
        let req = SpeechRequest::new(events, VoiceParams::from_sixteenths([pitch, rate, amplitude]));
        let a = synthesize(&model, &req).unwrap();
        let b = synthesize(&model, &req).unwrap();
        prop_assert_eq!(&a, &b);

        let expected: usize = req
            .phonemes
            .iter()
            .map(|e| {
                let ph = model.phoneme(e.phoneme).unwrap();
                model.samples_for(ph.duration_ms, e.duration_scale, req.voice.rate)
            })
            .sum();
        prop_assert_eq!(a.len(), expected);
    }
}
