//! Bridges the program's speech routine to the synthesizer.
//!
//! An observe hook on the routine's entry point captures the phoneme buffer and voice bytes,
//! renders them synchronously, and leaves the result in a queue the machine drains after the
//! instruction.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use sfemu_cpu::linear;
use sfemu_patch::{Hook, HookAction, HookContext, HookError, Trigger, Verdict};
use sfemu_speech::{
    synthesize_or_silence, PcmBuffer, PhonemeCodec, SpeechRequest, VoiceModel, VoiceParams,
};

use crate::config::{SpeechBuffer, SpeechConfig, VoiceSource};
use crate::warning::Warning;

pub(crate) type UtteranceQueue = Rc<RefCell<Vec<Utterance>>>;

#[derive(Debug)]
pub(crate) struct Utterance {
    pub pcm: PcmBuffer,
    pub warning: Option<Warning>,
}

fn capture(
    ctx: &mut HookContext<'_>,
    config: &SpeechConfig,
) -> Result<(Vec<u8>, VoiceParams), HookError> {
    let regs = *ctx.registers();
    let base = match config.buffer {
        SpeechBuffer::Fixed { addr } => addr,
        SpeechBuffer::DsSi => linear(regs.ds, regs.si),
    };
    let mut raw = vec![0u8; config.buffer_len as usize];
    ctx.read(base, &mut raw)?;
    let voice = match config.voice {
        VoiceSource::Fixed(params) => params,
        VoiceSource::Sixteenths => {
            let mut bytes = [0u8; 3];
            ctx.read(base.wrapping_add(config.buffer_len), &mut bytes)?;
            VoiceParams::from_sixteenths(bytes)
        }
    };
    Ok((raw, voice))
}

fn render(model: &VoiceModel, config: &SpeechConfig, raw: &[u8], voice: VoiceParams) -> Utterance {
    let trigger = config.trigger;
    let phonemes = match config.codec.decode(raw) {
        Ok(p) => p,
        Err(error) => {
            tracing::warn!(trigger, %error, "undecodable speech buffer; emitting silence");
            return Utterance {
                pcm: PcmBuffer::silence(model.sample_rate()),
                warning: Some(Warning::Speech { trigger, error }),
            };
        }
    };
    let (pcm, error) = synthesize_or_silence(model, &SpeechRequest::new(phonemes, voice));
    Utterance {
        pcm,
        warning: error.map(|error| Warning::Speech { trigger, error }),
    }
}

pub(crate) fn speech_hook(
    config: SpeechConfig,
    model: Arc<VoiceModel>,
    queue: UtteranceQueue,
) -> Hook {
    Hook::new(Trigger::fetch(config.trigger), HookAction::Observe, move |ctx| {
        let utterance = match capture(ctx, &config) {
            Ok((raw, voice)) => render(&model, &config, &raw, voice),
            Err(error) => {
                tracing::warn!(trigger = config.trigger, %error, "speech buffer unreadable");
                Utterance {
                    pcm: PcmBuffer::silence(model.sample_rate()),
                    warning: Some(Warning::SpeechBuffer {
                        trigger: config.trigger,
                        error,
                    }),
                }
            }
        };
        queue.borrow_mut().push(utterance);
        Ok(Verdict::Proceed)
    })
    .with_label("speech")
}
