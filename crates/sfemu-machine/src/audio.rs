use sfemu_speech::PcmBuffer;

/// Receiver for synthesized speech.
///
/// Called synchronously from `Machine::step` after the instruction that produced the audio.
pub trait AudioSink {
    fn push_pcm(&mut self, samples: &[i16], sample_rate: u32);
}

impl<F: FnMut(&[i16], u32)> AudioSink for F {
    fn push_pcm(&mut self, samples: &[i16], sample_rate: u32) {
        self(samples, sample_rate)
    }
}

/// Routes PCM to the installed sink, or queues it for `take` when there is none.
#[derive(Default)]
pub(crate) struct AudioOut {
    sink: Option<Box<dyn AudioSink>>,
    queued: Vec<PcmBuffer>,
}

impl AudioOut {
    pub(crate) fn set_sink(&mut self, sink: Option<Box<dyn AudioSink>>) {
        self.sink = sink;
    }

    pub(crate) fn push(&mut self, pcm: PcmBuffer) {
        if pcm.is_empty() {
            return;
        }
        match &mut self.sink {
            Some(sink) => sink.push_pcm(&pcm.samples, pcm.sample_rate),
            None => self.queued.push(pcm),
        }
    }

    pub(crate) fn take(&mut self) -> Vec<PcmBuffer> {
        std::mem::take(&mut self.queued)
    }

    pub(crate) fn clear(&mut self) {
        self.queued.clear();
    }
}
