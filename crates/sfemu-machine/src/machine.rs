use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use sfemu_cpu::{linear, Cpu, CpuConfig, CpuFault, Registers, StepOutcome};
use sfemu_debug::{disassemble, Debugger, ExecDecision, PauseReason, TraceBuffer, TraceEvent};
use sfemu_mem::MemoryBus;
use sfemu_patch::{HookId, PatchEngine, PatchedBus, Verdict};
use sfemu_speech::{PcmBuffer, VoiceModel};

use crate::audio::{AudioOut, AudioSink};
use crate::config::{DecodeFaultPolicy, MachineConfig, RegionKindConfig, ResetState};
use crate::error::{MachineError, Result};
use crate::input::{InputDevice, INPUT_WINDOW_LEN};
use crate::speech::{speech_hook, UtteranceQueue};
use crate::video::render_bgra;
use crate::warning::Warning;

/// Why a call to [`Machine::step`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// All requested instructions ran.
    Completed,
    Halted,
    Fault(CpuFault),
    /// A debugger breakpoint at this linear address; the instruction has not run.
    Breakpoint(u32),
    /// Manual pause or a finished single-step request.
    Paused(PauseReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepSummary {
    /// Instructions that ran to completion or were replaced by a hook.
    pub executed: u64,
    pub cycles: u64,
    pub stop: StopReason,
    pub warnings: Vec<Warning>,
}

/// The emulated machine: CPU, memory map, hook registry and host boundaries.
///
/// Single-threaded; the host drives it with [`Machine::step`] and reads results back between calls.
pub struct Machine {
    pub(crate) config: MachineConfig,
    pub(crate) cpu: Cpu,
    pub(crate) mem: MemoryBus,
    pub(crate) patches: PatchEngine,
    debugger: Debugger,
    trace: TraceBuffer,
    voice: Arc<VoiceModel>,
    speech_hook: Option<HookId>,
    utterances: UtteranceQueue,
    audio: AudioOut,
    warnings: Vec<Warning>,
    pub(crate) next_snapshot_id: u64,
}

fn reset_registers(reset: &ResetState) -> Registers {
    Registers {
        cs: reset.cs,
        ip: reset.ip,
        ss: reset.ss,
        sp: reset.sp,
        ds: reset.ds,
        es: reset.es,
        ..Registers::default()
    }
}

/// True when anything but IP and the counters differs.
fn registers_changed(before: &Registers, after: &Registers) -> bool {
    let before = Registers {
        ip: after.ip,
        ..*before
    };
    !before.same_architectural_state(after)
}

impl Machine {
    pub fn new(config: MachineConfig, voice: Arc<VoiceModel>) -> Result<Self> {
        config.validate()?;

        let mut mem = MemoryBus::with_rom_policy(config.rom_writes.into());
        for region in &config.regions {
            match region.kind {
                RegionKindConfig::Ram => mem.map_ram(region.base, region.len)?,
                RegionKindConfig::Rom => {
                    mem.map_rom(region.base, vec![0u8; region.len as usize])?
                }
            }
        }
        if let Some(base) = config.input_base {
            mem.map_mmio(base, INPUT_WINDOW_LEN, Box::new(InputDevice::new()))?;
        }
        if let Some(fb) = &config.framebuffer {
            mem.check_mapped(fb.base, fb.len() as usize)?;
        }

        let cpu = Cpu::with_registers(
            CpuConfig {
                honor_trap_flag: config.honor_trap_flag,
                ..CpuConfig::default()
            },
            reset_registers(&config.reset),
        );

        let mut patches = PatchEngine::new();
        let utterances: UtteranceQueue = Rc::new(RefCell::new(Vec::new()));
        let speech_id = config.speech.map(|speech| {
            patches.register(speech_hook(speech, Arc::clone(&voice), Rc::clone(&utterances)))
        });

        tracing::debug!(
            regions = config.regions.len(),
            input = ?config.input_base,
            speech = speech_id.is_some(),
            "machine created"
        );

        Ok(Self {
            trace: TraceBuffer::new(config.trace_capacity),
            config,
            cpu,
            mem,
            patches,
            debugger: Debugger::new(),
            voice,
            speech_hook: speech_id,
            utterances,
            audio: AudioOut::default(),
            warnings: Vec::new(),
            next_snapshot_id: 1,
        })
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn voice(&self) -> &Arc<VoiceModel> {
        &self.voice
    }

    /// Id of the speech glue hook, when speech is configured.
    pub fn speech_hook(&self) -> Option<HookId> {
        self.speech_hook
    }

    /// Copy an image into memory. ROM regions accept it too.
    pub fn load_program(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        self.mem.load_image(addr, bytes)?;
        tracing::info!(addr, len = bytes.len(), "program loaded");
        Ok(())
    }

    /// Load a `.COM` image at `CS:0100` of the reset code segment and point every segment
    /// register at it. No PSP is built.
    pub fn load_com(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > 0xFF00 {
            return Err(MachineError::InvalidConfig(format!(
                ".COM image of {} bytes does not fit in one segment",
                bytes.len()
            )));
        }
        let seg = self.config.reset.cs;
        self.load_program(linear(seg, 0x0100), bytes)?;
        self.cpu.reset(Registers {
            cs: seg,
            ds: seg,
            es: seg,
            ss: seg,
            ip: 0x0100,
            sp: 0xFFFE,
            ..Registers::default()
        });
        Ok(())
    }

    /// Back to the configured reset registers. Memory and hooks are untouched.
    pub fn reset(&mut self) {
        self.cpu.reset(reset_registers(&self.config.reset));
        self.utterances.borrow_mut().clear();
        self.warnings.clear();
    }

    /// Run up to `n` instructions.
    pub fn step(&mut self, n: u64) -> StepSummary {
        let mut executed = 0u64;
        let mut cycles = 0u64;
        let mut stop = StopReason::Completed;

        while executed < n {
            if self.cpu.at_boundary() && !self.cpu.is_halted() {
                let pc = self.cpu.regs().pc();
                if let ExecDecision::Pause(reason) = self.debugger.check_before_exec(pc) {
                    stop = match reason {
                        PauseReason::Breakpoint { addr } => StopReason::Breakpoint(addr),
                        other => StopReason::Paused(other),
                    };
                    break;
                }
            }

            let out = self.execute(false);
            cycles += out.cycles;
            if out.completed || out.replaced {
                executed += 1;
            }
            if let Some(fault) = out.fault {
                stop = StopReason::Fault(fault);
                break;
            }
            if out.halted {
                stop = StopReason::Halted;
                break;
            }
            if let ExecDecision::Pause(reason) = self.debugger.check_after_exec() {
                stop = StopReason::Paused(reason);
                break;
            }
        }

        StepSummary {
            executed,
            cycles,
            stop,
            warnings: self.take_warnings(),
        }
    }

    /// Execute a single instruction, ignoring breakpoints. Warnings accumulate until
    /// [`Machine::take_warnings`] or the next [`Machine::step`].
    pub fn step_one(&mut self) -> StepOutcome {
        self.execute(false)
    }

    /// Like [`Machine::step_one`], but stops after one iteration of a repeated string instruction.
    pub fn step_micro(&mut self) -> StepOutcome {
        self.execute(true)
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    fn execute(&mut self, micro: bool) -> StepOutcome {
        let before = *self.cpu.regs();
        let addr = before.pc();
        let boundary = self.cpu.at_boundary();

        if boundary && self.trace.wants_instructions() && !self.cpu.is_halted() {
            if let Some(line) = disassemble(&self.mem, addr, 1).into_iter().next() {
                self.trace.record(TraceEvent::Instruction {
                    addr,
                    cs: before.cs,
                    ip: before.ip,
                    bytes: line.bytes,
                    text: line.text,
                });
            }
        }
        self.patches.set_recording(self.trace.wants_hooks());

        let mut out = {
            let mut bus = PatchedBus::new(&mut self.mem, &mut self.patches);
            if micro {
                self.cpu.step_micro(&mut bus)
            } else {
                self.cpu.step(&mut bus)
            }
        };

        match out.fault.take() {
            Some(CpuFault::Decode { linear, opcode })
                if self.config.decode_faults == DecodeFaultPolicy::Skip =>
            {
                tracing::warn!(addr = linear, opcode, "skipping undecodable opcode");
                let regs = self.cpu.regs_mut();
                regs.ip = regs.ip.wrapping_add(1);
                self.warnings.push(Warning::DecodeSkipped { addr: linear, opcode });
                out.completed = true;
            }
            Some(fault) => {
                tracing::warn!(addr, %fault, "cpu fault; halting");
                self.trace.record(TraceEvent::Fault {
                    addr,
                    message: fault.to_string(),
                });
                self.cpu.set_halted(true);
                out.fault = Some(fault);
            }
            None => {}
        }

        if out.completed && !out.replaced && registers_changed(&before, self.cpu.regs()) {
            match self
                .patches
                .register_changed(&mut self.mem, self.cpu.regs_mut(), addr)
            {
                Ok(Verdict::Halt) => {
                    tracing::debug!(addr, "register-change hook halted the cpu");
                    self.cpu.set_halted(true);
                    out.halted = true;
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(addr, %error, "register-change dispatch failed");
                    self.warnings.push(Warning::RegisterHooksFailed { addr, error });
                }
            }
        }

        self.collect_hook_reports();
        self.drain_speech();
        out
    }

    fn collect_hook_reports(&mut self) {
        for event in self.patches.take_events() {
            self.trace.record(TraceEvent::Hook {
                hook: event.id.to_string(),
                label: event.label,
                trigger: format!("{:?}", event.trigger.kind),
                access_addr: event.access_addr,
                verdict: format!("{:?}", event.verdict),
            });
        }
        for failure in self.patches.take_failures() {
            let warning = Warning::HookFailed {
                hook: failure.id,
                label: failure.label,
                trigger: failure.trigger,
                access_addr: failure.access_addr,
                error: failure.error,
            };
            self.trace.record(TraceEvent::Warning {
                message: warning.to_string(),
            });
            self.warnings.push(warning);
        }
    }

    fn drain_speech(&mut self) {
        let utterances = std::mem::take(&mut *self.utterances.borrow_mut());
        for utterance in utterances {
            if let Some(warning) = utterance.warning {
                self.trace.record(TraceEvent::Warning {
                    message: warning.to_string(),
                });
                self.warnings.push(warning);
            }
            self.audio.push(utterance.pcm);
        }
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// Direct register access for debuggers. Takes effect at the next step.
    pub fn registers_mut(&mut self) -> &mut Registers {
        self.cpu.regs_mut()
    }

    /// Clear the halt latch so a halted run can continue.
    pub fn resume_halted(&mut self) {
        self.cpu.set_halted(false);
    }

    pub fn memory(&self) -> &MemoryBus {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut MemoryBus {
        &mut self.mem
    }

    pub fn patches(&self) -> &PatchEngine {
        &self.patches
    }

    pub fn patches_mut(&mut self) -> &mut PatchEngine {
        &mut self.patches
    }

    pub fn debugger(&self) -> &Debugger {
        &self.debugger
    }

    pub fn debugger_mut(&mut self) -> &mut Debugger {
        &mut self.debugger
    }

    pub fn trace(&self) -> &TraceBuffer {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut TraceBuffer {
        &mut self.trace
    }

    fn input(&mut self) -> Result<&mut InputDevice> {
        let base = self.config.input_base.ok_or(MachineError::NoInputDevice)?;
        self.mem
            .device_mut::<InputDevice>(base)
            .ok_or(MachineError::NoInputDevice)
    }

    /// Host key transition. Presses also queue the key word for the program.
    pub fn set_input(&mut self, code: u16, pressed: bool) -> Result<()> {
        self.input()?.set_key(code, pressed);
        Ok(())
    }

    pub fn push_key(&mut self, code: u16) -> Result<()> {
        self.input()?.push_key(code);
        Ok(())
    }

    /// Read-only view of RAM or ROM for the host; never touches devices or hooks.
    pub fn poll_output_region(&self, base: u32, len: usize) -> Result<&[u8]> {
        Ok(self.mem.slice(base, len)?)
    }

    pub fn framebuffer(&self) -> Result<&[u8]> {
        let fb = self.config.framebuffer.ok_or(MachineError::NoFramebuffer)?;
        self.poll_output_region(fb.base, fb.len() as usize)
    }

    /// The framebuffer as BGRA8888, `width * height * 4` bytes.
    pub fn render_bgra(&self, palette: &[u32; 16]) -> Result<Vec<u8>> {
        let fb = self.config.framebuffer.ok_or(MachineError::NoFramebuffer)?;
        Ok(render_bgra(&fb, self.framebuffer()?, palette))
    }

    /// Send future speech to `sink` instead of the internal queue.
    pub fn set_audio_sink(&mut self, sink: Box<dyn AudioSink>) {
        self.audio.set_sink(Some(sink));
    }

    pub fn clear_audio_sink(&mut self) {
        self.audio.set_sink(None);
    }

    /// Speech rendered while no sink was installed, oldest first.
    pub fn take_audio(&mut self) -> Vec<PcmBuffer> {
        self.audio.take()
    }

    pub(crate) fn discard_transient_output(&mut self) {
        self.utterances.borrow_mut().clear();
        self.audio.clear();
        self.warnings.clear();
    }
}
