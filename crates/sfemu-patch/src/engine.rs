use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};

use sfemu_cpu::{Fetch, Registers};
use sfemu_mem::{MemoryBus, MemoryError};

use crate::context::{HookContext, RegsView};
use crate::error::{HookError, PatchError};
use crate::hook::{
    Hook, HookAction, HookDescriptor, HookFn, HookId, RegistryState, Trigger, TriggerKind, Verdict,
};

/// Aggregate result of running every hook registered for a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchResult {
    pub verdict: Verdict,
    /// Number of callbacks that ran.
    pub fired: usize,
    /// An augment hook changed the access data.
    pub modified: bool,
    /// An exclusive hook short-circuited; later hooks did not see the trigger.
    pub exclusive: bool,
}

impl Default for DispatchResult {
    fn default() -> Self {
        Self {
            verdict: Verdict::Proceed,
            fired: 0,
            modified: false,
            exclusive: false,
        }
    }
}

impl DispatchResult {
    fn merge(&mut self, other: DispatchResult) {
        self.fired += other.fired;
        self.modified |= other.modified;
        self.exclusive |= other.exclusive;
        self.verdict = match (self.verdict, other.verdict) {
            (Verdict::Halt, _) | (_, Verdict::Halt) => Verdict::Halt,
            (Verdict::Replace, _) | (_, Verdict::Replace) => Verdict::Replace,
            _ => Verdict::Proceed,
        };
    }
}

/// A hook callback that returned an error. Its changes were rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookFailure {
    pub id: HookId,
    pub label: String,
    pub trigger: Trigger,
    pub access_addr: u32,
    pub error: HookError,
}

/// Record of a callback that ran, kept only while event recording is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookEvent {
    pub id: HookId,
    pub label: String,
    pub trigger: Trigger,
    pub access_addr: u32,
    /// The verdict after action rules were applied.
    pub verdict: Verdict,
}

struct Entry {
    desc: HookDescriptor,
    /// `None` while the callback is running.
    callback: Option<HookFn>,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Registry of address-keyed hooks and the dispatcher that runs them.
///
/// Hooks for one `(kind, addr)` key run in descending priority, then registration order. The
/// engine never touches the program image itself; every substitution happens on the data flowing
/// through an access.
#[derive(Default)]
pub struct PatchEngine {
    slots: Vec<Slot>,
    free: Vec<u32>,
    index: BTreeMap<(TriggerKind, u32), Vec<HookId>>,
    next_seq: u64,
    live: usize,
    per_kind: [usize; 4],
    /// Widest data hook ever registered; bounds the index range scan for data accesses.
    max_span: u32,
    active: HashSet<(u32, TriggerKind)>,
    failures: Vec<HookFailure>,
    recording: bool,
    events: Vec<HookEvent>,
}

impl std::fmt::Debug for PatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchEngine")
            .field("hooks", &self.live)
            .field("slots", &self.slots.len())
            .field("next_seq", &self.next_seq)
            .finish_non_exhaustive()
    }
}

impl PatchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn has_hooks(&self, kind: TriggerKind) -> bool {
        self.per_kind[kind.index()] != 0
    }

    pub fn register(&mut self, hook: Hook) -> HookId {
        let Hook {
            trigger,
            span,
            priority,
            action,
            exclusive,
            enabled,
            label,
            callback,
        } = hook;
        let span = if trigger.kind.is_data() { span.max(1) } else { 1 };

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let id = HookId::from_parts(index, slot.generation);
        let seq = self.next_seq;
        self.next_seq += 1;

        tracing::debug!(%id, %trigger, priority, ?action, exclusive, label = %label, "registered hook");

        slot.entry = Some(Entry {
            desc: HookDescriptor {
                id,
                trigger,
                span,
                priority,
                action,
                exclusive,
                enabled,
                label,
                seq,
            },
            callback: Some(callback),
        });

        let key = (priority, seq);
        let list = self.index.entry((trigger.kind, trigger.addr)).or_default();
        let pos = list.partition_point(|other| {
            let d = &self.slots[other.index() as usize];
            d.entry
                .as_ref()
                .map(|e| (Reverse(e.desc.priority), e.desc.seq) <= (Reverse(key.0), key.1))
                .unwrap_or(true)
        });
        list.insert(pos, id);

        self.live += 1;
        self.per_kind[trigger.kind.index()] += 1;
        if trigger.kind.is_data() {
            self.max_span = self.max_span.max(span);
        }
        id
    }

    /// Remove a hook. A callback may unregister itself; it finishes its current run.
    pub fn unregister(&mut self, id: HookId) -> Result<(), PatchError> {
        self.entry(id)?;
        let slot = &mut self.slots[id.index() as usize];
        let Some(entry) = slot.entry.take() else {
            return Err(PatchError::UnknownHook(id));
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index());

        let trigger = entry.desc.trigger;
        if let Some(list) = self.index.get_mut(&(trigger.kind, trigger.addr)) {
            list.retain(|&other| other != id);
            if list.is_empty() {
                self.index.remove(&(trigger.kind, trigger.addr));
            }
        }
        self.live -= 1;
        self.per_kind[trigger.kind.index()] -= 1;
        tracing::debug!(%id, %trigger, label = %entry.desc.label, "unregistered hook");
        Ok(())
    }

    fn entry(&self, id: HookId) -> Result<&Entry, PatchError> {
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.entry.as_ref())
            .ok_or(PatchError::UnknownHook(id))
    }

    fn entry_mut(&mut self, id: HookId) -> Result<&mut Entry, PatchError> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.entry.as_mut())
            .ok_or(PatchError::UnknownHook(id))
    }

    pub fn contains(&self, id: HookId) -> bool {
        self.entry(id).is_ok()
    }

    pub fn descriptor(&self, id: HookId) -> Result<&HookDescriptor, PatchError> {
        Ok(&self.entry(id)?.desc)
    }

    pub fn set_enabled(&mut self, id: HookId, enabled: bool) -> Result<(), PatchError> {
        self.entry_mut(id)?.desc.enabled = enabled;
        Ok(())
    }

    pub fn is_enabled(&self, id: HookId) -> Result<bool, PatchError> {
        Ok(self.entry(id)?.desc.enabled)
    }

    /// Hooks registered for exactly `trigger`, in dispatch order.
    pub fn hooks_at(&self, trigger: Trigger) -> Vec<HookId> {
        self.index
            .get(&(trigger.kind, trigger.addr))
            .cloned()
            .unwrap_or_default()
    }

    /// All live hooks in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &HookDescriptor> + '_ {
        self.slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref().map(|e| &e.desc))
    }

    pub fn descriptors(&self) -> RegistryState {
        RegistryState {
            hooks: self.iter().cloned().collect(),
            generations: self.slots.iter().map(|s| s.generation).collect(),
            free: self.free.clone(),
            next_seq: self.next_seq,
        }
    }

    /// Re-apply saved registry state onto the live hooks.
    ///
    /// The live registry must hold exactly the saved hooks (same ids, triggers, actions and
    /// priorities). Nothing is changed if validation fails.
    pub fn restore_descriptors(&mut self, state: &RegistryState) -> Result<(), PatchError> {
        if state.hooks.len() != self.live {
            return Err(PatchError::RegistryMismatch(format!(
                "saved state has {} hooks, registry has {}",
                state.hooks.len(),
                self.live
            )));
        }
        for saved in &state.hooks {
            let live = &self
                .entry(saved.id)
                .map_err(|_| PatchError::RegistryMismatch(format!("hook {} is not registered", saved.id)))?
                .desc;
            if live.trigger != saved.trigger
                || live.action != saved.action
                || live.priority != saved.priority
                || live.span != saved.span
            {
                return Err(PatchError::RegistryMismatch(format!(
                    "hook {} was registered as {} {:?} priority {}, saved as {} {:?} priority {}",
                    saved.id,
                    live.trigger,
                    live.action,
                    live.priority,
                    saved.trigger,
                    saved.action,
                    saved.priority
                )));
            }
        }
        if state.generations.len() < self.slots.len()
            && self.slots[state.generations.len()..]
                .iter()
                .any(|s| s.entry.is_some())
        {
            return Err(PatchError::RegistryMismatch(
                "live hook outside saved arena".to_string(),
            ));
        }
        for &index in &state.free {
            let occupied = self
                .slots
                .get(index as usize)
                .is_some_and(|s| s.entry.is_some());
            if index as usize >= state.generations.len() || occupied {
                return Err(PatchError::RegistryMismatch(format!(
                    "free slot {index} is not free"
                )));
            }
        }

        self.slots.resize_with(state.generations.len(), Slot::default);
        for (slot, &generation) in self.slots.iter_mut().zip(&state.generations) {
            if slot.entry.is_none() {
                slot.generation = generation;
            }
        }
        self.free = state.free.clone();
        self.next_seq = state.next_seq;
        for saved in &state.hooks {
            let entry = self.entry_mut(saved.id)?;
            entry.desc.enabled = saved.enabled;
            entry.desc.exclusive = saved.exclusive;
            entry.desc.seq = saved.seq;
        }

        let mut index = std::mem::take(&mut self.index);
        for list in index.values_mut() {
            list.sort_by_key(|id| {
                self.entry(*id)
                    .map(|e| (Reverse(e.desc.priority), e.desc.seq))
                    .unwrap_or((Reverse(i32::MIN), u64::MAX))
            });
        }
        self.index = index;
        tracing::debug!(hooks = self.live, "restored hook registry state");
        Ok(())
    }

    /// Failures recorded since the last call.
    pub fn take_failures(&mut self) -> Vec<HookFailure> {
        std::mem::take(&mut self.failures)
    }

    pub fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
        if !recording {
            self.events.clear();
        }
    }

    pub fn take_events(&mut self) -> Vec<HookEvent> {
        std::mem::take(&mut self.events)
    }

    /// Run the hooks registered for exactly `trigger`.
    ///
    /// Fails with [`PatchError::HookCycleDetected`] if the same `(addr, kind)` is already being
    /// dispatched further up the stack. Hook failures are not errors; see
    /// [`PatchEngine::take_failures`].
    pub fn dispatch(
        &mut self,
        mem: &mut MemoryBus,
        trigger: Trigger,
        access_addr: u32,
        data: &mut [u8],
        regs: RegsView<'_>,
    ) -> Result<DispatchResult, PatchError> {
        self.dispatch_from(mem, trigger, access_addr, data, regs, false)
    }

    /// `short_circuited` carries an earlier Replace or Halt into this dispatch, so only observers
    /// run.
    fn dispatch_from(
        &mut self,
        mem: &mut MemoryBus,
        trigger: Trigger,
        access_addr: u32,
        data: &mut [u8],
        regs: RegsView<'_>,
        short_circuited: bool,
    ) -> Result<DispatchResult, PatchError> {
        let ids = match self.index.get(&(trigger.kind, trigger.addr)) {
            Some(ids) if !ids.is_empty() => ids.clone(),
            _ => return Ok(DispatchResult::default()),
        };
        let key = (trigger.addr, trigger.kind);
        if !self.active.insert(key) {
            tracing::warn!(%trigger, "rejected re-entrant hook dispatch");
            return Err(PatchError::HookCycleDetected {
                addr: trigger.addr,
                kind: trigger.kind,
            });
        }
        let result = self.run_hooks(mem, trigger, access_addr, data, regs, &ids, short_circuited);
        self.active.remove(&key);
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_hooks(
        &mut self,
        mem: &mut MemoryBus,
        trigger: Trigger,
        access_addr: u32,
        data: &mut [u8],
        mut regs: RegsView<'_>,
        ids: &[HookId],
        mut short_circuited: bool,
    ) -> DispatchResult {
        let mut result = DispatchResult::default();

        for &id in ids {
            let Ok(entry) = self.entry_mut(id) else {
                continue;
            };
            let desc = &entry.desc;
            if !desc.enabled || (short_circuited && desc.action != HookAction::Observe) {
                continue;
            }
            if trigger.kind.is_data() && desc.trigger.addr.saturating_add(desc.span) <= access_addr {
                continue;
            }
            let (action, exclusive, label) = (desc.action, desc.exclusive, desc.label.clone());
            let Some(mut callback) = entry.callback.take() else {
                continue;
            };

            let saved_data = data.to_vec();
            let saved_regs = regs.snapshot();
            let outcome = {
                let mut ctx = HookContext {
                    id,
                    action,
                    trigger,
                    access_addr,
                    data: &mut *data,
                    regs: regs.reborrow(),
                    engine: &mut *self,
                    mem: &mut *mem,
                };
                callback(&mut ctx)
            };
            // The hook may have unregistered itself; its callback is dropped in that case.
            if let Ok(entry) = self.entry_mut(id) {
                entry.callback = Some(callback);
            }
            result.fired += 1;

            let verdict = match outcome {
                Ok(verdict) => verdict,
                Err(error) => {
                    data.copy_from_slice(&saved_data);
                    regs.restore(saved_regs);
                    tracing::warn!(%id, %trigger, label = %label, %error, "hook failed");
                    self.failures.push(HookFailure {
                        id,
                        label,
                        trigger,
                        access_addr,
                        error,
                    });
                    continue;
                }
            };

            let verdict = match (action, verdict) {
                (HookAction::Observe, _) => Verdict::Proceed,
                (HookAction::Augment, Verdict::Replace) => Verdict::Proceed,
                (_, v) => v,
            };
            let rolled_back = action == HookAction::Observe
                || (action == HookAction::Replace && verdict == Verdict::Proceed);
            if rolled_back {
                data.copy_from_slice(&saved_data);
                regs.restore(saved_regs);
            } else if action == HookAction::Augment && data[..] != saved_data[..] {
                result.modified = true;
            }

            if self.recording {
                self.events.push(HookEvent {
                    id,
                    label,
                    trigger,
                    access_addr,
                    verdict,
                });
            }

            if verdict != Verdict::Proceed {
                result.verdict = verdict;
                short_circuited = true;
                if exclusive {
                    result.exclusive = true;
                    break;
                }
            }
        }
        result
    }

    /// Dispatch every data hook of `kind` whose covered bytes overlap `[addr, addr + len)`, in
    /// ascending hook address order.
    ///
    /// The whole access is one trigger: a Replace at a lower hook address skips the non-observe
    /// hooks at higher ones, and an exclusive hook or a halt ends dispatch.
    fn dispatch_access(
        &mut self,
        mem: &mut MemoryBus,
        kind: TriggerKind,
        addr: u32,
        data: &mut [u8],
        regs: &Registers,
    ) -> Result<DispatchResult, PatchError> {
        let end = addr + data.len() as u32;
        let lo = addr.saturating_sub(self.max_span.saturating_sub(1));
        let keys: Vec<u32> = self
            .index
            .range((kind, lo)..(kind, end))
            .map(|(&(_, hook_addr), _)| hook_addr)
            .collect();

        let mut result = DispatchResult::default();
        for hook_addr in keys {
            let trigger = Trigger {
                kind,
                addr: hook_addr,
            };
            let short_circuited = result.verdict != Verdict::Proceed;
            let r =
                self.dispatch_from(mem, trigger, addr, data, RegsView::Shared(regs), short_circuited)?;
            result.merge(r);
            if result.verdict == Verdict::Halt || result.exclusive {
                break;
            }
        }
        Ok(result)
    }

    /// Instruction fetch through fetch hooks.
    ///
    /// Reads up to `buf.len()` mapped bytes at `addr` and runs the fetch hooks registered for
    /// `addr`. Augment hooks may rewrite the bytes; a replacing hook gets the original bytes
    /// restored so the CPU can step over the instruction.
    pub fn fetch(
        &mut self,
        mem: &mut MemoryBus,
        regs: &mut Registers,
        addr: u32,
        buf: &mut [u8],
    ) -> Result<Fetch, PatchError> {
        let n = mem.mapped_len(addr, buf.len());
        if n == 0 {
            return Err(MemoryError::OutOfBounds { addr, len: 1 }.into());
        }
        let window = &mut buf[..n];
        mem.read_bytes(addr, window)?;
        if !self.has_hooks(TriggerKind::Fetch) {
            return Ok(Fetch::Bytes(n));
        }

        let result = self.dispatch(
            mem,
            Trigger::fetch(addr),
            addr,
            window,
            RegsView::Mutable(regs),
        )?;
        Ok(match result.verdict {
            Verdict::Proceed => Fetch::Bytes(n),
            Verdict::Replace => {
                mem.peek(addr, window)?;
                Fetch::Replaced(n)
            }
            Verdict::Halt => Fetch::Halt,
        })
    }

    /// Data read through read hooks.
    ///
    /// Hooks see the current bytes (read without side effects) before the real access. If a
    /// hook replaces the read, the backing storage is never touched. If an augment hook changed
    /// the bytes, the real access still happens but the augmented bytes are returned.
    pub fn read(
        &mut self,
        mem: &mut MemoryBus,
        regs: &Registers,
        addr: u32,
        buf: &mut [u8],
    ) -> Result<(), PatchError> {
        if !self.has_hooks(TriggerKind::Read) {
            return Ok(mem.read_bytes(addr, buf)?);
        }
        mem.peek(addr, buf)?;
        let result = self.dispatch_access(mem, TriggerKind::Read, addr, buf, regs)?;
        match result.verdict {
            Verdict::Halt => Err(PatchError::Halted { addr }),
            Verdict::Replace => Ok(()),
            Verdict::Proceed if result.modified => {
                let mut scratch = vec![0u8; buf.len()];
                mem.read_bytes(addr, &mut scratch)?;
                Ok(())
            }
            Verdict::Proceed => Ok(mem.read_bytes(addr, buf)?),
        }
    }

    /// Data write through write hooks. A replacing hook suppresses the write; augment hooks may
    /// change the bytes that get written.
    pub fn write(
        &mut self,
        mem: &mut MemoryBus,
        regs: &Registers,
        addr: u32,
        data: &[u8],
    ) -> Result<(), PatchError> {
        if !self.has_hooks(TriggerKind::Write) {
            mem.write_bytes(addr, data)?;
            return Ok(());
        }
        mem.check_mapped(addr, data.len())?;
        let mut bytes = data.to_vec();
        let result = self.dispatch_access(mem, TriggerKind::Write, addr, &mut bytes, regs)?;
        match result.verdict {
            Verdict::Halt => Err(PatchError::Halted { addr }),
            Verdict::Replace => Ok(()),
            Verdict::Proceed => {
                mem.write_bytes(addr, &bytes)?;
                Ok(())
            }
        }
    }

    /// Run the register-change hooks keyed at the instruction address `addr`.
    ///
    /// Registers are mutable. There is no original action to replace, so a `Replace` verdict
    /// counts as `Proceed`.
    pub fn register_changed(
        &mut self,
        mem: &mut MemoryBus,
        regs: &mut Registers,
        addr: u32,
    ) -> Result<Verdict, PatchError> {
        if !self.has_hooks(TriggerKind::RegisterChange) {
            return Ok(Verdict::Proceed);
        }
        let result = self.dispatch(
            mem,
            Trigger::register_change(addr),
            addr,
            &mut [],
            RegsView::Mutable(regs),
        )?;
        Ok(match result.verdict {
            Verdict::Replace => Verdict::Proceed,
            v => v,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn mem() -> MemoryBus {
        let mut mem = MemoryBus::new();
        mem.map_ram(0, 0x1_0000).unwrap();
        mem
    }

    fn recorder(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> impl FnMut(&mut HookContext<'_>) -> Result<Verdict, HookError> {
        let log = Rc::clone(log);
        move |_| {
            log.borrow_mut().push(name);
            Ok(Verdict::Proceed)
        }
    }

    #[test]
    fn priority_then_registration_order() {
        let mut engine = PatchEngine::new();
        let mut mem = mem();
        let log = Rc::new(RefCell::new(Vec::new()));
        let t = Trigger::write(0x10);
        engine.register(Hook::augment(t, recorder(&log, "low")).with_priority(1));
        engine.register(Hook::augment(t, recorder(&log, "high-a")).with_priority(5));
        engine.register(Hook::augment(t, recorder(&log, "high-b")).with_priority(5));
        engine.register(Hook::augment(t, recorder(&log, "neg")).with_priority(-3));

        engine
            .write(&mut mem, &Registers::default(), 0x10, &[1])
            .unwrap();
        assert_eq!(*log.borrow(), ["high-a", "high-b", "low", "neg"]);
    }

    #[test]
    fn stale_ids_are_rejected_after_slot_reuse() {
        let mut engine = PatchEngine::new();
        let first = engine.register(Hook::halt_at(0x100));
        engine.unregister(first).unwrap();
        let second = engine.register(Hook::halt_at(0x200));
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert_eq!(engine.unregister(first), Err(PatchError::UnknownHook(first)));
        assert_eq!(engine.set_enabled(first, false), Err(PatchError::UnknownHook(first)));
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.hooks_at(Trigger::fetch(0x200)), vec![second]);
        assert!(engine.hooks_at(Trigger::fetch(0x100)).is_empty());
    }

    #[test]
    fn observer_mutations_are_discarded() {
        let mut engine = PatchEngine::new();
        let mut mem = mem();
        mem.write_u8(0x20, 7).unwrap();
        engine.register(Hook::new(Trigger::read(0x20), HookAction::Observe, |ctx| {
            ctx.data_mut()[0] = 0xAA;
            Ok(Verdict::Replace)
        }));
        let mut buf = [0u8; 1];
        engine
            .read(&mut mem, &Registers::default(), 0x20, &mut buf)
            .unwrap();
        assert_eq!(buf, [7]);
    }

    #[test]
    fn observers_cannot_write_or_reconfigure() {
        let mut engine = PatchEngine::new();
        let mut mem = mem();
        let target = engine.register(Hook::halt_at(0x500));
        let errors = Rc::new(RefCell::new(Vec::new()));
        let e = Rc::clone(&errors);
        engine.register(Hook::new(Trigger::write(0x40), HookAction::Observe, move |ctx| {
            e.borrow_mut().push(ctx.write_u8(0x41, 0x99).unwrap_err());
            e.borrow_mut()
                .push(ctx.set_hook_enabled(target, false).unwrap_err());
            Ok(Verdict::Proceed)
        }));
        engine
            .write(&mut mem, &Registers::default(), 0x40, &[1])
            .unwrap();
        assert_eq!(
            *errors.borrow(),
            vec![
                HookError::ObserveOnly("write memory"),
                HookError::ObserveOnly("change the hook registry"),
            ]
        );
        assert_eq!(mem.read_u8(0x41).unwrap(), 0);
        assert_eq!(mem.read_u8(0x40).unwrap(), 1);
        assert_eq!(engine.is_enabled(target), Ok(true));
    }

    #[test]
    fn observer_reads_bypass_read_hooks() {
        let mut engine = PatchEngine::new();
        let mut mem = mem();
        mem.write_u16(0x70, 0x1111).unwrap();
        engine.register(Hook::override_word(0x70, 0xBEEF));
        let seen = Rc::new(RefCell::new(None));
        let s = Rc::clone(&seen);
        engine.register(Hook::new(Trigger::write(0x80), HookAction::Observe, move |ctx| {
            *s.borrow_mut() = Some(ctx.read_u16(0x70)?);
            Ok(Verdict::Proceed)
        }));
        engine
            .write(&mut mem, &Registers::default(), 0x80, &[1])
            .unwrap();
        assert_eq!(*seen.borrow(), Some(0x1111));
        assert!(engine.take_failures().is_empty());
    }

    #[test]
    fn replace_skips_later_non_observers_unless_exclusive() {
        let mut engine = PatchEngine::new();
        let mut mem = mem();
        let log = Rc::new(RefCell::new(Vec::new()));
        let t = Trigger::write(0x30);
        let l = Rc::clone(&log);
        engine.register(
            Hook::replace(t, move |_| {
                l.borrow_mut().push("replace");
                Ok(Verdict::Replace)
            })
            .with_priority(10),
        );
        engine.register(Hook::augment(t, recorder(&log, "augment")));
        let l = Rc::clone(&log);
        engine.register(Hook::observe(t, move |_| l.borrow_mut().push("observe")));

        engine
            .write(&mut mem, &Registers::default(), 0x30, &[9])
            .unwrap();
        assert_eq!(*log.borrow(), ["replace", "observe"]);
        assert_eq!(mem.read_u8(0x30).unwrap(), 0);

        let exclusive = engine.register(
            Hook::replace(t, |_| Ok(Verdict::Replace))
                .with_priority(20)
                .exclusive(),
        );
        log.borrow_mut().clear();
        engine
            .write(&mut mem, &Registers::default(), 0x30, &[9])
            .unwrap();
        assert!(log.borrow().is_empty());
        engine.unregister(exclusive).unwrap();
    }

    #[test]
    fn replace_covers_the_whole_access() {
        let mut engine = PatchEngine::new();
        let mut mem = mem();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        engine.register(Hook::replace(Trigger::write(0x50), move |_| {
            l.borrow_mut().push("replace");
            Ok(Verdict::Replace)
        }));
        engine.register(Hook::augment(Trigger::write(0x51), recorder(&log, "augment")));
        let l = Rc::clone(&log);
        engine.register(Hook::observe(Trigger::write(0x51), move |_| {
            l.borrow_mut().push("observe")
        }));

        engine
            .write(&mut mem, &Registers::default(), 0x50, &[1, 2])
            .unwrap();
        assert_eq!(*log.borrow(), ["replace", "observe"]);
        assert_eq!(mem.read_u16(0x50).unwrap(), 0);

        engine.register(
            Hook::replace(Trigger::write(0x50), |_| Ok(Verdict::Replace))
                .with_priority(5)
                .exclusive(),
        );
        log.borrow_mut().clear();
        engine
            .write(&mut mem, &Registers::default(), 0x50, &[1, 2])
            .unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn declining_replace_hook_is_rolled_back() {
        let mut engine = PatchEngine::new();
        let mut mem = mem();
        engine.register(Hook::replace(Trigger::write(0x40), |ctx| {
            ctx.data_mut()[0] = 0xEE;
            Ok(Verdict::Proceed)
        }));
        engine
            .write(&mut mem, &Registers::default(), 0x40, &[0x11])
            .unwrap();
        assert_eq!(mem.read_u8(0x40).unwrap(), 0x11);
    }

    #[test]
    fn failing_hook_does_not_disturb_others() {
        let mut engine = PatchEngine::new();
        let mut mem = mem();
        let t = Trigger::write(0x50);
        let bad = engine.register(
            Hook::augment(t, |ctx| {
                ctx.data_mut()[0] = 0xFF;
                Err(HookError::msg("boom"))
            })
            .with_priority(1)
            .with_label("bad"),
        );
        engine.register(Hook::augment(t, |ctx| {
            ctx.data_mut()[0] += 1;
            Ok(Verdict::Proceed)
        }));
        engine
            .write(&mut mem, &Registers::default(), 0x50, &[1])
            .unwrap();
        assert_eq!(mem.read_u8(0x50).unwrap(), 2);

        let failures = engine.take_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, bad);
        assert_eq!(failures[0].label, "bad");
        assert_eq!(failures[0].error, HookError::msg("boom"));
        assert!(engine.take_failures().is_empty());
    }

    #[test]
    fn nested_access_to_same_trigger_is_a_cycle() {
        let mut engine = PatchEngine::new();
        let mut mem = mem();
        let seen = Rc::new(RefCell::new(None));
        let s = Rc::clone(&seen);
        engine.register(Hook::augment(Trigger::read(0x60), move |ctx| {
            let err = ctx.read_u8(0x60).unwrap_err();
            *s.borrow_mut() = Some(err);
            Ok(Verdict::Proceed)
        }));
        let mut buf = [0u8; 1];
        engine
            .read(&mut mem, &Registers::default(), 0x60, &mut buf)
            .unwrap();
        assert_eq!(
            seen.borrow().clone(),
            Some(HookError::Patch(PatchError::HookCycleDetected {
                addr: 0x60,
                kind: TriggerKind::Read
            }))
        );
    }

    #[test]
    fn nested_access_to_other_address_dispatches() {
        let mut engine = PatchEngine::new();
        let mut mem = mem();
        mem.write_u8(0x71, 5).unwrap();
        engine.register(Hook::override_word(0x70, 0xBEEF));
        engine.register(Hook::augment(Trigger::read(0x80), |ctx| {
            let v = ctx.read_u16(0x70)?;
            ctx.set_value(u32::from(v >> 8));
            Ok(Verdict::Proceed)
        }));
        let mut buf = [0u8; 1];
        engine
            .read(&mut mem, &Registers::default(), 0x80, &mut buf)
            .unwrap();
        assert_eq!(buf, [0xBE]);
    }

    #[test]
    fn override_word_patches_overlapping_reads() {
        let mut engine = PatchEngine::new();
        let mut mem = mem();
        mem.write_u32(0x100, 0x4433_2211).unwrap();
        engine.register(Hook::override_word(0x101, 0xBBAA));
        let regs = Registers::default();

        let mut dword = [0u8; 4];
        engine.read(&mut mem, &regs, 0x100, &mut dword).unwrap();
        assert_eq!(dword, [0x11, 0xAA, 0xBB, 0x44]);

        let mut byte = [0u8; 1];
        engine.read(&mut mem, &regs, 0x102, &mut byte).unwrap();
        assert_eq!(byte, [0xBB]);
        engine.read(&mut mem, &regs, 0x103, &mut byte).unwrap();
        assert_eq!(byte, [0x44]);

        // The image itself is untouched.
        assert_eq!(mem.read_u32(0x100).unwrap(), 0x4433_2211);
    }

    #[test]
    fn replaced_read_skips_backing_storage() {
        let mut engine = PatchEngine::new();
        let mut mem = mem();
        engine.register(Hook::replace(Trigger::read(0x90), |ctx| {
            ctx.set_value(0x1234);
            Ok(Verdict::Replace)
        }));
        let mut buf = [0u8; 2];
        engine
            .read(&mut mem, &Registers::default(), 0x90, &mut buf)
            .unwrap();
        assert_eq!(u16::from_le_bytes(buf), 0x1234);
    }

    #[test]
    fn halt_on_write_leaves_memory_untouched() {
        let mut engine = PatchEngine::new();
        let mut mem = mem();
        engine.register(Hook::replace(Trigger::write(0xA0), |_| Ok(Verdict::Halt)));
        let err = engine
            .write(&mut mem, &Registers::default(), 0xA0, &[1, 2])
            .unwrap_err();
        assert_eq!(err, PatchError::Halted { addr: 0xA0 });
        assert_eq!(mem.read_u16(0xA0).unwrap(), 0);
    }

    #[test]
    fn fetch_augment_rewrites_instruction_bytes() {
        let mut engine = PatchEngine::new();
        let mut mem = mem();
        mem.write_bytes(0x100, &[0x90, 0x90]).unwrap();
        engine.register(Hook::augment(Trigger::fetch(0x100), |ctx| {
            ctx.data_mut()[0] = 0xF4;
            Ok(Verdict::Proceed)
        }));
        let mut regs = Registers::default();
        let mut buf = [0u8; 16];
        let fetch = engine.fetch(&mut mem, &mut regs, 0x100, &mut buf).unwrap();
        assert_eq!(fetch, Fetch::Bytes(16));
        assert_eq!(buf[0], 0xF4);
        assert_eq!(mem.read_u8(0x100).unwrap(), 0x90);
    }

    #[test]
    fn register_change_hooks_can_edit_registers() {
        let mut engine = PatchEngine::new();
        let mut mem = mem();
        engine.register(Hook::augment(Trigger::register_change(0x100), |ctx| {
            if let Some(regs) = ctx.registers_mut() {
                regs.ax = 0x55;
            }
            Ok(Verdict::Replace)
        }));
        let mut regs = Registers::default();
        let verdict = engine.register_changed(&mut mem, &mut regs, 0x100).unwrap();
        assert_eq!(verdict, Verdict::Proceed);
        assert_eq!(regs.ax, 0x55);
    }

    #[test]
    fn disabled_hooks_do_not_fire() {
        let mut engine = PatchEngine::new();
        let mut mem = mem();
        let id = engine.register(Hook::halt_at(0x100).disabled());
        let mut regs = Registers::default();
        let mut buf = [0u8; 4];
        assert_eq!(
            engine.fetch(&mut mem, &mut regs, 0x100, &mut buf).unwrap(),
            Fetch::Bytes(4)
        );
        engine.set_enabled(id, true).unwrap();
        assert_eq!(
            engine.fetch(&mut mem, &mut regs, 0x100, &mut buf).unwrap(),
            Fetch::Halt
        );
    }

    #[test]
    fn hook_can_disable_itself() {
        let mut engine = PatchEngine::new();
        let mut mem = mem();
        let count = Rc::new(RefCell::new(0));
        let c = Rc::clone(&count);
        let id = Rc::new(RefCell::new(None::<HookId>));
        let slot = Rc::clone(&id);
        let hook_id = engine.register(Hook::augment(Trigger::write(0x10), move |ctx| {
            *c.borrow_mut() += 1;
            if let Some(me) = *slot.borrow() {
                ctx.set_hook_enabled(me, false)?;
            }
            Ok(Verdict::Proceed)
        }));
        *id.borrow_mut() = Some(hook_id);
        let regs = Registers::default();
        engine.write(&mut mem, &regs, 0x10, &[1]).unwrap();
        engine.write(&mut mem, &regs, 0x10, &[1]).unwrap();
        assert_eq!(*count.borrow(), 1);
        assert_eq!(engine.is_enabled(hook_id), Ok(false));
    }

    #[test]
    fn descriptors_round_trip_through_re_registration() {
        let build = |engine: &mut PatchEngine| {
            let a = engine.register(Hook::halt_at(0x100));
            let b = engine.register(Hook::override_word(0x200, 1).with_priority(3));
            let c = engine.register(Hook::halt_at(0x300));
            engine.unregister(b).unwrap();
            (a, c)
        };

        let mut original = PatchEngine::new();
        let (_, c) = build(&mut original);
        original.set_enabled(c, false).unwrap();
        let state = original.descriptors();

        let mut fresh = PatchEngine::new();
        let (_, c2) = build(&mut fresh);
        assert_eq!(c, c2);
        fresh.restore_descriptors(&state).unwrap();
        assert_eq!(fresh.is_enabled(c2), Ok(false));
        assert_eq!(fresh.descriptors(), state);

        // The allocator continues identically.
        let next_a = original.register(Hook::halt_at(0x400));
        let next_b = fresh.register(Hook::halt_at(0x400));
        assert_eq!(next_a, next_b);
    }

    #[test]
    fn restore_rejects_mismatched_registry() {
        let mut original = PatchEngine::new();
        original.register(Hook::halt_at(0x100));
        let state = original.descriptors();

        let mut other = PatchEngine::new();
        let id = other.register(Hook::halt_at(0x100).with_priority(9));
        assert!(matches!(
            other.restore_descriptors(&state),
            Err(PatchError::RegistryMismatch(_))
        ));
        other.set_enabled(id, false).unwrap();
        assert_eq!(other.is_enabled(id), Ok(false));
    }
}
