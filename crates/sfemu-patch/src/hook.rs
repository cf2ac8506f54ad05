use std::fmt;

use crate::context::HookContext;
use crate::error::HookError;

/// Point in the CPU's access path where a hook can intercept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TriggerKind {
    Fetch,
    Read,
    Write,
    RegisterChange,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 4] = [
        TriggerKind::Fetch,
        TriggerKind::Read,
        TriggerKind::Write,
        TriggerKind::RegisterChange,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(usize::from(v)).copied()
    }

    /// Data triggers fire for any hook address inside the accessed byte range.
    pub fn is_data(self) -> bool {
        matches!(self, TriggerKind::Read | TriggerKind::Write)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub addr: u32,
}

impl Trigger {
    pub fn fetch(addr: u32) -> Self {
        Self {
            kind: TriggerKind::Fetch,
            addr,
        }
    }

    pub fn read(addr: u32) -> Self {
        Self {
            kind: TriggerKind::Read,
            addr,
        }
    }

    pub fn write(addr: u32) -> Self {
        Self {
            kind: TriggerKind::Write,
            addr,
        }
    }

    pub fn register_change(addr: u32) -> Self {
        Self {
            kind: TriggerKind::RegisterChange,
            addr,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@0x{:05x}", self.kind, self.addr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookAction {
    /// Performs the trigger's work itself; the original access or instruction is suppressed.
    Replace,
    /// Sees the trigger but can never change the outcome.
    Observe,
    /// May rewrite the access data or registers, then the original behavior proceeds.
    Augment,
}

impl HookAction {
    pub fn to_u8(self) -> u8 {
        match self {
            HookAction::Replace => 0,
            HookAction::Observe => 1,
            HookAction::Augment => 2,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(HookAction::Replace),
            1 => Some(HookAction::Observe),
            2 => Some(HookAction::Augment),
            _ => None,
        }
    }
}

/// What a hook callback asks the dispatcher to do with the trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Proceed,
    Replace,
    Halt,
}

/// Opaque handle to a registered hook.
///
/// The generation distinguishes a live hook from an earlier one that occupied the same slot, so a
/// handle kept across `unregister` is rejected instead of silently aliasing a newer hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HookId {
    index: u32,
    generation: u32,
}

impl HookId {
    pub fn from_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

pub type HookFn = Box<dyn FnMut(&mut HookContext<'_>) -> Result<Verdict, HookError>>;

/// A hook waiting to be registered with a [`crate::PatchEngine`].
pub struct Hook {
    pub trigger: Trigger,
    /// Number of bytes starting at `trigger.addr` the hook covers. Only meaningful for data
    /// triggers; instruction and register triggers always match a single address.
    pub span: u32,
    pub priority: i32,
    pub action: HookAction,
    pub exclusive: bool,
    pub enabled: bool,
    pub label: String,
    pub(crate) callback: HookFn,
}

impl Hook {
    pub fn new<F>(trigger: Trigger, action: HookAction, callback: F) -> Self
    where
        F: FnMut(&mut HookContext<'_>) -> Result<Verdict, HookError> + 'static,
    {
        Self {
            trigger,
            span: 1,
            priority: 0,
            action,
            exclusive: false,
            enabled: true,
            label: String::new(),
            callback: Box::new(callback),
        }
    }

    pub fn replace<F>(trigger: Trigger, callback: F) -> Self
    where
        F: FnMut(&mut HookContext<'_>) -> Result<Verdict, HookError> + 'static,
    {
        Self::new(trigger, HookAction::Replace, callback)
    }

    pub fn augment<F>(trigger: Trigger, callback: F) -> Self
    where
        F: FnMut(&mut HookContext<'_>) -> Result<Verdict, HookError> + 'static,
    {
        Self::new(trigger, HookAction::Augment, callback)
    }

    /// An observer whose callback cannot influence the outcome.
    pub fn observe<F>(trigger: Trigger, mut callback: F) -> Self
    where
        F: FnMut(&HookContext<'_>) + 'static,
    {
        Self::new(trigger, HookAction::Observe, move |ctx| {
            callback(ctx);
            Ok(Verdict::Proceed)
        })
    }

    /// Halt the CPU before the instruction at `addr` executes.
    pub fn halt_at(addr: u32) -> Self {
        Self::replace(Trigger::fetch(addr), |_| Ok(Verdict::Halt)).with_label("halt")
    }

    /// Present `value` as the little-endian word at `addr..addr + 2` to every data read that
    /// touches it, leaving the image untouched.
    pub fn override_word(addr: u32, value: u16) -> Self {
        let bytes = value.to_le_bytes();
        let mut hook = Self::augment(Trigger::read(addr), move |ctx| {
            let base = ctx.access_addr();
            for (i, byte) in ctx.data_mut().iter_mut().enumerate() {
                let at = base.wrapping_add(i as u32);
                if let Some(offset) = at.checked_sub(addr).filter(|&o| o < 2) {
                    *byte = bytes[offset as usize];
                }
            }
            Ok(Verdict::Proceed)
        })
        .with_label(format!("override word 0x{addr:05x}"));
        hook.span = 2;
        hook
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_span(mut self, span: u32) -> Self {
        self.span = span.max(1);
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("trigger", &self.trigger)
            .field("span", &self.span)
            .field("priority", &self.priority)
            .field("action", &self.action)
            .field("exclusive", &self.exclusive)
            .field("enabled", &self.enabled)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Everything about a registered hook except its callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookDescriptor {
    pub id: HookId,
    pub trigger: Trigger,
    pub span: u32,
    pub priority: i32,
    pub action: HookAction,
    pub exclusive: bool,
    pub enabled: bool,
    pub label: String,
    /// Registration sequence number; breaks priority ties.
    pub seq: u64,
}

/// Serialisable state of the hook registry.
///
/// Callbacks cannot be persisted, so restoring requires the host to have registered the same hooks
/// in the same order first; the saved state then re-applies enabled flags and the id allocator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryState {
    pub hooks: Vec<HookDescriptor>,
    /// Generation of every arena slot, live or free.
    pub generations: Vec<u32>,
    pub free: Vec<u32>,
    pub next_seq: u64,
}
