// vm.rs - VM facade: lifecycle, dictionary, execution, stacks, memory, panic

use tracing::{debug, error};

use crate::dictionary::Dictionary;
use crate::errors::{VmError, VmResult};
use crate::memory::{MemoryMap, MmioWindow};
use crate::message::MsgQueue;
use crate::panic::{PanicHook, PanicInfo};
use crate::platform::{HostPlatform, Platform};
use crate::scheduler::Scheduler;
use crate::stacks::{Stack, DS_SIZE, RS_SIZE};

/// Everything a VM borrows or is handed at creation: the byte arena, any
/// MMIO windows mapped over it, and the platform services.
pub struct VmConfig<'a> {
    pub arena: &'a mut [u8],
    pub windows: Vec<MmioWindow>,
    pub platform: Box<dyn Platform>,
}

impl<'a> VmConfig<'a> {
    /// Config over `arena` with no MMIO windows and the host platform.
    pub fn new(arena: &'a mut [u8]) -> Self {
        VmConfig {
            arena,
            windows: Vec::new(),
            platform: Box::new(HostPlatform::new()),
        }
    }

    pub fn with_platform(mut self, platform: Box<dyn Platform>) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_window(mut self, window: MmioWindow) -> Self {
        self.windows.push(window);
        self
    }
}

/// The virtual machine: shared interpreter stacks, word dictionary, memory
/// map, task scheduler, and message queue.
///
/// Bytecode registered in the dictionary and the arena are borrowed for the
/// VM's lifetime; dropping the VM releases everything it owns (word names,
/// task stack buffers).
pub struct Vm<'a> {
    pub(crate) ds: Stack,
    pub(crate) rs: Stack,
    pub(crate) mem: MemoryMap<'a>,
    pub(crate) dict: Dictionary<'a>,
    pub(crate) sched: Scheduler,
    pub(crate) msgq: MsgQueue,
    pub(crate) platform: Box<dyn Platform>,
    panic_hook: Option<PanicHook>,
    last_err: Option<VmError>,
}

impl<'a> Vm<'a> {
    pub fn new(cfg: VmConfig<'a>) -> Self {
        debug!(
            arena_bytes = cfg.arena.len(),
            windows = cfg.windows.len(),
            "vm created"
        );
        Vm {
            ds: Stack::with_capacity(DS_SIZE),
            rs: Stack::with_capacity(RS_SIZE),
            mem: MemoryMap::new(cfg.arena, cfg.windows),
            dict: Dictionary::new(),
            sched: Scheduler::new(),
            msgq: MsgQueue::new(),
            platform: cfg.platform,
            panic_hook: None,
            last_err: None,
        }
    }

    /// Empty both stacks and clear the last error. The dictionary, task
    /// table, and message queue are untouched.
    pub fn reset(&mut self) {
        self.ds.clear();
        self.rs.clear();
        self.last_err = None;
    }

    // ========================================================================
    // DICTIONARY
    // ========================================================================

    /// Register a word; returns its index. The index stays valid for the
    /// VM's lifetime.
    pub fn register_word(&mut self, name: Option<&str>, code: &'a [u8]) -> VmResult<usize> {
        let idx = self.dict.register(name, code)?;
        debug!(idx, name = name.unwrap_or("<anon>"), len = code.len(), "word registered");
        Ok(idx)
    }

    /// Index of the first word registered under `name`.
    pub fn find_word(&self, name: &str) -> VmResult<usize> {
        self.dict.find(name)
    }

    pub fn word_count(&self) -> usize {
        self.dict.len()
    }

    // ========================================================================
    // EXECUTION
    // ========================================================================

    /// Execute the word at `word_idx`.
    pub fn exec(&mut self, word_idx: usize) -> VmResult<()> {
        let code = self.dict.code(word_idx)?;
        self.exec_raw(code)
    }

    /// Execute a raw bytecode slice from offset 0.
    ///
    /// On a fatal error the VM captures a [`PanicInfo`] snapshot, invokes
    /// the registered panic hook (if any), records the error, and returns
    /// it. The stacks are left as the faulting program left them.
    pub fn exec_raw(&mut self, code: &[u8]) -> VmResult<()> {
        if code.is_empty() {
            return Err(VmError::InvalidArg);
        }

        match self.run(code) {
            Ok(()) => Ok(()),
            Err(fault) => {
                self.last_err = Some(fault.err);
                let info = PanicInfo::capture(fault.err.code(), fault.pc as u32, &self.ds, &self.rs);
                error!(code = info.error_code, pc = info.pc, "vm fault");
                if let Some(hook) = self.panic_hook.as_mut() {
                    hook(&info);
                }
                Err(fault.err)
            }
        }
    }

    /// Error recorded by the most recent faulting execution.
    pub fn last_error(&self) -> Option<VmError> {
        self.last_err
    }

    // ========================================================================
    // DATA STACK
    // ========================================================================

    pub fn ds_push(&mut self, value: i32) -> VmResult<()> {
        self.ds.push(value)
    }

    pub fn ds_pop(&mut self) -> VmResult<i32> {
        self.ds.pop()
    }

    /// Value `n` cells down from the top of the data stack (0 = TOS).
    pub fn ds_peek(&self, n: usize) -> VmResult<i32> {
        self.ds.peek(n)
    }

    pub fn ds_depth(&self) -> usize {
        self.ds.depth()
    }

    pub fn rs_depth(&self) -> usize {
        self.rs.depth()
    }

    // ========================================================================
    // MEMORY
    // ========================================================================

    /// 32-bit little-endian read at a 4-aligned arena address. Addresses
    /// inside a registered MMIO window go to the window's handler.
    pub fn mem_read32(&mut self, addr: u32) -> VmResult<i32> {
        self.mem.read32(addr)
    }

    /// 32-bit little-endian write; same alignment, bounds, and MMIO routing
    /// rules as [`Vm::mem_read32`].
    pub fn mem_write32(&mut self, addr: u32, value: i32) -> VmResult<()> {
        self.mem.write32(addr, value)
    }

    /// Arena size in bytes.
    pub fn mem_size(&self) -> usize {
        self.mem.size()
    }

    // ========================================================================
    // PANIC SURFACE
    // ========================================================================

    /// Install the fatal-error hook. Replaces any previous hook.
    pub fn set_panic_handler(&mut self, hook: PanicHook) {
        self.panic_hook = Some(hook);
    }

    pub fn clear_panic_handler(&mut self) {
        self.panic_hook = None;
    }

    // ========================================================================
    // KERNEL STATISTICS
    // ========================================================================

    pub fn context_switches(&self) -> u32 {
        self.sched.context_switches()
    }

    pub fn preemptions(&self) -> u32 {
        self.sched.preemptions()
    }
}
