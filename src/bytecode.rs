// bytecode.rs - Opcode set and a small assembler for authoring snippets

// ============================================================================
// OPCODES
// ============================================================================
// Each instruction is one opcode byte, optionally followed by a little-endian
// immediate: LIT carries 4 bytes, JMP/JZ carry 2 (signed, relative to the
// byte after the immediate).

/* Stack */
pub const OP_LIT: u8 = 0x01; /* + i32 (4 bytes LE) */
pub const OP_LIT0: u8 = 0x02;
pub const OP_LIT1: u8 = 0x03;
pub const OP_DUP: u8 = 0x04;
pub const OP_DROP: u8 = 0x05;
pub const OP_SWAP: u8 = 0x06;
pub const OP_OVER: u8 = 0x07;

/* Arithmetic (signed, wrapping) */
pub const OP_ADD: u8 = 0x10;
pub const OP_SUB: u8 = 0x11;
pub const OP_MUL: u8 = 0x12;
pub const OP_DIV: u8 = 0x13;

/* Comparison (-1 = true, 0 = false) */
pub const OP_EQ: u8 = 0x18;
pub const OP_LT: u8 = 0x19;

/* Control flow */
pub const OP_JMP: u8 = 0x20; /* + i16 offset (2 bytes LE) */
pub const OP_JZ: u8 = 0x21; /* + i16 offset (2 bytes LE) */
pub const OP_RET: u8 = 0x22;

/* Return stack */
pub const OP_TOR: u8 = 0x28;
pub const OP_FROMR: u8 = 0x29;

/* Memory (4-aligned 32-bit, arena or MMIO window) */
pub const OP_LOAD: u8 = 0x2A;
pub const OP_STORE: u8 = 0x2B;

/* Tasking */
pub const OP_TASK_YIELD: u8 = 0x30;
pub const OP_TASK_SLEEP: u8 = 0x31;

// ============================================================================
// LITTLE-ENDIAN READERS
// ============================================================================

pub(crate) fn read_i32_le(b: &[u8]) -> i32 {
    i32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

pub(crate) fn read_i16_le(b: &[u8]) -> i16 {
    i16::from_le_bytes([b[0], b[1]])
}

// ============================================================================
// ASSEMBLER
// ============================================================================

/// Byte-level bytecode builder.
///
/// Emits opcodes and immediates in wire order, with forward-jump patching:
///
/// ```
/// use forge::bytecode::*;
///
/// let mut a = Asm::new();
/// a.lit(10);
/// let exit = a.jz();        // placeholder offset, patched below
/// a.op(OP_LIT1);
/// a.op(OP_ADD);
/// a.patch(exit, a.here());
/// a.op(OP_RET);
/// let code = a.into_bytes();
/// ```
#[derive(Debug, Default)]
pub struct Asm {
    bytes: Vec<u8>,
}

impl Asm {
    pub fn new() -> Self {
        Asm::default()
    }

    /// Current offset, usable as a branch target.
    pub fn here(&self) -> usize {
        self.bytes.len()
    }

    /// Emit a bare opcode.
    pub fn op(&mut self, op: u8) -> &mut Self {
        self.bytes.push(op);
        self
    }

    /// Emit `LIT n`.
    pub fn lit(&mut self, n: i32) -> &mut Self {
        self.bytes.push(OP_LIT);
        self.bytes.extend_from_slice(&n.to_le_bytes());
        self
    }

    /// Emit `JMP` with a placeholder offset; returns the immediate's
    /// position for a later [`Asm::patch`].
    pub fn jmp(&mut self) -> usize {
        self.branch(OP_JMP)
    }

    /// Emit `JZ` with a placeholder offset; returns the immediate's
    /// position for a later [`Asm::patch`].
    pub fn jz(&mut self) -> usize {
        self.branch(OP_JZ)
    }

    /// Emit `JMP` with a resolved relative offset.
    pub fn jmp_rel(&mut self, off: i16) -> &mut Self {
        self.bytes.push(OP_JMP);
        self.bytes.extend_from_slice(&off.to_le_bytes());
        self
    }

    /// Emit `JZ` with a resolved relative offset.
    pub fn jz_rel(&mut self, off: i16) -> &mut Self {
        self.bytes.push(OP_JZ);
        self.bytes.extend_from_slice(&off.to_le_bytes());
        self
    }

    fn branch(&mut self, op: u8) -> usize {
        self.bytes.push(op);
        let at = self.bytes.len();
        self.bytes.extend_from_slice(&0i16.to_le_bytes());
        at
    }

    /// Resolve a placeholder emitted by [`Asm::jmp`]/[`Asm::jz`] so that it
    /// branches to `target`. Offsets are measured from the byte after the
    /// immediate.
    pub fn patch(&mut self, imm_at: usize, target: usize) {
        let off = target as isize - (imm_at as isize + 2);
        let off = off as i16;
        self.bytes[imm_at..imm_at + 2].copy_from_slice(&off.to_le_bytes());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
