// interp.rs - Bytecode dispatch loop

use crate::bytecode::{self, read_i16_le, read_i32_le};
use crate::errors::{VmError, VmResult};
use crate::vm::Vm;

/// An execution error plus the offset of the opcode that raised it.
pub(crate) struct Fault {
    pub err: VmError,
    pub pc: usize,
}

/// What an executed instruction does to the instruction stream.
enum Flow {
    Continue,
    Halt,
}

impl Vm<'_> {
    /// Execute `code` from offset 0 until RET, the end of the slice, or an
    /// error. Falling off the end without RET is a normal return.
    pub(crate) fn run(&mut self, code: &[u8]) -> Result<(), Fault> {
        let mut ip = 0usize;

        while ip < code.len() {
            if let Err(err) = self.maybe_preempt() {
                return Err(Fault { err, pc: ip });
            }

            let at = ip;
            match self.step(code, &mut ip) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Halt) => return Ok(()),
                Err(err) => return Err(Fault { err, pc: at }),
            }
        }

        Ok(())
    }

    /// Decode and execute the instruction at `*ip`, advancing it.
    fn step(&mut self, code: &[u8], ip: &mut usize) -> VmResult<Flow> {
        let len = code.len();
        let op = code[*ip];
        *ip += 1;

        match op {
            bytecode::OP_LIT => {
                if *ip + 4 > len {
                    return Err(VmError::InvalidOpcode);
                }
                let v = read_i32_le(&code[*ip..]);
                *ip += 4;
                self.ds.push(v)?;
            }
            bytecode::OP_LIT0 => self.ds.push(0)?,
            bytecode::OP_LIT1 => self.ds.push(1)?,

            bytecode::OP_DUP => {
                let a = self.ds.peek(0)?;
                self.ds.push(a)?;
            }
            bytecode::OP_DROP => {
                self.ds.pop()?;
            }
            bytecode::OP_SWAP => {
                let a = self.ds.pop()?;
                let b = self.ds.pop()?;
                self.ds.push(a)?;
                self.ds.push(b)?;
            }
            bytecode::OP_OVER => {
                let a = self.ds.peek(1)?;
                self.ds.push(a)?;
            }

            bytecode::OP_ADD => {
                let a = self.ds.pop()?;
                let b = self.ds.pop()?;
                self.ds.push(b.wrapping_add(a))?;
            }
            bytecode::OP_SUB => {
                let a = self.ds.pop()?;
                let b = self.ds.pop()?;
                self.ds.push(b.wrapping_sub(a))?;
            }
            bytecode::OP_MUL => {
                let a = self.ds.pop()?;
                let b = self.ds.pop()?;
                self.ds.push(b.wrapping_mul(a))?;
            }
            bytecode::OP_DIV => {
                let a = self.ds.pop()?;
                let b = self.ds.pop()?;
                if a == 0 {
                    return Err(VmError::DivByZero);
                }
                self.ds.push(b.wrapping_div(a))?;
            }

            bytecode::OP_EQ => {
                let a = self.ds.pop()?;
                let b = self.ds.pop()?;
                self.ds.push(if b == a { -1 } else { 0 })?;
            }
            bytecode::OP_LT => {
                let a = self.ds.pop()?;
                let b = self.ds.pop()?;
                self.ds.push(if b < a { -1 } else { 0 })?;
            }

            bytecode::OP_JMP => {
                let off = read_branch(code, ip)?;
                branch_to(len, ip, off)?;
            }
            bytecode::OP_JZ => {
                let off = read_branch(code, ip)?;
                let cond = self.ds.pop()?;
                if cond == 0 {
                    branch_to(len, ip, off)?;
                }
            }
            bytecode::OP_RET => return Ok(Flow::Halt),

            bytecode::OP_TOR => {
                let v = self.ds.pop()?;
                self.rs.push(v)?;
            }
            bytecode::OP_FROMR => {
                let v = self.rs.pop()?;
                self.ds.push(v)?;
            }

            bytecode::OP_LOAD => {
                let addr = self.ds.pop()? as u32;
                let v = self.mem.read32(addr)?;
                self.ds.push(v)?;
            }
            bytecode::OP_STORE => {
                let addr = self.ds.pop()? as u32;
                let v = self.ds.pop()?;
                self.mem.write32(addr, v)?;
            }

            bytecode::OP_TASK_YIELD => self.task_yield()?,
            bytecode::OP_TASK_SLEEP => {
                let ms = self.ds.pop()?;
                self.task_sleep(ms as u32)?;
            }

            _ => return Err(VmError::InvalidOpcode),
        }

        Ok(Flow::Continue)
    }

    /// Scheduling point between opcodes: once the time slice since the last
    /// scheduling decision has expired, any live task set gets a selection
    /// pass. A resulting switch counts as a preemption.
    fn maybe_preempt(&mut self) -> VmResult<()> {
        if self.sched.task_count == 0 {
            return Ok(());
        }
        let now = self.platform.now_ms();
        if now.wrapping_sub(self.sched.tick_count) < self.sched.time_slice_ms {
            return Ok(());
        }

        let before = self.sched.current;
        self.schedule()?;
        if self.sched.current != before {
            self.sched.preemptions += 1;
        }
        Ok(())
    }
}

fn read_branch(code: &[u8], ip: &mut usize) -> VmResult<i16> {
    if *ip + 2 > code.len() {
        return Err(VmError::InvalidOpcode);
    }
    let off = read_i16_le(&code[*ip..]);
    *ip += 2;
    Ok(off)
}

/// Apply a relative branch. Offsets are measured from the byte after the
/// immediate; a target exactly at the end of the code is a valid
/// fall-through exit.
fn branch_to(len: usize, ip: &mut usize, off: i16) -> VmResult<()> {
    let target = *ip as isize + off as isize;
    if target < 0 || target > len as isize {
        return Err(VmError::OutOfBounds);
    }
    *ip = target as usize;
    Ok(())
}
