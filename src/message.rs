// message.rs - Inter-task message ring with filtered receive

use tracing::trace;

use crate::errors::{VmError, VmResult};
use crate::vm::Vm;

/// Capacity of the global message ring.
pub const MSG_QUEUE_SIZE: usize = 16;

/// Destination id addressing every task.
pub const BROADCAST: u8 = 0xFF;

/// One inter-task message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Message {
    pub src_task: u8,
    pub dst_task: u8,
    pub msg_type: u8,
    pub flags: u8,
    pub data: i32,
}

/// Bounded FIFO ring shared by all tasks.
///
/// Receive filters by type and destination; a removed message compacts the
/// ring so the remaining messages keep their arrival order.
pub struct MsgQueue {
    ring: [Message; MSG_QUEUE_SIZE],
    read_idx: usize,
    write_idx: usize,
    count: usize,
}

impl MsgQueue {
    pub fn new() -> Self {
        MsgQueue {
            ring: [Message::default(); MSG_QUEUE_SIZE],
            read_idx: 0,
            write_idx: 0,
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == MSG_QUEUE_SIZE
    }

    pub(crate) fn push(&mut self, msg: Message) -> VmResult<()> {
        if self.is_full() {
            return Err(VmError::MsgQueueFull);
        }
        self.ring[self.write_idx] = msg;
        self.write_idx = (self.write_idx + 1) % MSG_QUEUE_SIZE;
        self.count += 1;
        Ok(())
    }

    /// Remove and return the oldest message matching `msg_type` that is
    /// addressed to `me` or broadcast. Later messages shift down one slot so
    /// FIFO order among the survivors is preserved.
    pub(crate) fn take_matching(&mut self, msg_type: u8, me: u8) -> Option<(i32, u8)> {
        for i in 0..self.count {
            let idx = (self.read_idx + i) % MSG_QUEUE_SIZE;
            let msg = self.ring[idx];
            if msg.msg_type != msg_type {
                continue;
            }
            if msg.dst_task != me && msg.dst_task != BROADCAST {
                continue;
            }

            for j in i..self.count - 1 {
                let a = (self.read_idx + j) % MSG_QUEUE_SIZE;
                let b = (self.read_idx + j + 1) % MSG_QUEUE_SIZE;
                self.ring[a] = self.ring[b];
            }
            self.count -= 1;
            self.write_idx = (self.write_idx + MSG_QUEUE_SIZE - 1) % MSG_QUEUE_SIZE;

            return Some((msg.data, msg.src_task));
        }
        None
    }
}

impl Default for MsgQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MESSAGING API
// ============================================================================

impl Vm<'_> {
    /// Queue a message for `dst` (or [`BROADCAST`]). The current task is
    /// stamped as the source. Never blocks; a full ring is an error the
    /// caller inspects.
    pub fn msg_send(&mut self, dst: u8, msg_type: u8, data: i32) -> VmResult<()> {
        let src = self.sched.current;
        self.critical_enter();
        let r = self.msgq.push(Message {
            src_task: src,
            dst_task: dst,
            msg_type,
            flags: 0,
            data,
        });
        self.critical_exit();
        if r.is_ok() {
            trace!(src, dst, msg_type, "message queued");
        }
        r
    }

    /// Receive the oldest message of `msg_type` addressed to the current
    /// task or broadcast, returning `(data, src_task)`.
    ///
    /// Non-blocking receive reports `NoMessage` on a miss. Blocking receive
    /// yields to the scheduler between polls; `timeout_ms` of 0 waits
    /// forever, otherwise `NoMessage` is returned once the timeout elapses.
    pub fn msg_receive(
        &mut self,
        msg_type: u8,
        blocking: bool,
        timeout_ms: u32,
    ) -> VmResult<(i32, u8)> {
        let start = if blocking { self.platform.now_ms() } else { 0 };
        // Receiver identity is pinned at entry; yields below may run other
        // tasks in between polls.
        let me = self.sched.current;

        loop {
            self.critical_enter();
            let hit = self.msgq.take_matching(msg_type, me);
            self.critical_exit();

            if let Some((data, src)) = hit {
                trace!(dst = me, src, msg_type, "message delivered");
                return Ok((data, src));
            }

            if !blocking {
                return Err(VmError::NoMessage);
            }
            if timeout_ms > 0 && self.platform.now_ms().wrapping_sub(start) >= timeout_ms {
                return Err(VmError::NoMessage);
            }

            self.task_yield()?;
        }
    }

    /// Number of queued messages.
    pub fn msg_count(&self) -> usize {
        self.msgq.len()
    }
}
