// task.rs - Task lifecycle API: spawn, yield, sleep, exit

use tracing::debug;

use crate::errors::{VmError, VmResult};
use crate::scheduler::{TaskState, MAX_TASKS};
use crate::stacks::{DS_SIZE, RS_SIZE};
use crate::vm::Vm;

/// Snapshot of one task slot, for host-side inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub state: TaskState,
    pub priority: u8,
    pub exec_count: u16,
}

impl Vm<'_> {
    /// Spawn a task executing the word at `word_idx` from offset 0.
    ///
    /// Allocates the task's private stack buffers (`ds_size`/`rs_size`
    /// cells, capped at the shared stack capacities) and marks the first
    /// free slot Ready. Returns the slot id.
    pub fn task_spawn(
        &mut self,
        word_idx: usize,
        priority: u8,
        ds_size: usize,
        rs_size: usize,
    ) -> VmResult<u8> {
        if word_idx >= self.dict.len() {
            return Err(VmError::InvalidArg);
        }
        if ds_size > DS_SIZE || rs_size > RS_SIZE {
            return Err(VmError::InvalidArg);
        }

        self.critical_enter();
        let r = self.spawn_locked(word_idx, priority, ds_size, rs_size);
        self.critical_exit();

        if let Ok(slot) = r {
            debug!(slot, word_idx, priority, "task spawned");
        }
        r
    }

    fn spawn_locked(
        &mut self,
        word_idx: usize,
        priority: u8,
        ds_size: usize,
        rs_size: usize,
    ) -> VmResult<u8> {
        let slot = self
            .sched
            .tasks
            .iter()
            .position(|t| t.state == TaskState::Dead)
            .ok_or(VmError::TaskLimit)?;

        let task = &mut self.sched.tasks[slot];
        task.word_idx = word_idx as u16;
        task.pc = 0;
        task.ds_saved = Vec::with_capacity(ds_size);
        task.rs_saved = Vec::with_capacity(rs_size);
        task.ds_size = ds_size as u16;
        task.rs_size = rs_size as u16;
        task.state = TaskState::Ready;
        task.priority = priority;
        task.wake_at = 0;
        task.exec_count = 0;

        self.sched.task_count += 1;
        Ok(slot as u8)
    }

    /// Hand the processor to the scheduler.
    pub fn task_yield(&mut self) -> VmResult<()> {
        self.schedule()
    }

    /// Block the current task for at least `ms` milliseconds.
    ///
    /// If another task is runnable it takes over immediately; otherwise the
    /// kernel holds on the platform clock until the earliest wake deadline.
    /// The sleeping task never runs again before its deadline. With no task
    /// context live this is a plain platform delay.
    pub fn task_sleep(&mut self, ms: u32) -> VmResult<()> {
        let cur = self.sched.current as usize;
        if self.sched.tasks[cur].state == TaskState::Dead {
            self.platform.delay_ms(ms);
            return Ok(());
        }

        let now = self.platform.now_ms();
        self.critical_enter();
        let task = &mut self.sched.tasks[cur];
        task.wake_at = now.wrapping_add(ms);
        task.state = TaskState::Blocked;
        self.critical_exit();

        self.schedule()?;

        // Nothing else was runnable: wait out the deadline here.
        while self.sched.tasks[self.sched.current as usize].state == TaskState::Blocked {
            self.platform.delay_ms(1);
            self.schedule()?;
        }
        Ok(())
    }

    /// Terminate the current task: release its stack buffers, mark the slot
    /// Dead, and reschedule.
    pub fn task_exit(&mut self) -> VmResult<()> {
        let cur = self.sched.current as usize;
        if self.sched.tasks[cur].state == TaskState::Dead {
            return Err(VmError::TaskInvalidId);
        }

        self.critical_enter();
        let task = &mut self.sched.tasks[cur];
        task.release();
        task.state = TaskState::Dead;
        self.sched.task_count -= 1;
        self.critical_exit();
        debug!(slot = cur, "task exited");

        self.schedule()
    }

    /// Id of the current task slot.
    pub fn task_self(&self) -> u8 {
        self.sched.current
    }

    /// Number of live (non-Dead) tasks.
    pub fn task_count(&self) -> u8 {
        self.sched.task_count
    }

    /// State, priority, and run count of a task slot.
    pub fn task_info(&self, id: u8) -> VmResult<TaskInfo> {
        if id as usize >= MAX_TASKS {
            return Err(VmError::TaskInvalidId);
        }
        let t = &self.sched.tasks[id as usize];
        Ok(TaskInfo {
            state: t.state,
            priority: t.priority,
            exec_count: t.exec_count,
        })
    }

    /// Override the preemption time slice.
    pub fn set_time_slice_ms(&mut self, ms: u32) {
        self.sched.time_slice_ms = ms;
    }
}
