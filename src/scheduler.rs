// scheduler.rs - Task control blocks and the selection/context-switch core

use tracing::trace;

use crate::errors::VmResult;
use crate::stacks::Stack;
use crate::vm::Vm;

/// Number of task slots.
pub const MAX_TASKS: usize = 8;

/// Default time slice between forced scheduling points, in ms.
pub const DEFAULT_TIME_SLICE_MS: u32 = 10;

/// Lifecycle state of a task slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Slot unused; stack buffers released.
    Dead,
    /// Runnable, waiting for selection.
    Ready,
    /// Currently occupying the shared interpreter stacks.
    Running,
    /// Sleeping until its wake deadline.
    Blocked,
}

/// Task control block: execution target, saved stack context, and
/// scheduling state. The live stacks belong to the VM; a task's own
/// buffers hold its context only while it is switched out.
#[derive(Debug)]
pub struct Task {
    pub word_idx: u16,
    pub pc: u16,
    pub(crate) ds_saved: Vec<i32>,
    pub(crate) rs_saved: Vec<i32>,
    pub ds_size: u16,
    pub rs_size: u16,
    pub state: TaskState,
    pub priority: u8,
    pub wake_at: u32,
    pub exec_count: u16,
}

impl Default for Task {
    fn default() -> Self {
        Task {
            word_idx: 0,
            pc: 0,
            ds_saved: Vec::new(),
            rs_saved: Vec::new(),
            ds_size: 0,
            rs_size: 0,
            state: TaskState::Dead,
            priority: 0,
            wake_at: 0,
            exec_count: 0,
        }
    }
}

impl Task {
    pub fn ds_depth(&self) -> usize {
        self.ds_saved.len()
    }

    pub fn rs_depth(&self) -> usize {
        self.rs_saved.len()
    }

    /// Drop the owned stack buffers. Only Dead slots hold no memory.
    pub(crate) fn release(&mut self) {
        self.ds_saved = Vec::new();
        self.rs_saved = Vec::new();
    }
}

/// Fixed-slot priority scheduler with round-robin tie-breaking.
pub struct Scheduler {
    pub(crate) tasks: [Task; MAX_TASKS],
    pub(crate) current: u8,
    pub(crate) task_count: u8,
    /// Tick (ms) at the last scheduling decision.
    pub(crate) tick_count: u32,
    pub(crate) time_slice_ms: u32,
    pub(crate) context_switches: u32,
    pub(crate) preemptions: u32,
    pub(crate) critical_nesting: u8,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            tasks: std::array::from_fn(|_| Task::default()),
            current: 0,
            task_count: 0,
            tick_count: 0,
            time_slice_ms: DEFAULT_TIME_SLICE_MS,
            context_switches: 0,
            preemptions: 0,
            critical_nesting: 0,
        }
    }

    /// Pick the next slot to run at tick `now`.
    ///
    /// Wakes Blocked tasks whose deadline has passed, then selects the
    /// highest-priority runnable slot. Priority ties go round-robin: a slot
    /// after the current one wins over a slot at or before it. `None` means
    /// nothing is runnable and the current slot keeps the processor.
    pub(crate) fn select_next(&mut self, now: u32) -> Option<u8> {
        let mut best_pri: u8 = 0;
        let mut selected: Option<u8> = None;

        for i in 0..MAX_TASKS {
            let task = &mut self.tasks[i];
            match task.state {
                TaskState::Dead => continue,
                TaskState::Blocked => {
                    // Wrap-safe "now >= wake_at".
                    if now.wrapping_sub(task.wake_at) as i32 >= 0 {
                        task.state = TaskState::Ready;
                    } else {
                        continue;
                    }
                }
                TaskState::Ready | TaskState::Running => {}
            }

            let i = i as u8;
            match selected {
                None => {
                    best_pri = self.tasks[i as usize].priority;
                    selected = Some(i);
                }
                Some(s) => {
                    let pri = self.tasks[i as usize].priority;
                    if pri > best_pri {
                        best_pri = pri;
                        selected = Some(i);
                    } else if pri == best_pri && i > self.current && s <= self.current {
                        selected = Some(i);
                    }
                }
            }
        }

        selected
    }

    pub fn current_task(&self) -> u8 {
        self.current
    }

    pub fn task_count(&self) -> u8 {
        self.task_count
    }

    pub fn context_switches(&self) -> u32 {
        self.context_switches
    }

    pub fn preemptions(&self) -> u32 {
        self.preemptions
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// CONTEXT SAVE / RESTORE
// ============================================================================
// There is exactly one live pair of stacks (the VM's). A switch copies the
// outgoing task's cells into its owned buffers and the incoming task's
// buffers back onto the live stacks.

pub(crate) fn save_context(task: &mut Task, ds: &Stack, rs: &Stack) {
    task.ds_saved.clear();
    task.ds_saved.extend_from_slice(ds.as_slice());
    task.rs_saved.clear();
    task.rs_saved.extend_from_slice(rs.as_slice());
}

pub(crate) fn restore_context(task: &Task, ds: &mut Stack, rs: &mut Stack) {
    ds.restore_from(&task.ds_saved);
    rs.restore_from(&task.rs_saved);
}

// ============================================================================
// SCHEDULING ENTRY POINT
// ============================================================================

impl Vm<'_> {
    /// Run one scheduling decision: save the running task's context, select
    /// the next runnable slot, and switch to it. Harmless when nothing is
    /// runnable; the current slot then keeps the processor.
    pub fn schedule(&mut self) -> VmResult<()> {
        self.critical_enter();
        let r = self.schedule_locked();
        self.critical_exit();
        r
    }

    fn schedule_locked(&mut self) -> VmResult<()> {
        let now = self.platform.now_ms();
        self.sched.tick_count = now;

        // The current slot owns the live stacks while it is Running, and
        // still does right after it blocked itself (sleep marks the state
        // before rescheduling). Either way its context must be captured
        // before anything else is switched in.
        let cur = self.sched.current as usize;
        match self.sched.tasks[cur].state {
            TaskState::Running => {
                save_context(&mut self.sched.tasks[cur], &self.ds, &self.rs);
                self.sched.tasks[cur].state = TaskState::Ready;
            }
            TaskState::Blocked => {
                save_context(&mut self.sched.tasks[cur], &self.ds, &self.rs);
            }
            TaskState::Dead | TaskState::Ready => {}
        }

        let Some(next) = self.sched.select_next(now) else {
            // Nothing runnable. Keep the slot; don't clobber the live stacks.
            return Ok(());
        };
        let next = next as usize;

        if next == cur {
            self.sched.tasks[cur].state = TaskState::Running;
            return Ok(());
        }

        restore_context(&self.sched.tasks[next], &mut self.ds, &mut self.rs);
        let task = &mut self.sched.tasks[next];
        task.state = TaskState::Running;
        task.exec_count = task.exec_count.wrapping_add(1);
        self.sched.current = next as u8;
        self.sched.context_switches += 1;
        trace!(from = cur, to = next, "context switch");

        Ok(())
    }

    pub(crate) fn critical_enter(&mut self) {
        self.platform.critical_enter();
        self.sched.critical_nesting = self.sched.critical_nesting.saturating_add(1);
    }

    pub(crate) fn critical_exit(&mut self) {
        debug_assert!(self.sched.critical_nesting > 0);
        self.sched.critical_nesting -= 1;
        self.platform.critical_exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sched_with(states: &[(TaskState, u8)]) -> Scheduler {
        let mut s = Scheduler::new();
        for (i, &(state, priority)) in states.iter().enumerate() {
            s.tasks[i].state = state;
            s.tasks[i].priority = priority;
            if state != TaskState::Dead {
                s.task_count += 1;
            }
        }
        s
    }

    #[test]
    fn test_select_prefers_priority() {
        let mut s = sched_with(&[(TaskState::Ready, 10), (TaskState::Ready, 20)]);
        assert_eq!(s.select_next(0), Some(1));
    }

    #[test]
    fn test_select_round_robin_on_tie() {
        let mut s = sched_with(&[
            (TaskState::Ready, 5),
            (TaskState::Ready, 5),
            (TaskState::Ready, 5),
        ]);
        s.current = 0;
        assert_eq!(s.select_next(0), Some(1));
        s.current = 1;
        assert_eq!(s.select_next(0), Some(2));
        s.current = 2;
        // Wraps back to the lowest slot.
        assert_eq!(s.select_next(0), Some(0));
    }

    #[test]
    fn test_select_picks_priority_zero_tasks() {
        let mut s = sched_with(&[(TaskState::Ready, 0)]);
        assert_eq!(s.select_next(0), Some(0));
    }

    #[test]
    fn test_select_wakes_expired_sleepers() {
        let mut s = sched_with(&[(TaskState::Blocked, 10)]);
        s.tasks[0].wake_at = 50;
        assert_eq!(s.select_next(49), None);
        assert_eq!(s.tasks[0].state, TaskState::Blocked);
        assert_eq!(s.select_next(50), Some(0));
        assert_eq!(s.tasks[0].state, TaskState::Ready);
    }

    #[test]
    fn test_select_skips_dead_slots() {
        let mut s = sched_with(&[
            (TaskState::Dead, 200),
            (TaskState::Ready, 1),
            (TaskState::Dead, 200),
        ]);
        assert_eq!(s.select_next(0), Some(1));
    }

    #[test]
    fn test_select_none_when_everything_sleeps() {
        let mut s = sched_with(&[(TaskState::Blocked, 1), (TaskState::Blocked, 2)]);
        s.tasks[0].wake_at = 100;
        s.tasks[1].wake_at = 200;
        assert_eq!(s.select_next(10), None);
    }
}
