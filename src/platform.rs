// platform.rs - Clock, delay, and critical-section services supplied by the host

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::lock_api::RawReentrantMutex;
use parking_lot::{RawMutex, RawThreadId};

/// Services the kernel expects from the platform it runs on.
///
/// `now_ms`/`now_us` must be monotonic since boot. `critical_enter` /
/// `critical_exit` must be re-entrant: on embedded targets they typically
/// mask interrupts, on a host they take a re-entrant lock.
pub trait Platform {
    fn now_ms(&self) -> u32;
    fn now_us(&self) -> u32;

    /// Blocking delay outside of scheduling.
    fn delay_ms(&self, ms: u32);
    fn delay_us(&self, us: u32);

    fn critical_enter(&self);
    fn critical_exit(&self);
}

// ============================================================================
// HOST PLATFORM
// ============================================================================

/// Std-backed platform for hosted builds and hardware-in-the-loop tooling.
pub struct HostPlatform {
    epoch: Instant,
    lock: RawReentrantMutex<RawMutex, RawThreadId>,
}

impl HostPlatform {
    pub fn new() -> Self {
        HostPlatform {
            epoch: Instant::now(),
            lock: RawReentrantMutex::INIT,
        }
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HostPlatform {
    fn now_ms(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }

    fn now_us(&self) -> u32 {
        self.epoch.elapsed().as_micros() as u32
    }

    fn delay_ms(&self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(ms as u64));
    }

    fn delay_us(&self, us: u32) {
        std::thread::sleep(std::time::Duration::from_micros(us as u64));
    }

    fn critical_enter(&self) {
        self.lock.lock();
    }

    fn critical_exit(&self) {
        // Balanced with critical_enter by the kernel's nesting counter.
        unsafe { self.lock.unlock() };
    }
}

// ============================================================================
// MANUAL CLOCK
// ============================================================================

/// A platform whose clock only moves when told to.
///
/// Time advances via [`ManualClock::advance_ms`], through `delay_*` (a delay
/// on this platform is a clock jump), or automatically by a fixed step on
/// every clock read when [`ManualClock::auto_step_ms`] is set. Clones share
/// the same clock, so a test can keep a handle while the VM owns another.
#[derive(Clone, Default)]
pub struct ManualClock {
    inner: Arc<ClockState>,
}

#[derive(Default)]
struct ClockState {
    now_us: AtomicU64,
    step_us: AtomicU64,
    nesting: AtomicU32,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `ms`.
    pub fn advance_ms(&self, ms: u32) {
        self.inner
            .now_us
            .fetch_add(ms as u64 * 1000, Ordering::Relaxed);
    }

    pub fn advance_us(&self, us: u32) {
        self.inner.now_us.fetch_add(us as u64, Ordering::Relaxed);
    }

    /// Advance the clock by `ms` on every `now_ms`/`now_us` read. A step of
    /// 0 (the default) freezes the clock between explicit advances.
    pub fn auto_step_ms(&self, ms: u32) {
        self.inner
            .step_us
            .store(ms as u64 * 1000, Ordering::Relaxed);
    }

    fn poll_us(&self) -> u64 {
        let step = self.inner.step_us.load(Ordering::Relaxed);
        self.inner.now_us.fetch_add(step, Ordering::Relaxed)
    }
}

impl Platform for ManualClock {
    fn now_ms(&self) -> u32 {
        (self.poll_us() / 1000) as u32
    }

    fn now_us(&self) -> u32 {
        self.poll_us() as u32
    }

    fn delay_ms(&self, ms: u32) {
        self.advance_ms(ms);
    }

    fn delay_us(&self, us: u32) {
        self.advance_us(us);
    }

    fn critical_enter(&self) {
        self.inner.nesting.fetch_add(1, Ordering::Relaxed);
    }

    fn critical_exit(&self) {
        self.inner.nesting.fetch_sub(1, Ordering::Relaxed);
    }
}
