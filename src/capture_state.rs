//! State shared between the sampling loop and the control handler.
//!
//! The line, the sample buffer and the pause gate are independent resources,
//! each behind its own lock. No method ever holds two of them at once, so a
//! sampler running at real-time priority cannot be stuck behind a controller
//! that holds one lock while waiting for another.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::gpio_line::{GpioError, GpioLine, Level};
use crate::ring_buffer::{PulseRingBuffer, PulseSample};

/// How the sampler waits for a lock, or for the pause gate to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Busy-wait with `try_lock`. Lowest latency, burns a core while paused.
    #[default]
    Spin,
    /// Park the thread until the resource is free.
    Block,
}

impl std::str::FromStr for LockMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spin" => Ok(LockMode::Spin),
            "block" => Ok(LockMode::Block),
            other => Err(format!("unknown lock mode '{other}' (expected spin or block)")),
        }
    }
}

/// Pause flag plus a pause counter.
///
/// The counter moves on every pause, so a sampler that compares it against
/// the value it last saw notices a pause/resume cycle even when both happened
/// between two of its iterations.
#[derive(Debug, Default)]
pub struct PauseGate {
    paused: AtomicBool,
    epoch: AtomicU64,
    wake: Mutex<()>,
    resumed: Condvar,
}

impl PauseGate {
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn close(&self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            self.epoch.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn open(&self) {
        let _wake = self.wake.lock();
        self.paused.store(false, Ordering::Release);
        self.resumed.notify_all();
    }

    /// Force the sampler to re-arm its baseline even if it never saw a pause.
    fn bump(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Park until the gate opens or `timeout` passes.
    fn wait_open(&self, timeout: Duration) {
        let mut wake = self.wake.lock();
        if self.is_paused() {
            self.resumed.wait_for(&mut wake, timeout);
        }
    }

    fn notify(&self) {
        let _wake = self.wake.lock();
        self.resumed.notify_all();
    }
}

pub struct CaptureState {
    line: Mutex<Box<dyn GpioLine>>,
    samples: Mutex<PulseRingBuffer>,
    gate: PauseGate,
    shutdown: AtomicBool,
    lock_mode: LockMode,
}

impl CaptureState {
    /// Bounded wait used while parked on the pause gate in `Block` mode, so a
    /// shutdown request is never missed.
    const PARK_INTERVAL: Duration = Duration::from_millis(10);

    pub fn new(line: Box<dyn GpioLine>, capacity: usize, lock_mode: LockMode) -> Self {
        Self {
            line: Mutex::new(line),
            samples: Mutex::new(PulseRingBuffer::new(capacity)),
            gate: PauseGate::default(),
            shutdown: AtomicBool::new(false),
            lock_mode,
        }
    }

    pub fn lock_mode(&self) -> LockMode {
        self.lock_mode
    }

    fn acquire<'a, T: ?Sized>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        match self.lock_mode {
            LockMode::Block => mutex.lock(),
            LockMode::Spin => loop {
                if let Some(guard) = mutex.try_lock() {
                    break guard;
                }
                std::hint::spin_loop();
            },
        }
    }

    // --- line ---

    /// Read the line unless sampling is paused.
    ///
    /// The pause flag is checked under the line lock, and [`pause`](Self::pause)
    /// sets it under the same lock, so no read starts once `pause` returned.
    pub fn read_level(&self) -> Result<Option<Level>, GpioError> {
        let mut line = self.acquire(&self.line);
        if self.gate.is_paused() {
            return Ok(None);
        }
        line.get_value().map(Some)
    }

    /// Run `f` with exclusive access to the line.
    pub fn with_line<R>(&self, f: impl FnOnce(&mut dyn GpioLine) -> R) -> R {
        let mut line = self.acquire(&self.line);
        f(&mut **line)
    }

    // --- samples ---

    /// Record a sample unless sampling is paused. Returns `true` if the
    /// sample was stored.
    pub fn push_sample(&self, value: PulseSample) -> bool {
        let mut samples = self.acquire(&self.samples);
        if self.gate.is_paused() {
            return false;
        }
        if samples.put(value) {
            log::trace!("Ring buffer full, oldest sample overwritten");
        }
        true
    }

    /// Record a sample measured while the pause counter read `epoch`.
    ///
    /// Refused when sampling is paused or the counter has moved since, as the
    /// measurement then started before a pause or trigger cycle.
    pub fn record_sample(&self, value: PulseSample, epoch: u64) -> bool {
        let mut samples = self.acquire(&self.samples);
        if self.gate.is_paused() || self.gate.epoch() != epoch {
            return false;
        }
        if samples.put(value) {
            log::trace!("Ring buffer full, oldest sample overwritten");
        }
        true
    }

    pub fn pop_sample(&self) -> Option<PulseSample> {
        self.acquire(&self.samples).get().ok()
    }

    pub fn peek_sample(&self, index: i64) -> Option<PulseSample> {
        self.acquire(&self.samples).peek_signed(index).ok()
    }

    pub fn sample_count(&self) -> usize {
        self.acquire(&self.samples).len()
    }

    pub fn clear_samples(&self) {
        self.acquire(&self.samples).reset();
    }

    /// Pop every stored sample, oldest first.
    pub fn drain_samples(&self) -> Vec<PulseSample> {
        self.acquire(&self.samples).drain().collect()
    }

    // --- pause gate ---

    pub fn pause(&self) {
        {
            let _line = self.acquire(&self.line);
            self.gate.close();
        }
        // Any push that raced with the flag has finished once we own this.
        drop(self.acquire(&self.samples));
    }

    pub fn resume(&self) {
        self.gate.open();
    }

    /// Resume and re-arm the baseline whether or not sampling was paused.
    pub fn restart(&self) {
        self.gate.bump();
        self.gate.open();
    }

    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    pub fn pause_epoch(&self) -> u64 {
        self.gate.epoch()
    }

    /// One sampler wait step while paused: spin once or park briefly,
    /// depending on the lock mode.
    pub fn idle_while_paused(&self) {
        match self.lock_mode {
            LockMode::Spin => std::hint::spin_loop(),
            LockMode::Block => self.gate.wait_open(Self::PARK_INTERVAL),
        }
    }

    // --- shutdown ---

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.gate.notify();
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio_line::CONSUMER;
    use crate::scripted_line::ScriptedLine;

    fn state(mode: LockMode) -> (CaptureState, crate::scripted_line::LineRecorder) {
        let mut line = ScriptedLine::new([Level::Low, Level::High]);
        line.request_input(CONSUMER).unwrap();
        let recorder = line.recorder();
        (CaptureState::new(Box::new(line), 4, mode), recorder)
    }

    #[test]
    fn test_pause_blocks_reads_and_writes() {
        for mode in [LockMode::Spin, LockMode::Block] {
            let (state, recorder) = state(mode);
            assert_eq!(state.read_level().unwrap(), Some(Level::Low));
            assert!(state.push_sample(5));

            state.pause();
            assert_eq!(state.read_level().unwrap(), None);
            assert!(!state.push_sample(6));
            assert_eq!(recorder.reads(), 1);
            assert_eq!(state.sample_count(), 1);

            state.resume();
            assert_eq!(state.read_level().unwrap(), Some(Level::High));
            assert!(state.push_sample(7));
            assert_eq!(state.drain_samples(), vec![5, 7]);
        }
    }

    #[test]
    fn test_pause_is_idempotent_and_counted() {
        let (state, _) = state(LockMode::Spin);
        let start = state.pause_epoch();
        state.pause();
        state.pause();
        assert_eq!(state.pause_epoch(), start + 1);
        state.resume();
        state.resume();
        assert!(!state.is_paused());

        state.restart();
        assert_eq!(state.pause_epoch(), start + 2);
        assert!(!state.is_paused());
    }

    #[test]
    fn test_record_sample_refuses_stale_epoch() {
        let (state, _) = state(LockMode::Spin);
        let epoch = state.pause_epoch();
        assert!(state.record_sample(5, epoch));

        state.restart();
        assert!(!state.record_sample(6, epoch));
        assert!(state.record_sample(7, state.pause_epoch()));

        state.pause();
        assert!(!state.record_sample(8, state.pause_epoch()));
        assert_eq!(state.drain_samples(), vec![5, 7]);
    }

    #[test]
    fn test_sample_accessors() {
        let (state, _) = state(LockMode::Block);
        for v in [10, 20, 30] {
            state.push_sample(v);
        }
        assert_eq!(state.sample_count(), 3);
        assert_eq!(state.peek_sample(-1), Some(30));
        assert_eq!(state.peek_sample(3), None);
        assert_eq!(state.pop_sample(), Some(10));
        state.clear_samples();
        assert_eq!(state.pop_sample(), None);
    }

    #[test]
    fn test_blocked_idle_wakes_on_resume() {
        let (state, _) = state(LockMode::Block);
        let state = std::sync::Arc::new(state);
        state.pause();

        let waiter = {
            let state = state.clone();
            std::thread::spawn(move || {
                while state.is_paused() {
                    state.idle_while_paused();
                }
            })
        };
        std::thread::sleep(Duration::from_millis(5));
        state.resume();
        waiter.join().unwrap();
    }

    #[test]
    fn test_lock_mode_from_str() {
        assert_eq!("spin".parse::<LockMode>(), Ok(LockMode::Spin));
        assert_eq!("BLOCK".parse::<LockMode>(), Ok(LockMode::Block));
        assert!("yield".parse::<LockMode>().is_err());
    }
}
