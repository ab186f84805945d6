use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Upper bound on a single step, in seconds.
pub const MAX_FRAME_DT: f32 = 1.0 / 60.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameClock {
    last_ms: f64,
}

impl FrameClock {
    pub fn new(now_ms: f64) -> Self {
        Self { last_ms: now_ms }
    }

    /// Seconds since the previous call, clamped to `[0, MAX_FRAME_DT]`.
    pub fn advance(&mut self, now_ms: f64) -> f32 {
        let dt = ((now_ms - self.last_ms) / 1000.0) as f32;
        self.last_ms = now_ms;
        dt.clamp(0.0, MAX_FRAME_DT)
    }
}

/// Shared stop flag between the engine and whatever schedules its frames.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dt_is_clamped() {
        let mut clock = FrameClock::new(1000.0);
        assert_eq!(clock.advance(1008.0), 0.008);
        assert_eq!(clock.advance(1500.0), MAX_FRAME_DT);
        assert_eq!(clock.advance(1400.0), 0.0);
    }

    #[test]
    fn cancel_is_shared_and_idempotent() {
        let token = CancelToken::new();
        let scheduler = token.clone();
        assert!(!scheduler.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(scheduler.is_cancelled());
    }
}
