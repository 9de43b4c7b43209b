use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Bucket {
    tokens: f64,
    max_tokens: f64,
    /// Tokens per second.
    refill_rate: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }
}

/// Per-provider request budget: `per_minute` requests, refilled continuously.
///
/// The lock is only taken for the synchronous check, never across an `.await`.
pub struct TokenBucket {
    inner: Mutex<Bucket>,
}

impl TokenBucket {
    pub fn per_minute(per_minute: u32) -> Self {
        let max = per_minute.max(1) as f64;
        Self {
            inner: Mutex::new(Bucket {
                tokens: max,
                max_tokens: max,
                refill_rate: max / 60.0,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token. On an empty bucket, returns how long until the next token.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&self, now: Instant) -> Result<(), Duration> {
        let mut bucket = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        bucket.refill(now);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(missing / bucket.refill_rate))
        }
    }

    /// Whole tokens currently available.
    pub fn available(&self) -> u32 {
        let mut bucket = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        bucket.refill(Instant::now());
        bucket.tokens.floor() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_full_and_drains() {
        let bucket = TokenBucket::per_minute(3);
        assert_eq!(bucket.available(), 3);
        let now = Instant::now();
        assert!(bucket.try_acquire_at(now).is_ok());
        assert!(bucket.try_acquire_at(now).is_ok());
        assert!(bucket.try_acquire_at(now).is_ok());
        let wait = bucket.try_acquire_at(now).unwrap_err();
        // 3/min refills one token every 20s.
        assert!(wait > Duration::from_secs(19) && wait <= Duration::from_secs(20));
    }

    #[test]
    fn refills_over_time() {
        let bucket = TokenBucket::per_minute(60);
        let start = Instant::now();
        for _ in 0..60 {
            bucket.try_acquire_at(start).unwrap();
        }
        assert!(bucket.try_acquire_at(start).is_err());
        assert!(
            bucket
                .try_acquire_at(start + Duration::from_millis(1100))
                .is_ok()
        );
    }

    #[test]
    fn never_exceeds_capacity() {
        let bucket = TokenBucket::per_minute(5);
        let later = Instant::now() + Duration::from_secs(3600);
        for _ in 0..5 {
            bucket.try_acquire_at(later).unwrap();
        }
        assert!(bucket.try_acquire_at(later).is_err());
    }

    #[test]
    fn zero_rate_is_clamped_to_one() {
        let bucket = TokenBucket::per_minute(0);
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_err());
    }
}
