use std::time::Duration;

use rand::Rng;

/// Transport retry back-off: 500ms base, factor 2, ±25% jitter, 30s cap.
pub(crate) fn backoff(attempt: u64) -> Duration {
    let exp = attempt.saturating_sub(1).min(10) as u32;
    let base_ms = 500u64.saturating_mul(1u64 << exp);
    let capped_ms = base_ms.min(30_000);
    let jitter = rand::rng().random_range(0.75..1.25);
    let delay_ms = ((capped_ms as f64) * jitter) as u64;
    Duration::from_millis(delay_ms.min(30_000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_stays_capped() {
        for attempt in 1..=8 {
            let delay = backoff(attempt);
            assert!(delay <= Duration::from_secs(30));
        }
        // First attempt is centred on 500ms.
        let first = backoff(1);
        assert!(first >= Duration::from_millis(375));
        assert!(first < Duration::from_millis(625));
    }
}
