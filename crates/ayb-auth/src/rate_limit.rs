//! Per-app sliding-window rate limiter.
//!
//! Budget is `appRateLimitRPS * appRateLimitWindowSec` requests per window
//! (default window 60s). Admin-scoped requests bypass this entirely.

use crate::claims::Claims;
use ayb_error::AybError;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use uuid::Uuid;

const DEFAULT_WINDOW_SEC: u64 = 60;

pub struct AppRateLimiter {
    windows: Mutex<HashMap<Uuid, VecDeque<Instant>>>,
}

impl Default for AppRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl AppRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record this request and deny it if the app's budget is exhausted.
    ///
    /// # Errors
    ///
    /// Returns `429` with a computed `retry_after_secs` on denial.
    pub fn check(&self, claims: &Claims) -> Result<(), AybError> {
        if claims.is_admin {
            return Ok(());
        }
        let Some(app_id) = claims.app_id else {
            return Ok(());
        };
        let Some(rps) = claims.app_rate_limit_rps else {
            return Ok(());
        };
        let window_secs = claims.app_rate_limit_window_sec.unwrap_or(DEFAULT_WINDOW_SEC);
        let window = Duration::from_secs(window_secs);
        let budget = (rps * window_secs as f64).max(1.0) as usize;

        let now = Instant::now();
        let mut windows = self.windows.lock();
        let samples = windows.entry(app_id).or_default();

        while let Some(&oldest) = samples.front() {
            if now.duration_since(oldest) >= window {
                samples.pop_front();
            } else {
                break;
            }
        }

        if samples.len() >= budget {
            let oldest = *samples.front().expect("budget > 0 implies at least one sample when full");
            let retry_after = window.saturating_sub(now.duration_since(oldest));
            return Err(AybError::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        samples.push_back(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims_for(app_id: Uuid, rps: f64, window_sec: u64) -> Claims {
        Claims {
            app_id: Some(app_id),
            app_rate_limit_rps: Some(rps),
            app_rate_limit_window_sec: Some(window_sec),
            ..Claims::anonymous(Uuid::nil())
        }
    }

    #[test]
    fn allows_requests_under_budget() {
        let limiter = AppRateLimiter::new();
        let claims = claims_for(Uuid::new_v4(), 10.0, 1);
        for _ in 0..10 {
            assert!(limiter.check(&claims).is_ok());
        }
    }

    #[test]
    fn denies_once_budget_exhausted() {
        let limiter = AppRateLimiter::new();
        let claims = claims_for(Uuid::new_v4(), 2.0, 1);
        assert!(limiter.check(&claims).is_ok());
        assert!(limiter.check(&claims).is_ok());
        let result = limiter.check(&claims);
        assert!(matches!(result, Err(AybError::RateLimited { .. })));
    }

    #[test]
    fn admin_requests_bypass_the_limiter() {
        let limiter = AppRateLimiter::new();
        let claims = Claims {
            is_admin: true,
            ..claims_for(Uuid::new_v4(), 1.0, 60)
        };
        for _ in 0..100 {
            assert!(limiter.check(&claims).is_ok());
        }
    }

    #[test]
    fn requests_without_an_app_id_are_not_limited() {
        let limiter = AppRateLimiter::new();
        let claims = Claims::anonymous(Uuid::nil());
        for _ in 0..1000 {
            assert!(limiter.check(&claims).is_ok());
        }
    }

    #[test]
    fn separate_apps_have_independent_budgets() {
        let limiter = AppRateLimiter::new();
        let a = claims_for(Uuid::new_v4(), 1.0, 1);
        let b = claims_for(Uuid::new_v4(), 1.0, 1);
        assert!(limiter.check(&a).is_ok());
        assert!(limiter.check(&a).is_err());
        assert!(limiter.check(&b).is_ok());
    }
}
