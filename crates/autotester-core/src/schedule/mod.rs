//! Recurrence engine: RFC-5545 RRULE subsets driving per-parameter timers.
//!
//! A rule is the `KEY=VALUE;...` part only (`FREQ=HOURLY;INTERVAL=4`); the
//! engine anchors it with a `DTSTART` of the moment the scheduler starts.
//! An empty rule means "no schedule". Missed occurrences are never
//! replayed: every wake computes the next occurrence strictly after the
//! real clock.

pub mod supervisor;

pub use supervisor::{ScheduleSink, Supervisor};

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rrule::RRuleSet;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::ports::clock::Clock;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid recurrence rule {rule:?}: {reason}")]
    InvalidRule { rule: String, reason: String },
}

/// A validated recurrence rule anchored at the moment it was parsed.
#[derive(Debug, Clone)]
pub struct Schedule {
    composed: String,
}

impl Schedule {
    /// Parse `rule` with a `DTSTART` of `start`. Empty rules yield `None`
    /// (the scheduler is simply not started).
    pub fn parse(rule: &str, start: DateTime<Utc>) -> Result<Option<Schedule>, ScheduleError> {
        let rule = rule.trim();
        if rule.is_empty() {
            return Ok(None);
        }
        let composed = format!(
            "DTSTART:{}\nRRULE:{}",
            start.format("%Y%m%dT%H%M%SZ"),
            rule
        );
        composed
            .parse::<RRuleSet>()
            .map_err(|err| ScheduleError::InvalidRule {
                rule: rule.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Some(Schedule { composed }))
    }

    /// Next occurrence strictly after `now`, if the rule still has one.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let set: RRuleSet = self.composed.parse().ok()?;
        let cutoff = now.with_timezone(&rrule::Tz::UTC);
        set.after(cutoff)
            .all(2)
            .dates
            .into_iter()
            .map(|d| d.with_timezone(&Utc))
            .find(|d| *d > now)
    }

    /// Sleep-until-fire loop. Invokes `fire` at each occurrence until the
    /// token is cancelled or the rule runs out of occurrences.
    ///
    /// Cancellation is prompt: once the token fires, `fire` is never
    /// invoked again.
    pub async fn run<F, Fut>(self, clock: Arc<dyn Clock>, cancel: CancellationToken, mut fire: F)
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        loop {
            let now = clock.now();
            let Some(next) = self.next_after(now) else {
                break;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => fire().await,
            }
        }
    }
}
