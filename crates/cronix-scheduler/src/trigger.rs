use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{Result, SchedulerError};

/// Parse a seconds-resolution cron expression.
///
/// Accepts the 6-field (`sec min hour dom month dow`) and 7-field (with
/// year) forms as well as descriptors such as `@hourly`. This is the single
/// validation point: anything it accepts can be installed as a trigger.
///
/// Fields are matched against UTC wall-clock time, whatever the host's
/// local time zone is.
pub fn parse_schedule(expression: &str) -> Result<cron::Schedule> {
    cron::Schedule::from_str(expression.trim()).map_err(|e| SchedulerError::InvalidSchedule {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// The time-keeping half of a scheduled job: a parsed expression plus the
/// next instant it is due, both in UTC.
#[derive(Debug, Clone)]
pub struct Trigger {
    expression: String,
    schedule: cron::Schedule,
    next_fire: Option<DateTime<Utc>>,
}

impl Trigger {
    /// Parse `expression` and arm the trigger for its first occurrence after `now`.
    pub fn new(expression: &str, now: DateTime<Utc>) -> Result<Self> {
        let schedule = parse_schedule(expression)?;
        let next_fire = schedule.after(&now).next();
        Ok(Self {
            expression: expression.to_string(),
            schedule,
            next_fire,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// `None` once the schedule has no future occurrence (e.g. a past year).
    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.next_fire
    }

    /// Report whether the trigger is due at `now`; if so, re-arm it.
    ///
    /// Re-arming computes the next occurrence strictly after `now`, so any
    /// occurrences skipped while the clock was stalled collapse into this
    /// single fire instead of replaying back-to-back.
    pub fn poll(&mut self, now: DateTime<Utc>) -> bool {
        match self.next_fire {
            Some(due) if due <= now => {
                self.next_fire = self.schedule.after(&now).next();
                true
            }
            _ => false,
        }
    }
}
