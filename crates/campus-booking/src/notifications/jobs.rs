//! Recurring batch jobs: reminders, event time start/end handling, data
//! retention and availability consistency.
//!
//! Jobs are pure store mutations. [`JobRunner`] decides which are due from
//! the job log and records every run there.

use chrono::{Duration, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::template::TemplateKind;
use crate::ids::VisitId;
use crate::scheduling::Timestamp;
use crate::service::BookingError;
use crate::store::BookingStore;
use crate::visits::WorkflowStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSchedule {
    /// Once a day at the given UTC time.
    Daily(NaiveTime),
    /// Every n minutes.
    Every(u32),
}

impl JobSchedule {
    fn daily(hour: u32, minute: u32) -> Self {
        JobSchedule::Daily(NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN))
    }

    /// Whether a run is owed given the previous run.
    pub fn is_due(&self, last_run: Option<Timestamp>, now: Timestamp) -> bool {
        let Some(last) = last_run else {
            return true;
        };
        match *self {
            JobSchedule::Daily(at) => {
                let today = now.date_naive().and_time(at).and_utc();
                let latest = if today <= now {
                    today
                } else {
                    today - Duration::days(1)
                };
                last < latest
            }
            JobSchedule::Every(minutes) => now - last >= Duration::minutes(i64::from(minutes)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    pub affected: usize,
    pub message: String,
}

impl JobReport {
    fn new(affected: usize, message: impl Into<String>) -> Self {
        Self {
            affected,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRun {
    pub code: String,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub success: bool,
    pub affected: usize,
    pub message: String,
}

pub trait ScheduledJob: Send + Sync {
    fn code(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn schedule(&self) -> JobSchedule;
    fn run(&self, store: &mut BookingStore, now: Timestamp) -> Result<JobReport, BookingError>;
}

impl BookingStore {
    pub fn last_run(&self, code: &str) -> Option<&JobRun> {
        self.job_runs.iter().rev().find(|run| run.code == code)
    }

    pub fn last_successful_run(&self, code: &str) -> Option<Timestamp> {
        self.job_runs
            .iter()
            .rev()
            .find(|run| run.code == code && run.success)
            .map(|run| run.started_at)
    }

    /// Appends `run` to the job log. Per job code only the newest run and the
    /// newest successful run are kept.
    pub fn record_job_run(&mut self, run: JobRun) {
        let code = run.code.clone();
        self.job_runs.push(run);
        let newest = self.job_runs.len() - 1;
        let newest_success = self
            .job_runs
            .iter()
            .rposition(|run| run.code == code && run.success);
        let mut index = 0;
        self.job_runs.retain(|run| {
            let keep = run.code != code || index == newest || Some(index) == newest_success;
            index += 1;
            keep
        });
    }

    /// Visits whose current event time starts after `now`.
    fn upcoming_visits(&self, now: Timestamp) -> Vec<(VisitId, Timestamp)> {
        self.visits
            .values()
            .filter(|v| v.workflow_status.is_active())
            .filter_map(|v| {
                let start = self.event_times.get(&v.event_time?)?.start?;
                (start > now).then_some((v.id, start))
            })
            .collect()
    }
}

pub struct ReminderJob;

impl ScheduledJob for ReminderJob {
    fn code(&self) -> &'static str {
        "reminders"
    }

    fn description(&self) -> &'static str {
        "Send booking and guest reminders the configured number of days before a visit"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::daily(1, 0)
    }

    fn run(&self, store: &mut BookingStore, now: Timestamp) -> Result<JobReport, BookingError> {
        let today = now.date_naive();
        let mut sent = 0;
        for (visit, start) in store.upcoming_visits(now) {
            for kind in [TemplateKind::BookingReminder, TemplateKind::GuestReminder] {
                let Some(days) = store
                    .effective_autosend(visit, kind)
                    .filter(|rule| rule.enabled)
                    .and_then(|rule| rule.days)
                else {
                    continue;
                };
                if start.date_naive() - Duration::days(i64::from(days)) == today {
                    sent += store.autosend(visit, kind, None, None, now);
                }
            }
        }
        Ok(JobReport::new(sent, format!("{sent} reminder(s) queued")))
    }
}

pub struct IdleHostroleJob;

impl ScheduledJob for IdleHostroleJob {
    fn code(&self) -> &'static str {
        "idle_hostrole"
    }

    fn description(&self) -> &'static str {
        "Tell editors about booked visits that still lack hosts"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::daily(1, 0)
    }

    fn run(&self, store: &mut BookingStore, now: Timestamp) -> Result<JobReport, BookingError> {
        let today = now.date_naive();
        let candidates: Vec<VisitId> = store
            .visits
            .values()
            .filter(|v| {
                matches!(
                    v.workflow_status,
                    WorkflowStatus::BeingPlanned
                        | WorkflowStatus::Rejected
                        | WorkflowStatus::AutoassignFailed
                )
            })
            .filter(|v| store.needs_hosts(v))
            .map(|v| v.id)
            .collect();

        let mut sent = 0;
        for visit in candidates {
            let Some(first) = store.first_booking_at(visit) else {
                continue;
            };
            let Some(days) = store
                .effective_autosend(visit, TemplateKind::HostroleIdle)
                .filter(|rule| rule.enabled)
                .and_then(|rule| rule.days)
            else {
                continue;
            };
            if first.date_naive() + Duration::days(i64::from(days)) == today {
                sent += store.autosend(visit, TemplateKind::HostroleIdle, None, None, now);
            }
        }
        Ok(JobReport::new(sent, format!("{sent} idle host role notice(s) queued")))
    }
}

pub struct NotifyEventTimeJob;

impl NotifyEventTimeJob {
    pub const CODE: &'static str = "notify_event_time";
}

impl ScheduledJob for NotifyEventTimeJob {
    fn code(&self) -> &'static str {
        Self::CODE
    }

    fn description(&self) -> &'static str {
        "Mark started and ended event times and execute finished visits"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Every(1)
    }

    fn run(&self, store: &mut BookingStore, now: Timestamp) -> Result<JobReport, BookingError> {
        if store.last_successful_run(Self::CODE).is_none() {
            return Ok(JobReport::new(0, "first run, nothing handled"));
        }
        let started: Vec<_> = store
            .event_times
            .values()
            .filter(|t| !t.has_notified_start && t.start.is_some_and(|start| start < now))
            .map(|t| t.id)
            .collect();
        let ended: Vec<_> = store
            .event_times
            .values()
            .filter(|t| !t.has_notified_end && t.end.is_some_and(|end| end < now))
            .map(|t| t.id)
            .collect();
        for time in &started {
            store.event_time_started(*time);
        }
        for time in &ended {
            store.event_time_ended(*time, now);
        }
        Ok(JobReport::new(
            started.len() + ended.len(),
            format!("{} started, {} ended", started.len(), ended.len()),
        ))
    }
}

/// The follow-up goes out this many days after the visit ended. Rule days are ignored.
const EVALUATION_FOLLOW_UP_DAYS: i64 = 5;

pub struct EvaluationReminderJob;

impl ScheduledJob for EvaluationReminderJob {
    fn code(&self) -> &'static str {
        "evaluation_reminder"
    }

    fn description(&self) -> &'static str {
        "Send the second evaluation request five days after a visit"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::daily(2, 0)
    }

    fn run(&self, store: &mut BookingStore, now: Timestamp) -> Result<JobReport, BookingError> {
        let today = now.date_naive();
        let finished: Vec<(VisitId, Timestamp)> = store
            .visits
            .values()
            .filter(|v| v.workflow_status.is_active())
            .filter_map(|v| {
                let end = store.event_times.get(&v.event_time?)?.end?;
                (end < now).then_some((v.id, end))
            })
            .collect();

        let mut sent = 0;
        for (visit, end) in finished {
            if !store.autosend_enabled(visit, TemplateKind::EvaluationSecond) {
                continue;
            }
            if end.date_naive() + Duration::days(EVALUATION_FOLLOW_UP_DAYS) == today {
                sent += store.autosend(visit, TemplateKind::EvaluationSecond, None, None, now);
            }
        }
        Ok(JobReport::new(sent, format!("{sent} evaluation reminder(s) queued")))
    }
}

pub struct AnonymizeGuestsJob {
    pub retention_days: u64,
}

impl ScheduledJob for AnonymizeGuestsJob {
    fn code(&self) -> &'static str {
        "anonymize_guests"
    }

    fn description(&self) -> &'static str {
        "Anonymize guests whose visit lies beyond the retention window"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::daily(0, 0)
    }

    fn run(&self, store: &mut BookingStore, now: Timestamp) -> Result<JobReport, BookingError> {
        let limit = retention_limit(now, self.retention_days);
        let expired: Vec<_> = store
            .bookings
            .values()
            .filter(|b| {
                let start = store
                    .visits
                    .get(&b.visit)
                    .and_then(|v| v.any_event_time())
                    .and_then(|t| store.event_times.get(&t))
                    .and_then(|t| t.start);
                match start {
                    Some(start) => start < limit,
                    None => b.created_at < limit,
                }
            })
            .map(|b| b.guest)
            .collect();

        let mut anonymized = 0;
        for guest in expired {
            if let Some(g) = store.guests.get_mut(&guest) {
                if !g.anonymized {
                    g.anonymize();
                    anonymized += 1;
                }
            }
        }
        Ok(JobReport::new(anonymized, format!("{anonymized} guest(s) anonymized")))
    }
}

pub struct AnonymizeEmailsJob {
    pub retention_days: u64,
}

impl ScheduledJob for AnonymizeEmailsJob {
    fn code(&self) -> &'static str {
        "anonymize_emails"
    }

    fn description(&self) -> &'static str {
        "Anonymize sent mail older than the retention window"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::daily(0, 0)
    }

    fn run(&self, store: &mut BookingStore, now: Timestamp) -> Result<JobReport, BookingError> {
        let limit = retention_limit(now, self.retention_days);
        let mut anonymized = 0;
        for message in store.outbox.values_mut() {
            if message.created_at < limit
                && !message.anonymized
                && message.kind != TemplateKind::BasicMailEnvelope
            {
                message.anonymize();
                anonymized += 1;
            }
        }
        Ok(JobReport::new(anonymized, format!("{anonymized} message(s) anonymized")))
    }
}

/// Contact requests carry the inquirer's details in full, so old ones are removed.
pub struct AnonymizeInquirersJob {
    pub retention_days: u64,
}

impl ScheduledJob for AnonymizeInquirersJob {
    fn code(&self) -> &'static str {
        "anonymize_inquirers"
    }

    fn description(&self) -> &'static str {
        "Delete contact requests older than the retention window"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::daily(0, 0)
    }

    fn run(&self, store: &mut BookingStore, now: Timestamp) -> Result<JobReport, BookingError> {
        let limit = retention_limit(now, self.retention_days);
        let before = store.outbox.len();
        store.outbox.retain(|_, message| {
            !(message.kind == TemplateKind::BasicMailEnvelope && message.created_at < limit)
        });
        let removed = before - store.outbox.len();
        Ok(JobReport::new(removed, format!("{removed} contact request(s) deleted")))
    }
}

pub struct AvailabilityConsistencyJob;

impl ScheduledJob for AvailabilityConsistencyJob {
    fn code(&self) -> &'static str {
        "availability_consistency"
    }

    fn description(&self) -> &'static str {
        "Recompute event times whose resource status went stale"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::daily(3, 0)
    }

    fn run(&self, store: &mut BookingStore, now: Timestamp) -> Result<JobReport, BookingError> {
        let stale = store.stale_event_times(now);
        if !stale.is_empty() {
            warn!(count = stale.len(), "stale event time availability found");
        }
        let fixed = store.recompute_event_times(stale, now);
        Ok(JobReport::new(fixed, format!("{fixed} event time(s) recomputed")))
    }
}

fn retention_limit(now: Timestamp, days: u64) -> Timestamp {
    let days = i64::try_from(days).unwrap_or(i64::MAX).min(365_000);
    now - Duration::days(days)
}

pub struct JobRunner {
    jobs: Vec<Box<dyn ScheduledJob>>,
}

impl JobRunner {
    pub fn new(jobs: Vec<Box<dyn ScheduledJob>>) -> Self {
        Self { jobs }
    }

    /// Every built-in job with the given retention window.
    pub fn standard(retention_days: u64) -> Self {
        Self::new(vec![
            Box::new(NotifyEventTimeJob),
            Box::new(ReminderJob),
            Box::new(IdleHostroleJob),
            Box::new(EvaluationReminderJob),
            Box::new(AnonymizeGuestsJob { retention_days }),
            Box::new(AnonymizeEmailsJob { retention_days }),
            Box::new(AnonymizeInquirersJob { retention_days }),
            Box::new(AvailabilityConsistencyJob),
        ])
    }

    pub fn jobs(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.jobs.iter().map(|job| (job.code(), job.description()))
    }

    fn execute(job: &dyn ScheduledJob, store: &mut BookingStore, now: Timestamp) -> JobRun {
        let result = job.run(store, now);
        let run = match result {
            Ok(report) => JobRun {
                code: job.code().to_string(),
                started_at: now,
                finished_at: now,
                success: true,
                affected: report.affected,
                message: report.message,
            },
            Err(err) => JobRun {
                code: job.code().to_string(),
                started_at: now,
                finished_at: now,
                success: false,
                affected: 0,
                message: err.to_string(),
            },
        };
        if run.success {
            info!(job = job.code(), affected = run.affected, message = %run.message, "job finished");
        } else {
            warn!(job = job.code(), message = %run.message, "job failed");
        }
        store.record_job_run(run.clone());
        run
    }

    /// Runs every job whose schedule is due since its last recorded run.
    pub fn run_due(&self, store: &mut BookingStore, now: Timestamp) -> Vec<JobRun> {
        let mut runs = Vec::new();
        for job in &self.jobs {
            let last = store.last_run(job.code()).map(|run| run.started_at);
            if job.schedule().is_due(last, now) {
                runs.push(Self::execute(job.as_ref(), store, now));
            }
        }
        runs
    }

    /// Runs one job regardless of its schedule.
    pub fn run_one(&self, code: &str, store: &mut BookingStore, now: Timestamp) -> Option<JobRun> {
        let job = self.jobs.iter().find(|job| job.code() == code)?;
        Some(Self::execute(job.as_ref(), store, now))
    }
}

#[cfg(test)]
mod tests;
