//! Reminder Policy - which reminder e-mails are due today.
//!
//! A pure function of the calendar, the flow's key dates and the flow's
//! notification log. Every reminder is keyed by an `email_id`; the log
//! guarantees at most one send per `(flow, email_id)` per calendar day, and
//! one-shot reminders are never sent twice. Nothing is due on non-business
//! days, so a reminder falling on a weekend or bank holiday goes out on the
//! next business day instead.

use chrono::NaiveDate;
use leavers_shared::{Flow, LeavingRequest, NotificationLogEntry};
use serde::{Deserialize, Serialize};

use crate::calendar::Calendar;

/// The dates reminder schedules are anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDates {
    pub flow_started: NaiveDate,
    pub last_working_day: Option<NaiveDate>,
    pub leaving_date: Option<NaiveDate>,
}

impl KeyDates {
    pub fn new(flow: &Flow, request: &LeavingRequest) -> Self {
        Self {
            flow_started: flow.started_at.date_naive(),
            last_working_day: request.last_working_day,
            leaving_date: request.leaving_date,
        }
    }
}

/// When a reminder first becomes due, in working days from an anchor date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum DueRule {
    FlowStart {
        #[serde(default)]
        working_days: i64,
    },
    LastWorkingDay {
        #[serde(default)]
        working_days: i64,
    },
    LeavingDate {
        #[serde(default)]
        working_days: i64,
    },
}

impl DueRule {
    /// `None` while the anchor date is not known yet.
    pub fn resolve(&self, dates: &KeyDates, calendar: &Calendar) -> Option<NaiveDate> {
        let (anchor, working_days) = match *self {
            DueRule::FlowStart { working_days } => (Some(dates.flow_started), working_days),
            DueRule::LastWorkingDay { working_days } => (dates.last_working_day, working_days),
            DueRule::LeavingDate { working_days } => (dates.leaving_date, working_days),
        };
        anchor.map(|date| calendar.add_working_days(date, working_days))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    LineManager,
    Processors,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanEntry {
    pub key: String,
    pub email_id: String,
    pub due: DueRule,
    pub audience: Audience,
}

/// Processor reminder offsets, keyed as they appear in email ids.
pub const PROCESSOR_FAN_OFFSETS: &[(&str, DueRule, Audience)] = &[
    ("day_after_lwd", DueRule::LastWorkingDay { working_days: 1 }, Audience::Processors),
    ("two_days_after_lwd", DueRule::LastWorkingDay { working_days: 2 }, Audience::Processors),
    ("on_ld", DueRule::LeavingDate { working_days: 0 }, Audience::Processors),
    ("one_day_after_ld", DueRule::LeavingDate { working_days: 1 }, Audience::Processors),
    ("two_days_after_ld_lm", DueRule::LeavingDate { working_days: 2 }, Audience::LineManager),
    ("two_days_after_ld_proc", DueRule::LeavingDate { working_days: 2 }, Audience::Processors),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReminderCadence {
    /// Sent once, on or after the due date.
    Once { email_id: String, due: DueRule },
    /// Sent every business day from the start date onwards.
    Daily { email_id: String, from: DueRule },
    /// A fan of one-shot e-mails with their own offsets. Only the latest
    /// due entries go out; earlier ones they supersede are dropped.
    Fan { entries: Vec<FanEntry> },
    /// Sent once per payroll cut-off interval.
    PayrollCutOff { email_id: String },
}

impl ReminderCadence {
    pub fn once(email_id: &str, due: DueRule) -> Self {
        ReminderCadence::Once {
            email_id: email_id.to_string(),
            due,
        }
    }

    pub fn daily(email_id: &str, from: DueRule) -> Self {
        ReminderCadence::Daily {
            email_id: email_id.to_string(),
            from,
        }
    }

    pub fn payroll_cut_off(email_id: &str) -> Self {
        ReminderCadence::PayrollCutOff {
            email_id: email_id.to_string(),
        }
    }

    /// Fan over the named processor offsets, e-mail ids prefixed with `prefix`.
    /// Keys without a known offset are ignored.
    pub fn processor_fan(prefix: &str, keys: &[&str]) -> Self {
        let entries = keys
            .iter()
            .filter_map(|key| PROCESSOR_FAN_OFFSETS.iter().find(|(k, _, _)| k == key))
            .map(|(key, due, audience)| FanEntry {
                key: key.to_string(),
                email_id: format!("{}_{}", prefix, key),
                due: *due,
                audience: *audience,
            })
            .collect();
        ReminderCadence::Fan { entries }
    }
}

/// A reminder to send now. `email_id` is the log key, which for daily and
/// payroll cut-off reminders carries a date; `template_email_id` picks the
/// template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueReminder {
    pub email_id: String,
    pub template_email_id: String,
    pub audience: Option<Audience>,
}

impl DueReminder {
    fn plain(email_id: &str) -> Self {
        Self {
            email_id: email_id.to_string(),
            template_email_id: email_id.to_string(),
            audience: None,
        }
    }

    fn dated(email_id: &str, on: NaiveDate) -> Self {
        Self {
            email_id: format!("{}:{}", email_id, on),
            template_email_id: email_id.to_string(),
            audience: None,
        }
    }
}

/// Due on or before `today` and never logged under its key.
pub fn should_send(today: NaiveDate, due: NaiveDate, sent_on: &[NaiveDate]) -> bool {
    today >= due && sent_on.is_empty()
}

pub struct ReminderPolicy<'a> {
    calendar: &'a Calendar,
}

impl<'a> ReminderPolicy<'a> {
    pub fn new(calendar: &'a Calendar) -> Self {
        Self { calendar }
    }

    pub fn due(
        &self,
        cadence: &ReminderCadence,
        dates: &KeyDates,
        today: NaiveDate,
        log: &[NotificationLogEntry],
    ) -> Vec<DueReminder> {
        if !self.calendar.is_business_day(today) {
            return Vec::new();
        }

        let sent_on = |email_id: &str| -> Vec<NaiveDate> {
            log.iter()
                .filter(|entry| entry.email_id.as_deref() == Some(email_id))
                .map(|entry| entry.sent_date)
                .collect()
        };

        match cadence {
            ReminderCadence::Once { email_id, due } => due
                .resolve(dates, self.calendar)
                .filter(|&d| should_send(today, d, &sent_on(email_id)))
                .map(|_| DueReminder::plain(email_id))
                .into_iter()
                .collect(),
            ReminderCadence::Daily { email_id, from } => from
                .resolve(dates, self.calendar)
                .map(|d| (d, DueReminder::dated(email_id, today)))
                .filter(|(d, reminder)| should_send(today, *d, &sent_on(&reminder.email_id)))
                .map(|(_, reminder)| reminder)
                .into_iter()
                .collect(),
            ReminderCadence::PayrollCutOff { email_id } => self
                .calendar
                .payroll_cut_off_interval(today)
                .map(|cut_off| format!("{}:{}", email_id, cut_off))
                .filter(|key| sent_on(key).is_empty())
                .map(|key| DueReminder {
                    email_id: key,
                    template_email_id: email_id.clone(),
                    audience: None,
                })
                .into_iter()
                .collect(),
            ReminderCadence::Fan { entries } => {
                let resolved: Vec<(&FanEntry, NaiveDate, Vec<NaiveDate>)> = entries
                    .iter()
                    .filter_map(|entry| {
                        entry
                            .due
                            .resolve(dates, self.calendar)
                            .map(|d| (entry, d, sent_on(&entry.email_id)))
                    })
                    .collect();

                let latest_sent = resolved
                    .iter()
                    .filter(|(_, _, sent)| !sent.is_empty())
                    .map(|(_, d, _)| *d)
                    .max();

                let eligible: Vec<&(&FanEntry, NaiveDate, Vec<NaiveDate>)> = resolved
                    .iter()
                    .filter(|(_, d, sent)| should_send(today, *d, sent))
                    .filter(|(_, d, _)| latest_sent.is_none_or(|latest| *d >= latest))
                    .collect();

                let Some(newest) = eligible.iter().map(|(_, d, _)| *d).max() else {
                    return Vec::new();
                };
                eligible
                    .into_iter()
                    .filter(|(_, d, _)| *d == newest)
                    .map(|(entry, _, _)| DueReminder {
                        email_id: entry.email_id.clone(),
                        template_email_id: entry.email_id.clone(),
                        audience: Some(entry.audience),
                    })
                    .collect()
            }
        }
    }
}
