// Clock & Calendar - Current instant, business days, working-day arithmetic
// and payroll cut-off dates

pub mod holidays;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Payroll cut-off falls on this day of the month when it is a business day.
pub const PAY_CUT_OFF_DAY: u32 = 3;
/// Width of the cut-off interval in working days before the cut-off.
pub const PAY_CUT_OFF_INTERVAL: i64 = 4;
/// Fallback weekday when the cut-off day is not a business day.
pub const PAY_CUT_OFF_FALLBACK_WEEKDAY: Weekday = Weekday::Fri;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct Calendar {
    clock: Arc<dyn Clock>,
    bank_holidays: BTreeSet<NaiveDate>,
    cut_offs: RwLock<HashMap<(i32, u32), NaiveDate>>,
}

impl Calendar {
    pub fn new(clock: Arc<dyn Clock>, bank_holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        let calendar = Self {
            clock,
            bank_holidays: bank_holidays.into_iter().collect(),
            cut_offs: RwLock::new(HashMap::new()),
        };
        let today = calendar.today();
        if !calendar.holidays_cover(today) {
            warn!(
                "No bank holidays known for {} (list ends {}); set BANK_HOLIDAYS",
                today.year(),
                calendar
                    .bank_holidays
                    .last()
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "empty".to_string())
            );
        }
        calendar
    }

    pub fn england_and_wales(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, holidays::england_and_wales())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Whether the holiday list reaches `date`'s year.
    pub fn holidays_cover(&self, date: NaiveDate) -> bool {
        self.bank_holidays.last().is_some_and(|last| last.year() >= date.year())
    }

    pub fn is_bank_holiday(&self, date: NaiveDate) -> bool {
        self.bank_holidays.contains(&date)
    }

    /// Monday to Friday and not a bank holiday.
    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.is_bank_holiday(date)
    }

    /// `date` moved by `delta` working days; negative deltas move backwards.
    ///
    /// The start date itself is never counted, so it may be a non-working day.
    pub fn add_working_days(&self, date: NaiveDate, delta: i64) -> NaiveDate {
        let step = if delta < 0 { -1 } else { 1 };
        let mut remaining = delta.abs();
        let mut current = date;
        while remaining > 0 {
            current += Duration::days(step);
            if self.is_business_day(current) {
                remaining -= 1;
            }
        }
        current
    }

    /// Payroll cut-off for the month containing `month_of`.
    pub fn payroll_cut_off(&self, month_of: NaiveDate) -> NaiveDate {
        let key = (month_of.year(), month_of.month());
        if let Some(cached) = self
            .cut_offs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return *cached;
        }

        let cut_off = self.compute_cut_off(month_of);
        self.cut_offs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, cut_off);
        cut_off
    }

    fn compute_cut_off(&self, month_of: NaiveDate) -> NaiveDate {
        let cut_off_day = cut_off_day_of_month(month_of);
        if self.is_business_day(cut_off_day) {
            return cut_off_day;
        }

        let fallback = PAY_CUT_OFF_FALLBACK_WEEKDAY.num_days_from_monday() as i64;
        let mut days_back = cut_off_day.weekday().num_days_from_monday() as i64 - fallback;
        if days_back <= 0 {
            days_back += 7;
        }

        let mut cut_off = cut_off_day - Duration::days(days_back);
        while !self.is_business_day(cut_off) {
            cut_off -= Duration::days(1);
        }
        cut_off
    }

    /// First payroll cut-off on or after `date`.
    pub fn next_payroll_cut_off(&self, date: NaiveDate) -> NaiveDate {
        let this_month = self.payroll_cut_off(date);
        if date <= this_month {
            return this_month;
        }
        self.payroll_cut_off(next_month(date))
    }

    /// The applicable cut-off when `date` lies in `[cut_off - 4 working days, cut_off]`.
    pub fn payroll_cut_off_interval(&self, date: NaiveDate) -> Option<NaiveDate> {
        if !self.is_business_day(date) {
            return None;
        }
        let cut_off = self.next_payroll_cut_off(date);
        let opens = self.add_working_days(cut_off, -PAY_CUT_OFF_INTERVAL);
        (opens <= date && date <= cut_off).then_some(cut_off)
    }

    pub fn is_in_payroll_cutoff_interval(&self, date: NaiveDate) -> bool {
        self.payroll_cut_off_interval(date).is_some()
    }
}

fn cut_off_day_of_month(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.day() as i64 - PAY_CUT_OFF_DAY as i64)
}

/// A date inside the month after `date`'s month.
fn next_month(date: NaiveDate) -> NaiveDate {
    // The 3rd plus 31 days always lands between the 3rd and the 6th of the next month.
    cut_off_day_of_month(date) + Duration::days(31)
}
