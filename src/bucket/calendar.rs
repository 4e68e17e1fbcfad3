//! Calendar-aware bucket arithmetic.
//!
//! Every unit is anchored to the next coarser calendar boundary, so widths
//! that do not divide evenly produce a short trailing bucket instead of
//! drifting:
//!
//! | unit    | anchor                                              |
//! |---------|-----------------------------------------------------|
//! | second  | top of the minute                                   |
//! | minute  | top of the hour (`33m` gives `[0,33)` and `[33,60)`) |
//! | hour    | midnight                                            |
//! | day     | January 1st, by ordinal day of year                 |
//! | week    | first configured week-start day on/after January 1st |
//! | month   | January                                             |
//! | quarter | January                                             |
//! | year    | year 0                                              |
//!
//! Arithmetic happens on local wall-clock time in the instant's own zone.

use super::granularity::{Granularity, TimeUnit};
use chrono::{
    DateTime, Datelike, Days, Duration, LocalResult, Months, NaiveDate, NaiveDateTime, NaiveTime,
    Offset, TimeZone, Timelike, Weekday,
};
use chrono_tz::Tz;

/// Zone and week convention used to floor and advance instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    timezone: Tz,
    week_start: Weekday,
}

impl Default for Calendar {
    fn default() -> Self {
        Self::new(Tz::UTC, Weekday::Mon)
    }
}

impl Calendar {
    pub fn new(timezone: Tz, week_start: Weekday) -> Self {
        Self {
            timezone,
            week_start,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn week_start(&self) -> Weekday {
        self.week_start
    }

    /// Express any instant in this calendar's zone.
    pub fn localize<Z: TimeZone>(&self, instant: &DateTime<Z>) -> DateTime<Tz> {
        instant.with_timezone(&self.timezone)
    }

    /// Start of the bucket containing `instant`. Sub-unit components are
    /// zeroed and the instant's zone is kept. When the floored wall-clock
    /// time occurs twice, the result is the latest occurrence not after
    /// `instant`.
    pub fn floor(&self, instant: &DateTime<Tz>, granularity: Granularity) -> DateTime<Tz> {
        let local = instant.naive_local();
        let date = local.date();
        let step = granularity.multiplier();

        let floored = match granularity.unit() {
            TimeUnit::Second => date.and_time(time_of(
                local.hour(),
                local.minute(),
                floor_to(local.second(), step),
            )),
            TimeUnit::Minute => date.and_time(time_of(local.hour(), floor_to(local.minute(), step), 0)),
            TimeUnit::Hour => date.and_time(time_of(floor_to(local.hour(), step), 0, 0)),
            TimeUnit::Day => {
                let ordinal = floor_to(date.ordinal0(), step) + 1;
                midnight(NaiveDate::from_yo_opt(date.year(), ordinal).expect("floored ordinal stays within the year"))
            },
            TimeUnit::Week => midnight(self.floor_week(date, step)),
            TimeUnit::Month => midnight(first_of_month(date.year(), floor_to(date.month0(), step) + 1)),
            TimeUnit::Quarter => {
                let quarter = floor_to(date.month0() / 3, step);
                midnight(first_of_month(date.year(), quarter * 3 + 1))
            },
            TimeUnit::Year => {
                let step = i32::try_from(step).unwrap_or(i32::MAX);
                midnight(first_of_month(date.year() - date.year().rem_euclid(step), 1))
            },
        };

        match instant.timezone().from_local_datetime(&floored) {
            // Repeated wall-clock time: the later occurrence if it has started.
            LocalResult::Ambiguous(earlier, later) => {
                if later <= *instant {
                    later
                } else {
                    earlier
                }
            },
            _ => resolve_local(&instant.timezone(), floored),
        }
    }

    /// Advance `instant` by `multiplier` units. Sub-day units move by
    /// elapsed time; day and coarser units move the wall clock, and month
    /// arithmetic clamps the day to the end of the target month.
    ///
    /// # Panics
    ///
    /// Panics if the result falls outside the representable date range.
    pub fn add(&self, instant: &DateTime<Tz>, granularity: Granularity) -> DateTime<Tz> {
        let count = granularity.multiplier();
        let local = instant.naive_local();

        let shifted = match granularity.unit() {
            TimeUnit::Second => return *instant + Duration::seconds(i64::from(count)),
            TimeUnit::Minute => return *instant + Duration::minutes(i64::from(count)),
            TimeUnit::Hour => return *instant + Duration::hours(i64::from(count)),
            TimeUnit::Day => local.checked_add_days(Days::new(u64::from(count))),
            TimeUnit::Week => local.checked_add_days(Days::new(u64::from(count) * 7)),
            TimeUnit::Month => local.checked_add_months(Months::new(count)),
            TimeUnit::Quarter => count.checked_mul(3).and_then(|months| local.checked_add_months(Months::new(months))),
            TimeUnit::Year => count.checked_mul(12).and_then(|months| local.checked_add_months(Months::new(months))),
        };

        let shifted = shifted.unwrap_or_else(|| panic!("calendar overflow adding {granularity} to {instant}"));
        resolve_local(&instant.timezone(), shifted)
    }

    /// Bucket starts from the bucket containing `from` up to and including
    /// the bucket containing `to`.
    pub fn timeline(&self, from: &DateTime<Tz>, to: &DateTime<Tz>, granularity: Granularity) -> Timeline {
        Timeline {
            calendar: *self,
            start: self.floor(from, granularity),
            end: self.floor(to, granularity),
            granularity,
        }
    }

    fn week_boundary(&self, year: i32) -> NaiveDate {
        let jan1 = first_of_month(year, 1);
        let offset = (7 + self.week_start.num_days_from_monday() - jan1.weekday().num_days_from_monday()) % 7;
        jan1 + Days::new(u64::from(offset))
    }

    fn floor_week(&self, date: NaiveDate, step: u32) -> NaiveDate {
        let boundary = self.week_boundary(date.year());
        if date < boundary {
            return first_of_month(date.year(), 1);
        }
        let weeks = u64::try_from((date - boundary).num_days() / 7).unwrap_or(0);
        let weeks = weeks - weeks % u64::from(step);
        boundary + Days::new(weeks * 7)
    }
}

/// A finite, restartable sequence of bucket starts.
///
/// Each step advances by one granularity and snaps back to a bucket
/// boundary, so uneven widths such as `33m` yield `10:00, 10:33, 11:00, ...`.
/// A step never crosses a January 1st that starts a bucket, which keeps the
/// short first week of a year in weekly timelines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeline {
    calendar: Calendar,
    start: DateTime<Tz>,
    end: DateTime<Tz>,
    granularity: Granularity,
}

impl Timeline {
    pub fn start(&self) -> DateTime<Tz> {
        self.start
    }

    pub fn end(&self) -> DateTime<Tz> {
        self.end
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn iter(&self) -> TimelineIter {
        TimelineIter {
            calendar: self.calendar,
            granularity: self.granularity,
            next: Some(self.start),
            end: self.end,
        }
    }
}

impl IntoIterator for &Timeline {
    type Item = DateTime<Tz>;
    type IntoIter = TimelineIter;

    fn into_iter(self) -> TimelineIter {
        self.iter()
    }
}

impl IntoIterator for Timeline {
    type Item = DateTime<Tz>;
    type IntoIter = TimelineIter;

    fn into_iter(self) -> TimelineIter {
        self.iter()
    }
}

#[derive(Debug, Clone)]
pub struct TimelineIter {
    calendar: Calendar,
    granularity: Granularity,
    next: Option<DateTime<Tz>>,
    end: DateTime<Tz>,
}

impl Iterator for TimelineIter {
    type Item = DateTime<Tz>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take().filter(|current| *current <= self.end)?;
        let mut following = self
            .calendar
            .floor(&self.calendar.add(&current, self.granularity), self.granularity);

        // Never step over a January 1st that starts a bucket of its own.
        let new_year = current
            .naive_local()
            .year()
            .checked_add(1)
            .and_then(|year| NaiveDate::from_ymd_opt(year, 1, 1));
        if let Some(new_year) = new_year {
            let new_year = resolve_local(&current.timezone(), midnight(new_year));
            if new_year < following && self.calendar.floor(&new_year, self.granularity) == new_year {
                following = new_year;
            }
        }

        if following > current {
            self.next = Some(following);
        }
        Some(current)
    }
}

fn floor_to(value: u32, step: u32) -> u32 {
    value - value % step
}

fn time_of(hour: u32, minute: u32, second: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, second).expect("floored time components are in range")
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).expect("first of month always exists")
}

/// Map a wall-clock time back to an instant. Ambiguous times take the
/// earlier instant; times skipped by a DST gap use the offset in force
/// before the gap.
fn resolve_local(tz: &Tz, local: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(instant) | LocalResult::Ambiguous(instant, _) => instant,
        LocalResult::None => {
            let before = tz.offset_from_utc_datetime(&(local - Duration::days(1))).fix();
            let utc = local - Duration::seconds(i64::from(before.local_minus_utc()));
            tz.from_utc_datetime(&utc)
        },
    }
}
