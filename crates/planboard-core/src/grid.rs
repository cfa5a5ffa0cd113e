//! Month grid arithmetic.
//!
//! A [`MonthGrid`] is the 7-column matrix of dates shown for one month,
//! padded with overflow days from the neighbouring months so that every
//! row is a complete week starting on the configured week-start day.

use chrono::{
  Datelike,
  NaiveDate,
  TimeDelta,
  Weekday
};

/// A concrete calendar day. Equality is by day, there is no time of day.
pub type CalendarDate = NaiveDate;

pub const DAYS_PER_WEEK: usize = 7;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash,
)]
pub struct GridDay {
  pub date:     CalendarDate,
  /// `false` for overflow days borrowed from the previous or next month.
  pub in_month: bool
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthGrid {
  year:       i32,
  month:      u32,
  week_start: Weekday,
  weeks:      Vec<[GridDay; DAYS_PER_WEEK]>
}

impl MonthGrid {
  pub fn year(&self) -> i32 {
    self.year
  }

  pub fn month(&self) -> u32 {
    self.month
  }

  pub fn week_start(&self) -> Weekday {
    self.week_start
  }

  pub fn weeks(
    &self
  ) -> &[[GridDay; DAYS_PER_WEEK]] {
    &self.weeks
  }

  pub fn week_count(&self) -> usize {
    self.weeks.len()
  }

  /// All cells in display order, row by row.
  pub fn days(
    &self
  ) -> impl Iterator<Item = GridDay> + '_
  {
    self
      .weeks
      .iter()
      .flat_map(|week| week.iter().copied())
  }

  /// Only the days that belong to the displayed month.
  pub fn month_days(
    &self
  ) -> impl Iterator<Item = CalendarDate> + '_
  {
    self
      .days()
      .filter(|day| day.in_month)
      .map(|day| day.date)
  }

  pub fn first_date(
    &self
  ) -> Option<CalendarDate> {
    self
      .weeks
      .first()
      .map(|week| week[0].date)
  }

  pub fn last_date(
    &self
  ) -> Option<CalendarDate> {
    self.weeks.last().map(|week| {
      week[DAYS_PER_WEEK - 1].date
    })
  }

  pub fn contains(
    &self,
    date: CalendarDate
  ) -> bool {
    match (
      self.first_date(),
      self.last_date()
    ) {
      | (Some(first), Some(last)) => {
        first <= date && date <= last
      }
      | _ => false
    }
  }
}

/// Builds the grid for the month containing `reference`.
///
/// Any day of the month yields the same grid. The walk runs from the start
/// of the week holding the 1st to the end of the week holding the last day,
/// so the result always has between 4 and 6 full rows.
///
/// At the edges of the representable range the padding weeks may be cut
/// short: cells past the last representable date hold `NaiveDate::MAX`
/// marked as overflow, and the first row may start on the 1st itself.
#[tracing::instrument(level = "trace")]
pub fn month_grid(
  reference: CalendarDate,
  week_start: Weekday
) -> MonthGrid {
  let year = reference.year();
  let month = reference.month();
  let month_start =
    first_day_of_month(year, month);
  let month_end =
    last_day_of_month(year, month);
  let grid_start =
    start_of_week(month_start, week_start);
  let grid_end =
    end_of_week(month_end, week_start);

  let span_days =
    (grid_end - grid_start).num_days() + 1;
  let week_len = DAYS_PER_WEEK as i64;
  let week_count =
    (span_days + week_len - 1) / week_len;

  let weeks = (0..week_count)
    .map(|row| {
      std::array::from_fn(|col| {
        let offset =
          row * week_len + col as i64;
        match checked_add_days(
          grid_start, offset
        ) {
          | Some(date) => GridDay {
            date,
            in_month: date.year() == year
              && date.month() == month
          },
          | None => GridDay {
            date:     NaiveDate::MAX,
            in_month: false
          }
        }
      })
    })
    .collect::<Vec<_>>();

  tracing::trace!(
    year,
    month,
    weeks = weeks.len(),
    %grid_start,
    %grid_end,
    "built month grid"
  );

  MonthGrid {
    year,
    month,
    week_start,
    weeks
  }
}

pub fn first_day_of_month(
  year: i32,
  month: u32
) -> CalendarDate {
  NaiveDate::from_ymd_opt(
    year, month, 1
  )
  .unwrap_or(NaiveDate::MIN)
}

pub fn last_day_of_month(
  year: i32,
  month: u32
) -> CalendarDate {
  let (next_year, next_month) =
    if month >= 12 {
      (year.saturating_add(1), 1_u32)
    } else {
      (year, month + 1)
    };
  match NaiveDate::from_ymd_opt(
    next_year, next_month, 1
  ) {
    | Some(next_first) => {
      add_days(next_first, -1)
    }
    | None => NaiveDate::MAX
  }
}

pub fn days_in_month(
  year: i32,
  month: u32
) -> u32 {
  last_day_of_month(year, month).day()
}

/// `None` when the offset leaves chrono's date range.
pub fn checked_add_days(
  date: CalendarDate,
  days: i64
) -> Option<CalendarDate> {
  date.checked_add_signed(
    TimeDelta::try_days(days)?
  )
}

/// Like [`checked_add_days`], staying on `date` when out of range.
pub fn add_days(
  date: CalendarDate,
  days: i64
) -> CalendarDate {
  checked_add_days(date, days)
    .unwrap_or(date)
}

pub fn start_of_week(
  day: CalendarDate,
  week_start: Weekday
) -> CalendarDate {
  let day_idx = day
    .weekday()
    .num_days_from_monday()
    as i64;
  let start_idx = week_start
    .num_days_from_monday()
    as i64;
  let diff =
    (7 + day_idx - start_idx) % 7;
  add_days(day, -diff)
}

/// Last day of the week holding `day`, or `NaiveDate::MAX` when that
/// week runs past the representable range.
pub fn end_of_week(
  day: CalendarDate,
  week_start: Weekday
) -> CalendarDate {
  checked_add_days(
    start_of_week(day, week_start),
    DAYS_PER_WEEK as i64 - 1
  )
  .unwrap_or(NaiveDate::MAX)
}

/// Moves by whole months, clamping the day to the target month's length.
/// `None` when the target year is out of range.
pub fn checked_add_months(
  date: CalendarDate,
  months: i64
) -> Option<CalendarDate> {
  let index = i64::from(date.year())
    .checked_mul(12)?
    .checked_add(i64::from(date.month0()))?
    .checked_add(months)?;
  let year =
    i32::try_from(index.div_euclid(12))
      .ok()?;
  let month =
    index.rem_euclid(12) as u32 + 1;
  let first =
    NaiveDate::from_ymd_opt(year, month, 1)?;
  let day = date
    .day()
    .min(days_in_month(year, month));
  first.with_day(day)
}

/// Like [`checked_add_months`], staying on `date` when out of range.
pub fn add_months(
  date: CalendarDate,
  months: i32
) -> CalendarDate {
  checked_add_months(
    date,
    i64::from(months)
  )
  .unwrap_or(date)
}

/// Column headers for a grid starting on `week_start`.
pub fn weekday_labels(
  week_start: Weekday
) -> [&'static str; DAYS_PER_WEEK] {
  let mut day = week_start;
  std::array::from_fn(|_| {
    let label = weekday_label(day);
    day = day.succ();
    label
  })
}

pub fn weekday_label(
  day: Weekday
) -> &'static str {
  match day {
    | Weekday::Mon => "Mon",
    | Weekday::Tue => "Tue",
    | Weekday::Wed => "Wed",
    | Weekday::Thu => "Thu",
    | Weekday::Fri => "Fri",
    | Weekday::Sat => "Sat",
    | Weekday::Sun => "Sun"
  }
}
