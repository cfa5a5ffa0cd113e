use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

use crate::grid::{
  add_days,
  add_months,
  checked_add_days,
  checked_add_months,
  first_day_of_month
};

const TIMEZONE_CONFIG_FILE: &str =
  "planboard-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "PLANBOARD_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "PLANBOARD_TIME_CONFIG";

/// Shape of a `datetime-local` form value, minute precision.
pub const REMINDER_INPUT_FORMAT: &str =
  "%Y-%m-%dT%H:%M";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

pub fn project_timezone() -> &'static Tz
{
  static PROJECT_TZ: OnceLock<Tz> =
    OnceLock::new();
  PROJECT_TZ.get_or_init(
    resolve_project_timezone
  )
}

/// Today's date on the project wall clock.
#[must_use]
pub fn project_today(
  now: DateTime<Utc>
) -> NaiveDate {
  now.with_timezone(project_timezone())
    .date_naive()
}

fn resolve_project_timezone() -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) =
      parse_timezone(&raw, TIMEZONE_ENV_VAR)
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  tracing::debug!(
    "no project timezone configured; \
     using UTC"
  );
  chrono_tz::UTC
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &PathBuf
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured project timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

fn to_utc_from_local(
  tz: &Tz,
  local_naive: NaiveDateTime,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  match tz
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        context,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Ok(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => {
      Err(anyhow!(
        "local datetime does not \
         exist in configured \
         timezone: {context}"
      ))
    }
  }
}

/// Parses a reminder given either as a `datetime-local` value
/// (`2026-10-20T09:30`, project wall clock) or as full RFC 3339.
pub fn parse_reminder(
  input: &str
) -> anyhow::Result<DateTime<Utc>> {
  parse_reminder_in(
    input,
    project_timezone()
  )
}

#[tracing::instrument(skip(tz), fields(input = input))]
pub fn parse_reminder_in(
  input: &str,
  tz: &Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  if let Ok(parsed) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(
      parsed.with_timezone(&Utc)
    );
  }

  let local =
    NaiveDateTime::parse_from_str(
      token,
      REMINDER_INPUT_FORMAT
    )
    .or_else(|_| {
      NaiveDateTime::parse_from_str(
        token,
        "%Y-%m-%d %H:%M"
      )
    })
    .with_context(|| {
      format!(
        "invalid reminder '{token}'; \
         expected YYYY-MM-DDTHH:MM"
      )
    })?;

  to_utc_from_local(tz, local, token)
}

/// Inverse of [`parse_reminder`]: the value shown back in an edit form.
#[must_use]
pub fn format_reminder_input(
  reminder: DateTime<Utc>
) -> String {
  format_reminder_input_in(
    reminder,
    project_timezone()
  )
}

#[must_use]
pub fn format_reminder_input_in(
  reminder: DateTime<Utc>,
  tz: &Tz
) -> String {
  reminder
    .with_timezone(tz)
    .format(REMINDER_INPUT_FORMAT)
    .to_string()
}

/// Resolves a day reference: `today`, `tomorrow`, `yesterday`,
/// `YYYY-MM-DD`, a weekday name (next occurrence, today included) or a
/// relative offset such as `+3d` / `-1w`.
#[tracing::instrument(skip(today), fields(input = input))]
pub fn parse_day_expr(
  input: &str,
  today: NaiveDate
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "today" => return Ok(today),
    | "tomorrow" => {
      return Ok(add_days(today, 1));
    }
    | "yesterday" => {
      return Ok(add_days(today, -1));
    }
    | _ => {}
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return Ok(date);
  }

  if let Some(weekday) =
    parse_weekday_name(&lower)
  {
    return Ok(next_weekday_date(
      today, weekday
    ));
  }

  let rel_re = Regex::new(
    r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dw])$"
  )
  .context("invalid relative day regex")?;
  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let num: i64 = caps["num"]
      .parse()
      .context("invalid day offset")?;
    let sign = if &caps["sign"] == "-" {
      -1
    } else {
      1
    };
    let per_unit = match &caps["unit"] {
      | "w" => 7,
      | _ => 1
    };
    return num
      .checked_mul(per_unit)
      .and_then(|days| {
        days.checked_mul(sign)
      })
      .and_then(|days| {
        checked_add_days(today, days)
      })
      .ok_or_else(|| {
        anyhow!(
          "date offset out of range: \
           {token}"
        )
      });
  }

  Err(anyhow!(
    "unrecognized date '{token}'"
  ))
}

/// Resolves a month reference to the first day of that month:
/// `YYYY-MM`, `YYYY-MM-DD`, a month name (this year), `this`, `next`,
/// `prev` or a signed month offset such as `+2`.
#[tracing::instrument(skip(today), fields(input = input))]
pub fn parse_month_expr(
  input: &str,
  today: NaiveDate
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();
  let this_month = first_day_of_month(
    today.year(),
    today.month()
  );

  match lower.as_str() {
    | "" | "this" | "now" | "today" => {
      return Ok(this_month);
    }
    | "next" => {
      return Ok(add_months(
        this_month, 1
      ));
    }
    | "prev" | "previous" | "last" => {
      return Ok(add_months(
        this_month, -1
      ));
    }
    | _ => {}
  }

  let month_re = Regex::new(
    r"^(?P<year>\d{4})-(?P<month>\d{1,2})(?:-\d{1,2})?$"
  )
  .context("invalid month regex")?;
  if let Some(caps) =
    month_re.captures(token)
  {
    let year: i32 = caps["year"]
      .parse()
      .context("invalid year")?;
    let month: u32 = caps["month"]
      .parse()
      .context("invalid month")?;
    return NaiveDate::from_ymd_opt(
      year, month, 1
    )
    .ok_or_else(|| {
      anyhow!(
        "invalid month '{token}'"
      )
    });
  }

  if let Some(month) =
    parse_month_name(&lower)
  {
    return NaiveDate::from_ymd_opt(
      today.year(),
      month,
      1
    )
    .ok_or_else(|| {
      anyhow!(
        "invalid month '{token}'"
      )
    });
  }

  let offset_re =
    Regex::new(r"^[+-]\d+$")
      .context("invalid offset regex")?;
  if offset_re.is_match(token) {
    let offset: i64 = token
      .parse()
      .context("invalid month offset")?;
    return checked_add_months(
      this_month, offset
    )
    .ok_or_else(|| {
      anyhow!(
        "month offset out of range: \
         {token}"
      )
    });
  }

  Err(anyhow!(
    "unrecognized month '{token}'"
  ))
}

/// Parses a timetable slot label (`8:00`, `08:00`, `14:30`).
pub fn parse_slot_time(
  input: &str
) -> anyhow::Result<NaiveTime> {
  let token = input.trim();
  let clock_re = Regex::new(
    r"^(?P<h>\d{1,2}):(?P<m>\d{2})$"
  )
  .context("invalid clock regex")?;
  let caps =
    clock_re.captures(token).ok_or_else(
      || {
        anyhow!(
          "invalid time slot '{token}'; \
           expected HH:MM"
        )
      }
    )?;
  let hour: u32 = caps["h"]
    .parse()
    .context("invalid hour")?;
  let minute: u32 = caps["m"]
    .parse()
    .context("invalid minute")?;
  NaiveTime::from_hms_opt(
    hour, minute, 0
  )
  .ok_or_else(|| {
    anyhow!(
      "time slot out of range: {token}"
    )
  })
}

#[must_use]
pub fn format_slot_time(
  slot: NaiveTime
) -> String {
  slot.format("%H:%M").to_string()
}

pub fn parse_weekday_name(
  s: &str
) -> Option<Weekday> {
  match s.trim().to_ascii_lowercase().as_str() {
    | "mon" | "monday" => {
      Some(Weekday::Mon)
    }
    | "tue" | "tues" | "tuesday" => {
      Some(Weekday::Tue)
    }
    | "wed" | "wednesday" => {
      Some(Weekday::Wed)
    }
    | "thu" | "thur" | "thurs"
    | "thursday" => Some(Weekday::Thu),
    | "fri" | "friday" => {
      Some(Weekday::Fri)
    }
    | "sat" | "saturday" => {
      Some(Weekday::Sat)
    }
    | "sun" | "sunday" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn parse_month_name(
  s: &str
) -> Option<u32> {
  match s {
    | "jan" | "january" => Some(1),
    | "feb" | "february" => Some(2),
    | "mar" | "march" => Some(3),
    | "apr" | "april" => Some(4),
    | "may" => Some(5),
    | "jun" | "june" => Some(6),
    | "jul" | "july" => Some(7),
    | "aug" | "august" => Some(8),
    | "sep" | "sept" | "september" => {
      Some(9)
    }
    | "oct" | "october" => Some(10),
    | "nov" | "november" => Some(11),
    | "dec" | "december" => Some(12),
    | _ => None
  }
}

fn next_weekday_date(
  today: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let current = today
    .weekday()
    .num_days_from_monday()
    as i64;
  let wanted =
    target.num_days_from_monday() as i64;
  add_days(
    today,
    (7 + wanted - current) % 7
  )
}
