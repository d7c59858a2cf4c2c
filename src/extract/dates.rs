//! Natural-language date parsing for chat messages.
//!
//! Deliberately small: it understands the shapes students actually write
//! ("next Monday at 11:59 PM", "Dec 5", "3/14/2025", "tomorrow 2pm") and
//! the ISO forms a language model returns. Everything is resolved relative
//! to an explicit `now` so results are reproducible.

use std::ops::Range;
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use regex::Regex;

static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:\bat\s+)?(?:\b(\d{1,2}):(\d{2})(?:\s*([ap])\.?m\b\.?)?|\b(\d{1,2})\s*([ap])\.?m\b\.?|\b(noon|midnight)\b)",
    )
    .unwrap()
});

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})[-/](\d{1,2})[-/](\d{1,2})$").unwrap());

static NUMERIC_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})[-/](\d{1,2})(?:[-/](\d{2}|\d{4}))?$").unwrap());

static MONTH_FIRST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z]+)\.?\s+(\d{1,2})(?:st|nd|rd|th)?(?:,?\s+(\d{4}))?$").unwrap()
});

static DAY_FIRST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})(?:st|nd|rd|th)?\s+(?:of\s+)?([a-z]+)\.?(?:,?\s+(\d{4}))?$").unwrap()
});

static WEEKDAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:(this|next|coming)\s+)?([a-z]+)$").unwrap());

const ISO_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parse a whole date/time expression relative to `now`.
///
/// Date-only expressions resolve to midnight; a bare time resolves to
/// today. Returns `None` if any part of the expression is not understood.
pub fn parse_datetime(expr: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let trimmed = expr.trim().trim_end_matches(['.', ',', '!', '?', ';']);
    if trimmed.is_empty() {
        return None;
    }

    if let Some(dt) = parse_iso_datetime(trimmed) {
        return Some(dt);
    }

    let lowered = trimmed.to_lowercase();
    let (time, rest) = match locate_time(&lowered) {
        Some((time, range)) => {
            let mut rest = String::with_capacity(lowered.len());
            rest.push_str(&lowered[..range.start]);
            rest.push(' ');
            rest.push_str(&lowered[range.end..]);
            (Some(time), rest)
        }
        None => (None, lowered),
    };

    let date_part = clean_date_part(&rest);
    let date = if date_part.is_empty() {
        time?;
        now.date()
    } else {
        parse_date_part(&date_part, now.date())?
    };

    Some(date.and_time(time.unwrap_or(NaiveTime::MIN)))
}

/// Parse `expr`; when it names a date but no time, borrow the first
/// time-of-day found in `context`.
pub fn parse_with_time_hint(expr: &str, context: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let parsed = parse_datetime(expr, now)?;
    if find_time_of_day(expr).is_some() {
        return Some(parsed);
    }
    match find_time_of_day(context) {
        Some(time) => Some(parsed.date().and_time(time)),
        None => Some(parsed),
    }
}

/// First time-of-day expression in free text ("2pm", "11:59 PM", "14:30", "noon").
pub fn find_time_of_day(text: &str) -> Option<NaiveTime> {
    locate_time(text).map(|(time, _)| time)
}

/// Whether `text` contains any time-of-day expression.
pub fn has_time_of_day(text: &str) -> bool {
    locate_time(text).is_some()
}

fn locate_time(text: &str) -> Option<(NaiveTime, Range<usize>)> {
    for caps in TIME_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };

        let time = if let (Some(h), Some(m)) = (caps.get(1), caps.get(2)) {
            let hour: u32 = h.as_str().parse().ok()?;
            let minute: u32 = m.as_str().parse().ok()?;
            match caps.get(3) {
                Some(meridiem) => to_24h(hour, minute, meridiem.as_str()),
                None => NaiveTime::from_hms_opt(hour, minute, 0),
            }
        } else if let (Some(h), Some(meridiem)) = (caps.get(4), caps.get(5)) {
            let hour: u32 = h.as_str().parse().ok()?;
            to_24h(hour, 0, meridiem.as_str())
        } else if let Some(word) = caps.get(6) {
            match word.as_str().to_lowercase().as_str() {
                "noon" => NaiveTime::from_hms_opt(12, 0, 0),
                _ => Some(NaiveTime::MIN),
            }
        } else {
            None
        };

        if let Some(time) = time {
            return Some((time, whole.range()));
        }
    }
    None
}

fn to_24h(hour: u32, minute: u32, meridiem: &str) -> Option<NaiveTime> {
    if !(1..=12).contains(&hour) {
        return None;
    }
    let pm = meridiem.eq_ignore_ascii_case("p");
    let hour = match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, true) => h + 12,
        (h, false) => h,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn parse_iso_datetime(expr: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(expr) {
        return Some(dt.naive_local());
    }
    ISO_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(expr, fmt).ok())
}

/// Drop connective words and punctuation left around the date.
fn clean_date_part(raw: &str) -> String {
    let words: Vec<&str> = raw
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| matches!(c, ',' | '.' | '!' | '?' | ';' | ':')))
        .filter(|w| !w.is_empty())
        .collect();

    let mut start = 0;
    while start < words.len() && matches!(words[start], "on" | "by" | "at" | "due" | "before") {
        start += 1;
    }
    let mut end = words.len();
    while end > start && matches!(words[end - 1], "at" | "by" | "on") {
        end -= 1;
    }
    words[start..end].join(" ")
}

fn parse_date_part(part: &str, today: NaiveDate) -> Option<NaiveDate> {
    match part {
        "today" | "tonight" => return Some(today),
        "tomorrow" | "tmrw" | "tmr" => return today.succ_opt(),
        _ => {}
    }

    if let Some(caps) = ISO_DATE_RE.captures(part) {
        return NaiveDate::from_ymd_opt(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        );
    }

    if let Some(caps) = NUMERIC_DATE_RE.captures(part) {
        let first: u32 = caps[1].parse().ok()?;
        let second: u32 = caps[2].parse().ok()?;
        let year = match caps.get(3) {
            Some(y) => expand_year(y.as_str())?,
            None => today.year(),
        };
        // Month-first unless that is impossible.
        let (month, day) = if first > 12 { (second, first) } else { (first, second) };
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    if let Some(caps) = MONTH_FIRST_RE.captures(part)
        && let Some(month) = month_from_name(&caps[1])
    {
        let year = caps.get(3).map_or(Some(today.year()), |y| y.as_str().parse().ok())?;
        return NaiveDate::from_ymd_opt(year, month, caps[2].parse().ok()?);
    }

    if let Some(caps) = DAY_FIRST_RE.captures(part)
        && let Some(month) = month_from_name(&caps[2])
    {
        let year = caps.get(3).map_or(Some(today.year()), |y| y.as_str().parse().ok())?;
        return NaiveDate::from_ymd_opt(year, month, caps[1].parse().ok()?);
    }

    if let Some(caps) = WEEKDAY_RE.captures(part)
        && let Some(target) = weekday_from_name(&caps[2])
    {
        let strictly_after = matches!(caps.get(1).map(|m| m.as_str()), Some("next"));
        return Some(next_weekday(today, target, strictly_after));
    }

    None
}

fn expand_year(raw: &str) -> Option<i32> {
    let year: i32 = raw.parse().ok()?;
    Some(if raw.len() == 2 { 2000 + year } else { year })
}

/// Next occurrence of `target`. Today counts unless `strictly_after`.
pub fn next_weekday(today: NaiveDate, target: Weekday, strictly_after: bool) -> NaiveDate {
    let from = today.weekday().num_days_from_monday() as i64;
    let to = target.num_days_from_monday() as i64;
    let mut days = (to - from).rem_euclid(7);
    if days == 0 && strictly_after {
        days = 7;
    }
    today + Duration::days(days)
}

pub fn weekday_from_name(name: &str) -> Option<Weekday> {
    let weekday = match name.to_lowercase().as_str() {
        "monday" | "mon" => Weekday::Mon,
        "tuesday" | "tue" | "tues" => Weekday::Tue,
        "wednesday" | "wed" => Weekday::Wed,
        "thursday" | "thu" | "thur" | "thurs" => Weekday::Thu,
        "friday" | "fri" => Weekday::Fri,
        "saturday" | "sat" => Weekday::Sat,
        "sunday" | "sun" => Weekday::Sun,
        _ => return None,
    };
    Some(weekday)
}

pub fn month_from_name(name: &str) -> Option<u32> {
    let month = match name.to_lowercase().as_str() {
        "january" | "jan" => 1,
        "february" | "feb" => 2,
        "march" | "mar" => 3,
        "april" | "apr" => 4,
        "may" => 5,
        "june" | "jun" => 6,
        "july" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sep" | "sept" => 9,
        "october" | "oct" => 10,
        "november" | "nov" => 11,
        "december" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}
