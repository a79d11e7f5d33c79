//! Natural-language date and time expressions.
//!
//! Understands the Brazilian Portuguese fragments clients actually type:
//! relative days (`hoje`, `amanhã`, `depois de amanhã`), weekday names,
//! `DD/MM/YYYY`, `15 de janeiro de 2025`, and times such as `14:30`, `14h`,
//! `14 horas` or `2 da tarde`. Anything unrecognised is `None`, never an error.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Utc, Weekday,
};
use regex::Regex;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedDate {
    pub date: NaiveDate,
    pub confidence: Confidence,
}

const MONTHS: [&str; 12] = [
    "janeiro",
    "fevereiro",
    "março",
    "abril",
    "maio",
    "junho",
    "julho",
    "agosto",
    "setembro",
    "outubro",
    "novembro",
    "dezembro",
];

const WEEKDAYS: [&str; 7] = [
    "segunda-feira",
    "terça-feira",
    "quarta-feira",
    "quinta-feira",
    "sexta-feira",
    "sábado",
    "domingo",
];

const DAY_TOKEN: &str = r"depois de amanh[ãa]|hoje|amanh[ãa]|(?:segunda|ter[çc]a|quarta|quinta|sexta)(?:-feira)?|s[áa]bado|domingo|\d{1,2}/\d{1,2}/\d{4}";

const TIME_TOKEN: &str = r"\d{1,2}(?:\s*(?:h\s*)?d[ae]\s+(?:manh[ãa]|tarde|noite)\b|\s*[h:]\s*\d{2}\b|\s*h\b|\s+horas?\b)?";

static DAY_AFTER_TOMORROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bdepois de amanh[ãa]\b").expect("valid regex"));
static TOMORROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bamanh[ãa]\b").expect("valid regex"));
static TODAY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bhoje\b").expect("valid regex"));
static WEEKDAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(segunda|ter[çc]a|quarta|quinta|sexta|s[áa]bado|domingo)(?:-feira)?\b")
        .expect("valid regex")
});
static NUMERIC_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").expect("valid regex"));
static LONG_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(\d{1,2})\s+de\s+(janeiro|fevereiro|mar[çc]o|abril|maio|junho|julho|agosto|setembro|outubro|novembro|dezembro)\s+de\s+(\d{4})\b",
    )
    .expect("valid regex")
});

static PERIOD_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})\s*(?:h\s*)?d[ae]\s+(manh[ãa]|tarde|noite)\b").expect("valid regex")
});
static CLOCK_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})\s*[h:]\s*(\d{2})?\b").expect("valid regex"));
static HOURS_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})\s+horas?\b").expect("valid regex"));
static BARE_HOUR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[àa]s\s+)?(\d{1,2})$").expect("valid regex"));

// A time must end at a separator so `17/10` is never read as 17h.
static DAY_THEN_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?P<day>{DAY_TOKEN})\s*,?\s+(?:[àa]s\s+)?(?P<time>{TIME_TOKEN})(?:[\s,.!?]|$)"
    ))
    .expect("valid regex")
});
static TIME_THEN_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b(?P<time>{TIME_TOKEN})\s*,?\s+(?:de\s+)?(?P<day>{DAY_TOKEN})"
    ))
    .expect("valid regex")
});

/// Parser anchored on the business-local "today".
#[derive(Debug, Clone, Copy)]
pub struct DateTimeParser {
    today: NaiveDate,
}

impl DateTimeParser {
    pub fn new(today: NaiveDate) -> DateTimeParser {
        DateTimeParser { today }
    }

    /// Parser for the local date of `now` in the business timezone.
    pub fn at(now: DateTime<Utc>, offset: FixedOffset) -> DateTimeParser {
        DateTimeParser::new(now.with_timezone(&offset).date_naive())
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn parse_date(&self, text: &str) -> Option<ParsedDate> {
        let normalized = normalize(text);
        let high = |date| {
            Some(ParsedDate {
                date,
                confidence: Confidence::High,
            })
        };

        if DAY_AFTER_TOMORROW.is_match(&normalized) {
            return high(self.today + Duration::days(2));
        }
        if TOMORROW.is_match(&normalized) {
            return high(self.today + Duration::days(1));
        }
        if TODAY.is_match(&normalized) {
            return high(self.today);
        }

        if let Some(caps) = WEEKDAY.captures(&normalized) {
            let weekday = weekday_from_name(&caps[1])?;
            return high(next_weekday(self.today, weekday));
        }

        if let Some(caps) = NUMERIC_DATE.captures(&normalized) {
            let day = caps[1].parse().ok()?;
            let month = caps[2].parse().ok()?;
            let year = caps[3].parse().ok()?;
            return NaiveDate::from_ymd_opt(year, month, day).and_then(high);
        }

        if let Some(caps) = LONG_DATE.captures(&normalized) {
            let day = caps[1].parse().ok()?;
            let month = month_from_name(&caps[2])?;
            let year = caps[3].parse().ok()?;
            return NaiveDate::from_ymd_opt(year, month, day).and_then(high);
        }

        None
    }

    pub fn parse_time(&self, text: &str) -> Option<NaiveTime> {
        let normalized = normalize(text);

        if let Some(caps) = PERIOD_TIME.captures(&normalized) {
            let hour: u32 = caps[1].parse().ok()?;
            let offset = match &caps[2] {
                "tarde" => 12,
                "noite" => 18,
                _ => 0,
            };
            return NaiveTime::from_hms_opt(hour + offset, 0, 0);
        }

        if let Some(caps) = CLOCK_TIME.captures(&normalized) {
            let hour: u32 = caps[1].parse().ok()?;
            let minute: u32 = match caps.get(2) {
                Some(m) => m.as_str().parse().ok()?,
                None => 0,
            };
            return NaiveTime::from_hms_opt(hour, minute, 0);
        }

        if let Some(caps) = HOURS_TIME.captures(&normalized) {
            return NaiveTime::from_hms_opt(caps[1].parse().ok()?, 0, 0);
        }

        if let Some(caps) = BARE_HOUR.captures(&normalized) {
            return NaiveTime::from_hms_opt(caps[1].parse().ok()?, 0, 0);
        }

        None
    }

    /// Date and time written together, in either order (`amanhã 14h`, `14h amanhã`).
    pub fn parse_combined(&self, text: &str) -> Option<(NaiveDate, NaiveTime)> {
        let normalized = normalize(text);

        let caps = DAY_THEN_TIME
            .captures(&normalized)
            .or_else(|| TIME_THEN_DAY.captures(&normalized))?;

        let date = self.parse_date(&caps["day"])?;
        let time = self.parse_time(&caps["time"])?;
        Some((date.date, time))
    }

    /// Combines separately extracted date and time fragments.
    ///
    /// The language service often puts the whole phrase into one field, so the
    /// joined text is tried as a combined expression first.
    pub fn parse_date_time(&self, date_text: &str, time_text: &str) -> Option<NaiveDateTime> {
        let joined = format!("{date_text} {time_text}");
        if let Some((date, time)) = self.parse_combined(&joined) {
            return Some(date.and_time(time));
        }

        let date = self.parse_date(date_text)?;
        let time = self.parse_time(time_text)?;
        Some(date.date.and_time(time))
    }
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn weekday_from_name(name: &str) -> Option<Weekday> {
    match name {
        "segunda" => Some(Weekday::Mon),
        "terça" | "terca" => Some(Weekday::Tue),
        "quarta" => Some(Weekday::Wed),
        "quinta" => Some(Weekday::Thu),
        "sexta" => Some(Weekday::Fri),
        "sábado" | "sabado" => Some(Weekday::Sat),
        "domingo" => Some(Weekday::Sun),
        _ => None,
    }
}

fn month_from_name(name: &str) -> Option<u32> {
    let name = if name == "marco" { "março" } else { name };
    MONTHS
        .iter()
        .position(|month| *month == name)
        .map(|index| index as u32 + 1)
}

/// Next occurrence strictly after `today`.
pub fn next_weekday(today: NaiveDate, weekday: Weekday) -> NaiveDate {
    let current = today.weekday().num_days_from_monday() as i64;
    let wanted = weekday.num_days_from_monday() as i64;
    let mut days = wanted - current;
    if days <= 0 {
        days += 7;
    }
    today + Duration::days(days)
}

pub fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Interprets a wall-clock time in the business timezone.
pub fn to_utc(local: NaiveDateTime, offset: FixedOffset) -> DateTime<Utc> {
    let shifted = local - Duration::seconds(offset.local_minus_utc() as i64);
    Utc.from_utc_datetime(&shifted)
}

pub fn to_local(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDateTime {
    instant.with_timezone(&offset).naive_local()
}

/// `terça-feira, 14 de outubro de 2025`
pub fn format_long_date(date: NaiveDate) -> String {
    format!(
        "{}, {} de {} de {}",
        WEEKDAYS[date.weekday().num_days_from_monday() as usize],
        date.day(),
        MONTHS[date.month0() as usize],
        date.year()
    )
}

pub fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}
