//! Durations with an explicit infinite value, and wall-clock timestamps.

use std::fmt;
use std::time::SystemTime;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::error::{Error, ErrorCode, Result};

/// Default for [`Timestamp::format`] and [`Timestamp::parse`].
pub const DEFAULT_TIME_FORMAT: &str = "%FT%T.%3Z";
/// Default for [`Duration::format`].
pub const DEFAULT_DURATION_FORMAT: &str = "%-%dd %T.%3%6%9";
/// Default for infinite durations in [`Duration::format`].
pub const DEFAULT_INFINITE_DURATION_STRING: &str = "%-inf";

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// A time span that may be infinite. Infinite compares greater than any
/// finite duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Duration {
    Finite(std::time::Duration),
    Infinite,
}

impl Duration {
    pub const ZERO: Duration = Duration::Finite(std::time::Duration::ZERO);
    pub const INFINITE: Duration = Duration::Infinite;
    /// Smallest finite interval or timeout a branch works with.
    pub const MIN_PERIOD: std::time::Duration = std::time::Duration::from_millis(1);

    pub fn from_secs(secs: u64) -> Self {
        Duration::Finite(std::time::Duration::from_secs(secs))
    }

    pub fn from_millis(ms: u64) -> Self {
        Duration::Finite(std::time::Duration::from_millis(ms))
    }

    /// Nanoseconds as used at API boundaries. Negative values are rejected.
    pub fn from_nanos(ns: i64) -> Result<Self> {
        if ns < 0 {
            return Err(Error::with_details(
                ErrorCode::InvalidParam,
                "duration must not be negative",
            ));
        }
        Ok(Duration::Finite(std::time::Duration::from_nanos(ns as u64)))
    }

    /// Seconds as stored in JSON documents: any negative number is infinite.
    pub fn from_json_secs(secs: f64) -> Result<Self> {
        if secs.is_nan() {
            return Err(Error::with_details(
                ErrorCode::InvalidParam,
                "duration must be a number",
            ));
        }
        if secs < 0.0 || secs.is_infinite() {
            return Ok(Duration::Infinite);
        }
        std::time::Duration::try_from_secs_f64(secs)
            .map(Duration::Finite)
            .map_err(|e| {
                Error::with_details(ErrorCode::InvalidParam, format!("duration {}s: {}", secs, e))
            })
    }

    /// Seconds for JSON documents; infinite is written as -1.
    pub fn to_json_secs(self) -> f64 {
        match self {
            Duration::Finite(d) => d.as_secs_f64(),
            Duration::Infinite => -1.0,
        }
    }

    pub fn is_infinite(self) -> bool {
        matches!(self, Duration::Infinite)
    }

    pub fn as_std(self) -> Option<std::time::Duration> {
        match self {
            Duration::Finite(d) => Some(d),
            Duration::Infinite => None,
        }
    }

    /// Half of the duration; infinite stays infinite.
    pub fn halved(self) -> Self {
        match self {
            Duration::Finite(d) => Duration::Finite(d / 2),
            Duration::Infinite => Duration::Infinite,
        }
    }

    /// True for finite durations shorter than [`Duration::MIN_PERIOD`].
    pub fn is_below_min_period(self) -> bool {
        matches!(self, Duration::Finite(d) if d < Self::MIN_PERIOD)
    }

    /// Format with the placeholders `%d` (days), `%D` (days, empty when
    /// zero), `%H`, `%M`, `%S`, `%T` (`%H:%M:%S`), `%3`/`%6`/`%9`
    /// (milli/micro/nanosecond digits) and the sign placeholders `%-` and
    /// `%+`. `inf` replaces the whole output for infinite durations.
    pub fn format(self, fmt: Option<&str>, inf: Option<&str>) -> String {
        self.format_signed(false, fmt, inf)
    }

    /// [`Duration::format`] for a duration with an explicit sign.
    pub fn format_signed(self, negative: bool, fmt: Option<&str>, inf: Option<&str>) -> String {
        let signed = |s: &str| {
            s.replace("%-", if negative { "-" } else { "" })
                .replace("%+", if negative { "-" } else { "+" })
        };
        let d = match self {
            Duration::Infinite => return signed(inf.unwrap_or(DEFAULT_INFINITE_DURATION_STRING)),
            Duration::Finite(d) => d,
        };
        let ns = d.as_nanos();
        let secs = ns / NANOS_PER_SEC;
        let days = (secs / 86_400).to_string();
        let days_or_empty = if secs >= 86_400 { days.as_str() } else { "" };
        signed(fmt.unwrap_or(DEFAULT_DURATION_FORMAT))
            .replace("%d", &days)
            .replace("%D", days_or_empty)
            .replace("%T", "%H:%M:%S")
            .replace("%H", &format!("{:02}", (secs / 3600) % 24))
            .replace("%M", &format!("{:02}", (secs / 60) % 60))
            .replace("%S", &format!("{:02}", secs % 60))
            .replace("%3", &format!("{:03}", (ns / 1_000_000) % 1000))
            .replace("%6", &format!("{:03}", (ns / 1000) % 1000))
            .replace("%9", &format!("{:03}", ns % 1000))
    }
}

impl From<std::time::Duration> for Duration {
    fn from(d: std::time::Duration) -> Self {
        Duration::Finite(d)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Duration::Finite(d) => write!(f, "{:.3}s", d.as_secs_f64()),
            Duration::Infinite => f.write_str("inf"),
        }
    }
}

/// Wall-clock point in time, nanoseconds since the Unix epoch (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn now() -> Self {
        let ns = match SystemTime::now().duration_since(SystemTime::UNIX_EPOCH) {
            Ok(d) => d.as_nanos() as i64,
            Err(e) => -(e.duration().as_nanos() as i64),
        };
        Timestamp(ns)
    }

    pub fn from_nanos_since_epoch(ns: i64) -> Self {
        Timestamp(ns)
    }

    pub fn nanos_since_epoch(self) -> i64 {
        self.0
    }

    /// ISO-8601 with millisecond precision, e.g. `2018-04-23T18:25:43.511Z`.
    pub fn to_iso8601(self) -> String {
        DateTime::<Utc>::from_timestamp_nanos(self.0).to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Parses the format produced by [`Timestamp::to_iso8601`].
    pub fn parse_iso8601(s: &str) -> Result<Self> {
        Self::parse(s, None)
    }

    /// Format in UTC. Supports `%Y %m %d %F %H %M %S %T` plus `%3`, `%6`
    /// and `%9` for the milli, micro and nanosecond digits. Defaults to
    /// [`DEFAULT_TIME_FORMAT`].
    pub fn format(self, fmt: Option<&str>) -> Result<String> {
        use std::fmt::Write;
        let fmt = fmt.unwrap_or(DEFAULT_TIME_FORMAT);
        let frac = self.0.rem_euclid(1_000_000_000);
        let mut chrono_fmt = String::with_capacity(fmt.len());
        for token in time_tokens(fmt)? {
            match token {
                TimeToken::Literal(c) => chrono_fmt.push(c),
                TimeToken::Field(c @ ('3' | '6' | '9')) => {
                    let digits = match c {
                        '3' => frac / 1_000_000,
                        '6' => frac / 1000 % 1000,
                        _ => frac % 1000,
                    };
                    let _ = write!(chrono_fmt, "{:03}", digits);
                }
                TimeToken::Field(c) => {
                    chrono_fmt.push('%');
                    chrono_fmt.push(c);
                }
            }
        }
        let dt = DateTime::<Utc>::from_timestamp_nanos(self.0);
        let mut out = String::new();
        write!(out, "{}", dt.format(&chrono_fmt))
            .map_err(|_| Error::with_details(ErrorCode::InvalidTimeFormat, fmt.to_string()))?;
        Ok(out)
    }

    /// Parse a UTC time written with the placeholders of
    /// [`Timestamp::format`]. `%6` must follow `%3`, and `%9` must follow `%6`.
    pub fn parse(s: &str, fmt: Option<&str>) -> Result<Self> {
        let fmt = fmt.unwrap_or(DEFAULT_TIME_FORMAT);
        let tokens = time_tokens(fmt)?;
        let mut chrono_fmt = String::with_capacity(fmt.len());
        let mut i = 0;
        while i < tokens.len() {
            match tokens[i] {
                TimeToken::Literal(c) => chrono_fmt.push(c),
                TimeToken::Field('3') => {
                    let mut digits = 3;
                    while digits < 9 && tokens.get(i + 1) == Some(&TimeToken::Field(sub_field(digits))) {
                        digits += 3;
                        i += 1;
                    }
                    chrono_fmt.push_str(&format!("%{}f", digits));
                }
                TimeToken::Field(c @ ('6' | '9')) => {
                    return Err(Error::with_details(
                        ErrorCode::InvalidTimeFormat,
                        format!("%{} in \"{}\" does not follow a coarser fraction", c, fmt),
                    ))
                }
                TimeToken::Field(c) => {
                    chrono_fmt.push('%');
                    chrono_fmt.push(c);
                }
            }
            i += 1;
        }
        let naive = NaiveDateTime::parse_from_str(s, &chrono_fmt).map_err(|e| {
            Error::with_details(ErrorCode::ParsingTimeFailed, format!("\"{}\": {}", s, e))
        })?;
        naive
            .and_utc()
            .timestamp_nanos_opt()
            .map(Timestamp)
            .ok_or_else(|| Error::with_details(ErrorCode::ParsingTimeFailed, "out of range"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeToken {
    Literal(char),
    Field(char),
}

fn sub_field(digits: usize) -> char {
    if digits == 3 {
        '6'
    } else {
        '9'
    }
}

/// Split a time format into literals and `%` fields, rejecting unknown
/// fields and empty formats.
fn time_tokens(fmt: &str) -> Result<Vec<TimeToken>> {
    let invalid = || Error::with_details(ErrorCode::InvalidTimeFormat, fmt.to_string());
    if fmt.is_empty() {
        return Err(invalid());
    }
    let mut tokens = Vec::with_capacity(fmt.len());
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            tokens.push(TimeToken::Literal(c));
            continue;
        }
        match chars.next() {
            Some(f @ ('Y' | 'm' | 'd' | 'F' | 'H' | 'M' | 'S' | 'T' | '3' | '6' | '9')) => {
                tokens.push(TimeToken::Field(f))
            }
            _ => return Err(invalid()),
        }
    }
    Ok(tokens)
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}
