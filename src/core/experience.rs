use chrono::{Datelike, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::models::ResumeProfile;

const DURATION_KEYS: [&str; 6] = ["Duration", "duration", "Period", "period", "Time", "time"];
const ONGOING: [&str; 4] = ["present", "current", "now", "till date"];
const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1900..=2100;
/// Anything longer than a working life is noise from the model.
const MAX_ENTRY_MONTHS: u32 = 100 * 12;

static RANGE_SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+(?:-|–|—|to)\s+|\s*[–—]\s*").unwrap());
static YEARS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:years?|yrs?)").unwrap());
static MONTHS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d+)\s*(?:months?|mos?)").unwrap());

/// Replaces whatever `TotalExperience` the service returned with a value summed
/// from the `Experience` entries. Profiles without entries are left alone.
pub fn apply_total_experience(profile: &mut ResumeProfile) {
    let entries = profile.experience();
    if entries.is_empty() {
        return;
    }
    let total = total_months(entries, today());
    profile.set_str("TotalExperience", format_months(total));
}

pub fn total_months(entries: &[Value], today: (i32, u32)) -> u32 {
    entries
        .iter()
        .filter_map(|entry| {
            DURATION_KEYS
                .iter()
                .find_map(|key| entry.get(*key).and_then(Value::as_str))
        })
        .map(|duration| months_in_duration(duration, today))
        .fold(0u32, u32::saturating_add)
}

pub fn format_months(total: u32) -> String {
    let (years, months) = (total / 12, total % 12);
    match (years, months) {
        (0, m) => format!("{m} months"),
        (y, 0) => format!("{y} years"),
        (y, m) => format!("{y} years {m} months"),
    }
}

fn months_in_duration(duration: &str, today: (i32, u32)) -> u32 {
    let duration = duration.trim();

    if let Some((start, end)) = split_range(duration) {
        let Some(start) = parse_month(&start, false) else {
            return 0;
        };
        let end = if ONGOING.contains(&end.to_ascii_lowercase().trim()) {
            today
        } else {
            match parse_month(&end, true) {
                Some(end) => end,
                None => return 0,
            }
        };
        // Both ends sit inside YEAR_RANGE, so this cannot overflow.
        let months = (end.0 - start.0) * 12 + end.1 as i32 - start.1 as i32;
        return (months.max(0) as u32).min(MAX_ENTRY_MONTHS);
    }

    let years = YEARS_RE
        .captures(duration)
        .and_then(|c| c[1].parse::<f64>().ok())
        .filter(|y| y.is_finite())
        .map(|y| (y * 12.0) as u32)
        .unwrap_or(0);
    let months = MONTHS_RE
        .captures(duration)
        .and_then(|c| c[1].parse::<u32>().ok())
        .unwrap_or(0);
    years.saturating_add(months).min(MAX_ENTRY_MONTHS)
}

fn split_range(duration: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = RANGE_SPLIT_RE.splitn(duration, 2).collect();
    if let [start, end] = parts.as_slice() {
        return Some((start.trim().to_string(), end.trim().to_string()));
    }

    // "2019-05-2021-03" style ranges without spaces.
    let dashed: Vec<&str> = duration.split('-').map(str::trim).collect();
    match dashed.as_slice() {
        [start, end] if !start.is_empty() && !end.is_empty() && !is_year_month(duration) => {
            Some((start.to_string(), end.to_string()))
        }
        [sy, sm, ey, em] => Some((format!("{sy}-{sm}"), format!("{ey}-{em}"))),
        [sy, sm, end] if !is_year_month(end) => Some((format!("{sy}-{sm}"), end.to_string())),
        _ => None,
    }
}

fn is_year_month(value: &str) -> bool {
    let parts: Vec<&str> = value.split('-').collect();
    matches!(parts.as_slice(), [y, m] if y.len() == 4 && y.chars().all(|c| c.is_ascii_digit()) && !m.is_empty() && m.len() <= 2 && m.chars().all(|c| c.is_ascii_digit()))
}

/// Accepts "2024-09", "09/2024", "Sep 2024", "September 2024" and bare "2024".
/// A bare year means January at a range start and December at a range end.
fn parse_month(value: &str, is_end: bool) -> Option<(i32, u32)> {
    let value = value.trim().trim_end_matches('.');

    if let Some((a, b)) = value.split_once(['-', '/']) {
        let (a, b) = (a.trim(), b.trim());
        let (year, month) = if a.len() == 4 { (a, b) } else { (b, a) };
        let year = year.parse::<i32>().ok().filter(|y| YEAR_RANGE.contains(y))?;
        let month = month.parse::<u32>().ok()?;
        return (1..=12).contains(&month).then_some((year, month));
    }

    let mut words = value.split_whitespace();
    let first = words.next()?;
    match words.next() {
        Some(year) => {
            let month = month_from_name(first)?;
            let year = year
                .trim_matches(|c: char| !c.is_ascii_digit())
                .parse::<i32>()
                .ok()
                .filter(|y| YEAR_RANGE.contains(y))?;
            Some((year, month))
        }
        None => {
            let year = first.parse::<i32>().ok().filter(|y| YEAR_RANGE.contains(y))?;
            Some((year, if is_end { 12 } else { 1 }))
        }
    }
}

fn month_from_name(name: &str) -> Option<u32> {
    let lower = name.trim_end_matches([',', '.', '\'']).to_ascii_lowercase();
    if lower.len() < 3 {
        return None;
    }
    (1..=12u32).find(|m| {
        NaiveDate::from_ymd_opt(2000, *m, 1)
            .map(|d| d.format("%B").to_string().to_ascii_lowercase().starts_with(&lower))
            .unwrap_or(false)
    })
}

fn today() -> (i32, u32) {
    let now = Utc::now().date_naive();
    (now.year(), now.month())
}
