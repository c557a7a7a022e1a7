//! Normalization of the dates printed next to search results.
//!
//! The result pages are served in Portuguese and show either an absolute
//! date (`12 de mar de 2015`) or a relative one (`3 dias atrás`). Both are
//! turned into `YYYY-MM-DD`; anything else becomes the empty string, which
//! the rest of the crate treats as "unknown date".

use chrono::{Duration, NaiveDate};

/// Month abbreviations as they appear on the result pages, January first.
pub const MONTHS: [&str; 12] = [
    "jan", "fev", "mar", "abr", "mai", "jun", "jul", "ago", "set", "out", "nov", "dez",
];

/// Sentinel for a source whose publication date is unknown.
pub const UNKNOWN_DATE: &str = "";

/// Convert a raw result date into an ISO-8601 date string.
///
/// `today` anchors relative dates; callers pass `Local::now().date_naive()`
/// in production and a fixed date in tests.
///
/// # Examples
///
/// ```ignore
/// let today = NaiveDate::from_ymd_opt(2020, 1, 10).unwrap();
/// assert_eq!(normalize("1 de jan de 2020", today), "2020-01-01");
/// assert_eq!(normalize("2 dias atrás", today), "2020-01-08");
/// assert_eq!(normalize("ontem", today), "");
/// ```
pub fn normalize(raw: &str, today: NaiveDate) -> String {
    let pieces: Vec<&str> = raw.split_whitespace().collect();

    let parsed = match pieces.as_slice() {
        [day, _, month, _, year] => absolute(day, month, year),
        [offset, _, _] => relative(offset, today),
        _ => None,
    };

    parsed
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| UNKNOWN_DATE.to_string())
}

fn absolute(day: &str, month: &str, year: &str) -> Option<NaiveDate> {
    let month = month.trim_end_matches('.').to_lowercase();
    let month = MONTHS.iter().position(|m| *m == month)? as u32 + 1;
    let day: u32 = day.parse().ok()?;
    let year: i32 = year.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn relative(offset: &str, today: NaiveDate) -> Option<NaiveDate> {
    let offset: i64 = offset.parse().ok()?;
    today.checked_sub_signed(Duration::try_days(offset)?)
}
