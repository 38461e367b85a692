//! Date pseudo-operators for search filters.
//!
//! Users write `after=2020-01-02`, `before=2020` or
//! `time="2020-01:2020-02"` inside an otherwise ordinary Meilisearch filter.
//! These are rewritten into comparisons over the numeric `date` field
//! (Unix seconds); everything else is passed through untouched.
//!
//! Dates are `YYYY`, `YYYY-MM` or `YYYY-MM-DD` and mean UTC midnight at the
//! start of that period. Anything unparsable resolves to the Unix epoch so a
//! typo narrows the range instead of failing the query.

use chrono::{DateTime, NaiveDate, Utc};
use regex::{NoExpand, Regex};
use std::sync::OnceLock;

static AFTER_REGEX: OnceLock<Regex> = OnceLock::new();
static BEFORE_REGEX: OnceLock<Regex> = OnceLock::new();
static RANGE_REGEX: OnceLock<Regex> = OnceLock::new();

fn after_regex() -> &'static Regex {
    AFTER_REGEX.get_or_init(|| Regex::new(r"after=([0-9-]+)").expect("Invalid after regex"))
}

fn before_regex() -> &'static Regex {
    BEFORE_REGEX.get_or_init(|| Regex::new(r"before=([0-9-]+)").expect("Invalid before regex"))
}

fn range_regex() -> &'static Regex {
    RANGE_REGEX
        .get_or_init(|| Regex::new(r#"time="([0-9-]+):([0-9-]+)""#).expect("Invalid range regex"))
}

/// A filter expression with its date operators resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateFilter {
    /// The rewritten expression, ready for the backend.
    pub query: String,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
}

impl DateFilter {
    pub fn parse(input: &str) -> Self {
        // A range wins over standalone operators anywhere in the expression.
        if let Some(caps) = range_regex().captures(input) {
            let after = parse_filter_date(&caps[1]);
            let before = parse_filter_date(&caps[2]);
            let replacement = format!(
                "date>{} AND date<{}",
                after.timestamp(),
                before.timestamp()
            );
            let query = range_regex()
                .replace_all(input, NoExpand(&replacement))
                .into_owned();
            return Self {
                query,
                after: Some(after),
                before: Some(before),
            };
        }

        let mut query = input.to_string();

        let after = after_regex()
            .captures(&query)
            .map(|caps| parse_filter_date(&caps[1]));
        if let Some(after) = after {
            let replacement = format!("date>{}", after.timestamp());
            query = after_regex()
                .replace_all(&query, NoExpand(&replacement))
                .into_owned();
        }

        let before = before_regex()
            .captures(&query)
            .map(|caps| parse_filter_date(&caps[1]));
        if let Some(before) = before {
            let replacement = format!("date<{}", before.timestamp());
            query = before_regex()
                .replace_all(&query, NoExpand(&replacement))
                .into_owned();
        }

        Self {
            query,
            after,
            before,
        }
    }
}

/// Rewrite date pseudo-operators into backend comparisons.
pub fn translate_filter(input: &str) -> String {
    DateFilter::parse(input).query
}

/// Equality clause on the `folder` attribute with the value quoted.
pub fn folder_filter(folder: &str) -> String {
    let escaped = folder.replace('\\', "\\\\").replace('"', "\\\"");
    format!("folder = \"{escaped}\"")
}

/// Join non-empty clauses with `AND`, parenthesizing each when there are several.
pub fn combine_filters<I, S>(clauses: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let clauses: Vec<String> = clauses
        .into_iter()
        .map(|clause| clause.as_ref().trim().to_string())
        .filter(|clause| !clause.is_empty())
        .collect();

    match clauses.len() {
        0 => None,
        1 => clauses.into_iter().next(),
        _ => Some(
            clauses
                .iter()
                .map(|clause| format!("({clause})"))
                .collect::<Vec<_>>()
                .join(" AND "),
        ),
    }
}

/// Parse `YYYY`, `YYYY-MM` or `YYYY-MM-DD`; anything else is the epoch.
pub fn parse_filter_date(raw: &str) -> DateTime<Utc> {
    parse_date_parts(raw).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn parse_date_parts(raw: &str) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = raw.split('-').collect();
    let widths: &[usize] = match parts.len() {
        1 => &[4],
        2 => &[4, 2],
        3 => &[4, 2, 2],
        _ => return None,
    };

    let mut values = [1u32; 3];
    for (index, (part, width)) in parts.iter().zip(widths).enumerate() {
        if part.len() != *width || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        values[index] = part.parse().ok()?;
    }

    let date = NaiveDate::from_ymd_opt(values[0] as i32, values[1], values[2])?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_after() {
        assert_eq!(translate_filter("after=2020-01-02"), "date>1577923200");
    }

    #[test]
    fn test_before() {
        assert_eq!(translate_filter("before=2020-01-02"), "date<1577923200");
    }

    #[test]
    fn test_before_and_after_coexist() {
        assert_eq!(
            translate_filter("before=2020-01-02 AND after=2020-02-02"),
            "date<1577923200 AND date>1580601600"
        );
    }

    #[test]
    fn test_time_range() {
        assert_eq!(
            translate_filter(r#"time="2020-01-02:2020-02-02""#),
            "date>1577923200 AND date<1580601600"
        );
    }

    #[test]
    fn test_time_range_leaves_standalone_operators() {
        let translated = translate_filter(r#"time="2020-01-02:2020-02-02" AND NOT after=2021"#);
        assert_eq!(
            translated,
            "date>1577923200 AND date<1580601600 AND NOT after=2021"
        );
    }

    #[test]
    fn test_year_and_month_forms() {
        assert_eq!(translate_filter("after=2020"), "date>1577836800");
        assert_eq!(translate_filter("after=2020-01"), "date>1577836800");
    }

    #[test]
    fn test_unparsable_date_is_epoch() {
        assert_eq!(translate_filter("after=20-1-2"), "date>0");
        assert_eq!(translate_filter("before=2020-13-01"), "date<0");
        assert_eq!(translate_filter("after=2020-01-02-03"), "date>0");
    }

    #[test]
    fn test_passthrough() {
        let input = r#"folder = "Inbox" AND NOT from = "spam""#;
        assert_eq!(translate_filter(input), input);
    }

    #[test]
    fn test_first_occurrence_wins() {
        assert_eq!(
            translate_filter("after=2020 OR after=2021"),
            "date>1577836800 OR date>1577836800"
        );
    }

    #[test]
    fn test_translation_is_idempotent() {
        for input in [
            "after=2020-01-02",
            "before=2020 AND after=2019-06",
            r#"time="2020-01-02:2020-02-02""#,
        ] {
            let once = translate_filter(input);
            assert_eq!(translate_filter(&once), once);
        }
    }

    #[test]
    fn test_folder_filter_quotes_value() {
        assert_eq!(folder_filter("Inbox/Work"), r#"folder = "Inbox/Work""#);
        assert_eq!(folder_filter(r#"a"b"#), r#"folder = "a\"b""#);
    }

    #[test]
    fn test_combine_filters() {
        assert_eq!(combine_filters(Vec::<String>::new()), None);
        assert_eq!(combine_filters(["", "  "]), None);
        assert_eq!(
            combine_filters(["date>0", ""]),
            Some("date>0".to_string())
        );
        assert_eq!(
            combine_filters(["date>0 OR date<5", r#"folder = "Inbox""#]),
            Some(r#"(date>0 OR date<5) AND (folder = "Inbox")"#.to_string())
        );
    }

    #[test]
    fn test_date_filter_exposes_bounds() {
        let filter = DateFilter::parse(r#"time="2020:2021""#);
        assert_eq!(filter.after.map(|d| d.timestamp()), Some(1577836800));
        assert_eq!(filter.before.map(|d| d.timestamp()), Some(1609459200));

        let filter = DateFilter::parse("subject = x");
        assert_eq!(filter.after, None);
        assert_eq!(filter.before, None);
    }
}
