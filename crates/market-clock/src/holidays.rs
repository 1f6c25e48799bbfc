use chrono::NaiveDate;

/// How a trading day's regular-session close is affected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayKind {
    Holiday,
    EarlyClose,
}

/// Static table of NYSE holidays and early-close days, keyed by
/// America/New_York calendar date. Covers 2025-2026; an out-of-range date is
/// treated as a normal weekday with a warning (Open Question #5) —
/// operators should refresh this table annually.
pub const HOLIDAY_TABLE: &[(&str, DayKind)] = &[
    ("2025-01-01", DayKind::Holiday), // New Year's Day
    ("2025-01-20", DayKind::Holiday), // MLK Day
    ("2025-02-17", DayKind::Holiday), // Presidents' Day
    ("2025-04-18", DayKind::Holiday), // Good Friday
    ("2025-05-26", DayKind::Holiday), // Memorial Day
    ("2025-06-19", DayKind::Holiday), // Juneteenth
    ("2025-07-03", DayKind::EarlyClose),
    ("2025-07-04", DayKind::Holiday), // Independence Day
    ("2025-09-01", DayKind::Holiday), // Labor Day
    ("2025-11-27", DayKind::Holiday), // Thanksgiving
    ("2025-11-28", DayKind::EarlyClose),
    ("2025-12-24", DayKind::EarlyClose),
    ("2025-12-25", DayKind::Holiday), // Christmas
    ("2026-01-01", DayKind::Holiday),
    ("2026-01-19", DayKind::Holiday), // MLK Day
    ("2026-02-16", DayKind::Holiday), // Presidents' Day
    ("2026-04-03", DayKind::Holiday), // Good Friday
    ("2026-05-25", DayKind::Holiday), // Memorial Day
    ("2026-06-19", DayKind::Holiday), // Juneteenth
    ("2026-07-03", DayKind::EarlyClose),
    ("2026-09-07", DayKind::Holiday), // Labor Day
    ("2026-11-26", DayKind::Holiday), // Thanksgiving
    ("2026-11-27", DayKind::EarlyClose),
    ("2026-12-24", DayKind::EarlyClose),
    ("2026-12-25", DayKind::Holiday),
];

pub fn last_known_date() -> NaiveDate {
    let (s, _) = HOLIDAY_TABLE.last().expect("table is non-empty");
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("table dates are well-formed")
}

pub fn lookup(date: NaiveDate) -> Option<DayKind> {
    let key = date.format("%Y-%m-%d").to_string();
    HOLIDAY_TABLE
        .iter()
        .find(|(d, _)| *d == key)
        .map(|(_, kind)| *kind)
}

pub fn is_stale(date: NaiveDate) -> bool {
    date > last_known_date()
}
