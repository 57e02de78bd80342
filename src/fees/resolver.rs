use rusqlite::Connection;
use serde::Serialize;

use super::enrollment::{EnrollmentRef, StudentType};
use super::error::FeeResult;
use super::month::Month;
use super::period::{RatePeriod, Scope};
use super::store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Free,
    SectionPeriod,
    ClassPeriod,
    LegacySection,
    LegacyClass,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub amount: i64,
    pub source: ResolutionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_id: Option<String>,
}

impl Resolution {
    fn new(amount: i64, source: ResolutionSource) -> Self {
        Self {
            amount,
            source,
            period_id: None,
        }
    }

    fn from_period(period: &RatePeriod, source: ResolutionSource) -> Self {
        Self {
            amount: period.amount,
            source,
            period_id: Some(period.id.clone()),
        }
    }
}

pub fn resolve_for_month(
    conn: &Connection,
    enrollment: &EnrollmentRef,
    month: Month,
) -> FeeResult<Resolution> {
    if enrollment.student_type == StudentType::Free {
        return Ok(Resolution::new(0, ResolutionSource::Free));
    }

    let section = Scope::section(enrollment.section_id.clone());
    if let Some(p) = store::active_period_at(conn, &section, month)? {
        if p.amount > 0 {
            return Ok(Resolution::from_period(&p, ResolutionSource::SectionPeriod));
        }
    }

    let class = Scope::class(enrollment.class_id.clone());
    if let Some(p) = store::active_period_at(conn, &class, month)? {
        if p.amount > 0 {
            return Ok(Resolution::from_period(&p, ResolutionSource::ClassPeriod));
        }
    }

    Ok(resolve_legacy(enrollment))
}

fn resolve_legacy(enrollment: &EnrollmentRef) -> Resolution {
    if enrollment.legacy_section_fee > 0 {
        return Resolution::new(enrollment.legacy_section_fee, ResolutionSource::LegacySection);
    }
    if enrollment.legacy_class_fee > 0 {
        return Resolution::new(enrollment.legacy_class_fee, ResolutionSource::LegacyClass);
    }
    Resolution::new(0, ResolutionSource::None)
}

pub fn resolve_amount(conn: &Connection, enrollment: &EnrollmentRef, month: Month) -> FeeResult<i64> {
    Ok(resolve_for_month(conn, enrollment, month)?.amount.max(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::enrollment::get_enrollment;
    use crate::fees::testing::{add_period, seed_enrollment, test_conn};

    fn m(s: &str) -> Month {
        Month::parse("month", s).expect("month")
    }

    #[test]
    fn section_period_beats_class_period() {
        let conn = test_conn();
        let e = seed_enrollment(&conn, "paid", "gurmukhi", 0, 0);
        add_period(&conn, Scope::class(e.class_id.clone()), 400, "2024-01", None);
        add_period(&conn, Scope::section(e.section_id.clone()), 650, "2024-01", None);

        let r = resolve_for_month(&conn, &e, m("2024-05")).expect("resolve");
        assert_eq!(r.amount, 650);
        assert_eq!(r.source, ResolutionSource::SectionPeriod);
    }

    #[test]
    fn class_period_applies_outside_section_range() {
        let conn = test_conn();
        let e = seed_enrollment(&conn, "paid", "gurmukhi", 0, 0);
        add_period(&conn, Scope::class(e.class_id.clone()), 400, "2024-01", None);
        add_period(&conn, Scope::section(e.section_id.clone()), 650, "2024-06", Some("2024-08"));

        assert_eq!(resolve_amount(&conn, &e, m("2024-05")).expect("may"), 400);
        assert_eq!(resolve_amount(&conn, &e, m("2024-07")).expect("jul"), 650);
        assert_eq!(resolve_amount(&conn, &e, m("2024-09")).expect("sep"), 400);
    }

    #[test]
    fn free_student_always_resolves_zero() {
        let conn = test_conn();
        let e = seed_enrollment(&conn, "free", "gurmukhi", 300, 200);
        add_period(&conn, Scope::section(e.section_id.clone()), 650, "2024-01", None);

        let r = resolve_for_month(&conn, &e, m("2024-05")).expect("resolve");
        assert_eq!(r.amount, 0);
        assert_eq!(r.source, ResolutionSource::Free);
    }

    #[test]
    fn legacy_columns_fill_in_when_no_period_covers_month() {
        let conn = test_conn();
        let e = seed_enrollment(&conn, "paid", "gurmukhi", 300, 200);
        add_period(&conn, Scope::class(e.class_id.clone()), 900, "2025-01", None);

        let r = resolve_for_month(&conn, &e, m("2024-05")).expect("resolve");
        assert_eq!(r.amount, 300);
        assert_eq!(r.source, ResolutionSource::LegacySection);

        conn.execute("UPDATE sections SET monthly_fee = 0", []).expect("clear");
        let e = get_enrollment(&conn, &e.id).expect("reload");
        let r = resolve_for_month(&conn, &e, m("2024-05")).expect("resolve");
        assert_eq!(r.source, ResolutionSource::LegacyClass);
        assert_eq!(r.amount, 200);

        conn.execute("UPDATE classes SET default_monthly_fee = 0", []).expect("clear");
        let e = get_enrollment(&conn, &e.id).expect("reload");
        let r = resolve_for_month(&conn, &e, m("2024-05")).expect("resolve");
        assert_eq!(r, Resolution::new(0, ResolutionSource::None));
    }

    #[test]
    fn zero_amount_section_period_falls_through() {
        let conn = test_conn();
        let e = seed_enrollment(&conn, "paid", "gurmukhi", 0, 0);
        add_period(&conn, Scope::section(e.section_id.clone()), 0, "2024-01", None);
        add_period(&conn, Scope::class(e.class_id.clone()), 450, "2024-01", None);

        let r = resolve_for_month(&conn, &e, m("2024-03")).expect("resolve");
        assert_eq!(r.source, ResolutionSource::ClassPeriod);
        assert_eq!(r.amount, 450);
    }
}
