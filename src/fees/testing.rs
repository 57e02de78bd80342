use rusqlite::Connection;
use uuid::Uuid;

use super::enrollment::{get_enrollment, EnrollmentRef};
use super::month::Month;
use super::period::{RatePeriod, Scope};
use super::{ledger, store};

pub fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().expect("open memory db");
    crate::db::init_schema(&conn).expect("init schema");
    conn
}

pub fn m(s: &str) -> Month {
    Month::parse("month", s).expect("month")
}

pub fn seed_enrollment(
    conn: &Connection,
    student_type: &str,
    class_type: &str,
    section_fee: i64,
    class_fee: i64,
) -> EnrollmentRef {
    let class_id = Uuid::new_v4().to_string();
    let section_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, class_type, default_monthly_fee) VALUES(?, 'Class', ?, ?)",
        (&class_id, class_type, class_fee),
    )
    .expect("insert class");
    conn.execute(
        "INSERT INTO sections(id, class_id, name, monthly_fee) VALUES(?, ?, 'A', ?)",
        (&section_id, &class_id, section_fee),
    )
    .expect("insert section");
    enroll(conn, &class_id, &section_id, student_type)
}

pub fn enroll(conn: &Connection, class_id: &str, section_id: &str, student_type: &str) -> EnrollmentRef {
    let student_id = Uuid::new_v4().to_string();
    let enrollment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, last_name, first_name, active) VALUES(?, 'Singh', 'Test', 1)",
        [&student_id],
    )
    .expect("insert student");
    conn.execute(
        "INSERT INTO enrollments(id, student_id, class_id, section_id, student_type) VALUES(?, ?, ?, ?, ?)",
        (&enrollment_id, &student_id, class_id, section_id, student_type),
    )
    .expect("insert enrollment");
    get_enrollment(conn, &enrollment_id).expect("load enrollment")
}

// Bypasses lifecycle rules and the legacy sync.
pub fn add_period(conn: &Connection, scope: Scope, amount: i64, from: &str, to: Option<&str>) -> RatePeriod {
    let period = RatePeriod {
        id: Uuid::new_v4().to_string(),
        scope_type: scope.scope_type,
        scope_id: scope.scope_id,
        amount,
        effective_from: m(from),
        effective_to: to.map(m),
    };
    store::insert_period(conn, &period).expect("insert period");
    period
}

pub fn add_monthly_fee(conn: &Connection, enrollment_id: &str, month: &str, amount: i64) -> String {
    ledger::insert_monthly_fee(conn, enrollment_id, m(month), amount, None).expect("insert fee")
}

pub fn pay(conn: &Connection, fee_id: &str) -> String {
    ledger::record_payment(conn, fee_id, 1, "2024-01-01")
        .expect("record payment")
        .id
}

pub fn fee_amount(conn: &Connection, fee_id: &str) -> i64 {
    conn.query_row("SELECT amount FROM fees WHERE id = ?", [fee_id], |r| r.get(0))
        .expect("fee amount")
}
