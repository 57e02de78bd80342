use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use super::error::{FeeError, FeeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentType {
    Paid,
    Free,
}

impl StudentType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paid" => Some(Self::Paid),
            "free" => Some(Self::Free),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::Free => "free",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassType {
    Gurmukhi,
    Kirtan,
}

impl ClassType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gurmukhi" => Some(Self::Gurmukhi),
            "kirtan" => Some(Self::Kirtan),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gurmukhi => "gurmukhi",
            Self::Kirtan => "kirtan",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentRef {
    pub id: String,
    pub student_type: StudentType,
    pub class_id: String,
    pub section_id: String,
    pub class_type: ClassType,
    pub legacy_section_fee: i64,
    pub legacy_class_fee: i64,
}

pub const ENROLLMENT_SELECT: &str = "SELECT e.id, e.student_type, e.class_id, e.section_id,
            c.class_type, s.monthly_fee, c.default_monthly_fee
     FROM enrollments e
     JOIN classes c ON c.id = e.class_id
     JOIN sections s ON s.id = e.section_id";

pub fn enrollment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EnrollmentRef> {
    let student_type: String = row.get(1)?;
    let class_type: String = row.get(4)?;
    Ok(EnrollmentRef {
        id: row.get(0)?,
        // Unknown values are treated as the billable defaults.
        student_type: StudentType::parse(&student_type).unwrap_or(StudentType::Paid),
        class_id: row.get(2)?,
        section_id: row.get(3)?,
        class_type: ClassType::parse(&class_type).unwrap_or(ClassType::Gurmukhi),
        legacy_section_fee: row.get(5)?,
        legacy_class_fee: row.get(6)?,
    })
}

pub fn get_enrollment(conn: &Connection, enrollment_id: &str) -> FeeResult<EnrollmentRef> {
    conn.query_row(
        &format!("{ENROLLMENT_SELECT} WHERE e.id = ?"),
        [enrollment_id],
        enrollment_from_row,
    )
    .optional()?
    .ok_or(FeeError::NotFound("enrollment"))
}
