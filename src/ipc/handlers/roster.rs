use crate::db::now_timestamp;
use crate::fees::enrollment::{get_enrollment, ClassType, StudentType};
use crate::fees::ledger::check_amount;
use crate::ipc::helpers::{
    get_optional_i64, get_optional_str, get_required_str, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value as SqlValue, Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

fn parse_fee(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    let fee = get_optional_i64(params, key)?.unwrap_or(0);
    check_amount(key, fee)?;
    Ok(fee)
}

fn classes_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let class_type = match get_optional_str(params, "classType")? {
        Some(raw) => ClassType::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params("classType must be gurmukhi or kirtan"))?,
        None => ClassType::Gurmukhi,
    };
    let fee = parse_fee(params, "defaultMonthlyFee")?;

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, class_type, default_monthly_fee) VALUES(?, ?, ?, ?)",
        (&class_id, &name, class_type.as_str(), fee),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "classes" })),
    })?;

    Ok(json!({
        "classId": class_id,
        "name": name,
        "classType": class_type.as_str(),
        "defaultMonthlyFee": fee
    }))
}

fn classes_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.class_type,
           c.default_monthly_fee,
           (SELECT COUNT(*) FROM sections s WHERE s.class_id = c.id) AS section_count,
           (SELECT COUNT(*) FROM enrollments e WHERE e.class_id = c.id) AS enrollment_count
         FROM classes c
         ORDER BY c.name",
    )?;
    let classes = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "classType": row.get::<_, String>(2)?,
                "defaultMonthlyFee": row.get::<_, i64>(3)?,
                "sectionCount": row.get::<_, i64>(4)?,
                "enrollmentCount": row.get::<_, i64>(5)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "classes": classes }))
}

fn sections_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let name = get_required_str(params, "name")?;
    let fee = parse_fee(params, "monthlyFee")?;

    let class_exists = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !class_exists {
        return Err(HandlerErr::new("not_found", "class not found"));
    }

    let section_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sections(id, class_id, name, monthly_fee) VALUES(?, ?, ?, ?)",
        (&section_id, &class_id, &name, fee),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "sections" })),
    })?;

    Ok(json!({
        "sectionId": section_id,
        "classId": class_id,
        "name": name,
        "monthlyFee": fee
    }))
}

fn sections_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, s.monthly_fee,
                (SELECT COUNT(*) FROM enrollments e WHERE e.section_id = s.id)
         FROM sections s
         WHERE s.class_id = ?
         ORDER BY s.name",
    )?;
    let sections = stmt
        .query_map([&class_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "monthlyFee": row.get::<_, i64>(2)?,
                "enrollmentCount": row.get::<_, i64>(3)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "sections": sections }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let last_name = get_required_str(params, "lastName")?;
    let first_name = get_required_str(params, "firstName")?;
    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, last_name, first_name, active, created_at) VALUES(?, ?, ?, 1, ?)",
        (&student_id, &last_name, &first_name, now_timestamp()),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;
    Ok(json!({
        "studentId": student_id,
        "displayName": format!("{}, {}", last_name, first_name)
    }))
}

fn enrollments_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let section_id = get_required_str(params, "sectionId")?;
    let student_type = match get_optional_str(params, "studentType")? {
        Some(raw) => StudentType::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params("studentType must be paid or free"))?,
        None => StudentType::Paid,
    };
    let monthly_fee = get_optional_i64(params, "monthlyFee")?;
    if let Some(fee) = monthly_fee {
        check_amount("monthlyFee", fee)?;
    }

    let student_exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !student_exists {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    let class_id: Option<String> = conn
        .query_row(
            "SELECT class_id FROM sections WHERE id = ?",
            [&section_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(class_id) = class_id else {
        return Err(HandlerErr::new("not_found", "section not found"));
    };

    let enrollment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO enrollments(id, student_id, class_id, section_id, student_type, monthly_fee, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &enrollment_id,
            &student_id,
            &class_id,
            &section_id,
            student_type.as_str(),
            monthly_fee,
            now_timestamp(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "enrollments" })),
    })?;

    let enrollment = get_enrollment(conn, &enrollment_id)?;
    Ok(json!({
        "enrollmentId": enrollment.id,
        "classId": enrollment.class_id,
        "sectionId": enrollment.section_id,
        "studentType": enrollment.student_type.as_str(),
        "classType": enrollment.class_type.as_str()
    }))
}

fn enrollments_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<SqlValue> = Vec::new();
    if let Some(class_id) = get_optional_str(params, "classId")? {
        clauses.push("e.class_id = ?");
        binds.push(SqlValue::Text(class_id));
    }
    if let Some(section_id) = get_optional_str(params, "sectionId")? {
        clauses.push("e.section_id = ?");
        binds.push(SqlValue::Text(section_id));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT e.id, e.student_id, st.last_name, st.first_name, e.class_id, e.section_id,
                e.student_type, e.monthly_fee
         FROM enrollments e
         JOIN students st ON st.id = e.student_id
         {where_sql}
         ORDER BY st.last_name, st.first_name, e.id"
    ))?;
    let rows = stmt
        .query_map(params_from_iter(binds), |row| {
            let last: String = row.get(2)?;
            let first: String = row.get(3)?;
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "studentId": row.get::<_, String>(1)?,
                "displayName": format!("{}, {}", last, first),
                "classId": row.get::<_, String>(4)?,
                "sectionId": row.get::<_, String>(5)?,
                "studentType": row.get::<_, String>(6)?,
                "monthlyFee": row.get::<_, Option<i64>>(7)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "enrollments": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "classes.create" => classes_create,
        "classes.list" => classes_list,
        "sections.create" => sections_create,
        "sections.list" => sections_list,
        "students.create" => students_create,
        "enrollments.create" => enrollments_create,
        "enrollments.list" => enrollments_list,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
