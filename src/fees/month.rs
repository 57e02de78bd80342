use chrono::{Datelike, NaiveDate};
use serde::{Serialize, Serializer};
use std::fmt;

use super::error::FeeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    year: i32,
    month: u32,
}

impl Month {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if !(1..=12).contains(&month) || !(1..=9999).contains(&year) {
            return None;
        }
        Some(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Accepts `YYYY-MM` or `YYYY-MM-DD`.
    pub fn parse(field: &str, raw: &str) -> Result<Self, FeeError> {
        let t = raw.trim();
        let bad = || FeeError::validation(field, format!("{} must be YYYY-MM or YYYY-MM-DD", field));
        let mut parts = t.split('-');
        let (Some(y), Some(m)) = (parts.next(), parts.next()) else {
            return Err(bad());
        };
        if y.len() != 4 || m.len() != 2 {
            return Err(bad());
        }
        let year = y.parse::<i32>().map_err(|_| bad())?;
        let month = m.parse::<u32>().map_err(|_| bad())?;
        if let Some(d) = parts.next() {
            let day = d.parse::<u32>().map_err(|_| bad())?;
            if parts.next().is_some() || NaiveDate::from_ymd_opt(year, month, day).is_none() {
                return Err(bad());
            }
        }
        Self::new(year, month)
            .ok_or_else(|| FeeError::validation(field, format!("{} is out of range", field)))
    }

    pub fn from_sql(raw: &str) -> Option<Self> {
        Self::parse("value", raw).ok()
    }

    pub fn prev(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn key(self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }

    pub fn first_day(self) -> String {
        format!("{:04}-{:02}-01", self.year, self.month)
    }

    /// Oldest first, ending at `self`.
    pub fn trailing(self, count: u32) -> Vec<Month> {
        let mut out = Vec::with_capacity(count as usize);
        let mut m = self;
        for _ in 0..count {
            out.push(m);
            m = m.prev();
        }
        out.reverse();
        out
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl Serialize for Month {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthRange {
    pub from: Month,
    pub to: Option<Month>,
}

impl MonthRange {
    pub fn new(from: Month, to: Option<Month>) -> Result<Self, FeeError> {
        if let Some(to) = to {
            if to < from {
                return Err(FeeError::validation(
                    "effectiveTo",
                    "effective end month must not be before the start month",
                ));
            }
        }
        Ok(Self { from, to })
    }

    pub fn overlaps(&self, other: &MonthRange) -> bool {
        let starts_before_other_ends = other.to.map_or(true, |to| self.from <= to);
        let ends_after_other_starts = self.to.map_or(true, |to| to >= other.from);
        starts_before_other_ends && ends_after_other_starts
    }
}

impl fmt::Display for MonthRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to {
            Some(to) => write!(f, "{} to {}", self.from, to),
            None => write!(f, "{} onwards", self.from),
        }
    }
}
