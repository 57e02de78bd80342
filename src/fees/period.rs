use serde::Serialize;
use std::fmt;

use super::error::{FeeError, FeeResult};
use super::month::{Month, MonthRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    Class,
    Section,
}

impl ScopeType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "class" => Some(Self::Class),
            "section" => Some(Self::Section),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Section => "section",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub scope_type: ScopeType,
    pub scope_id: String,
}

impl Scope {
    pub fn new(scope_type: ScopeType, scope_id: impl Into<String>) -> Self {
        Self {
            scope_type,
            scope_id: scope_id.into(),
        }
    }

    pub fn class(id: impl Into<String>) -> Self {
        Self::new(ScopeType::Class, id)
    }

    pub fn section(id: impl Into<String>) -> Self {
        Self::new(ScopeType::Section, id)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope_type.as_str(), self.scope_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatePeriod {
    pub id: String,
    pub scope_type: ScopeType,
    pub scope_id: String,
    pub amount: i64,
    pub effective_from: Month,
    pub effective_to: Option<Month>,
}

impl RatePeriod {
    pub fn range(&self) -> MonthRange {
        MonthRange {
            from: self.effective_from,
            to: self.effective_to,
        }
    }

    pub fn scope(&self) -> Scope {
        Scope::new(self.scope_type, self.scope_id.clone())
    }

    pub fn is_open(&self) -> bool {
        self.effective_to.is_none()
    }
}

/// Sorted by start; no overlapping ranges and at most one open period.
#[derive(Debug, Clone)]
pub struct Timeline {
    scope: Scope,
    periods: Vec<RatePeriod>,
}

impl Timeline {
    pub fn try_new(scope: Scope, mut periods: Vec<RatePeriod>) -> FeeResult<Self> {
        periods.sort_by_key(|p| p.effective_from);
        let faults = inspect(&periods);
        if faults.open_period_ids.len() > 1 {
            return Err(FeeError::AmbiguousState(format!(
                "{} open-ended fee periods exist for this class/section; resolve the overlap manually or run feePeriods.repair",
                faults.open_period_ids.len()
            )));
        }
        if let Some((a, _)) = faults.overlapping_pairs.first() {
            return Err(FeeError::AmbiguousState(format!(
                "stored fee periods already overlap (period {}); resolve the overlap manually",
                a
            )));
        }
        Ok(Self { scope, periods })
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn open_period(&self) -> Option<&RatePeriod> {
        self.periods.iter().find(|p| p.is_open())
    }

    pub fn check_overlap(&self, candidate: &MonthRange, exclude_id: Option<&str>) -> FeeResult<()> {
        let conflict = self
            .periods
            .iter()
            .filter(|p| Some(p.id.as_str()) != exclude_id)
            .find(|p| p.range().overlaps(candidate));
        match conflict {
            Some(p) => Err(FeeError::Overlap {
                conflicting: p.range(),
                period_id: p.id.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn admit(&mut self, period: RatePeriod) -> FeeResult<()> {
        self.check_overlap(&period.range(), Some(&period.id))?;
        self.periods.retain(|p| p.id != period.id);
        self.periods.push(period);
        self.periods.sort_by_key(|p| p.effective_from);
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineFaults {
    pub open_period_ids: Vec<String>,
    pub overlapping_pairs: Vec<(String, String)>,
}

impl TimelineFaults {
    pub fn is_clean(&self) -> bool {
        self.open_period_ids.len() <= 1 && self.overlapping_pairs.is_empty()
    }
}

pub fn inspect(periods: &[RatePeriod]) -> TimelineFaults {
    let mut faults = TimelineFaults::default();
    for p in periods.iter().filter(|p| p.is_open()) {
        faults.open_period_ids.push(p.id.clone());
    }
    for (i, a) in periods.iter().enumerate() {
        for b in &periods[i + 1..] {
            if a.range().overlaps(&b.range()) {
                faults.overlapping_pairs.push((a.id.clone(), b.id.clone()));
            }
        }
    }
    faults
}
