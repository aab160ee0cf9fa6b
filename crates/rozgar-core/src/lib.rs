//! Core domain model for Rozgar Darpan: statistics records, explanations,
//! and the normalization applied to raw statistics-source payloads.

mod language;
mod normalize;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use language::{canonical_language, DEFAULT_LANGUAGE};
pub use normalize::{normalize_record, to_number, NormalizeError};

pub const CRATE_NAME: &str = "rozgar-core";

/// Remarks value stored when the source leaves the field empty.
pub const DEFAULT_REMARKS: &str = "NA";

/// One record exactly as the statistics source returned it.
///
/// Field values are a mix of strings, numbers and nulls; nothing is typed
/// until the record passes through [`normalize_record`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(pub Map<String, Value>);

impl RawRecord {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Trimmed text for a field; numbers are rendered, blanks are `None`.
    pub fn text(&self, name: &str) -> Option<String> {
        match self.0.get(name)? {
            Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn month(&self) -> Option<String> {
        self.text("month")
    }
}

impl From<Value> for RawRecord {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}

macro_rules! stat_metrics {
    ($($field:ident => $wire:literal),+ $(,)?) => {
        /// Numeric indicators of one monthly statistics record.
        ///
        /// Serialized with the statistics source's field names so the UI can
        /// consume stored and freshly fetched records alike.
        #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
        pub struct StatMetrics {
            $(
                #[serde(rename = $wire, default)]
                pub $field: f64,
            )+
        }

        impl StatMetrics {
            pub const WIRE_NAMES: &'static [&'static str] = &[$($wire),+];

            pub fn from_raw(raw: &RawRecord) -> Self {
                Self {
                    $($field: to_number(raw.get($wire)),)+
                }
            }

            pub fn values(&self) -> Vec<(&'static str, f64)> {
                vec![$(($wire, self.$field)),+]
            }
        }
    };
}

stat_metrics! {
    approved_labour_budget => "Approved_Labour_Budget",
    average_wage_rate_per_day_per_person => "Average_Wage_rate_per_day_per_person",
    average_days_of_employment_per_household => "Average_days_of_employment_provided_per_Household",
    differently_abled_persons_worked => "Differently_abled_persons_worked",
    material_and_skilled_wages => "Material_and_skilled_Wages",
    number_of_completed_works => "Number_of_Completed_Works",
    number_of_gps_with_nil_exp => "Number_of_GPs_with_NIL_exp",
    number_of_ongoing_works => "Number_of_Ongoing_Works",
    persondays_of_central_liability_so_far => "Persondays_of_Central_Liability_so_far",
    sc_persondays => "SC_persondays",
    sc_workers_against_active_workers => "SC_workers_against_active_workers",
    st_persondays => "ST_persondays",
    st_workers_against_active_workers => "ST_workers_against_active_workers",
    total_adm_expenditure => "Total_Adm_Expenditure",
    total_exp => "Total_Exp",
    total_households_worked => "Total_Households_Worked",
    total_individuals_worked => "Total_Individuals_Worked",
    total_no_of_active_job_cards => "Total_No_of_Active_Job_Cards",
    total_no_of_active_workers => "Total_No_of_Active_Workers",
    total_no_of_hhs_completed_100_days => "Total_No_of_HHs_completed_100_Days_of_Wage_Employment",
    total_no_of_jobcards_issued => "Total_No_of_JobCards_issued",
    total_no_of_workers => "Total_No_of_Workers",
    total_no_of_works_takenup => "Total_No_of_Works_Takenup",
    wages => "Wages",
    women_persondays => "Women_Persondays",
    percent_of_category_b_works => "percent_of_Category_B_Works",
    percent_of_expenditure_on_agriculture_allied_works => "percent_of_Expenditure_on_Agriculture_Allied_Works",
    percent_of_nrm_expenditure => "percent_of_NRM_Expenditure",
    percentage_payments_generated_within_15_days => "percentage_payments_gererated_within_15_days",
}

/// Natural key of a [`StatRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatKey {
    pub region_code: String,
    pub fiscal_year: String,
    pub month: String,
}

/// Normalized statistics record, ready to be persisted.
///
/// Serializes with the upstream column names (`district_code`, `fin_year`,
/// `Remarks`) so API clients see the same shape the portal publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStatRecord {
    #[serde(rename = "district_code", alias = "region_code")]
    pub region_code: String,
    #[serde(rename = "district_name", alias = "region_name")]
    pub region_name: String,
    pub state_code: String,
    pub state_name: String,
    #[serde(rename = "fin_year", alias = "fiscal_year")]
    pub fiscal_year: String,
    pub month: String,
    #[serde(flatten)]
    pub metrics: StatMetrics,
    #[serde(rename = "Remarks", alias = "remarks")]
    pub remarks: String,
}

impl NewStatRecord {
    pub fn key(&self) -> StatKey {
        StatKey {
            region_code: self.region_code.clone(),
            fiscal_year: self.fiscal_year.clone(),
            month: self.month.clone(),
        }
    }
}

/// Persisted statistics record for one region, fiscal year and month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatRecord {
    pub id: Uuid,
    #[serde(flatten)]
    pub record: NewStatRecord,
    pub created_at: DateTime<Utc>,
}

impl StatRecord {
    pub fn key(&self) -> StatKey {
        self.record.key()
    }
}

/// Filters accepted by record queries.
///
/// Name fields match as case-insensitive substrings; codes, fiscal year and
/// month match exactly. `None` fields do not constrain the query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatFilter {
    pub state_name: Option<String>,
    pub state_code: Option<String>,
    pub region_name: Option<String>,
    pub region_code: Option<String>,
    pub fiscal_year: Option<String>,
    pub month: Option<String>,
}

impl StatFilter {
    pub fn matches(&self, record: &NewStatRecord) -> bool {
        fn contains_ci(haystack: &str, needle: &Option<String>) -> bool {
            needle
                .as_deref()
                .map_or(true, |n| haystack.to_lowercase().contains(&n.to_lowercase()))
        }
        fn equals(value: &str, expected: &Option<String>) -> bool {
            expected.as_deref().map_or(true, |e| value == e)
        }

        contains_ci(&record.state_name, &self.state_name)
            && contains_ci(&record.region_name, &self.region_name)
            && equals(&record.state_code, &self.state_code)
            && equals(&record.region_code, &self.region_code)
            && equals(&record.fiscal_year, &self.fiscal_year)
            && equals(&record.month, &self.month)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Page {
    pub const DEFAULT_LIMIT: usize = 1000;
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// Natural key of an [`Explanation`]; `language` is always lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExplanationKey {
    pub region_code: String,
    pub fiscal_year: String,
    pub month: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewExplanation {
    #[serde(flatten)]
    pub key: ExplanationKey,
    pub state_code: String,
    pub state_name: String,
    pub region_name: String,
    pub response: String,
}

/// Generated narrative for one region/month/year/language. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub id: Uuid,
    #[serde(flatten)]
    pub explanation: NewExplanation,
    pub created_at: DateTime<Utc>,
}

impl Explanation {
    pub fn key(&self) -> &ExplanationKey {
        &self.explanation.key
    }

    pub fn response(&self) -> &str {
        &self.explanation.response
    }
}
