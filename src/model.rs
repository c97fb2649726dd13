//! Wire types exchanged with the billing API.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Resident,
    Manager,
    Admin,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s.trim().to_lowercase().as_str() {
            "resident" => Some(Role::Resident),
            "manager" => Some(Role::Manager),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Resident => "resident",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeterType {
    Water,
    Electricity,
}

impl MeterType {
    pub fn parse(s: &str) -> Option<MeterType> {
        match s.trim().to_lowercase().as_str() {
            "water" => Some(MeterType::Water),
            "electricity" => Some(MeterType::Electricity),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MeterType::Water => "water",
            MeterType::Electricity => "electricity",
        }
    }
}

impl Display for MeterType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// Profile of the signed-in user. `apartment_number` only carries meaning for residents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apartment_number: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(deserialize_with = "api_time")]
    pub created_at: DateTime<Utc>,
}

fn default_active() -> bool { true }

/// Body of `POST /auth/login`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub user: UserProfile,
}

fn default_token_type() -> String { "bearer".to_string() }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    pub id: i64,
    pub user_id: i64,
    pub meter_type: MeterType,
    pub reading_value: f64,
    pub image_url: String,
    #[serde(deserialize_with = "api_time")]
    pub reading_date: DateTime<Utc>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub verified_by: Option<i64>,
    #[serde(default, deserialize_with = "api_time_opt")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingList {
    pub readings: Vec<MeterReading>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    pub user_id: i64,
    pub meter_reading_id: i64,
    pub invoice_number: String,
    pub amount: f64,
    pub consumption: f64,
    pub rate: f64,
    #[serde(deserialize_with = "api_time")]
    pub issue_date: DateTime<Utc>,
    #[serde(deserialize_with = "api_time")]
    pub due_date: DateTime<Utc>,
    #[serde(default)]
    pub paid: bool,
    #[serde(default, deserialize_with = "api_time_opt")]
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceList {
    pub invoices: Vec<Invoice>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceSummary {
    pub total_invoices: u64,
    pub total_amount: f64,
    pub paid_invoices: u64,
    pub paid_amount: f64,
    pub pending_invoices: u64,
    pub pending_amount: f64,
}

/// Parse an API timestamp. Offsets are honoured; naive timestamps (as emitted by
/// SQLite-backed deployments) are taken as UTC.
pub fn parse_api_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|n| n.and_utc())
}

fn api_time<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    parse_api_time(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw)))
}

fn api_time_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    match Option::<String>::deserialize(d)? {
        Some(raw) => parse_api_time(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw))),
        None => Ok(None),
    }
}
