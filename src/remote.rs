use crate::model::{FeePayment, Student};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Category tag stamped on every normalized fee row.
pub const FEE_CATEGORY: &str = "fee_payment";

const STUDENTS_TABLE: &str = "students";
const FEES_TABLE: &str = "fees";

/// Flat remote `students` row: the nested record minus its fee history,
/// with the optional transfer certificate spread over nullable columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRow {
    pub id: String,
    pub name: String,
    pub class: String,
    pub section: String,
    pub roll_number: String,
    pub guardian_name: String,
    pub fee_amount: f64,
    pub fee_status: crate::model::FeeStatus,
    pub admission_date: String,
    pub admission_status: crate::model::AdmissionStatus,
    pub tc_number: Option<String>,
    pub tc_issue_date: Option<String>,
    pub tc_reason: Option<String>,
    pub tc_remarks: Option<String>,
    pub status_changed_at: Option<String>,
    pub status_changed_by: Option<String>,
}

/// Remote `fees` row. Fields without a column of their own (remark, target
/// month, fine) travel in `description` as a JSON-encoded side channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeRow {
    pub id: String,
    pub student_id: String,
    pub amount: f64,
    pub date: String,
    pub category: String,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SideChannel {
    remark: String,
    month: String,
    fine: f64,
}

pub fn normalize(student: &Student) -> (StudentRow, Vec<FeeRow>) {
    let tc = student.transfer_certificate.as_ref();
    let row = StudentRow {
        id: student.id.clone(),
        name: student.name.clone(),
        class: student.class.clone(),
        section: student.section.clone(),
        roll_number: student.roll_number.clone(),
        guardian_name: student.guardian_name.clone(),
        fee_amount: student.fee_amount,
        fee_status: student.fee_status,
        admission_date: student.admission_date.clone(),
        admission_status: student.admission_status,
        tc_number: tc.map(|t| t.tc_number.clone()),
        tc_issue_date: tc.map(|t| t.issue_date.clone()),
        tc_reason: tc.map(|t| t.reason.clone()),
        tc_remarks: tc.map(|t| t.remarks.clone()),
        status_changed_at: student.status_changed_at.clone(),
        status_changed_by: student.status_changed_by.clone(),
    };

    let fees = student
        .fee_history
        .iter()
        .map(|p| {
            let side = SideChannel {
                remark: p.remark.clone(),
                month: p.month.clone(),
                fine: p.fine,
            };
            FeeRow {
                id: p.id.clone(),
                student_id: student.id.clone(),
                amount: p.amount,
                date: to_timestamp(&p.payment_date),
                category: FEE_CATEGORY.to_string(),
                description: serde_json::to_string(&side)
                    .unwrap_or_else(|_| p.remark.clone()),
            }
        })
        .collect();

    (row, fees)
}

// Payment dates are stored day-precise; an unparsable date is carried
// through verbatim rather than rejected.
fn to_timestamp(day: &str) -> String {
    match chrono::NaiveDate::parse_from_str(day, "%Y-%m-%d") {
        Ok(_) => format!("{day}T00:00:00Z"),
        Err(_) => day.to_string(),
    }
}

fn to_day(timestamp: &str) -> String {
    match timestamp.split_once('T') {
        Some((day, _)) => day.to_string(),
        None => timestamp.to_string(),
    }
}

pub fn denormalize(students: Vec<StudentRow>, fees: Vec<FeeRow>) -> Vec<Student> {
    let mut by_student: HashMap<String, Vec<FeePayment>> = HashMap::new();
    for row in fees {
        let side: SideChannel = serde_json::from_str(&row.description).unwrap_or(SideChannel {
            remark: row.description.clone(),
            month: String::new(),
            fine: 0.0,
        });
        by_student.entry(row.student_id).or_default().push(FeePayment {
            id: row.id,
            payment_date: to_day(&row.date),
            month: side.month,
            amount: row.amount,
            fine: side.fine,
            remark: side.remark,
        });
    }

    students
        .into_iter()
        .map(|row| {
            let tc = row.tc_number.map(|tc_number| crate::model::TransferCertificate {
                tc_number,
                issue_date: row.tc_issue_date.unwrap_or_default(),
                reason: row.tc_reason.unwrap_or_default(),
                remarks: row.tc_remarks.unwrap_or_default(),
            });
            let fee_history = by_student.remove(&row.id).unwrap_or_default();
            Student {
                id: row.id,
                name: row.name,
                class: row.class,
                section: row.section,
                roll_number: row.roll_number,
                guardian_name: row.guardian_name,
                fee_amount: row.fee_amount,
                fee_status: row.fee_status,
                admission_date: row.admission_date,
                admission_status: row.admission_status,
                transfer_certificate: tc,
                status_changed_at: row.status_changed_at,
                status_changed_by: row.status_changed_by,
                fee_history,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("a record with this id already exists in the remote store: {0}")]
    DuplicateKey(String),
    #[error("the remote store denied permission for this operation: {0}")]
    PermissionDenied(String),
    #[error("could not reach the remote store: {0}")]
    Network(String),
    #[error("remote request failed: {0}")]
    Remote(String),
}

impl SyncError {
    /// Remote services report failures as free text; sort them into the
    /// categories the UI distinguishes by substring match.
    pub fn classify(raw: &str) -> SyncError {
        let lower = raw.to_ascii_lowercase();
        if lower.contains("duplicate key") {
            SyncError::DuplicateKey(raw.to_string())
        } else if lower.contains("permission denied") || lower.contains("row-level security") {
            SyncError::PermissionDenied(raw.to_string())
        } else if lower.contains("network") || lower.contains("connection") {
            SyncError::Network(raw.to_string())
        } else {
            SyncError::Remote(raw.to_string())
        }
    }

    fn from_transport(e: reqwest::Error) -> SyncError {
        if e.is_connect() || e.is_timeout() {
            SyncError::Network(e.to_string())
        } else {
            SyncError::classify(&e.to_string())
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            SyncError::DuplicateKey(_) => "duplicate_key",
            SyncError::PermissionDenied(_) => "permission_denied",
            SyncError::Network(_) => "network_failure",
            SyncError::Remote(_) => "generic",
        }
    }
}

/// Endpoint and credential for the remote store. Absence of either value
/// leaves the daemon fully local; no remote call is ever attempted.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub credential: String,
}

impl RemoteConfig {
    pub fn from_env() -> Option<RemoteConfig> {
        let endpoint = std::env::var("ROSTERD_SYNC_URL").ok()?;
        let credential = std::env::var("ROSTERD_SYNC_KEY").ok()?;
        if endpoint.trim().is_empty() || credential.trim().is_empty() {
            return None;
        }
        Some(RemoteConfig {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            credential,
        })
    }
}

pub struct RemoteClient {
    http: reqwest::blocking::Client,
    config: RemoteConfig,
}

impl RemoteClient {
    pub fn new(config: RemoteConfig) -> RemoteClient {
        RemoteClient {
            http: reqwest::blocking::Client::new(),
            config,
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.endpoint, table)
    }

    fn authed(&self, req: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        req.header("apikey", &self.config.credential)
            .header("Authorization", format!("Bearer {}", &self.config.credential))
    }

    fn check(resp: reqwest::blocking::Response) -> Result<reqwest::blocking::Response, SyncError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().unwrap_or_default();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SyncError::PermissionDenied(format!("{status}: {body}")));
        }
        Err(SyncError::classify(&format!("{status}: {body}")))
    }

    pub fn fetch_students(&self) -> Result<Vec<StudentRow>, SyncError> {
        let resp = self
            .authed(self.http.get(format!("{}?select=*", self.table_url(STUDENTS_TABLE))))
            .send()
            .map_err(SyncError::from_transport)?;
        Self::check(resp)?
            .json()
            .map_err(|e| SyncError::Remote(e.to_string()))
    }

    pub fn fetch_fees(&self) -> Result<Vec<FeeRow>, SyncError> {
        let resp = self
            .authed(self.http.get(format!("{}?select=*", self.table_url(FEES_TABLE))))
            .send()
            .map_err(SyncError::from_transport)?;
        Self::check(resp)?
            .json()
            .map_err(|e| SyncError::Remote(e.to_string()))
    }

    /// Insert-or-replace by primary key.
    pub fn upsert_students(&self, rows: &[StudentRow]) -> Result<(), SyncError> {
        if rows.is_empty() {
            return Ok(());
        }
        let resp = self
            .authed(self.http.post(self.table_url(STUDENTS_TABLE)))
            .header("Prefer", "resolution=merge-duplicates")
            .json(rows)
            .send()
            .map_err(SyncError::from_transport)?;
        Self::check(resp).map(|_| ())
    }

    pub fn upsert_fees(&self, rows: &[FeeRow]) -> Result<(), SyncError> {
        if rows.is_empty() {
            return Ok(());
        }
        let resp = self
            .authed(self.http.post(self.table_url(FEES_TABLE)))
            .header("Prefer", "resolution=merge-duplicates")
            .json(rows)
            .send()
            .map_err(SyncError::from_transport)?;
        Self::check(resp).map(|_| ())
    }

    /// Fee replacement is delete-by-student then reinsert, not per-row upsert.
    pub fn delete_fees_for(&self, student_id: &str) -> Result<(), SyncError> {
        let url = format!("{}?student_id=eq.{}", self.table_url(FEES_TABLE), student_id);
        let resp = self
            .authed(self.http.delete(url))
            .send()
            .map_err(SyncError::from_transport)?;
        Self::check(resp).map(|_| ())
    }

    pub fn delete_student(&self, student_id: &str) -> Result<(), SyncError> {
        self.delete_fees_for(student_id)?;
        let url = format!("{}?id=eq.{}", self.table_url(STUDENTS_TABLE), student_id);
        let resp = self
            .authed(self.http.delete(url))
            .send()
            .map_err(SyncError::from_transport)?;
        Self::check(resp).map(|_| ())
    }

    /// Replicates one student: upsert the flat row, then replace its fees.
    pub fn push_student(&self, student: &Student) -> Result<(), SyncError> {
        let (row, fees) = normalize(student);
        self.upsert_students(std::slice::from_ref(&row))?;
        self.delete_fees_for(&student.id)?;
        self.upsert_fees(&fees)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AdmissionStatus, FeeStatus, TransferCertificate};

    fn student_with_history() -> Student {
        Student {
            id: "s1".to_string(),
            name: "Asha Verma".to_string(),
            class: "6".to_string(),
            section: "A".to_string(),
            roll_number: "14".to_string(),
            guardian_name: "R. Verma".to_string(),
            fee_amount: 500.0,
            fee_status: FeeStatus::Paid,
            admission_date: "2023-04-01".to_string(),
            admission_status: AdmissionStatus::Transferred,
            transfer_certificate: Some(TransferCertificate {
                tc_number: "TC-0042".to_string(),
                issue_date: "2024-02-01".to_string(),
                reason: "relocation".to_string(),
                remarks: "dues cleared".to_string(),
            }),
            status_changed_at: Some("2024-02-01".to_string()),
            status_changed_by: Some("admin".to_string()),
            fee_history: vec![
                FeePayment {
                    id: "p1".to_string(),
                    payment_date: "2024-01-25".to_string(),
                    month: "2024-01".to_string(),
                    amount: 500.0,
                    fine: 30.0,
                    remark: "cash".to_string(),
                },
                FeePayment {
                    id: "p2".to_string(),
                    payment_date: "2024-02-10".to_string(),
                    month: "2024-02".to_string(),
                    amount: 500.0,
                    fine: 0.0,
                    remark: "upi, ref 7781".to_string(),
                },
            ],
        }
    }

    #[test]
    fn normalize_strips_history_into_rows() {
        let s = student_with_history();
        let (row, fees) = normalize(&s);
        assert_eq!(row.id, "s1");
        assert_eq!(row.tc_number.as_deref(), Some("TC-0042"));
        assert_eq!(fees.len(), 2);
        assert_eq!(fees[0].student_id, "s1");
        assert_eq!(fees[0].category, FEE_CATEGORY);
        assert_eq!(fees[0].date, "2024-01-25T00:00:00Z");
        let side: serde_json::Value =
            serde_json::from_str(&fees[0].description).expect("side channel json");
        assert_eq!(side["month"], "2024-01");
        assert_eq!(side["fine"], 30.0);
    }

    #[test]
    fn denormalize_normalize_round_trips() {
        let s = student_with_history();
        let (row, fees) = normalize(&s);
        let back = denormalize(vec![row], fees);
        assert_eq!(back, vec![s]);
    }

    #[test]
    fn student_without_fees_gets_an_empty_history() {
        let mut s = student_with_history();
        s.fee_history.clear();
        s.transfer_certificate = None;
        let (row, fees) = normalize(&s);
        assert!(fees.is_empty());
        let back = denormalize(vec![row], Vec::new());
        assert!(back[0].fee_history.is_empty());
        assert!(back[0].transfer_certificate.is_none());
    }

    #[test]
    fn unparsable_side_channel_falls_back_to_remark() {
        let fees = vec![FeeRow {
            id: "p9".to_string(),
            student_id: "s1".to_string(),
            amount: 250.0,
            date: "2024-03-01T00:00:00Z".to_string(),
            category: FEE_CATEGORY.to_string(),
            description: "paid in person".to_string(),
        }];
        let mut s = student_with_history();
        s.fee_history.clear();
        let (row, _) = normalize(&s);
        let back = denormalize(vec![row], fees);
        let p = &back[0].fee_history[0];
        assert_eq!(p.remark, "paid in person");
        assert_eq!(p.month, "");
        assert_eq!(p.fine, 0.0);
        assert_eq!(p.payment_date, "2024-03-01");
    }

    #[test]
    fn invalid_payment_dates_pass_through_unvalidated() {
        let mut s = student_with_history();
        s.fee_history[0].payment_date = "not-a-date".to_string();
        let (_, fees) = normalize(&s);
        assert_eq!(fees[0].date, "not-a-date");
    }

    #[test]
    fn error_classification_by_substring() {
        assert_eq!(
            SyncError::classify("duplicate key value violates unique constraint").category(),
            "duplicate_key"
        );
        assert_eq!(
            SyncError::classify("new row violates row-level security policy").category(),
            "permission_denied"
        );
        assert_eq!(
            SyncError::classify("network is unreachable").category(),
            "network_failure"
        );
        assert_eq!(SyncError::classify("boom").category(), "generic");
    }
}
