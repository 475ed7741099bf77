use serde::{Deserialize, Serialize};

/// One closed status enum for the whole admission/transfer workflow.
/// The UI historically mixed pipeline values ("Pending", "Under Review")
/// with board values ("Confirmed", "Provisional"); unknown strings are a
/// deserialize error rather than free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionStatus {
    Pending,
    #[serde(rename = "Under Review")]
    UnderReview,
    Approved,
    Rejected,
    Confirmed,
    Provisional,
    Cancelled,
    Transferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeStatus {
    Paid,
    Pending,
    Overdue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeePayment {
    pub id: String,
    /// Calendar day the payment was taken, YYYY-MM-DD.
    pub payment_date: String,
    /// Target month the payment covers, YYYY-MM.
    pub month: String,
    pub amount: f64,
    pub fine: f64,
    #[serde(default)]
    pub remark: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferCertificate {
    pub tc_number: String,
    pub issue_date: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub remarks: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub class: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub roll_number: String,
    #[serde(default)]
    pub guardian_name: String,
    pub fee_amount: f64,
    pub fee_status: FeeStatus,
    #[serde(default)]
    pub admission_date: String,
    pub admission_status: AdmissionStatus,
    // These serialize as explicit nulls so the CSV header, which is built
    // from the first record's keys, always carries their columns.
    #[serde(default)]
    pub transfer_certificate: Option<TransferCertificate>,
    #[serde(default)]
    pub status_changed_at: Option<String>,
    #[serde(default)]
    pub status_changed_by: Option<String>,
    #[serde(default)]
    pub fee_history: Vec<FeePayment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Student,
    Fee,
    Admission,
    Tc,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub kind: ActivityKind,
    pub description: String,
    pub timestamp: String,
}
