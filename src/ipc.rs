use crate::model::{ActivityKind, AdmissionStatus, FeeStatus, Student, TransferCertificate};
use crate::{backup, exchange, fees, store::Store, sync::SyncEngine};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct OkResp {
    id: String,
    ok: bool,
    result: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ErrObj {
    code: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrResp {
    id: String,
    ok: bool,
    error: ErrObj,
}

fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!(OkResp {
        id: id.to_string(),
        ok: true,
        result
    })
}

fn err(id: &str, code: &str, message: impl Into<String>) -> serde_json::Value {
    json!(ErrResp {
        id: id.to_string(),
        ok: false,
        error: ErrObj {
            code: code.to_string(),
            message: message.into(),
        }
    })
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub store: Option<Store>,
    pub students: Vec<Student>,
    pub sync: SyncEngine,
}

impl AppState {
    pub fn new(sync: SyncEngine) -> AppState {
        AppState {
            workspace: None,
            store: None,
            students: Vec::new(),
            sync,
        }
    }

    fn save(&self) {
        if let Some(store) = self.store.as_ref() {
            store.save_students(&self.students);
        }
    }

    fn log(&self, kind: ActivityKind, description: &str) {
        if let Some(store) = self.store.as_ref() {
            store.append_activity(kind, description);
        }
    }
}

fn param_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    match req.method.as_str() {
        "health" => ok(
            &req.id,
            json!({
                "version": env!("CARGO_PKG_VERSION"),
                "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
                "remote": state.sync.is_remote(),
            }),
        ),
        "workspace.select" => {
            let Some(path) = param_str(&req.params, "path").map(PathBuf::from) else {
                return err(&req.id, "bad_params", "missing params.path");
            };
            let store = match Store::open(&path) {
                Ok(s) => s,
                Err(e) => return err(&req.id, "store_open_failed", format!("{e:?}")),
            };
            state.students = store.load_students();
            state.store = Some(store);
            state.workspace = Some(path.clone());

            // With an account configured, the remote copy wins outright on
            // load, even when it is empty.
            if state.sync.is_remote() {
                if let Some(remote_students) = state.sync.initial_load() {
                    state.students = remote_students;
                    state.save();
                }
            }

            ok(
                &req.id,
                json!({
                    "workspacePath": path.to_string_lossy(),
                    "studentCount": state.students.len(),
                    "sync": state.sync.status(),
                }),
            )
        }
        "students.list" => {
            if state.store.is_none() {
                return ok(&req.id, json!({ "students": [] }));
            }
            ok(&req.id, json!({ "students": state.students }))
        }
        "students.create" => {
            if state.store.is_none() {
                return err(&req.id, "no_workspace", "select a workspace first");
            }
            let Some(raw) = req.params.get("student") else {
                return err(&req.id, "bad_params", "missing params.student");
            };
            let mut raw = raw.clone();
            if raw.get("id").and_then(|v| v.as_str()).is_none() {
                if let Some(obj) = raw.as_object_mut() {
                    obj.insert("id".to_string(), json!(Uuid::new_v4().to_string()));
                }
            }
            let student: Student = match serde_json::from_value(raw) {
                Ok(s) => s,
                Err(e) => return err(&req.id, "bad_params", format!("invalid student: {e}")),
            };
            if state.students.iter().any(|s| s.id == student.id) {
                return err(
                    &req.id,
                    "duplicate_id",
                    format!("a student with id {} already exists", student.id),
                );
            }

            state.students.push(student.clone());
            state.save();
            state.log(
                ActivityKind::Student,
                &format!("Added student {} (class {})", student.name, student.class),
            );
            state.sync.mark_local_write();
            state.sync.replicate_student(&student);

            ok(
                &req.id,
                json!({ "student": student, "sync": state.sync.status() }),
            )
        }
        "students.update" => {
            if state.store.is_none() {
                return err(&req.id, "no_workspace", "select a workspace first");
            }
            let Some(raw) = req.params.get("student") else {
                return err(&req.id, "bad_params", "missing params.student");
            };
            let student: Student = match serde_json::from_value(raw.clone()) {
                Ok(s) => s,
                Err(e) => return err(&req.id, "bad_params", format!("invalid student: {e}")),
            };
            let Some(existing) = state.students.iter_mut().find(|s| s.id == student.id) else {
                return err(
                    &req.id,
                    "not_found",
                    format!("no student with id {}", student.id),
                );
            };
            *existing = student.clone();
            state.save();
            state.log(
                ActivityKind::Student,
                &format!("Updated student {}", student.name),
            );
            state.sync.mark_local_write();
            state.sync.replicate_student(&student);

            ok(
                &req.id,
                json!({ "student": student, "sync": state.sync.status() }),
            )
        }
        "students.delete" => {
            if state.store.is_none() {
                return err(&req.id, "no_workspace", "select a workspace first");
            }
            let Some(student_id) = param_str(&req.params, "studentId") else {
                return err(&req.id, "bad_params", "missing params.studentId");
            };
            let Some(pos) = state.students.iter().position(|s| s.id == student_id) else {
                return err(
                    &req.id,
                    "not_found",
                    format!("no student with id {student_id}"),
                );
            };
            let removed = state.students.remove(pos);
            state.save();
            state.log(
                ActivityKind::Student,
                &format!("Removed student {}", removed.name),
            );
            state.sync.mark_local_write();
            state.sync.replicate_delete(&removed.id);

            ok(
                &req.id,
                json!({ "studentId": removed.id, "sync": state.sync.status() }),
            )
        }
        "fees.quote" => {
            let Some(start) = param_str(&req.params, "startMonth") else {
                return err(&req.id, "bad_params", "missing params.startMonth");
            };
            let end = param_str(&req.params, "endMonth").unwrap_or(start);
            let Some(amount) = req.params.get("feeAmount").and_then(|v| v.as_f64()) else {
                return err(&req.id, "bad_params", "missing params.feeAmount");
            };
            let Some(date_raw) = param_str(&req.params, "paymentDate") else {
                return err(&req.id, "bad_params", "missing params.paymentDate");
            };
            let payment_date = match fees::parse_payment_date(date_raw) {
                Ok(d) => d,
                Err(e) => return err(&req.id, &e.code, e.message),
            };
            match fees::quote(start, end, amount, payment_date) {
                Ok(q) => ok(&req.id, json!({ "quote": q })),
                Err(e) => err(&req.id, &e.code, e.message),
            }
        }
        "fees.collect" => {
            if state.store.is_none() {
                return err(&req.id, "no_workspace", "select a workspace first");
            }
            let Some(student_id) = param_str(&req.params, "studentId") else {
                return err(&req.id, "bad_params", "missing params.studentId");
            };
            let Some(start) = param_str(&req.params, "startMonth") else {
                return err(&req.id, "bad_params", "missing params.startMonth");
            };
            let end = param_str(&req.params, "endMonth")
                .unwrap_or(start)
                .to_string();
            let Some(date_raw) = param_str(&req.params, "paymentDate") else {
                return err(&req.id, "bad_params", "missing params.paymentDate");
            };
            let remark = param_str(&req.params, "remark").unwrap_or("").to_string();
            let payment_date = match fees::parse_payment_date(date_raw) {
                Ok(d) => d,
                Err(e) => return err(&req.id, &e.code, e.message),
            };

            let Some(student) = state.students.iter_mut().find(|s| s.id == student_id) else {
                return err(
                    &req.id,
                    "not_found",
                    format!("no student with id {student_id}"),
                );
            };
            let quote = match fees::quote(start, &end, student.fee_amount, payment_date) {
                Ok(q) => q,
                Err(e) => return err(&req.id, &e.code, e.message),
            };

            let amount = student.fee_amount;
            for m in &quote.months {
                student.fee_history.push(crate::model::FeePayment {
                    id: Uuid::new_v4().to_string(),
                    payment_date: date_raw.to_string(),
                    month: m.month.clone(),
                    amount,
                    fine: m.fine,
                    remark: remark.clone(),
                });
            }
            student.fee_status = FeeStatus::Paid;
            let student = student.clone();

            state.save();
            state.log(
                ActivityKind::Fee,
                &format!(
                    "Collected fee from {} for {} month(s), total {}",
                    student.name, quote.month_count, quote.total
                ),
            );
            state.sync.mark_local_write();
            state.sync.replicate_student(&student);

            ok(
                &req.id,
                json!({ "student": student, "quote": quote, "sync": state.sync.status() }),
            )
        }
        "admission.setStatus" => {
            if state.store.is_none() {
                return err(&req.id, "no_workspace", "select a workspace first");
            }
            let Some(student_id) = param_str(&req.params, "studentId") else {
                return err(&req.id, "bad_params", "missing params.studentId");
            };
            let Some(status_raw) = req.params.get("status") else {
                return err(&req.id, "bad_params", "missing params.status");
            };
            let status: AdmissionStatus = match serde_json::from_value(status_raw.clone()) {
                Ok(s) => s,
                Err(_) => {
                    return err(
                        &req.id,
                        "bad_params",
                        format!("unknown admission status: {status_raw}"),
                    )
                }
            };
            let changed_by = param_str(&req.params, "changedBy")
                .unwrap_or("admin")
                .to_string();

            let Some(student) = state.students.iter_mut().find(|s| s.id == student_id) else {
                return err(
                    &req.id,
                    "not_found",
                    format!("no student with id {student_id}"),
                );
            };
            student.admission_status = status;
            student.status_changed_at = Some(chrono::Utc::now().format("%Y-%m-%d").to_string());
            student.status_changed_by = Some(changed_by);
            let student = student.clone();

            let status_label = serde_json::to_value(status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            state.save();
            state.log(
                ActivityKind::Admission,
                &format!(
                    "Admission status of {} changed to {}",
                    student.name, status_label
                ),
            );
            state.sync.mark_local_write();
            state.sync.replicate_student(&student);

            ok(
                &req.id,
                json!({ "student": student, "sync": state.sync.status() }),
            )
        }
        "tc.issue" => {
            if state.store.is_none() {
                return err(&req.id, "no_workspace", "select a workspace first");
            }
            let Some(student_id) = param_str(&req.params, "studentId") else {
                return err(&req.id, "bad_params", "missing params.studentId");
            };
            let Some(tc_number) = param_str(&req.params, "tcNumber") else {
                return err(&req.id, "bad_params", "missing params.tcNumber");
            };
            let Some(issue_date) = param_str(&req.params, "issueDate") else {
                return err(&req.id, "bad_params", "missing params.issueDate");
            };
            let reason = param_str(&req.params, "reason").unwrap_or("").to_string();
            let remarks = param_str(&req.params, "remarks").unwrap_or("").to_string();

            let Some(student) = state.students.iter_mut().find(|s| s.id == student_id) else {
                return err(
                    &req.id,
                    "not_found",
                    format!("no student with id {student_id}"),
                );
            };
            student.transfer_certificate = Some(TransferCertificate {
                tc_number: tc_number.to_string(),
                issue_date: issue_date.to_string(),
                reason,
                remarks,
            });
            student.admission_status = AdmissionStatus::Transferred;
            student.status_changed_at = Some(chrono::Utc::now().format("%Y-%m-%d").to_string());
            student.status_changed_by = Some("admin".to_string());
            let student = student.clone();

            state.save();
            state.log(
                ActivityKind::Tc,
                &format!("Issued TC {} for {}", tc_number, student.name),
            );
            state.sync.mark_local_write();
            state.sync.replicate_student(&student);

            ok(
                &req.id,
                json!({ "student": student, "sync": state.sync.status() }),
            )
        }
        "sync.status" => ok(
            &req.id,
            json!({ "remote": state.sync.is_remote(), "sync": state.sync.status() }),
        ),
        "sync.resync" => {
            if state.store.is_none() {
                return err(&req.id, "no_workspace", "select a workspace first");
            }
            state.sync.replicate_all(&state.students);
            ok(&req.id, json!({ "sync": state.sync.status() }))
        }
        "sync.load" => {
            if state.store.is_none() {
                return err(&req.id, "no_workspace", "select a workspace first");
            }
            if let Some(remote_students) = state.sync.initial_load() {
                state.students = remote_students;
                state.save();
            }
            ok(
                &req.id,
                json!({
                    "studentCount": state.students.len(),
                    "sync": state.sync.status(),
                }),
            )
        }
        "data.exportCsv" => match exchange::to_csv(&state.students) {
            Ok(csv) => ok(&req.id, json!({ "csv": csv })),
            Err(e) => err(&req.id, "export_failed", format!("{e:#}")),
        },
        "data.importCsv" => {
            if state.store.is_none() {
                return err(&req.id, "no_workspace", "select a workspace first");
            }
            let Some(csv) = param_str(&req.params, "csv") else {
                return err(&req.id, "bad_params", "missing params.csv");
            };
            let students = match exchange::from_csv(csv) {
                Ok(s) => s,
                Err(e) => return err(&req.id, "import_failed", format!("{e:#}")),
            };
            apply_import(state, students, "CSV", &req.id)
        }
        "data.importJson" => {
            if state.store.is_none() {
                return err(&req.id, "no_workspace", "select a workspace first");
            }
            let Some(text) = param_str(&req.params, "json") else {
                return err(&req.id, "bad_params", "missing params.json");
            };
            let students = match exchange::from_json(text) {
                Ok(s) => s,
                Err(e) => return err(&req.id, "import_failed", format!("{e:#}")),
            };
            apply_import(state, students, "JSON", &req.id)
        }
        "backup.export" => {
            let Some(store) = state.store.as_ref() else {
                return err(&req.id, "no_workspace", "select a workspace first");
            };
            let Some(out_path) = param_str(&req.params, "outPath").map(PathBuf::from) else {
                return err(&req.id, "bad_params", "missing params.outPath");
            };
            match backup::export_backup(store, &out_path) {
                Ok(summary) => {
                    state.log(
                        ActivityKind::System,
                        &format!("Exported backup of {} students", summary.student_count),
                    );
                    ok(
                        &req.id,
                        json!({
                            "bundleFormat": summary.bundle_format,
                            "studentCount": summary.student_count,
                        }),
                    )
                }
                Err(e) => err(&req.id, "backup_failed", format!("{e:#}")),
            }
        }
        "backup.import" => {
            let Some(store) = state.store.as_ref() else {
                return err(&req.id, "no_workspace", "select a workspace first");
            };
            let Some(bundle) = param_str(&req.params, "bundlePath").map(PathBuf::from) else {
                return err(&req.id, "bad_params", "missing params.bundlePath");
            };
            match backup::import_backup(store, &bundle) {
                Ok(summary) => {
                    state.students = store.load_students();
                    state.log(
                        ActivityKind::System,
                        &format!("Restored backup of {} students", summary.student_count),
                    );
                    state.sync.mark_local_write();
                    let students = state.students.clone();
                    state.sync.replicate_all(&students);
                    ok(
                        &req.id,
                        json!({
                            "bundleFormatDetected": summary.bundle_format_detected,
                            "studentCount": summary.student_count,
                            "sync": state.sync.status(),
                        }),
                    )
                }
                Err(e) => err(&req.id, "backup_failed", format!("{e:#}")),
            }
        }
        "activities.list" => {
            let Some(store) = state.store.as_ref() else {
                return ok(&req.id, json!({ "activities": [] }));
            };
            ok(&req.id, json!({ "activities": store.load_activities() }))
        }
        other => err(&req.id, "unknown_method", format!("unknown method: {other}")),
    }
}

fn apply_import(
    state: &mut AppState,
    students: Vec<Student>,
    source: &str,
    req_id: &str,
) -> serde_json::Value {
    let count = students.len();
    state.students = students;
    state.save();
    state.log(
        ActivityKind::System,
        &format!("Imported {count} students from {source}"),
    );
    state.sync.mark_local_write();
    let students = state.students.clone();
    state.sync.replicate_all(&students);
    ok(
        req_id,
        json!({ "studentCount": count, "sync": state.sync.status() }),
    )
}
