//! PostgreSQL adapter implementing the store and collaborator traits
//!
//! A [`WriteBatch`] runs inside one transaction. Every conditional part of it
//! (stock floor, prescription status, visit version) is expressed in the
//! `WHERE` clause of its statement, so a losing writer sees zero affected rows
//! and the whole transaction rolls back when the error propagates.

use crate::adapters::database::traits::{
    CommitReceipt, InvoiceDraft, StockAdjustment, VisitQuery, VisitStore, VisitWrite, WriteBatch,
};
use crate::adapters::postgresql::client::PostgreSQLClient;
use crate::adapters::postgresql::models::{
    appointment_from_row, billing_line_from_row, invoice_from_row, lab_test_from_row,
    medication_from_row, patient_from_row, prescription_from_row, PostgreSQLVisit, VISIT_COLUMNS,
};
use crate::adapters::services::{
    AppointmentService, BillingLedger, LabService, MedicationInventory, PatientDirectory,
    PrescriptionService,
};
use crate::domain::errors::{RoutingError, StoreError};
use crate::domain::ids::{
    AppointmentId, BillingLineId, InvoiceId, LabTestId, MedicationId, PatientId, PrescriptionId,
    VisitId,
};
use crate::domain::records::{
    Appointment, AppointmentStatus, BillingLine, BillingSource, Invoice, LabTest, Medication,
    Patient, Prescription, PrescriptionStatus,
};
use crate::domain::visit::{AdmissionKey, Visit};
use crate::domain::{Result, WardflowError};
use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::Transaction;
use std::sync::Arc;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;

/// Partial unique index guarding one active visit per admission key
const ACTIVE_KEY_INDEX: &str = "visits_active_admission_key_idx";

const BILLING_LINE_COLUMNS: &str = "id, patient_id, visit_id, description, quantity, \
    unit_price_cents, source_kind, source_ref, invoice_id, created_at";

/// PostgreSQL implementation of the Wardflow backend traits
pub struct PostgreSQLAdapter {
    client: Arc<PostgreSQLClient>,
}

impl PostgreSQLAdapter {
    /// Create a new PostgreSQL adapter
    pub fn new(client: PostgreSQLClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    /// Create a new PostgreSQL adapter with an Arc-wrapped client
    pub fn new_with_arc(client: Arc<PostgreSQLClient>) -> Self {
        Self { client }
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &Arc<PostgreSQLClient> {
        &self.client
    }

    async fn fetch_visits(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Visit>> {
        self.client
            .query(sql, params)
            .await?
            .iter()
            .map(|row| PostgreSQLVisit::from_row(row)?.to_domain())
            .collect()
    }
}

#[async_trait]
impl VisitStore for PostgreSQLAdapter {
    async fn test_connection(&self) -> Result<()> {
        self.client.test_connection().await
    }

    async fn get_visit(&self, id: &VisitId) -> Result<Option<Visit>> {
        let sql = format!("SELECT {VISIT_COLUMNS} FROM visits WHERE id = $1");
        let row = self.client.query_opt(&sql, &[&id.as_str()]).await?;
        row.map(|row| PostgreSQLVisit::from_row(&row)?.to_domain())
            .transpose()
    }

    async fn find_active_by_key(&self, key: &AdmissionKey) -> Result<Option<Visit>> {
        let sql = format!(
            "SELECT {VISIT_COLUMNS} FROM visits \
             WHERE admission_key = $1 AND overall_status = 'active'"
        );
        let row = self.client.query_opt(&sql, &[&key.as_str()]).await?;
        row.map(|row| PostgreSQLVisit::from_row(&row)?.to_domain())
            .transpose()
    }

    async fn find_visits(&self, query: &VisitQuery) -> Result<Vec<Visit>> {
        // Stage status is filtered in Rust so NULL columns follow the Unset rules
        let sql = format!(
            "SELECT {VISIT_COLUMNS} FROM visits \
             WHERE ($1::text IS NULL OR patient_id = $1) \
               AND ($2::text IS NULL OR appointment_id = $2) \
               AND ($3::text IS NULL OR current_stage = $3) \
               AND (NOT $4 OR overall_status = 'active') \
             ORDER BY created_at, id"
        );
        let patient_id = query.patient_id.as_ref().map(|id| id.as_str());
        let appointment_id = query.appointment_id.as_ref().map(|id| id.as_str());
        let stage = query.stage.map(|stage| stage.as_str());
        let visits = self
            .fetch_visits(&sql, &[&patient_id, &appointment_id, &stage, &query.active_only])
            .await?;
        Ok(visits
            .into_iter()
            .filter(|visit| query.matches(visit))
            .collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt> {
        let mut conn = self.client.get_connection().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;
        let mut receipt = CommitReceipt::default();

        for adjustment in &batch.stock_adjustments {
            let level = apply_stock_adjustment(&tx, adjustment).await?;
            receipt
                .stock_levels
                .push((adjustment.medication_id.clone(), level));
        }

        for line in &batch.billing_lines {
            insert_billing_line(&tx, line).await?;
        }

        for (id, status) in &batch.prescription_updates {
            update_prescription(&tx, id, *status).await?;
        }

        for (id, status) in &batch.appointment_updates {
            let updated = tx
                .execute(
                    "UPDATE appointments SET status = $2 WHERE id = $1",
                    &[&id.as_str(), &status.as_str()],
                )
                .await?;
            if updated == 0 {
                return Err(StoreError::not_found("appointment", id.as_str()).into());
            }
        }

        if let Some(draft) = &batch.invoice {
            receipt.invoice = Some(insert_invoice(&tx, draft).await?);
        }

        if let Some(write) = &batch.visit {
            receipt.visit = Some(write_visit(&tx, write).await?);
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;
        Ok(receipt)
    }

    fn backend_name(&self) -> &'static str {
        "postgresql"
    }
}

async fn apply_stock_adjustment(tx: &Transaction<'_>, adjustment: &StockAdjustment) -> Result<i64> {
    let id = adjustment.medication_id.as_str();
    let row = tx
        .query_opt(
            "UPDATE medications SET stock_quantity = stock_quantity + $2 \
             WHERE id = $1 AND stock_quantity + $2 >= 0 \
             RETURNING stock_quantity",
            &[&id, &adjustment.delta],
        )
        .await?;
    if let Some(row) = row {
        return Ok(row.try_get("stock_quantity")?);
    }

    let current = tx
        .query_opt("SELECT stock_quantity FROM medications WHERE id = $1", &[&id])
        .await?;
    match current {
        None => Err(StoreError::not_found("medication", id).into()),
        Some(row) => Err(StoreError::InsufficientStock {
            medication_id: id.to_string(),
            requested: -adjustment.delta,
            available: row.try_get("stock_quantity")?,
        }
        .into()),
    }
}

async fn insert_billing_line(tx: &Transaction<'_>, line: &BillingLine) -> Result<()> {
    let (kind, reference) = line.source.to_parts();
    let visit_id = line.visit_id.as_ref().map(|id| id.as_str());
    let invoice_id = line.invoice_id.as_ref().map(|id| id.as_str());
    let sql = format!(
        "INSERT INTO billing_lines ({BILLING_LINE_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
    );
    tx.execute(
        &sql,
        &[
            &line.id.as_str(),
            &line.patient_id.as_str(),
            &visit_id,
            &line.description,
            &line.quantity,
            &line.unit_price_cents,
            &kind,
            &reference,
            &invoice_id,
            &line.created_at,
        ],
    )
    .await
    .map_err(|e| {
        if is_unique_violation(&e, None) {
            StoreError::conflict("billing line", line.id.as_str(), "already exists").into()
        } else {
            WardflowError::from(e)
        }
    })?;
    Ok(())
}

async fn update_prescription(
    tx: &Transaction<'_>,
    id: &PrescriptionId,
    status: PrescriptionStatus,
) -> Result<()> {
    let updated = tx
        .execute(
            "UPDATE prescriptions SET status = $2 \
             WHERE id = $1 AND status IN ('active', 'pending')",
            &[&id.as_str(), &status.as_str()],
        )
        .await?;
    if updated > 0 {
        return Ok(());
    }

    let current = tx
        .query_opt("SELECT status FROM prescriptions WHERE id = $1", &[&id.as_str()])
        .await?;
    match current {
        None => Err(StoreError::not_found("prescription", id.as_str()).into()),
        Some(row) => {
            let current: String = row.try_get("status")?;
            Err(StoreError::conflict("prescription", id.as_str(), format!("already {current}")).into())
        }
    }
}

async fn insert_invoice(tx: &Transaction<'_>, draft: &InvoiceDraft) -> Result<Invoice> {
    let visit_id = draft.visit_id.as_ref().map(|id| id.as_str());
    let row = tx
        .query_one(
            "INSERT INTO invoices (id, patient_id, visit_id, total_cents, created_at) \
             VALUES ($1, $2, $3, 0, $4) \
             RETURNING id, patient_id, visit_id, total_cents, created_at",
            &[&draft.id.as_str(), &draft.patient_id.as_str(), &visit_id, &Utc::now()],
        )
        .await
        .map_err(|e| {
            if is_unique_violation(&e, None) {
                StoreError::conflict("invoice", draft.id.as_str(), "already exists").into()
            } else {
                WardflowError::from(e)
            }
        })?;

    let line_ids: Vec<String> = draft.line_ids.iter().map(ToString::to_string).collect();
    let claimed = tx
        .query(
            "UPDATE billing_lines SET invoice_id = $1 \
             WHERE id = ANY($2) AND patient_id = $3 AND invoice_id IS NULL \
             RETURNING quantity * unit_price_cents AS line_total",
            &[&draft.id.as_str(), &line_ids, &draft.patient_id.as_str()],
        )
        .await?;
    if claimed.len() != line_ids.len() {
        return Err(StoreError::conflict(
            "invoice",
            draft.id.as_str(),
            format!(
                "{} of {} billing line(s) are missing, invoiced or owned by another patient",
                line_ids.len() - claimed.len(),
                line_ids.len()
            ),
        )
        .into());
    }

    let mut total_cents = 0i64;
    for line in &claimed {
        total_cents += line.try_get::<_, i64>("line_total")?;
    }
    tx.execute(
        "UPDATE invoices SET total_cents = $2 WHERE id = $1",
        &[&draft.id.as_str(), &total_cents],
    )
    .await?;

    let mut invoice = invoice_from_row(&row, draft.line_ids.clone())?;
    invoice.total_cents = total_cents;
    Ok(invoice)
}

async fn write_visit(tx: &Transaction<'_>, write: &VisitWrite) -> Result<Visit> {
    match write {
        VisitWrite::Insert(visit) => {
            let mut stored = PostgreSQLVisit::from_domain(visit)?;
            stored.version += 1;
            let placeholders: Vec<String> = (1..=visit_column_count()).map(|i| format!("${i}")).collect();
            let sql = format!(
                "INSERT INTO visits ({VISIT_COLUMNS}) VALUES ({}) RETURNING {VISIT_COLUMNS}",
                placeholders.join(", ")
            );
            let row = tx
                .query_one(&sql, &visit_params(&stored))
                .await
                .map_err(|e| {
                    if is_unique_violation(&e, Some(ACTIVE_KEY_INDEX)) {
                        let key = stored.admission_key.clone().unwrap_or_default();
                        StoreError::DuplicateAdmission(key).into()
                    } else if is_unique_violation(&e, None) {
                        StoreError::conflict("visit", stored.id.as_str(), "already exists").into()
                    } else {
                        WardflowError::from(e)
                    }
                })?;
            PostgreSQLVisit::from_row(&row)?.to_domain()
        }
        VisitWrite::Update {
            visit,
            expected_version,
        } => {
            let mut stored = PostgreSQLVisit::from_domain(visit)?;
            stored.version = expected_version + 1;
            let assignments: Vec<String> = visit_column_names()
                .enumerate()
                .skip(1)
                .map(|(i, name)| format!("{name} = ${}", i + 1))
                .collect();
            let sql = format!(
                "UPDATE visits SET {} WHERE id = $1 AND version = ${} RETURNING {VISIT_COLUMNS}",
                assignments.join(", "),
                visit_column_count() + 1
            );
            let mut params = visit_params(&stored);
            params.push(expected_version);

            let row = tx.query_opt(&sql, &params).await.map_err(|e| {
                if is_unique_violation(&e, Some(ACTIVE_KEY_INDEX)) {
                    StoreError::DuplicateAdmission(stored.admission_key.clone().unwrap_or_default())
                        .into()
                } else {
                    WardflowError::from(e)
                }
            })?;
            match row {
                Some(row) => PostgreSQLVisit::from_row(&row)?.to_domain(),
                None => {
                    let exists = tx
                        .query_opt("SELECT 1 FROM visits WHERE id = $1", &[&stored.id])
                        .await?;
                    Err(match exists {
                        None => StoreError::not_found("visit", stored.id.as_str()).into(),
                        Some(_) => RoutingError::ConcurrentModification {
                            visit_id: stored.id.clone(),
                            expected_version: *expected_version,
                        }
                        .into(),
                    })
                }
            }
        }
    }
}

fn visit_column_names() -> impl Iterator<Item = &'static str> {
    VISIT_COLUMNS.split(',').map(str::trim)
}

fn visit_column_count() -> usize {
    visit_column_names().count()
}

/// Parameters in [`VISIT_COLUMNS`] order
fn visit_params(row: &PostgreSQLVisit) -> Vec<&(dyn ToSql + Sync)> {
    let mut params: Vec<&(dyn ToSql + Sync)> = vec![
        &row.id,
        &row.patient_id,
        &row.appointment_id,
        &row.visit_date,
        &row.visit_type,
        &row.overall_status,
        &row.current_stage,
    ];
    params.extend(row.statuses.iter().map(|s| s as &(dyn ToSql + Sync)));
    params.extend(row.completed_at.iter().map(|t| t as &(dyn ToSql + Sync)));
    params.extend([
        &row.stage_entered_at as &(dyn ToSql + Sync),
        &row.service,
        &row.admission_key,
        &row.notes,
        &row.created_at,
        &row.updated_at,
        &row.discharged_at,
        &row.cancelled_at,
        &row.version,
    ]);
    params
}

fn is_unique_violation(err: &tokio_postgres::Error, index: Option<&str>) -> bool {
    if err.code() != Some(&SqlState::UNIQUE_VIOLATION) {
        return false;
    }
    match index {
        None => true,
        Some(index) => err
            .as_db_error()
            .and_then(|db| db.constraint())
            .map_or(false, |constraint| constraint == index),
    }
}

#[async_trait]
impl PatientDirectory for PostgreSQLAdapter {
    async fn get_patient(&self, id: &PatientId) -> Result<Option<Patient>> {
        self.client
            .query_opt(
                "SELECT id, full_name, date_of_birth FROM patients WHERE id = $1",
                &[&id.as_str()],
            )
            .await?
            .map(|row| patient_from_row(&row))
            .transpose()
    }

    async fn search_patients(&self, query: &str) -> Result<Vec<Patient>> {
        let needle = query.trim().to_lowercase();
        self.client
            .query(
                "SELECT id, full_name, date_of_birth FROM patients \
                 WHERE strpos(lower(full_name), $1) > 0 OR strpos(lower(id), $1) > 0 \
                 ORDER BY full_name",
                &[&needle],
            )
            .await?
            .iter()
            .map(patient_from_row)
            .collect()
    }
}

#[async_trait]
impl AppointmentService for PostgreSQLAdapter {
    async fn get_appointment(&self, id: &AppointmentId) -> Result<Option<Appointment>> {
        self.client
            .query_opt(
                "SELECT id, patient_id, scheduled_for, status FROM appointments WHERE id = $1",
                &[&id.as_str()],
            )
            .await?
            .map(|row| appointment_from_row(&row))
            .transpose()
    }

    async fn update_appointment_status(
        &self,
        id: &AppointmentId,
        status: AppointmentStatus,
    ) -> Result<()> {
        let batch = WriteBatch {
            appointment_updates: vec![(id.clone(), status)],
            ..WriteBatch::default()
        };
        self.commit(batch).await.map(|_| ())
    }
}

const PRESCRIPTION_COLUMNS: &str =
    "id, patient_id, visit_id, medication_id, quantity, status, created_at";

#[async_trait]
impl PrescriptionService for PostgreSQLAdapter {
    async fn get_prescription(&self, id: &PrescriptionId) -> Result<Option<Prescription>> {
        let sql = format!("SELECT {PRESCRIPTION_COLUMNS} FROM prescriptions WHERE id = $1");
        self.client
            .query_opt(&sql, &[&id.as_str()])
            .await?
            .map(|row| prescription_from_row(&row))
            .transpose()
    }

    async fn list_prescriptions(
        &self,
        patient_id: &PatientId,
        status_filter: Option<PrescriptionStatus>,
    ) -> Result<Vec<Prescription>> {
        let sql = format!(
            "SELECT {PRESCRIPTION_COLUMNS} FROM prescriptions \
             WHERE patient_id = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY created_at, id"
        );
        let status = status_filter.map(|status| status.as_str());
        self.client
            .query(&sql, &[&patient_id.as_str(), &status])
            .await?
            .iter()
            .map(prescription_from_row)
            .collect()
    }

    async fn update_prescription_status(
        &self,
        id: &PrescriptionId,
        status: PrescriptionStatus,
    ) -> Result<()> {
        let batch = WriteBatch {
            prescription_updates: vec![(id.clone(), status)],
            ..WriteBatch::default()
        };
        self.commit(batch).await.map(|_| ())
    }
}

#[async_trait]
impl MedicationInventory for PostgreSQLAdapter {
    async fn get_medication(&self, id: &MedicationId) -> Result<Option<Medication>> {
        self.client
            .query_opt(
                "SELECT id, name, stock_quantity, unit_price_cents FROM medications WHERE id = $1",
                &[&id.as_str()],
            )
            .await?
            .map(|row| medication_from_row(&row))
            .transpose()
    }

    async fn adjust_stock(&self, id: &MedicationId, delta: i64) -> Result<i64> {
        let batch = WriteBatch {
            stock_adjustments: vec![StockAdjustment {
                medication_id: id.clone(),
                delta,
            }],
            ..WriteBatch::default()
        };
        let receipt = self.commit(batch).await?;
        receipt
            .stock_levels
            .first()
            .map(|(_, level)| *level)
            .ok_or_else(|| StoreError::not_found("medication", id.as_str()).into())
    }
}

#[async_trait]
impl BillingLedger for PostgreSQLAdapter {
    async fn add_service_line(
        &self,
        patient_id: &PatientId,
        visit_id: Option<&VisitId>,
        description: &str,
        quantity: i64,
        unit_price_cents: i64,
    ) -> Result<BillingLine> {
        let line = BillingLine::new(
            patient_id.clone(),
            visit_id.cloned(),
            description,
            quantity,
            unit_price_cents,
            BillingSource::Manual,
        );
        let batch = WriteBatch {
            billing_lines: vec![line.clone()],
            ..WriteBatch::default()
        };
        self.commit(batch).await?;
        Ok(line)
    }

    async fn lines_for_patient(
        &self,
        patient_id: &PatientId,
        uninvoiced_only: bool,
    ) -> Result<Vec<BillingLine>> {
        let sql = format!(
            "SELECT {BILLING_LINE_COLUMNS} FROM billing_lines \
             WHERE patient_id = $1 AND (NOT $2 OR invoice_id IS NULL) \
             ORDER BY created_at, id"
        );
        self.client
            .query(&sql, &[&patient_id.as_str(), &uninvoiced_only])
            .await?
            .iter()
            .map(billing_line_from_row)
            .collect()
    }

    async fn create_invoice(
        &self,
        patient_id: &PatientId,
        lines: &[BillingLineId],
    ) -> Result<Invoice> {
        let batch = WriteBatch {
            invoice: Some(InvoiceDraft {
                id: InvoiceId::generate(),
                patient_id: patient_id.clone(),
                visit_id: None,
                line_ids: lines.to_vec(),
            }),
            ..WriteBatch::default()
        };
        let receipt = self.commit(batch).await?;
        receipt.invoice.ok_or_else(|| {
            StoreError::TransactionFailed("invoice was not created".to_string()).into()
        })
    }
}

const LAB_TEST_COLUMNS: &str =
    "id, patient_id, visit_id, test_name, status, price_cents, completed_at";

#[async_trait]
impl LabService for PostgreSQLAdapter {
    async fn list_lab_tests(
        &self,
        patient_id: &PatientId,
        visit_id: Option<&VisitId>,
    ) -> Result<Vec<LabTest>> {
        let sql = format!(
            "SELECT {LAB_TEST_COLUMNS} FROM lab_tests \
             WHERE patient_id = $1 AND ($2::text IS NULL OR visit_id = $2) \
             ORDER BY id"
        );
        let visit_id = visit_id.map(|id| id.as_str());
        self.client
            .query(&sql, &[&patient_id.as_str(), &visit_id])
            .await?
            .iter()
            .map(lab_test_from_row)
            .collect()
    }

    async fn get_lab_test(&self, id: &LabTestId) -> Result<Option<LabTest>> {
        let sql = format!("SELECT {LAB_TEST_COLUMNS} FROM lab_tests WHERE id = $1");
        self.client
            .query_opt(&sql, &[&id.as_str()])
            .await?
            .map(|row| lab_test_from_row(&row))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::visit::{Stage, VisitType};

    #[test]
    fn test_visit_params_match_columns() {
        let visit = Visit::builder(PatientId::new("pat-1").unwrap(), VisitType::Consultation)
            .build();
        let row = PostgreSQLVisit::from_domain(&visit).unwrap();
        assert_eq!(visit_params(&row).len(), visit_column_count());
        assert_eq!(visit_column_count(), 28);
        assert_eq!(visit_column_names().next(), Some("id"));
        assert_eq!(visit_column_names().last(), Some("version"));
        assert_eq!(Stage::DEPARTMENTS.len(), row.statuses.len());
    }

    #[test]
    fn test_backend_name() {
        let client = PostgreSQLClient::new(crate::config::PostgreSQLConfig {
            ssl_mode: "disable".to_string(),
            ..crate::config::PostgreSQLConfig::with_connection_string(
                crate::config::secret_string("postgresql://localhost/wardflow".to_string()),
            )
        })
        .unwrap();
        let adapter = PostgreSQLAdapter::new(client);
        assert_eq!(adapter.backend_name(), "postgresql");
    }
}
