//! Traits for storage abstraction and extensibility

use async_trait::async_trait;

use crate::reconciliation::plan::{CommitOutcome, WriteBatch};
use crate::types::*;

/// Storage abstraction for expedientes and payments
///
/// This trait allows the office core to work with any storage backend
/// (PostgreSQL, in-memory, etc.). Reads may be served from any snapshot;
/// every mutation goes through [`SisconStorage::commit`], which must apply a
/// whole batch atomically and check each payment write's state guard at
/// commit time.
#[async_trait]
pub trait SisconStorage: Send + Sync {
    /// Get an expediente by ID
    async fn get_expediente(&self, expediente_id: ExpedienteId) -> SisconResult<Option<Expediente>>;

    /// Reserve an ID for a new expediente
    async fn allocate_expediente_id(&mut self) -> SisconResult<ExpedienteId>;

    /// Get a payment by ID
    async fn get_pago(&self, pago_id: PagoId) -> SisconResult<Option<PagoDocente>>;

    /// List payments sharing a natural key, ordered by ID
    async fn find_pagos(&self, clave: &ClavePago) -> SisconResult<Vec<PagoDocente>>;

    /// Reserve an ID for a new payment
    async fn allocate_pago_id(&mut self) -> SisconResult<PagoId>;

    /// Apply a batch of writes as a single transaction
    async fn commit(&mut self, batch: &WriteBatch) -> SisconResult<CommitOutcome>;
}

/// Read-only academic reference data
#[async_trait]
pub trait AcademicReference: Send + Sync {
    /// Get a semester by ID
    async fn get_semestre(&self, semestre_id: SemestreId) -> SisconResult<Option<Semestre>>;

    /// Get a program by ID
    async fn get_programa(&self, programa_id: ProgramaId) -> SisconResult<Option<Programa>>;

    /// Resolve the period string of a semester through its program
    async fn resolve_periodo(&self, semestre_id: SemestreId) -> SisconResult<Option<String>> {
        let Some(semestre) = self.get_semestre(semestre_id).await? else {
            return Ok(None);
        };
        let Some(programa_id) = semestre.programa_id else {
            return Ok(None);
        };
        Ok(self
            .get_programa(programa_id)
            .await?
            .map(|programa| programa.periodo))
    }
}

/// Trait for implementing custom expediente validation rules
pub trait ExpedienteValidator: Send + Sync {
    /// Validate client input before it is stored or reconciled
    fn validate_expediente(&self, input: &NuevoExpediente) -> SisconResult<()>;
}

/// Trait for implementing custom payment validation rules
pub trait PagoValidator: Send + Sync {
    /// Validate a payment before registering it
    fn validate_pago(&self, input: &NuevoPago) -> SisconResult<()>;
}

/// Default expediente validator with basic rules
pub struct DefaultExpedienteValidator;

impl ExpedienteValidator for DefaultExpedienteValidator {
    fn validate_expediente(&self, input: &NuevoExpediente) -> SisconResult<()> {
        if input.numero_documento.trim().is_empty() {
            return Err(SisconError::Validation(
                "Document number cannot be empty".to_string(),
            ));
        }

        if input.tipo_asunto.is_reconcilable() {
            if input.docente_id.is_none() {
                return Err(SisconError::Validation(format!(
                    "A {} document must reference a teacher",
                    input.tipo_asunto
                )));
            }
            if input.curso_id.is_none() {
                return Err(SisconError::Validation(format!(
                    "A {} document must reference a course",
                    input.tipo_asunto
                )));
            }
            if input.semestre_id.is_none() {
                return Err(SisconError::Validation(format!(
                    "A {} document must reference a semester",
                    input.tipo_asunto
                )));
            }
        }

        Ok(())
    }
}

/// Default payment validator with basic rules
pub struct DefaultPagoValidator;

impl PagoValidator for DefaultPagoValidator {
    fn validate_pago(&self, input: &NuevoPago) -> SisconResult<()> {
        if input.clave.periodo.trim().is_empty() {
            return Err(SisconError::Validation(
                "Payment period cannot be empty".to_string(),
            ));
        }

        if input.importe < bigdecimal::BigDecimal::from(0) {
            return Err(SisconError::Validation(
                "Payment amount cannot be negative".to_string(),
            ));
        }

        Ok(())
    }
}
