//! Main office orchestrator that coordinates expedientes and payments

use crate::office::{ExpedienteManager, PagoManager};
use crate::reconciliation::ReconciliationReport;
use crate::traits::*;
use crate::types::*;

/// Office records: expedientes, payments and the reconciliation between them
pub struct Office<S: SisconStorage + AcademicReference> {
    expediente_manager: ExpedienteManager<S>,
    pago_manager: PagoManager<S>,
}

impl<S: SisconStorage + AcademicReference + Clone> Office<S> {
    /// Create a new office with the given storage backend
    pub fn new(storage: S) -> Self {
        Self {
            expediente_manager: ExpedienteManager::new(storage.clone()),
            pago_manager: PagoManager::new(storage),
        }
    }

    /// Create a new office with custom validators
    pub fn with_validators(
        storage: S,
        expediente_validator: Box<dyn ExpedienteValidator>,
        pago_validator: Box<dyn PagoValidator>,
    ) -> Self {
        Self {
            expediente_manager: ExpedienteManager::with_validator(
                storage.clone(),
                expediente_validator,
            ),
            pago_manager: PagoManager::with_validator(storage, pago_validator),
        }
    }

    // Expediente operations
    /// Record a new expediente and reconcile it
    pub async fn create_expediente(
        &mut self,
        input: NuevoExpediente,
    ) -> SisconResult<(Expediente, ReconciliationReport)> {
        self.expediente_manager.create_expediente(input).await
    }

    /// Edit an expediente and reconcile it again
    pub async fn update_expediente(
        &mut self,
        expediente_id: ExpedienteId,
        input: NuevoExpediente,
    ) -> SisconResult<(Expediente, ReconciliationReport)> {
        self.expediente_manager
            .update_expediente(expediente_id, input)
            .await
    }

    /// Delete an expediente
    pub async fn delete_expediente(
        &mut self,
        expediente_id: ExpedienteId,
    ) -> SisconResult<ReconciliationReport> {
        self.expediente_manager.delete_expediente(expediente_id).await
    }

    /// Get an expediente by ID
    pub async fn get_expediente(&self, expediente_id: ExpedienteId) -> SisconResult<Option<Expediente>> {
        self.expediente_manager.get_expediente(expediente_id).await
    }

    // Payment operations
    /// Register a pending payment, optionally linked to a presentación
    pub async fn register_pago(
        &mut self,
        input: NuevoPago,
        presentacion: Option<ExpedienteId>,
    ) -> SisconResult<PagoDocente> {
        self.pago_manager.register_pago(input, presentacion).await
    }

    /// Mark a payment in process as paid
    pub async fn settle_pago(&mut self, pago_id: PagoId) -> SisconResult<PagoDocente> {
        self.pago_manager.settle_pago(pago_id).await
    }

    /// Get a payment by ID
    pub async fn get_pago(&self, pago_id: PagoId) -> SisconResult<Option<PagoDocente>> {
        self.pago_manager.get_pago(pago_id).await
    }

    /// Get a payment by ID, returning an error if not found
    pub async fn get_pago_required(&self, pago_id: PagoId) -> SisconResult<PagoDocente> {
        self.pago_manager.get_pago_required(pago_id).await
    }

    /// List payments sharing a teacher, course and period
    pub async fn find_pagos(&self, clave: &ClavePago) -> SisconResult<Vec<PagoDocente>> {
        self.pago_manager.find_pagos(clave).await
    }

    /// Check that every conformidad link points at a payment in process
    ///
    /// Returns one line per expediente whose link is inconsistent.
    pub async fn audit_links(&self, expediente_ids: &[ExpedienteId]) -> SisconResult<Vec<String>> {
        let mut issues = Vec::new();
        for &expediente_id in expediente_ids {
            let Some(expediente) = self.get_expediente(expediente_id).await? else {
                continue;
            };
            if expediente.tipo_asunto != TipoAsunto::Conformidad {
                continue;
            }
            let Some(pago_id) = expediente.pago_docente_id else {
                continue;
            };
            match self.get_pago(pago_id).await? {
                None => issues.push(format!(
                    "expediente {} links missing payment {}",
                    expediente_id, pago_id
                )),
                Some(pago) if pago.estado == EstadoPago::Pendiente => issues.push(format!(
                    "expediente {} links payment {} which is still pending",
                    expediente_id, pago_id
                )),
                Some(pago)
                    if pago.numero_oficio_conformidad_direccion.as_deref()
                        != Some(expediente.numero_documento.as_str()) =>
                {
                    issues.push(format!(
                        "payment {} carries conformidad {:?}, expediente {} is {}",
                        pago_id,
                        pago.numero_oficio_conformidad_direccion,
                        expediente_id,
                        expediente.numero_documento
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(issues)
    }
}
