//! Payment registration and out-of-engine status changes

use crate::reconciliation::plan::{CommitOutcome, ExpedienteWrite, PagoWrite, WriteBatch};
use crate::traits::*;
use crate::types::*;

/// Payment manager for handling payment operations
pub struct PagoManager<S: SisconStorage> {
    pub(crate) storage: S,
    validator: Box<dyn PagoValidator>,
}

impl<S: SisconStorage> PagoManager<S> {
    /// Create a new payment manager
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            validator: Box::new(DefaultPagoValidator),
        }
    }

    /// Create a new payment manager with custom validator
    pub fn with_validator(storage: S, validator: Box<dyn PagoValidator>) -> Self {
        Self { storage, validator }
    }

    /// Register a pending payment
    ///
    /// When `presentacion` names a presentación expediente, that expediente is
    /// linked to the new payment in the same commit; later edits of the
    /// presentación then flow onto this payment.
    pub async fn register_pago(
        &mut self,
        input: NuevoPago,
        presentacion: Option<ExpedienteId>,
    ) -> SisconResult<PagoDocente> {
        self.validator.validate_pago(&input)?;

        let expediente = match presentacion {
            Some(expediente_id) => Some(self.presentacion_to_link(expediente_id).await?),
            None => None,
        };

        let pago_id = self.storage.allocate_pago_id().await?;
        let pago = PagoDocente::new(pago_id, input);
        let mut batch = WriteBatch::new().pago(PagoWrite::Insert(pago.clone()));
        if let Some(mut expediente) = expediente {
            expediente.pago_docente_id = Some(pago_id);
            batch = batch.expediente(ExpedienteWrite::Save(expediente));
        }

        match self.storage.commit(&batch).await? {
            CommitOutcome::Committed { .. } => {
                tracing::info!(%pago_id, ?presentacion, periodo = %pago.periodo, "payment registered");
                Ok(pago)
            }
            CommitOutcome::Conflict { pago_id } => Err(SisconError::InvalidState(format!(
                "payment {} could not be registered",
                pago_id
            ))),
        }
    }

    /// Mark an `en_proceso` payment as paid
    pub async fn settle_pago(&mut self, pago_id: PagoId) -> SisconResult<PagoDocente> {
        let pago = self.get_pago_required(pago_id).await?;
        let batch = WriteBatch::new().pago(PagoWrite::Settle { pago_id });

        match self.storage.commit(&batch).await? {
            CommitOutcome::Committed { .. } => {
                tracing::info!(%pago_id, "payment settled");
                self.get_pago_required(pago_id).await
            }
            CommitOutcome::Conflict { .. } => Err(SisconError::InvalidState(format!(
                "payment {} is {} and cannot be settled",
                pago_id, pago.estado
            ))),
        }
    }

    /// Get a payment by ID
    pub async fn get_pago(&self, pago_id: PagoId) -> SisconResult<Option<PagoDocente>> {
        self.storage.get_pago(pago_id).await
    }

    /// Get a payment by ID, returning an error if not found
    pub async fn get_pago_required(&self, pago_id: PagoId) -> SisconResult<PagoDocente> {
        self.storage
            .get_pago(pago_id)
            .await?
            .ok_or(SisconError::PagoNotFound(pago_id))
    }

    /// List payments sharing a teacher, course and period
    pub async fn find_pagos(&self, clave: &ClavePago) -> SisconResult<Vec<PagoDocente>> {
        self.storage.find_pagos(clave).await
    }

    async fn presentacion_to_link(&self, expediente_id: ExpedienteId) -> SisconResult<Expediente> {
        let expediente = self
            .storage
            .get_expediente(expediente_id)
            .await?
            .ok_or(SisconError::ExpedienteNotFound(expediente_id))?;

        if expediente.tipo_asunto != TipoAsunto::Presentacion {
            return Err(SisconError::Validation(format!(
                "Expediente {} is a {} document, not a presentacion",
                expediente_id, expediente.tipo_asunto
            )));
        }
        if let Some(pago_id) = expediente.pago_docente_id {
            return Err(SisconError::Validation(format!(
                "Expediente {} is already linked to payment {}",
                expediente_id, pago_id
            )));
        }

        Ok(expediente)
    }
}
