//! Expediente management with reconciliation on every write

use crate::reconciliation::{ReconciliationEngine, ReconciliationReport};
use crate::traits::*;
use crate::types::*;

/// Expediente manager for handling document writes
///
/// Each write stores the expediente row and its reconciliation effects in one
/// commit. Clients never set `pago_docente_id`; it is carried over from the
/// stored row and changed only by the engine.
pub struct ExpedienteManager<S: SisconStorage + AcademicReference> {
    pub(crate) engine: ReconciliationEngine<S>,
    validator: Box<dyn ExpedienteValidator>,
}

impl<S: SisconStorage + AcademicReference> ExpedienteManager<S> {
    /// Create a new expediente manager
    pub fn new(storage: S) -> Self {
        Self {
            engine: ReconciliationEngine::new(storage),
            validator: Box::new(DefaultExpedienteValidator),
        }
    }

    /// Create a new expediente manager with custom validator
    pub fn with_validator(storage: S, validator: Box<dyn ExpedienteValidator>) -> Self {
        Self {
            engine: ReconciliationEngine::new(storage),
            validator,
        }
    }

    /// Record a new expediente
    pub async fn create_expediente(
        &mut self,
        input: NuevoExpediente,
    ) -> SisconResult<(Expediente, ReconciliationReport)> {
        self.validator.validate_expediente(&input)?;

        let expediente_id = self.engine.storage.allocate_expediente_id().await?;
        let mut expediente = Expediente::from_input(expediente_id, input);
        let report = self.engine.reconcile(&mut expediente, None).await?;

        Ok((expediente, report))
    }

    /// Get an expediente by ID
    pub async fn get_expediente(&self, expediente_id: ExpedienteId) -> SisconResult<Option<Expediente>> {
        self.engine.storage.get_expediente(expediente_id).await
    }

    /// Get an expediente by ID, returning an error if not found
    pub async fn get_expediente_required(&self, expediente_id: ExpedienteId) -> SisconResult<Expediente> {
        self.engine
            .storage
            .get_expediente(expediente_id)
            .await?
            .ok_or(SisconError::ExpedienteNotFound(expediente_id))
    }

    /// Edit an expediente and re-reconcile it against its previous link
    pub async fn update_expediente(
        &mut self,
        expediente_id: ExpedienteId,
        input: NuevoExpediente,
    ) -> SisconResult<(Expediente, ReconciliationReport)> {
        self.validator.validate_expediente(&input)?;

        let stored = self.get_expediente_required(expediente_id).await?;
        let previous = stored.pago_docente_id;
        let mut expediente = stored.clone();
        expediente.apply_input(input);

        let report = if stored.tipo_asunto == expediente.tipo_asunto {
            self.engine.reconcile(&mut expediente, previous).await?
        } else if stored.tipo_asunto == TipoAsunto::Conformidad {
            tracing::info!(
                %expediente_id,
                tipo_asunto = %expediente.tipo_asunto,
                "expediente is no longer a conformidad"
            );
            self.engine.unlink(&mut expediente, previous).await?
        } else {
            // A presentación link does not carry over to another subject.
            expediente.pago_docente_id = None;
            self.engine.reconcile(&mut expediente, None).await?
        };

        Ok((expediente, report))
    }

    /// Delete an expediente, releasing the payment it held
    pub async fn delete_expediente(
        &mut self,
        expediente_id: ExpedienteId,
    ) -> SisconResult<ReconciliationReport> {
        let stored = self.get_expediente_required(expediente_id).await?;
        self.engine.delete(&stored).await
    }
}
