//! Write batches produced by reconciliation and committed atomically by storage

use serde::{Deserialize, Serialize};

use crate::types::*;

/// A single payment mutation, guarded by the payment's current state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PagoWrite {
    /// Insert a new pending payment
    Insert(PagoDocente),
    /// Copy presentación data onto a pending payment
    Present {
        pago_id: PagoId,
        datos: DatosPresentacion,
    },
    /// Stamp conformidad fields on a pending payment and move it to `en_proceso`
    Claim {
        pago_id: PagoId,
        oficios: OficiosConformidad,
    },
    /// Re-stamp conformidad fields on a payment this expediente already holds
    Restamp {
        pago_id: PagoId,
        oficios: OficiosConformidad,
    },
    /// Clear conformidad fields and return an `en_proceso` payment to `pendiente`
    Release { pago_id: PagoId },
    /// Mark an `en_proceso` payment as paid
    Settle { pago_id: PagoId },
}

impl PagoWrite {
    pub fn pago_id(&self) -> PagoId {
        match self {
            PagoWrite::Insert(pago) => pago.id,
            PagoWrite::Present { pago_id, .. }
            | PagoWrite::Claim { pago_id, .. }
            | PagoWrite::Restamp { pago_id, .. }
            | PagoWrite::Release { pago_id }
            | PagoWrite::Settle { pago_id } => *pago_id,
        }
    }

    /// State the payment must be in for the write to apply
    pub fn expected_estado(&self) -> Option<EstadoPago> {
        match self {
            PagoWrite::Insert(_) => None,
            PagoWrite::Present { .. } | PagoWrite::Claim { .. } => Some(EstadoPago::Pendiente),
            PagoWrite::Restamp { .. } | PagoWrite::Release { .. } | PagoWrite::Settle { .. } => {
                Some(EstadoPago::EnProceso)
            }
        }
    }

    /// Whether a failed guard aborts the whole batch instead of skipping this write
    pub fn aborts_on_conflict(&self) -> bool {
        matches!(self, PagoWrite::Claim { .. } | PagoWrite::Settle { .. })
    }

    /// Apply the mutation to an in-memory row whose guard already passed
    pub fn apply_to(&self, pago: &mut PagoDocente) {
        match self {
            PagoWrite::Insert(nuevo) => *pago = nuevo.clone(),
            PagoWrite::Present { datos, .. } => pago.present(datos),
            PagoWrite::Claim { oficios, .. } | PagoWrite::Restamp { oficios, .. } => {
                pago.claim(oficios)
            }
            PagoWrite::Release { .. } => pago.release(),
            PagoWrite::Settle { .. } => pago.settle(),
        }
    }
}

/// Expediente row mutation committed alongside the payment writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExpedienteWrite {
    Save(Expediente),
    Delete(ExpedienteId),
}

/// Everything one request changes; storage commits all of it or none of it
///
/// Payment writes are applied in order, then the expediente write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    pub pagos: Vec<PagoWrite>,
    pub expediente: Option<ExpedienteWrite>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pago(mut self, write: PagoWrite) -> Self {
        self.pagos.push(write);
        self
    }

    pub fn expediente(mut self, write: ExpedienteWrite) -> Self {
        self.expediente = Some(write);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pagos.is_empty() && self.expediente.is_none()
    }
}

/// Result of committing a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitOutcome {
    /// Every write was committed; guarded writes whose state no longer held were skipped
    Committed {
        applied: Vec<PagoId>,
        skipped: Vec<PagoId>,
    },
    /// An aborting guard failed; nothing was committed
    Conflict { pago_id: PagoId },
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed { .. })
    }
}

/// How reconciliation changes the expediente's payment back-reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkChange {
    Keep,
    Set(PagoId),
    Clear,
}

impl LinkChange {
    pub fn resolve(self, current: Option<PagoId>) -> Option<PagoId> {
        match self {
            LinkChange::Keep => current,
            LinkChange::Set(pago_id) => Some(pago_id),
            LinkChange::Clear => None,
        }
    }
}

/// Payment writes and link change decided for one expediente
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationPlan {
    pub pagos: Vec<PagoWrite>,
    pub link: LinkChange,
}

impl ReconciliationPlan {
    /// Leaves payments and link untouched
    pub fn unchanged() -> Self {
        Self {
            pagos: Vec::new(),
            link: LinkChange::Keep,
        }
    }

    /// The payment this plan claims, if any
    pub fn claimed(&self) -> Option<PagoId> {
        self.pagos.iter().find_map(|write| match write {
            PagoWrite::Claim { pago_id, .. } => Some(*pago_id),
            _ => None,
        })
    }

    /// The payment this plan releases, if any
    pub fn released(&self) -> Option<PagoId> {
        self.pagos.iter().find_map(|write| match write {
            PagoWrite::Release { pago_id } => Some(*pago_id),
            _ => None,
        })
    }

    /// Same plan with its claim dropped, as if no candidate had matched
    pub fn without_claim(mut self) -> Self {
        if self.claimed().is_some() {
            self.pagos
                .retain(|write| !matches!(write, PagoWrite::Claim { .. }));
            self.link = LinkChange::Clear;
        }
        self
    }

    /// Batch committing this plan together with the expediente row
    pub fn into_batch(self, mut expediente: Expediente) -> WriteBatch {
        expediente.pago_docente_id = self.link.resolve(expediente.pago_docente_id);
        WriteBatch {
            pagos: self.pagos,
            expediente: Some(ExpedienteWrite::Save(expediente)),
        }
    }
}
