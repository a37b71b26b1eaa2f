//! Reconciliation of expedientes against teacher payments
//!
//! A presentación copies its assignment data onto the payment it is already
//! linked to. A conformidad searches the pending payments sharing its
//! teacher, course and period for one with the same teaching dates, claims
//! it, and unwinds whatever payment it held before. Every decision is turned
//! into a [`WriteBatch`](plan::WriteBatch) that storage commits together with
//! the expediente row, so a link is never moved halfway.

pub mod matcher;
pub mod plan;

use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::traits::*;
use crate::types::*;
use matcher::schedules_match;
use plan::*;

/// Why reconciliation left payments untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The document's subject takes no part in reconciliation
    NotReconcilable,
    /// Teacher, course or semester is missing
    MissingAssignment,
    /// The semester or its program could not be loaded
    UnresolvedReference,
    /// A presentación without a linked payment
    NoLinkedPago,
    /// The linked payment is no longer pending
    PagoNotPending,
}

/// What a reconciliation run did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconciliationOutcome {
    /// A pending payment was claimed
    Linked { pago_id: PagoId },
    /// The link moved from one payment to another
    Relinked { from: PagoId, to: PagoId },
    /// The held payment still matches; its conformidad fields were re-stamped
    Refreshed { pago_id: PagoId },
    /// Nothing needed to change
    Unchanged { pago_id: Option<PagoId> },
    /// The previous link was dropped; `released` tells whether the payment went back to pending
    Unlinked { pago_id: PagoId, released: bool },
    /// No candidate matched and nothing was linked before
    NoMatch,
    /// Presentación data was copied onto the linked payment
    PresentacionApplied { pago_id: PagoId },
    /// Another request claimed the matched payment first; handled as no match
    ClaimLost {
        pago_id: PagoId,
        unlinked: Option<PagoId>,
    },
    /// Reconciliation did not run for this expediente
    Skipped(SkipReason),
}

/// Outcome of one run, tagged for the audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub run_id: Uuid,
    pub expediente_id: ExpedienteId,
    pub outcome: ReconciliationOutcome,
}

/// Planned reconciliation for one expediente write
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Apply {
        plan: ReconciliationPlan,
        expected: ReconciliationOutcome,
    },
    Skip(SkipReason),
}

/// Reconciliation engine
///
/// Planning only reads from storage; [`ReconciliationEngine::apply`] commits
/// the plan and the expediente row in one batch.
pub struct ReconciliationEngine<S: SisconStorage + AcademicReference> {
    pub(crate) storage: S,
}

impl<S: SisconStorage + AcademicReference> ReconciliationEngine<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Persist `expediente` and reconcile it according to its subject
    ///
    /// `previous` is the payment the stored expediente pointed to before this
    /// write, or `None` for a new document.
    pub async fn reconcile(
        &mut self,
        expediente: &mut Expediente,
        previous: Option<PagoId>,
    ) -> SisconResult<ReconciliationReport> {
        match expediente.tipo_asunto {
            TipoAsunto::Presentacion => self.reconcile_presentacion(expediente, previous).await,
            TipoAsunto::Conformidad => self.reconcile_conformidad(expediente, previous).await,
            _ => {
                self.apply(expediente, previous, Decision::Skip(SkipReason::NotReconcilable))
                    .await
            }
        }
    }

    /// Copy a presentación onto the payment it is linked to
    pub async fn reconcile_presentacion(
        &mut self,
        expediente: &mut Expediente,
        previous: Option<PagoId>,
    ) -> SisconResult<ReconciliationReport> {
        let decision = self.plan_presentacion(expediente, previous).await?;
        self.apply(expediente, previous, decision).await
    }

    /// Match a conformidad to a pending payment, moving the link if needed
    pub async fn reconcile_conformidad(
        &mut self,
        expediente: &mut Expediente,
        previous: Option<PagoId>,
    ) -> SisconResult<ReconciliationReport> {
        let decision = self.plan_conformidad(expediente, previous).await?;
        self.apply(expediente, previous, decision).await
    }

    /// Drop the payment link of an expediente that stopped being a conformidad
    pub async fn unlink(
        &mut self,
        expediente: &mut Expediente,
        previous: Option<PagoId>,
    ) -> SisconResult<ReconciliationReport> {
        let decision = match previous {
            Some(pago_id) => {
                let release = self.release_of(pago_id).await?;
                Decision::Apply {
                    expected: ReconciliationOutcome::Unlinked {
                        pago_id,
                        released: release.is_some(),
                    },
                    plan: ReconciliationPlan {
                        pagos: release.into_iter().collect(),
                        link: LinkChange::Clear,
                    },
                }
            }
            None => Decision::Skip(SkipReason::NotReconcilable),
        };
        self.apply(expediente, previous, decision).await
    }

    /// Remove an expediente, releasing the payment its conformidad held
    pub async fn delete(&mut self, expediente: &Expediente) -> SisconResult<ReconciliationReport> {
        let run_id = Uuid::new_v4();
        let mut batch = WriteBatch::new().expediente(ExpedienteWrite::Delete(expediente.id));
        let mut outcome = ReconciliationOutcome::Skipped(SkipReason::NotReconcilable);

        if expediente.tipo_asunto == TipoAsunto::Conformidad {
            outcome = ReconciliationOutcome::NoMatch;
            if let Some(pago_id) = expediente.pago_docente_id {
                let release = self.release_of(pago_id).await?;
                outcome = ReconciliationOutcome::Unlinked {
                    pago_id,
                    released: release.is_some(),
                };
                batch.pagos.extend(release);
            }
        }

        let span = tracing::info_span!("delete_expediente", %run_id, expediente_id = %expediente.id);
        let skipped = self.commit_required(&batch).instrument(span.clone()).await?;
        let outcome = settle_outcome(outcome, &skipped);
        span.in_scope(|| tracing::info!(?outcome, "expediente deleted"));
        Ok(ReconciliationReport {
            run_id,
            expediente_id: expediente.id,
            outcome,
        })
    }

    /// Decide what a presentación changes, without writing anything
    pub async fn plan_presentacion(
        &self,
        expediente: &Expediente,
        previous: Option<PagoId>,
    ) -> SisconResult<Decision> {
        let Some(pago_id) = previous else {
            return Ok(Decision::Skip(SkipReason::NoLinkedPago));
        };
        let Some(clave) = self.clave_of(expediente).await? else {
            return Ok(Decision::Skip(self.skip_reason_for(expediente)));
        };
        let Some(pago) = self.storage.get_pago(pago_id).await? else {
            tracing::warn!(%pago_id, expediente_id = %expediente.id, "linked payment no longer exists");
            return Ok(Decision::Skip(SkipReason::NoLinkedPago));
        };
        if pago.estado != EstadoPago::Pendiente {
            tracing::debug!(%pago_id, estado = %pago.estado, "linked payment is not pending");
            return Ok(Decision::Skip(SkipReason::PagoNotPending));
        }

        let datos = DatosPresentacion {
            clave,
            fechas_ensenanza: expediente.fechas_ensenanza.clone(),
            oficio_facultad: expediente.numero_documento.clone(),
            oficio_coordinador: expediente.numero_oficio_presentacion_coordinador.clone(),
        };
        Ok(Decision::Apply {
            plan: ReconciliationPlan {
                pagos: vec![PagoWrite::Present { pago_id, datos }],
                link: LinkChange::Keep,
            },
            expected: ReconciliationOutcome::PresentacionApplied { pago_id },
        })
    }

    /// Decide what a conformidad changes, without writing anything
    pub async fn plan_conformidad(
        &self,
        expediente: &Expediente,
        previous: Option<PagoId>,
    ) -> SisconResult<Decision> {
        let Some(clave) = self.clave_of(expediente).await? else {
            return Ok(Decision::Skip(self.skip_reason_for(expediente)));
        };

        let candidatos = self.storage.find_pagos(&clave).await?;
        tracing::debug!(
            expediente_id = %expediente.id,
            candidatos = candidatos.len(),
            periodo = %clave.periodo,
            "searching payments"
        );

        let matches = |pago: &&PagoDocente| {
            schedules_match(&pago.fechas_ensenanza, &expediente.fechas_ensenanza)
        };
        // A payment this expediente already holds wins over pending ones.
        let held = candidatos
            .iter()
            .filter(|pago| Some(pago.id) == previous && pago.estado == EstadoPago::EnProceso)
            .find(matches);
        let matched = held.or_else(|| {
            candidatos
                .iter()
                .filter(|pago| pago.estado == EstadoPago::Pendiente)
                .find(matches)
        });

        let oficios = OficiosConformidad {
            direccion: expediente.numero_documento.clone(),
            coordinador: expediente.numero_oficio_conformidad_coordinador.clone(),
        };

        let decision = match (matched, previous) {
            (Some(pago), Some(anterior))
                if pago.id == anterior && pago.estado == EstadoPago::EnProceso =>
            {
                let current = OficiosConformidad {
                    direccion: pago.numero_oficio_conformidad_direccion.clone().unwrap_or_default(),
                    coordinador: pago.numero_oficio_conformidad_coordinador.clone(),
                };
                if current == oficios {
                    Decision::Apply {
                        plan: ReconciliationPlan::unchanged(),
                        expected: ReconciliationOutcome::Unchanged {
                            pago_id: Some(pago.id),
                        },
                    }
                } else {
                    Decision::Apply {
                        plan: ReconciliationPlan {
                            pagos: vec![PagoWrite::Restamp {
                                pago_id: pago.id,
                                oficios,
                            }],
                            link: LinkChange::Keep,
                        },
                        expected: ReconciliationOutcome::Refreshed { pago_id: pago.id },
                    }
                }
            }
            (Some(pago), anterior) => {
                let mut pagos = Vec::new();
                let mut expected = ReconciliationOutcome::Linked { pago_id: pago.id };
                if let Some(anterior) = anterior {
                    if let Some(release) = self.release_of(anterior).await? {
                        pagos.push(release);
                        expected = ReconciliationOutcome::Relinked {
                            from: anterior,
                            to: pago.id,
                        };
                    }
                }
                pagos.push(PagoWrite::Claim {
                    pago_id: pago.id,
                    oficios,
                });
                Decision::Apply {
                    plan: ReconciliationPlan {
                        pagos,
                        link: LinkChange::Set(pago.id),
                    },
                    expected,
                }
            }
            (None, Some(anterior)) => {
                let release = self.release_of(anterior).await?;
                Decision::Apply {
                    expected: ReconciliationOutcome::Unlinked {
                        pago_id: anterior,
                        released: release.is_some(),
                    },
                    plan: ReconciliationPlan {
                        pagos: release.into_iter().collect(),
                        link: LinkChange::Clear,
                    },
                }
            }
            (None, None) => Decision::Apply {
                plan: ReconciliationPlan {
                    pagos: Vec::new(),
                    link: LinkChange::Clear,
                },
                expected: ReconciliationOutcome::NoMatch,
            },
        };
        Ok(decision)
    }

    /// Commit a decision together with the expediente row
    ///
    /// A lost claim is retried once as if no candidate had matched; any other
    /// failure leaves storage exactly as it was.
    pub async fn apply(
        &mut self,
        expediente: &mut Expediente,
        previous: Option<PagoId>,
        decision: Decision,
    ) -> SisconResult<ReconciliationReport> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "reconcile",
            %run_id,
            expediente_id = %expediente.id,
            tipo_asunto = %expediente.tipo_asunto
        );
        let outcome = self
            .commit_decision(expediente, previous, decision)
            .instrument(span)
            .await?;
        Ok(ReconciliationReport {
            run_id,
            expediente_id: expediente.id,
            outcome,
        })
    }

    async fn commit_decision(
        &mut self,
        expediente: &mut Expediente,
        previous: Option<PagoId>,
        decision: Decision,
    ) -> SisconResult<ReconciliationOutcome> {
        let (plan, expected) = match decision {
            Decision::Apply { plan, expected } => (plan, expected),
            Decision::Skip(reason) => {
                if reason == SkipReason::UnresolvedReference {
                    tracing::warn!(semestre_id = ?expediente.semestre_id, "semester or program could not be resolved");
                }
                (
                    ReconciliationPlan::unchanged(),
                    ReconciliationOutcome::Skipped(reason),
                )
            }
        };

        let batch = plan.clone().into_batch(expediente.clone());
        let outcome = match self.storage.commit(&batch).await? {
            CommitOutcome::Committed { skipped, .. } => {
                expediente.pago_docente_id = plan.link.resolve(expediente.pago_docente_id);
                settle_outcome(expected, &skipped)
            }
            CommitOutcome::Conflict { pago_id } => {
                tracing::warn!(%pago_id, "payment was claimed by another request");
                let fallback = plan.without_claim();
                let batch = fallback.clone().into_batch(expediente.clone());
                let skipped = self.commit_required(&batch).await?;
                expediente.pago_docente_id = fallback.link.resolve(expediente.pago_docente_id);
                let unlinked = fallback
                    .released()
                    .filter(|anterior| !skipped.contains(anterior));
                ReconciliationOutcome::ClaimLost { pago_id, unlinked }
            }
        };

        tracing::info!(?outcome, pago_docente_id = ?expediente.pago_docente_id, "reconciled");
        Ok(outcome)
    }

    /// Commit a batch that carries no aborting guard, returning the skipped writes
    async fn commit_required(&mut self, batch: &WriteBatch) -> SisconResult<Vec<PagoId>> {
        match self.storage.commit(batch).await? {
            CommitOutcome::Committed { skipped, .. } => Ok(skipped),
            CommitOutcome::Conflict { pago_id } => Err(SisconError::InvalidState(format!(
                "payment {} changed while committing",
                pago_id
            ))),
        }
    }

    async fn clave_of(&self, expediente: &Expediente) -> SisconResult<Option<ClavePago>> {
        let (Some(docente_id), Some(curso_id), Some(semestre_id)) = (
            expediente.docente_id,
            expediente.curso_id,
            expediente.semestre_id,
        ) else {
            return Ok(None);
        };
        Ok(self
            .storage
            .resolve_periodo(semestre_id)
            .await?
            .map(|periodo| ClavePago {
                docente_id,
                curso_id,
                periodo,
            }))
    }

    fn skip_reason_for(&self, expediente: &Expediente) -> SkipReason {
        if expediente.docente_id.is_none()
            || expediente.curso_id.is_none()
            || expediente.semestre_id.is_none()
        {
            SkipReason::MissingAssignment
        } else {
            SkipReason::UnresolvedReference
        }
    }

    /// Release write for a payment, only when it is `en_proceso`
    async fn release_of(&self, pago_id: PagoId) -> SisconResult<Option<PagoWrite>> {
        match self.storage.get_pago(pago_id).await? {
            Some(pago) if pago.estado == EstadoPago::EnProceso => {
                Ok(Some(PagoWrite::Release { pago_id }))
            }
            Some(pago) => {
                tracing::debug!(%pago_id, estado = %pago.estado, "previous payment left as is");
                Ok(None)
            }
            None => {
                tracing::warn!(%pago_id, "previously linked payment no longer exists");
                Ok(None)
            }
        }
    }
}

/// Adjust the expected outcome for guarded writes storage skipped
fn settle_outcome(expected: ReconciliationOutcome, skipped: &[PagoId]) -> ReconciliationOutcome {
    let was_skipped = |pago_id: &PagoId| skipped.contains(pago_id);
    match expected {
        ReconciliationOutcome::Relinked { from, to } if was_skipped(&from) => {
            ReconciliationOutcome::Linked { pago_id: to }
        }
        ReconciliationOutcome::Unlinked { pago_id, released } => ReconciliationOutcome::Unlinked {
            pago_id,
            released: released && !was_skipped(&pago_id),
        },
        ReconciliationOutcome::Refreshed { pago_id } if was_skipped(&pago_id) => {
            ReconciliationOutcome::Unchanged {
                pago_id: Some(pago_id),
            }
        }
        ReconciliationOutcome::PresentacionApplied { pago_id } if was_skipped(&pago_id) => {
            ReconciliationOutcome::Skipped(SkipReason::PagoNotPending)
        }
        other => other,
    }
}
