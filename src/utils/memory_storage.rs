//! In-memory storage implementation for testing

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use crate::reconciliation::plan::{CommitOutcome, ExpedienteWrite, PagoWrite, WriteBatch};
use crate::traits::*;
use crate::types::*;

/// Write at which the next commit fails, for exercising rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    PagoWrite(PagoId),
    ExpedienteWrite,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    expedientes: HashMap<ExpedienteId, Expediente>,
    pagos: BTreeMap<PagoId, PagoDocente>,
    semestres: HashMap<SemestreId, Semestre>,
    programas: HashMap<ProgramaId, Programa>,
    last_expediente_id: i64,
    last_pago_id: i64,
}

/// In-memory storage implementation for testing and development
///
/// Clones share the same tables. A commit is applied to a staged copy of the
/// tables and swapped in only once every write succeeded, all under one
/// write lock, so payment state guards are checked atomically.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<RwLock<Tables>>,
    fault: Arc<Mutex<Option<Fault>>>,
}

fn poisoned<T>(_: T) -> SisconError {
    SisconError::Storage("memory storage lock poisoned".to_string())
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) -> SisconResult<()> {
        *self.tables.write().map_err(poisoned)? = Tables::default();
        Ok(())
    }

    /// Make the next commit fail when it reaches `fault`
    pub fn inject_fault(&self, fault: Fault) -> SisconResult<()> {
        *self.fault.lock().map_err(poisoned)? = Some(fault);
        Ok(())
    }

    /// Seed a program
    pub fn add_programa(&self, programa: Programa) -> SisconResult<()> {
        self.tables
            .write()
            .map_err(poisoned)?
            .programas
            .insert(programa.id, programa);
        Ok(())
    }

    /// Seed a semester
    pub fn add_semestre(&self, semestre: Semestre) -> SisconResult<()> {
        self.tables
            .write()
            .map_err(poisoned)?
            .semestres
            .insert(semestre.id, semestre);
        Ok(())
    }

    /// All payments, ordered by ID
    pub fn list_pagos(&self) -> SisconResult<Vec<PagoDocente>> {
        Ok(self
            .tables
            .read()
            .map_err(poisoned)?
            .pagos
            .values()
            .cloned()
            .collect())
    }
}

fn apply_pago_write(
    pagos: &mut BTreeMap<PagoId, PagoDocente>,
    write: &PagoWrite,
) -> SisconResult<bool> {
    if let PagoWrite::Insert(pago) = write {
        if pagos.contains_key(&pago.id) {
            return Err(SisconError::Storage(format!(
                "payment {} already exists",
                pago.id
            )));
        }
        pagos.insert(pago.id, pago.clone());
        return Ok(true);
    }

    let Some(pago) = pagos.get_mut(&write.pago_id()) else {
        return Ok(false);
    };
    if write.expected_estado().is_some_and(|estado| estado != pago.estado) {
        return Ok(false);
    }
    write.apply_to(pago);
    Ok(true)
}

#[async_trait]
impl SisconStorage for MemoryStorage {
    async fn get_expediente(&self, expediente_id: ExpedienteId) -> SisconResult<Option<Expediente>> {
        Ok(self
            .tables
            .read()
            .map_err(poisoned)?
            .expedientes
            .get(&expediente_id)
            .cloned())
    }

    async fn allocate_expediente_id(&mut self) -> SisconResult<ExpedienteId> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        tables.last_expediente_id += 1;
        Ok(ExpedienteId(tables.last_expediente_id))
    }

    async fn get_pago(&self, pago_id: PagoId) -> SisconResult<Option<PagoDocente>> {
        Ok(self
            .tables
            .read()
            .map_err(poisoned)?
            .pagos
            .get(&pago_id)
            .cloned())
    }

    async fn find_pagos(&self, clave: &ClavePago) -> SisconResult<Vec<PagoDocente>> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables
            .pagos
            .values()
            .filter(|pago| {
                pago.docente_id == clave.docente_id
                    && pago.curso_id == clave.curso_id
                    && pago.periodo == clave.periodo
            })
            .cloned()
            .collect())
    }

    async fn allocate_pago_id(&mut self) -> SisconResult<PagoId> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        tables.last_pago_id += 1;
        Ok(PagoId(tables.last_pago_id))
    }

    async fn commit(&mut self, batch: &WriteBatch) -> SisconResult<CommitOutcome> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let fault = self.fault.lock().map_err(poisoned)?.take();
        let mut staged = tables.clone();
        let mut applied = Vec::new();
        let mut skipped = Vec::new();

        for write in &batch.pagos {
            let pago_id = write.pago_id();
            if fault == Some(Fault::PagoWrite(pago_id)) {
                return Err(SisconError::Storage(format!(
                    "injected fault writing payment {}",
                    pago_id
                )));
            }
            if apply_pago_write(&mut staged.pagos, write)? {
                applied.push(pago_id);
            } else if write.aborts_on_conflict() {
                return Ok(CommitOutcome::Conflict { pago_id });
            } else {
                skipped.push(pago_id);
            }
        }

        if let Some(write) = &batch.expediente {
            if fault == Some(Fault::ExpedienteWrite) {
                return Err(SisconError::Storage(
                    "injected fault writing expediente".to_string(),
                ));
            }
            match write {
                ExpedienteWrite::Save(expediente) => {
                    staged
                        .expedientes
                        .insert(expediente.id, expediente.clone());
                }
                ExpedienteWrite::Delete(expediente_id) => {
                    if staged.expedientes.remove(expediente_id).is_none() {
                        return Err(SisconError::ExpedienteNotFound(*expediente_id));
                    }
                }
            }
        }

        *tables = staged;
        Ok(CommitOutcome::Committed { applied, skipped })
    }
}

#[async_trait]
impl AcademicReference for MemoryStorage {
    async fn get_semestre(&self, semestre_id: SemestreId) -> SisconResult<Option<Semestre>> {
        Ok(self
            .tables
            .read()
            .map_err(poisoned)?
            .semestres
            .get(&semestre_id)
            .cloned())
    }

    async fn get_programa(&self, programa_id: ProgramaId) -> SisconResult<Option<Programa>> {
        Ok(self
            .tables
            .read()
            .map_err(poisoned)?
            .programas
            .get(&programa_id)
            .cloned())
    }
}
