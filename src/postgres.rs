//! Postgres-backed storage implementation.
//!
//! Every [`WriteBatch`] runs inside one transaction. Payment writes are
//! conditional updates guarded on `estado`: when a claim or a settlement
//! affects zero rows, another transaction got there first, the transaction is
//! rolled back and [`CommitOutcome::Conflict`] is returned. Guarded writes
//! that merely skip (releases, presentaciones) leave the transaction open.
//!
//! The guard normalizes the stored `estado` the same way [`EstadoPago::from`]
//! does on read, so legacy spellings such as `'En Proceso'` are guarded as
//! `en_proceso`.
//!
//! Teaching dates are stored as JSONB and decoded through
//! [`FechasEnsenanza::from_value`], so legacy rows holding an encoded string
//! are read the same way as proper arrays.

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use crate::config::SisconConfig;
use crate::reconciliation::matcher::FechasEnsenanza;
use crate::reconciliation::plan::{CommitOutcome, ExpedienteWrite, PagoWrite, WriteBatch};
use crate::traits::*;
use crate::types::*;

/// Schema applied by [`PgStorage::ensure_schema`]
pub const SCHEMA: &str = include_str!("../migrations/0001_siscon.sql");

const PAGO_COLUMNS: &str = "id, docente_id, curso_id, periodo, fechas_ensenanza, estado, \
     numero_oficio_presentacion_facultad, numero_oficio_presentacion_coordinador, \
     numero_oficio_conformidad_direccion, numero_oficio_conformidad_coordinador, \
     importe, numero_resolucion, observaciones, created_at, updated_at";

const EXPEDIENTE_COLUMNS: &str = "id, tipo_asunto, docente_id, curso_id, semestre_id, \
     fechas_ensenanza, numero_documento, numero_oficio_presentacion_coordinador, \
     numero_oficio_conformidad_coordinador, pago_docente_id, asunto, created_at, updated_at";

/// Conditional payment update; `$1` is the id, `$2` the expected `estado`
macro_rules! guarded_update {
    ($set:literal) => {
        concat!(
            "UPDATE pagos_docentes SET ",
            $set,
            ", updated_at = NOW() WHERE id = $1 AND replace(lower(trim(estado)), ' ', '_') = $2"
        )
    };
}

const PRESENT_SQL: &str = guarded_update!(
    "docente_id = $3, curso_id = $4, periodo = $5, fechas_ensenanza = $6, \
     numero_oficio_presentacion_facultad = $7, numero_oficio_presentacion_coordinador = $8"
);
const STAMP_SQL: &str = guarded_update!(
    "numero_oficio_conformidad_direccion = $3, numero_oficio_conformidad_coordinador = $4, \
     estado = 'en_proceso'"
);
const RELEASE_SQL: &str = guarded_update!(
    "numero_oficio_conformidad_direccion = NULL, numero_oficio_conformidad_coordinador = NULL, \
     estado = 'pendiente'"
);
const SETTLE_SQL: &str = guarded_update!("estado = 'pagado'");

/// Postgres-backed storage
///
/// Cloning shares the connection pool.
#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

fn map_sqlx_error(operation: &str, error: sqlx::Error) -> SisconError {
    SisconError::Storage(format!("{}: {}", operation, error))
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the configured database URL
    pub async fn connect(config: &SisconConfig) -> SisconResult<Self> {
        let url = config.database_url.as_deref().ok_or_else(|| {
            SisconError::Configuration("a database URL is required for PgStorage".to_string())
        })?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist
    pub async fn ensure_schema(&self) -> SisconResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn next_id(&self, table: &str) -> SisconResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT nextval(pg_get_serial_sequence($1, 'id'))")
            .bind(table)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("allocate_id", e))
    }
}

fn pago_from_row(row: &PgRow) -> Result<PagoDocente, sqlx::Error> {
    let fechas: serde_json::Value = row.try_get("fechas_ensenanza")?;
    let estado: String = row.try_get("estado")?;
    Ok(PagoDocente {
        id: PagoId(row.try_get("id")?),
        docente_id: DocenteId(row.try_get("docente_id")?),
        curso_id: CursoId(row.try_get("curso_id")?),
        periodo: row.try_get("periodo")?,
        fechas_ensenanza: FechasEnsenanza::from_value(&fechas),
        estado: EstadoPago::from(estado),
        numero_oficio_presentacion_facultad: row.try_get("numero_oficio_presentacion_facultad")?,
        numero_oficio_presentacion_coordinador: row
            .try_get("numero_oficio_presentacion_coordinador")?,
        numero_oficio_conformidad_direccion: row.try_get("numero_oficio_conformidad_direccion")?,
        numero_oficio_conformidad_coordinador: row
            .try_get("numero_oficio_conformidad_coordinador")?,
        importe: row.try_get("importe")?,
        numero_resolucion: row.try_get("numero_resolucion")?,
        observaciones: row.try_get("observaciones")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn expediente_from_row(row: &PgRow) -> Result<Expediente, sqlx::Error> {
    let fechas: serde_json::Value = row.try_get("fechas_ensenanza")?;
    let tipo_asunto: String = row.try_get("tipo_asunto")?;
    Ok(Expediente {
        id: ExpedienteId(row.try_get("id")?),
        tipo_asunto: TipoAsunto::from(tipo_asunto),
        docente_id: row.try_get::<Option<i64>, _>("docente_id")?.map(DocenteId),
        curso_id: row.try_get::<Option<i64>, _>("curso_id")?.map(CursoId),
        semestre_id: row.try_get::<Option<i64>, _>("semestre_id")?.map(SemestreId),
        fechas_ensenanza: FechasEnsenanza::from_value(&fechas),
        numero_documento: row.try_get("numero_documento")?,
        numero_oficio_presentacion_coordinador: row
            .try_get("numero_oficio_presentacion_coordinador")?,
        numero_oficio_conformidad_coordinador: row
            .try_get("numero_oficio_conformidad_coordinador")?,
        pago_docente_id: row.try_get::<Option<i64>, _>("pago_docente_id")?.map(PagoId),
        asunto: row.try_get("asunto")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Run one guarded payment write, returning the number of rows it touched
async fn execute_pago_write(
    tx: &mut Transaction<'_, Postgres>,
    write: &PagoWrite,
) -> Result<u64, sqlx::Error> {
    let pago_id = write.pago_id().0;
    let expected = write
        .expected_estado()
        .map(String::from)
        .unwrap_or_default();

    let result = match write {
        PagoWrite::Insert(pago) => {
            sqlx::query(
                r#"
                INSERT INTO pagos_docentes (
                    id, docente_id, curso_id, periodo, fechas_ensenanza, estado,
                    importe, numero_resolucion, observaciones, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(pago_id)
            .bind(pago.docente_id.0)
            .bind(pago.curso_id.0)
            .bind(&pago.periodo)
            .bind(pago.fechas_ensenanza.to_value())
            .bind(pago.estado.as_str())
            .bind(&pago.importe)
            .bind(&pago.numero_resolucion)
            .bind(&pago.observaciones)
            .bind(pago.created_at)
            .bind(pago.updated_at)
            .execute(&mut **tx)
            .await?
        }
        PagoWrite::Present { datos, .. } => {
            sqlx::query(PRESENT_SQL)
                .bind(pago_id)
                .bind(&expected)
                .bind(datos.clave.docente_id.0)
                .bind(datos.clave.curso_id.0)
                .bind(&datos.clave.periodo)
                .bind(datos.fechas_ensenanza.to_value())
                .bind(&datos.oficio_facultad)
                .bind(&datos.oficio_coordinador)
                .execute(&mut **tx)
                .await?
        }
        PagoWrite::Claim { oficios, .. } | PagoWrite::Restamp { oficios, .. } => {
            sqlx::query(STAMP_SQL)
                .bind(pago_id)
                .bind(&expected)
                .bind(&oficios.direccion)
                .bind(&oficios.coordinador)
                .execute(&mut **tx)
                .await?
        }
        PagoWrite::Release { .. } => {
            sqlx::query(RELEASE_SQL)
                .bind(pago_id)
                .bind(&expected)
                .execute(&mut **tx)
                .await?
        }
        PagoWrite::Settle { .. } => {
            sqlx::query(SETTLE_SQL)
                .bind(pago_id)
                .bind(&expected)
                .execute(&mut **tx)
                .await?
        }
    };

    Ok(result.rows_affected())
}

async fn execute_expediente_write(
    tx: &mut Transaction<'_, Postgres>,
    write: &ExpedienteWrite,
) -> Result<u64, sqlx::Error> {
    let result = match write {
        ExpedienteWrite::Save(expediente) => {
            sqlx::query(
                r#"
                INSERT INTO expedientes (
                    id, tipo_asunto, docente_id, curso_id, semestre_id, fechas_ensenanza,
                    numero_documento, numero_oficio_presentacion_coordinador,
                    numero_oficio_conformidad_coordinador, pago_docente_id, asunto,
                    created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (id) DO UPDATE SET
                    tipo_asunto = EXCLUDED.tipo_asunto,
                    docente_id = EXCLUDED.docente_id,
                    curso_id = EXCLUDED.curso_id,
                    semestre_id = EXCLUDED.semestre_id,
                    fechas_ensenanza = EXCLUDED.fechas_ensenanza,
                    numero_documento = EXCLUDED.numero_documento,
                    numero_oficio_presentacion_coordinador = EXCLUDED.numero_oficio_presentacion_coordinador,
                    numero_oficio_conformidad_coordinador = EXCLUDED.numero_oficio_conformidad_coordinador,
                    pago_docente_id = EXCLUDED.pago_docente_id,
                    asunto = EXCLUDED.asunto,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(expediente.id.0)
            .bind(expediente.tipo_asunto.as_str())
            .bind(expediente.docente_id.map(|id| id.0))
            .bind(expediente.curso_id.map(|id| id.0))
            .bind(expediente.semestre_id.map(|id| id.0))
            .bind(expediente.fechas_ensenanza.to_value())
            .bind(&expediente.numero_documento)
            .bind(&expediente.numero_oficio_presentacion_coordinador)
            .bind(&expediente.numero_oficio_conformidad_coordinador)
            .bind(expediente.pago_docente_id.map(|id| id.0))
            .bind(&expediente.asunto)
            .bind(expediente.created_at)
            .bind(expediente.updated_at)
            .execute(&mut **tx)
            .await?
        }
        ExpedienteWrite::Delete(expediente_id) => {
            sqlx::query("DELETE FROM expedientes WHERE id = $1")
                .bind(expediente_id.0)
                .execute(&mut **tx)
                .await?
        }
    };
    Ok(result.rows_affected())
}

#[async_trait]
impl SisconStorage for PgStorage {
    async fn get_expediente(&self, expediente_id: ExpedienteId) -> SisconResult<Option<Expediente>> {
        let query = format!("SELECT {} FROM expedientes WHERE id = $1", EXPEDIENTE_COLUMNS);
        let row = sqlx::query(&query)
            .bind(expediente_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_expediente", e))?;
        row.as_ref()
            .map(expediente_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("decode_expediente", e))
    }

    async fn allocate_expediente_id(&mut self) -> SisconResult<ExpedienteId> {
        self.next_id("expedientes").await.map(ExpedienteId)
    }

    async fn get_pago(&self, pago_id: PagoId) -> SisconResult<Option<PagoDocente>> {
        let query = format!("SELECT {} FROM pagos_docentes WHERE id = $1", PAGO_COLUMNS);
        let row = sqlx::query(&query)
            .bind(pago_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_pago", e))?;
        row.as_ref()
            .map(pago_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("decode_pago", e))
    }

    async fn find_pagos(&self, clave: &ClavePago) -> SisconResult<Vec<PagoDocente>> {
        let query = format!(
            "SELECT {} FROM pagos_docentes \
             WHERE docente_id = $1 AND curso_id = $2 AND periodo = $3 \
             ORDER BY id",
            PAGO_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(clave.docente_id.0)
            .bind(clave.curso_id.0)
            .bind(&clave.periodo)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_pagos", e))?;
        rows.iter()
            .map(pago_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("decode_pago", e))
    }

    async fn allocate_pago_id(&mut self) -> SisconResult<PagoId> {
        self.next_id("pagos_docentes").await.map(PagoId)
    }

    #[instrument(skip_all, fields(pagos = batch.pagos.len()))]
    async fn commit(&mut self, batch: &WriteBatch) -> SisconResult<CommitOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut applied = Vec::new();
        let mut skipped = Vec::new();

        for write in &batch.pagos {
            let pago_id = write.pago_id();
            let rows = execute_pago_write(&mut tx, write)
                .await
                .map_err(|e| map_sqlx_error("write_pago", e))?;
            if rows > 0 {
                applied.push(pago_id);
            } else if write.aborts_on_conflict() {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback_transaction", e))?;
                tracing::debug!(%pago_id, "conditional payment update matched no rows");
                return Ok(CommitOutcome::Conflict { pago_id });
            } else {
                skipped.push(pago_id);
            }
        }

        if let Some(write) = &batch.expediente {
            let rows = execute_expediente_write(&mut tx, write)
                .await
                .map_err(|e| map_sqlx_error("write_expediente", e))?;
            if let (ExpedienteWrite::Delete(expediente_id), 0) = (write, rows) {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback_transaction", e))?;
                return Err(SisconError::ExpedienteNotFound(*expediente_id));
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(CommitOutcome::Committed { applied, skipped })
    }
}

#[async_trait]
impl AcademicReference for PgStorage {
    async fn get_semestre(&self, semestre_id: SemestreId) -> SisconResult<Option<Semestre>> {
        let row = sqlx::query("SELECT id, nombre, programa_id FROM semestres WHERE id = $1")
            .bind(semestre_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_semestre", e))?;
        row.map(|row| -> Result<Semestre, sqlx::Error> {
            Ok(Semestre {
                id: SemestreId(row.try_get("id")?),
                nombre: row.try_get("nombre")?,
                programa_id: row.try_get::<Option<i64>, _>("programa_id")?.map(ProgramaId),
            })
        })
        .transpose()
        .map_err(|e| map_sqlx_error("decode_semestre", e))
    }

    async fn get_programa(&self, programa_id: ProgramaId) -> SisconResult<Option<Programa>> {
        let row = sqlx::query("SELECT id, nombre, periodo FROM programas WHERE id = $1")
            .bind(programa_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_programa", e))?;
        row.map(|row| -> Result<Programa, sqlx::Error> {
            Ok(Programa {
                id: ProgramaId(row.try_get("id")?),
                nombre: row.try_get("nombre")?,
                periodo: row.try_get("periodo")?,
            })
        })
        .transpose()
        .map_err(|e| map_sqlx_error("decode_programa", e))
    }

    async fn resolve_periodo(&self, semestre_id: SemestreId) -> SisconResult<Option<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT p.periodo
            FROM semestres s
            JOIN programas p ON p.id = s.programa_id
            WHERE s.id = $1
            "#,
        )
        .bind(semestre_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("resolve_periodo", e))
    }
}
