//! Core types and data structures for the SISCON office records

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::reconciliation::matcher::FechasEnsenanza;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

record_id!(
    /// Identifier of an administrative document
    ExpedienteId
);
record_id!(
    /// Identifier of a teacher payment row
    PagoId
);
record_id!(
    /// Identifier of a teacher
    DocenteId
);
record_id!(
    /// Identifier of a course
    CursoId
);
record_id!(
    /// Identifier of an academic semester
    SemestreId
);
record_id!(
    /// Identifier of an academic program
    ProgramaId
);

/// Subject type of an expediente
///
/// Only `Presentacion` and `Conformidad` take part in payment reconciliation;
/// every other subject is stored as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TipoAsunto {
    /// Introduces or updates the teaching assignment behind a payment
    Presentacion,
    /// Certifies the teaching was completed; advances the payment
    Conformidad,
    /// Plain descriptive document
    Descripcion,
    /// Any other subject recorded by the office
    Otro(String),
}

impl TipoAsunto {
    pub fn as_str(&self) -> &str {
        match self {
            TipoAsunto::Presentacion => "presentacion",
            TipoAsunto::Conformidad => "conformidad",
            TipoAsunto::Descripcion => "descripcion",
            TipoAsunto::Otro(value) => value,
        }
    }

    /// Whether writes of this subject are handed to the reconciliation engine
    pub fn is_reconcilable(&self) -> bool {
        matches!(self, TipoAsunto::Presentacion | TipoAsunto::Conformidad)
    }
}

impl From<String> for TipoAsunto {
    fn from(value: String) -> Self {
        match value.trim().to_lowercase().as_str() {
            "presentacion" | "presentación" => TipoAsunto::Presentacion,
            "conformidad" => TipoAsunto::Conformidad,
            "descripcion" | "descripción" => TipoAsunto::Descripcion,
            _ => TipoAsunto::Otro(value),
        }
    }
}

impl From<&str> for TipoAsunto {
    fn from(value: &str) -> Self {
        TipoAsunto::from(value.to_string())
    }
}

impl From<TipoAsunto> for String {
    fn from(value: TipoAsunto) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for TipoAsunto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment status
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EstadoPago {
    /// Awaiting certification; the only state a conformidad can claim
    Pendiente,
    /// Certified by a conformidad and awaiting final processing
    EnProceso,
    /// Paid out; terminal
    Pagado,
    /// Any other state set by out-of-engine processing
    Otro(String),
}

impl EstadoPago {
    pub fn as_str(&self) -> &str {
        match self {
            EstadoPago::Pendiente => "pendiente",
            EstadoPago::EnProceso => "en_proceso",
            EstadoPago::Pagado => "pagado",
            EstadoPago::Otro(value) => value,
        }
    }
}

impl From<String> for EstadoPago {
    fn from(value: String) -> Self {
        match value.trim().to_lowercase().as_str() {
            "pendiente" => EstadoPago::Pendiente,
            "en_proceso" | "en proceso" => EstadoPago::EnProceso,
            "pagado" => EstadoPago::Pagado,
            _ => EstadoPago::Otro(value),
        }
    }
}

impl From<&str> for EstadoPago {
    fn from(value: &str) -> Self {
        EstadoPago::from(value.to_string())
    }
}

impl From<EstadoPago> for String {
    fn from(value: EstadoPago) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for EstadoPago {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural key shared by payments and the expedientes that reference them
///
/// Not unique: several payments can share it and differ only by teaching dates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClavePago {
    pub docente_id: DocenteId,
    pub curso_id: CursoId,
    pub periodo: String,
}

/// Administrative document tracked by the office
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expediente {
    pub id: ExpedienteId,
    pub tipo_asunto: TipoAsunto,
    pub docente_id: Option<DocenteId>,
    pub curso_id: Option<CursoId>,
    pub semestre_id: Option<SemestreId>,
    pub fechas_ensenanza: FechasEnsenanza,
    /// Institutional document number
    pub numero_documento: String,
    pub numero_oficio_presentacion_coordinador: Option<String>,
    pub numero_oficio_conformidad_coordinador: Option<String>,
    /// Payment linked by reconciliation; never set from client input
    pub pago_docente_id: Option<PagoId>,
    pub asunto: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Expediente {
    /// Build a stored expediente from client input, without any payment link
    pub fn from_input(id: ExpedienteId, input: NuevoExpediente) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id,
            tipo_asunto: input.tipo_asunto,
            docente_id: input.docente_id,
            curso_id: input.curso_id,
            semestre_id: input.semestre_id,
            fechas_ensenanza: input.fechas_ensenanza,
            numero_documento: input.numero_documento,
            numero_oficio_presentacion_coordinador: input.numero_oficio_presentacion_coordinador,
            numero_oficio_conformidad_coordinador: input.numero_oficio_conformidad_coordinador,
            pago_docente_id: None,
            asunto: input.asunto,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite the client-owned fields, keeping id, link and creation time
    pub fn apply_input(&mut self, input: NuevoExpediente) {
        self.tipo_asunto = input.tipo_asunto;
        self.docente_id = input.docente_id;
        self.curso_id = input.curso_id;
        self.semestre_id = input.semestre_id;
        self.fechas_ensenanza = input.fechas_ensenanza;
        self.numero_documento = input.numero_documento;
        self.numero_oficio_presentacion_coordinador = input.numero_oficio_presentacion_coordinador;
        self.numero_oficio_conformidad_coordinador = input.numero_oficio_conformidad_coordinador;
        self.asunto = input.asunto;
        self.updated_at = chrono::Utc::now().naive_utc();
    }
}

/// Client input for creating or editing an expediente
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NuevoExpediente {
    pub tipo_asunto: TipoAsunto,
    #[serde(default)]
    pub docente_id: Option<DocenteId>,
    #[serde(default)]
    pub curso_id: Option<CursoId>,
    #[serde(default)]
    pub semestre_id: Option<SemestreId>,
    #[serde(default)]
    pub fechas_ensenanza: FechasEnsenanza,
    pub numero_documento: String,
    #[serde(default)]
    pub numero_oficio_presentacion_coordinador: Option<String>,
    #[serde(default)]
    pub numero_oficio_conformidad_coordinador: Option<String>,
    #[serde(default)]
    pub asunto: Option<String>,
}

impl NuevoExpediente {
    pub fn new(tipo_asunto: TipoAsunto, numero_documento: impl Into<String>) -> Self {
        Self {
            tipo_asunto,
            docente_id: None,
            curso_id: None,
            semestre_id: None,
            fechas_ensenanza: FechasEnsenanza::default(),
            numero_documento: numero_documento.into(),
            numero_oficio_presentacion_coordinador: None,
            numero_oficio_conformidad_coordinador: None,
            asunto: None,
        }
    }

    /// Teacher, course and semester the document refers to
    pub fn asignacion(mut self, docente_id: DocenteId, curso_id: CursoId, semestre_id: SemestreId) -> Self {
        self.docente_id = Some(docente_id);
        self.curso_id = Some(curso_id);
        self.semestre_id = Some(semestre_id);
        self
    }

    pub fn fechas(mut self, fechas: FechasEnsenanza) -> Self {
        self.fechas_ensenanza = fechas;
        self
    }

    pub fn oficio_presentacion_coordinador(mut self, numero: impl Into<String>) -> Self {
        self.numero_oficio_presentacion_coordinador = Some(numero.into());
        self
    }

    pub fn oficio_conformidad_coordinador(mut self, numero: impl Into<String>) -> Self {
        self.numero_oficio_conformidad_coordinador = Some(numero.into());
        self
    }
}

/// Conformidad document numbers stamped on a claimed payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OficiosConformidad {
    pub direccion: String,
    pub coordinador: Option<String>,
}

/// Fields a presentación copies onto its linked payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatosPresentacion {
    pub clave: ClavePago,
    pub fechas_ensenanza: FechasEnsenanza,
    pub oficio_facultad: String,
    pub oficio_coordinador: Option<String>,
}

/// Teacher payment record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagoDocente {
    pub id: PagoId,
    pub docente_id: DocenteId,
    pub curso_id: CursoId,
    pub periodo: String,
    pub fechas_ensenanza: FechasEnsenanza,
    pub estado: EstadoPago,
    pub numero_oficio_presentacion_facultad: Option<String>,
    pub numero_oficio_presentacion_coordinador: Option<String>,
    pub numero_oficio_conformidad_direccion: Option<String>,
    pub numero_oficio_conformidad_coordinador: Option<String>,
    pub importe: BigDecimal,
    pub numero_resolucion: Option<String>,
    pub observaciones: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl PagoDocente {
    /// Create a new pending payment
    pub fn new(id: PagoId, input: NuevoPago) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id,
            docente_id: input.clave.docente_id,
            curso_id: input.clave.curso_id,
            periodo: input.clave.periodo,
            fechas_ensenanza: input.fechas_ensenanza,
            estado: EstadoPago::Pendiente,
            numero_oficio_presentacion_facultad: None,
            numero_oficio_presentacion_coordinador: None,
            numero_oficio_conformidad_direccion: None,
            numero_oficio_conformidad_coordinador: None,
            importe: input.importe,
            numero_resolucion: input.numero_resolucion,
            observaciones: input.observaciones,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn clave(&self) -> ClavePago {
        ClavePago {
            docente_id: self.docente_id,
            curso_id: self.curso_id,
            periodo: self.periodo.clone(),
        }
    }

    /// Copy a presentación's assignment data onto this payment
    pub fn present(&mut self, datos: &DatosPresentacion) {
        self.docente_id = datos.clave.docente_id;
        self.curso_id = datos.clave.curso_id;
        self.periodo = datos.clave.periodo.clone();
        self.fechas_ensenanza = datos.fechas_ensenanza.clone();
        self.numero_oficio_presentacion_facultad = Some(datos.oficio_facultad.clone());
        self.numero_oficio_presentacion_coordinador = datos.oficio_coordinador.clone();
        self.touch();
    }

    /// Stamp the conformidad fields and move to `en_proceso` together
    pub fn claim(&mut self, oficios: &OficiosConformidad) {
        self.numero_oficio_conformidad_direccion = Some(oficios.direccion.clone());
        self.numero_oficio_conformidad_coordinador = oficios.coordinador.clone();
        self.estado = EstadoPago::EnProceso;
        self.touch();
    }

    /// Clear the conformidad fields and return to `pendiente` together
    pub fn release(&mut self) {
        self.numero_oficio_conformidad_direccion = None;
        self.numero_oficio_conformidad_coordinador = None;
        self.estado = EstadoPago::Pendiente;
        self.touch();
    }

    pub fn settle(&mut self) {
        self.estado = EstadoPago::Pagado;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().naive_utc();
    }
}

/// Input for registering a payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NuevoPago {
    pub clave: ClavePago,
    #[serde(default)]
    pub fechas_ensenanza: FechasEnsenanza,
    pub importe: BigDecimal,
    #[serde(default)]
    pub numero_resolucion: Option<String>,
    #[serde(default)]
    pub observaciones: Option<String>,
}

/// Academic semester, resolved read-only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Semestre {
    pub id: SemestreId,
    pub nombre: String,
    pub programa_id: Option<ProgramaId>,
}

/// Academic program carrying the period string used in payment keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Programa {
    pub id: ProgramaId,
    pub nombre: String,
    pub periodo: String,
}

/// Errors that can occur in the office records
#[derive(Debug, thiserror::Error)]
pub enum SisconError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Expediente not found: {0}")]
    ExpedienteNotFound(ExpedienteId),
    #[error("Payment not found: {0}")]
    PagoNotFound(PagoId),
    #[error("Invalid payment state: {0}")]
    InvalidState(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type for office operations
pub type SisconResult<T> = Result<T, SisconError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn pago() -> PagoDocente {
        PagoDocente::new(
            PagoId(1),
            NuevoPago {
                clave: ClavePago {
                    docente_id: DocenteId(5),
                    curso_id: CursoId(9),
                    periodo: "2025-I".to_string(),
                },
                fechas_ensenanza: FechasEnsenanza::default(),
                importe: BigDecimal::from(1200),
                numero_resolucion: None,
                observaciones: None,
            },
        )
    }

    #[test]
    fn test_claim_and_release_move_fields_with_state() {
        let mut pago = pago();
        assert_eq!(pago.estado, EstadoPago::Pendiente);

        pago.claim(&OficiosConformidad {
            direccion: "OF-100".to_string(),
            coordinador: Some("OC-7".to_string()),
        });
        assert_eq!(pago.estado, EstadoPago::EnProceso);
        assert_eq!(pago.numero_oficio_conformidad_direccion.as_deref(), Some("OF-100"));
        assert_eq!(pago.numero_oficio_conformidad_coordinador.as_deref(), Some("OC-7"));

        pago.release();
        assert_eq!(pago.estado, EstadoPago::Pendiente);
        assert!(pago.numero_oficio_conformidad_direccion.is_none());
        assert!(pago.numero_oficio_conformidad_coordinador.is_none());
    }

    #[test]
    fn test_estado_round_trips_through_strings() {
        assert_eq!(EstadoPago::from("en_proceso"), EstadoPago::EnProceso);
        assert_eq!(EstadoPago::from("Pendiente"), EstadoPago::Pendiente);
        assert_eq!(
            EstadoPago::from("anulado"),
            EstadoPago::Otro("anulado".to_string())
        );
        assert_eq!(String::from(EstadoPago::EnProceso), "en_proceso");
    }

    #[test]
    fn test_tipo_asunto_accepts_accented_values() {
        assert_eq!(TipoAsunto::from("Presentación"), TipoAsunto::Presentacion);
        assert_eq!(TipoAsunto::from("conformidad"), TipoAsunto::Conformidad);
        assert!(!TipoAsunto::from("descripcion").is_reconcilable());
        assert!(TipoAsunto::Conformidad.is_reconcilable());
    }

    #[test]
    fn test_expediente_input_never_carries_link() {
        let input = NuevoExpediente::new(TipoAsunto::Conformidad, "OF-1");
        let mut expediente = Expediente::from_input(ExpedienteId(3), input.clone());
        assert!(expediente.pago_docente_id.is_none());

        expediente.pago_docente_id = Some(PagoId(8));
        expediente.apply_input(input);
        assert_eq!(expediente.pago_docente_id, Some(PagoId(8)));
    }
}
