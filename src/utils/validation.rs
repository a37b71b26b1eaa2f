//! Validation utilities

use crate::reconciliation::matcher::FechasEnsenanza;
use crate::traits::*;
use crate::types::*;

/// Validate an institutional document number
pub fn validate_numero_documento(numero: &str) -> SisconResult<()> {
    if numero.trim().is_empty() {
        return Err(SisconError::Validation(
            "Document number cannot be empty".to_string(),
        ));
    }

    if numero.len() > 100 {
        return Err(SisconError::Validation(
            "Document number cannot exceed 100 characters".to_string(),
        ));
    }

    if numero.chars().any(|c| c.is_control()) {
        return Err(SisconError::Validation(
            "Document number cannot contain control characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate an optional companion document number
pub fn validate_oficio_opcional(numero: Option<&str>) -> SisconResult<()> {
    match numero {
        Some(numero) => validate_numero_documento(numero),
        None => Ok(()),
    }
}

/// Validate a free-text subject line
pub fn validate_asunto(asunto: &str) -> SisconResult<()> {
    if asunto.len() > 500 {
        return Err(SisconError::Validation(
            "Subject cannot exceed 500 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate that a teaching schedule lists each date once
pub fn validate_fechas_unicas(fechas: &FechasEnsenanza) -> SisconResult<()> {
    if let Some(pair) = fechas.as_slice().windows(2).find(|pair| pair[0] == pair[1]) {
        return Err(SisconError::Validation(format!(
            "Teaching date {} appears more than once",
            pair[0]
        )));
    }

    Ok(())
}

/// Enhanced expediente validator with detailed checks
pub struct EnhancedExpedienteValidator;

impl ExpedienteValidator for EnhancedExpedienteValidator {
    fn validate_expediente(&self, input: &NuevoExpediente) -> SisconResult<()> {
        // Basic validation
        DefaultExpedienteValidator.validate_expediente(input)?;

        validate_numero_documento(&input.numero_documento)?;
        validate_oficio_opcional(input.numero_oficio_presentacion_coordinador.as_deref())?;
        validate_oficio_opcional(input.numero_oficio_conformidad_coordinador.as_deref())?;
        if let Some(asunto) = &input.asunto {
            validate_asunto(asunto)?;
        }

        if input.tipo_asunto.is_reconcilable() {
            validate_fechas_unicas(&input.fechas_ensenanza)?;
        }

        Ok(())
    }
}

/// Enhanced payment validator with detailed checks
pub struct EnhancedPagoValidator;

impl PagoValidator for EnhancedPagoValidator {
    fn validate_pago(&self, input: &NuevoPago) -> SisconResult<()> {
        DefaultPagoValidator.validate_pago(input)?;
        validate_fechas_unicas(&input.fechas_ensenanza)?;
        validate_oficio_opcional(input.numero_resolucion.as_deref())?;
        Ok(())
    }
}
