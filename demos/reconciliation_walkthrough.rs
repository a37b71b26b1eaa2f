//! Reconciliation walkthrough: register a payment, claim it with a
//! conformidad, move the link, then delete the document.

use bigdecimal::BigDecimal;
use siscon_core::utils::MemoryStorage;
use siscon_core::{
    observability, ClavePago, CursoId, DocenteId, FechasEnsenanza, NuevoExpediente, NuevoPago,
    Office, Programa, ProgramaId, Semestre, SemestreId, SisconConfig, TipoAsunto,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = SisconConfig::from_env()?;
    observability::init(&config);

    println!("📁 SISCON - Reconciliation Walkthrough\n");

    let storage = MemoryStorage::new();
    storage.add_programa(Programa {
        id: ProgramaId(1),
        nombre: "Maestría en Gestión Pública".to_string(),
        periodo: "2025-I".to_string(),
    })?;
    storage.add_semestre(Semestre {
        id: SemestreId(1),
        nombre: "Primer semestre".to_string(),
        programa_id: Some(ProgramaId(1)),
    })?;
    let mut office = Office::new(storage);

    let fechas = |raw: &[&str]| FechasEnsenanza::parse(raw.iter().copied()).unwrap_or_default();
    let pago = |dias: &[&str]| NuevoPago {
        clave: ClavePago {
            docente_id: DocenteId(10),
            curso_id: CursoId(20),
            periodo: "2025-I".to_string(),
        },
        fechas_ensenanza: fechas(dias),
        importe: BigDecimal::from(2400),
        numero_resolucion: Some("RD-101-2025".to_string()),
        observaciones: None,
    };

    // 1. Two pending payments for the same teacher and course
    println!("💰 Registering payments...");
    let marzo = office
        .register_pago(pago(&["2025-03-08", "2025-03-15"]), None)
        .await?;
    let abril = office
        .register_pago(pago(&["2025-04-05", "2025-04-12"]), None)
        .await?;
    println!("  ✓ Payment {} for {:?}", marzo.id, marzo.fechas_ensenanza.as_slice());
    println!("  ✓ Payment {} for {:?}\n", abril.id, abril.fechas_ensenanza.as_slice());

    // 2. A conformidad with March's dates claims the first payment
    println!("📝 Recording conformidad...");
    let conformidad = |dias: &[&str]| {
        NuevoExpediente::new(TipoAsunto::Conformidad, "OF-2025-031")
            .asignacion(DocenteId(10), CursoId(20), SemestreId(1))
            .fechas(fechas(dias))
            .oficio_conformidad_coordinador("OC-2025-007")
    };
    let (expediente, report) = office
        .create_expediente(conformidad(&["2025-03-15", "2025-03-08"]))
        .await?;
    println!("  ✓ Run {}: {:?}", report.run_id, report.outcome);
    println!("  ✓ Expediente {} linked to {:?}\n", expediente.id, expediente.pago_docente_id);

    // 3. The dates were wrong: the link moves to April's payment
    println!("✏️  Correcting teaching dates...");
    let (expediente, report) = office
        .update_expediente(expediente.id, conformidad(&["2025-04-05", "2025-04-12"]))
        .await?;
    println!("  ✓ Run {}: {:?}", report.run_id, report.outcome);
    for pago_id in [marzo.id, abril.id] {
        let pago = office.get_pago_required(pago_id).await?;
        println!(
            "    Payment {}: {} (conformidad {:?})",
            pago.id, pago.estado, pago.numero_oficio_conformidad_direccion
        );
    }
    println!();

    // 4. Deleting the document hands the payment back
    println!("🗑️  Deleting expediente {}...", expediente.id);
    let report = office.delete_expediente(expediente.id).await?;
    println!("  ✓ Run {}: {:?}", report.run_id, report.outcome);
    let abril = office.get_pago_required(abril.id).await?;
    println!("    Payment {} is {} again", abril.id, abril.estado);

    Ok(())
}
