//! Integration tests for siscon-core

use bigdecimal::BigDecimal;
use siscon_core::{
    utils::{EnhancedExpedienteValidator, EnhancedPagoValidator, Fault, MemoryStorage},
    ClavePago, CursoId, Decision, DocenteId, EstadoPago, Expediente, ExpedienteId,
    FechasEnsenanza, NuevoExpediente, NuevoPago, Office, PagoDocente, PagoId, Programa,
    ProgramaId, ReconciliationEngine, ReconciliationOutcome, Semestre, SemestreId, SisconError,
    SkipReason, TipoAsunto,
};

const DOCENTE: DocenteId = DocenteId(5);
const CURSO: CursoId = CursoId(9);
const SEMESTRE: SemestreId = SemestreId(3);
const SEMESTRE_SIN_PROGRAMA: SemestreId = SemestreId(4);

fn seeded_storage() -> MemoryStorage {
    let storage = MemoryStorage::new();
    storage
        .add_programa(Programa {
            id: ProgramaId(1),
            nombre: "Maestría en Contabilidad".to_string(),
            periodo: "2025-I".to_string(),
        })
        .unwrap();
    storage
        .add_semestre(Semestre {
            id: SEMESTRE,
            nombre: "2025 - primer semestre".to_string(),
            programa_id: Some(ProgramaId(1)),
        })
        .unwrap();
    storage
        .add_semestre(Semestre {
            id: SEMESTRE_SIN_PROGRAMA,
            nombre: "Semestre sin programa".to_string(),
            programa_id: None,
        })
        .unwrap();
    storage
}

fn fechas(raw: &[&str]) -> FechasEnsenanza {
    FechasEnsenanza::parse(raw.iter().copied()).unwrap()
}

fn conformidad(numero: &str, dias: &[&str]) -> NuevoExpediente {
    NuevoExpediente::new(TipoAsunto::Conformidad, numero)
        .asignacion(DOCENTE, CURSO, SEMESTRE)
        .fechas(fechas(dias))
}

fn nuevo_pago(dias: &[&str]) -> NuevoPago {
    NuevoPago {
        clave: ClavePago {
            docente_id: DOCENTE,
            curso_id: CURSO,
            periodo: "2025-I".to_string(),
        },
        fechas_ensenanza: fechas(dias),
        importe: BigDecimal::from(1500),
        numero_resolucion: Some("RD-044-2025".to_string()),
        observaciones: None,
    }
}

async fn pago(office: &Office<MemoryStorage>, pago_id: PagoId) -> PagoDocente {
    office.get_pago_required(pago_id).await.unwrap()
}

fn assert_released(pago: &PagoDocente) {
    assert_eq!(pago.estado, EstadoPago::Pendiente);
    assert!(pago.numero_oficio_conformidad_direccion.is_none());
    assert!(pago.numero_oficio_conformidad_coordinador.is_none());
}

#[tokio::test]
async fn test_conformidad_matches_regardless_of_date_order() {
    let mut office = Office::new(seeded_storage());
    let pendiente = office
        .register_pago(nuevo_pago(&["2025-03-12", "2025-03-05"]), None)
        .await
        .unwrap();

    let (expediente, report) = office
        .create_expediente(
            conformidad("OF-100", &["2025-03-05", "2025-03-12"]).oficio_conformidad_coordinador("OC-7"),
        )
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        ReconciliationOutcome::Linked {
            pago_id: pendiente.id
        }
    );
    assert_eq!(expediente.pago_docente_id, Some(pendiente.id));

    let claimed = pago(&office, pendiente.id).await;
    assert_eq!(claimed.estado, EstadoPago::EnProceso);
    assert_eq!(claimed.numero_oficio_conformidad_direccion.as_deref(), Some("OF-100"));
    assert_eq!(claimed.numero_oficio_conformidad_coordinador.as_deref(), Some("OC-7"));

    let stored = office.get_expediente(expediente.id).await.unwrap().unwrap();
    assert_eq!(stored.pago_docente_id, Some(pendiente.id));
}

#[tokio::test]
async fn test_one_differing_date_finds_no_match() {
    let mut office = Office::new(seeded_storage());
    let pendiente = office
        .register_pago(nuevo_pago(&["2025-03-05", "2025-03-13"]), None)
        .await
        .unwrap();

    let (expediente, report) = office
        .create_expediente(conformidad("OF-100", &["2025-03-05", "2025-03-12"]))
        .await
        .unwrap();

    assert_eq!(report.outcome, ReconciliationOutcome::NoMatch);
    assert_eq!(expediente.pago_docente_id, None);
    assert_released(&pago(&office, pendiente.id).await);
}

#[tokio::test]
async fn test_edit_without_match_releases_previous_link() {
    let mut office = Office::new(seeded_storage());
    let x = office
        .register_pago(nuevo_pago(&["2025-03-05", "2025-03-12"]), None)
        .await
        .unwrap();
    let y = office
        .register_pago(nuevo_pago(&["2025-03-05", "2025-03-13"]), None)
        .await
        .unwrap();

    let (expediente, _) = office
        .create_expediente(conformidad("OF-100", &["2025-03-05", "2025-03-12"]))
        .await
        .unwrap();
    assert_eq!(expediente.pago_docente_id, Some(x.id));

    let (expediente, report) = office
        .update_expediente(
            expediente.id,
            conformidad("OF-100", &["2025-03-05", "2025-03-14"]),
        )
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        ReconciliationOutcome::Unlinked {
            pago_id: x.id,
            released: true
        }
    );
    assert_eq!(expediente.pago_docente_id, None);
    assert_released(&pago(&office, x.id).await);
    assert_released(&pago(&office, y.id).await);

    let stored = office.get_expediente(expediente.id).await.unwrap().unwrap();
    assert_eq!(stored.pago_docente_id, None);
}

#[tokio::test]
async fn test_edited_dates_move_link_to_other_payment() {
    let mut office = Office::new(seeded_storage());
    let x = office
        .register_pago(nuevo_pago(&["2025-03-05", "2025-03-12"]), None)
        .await
        .unwrap();
    let y = office
        .register_pago(nuevo_pago(&["2025-03-19", "2025-03-26"]), None)
        .await
        .unwrap();

    let (expediente, _) = office
        .create_expediente(conformidad("OF-100", &["2025-03-05", "2025-03-12"]))
        .await
        .unwrap();

    let (expediente, report) = office
        .update_expediente(
            expediente.id,
            conformidad("OF-100", &["2025-03-26", "2025-03-19"]),
        )
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        ReconciliationOutcome::Relinked {
            from: x.id,
            to: y.id
        }
    );
    assert_eq!(expediente.pago_docente_id, Some(y.id));
    assert_released(&pago(&office, x.id).await);

    let claimed = pago(&office, y.id).await;
    assert_eq!(claimed.estado, EstadoPago::EnProceso);
    assert_eq!(claimed.numero_oficio_conformidad_direccion.as_deref(), Some("OF-100"));
}

#[tokio::test]
async fn test_second_claim_of_same_payment_is_lost() {
    let storage = seeded_storage();
    let mut office = Office::new(storage.clone());
    let pendiente = office
        .register_pago(nuevo_pago(&["2025-03-05", "2025-03-12"]), None)
        .await
        .unwrap();

    let mut primero = ReconciliationEngine::new(storage.clone());
    let mut segundo = ReconciliationEngine::new(storage.clone());
    let mut a = Expediente::from_input(
        ExpedienteId(101),
        conformidad("OF-101", &["2025-03-05", "2025-03-12"]),
    );
    let mut b = Expediente::from_input(
        ExpedienteId(102),
        conformidad("OF-102", &["2025-03-12", "2025-03-05"]),
    );

    // Both plan against the same snapshot before either commits.
    let plan_a = primero.plan_conformidad(&a, None).await.unwrap();
    let plan_b = segundo.plan_conformidad(&b, None).await.unwrap();
    assert!(matches!(plan_a, Decision::Apply { .. }));
    assert!(matches!(plan_b, Decision::Apply { .. }));

    let report_a = primero.apply(&mut a, None, plan_a).await.unwrap();
    let report_b = segundo.apply(&mut b, None, plan_b).await.unwrap();

    assert_eq!(
        report_a.outcome,
        ReconciliationOutcome::Linked {
            pago_id: pendiente.id
        }
    );
    assert_eq!(
        report_b.outcome,
        ReconciliationOutcome::ClaimLost {
            pago_id: pendiente.id,
            unlinked: None
        }
    );
    assert_eq!(a.pago_docente_id, Some(pendiente.id));
    assert_eq!(b.pago_docente_id, None);

    let claimed = pago(&office, pendiente.id).await;
    assert_eq!(claimed.numero_oficio_conformidad_direccion.as_deref(), Some("OF-101"));
    let stored_b = office.get_expediente(ExpedienteId(102)).await.unwrap().unwrap();
    assert_eq!(stored_b.pago_docente_id, None);
}

#[tokio::test]
async fn test_lost_claim_still_releases_previous_payment() {
    let storage = seeded_storage();
    let mut office = Office::new(storage.clone());
    let x = office
        .register_pago(nuevo_pago(&["2025-03-05"]), None)
        .await
        .unwrap();
    let y = office
        .register_pago(nuevo_pago(&["2025-03-19"]), None)
        .await
        .unwrap();
    let (stored, _) = office
        .create_expediente(conformidad("OF-100", &["2025-03-05"]))
        .await
        .unwrap();
    assert_eq!(stored.pago_docente_id, Some(x.id));

    // Plan the move from X to Y, then let another conformidad take Y first.
    let mut engine = ReconciliationEngine::new(storage.clone());
    let mut editado = stored.clone();
    editado.apply_input(conformidad("OF-100", &["2025-03-19"]));
    let plan = engine.plan_conformidad(&editado, Some(x.id)).await.unwrap();
    let (rival, _) = office
        .create_expediente(conformidad("OF-200", &["2025-03-19"]))
        .await
        .unwrap();
    assert_eq!(rival.pago_docente_id, Some(y.id));

    let report = engine.apply(&mut editado, Some(x.id), plan).await.unwrap();

    assert_eq!(
        report.outcome,
        ReconciliationOutcome::ClaimLost {
            pago_id: y.id,
            unlinked: Some(x.id)
        }
    );
    assert_eq!(editado.pago_docente_id, None);
    assert_released(&pago(&office, x.id).await);

    let taken = pago(&office, y.id).await;
    assert_eq!(taken.estado, EstadoPago::EnProceso);
    assert_eq!(taken.numero_oficio_conformidad_direccion.as_deref(), Some("OF-200"));

    let stored = office.get_expediente(stored.id).await.unwrap().unwrap();
    assert_eq!(stored.pago_docente_id, None);
    assert_eq!(stored.fechas_ensenanza, fechas(&["2025-03-19"]));
}

#[tokio::test]
async fn test_pending_previous_payment_is_claimed() {
    let storage = seeded_storage();
    let mut office = Office::new(storage.clone());
    let pendiente = office
        .register_pago(nuevo_pago(&["2025-03-05", "2025-03-12"]), None)
        .await
        .unwrap();

    let mut engine = ReconciliationEngine::new(storage);
    let mut expediente = Expediente::from_input(
        ExpedienteId(60),
        conformidad("OF-100", &["2025-03-05", "2025-03-12"]),
    );
    expediente.pago_docente_id = Some(pendiente.id);

    let report = engine
        .reconcile_conformidad(&mut expediente, Some(pendiente.id))
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        ReconciliationOutcome::Linked {
            pago_id: pendiente.id
        }
    );
    assert_eq!(expediente.pago_docente_id, Some(pendiente.id));
    let claimed = pago(&office, pendiente.id).await;
    assert_eq!(claimed.estado, EstadoPago::EnProceso);
    assert_eq!(claimed.numero_oficio_conformidad_direccion.as_deref(), Some("OF-100"));
    assert!(office.audit_links(&[ExpedienteId(60)]).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_conformidades_claim_once() {
    let storage = seeded_storage();
    let mut office = Office::new(storage.clone());
    let pendiente = office
        .register_pago(nuevo_pago(&["2025-03-05", "2025-03-12"]), None)
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let storage = storage.clone();
            tokio::spawn(async move {
                let mut engine = ReconciliationEngine::new(storage);
                let mut expediente = Expediente::from_input(
                    ExpedienteId(200 + i),
                    conformidad(&format!("OF-{}", i), &["2025-03-05", "2025-03-12"]),
                );
                engine
                    .reconcile_conformidad(&mut expediente, None)
                    .await
                    .unwrap()
                    .outcome
            })
        })
        .collect();

    let mut linked = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ReconciliationOutcome::Linked { pago_id } => {
                assert_eq!(pago_id, pendiente.id);
                linked += 1;
            }
            ReconciliationOutcome::NoMatch | ReconciliationOutcome::ClaimLost { .. } => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(linked, 1);
    assert_eq!(pago(&office, pendiente.id).await.estado, EstadoPago::EnProceso);
}

#[tokio::test]
async fn test_resaving_same_conformidad_is_idempotent() {
    let mut office = Office::new(seeded_storage());
    let pendiente = office
        .register_pago(nuevo_pago(&["2025-03-05", "2025-03-12"]), None)
        .await
        .unwrap();

    let input = conformidad("OF-100", &["2025-03-05", "2025-03-12"]);
    let (expediente, _) = office.create_expediente(input.clone()).await.unwrap();
    let once = pago(&office, pendiente.id).await;

    let (expediente, report) = office
        .update_expediente(expediente.id, input)
        .await
        .unwrap();
    let twice = pago(&office, pendiente.id).await;

    assert_eq!(
        report.outcome,
        ReconciliationOutcome::Unchanged {
            pago_id: Some(pendiente.id)
        }
    );
    assert_eq!(expediente.pago_docente_id, Some(pendiente.id));
    assert_eq!(once, twice);
}

#[tokio::test]
async fn test_engine_reconciles_twice_to_same_state() {
    let storage = seeded_storage();
    let mut office = Office::new(storage.clone());
    let pendiente = office
        .register_pago(nuevo_pago(&["2025-03-05", "2025-03-12"]), None)
        .await
        .unwrap();

    let mut engine = ReconciliationEngine::new(storage);
    let mut expediente = Expediente::from_input(
        ExpedienteId(50),
        conformidad("OF-100", &["2025-03-05", "2025-03-12"]),
    );
    engine.reconcile_conformidad(&mut expediente, None).await.unwrap();
    let first = pago(&office, pendiente.id).await;
    let previous = expediente.pago_docente_id;

    engine
        .reconcile_conformidad(&mut expediente, previous)
        .await
        .unwrap();
    let second = pago(&office, pendiente.id).await;

    assert_eq!(expediente.pago_docente_id, Some(pendiente.id));
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_new_document_number_restamps_held_payment() {
    let mut office = Office::new(seeded_storage());
    let pendiente = office
        .register_pago(nuevo_pago(&["2025-03-05", "2025-03-12"]), None)
        .await
        .unwrap();
    let (expediente, _) = office
        .create_expediente(conformidad("OF-100", &["2025-03-05", "2025-03-12"]))
        .await
        .unwrap();

    let (_, report) = office
        .update_expediente(
            expediente.id,
            conformidad("OF-100-A", &["2025-03-05", "2025-03-12"]),
        )
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        ReconciliationOutcome::Refreshed {
            pago_id: pendiente.id
        }
    );
    let held = pago(&office, pendiente.id).await;
    assert_eq!(held.estado, EstadoPago::EnProceso);
    assert_eq!(held.numero_oficio_conformidad_direccion.as_deref(), Some("OF-100-A"));
}

#[tokio::test]
async fn test_failed_expediente_write_keeps_previous_link() {
    let storage = seeded_storage();
    let mut office = Office::new(storage.clone());
    let x = office
        .register_pago(nuevo_pago(&["2025-03-05", "2025-03-12"]), None)
        .await
        .unwrap();
    let y = office
        .register_pago(nuevo_pago(&["2025-03-19"]), None)
        .await
        .unwrap();
    let (expediente, _) = office
        .create_expediente(conformidad("OF-100", &["2025-03-05", "2025-03-12"]))
        .await
        .unwrap();

    storage.inject_fault(Fault::ExpedienteWrite).unwrap();
    let result = office
        .update_expediente(expediente.id, conformidad("OF-100", &["2025-03-19"]))
        .await;
    assert!(matches!(result, Err(SisconError::Storage(_))));

    let held = pago(&office, x.id).await;
    assert_eq!(held.estado, EstadoPago::EnProceso);
    assert_eq!(held.numero_oficio_conformidad_direccion.as_deref(), Some("OF-100"));
    assert_released(&pago(&office, y.id).await);

    let stored = office.get_expediente(expediente.id).await.unwrap().unwrap();
    assert_eq!(stored.pago_docente_id, Some(x.id));
    assert_eq!(stored.fechas_ensenanza, fechas(&["2025-03-05", "2025-03-12"]));
}

#[tokio::test]
async fn test_failed_claim_write_keeps_previous_link() {
    let storage = seeded_storage();
    let mut office = Office::new(storage.clone());
    let x = office
        .register_pago(nuevo_pago(&["2025-03-05"]), None)
        .await
        .unwrap();
    let y = office
        .register_pago(nuevo_pago(&["2025-03-19"]), None)
        .await
        .unwrap();
    let (expediente, _) = office
        .create_expediente(conformidad("OF-100", &["2025-03-05"]))
        .await
        .unwrap();

    // The release of X is written first; failing on Y must undo it.
    storage.inject_fault(Fault::PagoWrite(y.id)).unwrap();
    let result = office
        .update_expediente(expediente.id, conformidad("OF-100", &["2025-03-19"]))
        .await;
    assert!(result.is_err());

    let held = pago(&office, x.id).await;
    assert_eq!(held.estado, EstadoPago::EnProceso);
    assert_eq!(held.numero_oficio_conformidad_direccion.as_deref(), Some("OF-100"));
    assert_released(&pago(&office, y.id).await);

    let stored = office.get_expediente(expediente.id).await.unwrap().unwrap();
    assert_eq!(stored.pago_docente_id, Some(x.id));
    assert_eq!(stored.fechas_ensenanza, fechas(&["2025-03-05"]));
}

#[tokio::test]
async fn test_unresolved_semester_is_a_silent_no_op() {
    let mut office = Office::new(seeded_storage());
    let pendiente = office
        .register_pago(nuevo_pago(&["2025-03-05"]), None)
        .await
        .unwrap();

    let input = NuevoExpediente::new(TipoAsunto::Conformidad, "OF-100")
        .asignacion(DOCENTE, CURSO, SEMESTRE_SIN_PROGRAMA)
        .fechas(fechas(&["2025-03-05"]));
    let (expediente, report) = office.create_expediente(input).await.unwrap();

    assert_eq!(
        report.outcome,
        ReconciliationOutcome::Skipped(SkipReason::UnresolvedReference)
    );
    assert!(office.get_expediente(expediente.id).await.unwrap().is_some());
    assert_released(&pago(&office, pendiente.id).await);
}

#[tokio::test]
async fn test_unresolved_semester_keeps_conformidad_link() {
    let mut office = Office::new(seeded_storage());
    let x = office
        .register_pago(nuevo_pago(&["2025-03-05"]), None)
        .await
        .unwrap();
    let (expediente, _) = office
        .create_expediente(conformidad("OF-100", &["2025-03-05"]))
        .await
        .unwrap();
    let before = pago(&office, x.id).await;

    let (expediente, report) = office
        .update_expediente(
            expediente.id,
            NuevoExpediente::new(TipoAsunto::Conformidad, "OF-100-B")
                .asignacion(DOCENTE, CURSO, SEMESTRE_SIN_PROGRAMA)
                .fechas(fechas(&["2025-03-06"])),
        )
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        ReconciliationOutcome::Skipped(SkipReason::UnresolvedReference)
    );
    assert_eq!(expediente.pago_docente_id, Some(x.id));
    assert_eq!(pago(&office, x.id).await, before);

    let stored = office.get_expediente(expediente.id).await.unwrap().unwrap();
    assert_eq!(stored.pago_docente_id, Some(x.id));
    assert_eq!(stored.semestre_id, Some(SEMESTRE_SIN_PROGRAMA));
}

#[tokio::test]
async fn test_unresolved_semester_keeps_presentacion_link() {
    let mut office = Office::new(seeded_storage());
    let (expediente, _) = office
        .create_expediente(
            NuevoExpediente::new(TipoAsunto::Presentacion, "OF-FAC-10")
                .asignacion(DOCENTE, CURSO, SEMESTRE)
                .fechas(fechas(&["2025-03-05"])),
        )
        .await
        .unwrap();
    let registrado = office
        .register_pago(nuevo_pago(&["2025-03-05"]), Some(expediente.id))
        .await
        .unwrap();
    let before = pago(&office, registrado.id).await;

    let (expediente, report) = office
        .update_expediente(
            expediente.id,
            NuevoExpediente::new(TipoAsunto::Presentacion, "OF-FAC-11")
                .asignacion(DOCENTE, CURSO, SEMESTRE_SIN_PROGRAMA)
                .fechas(fechas(&["2025-04-01"])),
        )
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        ReconciliationOutcome::Skipped(SkipReason::UnresolvedReference)
    );
    assert_eq!(expediente.pago_docente_id, Some(registrado.id));
    assert_eq!(pago(&office, registrado.id).await, before);

    let stored = office.get_expediente(expediente.id).await.unwrap().unwrap();
    assert_eq!(stored.pago_docente_id, Some(registrado.id));
}

#[tokio::test]
async fn test_no_match_leaves_unrelated_payments_alone() {
    let mut office = Office::new(seeded_storage());
    let otro_docente = office
        .register_pago(
            NuevoPago {
                clave: ClavePago {
                    docente_id: DocenteId(77),
                    curso_id: CURSO,
                    periodo: "2025-I".to_string(),
                },
                ..nuevo_pago(&["2025-03-05"])
            },
            None,
        )
        .await
        .unwrap();
    let ya_reclamado = office
        .register_pago(nuevo_pago(&["2025-03-05"]), None)
        .await
        .unwrap();
    let (_, report) = office
        .create_expediente(conformidad("OF-1", &["2025-03-05"]))
        .await
        .unwrap();
    assert!(matches!(report.outcome, ReconciliationOutcome::Linked { .. }));

    let before_otro = pago(&office, otro_docente.id).await;
    let before_reclamado = pago(&office, ya_reclamado.id).await;

    let (_, report) = office
        .create_expediente(conformidad("OF-2", &["2025-03-05"]))
        .await
        .unwrap();

    assert_eq!(report.outcome, ReconciliationOutcome::NoMatch);
    assert_eq!(pago(&office, otro_docente.id).await, before_otro);
    assert_eq!(pago(&office, ya_reclamado.id).await, before_reclamado);
}

#[tokio::test]
async fn test_empty_dates_never_match() {
    let mut office = Office::new(seeded_storage());
    let sin_fechas = office.register_pago(nuevo_pago(&[]), None).await.unwrap();

    let (expediente, report) = office
        .create_expediente(conformidad("OF-100", &[]))
        .await
        .unwrap();

    assert_eq!(report.outcome, ReconciliationOutcome::NoMatch);
    assert_eq!(expediente.pago_docente_id, None);
    assert_released(&pago(&office, sin_fechas.id).await);
}

#[tokio::test]
async fn test_identical_candidates_resolve_to_lowest_id() {
    let mut office = Office::new(seeded_storage());
    let primero = office
        .register_pago(nuevo_pago(&["2025-03-05"]), None)
        .await
        .unwrap();
    let segundo = office
        .register_pago(nuevo_pago(&["2025-03-05"]), None)
        .await
        .unwrap();

    let (_, report) = office
        .create_expediente(conformidad("OF-1", &["2025-03-05"]))
        .await
        .unwrap();
    assert_eq!(
        report.outcome,
        ReconciliationOutcome::Linked {
            pago_id: primero.id
        }
    );

    let (_, report) = office
        .create_expediente(conformidad("OF-2", &["2025-03-05"]))
        .await
        .unwrap();
    assert_eq!(
        report.outcome,
        ReconciliationOutcome::Linked {
            pago_id: segundo.id
        }
    );
}

#[tokio::test]
async fn test_presentacion_updates_linked_pending_payment() {
    let mut office = Office::new(seeded_storage());
    let presentacion = NuevoExpediente::new(TipoAsunto::Presentacion, "OF-FAC-10")
        .asignacion(DOCENTE, CURSO, SEMESTRE)
        .fechas(fechas(&["2025-03-05"]));

    let (expediente, report) = office.create_expediente(presentacion.clone()).await.unwrap();
    assert_eq!(
        report.outcome,
        ReconciliationOutcome::Skipped(SkipReason::NoLinkedPago)
    );

    let registrado = office
        .register_pago(nuevo_pago(&["2025-03-05"]), Some(expediente.id))
        .await
        .unwrap();
    let linked = office.get_expediente(expediente.id).await.unwrap().unwrap();
    assert_eq!(linked.pago_docente_id, Some(registrado.id));

    let (expediente, report) = office
        .update_expediente(
            expediente.id,
            NuevoExpediente::new(TipoAsunto::Presentacion, "OF-FAC-11")
                .asignacion(DOCENTE, CURSO, SEMESTRE)
                .fechas(fechas(&["2025-03-12", "2025-03-05"]))
                .oficio_presentacion_coordinador("OC-3"),
        )
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        ReconciliationOutcome::PresentacionApplied {
            pago_id: registrado.id
        }
    );
    assert_eq!(expediente.pago_docente_id, Some(registrado.id));
    let actualizado = pago(&office, registrado.id).await;
    assert_eq!(actualizado.estado, EstadoPago::Pendiente);
    assert_eq!(actualizado.fechas_ensenanza, fechas(&["2025-03-05", "2025-03-12"]));
    assert_eq!(actualizado.numero_oficio_presentacion_facultad.as_deref(), Some("OF-FAC-11"));
    assert_eq!(actualizado.numero_oficio_presentacion_coordinador.as_deref(), Some("OC-3"));
    assert_eq!(actualizado.periodo, "2025-I");
}

#[tokio::test]
async fn test_presentacion_leaves_claimed_payment_alone() {
    let mut office = Office::new(seeded_storage());
    let presentacion = NuevoExpediente::new(TipoAsunto::Presentacion, "OF-FAC-10")
        .asignacion(DOCENTE, CURSO, SEMESTRE)
        .fechas(fechas(&["2025-03-05"]));
    let (expediente, _) = office.create_expediente(presentacion.clone()).await.unwrap();
    let registrado = office
        .register_pago(nuevo_pago(&["2025-03-05"]), Some(expediente.id))
        .await
        .unwrap();
    office
        .create_expediente(conformidad("OF-100", &["2025-03-05"]))
        .await
        .unwrap();

    let (_, report) = office
        .update_expediente(
            expediente.id,
            presentacion.fechas(fechas(&["2025-04-01"])),
        )
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        ReconciliationOutcome::Skipped(SkipReason::PagoNotPending)
    );
    let claimed = pago(&office, registrado.id).await;
    assert_eq!(claimed.estado, EstadoPago::EnProceso);
    assert_eq!(claimed.fechas_ensenanza, fechas(&["2025-03-05"]));
}

#[tokio::test]
async fn test_deleting_conformidad_releases_payment() {
    let mut office = Office::new(seeded_storage());
    let pendiente = office
        .register_pago(nuevo_pago(&["2025-03-05"]), None)
        .await
        .unwrap();
    let (expediente, _) = office
        .create_expediente(conformidad("OF-100", &["2025-03-05"]))
        .await
        .unwrap();

    let report = office.delete_expediente(expediente.id).await.unwrap();

    assert_eq!(
        report.outcome,
        ReconciliationOutcome::Unlinked {
            pago_id: pendiente.id,
            released: true
        }
    );
    assert!(office.get_expediente(expediente.id).await.unwrap().is_none());
    assert_released(&pago(&office, pendiente.id).await);

    assert!(matches!(
        office.delete_expediente(expediente.id).await,
        Err(SisconError::ExpedienteNotFound(_))
    ));
}

#[tokio::test]
async fn test_settled_payment_is_never_rolled_back() {
    let mut office = Office::new(seeded_storage());
    let pendiente = office
        .register_pago(nuevo_pago(&["2025-03-05"]), None)
        .await
        .unwrap();
    assert!(matches!(
        office.settle_pago(pendiente.id).await,
        Err(SisconError::InvalidState(_))
    ));

    let (expediente, _) = office
        .create_expediente(conformidad("OF-100", &["2025-03-05"]))
        .await
        .unwrap();
    let pagado = office.settle_pago(pendiente.id).await.unwrap();
    assert_eq!(pagado.estado, EstadoPago::Pagado);

    let (expediente, report) = office
        .update_expediente(expediente.id, conformidad("OF-100", &["2025-03-06"]))
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        ReconciliationOutcome::Unlinked {
            pago_id: pendiente.id,
            released: false
        }
    );
    assert_eq!(expediente.pago_docente_id, None);
    let intacto = pago(&office, pendiente.id).await;
    assert_eq!(intacto.estado, EstadoPago::Pagado);
    assert_eq!(intacto.numero_oficio_conformidad_direccion.as_deref(), Some("OF-100"));
}

#[tokio::test]
async fn test_changing_subject_away_from_conformidad_releases_payment() {
    let mut office = Office::new(seeded_storage());
    let pendiente = office
        .register_pago(nuevo_pago(&["2025-03-05"]), None)
        .await
        .unwrap();
    let (expediente, _) = office
        .create_expediente(conformidad("OF-100", &["2025-03-05"]))
        .await
        .unwrap();

    let (expediente, report) = office
        .update_expediente(
            expediente.id,
            NuevoExpediente::new(TipoAsunto::Descripcion, "OF-100"),
        )
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        ReconciliationOutcome::Unlinked {
            pago_id: pendiente.id,
            released: true
        }
    );
    assert_eq!(expediente.pago_docente_id, None);
    assert_released(&pago(&office, pendiente.id).await);
}

#[tokio::test]
async fn test_invalid_input_is_rejected_before_reconciliation() {
    let mut office = Office::with_validators(
        seeded_storage(),
        Box::new(EnhancedExpedienteValidator),
        Box::new(EnhancedPagoValidator),
    );
    let pendiente = office
        .register_pago(nuevo_pago(&["2025-03-05"]), None)
        .await
        .unwrap();

    let sin_docente = NuevoExpediente::new(TipoAsunto::Conformidad, "OF-100")
        .fechas(fechas(&["2025-03-05"]));
    assert!(matches!(
        office.create_expediente(sin_docente).await,
        Err(SisconError::Validation(_))
    ));
    assert!(office.get_expediente(ExpedienteId(1)).await.unwrap().is_none());
    assert_released(&pago(&office, pendiente.id).await);

    let descripcion = office
        .create_expediente(NuevoExpediente::new(TipoAsunto::Descripcion, "MEMO-1"))
        .await
        .unwrap()
        .0;
    assert!(matches!(
        office
            .register_pago(nuevo_pago(&["2025-03-06"]), Some(descripcion.id))
            .await,
        Err(SisconError::Validation(_))
    ));
}

#[tokio::test]
async fn test_audit_finds_no_issues_after_reconciliation() {
    let mut office = Office::new(seeded_storage());
    office
        .register_pago(nuevo_pago(&["2025-03-05"]), None)
        .await
        .unwrap();
    let (linked, _) = office
        .create_expediente(conformidad("OF-100", &["2025-03-05"]))
        .await
        .unwrap();
    let (unlinked, _) = office
        .create_expediente(conformidad("OF-101", &["2025-03-06"]))
        .await
        .unwrap();

    let issues = office
        .audit_links(&[linked.id, unlinked.id, ExpedienteId(999)])
        .await
        .unwrap();
    assert!(issues.is_empty(), "{:?}", issues);
}
