//! Cenários de ponta a ponta sobre a API pública, no simulador e no SQLite

use chrono::{Duration, Local, NaiveDate, NaiveTime};
use clinic_db::models::{
    AppointmentUpdate, LicenseType, NewAppointment, NewLicense, NewPatient, PatientUpdate,
};
use clinic_db::schema::Table;
use clinic_db::settings::keys;
use clinic_db::simulator::Snapshot;
use clinic_db::statement::{Select, Statement};
use clinic_db::{BackendKind, ConnectionStatus, Database, DbConfig, DbResult, Models, SettingsStore};
use std::sync::Arc;
use tempfile::tempdir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn open(config: DbConfig, settings: Arc<SettingsStore>) -> DbResult<Arc<Database>> {
    init_tracing();
    let db = Database::new(config, settings)?;
    db.initialize_database().await?;
    Ok(Arc::new(db))
}

async fn simulated() -> DbResult<Arc<Database>> {
    open(DbConfig::simulated(), Arc::new(SettingsStore::in_memory())).await
}

fn mario() -> NewPatient {
    NewPatient::new(
        "Mario Rossi",
        "RSSMRA80A01H501U",
        NaiveDate::from_ymd_opt(1980, 1, 1).unwrap(),
        "M",
        "+393331234567",
    )
}

fn june_first() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

async fn patient_lookup_and_agenda(db: Arc<Database>) -> DbResult<()> {
    let models = Models::new(db);

    let created = models.patients.create(mario()).await?;
    let found = models
        .patients
        .find_by_codice_fiscale("RSSMRA80A01H501U")
        .await?
        .expect("paciente cadastrado");
    assert_eq!(found.id, created.id);
    assert_eq!(found.name, "Mario Rossi");

    models
        .appointments
        .create(NewAppointment {
            patient_id: created.id,
            date: june_first(),
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            duration: 30,
            appointment_type: "Prima visita".into(),
            notes: None,
        })
        .await?;

    let agenda = models
        .appointments
        .find_by_date_range(june_first(), NaiveDate::from_ymd_opt(2024, 6, 30).unwrap())
        .await?;
    assert_eq!(agenda.len(), 1);
    assert_eq!(agenda[0].patient_name.as_deref(), Some("Mario Rossi"));
    assert_eq!(agenda[0].duration, 30);
    Ok(())
}

#[tokio::test]
async fn patient_and_agenda_on_simulator() -> DbResult<()> {
    patient_lookup_and_agenda(simulated().await?).await
}

#[tokio::test]
async fn patient_and_agenda_on_sqlite() -> DbResult<()> {
    let temp_dir = tempdir()?;
    let path = temp_dir.path().join("studio.db");
    let db = open(
        DbConfig::sqlite(path.to_string_lossy()),
        Arc::new(SettingsStore::in_memory()),
    )
    .await?;
    assert_eq!(db.status().await, Some(ConnectionStatus::Connected(BackendKind::Real)));
    patient_lookup_and_agenda(db).await
}

#[tokio::test]
async fn expired_license_is_invalid() -> DbResult<()> {
    let models = Models::new(simulated().await?);
    let yesterday = Local::now().date_naive() - Duration::days(1);

    models
        .license
        .install_license(NewLicense::for_type("FULL-XXX", LicenseType::Full, yesterday))
        .await?;

    assert!(!models.license.is_license_valid().await?);
    let days = models.license.get_days_until_expiry().await?.expect("licença instalada");
    assert!(days < 0);
    Ok(())
}

#[tokio::test]
async fn update_touches_only_supplied_fields() -> DbResult<()> {
    let models = Models::new(simulated().await?);
    let patient = models.patients.create(mario()).await?;
    let appointment = models
        .appointments
        .create(NewAppointment {
            patient_id: patient.id,
            date: june_first(),
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            duration: 30,
            appointment_type: "Controllo".into(),
            notes: Some("Portare esami".into()),
        })
        .await?;

    let moved = models
        .appointments
        .update(
            appointment.id,
            AppointmentUpdate {
                time: Some(NaiveTime::from_hms_opt(10, 30, 0).unwrap()),
                ..AppointmentUpdate::default()
            },
        )
        .await?
        .expect("agendamento existe");

    assert_eq!(moved.time, NaiveTime::from_hms_opt(10, 30, 0).unwrap());
    assert_eq!(moved.date, appointment.date);
    assert_eq!(moved.notes, appointment.notes);
    assert_eq!(moved.created_at, appointment.created_at);
    assert!(moved.updated_at >= appointment.updated_at);
    Ok(())
}

#[tokio::test]
async fn initialization_is_idempotent() -> DbResult<()> {
    let temp_dir = tempdir()?;
    let path = temp_dir.path().join("studio.db");
    let db = open(
        DbConfig::sqlite(path.to_string_lossy()),
        Arc::new(SettingsStore::in_memory()),
    )
    .await?;

    let models = Models::new(db.clone());
    models.patients.create(mario()).await?;

    db.initialize_database().await?;
    db.initialize_database().await?;
    assert_eq!(models.patients.find_all().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn simulator_applies_updates_and_deletes() -> DbResult<()> {
    let settings = Arc::new(SettingsStore::in_memory());
    let db = open(DbConfig::simulated(), settings.clone()).await?;
    let models = Models::new(db.clone());

    let patient = models.patients.create(mario()).await?;
    models
        .patients
        .update(
            patient.id,
            PatientUpdate {
                phone: Some("+390612345678".into()),
                ..PatientUpdate::default()
            },
        )
        .await?;

    let snapshot: Snapshot = settings
        .get(keys::SIMULATED_DATABASE)?
        .expect("snapshot persistido");
    let stored = &snapshot.rows(Table::Patients)[0];
    assert_eq!(stored["phone"], serde_json::json!("+390612345678"));

    assert!(models.patients.delete(patient.id).await?);
    let outcome = db.execute(Statement::Select(Select::from(Table::Patients))).await?;
    assert!(outcome.rows.is_empty());
    assert_eq!(outcome.served_by, BackendKind::Simulated);
    Ok(())
}

#[tokio::test]
async fn unreachable_server_degrades_to_simulator() -> DbResult<()> {
    let config = DbConfig {
        host: "127.0.0.1".into(),
        port: 1,
        connect_timeout_secs: 1,
        ..DbConfig::default()
    };
    let db = open(config, Arc::new(SettingsStore::in_memory())).await?;
    assert!(matches!(
        db.status().await,
        Some(ConnectionStatus::Degraded { requested: BackendKind::Real, .. })
    ));

    let models = Models::new(db);
    let created = models.patients.create(mario()).await?;
    assert_eq!(models.patients.find_by_id(created.id).await?, Some(created));
    Ok(())
}
