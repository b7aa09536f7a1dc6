//! Prontuários (referti) dos pacientes, com arquivos anexados

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{fetch_all, fetch_first, json_list, now, require};
use crate::bridge::BridgeCommand;
use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::schema::Table;
use crate::statement::{Delete, Insert, Order, Select, Statement, Update};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalRecord {
    pub id: i64,
    pub patient_id: i64,
    pub title: String,
    pub date: NaiveDate,
    pub doctor: Option<String>,
    pub description: Option<String>,
    /// Caminhos dos arquivos anexados, na ordem de inclusão
    #[serde(default, deserialize_with = "json_list")]
    pub files: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMedicalRecord {
    pub patient_id: i64,
    pub title: String,
    pub date: NaiveDate,
    pub doctor: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MedicalRecordUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doctor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Substitui a lista inteira de anexos
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
}

pub struct MedicalRecordModel {
    db: Arc<Database>,
}

impl MedicalRecordModel {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn ensure_table(&self) -> DbResult<()> {
        self.db.ensure_table(Table::MedicalRecords).await
    }

    pub async fn create(&self, record: NewMedicalRecord) -> DbResult<MedicalRecord> {
        require("title", &record.title)?;
        self.ensure_table().await?;

        let patient = self
            .db
            .execute(Statement::Select(
                Select::from(Table::Patients).eq("id", record.patient_id).limit(1),
            ))
            .await?;
        if patient.rows.is_empty() {
            return Err(DbError::Validation(format!(
                "paciente inexistente: {}",
                record.patient_id
            )));
        }

        let insert = Insert::record(Table::MedicalRecords, &record, now())?;
        let created: MedicalRecord = fetch_first(&self.db, Statement::Insert(insert))
            .await
            .map_err(|e| {
                error!("Erro ao criar prontuário: {}", e);
                e
            })?
            .ok_or_else(|| DbError::InternalError("INSERT sem linha de retorno".into()))?;

        info!(
            "Prontuário criado: id={} paciente={} ({} anexos)",
            created.id,
            created.patient_id,
            created.files.len()
        );
        Ok(created)
    }

    pub async fn find_by_id(&self, id: i64) -> DbResult<Option<MedicalRecord>> {
        self.ensure_table().await?;
        fetch_first(
            &self.db,
            Statement::Select(Select::from(Table::MedicalRecords).eq("id", id)),
        )
        .await
    }

    /// Prontuários do paciente, do mais recente ao mais antigo
    pub async fn find_by_patient(&self, patient_id: i64) -> DbResult<Vec<MedicalRecord>> {
        self.ensure_table().await?;
        fetch_all(
            &self.db,
            Statement::Select(
                Select::from(Table::MedicalRecords)
                    .eq("patient_id", patient_id)
                    .order_by("date", Order::Desc)
                    .order_by("id", Order::Desc),
            ),
        )
        .await
    }

    pub async fn update(&self, id: i64, changes: MedicalRecordUpdate) -> DbResult<Option<MedicalRecord>> {
        if self.find_by_id(id).await?.is_none() {
            return Ok(None);
        }
        if let Some(title) = &changes.title {
            require("title", title)?;
        }

        let update = Update::partial(Table::MedicalRecords, id, &changes, now())?;
        fetch_first(&self.db, Statement::Update(update)).await
    }

    /// Remove o prontuário e, quando há ponte com o host, os arquivos anexados
    pub async fn delete(&self, id: i64) -> DbResult<bool> {
        let Some(record) = self.find_by_id(id).await? else {
            return Ok(false);
        };

        let outcome = self
            .db
            .execute(Statement::Delete(Delete::by_id(Table::MedicalRecords, id)))
            .await?;
        if outcome.rows.is_empty() {
            return Ok(false);
        }

        for path in record.files {
            match self.db.run_command(&BridgeCommand::DeleteFile { path: path.clone() }).await {
                Ok(_) => {}
                // Sem host desktop os arquivos ficam onde estão
                Err(DbError::Unsupported(_)) => break,
                Err(e) => warn!("Não foi possível remover o anexo {}: {}", path, e),
            }
        }

        info!("Prontuário removido: id={}", id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::patient::{NewPatient, PatientModel};
    use crate::models::testing::{simulated_db, sqlite_db};
    use tempfile::tempdir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn patient(db: &Arc<Database>) -> DbResult<i64> {
        let patient = PatientModel::new(db.clone())
            .create(NewPatient::new(
                "Lucia Bianchi",
                "BNCLCU75C41F205X",
                date(1975, 3, 1),
                "F",
                "+393401112233",
            ))
            .await?;
        Ok(patient.id)
    }

    fn referto(patient_id: i64, title: &str, day: NaiveDate) -> NewMedicalRecord {
        NewMedicalRecord {
            patient_id,
            title: title.into(),
            date: day,
            doctor: Some("Dott. Rossi".into()),
            description: None,
            files: vec!["/referti/eco.pdf".into(), "/referti/rx.png".into()],
        }
    }

    #[tokio::test]
    async fn test_files_keep_order() -> DbResult<()> {
        let db = simulated_db().await;
        let patient_id = patient(&db).await?;
        let model = MedicalRecordModel::new(db);

        let created = model.create(referto(patient_id, "Ecografia", date(2024, 5, 2))).await?;
        assert_eq!(created.files, vec!["/referti/eco.pdf", "/referti/rx.png"]);

        let updated = model
            .update(
                created.id,
                MedicalRecordUpdate {
                    files: Some(vec!["/referti/rx.png".into()]),
                    ..MedicalRecordUpdate::default()
                },
            )
            .await?
            .expect("prontuário existe");
        assert_eq!(updated.files, vec!["/referti/rx.png"]);
        assert_eq!(updated.title, "Ecografia");
        Ok(())
    }

    #[tokio::test]
    async fn test_find_by_patient_newest_first_on_sqlite() -> DbResult<()> {
        let temp_dir = tempdir()?;
        let db = sqlite_db(temp_dir.path()).await;
        let patient_id = patient(&db).await?;
        let model = MedicalRecordModel::new(db);

        model.create(referto(patient_id, "Visita", date(2024, 1, 10))).await?;
        model.create(referto(patient_id, "Controllo", date(2024, 4, 20))).await?;

        let titles: Vec<String> = model
            .find_by_patient(patient_id)
            .await?
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(titles, vec!["Controllo", "Visita"]);

        let orphan = model.create(referto(patient_id + 50, "X", date(2024, 1, 1))).await;
        assert!(matches!(orphan, Err(DbError::Validation(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_without_bridge_keeps_working() -> DbResult<()> {
        let db = simulated_db().await;
        let patient_id = patient(&db).await?;
        let model = MedicalRecordModel::new(db);

        let created = model.create(referto(patient_id, "Ecografia", date(2024, 5, 2))).await?;
        assert!(model.delete(created.id).await?);
        assert!(model.find_by_id(created.id).await?.is_none());
        assert!(!model.delete(created.id).await?);
        Ok(())
    }
}
