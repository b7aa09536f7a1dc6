//! Pacientes

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use super::{fetch_all, fetch_first, flexible_bool, now, require};
use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::schema::Table;
use crate::statement::{Delete, Insert, Order, Select, Statement, Update};

/// Ficha do paciente
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: i64,
    pub name: String,
    /// Codice fiscale (16 caracteres, único)
    pub codice_fiscale: String,
    pub date_of_birth: NaiveDate,
    pub gender: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub medical_history: Option<String>,
    pub allergies: Option<String>,
    pub medications: Option<String>,
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub privacy_consent: bool,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub marketing_consent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Dados para cadastro de um paciente
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPatient {
    pub name: String,
    pub codice_fiscale: String,
    pub date_of_birth: NaiveDate,
    pub gender: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub medical_history: Option<String>,
    pub allergies: Option<String>,
    pub medications: Option<String>,
    pub notes: Option<String>,
    pub privacy_consent: bool,
    #[serde(default)]
    pub marketing_consent: bool,
}

impl NewPatient {
    /// Paciente com os campos obrigatórios; os opcionais ficam vazios
    pub fn new(
        name: impl Into<String>,
        codice_fiscale: impl Into<String>,
        date_of_birth: NaiveDate,
        gender: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            codice_fiscale: codice_fiscale.into(),
            date_of_birth,
            gender: gender.into(),
            phone: phone.into(),
            email: None,
            address: None,
            city: None,
            postal_code: None,
            medical_history: None,
            allergies: None,
            medications: None,
            notes: None,
            privacy_consent: false,
            marketing_consent: false,
        }
    }

    fn validate(&mut self) -> DbResult<()> {
        require("name", &self.name)?;
        require("codice_fiscale", &self.codice_fiscale)?;
        require("gender", &self.gender)?;
        require("phone", &self.phone)?;
        self.codice_fiscale = normalize_codice_fiscale(&self.codice_fiscale)?;
        Ok(())
    }
}

/// Atualização parcial: só os campos `Some` são gravados
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codice_fiscale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medical_history: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allergies: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medications: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy_consent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marketing_consent: Option<bool>,
}

fn normalize_codice_fiscale(value: &str) -> DbResult<String> {
    let cf = value.trim().to_uppercase();
    if cf.len() != 16 || !cf.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(DbError::Validation(format!(
            "codice fiscale inválido: '{value}' (esperados 16 caracteres alfanuméricos)"
        )));
    }
    Ok(cf)
}

pub struct PatientModel {
    db: Arc<Database>,
}

impl PatientModel {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn create(&self, mut patient: NewPatient) -> DbResult<Patient> {
        patient.validate()?;

        let insert = Insert::record(Table::Patients, &patient, now())?;
        let created: Patient = fetch_first(&self.db, Statement::Insert(insert))
            .await
            .map_err(|e| {
                error!("Erro ao criar paciente: {}", e);
                e
            })?
            .ok_or_else(|| DbError::InternalError("INSERT sem linha de retorno".into()))?;

        info!("Paciente criado: id={}", created.id);
        Ok(created)
    }

    pub async fn find_by_id(&self, id: i64) -> DbResult<Option<Patient>> {
        fetch_first(&self.db, Statement::Select(Select::from(Table::Patients).eq("id", id))).await
    }

    pub async fn find_by_codice_fiscale(&self, codice_fiscale: &str) -> DbResult<Option<Patient>> {
        let cf = codice_fiscale.trim().to_uppercase();
        fetch_first(
            &self.db,
            Statement::Select(Select::from(Table::Patients).eq("codice_fiscale", cf)),
        )
        .await
    }

    /// Todos os pacientes, em ordem alfabética
    pub async fn find_all(&self) -> DbResult<Vec<Patient>> {
        fetch_all(
            &self.db,
            Statement::Select(
                Select::from(Table::Patients)
                    .order_by("name", Order::Asc)
                    .order_by("id", Order::Asc),
            ),
        )
        .await
    }

    pub async fn update(&self, id: i64, mut changes: PatientUpdate) -> DbResult<Option<Patient>> {
        if self.find_by_id(id).await?.is_none() {
            return Ok(None);
        }

        if let Some(cf) = changes.codice_fiscale.take() {
            changes.codice_fiscale = Some(normalize_codice_fiscale(&cf)?);
        }
        for (field, value) in [("name", &changes.name), ("gender", &changes.gender), ("phone", &changes.phone)] {
            if let Some(value) = value {
                require(field, value)?;
            }
        }

        let update = Update::partial(Table::Patients, id, &changes, now())?;
        fetch_first(&self.db, Statement::Update(update)).await.map_err(|e| {
            error!("Erro ao atualizar paciente {}: {}", id, e);
            e
        })
    }

    /// Remove o paciente; agendamentos e prontuários são removidos em cascata
    pub async fn delete(&self, id: i64) -> DbResult<bool> {
        let outcome = self
            .db
            .execute(Statement::Delete(Delete::by_id(Table::Patients, id)))
            .await?;
        Ok(!outcome.rows.is_empty())
    }
}
