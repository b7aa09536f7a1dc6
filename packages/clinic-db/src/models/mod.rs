//! Modelos de entidade
//!
//! Cada modelo recebe a fachada `Database` por injeção e traduz operações
//! CRUD em comandos tipados, mapeando as linhas para registros tipados.

use chrono::{DateTime, Utc};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::database::Database;
use crate::error::DbResult;
use crate::statement::{Row, Statement};

pub mod appointment;
pub mod license;
pub mod medical_record;
pub mod notification;
pub mod patient;
pub mod user;

pub use appointment::{Appointment, AppointmentModel, AppointmentUpdate, NewAppointment};
pub use license::{License, LicenseModel, LicenseType, NewLicense};
pub use medical_record::{MedicalRecord, MedicalRecordModel, MedicalRecordUpdate, NewMedicalRecord};
pub use notification::{
    NewNotification, Notification, NotificationModel, NotificationStatus, NotificationType,
};
pub use patient::{NewPatient, Patient, PatientModel, PatientUpdate};
pub use user::{NewUser, Role, User, UserModel, UserUpdate};

/// Conjunto de modelos construído sobre a mesma instância de `Database`
pub struct Models {
    pub users: UserModel,
    pub patients: PatientModel,
    pub appointments: AppointmentModel,
    pub medical_records: MedicalRecordModel,
    pub notifications: NotificationModel,
    pub license: LicenseModel,
}

impl Models {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            users: UserModel::new(db.clone()),
            patients: PatientModel::new(db.clone()),
            appointments: AppointmentModel::new(db.clone()),
            medical_records: MedicalRecordModel::new(db.clone()),
            notifications: NotificationModel::new(db.clone()),
            license: LicenseModel::new(db),
        }
    }
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

pub(crate) fn decode<T: DeserializeOwned>(row: Row) -> DbResult<T> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

pub(crate) fn decode_all<T: DeserializeOwned>(rows: Vec<Row>) -> DbResult<Vec<T>> {
    rows.into_iter().map(decode).collect()
}

/// Executa e mapeia a primeira linha, se houver
pub(crate) async fn fetch_first<T: DeserializeOwned>(db: &Database, statement: Statement) -> DbResult<Option<T>> {
    let outcome = db.execute(statement).await?;
    outcome.rows.into_iter().next().map(decode).transpose()
}

pub(crate) async fn fetch_all<T: DeserializeOwned>(db: &Database, statement: Statement) -> DbResult<Vec<T>> {
    decode_all(db.execute(statement).await?.rows)
}

/// Booleanos chegam como `true/false` (Postgres, simulador) ou `0/1` (SQLite)
pub(crate) fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
        Value::String(s) => match s.as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            other => Err(de::Error::custom(format!("booleano inválido: {other}"))),
        },
        Value::Null => Ok(false),
        other => Err(de::Error::custom(format!("booleano inválido: {other}"))),
    }
}

/// Lista serializada como texto JSON na coluna (ou já como array)
pub(crate) fn json_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Vec::new()),
        Value::String(text) if text.trim().is_empty() => Ok(Vec::new()),
        Value::String(text) => serde_json::from_str(&text).map_err(de::Error::custom),
        other => serde_json::from_value(other).map_err(de::Error::custom),
    }
}

pub(crate) fn require(field: &str, value: &str) -> DbResult<()> {
    if value.trim().is_empty() {
        return Err(crate::error::DbError::Validation(format!(
            "campo obrigatório ausente: {field}"
        )));
    }
    Ok(())
}
