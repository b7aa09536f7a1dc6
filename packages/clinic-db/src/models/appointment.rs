//! Agendamentos
//!
//! Toda consulta devolve o nome do paciente (`patient_name`) via join e
//! ordena por data e horário.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use super::{fetch_all, fetch_first, flexible_bool, now, require};
use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::schema::Table;
use crate::statement::{Delete, Insert, Join, Order, Select, Statement, Update};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: i64,
    pub patient_id: i64,
    pub date: NaiveDate,
    pub time: NaiveTime,
    /// Duração em minutos
    pub duration: i64,
    pub appointment_type: String,
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub google_calendar_synced: bool,
    pub google_event_id: Option<String>,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub whatsapp_notification_sent: bool,
    pub whatsapp_notification_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Nome do paciente (join); ausente nas linhas devolvidas por INSERT/UPDATE
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAppointment {
    pub patient_id: i64,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration: i64,
    pub appointment_type: String,
    pub notes: Option<String>,
}

#[derive(Serialize)]
struct AppointmentRecord<'a> {
    #[serde(flatten)]
    appointment: &'a NewAppointment,
    google_calendar_synced: bool,
    whatsapp_notification_sent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppointmentUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_calendar_synced: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whatsapp_notification_sent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whatsapp_notification_time: Option<DateTime<Utc>>,
}

fn with_patient_name(select: Select) -> Select {
    select
        .join(Join {
            table: Table::Patients,
            foreign_key: "patient_id",
            columns: vec![("name", "patient_name")],
        })
        .order_by("date", Order::Asc)
        .order_by("time", Order::Asc)
}

fn validate_duration(duration: i64) -> DbResult<()> {
    if duration <= 0 {
        return Err(DbError::Validation(format!(
            "duração deve ser positiva: {duration}"
        )));
    }
    Ok(())
}

pub struct AppointmentModel {
    db: Arc<Database>,
}

impl AppointmentModel {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn create(&self, appointment: NewAppointment) -> DbResult<Appointment> {
        require("appointment_type", &appointment.appointment_type)?;
        validate_duration(appointment.duration)?;
        self.ensure_patient(appointment.patient_id).await?;

        let record = AppointmentRecord {
            appointment: &appointment,
            google_calendar_synced: false,
            whatsapp_notification_sent: false,
        };
        let insert = Insert::record(Table::Appointments, &record, now())?;
        let created: Appointment = fetch_first(&self.db, Statement::Insert(insert))
            .await
            .map_err(|e| {
                error!("Erro ao criar agendamento: {}", e);
                e
            })?
            .ok_or_else(|| DbError::InternalError("INSERT sem linha de retorno".into()))?;

        info!(
            "Agendamento criado: id={} paciente={} em {} {}",
            created.id, created.patient_id, created.date, created.time
        );
        // Devolve com o nome do paciente preenchido
        Ok(self.find_by_id(created.id).await?.unwrap_or(created))
    }

    async fn ensure_patient(&self, patient_id: i64) -> DbResult<()> {
        let exists = self
            .db
            .execute(Statement::Select(
                Select::from(Table::Patients).eq("id", patient_id).limit(1),
            ))
            .await?;
        if exists.rows.is_empty() {
            return Err(DbError::Validation(format!(
                "paciente inexistente: {patient_id}"
            )));
        }
        Ok(())
    }

    pub async fn find_by_id(&self, id: i64) -> DbResult<Option<Appointment>> {
        fetch_first(
            &self.db,
            Statement::Select(with_patient_name(Select::from(Table::Appointments).eq("id", id))),
        )
        .await
    }

    pub async fn find_all(&self) -> DbResult<Vec<Appointment>> {
        fetch_all(
            &self.db,
            Statement::Select(with_patient_name(Select::from(Table::Appointments))),
        )
        .await
    }

    pub async fn find_by_patient(&self, patient_id: i64) -> DbResult<Vec<Appointment>> {
        fetch_all(
            &self.db,
            Statement::Select(with_patient_name(
                Select::from(Table::Appointments).eq("patient_id", patient_id),
            )),
        )
        .await
    }

    /// Agendamentos entre `start` e `end`, inclusive
    pub async fn find_by_date_range(&self, start: NaiveDate, end: NaiveDate) -> DbResult<Vec<Appointment>> {
        if end < start {
            return Ok(Vec::new());
        }
        fetch_all(
            &self.db,
            Statement::Select(with_patient_name(
                Select::from(Table::Appointments)
                    .gte("date", start.to_string())
                    .lte("date", end.to_string()),
            )),
        )
        .await
    }

    pub async fn update(&self, id: i64, changes: AppointmentUpdate) -> DbResult<Option<Appointment>> {
        if self.find_by_id(id).await?.is_none() {
            return Ok(None);
        }
        if let Some(duration) = changes.duration {
            validate_duration(duration)?;
        }

        let update = Update::partial(Table::Appointments, id, &changes, now())?;
        let updated: Option<Appointment> = fetch_first(&self.db, Statement::Update(update)).await?;
        match updated {
            Some(_) => self.find_by_id(id).await,
            None => Ok(None),
        }
    }

    /// Marca o agendamento como sincronizado com o Google Calendar
    pub async fn mark_google_synced(&self, id: i64, event_id: &str) -> DbResult<Option<Appointment>> {
        self.update(
            id,
            AppointmentUpdate {
                google_calendar_synced: Some(true),
                google_event_id: Some(event_id.to_string()),
                ..AppointmentUpdate::default()
            },
        )
        .await
    }

    /// Registra o envio da notificação por WhatsApp
    pub async fn mark_whatsapp_sent(&self, id: i64) -> DbResult<Option<Appointment>> {
        self.update(
            id,
            AppointmentUpdate {
                whatsapp_notification_sent: Some(true),
                whatsapp_notification_time: Some(now()),
                ..AppointmentUpdate::default()
            },
        )
        .await
    }

    pub async fn delete(&self, id: i64) -> DbResult<bool> {
        let outcome = self
            .db
            .execute(Statement::Delete(Delete::by_id(Table::Appointments, id)))
            .await?;
        Ok(!outcome.rows.is_empty())
    }
}
