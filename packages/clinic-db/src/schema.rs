//! Catálogo de tabelas e DDL idempotente
//!
//! Cinco tabelas principais são criadas na inicialização; `medical_records`
//! e `notifications` são criadas sob demanda pelos modelos que as usam.
//! Datas, horários e timestamps ficam em TEXT (ISO-8601) para que todos os
//! backends devolvam a mesma representação.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::SqlDriver;

/// Tabelas conhecidas pela camada de dados
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Users,
    Patients,
    Appointments,
    License,
    Configurations,
    MedicalRecords,
    Notifications,
}

impl Table {
    /// Tabelas criadas por `initialize_database`
    pub const CORE: [Table; 5] = [
        Table::Users,
        Table::Patients,
        Table::Appointments,
        Table::License,
        Table::Configurations,
    ];

    /// Tabelas criadas sob demanda
    pub const ON_DEMAND: [Table; 2] = [Table::MedicalRecords, Table::Notifications];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Patients => "patients",
            Table::Appointments => "appointments",
            Table::License => "license",
            Table::Configurations => "configurations",
            Table::MedicalRecords => "medical_records",
            Table::Notifications => "notifications",
        }
    }

    /// Colunas com restrição UNIQUE
    pub fn unique_columns(&self) -> &'static [&'static str] {
        match self {
            Table::Users => &["username", "email"],
            Table::Patients => &["codice_fiscale"],
            Table::License => &["license_key"],
            Table::Configurations => &["key"],
            _ => &[],
        }
    }

    /// Tabela pai e coluna de chave estrangeira (ON DELETE CASCADE)
    pub fn parent(&self) -> Option<(Table, &'static str)> {
        match self {
            Table::Appointments | Table::MedicalRecords => Some((Table::Patients, "patient_id")),
            _ => None,
        }
    }

    /// Comandos DDL da tabela (criação e índices)
    pub fn ddl(&self, driver: SqlDriver) -> Vec<String> {
        let id = match driver {
            SqlDriver::Postgres => "id BIGSERIAL PRIMARY KEY",
            SqlDriver::Sqlite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
        };
        // SQLite guarda booleanos como 0/1; os modelos aceitam as duas formas
        let flag = match driver {
            SqlDriver::Postgres => "BOOLEAN NOT NULL DEFAULT FALSE",
            SqlDriver::Sqlite => "INTEGER NOT NULL DEFAULT 0",
        };

        match self {
            Table::Users => vec![format!(
                r#"CREATE TABLE IF NOT EXISTS users (
                    {id},
                    username TEXT NOT NULL UNIQUE,
                    password TEXT NOT NULL,
                    full_name TEXT NOT NULL,
                    email TEXT NOT NULL UNIQUE,
                    role TEXT NOT NULL CHECK (role IN ('Medico', 'Assistente')),
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )"#
            )],
            Table::Patients => vec![
                format!(
                    r#"CREATE TABLE IF NOT EXISTS patients (
                    {id},
                    name TEXT NOT NULL,
                    codice_fiscale TEXT NOT NULL UNIQUE,
                    date_of_birth TEXT NOT NULL,
                    gender TEXT NOT NULL,
                    phone TEXT NOT NULL,
                    email TEXT,
                    address TEXT,
                    city TEXT,
                    postal_code TEXT,
                    medical_history TEXT,
                    allergies TEXT,
                    medications TEXT,
                    notes TEXT,
                    privacy_consent {flag},
                    marketing_consent {flag},
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )"#
                ),
                "CREATE INDEX IF NOT EXISTS idx_patients_name ON patients (name)".to_string(),
            ],
            Table::Appointments => vec![
                format!(
                    r#"CREATE TABLE IF NOT EXISTS appointments (
                    {id},
                    patient_id BIGINT NOT NULL REFERENCES patients (id) ON DELETE CASCADE,
                    date TEXT NOT NULL,
                    time TEXT NOT NULL,
                    duration INTEGER NOT NULL DEFAULT 30,
                    appointment_type TEXT NOT NULL,
                    notes TEXT,
                    google_calendar_synced {flag},
                    google_event_id TEXT,
                    whatsapp_notification_sent {flag},
                    whatsapp_notification_time TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )"#
                ),
                "CREATE INDEX IF NOT EXISTS idx_appointments_patient_id ON appointments (patient_id)"
                    .to_string(),
                "CREATE INDEX IF NOT EXISTS idx_appointments_date ON appointments (date, time)"
                    .to_string(),
            ],
            Table::License => vec![format!(
                r#"CREATE TABLE IF NOT EXISTS license (
                    {id},
                    license_key TEXT NOT NULL UNIQUE,
                    license_type TEXT NOT NULL CHECK (license_type IN ('basic', 'google', 'whatsapp', 'full')),
                    expiry_date TEXT NOT NULL,
                    google_calendar_enabled {flag},
                    whatsapp_enabled {flag},
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )"#
            )],
            Table::Configurations => vec![format!(
                r#"CREATE TABLE IF NOT EXISTS configurations (
                    {id},
                    key TEXT NOT NULL UNIQUE,
                    value TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )"#
            )],
            Table::MedicalRecords => vec![
                format!(
                    r#"CREATE TABLE IF NOT EXISTS medical_records (
                    {id},
                    patient_id BIGINT NOT NULL REFERENCES patients (id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    date TEXT NOT NULL,
                    doctor TEXT,
                    description TEXT,
                    files TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )"#
                ),
                "CREATE INDEX IF NOT EXISTS idx_medical_records_patient_id ON medical_records (patient_id)"
                    .to_string(),
            ],
            Table::Notifications => vec![
                format!(
                    r#"CREATE TABLE IF NOT EXISTS notifications (
                    {id},
                    patient_id BIGINT NOT NULL,
                    patient_name TEXT NOT NULL,
                    appointment_id BIGINT,
                    message TEXT NOT NULL,
                    status TEXT NOT NULL CHECK (status IN ('pending', 'sent', 'failed')),
                    type TEXT NOT NULL CHECK (type IN ('confirmation', 'reminder', 'custom')),
                    sent_at TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )"#
                ),
                "CREATE INDEX IF NOT EXISTS idx_notifications_status ON notifications (status)"
                    .to_string(),
            ],
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// DDL das tabelas principais, na ordem exigida pelas chaves estrangeiras
pub fn core_ddl(driver: SqlDriver) -> Vec<String> {
    Table::CORE.iter().flat_map(|table| table.ddl(driver)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_ddl_is_idempotent_sql() {
        for driver in [SqlDriver::Postgres, SqlDriver::Sqlite] {
            let statements = core_ddl(driver);
            assert!(statements
                .iter()
                .all(|sql| sql.contains("IF NOT EXISTS")));
            // patients precisa existir antes de appointments (FK)
            let patients = statements.iter().position(|s| s.contains("TABLE IF NOT EXISTS patients"));
            let appointments =
                statements.iter().position(|s| s.contains("TABLE IF NOT EXISTS appointments"));
            assert!(patients < appointments);
        }
    }

    #[test]
    fn test_id_column_per_driver() {
        let pg = Table::Users.ddl(SqlDriver::Postgres).remove(0);
        let lite = Table::Users.ddl(SqlDriver::Sqlite).remove(0);
        assert!(pg.contains("BIGSERIAL"));
        assert!(lite.contains("AUTOINCREMENT"));
    }

    #[test]
    fn test_sqlite_flags_are_integers() {
        let lite = core_ddl(SqlDriver::Sqlite).join("\n");
        assert!(!lite.contains("BOOLEAN"));
        assert!(lite.contains("privacy_consent INTEGER NOT NULL DEFAULT 0"));

        let pg = core_ddl(SqlDriver::Postgres).join("\n");
        assert!(pg.contains("google_calendar_synced BOOLEAN NOT NULL DEFAULT FALSE"));
    }

    #[test]
    fn test_cascade_metadata() {
        assert_eq!(Table::Appointments.parent(), Some((Table::Patients, "patient_id")));
        assert_eq!(Table::Notifications.parent(), None);
        assert!(Table::Patients.unique_columns().contains(&"codice_fiscale"));
    }
}
