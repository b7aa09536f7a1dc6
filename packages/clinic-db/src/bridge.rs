//! Contrato da ponte com o host desktop
//!
//! O runtime desktop expõe operações privilegiadas (banco, sistema de
//! arquivos) por uma API assíncrona. Aqui fica apenas o contrato; a
//! implementação pertence ao host.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{DbConfig, SqlDriver};
use crate::schema::Table;
use crate::statement::Row;

/// Resposta padrão das chamadas da ponte
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BridgeResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            success: true,
            rows: Some(rows),
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Converte em `Result`, usando a mensagem de erro da ponte
    pub fn into_result(self) -> Result<Self, String> {
        if self.success {
            Ok(self)
        } else {
            Err(self
                .error
                .unwrap_or_else(|| "ponte respondeu sem sucesso".to_string()))
        }
    }

    pub fn into_rows(self) -> Result<Vec<Row>, String> {
        self.into_result().map(|response| response.rows.unwrap_or_default())
    }
}

/// Comandos de sistema de arquivos roteados por `execute_query`
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeCommand {
    CreateDirectory { path: String },
    WriteFile { path: String, contents: String },
    OpenFile { path: String },
    DeleteFile { path: String },
    GetFileInfo { path: String },
    GetUserDataPath,
}

impl BridgeCommand {
    pub fn name(&self) -> &'static str {
        match self {
            BridgeCommand::CreateDirectory { .. } => "CREATE_DIRECTORY",
            BridgeCommand::WriteFile { .. } => "WRITE_FILE",
            BridgeCommand::OpenFile { .. } => "OPEN_FILE",
            BridgeCommand::DeleteFile { .. } => "DELETE_FILE",
            BridgeCommand::GetFileInfo { .. } => "GET_FILE_INFO",
            BridgeCommand::GetUserDataPath => "GET_USER_DATA_PATH",
        }
    }

    pub fn params(&self) -> Vec<Value> {
        match self {
            BridgeCommand::CreateDirectory { path }
            | BridgeCommand::OpenFile { path }
            | BridgeCommand::DeleteFile { path }
            | BridgeCommand::GetFileInfo { path } => vec![Value::from(path.as_str())],
            BridgeCommand::WriteFile { path, contents } => {
                vec![Value::from(path.as_str()), Value::from(contents.as_str())]
            }
            BridgeCommand::GetUserDataPath => Vec::new(),
        }
    }
}

/// API exposta pelo runtime desktop
#[async_trait]
pub trait HostBridge: Send + Sync {
    async fn connect_database(&self, config: &DbConfig) -> BridgeResponse;

    async fn execute_query(&self, query: &str, params: &[Value]) -> BridgeResponse;

    async fn backup_database(&self, path: &str) -> BridgeResponse;

    async fn restore_database(&self, path: &str) -> BridgeResponse;

    async fn ensure_medical_records_table(&self) -> BridgeResponse {
        ensure_via_queries(self, Table::MedicalRecords).await
    }

    async fn ensure_notifications_table(&self) -> BridgeResponse {
        ensure_via_queries(self, Table::Notifications).await
    }

    async fn run_command(&self, command: &BridgeCommand) -> BridgeResponse {
        self.execute_query(command.name(), &command.params()).await
    }
}

/// O banco atrás da ponte é sempre PostgreSQL
async fn ensure_via_queries<B: HostBridge + ?Sized>(bridge: &B, table: Table) -> BridgeResponse {
    for ddl in table.ddl(SqlDriver::Postgres) {
        let response = bridge.execute_query(&ddl, &[]).await;
        if !response.success {
            return response;
        }
    }
    BridgeResponse::ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_from_host_json() {
        let response: BridgeResponse =
            serde_json::from_value(json!({ "success": true, "rows": [{ "id": 1 }] })).unwrap();
        let rows = response.into_rows().unwrap();
        assert_eq!(rows.len(), 1);

        let failure: BridgeResponse =
            serde_json::from_value(json!({ "success": false, "error": "ECONNREFUSED" })).unwrap();
        assert_eq!(failure.into_rows(), Err("ECONNREFUSED".to_string()));
    }

    #[test]
    fn test_command_rendering() {
        let command = BridgeCommand::WriteFile {
            path: "/docs/referto.txt".into(),
            contents: "ok".into(),
        };
        assert_eq!(command.name(), "WRITE_FILE");
        assert_eq!(command.params(), vec![json!("/docs/referto.txt"), json!("ok")]);
        assert!(BridgeCommand::GetUserDataPath.params().is_empty());
    }
}
