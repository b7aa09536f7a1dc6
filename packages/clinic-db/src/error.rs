//! Definições de erro para a biblioteca clinic-db
//!
//! Este módulo define os tipos de erro usados pela camada de acesso a dados.
//! Registros inexistentes não são erros: as buscas devolvem `None` e as
//! remoções devolvem `false`.

use thiserror::Error;

/// Erros específicos para operações de banco de dados
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuração inválida: {0}")]
    Configuration(String),

    #[error("Erro de conexão com banco de dados: {0}")]
    ConnectionError(String),

    #[error("Erro de migração: {0}")]
    MigrationError(String),

    #[error("Erro de consulta: {0}")]
    QueryError(String),

    #[error("Entidade não encontrada: {0}")]
    NotFound(String),

    #[error("Violação de restrição: {0}")]
    ConstraintViolation(String),

    #[error("Dados inválidos: {0}")]
    Validation(String),

    #[error("Transição de estado inválida: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Erro da ponte com o host: {0}")]
    Bridge(String),

    #[error("Operação não suportada: {0}")]
    Unsupported(String),

    #[error("Erro nas configurações locais: {0}")]
    Settings(#[from] std::io::Error),

    #[error("Erro de serialização: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Erro interno: {0}")]
    InternalError(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    /// Indica se o erro vem da conectividade com o backend (e não do SQL em si)
    pub fn is_connectivity(&self) -> bool {
        matches!(self, DbError::ConnectionError(_))
    }
}

/// Conversão de erros específicos do SQLx para nossos tipos de erro
impl From<sqlx::Error> for DbError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => DbError::NotFound("Registro não encontrado".to_string()),
            sqlx::Error::Database(dbe) => {
                if let Some(code) = dbe.code() {
                    // SQLite: 2067 (UNIQUE), 787 (FOREIGN KEY); Postgres: 23505, 23503
                    if matches!(code.as_ref(), "23000" | "2067" | "1555" | "787" | "23505" | "23503") {
                        return DbError::ConstraintViolation(dbe.message().to_string());
                    }
                }
                DbError::QueryError(dbe.message().to_string())
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::QueryError(format!("Coluna não encontrada: {}", col))
            }
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::QueryError(format!("Tipo não encontrado: {}", type_name))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::QueryError(format!("Erro ao decodificar coluna {}: {}", index, source))
            }
            sqlx::Error::Io(io_err) => DbError::ConnectionError(io_err.to_string()),
            sqlx::Error::Tls(tls_err) => DbError::ConnectionError(tls_err.to_string()),
            sqlx::Error::Protocol(msg) => DbError::ConnectionError(msg),
            sqlx::Error::Configuration(conf_err) => DbError::ConnectionError(conf_err.to_string()),
            sqlx::Error::PoolClosed => {
                DbError::ConnectionError("Pool de conexões fechado".to_string())
            }
            sqlx::Error::PoolTimedOut => {
                DbError::ConnectionError("Timeout no pool de conexões".to_string())
            }
            sqlx::Error::WorkerCrashed => {
                DbError::InternalError("Worker do banco de dados falhou".to_string())
            }
            _ => DbError::InternalError(format!("Erro inesperado: {:?}", error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        let err: DbError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_connectivity());

        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DbError::NotFound(_)));
        assert!(!err.is_connectivity());

        assert!(!DbError::Validation("nome obrigatório".into()).is_connectivity());
    }
}
