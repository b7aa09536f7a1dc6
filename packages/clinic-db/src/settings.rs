//! Armazenamento local de configurações (chave/valor persistido em JSON)
//!
//! Único meio de persistência fora dos backends de banco de dados. Guarda a
//! configuração de conexão, o espelho da licença atual, o snapshot do
//! simulador e os metadados de backup.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

use crate::error::DbResult;

/// Chaves conhecidas do armazenamento local
pub mod keys {
    pub const DB_CONFIG: &str = "dbConfig";
    pub const LICENSE: &str = "license";
    pub const SIMULATED_DATABASE: &str = "simulatedDatabase";
    pub const LAST_BACKUP_PATH: &str = "lastBackupPath";
    pub const LAST_BACKUP_DATE: &str = "lastBackupDate";
}

/// Armazenamento chave/valor persistido em um arquivo JSON
#[derive(Debug)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    entries: Mutex<Map<String, Value>>,
}

impl SettingsStore {
    /// Abre (ou cria) o arquivo de configurações no caminho informado
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let entries = if path.exists() {
            let raw = std::fs::read(&path)?;
            if raw.is_empty() {
                Map::new()
            } else {
                serde_json::from_slice(&raw)?
            }
        } else {
            Map::new()
        };

        debug!("Configurações locais carregadas de {}", path.display());
        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    /// Armazenamento volátil, sem arquivo (testes e modo demonstração)
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(Map::new()),
        }
    }

    /// Lê e desserializa o valor de uma chave
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> DbResult<Option<T>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Grava o valor de uma chave e persiste o documento inteiro
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> DbResult<()> {
        let value = serde_json::to_value(value)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut updated = entries.clone();
        updated.insert(key.to_string(), value);
        // Memória só muda depois que o arquivo foi gravado
        self.persist(&updated)?;
        *entries = updated;
        Ok(())
    }

    /// Remove uma chave; devolve `true` se ela existia
    pub fn remove(&self, key: &str) -> DbResult<bool> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if !entries.contains_key(key) {
            return Ok(false);
        }
        let mut updated = entries.clone();
        updated.remove(key);
        self.persist(&updated)?;
        *entries = updated;
        Ok(true)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    fn persist(&self, entries: &Map<String, Value>) -> DbResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let bytes = serde_json::to_vec_pretty(entries)?;
        if let Err(e) = std::fs::write(path, bytes) {
            warn!("Falha ao gravar configurações em {}: {}", path.display(), e);
            return Err(e.into());
        }
        Ok(())
    }
}
