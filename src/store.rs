use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use serde_json::Value;

use crate::record::Record;

/// Narrow seam to whatever holds records on the device. The sync engine only
/// ever loads by unique identifier, saves whole records, and enumerates.
pub trait LocalStore {
    fn load(&self, unique_id: &str) -> Result<Option<Record>>;
    fn save(&self, record: &Record) -> Result<()>;
    fn all(&self) -> Result<Vec<Record>>;
}

pub struct InMemoryStore {
    data: Arc<RwLock<HashMap<String, Value>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl LocalStore for InMemoryStore {
    fn load(&self, unique_id: &str) -> Result<Option<Record>> {
        log::debug!("STORE LOAD: unique_id='{}'", unique_id);
        let data = self
            .data
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock"))?;
        match data.get(unique_id) {
            Some(value) => Ok(Some(Record::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    fn save(&self, record: &Record) -> Result<()> {
        let unique_id = record
            .unique_id()
            .ok_or_else(|| anyhow::anyhow!("Record missing required 'unique_identifier' field"))?
            .to_string();
        log::debug!("STORE SAVE: unique_id='{}'", unique_id);
        let mut data = self
            .data
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock"))?;
        data.insert(unique_id, record.to_value());
        Ok(())
    }

    fn all(&self) -> Result<Vec<Record>> {
        let data = self
            .data
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock"))?;
        let mut ids: Vec<&String> = data.keys().collect();
        ids.sort();
        let records = ids
            .into_iter()
            .map(|id| Record::from_value(data[id].clone()))
            .collect::<Result<Vec<_>>>()?;
        log::debug!("STORE ALL RESULT: {} records", records.len());
        Ok(records)
    }
}

impl Clone for InMemoryStore {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
        }
    }
}

/// One JSON file per record under a base directory.
pub struct FileStore {
    base_path: String,
}

impl FileStore {
    pub fn new(base_path: &str) -> Self {
        Self {
            base_path: base_path.to_string(),
        }
    }

    fn record_path(&self, unique_id: &str) -> String {
        format!("{}/{}.json", self.base_path, unique_id)
    }
}

impl LocalStore for FileStore {
    fn load(&self, unique_id: &str) -> Result<Option<Record>> {
        let full_path = self.record_path(unique_id);
        log::debug!("STORE LOAD: path='{}'", full_path);
        if !Path::new(&full_path).exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(full_path)?;
        Ok(Some(Record::from_json(&content)?))
    }

    fn save(&self, record: &Record) -> Result<()> {
        let unique_id = record
            .unique_id()
            .ok_or_else(|| anyhow::anyhow!("Record missing required 'unique_identifier' field"))?;
        let full_path = self.record_path(unique_id);
        log::debug!("STORE SAVE: path='{}'", full_path);
        if let Some(parent) = Path::new(&full_path).parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(full_path, record.to_json())?;
        Ok(())
    }

    fn all(&self) -> Result<Vec<Record>> {
        let path = Path::new(&self.base_path);
        if !path.exists() {
            log::debug!("STORE ALL RESULT: 0 records (path does not exist)");
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name.ends_with(".json") {
                files.push(entry.path());
            }
        }
        files.sort();

        let mut records = Vec::new();
        for file in files {
            let content = fs::read_to_string(file)?;
            records.push(Record::from_json(&content)?);
        }
        log::debug!("STORE ALL RESULT: {} records", records.len());
        Ok(records)
    }
}
