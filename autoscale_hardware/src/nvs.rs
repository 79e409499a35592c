//! File-backed calibration store.
//!
//! Stands in for the microcontroller's NVS preferences partition: one small
//! TOML file of `[namespace]` tables holding float keys. Writes rewrite the
//! whole file; there is a single writer by construction (the device loop).

use std::error::Error;
use std::path::PathBuf;

use autoscale_traits::CalStore;
use toml::Value;
use tracing::debug;

use crate::error::HwError;

pub struct FileCalStore {
    path: PathBuf,
}

impl FileCalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_table(&self) -> Result<toml::Table, HwError> {
        if !self.path.exists() {
            return Ok(toml::Table::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        text.parse::<toml::Table>()
            .map_err(|e| HwError::Store(format!("parse {}: {e}", self.path.display())))
    }

    fn write_table(&self, table: &toml::Table) -> Result<(), HwError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string(table)
            .map_err(|e| HwError::Store(format!("serialize store: {e}")))?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

impl CalStore for FileCalStore {
    fn load_f32(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<f32>, Box<dyn Error + Send + Sync>> {
        let table = self.read_table()?;
        let value = table
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .and_then(Value::as_float)
            .map(|f| f as f32);
        Ok(value)
    }

    fn save_f32(
        &mut self,
        namespace: &str,
        key: &str,
        value: f32,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut table = self.read_table()?;
        let ns = table
            .entry(namespace.to_string())
            .or_insert_with(|| Value::Table(toml::Table::new()));
        match ns.as_table_mut() {
            Some(ns) => {
                ns.insert(key.to_string(), Value::Float(f64::from(value)));
            }
            None => {
                return Err(Box::new(HwError::Store(format!(
                    "namespace {namespace} is not a table"
                ))));
            }
        }
        self.write_table(&table)?;
        debug!(namespace, key, value, "calibration store write");
        Ok(())
    }

    fn remove(
        &mut self,
        namespace: &str,
        key: &str,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut table = self.read_table()?;
        let mut removed = false;
        if let Some(ns) = table.get_mut(namespace).and_then(Value::as_table_mut) {
            removed = ns.remove(key).is_some();
        }
        if removed {
            self.write_table(&table)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_factor() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCalStore::new(dir.path().join("nvs.toml"));
        assert_eq!(store.load_f32("autoscale", "cal").unwrap(), None);

        store.save_f32("autoscale", "cal", 9863.233).unwrap();
        let loaded = store.load_f32("autoscale", "cal").unwrap().unwrap();
        assert!((loaded - 9863.233).abs() < 0.001);
    }

    #[test]
    fn remove_clears_only_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCalStore::new(dir.path().join("nvs.toml"));
        store.save_f32("autoscale", "cal", 1.0).unwrap();
        store.save_f32("autoscale", "other", 2.0).unwrap();

        store.remove("autoscale", "cal").unwrap();
        assert_eq!(store.load_f32("autoscale", "cal").unwrap(), None);
        assert!(store.load_f32("autoscale", "other").unwrap().is_some());
    }

    #[test]
    fn remove_of_absent_key_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCalStore::new(dir.path().join("nvs.toml"));
        store.remove("autoscale", "cal").unwrap();
    }
}
