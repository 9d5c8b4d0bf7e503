//! Harmonized record persistence.
//!
//! The engine talks to storage only through [`RecordStore`]: lookup by the
//! clinical natural key, lookup of every record at a site/date, insert and
//! update. [`MemoryStore`] is the bundled implementation; it enforces the
//! clinical uniqueness constraint and persists a versioned `bincode` snapshot
//! between runs.

use std::{
    ffi::OsString,
    fmt,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    data::{HarmonizedValues, Value},
    error::StoreError,
};

pub const PARTICIPANT_ID: &str = "participant_id";
pub const VISIT_DATE: &str = "visit_date";
pub const LOCATION_ID: &str = "location_id";

/// Fields that make up the natural keys; never overwritten by a climate merge.
pub const KEY_FIELDS: &[&str] = &[PARTICIPANT_ID, VISIT_DATE, LOCATION_ID];

const SNAPSHOT_VERSION: u32 = 1;

pub type RecordId = u64;

/// Identity of one clinical visit: `{participant_id, visit_date, location_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalKey {
    pub participant_id: Value,
    pub visit_date: Value,
    pub location_id: Value,
}

impl ClinicalKey {
    pub fn site_date(&self) -> SiteDateKey {
        SiteDateKey {
            location_id: self.location_id.clone(),
            visit_date: self.visit_date.clone(),
        }
    }

    fn of(values: &HarmonizedValues) -> Option<Self> {
        Some(ClinicalKey {
            participant_id: key_value(values, PARTICIPANT_ID)?.clone(),
            visit_date: key_value(values, VISIT_DATE)?.clone(),
            location_id: key_value(values, LOCATION_ID)?.clone(),
        })
    }
}

impl fmt::Display for ClinicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "participant {} on {} at {}",
            self.participant_id, self.visit_date, self.location_id
        )
    }
}

/// Site/date scope of a climate observation: `{location_id, visit_date}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteDateKey {
    pub location_id: Value,
    pub visit_date: Value,
}

impl SiteDateKey {
    fn matches(&self, values: &HarmonizedValues) -> bool {
        key_value(values, LOCATION_ID) == Some(&self.location_id)
            && key_value(values, VISIT_DATE) == Some(&self.visit_date)
    }
}

impl fmt::Display for SiteDateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.visit_date, self.location_id)
    }
}

fn key_value<'a>(values: &'a HarmonizedValues, field: &str) -> Option<&'a Value> {
    values.get(field).and_then(Option::as_ref)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonizedRecord {
    pub id: RecordId,
    pub values: HarmonizedValues,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl HarmonizedRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        key_value(&self.values, field)
    }

    pub fn clinical_key(&self) -> Option<ClinicalKey> {
        ClinicalKey::of(&self.values)
    }
}

pub trait RecordStore {
    fn find_one(&self, key: &ClinicalKey) -> Result<Option<HarmonizedRecord>, StoreError>;

    fn find_all(&self, key: &SiteDateKey) -> Result<Vec<HarmonizedRecord>, StoreError>;

    fn create(&mut self, values: HarmonizedValues) -> Result<HarmonizedRecord, StoreError>;

    /// Applies `changes` on top of the stored values of `record`.
    fn update(
        &mut self,
        record: &HarmonizedRecord,
        changes: HarmonizedValues,
    ) -> Result<HarmonizedRecord, StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Vec<HarmonizedRecord>,
    next_id: RecordId,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    next_id: RecordId,
    records: &'a [HarmonizedRecord],
}

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    next_id: RecordId,
    records: Vec<HarmonizedRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a snapshot; a missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let bytes = fs::read(path).with_context(|| format!("Opening store file {path:?}"))?;
        let (snapshot, _): (Snapshot, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .with_context(|| format!("Decoding store file {path:?}"))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Unsupported store version {} (expected {SNAPSHOT_VERSION})",
                snapshot.version
            ));
        }
        Ok(MemoryStore {
            records: snapshot.records,
            next_id: snapshot.next_id,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = SnapshotRef {
            version: SNAPSHOT_VERSION,
            next_id: self.next_id,
            records: &self.records,
        };
        let bytes = bincode::serde::encode_to_vec(&snapshot, bincode::config::standard())
            .context("Encoding store snapshot")?;
        // The old snapshot stays in place until the new one is fully on disk.
        let temp_path = snapshot_temp_path(path);
        let file = File::create(&temp_path)
            .with_context(|| format!("Creating store file {temp_path:?}"))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&bytes)
            .and_then(|_| writer.flush())
            .and_then(|_| writer.get_ref().sync_all())
            .with_context(|| format!("Writing store file {temp_path:?}"))?;
        drop(writer);
        fs::rename(&temp_path, path)
            .with_context(|| format!("Replacing store file {path:?} with {temp_path:?}"))
    }

    pub fn records(&self) -> &[HarmonizedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn ensure_unique(
        &self,
        values: &HarmonizedValues,
        skip: Option<RecordId>,
    ) -> Result<(), StoreError> {
        for field in KEY_FIELDS {
            if key_value(values, field).is_none() {
                return Err(StoreError::NotNull((*field).to_string()));
            }
        }
        let Some(key) = ClinicalKey::of(values) else {
            return Ok(());
        };
        let clash = self
            .records
            .iter()
            .filter(|record| Some(record.id) != skip)
            .find(|record| record.clinical_key().as_ref() == Some(&key));
        match clash {
            Some(existing) => Err(StoreError::UniqueViolation {
                key,
                existing: existing.id,
            }),
            None => Ok(()),
        }
    }
}

fn snapshot_temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("store"));
    name.push(".tmp");
    path.with_file_name(name)
}

impl RecordStore for MemoryStore {
    fn find_one(&self, key: &ClinicalKey) -> Result<Option<HarmonizedRecord>, StoreError> {
        Ok(self
            .records
            .iter()
            .find(|record| record.clinical_key().as_ref() == Some(key))
            .cloned())
    }

    fn find_all(&self, key: &SiteDateKey) -> Result<Vec<HarmonizedRecord>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|record| key.matches(&record.values))
            .cloned()
            .collect())
    }

    fn create(&mut self, values: HarmonizedValues) -> Result<HarmonizedRecord, StoreError> {
        self.ensure_unique(&values, None)?;
        self.next_id += 1;
        let now = Utc::now().naive_utc();
        let record = HarmonizedRecord {
            id: self.next_id,
            values,
            created_at: now,
            updated_at: now,
        };
        self.records.push(record.clone());
        Ok(record)
    }

    fn update(
        &mut self,
        record: &HarmonizedRecord,
        changes: HarmonizedValues,
    ) -> Result<HarmonizedRecord, StoreError> {
        let position = self
            .records
            .iter()
            .position(|stored| stored.id == record.id)
            .ok_or(StoreError::MissingRecord(record.id))?;
        let mut values = self.records[position].values.clone();
        values.extend(changes);
        self.ensure_unique(&values, Some(record.id))?;

        let stored = &mut self.records[position];
        stored.values = values;
        stored.updated_at = Utc::now().naive_utc();
        Ok(stored.clone())
    }
}
