//! Record store with file locking.
//!
//! Records live in insertion-ordered tables inside one `Database` document.
//! The document is saved atomically (locked temp file, fsync, rename) and
//! loaded under a shared lock.

use crate::{
    Affinity, Appointment, CharacteristicChoice, Cooldown, Error, Mail, Patient, Preference,
    PriceRange, PriceRangeOffering, Profile, ProfileType, Psychologist, Result, Treatment,
};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use uuid::Uuid;

/// A row that can be addressed by id
pub trait Record: Clone {
    fn id(&self) -> Uuid;
}

macro_rules! impl_record {
    ($($ty:ty),* $(,)?) => {
        $(impl Record for $ty {
            fn id(&self) -> Uuid {
                self.id
            }
        })*
    };
}

impl_record!(
    Patient,
    Psychologist,
    PriceRange,
    PriceRangeOffering,
    Treatment,
    Appointment,
    Cooldown,
    Affinity,
    CharacteristicChoice,
    Preference,
    Mail,
);

/// Ordered, filterable collection of records
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Table<T> {
    rows: Vec<T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<T: Record> Table<T> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.rows.iter()
    }

    pub fn get(&self, id: Uuid) -> Option<T> {
        self.rows.iter().find(|r| r.id() == id).cloned()
    }

    /// All rows matching `pred`, in insertion order
    pub fn find<P>(&self, pred: P) -> Vec<T>
    where
        P: Fn(&T) -> bool,
    {
        self.rows.iter().filter(|r| pred(r)).cloned().collect()
    }

    /// First row matching `pred`
    pub fn find_one<P>(&self, pred: P) -> Option<T>
    where
        P: Fn(&T) -> bool,
    {
        self.rows.iter().find(|r| pred(r)).cloned()
    }

    pub fn insert(&mut self, record: T) -> Result<()> {
        if self.rows.iter().any(|r| r.id() == record.id()) {
            return Err(Error::Store(format!("duplicate id {}", record.id())));
        }
        self.rows.push(record);
        Ok(())
    }

    pub fn insert_many(&mut self, records: Vec<T>) -> Result<()> {
        for record in &records {
            if self.rows.iter().any(|r| r.id() == record.id()) {
                return Err(Error::Store(format!("duplicate id {}", record.id())));
            }
        }
        self.rows.extend(records);
        Ok(())
    }

    /// Replace the stored row carrying the same id
    pub fn update(&mut self, record: T) -> Result<()> {
        let slot = self
            .rows
            .iter_mut()
            .find(|r| r.id() == record.id())
            .ok_or_else(|| Error::Store(format!("no row with id {}", record.id())))?;
        *slot = record;
        Ok(())
    }

    pub fn delete(&mut self, id: Uuid) -> Option<T> {
        let idx = self.rows.iter().position(|r| r.id() == id)?;
        Some(self.rows.remove(idx))
    }

    /// Remove every row matching `pred`, returning how many went
    pub fn delete_where<P>(&mut self, pred: P) -> usize
    where
        P: Fn(&T) -> bool,
    {
        let before = self.rows.len();
        self.rows.retain(|r| !pred(r));
        before - self.rows.len()
    }
}

/// The full set of tables the engine reads and writes
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Database {
    #[serde(default)]
    pub patients: Table<Patient>,
    #[serde(default)]
    pub psychologists: Table<Psychologist>,
    #[serde(default)]
    pub price_ranges: Table<PriceRange>,
    #[serde(default)]
    pub offerings: Table<PriceRangeOffering>,
    #[serde(default)]
    pub treatments: Table<Treatment>,
    #[serde(default)]
    pub appointments: Table<Appointment>,
    #[serde(default)]
    pub cooldowns: Table<Cooldown>,
    #[serde(default)]
    pub affinities: Table<Affinity>,
    #[serde(default)]
    pub characteristic_choices: Table<CharacteristicChoice>,
    #[serde(default)]
    pub preferences: Table<Preference>,
    #[serde(default)]
    pub outbox: Table<Mail>,
}

/// Resolves a bare id to the kind of profile it names
pub trait ProfileLookup {
    fn lookup(&self, id: Uuid) -> Profile;
}

impl ProfileLookup for Database {
    fn lookup(&self, id: Uuid) -> Profile {
        if self.patients.iter().any(|p| p.id == id) {
            Profile::Patient(id)
        } else if self.psychologists.iter().any(|p| p.id == id) {
            Profile::Psychologist(id)
        } else {
            Profile::NotFound
        }
    }
}

/// Characteristic selections and weighted preferences per profile
pub trait CharacteristicSource {
    fn choices(&self, profile_id: Uuid, profile_type: ProfileType) -> Vec<CharacteristicChoice>;
    fn preferences(&self, profile_id: Uuid, profile_type: ProfileType) -> Vec<Preference>;
}

impl CharacteristicSource for Database {
    fn choices(&self, profile_id: Uuid, profile_type: ProfileType) -> Vec<CharacteristicChoice> {
        self.characteristic_choices
            .find(|c| c.profile_id == profile_id && c.profile_type == profile_type)
    }

    fn preferences(&self, profile_id: Uuid, profile_type: ProfileType) -> Vec<Preference> {
        self.preferences
            .find(|p| p.profile_id == profile_id && p.profile_type == profile_type)
    }
}

impl Database {
    pub fn price_range(&self, name: &str) -> Option<PriceRange> {
        self.price_ranges.find_one(|p| p.name == name)
    }

    /// Load the database from a file with shared locking
    ///
    /// Returns an empty database if the file doesn't exist. A file that
    /// cannot be parsed is an error: records are never silently dropped.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No store file found at {:?}, starting empty", path);
            return Ok(Self::default());
        }

        let file = File::open(path)?;
        file.lock_shared()?;

        let mut contents = String::new();
        let read = std::io::BufReader::new(&file).read_to_string(&mut contents);
        file.unlock()?;
        read?;

        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        let db = serde_json::from_str::<Database>(&contents)
            .map_err(|e| Error::Store(format!("failed to parse {:?}: {}", path, e)))?;
        tracing::debug!("Loaded store from {:?}", path);
        Ok(db)
    }

    /// Save the database to a file with exclusive locking
    ///
    /// Atomically writes by:
    /// 1. Writing to a temp file
    /// 2. Syncing to disk
    /// 3. Renaming over the original
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path.parent().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "store path missing parent")
        })?;
        std::fs::create_dir_all(parent)?;

        let temp = NamedTempFile::new_in(parent)?;
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(self)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;

        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved store to {:?}", path);
        Ok(())
    }

    /// Load, modify and save back. Nothing is written when `f` fails.
    pub fn update<F, T>(path: &Path, f: F) -> Result<T>
    where
        F: FnOnce(&mut Database) -> Result<T>,
    {
        let mut db = Self::load(path)?;
        let out = f(&mut db)?;
        db.save(path)?;
        Ok(out)
    }
}
