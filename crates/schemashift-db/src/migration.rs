use std::collections::HashSet;
use std::fmt;

use schemashift_common::{Error, Result};

use crate::schema::SchemaHandle;

/// A schema-editing step run against an open transaction.
pub type MigrationFn = Box<dyn Fn(&SchemaHandle<'_>) -> Result<()> + Send + Sync>;

/// The inverse of a unit's apply step.
pub enum Revert {
    Reversible(MigrationFn),
    /// No structural inverse exists. Reverting only drops the ledger entry
    /// and reports this notice to the operator.
    NoticeOnly(String),
}

/// A named, ordered schema change with its forward and inverse steps.
///
/// Ids sort byte-wise; the usual shape is `YYYYMMDDHHMMSS-slug`.
pub struct MigrationUnit {
    id: String,
    apply: MigrationFn,
    revert: Revert,
}

impl MigrationUnit {
    pub fn new<A, R>(id: impl Into<String>, apply: A, revert: R) -> Self
    where
        A: Fn(&SchemaHandle<'_>) -> Result<()> + Send + Sync + 'static,
        R: Fn(&SchemaHandle<'_>) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            apply: Box::new(apply),
            revert: Revert::Reversible(Box::new(revert)),
        }
    }

    pub fn irreversible<A>(id: impl Into<String>, apply: A, notice: impl Into<String>) -> Self
    where
        A: Fn(&SchemaHandle<'_>) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            apply: Box::new(apply),
            revert: Revert::NoticeOnly(notice.into()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_reversible(&self) -> bool {
        matches!(self.revert, Revert::Reversible(_))
    }

    pub(crate) fn apply(&self, schema: &SchemaHandle<'_>) -> Result<()> {
        (self.apply)(schema)
    }

    pub(crate) fn revert(&self) -> &Revert {
        &self.revert
    }
}

impl fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationUnit")
            .field("id", &self.id)
            .field("reversible", &self.is_reversible())
            .finish()
    }
}

/// The full, sorted set of known units. Built once at load time.
#[derive(Debug)]
pub struct MigrationSet {
    units: Vec<MigrationUnit>,
}

impl MigrationSet {
    pub fn new(mut units: Vec<MigrationUnit>) -> Result<Self> {
        for unit in &units {
            validate_id(unit.id())?;
        }

        let mut seen = HashSet::new();
        for unit in &units {
            if !seen.insert(unit.id()) {
                return Err(Error::Config(format!(
                    "duplicate migration id: {}",
                    unit.id()
                )));
            }
        }

        units.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(Self { units })
    }

    pub fn get(&self, id: &str) -> Option<&MigrationUnit> {
        self.units
            .binary_search_by(|u| u.id.as_str().cmp(id))
            .ok()
            .map(|idx| &self.units[idx])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Units in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &MigrationUnit> {
        self.units.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.units.iter().map(|u| u.id())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::Config("migration id cannot be empty".into()));
    }
    if id.len() > 255 {
        return Err(Error::Config(format!("migration id too long: {id}")));
    }
    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::Config(format!(
            "migration id contains whitespace: {id:?}"
        )));
    }
    Ok(())
}
