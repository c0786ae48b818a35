#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Blue/green table descriptors.
//!
//! The updater keeps two physical tables with identical schemas. At any
//! moment one of them is authoritative for readers; which one is derived
//! purely from the load timestamps held here, never from a separate flag.
//! The table with the later `last_updated` is active, and a tie resolves
//! to blue.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter};

/// Name of the key/value table the store keeps next to the data tables.
pub const META_TABLE: &str = "_meta";

/// One of the two alternating storage targets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TableColor {
    Blue,
    Green,
}

impl TableColor {
    /// The opposite color.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Blue => Self::Green,
            Self::Green => Self::Blue,
        }
    }
}

/// Rejected table names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableNameError {
    #[error("table name must not be empty")]
    Empty,

    #[error("table name {name:?} is not a plain SQL identifier ([A-Za-z_][A-Za-z0-9_]*)")]
    NotIdentifier { name: String },

    #[error("table name {0:?} is reserved")]
    Reserved(String),

    #[error("blue and green tables must differ, both are {0:?}")]
    Duplicate(String),
}

/// Checks that `name` can be interpolated into SQL as a bare identifier.
///
/// # Errors
///
/// Returns [`TableNameError`] if the name is empty, contains anything
/// outside `[A-Za-z0-9_]`, starts with a digit, or is [`META_TABLE`].
pub fn validate_table_name(name: &str) -> Result<(), TableNameError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(TableNameError::Empty);
    };

    let valid = (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(TableNameError::NotIdentifier {
            name: name.to_string(),
        });
    }

    if name.eq_ignore_ascii_case(META_TABLE) {
        return Err(TableNameError::Reserved(name.to_string()));
    }

    Ok(())
}

/// A physical table and the time of its last successful full load.
///
/// `last_updated` starts at the Unix epoch, meaning "never loaded".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    name: String,
    last_updated: DateTime<Utc>,
}

impl TableDescriptor {
    /// Creates a never-loaded descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`TableNameError`] if `name` fails [`validate_table_name`].
    pub fn new(name: impl Into<String>) -> Result<Self, TableNameError> {
        let name = name.into();
        validate_table_name(&name)?;
        Ok(Self {
            name,
            last_updated: DateTime::<Utc>::UNIX_EPOCH,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Whether a load has ever been recorded for this table.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.last_updated > DateTime::<Utc>::UNIX_EPOCH
    }
}

/// The table currently authoritative for readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTable {
    pub color: TableColor,
    pub name: String,
    pub last_updated: DateTime<Utc>,
}

/// Exactly two descriptors, blue and green.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePair {
    blue: TableDescriptor,
    green: TableDescriptor,
}

impl TablePair {
    /// Creates a pair of never-loaded tables.
    ///
    /// # Errors
    ///
    /// Returns [`TableNameError`] if either name is invalid or both are the
    /// same (compared case-insensitively, as the store does).
    pub fn new(blue: &str, green: &str) -> Result<Self, TableNameError> {
        let blue = TableDescriptor::new(blue)?;
        let green = TableDescriptor::new(green)?;
        if blue.name.eq_ignore_ascii_case(&green.name) {
            return Err(TableNameError::Duplicate(blue.name));
        }
        Ok(Self { blue, green })
    }

    #[must_use]
    pub const fn get(&self, color: TableColor) -> &TableDescriptor {
        match color {
            TableColor::Blue => &self.blue,
            TableColor::Green => &self.green,
        }
    }

    #[must_use]
    pub const fn blue(&self) -> &TableDescriptor {
        &self.blue
    }

    #[must_use]
    pub const fn green(&self) -> &TableDescriptor {
        &self.green
    }

    /// Color of the table with the later `last_updated`; blue on a tie.
    #[must_use]
    pub fn active_color(&self) -> TableColor {
        if self.green.last_updated > self.blue.last_updated {
            TableColor::Green
        } else {
            TableColor::Blue
        }
    }

    /// Color of the table the next refresh should load into.
    #[must_use]
    pub fn inactive_color(&self) -> TableColor {
        self.active_color().other()
    }

    /// Name of the table with the later `last_updated`; blue on a tie.
    ///
    /// Answers even before any load, in which case it is the blue table.
    #[must_use]
    pub fn last_updated_name(&self) -> &str {
        &self.get(self.active_color()).name
    }

    /// The active table, or `None` when neither table has ever been loaded.
    #[must_use]
    pub fn active(&self) -> Option<ActiveTable> {
        if !self.blue.is_loaded() && !self.green.is_loaded() {
            return None;
        }
        let color = self.active_color();
        let descriptor = self.get(color);
        Some(ActiveTable {
            color,
            name: descriptor.name.clone(),
            last_updated: descriptor.last_updated,
        })
    }

    /// Stamps `color` as freshly loaded at `now` and returns the timestamp
    /// actually recorded.
    ///
    /// The recorded value is clamped to be strictly later than the other
    /// table's, so the stamped table always becomes active even if the
    /// clock went backwards.
    pub fn promote(&mut self, color: TableColor, now: DateTime<Utc>) -> DateTime<Utc> {
        let floor = self.get(color.other()).last_updated + TimeDelta::microseconds(1);
        let stamped = now.max(floor);
        self.descriptor_mut(color).last_updated = stamped;
        stamped
    }

    /// Restores a previously persisted load timestamp.
    pub fn restore(&mut self, color: TableColor, last_updated: DateTime<Utc>) {
        self.descriptor_mut(color).last_updated = last_updated;
    }

    const fn descriptor_mut(&mut self, color: TableColor) -> &mut TableDescriptor {
        match color {
            TableColor::Blue => &mut self.blue,
            TableColor::Green => &mut self.green,
        }
    }
}
