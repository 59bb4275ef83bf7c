use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::tributary::cluster::Partition;
use crate::tributary::{Error, Result};


pub const DATE_OF_BIRTH: &str = "dateOfBirth";

/// The columns an update may touch. Anything else is rejected as unauthorized.
pub const ALLOWED_COLUMNS: [&str; 10] = [
    "firstName",
    "lastName",
    "address1",
    "address2",
    "city",
    "country",
    "zipCode",
    "phoneNumber",
    "gender",
    DATE_OF_BIRTH,
];

/// A row of the Users table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Generated by the primary on insert, None for a user not yet created.
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub address1: Option<String>,
    #[serde(default)]
    pub address2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
}

impl User {
    pub fn birth_year(&self) -> Option<i32> {
        self.date_of_birth.map(|d| d.year())
    }

    /// The partition owning this row, or a validation error if it has none.
    pub fn partition(&self) -> Result<Partition> {
        Partition::of_birth_date(self.date_of_birth)
    }

    /// The value of a column by its SQL name, as text.
    pub fn column(&self, name: &str) -> Option<String> {
        match name {
            "firstName" => self.first_name.clone(),
            "lastName" => self.last_name.clone(),
            "address1" => self.address1.clone(),
            "address2" => self.address2.clone(),
            "city" => self.city.clone(),
            "country" => self.country.clone(),
            "zipCode" => self.zip_code.clone(),
            "phoneNumber" => self.phone_number.clone(),
            "gender" => self.gender.clone(),
            DATE_OF_BIRTH => self.date_of_birth.map(|d| d.format("%Y-%m-%d").to_string()),
            _ => None,
        }
    }

    /// Apply a validated patch to this row in memory.
    pub fn apply(&mut self, patch: &UserPatch) -> Result<()> {
        for (column, value) in patch.iter() {
            let value = value.clone();
            match column {
                "firstName" => self.first_name = value,
                "lastName" => self.last_name = value,
                "address1" => self.address1 = value,
                "address2" => self.address2 = value,
                "city" => self.city = value,
                "country" => self.country = value,
                "zipCode" => self.zip_code = value,
                "phoneNumber" => self.phone_number = value,
                "gender" => self.gender = value,
                DATE_OF_BIRTH => {
                    self.date_of_birth = match value {
                        Some(s) => Some(parse_birth_date(&s)?),
                        None => None,
                    }
                },
                other => return Err(Error::authorization(format!("Unauthorized column: {}", other))),
            }
        }
        Ok(())
    }
}

/// Parse a birth date given as YYYY-MM-DD or MM/DD/YYYY.
pub fn parse_birth_date(s: &str) -> Result<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%m/%d/%Y"))
        .map_err(|_| Error::validation(format!("invalid dateOfBirth {}", s)))
}

/// A set of column updates, keyed by SQL column name. A None value sets the column to NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserPatch {
    columns: BTreeMap<String, Option<String>>,
}

impl UserPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<C: Into<String>, V: Into<String>>(mut self, column: C, value: V) -> Self {
        self.columns.insert(column.into(), Some(value.into()));
        self
    }

    pub fn clear<C: Into<String>>(mut self, column: C) -> Self {
        self.columns.insert(column.into(), None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn iter(&self) -> impl Iterator<Item=(&str, &Option<String>)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Check every column is in the allow-list and that there is at least one.
    pub fn check_columns(&self) -> Result<()> {
        for column in self.columns.keys() {
            if !ALLOWED_COLUMNS.contains(&column.as_str()) {
                return Err(Error::authorization(format!("Unauthorized column: {}", column)));
            }
        }
        if self.columns.is_empty() {
            return Err(Error::validation("No valid columns provided."));
        }
        Ok(())
    }

    /// The partition the patch would move the row to, if it sets dateOfBirth.
    /// Clearing dateOfBirth or setting a year outside the partitions is a validation error.
    pub fn target_partition(&self) -> Result<Option<Partition>> {
        match self.columns.get(DATE_OF_BIRTH) {
            None => Ok(None),
            Some(None) => Err(Error::validation("dateOfBirth cannot be cleared")),
            Some(Some(s)) => {
                let date = parse_birth_date(s)?;
                Partition::from_year(date.year())
                    .map(Some)
                    .map_err(|_| Error::validation("DOB must remain 2006 or 2007."))
            }
        }
    }
}
