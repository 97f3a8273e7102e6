use chrono::{Datelike, NaiveDate};
use serde::{Serialize, Deserialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    pub full_name: String,
    pub family_name: String,
    pub given_name: String,
    pub gender: String, // e.g., "male", "female", "other", "unknown"
    pub birth_date: Option<NaiveDate>,
    pub address: Address,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

impl Patient {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Age in whole years on `date`, counting a birthday as reached on the day itself.
    pub fn age_on(&self, date: NaiveDate) -> Option<u32> {
        let birth = self.birth_date?;
        if birth > date {
            return None;
        }
        let mut years = date.year() - birth.year();
        if (date.month(), date.day()) < (birth.month(), birth.day()) {
            years -= 1;
        }
        u32::try_from(years).ok()
    }
}
