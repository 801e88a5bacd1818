//! Types for couple profiles and events

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Which side of the couple a field belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partner {
    One,
    Two,
}

impl Partner {
    pub const BOTH: [Partner; 2] = [Partner::One, Partner::Two];
}

impl fmt::Display for Partner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partner::One => write!(f, "partner 1"),
            Partner::Two => write!(f, "partner 2"),
        }
    }
}

/// The shared profile of two partners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoupleProfile {
    /// Document id
    pub id: String,

    /// The user who created the profile
    pub user_id1: String,

    /// The invited partner, once the invitation is accepted
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub user_id2: Option<String>,

    #[serde(default)]
    pub partner1_name: String,

    #[serde(default)]
    pub partner2_name: String,

    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub partner1_photo: Option<String>,

    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub partner2_photo: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner1_birthday: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner2_birthday: Option<NaiveDate>,

    /// When the relationship started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_day_together: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl CoupleProfile {
    pub fn partner_name(&self, partner: Partner) -> &str {
        match partner {
            Partner::One => &self.partner1_name,
            Partner::Two => &self.partner2_name,
        }
    }

    pub fn partner_birthday(&self, partner: Partner) -> Option<NaiveDate> {
        match partner {
            Partner::One => self.partner1_birthday,
            Partner::Two => self.partner2_birthday,
        }
    }

    /// Merge a partial update into this record
    pub fn apply(&mut self, update: &CoupleProfileUpdate) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }
        fn set_opt<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *target = value.clone();
            }
        }

        set_opt(&mut self.user_id2, &update.user_id2);
        set(&mut self.partner1_name, &update.partner1_name);
        set(&mut self.partner2_name, &update.partner2_name);
        set_opt(&mut self.partner1_photo, &update.partner1_photo);
        set_opt(&mut self.partner2_photo, &update.partner2_photo);
        set_opt(&mut self.partner1_birthday, &update.partner1_birthday);
        set_opt(&mut self.partner2_birthday, &update.partner2_birthday);
        set_opt(&mut self.first_day_together, &update.first_day_together);
    }
}

/// Fields supplied when a profile is first set up
#[derive(Debug, Clone, PartialEq)]
pub struct NewCoupleProfile {
    pub user_id2: Option<String>,
    pub partner1_name: String,
    pub partner2_name: String,
    pub partner1_photo: Option<String>,
    pub partner2_photo: Option<String>,
    pub first_day_together: NaiveDate,
}

/// Partial profile update; only `Some` fields are written
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoupleProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id2: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner1_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner2_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner1_photo: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner2_photo: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner1_birthday: Option<NaiveDate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner2_birthday: Option<NaiveDate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_day_together: Option<DateTime<Utc>>,
}

impl CoupleProfileUpdate {
    pub fn with_name(mut self, partner: Partner, name: &str) -> Self {
        let name = Some(name.to_string());
        match partner {
            Partner::One => self.partner1_name = name,
            Partner::Two => self.partner2_name = name,
        }
        self
    }

    pub fn with_birthday(mut self, partner: Partner, birthday: NaiveDate) -> Self {
        match partner {
            Partner::One => self.partner1_birthday = Some(birthday),
            Partner::Two => self.partner2_birthday = Some(birthday),
        }
        self
    }

    pub fn name(&self, partner: Partner) -> Option<&str> {
        match partner {
            Partner::One => self.partner1_name.as_deref(),
            Partner::Two => self.partner2_name.as_deref(),
        }
    }

    pub fn birthday(&self, partner: Partner) -> Option<NaiveDate> {
        match partner {
            Partner::One => self.partner1_birthday,
            Partner::Two => self.partner2_birthday,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Event category; `birthday` is managed automatically
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    Birthday,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Birthday => "birthday",
            EventType::Other(tag) => tag,
        }
    }
}

impl From<String> for EventType {
    fn from(tag: String) -> Self {
        if tag == "birthday" {
            EventType::Birthday
        } else {
            EventType::Other(tag)
        }
    }
}

impl From<&str> for EventType {
    fn from(tag: &str) -> Self {
        EventType::from(tag.to_string())
    }
}

impl From<EventType> for String {
    fn from(tag: EventType) -> Self {
        tag.as_str().to_string()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dated entry on the couple's calendar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub couple_id: String,
    pub title: String,
    pub date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when adding an event
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub title: String,
    pub date: DateTime<Utc>,
    pub event_type: EventType,
    pub description: Option<String>,
}

/// Sort events ascending by date, keeping insertion order for ties
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| a.date.cmp(&b.date));
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}
