use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::AvailabilityStatus;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Facility {
    pub facility_id: Uuid,
    pub name: String,
    pub address: String,
    pub contact_information: Option<String>,
    pub operating_hours: Option<String>,
    pub services: Option<String>,
    pub amenities: Option<String>,
}

pub const FACILITY_COLUMNS: &str =
    "facility_id, name, address, contact_information, operating_hours, services, amenities";

/// A provider's bookable window at a facility.
///
/// Recurring windows apply to every `day_of_week` (0 = Sunday). A non-recurring
/// window applies only on `specific_date` and replaces the recurring windows of that day.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Availability {
    pub availability_id: Uuid,
    pub provider_id: Uuid,
    pub facility_id: Uuid,
    pub day_of_week: i16,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_minutes: i32,
    pub is_recurring: bool,
    pub specific_date: Option<NaiveDate>,
    #[sqlx(try_from = "String")]
    pub status: AvailabilityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const AVAILABILITY_COLUMNS: &str = "availability_id, provider_id, facility_id, day_of_week, \
     start_time, end_time, slot_duration_minutes, is_recurring, specific_date, status, created_at, updated_at";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AvailabilityError {
    #[error("day_of_week must be between 0 (Sunday) and 6 (Saturday)")]
    DayOfWeek,
    #[error("start_time must be before end_time")]
    EmptyWindow,
    #[error("slot_duration_minutes must be positive and fit inside the window")]
    SlotDuration,
    #[error("specific_date is required for a non-recurring window")]
    MissingDate,
}

/// Proposed window shape, checked before insert.
#[derive(Debug, Clone)]
pub struct WindowSpec {
    pub day_of_week: i16,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_minutes: i32,
    pub is_recurring: bool,
    pub specific_date: Option<NaiveDate>,
}

impl WindowSpec {
    /// Normalizes `day_of_week` from `specific_date` for date overrides.
    pub fn validate(mut self) -> Result<Self, AvailabilityError> {
        if self.start_time >= self.end_time {
            return Err(AvailabilityError::EmptyWindow);
        }
        let window_minutes = (self.end_time - self.start_time).num_minutes();
        if self.slot_duration_minutes <= 0 || i64::from(self.slot_duration_minutes) > window_minutes {
            return Err(AvailabilityError::SlotDuration);
        }
        if !self.is_recurring {
            let date = self.specific_date.ok_or(AvailabilityError::MissingDate)?;
            self.day_of_week = day_of_week(date);
        }
        if !(0..=6).contains(&self.day_of_week) {
            return Err(AvailabilityError::DayOfWeek);
        }
        Ok(self)
    }
}

pub fn day_of_week(date: NaiveDate) -> i16 {
    date.weekday().num_days_from_sunday() as i16
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenSlot {
    pub facility_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub duration_minutes: i32,
}

/// Free slots on `date` given the provider's windows and already-booked intervals.
///
/// Only active windows count. If any active date override exists for `date`, the
/// recurring windows of that weekday are ignored. Times are interpreted as UTC.
pub fn open_slots(
    windows: &[Availability],
    booked: &[(DateTime<Utc>, DateTime<Utc>)],
    date: NaiveDate,
) -> Vec<OpenSlot> {
    let active = windows
        .iter()
        .filter(|w| w.status == AvailabilityStatus::Active);

    let overrides: Vec<&Availability> = active
        .clone()
        .filter(|w| !w.is_recurring && w.specific_date == Some(date))
        .collect();

    let applicable: Vec<&Availability> = if overrides.is_empty() {
        let dow = day_of_week(date);
        active.filter(|w| w.is_recurring && w.day_of_week == dow).collect()
    } else {
        overrides
    };

    let mut slots = Vec::new();
    for window in applicable {
        let step = Duration::minutes(i64::from(window.slot_duration_minutes.max(1)));
        let window_end = date.and_time(window.end_time).and_utc();
        let mut cursor = date.and_time(window.start_time).and_utc();

        while cursor + step <= window_end {
            let slot_end = cursor + step;
            let taken = booked
                .iter()
                .any(|(start, end)| cursor < *end && slot_end > *start);
            if !taken {
                slots.push(OpenSlot {
                    facility_id: window.facility_id,
                    start_at: cursor,
                    end_at: slot_end,
                    duration_minutes: window.slot_duration_minutes,
                });
            }
            cursor = slot_end;
        }
    }

    slots.sort_by_key(|s| s.start_at);
    // overlapping windows can yield overlapping slots; keep the earliest
    let mut last_end = DateTime::<Utc>::MIN_UTC;
    slots.retain(|s| {
        if s.start_at >= last_end {
            last_end = s.end_at;
            true
        } else {
            false
        }
    });
    slots
}
