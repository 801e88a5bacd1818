//! Birthday events derived from profile birthdays
//!
//! Each partner with a known birthday has at most one `birthday` event,
//! titled `"<name>'s Birthday"` and dated on the next anniversary. Whenever
//! a profile update sets a birthday, every event carrying that title is
//! deleted and a single fresh one is inserted.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use tracing::{debug, info, warn};

use super::types::{CoupleProfile, CoupleProfileUpdate, Event, EventType, Partner};
use crate::clock::Clock;
use crate::db::{to_fields, DocumentStore, Query};
use crate::error::Error;

pub fn birthday_title(name: &str) -> String {
    format!("{}'s Birthday", name)
}

pub fn birthday_message(name: &str) -> String {
    format!("Happy Birthday {}! 🎉", name)
}

/// The nearest anniversary of `birthday` that is today or later
///
/// Feb 29 birthdays fall on Mar 1 in non-leap years.
pub fn next_occurrence(birthday: NaiveDate, today: NaiveDate) -> NaiveDate {
    let this_year = anniversary(birthday, today.year());
    if this_year < today {
        anniversary(birthday, today.year() + 1)
    } else {
        this_year
    }
}

fn anniversary(birthday: NaiveDate, year: i32) -> NaiveDate {
    birthday
        .with_year(year)
        .or_else(|| NaiveDate::from_ymd_opt(year, 3, 1))
        .unwrap_or(birthday)
}

/// Stored timestamp for an all-day event on `date`
pub fn event_timestamp(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Work to do for one partner
#[derive(Debug, Clone, PartialEq)]
pub struct BirthdayPlan {
    pub partner: Partner,
    pub name: String,
    pub birthday: NaiveDate,
    /// Titles whose birthday events are removed before inserting
    pub stale_titles: Vec<String>,
}

/// Decide which partners' birthday events an update affects
///
/// `previous` is the profile as stored before the update. A bare name change
/// only produces a plan when `retitle_on_rename` is set and a birthday is
/// already stored for that partner.
pub fn plan(
    update: &CoupleProfileUpdate,
    previous: &CoupleProfile,
    retitle_on_rename: bool,
) -> Vec<BirthdayPlan> {
    let mut plans = Vec::new();

    for partner in Partner::BOTH {
        let old_name = previous.partner_name(partner).trim();
        // A blank name in the update falls back to the stored one
        let new_name = update
            .name(partner)
            .map(str::trim)
            .filter(|n| !n.is_empty());
        let name = new_name.unwrap_or(old_name).to_string();

        let renamed = new_name.is_some_and(|n| n != old_name) && !old_name.is_empty();

        let birthday = match update.birthday(partner) {
            Some(birthday) => birthday,
            None if retitle_on_rename && renamed => match previous.partner_birthday(partner) {
                Some(birthday) => birthday,
                None => continue,
            },
            None => continue,
        };

        if name.is_empty() {
            warn!(%partner, "No name known, skipping birthday event");
            continue;
        }

        let mut stale_titles = vec![birthday_title(&name)];
        if retitle_on_rename && renamed {
            stale_titles.insert(0, birthday_title(old_name));
        }

        plans.push(BirthdayPlan {
            partner,
            name,
            birthday,
            stale_titles,
        });
    }

    plans
}

/// Outcome of reconciling one partner
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    /// Ids of the deleted events
    pub removed: Vec<String>,
    /// The freshly inserted birthday event
    pub created: Event,
}

/// Replace the partner's birthday events with one dated on the next occurrence
pub async fn reconcile(
    db: &dyn DocumentStore,
    events_collection: &str,
    couple_id: &str,
    plan: &BirthdayPlan,
    clock: &dyn Clock,
) -> Result<Reconciled, Error> {
    let next = next_occurrence(plan.birthday, clock.today());
    debug!(partner = %plan.partner, %next, "Reconciling birthday event");

    let mut removed = Vec::new();
    for title in &plan.stale_titles {
        let query = Query::new()
            .eq("coupleId", couple_id)
            .eq("type", EventType::Birthday.as_str())
            .eq("title", title.as_str());

        for doc in db.query(events_collection, &query).await? {
            db.delete(events_collection, &doc.id).await?;
            removed.push(doc.id);
        }
    }

    let event = Event {
        id: String::new(),
        couple_id: couple_id.to_string(),
        title: birthday_title(&plan.name),
        date: event_timestamp(next),
        event_type: EventType::Birthday,
        description: birthday_message(&plan.name),
        created_at: clock.now(),
    };
    let created = db
        .insert(events_collection, to_fields(&event)?)
        .await?
        .decode::<Event>()?;

    info!(
        partner = %plan.partner,
        removed = removed.len(),
        date = %next,
        "Birthday event replaced"
    );
    Ok(Reconciled { removed, created })
}
