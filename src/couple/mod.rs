//! Couple profile and events store

pub mod birthday;
mod types;

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::ClientOptions;
use crate::db::{decode_all, to_fields, Document, DocumentStore, Query};
use crate::error::Error;
use crate::realtime::{topic, Subscription};
use crate::storage::{skip_upload, Notifier, PictureUpload};

pub use types::*;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Default)]
struct CoupleState {
    couple: Option<CoupleProfile>,
    events: Vec<Event>,
    loading: bool,
}

/// Sets the loading flag for as long as it is alive
struct Loading<'a>(&'a RwLock<CoupleState>);

impl<'a> Loading<'a> {
    fn start(state: &'a RwLock<CoupleState>) -> Self {
        state.write().loading = true;
        Self(state)
    }
}

impl Drop for Loading<'_> {
    fn drop(&mut self) {
        self.0.write().loading = false;
    }
}

/// Holds the couple profile and its event list, kept in sync with the
/// document database
pub struct CoupleStore {
    db: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    options: ClientOptions,
    state: Arc<RwLock<CoupleState>>,
}

impl CoupleStore {
    pub fn new(
        db: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        options: ClientOptions,
    ) -> Self {
        Self {
            db,
            clock,
            notifier,
            options,
            state: Arc::new(RwLock::new(CoupleState::default())),
        }
    }

    /// The cached couple profile
    pub fn couple_data(&self) -> Option<CoupleProfile> {
        self.state.read().couple.clone()
    }

    /// The cached events, ascending by date
    pub fn events(&self) -> Vec<Event> {
        self.state.read().events.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().loading
    }

    /// Whole days since the first day together, rounded up; zero without a
    /// profile or start date
    pub fn days_together_count(&self) -> i64 {
        let Some(first_day) = self
            .state
            .read()
            .couple
            .as_ref()
            .and_then(|c| c.first_day_together)
        else {
            return 0;
        };

        let elapsed = (self.clock.now() - first_day).num_milliseconds().abs();
        (elapsed + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY
    }

    /// Find the profile the user belongs to, in either partner slot
    pub async fn get_couple_data(&self, user_id: &str) -> Result<Option<CoupleProfile>, Error> {
        let _loading = Loading::start(&self.state);

        match self.find_profile(user_id).await {
            Ok(profile) => {
                debug!(user_id, found = profile.is_some(), "Loaded couple data");
                self.state.write().couple = profile.clone();
                Ok(profile)
            }
            Err(e) => {
                error!("Error getting couple data: {}", e);
                Err(e)
            }
        }
    }

    async fn find_profile(&self, user_id: &str) -> Result<Option<CoupleProfile>, Error> {
        for slot in ["userId1", "userId2"] {
            let query = Query::new().eq(slot, user_id).limit(1);
            let docs = self.db.query(&self.options.couples_collection, &query).await?;
            if let Some(doc) = docs.first() {
                return Ok(Some(doc.decode()?));
            }
        }
        Ok(None)
    }

    /// Create a profile with `user_id` as partner one
    pub async fn create_couple_profile(
        &self,
        user_id: &str,
        data: NewCoupleProfile,
    ) -> Result<CoupleProfile, Error> {
        let _loading = Loading::start(&self.state);

        let profile = CoupleProfile {
            id: String::new(),
            user_id1: user_id.to_string(),
            user_id2: data.user_id2.filter(|id| !id.is_empty()),
            partner1_name: data.partner1_name,
            partner2_name: data.partner2_name,
            partner1_photo: data.partner1_photo,
            partner2_photo: data.partner2_photo,
            partner1_birthday: None,
            partner2_birthday: None,
            first_day_together: Some(birthday::event_timestamp(data.first_day_together)),
            created_at: self.clock.now(),
        };

        let result = async {
            let doc = self
                .db
                .insert(&self.options.couples_collection, to_fields(&profile)?)
                .await?;
            doc.decode::<CoupleProfile>()
        }
        .await;

        match result {
            Ok(stored) => {
                info!(couple_id = %stored.id, "Created couple profile");
                self.state.write().couple = Some(stored.clone());
                Ok(stored)
            }
            Err(e) => {
                error!("Error creating couple profile: {}", e);
                Err(e)
            }
        }
    }

    /// Merge `update` into the stored profile and the cache, then bring the
    /// birthday events in line with it
    pub async fn update_couple_profile(
        &self,
        couple_id: &str,
        update: CoupleProfileUpdate,
    ) -> Result<CoupleProfile, Error> {
        let _loading = Loading::start(&self.state);

        let result = self.apply_update(couple_id, &update).await;
        if let Err(e) = &result {
            error!("Error updating couple profile: {}", e);
        }
        result
    }

    async fn apply_update(
        &self,
        couple_id: &str,
        update: &CoupleProfileUpdate,
    ) -> Result<CoupleProfile, Error> {
        let cached = self
            .state
            .read()
            .couple
            .clone()
            .filter(|c| c.id == couple_id);
        let previous = match cached {
            Some(profile) => profile,
            None => self.fetch_profile(couple_id).await?,
        };

        if !update.is_empty() {
            self.db
                .update(&self.options.couples_collection, couple_id, to_fields(update)?)
                .await?;
        }

        let mut merged = previous.clone();
        merged.apply(update);
        self.state.write().couple = Some(merged.clone());

        let plans = birthday::plan(update, &previous, self.options.retitle_birthdays_on_rename);
        for plan in &plans {
            let outcome = birthday::reconcile(
                self.db.as_ref(),
                &self.options.events_collection,
                couple_id,
                plan,
                self.clock.as_ref(),
            )
            .await?;

            let mut state = self.state.write();
            state.events.retain(|e| !outcome.removed.contains(&e.id));
            state.events.push(outcome.created);
            sort_events(&mut state.events);
        }

        Ok(merged)
    }

    async fn fetch_profile(&self, couple_id: &str) -> Result<CoupleProfile, Error> {
        self.db
            .get(&self.options.couples_collection, couple_id)
            .await?
            .ok_or_else(|| Error::database(format!("Couple profile {} not found", couple_id)))?
            .decode()
    }

    /// Upload a profile picture for one partner
    ///
    /// File storage is not enabled for this deployment: nothing is uploaded,
    /// the user is notified and the returned URL is empty.
    pub async fn upload_profile_picture(
        &self,
        upload: PictureUpload,
        partner: Partner,
    ) -> Result<String, Error> {
        Ok(skip_upload(self.notifier.as_ref(), &upload, partner))
    }

    /// Load all events of a couple, ascending by date
    pub async fn get_events(&self, couple_id: &str) -> Result<Vec<Event>, Error> {
        let _loading = Loading::start(&self.state);

        let result = async {
            let docs = self
                .db
                .query(&self.options.events_collection, &events_query(couple_id))
                .await?;
            decode_events(docs)
        }
        .await;

        match result {
            Ok(events) => {
                debug!(couple_id, count = events.len(), "Loaded events");
                self.state.write().events = events.clone();
                Ok(events)
            }
            Err(e) => {
                error!("Error getting events: {}", e);
                Err(e)
            }
        }
    }

    /// Add an event and keep the cached list sorted
    pub async fn add_event(&self, couple_id: &str, data: NewEvent) -> Result<Event, Error> {
        let _loading = Loading::start(&self.state);

        let event = Event {
            id: String::new(),
            couple_id: couple_id.to_string(),
            title: data.title,
            date: data.date,
            event_type: data.event_type,
            description: data.description.unwrap_or_default(),
            created_at: self.clock.now(),
        };
        debug!(couple_id, title = %event.title, "Adding event");

        let result = async {
            let doc = self
                .db
                .insert(&self.options.events_collection, to_fields(&event)?)
                .await?;
            doc.decode::<Event>()
        }
        .await;

        match result {
            Ok(stored) => {
                info!(event_id = %stored.id, "Event saved");
                let mut state = self.state.write();
                state.events.push(stored.clone());
                sort_events(&mut state.events);
                Ok(stored)
            }
            Err(e) => {
                error!("Error adding event: {}", e);
                Err(e)
            }
        }
    }

    /// Delete an event remotely and from the cache
    pub async fn delete_event(&self, event_id: &str) -> Result<(), Error> {
        let _loading = Loading::start(&self.state);

        match self.db.delete(&self.options.events_collection, event_id).await {
            Ok(()) => {
                info!(event_id, "Event deleted");
                self.state.write().events.retain(|e| e.id != event_id);
                Ok(())
            }
            Err(e) => {
                error!("Error deleting event: {}", e);
                Err(e)
            }
        }
    }

    /// Follow one profile document; `callback` runs whenever it exists
    pub fn subscribe_to_couple_data<F>(&self, couple_id: &str, callback: F) -> Subscription
    where
        F: Fn(&CoupleProfile) + Send + Sync + 'static,
    {
        let collection = &self.options.couples_collection;
        let name = topic(&self.options.db_schema, collection, Some(couple_id));
        let mut stream = self.db.watch_document(collection, couple_id);
        let state = self.state.clone();
        let task_topic = name.clone();

        let task = tokio::spawn(async move {
            while let Some(item) = stream.recv().await {
                let profile = match item {
                    Ok(Some(doc)) => doc.decode::<CoupleProfile>(),
                    Ok(None) => {
                        debug!(topic = %task_topic, "Couple document does not exist");
                        continue;
                    }
                    Err(e) => Err(e),
                };

                match profile {
                    Ok(profile) => {
                        state.write().couple = Some(profile.clone());
                        callback(&profile);
                    }
                    Err(e) => error!(topic = %task_topic, "Error in couple data subscription: {}", e),
                }
            }
            warn!(topic = %task_topic, "Couple data stream ended");
        });

        Subscription::new(name, task)
    }

    /// Follow the couple's events; `callback` gets the full sorted list on
    /// every change
    pub fn subscribe_to_events<F>(&self, couple_id: &str, callback: F) -> Subscription
    where
        F: Fn(&[Event]) + Send + Sync + 'static,
    {
        let collection = &self.options.events_collection;
        let name = topic(&self.options.db_schema, collection, Some(couple_id));
        let mut stream = self.db.watch_query(collection, events_query(couple_id));
        let state = self.state.clone();
        let task_topic = name.clone();

        debug!(topic = %name, "Setting up events listener");
        let task = tokio::spawn(async move {
            while let Some(item) = stream.recv().await {
                match item.and_then(decode_events) {
                    Ok(events) => {
                        debug!(topic = %task_topic, count = events.len(), "Events snapshot received");
                        state.write().events = events.clone();
                        callback(&events);
                    }
                    Err(e) => error!(topic = %task_topic, "Error in events subscription: {}", e),
                }
            }
            warn!(topic = %task_topic, "Events stream ended");
        });

        Subscription::new(name, task)
    }
}

fn events_query(couple_id: &str) -> Query {
    Query::new().eq("coupleId", couple_id).order("date", true)
}

fn decode_events(docs: Vec<Document>) -> Result<Vec<Event>, Error> {
    let mut events: Vec<Event> = decode_all(docs)?;
    sort_events(&mut events);
    Ok(events)
}
