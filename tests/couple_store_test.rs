use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use togetherly::clock::FixedClock;
use togetherly::config::ClientOptions;
use togetherly::couple::birthday::event_timestamp;
use togetherly::couple::{
    CoupleProfile, CoupleProfileUpdate, CoupleStore, Event, EventType, NewCoupleProfile,
    NewEvent, Partner,
};
use togetherly::db::MemoryDocumentStore;
use togetherly::storage::{CollectingNotifier, PictureUpload, UPLOAD_DISABLED_NOTICE};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

struct Fixture {
    store: CoupleStore,
    db: MemoryDocumentStore,
    notifier: Arc<CollectingNotifier>,
}

fn fixture_with(today: NaiveDate, options: ClientOptions) -> Fixture {
    let db = MemoryDocumentStore::new();
    let notifier = Arc::new(CollectingNotifier::new());
    let store = CoupleStore::new(
        Arc::new(db.clone()),
        Arc::new(FixedClock::at_date(today)),
        notifier.clone(),
        options,
    );
    Fixture {
        store,
        db,
        notifier,
    }
}

fn fixture(today: NaiveDate) -> Fixture {
    fixture_with(today, ClientOptions::default())
}

async fn create_profile(store: &CoupleStore, partner1: &str, partner2: &str) -> CoupleProfile {
    store
        .create_couple_profile(
            "user-1",
            NewCoupleProfile {
                user_id2: Some("user-2".to_string()),
                partner1_name: partner1.to_string(),
                partner2_name: partner2.to_string(),
                partner1_photo: None,
                partner2_photo: None,
                first_day_together: date(2020, 1, 1),
            },
        )
        .await
        .unwrap()
}

fn stored_events(db: &MemoryDocumentStore) -> Vec<Event> {
    db.documents("events")
        .iter()
        .map(|doc| doc.decode().unwrap())
        .collect()
}

fn new_event(title: &str, day: NaiveDate) -> NewEvent {
    NewEvent {
        title: title.to_string(),
        date: event_timestamp(day),
        event_type: EventType::from("anniversary"),
        description: None,
    }
}

#[tokio::test]
async fn test_days_together_count() {
    let f = fixture(date(2024, 1, 1));
    assert_eq!(f.store.days_together_count(), 0);

    create_profile(&f.store, "Alex", "Sam").await;
    assert_eq!(f.store.days_together_count(), 1461);
}

#[tokio::test]
async fn test_find_profile_from_either_slot() {
    let f = fixture(date(2024, 1, 1));
    let created = create_profile(&f.store, "Alex", "Sam").await;
    assert_eq!(created.user_id1, "user-1");
    assert!(!created.id.is_empty());

    let found = f.store.get_couple_data("user-2").await.unwrap();
    assert_eq!(found.as_ref().map(|c| c.id.as_str()), Some(created.id.as_str()));
    assert_eq!(f.store.couple_data(), found);

    assert_eq!(f.store.get_couple_data("stranger").await.unwrap(), None);
    assert_eq!(f.store.couple_data(), None);
    assert!(!f.store.is_loading());
}

#[tokio::test]
async fn test_birthday_already_passed_this_year() {
    let f = fixture(date(2024, 6, 1));
    let profile = create_profile(&f.store, "", "Sam").await;

    let update = CoupleProfileUpdate::default()
        .with_name(Partner::One, "Alex")
        .with_birthday(Partner::One, date(1990, 3, 15));
    let updated = f.store.update_couple_profile(&profile.id, update).await.unwrap();
    assert_eq!(updated.partner1_name, "Alex");
    assert_eq!(updated.partner1_birthday, Some(date(1990, 3, 15)));

    let events = stored_events(&f.db);
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.title, "Alex's Birthday");
    assert_eq!(event.event_type, EventType::Birthday);
    assert_eq!(event.date, event_timestamp(date(2025, 3, 15)));
    assert_eq!(event.description, "Happy Birthday Alex! 🎉");
    assert_eq!(event.couple_id, profile.id);

    assert_eq!(f.store.events(), events);
}

#[tokio::test]
async fn test_birthday_later_this_year() {
    let f = fixture(date(2024, 1, 1));
    let profile = create_profile(&f.store, "Alex", "Sam").await;

    let update = CoupleProfileUpdate::default().with_birthday(Partner::One, date(1990, 3, 15));
    f.store.update_couple_profile(&profile.id, update).await.unwrap();

    let events = stored_events(&f.db);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].date, event_timestamp(date(2024, 3, 15)));
}

#[tokio::test]
async fn test_repeated_birthday_update_keeps_one_event() {
    let f = fixture(date(2024, 1, 1));
    let profile = create_profile(&f.store, "Alex", "Sam").await;

    for birthday in [date(1990, 3, 15), date(1990, 3, 15), date(1990, 4, 2)] {
        let update = CoupleProfileUpdate::default().with_birthday(Partner::One, birthday);
        f.store.update_couple_profile(&profile.id, update).await.unwrap();
    }

    let events = stored_events(&f.db);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].date, event_timestamp(date(2024, 4, 2)));
    assert_eq!(f.store.events().len(), 1);
}

#[tokio::test]
async fn test_both_birthdays_and_other_events_untouched() {
    let f = fixture(date(2024, 1, 1));
    let profile = create_profile(&f.store, "Alex", "Sam").await;
    f.store
        .add_event(&profile.id, new_event("Alex's Birthday", date(2024, 8, 1)))
        .await
        .unwrap();

    let update = CoupleProfileUpdate::default()
        .with_birthday(Partner::One, date(1990, 3, 15))
        .with_birthday(Partner::Two, date(1991, 2, 1));
    f.store.update_couple_profile(&profile.id, update).await.unwrap();

    let titles: Vec<String> = f.store.events().into_iter().map(|e| e.title).collect();
    assert_eq!(
        titles,
        vec!["Sam's Birthday", "Alex's Birthday", "Alex's Birthday"]
    );
    // Only birthday-typed events are replaced
    assert_eq!(stored_events(&f.db).len(), 3);
}

#[tokio::test]
async fn test_update_without_birthday_leaves_events() {
    let f = fixture(date(2024, 1, 1));
    let profile = create_profile(&f.store, "Alex", "Sam").await;
    let update = CoupleProfileUpdate::default().with_birthday(Partner::One, date(1990, 3, 15));
    f.store.update_couple_profile(&profile.id, update).await.unwrap();

    let update = CoupleProfileUpdate::default().with_name(Partner::One, "Alexandra");
    let updated = f.store.update_couple_profile(&profile.id, update).await.unwrap();
    assert_eq!(updated.partner1_name, "Alexandra");

    let events = stored_events(&f.db);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].title, "Alex's Birthday");
}

#[tokio::test]
async fn test_rename_retitles_when_enabled() {
    let options = ClientOptions::default().with_retitle_birthdays_on_rename(true);
    let f = fixture_with(date(2024, 1, 1), options);
    let profile = create_profile(&f.store, "Alex", "Sam").await;
    let update = CoupleProfileUpdate::default().with_birthday(Partner::One, date(1990, 3, 15));
    f.store.update_couple_profile(&profile.id, update).await.unwrap();

    let update = CoupleProfileUpdate::default().with_name(Partner::One, "Alexandra");
    f.store.update_couple_profile(&profile.id, update).await.unwrap();

    let events = stored_events(&f.db);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].title, "Alexandra's Birthday");
    assert_eq!(events[0].date, event_timestamp(date(2024, 3, 15)));
}

#[tokio::test]
async fn test_birthday_without_name_is_stored_but_has_no_event() {
    let f = fixture(date(2024, 1, 1));
    let profile = create_profile(&f.store, "Alex", "").await;

    let update = CoupleProfileUpdate::default().with_birthday(Partner::Two, date(1991, 2, 1));
    let updated = f.store.update_couple_profile(&profile.id, update).await.unwrap();

    assert_eq!(updated.partner2_birthday, Some(date(1991, 2, 1)));
    assert!(stored_events(&f.db).is_empty());
}

#[tokio::test]
async fn test_blank_name_update_keeps_stored_name() {
    let f = fixture(date(2024, 1, 1));
    let profile = create_profile(&f.store, "Alex", "Sam").await;

    let update = CoupleProfileUpdate::default()
        .with_name(Partner::One, "  ")
        .with_birthday(Partner::One, date(1990, 3, 15));
    f.store.update_couple_profile(&profile.id, update).await.unwrap();

    let titles: Vec<String> = stored_events(&f.db).into_iter().map(|e| e.title).collect();
    assert_eq!(titles, vec!["Alex's Birthday"]);
}

#[tokio::test]
async fn test_update_unknown_profile_fails() {
    let f = fixture(date(2024, 1, 1));
    let update = CoupleProfileUpdate::default().with_name(Partner::One, "Alex");
    assert!(f.store.update_couple_profile("missing", update).await.is_err());
    assert!(!f.store.is_loading());
}

#[tokio::test]
async fn test_events_are_kept_sorted() {
    let f = fixture(date(2024, 1, 1));
    let profile = create_profile(&f.store, "Alex", "Sam").await;

    f.store
        .add_event(&profile.id, new_event("Trip", date(2024, 5, 1)))
        .await
        .unwrap();
    let first = f
        .store
        .add_event(&profile.id, new_event("Concert", date(2024, 2, 1)))
        .await
        .unwrap();
    assert_eq!(first.description, "");

    let titles: Vec<String> = f.store.events().into_iter().map(|e| e.title).collect();
    assert_eq!(titles, vec!["Concert", "Trip"]);

    let loaded = f.store.get_events(&profile.id).await.unwrap();
    assert_eq!(loaded, f.store.events());
    assert!(f.store.get_events("other-couple").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_event() {
    let f = fixture(date(2024, 1, 1));
    let profile = create_profile(&f.store, "Alex", "Sam").await;
    let event = f
        .store
        .add_event(&profile.id, new_event("Trip", date(2024, 5, 1)))
        .await
        .unwrap();

    f.store.delete_event(&event.id).await.unwrap();
    assert!(f.store.events().is_empty());
    assert!(f.db.documents("events").is_empty());

    // Already gone
    f.store.delete_event(&event.id).await.unwrap();
}

#[tokio::test]
async fn test_failed_write_leaves_cache_alone() {
    let f = fixture(date(2024, 1, 1));
    let profile = create_profile(&f.store, "Alex", "Sam").await;

    f.db.fail_next_write("permission denied");
    let err = f
        .store
        .add_event(&profile.id, new_event("Trip", date(2024, 5, 1)))
        .await
        .unwrap_err();
    assert_eq!(err.user_message(), "permission denied");
    assert!(f.store.events().is_empty());
    assert!(!f.store.is_loading());
}

#[tokio::test]
async fn test_upload_is_skipped_with_notice() {
    let f = fixture(date(2024, 1, 1));
    let upload = PictureUpload {
        file_name: "me.jpg".to_string(),
        content_type: Some("image/jpeg".to_string()),
        bytes: vec![0xff, 0xd8, 0xff],
    };

    let url = f
        .store
        .upload_profile_picture(upload, Partner::One)
        .await
        .unwrap();
    assert_eq!(url, "");
    assert_eq!(f.notifier.take(), vec![UPLOAD_DISABLED_NOTICE.to_string()]);
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for a snapshot")
        .expect("subscription ended")
}

#[tokio::test]
async fn test_events_subscription_survives_errors() {
    let f = fixture(date(2024, 1, 1));
    let profile = create_profile(&f.store, "Alex", "Sam").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = f.store.subscribe_to_events(&profile.id, move |events| {
        let titles: Vec<String> = events.iter().map(|e| e.title.clone()).collect();
        let _ = tx.send(titles);
    });
    assert!(subscription.topic().contains("events"));
    assert!(next(&mut rx).await.is_empty());

    f.store
        .add_event(&profile.id, new_event("Trip", date(2024, 5, 1)))
        .await
        .unwrap();
    assert_eq!(next(&mut rx).await, vec!["Trip"]);

    f.db.break_streams("events", "connection reset");
    f.store
        .add_event(&profile.id, new_event("Concert", date(2024, 2, 1)))
        .await
        .unwrap();
    assert_eq!(next(&mut rx).await, vec!["Concert", "Trip"]);
    assert!(subscription.is_active());

    subscription.unsubscribe();
}

#[tokio::test]
async fn test_couple_subscription_follows_updates() {
    let f = fixture(date(2024, 1, 1));
    let profile = create_profile(&f.store, "Alex", "Sam").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = f.store.subscribe_to_couple_data(&profile.id, move |couple| {
        let _ = tx.send(couple.partner2_name.clone());
    });
    assert_eq!(next(&mut rx).await, "Sam");

    let update = CoupleProfileUpdate::default().with_name(Partner::Two, "Samantha");
    f.store.update_couple_profile(&profile.id, update).await.unwrap();
    assert_eq!(next(&mut rx).await, "Samantha");
    assert_eq!(
        f.store.couple_data().map(|c| c.partner2_name),
        Some("Samantha".to_string())
    );
}

#[tokio::test]
async fn test_couple_subscription_ignores_missing_document() {
    let f = fixture(date(2024, 1, 1));
    create_profile(&f.store, "Alex", "Sam").await;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let subscription = f.store.subscribe_to_couple_data("missing-id", move |couple| {
        let _ = tx.send(couple.id.clone());
    });

    assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    assert!(subscription.is_active());
    assert_eq!(f.store.couple_data(), None);
}

#[tokio::test]
async fn test_couple_subscription_survives_errors() {
    let f = fixture(date(2024, 1, 1));
    let profile = create_profile(&f.store, "Alex", "Sam").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = f.store.subscribe_to_couple_data(&profile.id, move |couple| {
        let _ = tx.send(couple.partner1_name.clone());
    });
    assert_eq!(next(&mut rx).await, "Alex");

    f.db.break_streams("couples", "connection reset");
    let update = CoupleProfileUpdate::default().with_name(Partner::One, "Alexandra");
    f.store.update_couple_profile(&profile.id, update).await.unwrap();
    assert_eq!(next(&mut rx).await, "Alexandra");
    assert!(subscription.is_active());
}

#[tokio::test]
async fn test_unsubscribe_stops_callbacks() {
    let f = fixture(date(2024, 1, 1));
    let profile = create_profile(&f.store, "Alex", "Sam").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = f.store.subscribe_to_events(&profile.id, move |events| {
        let _ = tx.send(events.len());
    });
    assert_eq!(next(&mut rx).await, 0);

    subscription.unsubscribe();
    f.store
        .add_event(&profile.id, new_event("Trip", date(2024, 5, 1)))
        .await
        .unwrap();

    // The aborted task drops the callback and with it the sender
    let ended = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
    assert_eq!(ended, None);
}
