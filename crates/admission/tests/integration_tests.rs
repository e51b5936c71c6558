use intro_admission::{AdmissionController, AdmissionError, ApplyOutcome};
use intro_core::{Application, ApplicationStatus, Listing, ListingId, UserId, test_utils};
use intro_datastore::{DocKey, MemoryStore, RetryConfig};
use intro_events::{InMemoryEventPublisher, IntroEvent};
use std::time::Duration;

fn wire(
    store: &MemoryStore,
) -> (
    AdmissionController<MemoryStore, InMemoryEventPublisher>,
    InMemoryEventPublisher,
) {
    let publisher = InMemoryEventPublisher::new();
    (
        AdmissionController::new(store.clone(), publisher.clone()),
        publisher,
    )
}

fn seed_listing(store: &MemoryStore, listing: &Listing) {
    store
        .set(&DocKey::Listing(&listing.id).to_string(), listing)
        .expect("seed listing");
}

fn load_listing(store: &MemoryStore, id: &str) -> Listing {
    store
        .get(&DocKey::Listing(&ListingId::new(id)).to_string())
        .expect("read listing")
        .expect("listing exists")
}

#[tokio::test]
async fn applications_are_accepted_until_the_cap() {
    let store = MemoryStore::new();
    let (admission, publisher) = wire(&store);
    seed_listing(&store, &test_utils::empty_listing("math-101", "tutor-bob"));
    let listing = ListingId::new("math-101");

    let first = admission
        .apply(&listing, &UserId::from("student-1"), "I'd love help with calculus")
        .await
        .unwrap();
    assert!(matches!(first, ApplyOutcome::Accepted(_)));

    let second = admission
        .apply(&listing, &UserId::from("student-2"), "me too")
        .await
        .unwrap();
    assert!(matches!(second, ApplyOutcome::Accepted(_)));

    let third = admission
        .apply(&listing, &UserId::from("student-3"), "third time's a charm")
        .await
        .unwrap();
    assert_eq!(third, ApplyOutcome::CapacityExceeded);

    assert_eq!(load_listing(&store, "math-101").applicant_count, 2);
    assert_eq!(publisher.events_of_kind("application_accepted").await.len(), 2);
}

#[tokio::test]
async fn repeat_applicants_are_rejected_without_counting_twice() {
    let store = MemoryStore::new();
    let (admission, _) = wire(&store);
    seed_listing(&store, &test_utils::empty_listing("math-101", "tutor-bob"));
    let listing = ListingId::new("math-101");
    let student = UserId::from("student-1");

    let first = admission.apply(&listing, &student, "pick me").await.unwrap();
    assert!(matches!(first, ApplyOutcome::Accepted(_)));

    let second = admission.apply(&listing, &student, "pick me again").await.unwrap();
    assert_eq!(second, ApplyOutcome::DuplicateApplication);
    assert_eq!(load_listing(&store, "math-101").applicant_count, 1);

    let application: Application = store
        .get(&DocKey::Application(&intro_core::application_key(&listing, &student)).to_string())
        .unwrap()
        .expect("application exists");
    assert_eq!(application.status, ApplicationStatus::Pending);
    assert_eq!(application.message, "pick me");
}

#[tokio::test]
async fn unknown_listing_is_fatal() {
    let store = MemoryStore::new();
    let (admission, _) = wire(&store);

    let result = admission
        .apply(&ListingId::new("nope"), &UserId::from("student-1"), "hi")
        .await;
    assert!(matches!(result, Err(AdmissionError::ListingNotFound(_))));
}

#[tokio::test]
async fn accepted_event_carries_the_composite_id() {
    let store = MemoryStore::new();
    let (admission, publisher) = wire(&store);
    seed_listing(&store, &test_utils::empty_listing("math-101", "tutor-bob"));

    admission
        .apply(&ListingId::new("math-101"), &UserId::from("student-1"), "hi")
        .await
        .unwrap();

    let events = publisher.events_of_kind("application_accepted").await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        IntroEvent::ApplicationAccepted {
            application_id,
            listing_id,
            applicant_id,
        } => {
            assert_eq!(application_id.as_str(), "math-101_student-1");
            assert_eq!(listing_id.as_str(), "math-101");
            assert_eq!(applicant_id.as_str(), "student-1");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_applicants_never_overshoot_the_cap() {
    let store = MemoryStore::with_retry(RetryConfig {
        max_attempts: 64,
        min_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(16),
    });
    let (admission, _) = wire(&store);
    seed_listing(&store, &test_utils::empty_listing("math-101", "tutor-bob"));

    let mut handles = Vec::new();
    for i in 0..6 {
        let admission = admission.clone();
        handles.push(tokio::spawn(async move {
            admission
                .apply(
                    &ListingId::new("math-101"),
                    &UserId::from(format!("student-{i}").as_str()),
                    "pick me",
                )
                .await
        }));
    }

    let mut accepted = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.expect("join").expect("apply") {
            ApplyOutcome::Accepted(_) => accepted += 1,
            ApplyOutcome::CapacityExceeded => rejected += 1,
            ApplyOutcome::DuplicateApplication => {
                panic!("distinct applicants cannot be duplicates")
            }
        }
    }

    assert_eq!(accepted, 2);
    assert_eq!(rejected, 4);
    assert_eq!(load_listing(&store, "math-101").applicant_count, 2);
}
