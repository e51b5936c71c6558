use intro_core::{BillingState, SenderRole, UserId, session_key, test_utils};
use intro_datastore::{DocKey, MemoryStore};
use intro_events::{EventPublisher, IntroEvent};
use intro_gate::{BillingOutcome, CancelOutcome, SessionGate};
use intro_ledger::DeductOutcome;
use intro_system_tests::TestEnv;

#[tokio::test]
async fn full_lifecycle_from_first_contact_to_close() {
    let env = TestEnv::new();
    env.seed_consumer(&test_utils::consumer_with_balance("alice", 0));
    let alice = UserId::from("alice");
    let bob = UserId::from("tutor-bob");

    // Support grants a starter token.
    let balance = env.ledger.grant(&alice, 2, "starter pack").await.unwrap();
    assert_eq!(balance, 2);

    // First contact funds the session.
    let sent = env
        .gate
        .send_message(&alice, &bob, SenderRole::Consumer, "hi, free on Tuesdays?")
        .await
        .unwrap();
    assert_eq!(sent.billing, BillingOutcome::FundedByToken { balance_after: 1 });

    // The provider's first reply finalizes the charge.
    let reply = env
        .gate
        .send_message(&alice, &bob, SenderRole::Provider, "yes! let's talk")
        .await
        .unwrap();
    assert_eq!(reply.billing, BillingOutcome::FirstResponse { retro_charge: None });

    // A later admin close renders no refund.
    let session_id = session_key(&alice, &bob);
    assert_eq!(
        env.gate.cancel(&session_id, "wrap up").await.unwrap(),
        CancelOutcome::Closed
    );
    assert_eq!(env.consumer(&alice).token_balance, 1);
    assert_eq!(env.session(&session_id).billing_state, BillingState::Closed);

    let kinds: Vec<&'static str> = env
        .publisher
        .events()
        .await
        .iter()
        .map(IntroEvent::kind)
        .collect();
    assert_eq!(kinds, ["token_deducted", "first_response_received"]);
}

#[tokio::test]
async fn timeout_lifecycle_reconciles_the_meter() {
    let env = TestEnv::new();
    env.seed_consumer(&test_utils::consumer_with_balance("alice", 3));
    let alice = UserId::from("alice");
    let bob = UserId::from("tutor-bob");

    env.gate
        .send_message(&alice, &bob, SenderRole::Consumer, "hello?")
        .await
        .unwrap();
    assert_eq!(env.consumer(&alice).token_balance, 2);

    let session_id = session_key(&alice, &bob);
    env.age_session(&session_id, chrono::TimeDelta::hours(72));

    let report = env.sweeper.run_once().await.unwrap();
    assert_eq!(report.cancelled, 1);
    assert_eq!(env.consumer(&alice).token_balance, 3);

    let session = env.session(&session_id);
    assert_eq!(session.billing_state, BillingState::Cancelled);
    assert!(session.refunded);

    let kinds: Vec<&'static str> = env
        .publisher
        .events()
        .await
        .iter()
        .map(IntroEvent::kind)
        .collect();
    assert_eq!(kinds, ["token_deducted", "token_refunded"]);

    // Sweeping again changes nothing.
    assert_eq!(env.sweeper.run_once().await.unwrap().cancelled, 0);
    assert_eq!(env.consumer(&alice).token_balance, 3);
}

#[tokio::test]
async fn admission_then_first_contact_between_the_matched_pair() {
    let env = TestEnv::new();
    env.seed_listing(&test_utils::empty_listing("math-101", "tutor-bob"));
    env.seed_consumer(&test_utils::consumer_with_balance("student-1", 1));

    let listing = intro_core::ListingId::new("math-101");
    for student in ["student-1", "student-2"] {
        let outcome = env
            .admission
            .apply(&listing, &UserId::from(student), "I'd like to join")
            .await
            .unwrap();
        assert!(matches!(outcome, intro_admission::ApplyOutcome::Accepted(_)));
    }
    assert_eq!(
        env.admission
            .apply(&listing, &UserId::from("student-3"), "room for one more?")
            .await
            .unwrap(),
        intro_admission::ApplyOutcome::CapacityExceeded
    );

    // The admitted student opens the conversation with the author.
    let sent = env
        .gate
        .send_message(
            &UserId::from("student-1"),
            &UserId::from("tutor-bob"),
            SenderRole::Consumer,
            "thanks for accepting me!",
        )
        .await
        .unwrap();
    assert_eq!(sent.billing, BillingOutcome::FundedByToken { balance_after: 0 });

    assert_eq!(
        env.publisher.events_of_kind("application_accepted").await.len(),
        2
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_first_contacts_respect_the_balance() {
    let env = TestEnv::new();
    env.seed_consumer(&test_utils::consumer_with_balance("alice", 2));
    let alice = UserId::from("alice");

    let mut handles = Vec::new();
    for i in 0..3 {
        let gate = env.gate.clone();
        let alice = alice.clone();
        handles.push(tokio::spawn(async move {
            gate.send_message(
                &alice,
                &UserId::from(format!("tutor-{i}").as_str()),
                SenderRole::Consumer,
                "hi!",
            )
            .await
        }));
    }

    let mut funded = 0;
    let mut unfunded = 0;
    for handle in handles {
        match handle.await.expect("join").expect("send").billing {
            BillingOutcome::FundedByToken { .. } => funded += 1,
            BillingOutcome::InsufficientBalance { .. } => unfunded += 1,
            other => panic!("unexpected billing outcome: {other:?}"),
        }
    }

    assert_eq!(funded, 2);
    assert_eq!(unfunded, 1);
    assert_eq!(env.consumer(&alice).token_balance, 0);
    assert_eq!(env.publisher.events_of_kind("token_deducted").await.len(), 2);
}

#[tokio::test]
async fn a_failing_notification_sink_never_rolls_back_billing() {
    struct FailingPublisher;

    #[async_trait::async_trait]
    impl EventPublisher for FailingPublisher {
        async fn publish(&self, _event: IntroEvent) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("broker down"))
        }
    }

    let store = MemoryStore::new();
    let gate = SessionGate::new(store.clone(), FailingPublisher);
    store
        .set(
            &DocKey::Consumer(&UserId::from("alice")).to_string(),
            &test_utils::consumer_with_balance("alice", 3),
        )
        .unwrap();

    let sent = gate
        .send_message(
            &UserId::from("alice"),
            &UserId::from("tutor-bob"),
            SenderRole::Consumer,
            "hi",
        )
        .await
        .unwrap();

    // The charge committed even though every notification was dropped.
    assert_eq!(sent.billing, BillingOutcome::FundedByToken { balance_after: 2 });
    let alice: intro_core::Consumer = store
        .get(&DocKey::Consumer(&UserId::from("alice")).to_string())
        .unwrap()
        .unwrap();
    assert_eq!(alice.token_balance, 2);
}

#[tokio::test]
async fn standalone_ledger_charge_is_honored_by_the_gate() {
    let env = TestEnv::new();
    env.seed_consumer(&test_utils::consumer_with_balance("alice", 0));
    let alice = UserId::from("alice");
    let bob = UserId::from("tutor-bob");

    // The provider reaches out first; the retroactive charge fails on an
    // empty balance, so the session stays open and unfunded.
    let opener = env
        .gate
        .send_message(&alice, &bob, SenderRole::Provider, "interested in lessons?")
        .await
        .unwrap();
    assert_eq!(opener.billing, BillingOutcome::InsufficientBalance { balance: 0 });
    assert_eq!(opener.session_state, BillingState::Open);

    // Billing support tops up and charges the session out-of-band.
    let session_id = session_key(&alice, &bob);
    env.ledger.grant(&alice, 1, "goodwill credit").await.unwrap();
    assert!(matches!(
        env.ledger.deduct(&alice, &session_id, 1).await.unwrap(),
        DeductOutcome::Charged { balance_after: 0 }
    ));

    // The next consumer message sees the committed funding.
    let sent = env
        .gate
        .send_message(&alice, &bob, SenderRole::Consumer, "yes please")
        .await
        .unwrap();
    assert_eq!(sent.billing, BillingOutcome::AlreadyFunded);
    assert_eq!(sent.session_state, BillingState::Funded);
    assert_eq!(env.consumer(&alice).token_balance, 0);
}
