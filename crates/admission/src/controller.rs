use intro_core::{
    Application, ApplicationId, ApplicationStatus, Listing, ListingId, UserId, application_key,
};
use intro_datastore::{DocKey, DocumentStore, StoreError, TransactionOps};
use intro_events::{EventPublisher, IntroEvent, publish_or_log};
use thiserror::Error;
use tracing::info;

/// Fatal admission failures. A full listing or a repeat applicant is a
/// reported [`ApplyOutcome`], not an error.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("listing {0} not found")]
    ListingNotFound(ListingId),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result of an application attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Accepted(ApplicationId),
    CapacityExceeded,
    DuplicateApplication,
}

/// Admission controller. The only writer of `applicant_count`.
#[derive(Debug, Clone)]
pub struct AdmissionController<S, P> {
    store: S,
    publisher: P,
}

impl<S, P> AdmissionController<S, P>
where
    S: DocumentStore,
    P: EventPublisher,
{
    pub fn new(store: S, publisher: P) -> Self {
        Self { store, publisher }
    }

    /// Apply to a listing. One transaction covers the cap check, the
    /// duplicate point read, the create and the increment, all against
    /// the same read-set.
    pub async fn apply(
        &self,
        listing_id: &ListingId,
        applicant_id: &UserId,
        message: &str,
    ) -> Result<ApplyOutcome, AdmissionError> {
        let outcome = self
            .store
            .run_transaction(|txn| apply_txn(txn, listing_id, applicant_id, message))
            .await?;

        if let ApplyOutcome::Accepted(application_id) = &outcome {
            info!(
                listing_id = %listing_id,
                applicant_id = %applicant_id,
                application_id = %application_id,
                "application accepted"
            );
            publish_or_log(
                &self.publisher,
                IntroEvent::ApplicationAccepted {
                    application_id: application_id.clone(),
                    listing_id: listing_id.clone(),
                    applicant_id: applicant_id.clone(),
                },
            )
            .await;
        }
        Ok(outcome)
    }
}

fn apply_txn<T: TransactionOps>(
    txn: &mut T,
    listing_id: &ListingId,
    applicant_id: &UserId,
    message: &str,
) -> Result<ApplyOutcome, AdmissionError> {
    let listing_path = DocKey::Listing(listing_id).to_string();
    let listing: Listing = txn
        .get(&listing_path)?
        .ok_or_else(|| AdmissionError::ListingNotFound(listing_id.clone()))?;

    if listing.is_full() {
        return Ok(ApplyOutcome::CapacityExceeded);
    }

    let application_id = application_key(listing_id, applicant_id);
    let application_path = DocKey::Application(&application_id).to_string();
    if txn.get::<Application>(&application_path)?.is_some() {
        return Ok(ApplyOutcome::DuplicateApplication);
    }

    let application = Application {
        id: application_id.clone(),
        listing_id: listing_id.clone(),
        applicant_id: applicant_id.clone(),
        message: message.to_string(),
        status: ApplicationStatus::Pending,
        created_at: txn.server_timestamp(),
    };
    txn.set(&application_path, &application)?;
    txn.increment(&listing_path, "applicantCount", 1);

    Ok(ApplyOutcome::Accepted(application_id))
}
