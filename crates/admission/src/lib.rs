//! Admission control for listings.
//!
//! A listing admits at most [`intro_core::APPLICANT_CAP`] concurrent
//! applicants, and one application per applicant. Both checks and the
//! write happen inside one transaction against keys the transaction
//! actually read: the application document is keyed by `(listing,
//! applicant)`, so the duplicate check is a point read in the read-set,
//! not a side query. Under N racing applicants the cap never overshoots.

pub mod controller;

pub use controller::{AdmissionController, AdmissionError, ApplyOutcome};
