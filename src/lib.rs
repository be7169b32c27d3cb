//! Inbound webhook ingestion.
//!
//! This crate verifies signed webhook deliveries from storefront, payment
//! and custom providers, records each one durably, routes it to a business
//! handler and supports bounded retry of failed deliveries.
//!
//! ## Pipeline
//! verify → record (`pending`) → route → handle → finalize
//! (`processed` / `failed`) → notify observers
//!
//! ## Guarantees
//! - Fail-closed verification; rejected deliveries are never recorded
//! - Exactly one record and one notification per dispatch attempt
//! - Handler failures never propagate to the caller
//! - Retries bounded by [`MAX_RETRIES`] per delivery chain
//!
//! ## Non-Guarantees
//! - Exactly-once delivery (duplicates each get their own record)
//! - Ordering between deliveries
//! - Retention of recorded events

mod config;
mod dispatcher;
mod error;
mod notifier;
mod pipeline;
mod publisher;
mod recorder;
mod retry;
mod router;
mod signing;
mod storage;
mod types;
mod verifier;

#[cfg(feature = "postgres")]
mod storage_postgres;

pub use config::{custom_secret_var, IngestConfig, SecretResolver, DEFAULT_TOLERANCE};
pub use dispatcher::{
    DispatchOutcome,
    DispatchRequest,
    Dispatcher,
    HANDLER_FAILED_MESSAGE,
    HANDLER_PANIC_MESSAGE,
};
pub use error::{
    HandlerError,
    IngestError,
    ObserverError,
    RejectReason,
    RetryError,
    StoreError,
};
pub use notifier::{
    CollectingObserver,
    CustomDelivery,
    CustomObserver,
    OutcomeEvent,
    OutcomeNotifier,
    OutcomeObserver,
};
pub use pipeline::{InboundDelivery, Pipeline};
pub use publisher::{MemoryPublisher, PublishError, PublishHandler, PublishedMessage, Publisher};
pub use recorder::EventRecorder;
pub use retry::RetryCoordinator;
pub use router::{Delivery, EventHandler, HandlerRegistry};
pub use signing::{
    compute_body_signature,
    compute_signature,
    is_timestamp_fresh,
    parse_signature_header,
    verify_body_signature,
    verify_signature,
    ParsedSignature,
};
pub use storage::{InMemoryStore, RecordStore};
pub use types::{
    header,
    DeliveryRecord,
    DeliveryStatus,
    Headers,
    NewDelivery,
    Provider,
    RecordFilter,
    RecordId,
    MAX_RETRIES,
};
pub use verifier::{Verification, Verifier};

#[cfg(feature = "postgres")]
pub use storage_postgres::PostgresStore;
