// TourCMS inventory adapter for the marketplace plugin contract

pub mod client;
pub mod config;
pub mod document;
pub mod email;
pub mod error;
pub mod mapping;
pub mod messages;
pub mod model;
pub mod notify;
pub mod service;
pub mod signing;
pub mod upstream;
pub mod workflow;

// Re-export key types for convenience
pub use client::{SignedRequestClient, UpstreamRequest, UpstreamTransport};
pub use config::{AdapterConfig, Credentials, NotifierConfig, PluginParameter, UpstreamConfig};
pub use error::{FailureKind, NotifyError, TransitionError};
pub use notify::NotificationDispatcher;
pub use service::{Connector, HttpConnector, InventoryService};
pub use signing::{AccessKeySigner, ChannelSigner, RequestSigner};
pub use workflow::{BookingRecord, BookingState, BookingWorkflow, ReservationFailure};
