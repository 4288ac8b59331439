pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod housekeeper;
pub mod metrics;

pub use backend::{Backend, Placement, Status};
pub use client::{Admission, AdmissionClient};
pub use config::BouncerConfig;
pub use error::{BouncerError, Result};
pub use events::{Event, EventKind, Subscriber};
pub use housekeeper::{CycleReport, Housekeeper, HousekeeperHandle};
