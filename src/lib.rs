//! # Dataspace Exchange
//!
//! A data-exchange marketplace backend coordinating multi-party agreements.
//!
//! ## Architecture
//!
//! - **Bilateral Negotiation**: provider/consumer exchange configurations moving
//!   from request through policy negotiation to dual signature
//! - **Ecosystem Engine**: multi-party collaborations with one orchestrator,
//!   converging invitations and join requests into signed memberships
//! - **Contract Gateway**: narrow client over the external contract service
//!   (generate / fetch / sign / inject policies / delete)
//! - **Server**: Axum HTTP surface exposing both state machines
//! - **Store**: SQLite-backed aggregate persistence with optimistic concurrency

pub mod config;
pub mod database;
pub mod ecosystem;
pub mod error;
pub mod gateway;
pub mod model;
pub mod negotiation;
pub mod server;

pub use config::AppConfig;
pub use database::Database;
pub use ecosystem::EcosystemService;
pub use error::{ExchangeError, Result};
pub use gateway::{ContractGateway, ContractKind, HttpContractGateway, InMemoryContractGateway};
pub use model::{Ecosystem, ExchangeConfiguration, MembershipStatus, NegotiationStatus};
pub use negotiation::NegotiationService;

pub type ParticipantId = uuid::Uuid;
pub type OfferingId = uuid::Uuid;
pub type NegotiationId = uuid::Uuid;
pub type EcosystemId = uuid::Uuid;

/// Opaque handle issued by the external contract service.
pub type ContractId = String;
