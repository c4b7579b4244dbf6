//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (client transports, view stores).
pub mod ports;

/// Application services for delivery and cached views.
pub mod services;
