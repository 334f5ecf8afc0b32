//! # Payment reconciliation server
//! This crate hosts the HTTP surface of the reconciliation engine. It is responsible for:
//! Listening for incoming webhook notifications from the payment processor.
//! Validating their credentials and signatures before any reconciliation runs.
//! Handing validated notifications to the engine, and catching customers returning from
//! processor challenges on the additional-actions endpoint.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! The server exposes the following routes:
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/webhooks`: The webhook route for receiving payment notifications from the processor.
//! * `/additional-actions`: The synchronous return path for customers completing a challenge.

pub mod config;
pub mod errors;
pub mod integrations;
pub mod routes;
pub mod server;
pub mod validator;
