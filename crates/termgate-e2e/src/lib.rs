//! End-to-end test utilities for the termgate gateway
//!
//! Runs the real listener and session orchestrator on ephemeral ports against
//! mock backends, without any external terminal or host.

pub mod certificates;
pub mod harness;
pub mod mock_backend;
pub mod scripted_protocol;
pub mod telnet_client;

pub use certificates::TestCertificates;
pub use harness::{app_config, target, TestGateway};
pub use mock_backend::{BackendMode, MockBackend, RecordedConnection};
pub use scripted_protocol::ScriptedProtocol;
pub use telnet_client::TelnetClient;
