//! Payment gateway adapters.

pub mod sandbox;

pub use sandbox::SandboxGateway;
