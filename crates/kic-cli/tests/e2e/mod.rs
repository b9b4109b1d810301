//! End-to-end tests against a local Docker daemon
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p kic-cli --features docker-e2e --test e2e -- --nocapture
//! ```
//!
//! Every test creates its own uniquely named cluster and deletes it again,
//! so tests can run while other kic clusters exist on the host.

mod lifecycle_e2e;
