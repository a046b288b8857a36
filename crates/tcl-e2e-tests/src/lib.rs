//! End-to-end tests for the TCL cloud client.
//!
//! The tests live under `tests/` and run the real credential chain, signer,
//! shadow client and poller against a `wiremock` stand-in for every cloud
//! endpoint.
