//! End-to-end tests against a running reading tracker service.
//! Run with `cargo test -p readingtracker_tests --features system_tests`
