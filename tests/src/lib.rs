//! Integration test crate for the strata workspace. The suites live under
//! `tests/`; shared fixtures come from `strata-test-utils`.
