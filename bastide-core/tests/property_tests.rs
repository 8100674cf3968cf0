//! Property-based tests for `Bastide` core library

#![allow(clippy::redundant_clone)]

mod properties;
