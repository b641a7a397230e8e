//! Integration tests: pulls and pushes against an in-memory server

mod pull;
mod push;
mod round_trip;
mod support;
mod walk;
