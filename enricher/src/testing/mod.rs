//! Test doubles shared by the unit tests.

pub mod fakes;
