//! Step definitions and fixtures for the sync lifecycle scenarios.

mod bdd_steps;
mod scenarios;
mod test_helpers;
