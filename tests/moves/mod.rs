//! Step definitions and fixtures for the move scenarios.

mod bdd_steps;
mod scenarios;
mod test_helpers;
