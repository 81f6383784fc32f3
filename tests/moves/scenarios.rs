//! BDD scenarios for host moves.

use rstest_bdd_macros::scenario;

use super::test_helpers::{MoveContext, move_context};

#[scenario(
    path = "tests/features/moves.feature",
    name = "Move a host into another cloud"
)]
fn scenario_confirmed_move(move_context: MoveContext) {
    drop(move_context);
}

#[scenario(
    path = "tests/features/moves.feature",
    name = "Network failure leaves inventory cloud unchanged"
)]
fn scenario_network_refusal(move_context: MoveContext) {
    drop(move_context);
}

#[scenario(
    path = "tests/features/moves.feature",
    name = "Network outage keeps its error kind"
)]
fn scenario_network_outage(move_context: MoveContext) {
    drop(move_context);
}

#[scenario(
    path = "tests/features/moves.feature",
    name = "Reject moves into unknown clouds"
)]
fn scenario_unknown_destination(move_context: MoveContext) {
    drop(move_context);
}

#[scenario(
    path = "tests/features/moves.feature",
    name = "Moving a host into its own cloud is a no-op"
)]
fn scenario_no_op(move_context: MoveContext) {
    drop(move_context);
}
