//! Behavioural scenarios for host moves across the network and inventory.

#[path = "common/test_constants.rs"]
mod test_constants;

mod moves;
