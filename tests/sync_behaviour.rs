//! Behavioural scenarios for the inventory load/sync lifecycle.

mod sync_lifecycle;
