//! Database seeding functionality
//!
//! Populates reference data the service needs before it can take requests.

pub mod cidr_block;

pub use cidr_block::seed_cidr_blocks;
