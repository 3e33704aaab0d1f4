//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! onboarding and CIDR block tables.

pub mod cidr_block;
pub mod onboarding;

pub use cidr_block::CidrBlockRepository;
pub use onboarding::{NewOnboarding, OnboardingRepository};
