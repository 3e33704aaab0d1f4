//! # Tenant Onboarding Service Library
//!
//! Core of the multi-tenant onboarding service: the onboarding lifecycle and
//! its transition guard, CIDR allocation, stack parameter building, the
//! provisioning orchestrator, and the HTTP surface over it.

pub mod application;
pub mod auth;
pub mod cidr;
pub mod clients;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod models;
pub mod objects;
pub mod repositories;
pub mod seeds;
pub mod server;
pub mod service;
pub mod stack;
pub mod status;
pub mod telemetry;
pub mod upload;
pub use migration;
