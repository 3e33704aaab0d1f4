//! # CIDR Allocator
//!
//! Hands out unused `/16` blocks to tenants. The only atomic step is the
//! store-level conditional write in [`CidrBlockRepository::claim`]; losing that
//! race surfaces as [`OnboardingError::CidrConflict`] and is not retried here.
//! When the race was against another assign for the same tenant the caller
//! gets [`OnboardingError::AlreadyAssigned`] instead.

use metrics::counter;
use rand::seq::SliceRandom;
use uuid::Uuid;

use crate::error::{OnboardingError, is_unique_violation};
use crate::repositories::CidrBlockRepository;

#[derive(Debug, Clone)]
pub struct CidrAllocator {
    blocks: CidrBlockRepository,
}

impl CidrAllocator {
    pub fn new(blocks: CidrBlockRepository) -> Self {
        Self { blocks }
    }

    /// Assigns a random free block to `tenant_id` and returns its address.
    pub async fn assign(&self, tenant_id: Uuid) -> Result<String, OnboardingError> {
        let pool = self.blocks.all().await?;

        if pool.iter().any(|block| block.tenant_id == Some(tenant_id)) {
            tracing::warn!(tenant_id = %tenant_id, "Tenant already holds a CIDR block");
            return Err(OnboardingError::AlreadyAssigned(tenant_id));
        }

        let free: Vec<&str> = pool
            .iter()
            .filter(|block| block.is_available())
            .map(|block| block.cidr_block.as_str())
            .collect();

        let Some(candidate) = free.choose(&mut rand::thread_rng()).copied() else {
            tracing::error!(tenant_id = %tenant_id, "CIDR pool exhausted");
            counter!("cidr_assignments_total", "outcome" => "exhausted").increment(1);
            return Err(OnboardingError::ResourceExhausted);
        };

        let claimed = match self.blocks.claim(candidate, tenant_id).await {
            Ok(claimed) => claimed,
            // A concurrent assign for the same tenant won another block.
            Err(err) if is_unique_violation(&err) => false,
            Err(err) => return Err(err.into()),
        };
        if !claimed {
            if self.blocks.find_by_tenant(tenant_id).await?.is_some() {
                tracing::warn!(tenant_id = %tenant_id, "Tenant was assigned a CIDR block concurrently");
                counter!("cidr_assignments_total", "outcome" => "already_assigned").increment(1);
                return Err(OnboardingError::AlreadyAssigned(tenant_id));
            }
            tracing::warn!(tenant_id = %tenant_id, cidr_block = candidate, "CIDR block claimed concurrently");
            counter!("cidr_assignments_total", "outcome" => "conflict").increment(1);
            return Err(OnboardingError::CidrConflict(candidate.to_string()));
        }

        tracing::info!(
            tenant_id = %tenant_id,
            cidr_block = candidate,
            remaining = free.len() - 1,
            "CIDR block assigned"
        );
        counter!("cidr_assignments_total", "outcome" => "assigned").increment(1);
        Ok(candidate.to_string())
    }
}

/// First two octets of a block address (`10.3.0.0` -> `10.3`).
pub fn cidr_prefix(block: &str) -> Option<&str> {
    let first = block.find('.')?;
    let second = first + 1 + block[first + 1..].find('.')?;
    Some(&block[..second])
}
