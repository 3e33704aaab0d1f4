use std::sync::Arc;

use anyhow::Result;
use onboarding::repositories::{NewOnboarding, OnboardingRepository};
use onboarding::status::OnboardingStatus;
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::setup_test_db_arc;

fn request(name: &str, subdomain: Option<&str>) -> NewOnboarding {
    NewOnboarding {
        tenant_name: name.to_string(),
        tier: Some("default".to_string()),
        subdomain: subdomain.map(str::to_string),
    }
}

async fn repository() -> Result<OnboardingRepository> {
    Ok(OnboardingRepository::new(setup_test_db_arc().await?))
}

#[tokio::test]
async fn insert_assigns_identity_and_timestamps() -> Result<()> {
    let repo = repository().await?;

    let first = repo.insert(request("acme", None)).await?;
    let second = repo.insert(request("globex", None)).await?;

    assert_ne!(first.id, second.id);
    assert_eq!(first.status, OnboardingStatus::Created);
    assert_eq!(first.created, first.modified);
    assert!(first.tenant_id.is_none());
    assert!(first.stack_id.is_none());

    let fetched = repo.get(first.id).await?.expect("record exists");
    assert_eq!(fetched.id, first.id);
    assert_eq!(fetched.tenant_name.as_deref(), Some("acme"));
    assert!(repo.get(Uuid::new_v4()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn list_returns_oldest_first() -> Result<()> {
    let repo = repository().await?;
    let first = repo.insert(request("acme", None)).await?;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = repo.insert(request("globex", None)).await?;

    let ids: Vec<Uuid> = repo.list().await?.into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    Ok(())
}

#[tokio::test]
async fn update_status_refreshes_modified_only() -> Result<()> {
    let repo = repository().await?;
    let record = repo.insert(request("acme", None)).await?;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let updated = repo
        .update_status(record.id, OnboardingStatus::Validating)
        .await?
        .expect("record exists");

    assert_eq!(updated.status, OnboardingStatus::Validating);
    assert_eq!(updated.created, record.created);
    assert!(updated.modified > record.modified);
    assert!(
        repo.update_status(Uuid::new_v4(), OnboardingStatus::Failed)
            .await?
            .is_none()
    );
    Ok(())
}

#[tokio::test]
async fn compare_and_set_requires_the_expected_status() -> Result<()> {
    let repo = repository().await?;
    let record = repo.insert(request("acme", None)).await?;

    assert!(
        repo.compare_and_set_status(
            record.id,
            OnboardingStatus::Created,
            OnboardingStatus::Provisioning
        )
        .await?
    );
    assert!(
        !repo
            .compare_and_set_status(
                record.id,
                OnboardingStatus::Created,
                OnboardingStatus::Failed
            )
            .await?
    );

    let stored = repo.get(record.id).await?.expect("record exists");
    assert_eq!(stored.status, OnboardingStatus::Provisioning);
    Ok(())
}

#[tokio::test]
async fn stack_id_is_written_once() -> Result<()> {
    let repo = repository().await?;
    let record = repo.insert(request("acme", None)).await?;

    assert!(repo.set_stack_id(record.id, "stack-one").await?);
    assert!(!repo.set_stack_id(record.id, "stack-two").await?);

    let stored = repo.get(record.id).await?.expect("record exists");
    assert_eq!(stored.stack_id.as_deref(), Some("stack-one"));
    Ok(())
}

#[tokio::test]
async fn tenant_lookups_by_id_and_prefix() -> Result<()> {
    let repo = repository().await?;
    let record = repo.insert(request("acme", None)).await?;
    let tenant_id = Uuid::parse_str("0F6A1C9E-1111-4222-8333-444455556666")?;

    let updated = repo
        .set_tenant(record.id, tenant_id, Some("Acme Corp".to_string()))
        .await?
        .expect("record exists");
    assert_eq!(updated.tenant_id, Some(tenant_id));
    assert_eq!(updated.tenant_name.as_deref(), Some("Acme Corp"));

    let kept = repo
        .set_tenant(record.id, tenant_id, None)
        .await?
        .expect("record exists");
    assert_eq!(kept.tenant_name.as_deref(), Some("Acme Corp"));

    assert_eq!(
        repo.find_by_tenant_id(tenant_id).await?.map(|r| r.id),
        Some(record.id)
    );
    assert_eq!(repo.find_by_tenant_prefix("0F6A1C9E").await?.len(), 1);
    assert_eq!(repo.find_by_tenant_prefix("0f6a1c9e-1111").await?.len(), 1);
    assert!(repo.find_by_tenant_prefix("0f6a1c9f").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn subdomains_of_live_records_are_in_use() -> Result<()> {
    let repo = repository().await?;
    let live = repo.insert(request("acme", Some("acme"))).await?;
    let failed = repo.insert(request("globex", Some("globex"))).await?;
    repo.update_status(failed.id, OnboardingStatus::Failed).await?;

    assert!(repo.subdomain_in_use("ACME").await?);
    assert!(!repo.subdomain_in_use("globex").await?);
    assert!(!repo.subdomain_in_use("initech").await?);

    repo.update_status(live.id, OnboardingStatus::Deleted).await?;
    assert!(!repo.subdomain_in_use("acme").await?);
    Ok(())
}

#[tokio::test]
async fn zip_file_url_is_recorded() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let repo = OnboardingRepository::new(Arc::clone(&db));
    let record = repo.insert(request("acme", None)).await?;

    let updated = repo
        .set_zip_file_url(record.id, "https://objects.example.com/temp/a.zip")
        .await?
        .expect("record exists");

    assert_eq!(
        updated.zip_file_url.as_deref(),
        Some("https://objects.example.com/temp/a.zip")
    );
    Ok(())
}

#[tokio::test]
async fn mark_failed_leaves_deleted_records_alone() -> Result<()> {
    let repo = repository().await?;
    let live = repo.insert(request("acme", None)).await?;
    let gone = repo.insert(request("globex", None)).await?;
    repo.update_status(gone.id, OnboardingStatus::Deleted).await?;

    assert!(repo.mark_failed(live.id).await?);
    assert!(!repo.mark_failed(gone.id).await?);
    assert!(!repo.mark_failed(Uuid::new_v4()).await?);

    assert_eq!(repo.get(live.id).await?.unwrap().status, OnboardingStatus::Failed);
    assert_eq!(repo.get(gone.id).await?.unwrap().status, OnboardingStatus::Deleted);
    Ok(())
}
