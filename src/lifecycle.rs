use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::model::{NewRecord, Record, RecordStatus};
use crate::repository::RecordRepository;

/// The signing side of a client session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    principal: Option<String>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn connected(address: impl Into<String>) -> Self {
        Self { principal: Some(address.into()) }
    }

    pub fn from_principal(principal: Option<String>) -> Self {
        Self { principal: principal.filter(|p| !p.trim().is_empty()) }
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    pub fn require_signer(&self) -> Result<&str> {
        self.principal().ok_or(StoreError::Unauthorized)
    }
}

/// What the analysis collaborator derived from one entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub allergens: Vec<String>,
    pub severe: bool,
}

/// External analysis over sealed payloads. Implementations may be slow.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, encrypted_food: &str, encrypted_symptoms: &str) -> std::result::Result<Analysis, String>;
}

/// A new entry as submitted by a signed-in user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub food: String,
    pub symptoms: String,
    #[serde(default)]
    pub meal_time_hint: Option<String>,
}

pub fn terminal_status(severe: bool) -> RecordStatus {
    if severe {
        RecordStatus::Flagged
    } else {
        RecordStatus::Analyzed
    }
}

/// Drives records through `pending -> analyzed | flagged`.
#[derive(Clone)]
pub struct RecordLifecycle {
    repo: RecordRepository,
    analyzer: Arc<dyn Analyzer>,
}

impl RecordLifecycle {
    pub fn new(repo: RecordRepository, analyzer: Arc<dyn Analyzer>) -> Self {
        Self { repo, analyzer }
    }

    pub fn repository(&self) -> &RecordRepository {
        &self.repo
    }

    /// Creates a pending record owned by the session's principal.
    pub async fn submit(&self, session: &Session, submission: Submission) -> Result<Record> {
        let owner = session.require_signer()?.to_string();
        self.repo
            .create(NewRecord {
                food: submission.food,
                symptoms: submission.symptoms,
                owner,
                meal_time_hint: submission.meal_time_hint,
            })
            .await
    }

    /// Runs the analysis collaborator on a pending record and stores the
    /// terminal status with the derived allergens.
    ///
    /// The pending check happens before the (slow) analysis, and the final
    /// write does not repeat it. Two overlapping calls on one record can
    /// both pass the check; the later write wins.
    pub async fn analyze(&self, session: &Session, id: &str) -> Result<Record> {
        let signer = session.require_signer()?;

        let record = self.repo.get(id).await?;
        if record.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: record.status,
            });
        }

        let analysis = self
            .analyzer
            .analyze(&record.encrypted_food, &record.encrypted_symptoms)
            .await
            .map_err(|reason| {
                warn!("analysis of {} failed: {}", id, reason);
                StoreError::AnalysisFailed { id: id.to_string(), reason }
            })?;

        let status = terminal_status(analysis.severe);
        let allergens = analysis.allergens;
        let updated = self
            .repo
            .update(id, move |mut r| {
                r.status = status;
                r.potential_allergens = allergens;
                r
            })
            .await?;

        info!("record {} {} by {} ({} allergens)", id, status, signer, updated.potential_allergens.len());
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::FixedAnalyzer;
    use crate::backend::{MemoryBackend, WriteFault};
    use crate::kv::KvStore;
    use crate::model;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Barrier;

    async fn lifecycle_with(analyzer: Arc<dyn Analyzer>) -> (Arc<MemoryBackend>, RecordLifecycle) {
        let backend = Arc::new(MemoryBackend::new());
        let kv = KvStore::connect(backend.clone()).await.unwrap();
        (backend, RecordLifecycle::new(RecordRepository::new(kv), analyzer))
    }

    fn eggs() -> Submission {
        Submission {
            food: "eggs".into(),
            symptoms: "hives".into(),
            meal_time_hint: Some("breakfast".into()),
        }
    }

    fn user() -> Session {
        Session::connected("0xabc")
    }

    #[tokio::test]
    async fn submit_then_analyze_then_reject_reanalysis() {
        let (backend, lc) = lifecycle_with(Arc::new(FixedAnalyzer::new(["Dairy"], false))).await;

        let created = lc.submit(&user(), eggs()).await.unwrap();
        assert_eq!(created.status, RecordStatus::Pending);
        assert_eq!(created.owner, "0xabc");
        assert!(created.potential_allergens.is_empty());
        assert_eq!(lc.repository().list().await.unwrap().records, vec![created.clone()]);

        let analyzed = lc.analyze(&user(), &created.id).await.unwrap();
        assert_eq!(analyzed.status, RecordStatus::Analyzed);
        assert_eq!(analyzed.potential_allergens, vec!["Dairy"]);

        let stored_before = backend.raw(&model::record_key(&created.id));
        let err = lc.analyze(&user(), &created.id).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::InvalidTransition { id: created.id.clone(), from: RecordStatus::Analyzed }
        );
        assert_eq!(backend.raw(&model::record_key(&created.id)), stored_before);
    }

    #[tokio::test]
    async fn severe_result_flags_the_record() {
        let (_, lc) = lifecycle_with(Arc::new(FixedAnalyzer::new(["Nuts", "Gluten"], true))).await;
        let created = lc.submit(&user(), eggs()).await.unwrap();
        let flagged = lc.analyze(&user(), &created.id).await.unwrap();
        assert_eq!(flagged.status, RecordStatus::Flagged);
        assert_eq!(flagged.potential_allergens, vec!["Nuts", "Gluten"]);

        let err = lc.analyze(&user(), &created.id).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { from: RecordStatus::Flagged, .. }));
    }

    #[tokio::test]
    async fn missing_signer_fails_before_storage() {
        let (backend, lc) = lifecycle_with(Arc::new(FixedAnalyzer::default())).await;
        let reads = backend.read_count();

        assert_eq!(lc.submit(&Session::anonymous(), eggs()).await.unwrap_err(), StoreError::Unauthorized);
        assert_eq!(lc.analyze(&Session::anonymous(), "any").await.unwrap_err(), StoreError::Unauthorized);
        assert_eq!(backend.read_count(), reads);
        assert_eq!(backend.write_count(), 0);
    }

    #[tokio::test]
    async fn blank_principal_is_anonymous() {
        assert_eq!(Session::from_principal(Some("  ".into())), Session::anonymous());
        assert_eq!(Session::from_principal(Some("0x1".into())).principal(), Some("0x1"));
    }

    #[tokio::test]
    async fn analyze_missing_record_is_not_found() {
        let (_, lc) = lifecycle_with(Arc::new(FixedAnalyzer::default())).await;
        let err = lc.analyze(&user(), "nonexistent").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    struct FailingAnalyzer;

    #[async_trait]
    impl Analyzer for FailingAnalyzer {
        async fn analyze(&self, _: &str, _: &str) -> std::result::Result<Analysis, String> {
            Err("service timed out".into())
        }
    }

    #[tokio::test]
    async fn analysis_failure_leaves_record_pending() {
        let (_, lc) = lifecycle_with(Arc::new(FailingAnalyzer)).await;
        let created = lc.submit(&user(), eggs()).await.unwrap();

        let err = lc.analyze(&user(), &created.id).await.unwrap_err();
        assert_eq!(err.step(), "analysis");
        assert_eq!(lc.repository().get(&created.id).await.unwrap().status, RecordStatus::Pending);
    }

    #[tokio::test]
    async fn declined_write_surfaces_as_write_rejected() {
        let (backend, lc) = lifecycle_with(Arc::new(FixedAnalyzer::new(["Dairy"], false))).await;
        let created = lc.submit(&user(), eggs()).await.unwrap();
        backend.fail_writes(&model::record_key(&created.id), WriteFault::Decline);

        let err = lc.analyze(&user(), &created.id).await.unwrap_err();
        assert!(matches!(err, StoreError::WriteRejected { declined: true, .. }));
        assert_eq!(err.user_message(), "Transaction rejected by user");
        assert_eq!(lc.repository().get(&created.id).await.unwrap().status, RecordStatus::Pending);
    }

    /// Holds every caller until `parties` calls are in flight, then answers
    /// with a result that depends on arrival order.
    struct GatedAnalyzer {
        gate: Barrier,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Analyzer for GatedAnalyzer {
        async fn analyze(&self, _: &str, _: &str) -> std::result::Result<Analysis, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.wait().await;
            Ok(Analysis {
                allergens: vec![format!("call-{}", n)],
                severe: n % 2 == 1,
            })
        }
    }

    #[tokio::test]
    async fn overlapping_analyses_both_write_and_last_wins() {
        let analyzer = Arc::new(GatedAnalyzer { gate: Barrier::new(2), calls: AtomicUsize::new(0) });
        let (_, lc) = lifecycle_with(analyzer).await;
        let created = lc.submit(&user(), eggs()).await.unwrap();

        let (u1, u2) = (user(), user());
        let (first, second) = tokio::join!(lc.analyze(&u1, &created.id), lc.analyze(&u2, &created.id));
        let first = first.unwrap();
        let second = second.unwrap();
        assert_ne!(first, second);

        let stored = lc.repository().get(&created.id).await.unwrap();
        assert!(stored == first || stored == second);
        assert!(stored.status.is_terminal());
    }
}
