//! Integration tests for the lead status state machine.
//!
//! Every valid edge commits exactly one history row; every other pair is
//! rejected with none. Subscribers observe committed changes and their
//! failures never roll anything back.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use courier_core::{
    storage::memory::{MemoryLeadStore, MemoryStatusHistoryStore},
    CoreError, Lead, LeadId, LeadStatus, LeadStore, StatusHistoryStore,
};
use courier_leads::{StatusChange, StatusSubscriber, StatusTracker, StatusUpdate};

struct Harness {
    leads: Arc<MemoryLeadStore>,
    history: Arc<MemoryStatusHistoryStore>,
    tracker: StatusTracker,
}

fn harness() -> Harness {
    let leads = Arc::new(MemoryLeadStore::new());
    let history = Arc::new(MemoryStatusHistoryStore::new());
    let tracker = StatusTracker::new(leads.clone(), history.clone());
    Harness { leads, history, tracker }
}

async fn lead_in(h: &Harness, status: LeadStatus) -> LeadId {
    let mut lead = Lead::new(LeadId::new(), "lead@example.com");
    lead.status = status;
    let id = lead.id;
    h.leads.upsert(lead).await.unwrap();
    id
}

/// Subscriber that records every change it sees.
#[derive(Default)]
struct RecordingSubscriber {
    changes: Mutex<Vec<StatusChange>>,
}

impl RecordingSubscriber {
    fn seen(&self) -> Vec<StatusChange> {
        self.changes.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusSubscriber for RecordingSubscriber {
    async fn on_status_change(&self, change: &StatusChange) -> anyhow::Result<()> {
        self.changes.lock().unwrap().push(change.clone());
        Ok(())
    }
}

/// Subscriber that always fails.
struct FailingSubscriber {
    invocations: AtomicUsize,
}

#[async_trait]
impl StatusSubscriber for FailingSubscriber {
    async fn on_status_change(&self, _change: &StatusChange) -> anyhow::Result<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("subscriber exploded")
    }
}

#[tokio::test]
async fn every_valid_edge_commits_exactly_one_history_row() {
    for from in LeadStatus::ALL {
        for to in LeadStatus::ALL {
            if !from.can_transition_to(to) {
                continue;
            }
            let h = harness();
            let id = lead_in(&h, from).await;

            let change =
                h.tracker.update_lead_status(id, to, StatusUpdate::default()).await.unwrap();
            assert_eq!(change.from, from);
            assert_eq!(change.to, to);

            let lead = h.leads.get(id).await.unwrap().unwrap();
            assert_eq!(lead.status, to);

            let rows = h.history.list_for_lead(id).await.unwrap();
            assert_eq!(rows.len(), 1, "one history row for {from} -> {to}");
            assert_eq!(rows[0].from_status, from);
            assert_eq!(rows[0].to_status, to);
        }
    }
}

#[tokio::test]
async fn every_invalid_pair_rejects_and_appends_nothing() {
    for from in LeadStatus::ALL {
        for to in LeadStatus::ALL {
            if from.can_transition_to(to) {
                continue;
            }
            let h = harness();
            let id = lead_in(&h, from).await;

            let err =
                h.tracker.update_lead_status(id, to, StatusUpdate::default()).await.unwrap_err();
            assert!(
                matches!(err, CoreError::InvalidTransition { .. }),
                "{from} -> {to} should be invalid"
            );

            // Lead untouched, no history.
            assert_eq!(h.leads.get(id).await.unwrap().unwrap().status, from);
            assert!(h.history.list_for_lead(id).await.unwrap().is_empty());
        }
    }
}

#[tokio::test]
async fn terminal_states_reject_all_updates() {
    for terminal in [LeadStatus::Converted, LeadStatus::Declined] {
        let h = harness();
        let id = lead_in(&h, terminal).await;
        for to in LeadStatus::ALL {
            let result = h.tracker.update_lead_status(id, to, StatusUpdate::default()).await;
            assert!(result.is_err());
        }
    }
}

#[tokio::test]
async fn contact_timestamp_touched_only_on_outreach_statuses() {
    let h = harness();

    let emailed = lead_in(&h, LeadStatus::Pending).await;
    h.tracker
        .update_lead_status(emailed, LeadStatus::Emailed, StatusUpdate::default())
        .await
        .unwrap();
    assert!(h.leads.get(emailed).await.unwrap().unwrap().last_contacted_at.is_some());

    let booked = lead_in(&h, LeadStatus::Emailed).await;
    h.tracker
        .update_lead_status(booked, LeadStatus::Booked, StatusUpdate::default())
        .await
        .unwrap();
    assert!(h.leads.get(booked).await.unwrap().unwrap().last_contacted_at.is_none());
}

#[tokio::test]
async fn validate_transition_is_side_effect_free() {
    let h = harness();
    let id = lead_in(&h, LeadStatus::Emailed).await;

    h.tracker.validate_transition(id, LeadStatus::Booked).await.unwrap();
    let err = h.tracker.validate_transition(id, LeadStatus::Pending).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition { .. }));

    assert_eq!(h.leads.get(id).await.unwrap().unwrap().status, LeadStatus::Emailed);
    assert!(h.history.list_for_lead(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_lead_reports_not_found() {
    let h = harness();
    let err = h
        .tracker
        .update_lead_status(LeadId::new(), LeadStatus::Emailed, StatusUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[tokio::test]
async fn subscribers_fire_for_matching_and_any_status() {
    let h = harness();
    let declined_only = Arc::new(RecordingSubscriber::default());
    let any_status = Arc::new(RecordingSubscriber::default());
    h.tracker.subscribe(Some(LeadStatus::Declined), declined_only.clone()).await;
    h.tracker.subscribe(None, any_status.clone()).await;

    let id = lead_in(&h, LeadStatus::Emailed).await;
    h.tracker
        .update_lead_status(id, LeadStatus::Called, StatusUpdate::default())
        .await
        .unwrap();
    h.tracker
        .update_lead_status(id, LeadStatus::Declined, StatusUpdate::with_reason("opt out"))
        .await
        .unwrap();

    assert_eq!(declined_only.seen().len(), 1);
    assert_eq!(declined_only.seen()[0].to, LeadStatus::Declined);
    assert_eq!(any_status.seen().len(), 2);
}

#[tokio::test]
async fn subscriber_failure_never_aborts_a_committed_update() {
    let h = harness();
    let failing = Arc::new(FailingSubscriber { invocations: AtomicUsize::new(0) });
    let recording = Arc::new(RecordingSubscriber::default());
    h.tracker.subscribe(None, failing.clone()).await;
    h.tracker.subscribe(None, recording.clone()).await;

    let id = lead_in(&h, LeadStatus::Pending).await;
    let change = h
        .tracker
        .update_lead_status(id, LeadStatus::Emailed, StatusUpdate::default())
        .await
        .expect("update commits despite failing subscriber");
    assert_eq!(change.to, LeadStatus::Emailed);

    assert_eq!(failing.invocations.load(Ordering::SeqCst), 1);
    // Later subscribers still run after an earlier one failed.
    assert_eq!(recording.seen().len(), 1);
    assert_eq!(h.history.list_for_lead(id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn notifications_can_be_suppressed() {
    let h = harness();
    let recording = Arc::new(RecordingSubscriber::default());
    h.tracker.subscribe(None, recording.clone()).await;

    let id = lead_in(&h, LeadStatus::Pending).await;
    let update = StatusUpdate { notify: false, ..StatusUpdate::default() };
    h.tracker.update_lead_status(id, LeadStatus::Emailed, update).await.unwrap();

    assert!(recording.seen().is_empty());
    // History is still written; suppression only affects notification.
    assert_eq!(h.history.list_for_lead(id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn batch_updates_collect_independent_results() {
    let h = harness();
    let good = lead_in(&h, LeadStatus::Emailed).await;
    let terminal = lead_in(&h, LeadStatus::Declined).await;
    let missing = LeadId::new();

    let results = h
        .tracker
        .update_status_batch(vec![
            (good, LeadStatus::Booked, StatusUpdate::default()),
            (terminal, LeadStatus::Called, StatusUpdate::default()),
            (missing, LeadStatus::Emailed, StatusUpdate::default()),
        ])
        .await;

    assert_eq!(results.len(), 3);
    assert!(results[0].result.is_ok());
    assert!(matches!(results[1].result, Err(CoreError::InvalidTransition { .. })));
    assert!(matches!(results[2].result, Err(CoreError::NotFound(_))));

    // The invalid entries did not block the valid one.
    assert_eq!(h.leads.get(good).await.unwrap().unwrap().status, LeadStatus::Booked);
}

#[tokio::test]
async fn history_failure_propagates_after_validation() {
    let h = harness();
    let id = lead_in(&h, LeadStatus::Pending).await;

    h.history.inject_failure("history write failed").await;
    let err = h
        .tracker
        .update_lead_status(id, LeadStatus::Emailed, StatusUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)));
}
