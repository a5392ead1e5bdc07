//! Submission pipeline: phase transitions, validation, the one-in-flight
//! guard, local timeouts, and reconciliation after confirmation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use vote_client::config::Config;
use vote_client::errors::VoteError;
use vote_client::provider::{VoteLedger, WalletProvider};
use vote_client::sim::SimChain;
use vote_client::submit::{SubmissionPhase, SubmitFailure};
use vote_client::{Address, SessionContext};

fn setup(names: &[&str]) -> (Arc<SimChain>, SessionContext) {
    setup_with_timeout(names, Duration::from_secs(5))
}

fn setup_with_timeout(names: &[&str], confirmation: Duration) -> (Arc<SimChain>, SessionContext) {
    let _ = env_logger::builder().is_test(true).try_init();
    let sim = SimChain::new(names);
    let mut config = Config::new(Address([0xCA; 20]));
    config.confirmation_timeout = confirmation;
    let ctx = SessionContext::new(
        &config,
        sim.clone() as Arc<dyn WalletProvider>,
        sim.clone() as Arc<dyn VoteLedger>,
    );
    (sim, ctx)
}

async fn connect(sim: &SimChain, ctx: &SessionContext, account: Address) {
    sim.authorize(&[account]);
    ctx.controller.connect().await.unwrap();
}

#[tokio::test]
async fn confirmed_vote_updates_tallies_and_audit() -> anyhow::Result<()> {
    let (sim, ctx) = setup(&["Alice", "Bob", "Carol"]);
    let a = SimChain::account(1);
    connect(&sim, &ctx, a).await;

    let receipt = ctx.submit_vote(2).await?;
    assert_eq!(receipt.event.candidate_id, 2);
    assert_eq!(receipt.event.voter, a);
    assert_eq!(ctx.pipeline.status().phase, SubmissionPhase::Confirmed);

    // Counts come from a fresh confirmed read, not a local increment.
    let list = ctx.cache.list_candidates().await?;
    let votes: Vec<u64> = list.iter().map(|c| c.vote_count).collect();
    assert_eq!(votes, [0, 1, 0]);
    assert_eq!(ctx.cache.total_votes().await?, 1);

    assert!(ctx.cache.has_voted(a).await?);
    assert_eq!(ctx.audit.len(), 1);
    assert_eq!(ctx.audit.entries()[0].key(), receipt.event.key());
    Ok(())
}

#[tokio::test]
async fn second_vote_is_refused_after_confirmation() {
    let (sim, ctx) = setup(&["Alice", "Bob"]);
    let a = SimChain::account(1);
    connect(&sim, &ctx, a).await;

    ctx.pipeline.submit(a, 1).await.unwrap();
    let err = ctx.pipeline.submit(a, 2).await.unwrap_err();
    assert!(matches!(err, VoteError::AlreadyVoted));
    assert_eq!(ctx.cache.total_votes().await.unwrap(), 1);
}

#[tokio::test]
async fn unknown_candidate_is_rejected_before_signing() {
    let (sim, ctx) = setup(&["Alice"]);
    let a = SimChain::account(1);
    connect(&sim, &ctx, a).await;

    let err = ctx.pipeline.submit(a, 99).await.unwrap_err();
    assert!(matches!(err, VoteError::InvalidCandidate(99)));
    assert_eq!(
        ctx.pipeline.status().phase,
        SubmissionPhase::Failed(SubmitFailure::Unknown)
    );
}

#[tokio::test]
async fn declined_signature_is_recoverable() {
    let (sim, ctx) = setup(&["Alice"]);
    let a = SimChain::account(1);
    connect(&sim, &ctx, a).await;
    sim.reject_next_signature();

    let err = ctx.pipeline.submit(a, 1).await.unwrap_err();
    assert!(matches!(err, VoteError::UserRejected));
    assert_eq!(
        ctx.pipeline.status().phase,
        SubmissionPhase::Failed(SubmitFailure::UserRejected)
    );

    // No automatic retry; an explicit re-invoke starts from Idle and works.
    ctx.pipeline.submit(a, 1).await.unwrap();
    assert_eq!(ctx.pipeline.status().phase, SubmissionPhase::Confirmed);
}

#[tokio::test]
async fn ledger_rejection_beats_stale_local_state() {
    let (sim, ctx) = setup(&["Alice"]);
    let a = SimChain::account(1);
    connect(&sim, &ctx, a).await;

    // The cached flag says "not voted", but the contract knows better.
    assert!(!ctx.cache.has_voted(a).await.unwrap());
    sim.mark_voted(a);

    let err = ctx.pipeline.submit(a, 1).await.unwrap_err();
    assert!(matches!(err, VoteError::ContractReverted(_)));
    assert_eq!(
        ctx.pipeline.status().phase,
        SubmissionPhase::Failed(SubmitFailure::ContractReverted)
    );
}

#[tokio::test]
async fn only_one_submission_in_flight() {
    let (sim, ctx) = setup(&["Alice", "Bob"]);
    let a = SimChain::account(1);
    connect(&sim, &ctx, a).await;
    sim.pause_confirmations();

    let (results_tx, mut results_rx) = mpsc::unbounded_channel();
    for _ in 0..4 {
        let pipeline = Arc::clone(&ctx.pipeline);
        let results_tx = results_tx.clone();
        tokio::spawn(async move {
            let _ = results_tx.send(pipeline.submit(a, 1).await);
        });
    }

    // The winner is parked in Pending, so the other three must fail fast.
    let mut rejected = 0;
    for _ in 0..3 {
        let result = timeout(Duration::from_secs(1), results_rx.recv())
            .await
            .expect("loser did not resolve")
            .unwrap();
        assert!(matches!(result, Err(VoteError::SubmissionInProgress)));
        rejected += 1;
    }
    assert_eq!(rejected, 3);

    sim.release_confirmations();
    let winner = timeout(Duration::from_secs(1), results_rx.recv())
        .await
        .expect("winner did not resolve")
        .unwrap();
    assert!(winner.is_ok());
}

#[tokio::test]
async fn local_timeout_is_not_a_ledger_failure() {
    let (sim, ctx) = setup_with_timeout(&["Alice"], Duration::from_millis(50));
    let a = SimChain::account(1);
    connect(&sim, &ctx, a).await;
    sim.pause_confirmations();

    let err = ctx.pipeline.submit(a, 1).await.unwrap_err();
    assert!(matches!(err, VoteError::ConfirmationTimeout));
    assert_eq!(
        ctx.pipeline.status().phase,
        SubmissionPhase::Failed(SubmitFailure::Timeout)
    );

    // We only stopped waiting: nothing was invalidated or appended.
    assert!(!ctx.cache.has_voted(a).await.unwrap());
    assert!(ctx.audit.is_empty());
}

#[tokio::test]
async fn pending_is_visible_until_confirmation() {
    let (sim, ctx) = setup(&["Alice"]);
    let a = SimChain::account(1);
    connect(&sim, &ctx, a).await;
    sim.pause_confirmations();

    let mut status_rx = ctx.pipeline.subscribe_status();
    let pipeline = Arc::clone(&ctx.pipeline);
    let submit = tokio::spawn(async move { pipeline.submit(a, 1).await });

    timeout(
        Duration::from_secs(1),
        status_rx.wait_for(|s| s.phase == SubmissionPhase::Pending),
    )
    .await
    .expect("submission never reached Pending")
    .unwrap();

    sim.release_confirmations();
    timeout(
        Duration::from_secs(1),
        status_rx.wait_for(|s| s.phase == SubmissionPhase::Confirmed),
    )
    .await
    .expect("submission never confirmed")
    .unwrap();
    assert!(submit.await.unwrap().is_ok());
}

#[tokio::test]
async fn phases_land_without_any_status_subscriber() {
    let (sim, ctx) = setup(&["Alice"]);
    let a = SimChain::account(1);
    connect(&sim, &ctx, a).await;

    // No receiver exists anywhere; `status()` must still see each outcome.
    ctx.pipeline.submit(a, 1).await.unwrap();
    assert_eq!(ctx.pipeline.status().phase, SubmissionPhase::Confirmed);

    let err = ctx.pipeline.submit(a, 1).await.unwrap_err();
    assert!(matches!(err, VoteError::AlreadyVoted));
    assert_eq!(
        ctx.pipeline.status().phase,
        SubmissionPhase::Failed(SubmitFailure::Unknown)
    );
}

#[tokio::test]
async fn confirmation_gate_holds_before_any_waiter() {
    let (sim, ctx) = setup(&["Alice"]);
    let a = SimChain::account(1);
    connect(&sim, &ctx, a).await;

    // Pause before anything waits on the gate; the hold must still stick.
    sim.pause_confirmations();
    let ledger = sim.clone() as Arc<dyn VoteLedger>;
    let tx = ledger.submit_vote(a, 1).await.unwrap();
    assert!(timeout(Duration::from_millis(50), ledger.wait_confirmed(tx))
        .await
        .is_err());

    sim.release_confirmations();
    let receipt = ledger.wait_confirmed(tx).await.unwrap();
    assert_eq!(receipt.event.candidate_id, 1);
}

#[tokio::test]
async fn cancelled_submission_frees_the_slot() {
    let (sim, ctx) = setup(&["Alice"]);
    let a = SimChain::account(1);
    connect(&sim, &ctx, a).await;
    sim.pause_confirmations();

    let mut status_rx = ctx.pipeline.subscribe_status();
    let pipeline = Arc::clone(&ctx.pipeline);
    let submit = tokio::spawn(async move { pipeline.submit(a, 1).await });
    timeout(
        Duration::from_secs(1),
        status_rx.wait_for(|s| s.phase == SubmissionPhase::Pending),
    )
    .await
    .expect("submission never reached Pending")
    .unwrap();

    // The caller walks away mid-flight. The slot must not stay taken.
    submit.abort();
    let _ = submit.await;

    sim.release_confirmations();
    let receipt = ctx.pipeline.submit(a, 1).await.unwrap();
    assert_eq!(receipt.event.voter, a);
}

#[tokio::test]
async fn account_switch_mid_pending_leaves_outcome_intact() {
    let (sim, ctx) = setup(&["Alice", "Bob"]);
    let (a, b) = (SimChain::account(1), SimChain::account(2));
    connect(&sim, &ctx, a).await;
    sim.pause_confirmations();

    let mut status_rx = ctx.pipeline.subscribe_status();
    let pipeline = Arc::clone(&ctx.pipeline);
    let submit = tokio::spawn(async move { pipeline.submit(a, 1).await });
    timeout(
        Duration::from_secs(1),
        status_rx.wait_for(|s| s.phase == SubmissionPhase::Pending),
    )
    .await
    .expect("submission never reached Pending")
    .unwrap();

    let mut session_rx = ctx.controller.subscribe();
    sim.emit_accounts_changed(&[b]);
    timeout(
        Duration::from_secs(1),
        session_rx.wait_for(|s| s.account == Some(b)),
    )
    .await
    .expect("account switch not observed")
    .unwrap();

    sim.release_confirmations();
    let receipt = submit.await.unwrap().unwrap();
    assert_eq!(receipt.event.voter, a);

    // The old account's vote status is not shown for the new account.
    assert!(!ctx.cache.has_voted(b).await.unwrap());
    assert!(ctx.cache.has_voted(a).await.unwrap());
}
