//! Tick admission.
//!
//! A tick is admitted when a group of at least QUORUM validated votes
//! agrees on the same 6-tuple and a stored tick-data proposal re-derives
//! the group's transaction digest. Admission promotes that proposal to
//! canonical, persists the verified marker and advances the verify
//! frontier. Votes outside the winning group are counted as byzantine
//! suspects.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, trace, warn};

use tickwatch_storage::keys;
use tickwatch_types::wire::frame;
use tickwatch_types::{PacketType, TickVote, VoteGroupKey, QUORUM};

use crate::error::PipelineResult;
use crate::runtime::{advance_to, Runtime};

/// Poll period of the admission loop.
const VERIFY_CYCLE: Duration = Duration::from_millis(100);

/// Drive admission until shutdown.
pub async fn run_verifier(runtime: Arc<Runtime>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(VERIFY_CYCLE) => {}
            _ = runtime.shutdown.cancelled() => break,
        }

        loop {
            match admit_next(&runtime).await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(err) => {
                    warn!(error = %err, "tick admission failed, will retry");
                    break;
                }
            }
        }

        if runtime.end_epoch_seen.load(Ordering::Acquire) {
            if let Err(err) = maybe_roll_epoch(&runtime).await {
                warn!(error = %err, "epoch rollover attempt failed");
            }
        }
    }
    trace!("verifier exited");
}

/// Try to admit the tick just past the verify frontier. Returns true
/// when the frontier advanced.
pub async fn admit_next(runtime: &Runtime) -> PipelineResult<bool> {
    let tick = runtime.frontiers.verify.load(Ordering::Acquire) + 1;

    let votes = runtime.store.get_tick_votes(tick).await?;
    if votes.len() < QUORUM {
        return Ok(false);
    }

    let mut groups: HashMap<VoteGroupKey, Vec<&TickVote>> = HashMap::new();
    for vote in &votes {
        groups.entry(vote.group_key()).or_default().push(vote);
    }

    let mut quorum_groups: Vec<(&VoteGroupKey, &Vec<&TickVote>)> = groups
        .iter()
        .filter(|(_, members)| members.len() >= QUORUM)
        .collect();

    let (consensus, members) = match quorum_groups.len() {
        0 => return Ok(false),
        1 => quorum_groups.pop().unwrap(),
        _ => {
            // Impossible with an honest two-thirds majority. The group
            // with the lower median seat would be preferred, but a
            // double quorum is held for the operator, not admitted.
            let preferred = quorum_groups
                .iter()
                .map(|(_, members)| median_index(members))
                .min()
                .unwrap_or(0);
            error!(
                tick,
                groups = quorum_groups.len(),
                preferred_median_seat = preferred,
                "two quorum groups observed, suspected byzantine fork; tick held"
            );
            return Ok(false);
        }
    };

    // Select the proposal whose recomputed transaction-set digest matches
    // the consensus digest. None stored yet means keep fetching.
    let mut proposals = runtime.store.get_tick_data_proposals(tick).await?;
    proposals.sort_by_key(|p| p.computor_index);
    let Some(canonical) = proposals
        .into_iter()
        .find(|p| p.transaction_set_digest() == consensus.transaction_digest)
    else {
        return Ok(false);
    };

    let vote_count = members.len();
    runtime.store.set_canonical_tick_data(&canonical).await?;
    runtime
        .store
        .mark_tick_verified(tick, vote_count as u32)
        .await?;
    runtime.store.update_latest_verified_tick(tick).await?;

    let minority = votes.len() - vote_count;
    if minority > 0 {
        runtime
            .tallies
            .byzantine_suspect
            .fetch_add(minority as u64, Ordering::Relaxed);
    }

    if runtime.config.not_save_tick_vote {
        runtime.store.delete_tick_votes(tick).await?;
    }

    advance_to(&runtime.frontiers.verify, tick);
    trace!(tick, votes = vote_count, "tick admitted");
    Ok(true)
}

fn median_index(members: &[&TickVote]) -> u16 {
    let mut indexes: Vec<u16> = members.iter().map(|v| v.computor_index).collect();
    indexes.sort_unstable();
    indexes[indexes.len() / 2]
}

/// After END_EPOCH: once the verify frontier reaches the epoch's last
/// tick, fetch the next committee and move the pipeline to the new
/// epoch.
async fn maybe_roll_epoch(runtime: &Runtime) -> PipelineResult<()> {
    let epoch = runtime.current_epoch();
    let Some(end_tick) = runtime
        .store
        .get_u32(&keys::end_epoch_tick(epoch))
        .await?
    else {
        return Ok(());
    };
    if runtime.frontiers.verify.load(Ordering::Acquire) < end_tick {
        return Ok(());
    }

    // Already rolled?
    if let Some(committee) = runtime.committee() {
        if committee.epoch > epoch {
            runtime.set_epoch(committee.epoch);
            runtime.end_epoch_seen.store(false, Ordering::Release);
            info!(epoch = committee.epoch, "entered new epoch");
            return Ok(());
        }
    }

    // Ask peers for the next committee; the processor installs any blob
    // that passes the arbitrator check.
    let request = frame(PacketType::RequestComputors, rand::random(), &[]);
    if let Err(err) = runtime.pool.send_to_random(&request).await {
        trace!(error = %err, "committee request not sent");
    }
    Ok(())
}
