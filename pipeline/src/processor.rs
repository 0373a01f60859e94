//! Data processor.
//!
//! A pool of workers drains the data buffer. Each packet is decoded,
//! validated (signatures where the artifact carries one) and persisted;
//! artifacts that fail validation are dropped and counted. Nothing here
//! advances the verify frontiers: persistence is keyed by content, and
//! admission is the verifier's job.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use tickwatch_types::crypto;
use tickwatch_types::{
    Committee, LogEvent, LogHeader, PacketHeader, PacketType, TickData, TickVote, Transaction,
    HEADER_SIZE, LOG_HEADER_SIZE, NUMBER_OF_COMPUTORS,
};

use crate::error::PipelineResult;
use crate::runtime::{advance_to, Runtime};

/// Drain the data buffer until it closes.
pub async fn run_data_worker(runtime: Arc<Runtime>) {
    while let Some(packet) = runtime.buffers.data.pop().await {
        if let Err(err) = process_packet(&runtime, &packet).await {
            debug!(error = %err, "data packet dropped");
        }
    }
    trace!("data worker exited");
}

/// Decode, validate and persist one framed packet.
pub async fn process_packet(runtime: &Runtime, packet: &Bytes) -> PipelineResult<()> {
    let header = match PacketHeader::decode(packet) {
        Ok(header) if header.size as usize == packet.len() => header,
        _ => {
            runtime.tallies.undecodable.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
    };
    let payload = &packet[HEADER_SIZE..];

    match header.classify() {
        Some(PacketType::TickData) => process_tick_data(runtime, payload).await,
        Some(PacketType::TickVote) => process_tick_vote(runtime, payload).await,
        Some(PacketType::Transaction) => process_transaction(runtime, payload).await,
        Some(PacketType::LogIdRanges) => process_log_ranges(runtime, payload).await,
        Some(PacketType::LogEvents) => process_log_events(runtime, payload).await,
        Some(PacketType::Computors) => process_committee(runtime, payload).await,
        Some(PacketType::EndEpoch) => process_end_epoch(runtime, payload).await,
        Some(PacketType::EndResponse) => Ok(()),
        _ => {
            runtime.tallies.undecodable.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }
}

async fn process_tick_data(runtime: &Runtime, payload: &[u8]) -> PipelineResult<()> {
    let data = TickData::decode(payload)?;
    if data.tick == 0 || data.epoch == 0 || data.computor_index as usize >= NUMBER_OF_COMPUTORS {
        runtime.tallies.undecodable.fetch_add(1, Ordering::Relaxed);
        return Ok(());
    }
    runtime.store.insert_tick_data(&data).await?;
    runtime
        .store
        .update_latest_tick_and_epoch(data.tick, data.epoch)
        .await?;
    advance_to(&runtime.frontiers.fetch, data.tick);
    Ok(())
}

async fn process_tick_vote(runtime: &Runtime, payload: &[u8]) -> PipelineResult<()> {
    let vote = TickVote::decode(payload)?;
    if vote.computor_index as usize >= NUMBER_OF_COMPUTORS || vote.tick == 0 {
        runtime.tallies.undecodable.fetch_add(1, Ordering::Relaxed);
        return Ok(());
    }

    let Some(committee) = runtime.committee() else {
        // No committee yet: the vote cannot be validated, drop it. The
        // scheduler keeps re-requesting votes.
        return Ok(());
    };
    if vote.epoch != committee.epoch {
        runtime.tallies.invalid_signature.fetch_add(1, Ordering::Relaxed);
        return Ok(());
    }
    let Some(key) = committee.key_at(vote.computor_index) else {
        return Ok(());
    };
    if !crypto::verify(key, &vote.signing_digest(), &vote.signature) {
        runtime.tallies.invalid_signature.fetch_add(1, Ordering::Relaxed);
        return Ok(());
    }

    // A second vote from the same seat with a different signature is a
    // byzantine symptom; keep the first, count the offense.
    if let Some(existing) = runtime
        .store
        .get_tick_vote(vote.tick, vote.computor_index)
        .await?
    {
        if existing.signature != vote.signature {
            runtime
                .tallies
                .byzantine_suspect
                .fetch_add(1, Ordering::Relaxed);
        }
        return Ok(());
    }

    runtime.store.insert_tick_vote(&vote).await?;
    Ok(())
}

async fn process_transaction(runtime: &Runtime, payload: &[u8]) -> PipelineResult<()> {
    let tx = Transaction::decode(payload)?;
    if !tx.verify_signature() {
        runtime.tallies.invalid_signature.fetch_add(1, Ordering::Relaxed);
        return Ok(());
    }
    runtime.store.insert_transaction(&tx.hash(), payload).await?;
    Ok(())
}

async fn process_log_ranges(runtime: &Runtime, payload: &[u8]) -> PipelineResult<()> {
    let ranges = tickwatch_types::TickLogRanges::decode(payload)?;
    runtime.store.insert_log_ranges(&ranges).await?;
    Ok(())
}

/// A log packet may carry several packed events back to back.
async fn process_log_events(runtime: &Runtime, payload: &[u8]) -> PipelineResult<()> {
    let mut offset = 0usize;
    let mut highest_tick = 0u32;
    let mut epoch = 0u16;

    while offset + LOG_HEADER_SIZE <= payload.len() {
        let header = LogHeader::decode(&payload[offset..])?;
        let total = LOG_HEADER_SIZE + header.body_size as usize;
        if offset + total > payload.len() {
            runtime.tallies.undecodable.fetch_add(1, Ordering::Relaxed);
            break;
        }
        let raw = &payload[offset..offset + total];
        // Decode as a whole event to apply the minimum body gate.
        let event = LogEvent::decode(raw)?;
        runtime
            .store
            .insert_log(event.epoch, event.log_id, raw)
            .await?;
        highest_tick = highest_tick.max(event.tick);
        epoch = event.epoch;
        offset += total;
    }

    if highest_tick > 0 {
        runtime
            .store
            .update_latest_event_tick_and_epoch(highest_tick, epoch)
            .await?;
        advance_to(&runtime.frontiers.log_fetch, highest_tick);
    }
    Ok(())
}

async fn process_committee(runtime: &Runtime, payload: &[u8]) -> PipelineResult<()> {
    let committee = Committee::decode(payload)?;
    if !committee.verify_arbitrator(&runtime.config.arbitrator) {
        runtime.tallies.invalid_signature.fetch_add(1, Ordering::Relaxed);
        warn!(epoch = committee.epoch, "committee blob failed arbitrator check");
        return Ok(());
    }
    let current = runtime.current_epoch();
    if committee.epoch < current {
        return Ok(());
    }
    info!(epoch = committee.epoch, "committee installed");
    runtime.install_committee(committee);
    Ok(())
}

async fn process_end_epoch(runtime: &Runtime, payload: &[u8]) -> PipelineResult<()> {
    if payload.len() < 4 {
        return Ok(());
    }
    let tick = u32::from_le_bytes(payload[..4].try_into().unwrap());
    let epoch = runtime.current_epoch();
    runtime
        .store
        .set_u32(&tickwatch_storage::keys::end_epoch_tick(epoch), tick)
        .await?;
    runtime.end_epoch_seen.store(true, Ordering::Release);
    info!(epoch, tick, "end-of-epoch marker recorded");
    Ok(())
}
