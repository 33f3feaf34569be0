//! Subcommand implementations. Each writes its report to `out`.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use strand_store::{EventCacheStore, ProtocolEvent};

/// `rooms --ids`: bare room ids, one per line.
pub fn room_ids(store: &EventCacheStore, out: &mut impl Write) -> Result<()> {
    for room_id in store.room_ids().context("failed to list rooms")? {
        writeln!(out, "{room_id}")?;
    }
    Ok(())
}

/// `rooms`: one line per room with count and time span.
pub fn rooms(store: &EventCacheStore, out: &mut impl Write) -> Result<()> {
    let summaries = store.room_summaries().context("failed to list rooms")?;
    if summaries.is_empty() {
        writeln!(out, "no rooms cached")?;
        return Ok(());
    }
    for summary in summaries {
        writeln!(
            out,
            "{}\t{} events\t{}..{}",
            summary.room_id, summary.count, summary.oldest_ts, summary.newest_ts
        )?;
    }
    Ok(())
}

/// `history`: newest-first events as JSON lines.
pub fn history(
    store: &EventCacheStore,
    room_id: &str,
    limit: u32,
    before: Option<i64>,
    out: &mut impl Write,
) -> Result<usize> {
    let page = store
        .query_page(room_id, before.unwrap_or(i64::MAX), limit)
        .with_context(|| format!("failed to read history of {room_id}"))?;
    for record in &page {
        writeln!(out, "{}", serde_json::to_string(record)?)?;
    }
    Ok(page.len())
}

/// `import`: persist protocol events read as JSON lines into `room_id`.
///
/// A line that is not a valid event aborts the import. Events that fail to
/// persist are skipped by the store. Returns how many were stored.
pub fn import(
    store: &EventCacheStore,
    room_id: &str,
    input: impl BufRead,
    out: &mut impl Write,
) -> Result<usize> {
    let mut records = Vec::new();
    for (index, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let raw: serde_json::Value = serde_json::from_str(&line)
            .with_context(|| format!("line {}: not JSON", index + 1))?;
        let event = ProtocolEvent::from_json(&raw)
            .with_context(|| format!("line {}: not an event", index + 1))?;
        records.push(event.into_record(room_id));
    }

    let total = records.len();
    let stored = store.store_events(records).len();
    writeln!(out, "imported {stored} of {total} events into {room_id}")?;
    Ok(stored)
}

/// `event`: one event as pretty JSON.
pub fn event(store: &EventCacheStore, event_id: &str, out: &mut impl Write) -> Result<bool> {
    match store
        .get_event(event_id)
        .with_context(|| format!("failed to read {event_id}"))?
    {
        Some(record) => {
            writeln!(out, "{}", serde_json::to_string_pretty(&record)?)?;
            Ok(true)
        }
        None => {
            writeln!(out, "event {event_id} not found")?;
            Ok(false)
        }
    }
}

/// `forget`: drop every cached event of a room.
pub fn forget(store: &EventCacheStore, room_id: &str, out: &mut impl Write) -> Result<usize> {
    let deleted = store
        .delete_room(room_id)
        .with_context(|| format!("failed to forget {room_id}"))?;
    writeln!(out, "removed {deleted} events from {room_id}")?;
    Ok(deleted)
}

/// `migrate`: report the schema version (opening the store already migrated it).
pub fn migrate(store: &EventCacheStore, out: &mut impl Write) -> Result<u32> {
    let version = store.schema_version().context("failed to read schema version")?;
    writeln!(out, "schema at version {version}")?;
    Ok(version)
}
