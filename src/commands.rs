use anyhow::{anyhow, bail, Result};
use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use crate::aggregate::{slot_detail, RankedSlot};
use crate::models::{new_id, EventId, NewEvent, ParticipantSubmission};
use crate::slot::{parse_slot_list, SlotKey};
use crate::store::Backend;
use crate::submit::submit_availability;
use crate::sync::{load_snapshot, Snapshot, SyncHandle};

/// Parse a comma-separated list of `YYYY-MM-DD` dates.
pub fn parse_dates(s: &str) -> Result<Vec<NaiveDate>> {
    s.split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| {
            NaiveDate::parse_from_str(d, "%Y-%m-%d").map_err(|_| anyhow!("Invalid date '{d}'"))
        })
        .collect()
}

pub fn format_ranked(best: &[RankedSlot]) -> Vec<String> {
    best.iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "{:>2}. {} {:02}:00  {}/{}  {}",
                i + 1,
                r.slot.date.format("%a %Y-%m-%d"),
                r.slot.hour,
                r.count,
                r.total,
                r.participants.join(", ")
            )
        })
        .collect()
}

fn print_best_times(snapshot: &Snapshot) {
    println!(
        "{} ({} participant(s))",
        snapshot.event.title, snapshot.summary.participant_count
    );
    if snapshot.summary.best_times.is_empty() {
        println!("  No availability submitted yet.");
        return;
    }
    for line in format_ranked(&snapshot.summary.best_times) {
        println!("{line}");
    }
}

pub struct CreateArgs<'a> {
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub dates: &'a str,
    pub start_hour: u8,
    pub end_hour: u8,
    pub timezone: &'a str,
}

pub async fn run_create(backend: &Backend, args: CreateArgs<'_>, public_url: &str) -> Result<EventId> {
    let draft = NewEvent {
        title: args.title.to_string(),
        description: args.description.map(String::from),
        dates: parse_dates(args.dates)?,
        start_hour: args.start_hour,
        end_hour: args.end_hour,
        timezone: args.timezone.to_string(),
    };
    let event = draft.into_event(EventId(new_id()), Utc::now())?;
    let created = backend.store.create_event(&event).await?;

    info!(
        "Created event '{}' with {} candidate day(s)",
        created.title,
        created.candidate_dates().len()
    );
    println!("Event ID: {}", created.id);
    if !public_url.is_empty() {
        println!("Share: {}/events/{}", public_url.trim_end_matches('/'), created.id);
    }
    Ok(created.id)
}

pub struct SubmitArgs<'a> {
    pub event: &'a str,
    pub name: &'a str,
    pub slots: &'a str,
    pub email: Option<&'a str>,
    pub lock: bool,
    pub password: Option<&'a str>,
}

pub async fn run_submit(backend: &Backend, args: SubmitArgs<'_>) -> Result<()> {
    let availability =
        parse_slot_list(args.slots).ok_or_else(|| anyhow!("Invalid slot list '{}'", args.slots))?;
    let draft = ParticipantSubmission {
        name: args.name.to_string(),
        email: args.email.map(String::from),
        availability,
        lock: args.lock,
        password: args.password.map(String::from),
    };
    let event_id = EventId::from(args.event);
    let outcome = submit_availability(backend.store.as_ref(), &event_id, &draft).await?;

    println!(
        "{} {} with {} slot(s){}",
        if outcome.is_new { "Added" } else { "Updated" },
        outcome.record.name,
        outcome.record.availability.len(),
        if outcome.record.locked { " (locked)" } else { "" }
    );
    Ok(())
}

pub async fn run_best_times(backend: &Backend, event: &str) -> Result<()> {
    let snapshot = load_snapshot(backend.store.as_ref(), &EventId::from(event)).await?;
    print_best_times(&snapshot);
    Ok(())
}

pub async fn run_slot(backend: &Backend, event: &str, key: &str) -> Result<()> {
    let Some(slot) = SlotKey::parse(key) else {
        bail!("Invalid slot key '{key}' (expected YYYY-MM-DD-H)");
    };
    let snapshot = load_snapshot(backend.store.as_ref(), &EventId::from(event)).await?;
    let detail = slot_detail(&snapshot.participants, &slot);

    println!("{} {:02}:00", slot.date.format("%a %Y-%m-%d"), slot.hour);
    println!("  Available ({}):", detail.available.len());
    for p in &detail.available {
        println!("    {}", p.name);
    }
    println!("  Unavailable ({}):", detail.unavailable.len());
    for p in &detail.unavailable {
        println!("    {}", p.name);
    }
    Ok(())
}

/// Print the ranking, then again after every change until Ctrl-C.
pub async fn run_watch(backend: &Backend, event: &str) -> Result<()> {
    let mut handle =
        SyncHandle::spawn(backend.store.clone(), backend.feed.clone(), EventId::from(event)).await?;
    print_best_times(&handle.latest());

    loop {
        tokio::select! {
            alive = handle.changed() => {
                if !alive {
                    warn!("Change feed for event {} closed", handle.event_id());
                    break;
                }
                println!();
                print_best_times(&handle.latest());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping watch");
                break;
            }
        }
    }
    handle.unsubscribe();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StoreConfig;
    use crate::store::connect;
    use crate::store::memory::tests::sample_event;

    #[test]
    fn test_parse_dates() {
        let dates = parse_dates("2025-06-01, 2025-06-03,").unwrap();
        assert_eq!(dates.len(), 2);
        assert!(parse_dates("2025-13-01").is_err());
    }

    #[tokio::test]
    async fn test_create_then_submit_and_rank() {
        let backend = connect(&StoreConfig::default()).unwrap();
        let id = run_create(
            &backend,
            CreateArgs {
                title: "Planning",
                description: None,
                dates: "2025-06-02,2025-06-01",
                start_hour: 9,
                end_hour: 11,
                timezone: "UTC",
            },
            "",
        )
        .await
        .unwrap();

        for name in ["Alice", "Bob"] {
            run_submit(
                &backend,
                SubmitArgs {
                    event: &id.0,
                    name,
                    slots: "2025-06-01-9,2025-06-02-10",
                    email: None,
                    lock: false,
                    password: None,
                },
            )
            .await
            .unwrap();
        }

        let snapshot = load_snapshot(backend.store.as_ref(), &id).await.unwrap();
        let lines = format_ranked(&snapshot.summary.best_times);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], " 1. Sun 2025-06-01 09:00  2/2  Alice, Bob");
        assert!(run_slot(&backend, &id.0, "2025-06-01-9").await.is_ok());
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_slots() {
        let backend = connect(&StoreConfig::default()).unwrap();
        backend.store.create_event(&sample_event()).await.unwrap();
        let args = SubmitArgs {
            event: "evt-1",
            name: "Alice",
            slots: "2025-06-01-25",
            email: None,
            lock: false,
            password: None,
        };
        assert!(run_submit(&backend, args).await.is_err());
        assert!(run_slot(&backend, "evt-1", "garbage").await.is_err());
        assert!(run_best_times(&backend, "missing").await.is_err());
    }
}
