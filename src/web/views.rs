use leptos::prelude::*;

use crate::aggregate::{Heatmap, RankedSlot};
use crate::models::{Event, Participant};
use crate::slot::TimeSlot;
use crate::sync::Snapshot;

const STYLE: &str = include_str!("../style.css");

pub(super) fn hour_label(hour: u8) -> String {
    format!("{hour:02}:00")
}

/// Cell opacity: faint for nobody, solid when everyone is free.
pub(super) fn cell_opacity(intensity: f32) -> f32 {
    0.2 + 0.8 * intensity.clamp(0.0, 1.0)
}

fn shell(title: String, body_html: String) -> String {
    view! {
        <html lang="en">
            <head>
                <meta charset="utf-8" />
                <meta name="viewport" content="width=device-width, initial-scale=1" />
                <title>{title}</title>
                <style>{STYLE}</style>
            </head>
            <body inner_html=body_html />
        </html>
    }
    .to_html()
}

pub(super) fn render_index_page(app_name: &str) -> String {
    let heading = app_name.to_string();
    let body = view! {
        <h1>{heading}</h1>
        <p>"Share an event link and everyone marks the hours they are free."</p>
        <p class="empty">"Create an event with "<code>"POST /api/events"</code>" or the "<code>"create"</code>" command."</p>
    }
    .to_html();
    shell(app_name.to_string(), body)
}

pub(super) fn render_not_found(id: &str) -> String {
    let message = format!("No event with id '{id}'.");
    let body = view! {
        <h1>"Event not found"</h1>
        <div class="error">{message}</div>
    }
    .to_html();
    shell("Event not found".to_string(), body)
}

pub(super) fn render_event_page(snapshot: &Snapshot) -> String {
    let event = &snapshot.event;
    let heatmap = Heatmap::from_participants(&snapshot.participants);

    let title = event.title.clone();
    let description = event.description.clone().unwrap_or_default();
    let meta = format!(
        "{} participant(s), {} - {}, times in {}",
        snapshot.summary.participant_count,
        event.start_date.format("%b %-d"),
        event.end_date.format("%b %-d, %Y"),
        event.timezone
    );
    let changes_url = format!("/api/events/{}/changes", event.id);
    let submit_url = format!("/api/events/{}/participants", event.id);

    let grid_html = render_heatmap(event, &heatmap);
    let best_html = render_best_times(&snapshot.summary.best_times);
    let people_html = render_participants(&snapshot.participants);

    let body = view! {
        <main id="event" data-changes=changes_url data-submit=submit_url>
            <h1>{title}</h1>
            <p class="description">{description}</p>
            <p class="timestamp">{meta}</p>
            <section>
                <h2>"Group availability"</h2>
                <div class="grid-scroll" inner_html=grid_html />
            </section>
            <section>
                <h2>"Your availability"</h2>
                <p class="hint">"Click the grid cells when you are free, then save."</p>
                <form id="submit-form">
                    <input name="name" placeholder="Your name" required=true />
                    <input name="email" type="email" placeholder="Email (optional)" />
                    <input name="password" type="password" placeholder="Password" />
                    <label>
                        <input name="lock" type="checkbox" />
                        " Lock my name"
                    </label>
                    <button type="submit">"Save availability"</button>
                    <div id="submit-message" class="error" hidden=true></div>
                </form>
            </section>
            <section>
                <h2>"Best times"</h2>
                <div inner_html=best_html />
            </section>
            <section>
                <h2>"Participants"</h2>
                <div inner_html=people_html />
            </section>
        </main>
        <script src="/static/grid.js"></script>
    }
    .to_html();
    shell(event.title.clone(), body)
}

fn render_heatmap(event: &Event, heatmap: &Heatmap) -> String {
    let dates = event.candidate_dates();
    let total = heatmap.participants();

    let mut header_html = view! { <th class="time"></th> }.to_html();
    for d in &dates {
        let label = d.format("%a %b %-d").to_string();
        header_html.push_str(&view! { <th>{label}</th> }.to_html());
    }

    let rows_html: String = event
        .hours()
        .into_iter()
        .map(|hour| {
            let cells_html: String = dates
                .iter()
                .map(|date| {
                    let slot = TimeSlot::new(*date, hour);
                    let count = heatmap.count(&slot);
                    let style = format!("opacity: {:.2}", cell_opacity(heatmap.intensity(&slot)));
                    let key = slot.key().as_str().to_string();
                    let tip = format!("{count}/{total}");
                    let class = if count > 0 { "cell filled" } else { "cell" };
                    view! {
                        <td class=class data-slot=key title=tip>
                            <span style=style>{count}</span>
                        </td>
                    }
                    .to_html()
                })
                .collect();
            let label = hour_label(hour);
            let row_html = view! { <th class="time">{label}</th> }.to_html() + &cells_html;
            view! { <tr inner_html=row_html /> }.to_html()
        })
        .collect();

    view! {
        <table class="heatmap">
            <thead>
                <tr inner_html=header_html />
            </thead>
            <tbody inner_html=rows_html />
        </table>
    }
    .to_html()
}

fn render_best_times(best: &[RankedSlot]) -> String {
    if best.is_empty() {
        return view! { <p class="empty">"Nobody has marked any times yet."</p> }.to_html();
    }

    let items_html: String = best
        .iter()
        .map(|r| {
            let when = format!("{} {}", r.slot.date.format("%a %b %-d"), hour_label(r.slot.hour));
            let ratio = format!("{}/{}", r.count, r.total);
            let names = r.participants.join(", ");
            view! {
                <li>
                    <strong>{when}</strong>
                    " "
                    <span class="count">{ratio}</span>
                    <div class="names">{names}</div>
                </li>
            }
            .to_html()
        })
        .collect();

    view! { <ol class="best-times" inner_html=items_html /> }.to_html()
}

fn render_participants(participants: &[Participant]) -> String {
    if participants.is_empty() {
        return view! { <p class="empty">"No responses yet."</p> }.to_html();
    }

    let rows_html: String = participants
        .iter()
        .map(|p| {
            let name = p.name.clone();
            let slots = p.availability.len();
            let lock = if p.locked { "locked" } else { "" };
            view! {
                <tr>
                    <td>{name}</td>
                    <td>{slots}</td>
                    <td class="lock">{lock}</td>
                </tr>
            }
            .to_html()
        })
        .collect();

    view! {
        <table>
            <thead>
                <tr><th>"Name"</th><th>"Hours"</th><th></th></tr>
            </thead>
            <tbody inner_html=rows_html />
        </table>
    }
    .to_html()
}
