//! Heatmap and best-times ranking over every participant's availability.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::models::Participant;
use crate::slot::{SlotKey, TimeSlot};

pub const BEST_TIMES_LIMIT: usize = 10;

/// Participants per slot, plus the total used to scale intensity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Heatmap {
    counts: HashMap<SlotKey, usize>,
    participants: usize,
}

impl Heatmap {
    pub fn from_participants(participants: &[Participant]) -> Self {
        let mut counts: HashMap<SlotKey, usize> = HashMap::new();
        for p in participants {
            let unique: HashSet<SlotKey> = p.availability.iter().map(TimeSlot::key).collect();
            for key in unique {
                *counts.entry(key).or_default() += 1;
            }
        }
        Self {
            counts,
            participants: participants.len(),
        }
    }

    pub fn count(&self, slot: &TimeSlot) -> usize {
        self.counts.get(&slot.key()).copied().unwrap_or(0)
    }

    /// 0.0 ..= 1.0, relative to the number of participants.
    pub fn intensity(&self, slot: &TimeSlot) -> f32 {
        if self.participants == 0 {
            return 0.0;
        }
        self.count(slot) as f32 / self.participants as f32
    }

    pub fn participants(&self) -> usize {
        self.participants
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn to_sorted(&self) -> BTreeMap<SlotKey, usize> {
        self.counts.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}

#[derive(Debug, Clone)]
pub struct SlotTally<'a> {
    pub slot: TimeSlot,
    pub count: usize,
    pub participants: Vec<&'a Participant>,
}

/// One entry per slot anyone selected, in first-encountered order
/// (participant order, then each participant's slot order).
pub fn tally(participants: &[Participant]) -> Vec<SlotTally<'_>> {
    let mut index: HashMap<SlotKey, usize> = HashMap::new();
    let mut out: Vec<SlotTally<'_>> = Vec::new();
    for p in participants {
        let mut seen: HashSet<SlotKey> = HashSet::new();
        for slot in &p.availability {
            let key = slot.key();
            if !seen.insert(key.clone()) {
                continue;
            }
            match index.get(&key) {
                Some(&i) => {
                    out[i].count += 1;
                    out[i].participants.push(p);
                }
                None => {
                    index.insert(key, out.len());
                    out.push(SlotTally {
                        slot: *slot,
                        count: 1,
                        participants: vec![p],
                    });
                }
            }
        }
    }
    out
}

/// Top `limit` slots by count. Ties keep first-encountered order.
pub fn best_times(participants: &[Participant], limit: usize) -> Vec<SlotTally<'_>> {
    let mut tallies = tally(participants);
    // sort_by is stable
    tallies.sort_by(|a, b| b.count.cmp(&a.count));
    tallies.truncate(limit);
    tallies
}

#[derive(Debug, Clone)]
pub struct SlotDetail<'a> {
    pub available: Vec<&'a Participant>,
    pub unavailable: Vec<&'a Participant>,
}

/// Split participants by whether they marked `slot`.
pub fn slot_detail<'a>(participants: &'a [Participant], slot: &TimeSlot) -> SlotDetail<'a> {
    let (available, unavailable) = participants.iter().partition(|p| p.is_available(slot));
    SlotDetail {
        available,
        unavailable,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedSlot {
    pub slot: TimeSlot,
    pub key: SlotKey,
    pub count: usize,
    pub total: usize,
    pub participants: Vec<String>,
}

/// Everything derived from the participant list that a page shows.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Summary {
    pub participant_count: usize,
    pub heatmap: BTreeMap<SlotKey, usize>,
    pub best_times: Vec<RankedSlot>,
}

impl Summary {
    pub fn from_participants(participants: &[Participant]) -> Self {
        let total = participants.len();
        let best_times = best_times(participants, BEST_TIMES_LIMIT)
            .into_iter()
            .map(|t| RankedSlot {
                slot: t.slot,
                key: t.slot.key(),
                count: t.count,
                total,
                participants: t.participants.iter().map(|p| p.name.clone()).collect(),
            })
            .collect();
        Self {
            participant_count: total,
            heatmap: Heatmap::from_participants(participants).to_sorted(),
            best_times,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventId;
    use chrono::{NaiveDate, Utc};

    fn slot(day: u32, hour: u8) -> TimeSlot {
        TimeSlot::new(NaiveDate::from_ymd_opt(2025, 6, day).unwrap(), hour)
    }

    fn person(name: &str, availability: Vec<TimeSlot>) -> Participant {
        Participant {
            id: name.to_lowercase(),
            event_id: EventId::from("e1"),
            name: name.into(),
            email: None,
            availability,
            locked: false,
            auth_token: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_best_times_ranks_by_count() {
        let a = slot(1, 9);
        let b = slot(1, 10);
        let people = vec![
            person("P1", vec![a]),
            person("P2", vec![a, b]),
            person("P3", vec![]),
        ];
        let ranked = best_times(&people, BEST_TIMES_LIMIT);
        assert_eq!(ranked.len(), 2);
        assert_eq!((ranked[0].slot, ranked[0].count), (a, 2));
        assert_eq!((ranked[1].slot, ranked[1].count), (b, 1));

        let detail = slot_detail(&people, &a);
        let names = |v: &[&Participant]| v.iter().map(|p| p.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(&detail.available), vec!["P1", "P2"]);
        assert_eq!(names(&detail.unavailable), vec!["P3"]);
    }

    #[test]
    fn test_ties_keep_first_encountered_order() {
        let people = vec![
            person("A", vec![slot(2, 9), slot(1, 9)]),
            person("B", vec![slot(3, 9)]),
        ];
        let ranked = best_times(&people, BEST_TIMES_LIMIT);
        let order: Vec<TimeSlot> = ranked.iter().map(|t| t.slot).collect();
        assert_eq!(order, vec![slot(2, 9), slot(1, 9), slot(3, 9)]);
    }

    #[test]
    fn test_best_times_truncates_to_limit() {
        let many: Vec<TimeSlot> = (0..15).map(|h| slot(1, h)).collect();
        let people = vec![person("A", many)];
        assert_eq!(best_times(&people, BEST_TIMES_LIMIT).len(), 10);
    }

    #[test]
    fn test_heatmap_counts_and_intensity() {
        let people = vec![
            person("A", vec![slot(1, 9), slot(1, 9)]),
            person("B", vec![slot(1, 9)]),
            person("C", vec![slot(2, 9)]),
            person("D", vec![]),
        ];
        let heat = Heatmap::from_participants(&people);
        assert_eq!(heat.count(&slot(1, 9)), 2);
        assert_eq!(heat.count(&slot(3, 9)), 0);
        assert!((heat.intensity(&slot(1, 9)) - 0.5).abs() < f32::EPSILON);
        assert_eq!(Heatmap::default().intensity(&slot(1, 9)), 0.0);
    }

    #[test]
    fn test_summary_empty() {
        let summary = Summary::from_participants(&[]);
        assert_eq!(summary.participant_count, 0);
        assert!(summary.best_times.is_empty());
        assert!(summary.heatmap.is_empty());
    }
}
