//! Candidate-date picker used when creating an event.

use chrono::{Datelike, Duration, NaiveDate};

const WINDOW_DAYS: usize = 35;

struct RangeDrag {
    start: usize,
    origin: Vec<NaiveDate>,
}

/// Five-week calendar window with click-to-toggle and drag-to-select-range.
pub struct DateRangePicker {
    today: NaiveDate,
    window_start: NaiveDate,
    selected: Vec<NaiveDate>,
    drag: Option<RangeDrag>,
    dragged: bool,
}

/// Sunday on or before `day`.
fn week_start(day: NaiveDate) -> NaiveDate {
    day - Duration::days(day.weekday().num_days_from_sunday() as i64)
}

impl DateRangePicker {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today,
            window_start: week_start(today),
            selected: Vec::new(),
            drag: None,
            dragged: false,
        }
    }

    pub fn with_selection(today: NaiveDate, mut dates: Vec<NaiveDate>) -> Self {
        dates.sort();
        dates.dedup();
        Self {
            selected: dates,
            ..Self::new(today)
        }
    }

    pub fn selected(&self) -> &[NaiveDate] {
        &self.selected
    }

    pub fn window_start(&self) -> NaiveDate {
        self.window_start
    }

    pub fn window(&self) -> Vec<NaiveDate> {
        (0..WINDOW_DAYS)
            .map(|i| self.window_start + Duration::days(i as i64))
            .collect()
    }

    /// e.g. "Jun 1 - Jul 5, 2025"
    pub fn label(&self) -> String {
        let end = self.window_start + Duration::days(WINDOW_DAYS as i64 - 1);
        format!(
            "{} - {}",
            self.window_start.format("%b %-d"),
            end.format("%b %-d, %Y")
        )
    }

    pub fn is_past(&self, date: NaiveDate) -> bool {
        date < self.today
    }

    pub fn is_selected(&self, date: NaiveDate) -> bool {
        self.selected.binary_search(&date).is_ok()
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    pub fn previous_week(&mut self) {
        self.window_start -= Duration::days(7);
    }

    pub fn next_week(&mut self) {
        self.window_start += Duration::days(7);
    }

    fn date_at(&self, index: usize) -> Option<NaiveDate> {
        (index < WINDOW_DAYS).then(|| self.window_start + Duration::days(index as i64))
    }

    /// Pointer down on window cell `index`. Past dates do not start a drag.
    pub fn press(&mut self, index: usize) -> bool {
        match self.date_at(index) {
            Some(date) if !self.is_past(date) => {
                self.drag = Some(RangeDrag {
                    start: index,
                    origin: self.selected.clone(),
                });
                self.dragged = false;
                true
            }
            _ => false,
        }
    }

    /// Pointer entered cell `index` during a drag: select the origin plus
    /// every non-past day between the press and here.
    pub fn enter(&mut self, index: usize) {
        let Some(drag) = &self.drag else {
            return;
        };
        if index >= WINDOW_DAYS {
            return;
        }
        let (lo, hi) = (drag.start.min(index), drag.start.max(index));
        let mut next = drag.origin.clone();
        next.extend(
            (lo..=hi)
                .filter_map(|i| self.date_at(i))
                .filter(|d| !self.is_past(*d)),
        );
        next.sort();
        next.dedup();
        self.selected = next;
        self.dragged = true;
    }

    pub fn release(&mut self) {
        self.drag = None;
    }

    /// Click on cell `index`. Ignored right after a drag and on past dates.
    pub fn click(&mut self, index: usize) {
        if std::mem::take(&mut self.dragged) {
            return;
        }
        let Some(date) = self.date_at(index) else {
            return;
        };
        if self.is_past(date) {
            return;
        }
        match self.selected.binary_search(&date) {
            Ok(pos) => {
                self.selected.remove(pos);
            }
            Err(pos) => self.selected.insert(pos, date),
        }
    }

    pub fn remove(&mut self, date: NaiveDate) {
        self.selected.retain(|d| *d != date);
    }

    pub fn clear_all(&mut self) {
        self.selected.clear();
    }
}
