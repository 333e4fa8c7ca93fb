//! The availability grid as one interactive surface.
//!
//! [`GridSession`] owns the gesture classifier, the selection engine and
//! the grid geometry. The host feeds it pointer events, timer callbacks
//! and animation frames and gets back [`HostCommand`]s to carry out
//! (arm a timer, scroll, vibrate, repaint).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tracing::debug;

use crate::aggregate::Heatmap;
use crate::gesture::{
    Effect, GestureClassifier, GestureConfig, HitTest, Point, PointerInput, PointerPhase,
    ScrollDirection, TimerToken,
};
use crate::models::{Event, Participant};
use crate::selection::SelectionEngine;
use crate::slot::TimeSlot;

/// Geometry of the rendered grid.
///
/// Columns scroll horizontally under a sticky time column; the header row
/// sits above the hour rows. All inputs are client coordinates.
#[derive(Debug, Clone)]
pub struct GridLayout {
    dates: Vec<NaiveDate>,
    hours: Vec<u8>,
    pub time_column_width: f32,
    pub header_height: f32,
    pub cell_width: f32,
    pub cell_height: f32,
    /// Client-space origin of the scroll container.
    pub origin: Point,
    pub viewport_width: f32,
    scroll_x: f32,
}

impl GridLayout {
    pub fn new(dates: Vec<NaiveDate>, hours: Vec<u8>) -> Self {
        Self {
            dates,
            hours,
            time_column_width: 60.0,
            header_height: 40.0,
            cell_width: 64.0,
            cell_height: 32.0,
            origin: Point::default(),
            viewport_width: 360.0,
            scroll_x: 0.0,
        }
    }

    pub fn for_event(event: &Event) -> Self {
        Self::new(event.candidate_dates(), event.hours())
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn hours(&self) -> &[u8] {
        &self.hours
    }

    pub fn scroll_x(&self) -> f32 {
        self.scroll_x
    }

    pub fn content_width(&self) -> f32 {
        self.time_column_width + self.cell_width * self.dates.len() as f32
    }

    pub fn max_scroll(&self) -> f32 {
        (self.content_width() - self.viewport_width).max(0.0)
    }

    /// Scroll by `dx`, clamped to the content. Returns the distance moved.
    pub fn scroll_by(&mut self, dx: f32) -> f32 {
        let before = self.scroll_x;
        self.scroll_x = (self.scroll_x + dx).clamp(0.0, self.max_scroll());
        self.scroll_x - before
    }

    pub fn set_scroll(&mut self, x: f32) {
        self.scroll_x = x.clamp(0.0, self.max_scroll());
    }
}

impl HitTest for GridLayout {
    fn hit_test(&self, point: Point) -> Option<TimeSlot> {
        let vx = point.x - self.origin.x;
        let vy = point.y - self.origin.y;
        if vx < self.time_column_width || vx >= self.viewport_width {
            return None;
        }
        let cx = vx - self.time_column_width + self.scroll_x;
        let cy = vy - self.header_height;
        if cx < 0.0 || cy < 0.0 {
            return None;
        }
        let col = (cx / self.cell_width) as usize;
        let row = (cy / self.cell_height) as usize;
        let date = *self.dates.get(col)?;
        let hour = *self.hours.get(row)?;
        Some(TimeSlot::new(date, hour))
    }

    fn edge_zone(&self, point: Point, margin: f32) -> Option<ScrollDirection> {
        let vx = point.x - self.origin.x;
        if vx < margin {
            Some(ScrollDirection::Left)
        } else if vx > self.viewport_width - margin {
            Some(ScrollDirection::Right)
        } else {
            None
        }
    }
}

/// Shared flag the host consults before letting the page scroll.
#[derive(Debug, Clone, Default)]
pub struct ScrollLatch(Arc<AtomicBool>);

impl ScrollLatch {
    pub fn is_locked(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn acquire(&self) -> ScrollLock {
        self.0.store(true, Ordering::Release);
        ScrollLock {
            latch: self.clone(),
        }
    }
}

/// Holds page scrolling off while alive.
#[derive(Debug)]
pub struct ScrollLock {
    latch: ScrollLatch,
}

impl Drop for ScrollLock {
    fn drop(&mut self) {
        self.latch.0.store(false, Ordering::Release);
    }
}

/// What the host must do in response to a session call.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    ArmLongPress { token: TimerToken, delay: Duration },
    CancelLongPress(TimerToken),
    StartAutoScroll { interval: Duration },
    StopAutoScroll,
    RequestAnimationFrame,
    /// New horizontal scroll offset of the container.
    ScrollTo(f32),
    Vibrate(Duration),
    /// Visual cue at a point relative to the container.
    ShowPing { at: Point, duration: Duration },
    Focus(TimeSlot),
    SelectionChanged,
}

/// How one cell should be drawn.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CellView {
    pub selected: bool,
    pub preview_add: bool,
    pub preview_remove: bool,
    /// Share of participants available, 0.0 ..= 1.0.
    pub intensity: f32,
    /// Selected here and also picked by someone else.
    pub overlap: bool,
}

pub struct GridSession {
    layout: GridLayout,
    classifier: GestureClassifier,
    selection: SelectionEngine,
    heatmap: Heatmap,
    latch: ScrollLatch,
    scroll_lock: Option<ScrollLock>,
    focus: Option<TimeSlot>,
    read_only: bool,
}

impl GridSession {
    pub fn new(layout: GridLayout, config: GestureConfig) -> Self {
        let preview = config.preview_before_commit;
        Self {
            layout,
            classifier: GestureClassifier::new(config),
            selection: SelectionEngine::new(preview),
            heatmap: Heatmap::default(),
            latch: ScrollLatch::default(),
            scroll_lock: None,
            focus: None,
            read_only: false,
        }
    }

    /// A grid that only shows the heatmap; pointer input just moves focus.
    pub fn read_only(layout: GridLayout, config: GestureConfig) -> Self {
        let mut session = Self::new(layout, config);
        session.read_only = true;
        session
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn layout_mut(&mut self) -> &mut GridLayout {
        &mut self.layout
    }

    pub fn selection(&self) -> &[TimeSlot] {
        self.selection.slots()
    }

    pub fn focus(&self) -> Option<TimeSlot> {
        self.focus
    }

    pub fn scroll_latch(&self) -> ScrollLatch {
        self.latch.clone()
    }

    pub fn is_dragging(&self) -> bool {
        self.selection.is_gesture_active()
    }

    pub fn pointer(&mut self, input: &PointerInput) -> Vec<HostCommand> {
        if self.read_only {
            if input.phase == PointerPhase::Up {
                if let Some(slot) = self.layout.hit_test(input.position) {
                    self.focus = Some(slot);
                    return vec![HostCommand::Focus(slot)];
                }
            }
            return Vec::new();
        }
        let effects = self.classifier.handle(input, &self.layout);
        self.dispatch(effects)
    }

    pub fn long_press_elapsed(&mut self, token: TimerToken, at: Instant) -> Vec<HostCommand> {
        let effects = self.classifier.long_press_elapsed(token, at);
        self.dispatch(effects)
    }

    pub fn auto_scroll_tick(&mut self) -> Vec<HostCommand> {
        let effects = self.classifier.auto_scroll_tick();
        self.dispatch(effects)
    }

    pub fn animation_frame(&mut self) -> Vec<HostCommand> {
        if self.selection.on_animation_frame() {
            vec![HostCommand::SelectionChanged]
        } else {
            Vec::new()
        }
    }

    pub fn toggle_column(&mut self, date: NaiveDate) -> Vec<HostCommand> {
        if self.bulk_blocked() {
            return Vec::new();
        }
        let hours = self.layout.hours.clone();
        self.selection.toggle_column(date, &hours);
        Self::changed(!hours.is_empty())
    }

    pub fn toggle_row(&mut self, hour: u8) -> Vec<HostCommand> {
        if self.bulk_blocked() {
            return Vec::new();
        }
        let dates = self.layout.dates.clone();
        self.selection.toggle_row(hour, &dates);
        Self::changed(!dates.is_empty())
    }

    pub fn toggle_all(&mut self) -> Vec<HostCommand> {
        if self.bulk_blocked() {
            return Vec::new();
        }
        let (dates, hours) = (self.layout.dates.clone(), self.layout.hours.clone());
        self.selection.toggle_all(&dates, &hours);
        Self::changed(!dates.is_empty() && !hours.is_empty())
    }

    /// Fold in a fresh participant list. The draft and any drag in
    /// progress are left alone.
    pub fn apply_remote(&mut self, participants: &[Participant]) {
        self.heatmap = Heatmap::from_participants(participants);
    }

    /// Replace the draft, e.g. after a successful submission or when a
    /// returning participant loads their saved row.
    pub fn reset_draft(&mut self, slots: Vec<TimeSlot>) -> Vec<HostCommand> {
        self.selection.rebase(slots);
        vec![HostCommand::SelectionChanged]
    }

    pub fn cell_view(&self, slot: &TimeSlot) -> CellView {
        let base = self.selection.is_selected(slot);
        let selected = self.selection.is_selected_render(slot);
        let previewing = self.selection.is_preview() && self.selection.is_gesture_active();
        let key = slot.key();
        let intensity = self.heatmap.intensity(slot);
        CellView {
            selected,
            preview_add: previewing && !base && self.selection.pending().adds(&key),
            preview_remove: previewing && base && self.selection.pending().removes(&key),
            intensity,
            overlap: selected && intensity > 0.0,
        }
    }

    /// Drop any gesture in progress. Also runs on drop.
    pub fn teardown(&mut self) -> Vec<HostCommand> {
        let effects = self.classifier.teardown();
        let mut commands = self.dispatch(effects);
        self.scroll_lock = None;
        commands.retain(|c| *c != HostCommand::RequestAnimationFrame);
        commands
    }

    fn bulk_blocked(&self) -> bool {
        self.read_only || self.selection.is_gesture_active()
    }

    fn changed(changed: bool) -> Vec<HostCommand> {
        if changed {
            vec![HostCommand::SelectionChanged]
        } else {
            Vec::new()
        }
    }

    fn dispatch(&mut self, effects: Vec<Effect>) -> Vec<HostCommand> {
        let mut commands = Vec::new();
        let mut changed = false;
        for effect in effects {
            match effect {
                Effect::Toggle(slot) => {
                    self.selection.toggle(slot);
                    changed = true;
                }
                Effect::BeginGesture(slot) => {
                    if self.selection.begin_gesture(slot) {
                        commands.push(HostCommand::RequestAnimationFrame);
                    }
                }
                Effect::ApplyToCell(slot) => {
                    if self.selection.apply_to_cell(slot) {
                        commands.push(HostCommand::RequestAnimationFrame);
                    }
                }
                Effect::EndGesture => changed |= self.selection.end_gesture(),
                Effect::AbortGesture(reason) => {
                    debug!("Grid: drag aborted ({:?})", reason);
                    self.selection.abort_gesture();
                    changed = true;
                }
                Effect::Focus(slot) => {
                    self.focus = Some(slot);
                    commands.push(HostCommand::Focus(slot));
                }
                Effect::ArmLongPress { token, delay } => {
                    commands.push(HostCommand::ArmLongPress { token, delay })
                }
                Effect::CancelLongPress(token) => commands.push(HostCommand::CancelLongPress(token)),
                Effect::LockScroll => self.scroll_lock = Some(self.latch.acquire()),
                Effect::ReleaseScroll => self.scroll_lock = None,
                Effect::StartAutoScroll { interval, .. } => {
                    commands.push(HostCommand::StartAutoScroll { interval })
                }
                Effect::StopAutoScroll => commands.push(HostCommand::StopAutoScroll),
                Effect::ScrollBy(dx) => {
                    if self.layout.scroll_by(dx) != 0.0 {
                        commands.push(HostCommand::ScrollTo(self.layout.scroll_x));
                    }
                }
                Effect::Resample(point) => {
                    if let Some(slot) = self.layout.hit_test(point) {
                        if self.selection.apply_to_cell(slot) {
                            commands.push(HostCommand::RequestAnimationFrame);
                        }
                    }
                }
                Effect::Haptic(pulse) => commands.push(HostCommand::Vibrate(pulse)),
                Effect::Ping { at, duration } => commands.push(HostCommand::ShowPing {
                    at: Point::new(at.x - self.layout.origin.x, at.y - self.layout.origin.y),
                    duration,
                }),
            }
        }
        if changed {
            commands.push(HostCommand::SelectionChanged);
        }
        commands
    }
}

impl Drop for GridSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::{PointerKind, TouchActivation};
    use crate::models::EventId;
    use chrono::Utc;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, n).unwrap()
    }

    /// 7 days x hours 9..=12. Cells are 64x32 after a 60px time column and
    /// 40px header; the viewport shows 300px.
    fn layout() -> GridLayout {
        GridLayout::new((1..=7).map(day).collect(), vec![9, 10, 11, 12])
    }

    /// Client point at the centre of a cell while scroll_x == 0.
    fn centre(col: usize, row: usize) -> Point {
        Point::new(60.0 + 64.0 * col as f32 + 32.0, 40.0 + 32.0 * row as f32 + 16.0)
    }

    fn ptr(kind: PointerKind, phase: PointerPhase, p: Point, at: Instant) -> PointerInput {
        PointerInput {
            pointer_id: 7,
            kind,
            phase,
            position: p,
            at,
        }
    }

    fn frame_then_commit(session: &mut GridSession, cmds: &[HostCommand]) {
        if cmds.contains(&HostCommand::RequestAnimationFrame) {
            session.animation_frame();
        }
    }

    #[test]
    fn test_hit_test_respects_sticky_column_and_scroll() {
        let mut l = layout();
        l.viewport_width = 300.0;
        assert_eq!(l.hit_test(Point::new(30.0, 60.0)), None);
        assert_eq!(l.hit_test(Point::new(70.0, 20.0)), None);
        assert_eq!(l.hit_test(centre(0, 0)), Some(TimeSlot::new(day(1), 9)));
        l.scroll_by(64.0);
        assert_eq!(l.hit_test(centre(0, 1)), Some(TimeSlot::new(day(2), 10)));
        assert_eq!(l.hit_test(Point::new(100.0, 40.0 + 32.0 * 4.0 + 1.0)), None);
    }

    #[test]
    fn test_scroll_is_clamped() {
        let mut l = layout();
        l.viewport_width = 300.0;
        assert_eq!(l.max_scroll(), 60.0 + 64.0 * 7.0 - 300.0);
        assert_eq!(l.scroll_by(-10.0), 0.0);
        l.scroll_by(10_000.0);
        assert_eq!(l.scroll_x(), l.max_scroll());
    }

    #[test]
    fn test_mouse_drag_paints_and_commits() {
        let mut s = GridSession::new(layout(), GestureConfig::default());
        let t0 = Instant::now();

        let cmds = s.pointer(&ptr(PointerKind::Mouse, PointerPhase::Down, centre(0, 0), t0));
        assert!(cmds.contains(&HostCommand::RequestAnimationFrame));
        assert_eq!(s.focus(), Some(TimeSlot::new(day(1), 9)));
        frame_then_commit(&mut s, &cmds);

        let cmds = s.pointer(&ptr(PointerKind::Mouse, PointerPhase::Move, centre(1, 0), t0));
        frame_then_commit(&mut s, &cmds);
        s.pointer(&ptr(PointerKind::Mouse, PointerPhase::Move, centre(2, 0), t0));

        let cmds = s.pointer(&ptr(PointerKind::Mouse, PointerPhase::Up, centre(2, 0), t0));
        assert!(cmds.contains(&HostCommand::SelectionChanged));
        assert_eq!(
            s.selection(),
            &[
                TimeSlot::new(day(1), 9),
                TimeSlot::new(day(2), 9),
                TimeSlot::new(day(3), 9)
            ]
        );
        assert!(!s.is_dragging());
    }

    #[test]
    fn test_touch_long_press_holds_scroll_lock_until_release() {
        let mut s = GridSession::new(layout(), GestureConfig::default());
        let latch = s.scroll_latch();
        let t0 = Instant::now();

        let cmds = s.pointer(&ptr(PointerKind::Touch, PointerPhase::Down, centre(1, 1), t0));
        let token = cmds
            .iter()
            .find_map(|c| match c {
                HostCommand::ArmLongPress { token, .. } => Some(*token),
                _ => None,
            })
            .unwrap();
        assert!(!latch.is_locked());

        let t1 = t0 + Duration::from_millis(250);
        let cmds = s.long_press_elapsed(token, t1);
        assert!(latch.is_locked());
        assert!(cmds.iter().any(|c| matches!(c, HostCommand::Vibrate(_))));
        assert!(cmds.iter().any(|c| matches!(c, HostCommand::ShowPing { .. })));

        s.pointer(&ptr(PointerKind::Touch, PointerPhase::Up, centre(1, 1), t1));
        assert!(!latch.is_locked());
        assert_eq!(s.selection(), &[TimeSlot::new(day(2), 10)]);
    }

    #[test]
    fn test_jump_after_activation_restores_selection() {
        let mut s = GridSession::new(layout(), GestureConfig::default());
        let latch = s.scroll_latch();
        s.reset_draft(vec![TimeSlot::new(day(5), 12)]);
        let t0 = Instant::now();

        let cmds = s.pointer(&ptr(PointerKind::Touch, PointerPhase::Down, centre(0, 0), t0));
        let token = cmds
            .iter()
            .find_map(|c| match c {
                HostCommand::ArmLongPress { token, .. } => Some(*token),
                _ => None,
            })
            .unwrap();
        let t1 = t0 + Duration::from_millis(250);
        let cmds = s.long_press_elapsed(token, t1);
        frame_then_commit(&mut s, &cmds);

        let far = Point::new(centre(0, 0).x + 64.0, centre(0, 0).y);
        let cmds = s.pointer(&ptr(
            PointerKind::Touch,
            PointerPhase::Move,
            far,
            t1 + Duration::from_millis(30),
        ));
        assert!(cmds.contains(&HostCommand::SelectionChanged));
        assert!(!latch.is_locked());
        assert_eq!(s.selection(), &[TimeSlot::new(day(5), 12)]);
    }

    #[test]
    fn test_auto_scroll_moves_viewport_and_resamples() {
        let mut s = GridSession::new(layout(), GestureConfig::default());
        s.layout_mut().viewport_width = 300.0;
        let t0 = Instant::now();

        s.pointer(&ptr(PointerKind::Mouse, PointerPhase::Down, centre(2, 0), t0));
        let edge = Point::new(290.0, centre(0, 0).y);
        let cmds = s.pointer(&ptr(PointerKind::Mouse, PointerPhase::Move, edge, t0));
        assert!(cmds
            .iter()
            .any(|c| matches!(c, HostCommand::StartAutoScroll { .. })));

        let cmds = s.auto_scroll_tick();
        assert!(cmds
            .iter()
            .any(|c| matches!(c, HostCommand::ScrollTo(x) if *x > 0.0)));
        assert!(s.layout().scroll_x() > 0.0);

        let cmds = s.pointer(&ptr(PointerKind::Mouse, PointerPhase::Up, edge, t0));
        assert_eq!(cmds.first(), Some(&HostCommand::StopAutoScroll));
    }

    #[test]
    fn test_bulk_toggles_are_all_or_nothing() {
        let mut s = GridSession::new(layout(), GestureConfig::default());
        s.toggle_column(day(1));
        assert_eq!(s.selection().len(), 4);
        s.toggle_row(9);
        // column already had 9:00 on day 1; row fills the rest
        assert_eq!(s.selection().len(), 4 + 6);
        s.toggle_row(9);
        assert_eq!(s.selection().len(), 3);
        s.toggle_all();
        assert_eq!(s.selection().len(), 28);
        s.toggle_all();
        assert!(s.selection().is_empty());
    }

    #[test]
    fn test_cell_view_blends_heatmap_and_draft() {
        let mut s = GridSession::new(layout(), GestureConfig::default());
        let a = TimeSlot::new(day(1), 9);
        let b = TimeSlot::new(day(1), 10);
        let other = Participant {
            id: "p".into(),
            event_id: EventId::from("e"),
            name: "Bob".into(),
            email: None,
            availability: vec![a],
            locked: false,
            auth_token: None,
            created_at: Utc::now(),
        };
        s.apply_remote(std::slice::from_ref(&other));
        s.reset_draft(vec![a, b]);

        let va = s.cell_view(&a);
        assert!(va.selected && va.overlap);
        assert_eq!(va.intensity, 1.0);
        let vb = s.cell_view(&b);
        assert!(vb.selected && !vb.overlap);
    }

    #[test]
    fn test_preview_mode_reports_pending_cells() {
        let config = GestureConfig {
            preview_before_commit: true,
            ..GestureConfig::default()
        };
        let mut s = GridSession::new(layout(), config);
        let t0 = Instant::now();
        s.pointer(&ptr(PointerKind::Mouse, PointerPhase::Down, centre(0, 0), t0));
        s.pointer(&ptr(PointerKind::Mouse, PointerPhase::Move, centre(1, 0), t0));
        s.animation_frame();

        let view = s.cell_view(&TimeSlot::new(day(2), 9));
        assert!(view.preview_add);
        assert!(s.selection().is_empty());

        s.pointer(&ptr(PointerKind::Mouse, PointerPhase::Up, centre(1, 0), t0));
        assert_eq!(s.selection().len(), 2);
        assert!(!s.cell_view(&TimeSlot::new(day(2), 9)).preview_add);
    }

    #[test]
    fn test_read_only_only_focuses() {
        let mut s = GridSession::read_only(layout(), GestureConfig::default());
        let t0 = Instant::now();
        assert!(s
            .pointer(&ptr(PointerKind::Mouse, PointerPhase::Down, centre(0, 0), t0))
            .is_empty());
        let cmds = s.pointer(&ptr(PointerKind::Mouse, PointerPhase::Up, centre(0, 0), t0));
        assert_eq!(cmds, vec![HostCommand::Focus(TimeSlot::new(day(1), 9))]);
        assert!(s.toggle_all().is_empty());
        assert!(s.selection().is_empty());
    }

    #[test]
    fn test_drop_mid_drag_releases_scroll_lock() {
        let config = GestureConfig {
            touch_activation: TouchActivation::Immediate,
            ..GestureConfig::default()
        };
        let mut s = GridSession::new(layout(), config);
        let latch = s.scroll_latch();
        s.pointer(&ptr(PointerKind::Touch, PointerPhase::Down, centre(0, 0), Instant::now()));
        assert!(latch.is_locked());
        drop(s);
        assert!(!latch.is_locked());
    }
}
