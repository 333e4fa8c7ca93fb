//! Pointer gesture classification for the availability grid.
//!
//! [`GestureClassifier`] turns a raw pointer stream into taps and
//! drag-paints. It never touches the selection or the viewport itself:
//! every transition returns a list of [`Effect`]s that the owning
//! session applies. Timers are requested through effects too and come
//! back as [`GestureClassifier::long_press_elapsed`] and
//! [`GestureClassifier::auto_scroll_tick`] calls.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::slot::TimeSlot;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Mouse,
    Touch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerPhase {
    Down,
    Move,
    Up,
    Cancel,
}

#[derive(Debug, Clone, Copy)]
pub struct PointerInput {
    pub pointer_id: u32,
    pub kind: PointerKind,
    pub phase: PointerPhase,
    /// Client coordinates.
    pub position: Point,
    pub at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Left,
    Right,
}

impl ScrollDirection {
    fn sign(self) -> f32 {
        match self {
            ScrollDirection::Left => -1.0,
            ScrollDirection::Right => 1.0,
        }
    }
}

/// Grid geometry as seen by the classifier.
pub trait HitTest {
    /// The cell under a client-space point, if any.
    fn hit_test(&self, point: Point) -> Option<TimeSlot>;

    /// Which horizontal viewport edge `point` is within `margin` of.
    fn edge_zone(&self, point: Point, margin: f32) -> Option<ScrollDirection>;
}

/// How a touch turns into a drag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchActivation {
    /// Drag starts on touch down, like a mouse.
    Immediate,
    /// Only the long-press timer starts a drag. Moving past the threshold
    /// gives up the gesture regardless of direction.
    LongPress,
    /// Long press starts a drag; a mostly horizontal swipe is treated as
    /// scrolling and gives up the gesture.
    #[default]
    LongPressOrScroll,
    /// Long press or moving past the threshold starts a drag, the latter
    /// at the cell under the finger.
    LongPressOrMove,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    pub touch_activation: TouchActivation,
    pub long_press_delay_ms: u64,
    pub move_threshold_px: f32,
    pub horizontal_cancel_px: f32,
    pub edge_margin_px: f32,
    pub auto_scroll_step_px: f32,
    pub auto_scroll_interval_ms: u64,
    pub jump_abort_px: f32,
    pub jump_window_ms: u64,
    pub mouse_suppress_ms: u64,
    pub preview_before_commit: bool,
    pub haptic_pulse_ms: u64,
    pub ping_duration_ms: u64,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            touch_activation: TouchActivation::default(),
            long_press_delay_ms: 250,
            move_threshold_px: 5.0,
            horizontal_cancel_px: 12.0,
            edge_margin_px: 50.0,
            auto_scroll_step_px: 12.0,
            auto_scroll_interval_ms: 16,
            jump_abort_px: 20.0,
            jump_window_ms: 100,
            mouse_suppress_ms: 500,
            preview_before_commit: false,
            haptic_pulse_ms: 10,
            ping_duration_ms: 600,
        }
    }
}

impl GestureConfig {
    /// Long-press delay, clamped to 200..=300 ms.
    pub fn long_press_delay(&self) -> Duration {
        Duration::from_millis(self.long_press_delay_ms.clamp(200, 300))
    }

    pub fn auto_scroll_interval(&self) -> Duration {
        Duration::from_millis(self.auto_scroll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The platform's native scroll won the race for the touch.
    GestureLockFailure,
    /// The surface was torn down mid-gesture.
    Teardown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Toggle(TimeSlot),
    BeginGesture(TimeSlot),
    ApplyToCell(TimeSlot),
    /// Gesture finished normally; flush the pending delta.
    EndGesture,
    /// Gesture dropped; discard the pending delta.
    AbortGesture(AbortReason),
    Focus(TimeSlot),
    ArmLongPress { token: TimerToken, delay: Duration },
    CancelLongPress(TimerToken),
    LockScroll,
    ReleaseScroll,
    StartAutoScroll { direction: ScrollDirection, interval: Duration },
    StopAutoScroll,
    ScrollBy(f32),
    /// Re-resolve the cell under a stationary pointer after the content moved.
    Resample(Point),
    Haptic(Duration),
    Ping { at: Point, duration: Duration },
}

/// Coarse state, one per grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureState {
    Idle,
    Pending,
    Active,
}

#[derive(Debug, Clone)]
struct PendingPress {
    pointer_id: u32,
    anchor_point: Point,
    anchor_cell: TimeSlot,
    last_point: Point,
    timer: TimerToken,
}

#[derive(Debug, Clone)]
struct ActiveDrag {
    pointer_id: u32,
    kind: PointerKind,
    activated_at: Instant,
    last_point: Point,
    auto_scroll: Option<ScrollDirection>,
    scroll_locked: bool,
}

#[derive(Debug, Clone)]
enum Phase {
    Idle,
    Pending(PendingPress),
    Active(ActiveDrag),
}

#[derive(Debug, Clone)]
pub struct GestureClassifier {
    config: GestureConfig,
    phase: Phase,
    next_token: u64,
    suppress_mouse_until: Option<Instant>,
}

impl GestureClassifier {
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            next_token: 0,
            suppress_mouse_until: None,
        }
    }

    pub fn config(&self) -> &GestureConfig {
        &self.config
    }

    pub fn state(&self) -> GestureState {
        match self.phase {
            Phase::Idle => GestureState::Idle,
            Phase::Pending(_) => GestureState::Pending,
            Phase::Active(_) => GestureState::Active,
        }
    }

    pub fn is_auto_scrolling(&self) -> bool {
        matches!(&self.phase, Phase::Active(d) if d.auto_scroll.is_some())
    }

    pub fn handle(&mut self, input: &PointerInput, grid: &impl HitTest) -> Vec<Effect> {
        if input.kind == PointerKind::Mouse && self.mouse_suppressed(input.at) {
            debug!("Gesture: ignoring compatibility mouse event after touch");
            return Vec::new();
        }

        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => self.on_idle(input, grid),
            Phase::Pending(press) => self.on_pending(press, input, grid),
            Phase::Active(drag) => self.on_active(drag, input, grid),
        }
    }

    /// The long-press timer fired. Stale tokens are ignored.
    pub fn long_press_elapsed(&mut self, token: TimerToken, at: Instant) -> Vec<Effect> {
        let press = match &self.phase {
            Phase::Pending(press) if press.timer == token => press.clone(),
            _ => return Vec::new(),
        };
        let mut effects = vec![
            Effect::Haptic(Duration::from_millis(self.config.haptic_pulse_ms)),
            Effect::Ping {
                at: press.anchor_point,
                duration: Duration::from_millis(self.config.ping_duration_ms),
            },
        ];
        self.activate(
            press.pointer_id,
            PointerKind::Touch,
            press.anchor_cell,
            press.last_point,
            at,
            &mut effects,
        );
        effects
    }

    /// The auto-scroll interval fired.
    pub fn auto_scroll_tick(&mut self) -> Vec<Effect> {
        match &self.phase {
            Phase::Active(drag) => match drag.auto_scroll {
                Some(direction) => vec![
                    Effect::ScrollBy(direction.sign() * self.config.auto_scroll_step_px),
                    Effect::Resample(drag.last_point),
                ],
                None => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// Drop any gesture in progress and release what it holds.
    pub fn teardown(&mut self) -> Vec<Effect> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => Vec::new(),
            Phase::Pending(press) => vec![Effect::CancelLongPress(press.timer)],
            Phase::Active(drag) => Self::release(drag, Effect::AbortGesture(AbortReason::Teardown)),
        }
    }

    fn mouse_suppressed(&self, at: Instant) -> bool {
        self.suppress_mouse_until.is_some_and(|until| at < until)
    }

    fn arm_mouse_suppression(&mut self, at: Instant) {
        self.suppress_mouse_until = Some(at + Duration::from_millis(self.config.mouse_suppress_ms));
    }

    fn on_idle(&mut self, input: &PointerInput, grid: &impl HitTest) -> Vec<Effect> {
        match input.phase {
            PointerPhase::Down => {}
            PointerPhase::Up | PointerPhase::Cancel => {
                // a touch we gave up on (scroll intent, aborted drag) still
                // produces compatibility mouse events on release
                if input.kind == PointerKind::Touch {
                    self.arm_mouse_suppression(input.at);
                }
                return Vec::new();
            }
            PointerPhase::Move => return Vec::new(),
        }

        let Some(cell) = grid.hit_test(input.position) else {
            return Vec::new();
        };

        let mut effects = Vec::new();
        let immediate = input.kind == PointerKind::Mouse
            || self.config.touch_activation == TouchActivation::Immediate;
        if immediate {
            self.activate(
                input.pointer_id,
                input.kind,
                cell,
                input.position,
                input.at,
                &mut effects,
            );
        } else {
            let timer = self.next_timer();
            effects.push(Effect::ArmLongPress {
                token: timer,
                delay: self.config.long_press_delay(),
            });
            self.phase = Phase::Pending(PendingPress {
                pointer_id: input.pointer_id,
                anchor_point: input.position,
                anchor_cell: cell,
                last_point: input.position,
                timer,
            });
        }
        effects
    }

    fn on_pending(
        &mut self,
        mut press: PendingPress,
        input: &PointerInput,
        grid: &impl HitTest,
    ) -> Vec<Effect> {
        if input.pointer_id != press.pointer_id {
            self.phase = Phase::Pending(press);
            return Vec::new();
        }

        match input.phase {
            PointerPhase::Down => {
                self.phase = Phase::Pending(press);
                Vec::new()
            }
            PointerPhase::Move => {
                press.last_point = input.position;
                let dx = input.position.x - press.anchor_point.x;
                let dy = input.position.y - press.anchor_point.y;
                let moved = input.position.distance(press.anchor_point);
                let threshold = self.config.move_threshold_px;
                let horizontal_cancel = self.config.horizontal_cancel_px;

                match self.config.touch_activation {
                    TouchActivation::LongPressOrMove if moved > threshold => {
                        match grid.hit_test(input.position) {
                            Some(cell) => {
                                let mut effects = vec![Effect::CancelLongPress(press.timer)];
                                self.activate(
                                    press.pointer_id,
                                    PointerKind::Touch,
                                    cell,
                                    input.position,
                                    input.at,
                                    &mut effects,
                                );
                                effects
                            }
                            None => {
                                self.phase = Phase::Pending(press);
                                Vec::new()
                            }
                        }
                    }
                    TouchActivation::LongPress if moved > threshold => {
                        debug!("Gesture: movement threshold exceeded, releasing touch");
                        vec![Effect::CancelLongPress(press.timer)]
                    }
                    TouchActivation::LongPressOrScroll
                        if dx.abs() > horizontal_cancel && dx.abs() > dy.abs() =>
                    {
                        debug!("Gesture: horizontal swipe, treating as scroll");
                        vec![Effect::CancelLongPress(press.timer)]
                    }
                    _ => {
                        self.phase = Phase::Pending(press);
                        Vec::new()
                    }
                }
            }
            PointerPhase::Up => {
                self.arm_mouse_suppression(input.at);
                vec![
                    Effect::CancelLongPress(press.timer),
                    Effect::Toggle(press.anchor_cell),
                    Effect::Focus(press.anchor_cell),
                ]
            }
            PointerPhase::Cancel => {
                self.arm_mouse_suppression(input.at);
                vec![Effect::CancelLongPress(press.timer)]
            }
        }
    }

    fn on_active(
        &mut self,
        mut drag: ActiveDrag,
        input: &PointerInput,
        grid: &impl HitTest,
    ) -> Vec<Effect> {
        if input.pointer_id != drag.pointer_id || input.kind != drag.kind {
            self.phase = Phase::Active(drag);
            return Vec::new();
        }

        match input.phase {
            PointerPhase::Down => {
                self.phase = Phase::Active(drag);
                Vec::new()
            }
            PointerPhase::Move => {
                let jump = input.position.distance(drag.last_point);
                let since_activation = input.at.saturating_duration_since(drag.activated_at);
                if drag.kind == PointerKind::Touch
                    && since_activation < Duration::from_millis(self.config.jump_window_ms)
                    && jump > self.config.jump_abort_px
                {
                    debug!(
                        "Gesture: {:.0}px jump {}ms after activation, yielding to native scroll",
                        jump,
                        since_activation.as_millis()
                    );
                    return Self::release(
                        drag,
                        Effect::AbortGesture(AbortReason::GestureLockFailure),
                    );
                }

                drag.last_point = input.position;
                let mut effects = Vec::new();
                if let Some(cell) = grid.hit_test(input.position) {
                    effects.push(Effect::ApplyToCell(cell));
                }
                let zone = grid.edge_zone(input.position, self.config.edge_margin_px);
                if zone != drag.auto_scroll {
                    if drag.auto_scroll.is_some() {
                        effects.push(Effect::StopAutoScroll);
                    }
                    if let Some(direction) = zone {
                        effects.push(Effect::StartAutoScroll {
                            direction,
                            interval: self.config.auto_scroll_interval(),
                        });
                    }
                    drag.auto_scroll = zone;
                }
                self.phase = Phase::Active(drag);
                effects
            }
            PointerPhase::Up | PointerPhase::Cancel => {
                if drag.kind == PointerKind::Touch {
                    self.arm_mouse_suppression(input.at);
                }
                Self::release(drag, Effect::EndGesture)
            }
        }
    }

    fn activate(
        &mut self,
        pointer_id: u32,
        kind: PointerKind,
        cell: TimeSlot,
        point: Point,
        at: Instant,
        effects: &mut Vec<Effect>,
    ) {
        let scroll_locked = kind == PointerKind::Touch;
        if scroll_locked {
            effects.push(Effect::LockScroll);
        }
        effects.push(Effect::BeginGesture(cell));
        effects.push(Effect::Focus(cell));
        self.phase = Phase::Active(ActiveDrag {
            pointer_id,
            kind,
            activated_at: at,
            last_point: point,
            auto_scroll: None,
            scroll_locked,
        });
    }

    /// Every exit from `Active` goes through here so the auto-scroll timer
    /// and the scroll lock are released on all paths.
    fn release(drag: ActiveDrag, finish: Effect) -> Vec<Effect> {
        let mut effects = Vec::new();
        if drag.auto_scroll.is_some() {
            effects.push(Effect::StopAutoScroll);
        }
        effects.push(finish);
        if drag.scroll_locked {
            effects.push(Effect::ReleaseScroll);
        }
        effects
    }

    fn next_timer(&mut self) -> TimerToken {
        self.next_token += 1;
        TimerToken(self.next_token)
    }
}
