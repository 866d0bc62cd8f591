//! Pointer event injection
//!
//! Pointer events arrive as JSON over a WebRTC DataChannel and leave as
//! 32-byte injection messages on the device control channel. Mouse/pen and
//! touch differ only in slot policy and button handling, so both run through
//! one path behind a small [`PointerPolicy`] capability: mouse and pen pin
//! wire id 0 and carry real button masks, touch contacts are mapped onto
//! slots 1..=10 and never carry buttons.

pub mod slots;
pub mod wire;

use std::collections::HashMap;

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::device::DeviceSession;
use crate::error::Result;
use slots::TouchSlots;
pub use slots::MAX_TOUCH_POINTERS;
use wire::{pressure_to_fixed, TouchCommand};

/// Wire pointer id reserved for the mouse/pen.
pub const MOUSE_POINTER_ID: u64 = 0;

/// Pointer event as sent by the browser over the DataChannel.
#[derive(Debug, Clone, Deserialize)]
pub struct PointerEvent {
    #[serde(rename = "type")]
    pub action: PointerAction,
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    #[serde(default, rename = "screenW")]
    pub screen_w: u16,
    #[serde(default, rename = "screenH")]
    pub screen_h: u16,
    #[serde(default)]
    pub pressure: f64,
    #[serde(default)]
    pub buttons: u32,
    #[serde(default, rename = "pointerType")]
    pub pointer_type: PointerKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerAction {
    Down,
    Up,
    Move,
    Cancel,
}

impl PointerAction {
    /// Motion-event action code understood by the agent.
    pub fn code(self) -> u8 {
        match self {
            PointerAction::Down => 0,
            PointerAction::Up => 1,
            PointerAction::Move => 2,
            PointerAction::Cancel => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerKind {
    #[default]
    Mouse,
    Pen,
    Touch,
}

/// How a class of pointers maps onto wire ids and button masks.
trait PointerPolicy: Sync {
    /// Wire pointer id for this event, or `None` to drop it.
    fn resolve(&self, slots: &mut TouchSlots, ev: &PointerEvent) -> Option<u64>;
    /// Button mask forwarded to the device.
    fn effective_buttons(&self, ev: &PointerEvent) -> u32;
}

/// Mouse and pen: fixed id 0, hover moves are noise.
struct MousePenPolicy;

impl PointerPolicy for MousePenPolicy {
    fn resolve(&self, _slots: &mut TouchSlots, ev: &PointerEvent) -> Option<u64> {
        if ev.action == PointerAction::Move && ev.buttons == 0 {
            return None;
        }
        Some(MOUSE_POINTER_ID)
    }

    fn effective_buttons(&self, ev: &PointerEvent) -> u32 {
        ev.buttons
    }
}

/// Touch contacts: slot-mapped ids 1..=10, no buttons.
struct TouchPolicy;

impl PointerPolicy for TouchPolicy {
    fn resolve(&self, slots: &mut TouchSlots, ev: &PointerEvent) -> Option<u64> {
        let slot = match ev.action {
            PointerAction::Down => slots.acquire(ev.id),
            PointerAction::Up | PointerAction::Cancel => slots.release(ev.id),
            PointerAction::Move => slots.get(ev.id),
        }?;
        Some(u64::from(slot) + 1)
    }

    fn effective_buttons(&self, _ev: &PointerEvent) -> u32 {
        0
    }
}

/// The `action_button` field is the edge between the previous and the new
/// button mask: buttons gained on down, buttons lost on up, zero otherwise.
fn action_button_edge(action: PointerAction, previous: u32, now: u32) -> u32 {
    match action {
        PointerAction::Down => now & !previous,
        PointerAction::Up => previous & !now,
        _ => 0,
    }
}

/// Process-wide pointer state: slot table plus last-seen button masks.
///
/// Lock ordering: the slot lock is always taken before the button lock.
#[derive(Default)]
pub struct TouchInjector {
    slots: Mutex<TouchSlots>,
    buttons: Mutex<HashMap<u64, u32>>,
}

impl TouchInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate one browser pointer event and write it to the device.
    ///
    /// Events that resolve to no wire pointer (hover moves, an eleventh
    /// finger, a move without a prior down) are silently dropped.
    pub async fn handle(&self, device: &DeviceSession, ev: PointerEvent) -> Result<()> {
        let mut ev = ev;

        // Map against the screen geometry the browser saw; fall back to the
        // device's current video size when the event carries none.
        if ev.screen_w == 0 || ev.screen_h == 0 {
            let (w, h) = device.dimensions().await;
            ev.screen_w = w;
            ev.screen_h = h;
        }

        ev.x = ev.x.max(0);
        ev.y = ev.y.max(0);
        if ev.screen_w > 0 && ev.screen_h > 0 {
            ev.x = ev.x.min(i32::from(ev.screen_w) - 1);
            ev.y = ev.y.min(i32::from(ev.screen_h) - 1);
        }

        let policy: &dyn PointerPolicy = match ev.pointer_type {
            PointerKind::Touch => &TouchPolicy,
            PointerKind::Mouse | PointerKind::Pen => &MousePenPolicy,
        };

        let pointer_id = {
            let mut slots = self.slots.lock().await;
            match policy.resolve(&mut slots, &ev) {
                Some(id) => id,
                None => {
                    debug!(
                        device = %device.serial,
                        remote = ev.id,
                        action = ?ev.action,
                        "pointer event dropped"
                    );
                    return Ok(());
                }
            }
        };

        let now_buttons = policy.effective_buttons(&ev);
        let action_button = {
            let mut buttons = self.buttons.lock().await;
            let previous = buttons.get(&pointer_id).copied().unwrap_or(0);
            let edge = action_button_edge(ev.action, previous, now_buttons);
            if matches!(ev.action, PointerAction::Up | PointerAction::Cancel) {
                buttons.remove(&pointer_id);
            } else {
                buttons.insert(pointer_id, now_buttons);
            }
            edge
        };

        let pressure = if ev.action == PointerAction::Up {
            0
        } else {
            pressure_to_fixed(ev.pressure)
        };

        let command = TouchCommand {
            action: ev.action.code(),
            pointer_id,
            x: ev.x,
            y: ev.y,
            screen_w: ev.screen_w,
            screen_h: ev.screen_h,
            pressure,
            action_button,
            buttons: now_buttons,
        };
        device.control.inject_touch(&command.encode()).await
    }

    /// Touch contacts currently held down.
    pub async fn active_pointers(&self) -> usize {
        self.slots.lock().await.active()
    }
}
