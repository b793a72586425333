//! Two-slot crossfade between drawings.
//!
//! Switching drawings renders the new one into the hidden slot behind the
//! current one, fades the current slot out and only then promotes the new
//! slot. The canvas never shows an empty frame while the new data mounts.

use crate::document::DrawingId;

#[cfg(not(target_arch = "wasm32"))]
use std::time::{Duration, Instant};

#[cfg(target_arch = "wasm32")]
use web_time::{Duration, Instant};

/// Length of the fade-out.
pub const TRANSITION_DURATION: Duration = Duration::from_millis(500);

/// Load state of requested data.
#[derive(Debug, Clone, PartialEq)]
pub enum Loadable<T> {
    /// Not known yet.
    Loading,
    /// Confirmed absent, e.g. a drawing that has never been saved.
    Missing,
    Ready(T),
}

impl<T> Loadable<T> {
    /// `None` means confirmed absent.
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(v) => Loadable::Ready(v),
            None => Loadable::Missing,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Loadable::Loading)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    /// Get the opposite slot.
    pub fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }

    fn index(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }
}

/// How a slot is being displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    Empty,
    /// Fully opaque, on top.
    Visible,
    /// Mounted behind the visible slot, transparent.
    Incoming,
    /// On top, fading to transparent.
    Outgoing,
}

/// Contents of one slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotContent<T> {
    pub drawing_id: DrawingId,
    /// `None` for a drawing confirmed absent (renders as a blank canvas).
    pub data: Option<T>,
}

/// Outcome of a [`TransitionController::request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Data still loading, nothing changed.
    Deferred,
    /// The drawing was already resident; its data was replaced in place.
    Updated(Slot),
    /// The drawing was shown immediately, there was nothing to fade out.
    Shown(Slot),
    /// A fade into this slot has started.
    Fading(Slot),
    /// The request targeted the outgoing drawing; the fade was abandoned.
    Reverted(Slot),
}

#[derive(Debug)]
pub struct TransitionController<T> {
    slots: [Option<SlotContent<T>>; 2],
    visible: Option<Slot>,
    incoming: Option<Slot>,
    outgoing: Option<Slot>,
    deadline: Option<Instant>,
    duration: Duration,
}

impl<T> Default for TransitionController<T> {
    fn default() -> Self {
        Self::new(TRANSITION_DURATION)
    }
}

impl<T> TransitionController<T> {
    /// Create a controller with both slots empty.
    pub fn new(duration: Duration) -> Self {
        Self {
            slots: [None, None],
            visible: None,
            incoming: None,
            outgoing: None,
            deadline: None,
            duration,
        }
    }

    /// Ask for `id` to be displayed.
    pub fn request(&mut self, id: &DrawingId, data: Loadable<T>, now: Instant) -> RequestOutcome {
        let data = match data {
            Loadable::Loading => return RequestOutcome::Deferred,
            Loadable::Missing => None,
            Loadable::Ready(d) => Some(d),
        };

        if let Some(slot) = self.resident_slot(id) {
            self.slots[slot.index()] = Some(SlotContent { drawing_id: id.clone(), data });
            return RequestOutcome::Updated(slot);
        }

        if self.outgoing.is_some_and(|slot| self.holds(slot, id)) {
            let keep = self.visible.unwrap_or(Slot::A);
            self.cancel_fade();
            self.slots[keep.index()] = Some(SlotContent { drawing_id: id.clone(), data });
            return RequestOutcome::Reverted(keep);
        }

        self.cancel_fade();

        let target = self.visible.map(Slot::other).unwrap_or(Slot::A);
        self.slots[target.index()] = Some(SlotContent { drawing_id: id.clone(), data });

        match self.visible {
            Some(current) if self.slots[current.index()].is_some() => {
                self.incoming = Some(target);
                self.outgoing = Some(current);
                self.deadline = Some(now + self.duration);
                RequestOutcome::Fading(target)
            }
            _ => {
                self.visible = Some(target);
                RequestOutcome::Shown(target)
            }
        }
    }

    /// Complete the fade if its duration has elapsed. Returns the promoted slot.
    pub fn poll(&mut self, now: Instant) -> Option<Slot> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        let incoming = self.incoming?;
        if let Some(outgoing) = self.outgoing {
            self.slots[outgoing.index()] = None;
        }
        self.visible = Some(incoming);
        self.clear_flags();
        Some(incoming)
    }

    /// Tear down: cancel any pending fade.
    pub fn dispose(&mut self) {
        self.cancel_fade();
    }

    /// Whether a fade is in flight.
    pub fn is_transitioning(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn visible_slot(&self) -> Option<Slot> {
        self.visible
    }

    /// Get the contents of a slot.
    pub fn slot(&self, slot: Slot) -> Option<&SlotContent<T>> {
        self.slots[slot.index()].as_ref()
    }

    /// The drawing currently fully shown.
    pub fn visible(&self) -> Option<&SlotContent<T>> {
        self.visible.and_then(|slot| self.slot(slot))
    }

    /// Get how a slot is being displayed.
    pub fn phase(&self, slot: Slot) -> SlotPhase {
        if self.slots[slot.index()].is_none() {
            SlotPhase::Empty
        } else if self.incoming == Some(slot) {
            SlotPhase::Incoming
        } else if self.outgoing == Some(slot) {
            SlotPhase::Outgoing
        } else if self.visible == Some(slot) {
            SlotPhase::Visible
        } else {
            SlotPhase::Empty
        }
    }

    /// Slots holding `id`, in slot order.
    pub fn slots_holding(&self, id: &DrawingId) -> Vec<Slot> {
        [Slot::A, Slot::B]
            .into_iter()
            .filter(|&slot| self.holds(slot, id))
            .collect()
    }

    fn holds(&self, slot: Slot, id: &DrawingId) -> bool {
        self.slots[slot.index()]
            .as_ref()
            .is_some_and(|content| &content.drawing_id == id)
    }

    /// Slot where `id` is or is about to be the displayed drawing.
    fn resident_slot(&self, id: &DrawingId) -> Option<Slot> {
        match self.incoming {
            Some(slot) => self.holds(slot, id).then_some(slot),
            None => self.visible.filter(|&slot| self.holds(slot, id)),
        }
    }

    /// Abandon a pending fade, vacating its incoming slot.
    fn cancel_fade(&mut self) {
        if self.deadline.is_some() {
            log::debug!("Cancelling in-flight drawing transition");
        }
        if let Some(incoming) = self.incoming {
            self.slots[incoming.index()] = None;
        }
        self.clear_flags();
    }

    fn clear_flags(&mut self) {
        self.incoming = None;
        self.outgoing = None;
        self.deadline = None;
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn id(s: &str) -> DrawingId {
        DrawingId::from(s)
    }

    #[test]
    fn test_first_drawing_shown_immediately_in_slot_a() {
        let now = Instant::now();
        let mut ctl = TransitionController::default();

        let outcome = ctl.request(&id("one"), Loadable::Ready("first"), now);

        assert_eq!(outcome, RequestOutcome::Shown(Slot::A));
        assert_eq!(ctl.phase(Slot::A), SlotPhase::Visible);
        assert!(!ctl.is_transitioning());
    }

    #[test]
    fn test_loading_is_deferred() {
        let now = Instant::now();
        let mut ctl: TransitionController<&str> = TransitionController::default();

        assert_eq!(ctl.request(&id("one"), Loadable::Loading, now), RequestOutcome::Deferred);
        assert!(ctl.visible().is_none());
    }

    #[test]
    fn test_missing_drawing_shows_blank_slot() {
        let now = Instant::now();
        let mut ctl: TransitionController<&str> = TransitionController::default();

        ctl.request(&id("fresh"), Loadable::Missing, now);

        let shown = ctl.visible().unwrap();
        assert_eq!(shown.drawing_id, id("fresh"));
        assert!(shown.data.is_none());
    }

    #[test]
    fn test_switch_crossfades_into_other_slot() {
        let now = Instant::now();
        let mut ctl = TransitionController::default();
        ctl.request(&id("one"), Loadable::Ready(1), now);

        let outcome = ctl.request(&id("two"), Loadable::Ready(2), now + ms(10));

        assert_eq!(outcome, RequestOutcome::Fading(Slot::B));
        assert_eq!(ctl.phase(Slot::A), SlotPhase::Outgoing);
        assert_eq!(ctl.phase(Slot::B), SlotPhase::Incoming);
        assert_eq!(ctl.poll(now + ms(400)), None);

        assert_eq!(ctl.poll(now + ms(510)), Some(Slot::B));
        assert_eq!(ctl.phase(Slot::A), SlotPhase::Empty);
        assert_eq!(ctl.phase(Slot::B), SlotPhase::Visible);
        assert_eq!(ctl.visible().unwrap().data, Some(2));
        assert!(!ctl.is_transitioning());
    }

    #[test]
    fn test_metadata_update_in_place() {
        let now = Instant::now();
        let mut ctl = TransitionController::default();
        ctl.request(&id("one"), Loadable::Ready("no name"), now);

        let outcome = ctl.request(&id("one"), Loadable::Ready("named"), now + ms(50));

        assert_eq!(outcome, RequestOutcome::Updated(Slot::A));
        assert_eq!(ctl.visible().unwrap().data, Some("named"));
        assert!(!ctl.is_transitioning());
    }

    #[test]
    fn test_update_to_incoming_keeps_fade() {
        let now = Instant::now();
        let mut ctl = TransitionController::default();
        ctl.request(&id("one"), Loadable::Ready("a"), now);
        ctl.request(&id("two"), Loadable::Ready("b"), now + ms(10));

        let outcome = ctl.request(&id("two"), Loadable::Ready("b2"), now + ms(100));

        assert_eq!(outcome, RequestOutcome::Updated(Slot::B));
        assert!(ctl.is_transitioning());
        assert_eq!(ctl.poll(now + ms(510)), Some(Slot::B));
        assert_eq!(ctl.visible().unwrap().data, Some("b2"));
    }

    #[test]
    fn test_overlapping_requests_settle_on_latest() {
        let now = Instant::now();
        let mut ctl = TransitionController::default();
        ctl.request(&id("start"), Loadable::Ready(0), now);

        ctl.request(&id("A"), Loadable::Ready(1), now + ms(10));
        ctl.request(&id("B"), Loadable::Ready(2), now + ms(100));

        // The first fade's timer no longer promotes anything on its own schedule.
        assert_eq!(ctl.poll(now + ms(520)), None);
        assert_eq!(ctl.poll(now + ms(600)), Some(Slot::B));

        assert!(ctl.slots_holding(&id("A")).is_empty());
        assert_eq!(ctl.slots_holding(&id("B")), vec![Slot::B]);
        assert_eq!(ctl.phase(Slot::B), SlotPhase::Visible);
        assert_eq!(ctl.phase(Slot::A), SlotPhase::Empty);
    }

    #[test]
    fn test_overlapping_requests_from_empty() {
        let now = Instant::now();
        let mut ctl = TransitionController::default();

        ctl.request(&id("A"), Loadable::Ready(1), now);
        ctl.request(&id("B"), Loadable::Ready(2), now + ms(10));
        ctl.poll(now + ms(2000));

        assert!(ctl.slots_holding(&id("A")).is_empty());
        assert_eq!(ctl.visible().unwrap().drawing_id, id("B"));
    }

    #[test]
    fn test_request_outgoing_reverts_fade() {
        let now = Instant::now();
        let mut ctl = TransitionController::default();
        ctl.request(&id("one"), Loadable::Ready(1), now);
        ctl.request(&id("two"), Loadable::Ready(2), now + ms(10));

        let outcome = ctl.request(&id("one"), Loadable::Ready(1), now + ms(100));

        assert_eq!(outcome, RequestOutcome::Reverted(Slot::A));
        assert!(!ctl.is_transitioning());
        assert_eq!(ctl.poll(now + ms(2000)), None);
        assert_eq!(ctl.visible().unwrap().drawing_id, id("one"));
        assert!(ctl.slots_holding(&id("two")).is_empty());
    }

    #[test]
    fn test_dispose_cancels_fade() {
        let now = Instant::now();
        let mut ctl = TransitionController::default();
        ctl.request(&id("one"), Loadable::Ready(1), now);
        ctl.request(&id("two"), Loadable::Ready(2), now);

        ctl.dispose();

        assert_eq!(ctl.poll(now + ms(1000)), None);
        assert_eq!(ctl.visible().unwrap().drawing_id, id("one"));
        assert!(ctl.slots_holding(&id("two")).is_empty());
        assert_eq!(ctl.phase(Slot::B), SlotPhase::Empty);
    }
}
