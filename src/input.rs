use crate::color::Rgb;
use crate::config::PointerConfig;
use crate::pointer::{Pointer, Stroke, MOUSE_ID};
use crate::vec2::Vec2;
use std::collections::VecDeque;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TouchPoint {
    pub id: u64,
    pub position: Vec2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Pause,
    Burst,
}

/// Host input, positions in surface pixels with y pointing down.
#[derive(Clone, Debug, PartialEq)]
pub enum InputEvent {
    MouseDown { position: Vec2 },
    MouseMove { position: Vec2 },
    MouseUp,
    MouseLeave,
    TouchStart(Vec<TouchPoint>),
    TouchMove(Vec<TouchPoint>),
    TouchEnd(Vec<u64>),
    Key(Key),
}

/// A pointer stroke waiting for the next frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PendingSplat {
    pub texcoord: Vec2,
    pub delta: Vec2,
    pub boost: f32,
    pub color: Rgb,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Drained {
    pub bursts: Vec<usize>,
    pub splats: Vec<PendingSplat>,
}

/// Pointer registry plus everything queued since the last frame. Slot 0 is
/// the mouse; touch contacts get the remaining slots by identifier.
#[derive(Clone, Debug)]
pub struct InputQueue {
    pointers: Vec<Pointer>,
    pending: Vec<PendingSplat>,
    bursts: VecDeque<usize>,
}

impl Default for InputQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InputQueue {
    pub fn new() -> Self {
        Self {
            pointers: vec![Pointer::new(MOUSE_ID)],
            pending: Vec::new(),
            bursts: VecDeque::new(),
        }
    }

    pub fn pointers(&self) -> &[Pointer] {
        &self.pointers
    }

    pub fn pending(&self) -> &[PendingSplat] {
        &self.pending
    }

    pub fn queued_bursts(&self) -> usize {
        self.bursts.len()
    }

    pub fn mouse_down(
        &mut self,
        position: Vec2,
        surface: (u32, u32),
        timestamp_ms: f64,
        color: Rgb,
    ) {
        self.pointers[0].press(MOUSE_ID, position, surface, timestamp_ms, color);
    }

    /// A move without a preceding press starts a hover stroke.
    pub fn mouse_move(
        &mut self,
        position: Vec2,
        surface: (u32, u32),
        timestamp_ms: f64,
        config: &PointerConfig,
        tint: impl FnOnce() -> Rgb,
    ) {
        if !self.pointers[0].down {
            self.pointers[0].press(MOUSE_ID, position, surface, timestamp_ms, tint());
        }
        let strokes = self.pointers[0].drag(position, surface, timestamp_ms, config);
        self.enqueue(0, &strokes);
    }

    pub fn mouse_up(&mut self) {
        self.pointers[0].release();
    }

    pub fn touch_start(
        &mut self,
        touches: &[TouchPoint],
        surface: (u32, u32),
        timestamp_ms: f64,
        mut tint: impl FnMut() -> Rgb,
    ) {
        for touch in touches {
            let slot = self.claim_touch_slot(touch.id);
            self.pointers[slot].press(
                touch.id as i64,
                touch.position,
                surface,
                timestamp_ms,
                tint(),
            );
        }
    }

    pub fn touch_move(
        &mut self,
        touches: &[TouchPoint],
        surface: (u32, u32),
        timestamp_ms: f64,
        config: &PointerConfig,
    ) {
        for touch in touches {
            let Some(slot) = self.touch_slot(touch.id) else {
                continue;
            };
            let strokes = self.pointers[slot].drag(touch.position, surface, timestamp_ms, config);
            self.enqueue(slot, &strokes);
        }
    }

    pub fn touch_end(&mut self, ids: &[u64]) {
        for &id in ids {
            if let Some(slot) = self.touch_slot(id) {
                self.pointers[slot].release();
            }
        }
    }

    pub fn request_burst(&mut self, count: usize) {
        self.bursts.push_back(count);
    }

    /// Takes everything queued so far and clears each pointer's `moved` flag.
    pub fn drain(&mut self) -> Drained {
        for pointer in &mut self.pointers {
            pointer.moved = false;
        }
        Drained {
            bursts: self.bursts.drain(..).collect(),
            splats: std::mem::take(&mut self.pending),
        }
    }

    pub fn retint(&mut self, mut tint: impl FnMut() -> Rgb) {
        for pointer in &mut self.pointers {
            pointer.color = tint();
        }
    }

    fn touch_slot(&self, id: u64) -> Option<usize> {
        self.pointers
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, p)| p.down && p.id == id as i64)
            .map(|(slot, _)| slot)
    }

    fn claim_touch_slot(&mut self, id: u64) -> usize {
        if let Some(slot) = self.touch_slot(id) {
            return slot;
        }
        if let Some(slot) = self.pointers.iter().skip(1).position(|p| !p.down) {
            return slot + 1;
        }
        self.pointers.push(Pointer::new(id as i64));
        self.pointers.len() - 1
    }

    fn enqueue(&mut self, slot: usize, strokes: &[Stroke]) {
        let color = self.pointers[slot].color;
        self.pending
            .extend(strokes.iter().map(|stroke| PendingSplat {
                texcoord: stroke.texcoord,
                delta: stroke.delta,
                boost: stroke.boost,
                color,
            }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SURFACE: (u32, u32) = (800, 600);

    fn touch(id: u64, x: f32, y: f32) -> TouchPoint {
        TouchPoint {
            id,
            position: Vec2::new(x, y),
        }
    }

    #[test]
    fn hover_move_presses_first() {
        let mut queue = InputQueue::new();
        let config = PointerConfig::default();
        queue.mouse_move(Vec2::new(10.0, 10.0), SURFACE, 0.0, &config, || Rgb::gray(0.5));
        let mouse = &queue.pointers()[0];
        assert!(mouse.down);
        assert_eq!(mouse.color, Rgb::gray(0.5));
        // Same position as the implicit press: nothing to splat.
        assert!(queue.pending().is_empty());
        queue.mouse_move(Vec2::new(13.0, 10.0), SURFACE, 8.0, &config, || Rgb::gray(0.9));
        assert_eq!(queue.pending().len(), 1);
        assert_eq!(queue.pending()[0].color, Rgb::gray(0.5));
    }

    #[test]
    fn touches_are_keyed_by_identifier() {
        let mut queue = InputQueue::new();
        let config = PointerConfig::default();
        queue.touch_start(
            &[touch(7, 100.0, 100.0), touch(9, 300.0, 300.0)],
            SURFACE,
            0.0,
            Rgb::default,
        );
        assert_eq!(queue.pointers().len(), 3);

        // Contact order in the event does not matter.
        queue.touch_move(&[touch(9, 301.0, 300.0), touch(7, 100.0, 104.0)], SURFACE, 5.0, &config);
        let pending = queue.pending();
        assert_eq!(pending.len(), 2);
        assert!(pending[0].delta.x > 0.0 && pending[0].delta.y == 0.0);
        assert!(pending[1].delta.x == 0.0 && pending[1].delta.y != 0.0);

        queue.touch_end(&[7, 42]);
        assert!(!queue.pointers()[1].down);
        assert!(queue.pointers()[2].down);

        // A new contact reuses the freed slot.
        queue.touch_start(&[touch(11, 50.0, 50.0)], SURFACE, 10.0, Rgb::default);
        assert_eq!(queue.pointers().len(), 3);
        assert_eq!(queue.pointers()[1].id, 11);
    }

    #[test]
    fn touch_move_without_contact_is_ignored() {
        let mut queue = InputQueue::new();
        queue.touch_move(&[touch(1, 10.0, 10.0)], SURFACE, 0.0, &PointerConfig::default());
        assert!(queue.pending().is_empty());
        assert_eq!(queue.pointers().len(), 1);
    }

    #[test]
    fn drain_empties_queue_and_clears_moved() {
        let mut queue = InputQueue::new();
        let config = PointerConfig::default();
        queue.mouse_down(Vec2::new(0.0, 0.0), SURFACE, 0.0, Rgb::default());
        queue.mouse_move(Vec2::new(4.0, 0.0), SURFACE, 4.0, &config, Rgb::default);
        queue.request_burst(6);
        queue.request_burst(12);
        assert!(queue.pointers()[0].moved);

        let drained = queue.drain();
        assert_eq!(drained.bursts, vec![6, 12]);
        assert_eq!(drained.splats.len(), 1);
        assert!(!queue.pointers()[0].moved);
        assert_eq!(queue.drain(), Drained::default());
    }

    #[test]
    fn mouse_up_keeps_slot() {
        let mut queue = InputQueue::new();
        queue.mouse_down(Vec2::new(5.0, 5.0), SURFACE, 0.0, Rgb::default());
        queue.mouse_up();
        assert_eq!(queue.pointers().len(), 1);
        assert!(!queue.pointers()[0].down);
    }
}
