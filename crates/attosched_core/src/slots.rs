/*
    AttoSched

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    ---------------------------------------------------------------------------
    core::slots.rs

    A generational slot table holding timer payloads on behalf of the
    devices that own them. A device inserts its payload and hands the
    resulting SlotHandle to a timer. When the device is torn down it releases
    the slot, which bumps the slot generation; any timer still holding the
    old handle is then skipped instead of touching freed data.

*/

use std::any::Any;

use serde_derive::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotHandle {
    index: u32,
    generation: u32,
}

impl SlotHandle {
    pub fn index(&self) -> u32 {
        self.index
    }
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

struct Slot {
    generation: u32,
    payload: Option<Box<dyn Any>>,
}

#[derive(Default)]
pub struct SlotTable {
    slots: Vec<Slot>,
    free:  Vec<u32>,
    live:  usize,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any>(&mut self, payload: T) -> SlotHandle {
        self.insert_boxed(Box::new(payload))
    }

    pub fn insert_boxed(&mut self, payload: Box<dyn Any>) -> SlotHandle {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.payload = Some(payload);
            return SlotHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            payload: Some(payload),
        });
        SlotHandle { index, generation: 0 }
    }

    /// Release a slot, returning its payload. Releasing a stale handle is a no-op.
    pub fn release(&mut self, handle: SlotHandle) -> Option<Box<dyn Any>> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation || slot.payload.is_none() {
            return None;
        }
        let payload = slot.payload.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        payload
    }

    #[inline]
    pub fn is_valid(&self, handle: SlotHandle) -> bool {
        self.slots
            .get(handle.index as usize)
            .is_some_and(|s| s.generation == handle.generation && s.payload.is_some())
    }

    pub fn get<T: Any>(&self, handle: SlotHandle) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.payload.as_ref()?.downcast_ref::<T>()
    }

    pub fn get_mut<T: Any>(&mut self, handle: SlotHandle) -> Option<&mut T> {
        self.get_any_mut(handle)?.downcast_mut::<T>()
    }

    pub fn get_any_mut(&mut self, handle: SlotHandle) -> Option<&mut dyn Any> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.payload.as_deref_mut()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Release every slot. All outstanding handles become stale.
    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.payload.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
        self.live = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_handle_goes_stale() {
        let mut table = SlotTable::new();
        let h = table.insert(42u32);
        assert!(table.is_valid(h));
        assert_eq!(table.get::<u32>(h), Some(&42));

        let payload = table.release(h).unwrap();
        assert_eq!(payload.downcast_ref::<u32>(), Some(&42));
        assert!(!table.is_valid(h));
        assert!(table.get::<u32>(h).is_none());
        assert!(table.release(h).is_none());

        // The index is reused under a new generation; the old handle stays dead.
        let h2 = table.insert(7u32);
        assert_eq!(h2.index(), h.index());
        assert_ne!(h2.generation(), h.generation());
        assert!(!table.is_valid(h));
        assert_eq!(table.get::<u32>(h2), Some(&7));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn wrong_type_yields_none() {
        let mut table = SlotTable::new();
        let h = table.insert(String::from("scanline"));
        assert!(table.get::<u32>(h).is_none());
        table.get_mut::<String>(h).unwrap().push_str("-irq");
        assert_eq!(table.get::<String>(h).map(String::as_str), Some("scanline-irq"));
    }

    #[test]
    fn clear_invalidates_everything() {
        let mut table = SlotTable::new();
        let a = table.insert(1u8);
        let b = table.insert(2u8);
        table.clear();
        assert!(table.is_empty());
        assert!(!table.is_valid(a));
        assert!(!table.is_valid(b));
    }
}
