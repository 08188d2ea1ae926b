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
    core::scheduler::units.rs

    The set of registered executable units, kept in execution order:
    ascending priority, then registration order.

*/

use crate::unit::{ExecutableUnit, UnitDispatch, UnitId};

pub(crate) struct UnitEntry {
    pub(crate) id: UnitId,
    pub(crate) priority: i32,
    pub(crate) suspended: bool,
    pub(crate) unit: UnitDispatch,
}

#[derive(Default)]
pub struct UnitSet {
    entries: Vec<UnitEntry>,
    next_id: u32,
}

impl UnitSet {
    pub(crate) fn insert(&mut self, unit: UnitDispatch, priority: i32) -> UnitId {
        let id = UnitId(self.next_id);
        self.next_id += 1;
        // Ids increase with registration, so inserting after every entry of equal or
        // lower priority keeps ties in registration order.
        let pos = self.entries.partition_point(|e| e.priority <= priority);
        log::debug!("Registering unit {} '{}' with priority {}", id, unit.name(), priority);
        self.entries.insert(
            pos,
            UnitEntry {
                id,
                priority,
                suspended: false,
                unit,
            },
        );
        id
    }

    pub(crate) fn remove(&mut self, id: UnitId) -> Option<UnitDispatch> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        let entry = self.entries.remove(pos);
        log::debug!("Unregistered unit {} '{}'", id, entry.unit.name());
        Some(entry.unit)
    }

    pub(crate) fn entry(&self, id: UnitId) -> Option<&UnitEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub(crate) fn entry_mut(&mut self, id: UnitId) -> Option<&mut UnitEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &UnitEntry> {
        self.entries.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut UnitEntry> {
        self.entries.iter_mut()
    }

    pub fn get(&self, id: UnitId) -> Option<&UnitDispatch> {
        self.entry(id).map(|e| &e.unit)
    }

    pub fn get_mut(&mut self, id: UnitId) -> Option<&mut UnitDispatch> {
        self.entry_mut(id).map(|e| &mut e.unit)
    }

    /// Typed access to a unit's concrete type.
    pub fn get_as<T: 'static>(&mut self, id: UnitId) -> Option<&mut T> {
        self.get_mut(id)?.downcast_mut::<T>()
    }

    pub fn ids(&self) -> Vec<UnitId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
