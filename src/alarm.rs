//! Software alarm pool multiplexed onto a single hardware alarm.
//!
//! Callbacks are not stored as function pointers: every alarm carries an
//! [`AlarmTarget`] that the device dispatcher matches on, so interrupt
//! context reaches the owned device state through a plain index.

use crate::*;

/// Handle to a scheduled alarm.
///
/// The generation makes handles single-use: once an alarm releases its
/// slot, a later alarm reusing the slot gets a different handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AlarmId {
    index: u8,
    generation: u32,
}

/// What an alarm wakes up when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlarmTarget {
    /// Periodic tick of the pulse train at this mask
    TrainTick(u8),
    /// End of the latest pulse of the train at this mask
    PulseEnd(u8),
    /// Sampling drain timer
    Drain,
}

/// An alarm popped from the pool because its deadline passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fired {
    pub id: AlarmId,
    pub target: AlarmTarget,
    /// Deadline the alarm was scheduled for, not the time it ran.
    pub scheduled: u64,
    period: Option<u32>,
}

#[derive(Clone, Copy)]
struct Entry {
    target: AlarmTarget,
    deadline: u64,
    period: Option<u32>,
    seq: u32,
    /// Reserved one-shot; parks again after firing.
    reserved: bool,
}

#[derive(Clone, Copy)]
enum SlotState {
    Free,
    /// Reserved without a deadline, waiting for [`AlarmPool::rearm`].
    Parked(AlarmTarget),
    Pending(Entry),
    /// Periodic alarm whose callback is running; the slot stays reserved
    /// until [`AlarmPool::complete`].
    Firing,
}

#[derive(Clone, Copy)]
struct Slot {
    generation: u32,
    state: SlotState,
}

pub struct AlarmPool {
    slots: [Slot; ALARM_SLOTS],
    seq: u32,
}

impl Default for AlarmPool {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmPool {
    pub const fn new() -> Self {
        Self {
            slots: [Slot {
                generation: 0,
                state: SlotState::Free,
            }; ALARM_SLOTS],
            seq: 0,
        }
    }

    /// Fires `target` once, `delay_us` after `now`.
    pub fn schedule_once(&mut self, now: u64, delay_us: u32, target: AlarmTarget) -> Result<AlarmId> {
        self.insert(now + delay_us as u64, None, target)
    }

    /// Fires `target` `first_delay_us` after `now`, then every `period_us`
    /// measured from the previous deadline.
    pub fn schedule_periodic(
        &mut self,
        now: u64,
        first_delay_us: u32,
        period_us: u32,
        target: AlarmTarget,
    ) -> Result<AlarmId> {
        self.insert(now + first_delay_us as u64, Some(period_us), target)
    }

    /// Takes a slot for `target` without arming it.
    ///
    /// The handle survives any number of [`AlarmPool::rearm`] calls and
    /// firings, and is released only by [`AlarmPool::cancel`] or
    /// [`AlarmPool::clear`].
    pub fn reserve(&mut self, target: AlarmTarget) -> Result<AlarmId> {
        let (index, slot) = self.free_slot()?;
        slot.state = SlotState::Parked(target);
        Ok(AlarmId {
            index,
            generation: slot.generation,
        })
    }

    /// Arms a reserved alarm `delay_us` after `now`, replacing any deadline
    /// it already had. Returns `false` for a stale handle.
    pub fn rearm(&mut self, id: AlarmId, now: u64, delay_us: u32) -> bool {
        let seq = self.next_seq();
        let Some(slot) = self.slot_mut(id) else {
            return false;
        };
        let target = match slot.state {
            SlotState::Parked(target) => target,
            SlotState::Pending(entry) if entry.reserved => entry.target,
            _ => return false,
        };
        slot.state = SlotState::Pending(Entry {
            target,
            deadline: now + delay_us as u64,
            period: None,
            seq,
            reserved: true,
        });
        true
    }

    /// Cancels an alarm. Returns `false` if it already fired or was
    /// cancelled before.
    pub fn cancel(&mut self, id: AlarmId) -> bool {
        match self.slot_mut(id) {
            Some(slot) if !matches!(slot.state, SlotState::Free) => {
                slot.state = SlotState::Free;
                slot.generation = slot.generation.wrapping_add(1);
                true
            }
            _ => false,
        }
    }

    /// Cancels every alarm.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            if !matches!(slot.state, SlotState::Free) {
                slot.state = SlotState::Free;
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
    }

    /// Whether `id` still holds its slot, armed or not.
    pub fn is_pending(&self, id: AlarmId) -> bool {
        let slot = &self.slots[id.index as usize];
        slot.generation == id.generation && !matches!(slot.state, SlotState::Free)
    }

    /// Whether `id` has a deadline that has not been reached yet.
    pub fn is_armed(&self, id: AlarmId) -> bool {
        let slot = &self.slots[id.index as usize];
        slot.generation == id.generation && matches!(slot.state, SlotState::Pending(_))
    }

    /// Slots not held by any alarm.
    pub fn free(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.state, SlotState::Free))
            .count()
    }

    /// Earliest pending deadline, the value the hardware alarm must be armed with.
    pub fn next_deadline(&self) -> Option<u64> {
        self.slots
            .iter()
            .filter_map(|slot| match slot.state {
                SlotState::Pending(entry) => Some(entry.deadline),
                _ => None,
            })
            .min()
    }

    /// Takes the earliest alarm due at `now`, if any.
    ///
    /// One-shot alarms are released right away, reserved ones park again.
    /// Periodic alarms keep their slot until the caller reports back
    /// through [`AlarmPool::complete`].
    pub fn pop_due(&mut self, now: u64) -> Option<Fired> {
        let (index, entry) = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot.state {
                SlotState::Pending(entry) if entry.deadline <= now => Some((index, entry)),
                _ => None,
            })
            .min_by_key(|(_, entry)| (entry.deadline, entry.seq))?;

        let slot = &mut self.slots[index];
        let id = AlarmId {
            index: index as u8,
            generation: slot.generation,
        };
        match entry.period {
            Some(_) => slot.state = SlotState::Firing,
            None if entry.reserved => slot.state = SlotState::Parked(entry.target),
            None => {
                slot.state = SlotState::Free;
                slot.generation = slot.generation.wrapping_add(1);
            }
        }

        Some(Fired {
            id,
            target: entry.target,
            scheduled: entry.deadline,
            period: entry.period,
        })
    }

    /// Re-arms a periodic alarm after its callback, or releases it.
    ///
    /// A no-op if the alarm was cancelled while its callback ran.
    pub fn complete(&mut self, fired: Fired, repeat: bool) {
        let Some(period) = fired.period else {
            return;
        };
        let seq = self.next_seq();
        let Some(slot) = self.slot_mut(fired.id) else {
            return;
        };
        if !matches!(slot.state, SlotState::Firing) {
            return;
        }
        if repeat {
            slot.state = SlotState::Pending(Entry {
                target: fired.target,
                deadline: fired.scheduled + period as u64,
                period: Some(period),
                seq,
                reserved: false,
            });
        } else {
            slot.state = SlotState::Free;
            slot.generation = slot.generation.wrapping_add(1);
        }
    }

    fn insert(&mut self, deadline: u64, period: Option<u32>, target: AlarmTarget) -> Result<AlarmId> {
        let seq = self.next_seq();
        let (index, slot) = self.free_slot()?;
        slot.state = SlotState::Pending(Entry {
            target,
            deadline,
            period,
            seq,
            reserved: false,
        });
        Ok(AlarmId {
            index,
            generation: slot.generation,
        })
    }

    fn free_slot(&mut self) -> Result<(u8, &mut Slot)> {
        self.slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| matches!(slot.state, SlotState::Free))
            .map(|(index, slot)| (index as u8, slot))
            .ok_or(Error::AlarmPoolExhausted)
    }

    fn slot_mut(&mut self, id: AlarmId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
    }

    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let mut pool = AlarmPool::new();
        pool.schedule_once(0, 300, AlarmTarget::TrainTick(3)).unwrap();
        pool.schedule_once(0, 100, AlarmTarget::TrainTick(1)).unwrap();
        pool.schedule_once(0, 200, AlarmTarget::TrainTick(2)).unwrap();

        assert_eq!(pool.next_deadline(), Some(100));
        assert!(pool.pop_due(99).is_none());

        let order: Vec<_> = core::iter::from_fn(|| pool.pop_due(1_000))
            .map(|fired| fired.target)
            .collect();
        assert_eq!(
            order,
            [
                AlarmTarget::TrainTick(1),
                AlarmTarget::TrainTick(2),
                AlarmTarget::TrainTick(3)
            ]
        );
        assert_eq!(pool.next_deadline(), None);
    }

    #[test]
    fn equal_deadlines_fire_in_scheduling_order() {
        let mut pool = AlarmPool::new();
        pool.schedule_once(0, 50, AlarmTarget::Drain).unwrap();
        pool.schedule_once(0, 50, AlarmTarget::TrainTick(7)).unwrap();

        assert_eq!(pool.pop_due(50).unwrap().target, AlarmTarget::Drain);
        assert_eq!(pool.pop_due(50).unwrap().target, AlarmTarget::TrainTick(7));
    }

    #[test]
    fn periodic_rearms_from_scheduled_time() {
        let mut pool = AlarmPool::new();
        pool.schedule_periodic(0, 0, 1_000, AlarmTarget::Drain).unwrap();

        // Run late: the next deadline must not inherit the lateness.
        let fired = pool.pop_due(130).unwrap();
        assert_eq!(fired.scheduled, 0);
        pool.complete(fired, true);
        assert_eq!(pool.next_deadline(), Some(1_000));

        let fired = pool.pop_due(1_000).unwrap();
        pool.complete(fired, false);
        assert_eq!(pool.next_deadline(), None);
        assert!(!pool.is_pending(fired.id));
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut pool = AlarmPool::new();
        let id = pool.schedule_once(0, 10, AlarmTarget::Drain).unwrap();

        assert!(pool.cancel(id));
        assert!(!pool.cancel(id));
        assert!(pool.pop_due(100).is_none());
    }

    #[test]
    fn cancel_during_callback_wins_over_complete() {
        let mut pool = AlarmPool::new();
        let id = pool.schedule_periodic(0, 0, 10, AlarmTarget::Drain).unwrap();

        let fired = pool.pop_due(0).unwrap();
        assert!(pool.cancel(id));
        pool.complete(fired, true);
        assert_eq!(pool.next_deadline(), None);
    }

    #[test]
    fn stale_handle_does_not_touch_reused_slot() {
        let mut pool = AlarmPool::new();
        let old = pool.schedule_once(0, 10, AlarmTarget::Drain).unwrap();
        pool.pop_due(10).unwrap();

        let new = pool.schedule_once(0, 20, AlarmTarget::TrainTick(1)).unwrap();
        assert_ne!(old, new);
        assert!(!pool.cancel(old));
        assert!(pool.is_pending(new));
    }

    #[test]
    fn stale_handle_stays_stale_after_many_reuses() {
        let mut pool = AlarmPool::new();
        let old = pool.schedule_once(0, 10, AlarmTarget::Drain).unwrap();
        assert!(pool.cancel(old));
        for _ in 0..u16::MAX {
            let id = pool.schedule_once(0, 10, AlarmTarget::Drain).unwrap();
            pool.cancel(id);
        }

        // Same slot, 65536 generations on.
        let new = pool.schedule_once(0, 10, AlarmTarget::TrainTick(1)).unwrap();
        assert_ne!(old, new);
        assert!(!pool.cancel(old));
        assert!(pool.is_pending(new));
    }

    #[test]
    fn reserved_alarm_keeps_its_slot_across_firings() {
        let mut pool = AlarmPool::new();
        let id = pool.reserve(AlarmTarget::PulseEnd(4)).unwrap();
        assert!(!pool.is_armed(id));
        assert_eq!(pool.next_deadline(), None);

        assert!(pool.rearm(id, 0, 100));
        // Re-arming moves the deadline instead of adding a second one.
        assert!(pool.rearm(id, 50, 100));
        assert_eq!(pool.next_deadline(), Some(150));
        assert_eq!(pool.free(), ALARM_SLOTS - 1);

        let fired = pool.pop_due(150).unwrap();
        assert_eq!(fired.id, id);
        assert_eq!(fired.target, AlarmTarget::PulseEnd(4));
        assert!(pool.is_pending(id));
        assert!(!pool.is_armed(id));
        assert!(pool.pop_due(u64::MAX).is_none());

        assert!(pool.rearm(id, 200, 10));
        assert!(pool.cancel(id));
        assert!(!pool.rearm(id, 300, 10));
        assert_eq!(pool.free(), ALARM_SLOTS);
    }

    #[test]
    fn rearm_refuses_unreserved_alarms() {
        let mut pool = AlarmPool::new();
        let id = pool.schedule_once(0, 10, AlarmTarget::Drain).unwrap();
        assert!(!pool.rearm(id, 0, 500));
        assert_eq!(pool.next_deadline(), Some(10));
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut pool = AlarmPool::new();
        for _ in 0..ALARM_SLOTS {
            pool.schedule_once(0, 10, AlarmTarget::Drain).unwrap();
        }
        assert_eq!(
            pool.schedule_once(0, 10, AlarmTarget::Drain),
            Err(Error::AlarmPoolExhausted)
        );
    }
}
