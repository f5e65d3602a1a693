//! Register probing order.
//!
//! Candidates for one interval are visited hint first, then the
//! preferred group, then the non-preferred group. Within each group
//! the scan is rotated by an offset (the virtual register number) so
//! that unrelated intervals spread across the register file instead of
//! piling onto the first register.

use crate::{MachineEnv, PReg, RegClass};

pub struct AllocationOrder<'a> {
    pref: &'a [PReg],
    non_pref: &'a [PReg],
    hint: Option<PReg>,
    hint_done: bool,
    pref_idx: usize,
    non_pref_idx: usize,
    offset_pref: usize,
    offset_non_pref: usize,
}

impl<'a> AllocationOrder<'a> {
    pub fn new(env: &'a MachineEnv, class: RegClass, hint: PReg, offset: usize) -> Self {
        let pref = &env.preferred_regs_by_class[class as usize][..];
        let non_pref = &env.non_preferred_regs_by_class[class as usize][..];
        let hint = if hint.is_valid() { Some(hint) } else { None };
        AllocationOrder {
            pref,
            non_pref,
            hint,
            hint_done: false,
            pref_idx: 0,
            non_pref_idx: 0,
            offset_pref: if pref.is_empty() {
                0
            } else {
                offset % pref.len()
            },
            offset_non_pref: if non_pref.is_empty() {
                0
            } else {
                offset % non_pref.len()
            },
        }
    }

    /// Was the hint for this order?
    pub fn is_hint(&self, preg: PReg) -> bool {
        self.hint == Some(preg)
    }

    /// Smallest per-use cost over the whole order.
    pub fn min_cost(&self, env: &MachineEnv) -> u8 {
        self.pref
            .iter()
            .chain(self.non_pref.iter())
            .map(|&p| env.cost_per_use(p))
            .min()
            .unwrap_or(0)
    }
}

impl<'a> Iterator for AllocationOrder<'a> {
    type Item = PReg;

    fn next(&mut self) -> Option<PReg> {
        if !self.hint_done {
            self.hint_done = true;
            if let Some(hint) = self.hint {
                return Some(hint);
            }
        }

        while self.pref_idx < self.pref.len() {
            let r = self.pref[wrap(self.pref_idx + self.offset_pref, self.pref.len())];
            self.pref_idx += 1;
            if Some(r) == self.hint {
                continue;
            }
            return Some(r);
        }

        while self.non_pref_idx < self.non_pref.len() {
            let r =
                self.non_pref[wrap(self.non_pref_idx + self.offset_non_pref, self.non_pref.len())];
            self.non_pref_idx += 1;
            if Some(r) == self.hint {
                continue;
            }
            return Some(r);
        }

        None
    }
}

#[inline(always)]
fn wrap(idx: usize, limit: usize) -> usize {
    if idx >= limit {
        idx - limit
    } else {
        idx
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn env() -> MachineEnv {
        let mut env = MachineEnv::default();
        env.preferred_regs_by_class[RegClass::Int as usize] =
            (0..3).map(|i| PReg::new(i, RegClass::Int)).collect();
        env.non_preferred_regs_by_class[RegClass::Int as usize] =
            (3..5).map(|i| PReg::new(i, RegClass::Int)).collect();
        env
    }

    #[test]
    fn hint_comes_first_and_is_not_repeated() {
        let env = env();
        let hint = PReg::new(1, RegClass::Int);
        let order: Vec<_> = AllocationOrder::new(&env, RegClass::Int, hint, 0).collect();
        assert_eq!(order[0], hint);
        assert_eq!(order.len(), 5);
        assert_eq!(order.iter().filter(|&&r| r == hint).count(), 1);
    }

    #[test]
    fn offset_rotates_within_groups() {
        let env = env();
        let order: Vec<_> =
            AllocationOrder::new(&env, RegClass::Int, PReg::invalid(), 1).collect();
        assert_eq!(order[0], PReg::new(1, RegClass::Int));
        // Preferred registers all come before non-preferred ones.
        assert_eq!(order[3].hw_enc(), 4);
        assert_eq!(order[4].hw_enc(), 3);
    }
}
