//! Process-wide bookkeeping of the I2C instances
//!
//! Each instance can be bound to at most one target. Instances flagged "never reset" survive
//! [`Registry::reset_all`], the sweep the runtime runs when it tears down user code.

use core::cell::RefCell;
use critical_section::Mutex;

use crate::i2c::{Error, TargetHardware};
use crate::platform::Platform;

/// Upper bound on the number of instances a [`Registry`] can track.
pub const MAX_INSTANCES: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Slot {
    bound: bool,
    never_reset: bool,
    /// Bumped on every claim.
    generation: u32,
}

/// Proof of ownership of one instance, handed out by [`Registry::claim`].
///
/// A claim goes stale once the instance is released or swept by [`Registry::reset_all`].
/// Stale claims cannot release or protect whoever binds the instance next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Claim {
    instance: usize,
    generation: u32,
}

impl Claim {
    /// The claimed instance.
    pub fn instance(&self) -> usize {
        self.instance
    }
}

/// Maps a pin pair to the I2C instance it belongs to.
///
/// SCL must be odd, SDA even, and both must sit in the same group of two pins. Groups are
/// assigned to instances round robin.
///
/// ```
/// use rp2040_i2c_target::registry::resolve_instance;
///
/// assert_eq!(resolve_instance(3, 2, 2), Some(1));
/// assert_eq!(resolve_instance(5, 4, 2), Some(0));
/// assert_eq!(resolve_instance(2, 3, 2), None);
/// ```
pub fn resolve_instance(scl: u8, sda: u8, instances: usize) -> Option<usize> {
    if instances == 0 || scl % 2 != 1 || sda % 2 != 0 || scl / 2 != sda / 2 {
        return None;
    }
    Some(usize::from(scl / 2) % instances)
}

/// Bound/never-reset flags of every I2C instance.
pub struct Registry {
    instances: usize,
    slots: Mutex<RefCell<[Slot; MAX_INSTANCES]>>,
}

impl Registry {
    /// Registry for `instances` I2C instances, clamped to [`MAX_INSTANCES`].
    pub const fn new(instances: usize) -> Self {
        Self {
            instances: if instances > MAX_INSTANCES {
                MAX_INSTANCES
            } else {
                instances
            },
            slots: Mutex::new(RefCell::new(
                [Slot {
                    bound: false,
                    never_reset: false,
                    generation: 0,
                }; MAX_INSTANCES],
            )),
        }
    }

    /// Number of instances.
    pub fn instances(&self) -> usize {
        self.instances
    }

    /// See [`resolve_instance`].
    pub fn resolve_instance(&self, scl: u8, sda: u8) -> Option<usize> {
        resolve_instance(scl, sda, self.instances)
    }

    /// Binds `instance`.
    pub fn claim(&self, instance: usize) -> Result<Claim, Error> {
        if instance >= self.instances {
            return Err(Error::PeripheralInUse(instance));
        }
        critical_section::with(|cs| {
            let slot = &mut self.slots.borrow_ref_mut(cs)[instance];
            if slot.bound {
                return Err(Error::PeripheralInUse(instance));
            }
            slot.bound = true;
            slot.never_reset = false;
            slot.generation = slot.generation.wrapping_add(1);
            Ok(Claim {
                instance,
                generation: slot.generation,
            })
        })
    }

    /// Unbinds the instance and drops its never-reset flag.
    ///
    /// Returns `false`, and changes nothing, if the claim went stale.
    pub fn release(&self, claim: Claim) -> bool {
        self.update(claim, |slot| {
            slot.bound = false;
            slot.never_reset = false;
        })
    }

    /// Protects the instance from [`Registry::reset_all`] until it is released.
    ///
    /// Returns `false` if the claim went stale.
    pub fn never_reset(&self, claim: Claim) -> bool {
        self.update(claim, |slot| slot.never_reset = true)
    }

    /// Whether `claim` still owns its instance.
    pub fn holds(&self, claim: Claim) -> bool {
        let slot = self.slot(claim.instance);
        slot.bound && slot.generation == claim.generation
    }

    /// Whether `instance` is bound to a target.
    pub fn is_bound(&self, instance: usize) -> bool {
        self.slot(instance).bound
    }

    /// Whether `instance` survives [`Registry::reset_all`].
    pub fn is_never_reset(&self, instance: usize) -> bool {
        self.slot(instance).never_reset
    }

    /// Disables every instance not flagged never-reset and marks it free.
    ///
    /// A target still holding a swept instance keeps its pins until it is deinitialized.
    pub fn reset_all<P: Platform>(&self, platform: &mut P) {
        let swept = critical_section::with(|cs| {
            let mut slots = self.slots.borrow_ref_mut(cs);
            let mut swept = [false; MAX_INSTANCES];
            for (slot, flag) in slots.iter_mut().zip(swept.iter_mut()).take(self.instances) {
                if !slot.never_reset {
                    *flag = true;
                    slot.bound = false;
                }
            }
            swept
        });

        for (instance, _) in swept.iter().enumerate().filter(|(_, swept)| **swept) {
            #[cfg(feature = "defmt")]
            defmt::debug!("I2C{}: reset", instance);
            platform.block(instance).disable();
        }
    }

    fn slot(&self, instance: usize) -> Slot {
        if instance >= self.instances {
            return Slot::default();
        }
        critical_section::with(|cs| self.slots.borrow_ref(cs)[instance])
    }

    fn update(&self, claim: Claim, f: impl FnOnce(&mut Slot)) -> bool {
        if claim.instance >= self.instances {
            return false;
        }
        critical_section::with(|cs| {
            let slot = &mut self.slots.borrow_ref_mut(cs)[claim.instance];
            if !slot.bound || slot.generation != claim.generation {
                return false;
            }
            f(slot);
            true
        })
    }
}
