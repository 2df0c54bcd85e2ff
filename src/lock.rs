// src/lock.rs
/// PIN gate in front of the vault views.
///
/// The PIN lives in the config file and is compared in clear text. It keeps a casual
/// onlooker out of the UI and is not an access-control boundary: anyone with the config
/// or the remote key can read the data.
pub struct LockGate {
    pin: String,
    locked: bool,
}

impl LockGate {
    pub fn new(pin: impl Into<String>) -> Self {
        LockGate { pin: pin.into(), locked: true }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Unlocks when `input` matches the PIN. Returns whether the gate is now open.
    pub fn try_unlock(&mut self, input: &str) -> bool {
        if input.trim() == self.pin {
            self.locked = false;
            log::info!("Vault unlocked.");
        } else {
            log::warn!("Unlock attempt with wrong PIN.");
        }
        !self.locked
    }

    pub fn lock(&mut self) {
        self.locked = true;
        log::info!("Vault locked.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlock_with_correct_pin() {
        let mut gate = LockGate::new("1218");
        assert!(gate.is_locked());
        assert!(!gate.try_unlock("0000"));
        assert!(gate.is_locked());
        assert!(gate.try_unlock("1218"));
        assert!(!gate.is_locked());
    }

    #[test]
    fn test_lock_again() {
        let mut gate = LockGate::new("1218");
        gate.try_unlock("1218");
        gate.lock();
        assert!(gate.is_locked());
    }
}
