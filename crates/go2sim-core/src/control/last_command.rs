//! Last-write-wins command cell

use parking_lot::Mutex;

use crate::robot::LowCmd;

#[derive(Debug)]
struct Slot {
    command: LowCmd,
    seq: u64,
    consumed: bool,
    superseded: u64,
}

/// The most recently received command
///
/// Holds the neutral command until the first write. A write replaces all 12
/// joints at once under the lock, so a reader never sees a blend of two
/// commands. A write that lands before the previous one was read counts as
/// superseding it.
#[derive(Debug)]
pub struct LastCommand {
    slot: Mutex<Slot>,
}

impl Default for LastCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl LastCommand {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                command: LowCmd::neutral(),
                seq: 0,
                consumed: true,
                superseded: 0,
            }),
        }
    }

    /// Replace the held command, returning its sequence number
    pub fn write(&self, command: LowCmd) -> u64 {
        let mut slot = self.slot.lock();
        if !slot.consumed {
            slot.superseded += 1;
            tracing::debug!("command #{} superseded before use", slot.seq);
        }
        slot.command = command;
        slot.seq += 1;
        slot.consumed = false;
        slot.seq
    }

    /// Copy out the held command and mark it consumed
    ///
    /// The command stays in effect for later reads until replaced.
    pub fn read(&self) -> (LowCmd, u64) {
        let mut slot = self.slot.lock();
        slot.consumed = true;
        (slot.command, slot.seq)
    }

    /// Copy out the held command without consuming it
    pub fn peek(&self) -> LowCmd {
        self.slot.lock().command
    }

    /// Number of writes so far
    pub fn received(&self) -> u64 {
        self.slot.lock().seq
    }

    /// Number of writes that replaced an unread command
    pub fn superseded(&self) -> u64 {
        self.slot.lock().superseded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::NUM_JOINTS;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_starts_neutral() {
        let cell = LastCommand::new();
        let (cmd, seq) = cell.read();
        assert_eq!(cmd, LowCmd::neutral());
        assert_eq!(seq, 0);
    }

    #[test]
    fn test_last_write_wins() {
        let cell = LastCommand::new();
        let c1 = LowCmd::hold([0.1; NUM_JOINTS], 10.0, 1.0);
        let c2 = LowCmd::hold([0.2; NUM_JOINTS], 30.0, 2.0);
        cell.write(c1);
        cell.write(c2);

        let (cmd, seq) = cell.read();
        assert_eq!(cmd, c2);
        assert_eq!(seq, 2);
        assert_eq!(cell.superseded(), 1);
        assert_eq!(cell.received(), 2);
    }

    #[test]
    fn test_command_stays_in_effect() {
        let cell = LastCommand::new();
        let c1 = LowCmd::hold([0.1; NUM_JOINTS], 10.0, 1.0);
        cell.write(c1);
        assert_eq!(cell.read().0, c1);
        assert_eq!(cell.read().0, c1);

        // Consumed before the next write, so nothing was superseded
        cell.write(LowCmd::neutral());
        assert_eq!(cell.superseded(), 0);
    }

    #[test]
    fn test_writes_are_never_torn() {
        let cell = Arc::new(LastCommand::new());
        let writers: Vec<_> = (1..=4)
            .map(|k| {
                let cell = cell.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        cell.write(LowCmd::hold([k as f64; NUM_JOINTS], k as f64, k as f64));
                    }
                })
            })
            .collect();

        for _ in 0..2000 {
            let (cmd, _) = cell.read();
            let first = cmd.joints[0];
            assert!(cmd.joints.iter().all(|j| *j == first));
        }
        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(cell.received(), 2000);
    }
}
