//! The remote connection shared by the stages of one migration run.

use crate::collaborators::{self, RemoteDevice};
use log::debug;
use std::cell::Cell;
use std::sync::Arc;

/// Counts the stages holding the remote connection open.  The first hold connects and the last
/// release disconnects, so a stage that has to undo something on the remote device in cleanup
/// still has a connection no matter where it sits in the cleanup order.
pub struct RemoteSession {
    remote: Arc<dyn RemoteDevice>,
    holds: Cell<usize>,
}

impl RemoteSession {
    pub fn new(remote: Arc<dyn RemoteDevice>) -> Self {
        Self {
            remote,
            holds: Cell::new(0),
        }
    }

    pub fn remote(&self) -> &dyn RemoteDevice {
        self.remote.as_ref()
    }

    /// Takes a hold on the connection, connecting if nobody holds it yet.
    pub fn acquire(&self) -> collaborators::Result<()> {
        if self.holds.get() == 0 {
            self.remote.connect()?;
        }
        self.holds.set(self.holds.get() + 1);
        Ok(())
    }

    /// Gives a hold back; the last one disconnects.
    pub fn release(&self) {
        match self.holds.get() {
            0 => {}
            1 => {
                debug!("Disconnecting from remote device");
                self.remote.disconnect();
                self.holds.set(0);
            }
            n => self.holds.set(n - 1),
        }
    }
}
