/*!
# Background

A transaction runs an ordered list of stages.  Each stage performs one side effect that can't
be made atomic on its own: copying data to another machine, pausing a service, rewriting a
configuration file.  The transaction gives the list "all or nothing" behavior as far as the
caller can tell, on a best-effort basis.

# Semantics

Stages are committed strictly in the order they were added.

If the commit of stage `i` fails:
* every stage before `i` is rolled back, in reverse order.  A stage that fails to roll back is
  logged and the remaining stages are still rolled back.
* every stage up to and including `i` is cleaned up, in forward order.  Stages after `i` were
  never committed, so they are never cleaned up.
* [`Error::StageCommit`] is returned, wrapping the stage's failure.

If every commit succeeds, every stage is cleaned up in forward order.

Rollback is a compensating action for the effects of a successful commit, not a true undo;
cleanup releases what the stage itself acquired (connections, temporary files, paused
services) whether or not the transaction succeeded.

Stages receive the run's context through [`Stage::set_context`] before any stage is committed.
*/

mod error;

pub use error::{BoxError, Error, Result, StageError, GENERIC_FAILURE_CODE};

use log::{debug, error, info};
use std::sync::Arc;

/// A single unit of work inside a [`Transaction`].
pub trait Stage<C> {
    /// Short name used in logs and error messages.
    fn name(&self) -> String;

    /// Supplies the context of the run, before the first commit of the transaction.
    fn set_context(&mut self, context: Arc<C>);

    /// Performs the side effect.
    fn commit(&mut self) -> std::result::Result<(), StageError>;

    /// Compensates for the effects of a successful commit.  Only called when a later stage in
    /// the same transaction failed.
    fn rollback(&mut self) -> std::result::Result<(), StageError> {
        Ok(())
    }

    /// Releases resources acquired by the stage.  Called exactly once after commit was
    /// attempted, regardless of the outcome.
    fn cleanup(&mut self) {}
}

/// An ordered executor of stages.  Reusable across runs through [`Transaction::clear`].
pub struct Transaction<C> {
    stages: Vec<Box<dyn Stage<C>>>,
}

impl<C> Default for Transaction<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Transaction<C> {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn add(&mut self, stage: Box<dyn Stage<C>>) {
        self.stages.push(stage);
    }

    pub fn add_all<I>(&mut self, stages: I)
    where
        I: IntoIterator<Item = Box<dyn Stage<C>>>,
    {
        self.stages.extend(stages);
    }

    /// Removes every stage so the transaction can be loaded again.
    pub fn clear(&mut self) {
        self.stages.clear();
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Commits every stage in order.  See the crate documentation for what happens on failure.
    pub fn commit(&mut self, context: Arc<C>) -> Result<()> {
        for stage in self.stages.iter_mut() {
            stage.set_context(Arc::clone(&context));
        }

        let total = self.stages.len();
        for index in 0..total {
            let stage = &mut self.stages[index];
            info!("Committing stage '{}' ({}/{})", stage.name(), index + 1, total);
            if let Err(source) = stage.commit() {
                let name = stage.name();
                error!("Stage '{}' failed: {}", name, source);
                self.rollback_committed(index);
                self.cleanup_attempted(index + 1);
                return Err(Error::StageCommit {
                    stage: name,
                    index,
                    source,
                });
            }
        }

        self.cleanup_attempted(total);
        Ok(())
    }

    /// Rolls back the stages before `failed`, last first.
    fn rollback_committed(&mut self, failed: usize) {
        for stage in self.stages[..failed].iter_mut().rev() {
            debug!("Rolling back stage '{}'", stage.name());
            if let Err(e) = stage.rollback() {
                error!("Failed to roll back stage '{}', continuing: {}", stage.name(), e);
            }
        }
    }

    /// Cleans up the first `attempted` stages, first to last.
    fn cleanup_attempted(&mut self, attempted: usize) {
        for stage in self.stages[..attempted].iter_mut() {
            debug!("Cleaning up stage '{}'", stage.name());
            stage.cleanup();
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Stage, StageError, Transaction};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    type Log = Rc<RefCell<Vec<String>>>;

    struct RecordingStage {
        name: String,
        log: Log,
        fail_commit: bool,
        fail_rollback: bool,
        context: Option<Arc<String>>,
    }

    impl RecordingStage {
        fn boxed(name: &str, log: &Log) -> Box<Self> {
            Box::new(Self {
                name: name.to_string(),
                log: Rc::clone(log),
                fail_commit: false,
                fail_rollback: false,
                context: None,
            })
        }

        fn failing(name: &str, log: &Log) -> Box<Self> {
            let mut stage = Self::boxed(name, log);
            stage.fail_commit = true;
            stage
        }

        fn record(&self, event: &str) {
            self.log.borrow_mut().push(format!("{}:{}", event, self.name));
        }
    }

    impl Stage<String> for RecordingStage {
        fn name(&self) -> String {
            self.name.clone()
        }

        fn set_context(&mut self, context: Arc<String>) {
            self.context = Some(context);
        }

        fn commit(&mut self) -> Result<(), StageError> {
            assert!(self.context.is_some(), "commit before set_context");
            self.record("commit");
            if self.fail_commit {
                return Err(StageError::with_code(42, format!("{} exploded", self.name)));
            }
            Ok(())
        }

        fn rollback(&mut self) -> Result<(), StageError> {
            self.record("rollback");
            if self.fail_rollback {
                return Err(StageError::new("rollback exploded"));
            }
            Ok(())
        }

        fn cleanup(&mut self) {
            self.record("cleanup");
        }
    }

    fn events(log: &Log) -> Vec<String> {
        log.borrow().clone()
    }

    #[test]
    fn commits_then_cleans_up_everything_in_order() {
        let log = Log::default();
        let mut tx = Transaction::new();
        for name in ["a", "b", "c"] {
            tx.add(RecordingStage::boxed(name, &log));
        }

        tx.commit(Arc::new("ctx".to_string())).unwrap();

        assert_eq!(
            events(&log),
            vec![
                "commit:a",
                "commit:b",
                "commit:c",
                "cleanup:a",
                "cleanup:b",
                "cleanup:c"
            ]
        );
    }

    #[test]
    fn failure_rolls_back_in_reverse_and_cleans_up_attempted() {
        let log = Log::default();
        let mut tx = Transaction::new();
        tx.add(RecordingStage::boxed("a", &log));
        tx.add(RecordingStage::boxed("b", &log));
        tx.add(RecordingStage::failing("c", &log));
        tx.add(RecordingStage::boxed("d", &log));
        tx.add(RecordingStage::boxed("e", &log));

        let err = tx.commit(Arc::new("ctx".to_string())).unwrap_err();

        assert_eq!(
            events(&log),
            vec![
                "commit:a",
                "commit:b",
                "commit:c",
                "rollback:b",
                "rollback:a",
                "cleanup:a",
                "cleanup:b",
                "cleanup:c",
            ]
        );
        assert_eq!(err.stage(), "c");
    }

    #[test]
    fn first_stage_failure_has_nothing_to_roll_back() {
        let log = Log::default();
        let mut tx = Transaction::new();
        tx.add(RecordingStage::failing("a", &log));
        tx.add(RecordingStage::boxed("b", &log));

        assert!(tx.commit(Arc::new(String::new())).is_err());
        assert_eq!(events(&log), vec!["commit:a", "cleanup:a"]);
    }

    #[test]
    fn rollback_failure_does_not_stop_other_rollbacks() {
        let log = Log::default();
        let mut tx = Transaction::new();
        tx.add(RecordingStage::boxed("a", &log));
        let mut bad = RecordingStage::boxed("b", &log);
        bad.fail_rollback = true;
        tx.add(bad);
        tx.add(RecordingStage::failing("c", &log));

        let err = tx.commit(Arc::new(String::new())).unwrap_err();

        assert!(events(&log).contains(&"rollback:a".to_string()));
        // The rollback failure never replaces the original cause.
        let cause = err.into_cause();
        assert_eq!(cause.to_string(), "c exploded");
        assert_eq!(cause.code(), 42);
    }

    #[test]
    fn clear_allows_reuse() {
        let log = Log::default();
        let mut tx = Transaction::new();
        tx.add(RecordingStage::failing("a", &log));
        assert!(tx.commit(Arc::new(String::new())).is_err());

        tx.clear();
        assert!(tx.is_empty());
        tx.add(RecordingStage::boxed("b", &log));
        assert_eq!(tx.stage_names(), vec!["b"]);
        tx.commit(Arc::new(String::new())).unwrap();
    }

    #[test]
    fn empty_transaction_commits() {
        let mut tx: Transaction<String> = Transaction::default();
        tx.commit(Arc::new(String::new())).unwrap();
    }
}
