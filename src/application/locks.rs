use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::AppError;

/// One exclusive lock per class name.
///
/// Writers touching the same class run one at a time; writers on different
/// classes never share a lock. Multi-class requests are acquired in sorted
/// order so two opposing moves cannot deadlock.
#[derive(Clone, Default)]
pub struct ClassLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

/// Locks held for the duration of a unit of work. Released on drop.
pub struct ClassGuard {
    classes: Vec<String>,
    guards: Vec<OwnedMutexGuard<()>>,
    locks: ClassLocks,
}

impl Drop for ClassGuard {
    fn drop(&mut self) {
        self.guards.clear();
        self.locks.prune(&self.classes);
    }
}

impl ClassGuard {
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn covers(&self, class_name: &str) -> bool {
        self.classes.iter().any(|c| c == class_name)
    }
}

impl ClassLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, class_name: &str) -> Arc<AsyncMutex<()>> {
        // The registry mutex is only held for the map lookup, never across an await
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(class_name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Forget class locks nobody holds or waits on.
    fn prune(&self, classes: &[String]) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        for class in classes {
            if locks.get(class).is_some_and(|l| Arc::strong_count(l) == 1) {
                locks.remove(class);
            }
        }
    }

    /// How many guards hold or await the lock of `class_name`.
    #[cfg(test)]
    pub(crate) fn holders(&self, class_name: &str) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .get(class_name)
            .map_or(0, |l| Arc::strong_count(l) - 1)
    }

    /// Acquire every named class lock, in lexicographic order, waiting at
    /// most `timeout` overall.
    pub async fn acquire<I, S>(&self, classes: I, timeout: Duration) -> Result<ClassGuard, AppError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ordered: BTreeSet<String> = classes
            .into_iter()
            .map(|c| c.as_ref().to_string())
            .collect();
        let classes: Vec<String> = ordered.into_iter().collect();

        let acquire_all = async {
            let mut guards = Vec::with_capacity(classes.len());
            for class in &classes {
                guards.push(self.lock_for(class).lock_owned().await);
                tracing::debug!(class = %class, "acquired class lock");
            }
            guards
        };

        let acquired = tokio::time::timeout(timeout, acquire_all).await;
        match acquired {
            Ok(guards) => Ok(ClassGuard {
                classes,
                guards,
                locks: self.clone(),
            }),
            Err(_) => {
                self.prune(&classes);
                Err(AppError::TransactionFailure(anyhow!(
                    "timed out after {:?} waiting for class lock(s) {:?}",
                    timeout,
                    classes
                )))
            }
        }
    }
}
