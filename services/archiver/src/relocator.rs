use crate::storage::{ObjectLocator, ObjectStorage, StorageError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Failures of a move, by the step that failed
#[derive(Error, Debug)]
pub enum RelocationError {
    /// Nothing was written; the source is untouched
    #[error("failed to copy object to destination: {0}")]
    Copy(#[source] StorageError),

    /// The copy was acknowledged but never confirmed; the source is untouched
    #[error("object was not available at the destination after copying: {0}")]
    Confirm(#[source] StorageError),

    /// Destination confirmed but the source survived: the object now exists twice
    #[error("failed to delete original object after copying: {0}")]
    Delete(#[source] StorageError),
}

impl RelocationError {
    /// Short stage name used in logs and metric labels
    pub fn stage(&self) -> &'static str {
        match self {
            RelocationError::Copy(_) => "copy",
            RelocationError::Confirm(_) => "confirm",
            RelocationError::Delete(_) => "delete",
        }
    }

    /// True when both the source and a confirmed copy remain and need reconciling
    pub fn leaves_duplicate(&self) -> bool {
        matches!(self, RelocationError::Delete(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationOutcome {
    Moved,
    /// Source and destination were the same object
    Unchanged,
}

/// Moves objects within a backend with copy, confirm, delete
pub struct Relocator {
    storage: Arc<dyn ObjectStorage>,
    storage_class: Option<String>,
}

impl Relocator {
    pub fn new(storage: Arc<dyn ObjectStorage>, storage_class: Option<String>) -> Self {
        Self {
            storage,
            storage_class,
        }
    }

    /// Move `source` to `destination`.
    ///
    /// Each step runs only after the previous one succeeded, so the source is
    /// deleted only once the destination is confirmed.
    #[instrument(skip(self), fields(source = %source, destination = %destination))]
    pub async fn relocate(
        &self,
        source: &ObjectLocator,
        destination: &ObjectLocator,
    ) -> Result<RelocationOutcome, RelocationError> {
        if source == destination {
            debug!("Source and destination are identical, nothing to move");
            return Ok(RelocationOutcome::Unchanged);
        }

        self.storage
            .copy_object(source, destination, self.storage_class.as_deref())
            .await
            .map_err(RelocationError::Copy)?;

        self.storage
            .wait_until_exists(destination)
            .await
            .map_err(RelocationError::Confirm)?;

        self.storage
            .delete_object(source)
            .await
            .map_err(RelocationError::Delete)?;

        info!("Object relocated");
        Ok(RelocationOutcome::Moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::MemoryStorage;
    use crate::storage::Operation;

    fn setup(destination_key: &str) -> (Arc<MemoryStorage>, Relocator, ObjectLocator, ObjectLocator) {
        let storage = Arc::new(MemoryStorage::new());
        let source = ObjectLocator::new("bucket", "import/img.jpg");
        let destination = ObjectLocator::new("bucket", destination_key);
        storage.insert(source.clone(), Some("image/jpeg"), vec![1u8, 2, 3]);
        let relocator = Relocator::new(storage.clone(), Some("STANDARD_IA".to_string()));
        (storage, relocator, source, destination)
    }

    #[tokio::test]
    async fn test_same_locator_is_noop() {
        let (storage, relocator, source, _) = setup("unused");

        let outcome = relocator.relocate(&source, &source.clone()).await.unwrap();

        assert_eq!(outcome, RelocationOutcome::Unchanged);
        assert!(storage.calls().is_empty());
        assert!(storage.contains(&source));
    }

    #[tokio::test]
    async fn test_successful_move() {
        let (storage, relocator, source, destination) = setup("photos/2020/12/23/img.jpg");

        let outcome = relocator.relocate(&source, &destination).await.unwrap();

        assert_eq!(outcome, RelocationOutcome::Moved);
        assert!(!storage.contains(&source));
        assert!(storage.contains(&destination));
        let operations: Vec<_> = storage.calls().into_iter().map(|(op, _)| op).collect();
        assert_eq!(
            operations,
            vec![Operation::Copy, Operation::WaitExists, Operation::Delete]
        );
    }

    #[tokio::test]
    async fn test_copy_failure_stops_early() {
        let (storage, relocator, source, destination) = setup("case1");
        storage.fail_on(Operation::Copy, "case1");

        let err = relocator.relocate(&source, &destination).await.unwrap_err();

        assert!(matches!(err, RelocationError::Copy(_)));
        assert_eq!(err.stage(), "copy");
        assert!(!err.leaves_duplicate());
        assert!(storage.contains(&source));
        assert!(!storage.contains(&destination));
        assert_eq!(storage.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_confirm_failure_keeps_source() {
        let (storage, relocator, source, destination) = setup("case2");
        storage.fail_on(Operation::WaitExists, "case2");

        let err = relocator.relocate(&source, &destination).await.unwrap_err();

        assert!(matches!(err, RelocationError::Confirm(_)));
        assert_eq!(err.stage(), "confirm");
        assert!(storage.contains(&source));
        assert!(!storage
            .calls()
            .iter()
            .any(|(op, _)| *op == Operation::Delete));
    }

    #[tokio::test]
    async fn test_delete_failure_flags_duplicate() {
        let (storage, relocator, source, destination) = setup("photos/case3.jpg");
        storage.fail_on(Operation::Delete, "import/img.jpg");

        let err = relocator.relocate(&source, &destination).await.unwrap_err();

        assert!(matches!(err, RelocationError::Delete(_)));
        assert_eq!(err.stage(), "delete");
        assert!(err.leaves_duplicate());
        assert!(storage.contains(&source));
        assert!(storage.contains(&destination));
    }
}
