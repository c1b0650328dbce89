//! Error types for eventgallery.
//!
//! Each subsystem has its own error enum so callers can tell a rejected
//! mutation apart from an I/O failure or an optimistic-concurrency conflict.
//!
//! # Error Categories
//!
//! - **GalleryError**: domain validation of gallery mutations
//! - **EventStoreError**: persistence failures, including version conflicts
//! - **StorageError** / **EncodeError** / **PipelineError** / **UploadError**:
//!   content storage and image processing failures
//! - **ProcessorError** / **ApplyError**: post-processing a single stack
//! - **DispatchError**: failures reported on the dispatcher's error channel
//! - **CommandError**: command handling through the executor
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use eventgallery::errors::GalleryError;
//!
//! match gallery.new_stack(stack_id, image) {
//!     Ok(stack) => println!("created {}", stack.id),
//!     Err(GalleryError::DuplicateId { id }) => println!("{id} already exists"),
//!     Err(e) => return Err(e.into()),
//! }
//! ```

use crate::types::{AggregateRef, AggregateVersion};
use thiserror::Error;

/// Validation errors returned by gallery mutations.
///
/// A mutation that fails with a `GalleryError` leaves the gallery unchanged
/// and never records an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GalleryError {
    /// A stack or variant id was empty.
    #[error("empty id")]
    EmptyId,

    /// The id is already in use.
    #[error("duplicate id: {id}")]
    DuplicateId {
        /// The conflicting id.
        id: String,
    },

    /// No stack with the given id exists in the gallery.
    #[error("stack not found: {id}")]
    StackNotFound {
        /// The missing stack id.
        id: String,
    },

    /// No variant with the given id exists in the stack.
    #[error("variant {variant} not found in stack {stack}")]
    VariantNotFound {
        /// The stack that was searched.
        stack: String,
        /// The missing variant id.
        variant: String,
    },
}

impl GalleryError {
    pub(crate) fn duplicate(id: &impl std::fmt::Display) -> Self {
        Self::DuplicateId { id: id.to_string() }
    }

    pub(crate) fn stack_not_found(id: &impl std::fmt::Display) -> Self {
        Self::StackNotFound { id: id.to_string() }
    }

    pub(crate) fn variant_not_found(
        stack: &impl std::fmt::Display,
        variant: &impl std::fmt::Display,
    ) -> Self {
        Self::VariantNotFound {
            stack: stack.to_string(),
            variant: variant.to_string(),
        }
    }
}

/// Errors that can occur when interacting with the event store.
///
/// # Retry Strategy
///
/// Only [`EventStoreError::VersionConflict`] is worth retrying: the aggregate
/// was modified since it was fetched, so fetching it again and re-running the
/// mutation may succeed. Use [`EventStoreError::is_concurrency_conflict`] to
/// decide.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream's version differs from the one the writer expected.
    #[error("version conflict on {aggregate}: expected {expected}, current {current}")]
    VersionConflict {
        /// The aggregate being written.
        aggregate: AggregateRef,
        /// The version the writer based its changes on.
        expected: AggregateVersion,
        /// The version found in the store.
        current: AggregateVersion,
    },

    /// The store cannot be reached or has been shut down.
    #[error("event store unavailable: {0}")]
    Unavailable(String),

    /// An unexpected internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EventStoreError {
    /// Whether this error signals an optimistic-concurrency conflict.
    pub const fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

/// Errors raised by a content storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Nothing is stored at the path.
    #[error("file not found: {path}")]
    NotFound {
        /// The requested path.
        path: String,
    },
}

/// Errors raised while encoding an image.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// No encoder is registered for the content type.
    #[error("no encoder for content type {content_type:?}")]
    MissingEncoder {
        /// The requested content type.
        content_type: String,
    },

    /// The encoder failed.
    #[error("encode {content_type} image")]
    Image {
        /// The requested content type.
        content_type: String,
        /// Underlying error.
        #[source]
        source: image::ImageError,
    },
}

/// Errors raised by an image pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The pipeline configuration cannot be applied to the image.
    #[error("invalid pipeline: {0}")]
    Invalid(String),

    /// The blocking task running the pipeline panicked or was cancelled.
    #[error("pipeline task failed")]
    Task(#[from] tokio::task::JoinError),
}

/// Errors raised by the [`Uploader`](crate::upload::Uploader).
#[derive(Debug, Error)]
pub enum UploadError {
    /// The file name of a new upload was empty.
    #[error("empty filename")]
    EmptyFilename,

    /// The gallery rejected the upload.
    #[error(transparent)]
    Gallery(#[from] GalleryError),

    /// The uploaded bytes are not a decodable image.
    #[error("read image dimensions")]
    Decode(#[source] image::ImageError),

    /// Storing the bytes failed.
    #[error("store image at {path}")]
    Storage {
        /// Target path.
        path: String,
        /// Underlying error.
        #[source]
        source: StorageError,
    },
}

/// Errors raised while post-processing a stack.
///
/// Any of these aborts processing of the stack as a whole; the processor
/// never returns a partial variant list.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// The stack does not exist in the gallery.
    #[error(transparent)]
    Gallery(#[from] GalleryError),

    /// The stack has no original variant to process.
    #[error("stack {stack} has no original variant")]
    MissingOriginal {
        /// The stack id.
        stack: String,
    },

    /// Fetching the original from storage failed.
    #[error("fetch original from storage")]
    Storage(#[source] StorageError),

    /// The original could not be decoded.
    #[error("decode original {path}")]
    Decode {
        /// Storage path of the original.
        path: String,
        /// Underlying error.
        #[source]
        source: image::ImageError,
    },

    /// The pipeline failed.
    #[error("run pipeline")]
    Pipeline(#[from] PipelineError),

    /// Re-encoding a pipeline output failed.
    #[error("encode processed image")]
    Encode(#[from] EncodeError),

    /// Uploading a pipeline output failed.
    #[error("upload processed image")]
    Upload(#[from] UploadError),
}

/// Errors raised while applying a processor result to a gallery.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The result targets a different aggregate.
    #[error("result for {expected} cannot be applied to {actual}")]
    AggregateMismatch {
        /// Aggregate the result was produced for.
        expected: AggregateRef,
        /// Aggregate it was applied to.
        actual: AggregateRef,
    },

    /// A gallery mutation failed.
    #[error(transparent)]
    Gallery(#[from] GalleryError),
}

/// Errors surfaced on the dispatcher's error channel.
///
/// Each failed trigger event produces at most one `DispatchError`; the worker
/// that hit it continues with the next event.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Subscribing to the trigger events failed.
    #[error("subscribe to trigger events")]
    Subscribe(#[source] EventStoreError),

    /// The subscription reported an error.
    #[error("subscription")]
    Subscription(#[source] EventStoreError),

    /// Fetching the gallery failed.
    #[error("fetch gallery {aggregate}")]
    Fetch {
        /// The gallery being fetched.
        aggregate: AggregateRef,
        /// Underlying error.
        #[source]
        source: EventStoreError,
    },

    /// Processing the stack failed.
    #[error("process stack {stack} of {aggregate}")]
    Process {
        /// The gallery.
        aggregate: AggregateRef,
        /// The stack id.
        stack: String,
        /// Underlying error.
        #[source]
        source: ProcessorError,
    },

    /// Applying the result failed.
    #[error("apply result to {aggregate}")]
    Apply {
        /// The gallery.
        aggregate: AggregateRef,
        /// Underlying error.
        #[source]
        source: ApplyError,
    },

    /// Saving the gallery failed with a non-retryable error.
    #[error("save gallery {aggregate}")]
    Save {
        /// The gallery.
        aggregate: AggregateRef,
        /// Underlying error.
        #[source]
        source: EventStoreError,
    },

    /// Every save attempt hit a concurrency conflict.
    #[error("save gallery {aggregate}: still conflicting after {attempts} attempts")]
    ConcurrencyRetriesExhausted {
        /// The gallery.
        aggregate: AggregateRef,
        /// Number of attempts made.
        attempts: u32,
        /// The conflict returned by the last attempt.
        #[source]
        last: EventStoreError,
    },
}

/// Errors that can occur while executing a gallery command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command was rejected by the gallery.
    #[error(transparent)]
    Gallery(#[from] GalleryError),

    /// Loading or saving the gallery failed.
    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    /// Concurrency conflicts persisted through every retry.
    #[error("command {command} on {aggregate} gave up after {attempts} attempts")]
    RetriesExhausted {
        /// Name of the command.
        command: &'static str,
        /// The gallery.
        aggregate: AggregateRef,
        /// Number of attempts made.
        attempts: u32,
    },
}

/// Result type for gallery mutations.
pub type GalleryResult<T> = Result<T, GalleryError>;

/// Result type for event store operations.
pub type EventStoreResult<T> = Result<T, EventStoreError>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for command execution.
pub type CommandResult<T> = Result<T, CommandError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn version_conflict_is_a_concurrency_conflict() {
        let err = EventStoreError::VersionConflict {
            aggregate: AggregateRef::gallery(Uuid::nil()),
            expected: AggregateVersion::new(1),
            current: AggregateVersion::new(2),
        };
        assert!(err.is_concurrency_conflict());
        assert!(!EventStoreError::Unavailable("down".into()).is_concurrency_conflict());
    }

    #[test]
    fn gallery_errors_name_the_offending_ids() {
        assert_eq!(
            GalleryError::variant_not_found(&"s1", &"v9").to_string(),
            "variant v9 not found in stack s1"
        );
        assert_eq!(GalleryError::duplicate(&"s1").to_string(), "duplicate id: s1");
    }
}
