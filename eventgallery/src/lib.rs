//! `eventgallery` - event-sourced image galleries
//!
//! A gallery is an ordered list of stacks. Each stack groups variants of one
//! picture: exactly one original plus any number of derived renditions.
//!
//! The crate is layered:
//!
//! - [`gallery::Gallery`] is the plain in-memory model with validating
//!   mutators and a [`dry_run`](gallery::Gallery::dry_run) mode that checks an
//!   operation without committing it.
//! - [`aggregate::GalleryAggregate`] wraps the model, records one
//!   [`event::GalleryEvent`] per successful mutation and rebuilds itself by
//!   replaying those events.
//! - [`processor::Processor`] runs an image [`pipeline::Pipeline`] over a
//!   stack's original and uploads the renditions.
//! - [`dispatcher::PostProcessor`] subscribes to new stacks, processes them
//!   on a worker pool and optionally applies and saves the results, retrying
//!   on optimistic-concurrency conflicts.
//!
//! Persistence and content storage are ports ([`store::EventStore`],
//! [`store::EventBus`], [`storage::Storage`]); `eventgallery-memory`
//! implements them in memory.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregate;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod encoding;
pub mod errors;
pub mod event;
pub mod gallery;
pub mod model;
pub mod pipeline;
pub mod processor;
pub mod repository;
pub mod storage;
pub mod store;
pub mod types;
pub mod upload;

pub use aggregate::GalleryAggregate;
pub use command::{CommandExecutor, GalleryCommand};
pub use config::{DispatcherConfig, RetryConfig};
pub use dispatcher::{DispatcherHandle, PostProcessor, RunOptions};
pub use errors::{
    ApplyError, CommandError, DispatchError, EventStoreError, GalleryError, ProcessorError,
};
pub use event::{EventKind, GalleryEvent, StoredEvent};
pub use gallery::Gallery;
pub use model::{Id, Image, Stack, Tags, Variant, PROCESSED_TAG};
pub use processor::{ApplyOptions, ProcessableGallery, Processor, ProcessorResult};
pub use repository::GalleryRepository;
pub use types::{AggregateId, AggregateRef, AggregateVersion};
