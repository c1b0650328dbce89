//! Gallery commands and their executor.
//!
//! A [`GalleryCommand`] names one wrapper mutation. The [`CommandExecutor`]
//! runs it against a freshly fetched aggregate, saves the result and retries
//! the whole cycle when the save hits a concurrency conflict.

use crate::aggregate::GalleryAggregate;
use crate::config::RetryConfig;
use crate::errors::{CommandError, CommandResult, GalleryResult};
use crate::model::{Id, Variant};
use crate::store::{GalleryFetcher, GallerySaver};
use crate::types::AggregateRef;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// Every kind of gallery command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Create a stack.
    AddStack,
    /// Remove a stack.
    RemoveStack,
    /// Remove the non-original variants of a stack.
    ClearStack,
    /// Add several variants.
    AddVariants,
    /// Add one variant.
    AddVariant,
    /// Remove a variant.
    RemoveVariant,
    /// Replace a variant.
    ReplaceVariant,
    /// Tag a stack.
    TagStack,
    /// Untag a stack.
    UntagStack,
    /// Reorder stacks.
    Sort,
    /// Remove all stacks.
    Clear,
}

impl CommandKind {
    /// Every command kind.
    pub const ALL: [Self; 11] = [
        Self::AddStack,
        Self::RemoveStack,
        Self::ClearStack,
        Self::AddVariants,
        Self::AddVariant,
        Self::RemoveVariant,
        Self::ReplaceVariant,
        Self::TagStack,
        Self::UntagStack,
        Self::Sort,
        Self::Clear,
    ];

    /// The stable name of this kind, also used as the serialized tag of
    /// [`GalleryCommand`].
    pub const fn name(self) -> &'static str {
        match self {
            Self::AddStack => "gallery.add_stack",
            Self::RemoveStack => "gallery.remove_stack",
            Self::ClearStack => "gallery.clear_stack",
            Self::AddVariants => "gallery.add_variants",
            Self::AddVariant => "gallery.add_variant",
            Self::RemoveVariant => "gallery.remove_variant",
            Self::ReplaceVariant => "gallery.replace_variant",
            Self::TagStack => "gallery.tag_stack",
            Self::UntagStack => "gallery.untag_stack",
            Self::Sort => "gallery.sort",
            Self::Clear => "gallery.clear",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A request to mutate a gallery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum GalleryCommand<S, I> {
    /// Create a stack with the given original.
    #[serde(rename = "gallery.add_stack")]
    AddStack {
        /// New stack id.
        stack_id: S,
        /// The original image.
        original: Variant<I>,
    },
    /// Remove a stack.
    #[serde(rename = "gallery.remove_stack")]
    RemoveStack {
        /// Stack id.
        stack_id: S,
    },
    /// Remove the non-original variants of a stack.
    #[serde(rename = "gallery.clear_stack")]
    ClearStack {
        /// Stack id.
        stack_id: S,
    },
    /// Add several variants.
    #[serde(rename = "gallery.add_variants")]
    AddVariants {
        /// Stack id.
        stack_id: S,
        /// The variants.
        variants: Vec<Variant<I>>,
    },
    /// Add one variant.
    #[serde(rename = "gallery.add_variant")]
    AddVariant {
        /// Stack id.
        stack_id: S,
        /// The variant.
        variant: Variant<I>,
    },
    /// Remove a variant.
    #[serde(rename = "gallery.remove_variant")]
    RemoveVariant {
        /// Stack id.
        stack_id: S,
        /// Variant id.
        variant_id: I,
    },
    /// Replace a variant.
    #[serde(rename = "gallery.replace_variant")]
    ReplaceVariant {
        /// Stack id.
        stack_id: S,
        /// The replacement.
        variant: Variant<I>,
    },
    /// Tag a stack.
    #[serde(rename = "gallery.tag_stack")]
    TagStack {
        /// Stack id.
        stack_id: S,
        /// Tags to add.
        tags: Vec<String>,
    },
    /// Untag a stack.
    #[serde(rename = "gallery.untag_stack")]
    UntagStack {
        /// Stack id.
        stack_id: S,
        /// Tags to remove.
        tags: Vec<String>,
    },
    /// Reorder stacks.
    #[serde(rename = "gallery.sort")]
    Sort {
        /// Stack ids to move to the front.
        order: Vec<S>,
    },
    /// Remove all stacks.
    #[serde(rename = "gallery.clear")]
    Clear,
}

impl<S: Id, I: Id> GalleryCommand<S, I> {
    /// The kind of this command.
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::AddStack { .. } => CommandKind::AddStack,
            Self::RemoveStack { .. } => CommandKind::RemoveStack,
            Self::ClearStack { .. } => CommandKind::ClearStack,
            Self::AddVariants { .. } => CommandKind::AddVariants,
            Self::AddVariant { .. } => CommandKind::AddVariant,
            Self::RemoveVariant { .. } => CommandKind::RemoveVariant,
            Self::ReplaceVariant { .. } => CommandKind::ReplaceVariant,
            Self::TagStack { .. } => CommandKind::TagStack,
            Self::UntagStack { .. } => CommandKind::UntagStack,
            Self::Sort { .. } => CommandKind::Sort,
            Self::Clear => CommandKind::Clear,
        }
    }

    /// Runs the matching mutation on `gallery`.
    pub fn handle(&self, gallery: &mut GalleryAggregate<S, I>) -> GalleryResult<()> {
        match self.clone() {
            Self::AddStack { stack_id, original } => {
                gallery.new_stack(stack_id, original).map(drop)
            }
            Self::RemoveStack { stack_id } => gallery.remove_stack(&stack_id).map(drop),
            Self::ClearStack { stack_id } => gallery.clear_stack(&stack_id).map(drop),
            Self::AddVariants { stack_id, variants } => {
                gallery.add_variants(&stack_id, variants).map(drop)
            }
            Self::AddVariant { stack_id, variant } => {
                gallery.add_variant(&stack_id, variant).map(drop)
            }
            Self::RemoveVariant {
                stack_id,
                variant_id,
            } => gallery.remove_variant(&stack_id, &variant_id).map(drop),
            Self::ReplaceVariant { stack_id, variant } => {
                gallery.replace_variant(&stack_id, variant).map(drop)
            }
            Self::TagStack { stack_id, tags } => gallery.tag(&stack_id, tags).map(drop),
            Self::UntagStack { stack_id, tags } => gallery.untag(&stack_id, tags).map(drop),
            Self::Sort { order } => gallery.sort(&order),
            Self::Clear => gallery.clear(),
        }
    }
}

/// Executes commands against galleries loaded from a repository.
#[derive(Debug, Clone)]
pub struct CommandExecutor<R> {
    repository: R,
    retry_config: RetryConfig,
}

impl<R> CommandExecutor<R> {
    /// Creates an executor with the default retry configuration.
    pub fn new(repository: R) -> Self {
        Self::with_retry_config(repository, RetryConfig::default())
    }

    /// Creates an executor with a custom retry configuration.
    pub const fn with_retry_config(repository: R, retry_config: RetryConfig) -> Self {
        Self {
            repository,
            retry_config,
        }
    }

    /// The retry configuration.
    pub const fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }

    /// Fetches the gallery, handles `command`, and saves the result.
    ///
    /// Concurrency conflicts on save restart the cycle from a fresh fetch, up
    /// to `max_attempts` times with exponential backoff between attempts.
    /// Rejected commands and other store errors are returned immediately.
    #[instrument(
        skip(self, command),
        fields(aggregate = %aggregate, command = %command.kind())
    )]
    pub async fn execute<S, I>(
        &self,
        aggregate: &AggregateRef,
        command: &GalleryCommand<S, I>,
    ) -> CommandResult<GalleryAggregate<S, I>>
    where
        S: Id,
        I: Id,
        R: GalleryFetcher<GalleryAggregate<S, I>> + GallerySaver<GalleryAggregate<S, I>>,
    {
        let max_attempts = self.retry_config.max_attempts.max(1);
        for attempt in 0..max_attempts {
            let mut gallery = self.repository.fetch(aggregate).await?;
            command.handle(&mut gallery)?;

            match self.repository.save(&mut gallery).await {
                Ok(()) => {
                    debug!(attempt, "command executed");
                    return Ok(gallery);
                }
                Err(err) if err.is_concurrency_conflict() && attempt + 1 < max_attempts => {
                    let delay = self.retry_config.delay_for(attempt);
                    warn!(attempt, ?delay, %err, "concurrency conflict, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_concurrency_conflict() => break,
                Err(err) => return Err(err.into()),
            }
        }

        Err(CommandError::RetriesExhausted {
            command: command.kind().name(),
            aggregate: aggregate.clone(),
            attempts: max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Image;
    use uuid::Uuid;

    type Command = GalleryCommand<String, String>;

    #[test]
    fn handle_runs_the_matching_mutation() {
        let mut gallery = GalleryAggregate::new(Uuid::new_v4());
        let commands = [
            Command::AddStack {
                stack_id: "s1".into(),
                original: Variant::new("orig".into(), Image::default()),
            },
            Command::AddVariant {
                stack_id: "s1".into(),
                variant: Variant::new("sm".into(), Image::default()),
            },
            Command::TagStack {
                stack_id: "s1".into(),
                tags: vec!["a".into(), "b".into()],
            },
            Command::UntagStack {
                stack_id: "s1".into(),
                tags: vec!["a".into()],
            },
        ];
        for command in &commands {
            command.handle(&mut gallery).unwrap();
        }

        let stack = gallery.stack(&"s1".into()).unwrap();
        assert_eq!(stack.variants.len(), 2);
        assert!(stack.tags.contains("b"));
        assert!(!stack.tags.contains("a"));
        assert_eq!(gallery.changes().len(), 4);
    }

    #[test]
    fn rejected_commands_surface_the_gallery_error() {
        let mut gallery = GalleryAggregate::<String, String>::new(Uuid::new_v4());
        let result = Command::RemoveStack {
            stack_id: "missing".into(),
        }
        .handle(&mut gallery);
        assert!(result.is_err());
        assert!(gallery.changes().is_empty());
    }

    fn sample(kind: CommandKind) -> Command {
        let stack_id = "s1".to_string();
        let variant = Variant::new("v1".to_string(), Image::default());
        match kind {
            CommandKind::AddStack => Command::AddStack {
                stack_id,
                original: variant,
            },
            CommandKind::RemoveStack => Command::RemoveStack { stack_id },
            CommandKind::ClearStack => Command::ClearStack { stack_id },
            CommandKind::AddVariants => Command::AddVariants {
                stack_id,
                variants: vec![variant],
            },
            CommandKind::AddVariant => Command::AddVariant { stack_id, variant },
            CommandKind::RemoveVariant => Command::RemoveVariant {
                stack_id,
                variant_id: "v1".into(),
            },
            CommandKind::ReplaceVariant => Command::ReplaceVariant { stack_id, variant },
            CommandKind::TagStack => Command::TagStack {
                stack_id,
                tags: vec!["a".into()],
            },
            CommandKind::UntagStack => Command::UntagStack {
                stack_id,
                tags: vec!["a".into()],
            },
            CommandKind::Sort => Command::Sort {
                order: vec![stack_id],
            },
            CommandKind::Clear => Command::Clear,
        }
    }

    #[test]
    fn serialized_command_tag_matches_the_kind_name() {
        for kind in CommandKind::ALL {
            let command = sample(kind);
            assert_eq!(command.kind(), kind);

            let json = serde_json::to_value(&command).unwrap();
            assert_eq!(json["command"], kind.name());

            let back: Command = serde_json::from_value(json).unwrap();
            assert_eq!(back, command);
        }
    }
}
