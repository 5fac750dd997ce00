//! SeaORM entity models
//!
//! Database entities for the ConvoForge relational store. The relational
//! store is the source of truth; everything in the vector namespace is
//! derived from these rows.

mod attachment;
mod channel;
mod dead_letter_job;
mod document_chunk;
mod guild;
mod job;
mod message;
mod message_session;
mod user;

pub use guild::{
    ActiveModel as GuildActiveModel, Column as GuildColumn, Entity as GuildEntity, Model as Guild,
};

pub use channel::{
    ActiveModel as ChannelActiveModel, Column as ChannelColumn, Entity as ChannelEntity,
    Model as Channel,
};

pub use user::{
    ActiveModel as UserActiveModel, Column as UserColumn, Entity as UserEntity, Model as User,
};

pub use message::{
    ActiveModel as MessageActiveModel, Column as MessageColumn, Entity as MessageEntity,
    Model as Message, DELETED_CONTENT,
};

pub use attachment::{
    ActiveModel as AttachmentActiveModel, Column as AttachmentColumn, Entity as AttachmentEntity,
    Model as Attachment, ProcessingStatus, SourceType,
};

pub use document_chunk::{
    ActiveModel as DocumentChunkActiveModel, Column as DocumentChunkColumn,
    Entity as DocumentChunkEntity, Model as DocumentChunk,
};

pub use message_session::{
    ActiveModel as MessageSessionActiveModel, Column as MessageSessionColumn,
    Entity as MessageSessionEntity, Model as MessageSession,
};

pub use job::{
    ActiveModel as JobActiveModel, Column as JobColumn, Entity as JobEntity, JobStatus,
    Model as Job,
};

pub use dead_letter_job::{
    ActiveModel as DeadLetterJobActiveModel, Column as DeadLetterJobColumn,
    Entity as DeadLetterJobEntity, Model as DeadLetterJob,
};
