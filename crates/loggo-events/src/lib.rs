//! Channels, events and their storage for the Loggo event server.
//!
//! Implements channel records and resolution (by name and by topic), atomic
//! event persistence, paginated event reads, per-channel retention sweeps,
//! and the request-scoped batch loaders that keep query resolution from
//! re-fetching the same rows.
//!
//! All functions take a borrowed [`rusqlite::Connection`]; pooling and
//! threading are the caller's concern.

mod channel;
mod error;
mod event;
mod loader;
mod retention;

pub use channel::{
    channel_by_mqtt_topic, channel_by_name, channel_by_ntfy_topic, channels_by_ids,
    create_channel, delete_channel, ensure_channel, list_channels, Channel,
    CreateChannelParams,
};
pub use error::{LoadError, StoreError};
pub use event::{
    delete_events_before, events_by_ids, format_timestamp, get_event, get_event_data,
    insert_event, list_channel_events, list_source_events, Event, EventData, NewEvent,
    NewEventData, Page,
};
pub use loader::{BatchFn, ChannelBatch, EventBatch, Loader, Loaders};
pub use retention::{sweep_expired_events, SweepReport};
