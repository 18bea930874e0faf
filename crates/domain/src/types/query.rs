//! Active channel-list views tracked during sync.

use serde::{Deserialize, Serialize};

use super::ids::ChannelId;

/// Identity of an active channel-list view.
///
/// The filter itself lives in the excluded presentation layer; sync only
/// needs a stable identity to re-run the query and to log it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelListQuery {
    pub filter_hash: String,
    pub page_size: u32,
}

impl ChannelListQuery {
    pub const DEFAULT_PAGE_SIZE: u32 = 20;

    pub fn new(filter_hash: impl Into<String>) -> Self {
        Self { filter_hash: filter_hash.into(), page_size: Self::DEFAULT_PAGE_SIZE }
    }
}

/// Refreshed first page for a channel-list query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelPage {
    pub channel_ids: Vec<ChannelId>,
    #[serde(default)]
    pub payload: serde_json::Value,
}
