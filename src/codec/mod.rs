//! Payload encoding for outbound data and config uploads

pub mod batcher;
pub mod config_payload;

pub use batcher::{encode_tag_data, encode_tag_data_in, MAX_TAGS_PER_BATCH};
pub use config_payload::{render_config, DeviceTree, NodeTree, TagTree};
