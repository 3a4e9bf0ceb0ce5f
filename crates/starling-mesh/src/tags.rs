//! Frame tags on the mesh backplane

/// Routing key of a mesh frame
pub type Tag = u32;

/// Frames replicated between nodes; the only tag nodes publish on
pub const TAG_INTER_NODE: Tag = 0x20;

/// Frames injected by backend services; dispatched like inter-node
/// traffic, never re-published
pub const TAG_BACKEND: Tag = 0x21;

/// The tags every realm observes on its inbound mesh stream
pub fn observed_tags() -> Vec<Tag> {
    vec![TAG_INTER_NODE, TAG_BACKEND]
}
