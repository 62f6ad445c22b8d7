pub mod broadcast;
pub mod discovery;
pub mod registry;

pub use broadcast::{BroadcastReport, PACKET_LEN, PacketBroadcaster, decode_packet, encode_packet};
pub use discovery::{DiscoveryDriver, DiscoveryEvent, DiscoveryListener, DiscoveryToggle};
pub use registry::{ENDPOINT_CAPACITY, EndpointRegistry, EndpointSlot, EndpointSlots};
