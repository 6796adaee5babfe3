// Entity Models
// "Identity persists, values change"
//
// - Individual: UUID identity, minted once, never deleted
// - Address: content-derived identity (hash of canonical key), geocode never regresses
// - Link: individual ↔ address with role and validity interval

pub mod address;
pub mod individual;
pub mod link;

pub use address::{address_id, Address, AddressStore, Geocode, GeocodePolicy, GeocodeStats};
pub use individual::{Individual, IndividualStore};
pub use link::{IndividualAddressLink, LinkRole, LinkStore};
