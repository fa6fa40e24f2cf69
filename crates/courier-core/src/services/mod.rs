pub mod pickups;
pub mod support;

pub use pickups::{NewPickupRequest, PackageType, PickupRequest, PickupService};
pub use support::{SupportReceipt, SupportRequest, SupportService};
