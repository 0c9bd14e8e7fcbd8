pub mod machine_identification;
pub mod pellet;

pub use machine_identification::{MachineIdentification, MachineIdentificationUnique};

/// Vendor id of our own machines.
pub const VENDOR: u16 = 1;

/// Machine id of the pellet machine (inverter-driven, with laser diameter measurement).
pub const MACHINE_PELLET: u16 = 6;
