use std::fmt::{Display, Formatter};

/// Identifies a machine model, vendor-scoped.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MachineIdentification {
    pub vendor: u16,
    pub machine: u16,
}

impl MachineIdentification {
    pub const fn new(vendor: u16, machine: u16) -> Self {
        Self {
            vendor,
            machine,
        }
    }
}

impl Display for MachineIdentification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.vendor, self.machine)
    }
}

/// Identifies one physical machine: model plus serial number.
///
/// Commands are routed by this; every connected machine has exactly one.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MachineIdentificationUnique {
    pub machine_identification: MachineIdentification,
    pub serial: u32,
}

impl MachineIdentificationUnique {
    pub const fn new(machine_identification: MachineIdentification, serial: u32) -> Self {
        Self {
            machine_identification,
            serial,
        }
    }
}

impl Display for MachineIdentificationUnique {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.machine_identification, self.serial)
    }
}
