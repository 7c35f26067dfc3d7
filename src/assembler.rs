//! Turns raw register batches into a typed snapshot.
//!
//! [`assemble`] is a pure function of its input: the transport client collects
//! [`RawBatches`], the assembler decodes them through the register map and derives the
//! device metadata and the second circuit flag from what was read.

use crate::{
    protocol::{self as proto, Quantity},
    register_map::{BatchGroup, Field},
};
use std::{collections::BTreeMap, fmt};

/// Raw registers per batch group, as read during one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBatches {
    groups: BTreeMap<BatchGroup, Vec<u16>>,
    /// Result of the second circuit presence check, `None` if that read failed.
    pub second_circuit: Option<bool>,
}

impl RawBatches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, group: BatchGroup, registers: Vec<u16>) {
        self.groups.insert(group, registers);
    }

    pub fn get(&self, group: BatchGroup) -> Option<&[u16]> {
        self.groups.get(&group).map(Vec::as_slice)
    }

    pub fn contains(&self, group: BatchGroup) -> bool {
        self.groups.contains_key(&group)
    }

    pub fn iter(&self) -> impl Iterator<Item = (BatchGroup, &[u16])> {
        self.groups
            .iter()
            .map(|(group, registers)| (*group, registers.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Batch-name keyed view, e.g. `"ch1_settings" -> [...]`, plus the presence flag.
    pub fn to_named(&self) -> NamedBatches {
        NamedBatches {
            batches: self
                .groups
                .iter()
                .map(|(group, registers)| (group.name(), registers.clone()))
                .collect(),
            ch2_available: self.second_circuit,
        }
    }
}

/// Raw batches keyed by batch name. `ch2_available` is left out when the presence read failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct NamedBatches {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub batches: BTreeMap<&'static str, Vec<u16>>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub ch2_available: Option<bool>,
}

/// Identity of the controller, decoded from the device info block.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceMetadata {
    pub serial_number: String,
    pub hardware_version: String,
    pub firmware_version: String,
    pub mac_address: String,
}

impl DeviceMetadata {
    /// Decodes the device info block. Returns `None` if fewer than 11 registers are given.
    ///
    /// Layout: serial (2 registers, high word first), 2 reserved, hardware version
    /// (packed major.minor, patch), MAC (3 registers), firmware version (packed
    /// major.minor, patch).
    pub fn decode(registers: &[u16]) -> Option<Self> {
        let regs: &[u16; 11] = registers
            .get(..BatchGroup::DeviceInfo.required_len())?
            .try_into()
            .ok()?;
        Some(Self {
            serial_number: proto::decode_uint32(regs[0], regs[1]).to_string(),
            hardware_version: proto::decode_version(regs[4], regs[5]),
            mac_address: proto::decode_mac(regs[6], regs[7], regs[8]),
            firmware_version: proto::decode_version(regs[9], regs[10]),
        })
    }
}

impl fmt::Display for DeviceMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Serial number:    {}", self.serial_number)?;
        writeln!(f, "Hardware version: {}", self.hardware_version)?;
        writeln!(f, "Firmware version: {}", self.firmware_version)?;
        write!(f, "MAC address:      {}", self.mac_address)
    }
}

/// Named physical values of one poll. Fields of unavailable groups are absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    values: BTreeMap<Field, Quantity>,
}

impl Snapshot {
    pub fn get(&self, field: Field) -> Option<&Quantity> {
        self.values.get(&field)
    }

    /// The decoded value, or the field's declared fallback if it was not read.
    pub fn value_or_fallback(&self, field: Field) -> Option<Quantity> {
        self.get(field)
            .cloned()
            .or_else(|| field.descriptor().ok()?.fallback())
    }

    pub fn contains(&self, field: Field) -> bool {
        self.values.contains_key(&field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &Quantity)> {
        self.values.iter().map(|(field, value)| (*field, value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(Field, Quantity)> for Snapshot {
    fn from_iter<T: IntoIterator<Item = (Field, Quantity)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Snapshot {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (field, value) in &self.values {
            map.serialize_entry(&field.to_string(), value)?;
        }
        map.end()
    }
}

/// Output of [`assemble`].
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Decoded {
    pub snapshot: Snapshot,
    pub metadata: Option<DeviceMetadata>,
    pub has_second_circuit: bool,
}

/// Decodes every batch through its group routine.
///
/// The second circuit flag is taken from the presence check recorded by the transport
/// client; a failed presence read counts as absent.
pub fn assemble(raw: &RawBatches) -> Decoded {
    let metadata = raw
        .get(BatchGroup::DeviceInfo)
        .and_then(DeviceMetadata::decode);
    let snapshot = raw
        .iter()
        .flat_map(|(group, registers)| group.decode(registers))
        .collect();
    Decoded {
        snapshot,
        metadata,
        has_second_circuit: raw.second_circuit.unwrap_or(false),
    }
}
