//! Register map of the Jablotron Volta controller.
//!
//! Every decoded value is a [`Field`] bound to a [`BatchGroup`] and a fixed index inside
//! that group's register block. The same descriptor table drives decoding after a read
//! and encoding before a write: a field's register address is always the group's base
//! address plus the field index, gaps in the device layout included.
//!
//! [`READ_PLAN`] lists the wire reads that produce the group blocks.

use crate::protocol::{self as proto, Error, Quantity, Resolution};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Heating circuit. The second circuit is optional hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Circuit {
    One,
    Two,
}

impl Circuit {
    pub const ALL: [Circuit; 2] = [Circuit::One, Circuit::Two];

    pub const fn number(self) -> u8 {
        match self {
            Circuit::One => 1,
            Circuit::Two => 2,
        }
    }

    /// Distance between the register blocks of the two circuits.
    const fn offset(self) -> u16 {
        match self {
            Circuit::One => 0,
            Circuit::Two => 100,
        }
    }
}

impl fmt::Display for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.number())
    }
}

/// Modbus register class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterType {
    /// Read-only telemetry.
    Input,
    /// Configuration and control.
    Holding,
}

impl fmt::Display for RegisterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterType::Input => write!(f, "input"),
            RegisterType::Holding => write!(f, "holding"),
        }
    }
}

/// A named register block fetched as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BatchGroup {
    DeviceInfo,
    NetworkInfo,
    SystemStatus,
    Regulation,
    BoilerStatus,
    DhwStatus,
    ChStatus(Circuit),
    SystemAlerts,
    RegulationSettings,
    BoilerSettings,
    DhwSettings,
    ChSettings(Circuit),
    SystemControl,
}

impl BatchGroup {
    pub const ALL: [BatchGroup; 15] = [
        BatchGroup::DeviceInfo,
        BatchGroup::NetworkInfo,
        BatchGroup::SystemStatus,
        BatchGroup::Regulation,
        BatchGroup::BoilerStatus,
        BatchGroup::DhwStatus,
        BatchGroup::ChStatus(Circuit::One),
        BatchGroup::ChStatus(Circuit::Two),
        BatchGroup::SystemAlerts,
        BatchGroup::RegulationSettings,
        BatchGroup::BoilerSettings,
        BatchGroup::DhwSettings,
        BatchGroup::ChSettings(Circuit::One),
        BatchGroup::ChSettings(Circuit::Two),
        BatchGroup::SystemControl,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            BatchGroup::DeviceInfo => "device_info",
            BatchGroup::NetworkInfo => "network_info",
            BatchGroup::SystemStatus => "system_status",
            BatchGroup::Regulation => "regulation",
            BatchGroup::BoilerStatus => "boiler_status",
            BatchGroup::DhwStatus => "dhw_status",
            BatchGroup::ChStatus(Circuit::One) => "ch1_status",
            BatchGroup::ChStatus(Circuit::Two) => "ch2_status",
            BatchGroup::SystemAlerts => "system_alerts",
            BatchGroup::RegulationSettings => "regulation_settings",
            BatchGroup::BoilerSettings => "boiler_settings",
            BatchGroup::DhwSettings => "dhw_settings",
            BatchGroup::ChSettings(Circuit::One) => "ch1_settings",
            BatchGroup::ChSettings(Circuit::Two) => "ch2_settings",
            BatchGroup::SystemControl => "system_control",
        }
    }

    pub const fn register_type(self) -> RegisterType {
        match self {
            BatchGroup::DeviceInfo
            | BatchGroup::NetworkInfo
            | BatchGroup::SystemStatus
            | BatchGroup::Regulation
            | BatchGroup::BoilerStatus
            | BatchGroup::DhwStatus
            | BatchGroup::ChStatus(_) => RegisterType::Input,
            _ => RegisterType::Holding,
        }
    }

    /// Register address of index 0 of the group block.
    pub const fn base_address(self) -> u16 {
        match self {
            BatchGroup::DeviceInfo => 1,
            BatchGroup::NetworkInfo => 12,
            BatchGroup::SystemStatus => 20,
            BatchGroup::Regulation => 30,
            BatchGroup::BoilerStatus => 40,
            BatchGroup::DhwStatus => 101,
            BatchGroup::ChStatus(circuit) => 200 + circuit.offset(),
            BatchGroup::SystemAlerts => 1001,
            BatchGroup::RegulationSettings => 1030,
            BatchGroup::BoilerSettings => 1050,
            BatchGroup::DhwSettings => 1100,
            BatchGroup::ChSettings(circuit) => 1200 + circuit.offset(),
            BatchGroup::SystemControl => 3001,
        }
    }

    /// Minimum block length the decode routine needs.
    pub const fn required_len(self) -> usize {
        match self {
            BatchGroup::DeviceInfo => 11,
            BatchGroup::NetworkInfo => 6,
            BatchGroup::SystemStatus => 2,
            BatchGroup::Regulation => 3,
            BatchGroup::BoilerStatus => 10,
            BatchGroup::DhwStatus => 2,
            BatchGroup::ChStatus(_) => 7,
            BatchGroup::SystemAlerts => 2,
            BatchGroup::RegulationSettings => 6,
            BatchGroup::BoilerSettings => 7,
            BatchGroup::DhwSettings => 8,
            BatchGroup::ChSettings(_) => 20,
            BatchGroup::SystemControl => 10,
        }
    }

    /// Field descriptors of this group, ordered by index.
    ///
    /// The device info block carries device metadata rather than fields, see
    /// [`crate::assembler::DeviceMetadata`].
    pub fn descriptors(self) -> Vec<FieldDescriptor> {
        match self {
            BatchGroup::DeviceInfo => Vec::new(),
            BatchGroup::NetworkInfo => bind(self, NETWORK_INFO),
            BatchGroup::SystemStatus => bind(self, SYSTEM_STATUS),
            BatchGroup::Regulation => bind(self, REGULATION),
            BatchGroup::BoilerStatus => bind(self, BOILER_STATUS),
            BatchGroup::DhwStatus => bind(self, DHW_STATUS),
            BatchGroup::ChStatus(circuit) => bind_circuit(self, circuit, CH_STATUS),
            BatchGroup::SystemAlerts => bind(self, SYSTEM_ALERTS),
            BatchGroup::RegulationSettings => bind(self, REGULATION_SETTINGS),
            BatchGroup::BoilerSettings => bind(self, BOILER_SETTINGS),
            BatchGroup::DhwSettings => bind(self, DHW_SETTINGS),
            BatchGroup::ChSettings(circuit) => bind_circuit(self, circuit, CH_SETTINGS),
            BatchGroup::SystemControl => bind(self, SYSTEM_CONTROL),
        }
    }

    /// Decodes a group block into named values.
    ///
    /// A block shorter than [`Self::required_len`] yields an empty map.
    pub fn decode(self, registers: &[u16]) -> BTreeMap<Field, Quantity> {
        if registers.len() < self.required_len() {
            return BTreeMap::new();
        }
        self.descriptors()
            .into_iter()
            .filter_map(|descriptor| {
                descriptor
                    .decode(registers)
                    .map(|value| (descriptor.field, value))
            })
            .collect()
    }
}

impl fmt::Display for BatchGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value of a heating circuit. The same layout repeats for both circuits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CircuitField {
    StateHeat,
    TemperatureCurrent,
    WaterInputTemp,
    WaterReturnTemp,
    PumpPower,
    Humidity,
    Co2,
    Mode,
    TemperatureDesired,
    TemperatureMin,
    TemperatureMax,
    TemperatureManual,
    TemperatureAntifrost,
    Hysteresis,
    RegulationStrategy,
    WaterTempMin,
    WaterTempMax,
    WaterSetpoint,
    EquithermSlope,
    EquithermOffset,
    EquithermRoomEffect,
    ThresholdSetpoint,
    LimitHeatTemp,
    OptimalStart,
    FastCooldown,
    TempCorrection,
    HumidityCorrection,
}

impl CircuitField {
    pub const fn suffix(self) -> &'static str {
        match self {
            CircuitField::StateHeat => "state_heat",
            CircuitField::TemperatureCurrent => "temperature_current",
            CircuitField::WaterInputTemp => "water_input_temp",
            CircuitField::WaterReturnTemp => "water_return_temp",
            CircuitField::PumpPower => "pump_power",
            CircuitField::Humidity => "humidity",
            CircuitField::Co2 => "co2",
            CircuitField::Mode => "mode",
            CircuitField::TemperatureDesired => "temperature_desired",
            CircuitField::TemperatureMin => "temperature_min",
            CircuitField::TemperatureMax => "temperature_max",
            CircuitField::TemperatureManual => "temperature_manual",
            CircuitField::TemperatureAntifrost => "temperature_antifrost",
            CircuitField::Hysteresis => "hysteresis",
            CircuitField::RegulationStrategy => "regulation_strategy",
            CircuitField::WaterTempMin => "water_temp_min",
            CircuitField::WaterTempMax => "water_temp_max",
            CircuitField::WaterSetpoint => "water_setpoint",
            CircuitField::EquithermSlope => "equitherm_slope",
            CircuitField::EquithermOffset => "equitherm_offset",
            CircuitField::EquithermRoomEffect => "equitherm_room_effect",
            CircuitField::ThresholdSetpoint => "threshold_setpoint",
            CircuitField::LimitHeatTemp => "limit_heat_temp",
            CircuitField::OptimalStart => "optimal_start",
            CircuitField::FastCooldown => "fast_cooldown",
            CircuitField::TempCorrection => "temp_correction",
            CircuitField::HumidityCorrection => "humidity_correction",
        }
    }

    const fn is_status(self) -> bool {
        matches!(
            self,
            CircuitField::StateHeat
                | CircuitField::TemperatureCurrent
                | CircuitField::WaterInputTemp
                | CircuitField::WaterReturnTemp
                | CircuitField::PumpPower
                | CircuitField::Humidity
                | CircuitField::Co2
        )
    }
}

/// Every value the controller reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    IpAddress,
    SubnetMask,
    Gateway,
    CpuTemperature,
    BatteryVoltage,
    RegulationModeCurrent,
    OutdoorTempDamped,
    OutdoorTempComposite,
    BoilerActiveSegments,
    BoilerInactiveSegments,
    BoilerPressure,
    BoilerWaterInputTemp,
    BoilerWaterReturnTemp,
    BoilerPumpPower,
    BoilerHeatingPower,
    BoilerAnalogValue,
    BoilerPwmValue,
    DhwStateHeat,
    DhwTemperatureCurrent,
    SystemAttention,
    RegulationModeUser,
    OutdoorTempSource,
    BuildingMomentum,
    CompositeFilterRatio,
    ChangeoverTemp,
    OutdoorTempManual,
    BoilerLoadRelease,
    BoilerHdoHighTariff,
    BoilerOutdoorTempCorrection,
    BoilerTotalEnergy,
    BoilerWaterSetpoint,
    BoilerWaterTempMax,
    BoilerWaterTempMin,
    DhwMode,
    DhwTemperatureDesired,
    DhwTemperatureMin,
    DhwTemperatureMax,
    DhwTemperatureManual,
    DhwHysteresis,
    DhwRegulationStrategy,
    ControlMode,
    ErrorCode,
    MasterFailMode,
    MasterTimeout,
    CircuitMask,
    Circuit(Circuit, CircuitField),
}

impl Field {
    /// The group whose block carries this field.
    pub const fn group(self) -> BatchGroup {
        match self {
            Field::IpAddress | Field::SubnetMask | Field::Gateway => BatchGroup::NetworkInfo,
            Field::CpuTemperature | Field::BatteryVoltage => BatchGroup::SystemStatus,
            Field::RegulationModeCurrent
            | Field::OutdoorTempDamped
            | Field::OutdoorTempComposite => BatchGroup::Regulation,
            Field::BoilerActiveSegments
            | Field::BoilerInactiveSegments
            | Field::BoilerPressure
            | Field::BoilerWaterInputTemp
            | Field::BoilerWaterReturnTemp
            | Field::BoilerPumpPower
            | Field::BoilerHeatingPower
            | Field::BoilerAnalogValue
            | Field::BoilerPwmValue => BatchGroup::BoilerStatus,
            Field::DhwStateHeat | Field::DhwTemperatureCurrent => BatchGroup::DhwStatus,
            Field::SystemAttention => BatchGroup::SystemAlerts,
            Field::RegulationModeUser
            | Field::OutdoorTempSource
            | Field::BuildingMomentum
            | Field::CompositeFilterRatio
            | Field::ChangeoverTemp
            | Field::OutdoorTempManual => BatchGroup::RegulationSettings,
            Field::BoilerLoadRelease
            | Field::BoilerHdoHighTariff
            | Field::BoilerOutdoorTempCorrection
            | Field::BoilerTotalEnergy
            | Field::BoilerWaterSetpoint
            | Field::BoilerWaterTempMax
            | Field::BoilerWaterTempMin => BatchGroup::BoilerSettings,
            Field::DhwMode
            | Field::DhwTemperatureDesired
            | Field::DhwTemperatureMin
            | Field::DhwTemperatureMax
            | Field::DhwTemperatureManual
            | Field::DhwHysteresis
            | Field::DhwRegulationStrategy => BatchGroup::DhwSettings,
            Field::ControlMode
            | Field::ErrorCode
            | Field::MasterFailMode
            | Field::MasterTimeout
            | Field::CircuitMask => BatchGroup::SystemControl,
            Field::Circuit(circuit, field) if field.is_status() => BatchGroup::ChStatus(circuit),
            Field::Circuit(circuit, _) => BatchGroup::ChSettings(circuit),
        }
    }

    /// Looks up the descriptor of this field.
    pub fn descriptor(self) -> Result<FieldDescriptor, Error> {
        let descriptor = self
            .group()
            .descriptors()
            .into_iter()
            .find(|descriptor| descriptor.field == self);
        debug_assert!(
            descriptor.is_some(),
            "field {self:?} is missing from its group table"
        );
        descriptor.ok_or_else(|| Error::UnknownField(self.to_string()))
    }

    fn key(self) -> &'static str {
        match self {
            Field::IpAddress => "ip_address",
            Field::SubnetMask => "subnet_mask",
            Field::Gateway => "gateway",
            Field::CpuTemperature => "cpu_temperature",
            Field::BatteryVoltage => "battery_voltage",
            Field::RegulationModeCurrent => "regulation_mode_current",
            Field::OutdoorTempDamped => "outdoor_temp_damped",
            Field::OutdoorTempComposite => "outdoor_temp_composite",
            Field::BoilerActiveSegments => "boiler_active_segments",
            Field::BoilerInactiveSegments => "boiler_inactive_segments",
            Field::BoilerPressure => "boiler_pressure",
            Field::BoilerWaterInputTemp => "boiler_water_input_temp",
            Field::BoilerWaterReturnTemp => "boiler_water_return_temp",
            Field::BoilerPumpPower => "boiler_pump_power",
            Field::BoilerHeatingPower => "boiler_heating_power",
            Field::BoilerAnalogValue => "boiler_analog_value",
            Field::BoilerPwmValue => "boiler_pwm_value",
            Field::DhwStateHeat => "dhw_state_heat",
            Field::DhwTemperatureCurrent => "dhw_temperature_current",
            Field::SystemAttention => "system_attention",
            Field::RegulationModeUser => "regulation_mode_user",
            Field::OutdoorTempSource => "outdoor_temp_source",
            Field::BuildingMomentum => "building_momentum",
            Field::CompositeFilterRatio => "composite_filter_ratio",
            Field::ChangeoverTemp => "changeover_temp",
            Field::OutdoorTempManual => "outdoor_temp_manual",
            Field::BoilerLoadRelease => "boiler_load_release",
            Field::BoilerHdoHighTariff => "boiler_hdo_high_tariff",
            Field::BoilerOutdoorTempCorrection => "boiler_outdoor_temp_correction",
            Field::BoilerTotalEnergy => "boiler_total_energy",
            Field::BoilerWaterSetpoint => "boiler_water_setpoint",
            Field::BoilerWaterTempMax => "boiler_water_temp_max",
            Field::BoilerWaterTempMin => "boiler_water_temp_min",
            Field::DhwMode => "dhw_mode",
            Field::DhwTemperatureDesired => "dhw_temperature_desired",
            Field::DhwTemperatureMin => "dhw_temperature_min",
            Field::DhwTemperatureMax => "dhw_temperature_max",
            Field::DhwTemperatureManual => "dhw_temperature_manual",
            Field::DhwHysteresis => "dhw_hysteresis",
            Field::DhwRegulationStrategy => "dhw_regulation_strategy",
            Field::ControlMode => "control_mode",
            Field::ErrorCode => "error_code",
            Field::MasterFailMode => "master_fail_mode",
            Field::MasterTimeout => "master_timeout",
            Field::CircuitMask => "circuit_mask",
            Field::Circuit(_, field) => field.suffix(),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Circuit(circuit, field) => write!(f, "{circuit}_{}", field.suffix()),
            field => f.write_str(field.key()),
        }
    }
}

impl FromStr for Field {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        all_descriptors()
            .map(|descriptor| descriptor.field)
            .find(|field| field.to_string() == name)
            .ok_or_else(|| Error::UnknownField(s.to_string()))
    }
}

/// How a field's registers map to a [`Quantity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Raw register value as integer.
    Raw,
    /// Zero is off, anything else is on.
    Flag,
    /// Scaled physical value.
    Scaled(Resolution, Signedness),
    /// Two registers, high word first.
    Uint32,
    /// Two registers holding an IPv4 address.
    Ipv4,
}

impl Codec {
    /// Number of registers the codec consumes.
    pub const fn width(self) -> usize {
        match self {
            Codec::Uint32 | Codec::Ipv4 => 2,
            _ => 1,
        }
    }

    fn decode(self, registers: &[u16]) -> Quantity {
        match self {
            Codec::Raw => Quantity::Integer(registers[0] as u32),
            Codec::Flag => Quantity::Flag(registers[0] != 0),
            Codec::Scaled(resolution, Signedness::Unsigned) => {
                Quantity::Float(proto::decode_unsigned_scaled(registers[0], resolution))
            }
            Codec::Scaled(resolution, Signedness::Signed) => {
                Quantity::Float(proto::decode_signed_scaled(registers[0], resolution))
            }
            Codec::Uint32 => Quantity::Integer(proto::decode_uint32(registers[0], registers[1])),
            Codec::Ipv4 => Quantity::Text(proto::decode_ip(registers[0], registers[1])),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signedness {
    Unsigned,
    Signed,
}

const RAW: Codec = Codec::Raw;
const FLAG: Codec = Codec::Flag;
const TENTHS: Codec = Codec::Scaled(Resolution::TENTH, Signedness::Unsigned);
const SIGNED_TENTHS: Codec = Codec::Scaled(Resolution::TENTH, Signedness::Signed);

/// Physical unit of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Celsius,
    Volt,
    Bar,
    Percent,
    PartsPerMillion,
    Unitless,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Unit::Celsius => "°C",
            Unit::Volt => "V",
            Unit::Bar => "bar",
            Unit::Percent => "%",
            Unit::PartsPerMillion => "ppm",
            Unit::Unitless => "",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::ReadOnly => write!(f, "ro"),
            Access::ReadWrite => write!(f, "rw"),
        }
    }
}

/// Range and granularity a caller should enforce before writing a field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

impl Limits {
    pub fn contains(&self, value: f32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

const fn limits(min: f32, max: f32, step: f32) -> Option<Limits> {
    Some(Limits { min, max, step })
}

/// One register-backed field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldDescriptor {
    pub field: Field,
    pub group: BatchGroup,
    /// Position inside the group block.
    pub index: usize,
    pub codec: Codec,
    pub unit: Unit,
    pub access: Access,
    /// Declared limits of writable numeric fields.
    pub limits: Option<Limits>,
}

impl FieldDescriptor {
    pub const fn address(&self) -> u16 {
        self.group.base_address() + self.index as u16
    }

    pub const fn register_type(&self) -> RegisterType {
        self.group.register_type()
    }

    pub fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }

    /// Returns `true` if accessing the field needs the authentication handshake first.
    pub fn requires_authentication(&self) -> bool {
        self.register_type() == RegisterType::Holding
            && proto::is_protected(self.address(), self.codec.width() as u16)
    }

    /// Decodes the field from its group block, `None` if the block is too short.
    pub fn decode(&self, registers: &[u16]) -> Option<Quantity> {
        registers
            .get(self.index..)
            .and_then(|registers| self.decode_value(registers))
    }

    /// Decodes the field from its own registers, starting at [`Self::address`].
    pub fn decode_value(&self, registers: &[u16]) -> Option<Quantity> {
        registers
            .get(..self.codec.width())
            .map(|registers| self.codec.decode(registers))
    }

    /// Encodes a value into the register word written at [`Self::address`].
    ///
    /// Limits are not enforced here, see [`Self::check_limits`].
    pub fn encode(&self, value: &Quantity) -> Result<u16, Error> {
        if !self.is_writable() {
            return Err(Error::ReadOnlyField(self.field));
        }
        match (self.codec, value) {
            (Codec::Flag, Quantity::Flag(on)) => Ok(u16::from(*on)),
            (Codec::Flag, Quantity::Integer(raw @ (0 | 1))) => Ok(*raw as u16),
            (Codec::Raw, Quantity::Integer(raw)) => {
                u16::try_from(*raw).map_err(|_| Error::ValueOutOfRange(*raw as f32))
            }
            (Codec::Scaled(resolution, signedness), value) => {
                let value = value.as_f32().ok_or(Error::TypeMismatch {
                    field: self.field,
                    expected: "a number",
                })?;
                match signedness {
                    Signedness::Unsigned => proto::encode_unsigned_scaled(value, resolution),
                    Signedness::Signed => proto::encode_signed_scaled(value, resolution),
                }
            }
            (codec, _) => Err(Error::TypeMismatch {
                field: self.field,
                expected: codec.expected(),
            }),
        }
    }

    /// Parses a textual value according to the field's codec.
    pub fn parse_quantity(&self, text: &str) -> Result<Quantity, Error> {
        let text = text.trim();
        let invalid = || Error::InvalidValue {
            field: self.field,
            value: text.to_string(),
        };
        match self.codec {
            Codec::Flag => match text.to_ascii_lowercase().as_str() {
                "1" | "on" | "true" | "yes" => Ok(Quantity::Flag(true)),
                "0" | "off" | "false" | "no" => Ok(Quantity::Flag(false)),
                _ => Err(invalid()),
            },
            Codec::Raw | Codec::Uint32 => text
                .parse::<u32>()
                .map(Quantity::Integer)
                .map_err(|_| invalid()),
            Codec::Scaled(..) => text
                .parse::<f32>()
                .map(Quantity::Float)
                .map_err(|_| invalid()),
            Codec::Ipv4 => {
                proto::encode_ip(text)?;
                Ok(Quantity::Text(text.to_string()))
            }
        }
    }

    /// Checks a value against the declared limits of the field, if any.
    pub fn check_limits(&self, value: &Quantity) -> Result<(), Error> {
        match (self.limits, value.as_f32()) {
            (Some(limits), Some(number)) if !limits.contains(number) => Err(Error::OutOfLimits {
                field: self.field,
                value: number,
                min: limits.min,
                max: limits.max,
            }),
            _ => Ok(()),
        }
    }

    /// Value to assume when the field is missing from a snapshot.
    ///
    /// Flags read as off, the DHW and circuit temperature bounds fall back to the
    /// controller defaults, every other field is unknown.
    pub fn fallback(&self) -> Option<Quantity> {
        match self.field {
            Field::DhwTemperatureMin => Some(Quantity::Float(30.0)),
            Field::DhwTemperatureMax => Some(Quantity::Float(70.0)),
            Field::Circuit(_, CircuitField::TemperatureMin) => Some(Quantity::Float(5.0)),
            Field::Circuit(_, CircuitField::TemperatureMax) => Some(Quantity::Float(30.0)),
            _ if self.codec == Codec::Flag => Some(Quantity::Flag(false)),
            _ => None,
        }
    }
}

impl Codec {
    const fn expected(self) -> &'static str {
        match self {
            Codec::Raw | Codec::Uint32 => "an integer 0-65535",
            Codec::Flag => "on/off",
            Codec::Scaled(..) => "a number",
            Codec::Ipv4 => "an IPv4 address",
        }
    }
}

struct Slot<K> {
    index: usize,
    key: K,
    codec: Codec,
    unit: Unit,
    access: Access,
    limits: Option<Limits>,
}

const fn ro<K>(index: usize, key: K, codec: Codec, unit: Unit) -> Slot<K> {
    Slot {
        index,
        key,
        codec,
        unit,
        access: Access::ReadOnly,
        limits: None,
    }
}

const fn rw<K>(
    index: usize,
    key: K,
    codec: Codec,
    unit: Unit,
    limits: Option<Limits>,
) -> Slot<K> {
    Slot {
        index,
        key,
        codec,
        unit,
        access: Access::ReadWrite,
        limits,
    }
}

impl<K: Copy> Slot<K> {
    fn bind(&self, group: BatchGroup, field: Field) -> FieldDescriptor {
        FieldDescriptor {
            field,
            group,
            index: self.index,
            codec: self.codec,
            unit: self.unit,
            access: self.access,
            limits: self.limits,
        }
    }
}

fn bind(group: BatchGroup, slots: &[Slot<Field>]) -> Vec<FieldDescriptor> {
    slots
        .iter()
        .map(|slot| slot.bind(group, slot.key))
        .collect()
}

fn bind_circuit(
    group: BatchGroup,
    circuit: Circuit,
    slots: &[Slot<CircuitField>],
) -> Vec<FieldDescriptor> {
    slots
        .iter()
        .map(|slot| slot.bind(group, Field::Circuit(circuit, slot.key)))
        .collect()
}

use Unit::{Bar, Celsius, PartsPerMillion, Percent, Unitless, Volt};

const NETWORK_INFO: &[Slot<Field>] = &[
    ro(0, Field::IpAddress, Codec::Ipv4, Unitless),
    ro(2, Field::SubnetMask, Codec::Ipv4, Unitless),
    ro(4, Field::Gateway, Codec::Ipv4, Unitless),
];

const SYSTEM_STATUS: &[Slot<Field>] = &[
    ro(0, Field::CpuTemperature, TENTHS, Celsius),
    ro(1, Field::BatteryVoltage, TENTHS, Volt),
];

const REGULATION: &[Slot<Field>] = &[
    ro(0, Field::RegulationModeCurrent, RAW, Unitless),
    ro(1, Field::OutdoorTempDamped, SIGNED_TENTHS, Celsius),
    ro(2, Field::OutdoorTempComposite, SIGNED_TENTHS, Celsius),
];

// Index 3 is the boiler request mask, not exposed.
const BOILER_STATUS: &[Slot<Field>] = &[
    ro(0, Field::BoilerActiveSegments, RAW, Unitless),
    ro(1, Field::BoilerInactiveSegments, RAW, Unitless),
    ro(2, Field::BoilerPressure, TENTHS, Bar),
    ro(4, Field::BoilerWaterInputTemp, TENTHS, Celsius),
    ro(5, Field::BoilerWaterReturnTemp, TENTHS, Celsius),
    ro(6, Field::BoilerPumpPower, TENTHS, Percent),
    ro(7, Field::BoilerHeatingPower, TENTHS, Percent),
    ro(8, Field::BoilerAnalogValue, TENTHS, Volt),
    ro(9, Field::BoilerPwmValue, RAW, Unitless),
];

const DHW_STATUS: &[Slot<Field>] = &[
    ro(0, Field::DhwStateHeat, FLAG, Unitless),
    ro(1, Field::DhwTemperatureCurrent, TENTHS, Celsius),
];

const CH_STATUS: &[Slot<CircuitField>] = &[
    ro(0, CircuitField::StateHeat, FLAG, Unitless),
    ro(1, CircuitField::TemperatureCurrent, TENTHS, Celsius),
    ro(2, CircuitField::WaterInputTemp, TENTHS, Celsius),
    ro(3, CircuitField::WaterReturnTemp, TENTHS, Celsius),
    ro(4, CircuitField::PumpPower, TENTHS, Percent),
    ro(5, CircuitField::Humidity, TENTHS, Percent),
    ro(6, CircuitField::Co2, TENTHS, PartsPerMillion),
];

const SYSTEM_ALERTS: &[Slot<Field>] = &[ro(0, Field::SystemAttention, Codec::Uint32, Unitless)];

#[rustfmt::skip]
const REGULATION_SETTINGS: &[Slot<Field>] = &[
    rw(0, Field::RegulationModeUser, RAW, Unitless, None),
    rw(1, Field::OutdoorTempSource, RAW, Unitless, None),
    rw(2, Field::BuildingMomentum, RAW, Unitless, limits(0.0, 200.0, 1.0)),
    rw(3, Field::CompositeFilterRatio, TENTHS, Unitless, limits(0.0, 1.0, 0.1)),
    rw(4, Field::ChangeoverTemp, SIGNED_TENTHS, Celsius, limits(-20.0, 30.0, 0.5)),
    rw(5, Field::OutdoorTempManual, SIGNED_TENTHS, Celsius, limits(-40.0, 50.0, 0.5)),
];

// Indices 7..13 are read with the block but not decoded.
#[rustfmt::skip]
const BOILER_SETTINGS: &[Slot<Field>] = &[
    ro(0, Field::BoilerLoadRelease, RAW, Unitless),
    ro(1, Field::BoilerHdoHighTariff, RAW, Unitless),
    rw(2, Field::BoilerOutdoorTempCorrection, SIGNED_TENTHS, Celsius, limits(-10.0, 10.0, 0.5)),
    ro(3, Field::BoilerTotalEnergy, RAW, Unitless),
    ro(4, Field::BoilerWaterSetpoint, TENTHS, Celsius),
    rw(5, Field::BoilerWaterTempMax, TENTHS, Celsius, limits(30.0, 90.0, 1.0)),
    rw(6, Field::BoilerWaterTempMin, TENTHS, Celsius, limits(10.0, 60.0, 1.0)),
];

// Index 5 (register 1105) does not exist on the device.
#[rustfmt::skip]
const DHW_SETTINGS: &[Slot<Field>] = &[
    rw(0, Field::DhwMode, RAW, Unitless, None),
    ro(1, Field::DhwTemperatureDesired, TENTHS, Celsius),
    ro(2, Field::DhwTemperatureMin, TENTHS, Celsius),
    ro(3, Field::DhwTemperatureMax, TENTHS, Celsius),
    rw(4, Field::DhwTemperatureManual, TENTHS, Celsius, None),
    rw(6, Field::DhwHysteresis, TENTHS, Celsius, limits(0.5, 10.0, 0.5)),
    rw(7, Field::DhwRegulationStrategy, RAW, Unitless, None),
];

#[rustfmt::skip]
const CH_SETTINGS: &[Slot<CircuitField>] = &[
    rw(0, CircuitField::Mode, RAW, Unitless, None),
    ro(1, CircuitField::TemperatureDesired, TENTHS, Celsius),
    ro(2, CircuitField::TemperatureMin, TENTHS, Celsius),
    ro(3, CircuitField::TemperatureMax, TENTHS, Celsius),
    rw(4, CircuitField::TemperatureManual, TENTHS, Celsius, None),
    rw(5, CircuitField::TemperatureAntifrost, TENTHS, Celsius, limits(5.0, 15.0, 0.5)),
    rw(6, CircuitField::Hysteresis, TENTHS, Celsius, limits(0.5, 5.0, 0.5)),
    rw(7, CircuitField::RegulationStrategy, RAW, Unitless, None),
    rw(8, CircuitField::WaterTempMin, TENTHS, Celsius, limits(10.0, 50.0, 1.0)),
    rw(9, CircuitField::WaterTempMax, TENTHS, Celsius, limits(20.0, 90.0, 1.0)),
    ro(10, CircuitField::WaterSetpoint, TENTHS, Celsius),
    rw(11, CircuitField::EquithermSlope, TENTHS, Unitless, limits(0.0, 10.0, 0.1)),
    rw(12, CircuitField::EquithermOffset, SIGNED_TENTHS, Celsius, limits(-20.0, 20.0, 0.5)),
    rw(13, CircuitField::EquithermRoomEffect, RAW, Percent, limits(0.0, 100.0, 5.0)),
    rw(14, CircuitField::ThresholdSetpoint, TENTHS, Celsius, limits(20.0, 90.0, 1.0)),
    rw(15, CircuitField::LimitHeatTemp, TENTHS, Celsius, limits(0.0, 10.0, 0.5)),
    rw(16, CircuitField::OptimalStart, FLAG, Unitless, None),
    rw(17, CircuitField::FastCooldown, FLAG, Unitless, None),
    rw(18, CircuitField::TempCorrection, SIGNED_TENTHS, Celsius, limits(-5.0, 5.0, 0.5)),
    rw(19, CircuitField::HumidityCorrection, SIGNED_TENTHS, Percent, limits(-20.0, 20.0, 1.0)),
];

// Index 0 is the password register; 2, 4, 7 and 8 are reset, RTU speed,
// requested power and device type.
const SYSTEM_CONTROL: &[Slot<Field>] = &[
    rw(1, Field::ControlMode, RAW, Unitless, None),
    ro(3, Field::ErrorCode, RAW, Unitless),
    rw(5, Field::MasterFailMode, RAW, Unitless, None),
    ro(6, Field::MasterTimeout, RAW, Unitless),
    ro(9, Field::CircuitMask, RAW, Unitless),
];

/// Iterates over the descriptors of every group.
pub fn all_descriptors() -> impl Iterator<Item = FieldDescriptor> {
    BatchGroup::ALL
        .into_iter()
        .flat_map(BatchGroup::descriptors)
}

/// A contiguous run of registers read in one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub address: u16,
    pub quantity: u16,
}

/// Slice of a step's block that forms a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub group: BatchGroup,
    pub offset: usize,
    pub len: usize,
}

/// When a step is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Always,
    /// Read always, decides whether the second circuit is installed.
    SecondCircuitCheck,
    /// Read only when the presence check found the second circuit.
    SecondCircuitOnly,
}

/// One entry of the read plan: one or more segments joined into a block, gaps
/// between segments filled with zeros, then sliced into groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadStep {
    pub register_type: RegisterType,
    pub segments: &'static [Segment],
    pub targets: &'static [Target],
    pub presence: Presence,
}

impl ReadStep {
    /// First register address of the block.
    pub fn address(&self) -> u16 {
        self.segments.first().map_or(0, |segment| segment.address)
    }

    /// Block length including gaps.
    pub fn span_len(&self) -> usize {
        self.segments.last().map_or(0, |segment| {
            (segment.address + segment.quantity - self.address()) as usize
        })
    }

    /// Splits a block into its groups. Targets outside the block are skipped.
    pub fn slice<'a>(&self, block: &'a [u16]) -> Vec<(BatchGroup, &'a [u16])> {
        self.targets
            .iter()
            .filter_map(|target| {
                block
                    .get(target.offset..target.offset + target.len)
                    .map(|registers| (target.group, registers))
            })
            .collect()
    }

    pub fn groups(&self) -> impl Iterator<Item = BatchGroup> + '_ {
        self.targets.iter().map(|target| target.group)
    }
}

const fn segment(address: u16, quantity: u16) -> Segment {
    Segment { address, quantity }
}

const fn whole(group: BatchGroup, len: usize) -> Target {
    Target {
        group,
        offset: 0,
        len,
    }
}

const fn step(
    register_type: RegisterType,
    segments: &'static [Segment],
    targets: &'static [Target],
) -> ReadStep {
    ReadStep {
        register_type,
        segments,
        targets,
        presence: Presence::Always,
    }
}

/// The batched read plan executed on every poll, in wire order.
pub const READ_PLAN: &[ReadStep] = &[
    step(
        RegisterType::Input,
        &[segment(1, 17)],
        &[
            whole(BatchGroup::DeviceInfo, 11),
            Target {
                group: BatchGroup::NetworkInfo,
                offset: 11,
                len: 6,
            },
        ],
    ),
    step(
        RegisterType::Input,
        &[segment(20, 2)],
        &[whole(BatchGroup::SystemStatus, 2)],
    ),
    step(
        RegisterType::Input,
        &[segment(30, 3)],
        &[whole(BatchGroup::Regulation, 3)],
    ),
    step(
        RegisterType::Input,
        &[segment(40, 10)],
        &[whole(BatchGroup::BoilerStatus, 10)],
    ),
    step(
        RegisterType::Input,
        &[segment(101, 2)],
        &[whole(BatchGroup::DhwStatus, 2)],
    ),
    step(
        RegisterType::Input,
        &[segment(200, 7)],
        &[whole(BatchGroup::ChStatus(Circuit::One), 7)],
    ),
    ReadStep {
        register_type: RegisterType::Input,
        segments: &[segment(300, 7)],
        targets: &[whole(BatchGroup::ChStatus(Circuit::Two), 7)],
        presence: Presence::SecondCircuitCheck,
    },
    step(
        RegisterType::Holding,
        &[segment(1001, 2)],
        &[whole(BatchGroup::SystemAlerts, 2)],
    ),
    step(
        RegisterType::Holding,
        &[segment(1030, 6)],
        &[whole(BatchGroup::RegulationSettings, 6)],
    ),
    step(
        RegisterType::Holding,
        &[segment(1050, 13)],
        &[whole(BatchGroup::BoilerSettings, 13)],
    ),
    step(
        RegisterType::Holding,
        &[segment(1100, 5), segment(1106, 2)],
        &[whole(BatchGroup::DhwSettings, 8)],
    ),
    step(
        RegisterType::Holding,
        &[segment(1200, 20)],
        &[whole(BatchGroup::ChSettings(Circuit::One), 20)],
    ),
    ReadStep {
        register_type: RegisterType::Holding,
        segments: &[segment(1300, 20)],
        targets: &[whole(BatchGroup::ChSettings(Circuit::Two), 20)],
        presence: Presence::SecondCircuitOnly,
    },
    step(
        RegisterType::Holding,
        &[segment(3001, 10)],
        &[whole(BatchGroup::SystemControl, 10)],
    ),
];

/// Actions that are a register write with no readable state behind them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Acknowledge attention flags and clear the error code.
    ResetError,
    /// Restart the controller.
    RestartDevice,
}

impl Command {
    /// Register writes as `(address, value)`. The command succeeds if any of them does.
    pub const fn writes(self) -> &'static [(u16, u16)] {
        match self {
            Command::ResetError => &[
                (proto::ATTENTION_REG_ADDR, 0),
                (proto::ERROR_CODE_REG_ADDR, 0),
            ],
            Command::RestartDevice => &[(proto::SYSTEM_RESET_REG_ADDR, 1)],
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::ResetError => write!(f, "reset error"),
            Command::RestartDevice => write!(f, "restart device"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const CH_SETTINGS_REGS: [u16; 20] = [
        2, 220, 150, 280, 220, 80, 10, 3, 250, 550, 400, 15, 65516, 50, 450, 30, 1, 0, 65531, 0,
    ];

    fn descriptor(field: Field) -> FieldDescriptor {
        field.descriptor().unwrap()
    }

    fn ch(circuit: Circuit, field: CircuitField) -> FieldDescriptor {
        descriptor(Field::Circuit(circuit, field))
    }

    #[test]
    fn every_field_resolves_to_its_descriptor() {
        for entry in all_descriptors() {
            assert_eq!(entry.field.group(), entry.group);
            assert_eq!(entry.field.descriptor(), Ok(entry));
            let end = entry.index + entry.codec.width();
            assert!(end <= entry.group.required_len());
        }
    }

    #[test]
    fn every_field_variant_has_a_descriptor() {
        // 45 plain fields plus 27 per circuit
        assert_eq!(all_descriptors().count(), 45 + 2 * 27);
    }

    #[test]
    fn field_names_round_trip() {
        let mut names = std::collections::HashSet::new();
        for entry in all_descriptors() {
            let name = entry.field.to_string();
            assert!(names.insert(name.clone()), "duplicate name {name}");
            assert_eq!(name.parse::<Field>(), Ok(entry.field));
        }
        assert_eq!(
            "ch2_equitherm_offset".parse::<Field>(),
            Ok(Field::Circuit(Circuit::Two, CircuitField::EquithermOffset))
        );
        assert_matches!("ch3_mode".parse::<Field>(), Err(Error::UnknownField(..)));
    }

    #[test]
    fn addresses_follow_group_layout() {
        assert_eq!(descriptor(Field::DhwHysteresis).address(), 1106);
        assert_eq!(descriptor(Field::DhwRegulationStrategy).address(), 1107);
        assert_eq!(descriptor(Field::DhwTemperatureManual).address(), 1104);
        assert_eq!(descriptor(Field::ControlMode).address(), 3002);
        assert_eq!(
            descriptor(Field::ErrorCode).address(),
            proto::ERROR_CODE_REG_ADDR
        );
        assert_eq!(
            descriptor(Field::SystemAttention).address(),
            proto::ATTENTION_REG_ADDR
        );
        assert_eq!(ch(Circuit::One, CircuitField::OptimalStart).address(), 1216);
        assert_eq!(
            ch(Circuit::Two, CircuitField::TemperatureManual).address(),
            1304
        );
        assert_eq!(ch(Circuit::Two, CircuitField::Co2).address(), 306);
    }

    #[test]
    fn circuit_fields_carry_units() {
        for circuit in Circuit::ALL {
            assert_eq!(ch(circuit, CircuitField::Co2).unit, Unit::PartsPerMillion);
            assert_eq!(ch(circuit, CircuitField::Humidity).unit, Unit::Percent);
            assert_eq!(
                ch(circuit, CircuitField::TemperatureCurrent).unit,
                Unit::Celsius
            );
            assert_eq!(ch(circuit, CircuitField::Mode).unit, Unit::Unitless);
        }
        assert_eq!(Unit::PartsPerMillion.to_string(), "ppm");
        assert_eq!(ch(Circuit::One, CircuitField::Co2).access.to_string(), "ro");
    }

    #[test]
    fn authentication_follows_register_window() {
        assert!(!descriptor(Field::CpuTemperature).requires_authentication());
        let heat = ch(Circuit::One, CircuitField::StateHeat);
        assert!(!heat.requires_authentication());
        assert!(descriptor(Field::DhwMode).requires_authentication());
        assert!(descriptor(Field::MasterFailMode).requires_authentication());
    }

    #[test]
    fn writable_fields_round_trip_on_their_step() {
        for entry in all_descriptors().filter(FieldDescriptor::is_writable) {
            let (Some(limits), Codec::Scaled(..)) = (entry.limits, entry.codec) else {
                continue;
            };
            let steps = ((limits.max - limits.min) / limits.step).round() as i32;
            for n in 0..=steps {
                let value = limits.min + n as f32 * limits.step;
                let value = (value * 10.0).round() / 10.0;
                let raw = entry
                    .encode(&Quantity::Float(value))
                    .unwrap_or_else(|err| panic!("{}: {err}", entry.field));
                let mut block = vec![0; entry.group.required_len()];
                block[entry.index] = raw;
                let decoded = entry.decode(&block).and_then(|q| q.as_f32());
                assert_eq!(decoded, Some(value), "{} = {value}", entry.field);
            }
        }
    }

    #[test]
    fn encode_by_codec() {
        let offset = ch(Circuit::One, CircuitField::EquithermOffset);
        assert_matches!(offset.encode(&Quantity::Float(-2.0)), Ok(65516));

        let switch = ch(Circuit::Two, CircuitField::FastCooldown);
        assert_matches!(switch.encode(&Quantity::Flag(true)), Ok(1));
        assert_matches!(switch.encode(&Quantity::Flag(false)), Ok(0));
        assert_matches!(
            switch.encode(&Quantity::Float(1.0)),
            Err(Error::TypeMismatch { .. })
        );

        let mode = descriptor(Field::DhwMode);
        assert_matches!(mode.encode(&Quantity::Integer(2)), Ok(2));
        assert_matches!(
            mode.encode(&Quantity::Integer(70_000)),
            Err(Error::ValueOutOfRange(..))
        );

        let momentum = descriptor(Field::BuildingMomentum);
        assert_matches!(momentum.encode(&Quantity::Integer(48)), Ok(48));
        assert_matches!(
            momentum.encode(&Quantity::Float(48.0)),
            Err(Error::TypeMismatch { .. })
        );

        let hysteresis = descriptor(Field::DhwHysteresis);
        assert_matches!(hysteresis.encode(&Quantity::Integer(3)), Ok(30));
        assert_matches!(
            hysteresis.encode(&Quantity::Flag(true)),
            Err(Error::TypeMismatch { .. })
        );

        assert_matches!(
            descriptor(Field::CpuTemperature).encode(&Quantity::Float(40.0)),
            Err(Error::ReadOnlyField(Field::CpuTemperature))
        );
    }

    #[test]
    fn encode_does_not_check_limits() {
        let hysteresis = descriptor(Field::DhwHysteresis);
        assert_matches!(hysteresis.encode(&Quantity::Float(20.0)), Ok(200));
        assert_matches!(
            hysteresis.check_limits(&Quantity::Float(20.0)),
            Err(Error::OutOfLimits { .. })
        );
        assert_matches!(hysteresis.check_limits(&Quantity::Float(2.5)), Ok(()));
        assert_matches!(
            descriptor(Field::DhwMode).check_limits(&Quantity::Integer(9)),
            Ok(())
        );
    }

    #[test]
    fn parse_quantity_by_codec() {
        let switch = ch(Circuit::One, CircuitField::OptimalStart);
        assert_eq!(switch.parse_quantity("on"), Ok(Quantity::Flag(true)));
        assert_eq!(switch.parse_quantity("0"), Ok(Quantity::Flag(false)));
        assert_matches!(
            switch.parse_quantity("maybe"),
            Err(Error::InvalidValue { .. })
        );

        let offset = ch(Circuit::One, CircuitField::EquithermOffset);
        assert_eq!(offset.parse_quantity("-2.5"), Ok(Quantity::Float(-2.5)));

        let mode = descriptor(Field::ControlMode);
        assert_eq!(mode.parse_quantity("1"), Ok(Quantity::Integer(1)));
        assert_matches!(mode.parse_quantity("-1"), Err(Error::InvalidValue { .. }));

        let ip = descriptor(Field::IpAddress);
        assert_matches!(
            ip.parse_quantity("10.0.0"),
            Err(Error::InvalidIpAddress(..))
        );
    }

    #[test]
    fn fallback_policy() {
        assert_eq!(
            ch(Circuit::Two, CircuitField::OptimalStart).fallback(),
            Some(Quantity::Flag(false))
        );
        assert_eq!(
            descriptor(Field::DhwStateHeat).fallback(),
            Some(Quantity::Flag(false))
        );
        assert_eq!(
            descriptor(Field::DhwTemperatureMax).fallback(),
            Some(Quantity::Float(70.0))
        );
        assert_eq!(
            ch(Circuit::One, CircuitField::TemperatureMin).fallback(),
            Some(Quantity::Float(5.0))
        );
        assert_eq!(descriptor(Field::BoilerPressure).fallback(), None);
    }

    #[test]
    fn too_short_blocks_decode_to_nothing() {
        for group in BatchGroup::ALL {
            let short = vec![1; group.required_len() - 1];
            assert!(group.decode(&short).is_empty(), "{group}");
        }
    }

    #[test]
    fn decode_network_info() {
        let values = BatchGroup::NetworkInfo.decode(&[49320, 356, 0xFFFF, 0xFF00, 49320, 257]);
        let text = |field: Field| values[&field].as_str();
        assert_eq!(text(Field::IpAddress), Some("192.168.1.100"));
        assert_eq!(text(Field::SubnetMask), Some("255.255.255.0"));
        assert_eq!(text(Field::Gateway), Some("192.168.1.1"));
    }

    #[test]
    fn decode_boiler_status_skips_request_mask() {
        let block = [3, 0, 15, 0xAAAA, 550, 450, 800, 1000, 0, 50];
        let values = BatchGroup::BoilerStatus.decode(&block);
        assert_eq!(values.len(), 9);
        assert_eq!(values[&Field::BoilerPressure], Quantity::Float(1.5));
        assert_eq!(values[&Field::BoilerWaterInputTemp], Quantity::Float(55.0));
        assert_eq!(values[&Field::BoilerHeatingPower], Quantity::Float(100.0));
        assert_eq!(values[&Field::BoilerPwmValue], Quantity::Integer(50));
    }

    #[test]
    fn decode_regulation_signed_temperatures() {
        let values = BatchGroup::Regulation.decode(&[2, 65511, 65518]);
        assert_eq!(values[&Field::RegulationModeCurrent], Quantity::Integer(2));
        assert_eq!(values[&Field::OutdoorTempDamped], Quantity::Float(-2.5));
        assert_eq!(values[&Field::OutdoorTempComposite], Quantity::Float(-1.8));
    }

    #[test]
    fn decode_dhw_settings_across_gap() {
        let values = BatchGroup::DhwSettings.decode(&[1, 500, 350, 650, 500, 0, 20, 2]);
        assert_eq!(values.len(), 7);
        assert_eq!(values[&Field::DhwTemperatureManual], Quantity::Float(50.0));
        assert_eq!(values[&Field::DhwHysteresis], Quantity::Float(2.0));
        assert_eq!(values[&Field::DhwRegulationStrategy], Quantity::Integer(2));
    }

    #[test]
    fn decode_circuit_settings() {
        let values = BatchGroup::ChSettings(Circuit::One).decode(&CH_SETTINGS_REGS);
        let ch1 = |field| &values[&Field::Circuit(Circuit::One, field)];
        assert_eq!(values.len(), 20);
        assert_eq!(ch1(CircuitField::Mode), &Quantity::Integer(2));
        assert_eq!(
            ch1(CircuitField::TemperatureAntifrost),
            &Quantity::Float(8.0)
        );
        assert_eq!(ch1(CircuitField::EquithermSlope), &Quantity::Float(1.5));
        assert_eq!(ch1(CircuitField::EquithermOffset), &Quantity::Float(-2.0));
        assert_eq!(
            ch1(CircuitField::EquithermRoomEffect),
            &Quantity::Integer(50)
        );
        assert_eq!(ch1(CircuitField::OptimalStart), &Quantity::Flag(true));
        assert_eq!(ch1(CircuitField::FastCooldown), &Quantity::Flag(false));
        assert_eq!(ch1(CircuitField::TempCorrection), &Quantity::Float(-0.5));

        let ch2 = BatchGroup::ChSettings(Circuit::Two).decode(&CH_SETTINGS_REGS);
        let mode = |circuit| Field::Circuit(circuit, CircuitField::Mode);
        assert!(ch2.contains_key(&mode(Circuit::Two)));
        assert!(!ch2.contains_key(&mode(Circuit::One)));
    }

    #[test]
    fn decode_system_control_uses_sparse_indices() {
        let values = BatchGroup::SystemControl.decode(&[5586, 1, 0, 7, 0, 2, 60, 0, 0, 3]);
        assert_eq!(values.len(), 5);
        assert_eq!(values[&Field::ControlMode], Quantity::Integer(1));
        assert_eq!(values[&Field::ErrorCode], Quantity::Integer(7));
        assert_eq!(values[&Field::MasterFailMode], Quantity::Integer(2));
        assert_eq!(values[&Field::MasterTimeout], Quantity::Integer(60));
        assert_eq!(values[&Field::CircuitMask], Quantity::Integer(3));
    }

    #[test]
    fn decode_system_alerts() {
        assert_eq!(
            BatchGroup::SystemAlerts.decode(&[1, 0])[&Field::SystemAttention],
            Quantity::Integer(65536)
        );
    }

    #[test]
    fn read_plan_matches_group_layout() {
        for step in READ_PLAN {
            for pair in step.segments.windows(2) {
                assert!(pair[0].address + pair[0].quantity <= pair[1].address);
            }
            for target in step.targets {
                assert_eq!(target.group.register_type(), step.register_type);
                assert_eq!(
                    target.group.base_address() as usize,
                    step.address() as usize + target.offset
                );
                assert!(target.len >= target.group.required_len());
                assert!(target.offset + target.len <= step.span_len());
            }
        }
        let mut planned: Vec<_> = READ_PLAN.iter().flat_map(ReadStep::groups).collect();
        planned.sort();
        assert_eq!(planned, BatchGroup::ALL.to_vec());
    }

    #[test]
    fn read_step_slices_shared_block() {
        let step = &READ_PLAN[0];
        let block: Vec<u16> = (0..17).collect();
        let slices = step.slice(&block);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0], (BatchGroup::DeviceInfo, &block[0..11]));
        assert_eq!(slices[1], (BatchGroup::NetworkInfo, &block[11..17]));
        assert!(step.slice(&block[..10]).is_empty());
    }

    #[test]
    fn commands() {
        assert_eq!(Command::RestartDevice.writes(), &[(3003, 1)]);
        assert_eq!(Command::ResetError.writes(), &[(1001, 0), (3004, 0)]);
    }
}
