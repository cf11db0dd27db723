// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Types and constants specified by the PCI spec.
//!
//! This module MUST NOT contain any vendor-specific constants!

pub mod hwid {
    //! Hardware ID types and constants

    #![expect(missing_docs)] // constants/fields are self-explanatory

    use core::fmt;
    use open_enum::open_enum;

    /// Vendor ID reported by a PCI Express function that answered a config
    /// read of its Vendor ID register with Configuration Request Retry
    /// Status (CRS software visibility).
    pub const VENDOR_ID_CRS: u16 = 0x0001;

    /// A collection of hardware IDs of a PCI function, as reflected in the
    /// corresponding PCI configuration space registers.
    ///
    /// See PCI 2.3 Spec - 6.2.1 for details on each of these fields.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct HardwareIds {
        pub vendor_id: u16,
        pub device_id: u16,
        pub revision_id: u8,
        pub prog_if: ProgrammingInterface,
        pub sub_class: Subclass,
        pub base_class: ClassCode,
        pub type0_sub_vendor_id: u16,
        pub type0_sub_system_id: u16,
    }

    impl HardwareIds {
        /// Decodes the Class Code / Revision ID dword at offset 0x08.
        pub fn with_class_revision(mut self, class_revision: u32) -> Self {
            self.base_class = ClassCode((class_revision >> 24) as u8);
            self.sub_class = Subclass((class_revision >> 16) as u8);
            self.prog_if = ProgrammingInterface((class_revision >> 8) as u8);
            self.revision_id = class_revision as u8;
            self
        }

        /// Encodes the Class Code / Revision ID dword at offset 0x08.
        pub fn class_revision(&self) -> u32 {
            (self.base_class.0 as u32) << 24
                | (self.sub_class.0 as u32) << 16
                | (self.prog_if.0 as u32) << 8
                | self.revision_id as u32
        }
    }

    /// ClassCode identifies the PCI device's type.
    ///
    /// Values pulled from <https://wiki.osdev.org/PCI#Class_Codes>.
    #[open_enum]
    #[derive(Debug, Copy, Clone, Hash)]
    #[repr(u8)]
    pub enum ClassCode {
        UNCLASSIFIED = 0x00,
        MASS_STORAGE_CONTROLLER = 0x01,
        NETWORK_CONTROLLER = 0x02,
        DISPLAY_CONTROLLER = 0x03,
        MULTIMEDIA_CONTROLLER = 0x04,
        MEMORY_CONTROLLER = 0x05,
        BRIDGE = 0x06,
        SIMPLE_COMMUNICATION_CONTROLLER = 0x07,
        BASE_SYSTEM_PERIPHERAL = 0x08,
        INPUT_DEVICE_CONTROLLER = 0x09,
        DOCKING_STATION = 0x0A,
        PROCESSOR = 0x0B,
        SERIAL_BUS_CONTROLLER = 0x0C,
        WIRELESS_CONTROLLER = 0x0D,
        INTELLIGENT_CONTROLLER = 0x0E,
        SATELLITE_COMMUNICATION_CONTROLLER = 0x0F,
        ENCRYPTION_CONTROLLER = 0x10,
        SIGNAL_PROCESSING_CONTROLLER = 0x11,
        PROCESSING_ACCELERATOR = 0x12,
        NONESSENTIAL_INSTRUMENTATION = 0x13,
        // 0x14 - 0x3F: Reserved
        CO_PROCESSOR = 0x40,
        // 0x41 - 0xFE: Reserved
        /// Vendor specific
        UNASSIGNED = 0xFF,
    }

    impl ClassCode {
        pub fn is_reserved(&self) -> bool {
            let c = &self.0;
            (0x14..=0x3f).contains(c) || (0x41..=0xfe).contains(c)
        }
    }

    impl fmt::Display for ClassCode {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            if self.is_reserved() {
                return write!(f, "RESERVED({:#04x})", self.0);
            }
            fmt::Debug::fmt(self, f)
        }
    }

    impl From<u8> for ClassCode {
        fn from(c: u8) -> Self {
            Self(c)
        }
    }

    impl From<ClassCode> for u8 {
        fn from(c: ClassCode) -> Self {
            c.0
        }
    }

    // Most subclass/programming interface values aren't used, and don't have
    // names that can easily be made into variable identifiers.
    //
    // Therefore, only add values as needed.

    /// SubclassCode identifies the PCI device's function.
    ///
    /// Values pulled from <https://wiki.osdev.org/PCI#Class_Codes>.
    #[open_enum(allow_alias)]
    #[derive(Debug, Copy, Clone, Hash)]
    #[repr(u8)]
    pub enum Subclass {
        NONE = 0x00,

        // Display Controller (Class code: 0x03)
        DISPLAY_CONTROLLER_VGA = 0x00,

        // Bridge (Class code: 0x06)
        BRIDGE_HOST = 0x00,
        BRIDGE_ISA = 0x01,
        BRIDGE_PCI_TO_PCI = 0x04,
        BRIDGE_CARDBUS = 0x07,
        BRIDGE_OTHER = 0x80,
    }

    impl From<u8> for Subclass {
        fn from(c: u8) -> Self {
            Self(c)
        }
    }

    impl From<Subclass> for u8 {
        fn from(c: Subclass) -> Self {
            c.0
        }
    }

    /// ProgrammingInterface (aka, program interface byte) identifies the PCI
    /// device's register-level programming interface.
    #[open_enum(allow_alias)]
    #[derive(Debug, Copy, Clone, Hash)]
    #[repr(u8)]
    pub enum ProgrammingInterface {
        NONE = 0x00,

        // PCI-to-PCI Bridge (Class code: 0x06, Subclass: 0x04)
        BRIDGE_PCI_TO_PCI_SUBTRACTIVE_DECODE = 0x01,
    }

    impl From<u8> for ProgrammingInterface {
        fn from(c: u8) -> Self {
            Self(c)
        }
    }

    impl From<ProgrammingInterface> for u8 {
        fn from(c: ProgrammingInterface) -> Self {
            c.0
        }
    }
}

/// Configuration Space
///
/// Sources: PCI 2.3 Spec - Chapter 6, PCI-to-PCI Bridge Architecture Spec 1.2
#[expect(missing_docs)] // primarily enums/structs with self-explanatory variants
pub mod cfg_space {
    use bitfield_struct::bitfield;
    use open_enum::open_enum;

    /// Common configuration space header registers shared between Type 0 and
    /// Type 1 headers.
    ///
    /// | Offset | Bits 31-24     | Bits 23-16  | Bits 15-8     | Bits 7-0             |
    /// |--------|----------------|-------------|---------------|----------------------|
    /// | 0x0    | Device ID      |             | Vendor ID     |                      |
    /// | 0x4    | Status         |             | Command       |                      |
    /// | 0x8    | Class code     |             |               | Revision ID          |
    /// | 0xC    | BIST           | Header type | Latency Timer | Cache Line Size      |
    /// | 0x34   | Reserved       |             |               | Capabilities Pointer |
    #[open_enum]
    #[derive(Debug, Copy, Clone)]
    #[repr(u16)]
    pub enum CommonHeader {
        DEVICE_VENDOR = 0x00,
        STATUS_COMMAND = 0x04,
        CLASS_REVISION = 0x08,
        BIST_HEADER = 0x0C,
        RESERVED_CAP_PTR = 0x34,
    }

    /// Byte offset of the Vendor ID register.
    pub const VENDOR_ID: u16 = 0x00;
    /// Byte offset of the Command register.
    pub const COMMAND: u16 = 0x04;
    /// Byte offset of the Status register.
    pub const STATUS: u16 = 0x06;
    /// Byte offset of the Header Type register.
    pub const HEADER_TYPE: u16 = 0x0E;
    /// Byte offset of the Interrupt Line register (type 0 and type 1).
    pub const INTERRUPT_LINE: u16 = 0x3C;

    /// Offsets into the type 00h configuration space header.
    ///
    /// Table pulled from <https://wiki.osdev.org/PCI>
    ///
    /// | Offset | Bits 31-24                 | Bits 23-16  | Bits 15-8           | Bits 7-0             |
    /// |--------|----------------------------|-------------|---------------------|--------------------- |
    /// | 0x0    | Device ID                  |             | Vendor ID           |                      |
    /// | 0x4    | Status                     |             | Command             |                      |
    /// | 0x8    | Class code                 |             |                     | Revision ID          |
    /// | 0xC    | BIST                       | Header type | Latency Timer       | Cache Line Size      |
    /// | 0x10   | Base address #0 (BAR0)     |             |                     |                      |
    /// | 0x14   | Base address #1 (BAR1)     |             |                     |                      |
    /// | 0x18   | Base address #2 (BAR2)     |             |                     |                      |
    /// | 0x1C   | Base address #3 (BAR3)     |             |                     |                      |
    /// | 0x20   | Base address #4 (BAR4)     |             |                     |                      |
    /// | 0x24   | Base address #5 (BAR5)     |             |                     |                      |
    /// | 0x28   | Cardbus CIS Pointer        |             |                     |                      |
    /// | 0x2C   | Subsystem ID               |             | Subsystem Vendor ID |                      |
    /// | 0x30   | Expansion ROM base address |             |                     |                      |
    /// | 0x34   | Reserved                   |             |                     | Capabilities Pointer |
    /// | 0x38   | Reserved                   |             |                     |                      |
    /// | 0x3C   | Max latency                | Min Grant   | Interrupt PIN       | Interrupt Line       |
    #[open_enum]
    #[derive(Debug, Copy, Clone)]
    #[repr(u16)]
    pub enum HeaderType00 {
        DEVICE_VENDOR = 0x00,
        STATUS_COMMAND = 0x04,
        CLASS_REVISION = 0x08,
        BIST_HEADER = 0x0C,
        BAR0 = 0x10,
        BAR1 = 0x14,
        BAR2 = 0x18,
        BAR3 = 0x1C,
        BAR4 = 0x20,
        BAR5 = 0x24,
        CARDBUS_CIS_PTR = 0x28,
        SUBSYSTEM_ID = 0x2C,
        EXPANSION_ROM_BASE = 0x30,
        RESERVED_CAP_PTR = 0x34,
        RESERVED = 0x38,
        LATENCY_INTERRUPT = 0x3C,
    }

    pub const HEADER_TYPE_00_BAR_COUNT: usize = 6;

    /// Offsets into the type 01h configuration space header.
    ///
    /// Table pulled from <https://wiki.osdev.org/PCI>
    ///
    /// | Offset | Bits 31-24                       | Bits 23-16             | Bits 15-8                | Bits 7-0             |
    /// |--------|----------------------------------|------------------------|--------------------------|--------------------- |
    /// | 0x0    | Device ID                        |                        | Vendor ID                |                      |
    /// | 0x4    | Status                           |                        | Command                  |                      |
    /// | 0x8    | Class code                       |                        |                          | Revision ID          |
    /// | 0xC    | BIST                             | Header Type            | Latency Timer            | Cache Line Size      |
    /// | 0x10   | Base address #0 (BAR0)           |                        |                          |                      |
    /// | 0x14   | Base address #1 (BAR1)           |                        |                          |                      |
    /// | 0x18   | Secondary Latency Timer          | Subordinate Bus Number | Secondary Bus Number     | Primary Bus Number   |
    /// | 0x1C   | Secondary Status                 |                        | I/O Limit                | I/O Base             |
    /// | 0x20   | Memory Limit                     |                        | Memory Base              |                      |
    /// | 0x24   | Prefetchable Memory Limit        |                        | Prefetchable Memory Base |                      |
    /// | 0x28   | Prefetchable Base Upper 32 Bits  |                        |                          |                      |
    /// | 0x2C   | Prefetchable Limit Upper 32 Bits |                        |                          |                      |
    /// | 0x30   | I/O Limit Upper 16 Bits          |                        | I/O Base Upper 16 Bits   |                      |
    /// | 0x34   | Reserved                         |                        |                          | Capabilities Pointer |
    /// | 0x38   | Expansion ROM Base Address       |                        |                          |                      |
    /// | 0x3C   | Bridge Control                   |                        | Interrupt PIN            | Interrupt Line       |
    #[open_enum]
    #[derive(Debug, Copy, Clone)]
    #[repr(u16)]
    pub enum HeaderType01 {
        DEVICE_VENDOR = 0x00,
        STATUS_COMMAND = 0x04,
        CLASS_REVISION = 0x08,
        BIST_HEADER = 0x0C,
        BAR0 = 0x10,
        BAR1 = 0x14,
        LATENCY_BUS_NUMBERS = 0x18,
        SEC_STATUS_IO_RANGE = 0x1C,
        MEMORY_RANGE = 0x20,
        PREFETCH_RANGE = 0x24,
        PREFETCH_BASE_UPPER = 0x28,
        PREFETCH_LIMIT_UPPER = 0x2C,
        IO_RANGE_UPPER = 0x30,
        RESERVED_CAP_PTR = 0x34,
        EXPANSION_ROM_BASE = 0x38,
        BRIDGE_CTRL_INTERRUPT = 0x3C,
    }

    pub const HEADER_TYPE_01_BAR_COUNT: usize = 2;

    /// Byte offsets of the individual type 01h registers that are accessed
    /// with byte or word granularity.
    pub mod bridge {
        pub const SUBORDINATE_BUS: u16 = 0x1A;
        pub const IO_BASE: u16 = 0x1C;
        pub const IO_LIMIT: u16 = 0x1D;
        pub const MEMORY_BASE: u16 = 0x20;
        pub const MEMORY_LIMIT: u16 = 0x22;
        pub const PREFETCH_BASE: u16 = 0x24;
        pub const PREFETCH_LIMIT: u16 = 0x26;
        pub const PREFETCH_BASE_UPPER: u16 = 0x28;
        pub const PREFETCH_LIMIT_UPPER: u16 = 0x2C;
        pub const IO_BASE_UPPER: u16 = 0x30;
        pub const IO_LIMIT_UPPER: u16 = 0x32;
        pub const BRIDGE_CONTROL: u16 = 0x3E;

        /// Low nibble of the I/O base/limit registers: addressing capability.
        pub const IO_RANGE_TYPE_MASK: u8 = 0x0F;
        pub const IO_RANGE_TYPE_32: u8 = 0x01;
        /// Bits 15:12 of the I/O address live in bits 7:4 of the register.
        pub const IO_RANGE_MASK: u8 = 0xF0;
        /// Low nibble of the prefetchable base/limit: addressing capability.
        pub const PREFETCH_RANGE_TYPE_MASK: u16 = 0x000F;
        pub const PREFETCH_RANGE_TYPE_64: u16 = 0x0001;
        /// Bits 31:20 of the memory address live in bits 15:4.
        pub const MEMORY_RANGE_MASK: u16 = 0xFFF0;

        /// I/O windows are 4K granular.
        pub const IO_WINDOW_GRANULARITY: u64 = 0x1000;
        /// Memory windows are 1M granular.
        pub const MEMORY_WINDOW_GRANULARITY: u64 = 0x10_0000;
    }

    /// Offsets into the type 02h (CardBus bridge) configuration space header.
    ///
    /// Only the registers the enumerator touches are listed.
    #[open_enum]
    #[derive(Debug, Copy, Clone)]
    #[repr(u16)]
    pub enum HeaderType02 {
        SOCKET_BASE = 0x10,
        BUS_NUMBERS = 0x18,
    }

    pub const HEADER_TYPE_02_BAR_COUNT: usize = 1;

    /// Layout of the Header Type register.
    #[bitfield(u8)]
    #[derive(PartialEq, Eq)]
    pub struct HeaderTypeRegister {
        #[bits(7)]
        pub layout: u8,
        pub multi_function: bool,
    }

    /// Header layouts, encoded in bits 6:0 of the Header Type register.
    #[open_enum]
    #[derive(Debug, Copy, Clone, Hash)]
    #[repr(u8)]
    pub enum HeaderLayout {
        NORMAL = 0x00,
        BRIDGE = 0x01,
        CARDBUS = 0x02,
    }

    /// BAR in-band encoding bits.
    ///
    /// The low bits of the BAR are not actually part of the address.
    /// Instead, they are used to in-band encode various bits of
    /// metadata about the BAR, and are masked off when determining the
    /// actual address.
    #[bitfield(u32)]
    pub struct BarEncodingBits {
        pub use_pio: bool,

        _reserved: bool,

        /// False indicates 32 bit.
        /// Only used in MMIO
        pub type_64_bit: bool,
        pub prefetchable: bool,

        #[bits(28)]
        _reserved2: u32,
    }

    /// Bits of a memory BAR that carry address/size information.
    pub const BAR_MEMORY_ADDRESS_MASK: u32 = !0xF;
    /// Bits of an I/O BAR that carry address/size information.
    pub const BAR_IO_ADDRESS_MASK: u32 = !0x3;
    /// Expansion ROM address decode enable bit.
    pub const ROM_ADDRESS_ENABLE: u32 = 0x1;
    /// Bits of an expansion ROM BAR that carry address/size information.
    pub const ROM_ADDRESS_MASK: u32 = !0x7FF;

    /// Command Register
    #[bitfield(u16)]
    #[derive(PartialEq, Eq)]
    pub struct Command {
        pub pio_enabled: bool,
        pub mmio_enabled: bool,
        pub bus_master: bool,
        pub special_cycles: bool,
        pub enable_memory_write_invalidate: bool,
        pub vga_palette_snoop: bool,
        pub parity_error_response: bool,
        /// must be 0
        #[bits(1)]
        _reserved: u16,
        pub enable_serr: bool,
        pub enable_fast_b2b: bool,
        pub intx_disable: bool,
        #[bits(5)]
        _reserved2: u16,
    }

    /// Status Register
    #[bitfield(u16)]
    pub struct Status {
        #[bits(3)]
        _reserved: u16,
        pub interrupt_status: bool,
        pub capabilities_list: bool,
        pub capable_mhz_66: bool,
        _reserved2: bool,
        pub capable_fast_b2b: bool,
        pub err_master_parity: bool,
        #[bits(2)]
        pub devsel: u16,
        pub abort_target_signaled: bool,
        pub abort_target_received: bool,
        pub abort_master_received: bool,
        pub err_signaled: bool,
        pub err_detected_parity: bool,
    }

    /// Bridge Control Register (type 01h, offset 0x3E)
    #[bitfield(u16)]
    #[derive(PartialEq, Eq)]
    pub struct BridgeControl {
        pub parity_error_response: bool,
        pub serr_enable: bool,
        pub isa_enable: bool,
        pub vga_enable: bool,
        pub vga_16bit_decode: bool,
        pub master_abort_mode: bool,
        pub secondary_bus_reset: bool,
        pub fast_b2b_enable: bool,
        pub primary_discard_timeout: bool,
        pub secondary_discard_timeout: bool,
        pub discard_timer_status: bool,
        pub discard_timer_serr_enable: bool,
        #[bits(4)]
        _reserved: u16,
    }
}

/// Capabilities
#[expect(missing_docs)] // self explanatory variants
pub mod caps {
    use open_enum::open_enum;

    /// First offset usable by the classic capability list.
    pub const CAPABILITY_LIST_START: u16 = 0x40;
    /// Offset of the first extended capability header.
    pub const EXTENDED_CAPABILITY_START: u16 = 0x100;
    /// Size of the extended configuration space.
    pub const EXTENDED_CONFIG_SPACE_SIZE: u16 = 0x1000;

    /// Capability IDs
    ///
    /// Sources: PCI 2.3 Spec - Appendix H
    ///
    /// NOTE: this is a non-exhaustive list, so don't be afraid to add new
    /// variants on an as-needed basis!
    #[open_enum]
    #[derive(Debug, Copy, Clone, Hash)]
    #[repr(u8)]
    pub enum CapabilityId {
        POWER_MANAGEMENT = 0x01,
        MSI = 0x05,
        VENDOR_SPECIFIC = 0x09,
        PCI_BRIDGE_SUBSYSTEM_ID = 0x0D,
        PCI_EXPRESS = 0x10,
        MSIX = 0x11,
    }

    /// Extended capability IDs, found in PCI Express extended configuration
    /// space starting at offset 0x100.
    #[open_enum]
    #[derive(Debug, Copy, Clone, Hash)]
    #[repr(u16)]
    pub enum ExtendedCapabilityId {
        ADVANCED_ERROR_REPORTING = 0x0001,
        VIRTUAL_CHANNEL = 0x0002,
        DEVICE_SERIAL_NUMBER = 0x0003,
        ACCESS_CONTROL_SERVICES = 0x000D,
        ALTERNATIVE_ROUTING_ID = 0x000E,
        SINGLE_ROOT_IOV = 0x0010,
    }

    /// Extended capability header (first dword of every extended capability).
    #[bitfield_struct::bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct ExtendedCapabilityHeader {
        pub capability_id: u16,
        #[bits(4)]
        pub version: u8,
        /// Offset of the next header, zero at the end of the list.
        #[bits(12)]
        pub next_offset: u16,
    }

    /// Alternative Routing-ID Interpretation
    pub mod ari {
        use bitfield_struct::bitfield;

        /// Offset of the ARI Capability register within the capability.
        pub const ARI_CAPABILITY: u16 = 0x04;

        /// ARI Capability Register
        #[bitfield(u16)]
        pub struct AriCapability {
            pub mfvc_function_groups: bool,
            pub acs_function_groups: bool,
            #[bits(6)]
            _reserved: u16,
            #[bits(8)]
            pub next_function_number: u8,
        }
    }

    /// PCI Express
    pub mod pci_express {
        use bitfield_struct::bitfield;
        use open_enum::open_enum;

        /// Offsets into the PCI Express Capability Header
        ///
        /// Table pulled from PCI Express Base Specification Rev. 3.0
        ///
        /// | Offset    | Bits 31-24       | Bits 23-16       | Bits 15-8        | Bits 7-0             |
        /// |-----------|------------------|----------------- |------------------|----------------------|
        /// | Cap + 0x0 | PCI Express Capabilities Register   | Next Pointer     | Capability ID (0x10) |
        /// | Cap + 0x4 | Device Capabilities Register                                                  |
        /// | Cap + 0x8 | Device Status    | Device Control                                             |
        /// | Cap + 0xC | Link Capabilities Register                                                    |
        /// | Cap + 0x10| Link Status      | Link Control                                               |
        /// | Cap + 0x14| Slot Capabilities Register                                                    |
        /// | Cap + 0x18| Slot Status      | Slot Control                                               |
        /// | Cap + 0x1C| Root Capabilities| Root Control                                               |
        /// | Cap + 0x20| Root Status Register                                                          |
        /// | Cap + 0x24| Device Capabilities 2 Register                                                |
        /// | Cap + 0x28| Device Status 2  | Device Control 2                                           |
        #[open_enum]
        #[derive(Debug, Copy, Clone)]
        #[repr(u16)]
        pub enum PciExpressCapabilityHeader {
            PCIE_CAPS = 0x00,
            DEVICE_CAPS = 0x04,
            DEVICE_CTL_STS = 0x08,
            LINK_CAPS = 0x0C,
            LINK_CTL_STS = 0x10,
            SLOT_CAPS = 0x14,
            SLOT_CTL_STS = 0x18,
            ROOT_CTL_CAPS = 0x1C,
            ROOT_STS = 0x20,
            DEVICE_CAPS_2 = 0x24,
            DEVICE_CTL_STS_2 = 0x28,
        }

        /// Byte offset of the PCI Express Capabilities register.
        pub const PCIE_CAPS_REGISTER: u16 = 0x02;

        /// PCI Express Capabilities Register
        #[bitfield(u16)]
        #[derive(PartialEq, Eq)]
        pub struct PciExpressCapabilities {
            #[bits(4)]
            pub capability_version: u16,
            #[bits(4)]
            pub device_port_type: DevicePortType,
            pub slot_implemented: bool,
            #[bits(5)]
            pub interrupt_message_number: u16,
            pub _undefined: bool,
            pub flit_mode_supported: bool,
        }

        /// Device/port type field of the PCI Express Capabilities register.
        ///
        /// Reserved encodings are kept as-is rather than rejected, since the
        /// value comes from hardware.
        #[open_enum]
        #[derive(Debug, Copy, Clone, Hash)]
        #[repr(u8)]
        pub enum DevicePortType {
            ENDPOINT = 0b0000,
            LEGACY_ENDPOINT = 0b0001,
            ROOT_PORT = 0b0100,
            UPSTREAM_SWITCH_PORT = 0b0101,
            DOWNSTREAM_SWITCH_PORT = 0b0110,
            PCIE_TO_PCI_BRIDGE = 0b0111,
            PCI_TO_PCIE_BRIDGE = 0b1000,
            ROOT_COMPLEX_INTEGRATED_ENDPOINT = 0b1001,
            ROOT_COMPLEX_EVENT_COLLECTOR = 0b1010,
        }

        impl DevicePortType {
            const fn from_bits(bits: u16) -> Self {
                Self(bits as u8)
            }

            const fn into_bits(self) -> u16 {
                self.0 as u16
            }

            /// Returns true for ports whose secondary bus has a single link
            /// partner, i.e. only device 0 can be present behind them.
            pub fn is_downstream_port(&self) -> bool {
                *self == Self::ROOT_PORT || *self == Self::DOWNSTREAM_SWITCH_PORT
            }
        }

        /// Slot Capabilities Register
        #[bitfield(u32)]
        pub struct SlotCapabilities {
            pub attention_button_present: bool,
            pub power_controller_present: bool,
            pub mrl_sensor_present: bool,
            pub attention_indicator_present: bool,
            pub power_indicator_present: bool,
            pub hot_plug_surprise: bool,
            pub hot_plug_capable: bool,
            #[bits(8)]
            pub slot_power_limit_value: u32,
            #[bits(2)]
            pub slot_power_limit_scale: u32,
            pub electromechanical_interlock_present: bool,
            pub no_command_completed_support: bool,
            #[bits(13)]
            pub physical_slot_number: u32,
        }

        /// Device Capabilities 2 Register
        #[bitfield(u32)]
        pub struct DeviceCapabilities2 {
            #[bits(4)]
            pub completion_timeout_ranges_supported: u32,
            pub completion_timeout_disable_supported: bool,
            pub ari_forwarding_supported: bool,
            pub atomic_op_routing_supported: bool,
            pub atomic_op_32_bit_completer_supported: bool,
            pub atomic_op_64_bit_completer_supported: bool,
            pub cas_128_bit_completer_supported: bool,
            pub no_ro_enabled_pr_pr_passing: bool,
            pub ltr_mechanism_supported: bool,
            #[bits(2)]
            pub tph_completer_supported: u32,
            #[bits(18)]
            _reserved: u32,
        }

        /// Device Control 2 Register
        #[bitfield(u16)]
        pub struct DeviceControl2 {
            #[bits(4)]
            pub completion_timeout_value: u16,
            pub completion_timeout_disable: bool,
            pub ari_forwarding_enable: bool,
            pub atomic_op_requester_enable: bool,
            pub atomic_op_egress_blocking: bool,
            pub ido_request_enable: bool,
            pub ido_completion_enable: bool,
            pub ltr_mechanism_enable: bool,
            pub emergency_power_reduction_request: bool,
            pub ten_bit_tag_requester_enable: bool,
            #[bits(2)]
            pub obff_enable: u16,
            pub end_end_tlp_prefix_blocking: bool,
        }
    }
}
